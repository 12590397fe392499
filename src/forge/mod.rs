//! forge
//!
//! Abstraction over remote hosting services.
//!
//! The [`Forge`] trait covers identity and change-id marshalling; the
//! [`Repository`] trait covers per-repository operations. Variants are
//! selected by parsing the remote URL in [`factory`]; the core never
//! branches on forge identity anywhere else.

pub mod factory;
pub mod shamhub;
pub mod traits;

pub mod github;

#[cfg(feature = "bitbucket")]
pub mod bitbucket;
#[cfg(feature = "gitlab")]
pub mod gitlab;

pub use factory::{
    connect_repository, detect_provider, forge_identity, valid_forge_names, ForgeProvider,
};
pub use traits::{
    ChangeComment, ChangeId, ChangeInfo, ChangeState, EditChangeOptions, Forge, ForgeError,
    ListChangeCommentsOptions, Repository, SubmitChangeRequest, SubmittedChange,
};
