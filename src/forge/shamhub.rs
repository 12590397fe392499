//! forge::shamhub
//!
//! In-process forge for deterministic testing.
//!
//! # Design
//!
//! ShamHub stores changes and comments in memory and implements the full
//! [`Repository`] contract. Tests can preload branches, script failures,
//! give merges a settling latency (to exercise polling), and read back the
//! exact operation sequence the code under test performed.
//!
//! # Example
//!
//! ```
//! use strata::forge::shamhub::ShamHub;
//! use strata::forge::{Repository, SubmitChangeRequest, ChangeState};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let forge = ShamHub::new();
//! forge.add_branch("main");
//!
//! let change = forge.submit_change(SubmitChangeRequest {
//!     subject: "Add feature".to_string(),
//!     body: String::new(),
//!     base: "main".to_string(),
//!     head: "feature".to_string(),
//!     draft: false,
//!     reviewers: vec![],
//!     labels: vec![],
//! }).await.unwrap();
//!
//! let states = forge.changes_states(&[change.id]).await.unwrap();
//! assert_eq!(states, vec![ChangeState::Open]);
//! # });
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::traits::{
    ChangeComment, ChangeId, ChangeInfo, ChangeState, EditChangeOptions, Forge, ForgeError,
    ListChangeCommentsOptions, Repository, SubmitChangeRequest, SubmittedChange,
};

/// ShamHub forge identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sham;

impl Forge for Sham {
    fn name(&self) -> &'static str {
        "shamhub"
    }

    fn env_token_var(&self) -> &'static str {
        "SHAMHUB_TOKEN"
    }
}

/// Which operation should fail, and with what.
#[derive(Debug)]
pub enum FailOn {
    Submit(ForgeError),
    Edit(ForgeError),
    Merge(ForgeError),
    States(ForgeError),
}

/// Recorded operation, for order-of-calls assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Submit { head: String, base: String },
    Edit { id: u64, base: Option<String> },
    Merge { id: u64 },
    Close { id: u64 },
    States { ids: Vec<u64> },
    PostComment { id: u64 },
    UpdateComment { id: u64, comment_id: u64 },
    DeleteComment { id: u64, comment_id: u64 },
}

#[derive(Debug, Clone)]
struct ShamChange {
    info: ChangeInfo,
    /// Remaining state polls before a merging change reports Merged.
    settle_polls: u32,
    comments: BTreeMap<u64, String>,
}

#[derive(Debug, Default)]
struct ShamState {
    changes: BTreeMap<u64, ShamChange>,
    branches: HashSet<String>,
    next_change: u64,
    next_comment: u64,
    merge_latency: u32,
    fail_on: Option<FailOn>,
    operations: Vec<Operation>,
}

/// The in-process test forge. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ShamHub {
    forge: Sham,
    state: Arc<Mutex<ShamState>>,
}

impl ShamHub {
    /// Create an empty forge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a branch as existing on the forge. Submissions targeting
    /// unregistered branches fail with [`ForgeError::UnsubmittedBase`].
    pub fn add_branch(&self, name: &str) {
        self.state.lock().unwrap().branches.insert(name.to_string());
    }

    /// Make merged changes settle only after `polls` state queries, to
    /// exercise the caller's polling loop.
    pub fn set_merge_latency(&self, polls: u32) {
        self.state.lock().unwrap().merge_latency = polls;
    }

    /// Script the next matching operation to fail.
    pub fn fail_on(&self, fail: FailOn) {
        self.state.lock().unwrap().fail_on = Some(fail);
    }

    /// Directly set a change's state (test setup).
    pub fn set_state(&self, id: ChangeId, state: ChangeState) {
        let mut guard = self.state.lock().unwrap();
        if let Some(change) = guard.changes.get_mut(&id.0) {
            change.info.state = state;
            change.settle_polls = 0;
        }
    }

    /// All operations performed so far, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Snapshot of a change (test verification).
    pub fn change(&self, id: ChangeId) -> Option<ChangeInfo> {
        self.state
            .lock()
            .unwrap()
            .changes
            .get(&id.0)
            .map(|c| c.info.clone())
    }

    /// Snapshot of a change's comments (test verification).
    pub fn comments(&self, id: ChangeId) -> Vec<(u64, String)> {
        self.state
            .lock()
            .unwrap()
            .changes
            .get(&id.0)
            .map(|c| c.comments.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default()
    }

    fn take_failure(
        guard: &mut ShamState,
        matches: impl Fn(&FailOn) -> bool,
    ) -> Option<ForgeError> {
        if guard.fail_on.as_ref().is_some_and(&matches) {
            match guard.fail_on.take() {
                Some(FailOn::Submit(e))
                | Some(FailOn::Edit(e))
                | Some(FailOn::Merge(e))
                | Some(FailOn::States(e)) => Some(e),
                None => None,
            }
        } else {
            None
        }
    }
}

#[async_trait]
impl Repository for ShamHub {
    fn forge(&self) -> &dyn Forge {
        &self.forge
    }

    async fn submit_change(
        &self,
        request: SubmitChangeRequest,
    ) -> Result<SubmittedChange, ForgeError> {
        let mut guard = self.state.lock().unwrap();
        guard.operations.push(Operation::Submit {
            head: request.head.clone(),
            base: request.base.clone(),
        });
        if let Some(err) = Self::take_failure(&mut guard, |f| matches!(f, FailOn::Submit(_))) {
            return Err(err);
        }
        if !guard.branches.contains(&request.base) {
            return Err(ForgeError::UnsubmittedBase(request.base));
        }

        guard.next_change += 1;
        let number = guard.next_change;
        let url = format!("https://shamhub.invalid/changes/{number}");
        guard.branches.insert(request.head.clone());
        guard.changes.insert(
            number,
            ShamChange {
                info: ChangeInfo {
                    id: ChangeId(number),
                    url: url.clone(),
                    state: ChangeState::Open,
                    head: request.head,
                    base: request.base,
                    subject: request.subject,
                    body: Some(request.body),
                    draft: request.draft,
                },
                settle_polls: 0,
                comments: BTreeMap::new(),
            },
        );
        Ok(SubmittedChange {
            id: ChangeId(number),
            url,
        })
    }

    async fn edit_change(&self, id: ChangeId, opts: EditChangeOptions) -> Result<(), ForgeError> {
        let mut guard = self.state.lock().unwrap();
        guard.operations.push(Operation::Edit {
            id: id.0,
            base: opts.base.clone(),
        });
        if let Some(err) = Self::take_failure(&mut guard, |f| matches!(f, FailOn::Edit(_))) {
            return Err(err);
        }
        let change = guard
            .changes
            .get_mut(&id.0)
            .ok_or_else(|| ForgeError::NotFound(format!("change {id}")))?;
        if let Some(base) = opts.base {
            change.info.base = base;
        }
        if let Some(subject) = opts.subject {
            change.info.subject = subject;
        }
        if let Some(body) = opts.body {
            change.info.body = Some(body);
        }
        if let Some(draft) = opts.draft {
            change.info.draft = draft;
        }
        Ok(())
    }

    async fn merge_change(&self, id: ChangeId) -> Result<(), ForgeError> {
        let mut guard = self.state.lock().unwrap();
        guard.operations.push(Operation::Merge { id: id.0 });
        if let Some(err) = Self::take_failure(&mut guard, |f| matches!(f, FailOn::Merge(_))) {
            return Err(err);
        }
        let latency = guard.merge_latency;
        let change = guard
            .changes
            .get_mut(&id.0)
            .ok_or_else(|| ForgeError::NotFound(format!("change {id}")))?;
        match change.info.state {
            ChangeState::Open => {
                if latency == 0 {
                    change.info.state = ChangeState::Merged;
                } else {
                    change.settle_polls = latency;
                }
                Ok(())
            }
            ChangeState::Merged => Ok(()),
            ChangeState::Closed => Err(ForgeError::Api {
                status: 405,
                message: format!("change {id} is closed"),
            }),
        }
    }

    async fn close_change(&self, id: ChangeId) -> Result<(), ForgeError> {
        let mut guard = self.state.lock().unwrap();
        guard.operations.push(Operation::Close { id: id.0 });
        let change = guard
            .changes
            .get_mut(&id.0)
            .ok_or_else(|| ForgeError::NotFound(format!("change {id}")))?;
        change.info.state = ChangeState::Closed;
        Ok(())
    }

    async fn changes_states(&self, ids: &[ChangeId]) -> Result<Vec<ChangeState>, ForgeError> {
        let mut guard = self.state.lock().unwrap();
        guard.operations.push(Operation::States {
            ids: ids.iter().map(|id| id.0).collect(),
        });
        if let Some(err) = Self::take_failure(&mut guard, |f| matches!(f, FailOn::States(_))) {
            return Err(err);
        }
        let mut states = Vec::with_capacity(ids.len());
        for id in ids {
            let change = guard
                .changes
                .get_mut(&id.0)
                .ok_or_else(|| ForgeError::NotFound(format!("change {id}")))?;
            // A merging change settles after its remaining polls drain.
            if change.settle_polls > 0 {
                change.settle_polls -= 1;
                if change.settle_polls == 0 {
                    change.info.state = ChangeState::Merged;
                    states.push(ChangeState::Merged);
                } else {
                    states.push(ChangeState::Open);
                }
            } else {
                states.push(change.info.state);
            }
        }
        Ok(states)
    }

    async fn find_change_by_id(&self, id: ChangeId) -> Result<ChangeInfo, ForgeError> {
        self.state
            .lock()
            .unwrap()
            .changes
            .get(&id.0)
            .map(|c| c.info.clone())
            .ok_or_else(|| ForgeError::NotFound(format!("change {id}")))
    }

    async fn list_change_comments(
        &self,
        id: ChangeId,
        opts: &ListChangeCommentsOptions,
    ) -> Result<Vec<ChangeComment>, ForgeError> {
        let guard = self.state.lock().unwrap();
        let change = guard
            .changes
            .get(&id.0)
            .ok_or_else(|| ForgeError::NotFound(format!("change {id}")))?;
        Ok(change
            .comments
            .iter()
            .filter(|(_, body)| opts.matches(body))
            .map(|(comment_id, body)| ChangeComment {
                id: *comment_id,
                body: body.clone(),
            })
            .collect())
    }

    async fn post_change_comment(&self, id: ChangeId, body: &str) -> Result<u64, ForgeError> {
        let mut guard = self.state.lock().unwrap();
        guard.operations.push(Operation::PostComment { id: id.0 });
        guard.next_comment += 1;
        let comment_id = guard.next_comment;
        let change = guard
            .changes
            .get_mut(&id.0)
            .ok_or_else(|| ForgeError::NotFound(format!("change {id}")))?;
        change.comments.insert(comment_id, body.to_string());
        Ok(comment_id)
    }

    async fn update_change_comment(
        &self,
        id: ChangeId,
        comment_id: u64,
        body: &str,
    ) -> Result<(), ForgeError> {
        let mut guard = self.state.lock().unwrap();
        guard.operations.push(Operation::UpdateComment {
            id: id.0,
            comment_id,
        });
        let change = guard
            .changes
            .get_mut(&id.0)
            .ok_or_else(|| ForgeError::NotFound(format!("change {id}")))?;
        match change.comments.get_mut(&comment_id) {
            Some(existing) => {
                *existing = body.to_string();
                Ok(())
            }
            None => Err(ForgeError::NotFound(format!("comment {comment_id}"))),
        }
    }

    async fn delete_change_comment(
        &self,
        id: ChangeId,
        comment_id: u64,
    ) -> Result<(), ForgeError> {
        let mut guard = self.state.lock().unwrap();
        guard.operations.push(Operation::DeleteComment {
            id: id.0,
            comment_id,
        });
        let change = guard
            .changes
            .get_mut(&id.0)
            .ok_or_else(|| ForgeError::NotFound(format!("change {id}")))?;
        change.comments.remove(&comment_id);
        Ok(())
    }
}

// The Repository contract against ShamHub is exercised in
// tests/forge_shamhub.rs.
