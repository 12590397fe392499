//! forge::bitbucket
//!
//! Bitbucket Cloud forge implementation.
//!
//! # Design
//!
//! Uses the 2.0 REST API. Bitbucket has no batch endpoint for pull request
//! state, so [`changes_states`] degrades to one request per id; the
//! ordering and length contract is unchanged. Draft pull requests do not
//! exist on Bitbucket and report [`ForgeError::Unsupported`].
//!
//! # Feature Flag
//!
//! Only available with the `bitbucket` feature enabled.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::traits::{
    ChangeComment, ChangeId, ChangeInfo, ChangeState, EditChangeOptions, Forge, ForgeError,
    ListChangeCommentsOptions, Repository, SubmitChangeRequest, SubmittedChange,
};

/// Default Bitbucket API base URL.
const DEFAULT_API_BASE: &str = "https://api.bitbucket.org/2.0";

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = "strata-cli";

/// Bitbucket forge identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bitbucket;

impl Forge for Bitbucket {
    fn name(&self) -> &'static str {
        "bitbucket"
    }

    fn env_token_var(&self) -> &'static str {
        "BITBUCKET_TOKEN"
    }
}

/// Parse workspace and repository slug out of a Bitbucket remote URL.
pub fn parse_bitbucket_url(url: &str) -> Option<(String, String)> {
    let rest = url
        .strip_prefix("git@bitbucket.org:")
        .or_else(|| url.strip_prefix("ssh://git@bitbucket.org/"))
        .or_else(|| url.strip_prefix("https://bitbucket.org/"))
        .or_else(|| {
            // HTTPS clone URLs carry the username: https://user@bitbucket.org/...
            url.split_once('@')
                .filter(|(scheme_user, _)| scheme_user.starts_with("https://"))
                .and_then(|(_, rest)| rest.strip_prefix("bitbucket.org/"))
        })?;
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let mut parts = rest.splitn(2, '/');
    let workspace = parts.next()?.to_string();
    let slug = parts.next()?.trim_end_matches('/').to_string();
    if workspace.is_empty() || slug.is_empty() || slug.contains('/') {
        return None;
    }
    Some((workspace, slug))
}

/// A Bitbucket repository bound to a token.
#[derive(Debug, Clone)]
pub struct BitbucketRepository {
    forge: Bitbucket,
    client: Client,
    token: String,
    workspace: String,
    slug: String,
    api_base: String,
}

impl BitbucketRepository {
    /// Create a repository handle.
    pub fn new(
        token: impl Into<String>,
        workspace: impl Into<String>,
        slug: impl Into<String>,
    ) -> Self {
        Self {
            forge: Bitbucket,
            client: Client::new(),
            token: token.into(),
            workspace: workspace.into(),
            slug: slug.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Create a repository handle from a remote URL, or `None` when the
    /// URL is not a Bitbucket URL.
    pub fn from_remote_url(url: &str, token: impl Into<String>) -> Option<Self> {
        let (workspace, slug) = parse_bitbucket_url(url)?;
        Some(Self::new(token, workspace, slug))
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.token)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers
    }

    fn pr_url(&self, path: &str) -> String {
        format!(
            "{}/repositories/{}/{}/pullrequests{}",
            self.api_base, self.workspace, self.slug, path
        )
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: Response,
    ) -> Result<T, ForgeError> {
        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(|e| ForgeError::Api {
                status: status.as_u16(),
                message: format!("failed to parse response: {e}"),
            })
        } else {
            Err(self.error_from_response(response, status).await)
        }
    }

    async fn error_from_response(&self, response: Response, status: StatusCode) -> ForgeError {
        let message = response
            .json::<BitbucketErrorBody>()
            .await
            .map(|b| b.error.message)
            .unwrap_or_default();

        if status == StatusCode::BAD_REQUEST && message.contains("destination") {
            return ForgeError::UnsubmittedBase(message);
        }

        match status {
            StatusCode::UNAUTHORIZED => ForgeError::AuthFailed("invalid or expired token".into()),
            StatusCode::FORBIDDEN => ForgeError::AuthFailed(format!("permission denied: {message}")),
            StatusCode::NOT_FOUND => ForgeError::NotFound(message),
            StatusCode::TOO_MANY_REQUESTS => ForgeError::RateLimited,
            _ => ForgeError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }
}

#[async_trait]
impl Repository for BitbucketRepository {
    fn forge(&self) -> &dyn Forge {
        &self.forge
    }

    async fn submit_change(
        &self,
        request: SubmitChangeRequest,
    ) -> Result<SubmittedChange, ForgeError> {
        if request.draft {
            return Err(ForgeError::Unsupported("draft pull requests".into()));
        }
        let mut body = serde_json::json!({
            "title": request.subject,
            "description": request.body,
            "source": { "branch": { "name": request.head } },
            "destination": { "branch": { "name": request.base } },
        });
        if !request.reviewers.is_empty() {
            body["reviewers"] = serde_json::json!(request
                .reviewers
                .iter()
                .map(|r| serde_json::json!({ "username": r }))
                .collect::<Vec<_>>());
        }

        let response = self
            .client
            .post(self.pr_url(""))
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let pr: BitbucketPullRequest = self.handle_response(response).await?;
        Ok(SubmittedChange {
            id: ChangeId(pr.id),
            url: pr.links.html.href,
        })
    }

    async fn edit_change(&self, id: ChangeId, opts: EditChangeOptions) -> Result<(), ForgeError> {
        if opts.draft.is_some() {
            return Err(ForgeError::Unsupported("draft pull requests".into()));
        }
        if opts.labels.is_some() {
            return Err(ForgeError::Unsupported("labels on Bitbucket".into()));
        }
        if opts.is_empty() {
            return Ok(());
        }
        let mut body = serde_json::Map::new();
        if let Some(base) = &opts.base {
            body.insert(
                "destination".into(),
                serde_json::json!({ "branch": { "name": base } }),
            );
        }
        if let Some(subject) = &opts.subject {
            body.insert("title".into(), serde_json::json!(subject));
        }
        if let Some(text) = &opts.body {
            body.insert("description".into(), serde_json::json!(text));
        }

        let response = self
            .client
            .put(self.pr_url(&format!("/{}", id.0)))
            .headers(self.headers())
            .json(&serde_json::Value::Object(body))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let _: BitbucketPullRequest = self.handle_response(response).await?;
        Ok(())
    }

    async fn merge_change(&self, id: ChangeId) -> Result<(), ForgeError> {
        let response = self
            .client
            .post(self.pr_url(&format!("/{}/merge", id.0)))
            .headers(self.headers())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let _: BitbucketPullRequest = self.handle_response(response).await?;
        Ok(())
    }

    async fn close_change(&self, id: ChangeId) -> Result<(), ForgeError> {
        let response = self
            .client
            .post(self.pr_url(&format!("/{}/decline", id.0)))
            .headers(self.headers())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let _: BitbucketPullRequest = self.handle_response(response).await?;
        Ok(())
    }

    async fn changes_states(&self, ids: &[ChangeId]) -> Result<Vec<ChangeState>, ForgeError> {
        // No batch endpoint; one request per id, preserving input order.
        let mut states = Vec::with_capacity(ids.len());
        for id in ids {
            let info = self.find_change_by_id(*id).await?;
            states.push(info.state);
        }
        Ok(states)
    }

    async fn find_change_by_id(&self, id: ChangeId) -> Result<ChangeInfo, ForgeError> {
        let response = self
            .client
            .get(self.pr_url(&format!("/{}", id.0)))
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let pr: BitbucketPullRequest = self.handle_response(response).await?;
        Ok(pr.into())
    }

    async fn list_change_comments(
        &self,
        id: ChangeId,
        opts: &ListChangeCommentsOptions,
    ) -> Result<Vec<ChangeComment>, ForgeError> {
        let mut comments = Vec::new();
        let mut url = self.pr_url(&format!("/{}/comments", id.0));
        loop {
            let response = self
                .client
                .get(&url)
                .headers(self.headers())
                .send()
                .await
                .map_err(|e| ForgeError::Network(e.to_string()))?;
            let page: BitbucketPage<BitbucketComment> = self.handle_response(response).await?;

            comments.extend(
                page.values
                    .into_iter()
                    .filter(|c| opts.matches(&c.content.raw))
                    .map(|c| ChangeComment {
                        id: c.id,
                        body: c.content.raw,
                    }),
            );

            match page.next {
                Some(next) => url = next,
                None => return Ok(comments),
            }
        }
    }

    async fn post_change_comment(&self, id: ChangeId, body: &str) -> Result<u64, ForgeError> {
        let response = self
            .client
            .post(self.pr_url(&format!("/{}/comments", id.0)))
            .headers(self.headers())
            .json(&serde_json::json!({ "content": { "raw": body } }))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let comment: BitbucketComment = self.handle_response(response).await?;
        Ok(comment.id)
    }

    async fn update_change_comment(
        &self,
        id: ChangeId,
        comment_id: u64,
        body: &str,
    ) -> Result<(), ForgeError> {
        let response = self
            .client
            .put(self.pr_url(&format!("/{}/comments/{comment_id}", id.0)))
            .headers(self.headers())
            .json(&serde_json::json!({ "content": { "raw": body } }))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let _: BitbucketComment = self.handle_response(response).await?;
        Ok(())
    }

    async fn delete_change_comment(
        &self,
        id: ChangeId,
        comment_id: u64,
    ) -> Result<(), ForgeError> {
        let response = self
            .client
            .delete(self.pr_url(&format!("/{}/comments/{comment_id}", id.0)))
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.error_from_response(response, status).await)
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct BitbucketPullRequest {
    id: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    state: String,
    source: BitbucketEndpoint,
    destination: BitbucketEndpoint,
    links: BitbucketLinks,
}

#[derive(Debug, Deserialize)]
struct BitbucketEndpoint {
    branch: BitbucketBranch,
}

#[derive(Debug, Deserialize)]
struct BitbucketBranch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BitbucketLinks {
    html: BitbucketHref,
}

#[derive(Debug, Deserialize)]
struct BitbucketHref {
    href: String,
}

impl BitbucketPullRequest {
    fn change_state(&self) -> ChangeState {
        match self.state.as_str() {
            "MERGED" => ChangeState::Merged,
            "DECLINED" | "SUPERSEDED" => ChangeState::Closed,
            _ => ChangeState::Open,
        }
    }
}

impl From<BitbucketPullRequest> for ChangeInfo {
    fn from(pr: BitbucketPullRequest) -> Self {
        let state = pr.change_state();
        ChangeInfo {
            id: ChangeId(pr.id),
            url: pr.links.html.href,
            state,
            head: pr.source.branch.name,
            base: pr.destination.branch.name,
            subject: pr.title,
            body: pr.description,
            draft: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BitbucketPage<T> {
    values: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitbucketComment {
    id: u64,
    content: BitbucketContent,
}

#[derive(Debug, Deserialize)]
struct BitbucketContent {
    raw: String,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketErrorBody {
    #[serde(default)]
    error: BitbucketErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketErrorDetail {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_urls() {
        assert_eq!(
            parse_bitbucket_url("git@bitbucket.org:team/repo.git"),
            Some(("team".into(), "repo".into()))
        );
        assert_eq!(
            parse_bitbucket_url("https://bitbucket.org/team/repo"),
            Some(("team".into(), "repo".into()))
        );
        assert_eq!(
            parse_bitbucket_url("https://user@bitbucket.org/team/repo.git"),
            Some(("team".into(), "repo".into()))
        );
        assert!(parse_bitbucket_url("git@github.com:owner/repo.git").is_none());
    }

    #[test]
    fn state_mapping() {
        let pr = BitbucketPullRequest {
            id: 9,
            title: "t".into(),
            description: None,
            state: "DECLINED".into(),
            source: BitbucketEndpoint {
                branch: BitbucketBranch { name: "feat".into() },
            },
            destination: BitbucketEndpoint {
                branch: BitbucketBranch { name: "main".into() },
            },
            links: BitbucketLinks {
                html: BitbucketHref {
                    href: "https://bitbucket.org/t/r/pull-requests/9".into(),
                },
            },
        };
        assert_eq!(pr.change_state(), ChangeState::Closed);
    }
}
