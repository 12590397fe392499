//! forge::github
//!
//! GitHub forge implementation.
//!
//! # Design
//!
//! REST for most operations; GraphQL where REST has no equivalent:
//! draft toggling, and batching [`changes_states`] for a whole stack into
//! one aliased query so merge orchestration needs a single round trip per
//! poll.
//!
//! # Authentication
//!
//! All calls require a token with `repo` scope (or `public_repo` for
//! public repositories). Rate-limit responses surface as
//! [`ForgeError::RateLimited`]; retrying is the caller's responsibility.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::traits::{
    ChangeComment, ChangeId, ChangeInfo, ChangeState, EditChangeOptions, Forge, ForgeError,
    ListChangeCommentsOptions, Repository, SubmitChangeRequest, SubmittedChange,
};

/// Default GitHub API base URL.
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = "strata-cli";

/// Comments fetched per page.
const COMMENTS_PAGE_SIZE: usize = 100;

/// GitHub forge identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHub;

impl Forge for GitHub {
    fn name(&self) -> &'static str {
        "github"
    }

    fn env_token_var(&self) -> &'static str {
        "GITHUB_TOKEN"
    }
}

/// Parse owner and repository name out of a GitHub remote URL.
///
/// Supports SSH (`git@github.com:owner/repo.git`) and HTTPS
/// (`https://github.com/owner/repo.git`) forms.
///
/// # Example
///
/// ```
/// use strata::forge::github::parse_github_url;
///
/// let (owner, repo) = parse_github_url("git@github.com:octo/hello.git").unwrap();
/// assert_eq!(owner, "octo");
/// assert_eq!(repo, "hello");
/// assert!(parse_github_url("https://gitlab.com/a/b").is_none());
/// ```
pub fn parse_github_url(url: &str) -> Option<(String, String)> {
    let rest = url
        .strip_prefix("git@github.com:")
        .or_else(|| url.strip_prefix("ssh://git@github.com/"))
        .or_else(|| url.strip_prefix("https://github.com/"))
        .or_else(|| url.strip_prefix("http://github.com/"))?;
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let mut parts = rest.splitn(2, '/');
    let owner = parts.next()?.to_string();
    let repo = parts.next()?.trim_end_matches('/').to_string();
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}

/// A GitHub repository bound to a token.
#[derive(Debug, Clone)]
pub struct GitHubRepository {
    forge: GitHub,
    client: Client,
    token: String,
    owner: String,
    repo: String,
    api_base: String,
}

impl GitHubRepository {
    /// Create a repository handle.
    pub fn new(
        token: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Self {
        Self {
            forge: GitHub,
            client: Client::new(),
            token: token.into(),
            owner: owner.into(),
            repo: repo.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Create a repository handle from a remote URL, or `None` when the
    /// URL is not a GitHub URL.
    pub fn from_remote_url(url: &str, token: impl Into<String>) -> Option<Self> {
        let (owner, repo) = parse_github_url(url)?;
        Some(Self::new(token, owner, repo))
    }

    /// Point the handle at a different API base (GitHub Enterprise, test
    /// servers).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.token)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, path
        )
    }

    fn graphql_url(&self) -> String {
        format!("{}/graphql", self.api_base)
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

    async fn handle_empty_response(&self, response: Response) -> Result<(), ForgeError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.error_from_response(response, status).await)
        }
    }

    async fn error_from_response(&self, response: Response, status: StatusCode) -> ForgeError {
        let body: GitHubErrorBody = response.json().await.unwrap_or_default();

        // A 422 whose errors mention the base field means the destination
        // branch does not exist on the forge yet.
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            if let Some(base_error) = body
                .errors
                .iter()
                .find(|e| e.field.as_deref() == Some("base"))
            {
                return ForgeError::UnsubmittedBase(
                    base_error.value.clone().unwrap_or_default(),
                );
            }
        }

        match status {
            StatusCode::UNAUTHORIZED => ForgeError::AuthFailed("invalid or expired token".into()),
            StatusCode::FORBIDDEN => {
                ForgeError::AuthFailed(format!("permission denied: {}", body.message))
            }
            StatusCode::NOT_FOUND => ForgeError::NotFound(body.message),
            StatusCode::TOO_MANY_REQUESTS => ForgeError::RateLimited,
            _ => ForgeError::Api {
                status: status.as_u16(),
                message: body.message,
            },
        }
    }

    async fn graphql(&self, body: serde_json::Value) -> Result<serde_json::Value, ForgeError> {
        let response = self
            .client
            .post(self.graphql_url())
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.error_from_response(response, status).await);
        }

        let result: serde_json::Value = response.json().await.map_err(|e| ForgeError::Api {
            status: status.as_u16(),
            message: format!("failed to parse GraphQL response: {e}"),
        })?;

        if let Some(errors) = result.get("errors").and_then(|e| e.as_array()) {
            if let Some(first) = errors.first() {
                let message = first
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown GraphQL error");
                return Err(ForgeError::Api {
                    status: 200,
                    message: message.to_string(),
                });
            }
        }
        Ok(result)
    }

    async fn pr_node_id(&self, id: ChangeId) -> Result<String, ForgeError> {
        let url = self.repo_url(&format!("pulls/{}", id.0));
        let response = self
            .client
            .get(&url)
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let pr: GitHubPullRequest = self.handle_response(response).await?;
        pr.node_id.ok_or_else(|| ForgeError::Api {
            status: 0,
            message: "pull request is missing node_id".into(),
        })
    }

    /// Toggle draft state; GitHub only exposes this through GraphQL.
    async fn set_draft(&self, id: ChangeId, draft: bool) -> Result<(), ForgeError> {
        let node_id = self.pr_node_id(id).await?;
        let mutation = if draft {
            r#"mutation($id: ID!) {
                convertPullRequestToDraft(input: {pullRequestId: $id}) {
                    pullRequest { id }
                }
            }"#
        } else {
            r#"mutation($id: ID!) {
                markPullRequestReadyForReview(input: {pullRequestId: $id}) {
                    pullRequest { id }
                }
            }"#
        };
        self.graphql(serde_json::json!({
            "query": mutation,
            "variables": { "id": node_id },
        }))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Repository for GitHubRepository {
    fn forge(&self) -> &dyn Forge {
        &self.forge
    }

    async fn submit_change(
        &self,
        request: SubmitChangeRequest,
    ) -> Result<SubmittedChange, ForgeError> {
        let url = self.repo_url("pulls");
        let body = CreatePrBody {
            head: &request.head,
            base: &request.base,
            title: &request.subject,
            body: &request.body,
            draft: request.draft,
        };
        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let pr: GitHubPullRequest = self.handle_response(response).await?;

        if !request.labels.is_empty() {
            let url = self.repo_url(&format!("issues/{}/labels", pr.number));
            let response = self
                .client
                .post(&url)
                .headers(self.headers())
                .json(&serde_json::json!({ "labels": request.labels }))
                .send()
                .await
                .map_err(|e| ForgeError::Network(e.to_string()))?;
            self.handle_empty_response(response).await?;
        }

        if !request.reviewers.is_empty() {
            let url = self.repo_url(&format!("pulls/{}/requested_reviewers", pr.number));
            let response = self
                .client
                .post(&url)
                .headers(self.headers())
                .json(&serde_json::json!({ "reviewers": request.reviewers }))
                .send()
                .await
                .map_err(|e| ForgeError::Network(e.to_string()))?;
            self.handle_empty_response(response).await?;
        }

        Ok(SubmittedChange {
            id: ChangeId(pr.number),
            url: pr.html_url,
        })
    }

    async fn edit_change(&self, id: ChangeId, opts: EditChangeOptions) -> Result<(), ForgeError> {
        if let Some(draft) = opts.draft {
            self.set_draft(id, draft).await?;
        }

        if let Some(labels) = &opts.labels {
            let url = self.repo_url(&format!("issues/{}/labels", id.0));
            let response = self
                .client
                .put(&url)
                .headers(self.headers())
                .json(&serde_json::json!({ "labels": labels }))
                .send()
                .await
                .map_err(|e| ForgeError::Network(e.to_string()))?;
            self.handle_empty_response(response).await?;
        }

        let patch = UpdatePrBody {
            title: opts.subject.as_deref(),
            body: opts.body.as_deref(),
            base: opts.base.as_deref(),
        };
        if patch.title.is_none() && patch.body.is_none() && patch.base.is_none() {
            return Ok(());
        }
        let url = self.repo_url(&format!("pulls/{}", id.0));
        let response = self
            .client
            .patch(&url)
            .headers(self.headers())
            .json(&patch)
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let _: GitHubPullRequest = self.handle_response(response).await?;
        Ok(())
    }

    async fn merge_change(&self, id: ChangeId) -> Result<(), ForgeError> {
        let url = self.repo_url(&format!("pulls/{}/merge", id.0));
        let response = self
            .client
            .put(&url)
            .headers(self.headers())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        self.handle_empty_response(response).await
    }

    async fn close_change(&self, id: ChangeId) -> Result<(), ForgeError> {
        let url = self.repo_url(&format!("pulls/{}", id.0));
        let response = self
            .client
            .patch(&url)
            .headers(self.headers())
            .json(&serde_json::json!({ "state": "closed" }))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let _: GitHubPullRequest = self.handle_response(response).await?;
        Ok(())
    }

    async fn changes_states(&self, ids: &[ChangeId]) -> Result<Vec<ChangeState>, ForgeError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // One aliased GraphQL query covers the whole batch.
        let mut fields = String::new();
        for (i, id) in ids.iter().enumerate() {
            fields.push_str(&format!("pr{i}: pullRequest(number: {}) {{ state }}\n", id.0));
        }
        let query = format!(
            "query($owner: String!, $name: String!) {{\n\
             repository(owner: $owner, name: $name) {{\n{fields}}}\n}}"
        );
        let result = self
            .graphql(serde_json::json!({
                "query": query,
                "variables": { "owner": self.owner, "name": self.repo },
            }))
            .await?;

        let repository = result
            .pointer("/data/repository")
            .ok_or_else(|| ForgeError::Api {
                status: 200,
                message: "GraphQL response missing repository".into(),
            })?;

        let mut states = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let state = repository
                .pointer(&format!("/pr{i}/state"))
                .and_then(|s| s.as_str())
                .ok_or_else(|| {
                    ForgeError::NotFound(format!("pull request #{} not found", id.0))
                })?;
            states.push(match state {
                "OPEN" => ChangeState::Open,
                "CLOSED" => ChangeState::Closed,
                "MERGED" => ChangeState::Merged,
                other => {
                    return Err(ForgeError::Api {
                        status: 200,
                        message: format!("unknown pull request state: {other}"),
                    })
                }
            });
        }
        Ok(states)
    }

    async fn find_change_by_id(&self, id: ChangeId) -> Result<ChangeInfo, ForgeError> {
        let url = self.repo_url(&format!("pulls/{}", id.0));
        let response = self
            .client
            .get(&url)
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let pr: GitHubPullRequest = self.handle_response(response).await?;
        Ok(pr.into())
    }

    async fn list_change_comments(
        &self,
        id: ChangeId,
        opts: &ListChangeCommentsOptions,
    ) -> Result<Vec<ChangeComment>, ForgeError> {
        let mut comments = Vec::new();
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}?per_page={}&page={}",
                self.repo_url(&format!("issues/{}/comments", id.0)),
                COMMENTS_PAGE_SIZE,
                page
            );
            let response = self
                .client
                .get(&url)
                .headers(self.headers())
                .send()
                .await
                .map_err(|e| ForgeError::Network(e.to_string()))?;
            let batch: Vec<GitHubComment> = self.handle_response(response).await?;
            let batch_len = batch.len();

            comments.extend(
                batch
                    .into_iter()
                    .filter(|c| opts.matches(&c.body))
                    .map(|c| ChangeComment {
                        id: c.id,
                        body: c.body,
                    }),
            );

            if batch_len < COMMENTS_PAGE_SIZE {
                return Ok(comments);
            }
            page += 1;
        }
    }

    async fn post_change_comment(&self, id: ChangeId, body: &str) -> Result<u64, ForgeError> {
        let url = self.repo_url(&format!("issues/{}/comments", id.0));
        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let comment: GitHubComment = self.handle_response(response).await?;
        Ok(comment.id)
    }

    async fn update_change_comment(
        &self,
        _id: ChangeId,
        comment_id: u64,
        body: &str,
    ) -> Result<(), ForgeError> {
        let url = self.repo_url(&format!("issues/comments/{comment_id}"));
        let response = self
            .client
            .patch(&url)
            .headers(self.headers())
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let _: GitHubComment = self.handle_response(response).await?;
        Ok(())
    }

    async fn delete_change_comment(
        &self,
        _id: ChangeId,
        comment_id: u64,
    ) -> Result<(), ForgeError> {
        let url = self.repo_url(&format!("issues/comments/{comment_id}"));
        let response = self
            .client
            .delete(&url)
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        self.handle_empty_response(response).await
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct CreatePrBody<'a> {
    head: &'a str,
    base: &'a str,
    title: &'a str,
    body: &'a str,
    draft: bool,
}

#[derive(Debug, Serialize)]
struct UpdatePrBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GitHubPullRequest {
    number: u64,
    html_url: String,
    state: String,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    draft: bool,
    title: String,
    body: Option<String>,
    head: GitHubRef,
    base: GitHubRef,
    node_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubRef {
    #[serde(rename = "ref")]
    name: String,
}

impl From<GitHubPullRequest> for ChangeInfo {
    fn from(pr: GitHubPullRequest) -> Self {
        let state = if pr.merged {
            ChangeState::Merged
        } else if pr.state == "closed" {
            ChangeState::Closed
        } else {
            ChangeState::Open
        };
        ChangeInfo {
            id: ChangeId(pr.number),
            url: pr.html_url,
            state,
            head: pr.head.name,
            base: pr.base.name,
            subject: pr.title,
            body: pr.body,
            draft: pr.draft,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubComment {
    id: u64,
    body: String,
}

#[derive(Debug, Default, Deserialize)]
struct GitHubErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<GitHubFieldError>,
}

#[derive(Debug, Deserialize)]
struct GitHubFieldError {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    value: Option<String>,
}
