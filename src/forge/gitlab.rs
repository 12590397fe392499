//! forge::gitlab
//!
//! GitLab forge implementation.
//!
//! # Design
//!
//! Everything goes through the v4 REST API. Batch state queries use a
//! single `iids[]` listing request, so polling a whole stack costs one
//! round trip. Draft toggling after creation is not exposed by the API in
//! a way we can use safely and reports [`ForgeError::Unsupported`].
//!
//! # Feature Flag
//!
//! Only available with the `gitlab` feature enabled.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::traits::{
    ChangeComment, ChangeId, ChangeInfo, ChangeState, EditChangeOptions, Forge, ForgeError,
    ListChangeCommentsOptions, Repository, SubmitChangeRequest, SubmittedChange,
};

/// Default GitLab API base URL.
const DEFAULT_API_BASE: &str = "https://gitlab.com/api/v4";

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = "strata-cli";

/// Notes fetched per page.
const NOTES_PAGE_SIZE: usize = 100;

/// GitLab forge identity. Merge requests render as `!N`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitLab;

impl Forge for GitLab {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    fn env_token_var(&self) -> &'static str {
        "GITLAB_TOKEN"
    }

    fn display_change_id(&self, id: ChangeId) -> String {
        format!("!{}", id.0)
    }
}

/// Parse owner and project out of a GitLab remote URL.
pub fn parse_gitlab_url(url: &str) -> Option<(String, String)> {
    let rest = url
        .strip_prefix("git@gitlab.com:")
        .or_else(|| url.strip_prefix("ssh://git@gitlab.com/"))
        .or_else(|| url.strip_prefix("https://gitlab.com/"))
        .or_else(|| url.strip_prefix("http://gitlab.com/"))?;
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let mut parts = rest.splitn(2, '/');
    let owner = parts.next()?.to_string();
    let project = parts.next()?.trim_end_matches('/').to_string();
    if owner.is_empty() || project.is_empty() || project.contains('/') {
        return None;
    }
    Some((owner, project))
}

/// A GitLab project bound to a token.
#[derive(Debug, Clone)]
pub struct GitLabRepository {
    forge: GitLab,
    client: Client,
    token: String,
    /// URL-encoded `owner/project` path.
    project_path: String,
    api_base: String,
}

impl GitLabRepository {
    /// Create a project handle.
    pub fn new(
        token: impl Into<String>,
        owner: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            forge: GitLab,
            client: Client::new(),
            token: token.into(),
            project_path: format!("{}%2F{}", owner.into(), project.into()),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Create a project handle from a remote URL, or `None` when the URL
    /// is not a GitLab URL.
    pub fn from_remote_url(url: &str, token: impl Into<String>) -> Option<Self> {
        let (owner, project) = parse_gitlab_url(url)?;
        Some(Self::new(token, owner, project))
    }

    /// Point the handle at a self-hosted instance.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.token) {
            headers.insert("PRIVATE-TOKEN", value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers
    }

    fn mr_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/merge_requests{}",
            self.api_base, self.project_path, path
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
            .json::<GitLabErrorBody>()
            .await
            .map(|b| b.message())
            .unwrap_or_default();

        if status == StatusCode::BAD_REQUEST && message.contains("target_branch") {
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
impl Repository for GitLabRepository {
    fn forge(&self) -> &dyn Forge {
        &self.forge
    }

    async fn submit_change(
        &self,
        request: SubmitChangeRequest,
    ) -> Result<SubmittedChange, ForgeError> {
        // Draft state is encoded in the title on GitLab.
        let title = if request.draft {
            format!("Draft: {}", request.subject)
        } else {
            request.subject.clone()
        };
        let mut body = serde_json::json!({
            "source_branch": request.head,
            "target_branch": request.base,
            "title": title,
            "description": request.body,
        });
        if !request.labels.is_empty() {
            body["labels"] = serde_json::json!(request.labels.join(","));
        }

        let response = self
            .client
            .post(self.mr_url(""))
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let mr: GitLabMergeRequest = self.handle_response(response).await?;

        if !request.reviewers.is_empty() {
            // Reviewer assignment needs user-id resolution; not wired up.
            return Err(ForgeError::Unsupported(
                "reviewer assignment on GitLab".into(),
            ));
        }

        Ok(SubmittedChange {
            id: ChangeId(mr.iid),
            url: mr.web_url,
        })
    }

    async fn edit_change(&self, id: ChangeId, opts: EditChangeOptions) -> Result<(), ForgeError> {
        if opts.draft.is_some() {
            return Err(ForgeError::Unsupported("draft toggling on GitLab".into()));
        }
        if opts.is_empty() {
            return Ok(());
        }
        let mut body = serde_json::Map::new();
        if let Some(base) = &opts.base {
            body.insert("target_branch".into(), serde_json::json!(base));
        }
        if let Some(subject) = &opts.subject {
            body.insert("title".into(), serde_json::json!(subject));
        }
        if let Some(text) = &opts.body {
            body.insert("description".into(), serde_json::json!(text));
        }
        if let Some(labels) = &opts.labels {
            body.insert("labels".into(), serde_json::json!(labels.join(",")));
        }

        let response = self
            .client
            .put(self.mr_url(&format!("/{}", id.0)))
            .headers(self.headers())
            .json(&serde_json::Value::Object(body))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let _: GitLabMergeRequest = self.handle_response(response).await?;
        Ok(())
    }

    async fn merge_change(&self, id: ChangeId) -> Result<(), ForgeError> {
        let response = self
            .client
            .put(self.mr_url(&format!("/{}/merge", id.0)))
            .headers(self.headers())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let _: GitLabMergeRequest = self.handle_response(response).await?;
        Ok(())
    }

    async fn close_change(&self, id: ChangeId) -> Result<(), ForgeError> {
        let response = self
            .client
            .put(self.mr_url(&format!("/{}", id.0)))
            .headers(self.headers())
            .json(&serde_json::json!({ "state_event": "close" }))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let _: GitLabMergeRequest = self.handle_response(response).await?;
        Ok(())
    }

    async fn changes_states(&self, ids: &[ChangeId]) -> Result<Vec<ChangeState>, ForgeError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // One listing request with iids[] covers the whole batch. The
        // response order is unspecified; re-index by iid.
        let query: String = ids
            .iter()
            .map(|id| format!("iids[]={}", id.0))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}?{}&per_page={}", self.mr_url(""), query, ids.len());
        let response = self
            .client
            .get(&url)
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let mrs: Vec<GitLabMergeRequest> = self.handle_response(response).await?;

        let by_iid: std::collections::HashMap<u64, ChangeState> = mrs
            .iter()
            .map(|mr| (mr.iid, mr.change_state()))
            .collect();

        ids.iter()
            .map(|id| {
                by_iid.get(&id.0).copied().ok_or_else(|| {
                    ForgeError::NotFound(format!("merge request !{} not found", id.0))
                })
            })
            .collect()
    }

    async fn find_change_by_id(&self, id: ChangeId) -> Result<ChangeInfo, ForgeError> {
        let response = self
            .client
            .get(self.mr_url(&format!("/{}", id.0)))
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let mr: GitLabMergeRequest = self.handle_response(response).await?;
        Ok(mr.into())
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
                "{}?sort=asc&per_page={}&page={}",
                self.mr_url(&format!("/{}/notes", id.0)),
                NOTES_PAGE_SIZE,
                page
            );
            let response = self
                .client
                .get(&url)
                .headers(self.headers())
                .send()
                .await
                .map_err(|e| ForgeError::Network(e.to_string()))?;
            let batch: Vec<GitLabNote> = self.handle_response(response).await?;
            let batch_len = batch.len();

            comments.extend(
                batch
                    .into_iter()
                    .filter(|n| !n.system && opts.matches(&n.body))
                    .map(|n| ChangeComment {
                        id: n.id,
                        body: n.body,
                    }),
            );

            if batch_len < NOTES_PAGE_SIZE {
                return Ok(comments);
            }
            page += 1;
        }
    }

    async fn post_change_comment(&self, id: ChangeId, body: &str) -> Result<u64, ForgeError> {
        let response = self
            .client
            .post(self.mr_url(&format!("/{}/notes", id.0)))
            .headers(self.headers())
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let note: GitLabNote = self.handle_response(response).await?;
        Ok(note.id)
    }

    async fn update_change_comment(
        &self,
        id: ChangeId,
        comment_id: u64,
        body: &str,
    ) -> Result<(), ForgeError> {
        let response = self
            .client
            .put(self.mr_url(&format!("/{}/notes/{comment_id}", id.0)))
            .headers(self.headers())
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| ForgeError::Network(e.to_string()))?;
        let _: GitLabNote = self.handle_response(response).await?;
        Ok(())
    }

    async fn delete_change_comment(
        &self,
        id: ChangeId,
        comment_id: u64,
    ) -> Result<(), ForgeError> {
        let response = self
            .client
            .delete(self.mr_url(&format!("/{}/notes/{comment_id}", id.0)))
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
struct GitLabMergeRequest {
    iid: u64,
    web_url: String,
    state: String,
    title: String,
    description: Option<String>,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    draft: bool,
}

impl GitLabMergeRequest {
    fn change_state(&self) -> ChangeState {
        match self.state.as_str() {
            "merged" => ChangeState::Merged,
            "closed" => ChangeState::Closed,
            _ => ChangeState::Open,
        }
    }
}

impl From<GitLabMergeRequest> for ChangeInfo {
    fn from(mr: GitLabMergeRequest) -> Self {
        let state = mr.change_state();
        ChangeInfo {
            id: ChangeId(mr.iid),
            url: mr.web_url,
            state,
            head: mr.source_branch,
            base: mr.target_branch,
            subject: mr.title,
            body: mr.description,
            draft: mr.draft,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitLabNote {
    id: u64,
    body: String,
    #[serde(default)]
    system: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GitLabErrorBody {
    Message { message: serde_json::Value },
    Error { error: String },
}

impl GitLabErrorBody {
    fn message(&self) -> String {
        match self {
            GitLabErrorBody::Message { message } => message
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| message.to_string()),
            GitLabErrorBody::Error { error } => error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ssh_and_https() {
        assert_eq!(
            parse_gitlab_url("git@gitlab.com:group/project.git"),
            Some(("group".into(), "project".into()))
        );
        assert_eq!(
            parse_gitlab_url("https://gitlab.com/group/project"),
            Some(("group".into(), "project".into()))
        );
        assert!(parse_gitlab_url("git@github.com:owner/repo.git").is_none());
    }

    #[test]
    fn change_id_renders_with_bang() {
        assert_eq!(GitLab.display_change_id(ChangeId(7)), "!7");
        assert_eq!(GitLab.change_id_from_str("!7").unwrap(), ChangeId(7));
    }

    #[test]
    fn merge_request_state_mapping() {
        let mut mr = GitLabMergeRequest {
            iid: 1,
            web_url: "https://gitlab.com/g/p/-/merge_requests/1".into(),
            state: "opened".into(),
            title: "t".into(),
            description: None,
            source_branch: "feat".into(),
            target_branch: "main".into(),
            draft: false,
        };
        assert_eq!(mr.change_state(), ChangeState::Open);
        mr.state = "merged".into();
        assert_eq!(mr.change_state(), ChangeState::Merged);
        mr.state = "closed".into();
        assert_eq!(mr.change_state(), ChangeState::Closed);
    }
}
