//! GitLab adapter.
//!
//! GitLab has no "commit on a detached ref" primitive: a branch is created
//! first and the file is committed on it afterwards. Both steps report
//! duplicates on their own ("Branch already exists", "A file with this name
//! already exists").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use super::{check, encode_path, failure_issue_title, http_client, split_commit_url};
use crate::contract::{
    ChangeRequest, ChangeRequestDraft, CommitMetadata, CommitRef, FailureSignal, FileChange, HostingProvider,
    WriteMode,
};
use crate::destination::PublicationTarget;
use crate::error::{ConflictKind, PublishError};

pub const DEFAULT_API_URL: &str = "https://gitlab.com/api/v4";
pub const DEFAULT_WEB_URL: &str = "https://gitlab.com";

pub struct GitLabClient {
    http: Client,
    api_url: String,
    web_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct MergeRequest {
    iid: u64,
    web_url: String,
}

impl From<MergeRequest> for ChangeRequest {
    fn from(mr: MergeRequest) -> Self {
        ChangeRequest {
            number: mr.iid,
            url: mr.web_url,
        }
    }
}

#[derive(Deserialize)]
struct Comparison {
    #[serde(default)]
    commits: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct Issue {
    iid: u64,
    title: String,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct Commit {
    message: Option<String>,
    committed_date: Option<String>,
}

#[derive(Deserialize)]
struct Diff {
    new_path: String,
}

/// Maps GitLab error responses onto the shared taxonomy.
pub(crate) fn classify(status: u16, message: &str) -> PublishError {
    match status {
        400 | 409 if message.contains("Branch already exists") => {
            PublishError::conflict(ConflictKind::Branch, message)
        }
        400 if message.contains("A file with this name already exists") => {
            PublishError::conflict(ConflictKind::File, message)
        }
        400 if message.contains("has been changed since") => PublishError::conflict(ConflictKind::StaleFile, message),
        409 if message.contains("Another open merge request already exists") => {
            PublishError::conflict(ConflictKind::ChangeRequest, message)
        }
        _ => PublishError::provider(Some(status), message),
    }
}

impl GitLabClient {
    pub fn new(
        api_url: impl Into<String>,
        web_url: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, PublishError> {
        Ok(GitLabClient {
            http: http_client()?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            web_url: web_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Projects are addressed by their url-encoded `namespace/name` path.
    fn request(&self, method: Method, repo: &PublicationTarget, suffix: &str) -> RequestBuilder {
        let url = format!(
            "{}/projects/{}{}",
            self.api_url,
            urlencoding::encode(&repo.path()),
            suffix
        );
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn fetch_commit(&self, repo: &PublicationTarget, commit_id: &str) -> Result<Commit, PublishError> {
        let response = self
            .request(
                Method::GET,
                repo,
                &format!("/repository/commits/{}", urlencoding::encode(commit_id)),
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PublishError::NotFound(format!(
                "Commit {commit_id} could not be retrieved from {repo}"
            )));
        }
        Ok(check(response, classify).await?.json().await?)
    }

    async fn fetch_diff(&self, repo: &PublicationTarget, commit_id: &str) -> Result<Vec<Diff>, PublishError> {
        let response = self
            .request(
                Method::GET,
                repo,
                &format!("/repository/commits/{}/diff", urlencoding::encode(commit_id)),
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PublishError::NotFound(format!(
                "Diff of commit {commit_id} could not be retrieved from {repo}"
            )));
        }
        Ok(check(response, classify).await?.json().await?)
    }
}

fn action(mode: WriteMode) -> &'static str {
    match mode {
        WriteMode::Create => "create",
        WriteMode::Update => "update",
    }
}

#[async_trait]
impl HostingProvider for GitLabClient {
    async fn read_file(
        &self,
        repo: &PublicationTarget,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, PublishError> {
        info!(%repo, path, reference, "Reading file from GitLab");
        let response = self
            .request(
                Method::GET,
                repo,
                &format!("/repository/files/{}/raw", urlencoding::encode(path)),
            )
            .query(&[("ref", reference)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response, classify).await?.text().await?))
    }

    async fn create_branch(&self, repo: &PublicationTarget, name: &str, base: &str) -> Result<(), PublishError> {
        info!(%repo, branch = name, base, "Creating GitLab branch");
        let response = self
            .request(Method::POST, repo, "/repository/branches")
            .json(&json!({ "branch": name, "ref": base }))
            .send()
            .await?;
        check(response, classify).await?;
        Ok(())
    }

    async fn write_file(&self, repo: &PublicationTarget, change: &FileChange) -> Result<(), PublishError> {
        info!(%repo, branch = %change.branch, path = %change.path, mode = ?change.mode, "Committing file on GitLab");
        let response = self
            .request(Method::POST, repo, "/repository/commits")
            .json(&json!({
                "branch": change.branch,
                "commit_message": change.message,
                "author_name": change.author.name,
                "author_email": change.author.email,
                "actions": [{
                    "action": action(change.mode),
                    "file_path": change.path,
                    "content": change.content,
                }],
            }))
            .send()
            .await?;
        check(response, classify).await.inspect_err(|e| {
            error!(%repo, branch = %change.branch, error = %e, "GitLab rejected the file commit");
        })?;
        Ok(())
    }

    async fn propose_file(
        &self,
        repo: &PublicationTarget,
        base: &str,
        change: &FileChange,
    ) -> Result<(), PublishError> {
        self.create_branch(repo, &change.branch, base).await?;
        self.write_file(repo, change).await
    }

    async fn open_change_request(
        &self,
        repo: &PublicationTarget,
        draft: &ChangeRequestDraft,
    ) -> Result<ChangeRequest, PublishError> {
        info!(%repo, branch = %draft.branch, title = %draft.title, "Opening GitLab merge request");
        let response = self
            .request(Method::POST, repo, "/merge_requests")
            .json(&json!({
                "source_branch": draft.branch,
                "target_branch": draft.base,
                "title": draft.title,
                "description": draft.body,
                "remove_source_branch": true,
            }))
            .send()
            .await?;
        let mr: MergeRequest = check(response, classify).await?.json().await?;
        Ok(mr.into())
    }

    async fn find_change_request(
        &self,
        repo: &PublicationTarget,
        branch: &str,
        base: &str,
    ) -> Result<Option<ChangeRequest>, PublishError> {
        let response = self
            .request(Method::GET, repo, "/merge_requests")
            .query(&[("source_branch", branch), ("target_branch", base), ("state", "opened")])
            .send()
            .await?;
        let requests: Vec<MergeRequest> = check(response, classify).await?.json().await?;
        Ok(requests.into_iter().next().map(ChangeRequest::from))
    }

    async fn commits_ahead(&self, repo: &PublicationTarget, branch: &str, base: &str) -> Result<u64, PublishError> {
        let response = self
            .request(Method::GET, repo, "/repository/compare")
            .query(&[("from", base), ("to", branch), ("straight", "false")])
            .send()
            .await?;
        let comparison: Comparison = check(response, classify).await?.json().await?;
        let ahead = comparison.commits.len() as u64;
        info!(%repo, branch, base, ahead, "Compared GitLab branch with base");
        Ok(ahead)
    }

    async fn update_change_request(
        &self,
        repo: &PublicationTarget,
        change_request: &ChangeRequest,
        body: &str,
    ) -> Result<(), PublishError> {
        info!(%repo, iid = change_request.number, "Updating GitLab merge request description");
        let response = self
            .request(Method::PUT, repo, &format!("/merge_requests/{}", change_request.number))
            .json(&json!({ "description": body }))
            .send()
            .await?;
        check(response, classify).await?;
        Ok(())
    }

    async fn last_failure(
        &self,
        repo: &PublicationTarget,
        service: &str,
        document_type: &str,
    ) -> Result<Option<FailureSignal>, PublishError> {
        let title = failure_issue_title(service, document_type);
        let response = self
            .request(Method::GET, repo, "/issues")
            .query(&[
                ("search", title.as_str()),
                ("in", "title"),
                ("state", "opened"),
                ("order_by", "created_at"),
                ("sort", "desc"),
            ])
            .send()
            .await?;
        let issues: Vec<Issue> = check(response, classify).await?.json().await?;
        Ok(issues
            .into_iter()
            .find(|issue| issue.title == title)
            .map(|issue| FailureSignal {
                date: issue.created_at,
                issue_number: Some(issue.iid),
            }))
    }

    fn parse_commit_url(&self, url: &str) -> Result<CommitRef, PublishError> {
        split_commit_url(url, "/-/commit/")
    }

    async fn commit_metadata(
        &self,
        repo: &PublicationTarget,
        commit_id: &str,
    ) -> Result<CommitMetadata, PublishError> {
        info!(%repo, commit_id, "Fetching GitLab commit and diff");
        let (commit, diff) = futures::try_join!(self.fetch_commit(repo, commit_id), self.fetch_diff(repo, commit_id))?;
        Ok(CommitMetadata {
            message: commit.message,
            date: commit.committed_date,
            changed_files: diff.into_iter().map(|d| d.new_path).collect(),
        })
    }

    fn commits_url(&self, repo: &PublicationTarget, branch: &str, path: &str) -> String {
        format!("{}/{}/-/commits/{branch}/{}", self.web_url, repo.path(), encode_path(path))
    }
}
