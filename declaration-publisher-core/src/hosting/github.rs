//! GitHub adapter.
//!
//! New files are proposed through the git data API: blob tree and commit are
//! created detached, then a single reference creation publishes the branch.
//! A concurrent actor on the same branch name therefore surfaces as
//! "Reference already exists" and never as a half-written branch.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
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

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_WEB_URL: &str = "https://github.com";

pub struct GitHubClient {
    http: Client,
    api_url: String,
    web_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Deserialize)]
struct GitCommit {
    tree: GitObject,
}

#[derive(Deserialize)]
struct Contents {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct PullRequest {
    number: u64,
    html_url: String,
}

impl From<PullRequest> for ChangeRequest {
    fn from(pr: PullRequest) -> Self {
        ChangeRequest {
            number: pr.number,
            url: pr.html_url,
        }
    }
}

#[derive(Deserialize)]
struct Comparison {
    ahead_by: u64,
}

#[derive(Deserialize)]
struct IssueSearch {
    items: Vec<Issue>,
}

#[derive(Deserialize)]
struct Issue {
    number: u64,
    title: String,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct CommitResponse {
    commit: CommitDetails,
    #[serde(default)]
    files: Vec<CommitFile>,
}

#[derive(Deserialize)]
struct CommitDetails {
    message: Option<String>,
    committer: Option<Signature>,
}

#[derive(Deserialize)]
struct Signature {
    date: Option<String>,
}

#[derive(Deserialize)]
struct CommitFile {
    filename: String,
}

/// Maps GitHub error responses onto the shared taxonomy.
pub(crate) fn classify(status: u16, message: &str) -> PublishError {
    match status {
        422 if message.contains("Reference already exists") => {
            PublishError::conflict(ConflictKind::Branch, message)
        }
        422 if message.contains("A pull request already exists") => {
            PublishError::conflict(ConflictKind::ChangeRequest, message)
        }
        422 if message.contains("\"sha\" wasn't supplied") => PublishError::conflict(ConflictKind::File, message),
        409 => PublishError::conflict(ConflictKind::StaleFile, message),
        _ => PublishError::provider(Some(status), message),
    }
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        web_url: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, PublishError> {
        Ok(GitHubClient {
            http: http_client()?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            web_url: web_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, repo: &PublicationTarget, suffix: &str) -> RequestBuilder {
        let url = format!(
            "{}/repos/{}/{}{}",
            self.api_url,
            urlencoding::encode(&repo.organization),
            urlencoding::encode(&repo.repository),
            suffix
        );
        self.authorize(self.http.request(method, url))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn branch_head(&self, repo: &PublicationTarget, branch: &str) -> Result<String, PublishError> {
        let response = self
            .request(Method::GET, repo, &format!("/git/ref/heads/{}", encode_path(branch)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PublishError::NotFound(format!("Branch {branch} not found on {repo}")));
        }
        let git_ref: GitRef = check(response, classify).await?.json().await?;
        Ok(git_ref.object.sha)
    }

    async fn create_ref(&self, repo: &PublicationTarget, branch: &str, sha: &str) -> Result<(), PublishError> {
        let response = self
            .request(Method::POST, repo, "/git/refs")
            .json(&json!({ "ref": format!("refs/heads/{branch}"), "sha": sha }))
            .send()
            .await?;
        check(response, classify).await?;
        Ok(())
    }

    async fn contents(
        &self,
        repo: &PublicationTarget,
        path: &str,
        reference: &str,
    ) -> Result<Option<Contents>, PublishError> {
        let response = self
            .request(Method::GET, repo, &format!("/contents/{}", encode_path(path)))
            .query(&[("ref", reference)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response, classify).await?.json().await?))
    }
}

pub(crate) fn decode_content(encoded: &str) -> Result<String, PublishError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| PublishError::provider(None, format!("undecodable file content: {e}")))?;
    String::from_utf8(bytes).map_err(|e| PublishError::provider(None, format!("file is not UTF-8: {e}")))
}

#[async_trait]
impl HostingProvider for GitHubClient {
    async fn read_file(
        &self,
        repo: &PublicationTarget,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, PublishError> {
        info!(%repo, path, reference, "Reading file from GitHub");
        match self.contents(repo, path, reference).await? {
            Some(contents) => Ok(Some(decode_content(&contents.content)?)),
            None => Ok(None),
        }
    }

    async fn create_branch(&self, repo: &PublicationTarget, name: &str, base: &str) -> Result<(), PublishError> {
        info!(%repo, branch = name, base, "Creating GitHub branch");
        let sha = self.branch_head(repo, base).await?;
        self.create_ref(repo, name, &sha).await
    }

    async fn write_file(&self, repo: &PublicationTarget, change: &FileChange) -> Result<(), PublishError> {
        info!(%repo, branch = %change.branch, path = %change.path, mode = ?change.mode, "Committing file on GitHub");
        let mut body = json!({
            "message": change.message,
            "content": STANDARD.encode(change.content.as_bytes()),
            "branch": change.branch,
            "author": { "name": change.author.name, "email": change.author.email },
        });
        if change.mode == WriteMode::Update {
            if let Some(existing) = self.contents(repo, &change.path, &change.branch).await? {
                body["sha"] = json!(existing.sha);
            }
        }
        let response = self
            .request(Method::PUT, repo, &format!("/contents/{}", encode_path(&change.path)))
            .json(&body)
            .send()
            .await?;
        check(response, classify).await.inspect_err(|e| {
            error!(%repo, branch = %change.branch, error = %e, "GitHub rejected the file commit");
        })?;
        Ok(())
    }

    async fn propose_file(
        &self,
        repo: &PublicationTarget,
        base: &str,
        change: &FileChange,
    ) -> Result<(), PublishError> {
        info!(%repo, branch = %change.branch, base, path = %change.path, "Proposing file on a new GitHub branch");
        let base_sha = self.branch_head(repo, base).await?;

        let base_commit: GitCommit = check(
            self.request(Method::GET, repo, &format!("/git/commits/{base_sha}")).send().await?,
            classify,
        )
        .await?
        .json()
        .await?;

        let tree: GitObject = check(
            self.request(Method::POST, repo, "/git/trees")
                .json(&json!({
                    "base_tree": base_commit.tree.sha,
                    "tree": [{ "path": change.path, "mode": "100644", "type": "blob", "content": change.content }],
                }))
                .send()
                .await?,
            classify,
        )
        .await?
        .json()
        .await?;

        let commit: GitObject = check(
            self.request(Method::POST, repo, "/git/commits")
                .json(&json!({
                    "message": change.message,
                    "tree": tree.sha,
                    "parents": [base_sha],
                    "author": { "name": change.author.name, "email": change.author.email },
                }))
                .send()
                .await?,
            classify,
        )
        .await?
        .json()
        .await?;

        self.create_ref(repo, &change.branch, &commit.sha).await
    }

    async fn open_change_request(
        &self,
        repo: &PublicationTarget,
        draft: &ChangeRequestDraft,
    ) -> Result<ChangeRequest, PublishError> {
        info!(%repo, branch = %draft.branch, title = %draft.title, "Opening GitHub pull request");
        let response = self
            .request(Method::POST, repo, "/pulls")
            .json(&json!({
                "title": draft.title,
                "head": draft.branch,
                "base": draft.base,
                "body": draft.body,
                "maintainer_can_modify": true,
            }))
            .send()
            .await?;
        let pr: PullRequest = check(response, classify).await?.json().await?;
        Ok(pr.into())
    }

    async fn find_change_request(
        &self,
        repo: &PublicationTarget,
        branch: &str,
        base: &str,
    ) -> Result<Option<ChangeRequest>, PublishError> {
        let head = format!("{}:{branch}", repo.organization);
        let response = self
            .request(Method::GET, repo, "/pulls")
            .query(&[("head", head.as_str()), ("base", base), ("state", "open")])
            .send()
            .await?;
        let pulls: Vec<PullRequest> = check(response, classify).await?.json().await?;
        Ok(pulls.into_iter().next().map(ChangeRequest::from))
    }

    async fn commits_ahead(&self, repo: &PublicationTarget, branch: &str, base: &str) -> Result<u64, PublishError> {
        let response = self
            .request(
                Method::GET,
                repo,
                &format!("/compare/{}...{}", encode_path(base), encode_path(branch)),
            )
            .send()
            .await?;
        let comparison: Comparison = check(response, classify).await?.json().await?;
        info!(%repo, branch, base, ahead_by = comparison.ahead_by, "Compared GitHub branch with base");
        Ok(comparison.ahead_by)
    }

    async fn update_change_request(
        &self,
        repo: &PublicationTarget,
        change_request: &ChangeRequest,
        body: &str,
    ) -> Result<(), PublishError> {
        info!(%repo, number = change_request.number, "Updating GitHub pull request body");
        let response = self
            .request(Method::PATCH, repo, &format!("/pulls/{}", change_request.number))
            .json(&json!({ "body": body }))
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
        let query = format!("repo:{} is:issue is:open in:title \"{title}\"", repo.path());
        let response = self
            .authorize(self.http.get(format!("{}/search/issues", self.api_url)))
            .query(&[("q", query.as_str()), ("sort", "created"), ("order", "desc")])
            .send()
            .await?;
        let search: IssueSearch = check(response, classify).await?.json().await?;
        Ok(search
            .items
            .into_iter()
            .find(|issue| issue.title == title)
            .map(|issue| FailureSignal {
                date: issue.created_at,
                issue_number: Some(issue.number),
            }))
    }

    fn parse_commit_url(&self, url: &str) -> Result<CommitRef, PublishError> {
        split_commit_url(url, "/commit/")
    }

    async fn commit_metadata(
        &self,
        repo: &PublicationTarget,
        commit_id: &str,
    ) -> Result<CommitMetadata, PublishError> {
        info!(%repo, commit_id, "Fetching GitHub commit");
        let response = self
            .request(Method::GET, repo, &format!("/commits/{}", urlencoding::encode(commit_id)))
            .send()
            .await?;
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY) {
            return Err(PublishError::NotFound(format!(
                "Commit {commit_id} could not be retrieved from {repo}"
            )));
        }
        let commit: CommitResponse = check(response, classify).await?.json().await?;
        Ok(CommitMetadata {
            message: commit.commit.message,
            date: commit.commit.committer.and_then(|c| c.date),
            changed_files: commit.files.into_iter().map(|f| f.filename).collect(),
        })
    }

    fn commits_url(&self, repo: &PublicationTarget, branch: &str, path: &str) -> String {
        format!("{}/{}/commits/{branch}/{}", self.web_url, repo.path(), encode_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GitHubClient {
        GitHubClient::new(DEFAULT_API_URL, DEFAULT_WEB_URL, None).unwrap()
    }

    #[test]
    fn duplication_responses_become_conflicts() {
        assert!(matches!(
            classify(422, "Reference already exists"),
            PublishError::Conflict { kind: ConflictKind::Branch, .. }
        ));
        assert!(matches!(
            classify(422, "Validation Failed; A pull request already exists for Org:add_acme_terms."),
            PublishError::Conflict { kind: ConflictKind::ChangeRequest, .. }
        ));
        assert!(matches!(
            classify(422, "Invalid request.\n\n\"sha\" wasn't supplied."),
            PublishError::Conflict { kind: ConflictKind::File, .. }
        ));
        assert!(matches!(
            classify(409, "declarations/Acme.json does not match 1234"),
            PublishError::Conflict { kind: ConflictKind::StaleFile, .. }
        ));
    }

    #[test]
    fn other_responses_are_provider_errors() {
        match classify(422, "Validation Failed") {
            PublishError::Provider { status, message } => {
                assert_eq!(status, Some(422));
                assert_eq!(message, "Validation Failed");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(classify(401, "Bad credentials"), PublishError::Provider { .. }));
    }

    #[test]
    fn parses_commit_urls() {
        let commit = client()
            .parse_commit_url("https://github.com/Org/app-versions/commit/c1a2b3?diff=split")
            .unwrap();
        assert_eq!(
            commit,
            CommitRef {
                repo_path: "Org/app-versions".into(),
                commit_id: "c1a2b3".into()
            }
        );
        assert!(client()
            .parse_commit_url("https://gitlab.com/Org/app-versions/-/commits/main")
            .is_err());
    }

    #[test]
    fn commits_url_points_at_the_web_history() {
        let repo = PublicationTarget {
            organization: "Org".into(),
            repository: "app-versions".into(),
        };
        assert_eq!(
            client().commits_url(&repo, "main", "Cafe  Co./Terms of Service.md"),
            "https://github.com/Org/app-versions/commits/main/Cafe%20%20Co./Terms%20of%20Service.md"
        );
    }

    #[test]
    fn decodes_wrapped_base64_content() {
        let encoded = "eyJuYW1lIjoi\nQWNtZSJ9\n";
        assert_eq!(decode_content(encoded).unwrap(), r#"{"name":"Acme"}"#);
        assert!(decode_content("%%%").is_err());
    }
}
