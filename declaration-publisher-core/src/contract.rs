//! # contract: the capability set every hosting provider exposes
//!
//! The orchestrator only talks to a repository host through the
//! [`HostingProvider`] trait. Two implementations live in [`crate::hosting`]:
//! a GitHub adapter, which creates a file on a new branch in one atomic
//! reference update, and a GitLab adapter, which needs an explicit branch
//! step before committing.
//!
//! ## Error contract
//! - "Already exists" responses (branch, file, stale blob, open change
//!   request) are returned as [`PublishError::Conflict`].
//! - Missing commits and diffs are [`PublishError::NotFound`].
//! - Everything else is [`PublishError::Provider`] carrying the provider
//!   message and HTTP status.
//!
//! ## Mocking
//! The trait is annotated for `mockall`; enable the `test-export-mocks`
//! feature (on by default) to use `MockHostingProvider` from other crates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;

use crate::destination::PublicationTarget;
use crate::error::PublishError;

/// Commit author attached to every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The file must not exist yet on the branch.
    Create,
    /// The file is replaced; it must exist on the branch.
    Update,
}

/// One file commit on a branch.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub branch: String,
    pub path: String,
    pub content: String,
    pub message: String,
    pub mode: WriteMode,
    pub author: Author,
}

/// A change request to open from `branch` into `base`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRequestDraft {
    pub branch: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

/// Handle on an open pull request (GitHub) or merge request (GitLab).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChangeRequest {
    /// Pull request number or merge request iid.
    pub number: u64,
    /// Human-facing URL of the change request.
    pub url: String,
}

/// Most recent report that a document could not be tracked anymore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSignal {
    pub date: DateTime<Utc>,
    pub issue_number: Option<u64>,
}

/// Repository path and commit id extracted from a commit URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef {
    pub repo_path: String,
    pub commit_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMetadata {
    pub message: Option<String>,
    pub date: Option<String>,
    /// Paths touched by the commit, in provider order.
    pub changed_files: Vec<String>,
}

/// Uniform capability set over a repository host.
///
/// Implementations hold their own credentials and base URLs; every call
/// names the repository it targets.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait HostingProvider: Send + Sync {
    /// Raw content of `path` at `reference`, `None` when the file is absent.
    async fn read_file(
        &self,
        repo: &PublicationTarget,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, PublishError>;

    /// Creates `name` pointing at the head of `base`.
    async fn create_branch(
        &self,
        repo: &PublicationTarget,
        name: &str,
        base: &str,
    ) -> Result<(), PublishError>;

    /// Commits one file on an existing branch.
    async fn write_file(&self, repo: &PublicationTarget, change: &FileChange) -> Result<(), PublishError>;

    /// Creates `change.branch` from `base` already containing the file.
    ///
    /// Fails with a conflict when the branch or the file already exists.
    async fn propose_file(
        &self,
        repo: &PublicationTarget,
        base: &str,
        change: &FileChange,
    ) -> Result<(), PublishError>;

    async fn open_change_request(
        &self,
        repo: &PublicationTarget,
        draft: &ChangeRequestDraft,
    ) -> Result<ChangeRequest, PublishError>;

    /// Open change request from `branch` into `base`, if any.
    async fn find_change_request(
        &self,
        repo: &PublicationTarget,
        branch: &str,
        base: &str,
    ) -> Result<Option<ChangeRequest>, PublishError>;

    /// Number of commits `branch` carries that `base` does not.
    async fn commits_ahead(&self, repo: &PublicationTarget, branch: &str, base: &str) -> Result<u64, PublishError>;

    /// Replaces the description of an open change request.
    async fn update_change_request(
        &self,
        repo: &PublicationTarget,
        change_request: &ChangeRequest,
        body: &str,
    ) -> Result<(), PublishError>;

    /// Latest open "not tracked anymore" report for a service document.
    async fn last_failure(
        &self,
        repo: &PublicationTarget,
        service: &str,
        document_type: &str,
    ) -> Result<Option<FailureSignal>, PublishError>;

    /// Splits a provider commit URL into repository path and commit id.
    fn parse_commit_url(&self, url: &str) -> Result<CommitRef, PublishError>;

    async fn commit_metadata(
        &self,
        repo: &PublicationTarget,
        commit_id: &str,
    ) -> Result<CommitMetadata, PublishError>;

    /// Web page listing the commits touching `path` on `branch`.
    fn commits_url(&self, repo: &PublicationTarget, branch: &str, path: &str) -> String;
}
