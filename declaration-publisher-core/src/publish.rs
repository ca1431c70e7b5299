//! Publication orchestrator: turns a proposed declaration into a branch and
//! a change request on the destination repository.
//!
//! # Flow
//! - `checking`: read the declaration at the base branch. Missing file or
//!   missing document type means `adding`, otherwise `updating`.
//! - `adding`: propose the file on a new branch named after
//!   `"Add {name} {type}"`, then open the change request.
//! - `updating`: look up the last known failure (best effort), create the
//!   branch named after `"Update {name} {type}"`, replace the document type
//!   block, commit and open the change request.
//! - On a conflict the change is already in flight: the block is merged into
//!   the existing branch (no commit when nothing changed) and the open change
//!   request is reused with a "resubmitted" description. A branch that has
//!   commits of its own but not this declaration's file is someone else's
//!   change: that fails with [`PublishError::BranchExists`].
//!
//! Declarations are never mutated in place; every step derives a new JSON
//! value with exactly one `terms` key replaced.
//!
//! # Navigation
//! - Main entrypoint: [`publish`]
//! - Best-effort lookup shared with the history ledger: [`last_failure_or_unknown`]

use std::fmt;

use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};

use crate::body::{self, BodyContext};
use crate::config::PublisherConfig;
use crate::contract::{
    Author, ChangeRequest, ChangeRequestDraft, FailureSignal, FileChange, HostingProvider, WriteMode,
};
use crate::declaration::{
    branch_name, declaration_path, parse_document, render_document, terms_block, with_terms, Declaration,
};
use crate::destination::{parse_destination, PublicationTarget};
use crate::error::PublishError;

/// A contributor's request to publish one document type of a declaration.
#[derive(Debug, Clone)]
pub struct Proposal {
    /// `organization/repository` of the declarations repository.
    pub destination: String,
    pub declaration: Declaration,
    pub document_type: String,
    /// Where the proposal can be inspected in the contribution tool.
    pub inspect_url: String,
    pub contributor_name: Option<String>,
    pub contributor_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishAction {
    Add,
    Update,
}

impl PublishAction {
    fn verb(self) -> &'static str {
        match self {
            PublishAction::Add => "Add",
            PublishAction::Update => "Update",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Checking,
    Adding,
    Updating,
    Done,
    Failed,
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PublishState::Checking => "checking",
            PublishState::Adding => "adding",
            PublishState::Updating => "updating",
            PublishState::Done => "done",
            PublishState::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PublishReport {
    pub action: PublishAction,
    pub branch: String,
    pub change_request: ChangeRequest,
    /// The change was merged into a branch that already existed.
    pub appended: bool,
}

/// Change request title for an action on a document type.
pub fn title(action: PublishAction, name: &str, document_type: &str) -> String {
    format!("{} {name} {document_type}", action.verb())
}

/// Same URL with its origin replaced by `local_origin`.
pub fn local_url(inspect_url: &str, local_origin: &str) -> String {
    match url::Url::parse(inspect_url) {
        Ok(parsed) => {
            let origin = parsed.origin().ascii_serialization();
            match inspect_url.strip_prefix(origin.as_str()) {
                Some(rest) => format!("{}{rest}", local_origin.trim_end_matches('/')),
                None => inspect_url.to_string(),
            }
        }
        Err(_) => inspect_url.to_string(),
    }
}

/// Last failure of a service document, with every lookup error absorbed.
pub async fn last_failure_or_unknown<H>(
    provider: &H,
    repo: &PublicationTarget,
    service: &str,
    document_type: &str,
) -> Option<FailureSignal>
where
    H: HostingProvider + ?Sized,
{
    match provider.last_failure(repo, service, document_type).await {
        Ok(signal) => {
            info!(%repo, service, document_type, found = signal.is_some(), "Looked up last failure");
            signal
        }
        Err(e) => {
            warn!(%repo, service, document_type, error = %e, "Last failure lookup failed, treating it as unknown");
            None
        }
    }
}

/// Publishes `proposal` and returns the change request carrying it.
pub async fn publish<H>(
    provider: &H,
    config: &PublisherConfig,
    proposal: &Proposal,
) -> Result<PublishReport, PublishError>
where
    H: HostingProvider + ?Sized,
{
    let span = info_span!(
        "publish",
        destination = %proposal.destination,
        document_type = %proposal.document_type
    );
    async move {
        let result = run(provider, config, proposal).await;
        match &result {
            Ok(report) => info!(
                state = %PublishState::Done,
                url = %report.change_request.url,
                appended = report.appended,
                "Publication complete"
            ),
            Err(e) => error!(state = %PublishState::Failed, error = %e, "Publication failed"),
        }
        result
    }
    .instrument(span)
    .await
}

async fn run<H>(provider: &H, config: &PublisherConfig, proposal: &Proposal) -> Result<PublishReport, PublishError>
where
    H: HostingProvider + ?Sized,
{
    let repo = parse_destination(&proposal.destination, &config.authorized_organizations)?;
    let declaration = proposal.declaration.clone().normalized();
    let document_type = proposal.document_type.trim();
    let block = declaration.block(document_type)?;
    let id = declaration.id();
    let path = declaration_path(&id);

    info!(state = %PublishState::Checking, %repo, path = %path, "Reading current declaration");
    let existing = provider
        .read_file(&repo, &path, &config.base_branch)
        .await?
        .map(|content| parse_document(&content))
        .transpose()?;

    let action = match &existing {
        Some(document) if terms_block(document, document_type).is_some() => PublishAction::Update,
        _ => PublishAction::Add,
    };

    let versions_url = provider.commits_url(
        &repo.versions(),
        &config.base_branch,
        &format!("{id}/{document_type}.md"),
    );
    let snapshots_url = provider.commits_url(
        &repo.snapshots(),
        &config.base_branch,
        &format!("{id}/{document_type}.html"),
    );

    let publication = Publication {
        provider,
        config,
        repo,
        local_url: local_url(&proposal.inspect_url, &config.local_origin),
        versions_url,
        snapshots_url,
        id,
        path,
        name: declaration.name.clone(),
        document_type: document_type.to_string(),
        has_selector: block.has_selector(),
        block: serde_json::to_value(block)?,
        proposed: declaration.document_for(document_type)?,
        existing,
        author: config.author_for(
            proposal.contributor_name.as_deref(),
            proposal.contributor_email.as_deref(),
        ),
        inspect_url: proposal.inspect_url.clone(),
    };

    match action {
        PublishAction::Add => publication.add().await,
        PublishAction::Update => publication.update().await,
    }
}

/// State shared by the steps of one publish call.
struct Publication<'a, H: ?Sized> {
    provider: &'a H,
    config: &'a PublisherConfig,
    repo: PublicationTarget,
    id: String,
    path: String,
    name: String,
    document_type: String,
    has_selector: bool,
    /// Proposed block for `document_type`.
    block: Value,
    /// Proposed declaration reduced to `document_type`.
    proposed: Value,
    /// Declaration on the base branch when the publish started.
    existing: Option<Value>,
    author: Author,
    inspect_url: String,
    local_url: String,
    versions_url: String,
    snapshots_url: String,
}

impl<'a, H> Publication<'a, H>
where
    H: HostingProvider + ?Sized,
{
    async fn add(&self) -> Result<PublishReport, PublishError> {
        let title = title(PublishAction::Add, &self.name, &self.document_type);
        let branch = branch_name(&title);
        info!(state = %PublishState::Adding, branch = %branch, "Proposing new document type");

        let (document, mode) = self.merge_onto(self.existing.as_ref())?;
        let change = self.file_change(&branch, &document, mode, title.clone())?;

        match self.provider.propose_file(&self.repo, &self.config.base_branch, &change).await {
            Ok(()) => {
                let body = body::add_body(&self.body_context());
                self.finish(PublishAction::Add, branch, title, body, false).await
            }
            Err(e) if e.is_conflict() => {
                warn!(branch = %branch, error = %e, "Branch already in flight, appending to it");
                self.append_to_branch(&branch).await?;
                let body = body::resubmitted_body(&self.body_context(), false, None);
                self.finish(PublishAction::Add, branch, title, body, true).await
            }
            Err(e) => Err(e),
        }
    }

    async fn update(&self) -> Result<PublishReport, PublishError> {
        let failure =
            last_failure_or_unknown(self.provider, &self.repo, &self.name, &self.document_type).await;
        let title = title(PublishAction::Update, &self.name, &self.document_type);
        let branch = branch_name(&title);
        info!(state = %PublishState::Updating, branch = %branch, "Proposing document type update");

        match self.branch_and_commit(&branch).await {
            Ok(()) => {
                let body = body::update_body(&self.body_context(), failure.as_ref());
                self.finish(PublishAction::Update, branch, title, body, false).await
            }
            Err(e) if e.is_conflict() => {
                warn!(branch = %branch, error = %e, "Branch already in flight, appending to it");
                self.append_to_branch(&branch).await?;
                let body = body::resubmitted_body(&self.body_context(), true, failure.as_ref());
                self.finish(PublishAction::Update, branch, title, body, true).await
            }
            Err(e) => Err(e),
        }
    }

    /// Creates the branch from base, then replaces the block in its copy.
    async fn branch_and_commit(&self, branch: &str) -> Result<(), PublishError> {
        self.provider
            .create_branch(&self.repo, branch, &self.config.base_branch)
            .await?;
        let current = self.read_document(branch).await?;
        let (document, mode) = self.merge_onto(current.as_ref())?;
        let change = self.file_change(branch, &document, mode, self.commit_message())?;
        self.provider.write_file(&self.repo, &change).await
    }

    /// Merges the block into whatever an existing branch holds.
    ///
    /// A branch without this declaration's file belongs to another
    /// declaration whose title slugs the same, unless it has no commits of
    /// its own (a branch left behind by an interrupted proposal).
    async fn append_to_branch(&self, branch: &str) -> Result<(), PublishError> {
        let current = self.read_document(branch).await?;
        let (document, mode) = match &current {
            Some(current) => (with_terms(current, &self.document_type, &self.block)?, WriteMode::Update),
            None => {
                let ahead = self
                    .provider
                    .commits_ahead(&self.repo, branch, &self.config.base_branch)
                    .await?;
                if ahead > 0 {
                    error!(branch, ahead, path = %self.path, "Existing branch carries another declaration");
                    return Err(self.branch_exists(branch));
                }
                let (document, _) = self.merge_onto(self.existing.as_ref())?;
                (document, WriteMode::Create)
            }
        };

        if current.as_ref() == Some(&document) {
            info!(branch, "Branch already carries this suggestion, nothing to commit");
            return Ok(());
        }

        let change = self.file_change(branch, &document, mode, self.commit_message())?;
        match self.provider.write_file(&self.repo, &change).await {
            Err(e) if e.is_conflict() => {
                error!(branch, error = %e, "Could not append to the existing branch");
                Err(self.branch_exists(branch))
            }
            other => other,
        }
    }

    fn branch_exists(&self, branch: &str) -> PublishError {
        PublishError::BranchExists {
            destination: self.repo.path(),
            branch: branch.to_string(),
        }
    }

    /// Opens the change request, or reuses the open one for this branch.
    async fn finish(
        &self,
        action: PublishAction,
        branch: String,
        title: String,
        body: String,
        appended: bool,
    ) -> Result<PublishReport, PublishError> {
        let draft = ChangeRequestDraft {
            branch: branch.clone(),
            base: self.config.base_branch.clone(),
            title,
            body,
        };
        let change_request = match self.provider.open_change_request(&self.repo, &draft).await {
            Ok(change_request) => change_request,
            Err(e) if e.is_conflict() => {
                let existing = self
                    .provider
                    .find_change_request(&self.repo, &branch, &draft.base)
                    .await?
                    .ok_or_else(|| {
                        PublishError::provider(
                            None,
                            format!("a change request for {branch} was reported but could not be found"),
                        )
                    })?;
                info!(number = existing.number, "Reusing open change request");
                self.provider
                    .update_change_request(&self.repo, &existing, &draft.body)
                    .await?;
                existing
            }
            Err(e) => return Err(e),
        };
        Ok(PublishReport {
            action,
            branch,
            change_request,
            appended,
        })
    }

    async fn read_document(&self, reference: &str) -> Result<Option<Value>, PublishError> {
        self.provider
            .read_file(&self.repo, &self.path, reference)
            .await?
            .map(|content| parse_document(&content))
            .transpose()
    }

    /// `base` with the proposed block, or the proposal alone without a base.
    fn merge_onto(&self, base: Option<&Value>) -> Result<(Value, WriteMode), PublishError> {
        match base {
            Some(document) => Ok((with_terms(document, &self.document_type, &self.block)?, WriteMode::Update)),
            None => Ok((self.proposed.clone(), WriteMode::Create)),
        }
    }

    fn file_change(
        &self,
        branch: &str,
        document: &Value,
        mode: WriteMode,
        message: String,
    ) -> Result<FileChange, PublishError> {
        Ok(FileChange {
            branch: branch.to_string(),
            path: self.path.clone(),
            content: render_document(document)?,
            message,
            mode,
            author: self.author.clone(),
        })
    }

    fn commit_message(&self) -> String {
        format!("Update {} {} declaration", self.name, self.document_type)
    }

    fn body_context(&self) -> BodyContext<'_> {
        BodyContext {
            name: &self.name,
            id: &self.id,
            document_type: &self.document_type,
            inspect_url: &self.inspect_url,
            local_url: self.local_url.as_str(),
            tool_label: &self.config.contribution_tool.label,
            tool_url: &self.config.contribution_tool.url,
            has_selector: self.has_selector,
            versions_url: self.versions_url.as_str(),
            snapshots_url: self.snapshots_url.as_str(),
        }
    }
}
