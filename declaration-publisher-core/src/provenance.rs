//! Reverse mapping from a versions commit URL to the declaration it tracks.

use serde::Serialize;
use tracing::{info, instrument};

use crate::contract::HostingProvider;
use crate::destination::{parse_destination, PublicationTarget};
use crate::error::PublishError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitProvenance {
    pub service: String,
    pub document_type: String,
    pub message: Option<String>,
    pub date: Option<String>,
    /// Declarations repository paired with the versions repository.
    pub destination: PublicationTarget,
}

/// Resolves `url` into the service and document type its commit recorded.
#[instrument(skip(provider, authorized))]
pub async fn resolve_provenance<H, S>(
    provider: &H,
    authorized: &[S],
    url: &str,
) -> Result<CommitProvenance, PublishError>
where
    H: HostingProvider + ?Sized,
    S: AsRef<str>,
{
    let commit = provider.parse_commit_url(url)?;
    let repo = parse_destination(&commit.repo_path, authorized)?;
    let metadata = provider.commit_metadata(&repo, &commit.commit_id).await?;

    let first = metadata
        .changed_files
        .first()
        .ok_or_else(|| PublishError::NotFound(format!("Commit {url} could not be retrieved")))?;
    let (service, document_type) = split_document_path(first)?;
    info!(%service, %document_type, "Resolved commit provenance");

    Ok(CommitProvenance {
        service,
        document_type,
        message: metadata.message,
        date: metadata.date,
        destination: repo.declarations(),
    })
}

/// `"Acme/Terms of Service.md"` becomes `("Acme", "Terms of Service")`.
fn split_document_path(path: &str) -> Result<(String, String), PublishError> {
    let stem = path.strip_suffix(".md").unwrap_or(path);
    match stem.split_once('/') {
        Some((service, document_type)) if !service.is_empty() && !document_type.is_empty() => {
            Ok((service.to_string(), document_type.to_string()))
        }
        _ => Err(PublishError::NotFound(format!(
            "{path} does not name a service document"
        ))),
    }
}
