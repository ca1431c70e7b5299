//! Local working-copy saves and the history ledger.
//!
//! Saving a document type over an existing one freezes the superseded block
//! into `declarations/{id}.history.json`, newest first:
//!
//! ```text
//! { "Terms of Service": [ { ...previous block, "validUntil": "2024-03-01T12:00:00+00:00" }, ... ] }
//! ```
//!
//! Entries already in the ledger are never touched.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, info};

use crate::contract::{FailureSignal, HostingProvider};
use crate::declaration::{declaration_path, history_path, parse_document, render_document, terms_block, with_terms, Declaration};
use crate::destination::PublicationTarget;
use crate::error::PublishError;
use crate::publish::last_failure_or_unknown;

/// End of validity recorded on a superseded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidUntil {
    Date(DateTime<Utc>),
    ToBeDetermined,
}

impl ValidUntil {
    pub fn from_failure(failure: Option<&FailureSignal>) -> Self {
        match failure {
            Some(signal) => ValidUntil::Date(signal.date),
            None => ValidUntil::ToBeDetermined,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ValidUntil::Date(date) => Value::String(date.to_rfc3339_opts(SecondsFormat::Secs, false)),
            ValidUntil::ToBeDetermined => Value::String("to-be-determined".to_string()),
        }
    }
}

/// What a save did on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub document_type: String,
    pub declaration_path: PathBuf,
    /// Set when a superseded block was prepended to the ledger.
    pub history_path: Option<PathBuf>,
}

/// A checked-out declarations repository.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn declaration_file(&self, id: &str) -> PathBuf {
        self.root.join(declaration_path(id))
    }

    pub fn history_file(&self, id: &str) -> PathBuf {
        self.root.join(history_path(id))
    }

    /// Writes `declaration`, merging `document_type` into any existing file.
    ///
    /// `document_type` defaults to the first type the declaration carries.
    pub async fn save(
        &self,
        declaration: &Declaration,
        document_type: Option<&str>,
        valid_until: &ValidUntil,
    ) -> Result<SaveReport, PublishError> {
        let declaration = declaration.clone().normalized();
        let document_type = match document_type {
            Some(document_type) => document_type.to_string(),
            None => declaration.first_document_type()?.to_string(),
        };
        let block = serde_json::to_value(declaration.block(&document_type)?)?;
        let id = declaration.id();
        let target = self.declaration_file(&id);

        let existing = match read_optional(&target).await? {
            Some(content) => Some(parse_document(&content)?),
            None => None,
        };

        let (document, ledger) = match existing {
            Some(existing) => {
                let ledger = match terms_block(&existing, &document_type) {
                    Some(previous) => Some(self.prepended_history(&id, &document_type, previous, valid_until).await?),
                    None => {
                        debug!(id = %id, document_type = %document_type, "No previous block, ledger untouched");
                        None
                    }
                };
                (with_terms(&existing, &document_type, &block)?, ledger)
            }
            None => (serde_json::to_value(&declaration)?, None),
        };

        // Both files are staged before either replaces its original.
        let mut staged = vec![(target.clone(), render_document(&document)?)];
        if let Some((path, ledger)) = &ledger {
            staged.push((path.clone(), render_document(ledger)?));
        }
        commit_staged(&staged).await?;
        info!(path = %target.display(), document_type = %document_type, "Saved declaration");
        let history = ledger.map(|(path, _)| {
            info!(path = %path.display(), document_type = %document_type, valid_until = %valid_until.to_value(), "Prepended history entry");
            path
        });

        Ok(SaveReport {
            document_type,
            declaration_path: target,
            history_path: history,
        })
    }

    /// The history file of `id` with `previous` dated and put first.
    async fn prepended_history(
        &self,
        id: &str,
        document_type: &str,
        previous: &Value,
        valid_until: &ValidUntil,
    ) -> Result<(PathBuf, Value), PublishError> {
        let path = self.history_file(id);
        let mut ledger = match read_optional(&path).await? {
            Some(content) => parse_document(&content)?,
            None => Value::Object(Map::new()),
        };

        let mut entry = previous
            .as_object()
            .cloned()
            .ok_or_else(|| PublishError::InvalidDeclaration(format!("`{document_type}` block is not a JSON object")))?;
        entry.insert("validUntil".to_string(), valid_until.to_value());

        let root = ledger
            .as_object_mut()
            .ok_or_else(|| PublishError::InvalidDeclaration("history is not a JSON object".into()))?;
        let mut entries = match root.remove(document_type) {
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                return Err(PublishError::InvalidDeclaration(format!(
                    "history of `{document_type}` is not a JSON array"
                )))
            }
            None => Vec::new(),
        };
        entries.insert(0, Value::Object(entry));
        root.insert(document_type.to_string(), Value::Array(entries));

        Ok((path, ledger))
    }
}

/// Saves locally, dating the superseded block from the last known failure
/// on `repo`. Lookup errors leave the date to be determined.
pub async fn save_declaration<H>(
    store: &LocalStore,
    provider: &H,
    repo: &PublicationTarget,
    declaration: &Declaration,
    document_type: Option<&str>,
) -> Result<SaveReport, PublishError>
where
    H: HostingProvider + ?Sized,
{
    let document_type = match document_type {
        Some(document_type) => document_type.to_string(),
        None => declaration.first_document_type()?.to_string(),
    };
    let failure = last_failure_or_unknown(provider, repo, declaration.name.trim(), &document_type).await;
    store
        .save(declaration, Some(&document_type), &ValidUntil::from_failure(failure.as_ref()))
        .await
}

async fn read_optional(path: &Path) -> Result<Option<String>, PublishError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".staged");
    PathBuf::from(staged)
}

/// Writes every file next to its target, then moves them in place.
async fn commit_staged(files: &[(PathBuf, String)]) -> Result<(), PublishError> {
    for (path, content) in files {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(e) = fs::write(staging_path(path), content).await {
            for (path, _) in files {
                let _ = fs::remove_file(staging_path(path)).await;
            }
            return Err(e.into());
        }
    }
    for (path, _) in files {
        fs::rename(staging_path(path), path).await?;
    }
    Ok(())
}
