//! Parsing and validation of `organization/repository` destinations.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::PublishError;

/// Organizations accepted when no allow-list is configured.
pub const DEFAULT_AUTHORIZED_ORGANIZATIONS: &[&str] = &["OpenTermsArchive", "ambanum", "iroco-co"];

const DECLARATIONS_SUFFIX: &str = "-declarations";
const VERSIONS_SUFFIX: &str = "-versions";
const SNAPSHOTS_SUFFIX: &str = "-snapshots";

/// The repository a change is published to. Recomputed for every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationTarget {
    pub organization: String,
    pub repository: String,
}

impl PublicationTarget {
    /// `org/repo`, the form providers use to address the repository.
    pub fn path(&self) -> String {
        format!("{}/{}", self.organization, self.repository)
    }

    /// Sibling repository holding the extracted versions.
    pub fn versions(&self) -> PublicationTarget {
        self.with_suffix(DECLARATIONS_SUFFIX, VERSIONS_SUFFIX)
    }

    /// Sibling repository holding the raw snapshots.
    pub fn snapshots(&self) -> PublicationTarget {
        self.with_suffix(DECLARATIONS_SUFFIX, SNAPSHOTS_SUFFIX)
    }

    /// Declarations repository matching a versions repository.
    pub fn declarations(&self) -> PublicationTarget {
        self.with_suffix(VERSIONS_SUFFIX, DECLARATIONS_SUFFIX)
    }

    fn with_suffix(&self, from: &str, to: &str) -> PublicationTarget {
        let repository = match self.repository.strip_suffix(from) {
            Some(stem) => format!("{stem}{to}"),
            None => self.repository.clone(),
        };
        PublicationTarget {
            organization: self.organization.clone(),
            repository,
        }
    }
}

impl Serialize for PublicationTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path())
    }
}

impl fmt::Display for PublicationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.organization, self.repository)
    }
}

/// Parses `org/repo` and checks `org` against `authorized`.
pub fn parse_destination<S: AsRef<str>>(
    destination: &str,
    authorized: &[S],
) -> Result<PublicationTarget, PublishError> {
    let allowed = || {
        authorized
            .iter()
            .map(|o| o.as_ref())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let destination = destination.trim();
    if destination.is_empty() {
        return Err(PublishError::Configuration(format!(
            "Destination is mandatory and should be one of the following authorized organisations: {}",
            allowed()
        )));
    }

    let (organization, repository) = match destination.split_once('/') {
        Some((org, repo)) if !org.is_empty() && !repo.is_empty() && !repo.contains('/') => (org, repo),
        _ => {
            return Err(PublishError::Configuration(format!(
                "Destination should have the form `organization/repository` with one of the following authorized organisations: {}. Was {destination}",
                allowed()
            )))
        }
    };

    if !authorized.iter().any(|o| o.as_ref() == organization) {
        return Err(PublishError::Configuration(format!(
            "Destination should be one of the following authorized organisations: {}. Was {destination}",
            allowed()
        )));
    }

    Ok(PublicationTarget {
        organization: organization.to_string(),
        repository: repository.to_string(),
    })
}
