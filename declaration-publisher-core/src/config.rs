use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::Author;
use crate::destination::DEFAULT_AUTHORIZED_ORGANIZATIONS;

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_authorized_organizations() -> Vec<String> {
    DEFAULT_AUTHORIZED_ORGANIZATIONS.iter().map(|o| o.to_string()).collect()
}

fn default_author() -> AuthorConfig {
    AuthorConfig {
        name: "Anonymous Contributor".to_string(),
        email: "anonymous@contribute.opentermsarchive.org".to_string(),
    }
}

fn default_tool() -> ContributionTool {
    ContributionTool {
        label: "Open Terms Archive contribution tool".to_string(),
        url: "https://contribute.opentermsarchive.org".to_string(),
    }
}

fn default_local_origin() -> String {
    "http://localhost:3000".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorConfig {
    pub name: String,
    pub email: String,
}

/// The contribution tool credited at the bottom of change requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionTool {
    pub label: String,
    pub url: String,
}

/// Publication settings independent of the hosting provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_authorized_organizations")]
    pub authorized_organizations: Vec<String>,
    #[serde(default = "default_author")]
    pub author: AuthorConfig,
    #[serde(default = "default_tool")]
    pub contribution_tool: ContributionTool,
    /// Origin substituted into inspect URLs to build "local instance" links.
    #[serde(default = "default_local_origin")]
    pub local_origin: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            base_branch: default_base_branch(),
            authorized_organizations: default_authorized_organizations(),
            author: default_author(),
            contribution_tool: default_tool(),
            local_origin: default_local_origin(),
        }
    }
}

impl PublisherConfig {
    /// Contributor identity, falling back to the configured author per field.
    pub fn author_for(&self, name: Option<&str>, email: Option<&str>) -> Author {
        let pick = |given: Option<&str>, fallback: &str| {
            given
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        Author {
            name: pick(name, &self.author.name),
            email: pick(email, &self.author.email),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            base_branch = %self.base_branch,
            organizations = self.authorized_organizations.len(),
            "Loaded publisher config"
        );
        debug!(?self, "Publisher config loaded (full debug)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_upstream_defaults() {
        let config: PublisherConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PublisherConfig::default());
        assert_eq!(config.base_branch, "main");
        assert_eq!(config.authorized_organizations, ["OpenTermsArchive", "ambanum", "iroco-co"]);
    }

    #[test]
    fn author_falls_back_field_by_field() {
        let config = PublisherConfig::default();
        let author = config.author_for(Some("Jo"), Some("  "));
        assert_eq!(author.name, "Jo");
        assert_eq!(author.email, "anonymous@contribute.opentermsarchive.org");

        let anonymous = config.author_for(None, None);
        assert_eq!(anonymous.name, "Anonymous Contributor");
    }
}
