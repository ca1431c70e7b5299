//! Loads the YAML publisher config and injects the provider token from the
//! environment.
//!
//! The file holds no secrets:
//!
//! ```yaml
//! provider:
//!   kind: gitlab
//!   api_url: https://gitlab.example/api/v4
//!   web_url: https://gitlab.example
//! base_branch: main
//! authorized_organizations: [OpenTermsArchive]
//! author:
//!   name: Open Terms Archive Bot
//!   email: bot@opentermsarchive.org
//! ```
//!
//! Every publisher key is optional; missing ones take the defaults of
//! [`PublisherConfig`]. The token comes from `GITHUB_TOKEN` or `GITLAB_TOKEN`.

use anyhow::Result;
use declaration_publisher_core::config::PublisherConfig;
use declaration_publisher_core::hosting::{github, gitlab};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Github,
    Gitlab,
}

impl ProviderKind {
    /// Environment variable holding the API token for this provider.
    pub fn token_var(self) -> &'static str {
        match self {
            ProviderKind::Github => "GITHUB_TOKEN",
            ProviderKind::Gitlab => "GITLAB_TOKEN",
        }
    }

    fn default_urls(self) -> (&'static str, &'static str) {
        match self {
            ProviderKind::Github => (github::DEFAULT_API_URL, github::DEFAULT_WEB_URL),
            ProviderKind::Gitlab => (gitlab::DEFAULT_API_URL, gitlab::DEFAULT_WEB_URL),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

impl ProviderSection {
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(self.kind.default_urls().0)
    }

    pub fn web_url(&self) -> &str {
        self.web_url.as_deref().unwrap_or(self.kind.default_urls().1)
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    provider: ProviderSection,
    #[serde(flatten)]
    publisher: PublisherConfig,
}

#[derive(Debug)]
pub struct CliConfig {
    pub provider: ProviderSection,
    pub publisher: PublisherConfig,
    /// Read from the provider's token variable, never from the file.
    pub token: Option<String>,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let raw: RawConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;
    raw.publisher.trace_loaded();

    let token_var = raw.provider.kind.token_var();
    let token = std::env::var(token_var).ok().filter(|t| !t.trim().is_empty());
    if token.is_none() {
        warn!(variable = token_var, "No provider token set, requests are unauthenticated");
    }

    Ok(CliConfig {
        provider: raw.provider,
        publisher: raw.publisher,
        token,
    })
}
