use anyhow::{Context, Result};
use declaration_publisher_core::contract::HostingProvider;
use declaration_publisher_core::hosting::{GitHubClient, GitLabClient};
use tracing::info;

use crate::load_config::{CliConfig, ProviderKind};

/// Builds the adapter selected by the config file.
pub fn build_provider(config: &CliConfig) -> Result<Box<dyn HostingProvider>> {
    let section = &config.provider;
    info!(kind = ?section.kind, api_url = section.api_url(), "Building hosting provider");
    let provider: Box<dyn HostingProvider> = match section.kind {
        ProviderKind::Github => Box::new(
            GitHubClient::new(section.api_url(), section.web_url(), config.token.clone())
                .context("Failed to construct GitHub client")?,
        ),
        ProviderKind::Gitlab => Box::new(
            GitLabClient::new(section.api_url(), section.web_url(), config.token.clone())
                .context("Failed to construct GitLab client")?,
        ),
    };
    Ok(provider)
}
