//! Command line interface for declaration-publisher.
//!
//! All publication logic lives in [`declaration_publisher_core`]; this module
//! parses arguments, loads the config file, builds the hosting adapter and
//! prints results as JSON on stdout.
//!
//! ## Subcommands
//! - `publish`: open (or append to) a change request for one document type.
//! - `save`: write a declaration into a local checkout, keeping the history ledger.
//! - `provenance`: trace a versions commit URL back to its service and document type.
//! - `derive-id`: print the identifier and file paths derived from a service name.
use crate::load_config::load_config;
use crate::provider::build_provider;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use declaration_publisher_core::declaration::{declaration_path, derive_id, history_path, Declaration};
use declaration_publisher_core::destination::parse_destination;
use declaration_publisher_core::history::{save_declaration, LocalStore, ValidUntil};
use declaration_publisher_core::provenance::resolve_provenance;
use declaration_publisher_core::publish::{publish, Proposal};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Publish service declarations to GitHub or GitLab repositories.
#[derive(Parser)]
#[clap(
    name = "declaration-publisher",
    version,
    about = "Publish service declarations as pull or merge requests"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Propose a declaration's document type to a declarations repository
    Publish {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Target repository, as `organization/repository`
        #[clap(long)]
        destination: String,
        /// Path to the declaration JSON file
        #[clap(long)]
        declaration: PathBuf,
        /// Document type to publish; defaults to the first one declared
        #[clap(long)]
        document_type: Option<String>,
        /// Link to the proposal in the contribution tool
        #[clap(long)]
        inspect_url: String,
        #[clap(long)]
        contributor_name: Option<String>,
        #[clap(long)]
        contributor_email: Option<String>,
    },
    /// Save a declaration into a local declarations checkout
    Save {
        /// Root of the declarations checkout
        #[clap(long)]
        root: PathBuf,
        /// Path to the declaration JSON file
        #[clap(long)]
        declaration: PathBuf,
        #[clap(long)]
        document_type: Option<String>,
        /// Config file used to look up the last failure date
        #[clap(long, requires = "destination")]
        config: Option<PathBuf>,
        /// Repository whose failure issues date the superseded block
        #[clap(long, requires = "config")]
        destination: Option<String>,
    },
    /// Resolve the service and document type recorded by a commit
    Provenance {
        #[clap(long)]
        config: PathBuf,
        /// Commit URL on the versions repository
        #[clap(long)]
        url: String,
    },
    /// Print the identifier and paths derived from a service name
    DeriveId {
        name: String,
    },
}

#[derive(Serialize)]
struct DerivedPaths {
    id: String,
    declaration: String,
    history: String,
}

fn read_declaration(path: &Path) -> Result<Declaration> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read declaration file {path:?}"))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse declaration file {path:?}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Async entrypoint shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let result = match cli.command {
        Commands::Publish {
            config,
            destination,
            declaration,
            document_type,
            inspect_url,
            contributor_name,
            contributor_email,
        } => {
            let config = load_config(config)?;
            let declaration = read_declaration(&declaration)?;
            let document_type = match document_type {
                Some(document_type) => document_type,
                None => declaration.first_document_type()?.to_string(),
            };
            let provider = build_provider(&config)?;
            tracing::info!(command = "publish", %destination, %document_type, "Publishing declaration");
            let proposal = Proposal {
                destination,
                declaration,
                document_type,
                inspect_url,
                contributor_name,
                contributor_email,
            };
            match publish(provider.as_ref(), &config.publisher, &proposal).await {
                Ok(report) => {
                    tracing::info!(command = "publish", url = %report.change_request.url, "Publication complete");
                    print_json(&report)
                }
                Err(e) => {
                    tracing::error!(command = "publish", error = %e, "Publication failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::Save {
            root,
            declaration,
            document_type,
            config,
            destination,
        } => {
            let declaration = read_declaration(&declaration)?;
            let store = LocalStore::new(root);
            tracing::info!(command = "save", root = ?store.root(), "Saving declaration locally");
            let report = match (config, destination) {
                (Some(config), Some(destination)) => {
                    let config = load_config(config)?;
                    let repo = parse_destination(&destination, &config.publisher.authorized_organizations)?;
                    let provider = build_provider(&config)?;
                    save_declaration(&store, provider.as_ref(), &repo, &declaration, document_type.as_deref()).await?
                }
                _ => {
                    store
                        .save(&declaration, document_type.as_deref(), &ValidUntil::ToBeDetermined)
                        .await?
                }
            };
            println!("Saved {}", report.declaration_path.display());
            if let Some(history) = &report.history_path {
                println!("History updated in {}", history.display());
            }
            Ok(())
        }
        Commands::Provenance { config, url } => {
            let config = load_config(config)?;
            let provider = build_provider(&config)?;
            tracing::info!(command = "provenance", %url, "Resolving commit provenance");
            let provenance =
                resolve_provenance(provider.as_ref(), &config.publisher.authorized_organizations, &url).await?;
            print_json(&provenance)
        }
        Commands::DeriveId { name } => {
            let id = derive_id(name.trim());
            print_json(&DerivedPaths {
                declaration: declaration_path(&id),
                history: history_path(&id),
                id,
            })
        }
    };

    let _exit = tracing::info_span!("exit").entered();
    tracing::info!(success = result.is_ok(), "exit");
    result
}
