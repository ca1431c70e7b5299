#![doc = "declaration-publisher-core: publication logic for service declarations."]

//! Turns a contributor's declaration proposal into a branch and a change
//! request on a declarations repository hosted on GitHub or GitLab, keeps
//! the local history ledger, and traces version commits back to the
//! declaration they came from.
//!
//! # Usage
//! Build a [`hosting`] client, load a [`config::PublisherConfig`] and call
//! [`publish::publish`]. Everything that talks to a host goes through
//! [`contract::HostingProvider`], so tests can swap in `MockHostingProvider`.

pub mod body;
pub mod config;
pub mod contract;
pub mod declaration;
pub mod destination;
pub mod error;
pub mod history;
pub mod hosting;
pub mod provenance;
pub mod publish;
