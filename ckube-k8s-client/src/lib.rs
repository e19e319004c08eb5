//! A thin per-cluster Kubernetes HTTP client.
//!
//! Loads contexts out of a kubeconfig file ([`config::Kubeconfig`]) and
//! connects to each one with a small [`Client`] exposing typed, string, and
//! streaming-watch request helpers. Built for ckube's watch engine and
//! request router, not as a general-purpose Kubernetes SDK: there is no
//! discovery, no exec/OAuth/OIDC authentication, and no websocket upgrade.
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;

pub use client::Client;
pub use config::{Kubeconfig, ResolvedContext};
pub use error::Error;

/// Convenient alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
