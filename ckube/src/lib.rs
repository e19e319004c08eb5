//! The proxy binary's library half: configuration loading and hot-reload,
//! the indexed store, the watch engine, the request router, the watch
//! proxy, the Deploy→Service custom endpoint, metrics, and the fake
//! in-process server used by this crate's and downstream consumers'
//! integration tests.
//!
//! `ckube-server` (`src/main.rs`) is a thin binary wrapper around
//! [`config`], [`router`], and [`watcher`]; everything with actual logic
//! lives here so it can be exercised without a running process.

pub mod config;
pub mod deploy2service;
pub mod error;
pub mod fake;
pub mod metrics;
pub mod router;
pub mod store;
pub mod watch_proxy;
pub mod watcher;

pub use error::Error;
pub use router::AppState;

/// Convenient alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
