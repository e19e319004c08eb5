//! Pure proxy logic for ckube: selector tunneling, index projection, and the
//! search/sort engine the request router evaluates list queries with.
//!
//! Nothing in this crate performs I/O. The wire types it builds on live in
//! [`ckube_wire`]; the HTTP server, indexed store, and watch engine that use
//! this crate live in the `ckube` binary crate.

pub mod error;
pub use error::Error;

pub mod paginate;
pub use paginate::Paginate;

pub mod selector_codec;

pub mod projector;
pub use projector::{IndexConfig, Projector};

pub mod search;

/// Convenient alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
