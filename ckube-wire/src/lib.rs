//! Shared, client-less Kubernetes wire types used by `ckube`.
//!
//! This is the apimachinery-adjacent layer: object identity (group, version,
//! resource), the generic dynamic object envelope, label selector parsing,
//! watch event framing, and the `Status` response shape. None of these types
//! perform I/O; the HTTP side lives in `ckube-k8s-client`.

pub mod dynamic;
pub use dynamic::DynamicObject;

pub mod gvk;
pub use gvk::GroupVersionResource;

pub mod metadata;
pub use metadata::TypeMeta;

pub mod labels;
pub use labels::{Expression, Selector};

pub mod object;
pub use object::ObjectList;

pub mod response;
pub use response::Status;

pub mod watch;
pub use watch::WatchEvent;

mod error;
pub use error::{Error, ErrorResponse};

/// Convenience alias matching the rest of the workspace's error handling style.
pub type Result<T, E = Error> = std::result::Result<T, E>;
