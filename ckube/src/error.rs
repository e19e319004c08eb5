//! The router-facing error taxonomy: every error ckube can raise while
//! handling a request, and how it renders as a Kubernetes [`Status`].
use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use ckube_wire::Status;
use thiserror::Error;

/// Top-level error type for the `ckube` binary and library.
#[derive(Error, Debug)]
pub enum Error {
    /// Selector decoding or search/sort evaluation failed in pure proxy
    /// logic (`ckube-core`).
    #[error(transparent)]
    Core(#[from] ckube_core::Error),

    /// A wire-type operation failed (rare; mostly JSON shape mismatches).
    #[error(transparent)]
    Wire(#[from] ckube_wire::Error),

    /// The per-cluster HTTP client reported a failure talking upstream.
    #[error(transparent)]
    Client(#[from] ckube_k8s_client::Error),

    /// A single-resource `Get`, or a request naming a cluster, found
    /// nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The configured bearer token was required and missing or incorrect.
    #[error("unauthorized")]
    Unauthorized,

    /// A request named a cluster absent from the current configuration
    /// snapshot.
    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    /// A configuration file failed to parse or validate.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading or watching the configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed outside a typed wire shape.
    #[error("serde error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal invariant was violated. Recovered at the router
    /// boundary and surfaced as a 500.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The HTTP status code this error renders as.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Core(ckube_core::Error::Selector(_)) => 400,
            Error::Core(ckube_core::Error::MalformedPaginate(_)) => 400,
            Error::Core(ckube_core::Error::UnknownKey(_)) => 400,
            Error::Core(ckube_core::Error::ValueNotNumeric(_)) => 400,
            Error::Core(ckube_core::Error::InvalidExpression(_)) => 400,
            Error::Core(ckube_core::Error::OutOfPage { .. }) => 400,
            Error::Wire(_) => 400,
            Error::NotFound(_) | Error::UnknownCluster(_) => 404,
            Error::Unauthorized => 401,
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::Internal(_) => 500,
            Error::Client(ckube_k8s_client::Error::Api(resp)) => {
                if resp.code == 0 {
                    500
                } else {
                    resp.code
                }
            }
            Error::Client(_) => 500,
        }
    }

    /// A machine-readable reason string, mirroring what an apiserver would
    /// put in `Status.reason`.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Core(ckube_core::Error::Selector(_)) => "BadRequest",
            Error::Core(ckube_core::Error::MalformedPaginate(_)) => "BadRequest",
            Error::Core(ckube_core::Error::UnknownKey(_)) => "BadRequest",
            Error::Core(ckube_core::Error::ValueNotNumeric(_)) => "BadRequest",
            Error::Core(ckube_core::Error::InvalidExpression(_)) => "BadRequest",
            Error::Core(ckube_core::Error::OutOfPage { .. }) => "OutOfPage",
            Error::Wire(_) => "BadRequest",
            Error::NotFound(_) => "NotFound",
            Error::UnknownCluster(_) => "NotFound",
            Error::Unauthorized => "Unauthorized",
            Error::Client(_) => "Upstream",
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::Internal(_) => "InternalError",
        }
    }

    /// Render this error as a Kubernetes `Status` response body, the shape
    /// every error the router surfaces to a client takes.
    pub fn to_status(&self) -> Status {
        Status::failure(self.status_code(), self.reason(), self.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if matches!(self, Error::Internal(_)) {
            tracing::error!(error = %self, "internal error handling request");
        }
        let status = self.to_status();
        let code = StatusCode::from_u16(status.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (code, Json(status)).into_response()
    }
}
