//! Error handling for [`ckube_k8s_client`][crate]
use std::path::PathBuf;
use thiserror::Error;

pub use ckube_wire::ErrorResponse;

/// Possible errors when talking to a Kubernetes API server
#[derive(Error, Debug)]
pub enum Error {
    /// The API server responded with a structured `Status` failure.
    ///
    /// Common when the `resourceVersion` used for a watch has expired
    /// (`410 Gone`).
    #[error("ApiError: {0}")]
    Api(#[source] ErrorResponse),

    /// TCP connection to the API server failed.
    #[error("ConnectionError: {0}")]
    Connection(#[source] std::io::Error),

    /// Hyper transport error.
    #[error("HyperError: {0}")]
    HyperError(#[from] hyper::Error),

    /// TLS configuration failed.
    #[error("TlsError: {0}")]
    Tls(String),

    /// HTTP request construction failed.
    #[error("HttpError: {0}")]
    HttpError(#[from] http::Error),

    /// Failed to construct a URI for a request.
    #[error(transparent)]
    InvalidUri(#[from] http::uri::InvalidUri),

    /// The response body could not be deserialized into the expected shape.
    #[error("Error deserializing response: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Reading the chunked watch event stream failed.
    #[error("Error reading events stream: {0}")]
    ReadEvents(#[source] std::io::Error),

    /// A line in the watch event stream was not valid JSON on its own.
    #[error("Malformed watch event line")]
    MalformedWatchLine,

    /// Loading or parsing the kubeconfig failed.
    #[error("Error loading kubeconfig: {0}")]
    Kubeconfig(#[from] ConfigError),

    /// A wire-level shape failed to decode.
    #[error("ckube-wire error: {0}")]
    Wire(#[from] ckube_wire::Error),
}

/// Errors specific to loading a multi-cluster kubeconfig file.
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read kubeconfig file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse kubeconfig YAML: {0}")]
    ParseYaml(#[source] serde_yaml::Error),

    #[error("Unable to find named context: {0}")]
    ContextNotFound(String),

    #[error("Unable to find cluster '{0}' referenced by context")]
    ClusterNotFound(String),

    #[error("Unable to find user '{0}' referenced by context")]
    UserNotFound(String),

    #[error("No current-context set and none was given explicitly")]
    NoCurrentContext,

    #[error("Failed to decode base64 data for '{field}': {source}")]
    Base64Decode {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Context '{0}' has neither a bearer token, a client certificate, nor basic auth credentials")]
    NoCredentials(String),

    #[error("Failed to parse PEM data for '{0}'")]
    InvalidPem(&'static str),
}
