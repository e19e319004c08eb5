//! The error taxonomy for selector decoding, projection, and search/sort.
//!
//! Everything here surfaces to clients as a 400-class [`ckube_wire::Status`];
//! the `ckube` crate's router is responsible for that translation and for
//! the request-level taxonomy members (`NotFound`, `Unauthorized`,
//! `Upstream`, `Panic`) that don't belong to pure proxy logic.
use thiserror::Error;

/// Errors raised decoding or evaluating the tunneled query protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A label selector could not be parsed, or used an unsupported
    /// operator (`>`, `<`).
    #[error("selector error: {0}")]
    Selector(#[from] ckube_wire::labels::SelectorError),

    /// The tunneled paginate payload was not valid base64 or not valid JSON.
    #[error("malformed paginate payload: {0}")]
    MalformedPaginate(String),

    /// A search or sort clause referenced a key absent from the object's
    /// projected index.
    #[error("unknown index key: {0}")]
    UnknownKey(String),

    /// An `!int` sort key's value could not be parsed as a number.
    #[error("value is not numeric: {0}")]
    ValueNotNumeric(String),

    /// A configured index expression (JSON path or template) could not be
    /// compiled.
    #[error("invalid index expression: {0}")]
    InvalidExpression(String),

    /// `page` requested a page past the end of the result set (and was not
    /// page 1, which always succeeds with an empty list).
    #[error("page {page} is out of range ({total} total items, page size {page_size})")]
    OutOfPage {
        /// The page number requested.
        page: usize,
        /// The requested page size.
        page_size: usize,
        /// The pre-pagination result count.
        total: usize,
    },
}

/// Convenient alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
