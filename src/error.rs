//! Error types
//!
//! Only the fatal class crosses the extractor boundary. Empty cells, junk in
//! numeric cells and missing attributes are absorbed as NULL values.

use thiserror::Error;

/// Errors that abort one extraction call
#[derive(Debug, Error)]
pub enum ExtractError {
    /// A date cell was present but did not match the declared format
    #[error("DateParseError: column '{column}' value '{raw}' does not match format '{format}': {source}")]
    DateParse {
        column: String,
        raw: String,
        format: String,
        #[source]
        source: chrono::ParseError,
    },

    /// A column declared as required had an empty cell
    #[error("column '{column}' is required but row {row} has no value")]
    MissingValue { column: String, row: usize },

    /// The row selector could not be parsed
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// The request JSON could not be decoded
    #[error("invalid table request: {0}")]
    Request(#[from] serde_json::Error),
}

/// Errors from fetching a page to extract from
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// robots.txt forbids fetching this URL
    #[error("disallowed by robots.txt: {0}")]
    Disallowed(String),
}

/// Errors from persisting records
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from pumping an extraction sequence into a sink
#[derive(Debug, Error)]
pub enum DrainError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
