//! Error handling for the nowcasting system.

use thiserror::Error;

use crate::geo::GeoKind;

/// Main error type for the nowcasting system
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (bad reference tables, invalid settings)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Data-related errors (e.g. missing or malformed signal data)
    #[error("Data error: {0}")]
    DataError(String),

    /// A geo-kind tag that is not county, msa or state
    #[error("Unknown geo kind: {0}")]
    UnknownGeoKind(String),

    /// A metro or state identifier with no entry in the rollup tables
    #[error("Unknown {kind} location: {id}")]
    UnknownLocation { id: String, kind: GeoKind },

    /// Signal/ground-truth length disagreement beyond the alignment policy.
    ///
    /// The field is `data_source`, not `source`: thiserror reserves `source`
    /// for the error chain.
    #[error(
        "Shape mismatch for {data_source}:{signal} at {location}: \
         {truth_len} truth values vs {signal_len} signal values"
    )]
    ShapeMismatch {
        data_source: String,
        signal: String,
        location: String,
        truth_len: usize,
        signal_len: usize,
    },

    /// A signal that the availability pre-check promised but the fetch lost
    #[error("Signal unavailable: {data_source}:{signal} at {location}")]
    SignalUnavailable {
        data_source: String,
        signal: String,
        location: String,
    },

    /// Multi-date nowcast requests are unsupported
    #[error("Nowcasting supports exactly one date per run, got {0}")]
    UnsupportedRange(usize),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// CSV parse errors from the geographic reference tables
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Request errors
    #[error("Request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// Binary cache payload encoding/decoding errors
    #[error("Cache encoding error: {0}")]
    EncodeError(#[from] bincode::Error),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

/// Result type for the nowcasting system
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

// Allow automatic conversion from anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
