//! Error types for the vaxsched_core library.

use chrono::NaiveDate;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for vaxsched_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The child identifier did not resolve to a registered child
    #[error("Child not found: {0}")]
    ChildNotFound(String),

    /// A rule or ledger reference names a vaccine absent from the protocol
    #[error("Unknown vaccine: {0}")]
    UnknownVaccine(String),

    /// Protocol rules for a vaccine are corrupt (gaps, decreasing ages, ...)
    #[error("Malformed rule sequence for vaccine '{vaccine_id}': {reason}")]
    MalformedRuleSequence { vaccine_id: String, reason: String },

    /// A catch-up anchor would place the age floor before the birth date
    #[error(
        "Negative interval for vaccine '{vaccine_id}': anchor {anchor} precedes birth date {birth_date}"
    )]
    NegativeInterval {
        vaccine_id: String,
        anchor: NaiveDate,
        birth_date: NaiveDate,
    },

    /// A stored record could not be turned into a domain value
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}
