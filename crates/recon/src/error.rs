use serde::Serialize;
use thiserror::Error;

use crate::matcher::MatchFailure;

/// Run-level failures. These abort an audit before the record loop starts;
/// nothing that happens to a single record is ever reported through here.
#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (duplicate column mapping, empty name, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Required columns absent from the input header row.
    #[error("input is missing required column(s): {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },
    /// Input could not be read or decoded.
    #[error("input error: {0}")]
    Input(String),
}

/// Failure reported by a remote source for a single lookup.
///
/// Cloned into the run cache so a failed lookup is answered from memory
/// for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
    /// The source panicked instead of returning.
    pub panicked: bool,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), panicked: false }
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self { message: message.into(), panicked: true }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Everything that can go wrong while auditing one record.
///
/// The `Display` text is the reason string shown to the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("Error reading input data: {0}")]
    Extraction(String),
    #[error("Patient Fetch Error: {0}")]
    IdentityFetch(FetchError),
    #[error("No valid patient data for ID {patient_id}.")]
    IdentityMissing { patient_id: String },
    #[error("Patient record for ID {patient_id} has no usable name.")]
    IdentityIncomplete { patient_id: String },
    #[error("Charge Fetch Error: {0}")]
    CandidateFetch(FetchError),
    #[error("No matching charge found (none returned for {display_name} on {service_date})")]
    NoCandidate { display_name: String, service_date: String },
    #[error("{failure} for Claim ID {claim_id}")]
    NoMatch { failure: MatchFailure, claim_id: String },
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Coarse classification of a record failure, exported with each verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Extraction,
    RemoteFetch,
    NoCandidate,
    NoMatch,
    FieldMismatch,
    Unexpected,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extraction => write!(f, "extraction"),
            Self::RemoteFetch => write!(f, "remote_fetch"),
            Self::NoCandidate => write!(f, "no_candidate"),
            Self::NoMatch => write!(f, "no_match"),
            Self::FieldMismatch => write!(f, "field_mismatch"),
            Self::Unexpected => write!(f, "unexpected"),
        }
    }
}

impl RecordError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Extraction(_) => FailureKind::Extraction,
            Self::IdentityFetch(_)
            | Self::IdentityMissing { .. }
            | Self::IdentityIncomplete { .. }
            | Self::CandidateFetch(_) => FailureKind::RemoteFetch,
            Self::NoCandidate { .. } => FailureKind::NoCandidate,
            Self::NoMatch { .. } => FailureKind::NoMatch,
            Self::Unexpected(_) => FailureKind::Unexpected,
        }
    }

    /// Fatal errors make the record an `Error`; the rest make it a `Mismatch`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), FailureKind::NoCandidate | FailureKind::NoMatch)
    }
}
