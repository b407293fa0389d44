//! Shared types, errors, and the case document model for the CITO pipeline.
//!
//! This crate provides the foundational types used across all other CITO crates:
//! - `CitoError`: unified error taxonomy
//! - `CaseDocument`: typed view of one persisted STF decision
//! - `PipelineStatus` / `Stage`: the gating key and the stage identifiers
//! - citation records produced by the grammars (`LegislationNorm`, `NoteReference`, ...)

pub mod document;
pub mod records;

pub use document::{
    Audit, CaseDocument, Content, DerivedData, Identity, PipelineStatus, Processing,
    ProcessingStatus, Section, SectionsMeta, Stage, StageMeta, Status,
};
pub use records::{
    DecisionDetails, DecisionResult, DoctrineReference, ItemType, Jurisdiction, LegislationNorm,
    MinisterVote, NormReference, NormType, NoteItem, NoteReference, NoteType, Party,
    WorkMatchType,
};

/// Unified error type for all CITO subsystems.
#[derive(Debug, thiserror::Error)]
pub enum CitoError {
    // === LLM Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    // === Fetch Errors ===
    #[error("Fetch of {url} failed: {message}")]
    FetchFailed {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Challenge page served for {url} (HTTP {status})")]
    Challenge {
        url: String,
        status: u16,
        html: String,
    },

    // === Grammar / Schema Errors ===
    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Schema validation failed: {0}")]
    SchemaError(String),

    #[error("Transformer for stage '{stage}' failed: {message}")]
    TransformError { stage: String, message: String },

    #[error("Max retries exhausted for stage '{stage}' after {attempts} attempts")]
    RetriesExhausted { stage: String, attempts: usize },

    // === Store Errors ===
    #[error("Document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Document '{0}' not found")]
    NotFound(String),

    #[error("Invalid document '{id}': {message}")]
    InvalidDocument { id: String, message: String },

    // === Pipeline Errors ===
    #[error("Invalid stage chain: {0}")]
    ChainError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl CitoError {
    /// Returns `true` if the error is transient and the transformer call may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            CitoError::RateLimited { .. }
            | CitoError::RequestTimeout { .. }
            | CitoError::ProviderError {
                retryable: true, ..
            } => true,
            CitoError::FetchFailed { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CitoError::AuthError { .. }
                | CitoError::Challenge { .. }
                | CitoError::ParseError { .. }
                | CitoError::SchemaError(_)
                | CitoError::ChainError(_)
                | CitoError::Config(_)
        )
    }

    /// Returns `true` if the error must abort a whole orchestrator run rather
    /// than being recorded against a single document.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CitoError::StoreUnavailable(_))
    }
}

/// A convenience alias for `Result<T, CitoError>`.
pub type Result<T> = std::result::Result<T, CitoError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // 1. Display strings carry the structured fields
    #[test]
    fn error_display_messages() {
        let err = CitoError::ProviderError {
            provider: "mistral".into(),
            status: 503,
            message: "overloaded".into(),
            retryable: true,
        };
        assert_eq!(
            err.to_string(),
            "Provider mistral returned HTTP 503: overloaded"
        );

        let err = CitoError::ParseError {
            line: 3,
            message: "unknown tag 'X'".into(),
        };
        assert_eq!(err.to_string(), "Parse error at line 3: unknown tag 'X'");

        let err = CitoError::NotFound("15345".into());
        assert_eq!(err.to_string(), "Document '15345' not found");
    }

    // 2. Transient transformer failures are retryable
    #[test]
    fn retryable_classification() {
        assert!(CitoError::RateLimited {
            provider: "mistral".into(),
            retry_after_ms: 0
        }
        .is_retryable());
        assert!(CitoError::RequestTimeout {
            provider: "mistral".into(),
            timeout_ms: 60_000
        }
        .is_retryable());
        assert!(CitoError::FetchFailed {
            url: "https://portal.stf.jus.br".into(),
            status: None,
            message: "connection reset".into()
        }
        .is_retryable());
        assert!(CitoError::FetchFailed {
            url: "https://portal.stf.jus.br".into(),
            status: Some(502),
            message: "bad gateway".into()
        }
        .is_retryable());
        assert!(!CitoError::FetchFailed {
            url: "https://portal.stf.jus.br".into(),
            status: Some(404),
            message: "missing".into()
        }
        .is_retryable());
    }

    // 3. Grammar and schema mismatches are never retried
    #[test]
    fn validation_errors_are_terminal() {
        let parse = CitoError::ParseError {
            line: 1,
            message: "bad".into(),
        };
        assert!(parse.is_terminal());
        assert!(!parse.is_retryable());

        let schema = CitoError::SchemaError("missing caseData".into());
        assert!(schema.is_terminal());
        assert!(!schema.is_retryable());

        let challenge = CitoError::Challenge {
            url: "u".into(),
            status: 403,
            html: String::new(),
        };
        assert!(challenge.is_terminal());
    }

    // 4. Only store connectivity is fatal for a run
    #[test]
    fn only_store_unavailable_is_fatal() {
        assert!(CitoError::StoreUnavailable("disk gone".into()).is_fatal());
        assert!(!CitoError::NotFound("1".into()).is_fatal());
        assert!(!CitoError::SchemaError("x".into()).is_fatal());
    }

    // 5. From conversions
    #[test]
    fn from_io_and_json() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CitoError = io.into();
        assert!(matches!(err, CitoError::Io(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CitoError = json_err.into();
        assert!(matches!(err, CitoError::Json(_)));
    }
}
