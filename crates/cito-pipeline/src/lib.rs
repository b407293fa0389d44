//! Stage executor, document store, schema validator and orchestrator.
//!
//! This crate implements the CITO enrichment runner: the status-gated stage
//! chain, claim and conditional-commit store adapters, transformers for
//! fetch/clean/sections/parties/completions, response validation, retries,
//! and the sequential orchestrator with its progress events.

pub mod config;
pub mod events;
pub mod executor;
pub mod extract;
pub mod interviewer;
pub mod orchestrator;
pub mod retry;
pub mod stage;
pub mod store;
pub mod transform;
pub mod validation;
pub mod validator;

pub use config::{Engine, FetchConfig, PipelineConfig, RetryConfig, StageConfig};
pub use events::{EventEmitter, PipelineEvent};
pub use executor::{StageExecutor, StageOutcome, StageReport};
pub use extract::interpret;
pub use interviewer::{
    Answer, AutoApproveInterviewer, ConsoleInterviewer, Interviewer, Question,
    RecordingInterviewer,
};
pub use orchestrator::{
    format_hms, identification_line, render_banner, render_summary, Orchestrator, RunOptions,
    RunSummary, Selection,
};
pub use retry::{execute_with_retry, BackoffPolicy};
pub use stage::{Capability, EmptyPolicy, InputField, StageChain, StageParams, StageSpec};
pub use store::{
    apply_update, ClaimResult, CommitOutcome, DocumentStore, DocumentUpdate, FieldChange,
    FileStore, MemoryStore,
};
pub use transform::{default_registry, StageOutput, Transformer, TransformerRegistry};
pub use validation::{validate, validate_or_raise, ChainRule, Diagnostic, Severity};
pub use validator::ResponseFormat;
