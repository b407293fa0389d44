//! Stage executor: run one stage against one claimed document and commit the
//! outcome in a single conditional write.
//!
//! Every invocation ends in exactly one of:
//! - skipped: the document is not at the stage's gating status, nothing written
//! - success or empty: fields, metadata and the advanced status written together
//! - failed: only the stage metadata (and a challenge page) written, status kept
//! - conflict: the status moved under us, nothing written

use std::sync::Arc;
use std::time::Instant;

use cito_grammar::WorkCatalog;
use cito_types::{CaseDocument, CitoError, Result, Stage, StageMeta};
use serde::{Deserialize, Serialize};

use crate::events::{EventEmitter, PipelineEvent};
use crate::extract::interpret;
use crate::retry::execute_with_retry;
use crate::stage::{EmptyPolicy, StageSpec};
use crate::store::{CommitOutcome, DocumentStore, DocumentUpdate, FieldChange};
use crate::transform::{Produced, StageOutput, TransformerRegistry};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    /// Blank input accepted as an empty result; the status still advances.
    Empty,
    Failed,
    Skipped,
    Conflict,
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Success => "success",
            StageOutcome::Empty => "empty",
            StageOutcome::Failed => "failed",
            StageOutcome::Skipped => "skipped",
            StageOutcome::Conflict => "conflict",
        }
    }

    /// True when the document moved to the stage's success status.
    pub fn advanced(&self) -> bool {
        matches!(self, StageOutcome::Success | StageOutcome::Empty)
    }
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub doc_id: String,
    pub outcome: StageOutcome,
    pub count: Option<usize>,
    pub input_chars: usize,
    pub output_chars: Option<usize>,
    pub latency_ms: u64,
    pub error: Option<String>,
    /// The document as committed, when a write happened.
    pub document: Option<CaseDocument>,
}

impl StageReport {
    fn new(spec: &StageSpec, doc: &CaseDocument, outcome: StageOutcome) -> Self {
        Self {
            stage: spec.stage,
            doc_id: doc.id().to_string(),
            outcome,
            count: None,
            input_chars: 0,
            output_chars: None,
            latency_ms: 0,
            error: None,
            document: None,
        }
    }
}

/// What a successful transform resolved to, ready to commit.
struct Resolved {
    changes: Vec<FieldChange>,
    count: Option<usize>,
    provider: Option<String>,
    model: Option<String>,
    http_status: Option<u16>,
    output_chars: Option<usize>,
}

// ---------------------------------------------------------------------------
// StageExecutor
// ---------------------------------------------------------------------------

pub struct StageExecutor {
    store: Arc<dyn DocumentStore>,
    registry: TransformerRegistry,
    catalog: WorkCatalog,
    emitter: EventEmitter,
}

impl StageExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, registry: TransformerRegistry) -> Self {
        Self {
            store,
            registry,
            catalog: WorkCatalog::default(),
            emitter: EventEmitter::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: WorkCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Run `spec` on `doc`, a snapshot taken under a claim.
    ///
    /// Transformer and validation failures are recorded on the document and
    /// reported as [`StageOutcome::Failed`]. Only store errors are returned.
    pub async fn run_stage(&self, spec: &StageSpec, doc: &CaseDocument) -> Result<StageReport> {
        let doc_id = doc.id().to_string();
        let stage_key = spec.stage.key();

        if doc.pipeline_status() != spec.gating {
            tracing::debug!(
                doc = %doc_id,
                stage = stage_key,
                status = %doc.pipeline_status(),
                "Gating status mismatch, skipping"
            );
            return Ok(StageReport::new(spec, doc, StageOutcome::Skipped));
        }

        let Some(input) = spec.input.read(doc) else {
            return self.commit_blank(spec, doc).await;
        };
        let input_chars = input.chars().count();
        self.emitter.emit(PipelineEvent::StageStarted {
            doc_id: doc_id.clone(),
            stage: stage_key.to_string(),
            input_chars,
        });

        let started = Instant::now();
        let result = self.transform(spec, doc, &input).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (update, outcome, count, output_chars, error) = match result {
            Ok(resolved) => {
                let mut meta = StageMeta::success()
                    .with_latency_ms(latency_ms)
                    .with_sizes(input_chars, resolved.output_chars);
                if let Some(count) = resolved.count {
                    meta = meta.with_count(count);
                }
                if let (Some(provider), Some(model)) = (resolved.provider, resolved.model) {
                    meta = meta.with_provider(provider, model);
                }
                if let Some(status) = resolved.http_status {
                    meta = meta.with_http_status(status);
                }
                let update = DocumentUpdate {
                    stage: spec.stage,
                    meta,
                    advance_to: Some(spec.success),
                    changes: resolved.changes,
                };
                (update, StageOutcome::Success, resolved.count, resolved.output_chars, None)
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(doc = %doc_id, stage = stage_key, error = %e, "Stage failed");
                let message = e.to_string();
                let mut meta = StageMeta::error(message.clone())
                    .with_latency_ms(latency_ms)
                    .with_sizes(input_chars, None);
                if let (Some(provider), Some(model)) = (&spec.params.provider, spec.params.model()) {
                    meta = meta.with_provider(provider.name.clone(), model);
                }
                let mut changes = Vec::new();
                match e {
                    CitoError::Challenge { status, html, .. } => {
                        meta = meta.with_http_status(status);
                        changes.push(FieldChange::ChallengeHtml(Some(html)));
                    }
                    CitoError::FetchFailed {
                        status: Some(status),
                        ..
                    } => meta = meta.with_http_status(status),
                    _ => {}
                }
                let update = DocumentUpdate {
                    stage: spec.stage,
                    meta,
                    advance_to: None,
                    changes,
                };
                (update, StageOutcome::Failed, None, None, Some(message))
            }
        };

        let mut report = self.commit(spec, doc, update, outcome).await?;
        report.count = count;
        report.input_chars = input_chars;
        report.output_chars = output_chars;
        report.latency_ms = latency_ms;
        if report.error.is_none() {
            report.error = error;
        }
        self.emit_finished(&report);
        Ok(report)
    }

    /// Transformer call with retries, then validation of any text output.
    async fn transform(&self, spec: &StageSpec, doc: &CaseDocument, input: &str) -> Result<Resolved> {
        let transformer = self.registry.get(spec.capability).ok_or_else(|| {
            CitoError::Config(format!("no transformer registered for {}", spec.capability))
        })?;
        let params = &spec.params;
        let doc_id = doc.id();
        let output: StageOutput = execute_with_retry(
            || transformer.transform(spec, doc, input),
            params.attempts,
            &params.backoff,
            params.attempt_timeout(input),
            spec.stage.key(),
            |attempt, e| {
                self.emitter.emit(PipelineEvent::StageRetrying {
                    doc_id: doc_id.to_string(),
                    stage: spec.stage.key().to_string(),
                    attempt,
                    error: e.to_string(),
                })
            },
        )
        .await?;

        let (changes, count) = match output.produced {
            Produced::Fields { changes, count } => (changes, count),
            Produced::Text { outputs, format } => {
                let (changes, count) = interpret(spec.stage, format, &outputs, &self.catalog)?;
                (changes, Some(count))
            }
        };
        Ok(Resolved {
            changes,
            count,
            provider: output.provider,
            model: output.model,
            http_status: output.http_status,
            output_chars: output.output_chars,
        })
    }

    /// Blank input: an empty result or an error, per the stage's policy.
    async fn commit_blank(&self, spec: &StageSpec, doc: &CaseDocument) -> Result<StageReport> {
        let path = spec.input.path();
        let (update, outcome) = match spec.empty_policy {
            EmptyPolicy::Success => (
                DocumentUpdate {
                    stage: spec.stage,
                    meta: StageMeta::empty(&path).with_count(0),
                    advance_to: Some(spec.success),
                    changes: FieldChange::empty_for(spec.stage),
                },
                StageOutcome::Empty,
            ),
            EmptyPolicy::Error => (
                DocumentUpdate {
                    stage: spec.stage,
                    meta: StageMeta::error(format!("{path} vazio")),
                    advance_to: None,
                    changes: Vec::new(),
                },
                StageOutcome::Failed,
            ),
        };
        tracing::info!(doc = %doc.id(), stage = spec.stage.key(), field = %path, "Input field is blank");
        let mut report = self.commit(spec, doc, update, outcome).await?;
        match report.outcome {
            StageOutcome::Empty => report.count = Some(0),
            StageOutcome::Failed => report.error = Some(format!("{path} vazio")),
            _ => {}
        }
        self.emit_finished(&report);
        Ok(report)
    }

    async fn commit(
        &self,
        spec: &StageSpec,
        doc: &CaseDocument,
        update: DocumentUpdate,
        outcome: StageOutcome,
    ) -> Result<StageReport> {
        let mut report = StageReport::new(spec, doc, outcome);
        match self.store.commit(doc.id(), spec.gating, update).await? {
            CommitOutcome::Committed(stored) => {
                report.document = Some(*stored);
            }
            CommitOutcome::Conflict { actual } => {
                tracing::warn!(
                    doc = %doc.id(),
                    stage = spec.stage.key(),
                    expected = %spec.gating,
                    actual = %actual,
                    "Status changed during stage, result discarded"
                );
                report.outcome = StageOutcome::Conflict;
                report.error = Some(format!(
                    "status changed from {} to {actual} while the stage ran",
                    spec.gating
                ));
            }
        }
        Ok(report)
    }

    fn emit_finished(&self, report: &StageReport) {
        let event = match report.outcome {
            StageOutcome::Success | StageOutcome::Empty => {
                tracing::info!(
                    doc = %report.doc_id,
                    stage = report.stage.key(),
                    outcome = %report.outcome,
                    count = ?report.count,
                    latency_ms = report.latency_ms,
                    "Stage committed"
                );
                PipelineEvent::StageCompleted {
                    doc_id: report.doc_id.clone(),
                    stage: report.stage.key().to_string(),
                    status: report.outcome.as_str().to_string(),
                    count: report.count,
                    input_chars: report.input_chars,
                    output_chars: report.output_chars,
                    duration_ms: report.latency_ms,
                }
            }
            _ => PipelineEvent::StageFailed {
                doc_id: report.doc_id.clone(),
                stage: report.stage.key().to_string(),
                error: report.error.clone().unwrap_or_default(),
            },
        };
        self.emitter.emit(event);
    }
}
