//! Pipeline orchestrator: select documents, claim them, and drive each one
//! through the stage chain.
//!
//! The loop is sequential. A document's failure is recorded and the run moves
//! on; only store errors abort it.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cito_grammar::WorkCatalog;
use cito_llm::LlmClient;
use cito_types::{CaseDocument, CitoError, PipelineStatus, Result, Stage};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::events::{EventEmitter, PipelineEvent};
use crate::executor::{StageExecutor, StageOutcome};
use crate::interviewer::{AutoApproveInterviewer, Interviewer, Question};
use crate::stage::StageChain;
use crate::store::{ClaimResult, DocumentStore};
use crate::transform::default_registry;

pub const PIPELINE_NAME: &str = "CITO";
const BOX_WIDTH: usize = 47;

// ---------------------------------------------------------------------------
// Selection and options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// One document by `stfDecisionId`.
    Single(String),
    /// Every document currently at this status, in queue order.
    Batch(PipelineStatus),
    /// Claim-next loop over one stage until its queue is empty.
    Drain(Stage),
}

impl std::fmt::Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selection::Single(id) => write!(f, "stfDecisionId={id}"),
            Selection::Batch(status) => write!(f, "pipelineStatus={status}"),
            Selection::Drain(stage) => write!(f, "drain {}", stage.key()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub delay_between_items: Duration,
    pub delay_between_steps: Duration,
    pub stop_on_error: bool,
    /// Ask before each document.
    pub confirm: bool,
    /// Claim owner for this run.
    pub owner: String,
}

impl RunOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            delay_between_items: config.delay_between_items(),
            delay_between_steps: config.delay_between_steps(),
            stop_on_error: config.stop_on_error,
            confirm: false,
            owner: format!("cito-{}", uuid::Uuid::new_v4()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_found: usize,
    pub stopped_early: bool,
    pub duration_ms: u64,
}

impl RunSummary {
    /// Per-result counts for the summary box. Zero skip/not-found rows are left out.
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::from([("success", self.succeeded), ("failed", self.failed)]);
        if self.skipped > 0 {
            counts.insert("skipped", self.skipped);
        }
        if self.not_found > 0 {
            counts.insert("not_found", self.not_found);
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentResult {
    Succeeded,
    Failed,
    Skipped,
    NotFound,
    /// Operator asked to stop.
    Quit,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Whole seconds as `HH:MM:SS`.
pub fn format_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Run time spent in pauses alone: a step delay after every stage of every
/// document plus an item delay between documents.
pub fn estimate_seconds(steps: usize, total: usize, delay_steps: Duration, delay_items: Duration) -> f64 {
    (steps * total) as f64 * delay_steps.as_secs_f64()
        + total.saturating_sub(1) as f64 * delay_items.as_secs_f64()
}

fn box_line(content: &str) -> String {
    let trimmed: String = content.chars().take(BOX_WIDTH).collect();
    format!("│{trimmed:<width$}│▒", width = BOX_WIDTH)
}

/// Shadowed box; with `separator` the first line is a title.
pub fn render_box(lines: &[String], separator: bool) -> String {
    let mut out = vec![format!("┌{}┐", "─".repeat(BOX_WIDTH))];
    for (i, line) in lines.iter().enumerate() {
        out.push(box_line(line));
        if separator && i == 0 {
            out.push(format!("╞{}╡▒", "═".repeat(BOX_WIDTH)));
        }
    }
    out.push(format!("└{}┘▒", "─".repeat(BOX_WIDTH)));
    out.push(format!(" {}", "▒".repeat(BOX_WIDTH)));
    out.join("\n")
}

pub fn stage_title(stage: Stage) -> &'static str {
    match stage {
        Stage::Scrape => "GET CASE HTML",
        Stage::HtmlClean => "CLEAN HTML",
        Stage::Sections => "EXTRACT SECTIONS",
        Stage::PartiesKeywords => "EXTRACT PARTIES AND KEYWORDS",
        Stage::Legislation => "EXTRACT LEGISLATION",
        Stage::Notes => "EXTRACT NOTES",
        Stage::Doctrine => "EXTRACT DOCTRINE",
        Stage::DecisionDetails => "EXTRACT DECISION DETAILS",
    }
}

/// Name box, workflow box and execution box.
pub fn render_banner(
    name: &str,
    stages: &[Stage],
    total: usize,
    delay_steps: Duration,
    delay_items: Duration,
    datetime: &str,
) -> String {
    let header = render_box(&[format!("  {name}")], false);
    let mut workflow = vec!["  PIPELINE WORKFLOW".to_string()];
    workflow.extend(
        stages
            .iter()
            .enumerate()
            .map(|(i, s)| format!("  {}. {}", i + 1, stage_title(*s))),
    );
    let eta = estimate_seconds(stages.len(), total, delay_steps, delay_items);
    let execution = vec![
        "  PIPELINE EXECUTION STARTED".to_string(),
        format!("  CASES TO PROCESS: {total}"),
        format!("  ESTIMATED TIME: {}", format_hms(eta)),
        format!("  DATETIME: {datetime}"),
    ];
    [header, render_box(&workflow, true), render_box(&execution, true)].join("\n\n")
}

pub fn render_summary(summary: &RunSummary) -> String {
    let mut lines = vec![
        "  PIPELINE EXECUTION SUMMARY".to_string(),
        format!("  TOTAL CASES: {}", summary.total),
    ];
    for (status, count) in summary.status_counts() {
        lines.push(format!("  {}: {count}", status.to_uppercase()));
    }
    render_box(&lines, true)
}

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or("-")
}

/// One-line identity of a document for the run log.
pub fn identification_line(doc: &CaseDocument) -> String {
    let id = &doc.identity;
    format!(
        "Identificacao | stfDecisionId={} | caseClass={} | caseNumber={} | caseTitle={} | \
         judgingBody={} | rapporteur={} | judgmentDate={} | publicationDate={} | pipelineStatus={}",
        id.stf_decision_id,
        or_dash(id.case_class.as_deref()),
        or_dash(id.case_number.as_deref()),
        or_dash(id.case_title.as_deref()),
        or_dash(id.judging_body.as_deref()),
        or_dash(id.rapporteur.as_deref()),
        or_dash(id.judgment_date.as_deref()),
        or_dash(id.publication_date.as_deref()),
        doc.pipeline_status(),
    )
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    executor: StageExecutor,
    chain: StageChain,
    interviewer: Box<dyn Interviewer>,
    options: RunOptions,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(executor: StageExecutor, chain: StageChain, options: RunOptions) -> Self {
        Self {
            executor,
            chain,
            interviewer: Box::new(AutoApproveInterviewer),
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Validated chain, built-in transformers and the work catalog from `config`.
    pub fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn DocumentStore>,
        llm: Arc<LlmClient>,
    ) -> Result<Self> {
        let chain = StageChain::from_config(config)?;
        let executor = StageExecutor::new(store, default_registry(config, llm)?)
            .with_catalog(WorkCatalog::new(&config.work_aliases));
        Ok(Self::new(executor, chain, RunOptions::from_config(config)))
    }

    pub fn with_interviewer(mut self, interviewer: impl Interviewer + 'static) -> Self {
        self.interviewer = Box::new(interviewer);
        self
    }

    pub fn with_confirm(mut self, confirm: bool) -> Self {
        self.options.confirm = confirm;
        self
    }

    /// Keep only `stage` in the chain.
    pub fn restrict_to(mut self, stage: Stage) -> Result<Self> {
        self.chain = self
            .chain
            .only(stage)
            .ok_or_else(|| CitoError::ChainError(format!("stage {stage} is not enabled")))?;
        Ok(self)
    }

    pub fn chain(&self) -> &StageChain {
        &self.chain
    }

    pub fn emitter(&self) -> &EventEmitter {
        self.executor.emitter()
    }

    /// Set to stop the run before the next document.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn store(&self) -> &Arc<dyn DocumentStore> {
        self.executor.store()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub async fn run(&self, selection: Selection) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = match &selection {
            Selection::Single(id) => self.run_ids(&selection, vec![id.clone()]).await?,
            Selection::Batch(status) => {
                let ids = self.store().find_ids(Some(*status)).await?;
                self.run_ids(&selection, ids).await?
            }
            Selection::Drain(stage) => self.drain(&selection, *stage).await?,
        };
        summary.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            not_found = summary.not_found,
            duration_ms = summary.duration_ms,
            "Pipeline finished"
        );
        self.emitter().emit(PipelineEvent::RunCompleted {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    fn announce(&self, selection: &Selection, total: usize) {
        let stages: Vec<Stage> = self.chain.specs().iter().map(|s| s.stage).collect();
        let (steps, items) = (self.options.delay_between_steps, self.options.delay_between_items);
        let datetime = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        tracing::info!(selection = %selection, total, stages = stages.len(), "Pipeline started");
        self.emitter().emit(PipelineEvent::RunStarted {
            selection: selection.to_string(),
            stages: stages.iter().map(|s| s.key().to_string()).collect(),
            total,
            delay_between_items_ms: items.as_millis() as u64,
            delay_between_steps_ms: steps.as_millis() as u64,
            eta: format_hms(estimate_seconds(stages.len(), total, steps, items)),
            banner: render_banner(PIPELINE_NAME, &stages, total, steps, items, &datetime),
        });
    }

    async fn run_ids(&self, selection: &Selection, ids: Vec<String>) -> Result<RunSummary> {
        let total = ids.len();
        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };
        if total == 0 {
            tracing::info!(selection = %selection, "No documents to process");
            return Ok(summary);
        }
        self.announce(selection, total);

        for (i, id) in ids.iter().enumerate() {
            if self.cancelled() {
                tracing::warn!("Run cancelled");
                summary.stopped_early = true;
                break;
            }
            let result = self.process_id(id, i + 1, total).await?;
            if self.tally(&mut summary, result) {
                break;
            }
            if i + 1 < total && !self.options.delay_between_items.is_zero() {
                tracing::info!(
                    delay_ms = self.options.delay_between_items.as_millis() as u64,
                    "Waiting before the next document"
                );
                tokio::time::sleep(self.options.delay_between_items).await;
            }
        }
        Ok(summary)
    }

    /// Count `result`; true when the run must stop.
    fn tally(&self, summary: &mut RunSummary, result: DocumentResult) -> bool {
        match result {
            DocumentResult::Succeeded => {
                summary.processed += 1;
                summary.succeeded += 1;
            }
            DocumentResult::Failed => {
                summary.processed += 1;
                summary.failed += 1;
                if self.options.stop_on_error {
                    tracing::warn!("Stopping on error");
                    summary.stopped_early = true;
                    return true;
                }
            }
            DocumentResult::Skipped => summary.skipped += 1,
            DocumentResult::NotFound => summary.not_found += 1,
            DocumentResult::Quit => {
                summary.skipped += 1;
                summary.stopped_early = true;
                return true;
            }
        }
        false
    }

    async fn process_id(&self, id: &str, index: usize, total: usize) -> Result<DocumentResult> {
        tracing::info!("({index}/{total}) Processando stfDecisionId={id}");
        let Some(snapshot) = self.store().get(id).await? else {
            tracing::warn!("Identificacao | Documento nao encontrado para stfDecisionId informado.");
            self.skip(id, "not found");
            return Ok(DocumentResult::NotFound);
        };
        tracing::info!("{}", identification_line(&snapshot));

        let remaining = total - index + 1;
        self.emitter().emit(PipelineEvent::DocumentStarted {
            doc_id: id.to_string(),
            index,
            total,
            status: snapshot.pipeline_status().to_string(),
            title: snapshot.identity.case_title.clone(),
            eta_remaining: format_hms(estimate_seconds(
                self.chain.len(),
                remaining,
                self.options.delay_between_steps,
                self.options.delay_between_items,
            )),
        });

        if self.options.confirm {
            let answer = self
                .interviewer
                .ask(&Question {
                    prompt: format!(
                        "Process {id} ({})? [yes/skip/quit]",
                        snapshot.pipeline_status()
                    ),
                    choices: vec!["yes".into(), "skip".into(), "quit".into()],
                    default: Some("yes".into()),
                })
                .await?;
            match answer.choice.trim().to_lowercase().as_str() {
                "skip" | "s" | "n" | "no" => {
                    self.skip(id, "skipped by operator");
                    return Ok(DocumentResult::Skipped);
                }
                "quit" | "q" => {
                    self.skip(id, "run stopped by operator");
                    return Ok(DocumentResult::Quit);
                }
                _ => {}
            }
        }

        let owner = self.options.owner.as_str();
        let doc = match self
            .store()
            .claim_by_id(id, &self.chain.gating_statuses(), owner)
            .await?
        {
            ClaimResult::Claimed(doc) => *doc,
            ClaimResult::NotFound => {
                self.skip(id, "not found");
                return Ok(DocumentResult::NotFound);
            }
            ClaimResult::Ineligible(status) => {
                self.skip(id, &format!("no enabled stage runs from status {status}"));
                return Ok(DocumentResult::Skipped);
            }
            ClaimResult::Busy => {
                self.skip(id, "claimed by another worker");
                return Ok(DocumentResult::Skipped);
            }
        };

        let result = self.run_document(doc).await;
        let released = self.store().release(id, owner).await;
        let result = result?;
        released?;
        Ok(result)
    }

    fn skip(&self, id: &str, reason: &str) {
        tracing::info!(doc = %id, reason, "Document skipped");
        self.emitter().emit(PipelineEvent::DocumentSkipped {
            doc_id: id.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Run every stage the document is ready for, stopping at the first one
    /// that does not advance it.
    async fn run_document(&self, mut doc: CaseDocument) -> Result<DocumentResult> {
        let doc_id = doc.id().to_string();
        let mut stages_run = 0;
        let mut failed = false;

        while let Some(spec) = self.chain.next_for(doc.pipeline_status()) {
            tracing::info!(doc = %doc_id, stage = spec.stage.key(), "Executando: {}", stage_title(spec.stage));
            let report = match self.executor.run_stage(spec, &doc).await {
                Ok(report) => report,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(doc = %doc_id, stage = spec.stage.key(), error = %e, "Stage aborted");
                    failed = true;
                    break;
                }
            };
            stages_run += 1;
            if !self.options.delay_between_steps.is_zero() {
                tokio::time::sleep(self.options.delay_between_steps).await;
            }
            match (report.outcome, report.document) {
                (outcome, Some(next)) if outcome.advanced() => doc = next,
                (StageOutcome::Failed, _) => {
                    tracing::error!(
                        doc = %doc_id,
                        stage = spec.stage.key(),
                        error = report.error.as_deref().unwrap_or_default(),
                        "ERRO: stage failed"
                    );
                    failed = true;
                    break;
                }
                _ => break,
            }
        }

        self.emitter().emit(PipelineEvent::DocumentCompleted {
            doc_id,
            success: !failed,
            stages_run,
        });
        Ok(match (failed, stages_run) {
            (true, _) => DocumentResult::Failed,
            (false, 0) => DocumentResult::Skipped,
            (false, _) => DocumentResult::Succeeded,
        })
    }

    /// Claim-next loop for one stage. Stops when the queue is empty, when a
    /// document comes back (it failed and kept its status), or on cancel.
    async fn drain(&self, selection: &Selection, stage: Stage) -> Result<RunSummary> {
        let chain = self
            .chain
            .only(stage)
            .ok_or_else(|| CitoError::ChainError(format!("stage {stage} is not enabled")))?;
        let spec = &chain.specs()[0];
        let total = self.store().count(Some(spec.gating)).await?;
        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };
        if total == 0 {
            tracing::info!(stage = stage.key(), "Queue is empty");
            return Ok(summary);
        }
        self.announce(selection, total);

        let owner = self.options.owner.as_str();
        let mut seen = HashSet::new();
        let mut index = 0;
        loop {
            if self.cancelled() {
                summary.stopped_early = true;
                break;
            }
            let Some(doc) = self.store().claim_next(spec.gating, owner).await? else {
                break;
            };
            let id = doc.id().to_string();
            if !seen.insert(id.clone()) {
                self.store().release(&id, owner).await?;
                break;
            }
            index += 1;
            tracing::info!("({index}/{total}) {}", identification_line(&doc));
            let report = self.executor.run_stage(spec, &doc).await;
            match self.store().release(&id, owner).await {
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!(doc = %id, error = %e, "Release failed"),
                Ok(()) => {}
            }

            let result = match report {
                Ok(report) => match report.outcome {
                    StageOutcome::Success | StageOutcome::Empty => DocumentResult::Succeeded,
                    StageOutcome::Failed => DocumentResult::Failed,
                    StageOutcome::Skipped | StageOutcome::Conflict => DocumentResult::Skipped,
                },
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(doc = %id, stage = stage.key(), error = %e, "Stage aborted");
                    DocumentResult::Failed
                }
            };
            self.emitter().emit(PipelineEvent::DocumentCompleted {
                doc_id: id,
                success: result != DocumentResult::Failed,
                stages_run: 1,
            });
            if self.tally(&mut summary, result) {
                break;
            }
            if !self.options.delay_between_items.is_zero() {
                tokio::time::sleep(self.options.delay_between_items).await;
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interviewer::RecordingInterviewer;
    use crate::store::MemoryStore;
    use crate::transform::{GrammarTransformer, TransformerRegistry};
    use cito_types::{Identity, Section};

    fn grammar_config() -> PipelineConfig {
        let mut config = PipelineConfig::default().without_delays();
        for stage in [Stage::Legislation, Stage::Notes, Stage::Doctrine] {
            config.stages.get_mut(&stage).unwrap().engine = crate::config::Engine::Grammar;
        }
        config.enabled_stages = vec![Stage::PartiesKeywords, Stage::Legislation, Stage::Notes, Stage::Doctrine];
        config
    }

    fn sectioned(id: &str) -> CaseDocument {
        let mut doc = CaseDocument::discovered(Identity::new(id));
        doc.status.pipeline_status = PipelineStatus::CaseSectionsExtracted;
        doc.content
            .markdown
            .insert(Section::Parties, "REQTE.(S) : PROCURADOR-GERAL DA REPÚBLICA".into());
        doc.content
            .markdown
            .insert(Section::Legislation, "LEG-FED CF ANO-1988\nART-00005 INC-00003".into());
        doc
    }

    fn orchestrator(store: Arc<MemoryStore>, config: &PipelineConfig) -> Orchestrator {
        let mut registry = TransformerRegistry::new();
        registry.register(GrammarTransformer);
        let executor = StageExecutor::new(store, registry);
        let chain = StageChain::from_config(config).unwrap();
        Orchestrator::new(executor, chain, RunOptions::from_config(config))
    }

    // 1. Time formatting and estimate
    #[test]
    fn hms_and_estimate() {
        assert_eq!(format_hms(0.0), "00:00:00");
        assert_eq!(format_hms(3725.4), "01:02:05");
        assert_eq!(format_hms(-3.0), "00:00:00");
        let eta = estimate_seconds(8, 3, Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(eta, 68.0);
        assert_eq!(estimate_seconds(8, 0, Duration::from_secs(2), Duration::from_secs(10)), 0.0);
    }

    // 2. Boxes are fixed width with a shadow
    #[test]
    fn summary_box_layout() {
        let summary = RunSummary {
            total: 3,
            succeeded: 2,
            failed: 1,
            ..RunSummary::default()
        };
        let rendered = render_summary(&summary);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], format!("┌{}┐", "─".repeat(47)));
        assert!(lines[1].starts_with("│  PIPELINE EXECUTION SUMMARY"));
        assert!(lines[2].starts_with('╞'));
        assert_eq!(lines[3].chars().count(), 50);
        assert!(lines[4].contains("FAILED: 1"));
        assert!(lines[5].contains("SUCCESS: 2"));
        assert_eq!(lines.last().unwrap().chars().count(), 48);
    }

    #[test]
    fn banner_lists_stages() {
        let banner = render_banner(
            "CITO",
            &[Stage::Scrape, Stage::Doctrine],
            2,
            Duration::from_secs(2),
            Duration::from_secs(10),
            "2026-01-01 00:00:00",
        );
        assert!(banner.contains("  1. GET CASE HTML"));
        assert!(banner.contains("  2. EXTRACT DOCTRINE"));
        assert!(banner.contains("ESTIMATED TIME: 00:00:18"));
        assert_eq!(banner.matches('┌').count(), 3);
    }

    #[test]
    fn identification_uses_dashes() {
        let mut doc = CaseDocument::discovered(Identity::new("15345"));
        doc.identity.case_class = Some("ADI".into());
        let line = identification_line(&doc);
        assert!(line.starts_with("Identificacao | stfDecisionId=15345 | caseClass=ADI | caseNumber=-"));
        assert!(line.ends_with("pipelineStatus=extracted"));
    }

    // 3. Single run walks the chain to the end
    #[tokio::test]
    async fn single_document_runs_all_stages() {
        let config = grammar_config();
        let store = Arc::new(MemoryStore::with_documents(
            config.claim_lease(),
            vec![sectioned("15345")],
        ));
        let orch = orchestrator(store.clone(), &config);
        let summary = orch.run(Selection::Single("15345".into())).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        let doc = store.get("15345").await.unwrap().unwrap();
        assert_eq!(doc.pipeline_status(), PipelineStatus::DoctrineExtracted);
        assert_eq!(doc.derived_data.parties.as_ref().unwrap().len(), 1);
        assert_eq!(doc.derived_data.notes_references, Some(Vec::new()));
        assert!(doc.status.claimed_by.is_none());
    }

    // 4. Unknown id is reported, not an error
    #[tokio::test]
    async fn missing_document_is_reported() {
        let config = grammar_config();
        let store = Arc::new(MemoryStore::new(config.claim_lease()));
        let summary = orchestrator(store, &config)
            .run(Selection::Single("nope".into()))
            .await
            .unwrap();
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.processed, 0);
    }

    // 5. Confirm mode: skip then quit
    #[tokio::test]
    async fn confirm_mode_skip_and_quit() {
        let config = grammar_config();
        let store = Arc::new(MemoryStore::with_documents(
            config.claim_lease(),
            vec![sectioned("1"), sectioned("2"), sectioned("3")],
        ));
        let orch = orchestrator(store.clone(), &config)
            .with_confirm(true)
            .with_interviewer(RecordingInterviewer::with_choices(&["skip", "quit"]));
        let summary = orch
            .run(Selection::Batch(PipelineStatus::CaseSectionsExtracted))
            .await
            .unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.skipped, 2);
        assert_eq!(store.commits(), 0);
    }

    // 6. Drain mode runs one stage over the whole queue
    #[tokio::test]
    async fn drain_runs_one_stage() {
        let config = grammar_config();
        let store = Arc::new(MemoryStore::with_documents(
            config.claim_lease(),
            vec![sectioned("1"), sectioned("2")],
        ));
        let summary = orchestrator(store.clone(), &config)
            .run(Selection::Drain(Stage::PartiesKeywords))
            .await
            .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 2);
        for id in ["1", "2"] {
            let doc = store.get(id).await.unwrap().unwrap();
            assert_eq!(doc.pipeline_status(), PipelineStatus::CasePartiesKeywordsExtracted);
        }
    }

    /// Memory store whose commits for one id fail as if the document had
    /// been removed mid-run.
    struct VanishingStore {
        inner: MemoryStore,
        vanished: &'static str,
    }

    #[async_trait::async_trait]
    impl DocumentStore for VanishingStore {
        async fn claim_next(
            &self,
            gating: PipelineStatus,
            owner: &str,
        ) -> Result<Option<CaseDocument>> {
            self.inner.claim_next(gating, owner).await
        }

        async fn claim_by_id(
            &self,
            id: &str,
            eligible: &[PipelineStatus],
            owner: &str,
        ) -> Result<ClaimResult> {
            self.inner.claim_by_id(id, eligible, owner).await
        }

        async fn commit(
            &self,
            id: &str,
            expected: PipelineStatus,
            update: crate::store::DocumentUpdate,
        ) -> Result<crate::store::CommitOutcome> {
            if id == self.vanished {
                return Err(CitoError::NotFound(id.to_string()));
            }
            self.inner.commit(id, expected, update).await
        }

        async fn release(&self, id: &str, owner: &str) -> Result<()> {
            self.inner.release(id, owner).await
        }

        async fn get(&self, id: &str) -> Result<Option<CaseDocument>> {
            self.inner.get(id).await
        }

        async fn find_ids(&self, status: Option<PipelineStatus>) -> Result<Vec<String>> {
            self.inner.find_ids(status).await
        }

        async fn count(&self, status: Option<PipelineStatus>) -> Result<usize> {
            self.inner.count(status).await
        }

        async fn insert(&self, doc: CaseDocument) -> Result<bool> {
            self.inner.insert(doc).await
        }
    }

    // 6b. A document that disappears while draining is a failure, not an abort
    #[tokio::test]
    async fn drain_survives_missing_document() {
        let config = grammar_config();
        let store = Arc::new(VanishingStore {
            inner: MemoryStore::with_documents(
                config.claim_lease(),
                vec![sectioned("1"), sectioned("2")],
            ),
            vanished: "2",
        });
        let mut registry = TransformerRegistry::new();
        registry.register(GrammarTransformer);
        let executor = StageExecutor::new(store.clone(), registry);
        let chain = StageChain::from_config(&config).unwrap();
        let summary = Orchestrator::new(executor, chain, RunOptions::from_config(&config))
            .run(Selection::Drain(Stage::PartiesKeywords))
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.stopped_early);
        let doc = store.get("1").await.unwrap().unwrap();
        assert_eq!(doc.pipeline_status(), PipelineStatus::CasePartiesKeywordsExtracted);
    }

    // 7. Cancellation stops before the next document
    #[tokio::test]
    async fn cancel_stops_run() {
        let config = grammar_config();
        let store = Arc::new(MemoryStore::with_documents(
            config.claim_lease(),
            vec![sectioned("1")],
        ));
        let orch = orchestrator(store.clone(), &config);
        orch.cancel_handle().store(true, Ordering::SeqCst);
        let summary = orch
            .run(Selection::Batch(PipelineStatus::CaseSectionsExtracted))
            .await
            .unwrap();
        assert!(summary.stopped_early);
        assert_eq!(store.commits(), 0);
    }
}
