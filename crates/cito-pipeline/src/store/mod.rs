//! Document store adapter.
//!
//! The store is the only mutation path for case documents. Stages never
//! write directly: they hand a [`DocumentUpdate`] to [`DocumentStore::commit`],
//! which applies it only if the document still has the status under which it
//! was claimed.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cito_types::{
    CaseDocument, DecisionDetails, DoctrineReference, LegislationNorm, NoteReference, Party,
    PipelineStatus, Result, Section, SectionsMeta, Stage, StageMeta,
};

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// One field written by a stage. Lists replace the stored value wholesale.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    HtmlRaw(String),
    HtmlClean(String),
    ChallengeHtml(Option<String>),
    Sections {
        raw: BTreeMap<Section, String>,
        markdown: BTreeMap<Section, String>,
        meta: SectionsMeta,
    },
    Legislation(Vec<LegislationNorm>),
    Notes(Vec<NoteReference>),
    Doctrine(Vec<DoctrineReference>),
    DecisionDetails(Option<DecisionDetails>),
    PartiesKeywords {
        parties: Vec<Party>,
        keywords: Vec<String>,
    },
}

impl FieldChange {
    /// What an extraction stage writes for a blank input.
    pub fn empty_for(stage: Stage) -> Vec<FieldChange> {
        match stage {
            Stage::PartiesKeywords => vec![FieldChange::PartiesKeywords {
                parties: Vec::new(),
                keywords: Vec::new(),
            }],
            Stage::Legislation => vec![FieldChange::Legislation(Vec::new())],
            Stage::Notes => vec![FieldChange::Notes(Vec::new())],
            Stage::Doctrine => vec![FieldChange::Doctrine(Vec::new())],
            Stage::DecisionDetails => vec![FieldChange::DecisionDetails(None)],
            Stage::Scrape | Stage::HtmlClean | Stage::Sections => Vec::new(),
        }
    }

    fn apply(self, doc: &mut CaseDocument) {
        let content = &mut doc.content;
        let derived = &mut doc.derived_data;
        match self {
            FieldChange::HtmlRaw(html) => content.html_raw = Some(html),
            FieldChange::HtmlClean(html) => content.html_clean = Some(html),
            FieldChange::ChallengeHtml(html) => content.challenge_html = html,
            FieldChange::Sections { raw, markdown, meta } => {
                content.raw = raw;
                content.markdown = markdown;
                content.sections_meta = Some(meta);
            }
            FieldChange::Legislation(norms) => derived.legislation_references = Some(norms),
            FieldChange::Notes(notes) => derived.notes_references = Some(notes),
            FieldChange::Doctrine(refs) => derived.doctrine_references = Some(refs),
            FieldChange::DecisionDetails(details) => derived.decision_details = details,
            FieldChange::PartiesKeywords { parties, keywords } => {
                derived.parties = Some(parties);
                derived.keywords = Some(keywords);
            }
        }
    }
}

/// Everything one stage invocation writes, committed atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentUpdate {
    pub stage: Stage,
    pub meta: StageMeta,
    /// New pipeline status; `None` leaves it unchanged.
    pub advance_to: Option<PipelineStatus>,
    pub changes: Vec<FieldChange>,
}

/// Apply `update` in place and touch `audit.updatedAt`.
pub fn apply_update(doc: &mut CaseDocument, update: DocumentUpdate, now: DateTime<Utc>) {
    for change in update.changes {
        change.apply(doc);
    }
    doc.processing.record(update.stage, update.meta);
    if let Some(status) = update.advance_to {
        doc.status.pipeline_status = status;
    }
    doc.audit.updated_at = now.max(doc.audit.created_at);
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimResult {
    Claimed(Box<CaseDocument>),
    NotFound,
    /// The document exists but its status is not one the caller can run.
    Ineligible(PipelineStatus),
    /// Another owner holds a live claim.
    Busy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(Box<CaseDocument>),
    /// The status moved since the claim; nothing was written.
    Conflict { actual: PipelineStatus },
}

// ---------------------------------------------------------------------------
// DocumentStore trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Atomically pick and claim the eligible document with the oldest
    /// `audit.updatedAt` (ties by id).
    async fn claim_next(&self, gating: PipelineStatus, owner: &str)
        -> Result<Option<CaseDocument>>;

    /// Claim one document. An empty `eligible` slice accepts any status.
    async fn claim_by_id(
        &self,
        id: &str,
        eligible: &[PipelineStatus],
        owner: &str,
    ) -> Result<ClaimResult>;

    /// Apply `update` if the stored status still equals `expected`.
    async fn commit(
        &self,
        id: &str,
        expected: PipelineStatus,
        update: DocumentUpdate,
    ) -> Result<CommitOutcome>;

    /// Drop `owner`'s claim. A claim held by someone else is left alone.
    async fn release(&self, id: &str, owner: &str) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<CaseDocument>>;

    /// Ids in queue order, optionally filtered by status.
    async fn find_ids(&self, status: Option<PipelineStatus>) -> Result<Vec<String>>;

    async fn count(&self, status: Option<PipelineStatus>) -> Result<usize>;

    /// Add a discovered document. Returns `false` if the id already exists.
    async fn insert(&self, doc: CaseDocument) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Shared claim rules
// ---------------------------------------------------------------------------

/// True if `owner` may take the document now.
fn claimable(doc: &CaseDocument, owner: &str, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
    doc.status.claimed_by.as_deref() == Some(owner) || !doc.status.is_claimed(now, lease)
}

fn mark_claimed(doc: &mut CaseDocument, owner: &str, now: DateTime<Utc>) {
    doc.status.claimed_by = Some(owner.to_string());
    doc.status.claimed_at = Some(now);
}

fn queue_key(doc: &CaseDocument) -> (DateTime<Utc>, &str) {
    (doc.audit.updated_at, doc.id())
}

/// Id of the next document `owner` may claim under `gating`.
fn pick_next<'a>(
    docs: impl Iterator<Item = &'a CaseDocument>,
    gating: PipelineStatus,
    owner: &str,
    now: DateTime<Utc>,
    lease: chrono::Duration,
) -> Option<String> {
    docs.filter(|d| d.pipeline_status() == gating && claimable(d, owner, now, lease))
        .min_by(|a, b| queue_key(a).cmp(&queue_key(b)))
        .map(|d| d.id().to_string())
}

/// Decide and, when possible, take a claim on `doc`.
fn claim_one(
    doc: &mut CaseDocument,
    eligible: &[PipelineStatus],
    owner: &str,
    now: DateTime<Utc>,
    lease: chrono::Duration,
) -> ClaimResult {
    let status = doc.pipeline_status();
    if !eligible.is_empty() && !eligible.contains(&status) {
        return ClaimResult::Ineligible(status);
    }
    if !claimable(doc, owner, now, lease) {
        return ClaimResult::Busy;
    }
    mark_claimed(doc, owner, now);
    ClaimResult::Claimed(Box::new(doc.clone()))
}

fn release_one(doc: &mut CaseDocument, owner: &str) -> bool {
    if doc.status.claimed_by.as_deref() != Some(owner) {
        return false;
    }
    doc.status.claimed_by = None;
    doc.status.claimed_at = None;
    true
}

fn sorted_ids<'a>(
    docs: impl Iterator<Item = &'a CaseDocument>,
    status: Option<PipelineStatus>,
) -> Vec<String> {
    let mut matching: Vec<&CaseDocument> = docs
        .filter(|d| status.map_or(true, |s| d.pipeline_status() == s))
        .collect();
    matching.sort_by(|a, b| queue_key(a).cmp(&queue_key(b)));
    matching.into_iter().map(|d| d.id().to_string()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
