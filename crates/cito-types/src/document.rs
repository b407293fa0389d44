//! Typed case document: identity, content, derived data, per-stage processing
//! metadata, pipeline status, and audit timestamps.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::ser::{Error as _, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::records::{DecisionDetails, DoctrineReference, LegislationNorm, NoteReference, Party};
use crate::{CitoError, Result};

// ---------------------------------------------------------------------------
// PipelineStatus: the gating key
// ---------------------------------------------------------------------------

/// Position of a document in the linear stage chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStatus {
    Extracted,
    CaseScraped,
    CaseHtmlCleaned,
    CaseSectionsExtracted,
    CasePartiesKeywordsExtracted,
    LegislationExtracted,
    NotesReferencesExtracted,
    DoctrineExtracted,
    DecisionDetailsExtracted,
}

impl PipelineStatus {
    pub const ALL: [PipelineStatus; 9] = [
        PipelineStatus::Extracted,
        PipelineStatus::CaseScraped,
        PipelineStatus::CaseHtmlCleaned,
        PipelineStatus::CaseSectionsExtracted,
        PipelineStatus::CasePartiesKeywordsExtracted,
        PipelineStatus::LegislationExtracted,
        PipelineStatus::NotesReferencesExtracted,
        PipelineStatus::DoctrineExtracted,
        PipelineStatus::DecisionDetailsExtracted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Extracted => "extracted",
            PipelineStatus::CaseScraped => "caseScraped",
            PipelineStatus::CaseHtmlCleaned => "caseHtmlCleaned",
            PipelineStatus::CaseSectionsExtracted => "caseSectionsExtracted",
            PipelineStatus::CasePartiesKeywordsExtracted => "casePartiesKeywordsExtracted",
            PipelineStatus::LegislationExtracted => "legislationExtracted",
            PipelineStatus::NotesReferencesExtracted => "notesReferencesExtracted",
            PipelineStatus::DoctrineExtracted => "doctrineExtracted",
            PipelineStatus::DecisionDetailsExtracted => "decisionDetailsExtracted",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = CitoError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        PipelineStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| CitoError::Config(format!("unknown pipeline status '{trimmed}'")))
    }
}

// ---------------------------------------------------------------------------
// Stage: processing metadata key
// ---------------------------------------------------------------------------

/// A named step of the pipeline. The key is the prefix of its
/// `processing.<key>*` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "caseScrape")]
    Scrape,
    #[serde(rename = "caseHtmlClean")]
    HtmlClean,
    #[serde(rename = "caseSections")]
    Sections,
    #[serde(rename = "partiesKeywords")]
    PartiesKeywords,
    #[serde(rename = "caseLegislationRefs")]
    Legislation,
    #[serde(rename = "caseNotesRefs")]
    Notes,
    #[serde(rename = "caseDoctrine")]
    Doctrine,
    #[serde(rename = "caseDecisionDetails")]
    DecisionDetails,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Scrape,
        Stage::HtmlClean,
        Stage::Sections,
        Stage::PartiesKeywords,
        Stage::Legislation,
        Stage::Notes,
        Stage::Doctrine,
        Stage::DecisionDetails,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Stage::Scrape => "caseScrape",
            Stage::HtmlClean => "caseHtmlClean",
            Stage::Sections => "caseSections",
            Stage::PartiesKeywords => "partiesKeywords",
            Stage::Legislation => "caseLegislationRefs",
            Stage::Notes => "caseNotesRefs",
            Stage::Doctrine => "caseDoctrine",
            Stage::DecisionDetails => "caseDecisionDetails",
        }
    }

    /// Short operator-facing name used on the command line.
    pub fn short_name(&self) -> &'static str {
        match self {
            Stage::Scrape => "scrape",
            Stage::HtmlClean => "clean",
            Stage::Sections => "sections",
            Stage::PartiesKeywords => "parties",
            Stage::Legislation => "legislation",
            Stage::Notes => "notes",
            Stage::Doctrine => "doctrine",
            Stage::DecisionDetails => "details",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Stage {
    type Err = CitoError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Stage::ALL
            .into_iter()
            .find(|st| {
                st.key().eq_ignore_ascii_case(trimmed) || st.short_name().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| CitoError::Config(format!("unknown stage '{trimmed}'")))
    }
}

// ---------------------------------------------------------------------------
// StageMeta / Processing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Success,
    Error,
    Empty,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessingStatus::Success => "success",
            ProcessingStatus::Error => "error",
            ProcessingStatus::Empty => "empty",
        })
    }
}

/// Technical metadata for one stage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMeta {
    pub status: ProcessingStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_chars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_chars: Option<usize>,
}

impl StageMeta {
    fn with_status(status: ProcessingStatus, error: Option<String>) -> Self {
        Self {
            status,
            error,
            at: Utc::now(),
            provider: None,
            model: None,
            latency_ms: None,
            count: None,
            http_status: None,
            input_chars: None,
            output_chars: None,
        }
    }

    pub fn success() -> Self {
        Self::with_status(ProcessingStatus::Success, None)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(ProcessingStatus::Error, Some(message.into()))
    }

    /// Metadata for a blank input field: `"<field> vazio"`.
    pub fn empty(field: &str) -> Self {
        Self::with_status(ProcessingStatus::Empty, Some(format!("{field} vazio")))
    }

    pub fn with_provider(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_sizes(mut self, input_chars: usize, output_chars: Option<usize>) -> Self {
        self.input_chars = Some(input_chars);
        self.output_chars = output_chars;
        self
    }
}

/// Per-stage metadata, persisted as flat `<stageKey><Field>` entries
/// (`caseDoctrineStatus`, `caseDoctrineError`, `caseDoctrineCount`, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Processing {
    stages: BTreeMap<Stage, StageMeta>,
}

impl Processing {
    pub fn get(&self, stage: Stage) -> Option<&StageMeta> {
        self.stages.get(&stage)
    }

    pub fn record(&mut self, stage: Stage, meta: StageMeta) {
        self.stages.insert(stage, meta);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Stage, &StageMeta)> {
        self.stages.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

fn capitalize(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn decapitalize(suffix: &str) -> String {
    let mut chars = suffix.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

impl Serialize for Processing {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (stage, meta) in &self.stages {
            let value = serde_json::to_value(meta).map_err(S::Error::custom)?;
            let serde_json::Value::Object(fields) = value else {
                return Err(S::Error::custom("stage metadata must serialize to an object"));
            };
            for (field, v) in fields {
                map.serialize_entry(&format!("{}{}", stage.key(), capitalize(&field)), &v)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Processing {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let flat: BTreeMap<String, serde_json::Value> = BTreeMap::deserialize(deserializer)?;
        let mut grouped: BTreeMap<Stage, serde_json::Map<String, serde_json::Value>> =
            BTreeMap::new();
        for (key, value) in flat {
            // Unknown keys (e.g. legacy `pipelineStatus`) are left to migrations.
            let Some((stage, suffix)) = Stage::ALL
                .into_iter()
                .find_map(|st| key.strip_prefix(st.key()).map(|rest| (st, rest)))
            else {
                continue;
            };
            if suffix.is_empty() {
                continue;
            }
            grouped
                .entry(stage)
                .or_default()
                .insert(decapitalize(suffix), value);
        }

        let mut stages = BTreeMap::new();
        for (stage, fields) in grouped {
            if !fields.contains_key("status") {
                continue;
            }
            let meta: StageMeta = serde_json::from_value(serde_json::Value::Object(fields))
                .map_err(|e| D::Error::custom(format!("processing.{}: {e}", stage.key())))?;
            stages.insert(stage, meta);
        }
        Ok(Self { stages })
    }
}

// ---------------------------------------------------------------------------
// Identity / Content / DerivedData / Status / Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub stf_decision_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rapporteur: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judging_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgment_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
}

impl Identity {
    pub fn new(stf_decision_id: impl Into<String>) -> Self {
        Self {
            stf_decision_id: stf_decision_id.into(),
            ..Default::default()
        }
    }
}

/// Named sections of an STF decision page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Section {
    Header,
    Publication,
    Parties,
    Summary,
    Decision,
    Keywords,
    Legislation,
    Notes,
    Doctrine,
}

impl Section {
    pub const ALL: [Section; 9] = [
        Section::Header,
        Section::Publication,
        Section::Parties,
        Section::Summary,
        Section::Decision,
        Section::Keywords,
        Section::Legislation,
        Section::Notes,
        Section::Doctrine,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Section::Header => "header",
            Section::Publication => "publication",
            Section::Parties => "parties",
            Section::Summary => "summary",
            Section::Decision => "decision",
            Section::Keywords => "keywords",
            Section::Legislation => "legislation",
            Section::Notes => "notes",
            Section::Doctrine => "doctrine",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionsMeta {
    pub found: Vec<Section>,
    pub missing: Vec<Section>,
    pub sizes: BTreeMap<Section, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_clean: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_html: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub raw: BTreeMap<Section, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub markdown: BTreeMap<Section, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections_meta: Option<SectionsMeta>,
}

impl Content {
    /// Section text, preferring the markdown rendering over the raw text.
    pub fn section(&self, section: Section) -> Option<&str> {
        self.markdown
            .get(&section)
            .or_else(|| self.raw.get(&section))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legislation_references: Option<Vec<LegislationNorm>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_references: Option<Vec<NoteReference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctrine_references: Option<Vec<DoctrineReference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_details: Option<DecisionDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parties: Option<Vec<Party>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub pipeline_status: PipelineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Status {
    pub fn new(pipeline_status: PipelineStatus) -> Self {
        Self {
            pipeline_status,
            claimed_by: None,
            claimed_at: None,
        }
    }

    /// True when a claim exists and is younger than `lease`.
    pub fn is_claimed(&self, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        match (&self.claimed_by, self.claimed_at) {
            (Some(_), Some(at)) => now - at < lease,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CaseDocument
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseDocument {
    pub identity: Identity,
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub derived_data: DerivedData,
    #[serde(default)]
    pub processing: Processing,
    pub status: Status,
    pub audit: Audit,
}

impl CaseDocument {
    /// A freshly discovered case: identity only, status `extracted`.
    pub fn discovered(identity: Identity) -> Self {
        let now = Utc::now();
        Self {
            identity,
            content: Content::default(),
            derived_data: DerivedData::default(),
            processing: Processing::default(),
            status: Status::new(PipelineStatus::Extracted),
            audit: Audit {
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.identity.stf_decision_id
    }

    pub fn pipeline_status(&self) -> PipelineStatus {
        self.status.pipeline_status
    }

    /// Boundary check applied by store adapters before a document reaches
    /// the executor.
    pub fn validate(&self) -> Result<()> {
        if self.identity.stf_decision_id.trim().is_empty() {
            return Err(CitoError::InvalidDocument {
                id: String::new(),
                message: "identity.stfDecisionId is missing".into(),
            });
        }
        if self.audit.updated_at < self.audit.created_at {
            return Err(CitoError::InvalidDocument {
                id: self.identity.stf_decision_id.clone(),
                message: "audit.updatedAt precedes audit.createdAt".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
