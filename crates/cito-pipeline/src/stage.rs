//! Stage specifications and the linear stage chain.
//!
//! A [`StageSpec`] is everything the executor needs to run one stage against
//! one document: where the input lives, which transformer capability handles
//! it, the gating and success statuses, and the call parameters resolved from
//! configuration.

use std::time::Duration;

use cito_llm::{PromptTemplate, ProviderConfig};
use cito_types::{CaseDocument, CitoError, PipelineStatus, Result, Section, Stage};
use serde::{Deserialize, Serialize};

use crate::config::{seconds, Engine, PipelineConfig};
use crate::retry::BackoffPolicy;
use crate::transform::chunk_text;
use crate::validator::ResponseFormat;

// ---------------------------------------------------------------------------
// Capability / input field / empty policy
// ---------------------------------------------------------------------------

/// Kind of transformer a stage needs. The registry is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Fetch,
    Sanitize,
    Segment,
    Llm,
    Grammar,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Fetch => "fetch",
            Capability::Sanitize => "sanitize",
            Capability::Segment => "segment",
            Capability::Llm => "llm",
            Capability::Grammar => "grammar",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document field a stage reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputField {
    SourceUrl,
    HtmlRaw,
    HtmlClean,
    Section(Section),
    /// Parties and keywords sections, read together.
    PartiesKeywords,
}

impl InputField {
    /// Dotted path used in logs and `"<field> vazio"` messages.
    pub fn path(&self) -> String {
        match self {
            InputField::SourceUrl => "identity.sourceUrl".into(),
            InputField::HtmlRaw => "content.htmlRaw".into(),
            InputField::HtmlClean => "content.htmlClean".into(),
            InputField::Section(section) => format!("content.markdown.{}", section.slug()),
            InputField::PartiesKeywords => "content.markdown.parties".into(),
        }
    }

    /// Field value, or `None` when absent or blank.
    pub fn read(&self, doc: &CaseDocument) -> Option<String> {
        let value = match self {
            InputField::SourceUrl => doc.identity.source_url.clone(),
            InputField::HtmlRaw => doc.content.html_raw.clone(),
            InputField::HtmlClean => doc.content.html_clean.clone(),
            InputField::Section(section) => doc.content.section(*section).map(String::from),
            InputField::PartiesKeywords => {
                let parts: Vec<&str> = [Section::Parties, Section::Keywords]
                    .into_iter()
                    .filter_map(|s| doc.content.section(s))
                    .filter(|s| !s.trim().is_empty())
                    .collect();
                (!parts.is_empty()).then(|| parts.join("\n\n"))
            }
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// What a blank input means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyPolicy {
    /// Terminal success: record `empty` and advance.
    Success,
    /// The stage cannot proceed: record an error.
    Error,
}

// ---------------------------------------------------------------------------
// StageParams
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StageParams {
    pub engine: Engine,
    pub provider: Option<ProviderConfig>,
    pub prompt_id: Option<String>,
    pub prompt: Option<PromptTemplate>,
    pub format: ResponseFormat,
    pub chunk_chars: Option<usize>,
    /// Total attempts for transient failures.
    pub attempts: usize,
    /// Hard limit per call.
    pub timeout: Option<Duration>,
    pub backoff: BackoffPolicy,
    /// Pause after every completion call.
    pub api_delay: Duration,
}

impl StageParams {
    /// Single attempt, no timeout, grammar engine.
    pub fn local() -> Self {
        Self {
            engine: Engine::Grammar,
            provider: None,
            prompt_id: None,
            prompt: None,
            format: ResponseFormat::Text,
            chunk_chars: None,
            attempts: 1,
            timeout: None,
            backoff: BackoffPolicy::None,
            api_delay: Duration::ZERO,
        }
    }

    /// Number of completion calls needed for `input`.
    pub fn call_count(&self, input: &str) -> usize {
        match self.chunk_chars {
            Some(max) if max > 0 => chunk_text(input, max).len().max(1),
            _ => 1,
        }
    }

    /// Budget for one attempt: one timeout (plus the pause) per call.
    pub fn attempt_timeout(&self, input: &str) -> Option<Duration> {
        let per_call = self.timeout?;
        let calls = u32::try_from(self.call_count(input)).unwrap_or(u32::MAX);
        Some((per_call + self.api_delay).saturating_mul(calls))
    }

    pub fn model(&self) -> Option<&str> {
        self.provider.as_ref().map(|p| p.model.as_str())
    }
}

// ---------------------------------------------------------------------------
// StageSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StageSpec {
    pub stage: Stage,
    pub capability: Capability,
    pub input: InputField,
    pub gating: PipelineStatus,
    pub success: PipelineStatus,
    pub empty_policy: EmptyPolicy,
    pub params: StageParams,
}

impl StageSpec {
    /// Dotted path of the field the stage writes.
    pub fn output_field(&self) -> &'static str {
        match self.stage {
            Stage::Scrape => "content.htmlRaw",
            Stage::HtmlClean => "content.htmlClean",
            Stage::Sections => "content.markdown",
            Stage::PartiesKeywords => "derivedData.parties",
            Stage::Legislation => "derivedData.legislationReferences",
            Stage::Notes => "derivedData.notesReferences",
            Stage::Doctrine => "derivedData.doctrineReferences",
            Stage::DecisionDetails => "derivedData.decisionDetails",
        }
    }

    /// Build the spec for `stage` from configuration.
    pub fn from_config(stage: Stage, config: &PipelineConfig) -> Result<Self> {
        let idx = Stage::ALL
            .iter()
            .position(|s| *s == stage)
            .ok_or_else(|| CitoError::ChainError(format!("unknown stage {stage}")))?;
        let gating = PipelineStatus::ALL[idx];
        let success = PipelineStatus::ALL[idx + 1];
        let backoff = config.retry.backoff();

        let (capability, input, empty_policy, params) = match stage {
            Stage::Scrape => (
                Capability::Fetch,
                InputField::SourceUrl,
                EmptyPolicy::Error,
                StageParams {
                    attempts: config.fetch.retries.max(1),
                    timeout: Some(Duration::from_secs(config.fetch.timeout_seconds)),
                    backoff,
                    ..StageParams::local()
                },
            ),
            Stage::HtmlClean => (
                Capability::Sanitize,
                InputField::HtmlRaw,
                EmptyPolicy::Error,
                StageParams::local(),
            ),
            Stage::Sections => (
                Capability::Segment,
                InputField::HtmlClean,
                EmptyPolicy::Error,
                StageParams::local(),
            ),
            Stage::PartiesKeywords => (
                Capability::Grammar,
                InputField::PartiesKeywords,
                EmptyPolicy::Success,
                StageParams::local(),
            ),
            Stage::Legislation | Stage::Notes | Stage::Doctrine | Stage::DecisionDetails => {
                let section = match stage {
                    Stage::Legislation => Section::Legislation,
                    Stage::Notes => Section::Notes,
                    Stage::Doctrine => Section::Doctrine,
                    _ => Section::Decision,
                };
                let stage_cfg = config.stage(stage);
                let params = match stage_cfg.engine {
                    Engine::Grammar => StageParams {
                        format: ResponseFormat::Text,
                        ..StageParams::local()
                    },
                    Engine::Llm => {
                        let provider = config.provider(stage_cfg.provider.as_deref())?.clone();
                        let prompt_id = stage_cfg.prompt.clone().ok_or_else(|| {
                            CitoError::ChainError(format!("stage {stage} has no prompt"))
                        })?;
                        let prompt = config.prompts.get(&prompt_id).cloned().ok_or_else(|| {
                            CitoError::ChainError(format!(
                                "stage {stage} uses unknown prompt '{prompt_id}'"
                            ))
                        })?;
                        StageParams {
                            engine: Engine::Llm,
                            attempts: provider.attempts(),
                            timeout: Some(Duration::from_secs(provider.request_timeout_seconds)),
                            api_delay: seconds(provider.api_delay_seconds),
                            provider: Some(provider),
                            prompt_id: Some(prompt_id),
                            prompt: Some(prompt),
                            format: stage_cfg.format,
                            chunk_chars: stage_cfg.chunk_chars,
                            backoff,
                        }
                    }
                };
                let capability = match params.engine {
                    Engine::Llm => Capability::Llm,
                    Engine::Grammar => Capability::Grammar,
                };
                (capability, InputField::Section(section), EmptyPolicy::Success, params)
            }
        };

        Ok(Self {
            stage,
            capability,
            input,
            gating,
            success,
            empty_policy,
            params,
        })
    }
}

// ---------------------------------------------------------------------------
// StageChain
// ---------------------------------------------------------------------------

/// Ordered stages. Each gating status is the previous stage's success status.
#[derive(Debug, Clone)]
pub struct StageChain {
    specs: Vec<StageSpec>,
}

impl StageChain {
    pub fn new(specs: Vec<StageSpec>) -> Self {
        Self { specs }
    }

    /// The configured chain, linted.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut stages = config.enabled_stages.clone();
        stages.sort();
        stages.dedup();
        let specs = stages
            .into_iter()
            .map(|stage| StageSpec::from_config(stage, config))
            .collect::<Result<Vec<_>>>()?;
        let chain = Self::new(specs);
        crate::validation::validate_or_raise(&chain, config)?;
        Ok(chain)
    }

    pub fn specs(&self) -> &[StageSpec] {
        &self.specs
    }

    pub fn get(&self, stage: Stage) -> Option<&StageSpec> {
        self.specs.iter().find(|s| s.stage == stage)
    }

    /// The stage a document in `status` is waiting for.
    pub fn next_for(&self, status: PipelineStatus) -> Option<&StageSpec> {
        self.specs.iter().find(|s| s.gating == status)
    }

    /// Statuses from which at least one chained stage can run.
    pub fn gating_statuses(&self) -> Vec<PipelineStatus> {
        self.specs.iter().map(|s| s.gating).collect()
    }

    /// Keep only `stage`.
    pub fn only(&self, stage: Stage) -> Option<Self> {
        self.get(stage).map(|spec| Self::new(vec![spec.clone()]))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cito_types::Identity;

    // 1. Default chain follows the status ladder
    #[test]
    fn default_chain_is_contiguous() {
        let chain = StageChain::from_config(&PipelineConfig::default()).unwrap();
        assert_eq!(chain.len(), 8);
        for pair in chain.specs().windows(2) {
            assert_eq!(pair[1].gating, pair[0].success);
        }
        let first = &chain.specs()[0];
        assert_eq!(first.stage, Stage::Scrape);
        assert_eq!(first.gating, PipelineStatus::Extracted);
        assert_eq!(first.capability, Capability::Fetch);
        let last = &chain.specs()[7];
        assert_eq!(last.success, PipelineStatus::DecisionDetailsExtracted);
        assert_eq!(last.capability, Capability::Llm);
        assert_eq!(last.params.format, ResponseFormat::Json);
    }

    // 2. Engine choice sets capability and parameters
    #[test]
    fn grammar_engine_uses_local_params() {
        let mut cfg = PipelineConfig::default();
        cfg.stages.get_mut(&Stage::Doctrine).unwrap().engine = Engine::Grammar;
        let spec = StageSpec::from_config(Stage::Doctrine, &cfg).unwrap();
        assert_eq!(spec.capability, Capability::Grammar);
        assert_eq!(spec.params.attempts, 1);
        assert!(spec.params.provider.is_none());
        assert_eq!(spec.empty_policy, EmptyPolicy::Success);

        let llm = StageSpec::from_config(Stage::Legislation, &cfg).unwrap();
        assert_eq!(llm.params.model(), Some("mistral-large-latest"));
        assert_eq!(llm.params.prompt_id.as_deref(), Some("legislation"));
        assert_eq!(llm.params.timeout, Some(Duration::from_secs(60)));
    }

    // 3. Unknown prompt is a chain error
    #[test]
    fn unknown_prompt_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.stages.get_mut(&Stage::Notes).unwrap().prompt = Some("missing".into());
        let err = StageSpec::from_config(Stage::Notes, &cfg).unwrap_err();
        assert!(matches!(err, CitoError::ChainError(_)));
    }

    // 4. Input fields read blank as absent
    #[test]
    fn input_field_reads() {
        let mut doc = CaseDocument::discovered(Identity::new("1"));
        assert_eq!(InputField::SourceUrl.read(&doc), None);
        doc.identity.source_url = Some("  ".into());
        assert_eq!(InputField::SourceUrl.read(&doc), None);
        doc.content.markdown.insert(Section::Keywords, "A, B".into());
        assert_eq!(
            InputField::PartiesKeywords.read(&doc).as_deref(),
            Some("A, B")
        );
        assert_eq!(InputField::Section(Section::Doctrine).path(), "content.markdown.doctrine");
    }

    // 5. Chunked stages scale their timeout
    #[test]
    fn attempt_timeout_scales_with_chunks() {
        let params = StageParams {
            timeout: Some(Duration::from_secs(10)),
            chunk_chars: Some(100),
            ..StageParams::local()
        };
        assert_eq!(params.call_count(""), 1);
        assert_eq!(params.call_count(&"x".repeat(250)), 3);
        assert_eq!(
            params.attempt_timeout(&"x".repeat(250)),
            Some(Duration::from_secs(30))
        );
        assert_eq!(StageParams::local().attempt_timeout("abc"), None);
    }

    // 6. Lookups on the chain
    #[test]
    fn chain_lookups() {
        let chain = StageChain::from_config(&PipelineConfig::default()).unwrap();
        assert_eq!(
            chain.next_for(PipelineStatus::CaseScraped).map(|s| s.stage),
            Some(Stage::HtmlClean)
        );
        assert!(chain.next_for(PipelineStatus::DecisionDetailsExtracted).is_none());
        let only = chain.only(Stage::Notes).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only.gating_statuses(), vec![PipelineStatus::LegislationExtracted]);
    }
}
