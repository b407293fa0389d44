//! Stage chain validation: lint rules and diagnostics.
//!
//! Run before any document is touched. Call [`validate`] for advisory
//! diagnostics or [`validate_or_raise`] to fail on the first `Error`-severity
//! issue.

use std::collections::HashSet;

use cito_types::{CitoError, Stage};

use crate::config::{Engine, PipelineConfig};
use crate::stage::{Capability, StageChain};
use crate::validator::ResponseFormat;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub stage: Option<Stage>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// ChainRule trait
// ---------------------------------------------------------------------------

pub trait ChainRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, chain: &StageChain, config: &PipelineConfig) -> Vec<Diagnostic>;
}

fn diagnostic(
    rule: &dyn ChainRule,
    severity: Severity,
    stage: Option<Stage>,
    message: String,
    fix: Option<&str>,
) -> Diagnostic {
    Diagnostic {
        rule: rule.name().into(),
        severity,
        message,
        stage,
        fix: fix.map(String::from),
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct NonEmptyRule;
impl ChainRule for NonEmptyRule {
    fn name(&self) -> &str { "non_empty" }
    fn apply(&self, chain: &StageChain, _config: &PipelineConfig) -> Vec<Diagnostic> {
        if chain.is_empty() {
            vec![diagnostic(
                self,
                Severity::Error,
                None,
                "No stages enabled".into(),
                Some("List at least one stage in enabled_stages"),
            )]
        } else {
            vec![]
        }
    }
}

struct UniqueStagesRule;
impl ChainRule for UniqueStagesRule {
    fn name(&self) -> &str { "unique_stages" }
    fn apply(&self, chain: &StageChain, _config: &PipelineConfig) -> Vec<Diagnostic> {
        let mut seen = HashSet::new();
        chain
            .specs()
            .iter()
            .filter(|s| !seen.insert(s.stage))
            .map(|s| {
                diagnostic(
                    self,
                    Severity::Error,
                    Some(s.stage),
                    format!("Stage {} appears more than once", s.stage),
                    None,
                )
            })
            .collect()
    }
}

/// Each gating status must be the previous stage's success status.
struct ContiguousRule;
impl ChainRule for ContiguousRule {
    fn name(&self) -> &str { "contiguous" }
    fn apply(&self, chain: &StageChain, _config: &PipelineConfig) -> Vec<Diagnostic> {
        chain
            .specs()
            .windows(2)
            .filter(|pair| pair[1].gating != pair[0].success)
            .map(|pair| {
                diagnostic(
                    self,
                    Severity::Error,
                    Some(pair[1].stage),
                    format!(
                        "Stage {} waits for {} but {} leaves documents at {}",
                        pair[1].stage, pair[1].gating, pair[0].stage, pair[0].success
                    ),
                    Some("Enable the stages in between"),
                )
            })
            .collect()
    }
}

/// Decision details have no free-text grammar and arrive as one JSON object.
struct DecisionDetailsRule;
impl ChainRule for DecisionDetailsRule {
    fn name(&self) -> &str { "decision_details" }
    fn apply(&self, chain: &StageChain, _config: &PipelineConfig) -> Vec<Diagnostic> {
        let Some(spec) = chain.get(Stage::DecisionDetails) else {
            return vec![];
        };
        let mut out = Vec::new();
        if spec.params.engine != Engine::Llm || spec.params.format != ResponseFormat::Json {
            out.push(diagnostic(
                self,
                Severity::Error,
                Some(spec.stage),
                "caseDecisionDetails requires the llm engine with json responses".into(),
                Some("Set engine = \"llm\" and format = \"json\""),
            ));
        }
        if spec.params.chunk_chars.is_some() {
            out.push(diagnostic(
                self,
                Severity::Error,
                Some(spec.stage),
                "caseDecisionDetails cannot be chunked".into(),
                Some("Remove chunk_chars"),
            ));
        }
        out
    }
}

struct ChunkSizeRule;
impl ChainRule for ChunkSizeRule {
    fn name(&self) -> &str { "chunk_size" }
    fn apply(&self, chain: &StageChain, _config: &PipelineConfig) -> Vec<Diagnostic> {
        chain
            .specs()
            .iter()
            .filter(|s| s.params.chunk_chars == Some(0))
            .map(|s| {
                diagnostic(
                    self,
                    Severity::Error,
                    Some(s.stage),
                    format!("Stage {} has chunk_chars = 0", s.stage),
                    None,
                )
            })
            .collect()
    }
}

struct PromptRule;
impl ChainRule for PromptRule {
    fn name(&self) -> &str { "prompt" }
    fn apply(&self, chain: &StageChain, _config: &PipelineConfig) -> Vec<Diagnostic> {
        chain
            .specs()
            .iter()
            .filter(|s| s.capability == Capability::Llm)
            .filter_map(|s| {
                let problem = match &s.params.prompt {
                    None => "has no prompt".to_string(),
                    Some(prompt) => prompt.validate().err()?.to_string(),
                };
                Some(diagnostic(
                    self,
                    Severity::Error,
                    Some(s.stage),
                    format!("Stage {} {problem}", s.stage),
                    None,
                ))
            })
            .collect()
    }
}

/// A missing key is not fatal here; the stage records an auth error instead.
struct ProviderKeyRule;
impl ChainRule for ProviderKeyRule {
    fn name(&self) -> &str { "provider_key" }
    fn apply(&self, chain: &StageChain, _config: &PipelineConfig) -> Vec<Diagnostic> {
        let mut warned = HashSet::new();
        chain
            .specs()
            .iter()
            .filter_map(|s| s.params.provider.as_ref().map(|p| (s.stage, p)))
            .filter(|(_, p)| p.resolve_api_key().is_err() && warned.insert(p.name.clone()))
            .map(|(stage, p)| {
                diagnostic(
                    self,
                    Severity::Warning,
                    Some(stage),
                    format!("Provider '{}' has no API key", p.name),
                    p.api_key_env
                        .as_deref()
                        .map(|_| "Export the variable named in api_key_env"),
                )
            })
            .collect()
    }
}

struct LenientFormatRule;
impl ChainRule for LenientFormatRule {
    fn name(&self) -> &str { "lenient_format" }
    fn apply(&self, chain: &StageChain, _config: &PipelineConfig) -> Vec<Diagnostic> {
        chain
            .specs()
            .iter()
            .filter(|s| s.capability == Capability::Llm && s.params.format == ResponseFormat::Text)
            .map(|s| {
                diagnostic(
                    self,
                    Severity::Info,
                    Some(s.stage),
                    format!("Stage {} reads completions as free text", s.stage),
                    None,
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn validate(chain: &StageChain, config: &PipelineConfig) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn ChainRule>> = vec![
        Box::new(NonEmptyRule),
        Box::new(UniqueStagesRule),
        Box::new(ContiguousRule),
        Box::new(DecisionDetailsRule),
        Box::new(ChunkSizeRule),
        Box::new(PromptRule),
        Box::new(ProviderKeyRule),
        Box::new(LenientFormatRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(chain, config));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(
    chain: &StageChain,
    config: &PipelineConfig,
) -> cito_types::Result<Vec<Diagnostic>> {
    let diagnostics = validate(chain, config);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        let messages: Vec<_> = errors.iter().map(|d| d.message.clone()).collect();
        return Err(CitoError::ChainError(messages.join("; ")));
    }
    for d in &diagnostics {
        tracing::debug!(rule = %d.rule, severity = ?d.severity, "{}", d.message);
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
