//! Transformer trait, dynamic dispatch wrapper, and transformer registry.
//!
//! A transformer turns a stage's input field into either ready-to-store
//! fields (fetch, sanitize, segment, parties) or raw text that still has to
//! pass the schema validator (completions, citation sections).

pub mod fetch;
mod llm;
mod parties;
pub mod sanitize;
mod sections;

pub use fetch::{FetchResponse, FetchTransformer, Fetcher, HttpFetcher};
pub use llm::{chunk_text, LlmTransformer};
pub use parties::{parse_keywords, parse_parties, GrammarTransformer};
pub use sanitize::SanitizeTransformer;
pub use sections::{split_sections, SectionsTransformer};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cito_llm::LlmClient;
use cito_types::{CaseDocument, Result};

use crate::config::PipelineConfig;
use crate::stage::{Capability, StageSpec};
use crate::store::FieldChange;
use crate::validator::ResponseFormat;

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Produced {
    /// Fields ready to store, with the item count when one applies.
    Fields {
        changes: Vec<FieldChange>,
        count: Option<usize>,
    },
    /// Text to validate and parse, one entry per call.
    Text {
        outputs: Vec<String>,
        format: ResponseFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub produced: Produced,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub http_status: Option<u16>,
    pub output_chars: Option<usize>,
}

impl StageOutput {
    pub fn fields(changes: Vec<FieldChange>, count: Option<usize>) -> Self {
        Self {
            produced: Produced::Fields { changes, count },
            provider: None,
            model: None,
            http_status: None,
            output_chars: None,
        }
    }

    pub fn text(outputs: Vec<String>, format: ResponseFormat) -> Self {
        let chars = outputs.iter().map(|o| o.chars().count()).sum();
        Self {
            produced: Produced::Text { outputs, format },
            provider: None,
            model: None,
            http_status: None,
            output_chars: Some(chars),
        }
    }

    pub fn with_output_chars(mut self, chars: usize) -> Self {
        self.output_chars = Some(chars);
        self
    }
}

// ---------------------------------------------------------------------------
// Transformer trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Transformer: Send + Sync {
    fn capability(&self) -> Capability;

    /// Transform `input`, the non-blank value of `spec.input` in `doc`.
    async fn transform(
        &self,
        spec: &StageSpec,
        doc: &CaseDocument,
        input: &str,
    ) -> Result<StageOutput>;
}

// ---------------------------------------------------------------------------
// DynTransformer: object-safe wrapper
// ---------------------------------------------------------------------------

pub struct DynTransformer(Box<dyn Transformer>);

impl DynTransformer {
    pub fn new(transformer: impl Transformer + 'static) -> Self {
        Self(Box::new(transformer))
    }

    pub fn capability(&self) -> Capability {
        self.0.capability()
    }

    pub async fn transform(
        &self,
        spec: &StageSpec,
        doc: &CaseDocument,
        input: &str,
    ) -> Result<StageOutput> {
        self.0.transform(spec, doc, input).await
    }
}

// ---------------------------------------------------------------------------
// TransformerRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TransformerRegistry {
    transformers: HashMap<Capability, DynTransformer>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transformer under its own capability, replacing any previous one.
    pub fn register(&mut self, transformer: impl Transformer + 'static) {
        let wrapped = DynTransformer::new(transformer);
        self.transformers.insert(wrapped.capability(), wrapped);
    }

    pub fn get(&self, capability: Capability) -> Option<&DynTransformer> {
        self.transformers.get(&capability)
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.transformers.contains_key(&capability)
    }
}

/// Registry with the built-in transformers for every capability.
pub fn default_registry(
    config: &PipelineConfig,
    llm: Arc<LlmClient>,
) -> Result<TransformerRegistry> {
    let mut registry = TransformerRegistry::new();
    registry.register(FetchTransformer::new(HttpFetcher::new(&config.fetch)?));
    registry.register(SanitizeTransformer::new(&config.fetch.clean_selector)?);
    registry.register(SectionsTransformer);
    registry.register(GrammarTransformer);
    registry.register(LlmTransformer::new(llm));
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Transformer for Echo {
        fn capability(&self) -> Capability {
            Capability::Grammar
        }

        async fn transform(
            &self,
            _spec: &StageSpec,
            _doc: &CaseDocument,
            input: &str,
        ) -> Result<StageOutput> {
            Ok(StageOutput::text(vec![input.to_string()], ResponseFormat::Text))
        }
    }

    #[test]
    fn registry_replaces_by_capability() {
        let mut registry = TransformerRegistry::new();
        assert!(!registry.has(Capability::Grammar));
        registry.register(GrammarTransformer);
        registry.register(Echo);
        assert!(registry.has(Capability::Grammar));
        assert_eq!(
            registry.get(Capability::Grammar).map(|t| t.capability()),
            Some(Capability::Grammar)
        );
        assert!(registry.get(Capability::Llm).is_none());
    }

    #[test]
    fn default_registry_covers_every_capability() {
        let registry =
            default_registry(&PipelineConfig::default(), Arc::new(LlmClient::new())).unwrap();
        for cap in [
            Capability::Fetch,
            Capability::Sanitize,
            Capability::Segment,
            Capability::Llm,
            Capability::Grammar,
        ] {
            assert!(registry.has(cap), "missing {cap}");
        }
    }

    #[test]
    fn text_output_counts_chars() {
        let out = StageOutput::text(vec!["ab".into(), "çd".into()], ResponseFormat::Lines);
        assert_eq!(out.output_chars, Some(4));
    }
}
