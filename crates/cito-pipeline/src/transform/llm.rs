//! Completion-backed extraction: render the stage prompt over the section
//! text, one call per chunk.

use std::sync::Arc;

use async_trait::async_trait;
use cito_llm::LlmClient;
use cito_types::{CaseDocument, CitoError, Result};

use super::{StageOutput, Transformer};
use crate::stage::{Capability, StageSpec};

/// Split `text` into chunks of at most `max` characters, packing whole
/// blank-line separated blocks. Oversized blocks are cut on char boundaries.
pub fn chunk_text(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for block in text.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
        let block_chars = block.chars().count();
        if block_chars > max {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            let chars: Vec<char> = block.chars().collect();
            chunks.extend(chars.chunks(max).map(|c| c.iter().collect::<String>()));
            continue;
        }
        if !current.is_empty() && current_chars + 2 + block_chars > max {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
            current_chars += 2;
        }
        current.push_str(block);
        current_chars += block_chars;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub struct LlmTransformer {
    client: Arc<LlmClient>,
}

impl LlmTransformer {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transformer for LlmTransformer {
    fn capability(&self) -> Capability {
        Capability::Llm
    }

    async fn transform(
        &self,
        spec: &StageSpec,
        _doc: &CaseDocument,
        input: &str,
    ) -> Result<StageOutput> {
        let params = &spec.params;
        let prompt = params
            .prompt
            .as_ref()
            .ok_or_else(|| CitoError::Config(format!("stage {} has no prompt", spec.stage)))?;
        let provider = params
            .provider
            .as_ref()
            .ok_or_else(|| CitoError::Config(format!("stage {} has no provider", spec.stage)))?;

        let chunks = match params.chunk_chars {
            Some(max) if max > 0 => chunk_text(input, max),
            _ => vec![input.to_string()],
        };

        let mut outputs = Vec::with_capacity(chunks.len());
        let mut model = provider.model.clone();
        for (i, chunk) in chunks.iter().enumerate() {
            let request = prompt.to_request(chunk, provider);
            tracing::debug!(
                stage = %spec.stage,
                chunk = i + 1,
                of = chunks.len(),
                input_chars = request.input_chars(),
                "Completion call"
            );
            let result = self.client.complete(&request).await;
            if !params.api_delay.is_zero() {
                tokio::time::sleep(params.api_delay).await;
            }
            let response = result?;
            model = response.model;
            outputs.push(response.text);
        }

        let mut output = StageOutput::text(outputs, params.format);
        output.provider = Some(provider.name.clone());
        output.model = Some(model);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::transform::Produced;
    use crate::validator::ResponseFormat;
    use cito_llm::{CompletionProvider, FinishReason, Request, Response, Usage};
    use cito_types::{Identity, Stage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recorder {
        calls: Arc<AtomicUsize>,
        inputs: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl CompletionProvider for Recorder {
        async fn complete(&self, request: &Request) -> std::result::Result<Response, CitoError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let user = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.inputs.lock().unwrap().push(user);
            Ok(Response {
                id: format!("r{n}"),
                text: format!("N|{}|x", n + 1),
                usage: Usage::default(),
                model: request.model.clone(),
                provider: "mistral".into(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        fn name(&self) -> &str {
            "mistral"
        }

        fn default_model(&self) -> &str {
            "mistral-large-latest"
        }
    }

    fn client() -> (Arc<LlmClient>, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let inputs = Arc::new(Mutex::new(Vec::new()));
        let mut client = LlmClient::new();
        client.register_provider(Recorder {
            calls: calls.clone(),
            inputs: inputs.clone(),
        });
        (Arc::new(client), calls, inputs)
    }

    // 1. Blocks are packed up to the limit
    #[test]
    fn chunks_pack_blocks() {
        let text = "aaaa\n\nbbbb\n\n\n\ncccc";
        assert_eq!(chunk_text(text, 10), vec!["aaaa\n\nbbbb", "cccc"]);
        assert_eq!(chunk_text(&"x".repeat(25), 10).len(), 3);
        assert!(chunk_text("  \n\n ", 10).is_empty());
    }

    // 2. One call per chunk, outputs kept in order
    #[tokio::test]
    async fn one_call_per_chunk() {
        let (client, calls, inputs) = client();
        let mut config = PipelineConfig::default();
        config.stages.get_mut(&Stage::Notes).unwrap().chunk_chars = Some(10);
        let spec = StageSpec::from_config(Stage::Notes, &config).unwrap();
        let doc = CaseDocument::discovered(Identity::new("1"));
        let out = LlmTransformer::new(client)
            .transform(&spec, &doc, "primeiro\n\nsegundo")
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(inputs.lock().unwrap()[1].contains("segundo"));
        assert_eq!(out.provider.as_deref(), Some("mistral"));
        assert_eq!(out.model.as_deref(), Some("mistral-large-latest"));
        assert_eq!(
            out.produced,
            Produced::Text {
                outputs: vec!["N|1|x".into(), "N|2|x".into()],
                format: ResponseFormat::Lines
            }
        );
    }

    // 3. A spec without a prompt is a configuration error
    #[tokio::test]
    async fn missing_prompt_is_config_error() {
        let (client, calls, _) = client();
        let mut spec =
            StageSpec::from_config(Stage::Legislation, &PipelineConfig::default()).unwrap();
        spec.params.prompt = None;
        let doc = CaseDocument::discovered(Identity::new("1"));
        let err = LlmTransformer::new(client)
            .transform(&spec, &doc, "LEG-FED CF ANO-1988")
            .await
            .unwrap_err();
        assert!(matches!(err, CitoError::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
