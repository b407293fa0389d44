use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cito_types::CitoError;

use crate::config::ProviderConfig;
use crate::{ChatCompletionsAdapter, CompletionProvider, DynProvider, Request, Response};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut Request) {}
    fn after(&self, _request: &Request, _response: &mut Response) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut Request) {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            input_chars = request.input_chars(),
            "LLM request"
        );
    }

    fn after(&self, _request: &Request, response: &mut Response) {
        tracing::info!(
            provider = %response.provider,
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "LLM response"
        );
        if response.finish_reason == crate::FinishReason::MaxTokens {
            tracing::warn!(
                provider = %response.provider,
                "LLM response truncated at max_tokens"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware: UsageTrackingMiddleware
// ---------------------------------------------------------------------------

/// Accumulates token usage across calls. Clones share the same counters, so
/// keep one clone to read totals after handing the other to the client.
#[derive(Clone, Default)]
pub struct UsageTrackingMiddleware {
    calls: Arc<AtomicU64>,
    total_input: Arc<AtomicU64>,
    total_output: Arc<AtomicU64>,
}

impl UsageTrackingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input.load(Ordering::Relaxed)
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output.load(Ordering::Relaxed)
    }
}

impl Middleware for UsageTrackingMiddleware {
    fn after(&self, _request: &Request, response: &mut Response) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_input
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        self.total_output
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

pub struct LlmClient {
    providers: HashMap<String, DynProvider>,
    default_provider: Option<String>,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: None,
            middleware: Vec::new(),
        }
    }

    /// The first provider registered becomes the default route.
    pub fn register_provider(&mut self, provider: impl CompletionProvider + 'static) {
        let name = provider.name().to_string();
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.providers.insert(name, DynProvider::new(provider));
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, CitoError> {
        let provider = self.resolve_provider(request)?;
        let mut req = request.clone();
        if req.model.is_empty() {
            req.model = provider.default_model().to_string();
        }

        for m in &self.middleware {
            m.before(&mut req);
        }

        let mut resp = provider.complete(&req).await?;

        for m in &self.middleware {
            m.after(&req, &mut resp);
        }

        Ok(resp)
    }

    fn resolve_provider(&self, request: &Request) -> Result<&DynProvider, CitoError> {
        // 1. Explicit provider field
        if let Some(ref provider_name) = request.provider {
            return self.providers.get(provider_name).ok_or_else(|| {
                CitoError::Config(format!("Provider '{}' not registered", provider_name))
            });
        }

        // 2. Default (first registered) provider
        self.default_provider
            .as_ref()
            .and_then(|name| self.providers.get(name))
            .ok_or_else(|| CitoError::Config("No providers registered".to_string()))
    }

    /// Build a client with one chat-completions adapter per config. Configs
    /// whose API key cannot be resolved are skipped with a warning.
    pub fn from_configs(configs: &[ProviderConfig]) -> Self {
        let mut client = Self::new();
        for config in configs {
            match ChatCompletionsAdapter::from_config(config) {
                Ok(adapter) => client.register_provider(adapter),
                Err(e) => {
                    tracing::warn!(provider = %config.name, error = %e, "Skipping provider");
                }
            }
        }
        client
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
