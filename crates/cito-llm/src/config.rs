use cito_types::CitoError;
use serde::{Deserialize, Serialize};

pub const MISTRAL_BASE_URL: &str = "https://api.mistral.ai";
pub const MISTRAL_DEFAULT_MODEL: &str = "mistral-large-latest";

/// Connection and sampling settings for one completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    /// Literal key. Prefer `api_key_env` outside tests.
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub request_timeout_seconds: u64,
    /// Total attempts per call, including the first one.
    pub retries: usize,
    /// Pause after every call, successful or not.
    pub api_delay_seconds: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "mistral".into(),
            api_key: None,
            api_key_env: Some("MISTRAL_API_KEY".into()),
            base_url: MISTRAL_BASE_URL.into(),
            model: MISTRAL_DEFAULT_MODEL.into(),
            temperature: 0.0,
            max_tokens: 1024,
            top_p: 1.0,
            request_timeout_seconds: 60,
            retries: 1,
            api_delay_seconds: 0.0,
        }
    }
}

impl ProviderConfig {
    /// Literal key first, then the named environment variable.
    pub fn resolve_api_key(&self) -> Result<String, CitoError> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.to_string());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CitoError::AuthError {
                provider: self.name.clone(),
            })
    }

    pub fn attempts(&self) -> usize {
        self.retries.max(1)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
