use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::{ProviderConfig, MISTRAL_BASE_URL, MISTRAL_DEFAULT_MODEL};
use crate::{CompletionProvider, FinishReason, Request, Response, Usage};
use cito_types::CitoError;

// ---------------------------------------------------------------------------
// ChatCompletionsAdapter
// ---------------------------------------------------------------------------

/// Adapter for OpenAI-compatible `/v1/chat/completions` endpoints.
/// Defaults target Mistral.
#[derive(Debug)]
pub struct ChatCompletionsAdapter {
    name: String,
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl ChatCompletionsAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            name: "mistral".to_string(),
            api_key,
            client: reqwest::Client::new(),
            base_url: MISTRAL_BASE_URL.to_string(),
            default_model: MISTRAL_DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, CitoError> {
        let api_key = config.resolve_api_key()?;
        Ok(Self::new(api_key)
            .with_name(config.name.clone())
            .with_base_url(config.base_url.clone())
            .with_model(config.model.clone())
            .with_timeout(Duration::from_secs(config.request_timeout_seconds.max(1))))
    }

    pub fn with_name(mut self, name: String) -> Self {
        self.name = name;
        self
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.default_model = model;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn build_request_body(&self, request: &Request) -> serde_json::Value {
        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        body
    }

    fn parse_response(&self, body: serde_json::Value) -> Result<Response, CitoError> {
        let choice = &body["choices"][0];
        let text = choice["message"]["content"].as_str().ok_or_else(|| {
            CitoError::ProviderError {
                provider: self.name.clone(),
                status: 200,
                message: "response has no choices[0].message.content".into(),
                retryable: false,
            }
        })?;

        let usage_obj = &body["usage"];
        let input_tokens = usage_obj["prompt_tokens"].as_u64().unwrap_or(0);
        let output_tokens = usage_obj["completion_tokens"].as_u64().unwrap_or(0);
        let total_tokens = usage_obj["total_tokens"]
            .as_u64()
            .unwrap_or(input_tokens + output_tokens);

        Ok(Response {
            id: body["id"].as_str().unwrap_or("").to_string(),
            text: text.trim().to_string(),
            usage: Usage {
                input_tokens,
                output_tokens,
                total_tokens,
            },
            model: body["model"].as_str().unwrap_or("").to_string(),
            provider: self.name.clone(),
            finish_reason: FinishReason::from_wire(choice["finish_reason"].as_str()),
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> CitoError {
        if err.is_timeout() {
            CitoError::RequestTimeout {
                provider: self.name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            CitoError::ProviderError {
                provider: self.name.clone(),
                status: 0,
                message: err.to_string(),
                retryable: true,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(provider: &str, status: reqwest::StatusCode, body: &str) -> CitoError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => {
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            CitoError::RateLimited {
                provider: provider.into(),
                retry_after_ms: retry_ms,
            }
        }
        401 | 403 => CitoError::AuthError {
            provider: provider.into(),
        },
        500 | 502 | 503 | 504 => CitoError::ProviderError {
            provider: provider.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => CitoError::ProviderError {
            provider: provider.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["message"].as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// CompletionProvider implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl CompletionProvider for ChatCompletionsAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, CitoError> {
        let body = self.build_request_body(request);

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(map_error(&self.name, status, &response_body));
        }

        let json: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| CitoError::ProviderError {
                provider: self.name.clone(),
                status: status.as_u16(),
                message: format!("Failed to parse response JSON: {e}"),
                retryable: false,
            })?;

        self.parse_response(json)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    fn make_basic_request() -> Request {
        let mut req = Request::new(
            "mistral-large-latest",
            vec![
                Message::system("Extraia as normas citadas."),
                Message::user("LEG-FED CF ANO-1988"),
            ],
        );
        req.temperature = Some(0.0);
        req.max_tokens = Some(1024);
        req.top_p = Some(1.0);
        req
    }

    #[test]
    fn build_request_body_produces_chat_payload() {
        let adapter = ChatCompletionsAdapter::new("test-key".into());
        let body = adapter.build_request_body(&make_basic_request());

        assert_eq!(body["model"], "mistral-large-latest");
        let messages = body["messages"].as_array().expect("messages should be an array");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "LEG-FED CF ANO-1988");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["temperature"].as_f64(), Some(0.0));
        assert_eq!(body["top_p"].as_f64(), Some(1.0));
    }

    #[test]
    fn build_request_body_falls_back_to_default_model() {
        let adapter = ChatCompletionsAdapter::new("k".into()).with_model("open-mixtral".into());
        let body = adapter.build_request_body(&Request::new("", vec![Message::user("x")]));
        assert_eq!(body["model"], "open-mixtral");
        assert!(body.get("temperature").is_none());
        assert!(body.get("top_p").is_none());
    }

    #[test]
    fn parse_response_reads_first_choice() {
        let adapter = ChatCompletionsAdapter::new("test-key".into());
        let response_json = json!({
            "id": "cmpl-1",
            "model": "mistral-large-latest",
            "choices": [
                {
                    "index": 0,
                    "message": { "role": "assistant", "content": "  N|CF-1988|federal|CF|1988|\n" },
                    "finish_reason": "stop"
                }
            ],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150 }
        });

        let resp = adapter.parse_response(response_json).unwrap();
        assert_eq!(resp.id, "cmpl-1");
        assert_eq!(resp.text, "N|CF-1988|federal|CF|1988|");
        assert_eq!(resp.provider, "mistral");
        assert_eq!(resp.finish_reason, FinishReason::EndTurn);
        assert_eq!(resp.usage.input_tokens, 120);
        assert_eq!(resp.usage.total_tokens, 150);
    }

    #[test]
    fn parse_response_length_is_max_tokens() {
        let adapter = ChatCompletionsAdapter::new("k".into());
        let resp = adapter
            .parse_response(json!({
                "choices": [{ "message": { "content": "C|ALEXY" }, "finish_reason": "length" }]
            }))
            .unwrap();
        assert_eq!(resp.finish_reason, FinishReason::MaxTokens);
        assert_eq!(resp.usage.total_tokens, 0);
    }

    #[test]
    fn parse_response_without_content_is_error() {
        let adapter = ChatCompletionsAdapter::new("k".into());
        let err = adapter.parse_response(json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, CitoError::ProviderError { retryable: false, .. }));
    }

    #[test]
    fn from_config_applies_overrides() {
        let cfg = ProviderConfig {
            name: "local".into(),
            api_key: Some("abc".into()),
            base_url: "http://localhost:8080/".into(),
            model: "tiny".into(),
            ..Default::default()
        };
        let adapter = ChatCompletionsAdapter::from_config(&cfg).unwrap();
        assert_eq!(adapter.name(), "local");
        assert_eq!(adapter.default_model(), "tiny");
        assert_eq!(adapter.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn error_mapping_429_rate_limited() {
        let err = map_error(
            "mistral",
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "rate limited", "retry_after": 3.0}}"#,
        );
        assert!(matches!(err, CitoError::RateLimited { retry_after_ms: 3000, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn error_mapping_401_auth() {
        let err = map_error(
            "mistral",
            reqwest::StatusCode::UNAUTHORIZED,
            r#"{"message": "Unauthorized"}"#,
        );
        assert!(matches!(err, CitoError::AuthError { .. }));
        assert!(err.is_terminal());
    }

    #[test]
    fn error_mapping_5xx_retryable_4xx_not() {
        let err = map_error(
            "mistral",
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            r#"{"error": {"message": "overloaded"}}"#,
        );
        match &err {
            CitoError::ProviderError {
                retryable,
                status,
                message,
                ..
            } => {
                assert!(*retryable);
                assert_eq!(*status, 503);
                assert_eq!(message, "overloaded");
            }
            _ => panic!("expected ProviderError"),
        }

        let err = map_error("mistral", reqwest::StatusCode::BAD_REQUEST, "plain body");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("plain body"));
    }
}
