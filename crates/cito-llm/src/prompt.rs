use std::collections::HashMap;

use cito_types::CitoError;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::{Message, Request, Role};

/// One templated chat message. `{{name}}` placeholders in `content` are
/// substituted at render time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

/// Per-prompt overrides of the provider's sampling defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientParameters {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub messages: Vec<PromptMessage>,
    /// Every listed variable receives the stage input text.
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub params: ClientParameters,
}

impl PromptTemplate {
    pub fn new(system: impl Into<String>, user: impl Into<String>, variable: &str) -> Self {
        Self {
            messages: vec![
                PromptMessage {
                    role: Role::System,
                    content: system.into(),
                },
                PromptMessage {
                    role: Role::User,
                    content: user.into(),
                },
            ],
            variables: vec![variable.to_string()],
            params: ClientParameters::default(),
        }
    }

    pub fn validate(&self) -> Result<(), CitoError> {
        if self.messages.is_empty() {
            return Err(CitoError::Config("prompt template has no messages".into()));
        }
        for var in &self.variables {
            let needle = placeholder(var);
            if !self.messages.iter().any(|m| m.content.contains(&needle)) {
                return Err(CitoError::Config(format!(
                    "prompt variable '{var}' is not used by any message"
                )));
            }
        }
        Ok(())
    }

    /// Substitute `{{key}}` for each entry of `values`. Unknown placeholders
    /// are left untouched.
    pub fn render(&self, values: &HashMap<String, String>) -> Vec<Message> {
        self.messages
            .iter()
            .map(|m| {
                let mut content = m.content.clone();
                for (key, value) in values {
                    content = content.replace(&placeholder(key), value);
                }
                Message {
                    role: m.role,
                    content,
                }
            })
            .collect()
    }

    pub fn render_input(&self, input: &str) -> Vec<Message> {
        let values: HashMap<String, String> = self
            .variables
            .iter()
            .map(|v| (v.clone(), input.to_string()))
            .collect();
        self.render(&values)
    }

    /// Build a full request: rendered messages, prompt overrides on top of
    /// the provider defaults.
    pub fn to_request(&self, input: &str, provider: &ProviderConfig) -> Request {
        let mut req = Request::new(provider.model.clone(), self.render_input(input));
        req.temperature = Some(self.params.temperature.unwrap_or(provider.temperature));
        req.max_tokens = Some(self.params.max_tokens.unwrap_or(provider.max_tokens));
        req.top_p = Some(self.params.top_p.unwrap_or(provider.top_p));
        req.provider = Some(provider.name.clone());
        req
    }
}

fn placeholder(name: &str) -> String {
    format!("{{{{{name}}}}}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> PromptTemplate {
        PromptTemplate::new(
            "Responda apenas no protocolo N|/R|.",
            "Texto:\n{{legislation_text}}\nRepita: {{legislation_text}}",
            "legislation_text",
        )
    }

    // 1. All occurrences of a variable are replaced
    #[test]
    fn render_input_replaces_every_occurrence() {
        let msgs = template().render_input("LEG-FED CF ANO-1988");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(
            msgs[1].content,
            "Texto:\nLEG-FED CF ANO-1988\nRepita: LEG-FED CF ANO-1988"
        );
    }

    // 2. Unknown placeholders survive
    #[test]
    fn unknown_placeholders_are_kept() {
        let mut t = template();
        t.messages[0].content = "{{other}}".into();
        let msgs = t.render_input("x");
        assert_eq!(msgs[0].content, "{{other}}");
    }

    // 3. Prompt parameters override provider defaults
    #[test]
    fn to_request_applies_overrides() {
        let mut t = template();
        t.params.max_tokens = Some(4096);
        let provider = ProviderConfig::default();
        let req = t.to_request("x", &provider);
        assert_eq!(req.max_tokens, Some(4096));
        assert_eq!(req.temperature, Some(0.0));
        assert_eq!(req.top_p, Some(1.0));
        assert_eq!(req.provider.as_deref(), Some("mistral"));
        assert_eq!(req.model, provider.model);
    }

    // 4. Validation catches unused variables and empty templates
    #[test]
    fn validate_rejects_bad_templates() {
        assert!(template().validate().is_ok());

        let mut t = template();
        t.variables.push("missing".into());
        assert!(matches!(t.validate(), Err(CitoError::Config(_))));

        let empty = PromptTemplate {
            messages: vec![],
            variables: vec![],
            params: ClientParameters::default(),
        };
        assert!(empty.validate().is_err());
    }

    // 5. Templates load from JSON with defaulted fields
    #[test]
    fn deserialize_from_json() {
        let t: PromptTemplate = serde_json::from_str(
            r#"{"messages": [{"role": "user", "content": "{{doctrine_text}}"}],
                "variables": ["doctrine_text"]}"#,
        )
        .unwrap();
        assert_eq!(t.params, ClientParameters::default());
        assert_eq!(t.render_input("ALEXY")[0].content, "ALEXY");
    }
}
