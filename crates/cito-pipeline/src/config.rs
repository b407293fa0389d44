//! Run configuration: one JSON file, every field defaulted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cito_grammar::WorkAlias;
use cito_llm::{PromptTemplate, ProviderConfig};
use cito_types::{CitoError, PipelineStatus, Result, Stage};
use serde::{Deserialize, Serialize};

use crate::retry::BackoffPolicy;
use crate::validator::ResponseFormat;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) CITO/1.0";
pub const DEFAULT_CLEAN_SELECTOR: &str = "#mat-tab-content-0-0 > div > div";

/// How an extraction stage turns section text into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Completion call, then the protocol or JSON grammar.
    Llm,
    /// Free-text grammar over the section itself.
    Grammar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub engine: Engine,
    /// Provider name; `None` uses the first configured provider.
    pub provider: Option<String>,
    pub prompt: Option<String>,
    pub format: ResponseFormat,
    /// Split the input into blocks of at most this many characters, one
    /// completion call each.
    pub chunk_chars: Option<usize>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Grammar,
            provider: None,
            prompt: None,
            format: ResponseFormat::Text,
            chunk_chars: None,
        }
    }
}

impl StageConfig {
    fn llm(prompt: &str, format: ResponseFormat, chunk_chars: Option<usize>) -> Self {
        Self {
            engine: Engine::Llm,
            provider: None,
            prompt: Some(prompt.to_string()),
            format,
            chunk_chars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// Total attempts per document.
    pub retries: usize,
    pub clean_selector: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.into(),
            timeout_seconds: 60,
            retries: 3,
            clean_selector: DEFAULT_CLEAN_SELECTOR.into(),
        }
    }
}

/// Pause between attempts of a transient failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub delay_seconds: f64,
    /// Double the delay after each attempt, up to `max_delay_seconds`.
    pub exponential: bool,
    pub max_delay_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_seconds: 2.0,
            exponential: false,
            max_delay_seconds: 8.0,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        let base = seconds(self.delay_seconds);
        if base.is_zero() {
            BackoffPolicy::None
        } else if self.exponential {
            BackoffPolicy::Exponential {
                base,
                max: seconds(self.max_delay_seconds).max(base),
            }
        } else {
            BackoffPolicy::Fixed(base)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store_dir: PathBuf,
    /// A claim older than this is considered abandoned.
    pub claim_lease_seconds: u64,
    pub delay_between_items_seconds: f64,
    pub delay_between_steps_seconds: f64,
    pub stop_on_error: bool,
    pub enabled_stages: Vec<Stage>,
    /// Status selected by batch mode.
    pub batch_status: PipelineStatus,
    pub fetch: FetchConfig,
    pub retry: RetryConfig,
    pub stages: BTreeMap<Stage, StageConfig>,
    pub providers: Vec<ProviderConfig>,
    pub prompts: BTreeMap<String, PromptTemplate>,
    pub work_aliases: Vec<WorkAlias>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("data/cases"),
            claim_lease_seconds: 900,
            delay_between_items_seconds: 10.0,
            delay_between_steps_seconds: 2.0,
            stop_on_error: false,
            enabled_stages: Stage::ALL.to_vec(),
            batch_status: PipelineStatus::Extracted,
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
            stages: default_stages(),
            providers: vec![ProviderConfig::default()],
            prompts: default_prompts(),
            work_aliases: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing keys keep their defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            CitoError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: PipelineConfig = serde_json::from_str(&json)
            .map_err(|e| CitoError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(self)?).await?;
        Ok(())
    }

    /// Settings for `stage`; stages absent from the map use the grammar engine.
    pub fn stage(&self, stage: Stage) -> StageConfig {
        self.stages.get(&stage).cloned().unwrap_or_default()
    }

    /// Named provider, or the first configured one.
    pub fn provider(&self, name: Option<&str>) -> Result<&ProviderConfig> {
        match name {
            Some(name) => self
                .providers
                .iter()
                .find(|p| p.name == name)
                .ok_or_else(|| CitoError::Config(format!("provider '{name}' is not configured"))),
            None => self
                .providers
                .first()
                .ok_or_else(|| CitoError::Config("no providers configured".into())),
        }
    }

    pub fn claim_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.claim_lease_seconds).unwrap_or(i64::MAX / 1000))
    }

    pub fn delay_between_items(&self) -> Duration {
        seconds(self.delay_between_items_seconds)
    }

    pub fn delay_between_steps(&self) -> Duration {
        seconds(self.delay_between_steps_seconds)
    }

    /// Zero every pause. Used by dry runs and tests.
    pub fn without_delays(mut self) -> Self {
        self.delay_between_items_seconds = 0.0;
        self.delay_between_steps_seconds = 0.0;
        self.retry.delay_seconds = 0.0;
        for provider in &mut self.providers {
            provider.api_delay_seconds = 0.0;
        }
        self
    }
}

/// Negative or non-finite values mean no delay.
pub(crate) fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

fn default_stages() -> BTreeMap<Stage, StageConfig> {
    BTreeMap::from([
        (
            Stage::Legislation,
            StageConfig::llm("legislation", ResponseFormat::Lines, None),
        ),
        (
            Stage::Notes,
            StageConfig::llm("notes", ResponseFormat::Lines, Some(1500)),
        ),
        (
            Stage::Doctrine,
            StageConfig::llm("doctrine", ResponseFormat::Lines, None),
        ),
        (
            Stage::DecisionDetails,
            StageConfig::llm("decision_details", ResponseFormat::Json, None),
        ),
    ])
}

const LEGISLATION_SYSTEM: &str = "Você extrai normas citadas em decisões do STF. \
Responda SOMENTE com linhas no protocolo:\n\
N|identificador|jurisdicao|tipo|ano|descricao\n\
R|artigo|caput(1/0)|inciso|paragrafo|paragrafoUnico(1/0)|alinea\n\
Identificador no formato TIPO-NUMERO-ANO (ex.: LEI-9605-1998, CF-1988). \
jurisdicao: federal, state, municipal ou unknown. \
tipo: CF, EC, LC, LEI, DECRETO, RESOLUCAO, PORTARIA ou OUTRA. \
Linhas R têm sempre os 7 campos, vazios quando ausentes. \
Incisos em algarismos romanos ou arábicos; sem zeros à esquerda. \
Não invente dispositivos ausentes do texto.";

const NOTES_SYSTEM: &str = "Você segmenta a seção Observação de decisões do STF. \
Responda SOMENTE com linhas no protocolo CITO-REF/1:\n\
H|AC (acórdãos) | MO (monocráticas) | LE (legislação estrangeira) | DE (decisão estrangeira) | VJ (veja) | OU\n\
D|descritor1, descritor2\n\
L|linha original\n\
I|S|classe|numero|sufixo|orgao|referencia original\n\
M|metadados\n\
Cada citação separada por vírgula vira uma linha I própria.";

const DOCTRINE_SYSTEM: &str = "Você extrai referências doutrinárias de decisões do STF. \
Responda SOMENTE com linhas no protocolo CITO-DOCTRINE/1:\n\
C|autor|titulo|edicao|local|editora|ano|pagina|citacao original\n\
Uma linha por obra. Com vários autores separados por ';' mantenha apenas o primeiro. \
Campos ausentes ficam vazios.";

const DECISION_SYSTEM: &str = "Você estrutura o dispositivo de decisões do STF. \
Responda SOMENTE com JSON no formato \
{\"caseData\": {\"decisionDetails\": {\"decisionResult\": {\"finalDecision\": \"...\"}, \
\"ministerVotes\": [{\"ministerName\": \"...\", \"voteType\": \"...\"}]}}}.";

fn default_prompts() -> BTreeMap<String, PromptTemplate> {
    BTreeMap::from([
        (
            "legislation".to_string(),
            PromptTemplate::new(
                LEGISLATION_SYSTEM,
                "Seção Legislação:\n\n{{legislation_text}}",
                "legislation_text",
            ),
        ),
        (
            "notes".to_string(),
            PromptTemplate::new(NOTES_SYSTEM, "Seção Observação:\n\n{{notes_text}}", "notes_text"),
        ),
        (
            "doctrine".to_string(),
            PromptTemplate::new(
                DOCTRINE_SYSTEM,
                "Seção Doutrina:\n\n{{doctrine_text}}",
                "doctrine_text",
            ),
        ),
        (
            "decision_details".to_string(),
            PromptTemplate::new(
                DECISION_SYSTEM,
                "Seção Decisão:\n\n{{decision_text}}",
                "decision_text",
            ),
        ),
    ])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
