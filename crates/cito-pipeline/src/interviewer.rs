//! Interviewer trait and built-in implementations for the confirm mode.

use std::sync::Mutex;

use async_trait::async_trait;
use cito_types::{CitoError, Result};

#[derive(Debug, Clone)]
pub struct Question {
    pub prompt: String,
    pub choices: Vec<String>,
    pub default: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub choice: String,
    pub custom_text: Option<String>,
}

#[async_trait]
pub trait Interviewer: Send + Sync {
    async fn ask(&self, question: &Question) -> Result<Answer>;
}

// ---------------------------------------------------------------------------
// AutoApproveInterviewer
// ---------------------------------------------------------------------------

pub struct AutoApproveInterviewer;

#[async_trait]
impl Interviewer for AutoApproveInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        let choice = question
            .default
            .clone()
            .or_else(|| question.choices.first().cloned())
            .unwrap_or_default();
        Ok(Answer {
            choice,
            custom_text: None,
        })
    }
}

// ---------------------------------------------------------------------------
// ConsoleInterviewer
// ---------------------------------------------------------------------------

/// Reads the answer from stdin. A number picks a listed choice, an empty line
/// picks the default, anything else is passed through as free text.
pub struct ConsoleInterviewer;

#[async_trait]
impl Interviewer for ConsoleInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        println!("\n{}", question.prompt);
        for (i, choice) in question.choices.iter().enumerate() {
            println!("  [{}] {}", i + 1, choice);
        }
        let input = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| CitoError::Other(format!("stdin reader failed: {e}")))??;

        let trimmed = input.trim();
        if trimmed.is_empty() {
            if let Some(default) = &question.default {
                return Ok(Answer {
                    choice: default.clone(),
                    custom_text: None,
                });
            }
        }
        if let Ok(idx) = trimmed.parse::<usize>() {
            if idx > 0 && idx <= question.choices.len() {
                return Ok(Answer {
                    choice: question.choices[idx - 1].clone(),
                    custom_text: None,
                });
            }
        }
        Ok(Answer {
            choice: trimmed.to_string(),
            custom_text: Some(trimmed.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingInterviewer
// ---------------------------------------------------------------------------

/// Plays back preset answers in order and records every question asked.
pub struct RecordingInterviewer {
    answers: Mutex<Vec<Answer>>,
    questions: Mutex<Vec<Question>>,
}

impl RecordingInterviewer {
    pub fn new(answers: Vec<Answer>) -> Self {
        let mut reversed = answers;
        reversed.reverse();
        Self {
            answers: Mutex::new(reversed),
            questions: Mutex::new(Vec::new()),
        }
    }

    /// Preset answers given as bare choices.
    pub fn with_choices(choices: &[&str]) -> Self {
        Self::new(
            choices
                .iter()
                .map(|c| Answer {
                    choice: (*c).to_string(),
                    custom_text: None,
                })
                .collect(),
        )
    }

    pub fn questions(&self) -> Vec<Question> {
        self.questions
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Interviewer for RecordingInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        if let Ok(mut asked) = self.questions.lock() {
            asked.push(question.clone());
        }
        let preset = self.answers.lock().ok().and_then(|mut a| a.pop());
        Ok(preset.unwrap_or_else(|| Answer {
            choice: question
                .default
                .clone()
                .or_else(|| question.choices.first().cloned())
                .unwrap_or_default(),
            custom_text: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
