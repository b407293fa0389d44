//! Completion client for the extraction stages.
//!
//! Provides the `CompletionProvider` trait, `DynProvider` wrapper, an
//! OpenAI-compatible chat-completions adapter (Mistral by default), a
//! middleware chain, and prompt templates with `{{variable}}` substitution.

mod chat;
mod client;
pub mod config;
mod prompt;
mod provider;
mod types;

pub use chat::ChatCompletionsAdapter;
pub use client::*;
pub use config::ProviderConfig;
pub use prompt::{ClientParameters, PromptMessage, PromptTemplate};
pub use provider::*;
pub use types::*;
