//! LLM completion abstraction
//!
//! Provides:
//! - A closed set of agent roles with an explicit dispatch table
//! - The completion provider trait
//! - OpenAI chat client and an offline extractive provider
//! - Labelled prompt sections shared by prompt builders and providers

mod extractive;
mod openai;

pub use extractive::ExtractiveCompleter;
pub use openai::OpenAIChat;

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Agent role for an LLM call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Proposes structural boundaries
    Boundary,
    /// Extracts named entities
    Entity,
    /// Extracts candidate facts from context
    Researcher,
    /// Drafts an answer
    Synthesizer,
    /// Reviews a draft against the facts
    Critic,
    /// Compares strategy outputs
    Judge,
}

/// Per-role request settings
#[derive(Debug, Clone, PartialEq)]
pub struct RoleConfig {
    pub role: AgentRole,
    pub system_prompt: &'static str,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Boundary => "boundary",
            AgentRole::Entity => "entity",
            AgentRole::Researcher => "researcher",
            AgentRole::Synthesizer => "synthesizer",
            AgentRole::Critic => "critic",
            AgentRole::Judge => "judge",
        }
    }

    /// Dispatch table from role to request settings
    pub fn config(&self) -> RoleConfig {
        let (system_prompt, temperature, max_tokens) = match self {
            AgentRole::Boundary => (
                "You identify points in a document where the structure, speaker, entity focus or topic changes. Reply with JSON {\"boundaries\": [byte offsets]}.",
                0.0,
                400,
            ),
            AgentRole::Entity => (
                "You extract named entities (companies, people, products) from text. Reply with one entity per line.",
                0.0,
                300,
            ),
            AgentRole::Researcher => (
                "You extract the key facts that answer the question from the context. Reply with JSON {\"key_facts\": [strings]}.",
                0.2,
                800,
            ),
            AgentRole::Synthesizer => (
                "You write a well-organised answer using only the provided context and facts. Use headers and lists where they help.",
                0.3,
                1000,
            ),
            AgentRole::Critic => (
                "You review a draft answer against the extracted facts. Reply 'satisfactory' if it is complete and accurate, otherwise list what is missing.",
                0.0,
                400,
            ),
            AgentRole::Judge => (
                "You compare answers produced by different strategies and explain which is best and why in one or two sentences.",
                0.0,
                300,
            ),
        };
        RoleConfig {
            role: *self,
            system_prompt,
            temperature,
            max_tokens,
        }
    }
}

/// LLM completion provider
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Complete a prompt under the given role settings
    async fn complete(&self, prompt: &str, role: &RoleConfig) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Labelled prompt sections
///
/// Sections are rendered as `<<label>>` lines followed by their body so that
/// providers can recover them without guessing.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    sections: Vec<(String, String)>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, label: &str, body: impl Into<String>) -> Self {
        self.sections.push((label.to_string(), body.into()));
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (label, body) in &self.sections {
            out.push_str("<<");
            out.push_str(label);
            out.push_str(">>\n");
            out.push_str(body.trim_end());
            out.push_str("\n\n");
        }
        out
    }
}

/// Body of the `label` section of a rendered prompt
pub fn prompt_section<'a>(prompt: &'a str, label: &str) -> Option<&'a str> {
    let marker = format!("<<{}>>\n", label);
    let start = prompt.find(&marker)? + marker.len();
    let rest = &prompt[start..];
    let end = rest.find("\n<<").map(|i| i + 1).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Create a completion provider based on configuration
pub fn create_completer(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "openai" => match config.api_key.clone().filter(|k| !k.is_empty()) {
            Some(key) => Ok(Arc::new(OpenAIChat::new(
                config.endpoint.clone(),
                key,
                config.model.clone(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            None => {
                tracing::warn!("LLM API key not configured, using extractive completer");
                Ok(Arc::new(ExtractiveCompleter::new()))
            }
        },
        "extractive" => Ok(Arc::new(ExtractiveCompleter::new())),
        other => Err(AppError::configuration(
            "llm.provider",
            format!("unknown provider '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_table_covers_roles() {
        for role in [
            AgentRole::Boundary,
            AgentRole::Entity,
            AgentRole::Researcher,
            AgentRole::Synthesizer,
            AgentRole::Critic,
            AgentRole::Judge,
        ] {
            let config = role.config();
            assert_eq!(config.role, role);
            assert!(!config.system_prompt.is_empty());
            assert!(config.max_tokens > 0);
        }
    }

    #[test]
    fn test_prompt_sections_round_trip() {
        let prompt = Prompt::new()
            .section("question", "What did Acme report?")
            .section("context", "Acme reported growth.\n## Outlook\nStable.")
            .render();
        assert_eq!(prompt_section(&prompt, "question"), Some("What did Acme report?"));
        assert_eq!(
            prompt_section(&prompt, "context"),
            Some("Acme reported growth.\n## Outlook\nStable.")
        );
        assert_eq!(prompt_section(&prompt, "draft"), None);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = LlmConfig {
            provider: "oracle".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_completer(&config).is_err());
    }
}
