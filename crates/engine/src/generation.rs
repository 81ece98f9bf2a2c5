//! Generation backend
//!
//! Provides:
//! - The [`GenerationBackend`] seam
//! - An OpenAI-compatible chat-completions adapter
//! - Prompt assembly from retrieved items, snippets and server hints

use crate::augment::Augmentation;
use crate::request::ServerHint;
use crate::retrieval::RetrievalItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use waypoint_common::config::GenerationConfig;
use waypoint_common::errors::{AppError, Result};

const SYSTEM_PROMPT: &str = "You are an operations assistant for server infrastructure. \
Answer using the provided reference material and server state. \
If the material does not cover the question, say so instead of guessing. \
Prefer concrete shell commands with a one-line explanation.";

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutput {
    pub text: String,
    /// Backend-reported confidence; absent for most providers
    pub confidence: Option<f32>,
    pub model: String,
    pub tokens_used: u32,
}

/// Remote text generation
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput>;

    fn model(&self) -> &str;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

/// OpenAI-compatible `/chat/completions` client
pub struct ChatCompletionsBackend {
    config: GenerationConfig,
    api_key: String,
    client: reqwest::Client,
}

impl ChatCompletionsBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "generation.api_key is required".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl GenerationBackend for ChatCompletionsBackend {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let system = match &request.context {
            Some(ctx) => format!("{}\n\n{}", SYSTEM_PROMPT, ctx),
            None => SYSTEM_PROMPT.to_string(),
        };

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Generation {
                message: format!("request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Generation {
                message: format!("API error {}: {}", status, body),
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| AppError::Generation {
            message: format!("Failed to parse response: {}", e),
        })?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::Generation {
                message: "Empty response from model".to_string(),
            })?;

        // Estimate when the provider omits usage
        let tokens_used = chat
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| ((request.prompt.len() + text.len()) / 4) as u32);

        debug!(tokens_used, "Generation completed");

        Ok(GenerationOutput {
            text,
            confidence: None,
            model: chat.model.unwrap_or_else(|| self.config.model.clone()),
            tokens_used,
        })
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Assemble the user prompt and the optional context block
pub fn build_request(
    query: &str,
    items: &[RetrievalItem],
    augmentation: Option<&Augmentation>,
    servers: &[ServerHint],
) -> GenerationRequest {
    let mut prompt = format!("Question: {}\n", query);

    if !items.is_empty() {
        prompt.push_str("\nReference material:\n");
        for (i, item) in items.iter().enumerate() {
            prompt.push_str(&format!("\n[{}] ({}, relevance {:.2})\n", i + 1, item.category, item.score));
            if let Some(cmd) = &item.command {
                prompt.push_str(&format!("Command: {}\n", cmd));
            }
            if let Some(desc) = &item.description {
                prompt.push_str(&format!("Description: {}\n", desc));
            }
            prompt.push_str(&item.content);
            prompt.push('\n');
        }
    }

    if !servers.is_empty() {
        prompt.push_str("\nServer state:\n");
        for s in servers {
            let mut line = format!("- {}", s.name.as_deref().unwrap_or(&s.id));
            if let Some(status) = &s.status {
                line.push_str(&format!(" status={}", status));
            }
            if let Some(cpu) = s.cpu {
                line.push_str(&format!(" cpu={:.1}%", cpu));
            }
            if let Some(mem) = s.memory {
                line.push_str(&format!(" memory={:.1}%", mem));
            }
            prompt.push_str(&line);
            prompt.push('\n');
        }
    }

    prompt.push_str("\nAnswer:");

    let context = augmentation.map(|aug| {
        let mut ctx = String::new();
        if let Some(system) = &aug.system_context {
            ctx.push_str(&format!("System context:\n{}\n", system));
        }
        for snippet in &aug.snippets {
            ctx.push_str(&format!("\n--- {} ---\n{}\n", snippet.source, snippet.content));
        }
        ctx
    });

    GenerationRequest { prompt, context }
}
