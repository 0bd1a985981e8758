pub mod handlers;

use anyhow::Context;
use async_trait::async_trait;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::config::AiConfig;
use crate::state::AppState;

#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    cfg: AiConfig,
}

impl OpenAiClient {
    pub fn new(cfg: AiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[async_trait]
impl Completion for OpenAiClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.cfg.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let res: ChatResponse = self
            .http
            .post(&url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request")?
            .error_for_status()
            .context("chat completion status")?
            .json()
            .await
            .context("decode chat completion")?;

        res.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("chat completion returned no content")
    }
}

pub fn router() -> Router<AppState> {
    handlers::ai_routes()
}
