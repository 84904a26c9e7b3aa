//! OpenAI 어댑터
//!
//! source: https://platform.openai.com/docs/api-reference
//!
//! - 채팅: `POST /v1/chat/completions`
//! - 임베딩: `POST /v1/embeddings` (text-embedding-3-small, 1536차원)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::provider::{
    check_dimension, compute_cost, estimate_message_tokens, estimate_tokens, require, send_json,
    LlmProvider, Operation, ProviderKind,
};
use super::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, FinishReason, TokenUsage,
};
use crate::error::{RagError, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    data: Vec<EmbedData>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

// ============================================================================
// OpenAiProvider
// ============================================================================

/// OpenAI 프로바이더
#[derive(Debug)]
pub struct OpenAiProvider {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RagError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: api_key.into(),
            client,
            base_url: OPENAI_BASE_URL.to_string(),
        })
    }

    /// API 베이스 URL 변경 (호환 엔드포인트 등)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let kind = self.kind();
        let descriptor = self.descriptor();
        let model = request
            .model
            .as_deref()
            .or(descriptor.default_chat_model)
            .ok_or(RagError::NoProvider { operation: "chat" })?;

        let body = CompletionRequest {
            model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response: CompletionResponse = send_json(
            kind,
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body),
        )
        .await?;

        let choice = require(kind, response.choices.into_iter().next(), "choices[0]")?;
        let message = require(kind, choice.message, "choices[0].message")?;
        let content = require(kind, message.content, "choices[0].message.content")?;

        let served_model = response.model.unwrap_or_else(|| model.to_string());
        let usage = match response.usage {
            Some(u) => TokenUsage::new(u.prompt_tokens, u.completion_tokens),
            None => TokenUsage::estimated(
                estimate_message_tokens(&request.messages),
                estimate_tokens(&content),
            ),
        };
        let cost = compute_cost(descriptor.price(&served_model, Operation::Chat), &usage);

        Ok(ChatResponse {
            content,
            provider: kind,
            model: served_model,
            usage,
            cost,
            finish_reason: choice
                .finish_reason
                .map(|r| FinishReason::from_vendor(&r))
                .unwrap_or(FinishReason::Stop),
        })
    }

    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        let kind = self.kind();
        let descriptor = self.descriptor();
        let model = request
            .model
            .as_deref()
            .or(descriptor.default_embedding_model)
            .ok_or(RagError::NoProvider {
                operation: "embedding",
            })?;

        let body = EmbedRequest {
            model,
            input: &request.text,
        };

        let response: EmbedResponse = send_json(
            kind,
            self.client
                .post(format!("{}/embeddings", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body),
        )
        .await?;

        let embedding = require(kind, response.data.into_iter().next(), "data[0]")?.embedding;
        check_dimension(kind, model, &embedding)?;

        let served_model = response.model.unwrap_or_else(|| model.to_string());
        let usage = match response.usage {
            Some(u) => TokenUsage::new(u.prompt_tokens, 0),
            None => TokenUsage::estimated(estimate_tokens(&request.text), 0),
        };
        let cost = compute_cost(descriptor.price(&served_model, Operation::Embedding), &usage);

        Ok(EmbeddingResponse {
            embedding,
            provider: kind,
            model: served_model,
            usage,
            cost,
        })
    }
}
