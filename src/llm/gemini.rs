//! Google Gemini 어댑터
//!
//! source: https://ai.google.dev/api/generate-content
//!
//! - 채팅: `models/{model}:generateContent`
//! - 임베딩: `models/{model}:embedContent` (text-embedding-004, 768차원)
//!
//! Gemini는 system 역할이 없으므로 system 메시지를 첫 user 메시지 앞에 합칩니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::provider::{
    check_dimension, compute_cost, estimate_message_tokens, estimate_tokens, require, send_json,
    LlmProvider, Operation, ProviderKind,
};
use super::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, FinishReason, Message, Role,
    TokenUsage,
};
use crate::error::{RagError, Result};

/// Gemini API 기본 URL
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

// ============================================================================
// Rate Limiter
// ============================================================================

/// 슬라이딩 윈도우 + 최소 간격 레이트 리미터 (무료 티어 RPM 준수)
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn per_minute(rpm: u32) -> Self {
        Self {
            requests: Vec::new(),
            max_requests: rpm,
            window: RATE_LIMIT_WINDOW,
            min_delay: RATE_LIMIT_WINDOW / rpm.max(1),
            last_request: None,
        }
    }

    /// 요청 가능 시점까지 대기
    async fn acquire(&mut self) {
        // 1. 최소 딜레이 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        // 2. 윈도우 밖의 오래된 요청 제거
        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. 한도 초과 시 가장 오래된 요청이 윈도우를 벗어날 때까지 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

// ============================================================================
// GeminiProvider
// ============================================================================

/// Google Gemini 프로바이더
#[derive(Debug)]
pub struct GeminiProvider {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Option<Arc<Mutex<RateLimiter>>>,
}

impl GeminiProvider {
    /// 새 Gemini 프로바이더 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `rpm` - 분당 요청 제한 (0이면 제한 없음)
    pub fn new(api_key: impl Into<String>, rpm: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RagError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let rate_limiter = (rpm > 0).then(|| Arc::new(Mutex::new(RateLimiter::per_minute(rpm))));

        Ok(Self {
            api_key: api_key.into(),
            client,
            base_url: GEMINI_BASE_URL.to_string(),
            rate_limiter,
        })
    }

    /// API 베이스 URL 변경 (프록시 등)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.lock().await.acquire().await;
        }
    }
}

/// 메시지 목록을 Gemini contents로 변환
///
/// system 메시지는 모두 모아 첫 user 메시지 앞에 붙입니다.
/// user 메시지가 없으면 system 내용만으로 user 메시지를 만듭니다.
fn build_contents(messages: &[Message]) -> Vec<Content> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let mut system_prefix = (!system.is_empty()).then(|| system.join("\n\n"));

    let mut contents: Vec<Content> = Vec::with_capacity(messages.len());
    for message in messages.iter().filter(|m| m.role != Role::System) {
        let (role, text) = match message.role {
            Role::User => match system_prefix.take() {
                Some(prefix) => ("user", format!("{}\n\n{}", prefix, message.content)),
                None => ("user", message.content.clone()),
            },
            _ => ("model", message.content.clone()),
        };
        contents.push(Content {
            role: Some(role.to_string()),
            parts: vec![Part { text }],
        });
    }

    if let Some(prefix) = system_prefix {
        contents.insert(
            0,
            Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: prefix }],
            },
        );
    }

    contents
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let kind = self.kind();
        let descriptor = self.descriptor();
        let model = request
            .model
            .as_deref()
            .or(descriptor.default_chat_model)
            .ok_or(RagError::NoProvider { operation: "chat" })?;

        let body = GenerateRequest {
            contents: build_contents(&request.messages),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        self.throttle().await;
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response: GenerateResponse = send_json(
            kind,
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body),
        )
        .await?;

        let candidate = require(kind, response.candidates.into_iter().next(), "candidates[0]")?;
        let content = require(kind, candidate.content, "candidates[0].content")?;
        let text: String = content.parts.into_iter().map(|p| p.text).collect();

        let served_model = response.model_version.unwrap_or_else(|| model.to_string());
        let usage = match response.usage_metadata {
            Some(u) => TokenUsage::new(u.prompt_token_count, u.candidates_token_count),
            None => TokenUsage::estimated(
                estimate_message_tokens(&request.messages),
                estimate_tokens(&text),
            ),
        };
        let cost = compute_cost(descriptor.price(&served_model, Operation::Chat), &usage);

        Ok(ChatResponse {
            content: text,
            provider: kind,
            model: served_model,
            usage,
            cost,
            finish_reason: candidate
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
            model: format!("models/{}", model),
            content: Content {
                role: None,
                parts: vec![Part {
                    text: request.text.clone(),
                }],
            },
        };

        self.throttle().await;
        let url = format!("{}/models/{}:embedContent", self.base_url, model);
        let response: EmbedResponse = send_json(
            kind,
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body),
        )
        .await?;

        let embedding = require(kind, response.embedding, "embedding")?.values;
        check_dimension(kind, model, &embedding)?;

        // embedContent는 사용량을 돌려주지 않음
        let usage = TokenUsage::estimated(estimate_tokens(&request.text), 0);
        let cost = compute_cost(descriptor.price(model, Operation::Embedding), &usage);

        Ok(EmbeddingResponse {
            embedding,
            provider: kind,
            model: model.to_string(),
            usage,
            cost,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_folded_into_first_user_message() {
        let messages = vec![
            Message::system("You are helpful."),
            Message::user("Hi"),
            Message::assistant("Hello!"),
            Message::user("Bye"),
        ];
        let contents = build_contents(&messages);

        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0].role.as_deref(), Some("user"));
        assert_eq!(contents[0].parts[0].text, "You are helpful.\n\nHi");
        assert_eq!(contents[1].role.as_deref(), Some("model"));
        assert_eq!(contents[2].parts[0].text, "Bye");
    }

    #[test]
    fn test_system_only_becomes_user_message() {
        let contents = build_contents(&[Message::system("ctx")]);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].role.as_deref(), Some("user"));
        assert_eq!(contents[0].parts[0].text, "ctx");
    }

    #[test]
    fn test_generate_request_wire_format() {
        let body = GenerateRequest {
            contents: build_contents(&[Message::user("q")]),
            generation_config: GenerationConfig {
                temperature: 0.5,
                max_output_tokens: 100,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 100);
        assert_eq!(json["contents"][0]["parts"][0]["text"], "q");
    }

    #[test]
    fn test_parse_generate_response() {
        let raw = r#"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "an"}, {"text": "swer"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3, "totalTokenCount": 15}
        }"#;
        let response: GenerateResponse = serde_json::from_str(raw).unwrap();
        let usage = response.usage_metadata.as_ref().unwrap();
        assert_eq!(usage.prompt_token_count, 12);
        assert_eq!(usage.candidates_token_count, 3);
        let parts = &response.candidates[0].content.as_ref().unwrap().parts;
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_rate_limiter_spacing() {
        let limiter = RateLimiter::per_minute(60);
        assert_eq!(limiter.min_delay, Duration::from_secs(1));
        assert_eq!(limiter.max_requests, 60);
    }

    #[tokio::test]
    async fn test_rate_limiter_first_acquire_is_immediate() {
        let mut limiter = RateLimiter::per_minute(30);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(limiter.requests.len(), 1);
    }

    #[test]
    fn test_new_without_rate_limit() {
        let provider = GeminiProvider::new("fake_key", 0).unwrap();
        assert!(provider.rate_limiter.is_none());
        assert_eq!(provider.kind(), ProviderKind::Gemini);
    }
}
