//! 프로바이더 추상화
//!
//! 벤더는 태그된 열거형(`ProviderKind`)으로 표현하고,
//! 모델별 가격/기능 테이블은 정적으로 정의합니다 (시작 시 확정, 불변).

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Message, TokenUsage};
use crate::error::{RagError, Result};

/// 토큰 추정 시 토큰당 문자 수 (근사치, 정확한 값 아님)
pub const CHARS_PER_TOKEN: usize = 4;

// ============================================================================
// Operation
// ============================================================================

/// 라우팅 대상 작업 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Chat,
    Embedding,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Chat => "chat",
            Operation::Embedding => "embedding",
        }
    }
}

// ============================================================================
// Static Provider Table
// ============================================================================

/// 모델 종류
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelKind {
    Chat,
    Embedding { dimension: usize },
}

/// 모델 가격 (USD / 1M tokens)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

impl ModelPrice {
    pub const FREE: ModelPrice = ModelPrice {
        input: 0.0,
        output: 0.0,
    };

    const fn per_million(input: f64, output: f64) -> Self {
        Self { input, output }
    }
}

/// 모델 정보
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub name: &'static str,
    pub kind: ModelKind,
    pub price: ModelPrice,
}

/// 프로바이더 기술자 (정적)
#[derive(Debug)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub models: &'static [ModelInfo],
    pub default_chat_model: Option<&'static str>,
    /// 최고 품질 채팅 모델 (performance 전략)
    pub flagship_chat_model: Option<&'static str>,
    pub default_embedding_model: Option<&'static str>,
    /// 품질 순위 (높을수록 고품질)
    pub quality_rank: u8,
}

/// 지원 벤더
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Gemini,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    /// 정적 기술자
    pub fn descriptor(&self) -> &'static ProviderDescriptor {
        match self {
            ProviderKind::Gemini => &GEMINI,
            ProviderKind::OpenAi => &OPENAI,
            ProviderKind::Anthropic => &ANTHROPIC,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// source: https://ai.google.dev/pricing
static GEMINI: ProviderDescriptor = ProviderDescriptor {
    kind: ProviderKind::Gemini,
    models: &[
        // 실험 단계 무료
        ModelInfo {
            name: "gemini-2.0-flash-exp",
            kind: ModelKind::Chat,
            price: ModelPrice::FREE,
        },
        ModelInfo {
            name: "gemini-1.5-flash",
            kind: ModelKind::Chat,
            price: ModelPrice::per_million(0.075, 0.30),
        },
        ModelInfo {
            name: "gemini-1.5-flash-8b",
            kind: ModelKind::Chat,
            price: ModelPrice::per_million(0.0375, 0.15),
        },
        ModelInfo {
            name: "gemini-1.5-pro",
            kind: ModelKind::Chat,
            price: ModelPrice::per_million(1.25, 5.0),
        },
        ModelInfo {
            name: "text-embedding-004",
            kind: ModelKind::Embedding { dimension: 768 },
            price: ModelPrice::FREE,
        },
    ],
    default_chat_model: Some("gemini-2.0-flash-exp"),
    flagship_chat_model: Some("gemini-1.5-pro"),
    default_embedding_model: Some("text-embedding-004"),
    quality_rank: 1,
};

// source: https://openai.com/api/pricing
static OPENAI: ProviderDescriptor = ProviderDescriptor {
    kind: ProviderKind::OpenAi,
    models: &[
        ModelInfo {
            name: "gpt-4o",
            kind: ModelKind::Chat,
            price: ModelPrice::per_million(2.5, 10.0),
        },
        ModelInfo {
            name: "gpt-4o-mini",
            kind: ModelKind::Chat,
            price: ModelPrice::per_million(0.15, 0.6),
        },
        ModelInfo {
            name: "gpt-4-turbo",
            kind: ModelKind::Chat,
            price: ModelPrice::per_million(10.0, 30.0),
        },
        ModelInfo {
            name: "gpt-3.5-turbo",
            kind: ModelKind::Chat,
            price: ModelPrice::per_million(0.5, 1.5),
        },
        ModelInfo {
            name: "text-embedding-3-small",
            kind: ModelKind::Embedding { dimension: 1536 },
            price: ModelPrice::per_million(0.02, 0.0),
        },
        ModelInfo {
            name: "text-embedding-3-large",
            kind: ModelKind::Embedding { dimension: 3072 },
            price: ModelPrice::per_million(0.13, 0.0),
        },
    ],
    default_chat_model: Some("gpt-4o-mini"),
    flagship_chat_model: Some("gpt-4o"),
    default_embedding_model: Some("text-embedding-3-small"),
    quality_rank: 3,
};

// source: https://www.anthropic.com/pricing
static ANTHROPIC: ProviderDescriptor = ProviderDescriptor {
    kind: ProviderKind::Anthropic,
    models: &[ModelInfo {
        name: "claude-3-5-sonnet-20241022",
        kind: ModelKind::Chat,
        price: ModelPrice::per_million(3.0, 15.0),
    }],
    default_chat_model: Some("claude-3-5-sonnet-20241022"),
    flagship_chat_model: Some("claude-3-5-sonnet-20241022"),
    default_embedding_model: None,
    quality_rank: 2,
};

impl ProviderDescriptor {
    /// 작업 지원 여부
    pub fn supports(&self, operation: Operation) -> bool {
        self.default_model(operation).is_some()
    }

    /// 작업별 기본 모델
    pub fn default_model(&self, operation: Operation) -> Option<&'static str> {
        match operation {
            Operation::Chat => self.default_chat_model,
            Operation::Embedding => self.default_embedding_model,
        }
    }

    /// 이름으로 모델 조회
    pub fn model(&self, name: &str) -> Option<&'static ModelInfo> {
        self.models.iter().find(|m| m.name == name)
    }

    /// 이 프로바이더의 테이블에 있는 모델인지 여부
    pub fn owns_model(&self, name: &str) -> bool {
        self.model(name).is_some()
    }

    /// 실제 응답 모델의 가격
    ///
    /// 테이블에 없는 모델(벤더가 조용히 바꾼 경우 등)은
    /// 해당 작업의 기본 모델 가격을 사용합니다.
    pub fn price(&self, model: &str, operation: Operation) -> ModelPrice {
        self.model(model)
            .or_else(|| self.default_model(operation).and_then(|m| self.model(m)))
            .map(|m| m.price)
            .unwrap_or(ModelPrice::FREE)
    }

    /// 기본 모델의 단가 합계 (cost 전략 비교용)
    pub fn default_unit_price(&self, operation: Operation) -> Option<f64> {
        self.default_model(operation)
            .and_then(|m| self.model(m))
            .map(|m| m.price.input + m.price.output)
    }

    /// 모델의 임베딩 차원 (모델 미지정 시 기본 임베딩 모델)
    pub fn embedding_dimension(&self, model: Option<&str>) -> Option<usize> {
        let name = model.or(self.default_embedding_model)?;
        match self.model(name)?.kind {
            ModelKind::Embedding { dimension } => Some(dimension),
            ModelKind::Chat => None,
        }
    }
}

// ============================================================================
// Cost / Token Estimation
// ============================================================================

/// 비용 계산: input/1e6 * price.input + output/1e6 * price.output
pub fn compute_cost(price: ModelPrice, usage: &TokenUsage) -> f64 {
    usage.input as f64 / 1_000_000.0 * price.input + usage.output as f64 / 1_000_000.0 * price.output
}

/// 토큰 수 추정 (문자 수 / 4, 올림)
///
/// 벤더가 사용량을 보고하지 않을 때만 사용하는 근사치입니다.
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
}

/// 메시지 목록 전체의 토큰 추정
pub fn estimate_message_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

// ============================================================================
// LlmProvider Trait
// ============================================================================

/// LLM 프로바이더 어댑터 트레이트
///
/// 어댑터 내부에서는 재시도하지 않습니다 (라우터 책임).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// 벤더 종류
    fn kind(&self) -> ProviderKind;

    /// 정적 기술자
    fn descriptor(&self) -> &'static ProviderDescriptor {
        self.kind().descriptor()
    }

    /// 채팅 완성
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// 텍스트 임베딩
    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// 헬스 체크 (작은 임베딩 또는 채팅 호출)
    async fn health_check(&self) -> bool {
        let result = if self.descriptor().supports(Operation::Embedding) {
            self.embed(&EmbeddingRequest::new("test")).await.map(|_| ())
        } else {
            let request = ChatRequest::new(vec![Message::user("ping")]).with_max_tokens(10);
            self.chat(&request).await.map(|_| ())
        };

        if let Err(e) = &result {
            tracing::debug!("{} health check failed: {}", self.kind(), e);
        }
        result.is_ok()
    }
}

/// 헬스 체크 결과
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: ProviderKind,
    pub healthy: bool,
    pub latency_ms: u64,
}

impl ProviderHealth {
    pub(crate) async fn probe(provider: &dyn LlmProvider) -> Self {
        let start = Instant::now();
        let healthy = provider.health_check().await;
        Self {
            provider: provider.kind(),
            healthy,
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }
}

// ============================================================================
// HTTP Helpers
// ============================================================================

/// 벤더 공통 에러 응답 ({"error": {"message": ...}})
#[derive(Debug, Deserialize)]
struct VendorError {
    error: VendorErrorDetail,
}

#[derive(Debug, Deserialize)]
struct VendorErrorDetail {
    message: String,
}

/// JSON 요청 전송 후 응답 파싱
///
/// - 네트워크 실패/타임아웃, non-2xx → `ProviderCall`
/// - 응답 본문 파싱 실패 → `ProviderFormat`
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
) -> Result<T> {
    let response = request.send().await.map_err(|e| RagError::ProviderCall {
        provider,
        status: e.status().map(|s| s.as_u16()),
        message: if e.is_timeout() {
            "request timed out".to_string()
        } else {
            format!("failed to send request: {}", e)
        },
    })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| RagError::ProviderCall {
        provider,
        status: Some(status.as_u16()),
        message: format!("failed to read response body: {}", e),
    })?;

    if !status.is_success() {
        let message = serde_json::from_str::<VendorError>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| truncate(&body, 300));
        return Err(RagError::ProviderCall {
            provider,
            status: Some(status.as_u16()),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| RagError::ProviderFormat {
        provider,
        message: format!("failed to parse response: {}", e),
    })
}

/// 필수 필드 누락 시 `ProviderFormat`
pub(crate) fn require<T>(provider: ProviderKind, value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| RagError::ProviderFormat {
        provider,
        message: format!("response is missing {}", what),
    })
}

/// 임베딩 차원 검증 (선언된 차원과 다르면 `ProviderFormat`)
pub(crate) fn check_dimension(provider: ProviderKind, model: &str, embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(RagError::ProviderFormat {
            provider,
            message: "empty embedding vector".to_string(),
        });
    }
    if let Some(expected) = provider.descriptor().embedding_dimension(Some(model)) {
        if expected != embedding.len() {
            return Err(RagError::ProviderFormat {
                provider,
                message: format!(
                    "{} returned {} dimensions, expected {}",
                    model,
                    embedding.len(),
                    expected
                ),
            });
        }
    }
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
