//! LLM 공통 타입
//!
//! 채팅 응답과 임베딩 응답은 별도 타입으로 분리합니다.
//! 하나의 nullable 구조체 대신 작업별 타입을 사용해
//! "필드 누락" 류의 버그가 표현 자체로 불가능하도록 합니다.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::provider::ProviderKind;

/// 기본 샘플링 온도
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// 기본 최대 출력 토큰 수
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

// ============================================================================
// Messages
// ============================================================================

/// 메시지 발신자 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 대화 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// 채팅 요청
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// 모델 지정 (없으면 전략에 따라 선택)
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 호출자 취소 신호
    pub cancel: CancellationToken,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 직렬화된 프롬프트 길이 (문자 수)
    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// 임베딩 요청
#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub text: String,
    pub model: Option<String>,
    pub cancel: CancellationToken,
}

impl EmbeddingRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

// ============================================================================
// Responses
// ============================================================================

/// 토큰 사용량
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    /// 벤더가 사용량을 주지 않아 문자 수/4 로 추정한 값인지 여부
    pub estimated: bool,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input + output,
            estimated: false,
        }
    }

    pub fn estimated(input: u64, output: u64) -> Self {
        Self {
            estimated: true,
            ..Self::new(input, output)
        }
    }
}

/// 생성 종료 사유
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    /// 벤더별 종료 사유 문자열 정규화
    pub fn from_vendor(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" | "safety" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// 채팅 응답
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub provider: ProviderKind,
    /// 실제 응답한 모델
    pub model: String,
    pub usage: TokenUsage,
    /// USD
    pub cost: f64,
    pub finish_reason: FinishReason,
}

/// 임베딩 응답
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
    pub provider: ProviderKind,
    pub model: String,
    pub usage: TokenUsage,
    /// USD
    pub cost: f64,
}

/// 과금 정보를 가진 응답 (라우터 통계용)
pub trait Billed {
    fn provider(&self) -> ProviderKind;
    fn usage(&self) -> TokenUsage;
    fn cost(&self) -> f64;
}

impl Billed for ChatResponse {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    fn usage(&self) -> TokenUsage {
        self.usage
    }

    fn cost(&self) -> f64 {
        self.cost
    }
}

impl Billed for EmbeddingResponse {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    fn usage(&self) -> TokenUsage {
        self.usage
    }

    fn cost(&self) -> f64 {
        self.cost
    }
}
