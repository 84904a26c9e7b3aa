//! LLM 모듈 - 벤더 어댑터와 공통 타입
//!
//! 각 어댑터는 벤더 고유의 요청/응답 형식을 공통 `ChatResponse` /
//! `EmbeddingResponse`로 정규화합니다.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use provider::{
    compute_cost, estimate_tokens, LlmProvider, ModelPrice, Operation, ProviderDescriptor,
    ProviderHealth, ProviderKind,
};
pub use types::{
    Billed, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, FinishReason, Message,
    Role, TokenUsage,
};
