//! 에러 모듈 - 라우터/RAG 공통 에러 분류
//!
//! 프로바이더 호출 실패는 라우터 내부에서 재시도/폴백으로 처리되고,
//! 모두 소진된 경우에만 `RoutingExhausted`로 호출자에게 전달됩니다.
//! 그 외 에러는 변형 없이 그대로 전파됩니다.

use thiserror::Error;

use crate::llm::ProviderKind;

/// ragroute 메인 에러 타입
#[derive(Error, Debug)]
pub enum RagError {
    /// 네트워크/HTTP 실패 또는 non-2xx 응답 (일시적, 재시도 대상)
    #[error("{provider} call failed (status: {}): {message}", fmt_status(.status))]
    ProviderCall {
        provider: ProviderKind,
        status: Option<u16>,
        message: String,
    },

    /// 응답 본문에 기대한 필드가 없음 (벤더 계약 위반)
    #[error("{provider} returned an unexpected response: {message}")]
    ProviderFormat {
        provider: ProviderKind,
        message: String,
    },

    /// 재시도/폴백을 모두 소진
    #[error("All providers failed after {attempts} attempts: {last_error}")]
    RoutingExhausted {
        attempts: u32,
        last_error: Box<RagError>,
    },

    /// 빈 메시지 목록/빈 텍스트 등 잘못된 요청
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 해당 작업을 지원하는 프로바이더가 없음
    #[error("No configured provider supports {operation}")]
    NoProvider { operation: &'static str },

    /// 저장된 벡터와 쿼리 벡터의 차원 불일치
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    /// 문서를 찾을 수 없음
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    /// 잘못된 설정 (생성 시점에 검증)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 벡터/문서 저장소 에러
    #[error("{backend} store error: {message}")]
    Store { backend: String, message: String },

    /// 저장소 호출 타임아웃
    #[error("{backend} store timed out")]
    StoreTimeout { backend: String },

    /// 호출자가 작업을 취소함
    #[error("Operation cancelled")]
    Cancelled,

    /// SQLite 에러
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON 에러
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// TOML 역직렬화 에러
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO 에러
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },
}

impl RagError {
    /// 라우터가 다음 시도로 넘어갈 수 있는 에러인지 여부
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::ProviderCall { .. } | RagError::ProviderFormat { .. }
        )
    }

    pub(crate) fn store(backend: impl Into<String>, message: impl std::fmt::Display) -> Self {
        RagError::Store {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        RagError::Json {
            source,
            context: context.into(),
        }
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
}

/// ragroute 결과 타입
pub type Result<T> = std::result::Result<T, RagError>;
