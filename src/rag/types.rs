//! RAG 요청/결과 타입

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::knowledge::{Metadata, VectorMatch};
use crate::llm::{Message, ProviderKind};
use crate::router::Strategy;

// ============================================================================
// Query
// ============================================================================

/// RAG 질의
#[derive(Debug, Clone, Default)]
pub struct RagQuery {
    pub query: String,
    /// 없으면 설정값 사용
    pub top_k: Option<usize>,
    /// 메타데이터 동등 필터 (모든 키가 일치해야 통과)
    pub filters: Metadata,
    /// 이전 대화 (오래된 순)
    pub history: Vec<Message>,
    /// 채팅 전략 (없으면 라우터 기본 전략)
    pub strategy: Option<Strategy>,
    pub cancel: CancellationToken,
}

impl RagQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

// ============================================================================
// Results
// ============================================================================

/// 검색 방법
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// 단일 벡터 저장소
    Vector,
    /// 두 저장소 병합
    Hybrid,
}

/// 검색된 출처
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalSource {
    pub document_id: String,
    pub chunk_id: String,
    pub content: String,
    /// 유사도 스코어 (이상적으로 0.0 ~ 1.0)
    pub score: f32,
    pub metadata: Metadata,
    /// 출처 저장소 이름
    pub store: String,
}

impl RetrievalSource {
    pub(crate) fn from_match(m: VectorMatch, store: &str) -> Self {
        Self {
            document_id: m.document_id,
            chunk_id: m.id,
            content: m.content,
            score: m.score,
            metadata: m.metadata,
            store: store.to_string(),
        }
    }
}

/// 답변 메타데이터
#[derive(Debug, Clone, Serialize)]
pub struct RagMetadata {
    /// 실제 응답한 모델
    pub model: String,
    pub provider: ProviderKind,
    pub sources_count: usize,
    pub search_method: SearchMethod,
    pub timestamp: DateTime<Utc>,
    /// 채팅 호출 비용 (USD)
    pub cost: f64,
}

/// RAG 답변
#[derive(Debug, Clone, Serialize)]
pub struct RagResult {
    pub answer: String,
    pub sources: Vec<RetrievalSource>,
    /// 0 ~ 100
    pub confidence: f32,
    pub metadata: RagMetadata,
}

/// 수집 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestResult {
    pub document_id: String,
    pub chunks_created: usize,
}

// ============================================================================
// Evaluation / Stats
// ============================================================================

/// 평가 케이스
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationCase {
    pub query: String,
    pub expected_answer: String,
}

/// 케이스별 평가 결과
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub query: String,
    pub passed: bool,
    pub confidence: f32,
    pub sources_count: usize,
}

/// 평가 리포트
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    /// 통과율 (%)
    pub accuracy: f32,
    pub avg_confidence: f32,
    pub avg_retrieval_count: f32,
    pub results: Vec<CaseResult>,
}

/// 저장소별 벡터 수
#[derive(Debug, Clone, Serialize)]
pub struct StoreCount {
    pub store: String,
    pub vectors: usize,
}

/// 엔진 통계
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub documents: usize,
    pub stores: Vec<StoreCount>,
}
