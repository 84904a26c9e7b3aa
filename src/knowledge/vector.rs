//! Vector Store - 벡터 검색 트레이트 및 유사도 유틸리티
//!
//! 백엔드는 인메모리(brute-force)와 LanceDB(ANN) 두 가지입니다.
//! 모든 백엔드는 점수를 "클수록 유사"한 값으로 정규화해 반환합니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// 벡터 메타데이터 (임의 JSON 객체)
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Types
// ============================================================================

/// 유사도 메트릭
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    /// 점수 = 1 / (1 + 유클리드 거리)
    L2,
    InnerProduct,
}

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    /// 청크 ID
    pub id: String,
    pub document_id: String,
    /// 청크 인덱스 (0-based)
    pub chunk_index: usize,
    /// 청크 텍스트
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    /// 유사도 스코어 (클수록 유사)
    pub score: f32,
    pub metadata: Metadata,
}

impl VectorMatch {
    pub(crate) fn from_entry(entry: &VectorEntry, score: f32) -> Self {
        Self {
            id: entry.id.clone(),
            document_id: entry.document_id.clone(),
            chunk_index: entry.chunk_index,
            content: entry.content.clone(),
            score,
            metadata: entry.metadata.clone(),
        }
    }
}

/// 검색 옵션
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub top_k: usize,
    /// 이 값 미만의 점수는 제외
    pub threshold: f32,
    pub metric: Metric,
}

impl SearchOptions {
    pub fn new(top_k: usize, threshold: f32) -> Self {
        Self {
            top_k,
            threshold,
            metric: Metric::Cosine,
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 백엔드 이름 (검색 결과 출처 태그)
    fn name(&self) -> &str;

    /// 벡터 삽입 (같은 ID는 교체)
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// 벡터 검색 (점수 내림차순, 동점은 저장 순서)
    ///
    /// 저장된 벡터와 쿼리 차원이 다르면 `EmbeddingDimensionMismatch`.
    async fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<VectorMatch>>;

    /// ID 목록으로 삭제
    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize>;

    /// 벡터 개수 조회
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 호출 전에 두 벡터의 길이가 같아야 합니다.
/// 결과는 -1.0 ~ 1.0 범위이며, 영벡터는 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product = inner_product(a, b);
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// 메트릭에 따른 유사도 점수
///
/// 길이가 다른 벡터는 점수를 만들지 않고 `EmbeddingDimensionMismatch`로 실패합니다.
/// `stored`가 기준(expected), `query`가 실제(actual) 차원입니다.
pub fn similarity(metric: Metric, stored: &[f32], query: &[f32]) -> Result<f32> {
    check_dimensions(stored.len(), query.len())?;

    Ok(match metric {
        Metric::Cosine => cosine_similarity(stored, query),
        Metric::L2 => 1.0 / (1.0 + l2_distance(stored, query)),
        Metric::InnerProduct => inner_product(stored, query),
    })
}

/// 차원 일치 검사
pub fn check_dimensions(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(RagError::EmbeddingDimensionMismatch { expected, actual });
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
