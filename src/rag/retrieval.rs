//! 검색 결과 후처리 - 필터, 병합, 신뢰도
//!
//! 모두 순수 함수이며 동기화가 필요 없습니다.

use std::collections::HashSet;

use super::types::RetrievalSource;
use crate::knowledge::Metadata;

/// 메타데이터 동등 필터
///
/// 모든 필터 키가 같은 값이어야 통과합니다.
/// 값이 없거나 null인 메타데이터는 불일치로 취급합니다.
pub fn matches_filters(metadata: &Metadata, filters: &Metadata) -> bool {
    filters.iter().all(|(key, expected)| match metadata.get(key) {
        None | Some(serde_json::Value::Null) => false,
        Some(actual) => actual == expected,
    })
}

/// 후보 병합
///
/// 배치 순서대로 이어 붙인 뒤 점수 내림차순으로 안정 정렬합니다.
/// 동점은 먼저 나온 후보가 앞이며, 같은 청크는 처음 것만 남깁니다.
pub fn merge_sources(batches: Vec<Vec<RetrievalSource>>, top_k: usize) -> Vec<RetrievalSource> {
    let mut merged: Vec<RetrievalSource> = batches.into_iter().flatten().collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen = HashSet::new();
    merged.retain(|s| seen.insert(s.chunk_id.clone()));
    merged.truncate(top_k);
    merged
}

/// 신뢰도 = round(min(평균 점수 * 100, 100), 소수 1자리)
///
/// 출처가 없으면 0. 음수 점수(inner product 등)는 0으로 클램프합니다.
pub fn calculate_confidence(sources: &[RetrievalSource]) -> f32 {
    if sources.is_empty() {
        return 0.0;
    }

    let avg = sources.iter().map(|s| s.score as f64).sum::<f64>() / sources.len() as f64;
    let confidence = (avg * 100.0).clamp(0.0, 100.0);
    ((confidence * 10.0).round() / 10.0) as f32
}

/// 청크 임베딩의 원소별 평균 (정규화 없음)
pub fn mean_embedding(embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let mut sum = vec![0.0f32; first.len()];
    for embedding in embeddings {
        if embedding.len() != sum.len() {
            return None;
        }
        for (acc, v) in sum.iter_mut().zip(embedding) {
            *acc += v;
        }
    }

    let n = embeddings.len() as f32;
    Some(sum.into_iter().map(|v| v / n).collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn source(chunk_id: &str, score: f32, store: &str) -> RetrievalSource {
        RetrievalSource {
            document_id: "doc".to_string(),
            chunk_id: chunk_id.to_string(),
            content: chunk_id.to_string(),
            score,
            metadata: Metadata::new(),
            store: store.to_string(),
        }
    }

    fn metadata(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_filters() {
        let meta = metadata(json!({"lang": "en", "year": 2024, "draft": null}));

        assert!(matches_filters(&meta, &Metadata::new()));
        assert!(matches_filters(&meta, &metadata(json!({"lang": "en"}))));
        assert!(matches_filters(&meta, &metadata(json!({"lang": "en", "year": 2024}))));
        assert!(!matches_filters(&meta, &metadata(json!({"lang": "ko"}))));
        assert!(!matches_filters(&meta, &metadata(json!({"missing": "x"}))));
        assert!(!matches_filters(&meta, &metadata(json!({"draft": null}))));
    }

    #[test]
    fn test_merge_is_stable_for_ties() {
        let primary = vec![source("a", 0.9, "p"), source("b", 0.8, "p")];
        let secondary = vec![source("c", 0.9, "s"), source("d", 0.8, "s")];

        let merged = merge_sources(vec![primary, secondary], 3);
        let ids: Vec<&str> = merged.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_merge_dedupes_same_chunk() {
        let primary = vec![source("a", 0.75, "p")];
        let secondary = vec![source("a", 0.95, "s"), source("b", 0.8, "s")];

        let merged = merge_sources(vec![primary, secondary], 5);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].chunk_id, "a");
        assert_eq!(merged[0].store, "s");
    }

    #[test]
    fn test_confidence() {
        assert_eq!(calculate_confidence(&[]), 0.0);
        assert_eq!(
            calculate_confidence(&[source("a", 0.8, "p"), source("b", 0.9, "p")]),
            85.0
        );
        assert_eq!(calculate_confidence(&[source("a", 0.87654, "p")]), 87.7);
        assert_eq!(calculate_confidence(&[source("a", 1.7, "p")]), 100.0);
        assert_eq!(calculate_confidence(&[source("a", -0.5, "p")]), 0.0);
    }

    #[test]
    fn test_confidence_bounds() {
        for score in [-3.0, -0.1, 0.0, 0.33, 0.7, 0.999, 1.0, 12.0] {
            let c = calculate_confidence(&[source("a", score, "p"), source("b", 0.5, "p")]);
            assert!((0.0..=100.0).contains(&c), "confidence {} out of bounds", c);
        }
    }

    #[test]
    fn test_mean_embedding() {
        let mean = mean_embedding(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(mean, vec![2.0, 3.0]);
        assert!(mean_embedding(&[]).is_none());
        assert!(mean_embedding(&[vec![1.0], vec![1.0, 2.0]]).is_none());
    }
}
