//! 인메모리 벡터 저장소 (brute-force)
//!
//! 전체 엔트리를 순회하며 점수를 계산합니다.
//! 작은 코퍼스, 테스트, 하이브리드 검색의 두 번째 백엔드로 사용합니다.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::vector::{similarity, SearchOptions, VectorEntry, VectorMatch, VectorStore};
use crate::error::Result;

/// 인메모리 벡터 저장소
#[derive(Debug)]
pub struct InMemoryVectorStore {
    name: String,
    /// 삽입 순서 유지
    entries: RwLock<Vec<VectorEntry>>,
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl InMemoryVectorStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// 저장된 ID 목록 (삽입 순서)
    pub async fn ids(&self) -> Vec<String> {
        self.entries.read().await.iter().map(|e| e.id.clone()).collect()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        let mut stored = self.entries.write().await;
        for entry in entries {
            match stored.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry.clone(),
                None => stored.push(entry.clone()),
            }
        }
        Ok(entries.len())
    }

    async fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<VectorMatch>> {
        let stored = self.entries.read().await;

        let mut matches = Vec::new();
        for entry in stored.iter() {
            let score = similarity(options.metric, &entry.embedding, query)?;
            if score >= options.threshold {
                matches.push(VectorMatch::from_entry(entry, score));
            }
        }

        // 안정 정렬: 동점은 삽입 순서 유지
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(options.top_k);

        Ok(matches)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        let mut stored = self.entries.write().await;
        let before = stored.len();
        stored.retain(|e| !ids.contains(&e.id));
        Ok(before - stored.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
