//! LanceDB Vector Store - 고성능 벡터 검색
//!
//! ANN (Approximate Nearest Neighbor) 검색으로 대용량 벡터에서도 빠른 검색을 지원합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::vector::{
    check_dimensions, Metadata, Metric, SearchOptions, VectorEntry, VectorMatch, VectorStore,
};
use crate::error::{RagError, Result};

/// 기본 벡터 테이블 이름
pub const DEFAULT_TABLE_NAME: &str = "chunks";

const BACKEND: &str = "lancedb";

fn lance_err(context: &str, e: impl std::fmt::Display) -> RagError {
    RagError::store(BACKEND, format!("{}: {}", context, e))
}

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// 테이블의 임베딩 컬럼은 고정 길이 리스트이므로 차원은 열 때 결정됩니다.
pub struct LanceVectorStore {
    db: Connection,
    table_name: String,
    /// `lancedb:{table}` 형태의 저장소 이름
    name: String,
    dimension: usize,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        Self::open_table(path, DEFAULT_TABLE_NAME, dimension).await
    }

    /// 테이블 이름을 지정해 열기
    pub async fn open_table(path: &Path, table_name: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 || dimension > i32::MAX as usize {
            return Err(RagError::Configuration(format!(
                "invalid embedding dimension: {}",
                dimension
            )));
        }

        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RagError::Io {
                        source: e,
                        context: "Failed to create LanceDB directory".to_string(),
                    })?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::Configuration("Invalid path encoding".to_string()))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(|e| lance_err("Failed to connect to LanceDB", e))?;

        let store = Self {
            db,
            table_name: table_name.to_string(),
            name: format!("{}:{}", BACKEND, table_name),
            dimension,
        };
        store.check_existing_dimension().await?;
        Ok(store)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 기존 테이블의 임베딩 차원이 설정과 같은지 확인
    async fn check_existing_dimension(&self) -> Result<()> {
        if !self.table_exists().await {
            return Ok(());
        }
        let table = self.open().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| lance_err("Failed to read table schema", e))?;

        if let Ok(field) = schema.field_with_name("embedding") {
            if let DataType::FixedSizeList(_, size) = field.data_type() {
                check_dimensions(*size as usize, self.dimension)?;
            }
        }
        Ok(())
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("document_id", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        for entry in entries {
            check_dimensions(self.dimension, entry.embedding.len())?;
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let document_ids: Vec<&str> = entries.iter().map(|e| e.document_id.as_str()).collect();
        let chunk_indices: Vec<i32> = entries.iter().map(|e| e.chunk_index as i32).collect();
        let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
        let metadata: Vec<String> = entries
            .iter()
            .map(|e| serde_json::to_string(&e.metadata))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| RagError::json("Failed to serialize vector metadata", e))?;

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| lance_err("Failed to create embedding array", e))?;

        RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(document_ids)),
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embeddings_list),
            ],
        )
        .map_err(|e| lance_err("Failed to create RecordBatch", e))
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&self.table_name))
            .unwrap_or(false)
    }

    async fn open(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| lance_err("Failed to open table", e))
    }

    /// 결과 배치를 검색 결과로 변환
    fn batch_to_matches(batch: &RecordBatch, metric: Metric, out: &mut Vec<VectorMatch>) -> Result<()> {
        fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<T>())
                .ok_or_else(|| lance_err("Malformed search result", format!("missing {} column", name)))
        }

        let ids = column::<StringArray>(batch, "id")?;
        let document_ids = column::<StringArray>(batch, "document_id")?;
        let chunk_indices = column::<Int32Array>(batch, "chunk_index")?;
        let contents = column::<StringArray>(batch, "content")?;
        let metadata = column::<StringArray>(batch, "metadata")?;
        // _distance 컬럼 (LanceDB가 자동 추가)
        let distances = column::<Float32Array>(batch, "_distance")?;

        for i in 0..batch.num_rows() {
            let metadata: Metadata = serde_json::from_str(metadata.value(i))
                .map_err(|e| RagError::json("Failed to parse vector metadata", e))?;

            out.push(VectorMatch {
                id: ids.value(i).to_string(),
                document_id: document_ids.value(i).to_string(),
                chunk_index: chunk_indices.value(i).max(0) as usize,
                content: contents.value(i).to_string(),
                score: distance_to_score(metric, distances.value(i)),
                metadata,
            });
        }
        Ok(())
    }
}

/// 메트릭별 LanceDB 거리 타입
fn distance_type(metric: Metric) -> DistanceType {
    match metric {
        Metric::Cosine => DistanceType::Cosine,
        Metric::L2 => DistanceType::L2,
        Metric::InnerProduct => DistanceType::Dot,
    }
}

/// LanceDB 거리를 유사도 점수로 변환
///
/// - cosine: distance = 1 - cos
/// - l2: distance = 제곱 유클리드 거리
/// - dot: distance = 1 - dot
fn distance_to_score(metric: Metric, distance: f32) -> f32 {
    match metric {
        Metric::Cosine | Metric::InnerProduct => 1.0 - distance,
        Metric::L2 => 1.0 / (1.0 + distance.max(0.0).sqrt()),
    }
}

/// SQL 문자열 리터럴 이스케이프
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            // 같은 ID는 먼저 제거 후 추가
            let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
            self.delete_by_ids(&ids).await?;

            let table = self.open().await?;
            table
                .add(batches)
                .execute()
                .await
                .map_err(|e| lance_err("Failed to add vectors to table", e))?;
        } else {
            self.db
                .create_table(&self.table_name, batches)
                .execute()
                .await
                .map_err(|e| lance_err("Failed to create table", e))?;
        }

        tracing::debug!("Upserted {} vectors into {}", entries.len(), self.table_name);
        Ok(entries.len())
    }

    async fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<VectorMatch>> {
        check_dimensions(self.dimension, query.len())?;

        if options.top_k == 0 || !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self.open().await?;
        let results = table
            .vector_search(query.to_vec())
            .map_err(|e| lance_err("Failed to create vector search", e))?
            .distance_type(distance_type(options.metric))
            .limit(options.top_k)
            .execute()
            .await
            .map_err(|e| lance_err("Failed to execute vector search", e))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| lance_err("Failed to read search results", e))?;

        let mut matches = Vec::new();
        for batch in &batches {
            Self::batch_to_matches(batch, options.metric, &mut matches)?;
        }

        matches.retain(|m| m.score >= options.threshold);
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(options.top_k);

        Ok(matches)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() || !self.table_exists().await {
            return Ok(0);
        }

        let table = self.open().await?;
        let filter = format!(
            "id IN ({})",
            ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", ")
        );

        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .map_err(|e| lance_err("Failed to count rows", e))?;

        table
            .delete(&filter)
            .await
            .map_err(|e| lance_err("Failed to delete vectors", e))?;

        Ok(before)
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self.open().await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| lance_err("Failed to count rows", e))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn unit(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[axis] = 1.0;
        v
    }

    fn create_test_entry(id: &str, embedding: Vec<f32>) -> VectorEntry {
        let mut metadata = Metadata::new();
        metadata.insert("lang".to_string(), serde_json::json!("en"));
        VectorEntry {
            id: id.to_string(),
            document_id: "doc-1".to_string(),
            chunk_index: 0,
            content: format!("Test chunk {}", id),
            embedding,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_lance_store_basic() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("test.lance"), DIM)
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 0);

        let entries = vec![create_test_entry("a", unit(0)), create_test_entry("b", unit(1))];
        assert_eq!(store.upsert(&entries).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 2);

        // 같은 ID 재삽입은 교체
        store.upsert(&[create_test_entry("a", unit(2))]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lance_tables_have_distinct_names() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("names.lance");
        let chunks = LanceVectorStore::open(&path, DIM).await.unwrap();
        let mirror = LanceVectorStore::open_table(&path, "chunks_mirror", DIM)
            .await
            .unwrap();

        assert_eq!(chunks.name(), "lancedb:chunks");
        assert_eq!(mirror.name(), "lancedb:chunks_mirror");

        chunks.upsert(&[create_test_entry("a", unit(0))]).await.unwrap();
        mirror.upsert(&[create_test_entry("a", unit(0))]).await.unwrap();
        let results = mirror
            .search(&unit(0), &SearchOptions::new(1, 0.5))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(chunks.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lance_search() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("search.lance"), DIM)
            .await
            .unwrap();

        store
            .upsert(&[
                create_test_entry("x", unit(0)),
                create_test_entry("y", unit(1)),
                create_test_entry("z", unit(2)),
            ])
            .await
            .unwrap();

        let results = store
            .search(&unit(1), &SearchOptions::new(2, 0.7))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "y");
        assert!(results[0].score > 0.99);
        assert_eq!(results[0].metadata["lang"], "en");
    }

    #[tokio::test]
    async fn test_lance_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("delete.lance"), DIM)
            .await
            .unwrap();

        store
            .upsert(&[
                create_test_entry("a", unit(0)),
                create_test_entry("it's", unit(1)),
                create_test_entry("c", unit(2)),
            ])
            .await
            .unwrap();

        let deleted = store
            .delete_by_ids(&["a".to_string(), "it's".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lance_dimension_checks() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dim.lance");
        let store = LanceVectorStore::open(&path, DIM).await.unwrap();
        store.upsert(&[create_test_entry("a", unit(0))]).await.unwrap();

        let err = store
            .search(&vec![0.1; DIM * 2], &SearchOptions::new(5, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmbeddingDimensionMismatch { .. }));

        // 기존 테이블과 다른 차원으로 열기
        let reopened = LanceVectorStore::open(&path, DIM * 2).await;
        assert!(matches!(
            reopened,
            Err(RagError::EmbeddingDimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_distance_to_score() {
        assert!((distance_to_score(Metric::Cosine, 0.0) - 1.0).abs() < 1e-6);
        assert!((distance_to_score(Metric::L2, 4.0) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(quote("it's"), "'it''s'");
    }
}
