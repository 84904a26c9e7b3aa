//! RAG 엔진 - 수집, 검색, 답변 생성, 재색인
//!
//! Chunker, Router(임베딩/채팅), 벡터 저장소를 조합합니다.
//! 호출마다 독립된 파이프라인이며, 호출 사이에 공유하는 가변 상태는
//! 라우터의 사용량 통계뿐입니다.
//!
//! 수집과 재색인은 전부 또는 전무입니다. 실패하면 새로 쓴 청크를 지우고,
//! 재색인은 기존 청크 세트를 그대로 남깁니다.

mod prompt;
mod retrieval;
mod types;

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::RagSettings;
use crate::error::{RagError, Result};
use crate::knowledge::{
    Chunker, Document, DocumentStore, Metadata, NewDocument, SearchOptions, StoredChunk,
    VectorEntry, VectorStore,
};
use crate::llm::{ChatRequest, EmbeddingRequest};
use crate::router::Router;

pub use prompt::{build_context, build_messages, system_prompt, HISTORY_TURNS};
pub use retrieval::{calculate_confidence, matches_filters, mean_embedding, merge_sources};
pub use types::{
    CaseResult, EngineStats, EvaluationCase, EvaluationReport, IngestResult, RagMetadata,
    RagQuery, RagResult, RetrievalSource, SearchMethod, StoreCount,
};


// ============================================================================
// RagEngine
// ============================================================================

/// RAG 엔진
pub struct RagEngine {
    router: Arc<Router>,
    documents: Arc<dyn DocumentStore>,
    primary: Arc<dyn VectorStore>,
    /// 하이브리드 검색용 두 번째 저장소
    secondary: Option<Arc<dyn VectorStore>>,
    chunker: Chunker,
    settings: RagSettings,
}

impl RagEngine {
    /// 엔진 생성 (설정은 여기서 검증)
    pub fn new(
        router: Arc<Router>,
        documents: Arc<dyn DocumentStore>,
        primary: Arc<dyn VectorStore>,
        settings: RagSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let chunker = Chunker::from_settings(&settings)?;

        Ok(Self {
            router,
            documents,
            primary,
            secondary: None,
            chunker,
            settings,
        })
    }

    /// 두 번째 벡터 저장소 추가
    ///
    /// 수집/삭제는 항상 두 저장소 모두에 적용되고,
    /// 검색 병합은 `hybrid_search`가 켜져 있을 때만 합니다.
    pub fn with_secondary_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.secondary = Some(store);
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    fn stores(&self) -> impl Iterator<Item = &Arc<dyn VectorStore>> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// 문서 수집
    pub async fn ingest_document(&self, document: NewDocument) -> Result<IngestResult> {
        self.ingest_document_with_cancel(document, &CancellationToken::new())
            .await
    }

    /// 문서 수집 (취소 가능)
    ///
    /// 임베딩이나 저장 중 하나라도 실패하면 문서 레코드와 청크를 모두 지웁니다.
    pub async fn ingest_document_with_cancel(
        &self,
        document: NewDocument,
        cancel: &CancellationToken,
    ) -> Result<IngestResult> {
        let id = match document.id.clone() {
            Some(id) if id.trim().is_empty() => {
                return Err(RagError::InvalidRequest("document id is empty".to_string()));
            }
            Some(id) => id,
            None => generate_document_id(),
        };

        let document = document.into_document(id);
        // 같은 ID면 여기서 InvalidRequest (기존 문서는 건드리지 않음)
        self.documents.save_document(&document).await?;

        match self.index_document(&document, cancel).await {
            Ok(chunks_created) => {
                tracing::info!(
                    "Ingested document: {} (id={}, chunks={})",
                    document.title,
                    document.id,
                    chunks_created
                );
                Ok(IngestResult {
                    document_id: document.id,
                    chunks_created,
                })
            }
            Err(e) => {
                tracing::warn!("Ingestion of {} failed, rolling back: {}", document.id, e);
                if let Err(cleanup) = self.documents.delete_document(&document.id).await {
                    tracing::warn!("Failed to remove document record {}: {}", document.id, cleanup);
                }
                Err(e)
            }
        }
    }

    /// 청킹 → 임베딩 → 저장
    async fn index_document(&self, document: &Document, cancel: &CancellationToken) -> Result<usize> {
        let chunks = self.embed_chunks(document, cancel).await?;
        if chunks.is_empty() {
            tracing::warn!("No chunks generated for document: {}", document.id);
            return Ok(0);
        }

        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }

        self.write_chunk_set(&chunks).await?;

        if let Err(e) = self.store_document_embedding(document, &chunks).await {
            self.remove_chunk_set(&chunk_ids(&chunks)).await;
            return Err(e);
        }

        Ok(chunks.len())
    }

    /// 청크 임베딩 (순서 보존, 동시 실행 수 제한)
    ///
    /// 청크 인덱스는 호출 전에 정해지므로 완료 순서와 무관합니다.
    async fn embed_chunks(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredChunk>> {
        let texts = self.chunker.chunk(&document.content);
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // 재색인 시 기존 청크와 ID가 겹치지 않도록 세대 구분자를 붙임
        let generation = short_id();

        let chunks: Vec<StoredChunk> = stream::iter(texts.into_iter().enumerate())
            .map(|(index, content)| {
                let id = format!("{}-chunk-{}-{}", document.id, index, generation);
                async move {
                    let embedding = self.embed_text(&content, cancel).await?;
                    Ok::<_, RagError>(StoredChunk {
                        id,
                        document_id: document.id.clone(),
                        chunk_index: index,
                        content,
                        embedding,
                        metadata: chunk_metadata(document),
                    })
                }
            })
            .buffered(self.settings.ingest_concurrency)
            .try_collect()
            .await?;

        let expected = chunks[0].embedding.len();
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != expected) {
            return Err(RagError::EmbeddingDimensionMismatch {
                expected,
                actual: bad.embedding.len(),
            });
        }

        Ok(chunks)
    }

    async fn embed_text(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let request = EmbeddingRequest::new(text).with_cancel(cancel.clone());
        let response = self
            .router
            .create_embedding(&request, self.settings.embedding_strategy)
            .await?;
        Ok(response.embedding)
    }

    /// 청크 세트 저장 (문서 저장소 + 모든 벡터 저장소)
    ///
    /// 실패하면 이번에 쓴 세트를 지우고 에러를 반환합니다.
    async fn write_chunk_set(&self, chunks: &[StoredChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let entries: Vec<VectorEntry> = chunks.iter().map(to_vector_entry).collect();
        let result = async {
            self.documents.save_chunks(chunks).await?;
            for store in self.stores() {
                self.with_store_timeout(store.name(), store.upsert(&entries))
                    .await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.remove_chunk_set(&chunk_ids(chunks)).await;
            return Err(e);
        }
        Ok(())
    }

    /// 청크 세트 삭제 (정리용, 실패는 로그만)
    async fn remove_chunk_set(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }

        for store in self.stores() {
            if let Err(e) = self
                .with_store_timeout(store.name(), store.delete_by_ids(ids))
                .await
            {
                tracing::warn!("Failed to clean up {} vectors in {}: {}", ids.len(), store.name(), e);
            }
        }
        if let Err(e) = self.documents.delete_chunks(ids).await {
            tracing::warn!("Failed to clean up {} chunk rows: {}", ids.len(), e);
        }
    }

    /// 청크 세트 삭제 (실패 시 에러 전파)
    async fn delete_chunk_set(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        for store in self.stores() {
            self.with_store_timeout(store.name(), store.delete_by_ids(ids))
                .await?;
        }
        self.documents.delete_chunks(ids).await?;
        Ok(())
    }

    /// 문서 임베딩 (청크 임베딩 평균, 설정 시에만)
    async fn store_document_embedding(&self, document: &Document, chunks: &[StoredChunk]) -> Result<()> {
        if !self.settings.document_embeddings {
            return Ok(());
        }

        let embeddings: Vec<Vec<f32>> = chunks.iter().map(|c| c.embedding.clone()).collect();
        match mean_embedding(&embeddings) {
            Some(mean) => self.documents.save_document_embedding(&document.id, &mean).await,
            None => Ok(()),
        }
    }

    async fn with_store_timeout<T>(
        &self,
        backend: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.settings.store_timeout(), call)
            .await
            .unwrap_or_else(|_| {
                Err(RagError::StoreTimeout {
                    backend: backend.to_string(),
                })
            })
    }

    // ========================================================================
    // Retrieve
    // ========================================================================

    /// 의미 검색
    pub async fn retrieve(&self, query: &RagQuery) -> Result<Vec<RetrievalSource>> {
        let (sources, _) = self.retrieve_with_method(query).await?;
        Ok(sources)
    }

    async fn retrieve_with_method(
        &self,
        query: &RagQuery,
    ) -> Result<(Vec<RetrievalSource>, SearchMethod)> {
        let top_k = query.top_k.unwrap_or(self.settings.top_k);
        if top_k == 0 {
            return Err(RagError::InvalidRequest("top_k must be > 0".to_string()));
        }

        let embedding = self.embed_text(&query.query, &query.cancel).await?;

        let (batches, method) = tokio::select! {
            _ = query.cancel.cancelled() => return Err(RagError::Cancelled),
            result = self.search_stores(&embedding, top_k, &query.filters) => result?,
        };

        let sources = merge_sources(batches, top_k);
        tracing::debug!(
            "Retrieved {} sources for query ({:?}, top_k={})",
            sources.len(),
            method,
            top_k
        );
        Ok((sources, method))
    }

    async fn search_stores(
        &self,
        embedding: &[f32],
        top_k: usize,
        filters: &Metadata,
    ) -> Result<(Vec<Vec<RetrievalSource>>, SearchMethod)> {
        let secondary = match &self.secondary {
            Some(secondary) if self.settings.hybrid_search => secondary,
            _ => {
                let sources = self
                    .search_store(&self.primary, embedding, top_k, filters)
                    .await?;
                return Ok((vec![sources], SearchMethod::Vector));
            }
        };

        // 두 저장소는 같은 청크 세트를 갖고 있으므로 각각 top_k를 요청하고 병합에서 중복 제거
        let (primary, secondary_result) = tokio::join!(
            self.search_store(&self.primary, embedding, top_k, filters),
            self.search_store(secondary, embedding, top_k, filters),
        );

        let batches = match (primary, secondary_result) {
            (Ok(p), Ok(s)) => vec![p, s],
            // 차원 불일치는 데이터 무결성 문제이므로 항상 전파
            (Err(e @ RagError::EmbeddingDimensionMismatch { .. }), _)
            | (_, Err(e @ RagError::EmbeddingDimensionMismatch { .. })) => return Err(e),
            (Ok(p), Err(e)) => {
                tracing::warn!("{} search failed, using {} only: {}", secondary.name(), self.primary.name(), e);
                vec![p]
            }
            (Err(e), Ok(s)) => {
                tracing::warn!("{} search failed, using {} only: {}", self.primary.name(), secondary.name(), e);
                vec![s]
            }
            (Err(e), Err(_)) => return Err(e),
        };

        Ok((batches, SearchMethod::Hybrid))
    }

    async fn search_store(
        &self,
        store: &Arc<dyn VectorStore>,
        embedding: &[f32],
        top_k: usize,
        filters: &Metadata,
    ) -> Result<Vec<RetrievalSource>> {
        let options = SearchOptions::new(top_k, self.settings.similarity_threshold)
            .with_metric(self.settings.metric);
        let matches = self
            .with_store_timeout(store.name(), store.search(embedding, &options))
            .await?;

        Ok(matches
            .into_iter()
            .filter(|m| matches_filters(&m.metadata, filters))
            .map(|m| RetrievalSource::from_match(m, store.name()))
            .collect())
    }

    // ========================================================================
    // Generate
    // ========================================================================

    /// 검색 + 답변 생성
    ///
    /// 검색 결과가 없어도 빈 컨텍스트로 답변을 만들고 신뢰도 0을 반환합니다.
    pub async fn generate_answer(&self, query: &RagQuery) -> Result<RagResult> {
        let (sources, search_method) = self.retrieve_with_method(query).await?;

        let messages = build_messages(&sources, &query.history, &query.query);
        let request = ChatRequest::new(messages)
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_answer_tokens)
            .with_cancel(query.cancel.clone());
        let strategy = query.strategy.unwrap_or(self.router.config().default_strategy);

        let response = self.router.create_chat_completion(&request, strategy).await?;
        let confidence = calculate_confidence(&sources);

        tracing::info!(
            "Answered with {} ({}, sources={}, confidence={:.1})",
            response.model,
            response.provider,
            sources.len(),
            confidence
        );

        Ok(RagResult {
            answer: response.content,
            metadata: RagMetadata {
                model: response.model,
                provider: response.provider,
                sources_count: sources.len(),
                search_method,
                timestamp: Utc::now(),
                cost: response.cost,
            },
            sources,
            confidence,
        })
    }

    // ========================================================================
    // Reindex / Delete
    // ========================================================================

    /// 재색인
    ///
    /// 새 청크 세트를 먼저 완성한 뒤 기존 세트를 지웁니다.
    /// 어느 단계에서 실패하든 기존 세트는 검색 가능한 상태로 남습니다.
    pub async fn reindex(&self, document_id: &str) -> Result<IngestResult> {
        let document = self
            .documents
            .get_document(document_id)
            .await?
            .ok_or_else(|| RagError::DocumentNotFound {
                id: document_id.to_string(),
            })?;
        let old_chunks = self.documents.list_chunks(document_id).await?;

        let cancel = CancellationToken::new();
        let new_chunks = self.embed_chunks(&document, &cancel).await?;
        self.write_chunk_set(&new_chunks).await?;

        if let Err(e) = self.delete_chunk_set(&chunk_ids(&old_chunks)).await {
            tracing::warn!("Reindex of {} failed, restoring previous chunks: {}", document_id, e);
            self.restore_chunk_set(&old_chunks).await;
            self.remove_chunk_set(&chunk_ids(&new_chunks)).await;
            return Err(e);
        }

        if let Err(e) = self.store_document_embedding(&document, &new_chunks).await {
            tracing::warn!("Failed to update document embedding for {}: {}", document_id, e);
        }

        tracing::info!(
            "Reindexed document: {} (chunks: {} -> {})",
            document_id,
            old_chunks.len(),
            new_chunks.len()
        );

        Ok(IngestResult {
            document_id: document.id,
            chunks_created: new_chunks.len(),
        })
    }

    /// 기존 청크 세트 복구 (저장된 임베딩 재사용)
    async fn restore_chunk_set(&self, chunks: &[StoredChunk]) {
        if chunks.is_empty() {
            return;
        }

        let entries: Vec<VectorEntry> = chunks.iter().map(to_vector_entry).collect();
        for store in self.stores() {
            if let Err(e) = self
                .with_store_timeout(store.name(), store.upsert(&entries))
                .await
            {
                tracing::error!("Failed to restore vectors in {}: {}", store.name(), e);
            }
        }
        if let Err(e) = self.documents.save_chunks(chunks).await {
            tracing::error!("Failed to restore chunk rows: {}", e);
        }
    }

    /// 문서 삭제 (모든 저장소의 벡터, 청크, 문서 레코드)
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let chunks = self.documents.list_chunks(document_id).await?;
        self.delete_chunk_set(&chunk_ids(&chunks)).await?;
        self.documents.delete_chunks_for_document(document_id).await?;

        let deleted = self.documents.delete_document(document_id).await?;
        if deleted {
            tracing::info!("Deleted document: {} (chunks={})", document_id, chunks.len());
        }
        Ok(deleted)
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        self.documents.get_document(document_id).await
    }

    pub async fn list_documents(&self, limit: usize) -> Result<Vec<Document>> {
        self.documents.list_documents(limit).await
    }

    // ========================================================================
    // Evaluate / Stats
    // ========================================================================

    /// 평가 (케이스 순서대로 실행)
    ///
    /// 기대 답변이 생성된 답변에 대소문자 무시 부분 문자열로 포함되면 통과입니다.
    pub async fn evaluate(&self, cases: &[EvaluationCase]) -> Result<EvaluationReport> {
        let mut results = Vec::with_capacity(cases.len());

        for case in cases {
            let result = self.generate_answer(&RagQuery::new(&case.query)).await?;
            let passed = result
                .answer
                .to_lowercase()
                .contains(&case.expected_answer.to_lowercase());

            results.push(CaseResult {
                query: case.query.clone(),
                passed,
                confidence: result.confidence,
                sources_count: result.sources.len(),
            });
        }

        if results.is_empty() {
            return Ok(EvaluationReport {
                accuracy: 0.0,
                avg_confidence: 0.0,
                avg_retrieval_count: 0.0,
                results,
            });
        }

        let n = results.len() as f32;
        let passed = results.iter().filter(|r| r.passed).count() as f32;
        Ok(EvaluationReport {
            accuracy: passed / n * 100.0,
            avg_confidence: results.iter().map(|r| r.confidence).sum::<f32>() / n,
            avg_retrieval_count: results.iter().map(|r| r.sources_count as f32).sum::<f32>() / n,
            results,
        })
    }

    /// 문서 수와 저장소별 벡터 수
    pub async fn stats(&self) -> Result<EngineStats> {
        let documents = self.documents.count_documents().await?;

        let mut stores = Vec::new();
        for store in self.stores() {
            let vectors = self
                .with_store_timeout(store.name(), store.count())
                .await?;
            stores.push(StoreCount {
                store: store.name().to_string(),
                vectors,
            });
        }

        Ok(EngineStats { documents, stores })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// `doc-{millis}-{8자리}` 형식 문서 ID
fn generate_document_id() -> String {
    format!("doc-{}-{}", Utc::now().timestamp_millis(), short_id())
}

fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// 청크 메타데이터 = 문서 메타데이터 + document_id, title
fn chunk_metadata(document: &Document) -> Metadata {
    let mut metadata = document.metadata.clone();
    metadata.insert(
        "document_id".to_string(),
        serde_json::Value::String(document.id.clone()),
    );
    metadata.insert(
        "title".to_string(),
        serde_json::Value::String(document.title.clone()),
    );
    metadata
}

fn to_vector_entry(chunk: &StoredChunk) -> VectorEntry {
    VectorEntry {
        id: chunk.id.clone(),
        document_id: chunk.document_id.clone(),
        chunk_index: chunk.chunk_index,
        content: chunk.content.clone(),
        embedding: chunk.embedding.clone(),
        metadata: chunk.metadata.clone(),
    }
}

fn chunk_ids(chunks: &[StoredChunk]) -> Vec<String> {
    chunks.iter().map(|c| c.id.clone()).collect()
}

// ============================================================================
// Tests
// ============================================================================
