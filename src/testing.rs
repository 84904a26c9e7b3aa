//! 테스트 더블 - 스크립트 프로바이더와 장애 주입 벡터 저장소

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::knowledge::{InMemoryVectorStore, SearchOptions, VectorEntry, VectorMatch, VectorStore};
use crate::llm::{
    compute_cost, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, FinishReason,
    LlmProvider, Message, Operation, ProviderKind, TokenUsage,
};

// ============================================================================
// ScriptedProvider
// ============================================================================

/// 네트워크 없이 동작하는 프로바이더
///
/// 임베딩은 소문자 단어 해시(bag-of-words)를 정규화한 벡터라서
/// 단어를 많이 공유하는 텍스트끼리 코사인 유사도가 높습니다.
pub struct ScriptedProvider {
    kind: ProviderKind,
    calls: AtomicUsize,
    fail_first: usize,
    fail_after: Option<usize>,
    delay: Option<Duration>,
    reply: Option<String>,
    last_messages: Mutex<Vec<Message>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            calls: AtomicUsize::new(0),
            fail_first: 0,
            fail_after: None,
            delay: None,
            reply: None,
            last_messages: Mutex::new(Vec::new()),
        }
    }

    /// 처음 n번 호출 실패
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// n번 성공한 뒤부터 계속 실패
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn always_failing(self) -> Self {
        self.failing_first(usize::MAX)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// 지금까지의 호출 수 (채팅 + 임베딩)
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 마지막 채팅 요청의 메시지
    pub fn last_messages(&self) -> Vec<Message> {
        self.last_messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    async fn begin_call(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = call < self.fail_first || self.fail_after.is_some_and(|n| call >= n);
        if failing {
            return Err(RagError::ProviderCall {
                provider: self.kind,
                status: Some(503),
                message: format!("scripted failure #{}", call + 1),
            });
        }
        Ok(())
    }
}

/// FNV-1a
fn token_hash(token: &str) -> u64 {
    token.bytes().fold(0xcbf29ce484222325u64, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

/// 단어 해시 기반 임베딩 (L2 정규화)
pub fn bag_of_words_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    let lowered = text.to_lowercase();
    for token in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        vector[(token_hash(token) % dimension as u64) as usize] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.begin_call().await?;

        if let Ok(mut last) = self.last_messages.lock() {
            *last = request.messages.clone();
        }

        let descriptor = self.descriptor();
        let model = request
            .model
            .clone()
            .or_else(|| descriptor.default_chat_model.map(str::to_string))
            .unwrap_or_default();
        let usage = TokenUsage::new(10, 5);
        let cost = compute_cost(descriptor.price(&model, Operation::Chat), &usage);

        Ok(ChatResponse {
            content: self
                .reply
                .clone()
                .unwrap_or_else(|| format!("scripted answer from {}", self.kind)),
            provider: self.kind,
            model,
            usage,
            cost,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        let descriptor = self.descriptor();
        let dimension = descriptor
            .embedding_dimension(request.model.as_deref())
            .ok_or(RagError::NoProvider {
                operation: Operation::Embedding.as_str(),
            })?;

        self.begin_call().await?;

        let model = request
            .model
            .clone()
            .or_else(|| descriptor.default_embedding_model.map(str::to_string))
            .unwrap_or_default();
        let usage = TokenUsage::new(10, 0);
        let cost = compute_cost(descriptor.price(&model, Operation::Embedding), &usage);

        Ok(EmbeddingResponse {
            embedding: bag_of_words_embedding(&request.text, dimension),
            provider: self.kind,
            model,
            usage,
            cost,
        })
    }
}

// ============================================================================
// FaultyVectorStore
// ============================================================================

/// 장애를 켜고 끌 수 있는 인메모리 벡터 저장소
pub struct FaultyVectorStore {
    inner: InMemoryVectorStore,
    fail_search: AtomicBool,
    fail_upsert: AtomicBool,
    fail_delete: AtomicBool,
    search_delay: Option<Duration>,
}

impl FaultyVectorStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: InMemoryVectorStore::new(name),
            fail_search: AtomicBool::new(false),
            fail_upsert: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            search_delay: None,
        }
    }

    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = Some(delay);
        self
    }

    pub fn set_fail_search(&self, fail: bool) {
        self.fail_search.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_upsert(&self, fail: bool) {
        self.fail_upsert.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.ids().await
    }

    fn injected(&self, operation: &str) -> RagError {
        RagError::store(self.inner.name(), format!("injected {} failure", operation))
    }
}

#[async_trait]
impl VectorStore for FaultyVectorStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(self.injected("upsert"));
        }
        self.inner.upsert(entries).await
    }

    async fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<VectorMatch>> {
        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(self.injected("search"));
        }
        self.inner.search(query, options).await
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(self.injected("delete"));
        }
        self.inner.delete_by_ids(ids).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}
