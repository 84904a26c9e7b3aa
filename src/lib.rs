//! ragroute - 멀티 프로바이더 LLM 라우터 + RAG 파이프라인
//!
//! Gemini / OpenAI / Anthropic을 하나의 인터페이스로 묶고
//! 비용/품질 전략에 따라 라우팅하며, 그 위에서 문서 수집·검색·답변 생성을 수행합니다.

pub mod cli;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod rag;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::{Config, ProvidersConfig, RagSettings, RouterSettings, StorageConfig};
pub use error::{RagError, Result};
pub use knowledge::{
    Chunker, Document, DocumentStore, InMemoryVectorStore, LanceVectorStore, Metric, NewDocument,
    SqliteDocumentStore, VectorStore,
};
pub use llm::{ChatRequest, EmbeddingRequest, LlmProvider, Message, ProviderKind};
pub use rag::{RagEngine, RagQuery, RagResult, RetrievalSource};
pub use router::{Router, RouterConfig, Strategy, UsageSnapshot};
