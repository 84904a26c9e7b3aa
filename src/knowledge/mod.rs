//! Knowledge 모듈 - 청킹, 문서 저장소, 벡터 저장소
//!
//! - Chunker: 문단 인식 텍스트 분할
//! - SQLite: 문서/청크 영속화
//! - LanceDB: 벡터 검색 (ANN)
//! - InMemory: brute-force 벡터 검색

mod chunker;
mod lance;
mod memory;
mod store;
mod vector;

// Re-exports
pub use chunker::{chunk_text, Chunker};
pub use lance::{LanceVectorStore, DEFAULT_TABLE_NAME};
pub use memory::InMemoryVectorStore;
pub use store::{
    Document, DocumentStore, NewDocument, SqliteDocumentStore, StoredChunk, DEFAULT_CONTENT_TYPE,
};
pub use vector::{
    check_dimensions, cosine_similarity, similarity, Metadata, Metric, SearchOptions, VectorEntry,
    VectorMatch, VectorStore,
};
