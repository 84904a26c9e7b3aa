//! Document Store - 문서/청크 영속화
//!
//! `DocumentStore`는 코어가 요구하는 최소한의 영속화 인터페이스이고,
//! `SqliteDocumentStore`는 rusqlite 기반 기본 구현입니다.
//! 저장 위치: ~/.ragroute/documents.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::vector::Metadata;
use crate::error::{RagError, Result};

/// 기본 콘텐츠 타입
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

const BACKEND: &str = "sqlite";

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub content_type: String,
    pub tags: Vec<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// 새 문서 입력용 구조체
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDocument {
    /// 없으면 수집 시 생성
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    pub content_type: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

impl NewDocument {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// ID를 확정해 저장용 문서로 변환
    pub fn into_document(self, id: String) -> Document {
        Document {
            id,
            title: self.title,
            content: self.content,
            content_type: self
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            tags: self.tags,
            metadata: self.metadata,
            created_at: Utc::now(),
        }
    }
}

/// 저장된 청크
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    /// 소유 문서 ID (비소유 참조)
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

// ============================================================================
// DocumentStore Trait
// ============================================================================

/// 문서/청크 영속화 인터페이스
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 새 문서 저장
    ///
    /// 같은 ID가 이미 있으면 `InvalidRequest`를 반환하고 기존 레코드는 그대로 둡니다.
    async fn save_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// 최신순 문서 목록
    async fn list_documents(&self, limit: usize) -> Result<Vec<Document>>;

    /// 문서 레코드 삭제 (청크는 별도)
    async fn delete_document(&self, id: &str) -> Result<bool>;

    async fn count_documents(&self) -> Result<usize>;

    /// 청크 저장 (같은 ID는 교체)
    async fn save_chunk(&self, chunk: &StoredChunk) -> Result<()>;

    /// 청크 배치 저장 (기본 구현: 순차 호출)
    async fn save_chunks(&self, chunks: &[StoredChunk]) -> Result<()> {
        for chunk in chunks {
            self.save_chunk(chunk).await?;
        }
        Ok(())
    }

    /// 문서의 청크 목록 (인덱스 순)
    async fn list_chunks(&self, document_id: &str) -> Result<Vec<StoredChunk>>;

    /// ID 목록으로 청크 삭제
    async fn delete_chunks(&self, ids: &[String]) -> Result<usize>;

    /// 문서의 모든 청크 삭제
    async fn delete_chunks_for_document(&self, document_id: &str) -> Result<usize>;

    /// 문서 단위 임베딩 저장 (지원하지 않는 저장소는 무시)
    async fn save_document_embedding(&self, _document_id: &str, _embedding: &[f32]) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// SqliteDocumentStore
// ============================================================================

/// SQLite 기반 문서 저장소
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl SqliteDocumentStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                    source: e,
                    context: "Failed to create database directory".to_string(),
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// 인메모리 DB (테스트/임시 사용)
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RagError::store(BACKEND, format!("Lock error: {}", e)))?;
        f(&conn)
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS documents (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    content TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    tags TEXT NOT NULL DEFAULT '[]',
                    metadata TEXT NOT NULL DEFAULT '{}',
                    embedding TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS document_chunks (
                    id TEXT PRIMARY KEY,
                    document_id TEXT NOT NULL,
                    chunk_index INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    embedding TEXT NOT NULL,
                    metadata TEXT NOT NULL DEFAULT '{}'
                );

                CREATE INDEX IF NOT EXISTS idx_chunks_document
                    ON document_chunks(document_id, chunk_index);
                "#,
            )?;
            Ok(())
        })?;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }
}

type DocumentRow = (String, String, String, String, String, String, String);
type ChunkRow = (String, String, i64, String, String, String);

const DOCUMENT_COLUMNS: &str = "id, title, content, content_type, tags, metadata, created_at";

fn read_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn parse_document(row: DocumentRow) -> Result<Document> {
    let (id, title, content, content_type, tags, metadata, created_at) = row;
    Ok(Document {
        tags: serde_json::from_str(&tags).map_err(|e| RagError::json("Invalid document tags", e))?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| RagError::json("Invalid document metadata", e))?,
        created_at: parse_datetime(&created_at),
        id,
        title,
        content,
        content_type,
    })
}

fn parse_chunk(row: ChunkRow) -> Result<StoredChunk> {
    let (id, document_id, chunk_index, content, embedding, metadata) = row;
    Ok(StoredChunk {
        embedding: serde_json::from_str(&embedding)
            .map_err(|e| RagError::json("Invalid chunk embedding", e))?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| RagError::json("Invalid chunk metadata", e))?,
        chunk_index: chunk_index.max(0) as usize,
        id,
        document_id,
        content,
    })
}

fn to_json<T: Serialize + ?Sized>(value: &T, context: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| RagError::json(context, e))
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn save_document(&self, document: &Document) -> Result<()> {
        let tags = to_json(&document.tags, "Failed to serialize tags")?;
        let metadata = to_json(&document.metadata, "Failed to serialize metadata")?;

        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO documents
                    (id, title, content, content_type, tags, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    document.id,
                    document.title,
                    document.content,
                    document.content_type,
                    tags,
                    metadata,
                    document.created_at.to_rfc3339(),
                ],
            );

            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(RagError::InvalidRequest(format!(
                        "document {} already exists (use reindex)",
                        document.id
                    )))
                }
                Err(e) => Err(e.into()),
            }
        })?;

        tracing::debug!("Saved document: {} ({})", document.title, document.id);
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS);
            Ok(conn
                .query_row(&sql, params![id], read_document_row)
                .optional()?)
        })?;

        row.map(parse_document).transpose()
    }

    async fn list_documents(&self, limit: usize) -> Result<Vec<Document>> {
        let rows = self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM documents ORDER BY created_at DESC, id LIMIT ?1",
                DOCUMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![limit as i64], read_document_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(parse_document).collect()
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let rows = self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?)
        })?;
        Ok(rows > 0)
    }

    async fn count_documents(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    async fn save_chunk(&self, chunk: &StoredChunk) -> Result<()> {
        self.save_chunks(std::slice::from_ref(chunk)).await
    }

    /// 단일 트랜잭션으로 저장 (전부 또는 전무)
    async fn save_chunks(&self, chunks: &[StoredChunk]) -> Result<()> {
        let encoded = chunks
            .iter()
            .map(|c| {
                Ok((
                    to_json(&c.embedding, "Failed to serialize chunk embedding")?,
                    to_json(&c.metadata, "Failed to serialize chunk metadata")?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO document_chunks
                        (id, document_id, chunk_index, content, embedding, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (chunk, (embedding, metadata)) in chunks.iter().zip(encoded.iter()) {
                    stmt.execute(params![
                        chunk.id,
                        chunk.document_id,
                        chunk.chunk_index as i64,
                        chunk.content,
                        embedding,
                        metadata,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<StoredChunk>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, document_id, chunk_index, content, embedding, metadata
                 FROM document_chunks WHERE document_id = ?1
                 ORDER BY chunk_index",
            )?;
            let rows = stmt
                .query_map(params![document_id], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<ChunkRow>>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(parse_chunk).collect()
    }

    async fn delete_chunks(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut deleted = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM document_chunks WHERE id = ?1")?;
                for id in ids {
                    deleted += stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(deleted)
        })
    }

    async fn delete_chunks_for_document(&self, document_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM document_chunks WHERE document_id = ?1",
                params![document_id],
            )?)
        })
    }

    async fn save_document_embedding(&self, document_id: &str, embedding: &[f32]) -> Result<()> {
        let encoded = to_json(embedding, "Failed to serialize document embedding")?;
        let rows = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE documents SET embedding = ?1 WHERE id = ?2",
                params![encoded, document_id],
            )?)
        })?;

        if rows == 0 {
            return Err(RagError::DocumentNotFound {
                id: document_id.to_string(),
            });
        }
        Ok(())
    }
}

impl SqliteDocumentStore {
    /// 저장된 문서 단위 임베딩 조회
    pub fn document_embedding(&self, document_id: &str) -> Result<Option<Vec<f32>>> {
        let raw: Option<Option<String>> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT embedding FROM documents WHERE id = ?1",
                    params![document_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        raw.flatten()
            .map(|s| serde_json::from_str(&s).map_err(|e| RagError::json("Invalid document embedding", e)))
            .transpose()
    }
}

// ============================================================================
// Tests
// ============================================================================
