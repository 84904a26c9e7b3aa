//! CLI 모듈
//!
//! ragroute CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;

use crate::config::{default_data_dir, Config};
use crate::knowledge::{
    DocumentStore, LanceVectorStore, NewDocument, SqliteDocumentStore, DEFAULT_TABLE_NAME,
};
use crate::llm::ProviderKind;
use crate::rag::{EvaluationCase, RagEngine, RagQuery, RetrievalSource};
use crate::router::{Router, Strategy, UsageSnapshot};

/// 하이브리드 검색용 두 번째 테이블
const MIRROR_TABLE_NAME: &str = "chunks_mirror";

/// 수집 대상 확장자
const TEXT_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "ragroute")]
#[command(version, about = "멀티 프로바이더 LLM 라우터 + RAG", long_about = None)]
pub struct Cli {
    /// 설정 파일 (TOML). 없으면 <data_dir>/config.toml 또는 기본값
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트, 파일, 또는 폴더를 지식베이스에 추가
    Ingest {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 수집할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀, .md/.txt)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 문서 제목 (--text 전용)
        #[arg(long)]
        title: Option<String>,

        /// 문서 ID (--text 전용, 없으면 생성)
        #[arg(long)]
        id: Option<String>,

        /// 태그 (여러 번 지정 가능)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// 질문하고 답변 받기
    Ask {
        /// 질문
        query: String,

        /// 검색할 출처 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 채팅 전략 (cost, balanced, performance)
        #[arg(short, long)]
        strategy: Option<Strategy>,
    },

    /// 지식베이스 검색 (답변 생성 없이)
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// 문서 재색인
    Reindex {
        /// 문서 ID
        id: String,
    },

    /// 문서 삭제 (벡터, 청크 포함)
    Delete {
        /// 문서 ID
        id: String,
    },

    /// 저장된 문서 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 평가 케이스 실행 (JSON 배열: [{"query", "expected_answer"}])
    Eval {
        /// 케이스 파일
        cases: PathBuf,
    },

    /// 상태 확인
    Status {
        /// 프로바이더 헬스 체크 실행 (API 호출 발생)
        #[arg(long)]
        check: bool,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            text,
            file,
            dir,
            title,
            id,
            tags,
        } => cmd_ingest(&config, text, file, dir, title, id, tags).await,
        Commands::Ask {
            query,
            top_k,
            strategy,
        } => cmd_ask(&config, &query, top_k, strategy).await,
        Commands::Search { query, limit } => cmd_search(&config, &query, limit).await,
        Commands::Reindex { id } => cmd_reindex(&config, &id).await,
        Commands::Delete { id } => cmd_delete(&config, &id).await,
        Commands::List { limit } => cmd_list(&config, limit).await,
        Commands::Eval { cases } => cmd_eval(&config, &cases).await,
        Commands::Status { check } => cmd_status(&config, check).await,
    }
}

/// 설정 로드 + 환경변수 API 키 적용
fn load_config(path: Option<&Path>) -> Result<Config> {
    let default_path = default_data_dir().join("config.toml");

    let mut config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("설정 파일 로드 실패: {}", path.display()))?,
        None if default_path.exists() => Config::load(&default_path)
            .with_context(|| format!("설정 파일 로드 실패: {}", default_path.display()))?,
        None => Config::default(),
    };

    config.apply_env_keys();
    Ok(config)
}

/// 라우터 + 저장소로 엔진 구성
async fn open_engine(config: &Config) -> Result<(RagEngine, Arc<Router>)> {
    let router = Arc::new(Router::from_config(config).context(
        "라우터 초기화 실패\n\n\
         API 키 설정 방법:\n  \
         export GEMINI_API_KEY=your-api-key\n  \
         export OPENAI_API_KEY=your-api-key\n  \
         export ANTHROPIC_API_KEY=your-api-key",
    )?);

    let dimension = router
        .embedding_dimension(config.rag.embedding_strategy)
        .ok_or_else(|| anyhow!("임베딩을 지원하는 프로바이더가 없습니다 (Gemini 또는 OpenAI 키 필요)"))?;

    let data_dir = &config.storage.data_dir;
    std::fs::create_dir_all(data_dir).context("데이터 디렉토리 생성 실패")?;

    let documents = Arc::new(
        SqliteDocumentStore::open(&data_dir.join("documents.db")).context("문서 저장소 열기 실패")?,
    );
    let lance_path = data_dir.join("vectors.lance");
    let vectors = Arc::new(
        LanceVectorStore::open_table(&lance_path, DEFAULT_TABLE_NAME, dimension)
            .await
            .context("벡터 저장소 열기 실패")?,
    );

    let mut engine = RagEngine::new(router.clone(), documents, vectors, config.rag.clone())
        .context("RAG 엔진 초기화 실패")?;

    if config.rag.hybrid_search {
        let mirror = LanceVectorStore::open_table(&lance_path, MIRROR_TABLE_NAME, dimension)
            .await
            .context("보조 벡터 저장소 열기 실패")?;
        engine = engine.with_secondary_store(Arc::new(mirror));
    }

    Ok((engine, router))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(
    config: &Config,
    text: Option<String>,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    title: Option<String>,
    id: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let documents = if let Some(text) = text {
        let mut doc = NewDocument::new(title.unwrap_or_else(|| "direct-input".to_string()), text)
            .with_tags(tags);
        doc.id = id;
        vec![doc]
    } else if let Some(ref path) = file {
        vec![read_document(path, &tags)?]
    } else if let Some(ref dir) = dir {
        collect_directory(dir, &tags)?
    } else {
        bail!("--text, --file, --dir 중 하나를 지정해야 합니다");
    };

    if documents.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    let (engine, router) = open_engine(config).await?;

    let total = documents.len();
    let mut success_count = 0;
    let mut error_count = 0;

    for (i, doc) in documents.into_iter().enumerate() {
        print!("[{}/{}] {}... ", i + 1, total, doc.title);

        match engine.ingest_document(doc).await {
            Ok(result) => {
                println!("완료 (ID: {}, 청크: {})", result.document_id, result.chunks_created);
                success_count += 1;
            }
            Err(e) => {
                println!("실패: {}", e);
                error_count += 1;
            }
        }
    }

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", success_count, error_count);
    print_usage(&router.usage_stats());

    Ok(())
}

/// 파일 하나를 문서로 읽기
fn read_document(path: &Path, tags: &[String]) -> Result<NewDocument> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("파일 읽기 실패: {}", path.display()))?;
    let title = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    let mut doc = NewDocument::new(title, content)
        .with_tags(tags.to_vec())
        .with_metadata("source", serde_json::Value::String(path.display().to_string()));
    doc.content_type = Some(content_type_for(path).to_string());
    Ok(doc)
}

/// 폴더 재귀 수집 (.md/.txt, 경로 순)
fn collect_directory(dir: &Path, tags: &[String]) -> Result<Vec<NewDocument>> {
    if !dir.is_dir() {
        bail!("폴더가 아닙니다: {}", dir.display());
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_text_file(p))
        .collect();
    paths.sort();

    paths.iter().map(|p| read_document(p, tags)).collect()
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown") => {
            "text/markdown"
        }
        _ => "text/plain",
    }
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    strategy: Option<Strategy>,
) -> Result<()> {
    let (engine, router) = open_engine(config).await?;

    let mut rag_query = RagQuery::new(query);
    rag_query.top_k = top_k;
    rag_query.strategy = strategy;

    println!("[*] 질문: \"{}\"", query);
    let result = engine
        .generate_answer(&rag_query)
        .await
        .context("답변 생성 실패")?;

    println!();
    println!("{}", result.answer);
    println!();
    println!(
        "[*] {} / {} | 신뢰도: {:.1} | 출처: {} ({:?})",
        result.metadata.provider,
        result.metadata.model,
        result.confidence,
        result.metadata.sources_count,
        result.metadata.search_method
    );
    print_sources(&result.sources);
    print_usage(&router.usage_stats());

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(config: &Config, query: &str, limit: usize) -> Result<()> {
    let (engine, router) = open_engine(config).await?;

    println!("[*] 검색 중: \"{}\"", query);
    let sources = engine
        .retrieve(&RagQuery::new(query).with_top_k(limit))
        .await
        .context("검색 실패")?;

    if sources.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
    } else {
        println!("\n[OK] 검색 결과 ({} 건):", sources.len());
        print_sources(&sources);
    }
    print_usage(&router.usage_stats());

    Ok(())
}

/// 재색인 명령어 (reindex)
async fn cmd_reindex(config: &Config, id: &str) -> Result<()> {
    let (engine, router) = open_engine(config).await?;

    let result = engine.reindex(id).await.context("재색인 실패")?;
    println!(
        "[OK] 문서 {} 재색인 완료 (청크: {})",
        result.document_id, result.chunks_created
    );
    print_usage(&router.usage_stats());

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(config: &Config, id: &str) -> Result<()> {
    let (engine, _) = open_engine(config).await?;

    if engine.delete_document(id).await.context("문서 삭제 실패")? {
        println!("[OK] 문서 {} 삭제됨", id);
    } else {
        println!("[!] 삭제할 문서를 찾을 수 없습니다: {}", id);
    }

    Ok(())
}

/// 목록 명령어 (list)
///
/// 문서 저장소만 열기 때문에 API 키가 필요 없습니다.
async fn cmd_list(config: &Config, limit: usize) -> Result<()> {
    let db_path = config.storage.data_dir.join("documents.db");
    if !db_path.exists() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    let store = SqliteDocumentStore::open(&db_path).context("문서 저장소 열기 실패")?;
    let docs = store
        .list_documents(limit)
        .await
        .context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        let tags = if doc.tags.is_empty() {
            "-".to_string()
        } else {
            doc.tags.join(",")
        };

        println!("  {} [{}] {}", doc.id, tags, truncate_text(&doc.title, 40));
        println!(
            "        {} | {} | {} chars",
            doc.created_at.format("%Y-%m-%d %H:%M"),
            doc.content_type,
            doc.content.chars().count()
        );
        println!();
    }

    Ok(())
}

/// 평가 명령어 (eval)
async fn cmd_eval(config: &Config, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("케이스 파일 읽기 실패: {}", path.display()))?;
    let cases: Vec<EvaluationCase> =
        serde_json::from_str(&raw).context("케이스 파일 파싱 실패")?;

    let (engine, router) = open_engine(config).await?;
    let report = engine.evaluate(&cases).await.context("평가 실패")?;

    for (i, result) in report.results.iter().enumerate() {
        println!(
            "{}. [{}] {} (신뢰도: {:.1}, 출처: {})",
            i + 1,
            if result.passed { "PASS" } else { "FAIL" },
            truncate_text(&result.query, 60),
            result.confidence,
            result.sources_count
        );
    }

    println!();
    println!("[OK] 정확도: {:.1}%", report.accuracy);
    println!("     평균 신뢰도: {:.1}", report.avg_confidence);
    println!("     평균 출처 수: {:.2}", report.avg_retrieval_count);
    print_usage(&router.usage_stats());

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &Config, check: bool) -> Result<()> {
    println!("ragroute v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.storage.data_dir.display());

    for kind in ProviderKind::ALL {
        if config.providers.api_key(kind).is_some() {
            println!("[OK] {} API 키: 설정됨", kind);
        } else {
            println!("[!] {} API 키: 미설정", kind);
        }
    }
    println!(
        "[*] 전략: 임베딩 {}, 채팅 {} | 하이브리드 검색: {}",
        config.rag.embedding_strategy,
        config.router.strategy,
        if config.rag.hybrid_search { "on" } else { "off" }
    );

    let (engine, router) = match open_engine(config).await {
        Ok(opened) => opened,
        Err(e) => {
            tracing::debug!("엔진 초기화 실패: {:#}", e);
            println!("[!] 엔진을 초기화할 수 없습니다 (API 키를 확인하세요)");
            return Ok(());
        }
    };

    match engine.stats().await {
        Ok(stats) => {
            println!("[OK] 저장된 문서: {} 건", stats.documents);
            for store in stats.stores {
                println!("     {}: {} 청크", store.store, store.vectors);
            }
        }
        Err(e) => println!("[!] 통계 조회 실패: {}", e),
    }

    if check {
        println!();
        for health in router.health_status().await {
            let mark = if health.healthy { "OK" } else { "!" };
            println!("[{}] {} ({} ms)", mark, health.provider, health.latency_ms);
        }
        print_usage(&router.usage_stats());
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_sources(sources: &[RetrievalSource]) {
    for (i, source) in sources.iter().enumerate() {
        println!();
        println!(
            "  [Source {}] [점수: {:.4}] {} ({})",
            i + 1,
            source.score,
            source.document_id,
            source.store
        );
        if let Some(title) = source.metadata.get("title").and_then(|t| t.as_str()) {
            println!("     제목: {}", title);
        }
        println!("     내용: {}", truncate_text(&source.content, 200));
    }
}

/// 라우팅 사용량 출력 (요청, 토큰, 비용)
fn print_usage(usage: &UsageSnapshot) {
    if usage.total_attempts() == 0 {
        return;
    }

    println!();
    println!(
        "[*] 사용량: 요청 {} (시도 {}), 토큰 {}, 비용 ${:.6}",
        usage.total_requests(),
        usage.total_attempts(),
        usage.total_tokens(),
        usage.total_cost()
    );
    for (kind, provider) in &usage.providers {
        println!(
            "     {}: 성공 {} / 실패 {}, 토큰 {}, ${:.6}",
            kind, provider.successes, provider.failures, provider.total_tokens, provider.cost
        );
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
