//! 설정 모듈
//!
//! 코어는 생성 시점에 하나의 `Config` 객체만 받습니다.
//! 환경변수 해석은 CLI(`apply_env_keys`)에서만 수행합니다.
//!
//! ```toml
//! [providers]
//! order = ["gemini", "openai", "anthropic"]
//!
//! [router]
//! strategy = "balanced"
//! max_retries = 2
//!
//! [rag]
//! chunk_size = 1000
//! chunk_overlap = 200
//! similarity_threshold = 0.7
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::knowledge::Metric;
use crate::llm::ProviderKind;
use crate::router::Strategy;

/// 기본 유사도 임계값 (출처 불명의 비즈니스 상수, 호환성 유지)
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

/// 기본 청크 크기 (문자 수)
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// 기본 청크 오버랩 (문자 수)
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

// ============================================================================
// Config
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub rag: RagSettings,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// 프로바이더 자격 증명 및 선호 순서
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    /// 선호 순서 (앞쪽이 우선)
    pub order: Vec<ProviderKind>,
    /// Gemini 무료 티어 분당 요청 제한 (0 = 비활성)
    pub gemini_rpm: u32,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            openai_api_key: None,
            anthropic_api_key: None,
            order: vec![ProviderKind::Gemini, ProviderKind::OpenAi, ProviderKind::Anthropic],
            gemini_rpm: 0,
        }
    }
}

impl ProvidersConfig {
    /// 프로바이더 API 키 (빈 문자열은 미설정으로 취급)
    pub fn api_key(&self, kind: ProviderKind) -> Option<&str> {
        let key = match kind {
            ProviderKind::Gemini => self.gemini_api_key.as_deref(),
            ProviderKind::OpenAi => self.openai_api_key.as_deref(),
            ProviderKind::Anthropic => self.anthropic_api_key.as_deref(),
        };
        key.map(str::trim).filter(|k| !k.is_empty())
    }
}

/// 라우터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// 호출자가 전략을 지정하지 않을 때 쓰는 채팅 전략
    pub strategy: Strategy,
    pub fallback_enabled: bool,
    /// 호출 하나당 전체 시도 횟수 (프로바이더별이 아님)
    pub max_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::Balanced,
            fallback_enabled: true,
            max_retries: 2,
            request_timeout_secs: 30,
        }
    }
}

/// RAG 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub similarity_threshold: f32,
    pub metric: Metric,
    pub top_k: usize,
    /// 두 벡터 저장소 결과를 병합
    pub hybrid_search: bool,
    /// 임베딩 전략 (수집/검색 공통, 차원 일관성 유지)
    pub embedding_strategy: Strategy,
    /// 수집 시 동시 임베딩 호출 수
    pub ingest_concurrency: usize,
    pub store_timeout_secs: u64,
    /// 청크 임베딩 평균으로 문서 임베딩 저장
    pub document_embeddings: bool,
    pub max_answer_tokens: u32,
    pub temperature: f32,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            metric: Metric::Cosine,
            top_k: 5,
            hybrid_search: false,
            embedding_strategy: Strategy::Cost,
            ingest_concurrency: 4,
            store_timeout_secs: 30,
            document_embeddings: false,
            max_answer_tokens: 1000,
            temperature: 0.7,
        }
    }
}

impl RagSettings {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Configuration("rag.chunk_size must be > 0".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Configuration(format!(
                "rag.chunk_overlap ({}) must be smaller than rag.chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::Configuration(format!(
                "rag.similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Configuration("rag.top_k must be > 0".to_string()));
        }
        if self.ingest_concurrency == 0 {
            return Err(RagError::Configuration(
                "rag.ingest_concurrency must be > 0".to_string(),
            ));
        }
        if self.store_timeout_secs == 0 {
            return Err(RagError::Configuration(
                "rag.store_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 저장 위치 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// 데이터 디렉토리 경로 (~/.ragroute/)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ragroute")
}

impl Config {
    /// TOML 파일에서 로드 후 검증
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to read config file {}", path.display()),
        })?;
        Self::from_toml_str(&raw)
    }

    /// TOML 문자열에서 파싱 후 검증
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// 환경변수에서 API 키 채우기 (CLI 전용)
    ///
    /// 우선순위: 설정 파일 > 환경변수.
    /// Gemini는 `GEMINI_API_KEY` > `GOOGLE_AI_API_KEY` 순서로 확인합니다.
    pub fn apply_env_keys(&mut self) {
        fn env_key(names: &[&str]) -> Option<String> {
            names
                .iter()
                .filter_map(|name| std::env::var(name).ok())
                .find(|v| !v.trim().is_empty())
        }

        if self.providers.api_key(ProviderKind::Gemini).is_none() {
            self.providers.gemini_api_key = env_key(&["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"]);
        }
        if self.providers.api_key(ProviderKind::OpenAi).is_none() {
            self.providers.openai_api_key = env_key(&["OPENAI_API_KEY"]);
        }
        if self.providers.api_key(ProviderKind::Anthropic).is_none() {
            self.providers.anthropic_api_key = env_key(&["ANTHROPIC_API_KEY"]);
        }
    }

    /// 설정 검증 (모든 생성자에서 즉시 호출)
    pub fn validate(&self) -> Result<()> {
        self.rag.validate()?;

        if self.router.max_retries == 0 {
            return Err(RagError::Configuration(
                "router.max_retries must be at least 1".to_string(),
            ));
        }
        if self.router.request_timeout_secs == 0 {
            return Err(RagError::Configuration(
                "router.request_timeout_secs must be > 0".to_string(),
            ));
        }

        let order = &self.providers.order;
        for (i, kind) in order.iter().enumerate() {
            if order[..i].contains(kind) {
                return Err(RagError::Configuration(format!(
                    "providers.order lists {} more than once",
                    kind
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rag.chunk_size, 1000);
        assert_eq!(config.rag.chunk_overlap, 200);
        assert_eq!(config.rag.similarity_threshold, 0.7);
        assert_eq!(config.router.max_retries, 2);
        assert_eq!(config.rag.embedding_strategy, Strategy::Cost);
    }

    #[test]
    fn test_from_toml_partial() {
        let raw = r#"
            [providers]
            openai_api_key = "sk-test"
            order = ["openai", "gemini"]

            [router]
            strategy = "performance"

            [rag]
            chunk_size = 500
            chunk_overlap = 50
            hybrid_search = true
        "#;

        let config = Config::from_toml_str(raw).unwrap();
        assert_eq!(config.providers.order, vec![ProviderKind::OpenAi, ProviderKind::Gemini]);
        assert_eq!(config.providers.api_key(ProviderKind::OpenAi), Some("sk-test"));
        assert_eq!(config.providers.api_key(ProviderKind::Gemini), None);
        assert_eq!(config.router.strategy, Strategy::Performance);
        assert_eq!(config.router.max_retries, 2);
        assert_eq!(config.rag.chunk_size, 500);
        assert!(config.rag.hybrid_search);
        assert_eq!(config.rag.top_k, 5);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let mut config = Config::default();
        config.rag.chunk_overlap = config.rag.chunk_size;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.router.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rag.similarity_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers.order = vec![ProviderKind::Gemini, ProviderKind::Gemini];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_overlap_fails_eagerly() {
        let raw = r#"
            [rag]
            chunk_size = 100
            chunk_overlap = 100
        "#;
        assert!(matches!(
            Config::from_toml_str(raw),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_blank_api_key_is_missing() {
        let mut providers = ProvidersConfig::default();
        providers.gemini_api_key = Some("   ".to_string());
        assert_eq!(providers.api_key(ProviderKind::Gemini), None);
    }
}
