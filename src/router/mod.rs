//! 라우터 모듈 - 전략 기반 프로바이더 선택, 재시도, 폴백
//!
//! 선택은 (전략, 작업, 프롬프트 길이, 요청 모델)의 결정적 함수입니다.
//! 실행은 호출 하나당 `max_retries`회까지 시도하며,
//! 폴백이 켜져 있으면 실패할 때마다 다음 선호 프로바이더로 넘어갑니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let router = Router::from_config(&config)?;
//! let request = ChatRequest::new(vec![Message::user("Hello")]);
//! let response = router.create_chat_completion(&request, Strategy::Balanced).await?;
//! ```

pub mod stats;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ProvidersConfig, RouterSettings};
use crate::error::{RagError, Result};
use crate::llm::{
    AnthropicProvider, Billed, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse,
    GeminiProvider, LlmProvider, OpenAiProvider, Operation, ProviderHealth, ProviderKind,
};

pub use stats::{ProviderUsage, UsageSnapshot, UsageStats};

/// balanced 전략의 채팅 프롬프트 길이 경계 (문자 수, 이상이면 품질 우선)
pub const BALANCED_PROMPT_THRESHOLD: usize = 1000;

// ============================================================================
// Strategy / Selection
// ============================================================================

/// 프로바이더 선택 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// 항상 최저가
    Cost,
    /// 임베딩은 최저가, 채팅은 프롬프트 길이에 따라
    #[default]
    Balanced,
    /// 항상 최고 품질
    Performance,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Cost => "cost",
            Strategy::Balanced => "balanced",
            Strategy::Performance => "performance",
        })
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cost" => Ok(Strategy::Cost),
            "balanced" => Ok(Strategy::Balanced),
            "performance" => Ok(Strategy::Performance),
            other => Err(format!(
                "unknown strategy '{}' (expected cost, balanced or performance)",
                other
            )),
        }
    }
}

/// 선택 결과
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub provider: ProviderKind,
    /// 모델 지정 (없으면 어댑터 기본 모델)
    pub model: Option<String>,
}

/// 프로바이더 선택 (순수 함수)
///
/// `available`은 선호 순서대로 정렬되어 있어야 합니다.
pub fn select_provider(
    available: &[ProviderKind],
    operation: Operation,
    strategy: Strategy,
    prompt_chars: usize,
    requested_model: Option<&str>,
) -> Option<Selection> {
    let capable: Vec<ProviderKind> = available
        .iter()
        .copied()
        .filter(|k| k.descriptor().supports(operation))
        .collect();

    // 1. 테이블에 있는 모델을 요청하면 해당 프로바이더 고정
    if let Some(model) = requested_model {
        if let Some(kind) = capable.iter().find(|k| k.descriptor().owns_model(model)) {
            return Some(Selection {
                provider: *kind,
                model: Some(model.to_string()),
            });
        }
    }

    let cheapest = || {
        capable
            .iter()
            .copied()
            .filter_map(|k| k.descriptor().default_unit_price(operation).map(|p| (k, p)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, _)| k)
    };
    let best = || capable.iter().copied().max_by_key(|k| k.descriptor().quality_rank);

    let (provider, model) = match (strategy, operation) {
        (Strategy::Cost, _) | (Strategy::Balanced, Operation::Embedding) => (cheapest()?, None),
        (Strategy::Performance, Operation::Chat) => {
            let kind = best()?;
            (kind, kind.descriptor().flagship_chat_model.map(str::to_string))
        }
        (Strategy::Performance, Operation::Embedding) => (best()?, None),
        (Strategy::Balanced, Operation::Chat) => {
            if prompt_chars < BALANCED_PROMPT_THRESHOLD {
                (cheapest()?, None)
            } else {
                (best()?, None)
            }
        }
    };

    Some(Selection {
        provider,
        // 테이블에 없는 모델은 선택된 프로바이더로 그대로 전달
        model: requested_model.map(str::to_string).or(model),
    })
}

// ============================================================================
// RouterConfig
// ============================================================================

/// 라우터 설정
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// 선호 순서
    pub order: Vec<ProviderKind>,
    pub default_strategy: Strategy,
    pub fallback_enabled: bool,
    /// 호출 하나당 전체 시도 횟수
    pub max_retries: u32,
    /// 시도 하나당 타임아웃
    pub request_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::from_settings(&ProvidersConfig::default(), &RouterSettings::default())
    }
}

impl RouterConfig {
    pub fn from_settings(providers: &ProvidersConfig, router: &RouterSettings) -> Self {
        Self {
            order: providers.order.clone(),
            default_strategy: router.strategy,
            fallback_enabled: router.fallback_enabled,
            max_retries: router.max_retries,
            request_timeout: Duration::from_secs(router.request_timeout_secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(RagError::Configuration(
                "router max_retries must be at least 1".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(RagError::Configuration(
                "router request timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Router
// ============================================================================

/// 멀티 프로바이더 라우터
pub struct Router {
    /// 선호 순서로 정렬된 어댑터
    providers: Vec<Arc<dyn LlmProvider>>,
    config: RouterConfig,
    stats: UsageStats,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("providers", &self.available())
            .field("config", &self.config)
            .finish()
    }
}

impl Router {
    /// 어댑터 목록으로 라우터 생성
    ///
    /// 어댑터는 `config.order` 순서로 정렬되고, 순서에 없는 어댑터는 뒤에 붙습니다.
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, config: RouterConfig) -> Result<Self> {
        config.validate()?;

        if providers.is_empty() {
            return Err(RagError::Configuration(
                "at least one provider must be configured".to_string(),
            ));
        }
        for (i, provider) in providers.iter().enumerate() {
            if providers[..i].iter().any(|p| p.kind() == provider.kind()) {
                return Err(RagError::Configuration(format!(
                    "provider {} configured more than once",
                    provider.kind()
                )));
            }
        }

        let mut providers = providers;
        providers.sort_by_key(|p| {
            config
                .order
                .iter()
                .position(|k| *k == p.kind())
                .unwrap_or(usize::MAX)
        });

        tracing::info!(
            "Router initialized with providers: {:?}",
            providers.iter().map(|p| p.kind()).collect::<Vec<_>>()
        );

        Ok(Self {
            providers,
            config,
            stats: UsageStats::new(),
        })
    }

    /// 설정에서 라우터 생성 (API 키가 있는 프로바이더만 포함)
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let keys = &config.providers;
        let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
        if let Some(key) = keys.api_key(ProviderKind::Gemini) {
            providers.push(Arc::new(GeminiProvider::new(key, keys.gemini_rpm)?));
        }
        if let Some(key) = keys.api_key(ProviderKind::OpenAi) {
            providers.push(Arc::new(OpenAiProvider::new(key)?));
        }
        if let Some(key) = keys.api_key(ProviderKind::Anthropic) {
            providers.push(Arc::new(AnthropicProvider::new(key)?));
        }

        Self::new(
            providers,
            RouterConfig::from_settings(&config.providers, &config.router),
        )
    }

    /// 사용 가능한 프로바이더 (선호 순서)
    pub fn available(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// 채팅 완성
    pub async fn create_chat_completion(
        &self,
        request: &ChatRequest,
        strategy: Strategy,
    ) -> Result<ChatResponse> {
        if request.messages.is_empty() {
            return Err(RagError::InvalidRequest("message list is empty".to_string()));
        }

        let selection = self.select(
            Operation::Chat,
            strategy,
            request.prompt_chars(),
            request.model.as_deref(),
        )?;

        self.execute(Operation::Chat, &selection, &request.cancel, |provider, model| {
            let mut request = request.clone();
            request.model = model;
            async move { provider.chat(&request).await }
        })
        .await
    }

    /// 임베딩 생성
    pub async fn create_embedding(
        &self,
        request: &EmbeddingRequest,
        strategy: Strategy,
    ) -> Result<EmbeddingResponse> {
        if request.text.trim().is_empty() {
            return Err(RagError::InvalidRequest("embedding text is empty".to_string()));
        }

        let selection = self.select(Operation::Embedding, strategy, 0, request.model.as_deref())?;

        self.execute(Operation::Embedding, &selection, &request.cancel, |provider, model| {
            let mut request = request.clone();
            request.model = model;
            async move { provider.embed(&request).await }
        })
        .await
    }

    /// 전략이 선택하는 임베딩 모델의 차원
    pub fn embedding_dimension(&self, strategy: Strategy) -> Option<usize> {
        let selection = select_provider(&self.available(), Operation::Embedding, strategy, 0, None)?;
        selection
            .provider
            .descriptor()
            .embedding_dimension(selection.model.as_deref())
    }

    /// 사용량 스냅샷
    pub fn usage_stats(&self) -> UsageSnapshot {
        self.stats.snapshot()
    }

    /// 모든 프로바이더 헬스 체크 (동시 실행)
    pub async fn health_status(&self) -> Vec<ProviderHealth> {
        let probes = self
            .providers
            .iter()
            .map(|p| async move { ProviderHealth::probe(p.as_ref()).await });
        futures::future::join_all(probes).await
    }

    fn select(
        &self,
        operation: Operation,
        strategy: Strategy,
        prompt_chars: usize,
        requested_model: Option<&str>,
    ) -> Result<Selection> {
        let selection = select_provider(
            &self.available(),
            operation,
            strategy,
            prompt_chars,
            requested_model,
        )
        .ok_or(RagError::NoProvider {
            operation: operation.as_str(),
        })?;

        tracing::debug!(
            "Selected {} for {} (strategy: {}, model: {:?})",
            selection.provider,
            operation.as_str(),
            strategy,
            selection.model
        );
        Ok(selection)
    }

    /// 시도 순서: 선택된 프로바이더 → 나머지 지원 프로바이더 (선호 순서)
    ///
    /// 임베딩은 첫 선택과 차원이 같은 프로바이더로만 폴백합니다.
    fn candidates(&self, operation: Operation, selection: &Selection) -> Vec<Arc<dyn LlmProvider>> {
        let first_dimension = selection
            .provider
            .descriptor()
            .embedding_dimension(selection.model.as_deref());

        let mut candidates: Vec<Arc<dyn LlmProvider>> = self
            .providers
            .iter()
            .filter(|p| p.kind() == selection.provider)
            .cloned()
            .collect();

        candidates.extend(
            self.providers
                .iter()
                .filter(|p| p.kind() != selection.provider)
                .filter(|p| p.descriptor().supports(operation))
                .filter(|p| {
                    operation == Operation::Chat
                        || p.descriptor().embedding_dimension(None) == first_dimension
                })
                .cloned(),
        );

        candidates
    }

    /// 재시도/폴백/타임아웃/취소를 적용한 실행
    async fn execute<T, F, Fut>(
        &self,
        operation: Operation,
        selection: &Selection,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T>
    where
        T: Billed,
        F: Fn(Arc<dyn LlmProvider>, Option<String>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let candidates = self.candidates(operation, selection);
        if candidates.is_empty() {
            return Err(RagError::NoProvider {
                operation: operation.as_str(),
            });
        }

        let mut last_error: Option<RagError> = None;

        for attempt in 0..self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(RagError::Cancelled);
            }

            let index = if self.config.fallback_enabled {
                attempt as usize % candidates.len()
            } else {
                0
            };
            let provider = candidates[index].clone();
            let kind = provider.kind();
            // 모델 지정은 처음 선택된 프로바이더에만 적용
            let model = if index == 0 {
                selection.model.clone()
            } else {
                None
            };

            if attempt > 0 {
                tracing::info!(
                    "Falling back to {} for {} (attempt {}/{})",
                    kind,
                    operation.as_str(),
                    attempt + 1,
                    self.config.max_retries
                );
            }

            self.stats.record_attempt(kind);
            let timeout = self.config.request_timeout;
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    self.stats.record_failure(kind);
                    return Err(RagError::Cancelled);
                }
                result = tokio::time::timeout(timeout, call(provider, model)) => {
                    result.unwrap_or_else(|_| Err(RagError::ProviderCall {
                        provider: kind,
                        status: None,
                        message: format!("request timed out after {:?}", timeout),
                    }))
                }
            };

            match result {
                Ok(response) => {
                    self.stats.record_success(&response);
                    tracing::debug!(
                        "{} {} succeeded (cost: ${:.6})",
                        kind,
                        operation.as_str(),
                        response.cost()
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    self.stats.record_failure(kind);
                    tracing::warn!(
                        "{} {} failed (attempt {}/{}): {}",
                        kind,
                        operation.as_str(),
                        attempt + 1,
                        self.config.max_retries,
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    self.stats.record_failure(kind);
                    return Err(e);
                }
            }
        }

        Err(RagError::RoutingExhausted {
            attempts: self.config.max_retries,
            last_error: Box::new(last_error.unwrap_or(RagError::NoProvider {
                operation: operation.as_str(),
            })),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use crate::testing::ScriptedProvider;

    const ALL: [ProviderKind; 3] = ProviderKind::ALL;

    fn router(providers: Vec<ScriptedProvider>, config: RouterConfig) -> Router {
        let providers = providers
            .into_iter()
            .map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
            .collect();
        Router::new(providers, config).unwrap()
    }

    fn chat(chars: usize) -> ChatRequest {
        ChatRequest::new(vec![Message::user("x".repeat(chars))])
    }

    #[test]
    fn test_cost_strategy_picks_free_embedding() {
        let selection = select_provider(&ALL, Operation::Embedding, Strategy::Cost, 0, None).unwrap();
        assert_eq!(selection.provider, ProviderKind::Gemini);

        let order = [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::Gemini];
        let selection = select_provider(&order, Operation::Embedding, Strategy::Cost, 0, None).unwrap();
        assert_eq!(selection.provider, ProviderKind::Gemini);
    }

    #[test]
    fn test_cost_strategy_ignores_prompt_size() {
        let selection = select_provider(&ALL, Operation::Chat, Strategy::Cost, 50_000, None).unwrap();
        assert_eq!(selection.provider, ProviderKind::Gemini);
        assert_eq!(selection.model, None);
    }

    #[test]
    fn test_balanced_threshold_boundary() {
        let below = select_provider(&ALL, Operation::Chat, Strategy::Balanced, 999, None).unwrap();
        assert_eq!(below.provider, ProviderKind::Gemini);

        let at = select_provider(&ALL, Operation::Chat, Strategy::Balanced, 1000, None).unwrap();
        assert_eq!(at.provider, ProviderKind::OpenAi);
        assert_eq!(at.model, None);

        let embedding = select_provider(&ALL, Operation::Embedding, Strategy::Balanced, 5000, None).unwrap();
        assert_eq!(embedding.provider, ProviderKind::Gemini);
    }

    #[test]
    fn test_performance_uses_flagship() {
        let selection = select_provider(&ALL, Operation::Chat, Strategy::Performance, 10, None).unwrap();
        assert_eq!(selection.provider, ProviderKind::OpenAi);
        assert_eq!(selection.model.as_deref(), Some("gpt-4o"));

        let only_claude = [ProviderKind::Gemini, ProviderKind::Anthropic];
        let selection =
            select_provider(&only_claude, Operation::Chat, Strategy::Performance, 10, None).unwrap();
        assert_eq!(selection.provider, ProviderKind::Anthropic);

        let selection =
            select_provider(&ALL, Operation::Embedding, Strategy::Performance, 0, None).unwrap();
        assert_eq!(selection.provider, ProviderKind::OpenAi);
        assert_eq!(selection.model, None);
    }

    #[test]
    fn test_requested_model_pins_provider() {
        let selection = select_provider(
            &ALL,
            Operation::Chat,
            Strategy::Cost,
            10,
            Some("claude-3-5-sonnet-20241022"),
        )
        .unwrap();
        assert_eq!(selection.provider, ProviderKind::Anthropic);
        assert_eq!(selection.model.as_deref(), Some("claude-3-5-sonnet-20241022"));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("cost".parse::<Strategy>(), Ok(Strategy::Cost));
        assert_eq!(" Performance ".parse::<Strategy>(), Ok(Strategy::Performance));
        assert!("cheapest".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_no_embedding_provider() {
        assert!(select_provider(
            &[ProviderKind::Anthropic],
            Operation::Embedding,
            Strategy::Cost,
            0,
            None
        )
        .is_none());
    }

    #[test]
    fn test_selection_is_deterministic() {
        for strategy in [Strategy::Cost, Strategy::Balanced, Strategy::Performance] {
            for chars in [0, 999, 1000, 4000] {
                let a = select_provider(&ALL, Operation::Chat, strategy, chars, None);
                let b = select_provider(&ALL, Operation::Chat, strategy, chars, None);
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = RouterConfig {
            max_retries: 0,
            ..RouterConfig::default()
        };
        let providers: Vec<Arc<dyn LlmProvider>> =
            vec![Arc::new(ScriptedProvider::new(ProviderKind::Gemini))];
        assert!(matches!(
            Router::new(providers, config),
            Err(RagError::Configuration(_))
        ));

        assert!(matches!(
            Router::new(Vec::new(), RouterConfig::default()),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_config_without_keys_fails() {
        let config = Config::default();
        assert!(matches!(
            Router::from_config(&config),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_providers_sorted_by_preference() {
        let router = router(
            vec![
                ScriptedProvider::new(ProviderKind::Anthropic),
                ScriptedProvider::new(ProviderKind::OpenAi),
                ScriptedProvider::new(ProviderKind::Gemini),
            ],
            RouterConfig::default(),
        );
        assert_eq!(router.available(), ALL.to_vec());
    }

    #[tokio::test]
    async fn test_retry_then_success_records_attempts() {
        let router = router(
            vec![ScriptedProvider::new(ProviderKind::OpenAi).failing_first(1)],
            RouterConfig::default(),
        );

        let response = router
            .create_chat_completion(&chat(10), Strategy::Cost)
            .await
            .unwrap();
        assert_eq!(response.provider, ProviderKind::OpenAi);

        let stats = router.usage_stats();
        let openai = stats.get(ProviderKind::OpenAi);
        assert_eq!(openai.attempts, 2);
        assert_eq!(openai.failures, 1);
        assert_eq!(openai.successes, 1);
        assert!((openai.cost - response.cost).abs() < 1e-12);
        assert!(response.cost > 0.0);
    }

    #[tokio::test]
    async fn test_fallback_to_next_provider() {
        let router = router(
            vec![
                ScriptedProvider::new(ProviderKind::Gemini).always_failing(),
                ScriptedProvider::new(ProviderKind::OpenAi),
            ],
            RouterConfig::default(),
        );

        let response = router
            .create_chat_completion(&chat(10), Strategy::Cost)
            .await
            .unwrap();
        assert_eq!(response.provider, ProviderKind::OpenAi);

        let stats = router.usage_stats();
        assert_eq!(stats.get(ProviderKind::Gemini).attempts, 1);
        assert_eq!(stats.get(ProviderKind::OpenAi).attempts, 1);
        assert_eq!(stats.total_attempts(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_records_no_cost() {
        let router = router(
            vec![
                ScriptedProvider::new(ProviderKind::Gemini).always_failing(),
                ScriptedProvider::new(ProviderKind::OpenAi).always_failing(),
            ],
            RouterConfig::default(),
        );

        let err = router
            .create_chat_completion(&chat(10), Strategy::Cost)
            .await
            .unwrap_err();
        match err {
            RagError::RoutingExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert!(last_error.is_retryable());
            }
            other => panic!("unexpected error: {other}"),
        }

        let stats = router.usage_stats();
        assert_eq!(stats.total_attempts(), 2);
        assert_eq!(stats.total_cost(), 0.0);
        assert_eq!(stats.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_fallback_disabled_retries_same_provider() {
        let config = RouterConfig {
            fallback_enabled: false,
            max_retries: 3,
            ..RouterConfig::default()
        };
        let router = router(
            vec![
                ScriptedProvider::new(ProviderKind::Gemini).always_failing(),
                ScriptedProvider::new(ProviderKind::OpenAi),
            ],
            config,
        );

        let err = router
            .create_chat_completion(&chat(10), Strategy::Cost)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::RoutingExhausted { attempts: 3, .. }));
        assert_eq!(router.usage_stats().get(ProviderKind::Gemini).attempts, 3);
        assert_eq!(router.usage_stats().get(ProviderKind::OpenAi).attempts, 0);
    }

    #[tokio::test]
    async fn test_embedding_fallback_keeps_dimension() {
        // Anthropic은 임베딩 미지원, OpenAI는 차원이 달라 폴백 대상에서 제외
        let router = router(
            vec![
                ScriptedProvider::new(ProviderKind::Gemini).always_failing(),
                ScriptedProvider::new(ProviderKind::OpenAi),
                ScriptedProvider::new(ProviderKind::Anthropic),
            ],
            RouterConfig::default(),
        );

        let err = router
            .create_embedding(&EmbeddingRequest::new("hello"), Strategy::Cost)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::RoutingExhausted { .. }));
        assert_eq!(router.usage_stats().get(ProviderKind::OpenAi).attempts, 0);
        assert_eq!(router.usage_stats().get(ProviderKind::Gemini).attempts, 2);
    }

    #[tokio::test]
    async fn test_embedding_dimension_matches_selection() {
        let router = router(
            vec![
                ScriptedProvider::new(ProviderKind::Gemini),
                ScriptedProvider::new(ProviderKind::OpenAi),
            ],
            RouterConfig::default(),
        );
        assert_eq!(router.embedding_dimension(Strategy::Cost), Some(768));
        assert_eq!(router.embedding_dimension(Strategy::Performance), Some(1536));

        let response = router
            .create_embedding(&EmbeddingRequest::new("hello world"), Strategy::Cost)
            .await
            .unwrap();
        assert_eq!(response.embedding.len(), 768);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let config = RouterConfig {
            request_timeout: Duration::from_millis(20),
            ..RouterConfig::default()
        };
        let router = router(
            vec![
                ScriptedProvider::new(ProviderKind::Gemini).with_delay(Duration::from_secs(5)),
                ScriptedProvider::new(ProviderKind::OpenAi),
            ],
            config,
        );

        let response = router
            .create_chat_completion(&chat(10), Strategy::Cost)
            .await
            .unwrap();
        assert_eq!(response.provider, ProviderKind::OpenAi);
        assert_eq!(router.usage_stats().get(ProviderKind::Gemini).failures, 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_call() {
        let router = router(
            vec![ScriptedProvider::new(ProviderKind::Gemini).with_delay(Duration::from_secs(5))],
            RouterConfig::default(),
        );

        let cancel = CancellationToken::new();
        let request = chat(10).with_cancel(cancel.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let start = std::time::Instant::now();
        let err = router
            .create_chat_completion(&request, Strategy::Cost)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, RagError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_empty_requests_rejected() {
        let router = router(
            vec![ScriptedProvider::new(ProviderKind::Gemini)],
            RouterConfig::default(),
        );
        let err = router
            .create_chat_completion(&ChatRequest::new(Vec::new()), Strategy::Cost)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidRequest(_)));

        let err = router
            .create_embedding(&EmbeddingRequest::new("   "), Strategy::Cost)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidRequest(_)));
        assert_eq!(router.usage_stats().total_attempts(), 0);
    }

    #[tokio::test]
    async fn test_health_status_reports_each_provider() {
        let router = router(
            vec![
                ScriptedProvider::new(ProviderKind::Gemini),
                ScriptedProvider::new(ProviderKind::Anthropic).always_failing(),
            ],
            RouterConfig::default(),
        );
        let health = router.health_status().await;
        assert_eq!(health.len(), 2);
        assert!(health[0].healthy);
        assert_eq!(health[1].provider, ProviderKind::Anthropic);
        assert!(!health[1].healthy);
    }
}
