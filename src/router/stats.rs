//! 사용량 통계
//!
//! 프로세스 단위 카운터. 라우터 생성 시 만들어지고 재시작 전까지 유지됩니다.
//! 모든 카운터는 단조 증가합니다.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::llm::{Billed, ProviderKind};

/// 프로바이더별 누적 사용량
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProviderUsage {
    /// 성공/실패 포함 전체 시도 횟수
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// USD (성공한 호출만)
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// 읽기 전용 스냅샷
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageSnapshot {
    pub providers: BTreeMap<ProviderKind, ProviderUsage>,
}

impl UsageSnapshot {
    pub fn total_attempts(&self) -> u64 {
        self.providers.values().map(|u| u.attempts).sum()
    }

    pub fn total_requests(&self) -> u64 {
        self.providers.values().map(|u| u.successes).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.providers.values().map(|u| u.cost).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.providers.values().map(|u| u.total_tokens).sum()
    }

    pub fn get(&self, kind: ProviderKind) -> ProviderUsage {
        self.providers.get(&kind).copied().unwrap_or_default()
    }
}

/// 동시 요청에서도 업데이트가 유실되지 않는 사용량 카운터
#[derive(Debug, Default)]
pub struct UsageStats {
    inner: Mutex<HashMap<ProviderKind, ProviderUsage>>,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 통계 잠금 (poison 상태면 복구 후 계속 진행)
    fn lock(&self) -> MutexGuard<'_, HashMap<ProviderKind, ProviderUsage>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Usage stats lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn record_attempt(&self, kind: ProviderKind) {
        self.lock().entry(kind).or_default().attempts += 1;
    }

    pub fn record_failure(&self, kind: ProviderKind) {
        self.lock().entry(kind).or_default().failures += 1;
    }

    /// 성공 응답의 비용/토큰 반영
    pub fn record_success(&self, response: &dyn Billed) {
        let usage = response.usage();
        let mut map = self.lock();
        let entry = map.entry(response.provider()).or_default();
        entry.successes += 1;
        entry.cost += response.cost();
        entry.input_tokens += usage.input;
        entry.output_tokens += usage.output;
        entry.total_tokens += usage.total;
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            providers: self.lock().iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }
}
