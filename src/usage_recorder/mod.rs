//! UsageRecorder - per-attempt telemetry off the critical path
//!
//! ## Responsibilities
//!
//! - Accept attempt records without blocking the orchestrator
//! - Persist through a bounded queue drained by a background worker
//! - Count dropped writes instead of raising into the caller
//! - Estimate cost per attempt from a pluggable rate table
//! - Aggregate usage by provider and date range

mod repository;

pub use repository::{MemoryUsageStore, MySqlUsageStore, ProviderUsage, UsageRecord, UsageStore};

use crate::error::Result;
use crate::models::AnalysisMode;
use chrono::{DateTime, Datelike, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One provider attempt, produced by the orchestrator
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider: String,
    pub mode: AnalysisMode,
    pub started_at: DateTime<Utc>,
    pub response_time_ms: u64,
    pub success: bool,
    pub tokens_used: Option<u32>,
    /// Error kind string for failed attempts
    pub error: Option<String>,
}

/// Cost rates for one provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostRate {
    pub per_call_usd: f64,
    pub per_1k_tokens_usd: f64,
}

impl CostRate {
    pub const FREE: CostRate = CostRate {
        per_call_usd: 0.0,
        per_1k_tokens_usd: 0.0,
    };
}

/// Pluggable per-provider cost table
#[derive(Debug, Clone)]
pub struct CostTable {
    rates: HashMap<String, CostRate>,
    default_rate: CostRate,
}

impl CostTable {
    pub fn new(default_rate: CostRate) -> Self {
        Self {
            rates: HashMap::new(),
            default_rate,
        }
    }

    /// Add or replace a provider rate (builder style)
    pub fn with_rate(mut self, provider: impl Into<String>, rate: CostRate) -> Self {
        self.rates.insert(provider.into(), rate);
        self
    }

    /// Estimated cost of one attempt
    pub fn estimate(&self, provider: &str, tokens_used: Option<u32>) -> f64 {
        let rate = self.rates.get(provider).unwrap_or(&self.default_rate);
        let tokens = f64::from(tokens_used.unwrap_or(0));
        rate.per_call_usd + tokens / 1000.0 * rate.per_1k_tokens_usd
    }
}

impl Default for CostTable {
    fn default() -> Self {
        Self::new(CostRate::FREE)
            .with_rate(
                "openai",
                CostRate {
                    per_call_usd: 0.0,
                    per_1k_tokens_usd: 0.01,
                },
            )
            .with_rate(
                "gemini",
                CostRate {
                    per_call_usd: 0.0,
                    per_1k_tokens_usd: 0.002,
                },
            )
            .with_rate(
                "claude",
                CostRate {
                    per_call_usd: 0.0,
                    per_1k_tokens_usd: 0.015,
                },
            )
            .with_rate("local-fallback", CostRate::FREE)
    }
}

/// Date-range filter for the stats read API
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsRange {
    Today,
    MonthToDate,
    All,
}

impl StatsRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatsRange::Today => "today",
            StatsRange::MonthToDate => "month_to_date",
            StatsRange::All => "all",
        }
    }

    /// Lower bound for the range, None for All
    pub fn since(&self) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        match self {
            StatsRange::Today => Some(
                now.date_naive()
                    .and_time(NaiveTime::MIN)
                    .and_utc(),
            ),
            StatsRange::MonthToDate => Some(
                now.date_naive()
                    .with_day(1)
                    .unwrap_or(now.date_naive())
                    .and_time(NaiveTime::MIN)
                    .and_utc(),
            ),
            StatsRange::All => None,
        }
    }
}

/// Grand totals across providers
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTotals {
    pub attempts: i64,
    pub successes: i64,
    pub tokens_used: i64,
    pub cost_estimate: f64,
}

/// Stats read API response
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub range: String,
    pub generated_at: DateTime<Utc>,
    pub providers: Vec<ProviderUsage>,
    pub totals: UsageTotals,
}

/// UsageRecorder service
pub struct UsageRecorder {
    tx: mpsc::Sender<UsageRecord>,
    store: Arc<dyn UsageStore>,
    cost_table: CostTable,
    dropped: Arc<AtomicU64>,
    worker: JoinHandle<()>,
}

impl UsageRecorder {
    /// Create with an explicit queue capacity, spawning the write worker
    pub fn new(store: Arc<dyn UsageStore>, cost_table: CostTable, queue_capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<UsageRecord>(queue_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));

        let worker_store = store.clone();
        let worker_dropped = dropped.clone();
        let worker = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = worker_store.insert(&record).await {
                    worker_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        provider = %record.provider,
                        error = %e,
                        "Usage record insert failed, dropping"
                    );
                }
            }
        });

        Self {
            tx,
            store,
            cost_table,
            dropped,
            worker,
        }
    }

    /// Create with defaults (in-memory store)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryUsageStore::default()), CostTable::default(), 256)
    }

    /// Enqueue one attempt; never blocks, never fails the caller
    pub fn record(&self, attempt: AttemptRecord) {
        let record = UsageRecord {
            recorded_at: attempt.started_at,
            cost_estimate: self
                .cost_table
                .estimate(&attempt.provider, attempt.tokens_used),
            provider: attempt.provider,
            mode: attempt.mode,
            success: attempt.success,
            tokens_used: attempt.tokens_used,
            response_time_ms: attempt.response_time_ms,
            error: attempt.error,
        };

        if let Err(e) = self.tx.try_send(record) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "Usage queue full, dropping attempt record");
        }
    }

    /// Writes dropped due to a full queue or failed insert
    pub fn dropped_writes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Aggregated usage for a date range
    pub async fn stats(&self, range: StatsRange) -> Result<UsageReport> {
        let providers = self.store.aggregate(range.since()).await?;

        let mut totals = UsageTotals::default();
        for p in &providers {
            totals.attempts += p.attempts;
            totals.successes += p.successes;
            totals.tokens_used += p.tokens_used;
            totals.cost_estimate += p.cost_estimate;
        }

        Ok(UsageReport {
            range: range.as_str().to_string(),
            generated_at: Utc::now(),
            providers,
            totals,
        })
    }

    /// Drain the queue and stop the worker
    pub async fn close(self) {
        let UsageRecorder { tx, worker, .. } = self;
        drop(tx);
        let _ = worker.await;
    }
}
