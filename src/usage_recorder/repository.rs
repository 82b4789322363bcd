//! Usage persistence
//!
//! `UsageStore` is the seam between the recorder and its backing store:
//! MySQL for production (usage_records table, see
//! migrations/001_usage_records.sql), in-memory for embedding and tests.

use crate::error::Result;
use crate::models::AnalysisMode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tokio::sync::RwLock;

/// Durable per-attempt row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub recorded_at: DateTime<Utc>,
    pub provider: String,
    pub mode: AnalysisMode,
    pub success: bool,
    pub tokens_used: Option<u32>,
    pub response_time_ms: u64,
    pub cost_estimate: f64,
    /// Error kind string for failed attempts
    pub error: Option<String>,
}

/// Per-provider aggregate over a date range
#[derive(Debug, Clone, Serialize)]
pub struct ProviderUsage {
    pub provider: String,
    pub attempts: i64,
    pub successes: i64,
    pub tokens_used: i64,
    pub cost_estimate: f64,
    pub avg_response_ms: f64,
}

/// Storage backend for usage records
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Persist one record
    async fn insert(&self, record: &UsageRecord) -> Result<()>;

    /// Aggregate per provider, optionally bounded below by `since`
    async fn aggregate(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ProviderUsage>>;
}

/// MySQL-backed usage store
pub struct MySqlUsageStore {
    pool: MySqlPool,
}

impl MySqlUsageStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for MySqlUsageStore {
    async fn insert(&self, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO usage_records
               (recorded_at, provider, mode, success, tokens_used,
                response_time_ms, cost_estimate, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.recorded_at)
        .bind(&record.provider)
        .bind(record.mode.as_str())
        .bind(record.success)
        .bind(record.tokens_used)
        .bind(record.response_time_ms as i64)
        .bind(record.cost_estimate)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn aggregate(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ProviderUsage>> {
        let base_query = r#"SELECT
                provider,
                COUNT(*) as attempts,
                CAST(SUM(success) AS SIGNED) as successes,
                CAST(COALESCE(SUM(tokens_used), 0) AS SIGNED) as tokens_used,
                CAST(COALESCE(SUM(cost_estimate), 0) AS DOUBLE) as cost_estimate,
                CAST(COALESCE(AVG(response_time_ms), 0) AS DOUBLE) as avg_response_ms
            FROM usage_records"#;

        let rows = if let Some(since) = since {
            sqlx::query(&format!(
                "{} WHERE recorded_at >= ? GROUP BY provider ORDER BY attempts DESC",
                base_query
            ))
            .bind(since)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "{} GROUP BY provider ORDER BY attempts DESC",
                base_query
            ))
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows
            .into_iter()
            .map(|row| ProviderUsage {
                provider: row.get("provider"),
                attempts: row.get("attempts"),
                successes: row.get("successes"),
                tokens_used: row.get("tokens_used"),
                cost_estimate: row.get("cost_estimate"),
                avg_response_ms: row.get("avg_response_ms"),
            })
            .collect())
    }
}

/// In-memory usage store
///
/// Bounded ring: oldest records drop past the capacity.
pub struct MemoryUsageStore {
    records: RwLock<Vec<UsageRecord>>,
    capacity: usize,
}

impl MemoryUsageStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Records currently held
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for MemoryUsageStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn insert(&self, record: &UsageRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.len() >= self.capacity {
            records.remove(0);
        }
        records.push(record.clone());
        Ok(())
    }

    async fn aggregate(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ProviderUsage>> {
        let records = self.records.read().await;

        let mut by_provider: Vec<ProviderUsage> = Vec::new();
        for record in records.iter() {
            if let Some(since) = since {
                if record.recorded_at < since {
                    continue;
                }
            }

            let idx = match by_provider.iter().position(|p| p.provider == record.provider) {
                Some(idx) => idx,
                None => {
                    by_provider.push(ProviderUsage {
                        provider: record.provider.clone(),
                        attempts: 0,
                        successes: 0,
                        tokens_used: 0,
                        cost_estimate: 0.0,
                        avg_response_ms: 0.0,
                    });
                    by_provider.len() - 1
                }
            };
            let entry = &mut by_provider[idx];

            // avg_response_ms accumulates a sum here, divided below
            entry.attempts += 1;
            entry.successes += i64::from(record.success);
            entry.tokens_used += i64::from(record.tokens_used.unwrap_or(0));
            entry.cost_estimate += record.cost_estimate;
            entry.avg_response_ms += record.response_time_ms as f64;
        }

        for entry in &mut by_provider {
            if entry.attempts > 0 {
                entry.avg_response_ms /= entry.attempts as f64;
            }
        }
        by_provider.sort_by(|a, b| b.attempts.cmp(&a.attempts));

        Ok(by_provider)
    }
}
