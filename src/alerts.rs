//! Administrator alerting
//!
//! Credential failures are an operator problem, not a per-event problem:
//! they are logged at error level and broadcast to any subscribed
//! operator surface, separately from the event's own fallback chain.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// One administrator-facing alert
#[derive(Debug, Clone, Serialize)]
pub struct AdminAlert {
    /// Provider the alert concerns
    pub provider: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Broadcast hub for administrator alerts
pub struct AdminAlertService {
    tx: broadcast::Sender<AdminAlert>,
    raised: AtomicU64,
}

impl AdminAlertService {
    /// Create with a bounded subscriber buffer
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            raised: AtomicU64::new(0),
        }
    }

    /// Subscribe to alerts
    pub fn subscribe(&self) -> broadcast::Receiver<AdminAlert> {
        self.tx.subscribe()
    }

    /// Raise a provider credential alert
    pub fn notify_auth_failure(&self, provider: &str, detail: &str) {
        self.raised.fetch_add(1, Ordering::Relaxed);

        tracing::error!(
            provider = %provider,
            detail = %detail,
            "Provider credential rejected, administrator attention required"
        );

        let alert = AdminAlert {
            provider: provider.to_string(),
            message: detail.to_string(),
            raised_at: Utc::now(),
        };

        // No subscribers is fine; the log line above already happened
        let _ = self.tx.send(alert);
    }

    /// Total alerts raised since start
    pub fn raised_count(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }
}

impl Default for AdminAlertService {
    fn default() -> Self {
        Self::new(64)
    }
}
