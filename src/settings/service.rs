//! Settings service
//!
//! Caches the provider list and policy, hands out immutable snapshots,
//! and applies settings changes.

use super::repository::SettingsRepository;
use super::types::{DescriberSettings, ProviderSnapshot};
use crate::error::Result;
use sqlx::mysql::MySqlPool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cached settings with snapshot access
pub struct SettingsService {
    repo: Option<SettingsRepository>,
    cache: RwLock<Arc<ProviderSnapshot>>,
}

impl SettingsService {
    /// Create from a database pool, loading the current settings
    pub async fn new(pool: MySqlPool) -> Result<Self> {
        let repo = SettingsRepository::new(pool);
        let settings = repo.load().await?;
        let snapshot = ProviderSnapshot::build(&settings);

        tracing::info!(
            providers = snapshot.providers.len(),
            sla_ms = snapshot.policy.sla_ms,
            "Settings loaded"
        );

        Ok(Self {
            repo: Some(repo),
            cache: RwLock::new(snapshot),
        })
    }

    /// Create from fixed settings, without persistence (embedding, tests)
    pub fn with_settings(settings: DescriberSettings) -> Self {
        Self {
            repo: None,
            cache: RwLock::new(ProviderSnapshot::build(&settings)),
        }
    }

    /// Current immutable snapshot
    ///
    /// Callers keep the returned `Arc` for the duration of one request;
    /// a concurrent reload swaps the cache without touching it.
    pub async fn snapshot(&self) -> Arc<ProviderSnapshot> {
        self.cache.read().await.clone()
    }

    /// Re-read settings from the store and refresh the cache
    pub async fn reload(&self) -> Result<()> {
        if let Some(ref repo) = self.repo {
            let settings = repo.load().await?;
            let snapshot = ProviderSnapshot::build(&settings);
            *self.cache.write().await = snapshot;
            tracing::info!("Settings reloaded");
        }
        Ok(())
    }

    /// Validate, persist, and activate new settings
    pub async fn apply(&self, settings: DescriberSettings) -> Result<()> {
        for provider in &settings.providers {
            provider.validate()?;
        }

        if let Some(ref repo) = self.repo {
            repo.save(&settings).await?;
        }

        let snapshot = ProviderSnapshot::build(&settings);
        tracing::info!(providers = snapshot.providers.len(), "Settings applied");
        *self.cache.write().await = snapshot;

        Ok(())
    }
}
