//! Settings - provider list and orchestration policy
//!
//! ## Responsibilities
//!
//! - Load the ordered provider list and description policy from the
//!   settings table (key `ai_description`)
//! - Cache them and hand out immutable snapshots per request
//! - Refresh the cache on settings change

mod repository;
mod service;
mod types;

pub use repository::SettingsRepository;
pub use service::SettingsService;
pub use types::{
    DescriberSettings, DescriptionPolicy, ModeCapabilities, ProviderConfig, ProviderKind,
    ProviderSnapshot, VideoTransfer,
};
