//! Material System Settings
//!
//! Process-wide configuration shared by the producer and render sides.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sigil_core::{CapabilityTier, MaterialSettings};
//!
//! // Defaults: async compilation, deferred uniform caching, desktop tier.
//! let settings = MaterialSettings::default();
//!
//! // Shipping configuration loaded from JSON.
//! let settings = MaterialSettings::from_json_str(r#"{ "requires_cooked_data": true }"#)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::tier::{CapabilityTier, QualityTier};

/// Configuration of the material system.
///
/// Missing JSON fields take their [`Default`] values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialSettings {
    /// When `false`, every shader map compile blocks the caller.
    ///
    /// The default material always compiles synchronously regardless.
    pub allow_async_compilation: bool,

    /// Batch uniform expression evaluation once per frame instead of
    /// evaluating each proxy as soon as it is marked stale.
    pub defer_uniform_expression_caching: bool,

    /// Shipping configuration: the persistent store is never consulted and
    /// missing shader maps are never compiled.
    pub requires_cooked_data: bool,

    /// Capability tiers that deferred caching evaluates and update contexts
    /// recompile.
    pub active_tiers: Vec<CapabilityTier>,

    /// Quality used when binding material resources to render proxies.
    pub active_quality: QualityTier,

    /// Interval at which a blocked synchronous wait logs progress.
    pub compile_wait_log_interval_ms: u64,
}

impl Default for MaterialSettings {
    fn default() -> Self {
        Self {
            allow_async_compilation: true,
            defer_uniform_expression_caching: true,
            requires_cooked_data: false,
            active_tiers: vec![CapabilityTier::Desktop],
            active_quality: QualityTier::High,
            compile_wait_log_interval_ms: 5000,
        }
    }
}

impl MaterialSettings {
    /// Parses settings from JSON, filling missing fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut settings: Self = serde_json::from_str(json)?;
        settings.active_tiers.sort();
        settings.active_tiers.dedup();
        Ok(settings)
    }

    #[inline]
    #[must_use]
    pub fn is_tier_active(&self, tier: CapabilityTier) -> bool {
        self.active_tiers.contains(&tier)
    }
}
