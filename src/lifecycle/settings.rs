use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::core::DocumentKind;

/// Default TTL of cached rate→template maps (5 minutes).
///
/// Override via `COMPROBANTES_TEMPLATE_TTL_SECONDS`.
pub const DEFAULT_TEMPLATE_TTL_SECONDS: u64 = 300;

/// Default number of (company, direction) template maps kept.
///
/// Override via `COMPROBANTES_TEMPLATE_CAPACITY`.
pub const DEFAULT_TEMPLATE_CAPACITY: u64 = 256;

/// Tunables of the lifecycle engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSettings {
    /// Write a suggested valuation rate to the item and continue the
    /// confirmation instead of stopping with a warning.
    pub auto_apply_valuation: bool,
    pub template_ttl: Duration,
    pub template_capacity: u64,
    /// Item group for ad hoc catalog entries.
    pub ad_hoc_item_group: String,
    /// Stock unit for ad hoc catalog entries.
    pub ad_hoc_uom: String,
    pub numbering: NumberingConfig,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            auto_apply_valuation: env_parse("COMPROBANTES_AUTO_APPLY_VALUATION").unwrap_or(false),
            template_ttl: Duration::from_secs(
                env_parse("COMPROBANTES_TEMPLATE_TTL_SECONDS")
                    .unwrap_or(DEFAULT_TEMPLATE_TTL_SECONDS),
            ),
            template_capacity: env_parse("COMPROBANTES_TEMPLATE_CAPACITY")
                .unwrap_or(DEFAULT_TEMPLATE_CAPACITY),
            ad_hoc_item_group: std::env::var("COMPROBANTES_AD_HOC_ITEM_GROUP")
                .unwrap_or_else(|_| "All Item Groups".into()),
            ad_hoc_uom: std::env::var("COMPROBANTES_AD_HOC_UOM").unwrap_or_else(|_| "Unidad".into()),
            numbering: NumberingConfig::default(),
        }
    }
}

impl LifecycleSettings {
    pub fn with_numbering(mut self, numbering: NumberingConfig) -> Self {
        self.numbering = numbering;
        self
    }

    pub fn log_config(&self) {
        tracing::info!(
            auto_apply_valuation = self.auto_apply_valuation,
            template_ttl_seconds = self.template_ttl.as_secs(),
            template_capacity = self.template_capacity,
            numbering_methods = self.numbering.methods.len(),
            "lifecycle settings loaded"
        );
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Numbering method per document kind, keyed by
/// [`NumberAllocator::field_for`](super::NumberAllocator::field_for).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NumberingConfig {
    methods: HashMap<String, String>,
}

impl NumberingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, kind: DocumentKind, method: impl Into<String>) -> Self {
        self.methods
            .insert(super::NumberAllocator::field_for(kind).to_string(), method.into());
        self
    }

    pub fn method_for(&self, kind: DocumentKind) -> Option<&str> {
        self.methods
            .get(super::NumberAllocator::field_for(kind))
            .map(String::as_str)
    }

    /// Read the configuration keys out of a settings record.
    pub fn from_record(record: &Value) -> Self {
        let mut config = Self::default();
        for kind in [
            DocumentKind::Invoice,
            DocumentKind::CreditNote,
            DocumentKind::DebitNote,
        ] {
            let field = super::NumberAllocator::field_for(kind);
            if let Some(method) = record
                .get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|m| !m.is_empty())
            {
                config.methods.insert(field.to_string(), method.to_string());
            }
        }
        config
    }
}
