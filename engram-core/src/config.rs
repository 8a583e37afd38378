//! Runtime configuration
//!
//! Two layers: [`Settings`] is read once from the environment at startup,
//! and [`RuntimeOverrides`] is a live map the auto-tuner writes into.
//! Components read through the typed accessors on [`RuntimeOverrides`];
//! absent keys fall back to the settings value passed in.

use crate::constants::defaults;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::env;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Process-wide settings, loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    /// Base64-encoded 32-byte content encryption key.
    pub encryption_key_b64: Option<String>,
    /// Master secret for the OAuth token vault.
    pub token_master_secret: Option<String>,
    pub vector_host: String,
    pub vector_port: u16,
    pub vector_grpc_port: u16,
    pub embedding_model: String,
    pub default_model: String,
    pub semantic_cache_enabled: bool,
    pub context_limit: usize,
    pub jobs_enabled: bool,
    pub synthesis_budget_usd: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            encryption_key_b64: None,
            token_master_secret: None,
            vector_host: "localhost".to_string(),
            vector_port: 8080,
            vector_grpc_port: 50051,
            embedding_model: defaults::DEFAULT_EMBEDDING_MODEL.to_string(),
            default_model: defaults::DEFAULT_MODEL.to_string(),
            semantic_cache_enabled: true,
            context_limit: defaults::DEFAULT_CONTEXT_LIMIT,
            jobs_enabled: true,
            synthesis_budget_usd: defaults::SYNTHESIS_BUDGET_USD,
        }
    }
}

impl Settings {
    /// Load settings from the process environment, falling back to defaults
    /// for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            environment: match env::var("ENVIRONMENT").as_deref() {
                Ok("production") => Environment::Production,
                _ => Environment::Development,
            },
            encryption_key_b64: env::var("ENCRYPTION_KEY_B64").ok(),
            token_master_secret: env::var("TOKEN_MASTER_SECRET").ok(),
            vector_host: env::var("VECTOR_HOST").unwrap_or(base.vector_host),
            vector_port: parse_var("VECTOR_PORT", base.vector_port),
            vector_grpc_port: parse_var("VECTOR_GRPC_PORT", base.vector_grpc_port),
            embedding_model: env::var("EMBEDDING_MODEL").unwrap_or(base.embedding_model),
            default_model: env::var("DEFAULT_MODEL").unwrap_or(base.default_model),
            semantic_cache_enabled: parse_var("SEMANTIC_CACHE_ENABLED", base.semantic_cache_enabled),
            context_limit: parse_var("CONTEXT_LIMIT", base.context_limit),
            jobs_enabled: parse_var("JOBS_ENABLED", base.jobs_enabled),
            synthesis_budget_usd: parse_var("SYNTHESIS_BUDGET_USD", base.synthesis_budget_usd),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Override keys written by the auto-tuner.
pub mod keys {
    pub const SEMANTIC_CACHE_ENABLED: &str = "semantic_cache_enabled";
    pub const DEFAULT_MODEL: &str = "default_model";
    pub const CONTEXT_LIMIT: &str = "context_limit";
}

/// Live configuration overrides.
///
/// Written by a single scheduled task (the tuner), read by many request
/// tasks. Readers observe eventual visibility; there is no ordering
/// guarantee between an applied decision and in-flight requests.
#[derive(Debug, Default)]
pub struct RuntimeOverrides {
    map: RwLock<HashMap<String, Value>>,
}

impl RuntimeOverrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an override value.
    pub fn set(&self, key: &str, value: Value) {
        self.map.write().insert(key.to_string(), value);
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.map.read().get(key).cloned()
    }

    /// Whether the semantic cache is currently enabled.
    pub fn semantic_cache_enabled(&self, fallback: bool) -> bool {
        self.get(keys::SEMANTIC_CACHE_ENABLED)
            .and_then(|v| v.as_bool())
            .unwrap_or(fallback)
    }

    /// The model queries route to when no manual override is given.
    pub fn default_model(&self, fallback: &str) -> String {
        self.get(keys::DEFAULT_MODEL)
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Context-source limit, bounded to [5, 20] when overridden.
    pub fn context_limit(&self, fallback: usize) -> usize {
        self.get(keys::CONTEXT_LIMIT)
            .and_then(|v| v.as_u64())
            .map_or(fallback, |v| (v as usize).clamp(5, 20))
    }

    /// Snapshot of all current overrides, for diagnostics.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.map.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overrides_fall_back_when_absent() {
        let overrides = RuntimeOverrides::new();
        assert!(overrides.semantic_cache_enabled(true));
        assert_eq!(overrides.default_model("claude"), "claude");
        assert_eq!(overrides.context_limit(10), 10);
    }

    #[test]
    fn overrides_win_when_present() {
        let overrides = RuntimeOverrides::new();
        overrides.set(keys::SEMANTIC_CACHE_ENABLED, json!(false));
        overrides.set(keys::DEFAULT_MODEL, json!("gpt-4o"));
        overrides.set(keys::CONTEXT_LIMIT, json!(50));

        assert!(!overrides.semantic_cache_enabled(true));
        assert_eq!(overrides.default_model("claude"), "gpt-4o");
        // Out-of-range override is clamped, not trusted.
        assert_eq!(overrides.context_limit(10), 20);
    }
}
