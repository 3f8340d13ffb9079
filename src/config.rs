// Engine configuration (spec.md §6 "Environment variables the core honors").
//
// Loaded the way the teacher loads `ApiConfig`/`OpenAIApiConfig`
// (`src/api/mod.rs`): a plain struct with a `Default`, overridden by
// environment variables via the `config` crate layered over `dotenv`.

use std::time::Duration;

use crate::error::{AgentlangError, Result};

/// Backoff shape for the resolver policy envelope's retry layer
/// (spec.md §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Constant,
    Linear,
    Exponential,
}

/// Resolver call policy envelope: timeout -> retry -> circuit-breaker,
/// innermost to outermost (spec.md §5).
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_strategy: BackoffStrategy,
    pub max_delay_ms: u64,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            max_retries: 3,
            backoff_strategy: BackoffStrategy::Exponential,
            max_delay_ms: 30_000,
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

impl PolicyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Process-wide engine configuration, loaded once per host process.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `AGENTLANG_AUTH_ENABLED` — gate RBAC (default: enabled).
    pub auth_enabled: bool,
    /// `AGENTLANG_RBAC_ENABLED` — gate rule evaluation (default: enabled).
    pub rbac_enabled: bool,
    pub policy: PolicyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auth_enabled: true,
            rbac_enabled: true,
            policy: PolicyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from process environment variables (via
    /// `.env`, if present, through `dotenv`), falling back to
    /// `Default` for anything unset.
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let builder = config::Config::builder()
            .set_default("auth_enabled", true)
            .map_err(|e| AgentlangError::ConfigError(e.to_string()))?
            .set_default("rbac_enabled", true)
            .map_err(|e| AgentlangError::ConfigError(e.to_string()))?
            .add_source(
                config::Environment::with_prefix("AGENTLANG")
                    .try_parsing(true)
                    .separator("_"),
            );

        let settings = builder
            .build()
            .map_err(|e| AgentlangError::ConfigError(e.to_string()))?;

        let auth_enabled = settings
            .get_bool("auth_enabled")
            .unwrap_or(true);
        let rbac_enabled = settings
            .get_bool("rbac_enabled")
            .unwrap_or(true);

        Ok(Self {
            auth_enabled,
            rbac_enabled,
            policy: PolicyConfig::default(),
        })
    }
}

/// Installs a `tracing-subscriber` `fmt` layer filtered by
/// `AGENTLANG_LOG` (falling back to `info`), the way the teacher's
/// `admin` binary wires up `with_env_filter` before serving requests.
/// A host process or test harness calls this once at startup; the
/// core itself only ever emits `tracing` events, never installs a
/// subscriber for them.
pub fn init_tracing() {
    let filter = std::env::var("AGENTLANG_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_rbac_and_auth_enabled() {
        let config = EngineConfig::default();
        assert!(config.auth_enabled);
        assert!(config.rbac_enabled);
    }

    #[test]
    fn policy_timeouts_convert_to_durations() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.request_timeout(), Duration::from_millis(5_000));
    }
}
