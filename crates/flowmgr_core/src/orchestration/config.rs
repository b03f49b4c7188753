//! Orchestrator settings.
use std::time::Duration;

pub const DEFAULT_PATH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_REMOVAL_TRANSACTION_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Push install rules right after a create instead of waiting for the topology engine.
    pub install_on_create: bool,
    /// Re-push install rules after every update.
    pub reinstall_on_update: bool,
    /// Reject malformed create and update payloads before touching the cache.
    pub payload_validation: bool,
    /// Path engine reply timeout in milliseconds, disabled if 0.
    pub path_timeout_ms: u64,
    /// Age in milliseconds after which an unconfirmed transaction takes its flow down,
    /// disabled if 0.
    pub stale_transaction_timeout_ms: u64,
    /// Age in milliseconds after which the unconfirmed removal of a deleted flow is forgotten,
    /// disabled if 0.
    pub removal_transaction_timeout_ms: u64,
    /// Period of the stale transaction sweep in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            install_on_create: false,
            reinstall_on_update: true,
            payload_validation: false,
            path_timeout_ms: DEFAULT_PATH_TIMEOUT_MS,
            stale_transaction_timeout_ms: 0,
            removal_transaction_timeout_ms: DEFAULT_REMOVAL_TRANSACTION_TIMEOUT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_install_on_create(self, install_on_create: bool) -> Self {
        Self { install_on_create, ..self }
    }

    pub fn with_reinstall_on_update(self, reinstall_on_update: bool) -> Self {
        Self { reinstall_on_update, ..self }
    }

    pub fn with_payload_validation(self, payload_validation: bool) -> Self {
        Self { payload_validation, ..self }
    }

    pub fn with_path_timeout_ms(self, path_timeout_ms: u64) -> Self {
        Self { path_timeout_ms, ..self }
    }

    pub fn with_stale_transaction_timeout_ms(self, stale_transaction_timeout_ms: u64) -> Self {
        Self { stale_transaction_timeout_ms, ..self }
    }

    pub fn with_removal_transaction_timeout_ms(self, removal_transaction_timeout_ms: u64) -> Self {
        Self { removal_transaction_timeout_ms, ..self }
    }

    pub fn with_sweep_interval_ms(self, sweep_interval_ms: u64) -> Self {
        Self { sweep_interval_ms, ..self }
    }

    /// Stale transaction timeout, if expiry is enabled.
    pub fn stale_transaction_timeout(&self) -> Option<Duration> {
        (self.stale_transaction_timeout_ms > 0)
            .then(|| Duration::from_millis(self.stale_transaction_timeout_ms))
    }

    pub fn removal_transaction_timeout(&self) -> Option<Duration> {
        (self.removal_transaction_timeout_ms > 0)
            .then(|| Duration::from_millis(self.removal_transaction_timeout_ms))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}
