use std::path::PathBuf;
use std::time::Duration;

use charm_store::LockPolicy;

use crate::error::KernelError;

pub const STATE_DB_ENV: &str = "CHARM_STATE_DB";
pub const LOCK_TIMEOUT_ENV: &str = "CHARM_LOCK_TIMEOUT_MS";
pub const DEFAULT_STATE_FILE: &str = ".unit-state.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// SQLite file holding stored state and deferred notices.
    pub state_path: PathBuf,
    /// What to do when another invocation holds the store.
    pub lock: LockPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(DEFAULT_STATE_FILE),
            lock: LockPolicy::FailFast,
        }
    }
}

impl DispatcherConfig {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            ..Self::default()
        }
    }

    pub fn with_lock(mut self, lock: LockPolicy) -> Self {
        self.lock = lock;
        self
    }

    /// Defaults overridden by `CHARM_STATE_DB` and `CHARM_LOCK_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, KernelError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, KernelError> {
        let mut config = Self::default();
        if let Some(path) = var(STATE_DB_ENV).filter(|path| !path.is_empty()) {
            config.state_path = PathBuf::from(path);
        }
        if let Some(raw) = var(LOCK_TIMEOUT_ENV) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                KernelError::Config(format!("{LOCK_TIMEOUT_ENV} must be milliseconds, got '{raw}'"))
            })?;
            config.lock = LockPolicy::Wait(Duration::from_millis(millis));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = DispatcherConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config, DispatcherConfig::default());
        assert_eq!(config.state_path, PathBuf::from(".unit-state.db"));
        assert_eq!(config.lock, LockPolicy::FailFast);
    }

    #[test]
    fn environment_overrides_path_and_lock() {
        let config = DispatcherConfig::from_vars(vars(&[
            (STATE_DB_ENV, "/var/lib/unit/state.db"),
            (LOCK_TIMEOUT_ENV, "250"),
        ]))
        .unwrap();
        assert_eq!(config.state_path, PathBuf::from("/var/lib/unit/state.db"));
        assert_eq!(config.lock, LockPolicy::Wait(Duration::from_millis(250)));
    }

    #[test]
    fn malformed_timeout_is_config_error() {
        let err = DispatcherConfig::from_vars(vars(&[(LOCK_TIMEOUT_ENV, "soon")])).unwrap_err();
        assert!(matches!(err, KernelError::Config(msg) if msg.contains("soon")));
    }
}
