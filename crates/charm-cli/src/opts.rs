//! Global CLI options and store resolution.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use charm_kernel::config::DEFAULT_STATE_FILE;
use charm_kernel::{DispatcherConfig, LockPolicy};
use charm_store::SqliteStore;
use clap::Args;

/// Options shared by every command; each can also come from the environment.
#[derive(Args, Debug, Clone)]
pub struct StoreOpts {
    /// State database (env: CHARM_STATE_DB, default: ./.unit-state.db)
    #[arg(long, global = true, env = "CHARM_STATE_DB")]
    pub db: Option<PathBuf>,

    /// JSON output envelope
    #[arg(long, global = true)]
    pub json: bool,

    /// Wait this long for a running invocation to release the store instead of
    /// failing at once (env: CHARM_LOCK_TIMEOUT_MS)
    #[arg(long, global = true, env = "CHARM_LOCK_TIMEOUT_MS")]
    pub lock_timeout_ms: Option<u64>,
}

impl StoreOpts {
    pub fn config(&self) -> DispatcherConfig {
        let path = self
            .db
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
        let lock = match self.lock_timeout_ms {
            Some(ms) => LockPolicy::Wait(Duration::from_millis(ms)),
            None => LockPolicy::FailFast,
        };
        DispatcherConfig::new(path).with_lock(lock)
    }

    /// Lock an existing store. Never creates one.
    pub fn open_store(&self) -> Result<SqliteStore> {
        let config = self.config();
        if !config.state_path.is_file() {
            bail!("no state database at {}", config.state_path.display());
        }
        SqliteStore::open(&config.state_path, config.lock)
            .with_context(|| format!("open {}", config.state_path.display()))
    }
}
