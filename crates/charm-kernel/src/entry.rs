//! Process entry point: one trigger per invocation, exit status from the outcome.

use std::process::ExitCode;

use crate::config::DispatcherConfig;
use crate::dispatcher::{Aborted, DispatchReport, Dispatcher, Phase};
use crate::error::KernelError;
use crate::event::Trigger;

/// Open the store, let `construct` build the object graph and name the trigger,
/// then dispatch. Failures before dispatch count as aborted during `Loading`.
pub fn run_invocation<F>(config: &DispatcherConfig, construct: F) -> Result<DispatchReport, Aborted>
where
    F: FnOnce(&mut Dispatcher) -> Result<Trigger, KernelError>,
{
    let loading = |error: KernelError| Aborted {
        phase: Phase::Loading,
        error,
    };
    let mut dispatcher = Dispatcher::open(config).map_err(loading)?;
    let trigger = construct(&mut dispatcher).map_err(loading)?;
    log::debug!(
        "dispatching '{}' from '{}' with {} queued notices",
        trigger.kind,
        trigger.source,
        dispatcher.pending_notices().count()
    );
    dispatcher.dispatch(trigger)
}

/// [`run_invocation`] mapped to a process exit status: success exactly when the
/// invocation committed.
pub fn invoke<F>(config: &DispatcherConfig, construct: F) -> ExitCode
where
    F: FnOnce(&mut Dispatcher) -> Result<Trigger, KernelError>,
{
    match run_invocation(config, construct) {
        Ok(_) => ExitCode::SUCCESS,
        Err(aborted) => {
            if !aborted.is_registration() && !aborted.is_snapshot() {
                log::error!("{aborted}; the invocation should be retried");
            }
            ExitCode::from(aborted.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;
    use charm_store::{LockPolicy, SqliteStore, StoreError};
    use charm_value::Value;

    fn config(dir: &tempfile::TempDir) -> DispatcherConfig {
        DispatcherConfig::new(dir.path().join("state.db"))
    }

    #[test]
    fn construction_failure_aborts_in_loading() {
        let dir = tempfile::tempdir().unwrap();
        let aborted = run_invocation(&config(&dir), |d| {
            let charm = Handle::root("Charm")?;
            d.register_object(&charm)?;
            d.register_object(&charm)?;
            Ok(Trigger::new(charm, "start", Value::Null))
        })
        .unwrap_err();
        assert_eq!(aborted.phase, Phase::Loading);
        assert!(aborted.is_registration());
    }

    #[test]
    fn locked_store_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let _holder = SqliteStore::open(&cfg.state_path, LockPolicy::FailFast).unwrap();
        let aborted = run_invocation(&cfg, |_| unreachable!("store is locked"))
            .unwrap_err();
        assert!(matches!(
            aborted.error,
            KernelError::Store(StoreError::Locked { .. })
        ));
        assert_eq!(aborted.exit_code(), 1);
    }

    #[test]
    fn committed_invocation_reports() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_invocation(&config(&dir), |d| {
            let charm = Handle::root("Charm")?;
            d.register_object(&charm)?;
            d.define_event::<()>(&charm, "install")?;
            Ok(Trigger::new(charm, "install", Value::Null))
        })
        .unwrap();
        assert_eq!(report, DispatchReport::default());
        let code = invoke(&config(&dir), |d| {
            Ok(Trigger::new(d.framework().clone(), "noop", Value::Null))
        });
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::SUCCESS));
    }
}
