//! Per-invocation orchestrator. Objects and observers are registered while the
//! dispatcher is `Loading`; [`Dispatcher::dispatch`] then replays queued notices,
//! delivers the trigger and commits everything in one store transaction.

use std::fmt;

use charm_store::{Changeset, Notice, NoticeLog, ObserverRef, SqliteStore, StateKey, Store, StoreError};

use crate::config::DispatcherConfig;
use crate::error::{KernelError, RegistrationError};
use crate::event::{
    Event, EventRef, EventRegistry, Outcome, Payload, PayloadRef, PayloadType, Trigger,
    validate_name,
};
use crate::handle::{Handle, HandleRegistry};
use crate::observer::{Binding, ObserverTable};
use crate::state::{StateBag, StateCache};

mod commit;
mod delivery;
mod replay;
#[cfg(test)]
mod test_support;

/// Path of the dispatcher's own handle, which emits the commit events.
pub const FRAMEWORK_PATH: &str = "framework";
pub const PRE_COMMIT: &str = "pre-commit";
pub const COMMIT: &str = "commit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Replaying,
    Handling,
    Committing,
    Done,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Loading => "loading",
            Phase::Replaying => "replaying",
            Phase::Handling => "handling",
            Phase::Committing => "committing",
            Phase::Done => "done",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// What a committed invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Queued notices handed back to their handler.
    pub replayed: usize,
    /// Replayed notices the handler deferred again.
    pub redeferred: usize,
    /// Queued notices whose observer was not reconstructed, or could not be restored.
    pub lost: usize,
    /// Handler runs outside replay, including nested and framework events.
    pub delivered: usize,
    /// Notices newly added to the queue.
    pub deferred: usize,
    /// Queue length after commit.
    pub pending: usize,
    /// State bags written.
    pub state_writes: usize,
}

/// An invocation that committed nothing.
#[derive(Debug, thiserror::Error)]
#[error("invocation aborted during {phase}: {error}")]
pub struct Aborted {
    pub phase: Phase,
    #[source]
    pub error: KernelError,
}

impl Aborted {
    pub fn is_registration(&self) -> bool {
        matches!(self.error, KernelError::Registration(_))
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(
            self.error,
            KernelError::Snapshot(_) | KernelError::Restore { .. }
        )
    }

    /// Process exit status: 2 for registration errors, 3 for snapshot errors,
    /// 1 for everything that a retry may fix.
    pub fn exit_code(&self) -> u8 {
        if self.is_registration() {
            2
        } else if self.is_snapshot() {
            3
        } else {
            1
        }
    }
}

pub struct Dispatcher {
    store: Box<dyn Store>,
    phase: Phase,
    objects: HandleRegistry,
    events: EventRegistry,
    observers: ObserverTable,
    notices: NoticeLog,
    state: StateCache,
    next_sequence: u64,
    framework: Handle,
    report: DispatchReport,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("phase", &self.phase)
            .field("objects", &self.objects.len())
            .field("observers", &self.observers.len())
            .field("pending", &self.notices.len())
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Open (and lock) the SQLite store named by `config`.
    pub fn open(config: &DispatcherConfig) -> Result<Self, KernelError> {
        let store = SqliteStore::open(&config.state_path, config.lock)?;
        Self::with_store(Box::new(store))
    }

    /// Enter `Loading` on an already-locked store: read the notice queue and the
    /// sequence counter. State bags load on first access.
    pub fn with_store(mut store: Box<dyn Store>) -> Result<Self, KernelError> {
        let stored = store.load_notices()?;
        let next_sequence = stored
            .iter()
            .map(|entry| entry.notice.sequence_id + 1)
            .fold(store.next_sequence()?.max(1), u64::max);

        let framework = Handle::root(FRAMEWORK_PATH)?;
        let mut objects = HandleRegistry::default();
        objects.register(&framework)?;
        let mut events = EventRegistry::default();
        events.declare(&framework, PRE_COMMIT, PayloadType::of::<()>())?;
        events.declare(&framework, COMMIT, PayloadType::of::<()>())?;

        log::debug!(
            "loading: {} queued notices, next sequence {next_sequence}",
            stored.len()
        );
        Ok(Self {
            store,
            phase: Phase::Loading,
            objects,
            events,
            observers: ObserverTable::default(),
            notices: NoticeLog::from_stored(stored),
            state: StateCache::default(),
            next_sequence,
            framework,
            report: DispatchReport::default(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Emitter of `pre-commit` and `commit`.
    pub fn framework(&self) -> &Handle {
        &self.framework
    }

    pub fn objects(&self) -> &HandleRegistry {
        &self.objects
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    pub fn observers(&self) -> &ObserverTable {
        &self.observers
    }

    /// Queued notices in FIFO order, including ones deferred in this invocation.
    pub fn pending_notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.pending()
    }

    pub fn register_object(&mut self, handle: &Handle) -> Result<(), RegistrationError> {
        self.ensure_registering("register objects")?;
        self.objects.register(handle)
    }

    /// Declare that `emitter` raises `kind` events carrying `P`.
    pub fn define_event<P: Payload>(
        &mut self,
        emitter: &Handle,
        kind: &str,
    ) -> Result<(), RegistrationError> {
        self.ensure_registering("declare events")?;
        self.events.declare(emitter, kind, PayloadType::of::<P>())?;
        Ok(())
    }

    /// Bind `owner`'s `handler_name` to `kind` events from `emitter`. The
    /// handler's payload type must be the declared one.
    pub fn observe<P, F>(
        &mut self,
        emitter: &Handle,
        kind: &str,
        owner: &Handle,
        handler_name: &str,
        handler: F,
    ) -> Result<(), RegistrationError>
    where
        P: Payload,
        F: Fn(&mut Dispatcher, &Event<'_, P>) -> anyhow::Result<Outcome> + 'static,
    {
        self.ensure_registering("register observers")?;
        validate_name(handler_name)?;
        if !self.objects.contains(owner.path()) {
            return Err(RegistrationError::UnknownOwner(owner.path().to_string()));
        }
        let observer = ObserverRef::new(owner.path(), handler_name);
        let binding = Binding::new(emitter.path(), kind, observer, handler);
        self.observers.observe(&self.events, binding)
    }

    /// Drop every queued notice bound to this observer. Returns how many went.
    /// Only while `Loading`, so replay never sees the queue shrink under it.
    pub fn acknowledge(
        &mut self,
        owner_path: &str,
        handler_name: &str,
    ) -> Result<usize, RegistrationError> {
        self.ensure_registering("acknowledge notices")?;
        let dropped = self.notices.remove_observer(owner_path, handler_name);
        if dropped > 0 {
            log::info!("acknowledged {dropped} queued notices for {owner_path}.{handler_name}");
        }
        Ok(dropped)
    }

    /// The `(owner, name)` bag, loaded from the store on first access.
    pub fn state(&mut self, owner: &Handle, name: &str) -> Result<&mut StateBag, KernelError> {
        validate_name(name)?;
        self.state
            .bag(self.store.as_mut(), StateKey::new(owner.path(), name))
    }

    /// Delete the `(owner, name)` bag at commit.
    pub fn drop_state(&mut self, owner: &Handle, name: &str) -> Result<(), KernelError> {
        validate_name(name)?;
        self.state.drop_bag(StateKey::new(owner.path(), name));
        Ok(())
    }

    /// Raise an event inside the invocation and deliver it to its observers now.
    /// Returns the event's sequence id.
    pub fn emit<P: Payload>(
        &mut self,
        source: &Handle,
        kind: &str,
        payload: &P,
    ) -> Result<u64, KernelError> {
        if !matches!(
            self.phase,
            Phase::Replaying | Phase::Handling | Phase::Committing
        ) {
            return Err(KernelError::InvalidPhase {
                operation: "emit",
                phase: self.phase,
            });
        }
        let declared = self.events.require(source.path(), kind)?;
        let emitted = PayloadType::of::<P>();
        if declared != emitted {
            return Err(RegistrationError::EmitPayloadMismatch {
                emitter: source.path().to_string(),
                kind: kind.to_string(),
                declared: declared.name(),
                emitted: emitted.name(),
            }
            .into());
        }
        let sequence_id = self.allocate_sequence();
        let event = EventRef {
            kind,
            source,
            sequence_id,
            payload: PayloadRef::Live(payload),
            redelivered: false,
        };
        self.deliver(&event)?;
        Ok(sequence_id)
    }

    /// Run the invocation to completion. On failure nothing is written and the
    /// store is released unchanged.
    pub fn dispatch(mut self, trigger: Trigger) -> Result<DispatchReport, Aborted> {
        match self.run(&trigger) {
            Ok(()) => {
                self.enter(Phase::Done);
                log::info!(
                    "'{}' on '{}' committed: {:?}",
                    trigger.kind,
                    trigger.source,
                    self.report
                );
                Ok(self.report)
            }
            Err(error) => Err(self.abort(error)),
        }
    }

    fn run(&mut self, trigger: &Trigger) -> Result<(), KernelError> {
        self.enter(Phase::Replaying);
        self.replay()?;
        self.enter(Phase::Handling);
        self.handle_trigger(trigger)?;
        self.enter(Phase::Committing);
        self.commit()
    }

    fn handle_trigger(&mut self, trigger: &Trigger) -> Result<(), KernelError> {
        if self
            .events
            .lookup(trigger.source.path(), &trigger.kind)
            .is_none()
        {
            log::info!(
                "'{}' is not declared on '{}'; nothing to deliver",
                trigger.kind,
                trigger.source
            );
            return Ok(());
        }
        let sequence_id = self.allocate_sequence();
        let event = EventRef {
            kind: &trigger.kind,
            source: &trigger.source,
            sequence_id,
            payload: PayloadRef::Stored(&trigger.payload),
            redelivered: false,
        };
        self.deliver(&event)
    }

    fn abort(mut self, error: KernelError) -> Aborted {
        let phase = self.phase;
        log::error!("invocation aborted during {phase}: {error}");
        self.phase = Phase::Aborted;
        if let Err(err) = self.store.rollback() {
            log::warn!("rollback after abort failed: {err}");
        }
        Aborted { phase, error }
    }

    fn enter(&mut self, phase: Phase) {
        log::debug!("{} -> {phase}", self.phase);
        self.phase = phase;
    }

    fn ensure_registering(&self, what: &'static str) -> Result<(), RegistrationError> {
        if self.phase == Phase::Loading {
            Ok(())
        } else {
            Err(RegistrationError::Closed {
                phase: self.phase,
                what,
            })
        }
    }

    fn allocate_sequence(&mut self) -> u64 {
        let id = self.next_sequence;
        self.next_sequence += 1;
        id
    }
}
