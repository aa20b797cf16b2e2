//! Observer bindings: which handler runs for which `(emitter, kind)` pair, and in
//! what order.

use std::fmt;
use std::rc::Rc;

use charm_store::{ObserverRef, StoreError};
use indexmap::IndexMap;

use crate::dispatcher::Dispatcher;
use crate::error::{KernelError, RegistrationError, SnapshotError};
use crate::event::{Event, EventRef, EventRegistry, Outcome, Payload, PayloadRef, PayloadType};

pub(crate) type ErasedHandler = Rc<dyn Fn(&mut Dispatcher, &EventRef<'_>) -> Result<Outcome, KernelError>>;

/// One registration. Rebuilt every invocation during object construction.
#[derive(Clone)]
pub struct Binding {
    emitter: String,
    kind: String,
    observer: ObserverRef,
    payload: PayloadType,
    handler: ErasedHandler,
}

impl Binding {
    pub(crate) fn new<P, F>(emitter: &str, kind: &str, observer: ObserverRef, handler: F) -> Self
    where
        P: Payload,
        F: Fn(&mut Dispatcher, &Event<'_, P>) -> anyhow::Result<Outcome> + 'static,
    {
        Self {
            emitter: emitter.to_string(),
            kind: kind.to_string(),
            observer: observer.clone(),
            payload: PayloadType::of::<P>(),
            handler: erase(observer, handler),
        }
    }

    pub fn emitter(&self) -> &str {
        &self.emitter
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn observer(&self) -> &ObserverRef {
        &self.observer
    }

    pub fn payload(&self) -> PayloadType {
        self.payload
    }

    pub(crate) fn call(
        &self,
        dispatcher: &mut Dispatcher,
        event: &EventRef<'_>,
    ) -> Result<Outcome, KernelError> {
        (self.handler)(dispatcher, event)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("emitter", &self.emitter)
            .field("kind", &self.kind)
            .field("observer", &self.observer)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

fn erase<P, F>(observer: ObserverRef, handler: F) -> ErasedHandler
where
    P: Payload,
    F: Fn(&mut Dispatcher, &Event<'_, P>) -> anyhow::Result<Outcome> + 'static,
{
    Rc::new(
        move |dispatcher: &mut Dispatcher, event: &EventRef<'_>| -> Result<Outcome, KernelError> {
            let result = match event.payload {
                PayloadRef::Live(live) => {
                    let payload = live.as_any().downcast_ref::<P>().ok_or_else(|| {
                        RegistrationError::PayloadMismatch {
                            emitter: event.source.path().to_string(),
                            kind: event.kind.to_string(),
                            observer: observer.clone(),
                            event_payload: "<unknown>",
                            handler_payload: std::any::type_name::<P>(),
                        }
                    })?;
                    handler(dispatcher, &event.typed(payload))
                }
                PayloadRef::Stored(value) => {
                    let payload =
                        P::restore(value.clone()).map_err(|source| KernelError::Restore {
                            kind: event.kind.to_string(),
                            sequence_id: event.sequence_id,
                            source,
                        })?;
                    handler(dispatcher, &event.typed(&payload))
                }
            };
            result.map_err(|err| classify(err, &observer, event))
        },
    )
}

/// Typed kernel failures raised inside a handler (nested emits, late
/// registration, state access) keep their identity; anything else is the
/// handler's own failure.
fn classify(err: anyhow::Error, observer: &ObserverRef, event: &EventRef<'_>) -> KernelError {
    let err = match err.downcast::<KernelError>() {
        Ok(kernel) => return kernel,
        Err(err) => err,
    };
    let err = match err.downcast::<RegistrationError>() {
        Ok(registration) => return KernelError::Registration(registration),
        Err(err) => err,
    };
    let err = match err.downcast::<SnapshotError>() {
        Ok(snapshot) => return KernelError::Snapshot(snapshot),
        Err(err) => err,
    };
    match err.downcast::<StoreError>() {
        Ok(store) => KernelError::Store(store),
        Err(source) => KernelError::Handler {
            observer: observer.clone(),
            kind: event.kind.to_string(),
            sequence_id: event.sequence_id,
            source,
        },
    }
}

/// Bindings grouped by `(emitter_path, kind)` in registration order.
#[derive(Debug, Default)]
pub struct ObserverTable {
    bindings: IndexMap<(String, String), Vec<Binding>>,
}

impl ObserverTable {
    /// Validate a binding against the declared payload type and add it.
    pub fn observe(
        &mut self,
        events: &EventRegistry,
        binding: Binding,
    ) -> Result<(), RegistrationError> {
        let declared = events.require(&binding.emitter, &binding.kind)?;
        if declared != binding.payload {
            return Err(RegistrationError::PayloadMismatch {
                emitter: binding.emitter,
                kind: binding.kind,
                observer: binding.observer,
                event_payload: declared.name(),
                handler_payload: binding.payload.name(),
            });
        }
        let entry = self
            .bindings
            .entry((binding.emitter.clone(), binding.kind.clone()))
            .or_default();
        if entry.iter().any(|b| b.observer == binding.observer) {
            return Err(RegistrationError::DuplicateObserver {
                emitter: binding.emitter,
                kind: binding.kind,
                observer: binding.observer,
            });
        }
        entry.push(binding);
        Ok(())
    }

    pub fn handlers_for(&self, emitter_path: &str, kind: &str) -> &[Binding] {
        self.bindings
            .get(&(emitter_path.to_string(), kind.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The binding a persisted notice names, if it was registered again.
    pub fn find(&self, emitter_path: &str, kind: &str, observer: &ObserverRef) -> Option<&Binding> {
        self.handlers_for(emitter_path, kind)
            .iter()
            .find(|binding| &binding.observer == observer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.bindings.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
