//! Event declarations, the typed view handlers receive, and the external trigger.

use std::any::{Any, TypeId, type_name};
use std::fmt;

use charm_value::{Snapshot, Value};
use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{RegistrationError, SnapshotError};
use crate::handle::Handle;

/// Anything that can ride on an event: snapshot-able and `'static`.
pub trait Payload: Snapshot + Any {}

impl<T: Snapshot + Any> Payload for T {}

/// Runtime identity of a payload type, compared when observers register.
#[derive(Clone, Copy)]
pub struct PayloadType {
    id: TypeId,
    name: &'static str,
}

impl PayloadType {
    pub fn of<P: Payload>() -> Self {
        Self {
            id: TypeId::of::<P>(),
            name: type_name::<P>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for PayloadType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PayloadType {}

impl fmt::Debug for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// What a handler did with the event it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// Keep the event queued and hand it to this handler again next invocation.
    Deferred,
}

/// Event kinds each emitter declares, keyed by `(emitter_path, kind)`.
#[derive(Debug, Default)]
pub struct EventRegistry {
    declared: IndexMap<(String, String), PayloadType>,
}

impl EventRegistry {
    /// Returns false when the identical declaration already exists.
    pub fn declare(
        &mut self,
        emitter: &Handle,
        kind: &str,
        payload: PayloadType,
    ) -> Result<bool, RegistrationError> {
        validate_name(kind)?;
        let key = (emitter.path().to_string(), kind.to_string());
        match self.declared.get(&key) {
            Some(existing) if *existing == payload => Ok(false),
            Some(existing) => Err(RegistrationError::ConflictingEvent {
                emitter: key.0,
                kind: key.1,
                existing: existing.name(),
                requested: payload.name(),
            }),
            None => {
                self.declared.insert(key, payload);
                Ok(true)
            }
        }
    }

    pub fn lookup(&self, emitter_path: &str, kind: &str) -> Option<PayloadType> {
        self.declared
            .get(&(emitter_path.to_string(), kind.to_string()))
            .copied()
    }

    pub fn require(&self, emitter_path: &str, kind: &str) -> Result<PayloadType, RegistrationError> {
        self.lookup(emitter_path, kind)
            .ok_or_else(|| RegistrationError::UnknownEvent {
                emitter: emitter_path.to_string(),
                kind: kind.to_string(),
            })
    }

    /// `(emitter_path, kind)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.declared
            .keys()
            .map(|(emitter, kind)| (emitter.as_str(), kind.as_str()))
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), RegistrationError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(RegistrationError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// The event as a handler sees it.
///
/// On redelivery the payload has been rebuilt from its snapshot, so fields that
/// are not persisted hold their defaults.
#[derive(Debug)]
pub struct Event<'a, P> {
    kind: &'a str,
    source: &'a Handle,
    sequence_id: u64,
    payload: &'a P,
    redelivered: bool,
}

impl<'a, P> Event<'a, P> {
    pub fn kind(&self) -> &'a str {
        self.kind
    }

    pub fn source(&self) -> &'a Handle {
        self.source
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn payload(&self) -> &'a P {
        self.payload
    }

    pub fn is_redelivery(&self) -> bool {
        self.redelivered
    }
}

/// Type-erased event passed through the observer table.
pub(crate) struct EventRef<'a> {
    pub kind: &'a str,
    pub source: &'a Handle,
    pub sequence_id: u64,
    pub payload: PayloadRef<'a>,
    pub redelivered: bool,
}

impl<'a> EventRef<'a> {
    pub(crate) fn typed<'b, P>(&'b self, payload: &'b P) -> Event<'b, P> {
        Event {
            kind: self.kind,
            source: self.source,
            sequence_id: self.sequence_id,
            payload,
            redelivered: self.redelivered,
        }
    }

    /// Primitive form stored in a notice.
    pub(crate) fn snapshot(&self) -> Result<Value, SnapshotError> {
        match self.payload {
            PayloadRef::Live(live) => live.snapshot_value(),
            PayloadRef::Stored(value) => Ok(value.clone()),
        }
    }
}

pub(crate) enum PayloadRef<'a> {
    /// Raised by `emit` in this invocation.
    Live(&'a dyn LivePayload),
    /// Trigger payload or replayed snapshot; handlers restore their own copy.
    Stored(&'a Value),
}

pub(crate) trait LivePayload {
    fn as_any(&self) -> &dyn Any;
    fn snapshot_value(&self) -> Result<Value, SnapshotError>;
}

impl<P: Payload> LivePayload for P {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn snapshot_value(&self) -> Result<Value, SnapshotError> {
        self.snapshot()
    }
}

/// The external event that started this invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub source: Handle,
    pub kind: String,
    pub payload: Value,
}

impl Trigger {
    pub fn new(source: Handle, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            source,
            kind: kind.into(),
            payload,
        }
    }

    pub fn from_payload<P: Serialize + ?Sized>(
        source: Handle,
        kind: impl Into<String>,
        payload: &P,
    ) -> Result<Self, SnapshotError> {
        Ok(Self::new(source, kind, charm_value::to_value(payload)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Config {
        name: String,
    }

    #[test]
    fn declare_is_idempotent_for_same_payload() {
        let mut events = EventRegistry::default();
        let charm = Handle::root("Charm").unwrap();
        assert!(events.declare(&charm, "start", PayloadType::of::<()>()).unwrap());
        assert!(!events.declare(&charm, "start", PayloadType::of::<()>()).unwrap());
        let err = events
            .declare(&charm, "start", PayloadType::of::<Config>())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::ConflictingEvent { .. }));
        assert_eq!(events.lookup("Charm", "start"), Some(PayloadType::of::<()>()));
    }

    #[test]
    fn undeclared_event_is_reported() {
        let events = EventRegistry::default();
        let err = events.require("Charm", "install").unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownEvent { kind, .. } if kind == "install"));
    }

    #[test]
    fn event_names_must_be_plain() {
        let mut events = EventRegistry::default();
        let charm = Handle::root("Charm").unwrap();
        assert!(events.declare(&charm, "", PayloadType::of::<()>()).is_err());
        assert!(events.declare(&charm, "config changed", PayloadType::of::<()>()).is_err());
    }

    #[test]
    fn trigger_snapshots_payload() {
        let charm = Handle::root("Charm").unwrap();
        let trigger = Trigger::from_payload(
            charm,
            "config-changed",
            &Config {
                name: "db".into(),
            },
        )
        .unwrap();
        let restored = Config::restore(trigger.payload.clone()).unwrap();
        assert_eq!(restored.name, "db");
    }
}
