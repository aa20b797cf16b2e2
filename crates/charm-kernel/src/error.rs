use charm_store::{ObserverRef, StoreError};
use thiserror::Error;

use crate::dispatcher::Phase;

/// Failure to turn a payload into primitive data, or to rebuild it.
pub use charm_value::ValueError as SnapshotError;

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("handle {field} must not be empty")]
    Empty { field: &'static str },
    #[error("handle {field} '{value}' contains reserved character '{ch}'")]
    InvalidChar {
        field: &'static str,
        value: String,
        ch: char,
    },
    #[error("malformed handle path '{path}': {reason}")]
    Malformed { path: String, reason: String },
}

/// Programming errors caught while the object graph is being built.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Handle(#[from] HandleError),
    #[error("an object is already registered at '{0}'")]
    DuplicateObject(String),
    #[error("observer owner '{0}' is not a registered object")]
    UnknownOwner(String),
    #[error("'{emitter}' does not declare event '{kind}'")]
    UnknownEvent { emitter: String, kind: String },
    #[error("event '{kind}' on '{emitter}' is declared with payload {existing}, not {requested}")]
    ConflictingEvent {
        emitter: String,
        kind: String,
        existing: &'static str,
        requested: &'static str,
    },
    #[error(
        "handler {observer} expects {handler_payload} but '{kind}' on '{emitter}' carries {event_payload}"
    )]
    PayloadMismatch {
        emitter: String,
        kind: String,
        observer: ObserverRef,
        event_payload: &'static str,
        handler_payload: &'static str,
    },
    #[error("emitting '{kind}' on '{emitter}' with {emitted}, declared payload is {declared}")]
    EmitPayloadMismatch {
        emitter: String,
        kind: String,
        declared: &'static str,
        emitted: &'static str,
    },
    #[error("{observer} already observes '{kind}' on '{emitter}'")]
    DuplicateObserver {
        emitter: String,
        kind: String,
        observer: ObserverRef,
    },
    #[error("invalid name '{0}'")]
    InvalidName(String),
    #[error("cannot {what} during {phase}: registration is closed")]
    Closed { phase: Phase, what: &'static str },
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("handler {observer} failed on '{kind}' (sequence {sequence_id}): {source}")]
    Handler {
        observer: ObserverRef,
        kind: String,
        sequence_id: u64,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot restore '{kind}' (sequence {sequence_id}): {source}")]
    Restore {
        kind: String,
        sequence_id: u64,
        #[source]
        source: SnapshotError,
    },
    #[error("{operation} is not allowed during {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: Phase,
    },
    #[error("framework event '{0}' cannot be deferred")]
    CannotDefer(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<HandleError> for KernelError {
    fn from(err: HandleError) -> Self {
        KernelError::Registration(err.into())
    }
}
