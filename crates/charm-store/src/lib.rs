//! Durable single-writer store for stored-state bags and the deferred-notice queue,
//! with SQLite and in-memory backends.

mod mem_store;
mod notice_log;
mod sqlite_store;

pub use mem_store::{MemBackend, MemStore};
pub use notice_log::NoticeLog;
pub use sqlite_store::SqliteStore;

use std::{fmt, io, path::PathBuf, time::Duration};

use charm_value::{Value, ValueError};

/// Version of the on-disk layout written by this crate.
pub const SCHEMA_VERSION: i64 = 1;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-assigned identifier of a persisted notice. Ascending ids are FIFO order.
pub type NoticeId = i64;

/// One invocation's exclusive view of the durable store.
///
/// Implementations hold the writer lock from open until `commit` or `rollback`;
/// reads observe only data committed by earlier invocations.
pub trait Store: Send {
    fn load_notices(&mut self) -> StoreResult<Vec<StoredNotice>>;
    fn load_state(&mut self, key: &StateKey) -> StoreResult<Option<Value>>;
    fn list_state(&mut self) -> StoreResult<Vec<StateKey>>;
    /// Next event sequence id; ids below it have been handed out before.
    fn next_sequence(&mut self) -> StoreResult<u64>;
    /// Apply every change in one transaction and release the lock.
    fn commit(&mut self, changes: Changeset) -> StoreResult<()>;
    /// Discard the invocation and release the lock. Idempotent.
    fn rollback(&mut self) -> StoreResult<()>;
}

/// How to react when another invocation already holds the writer lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    #[default]
    FailFast,
    Wait(Duration),
}

impl LockPolicy {
    pub(crate) fn busy_timeout(&self) -> Duration {
        match self {
            LockPolicy::FailFast => Duration::ZERO,
            LockPolicy::Wait(timeout) => *timeout,
        }
    }
}

/// Key of a stored-state bag: owning handle path plus bag name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey {
    pub owner_path: String,
    pub name: String,
}

impl StateKey {
    pub fn new(owner_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner_path: owner_path.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner_path, self.name)
    }
}

/// Identity of the handler a notice is bound to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverRef {
    pub owner_path: String,
    pub handler_name: String,
}

impl ObserverRef {
    pub fn new(owner_path: impl Into<String>, handler_name: impl Into<String>) -> Self {
        Self {
            owner_path: owner_path.into(),
            handler_name: handler_name.into(),
        }
    }
}

impl fmt::Display for ObserverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner_path, self.handler_name)
    }
}

/// A deferred event bound to one observer.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub sequence_id: u64,
    pub event_kind: String,
    pub source_path: String,
    pub snapshot: Value,
    pub observer: ObserverRef,
}

impl Notice {
    /// Two notices with the same event and observer are the same notice,
    /// whatever their snapshots say.
    pub fn same_identity(&self, other: &Notice) -> bool {
        self.sequence_id == other.sequence_id
            && self.event_kind == other.event_kind
            && self.source_path == other.source_path
            && self.observer == other.observer
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNotice {
    pub id: NoticeId,
    pub notice: Notice,
}

/// Everything one invocation writes, applied atomically by [`Store::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    pub state_writes: Vec<(StateKey, Value)>,
    pub state_deletes: Vec<StateKey>,
    pub notices_removed: Vec<NoticeId>,
    /// Appended in order after every surviving notice.
    pub notices_added: Vec<Notice>,
    /// Stores keep the larger of this and the persisted counter.
    pub next_sequence: u64,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.state_writes.is_empty()
            && self.state_deletes.is_empty()
            && self.notices_removed.is_empty()
            && self.notices_added.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store at {path:?} is locked by another invocation")]
    Locked { path: PathBuf },
    #[error("value encoding error: {0}")]
    Value(#[from] ValueError),
    #[error("store schema version {found} is newer than supported version {supported}")]
    SchemaVersion { found: i64, supported: i64 },
    #[error("corrupt store: {0}")]
    Corrupt(String),
    #[error("store transaction already finished")]
    Closed,
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source: err,
    }
}
