use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use charm_value::Value;

use crate::{
    Changeset, Notice, NoticeId, StateKey, Store, StoreError, StoreResult, StoredNotice, io_error,
};

const MEM_PATH: &str = "<memory>";

/// Shared in-memory backing data, useful for unit tests that simulate several
/// invocations against one store.
#[derive(Debug, Default, Clone)]
pub struct MemBackend {
    inner: Arc<Mutex<MemData>>,
}

#[derive(Debug, Default)]
struct MemData {
    locked: bool,
    notices: Vec<StoredNotice>,
    next_notice_id: NoticeId,
    state: BTreeMap<StateKey, Value>,
    next_sequence: Option<u64>,
    commits: usize,
    fail_next_commit: bool,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the writer lock. Fails fast if another [`MemStore`] is open.
    pub fn open(&self) -> StoreResult<MemStore> {
        let mut data = self.data();
        if data.locked {
            return Err(StoreError::Locked {
                path: MEM_PATH.into(),
            });
        }
        data.locked = true;
        Ok(MemStore {
            backend: self.clone(),
            active: true,
        })
    }

    /// Committed notices in FIFO order.
    pub fn notices(&self) -> Vec<Notice> {
        self.data()
            .notices
            .iter()
            .map(|entry| entry.notice.clone())
            .collect()
    }

    pub fn state(&self, key: &StateKey) -> Option<Value> {
        self.data().state.get(key).cloned()
    }

    pub fn commits(&self) -> usize {
        self.data().commits
    }

    pub fn is_locked(&self) -> bool {
        self.data().locked
    }

    /// Make the next commit fail with an I/O error without applying anything.
    pub fn fail_next_commit(&self) {
        self.data().fail_next_commit = true;
    }

    fn data(&self) -> MutexGuard<'_, MemData> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive handle on a [`MemBackend`]; the lock is released on commit,
/// rollback or drop.
#[derive(Debug)]
pub struct MemStore {
    backend: MemBackend,
    active: bool,
}

impl MemStore {
    fn data(&self) -> StoreResult<MutexGuard<'_, MemData>> {
        if self.active {
            Ok(self.backend.data())
        } else {
            Err(StoreError::Closed)
        }
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            self.backend.data().locked = false;
        }
    }
}

impl Store for MemStore {
    fn load_notices(&mut self) -> StoreResult<Vec<StoredNotice>> {
        Ok(self.data()?.notices.clone())
    }

    fn load_state(&mut self, key: &StateKey) -> StoreResult<Option<Value>> {
        Ok(self.data()?.state.get(key).cloned())
    }

    fn list_state(&mut self) -> StoreResult<Vec<StateKey>> {
        Ok(self.data()?.state.keys().cloned().collect())
    }

    fn next_sequence(&mut self) -> StoreResult<u64> {
        Ok(self.data()?.next_sequence.unwrap_or(1))
    }

    fn commit(&mut self, changes: Changeset) -> StoreResult<()> {
        let result = {
            let mut data = self.data()?;
            if data.fail_next_commit {
                data.fail_next_commit = false;
                Err(io_error(
                    MEM_PATH,
                    io::Error::new(io::ErrorKind::Other, "injected commit failure"),
                ))
            } else {
                data.notices
                    .retain(|entry| !changes.notices_removed.contains(&entry.id));
                for notice in changes.notices_added {
                    data.next_notice_id += 1;
                    let id = data.next_notice_id;
                    data.notices.push(StoredNotice { id, notice });
                }
                for key in &changes.state_deletes {
                    data.state.remove(key);
                }
                for (key, value) in changes.state_writes {
                    data.state.insert(key, value);
                }
                let current = data.next_sequence.unwrap_or(1);
                data.next_sequence = Some(current.max(changes.next_sequence));
                data.commits += 1;
                Ok(())
            }
        };
        self.release();
        result
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemStore {
    fn drop(&mut self) {
        self.release();
    }
}
