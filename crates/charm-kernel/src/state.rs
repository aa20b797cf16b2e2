//! Stored-state bags: named key/value maps scoped to an owner handle, loaded
//! lazily and written back at commit.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use charm_store::{Changeset, StateKey, Store, StoreError};
use charm_value::{Value, from_value, to_value};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{KernelError, SnapshotError};

#[derive(Debug)]
pub struct StateBag {
    key: StateKey,
    values: BTreeMap<String, Value>,
    dirty: bool,
}

impl StateBag {
    fn new(key: StateKey, values: BTreeMap<String, Value>) -> Self {
        Self {
            key,
            values,
            dirty: false,
        }
    }

    pub fn key(&self) -> &StateKey {
        &self.key
    }

    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, SnapshotError> {
        self.values
            .get(name)
            .map(|value| from_value(value.clone()))
            .transpose()
    }

    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Snapshots `value` now, so a non-primitive value fails here rather than at commit.
    pub fn set<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<(), SnapshotError> {
        let value = to_value(value)?;
        if self.values.get(name) != Some(&value) {
            self.values.insert(name.to_string(), value);
            self.dirty = true;
        }
        Ok(())
    }

    /// Set `name` only if it has no value yet. Returns whether it was set.
    pub fn set_default<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        value: &T,
    ) -> Result<bool, SnapshotError> {
        if self.values.contains_key(name) {
            return Ok(false);
        }
        self.set(name, value)?;
        Ok(true)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let removed = self.values.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Bags touched by this invocation.
#[derive(Debug, Default)]
pub(crate) struct StateCache {
    bags: BTreeMap<StateKey, StateBag>,
    dropped: BTreeSet<StateKey>,
}

impl StateCache {
    pub(crate) fn bag(
        &mut self,
        store: &mut dyn Store,
        key: StateKey,
    ) -> Result<&mut StateBag, KernelError> {
        match self.bags.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let values = if self.dropped.contains(entry.key()) {
                    BTreeMap::new()
                } else {
                    load(store, entry.key())?
                };
                let key = entry.key().clone();
                Ok(entry.insert(StateBag::new(key, values)))
            }
        }
    }

    pub(crate) fn drop_bag(&mut self, key: StateKey) {
        self.bags.remove(&key);
        self.dropped.insert(key);
    }

    /// Count of bags that will be written.
    pub(crate) fn write_changes(&self, changes: &mut Changeset) -> usize {
        changes.state_deletes.extend(self.dropped.iter().cloned());
        let mut written = 0;
        for (key, bag) in &self.bags {
            if bag.dirty {
                changes
                    .state_writes
                    .push((key.clone(), Value::Map(bag.values.clone())));
                written += 1;
            }
        }
        written
    }
}

fn load(store: &mut dyn Store, key: &StateKey) -> Result<BTreeMap<String, Value>, KernelError> {
    match store.load_state(key)? {
        None => Ok(BTreeMap::new()),
        Some(Value::Map(values)) => Ok(values),
        Some(other) => Err(StoreError::Corrupt(format!(
            "state bag {key} holds a {} instead of a map",
            other.kind_name()
        ))
        .into()),
    }
}
