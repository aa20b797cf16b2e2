use crate::{Changeset, Notice, NoticeId, StoredNotice};

/// Working copy of the deferred-notice queue for one invocation.
///
/// Loaded entries keep their store ids; removals and appends are tracked so the
/// commit only touches what changed. A redeferred notice keeps its slot, so its
/// position and sequence id survive verbatim.
#[derive(Debug, Default)]
pub struct NoticeLog {
    slots: Vec<Slot>,
}

#[derive(Debug)]
struct Slot {
    id: Option<NoticeId>,
    notice: Notice,
    removed: bool,
}

impl NoticeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stored(stored: Vec<StoredNotice>) -> Self {
        let slots = stored
            .into_iter()
            .map(|entry| Slot {
                id: Some(entry.id),
                notice: entry.notice,
                removed: false,
            })
            .collect();
        Self { slots }
    }

    /// Queue a notice unless one with the same identity is already pending.
    /// Returns whether a new entry was created.
    pub fn append(&mut self, notice: Notice) -> bool {
        if self.contains(&notice) {
            return false;
        }
        self.slots.push(Slot {
            id: None,
            notice,
            removed: false,
        });
        true
    }

    pub fn contains(&self, notice: &Notice) -> bool {
        self.live().any(|slot| slot.notice.same_identity(notice))
    }

    /// Mark a pending notice as consumed. Returns false if it was not pending.
    pub fn remove(&mut self, notice: &Notice) -> bool {
        match self
            .slots
            .iter_mut()
            .find(|slot| !slot.removed && slot.notice.same_identity(notice))
        {
            Some(slot) => {
                slot.removed = true;
                true
            }
            None => false,
        }
    }

    /// Drop every pending notice bound to the given observer.
    pub fn remove_observer(&mut self, owner_path: &str, handler_name: &str) -> usize {
        let mut dropped = 0;
        for slot in self.slots.iter_mut().filter(|slot| !slot.removed) {
            if slot.notice.observer.owner_path == owner_path
                && slot.notice.observer.handler_name == handler_name
            {
                slot.removed = true;
                dropped += 1;
            }
        }
        dropped
    }

    /// Pending notices in FIFO order.
    pub fn pending(&self) -> impl Iterator<Item = &Notice> {
        self.live().map(|slot| &slot.notice)
    }

    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the queue's delta into a changeset.
    pub fn write_changes(&self, changes: &mut Changeset) {
        for slot in &self.slots {
            match (slot.id, slot.removed) {
                (Some(id), true) => changes.notices_removed.push(id),
                (None, false) => changes.notices_added.push(slot.notice.clone()),
                _ => {}
            }
        }
    }

    fn live(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|slot| !slot.removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObserverRef;
    use charm_value::Value;

    fn notice(seq: u64, kind: &str, handler: &str) -> Notice {
        Notice {
            sequence_id: seq,
            event_kind: kind.into(),
            source_path: "Charm/on".into(),
            snapshot: Value::Null,
            observer: ObserverRef::new("Charm", handler),
        }
    }

    #[test]
    fn append_deduplicates_same_event_and_observer() {
        let mut log = NoticeLog::new();
        assert!(log.append(notice(1, "start", "on_start")));
        assert!(!log.append(notice(1, "start", "on_start")));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn distinct_observers_of_one_event_each_keep_a_notice() {
        let mut log = NoticeLog::new();
        assert!(log.append(notice(1, "start", "first")));
        assert!(log.append(notice(1, "start", "second")));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn redeferred_notice_keeps_its_position() {
        let stored = vec![
            StoredNotice {
                id: 10,
                notice: notice(1, "install", "h"),
            },
            StoredNotice {
                id: 11,
                notice: notice(2, "start", "h"),
            },
        ];
        let mut log = NoticeLog::from_stored(stored);
        assert!(!log.append(notice(1, "install", "h")));
        assert!(log.append(notice(3, "config-changed", "h")));
        let order: Vec<u64> = log.pending().map(|n| n.sequence_id).collect();
        assert_eq!(order, vec![1, 2, 3]);

        let mut changes = Changeset::default();
        log.write_changes(&mut changes);
        assert!(changes.notices_removed.is_empty());
        assert_eq!(changes.notices_added.len(), 1);
        assert_eq!(changes.notices_added[0].sequence_id, 3);
    }

    #[test]
    fn removal_and_observer_acknowledgement_are_tracked() {
        let stored = vec![
            StoredNotice {
                id: 1,
                notice: notice(1, "install", "gone"),
            },
            StoredNotice {
                id: 2,
                notice: notice(2, "start", "gone"),
            },
            StoredNotice {
                id: 3,
                notice: notice(3, "start", "kept"),
            },
        ];
        let mut log = NoticeLog::from_stored(stored);
        assert!(log.remove(&notice(3, "start", "kept")));
        assert!(!log.remove(&notice(3, "start", "kept")));
        assert_eq!(log.remove_observer("Charm", "gone"), 2);
        assert!(log.is_empty());

        let mut changes = Changeset::default();
        log.write_changes(&mut changes);
        assert_eq!(changes.notices_removed, vec![1, 2, 3]);
    }

    #[test]
    fn removed_then_appended_notice_is_new_entry() {
        let mut log = NoticeLog::from_stored(vec![StoredNotice {
            id: 5,
            notice: notice(4, "start", "h"),
        }]);
        assert!(log.remove(&notice(4, "start", "h")));
        assert!(log.append(notice(4, "start", "h")));
        let mut changes = Changeset::default();
        log.write_changes(&mut changes);
        assert_eq!(changes.notices_removed, vec![5]);
        assert_eq!(changes.notices_added.len(), 1);
    }
}
