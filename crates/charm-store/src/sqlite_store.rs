use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use charm_value::{Value, from_cbor, to_canonical_cbor};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use crate::{
    Changeset, LockPolicy, Notice, ObserverRef, SCHEMA_VERSION, StateKey, Store, StoreError,
    StoreResult, StoredNotice, io_error,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS state (
    owner_path TEXT NOT NULL,
    name TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (owner_path, name)
);
CREATE TABLE IF NOT EXISTS notices (
    notice_id INTEGER PRIMARY KEY AUTOINCREMENT,
    sequence_id INTEGER NOT NULL,
    event_kind TEXT NOT NULL,
    source_path TEXT NOT NULL,
    snapshot BLOB NOT NULL,
    observer_owner_path TEXT NOT NULL,
    observer_handler_name TEXT NOT NULL,
    UNIQUE (event_kind, source_path, sequence_id, observer_owner_path, observer_handler_name)
);
";

const META_SCHEMA_VERSION: &str = "schema_version";
const META_NEXT_SEQUENCE: &str = "next_sequence";

/// SQLite-backed store. Opening takes an exclusive lock and starts the single
/// transaction that the invocation commits or discards.
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
    active: bool,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("active", &self.active)
            .finish()
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, lock: LockPolicy) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.busy_timeout(lock.busy_timeout())?;
        // Even the pragma reads the schema, so contention can surface here first.
        conn.execute_batch("PRAGMA synchronous = FULL; BEGIN EXCLUSIVE;")
            .map_err(|err| locked_or(err, &path))?;
        let mut store = Self {
            conn,
            path,
            active: true,
        };
        if let Err(err) = store.prepare_schema() {
            store.abandon();
            return Err(err);
        }
        log::debug!("opened store {:?} with exclusive lock", store.path);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn prepare_schema(&mut self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        let version = self.meta(META_SCHEMA_VERSION)?;
        match version {
            None => {
                self.set_meta(META_SCHEMA_VERSION, SCHEMA_VERSION)?;
            }
            Some(found) if found > SCHEMA_VERSION => {
                return Err(StoreError::SchemaVersion {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn ensure_active(&self) -> StoreResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }

    fn meta(&self, key: &str) -> StoreResult<Option<i64>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set_meta(&self, key: &str, value: i64) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn apply(&mut self, changes: &Changeset) -> StoreResult<()> {
        for id in &changes.notices_removed {
            self.conn
                .execute("DELETE FROM notices WHERE notice_id = ?1", params![id])?;
        }
        for notice in &changes.notices_added {
            let snapshot = to_canonical_cbor(&notice.snapshot)?;
            self.conn.execute(
                "INSERT INTO notices (sequence_id, event_kind, source_path, snapshot,
                                      observer_owner_path, observer_handler_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    sequence_to_sql(notice.sequence_id)?,
                    notice.event_kind,
                    notice.source_path,
                    snapshot,
                    notice.observer.owner_path,
                    notice.observer.handler_name,
                ],
            )?;
        }
        for key in &changes.state_deletes {
            self.conn.execute(
                "DELETE FROM state WHERE owner_path = ?1 AND name = ?2",
                params![key.owner_path, key.name],
            )?;
        }
        for (key, value) in &changes.state_writes {
            let bytes = to_canonical_cbor(value)?;
            self.conn.execute(
                "INSERT INTO state (owner_path, name, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(owner_path, name) DO UPDATE SET value = excluded.value",
                params![key.owner_path, key.name, bytes],
            )?;
        }
        // The counter never moves backwards, so ids are not reused.
        let current = self.meta(META_NEXT_SEQUENCE)?.unwrap_or(1);
        let next = current.max(sequence_to_sql(changes.next_sequence)?);
        self.set_meta(META_NEXT_SEQUENCE, next)?;
        Ok(())
    }

    fn abandon(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            log::warn!("rollback of {:?} failed: {err}", self.path);
        }
    }
}

impl Store for SqliteStore {
    fn load_notices(&mut self) -> StoreResult<Vec<StoredNotice>> {
        self.ensure_active()?;
        let mut stmt = self.conn.prepare(
            "SELECT notice_id, sequence_id, event_kind, source_path, snapshot,
                    observer_owner_path, observer_handler_name
             FROM notices ORDER BY notice_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        let mut notices = Vec::new();
        for row in rows {
            let (id, seq, event_kind, source_path, snapshot, owner_path, handler_name) = row?;
            notices.push(StoredNotice {
                id,
                notice: Notice {
                    sequence_id: sequence_from_sql(seq)?,
                    event_kind,
                    source_path,
                    snapshot: from_cbor(&snapshot)?,
                    observer: ObserverRef::new(owner_path, handler_name),
                },
            });
        }
        Ok(notices)
    }

    fn load_state(&mut self, key: &StateKey) -> StoreResult<Option<Value>> {
        self.ensure_active()?;
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT value FROM state WHERE owner_path = ?1 AND name = ?2",
                params![key.owner_path, key.name],
                |row| row.get(0),
            )
            .optional()?;
        bytes.map(|bytes| from_cbor(&bytes)).transpose().map_err(Into::into)
    }

    fn list_state(&mut self) -> StoreResult<Vec<StateKey>> {
        self.ensure_active()?;
        let mut stmt = self
            .conn
            .prepare("SELECT owner_path, name FROM state ORDER BY owner_path, name")?;
        let keys = stmt
            .query_map([], |row| Ok(StateKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn next_sequence(&mut self) -> StoreResult<u64> {
        self.ensure_active()?;
        match self.meta(META_NEXT_SEQUENCE)? {
            Some(seq) => sequence_from_sql(seq),
            None => Ok(1),
        }
    }

    fn commit(&mut self, changes: Changeset) -> StoreResult<()> {
        self.ensure_active()?;
        if let Err(err) = self.apply(&changes) {
            self.abandon();
            return Err(err);
        }
        self.active = false;
        if let Err(err) = self.conn.execute_batch("COMMIT") {
            self.active = true;
            self.abandon();
            return Err(err.into());
        }
        log::debug!(
            "committed {:?}: {} state writes, {} state deletes, -{} / +{} notices",
            self.path,
            changes.state_writes.len(),
            changes.state_deletes.len(),
            changes.notices_removed.len(),
            changes.notices_added.len()
        );
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        if self.active {
            self.active = false;
            self.conn.execute_batch("ROLLBACK")?;
            log::debug!("rolled back {:?}", self.path);
        }
        Ok(())
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        self.abandon();
    }
}

fn locked_or(err: rusqlite::Error, path: &Path) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            StoreError::Locked {
                path: path.to_path_buf(),
            }
        }
        _ => StoreError::Sqlite(err),
    }
}

fn sequence_to_sql(seq: u64) -> StoreResult<i64> {
    i64::try_from(seq).map_err(|_| StoreError::Corrupt(format!("sequence id {seq} out of range")))
}

fn sequence_from_sql(seq: i64) -> StoreResult<u64> {
    u64::try_from(seq).map_err(|_| StoreError::Corrupt(format!("negative sequence id {seq}")))
}
