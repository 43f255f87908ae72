//! Persistent storage for cycles, actions, strategies, learnings and alerts
//! using redb.
//!
//! # Table design
//!
//! Records are JSON-encoded so rows written by an older build stay readable
//! after a deploy. Tables keyed by an id use `&str` keys. Append-only logs
//! (`strategies`, `learnings`) use a composite byte key:
//! ```text
//! [ agent bytes | 0x00 | timestamp_ms: u64 big-endian | uuid: 16 bytes ]
//! ```
//! Byte ordering equals (agent, timestamp) ordering, so a range scan over
//! `agent ++ 0x00 .. agent ++ 0x01` returns one agent's rows oldest-first.
//!
//! Every read-modify-write runs in one write transaction. redb serialises
//! write transactions and holds an exclusive lock on the file, so a
//! read-then-insert inside [`Store::write`] cannot interleave with another
//! writer of the same store.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{db_err, Result};
use crate::paths;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

pub(crate) type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
pub(crate) type LogTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

pub(crate) const CYCLES: JsonTable = TableDefinition::new("cycles");
pub(crate) const ACTIONS: JsonTable = TableDefinition::new("actions");
pub(crate) const ALERTS: JsonTable = TableDefinition::new("alerts");
pub(crate) const STRATEGIES: LogTable = TableDefinition::new("strategies");
pub(crate) const LEARNINGS: LogTable = TableDefinition::new("learnings");

/// Key: agent name. Value: the last cycle number handed out.
pub(crate) const CYCLE_SEQ: TableDefinition<&str, u64> = TableDefinition::new("cycle_seq");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

pub(crate) fn log_key(agent: &str, ts: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(agent.len() + 1 + 8 + 16);
    key.extend_from_slice(agent.as_bytes());
    key.push(0x00);
    let ms = ts.timestamp_millis().max(0) as u64;
    key.extend_from_slice(&ms.to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

/// Half-open range covering every log key for `agent`.
fn agent_bounds(agent: &str) -> (Vec<u8>, Vec<u8>) {
    let mut lo = agent.as_bytes().to_vec();
    let mut hi = lo.clone();
    lo.push(0x00);
    hi.push(0x01);
    (lo, hi)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Shared handle to the project database. Components hold it behind an
/// `Arc` so one open file serves the engine, the action store, the
/// strategy cache and the alert gate.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open or create the redb database at `path`, creating every table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let store = Self { db };
        store.write(|wt| {
            wt.open_table(CYCLES).map_err(db_err)?;
            wt.open_table(CYCLE_SEQ).map_err(db_err)?;
            wt.open_table(ACTIONS).map_err(db_err)?;
            wt.open_table(ALERTS).map_err(db_err)?;
            wt.open_table(STRATEGIES).map_err(db_err)?;
            wt.open_table(LEARNINGS).map_err(db_err)?;
            Ok(())
        })?;
        Ok(store)
    }

    /// Open the store at the conventional location under `root`.
    pub fn open_project(root: &Path) -> Result<Self> {
        Self::open(&paths::db_path(root))
    }

    /// Run `f` inside one write transaction. Commits on `Ok`, aborts on `Err`
    /// so a rejected operation leaves no partial mutation behind.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&WriteTransaction) -> Result<R>) -> Result<R> {
        let wt = self.db.begin_write().map_err(db_err)?;
        match f(&wt) {
            Ok(value) => {
                wt.commit().map_err(db_err)?;
                Ok(value)
            }
            Err(e) => {
                wt.abort().map_err(db_err)?;
                Err(e)
            }
        }
    }

    pub(crate) fn get_json<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        key: &str,
    ) -> Result<Option<T>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(table).map_err(db_err)?;
        let bytes = table
            .get(key)
            .map_err(db_err)?
            .map(|guard| guard.value().to_vec());
        bytes.map(|b| decode(&b)).transpose()
    }

    pub(crate) fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> Result<()> {
        let bytes = encode(value)?;
        self.write(|wt| {
            let mut t = wt.open_table(table).map_err(db_err)?;
            t.insert(key, bytes.as_slice()).map_err(db_err)?;
            Ok(())
        })
    }

    /// Load, mutate and store one record atomically.
    ///
    /// Returns `Ok(None)` when `key` is absent. If `f` fails the transaction
    /// is aborted and the stored record is unchanged.
    pub(crate) fn update_json<T, F>(&self, table: JsonTable, key: &str, f: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> Result<()>,
    {
        self.write(|wt| {
            let mut t = wt.open_table(table).map_err(db_err)?;
            let existing = t.get(key).map_err(db_err)?.map(|g| g.value().to_vec());
            let Some(bytes) = existing else {
                return Ok(None);
            };
            let mut record: T = decode(&bytes)?;
            f(&mut record)?;
            let new_bytes = encode(&record)?;
            t.insert(key, new_bytes.as_slice()).map_err(db_err)?;
            Ok(Some(record))
        })
    }

    /// Every record in `table`, in key order.
    pub(crate) fn scan_json<T: DeserializeOwned>(&self, table: JsonTable) -> Result<Vec<T>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(table).map_err(db_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(decode(v.value())?);
        }
        Ok(result)
    }

    /// Every log record for `agent`, oldest first.
    pub(crate) fn scan_log<T: DeserializeOwned>(&self, table: LogTable, agent: &str) -> Result<Vec<T>> {
        let (lo, hi) = agent_bounds(agent);
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(table).map_err(db_err)?;
        let mut result = Vec::new();
        for entry in table.range(lo.as_slice()..hi.as_slice()).map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(decode(v.value())?);
        }
        Ok(result)
    }

    /// The newest log record for `agent`, if any.
    pub(crate) fn last_log<T: DeserializeOwned>(&self, table: LogTable, agent: &str) -> Result<Option<T>> {
        let (lo, hi) = agent_bounds(agent);
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(table).map_err(db_err)?;
        let last = table
            .range(lo.as_slice()..hi.as_slice())
            .map_err(db_err)?
            .next_back();
        match last {
            Some(entry) => {
                let (_, v) = entry.map_err(db_err)?;
                Ok(Some(decode(v.value())?))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn append_log<T: Serialize>(
        &self,
        table: LogTable,
        agent: &str,
        ts: DateTime<Utc>,
        id: Uuid,
        value: &T,
    ) -> Result<()> {
        let key = log_key(agent, ts, id);
        let bytes = encode(value)?;
        self.write(|wt| {
            let mut t = wt.open_table(table).map_err(db_err)?;
            t.insert(key.as_slice(), bytes.as_slice()).map_err(db_err)?;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
