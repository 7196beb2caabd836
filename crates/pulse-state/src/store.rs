//! StateStore: redb-backed persistence for Pulse.
//!
//! Keeps the deployment ledger, every incident, and the last published
//! snapshot so a restarted daemon can serve last-known-good status before
//! its first probe cycle completes. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(INCIDENTS).map_err(map_err!(Table))?;
        txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put<T: Serialize>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Store an accepted deployment.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let key = deployment.table_key();
        self.put(DEPLOYMENTS, &key, deployment)?;
        debug!(%key, "deployment stored");
        Ok(())
    }

    /// Get a deployment by `{service}:{deployment_id}` key.
    pub fn get_deployment(&self, key: &str) -> StateResult<Option<Deployment>> {
        self.get(DEPLOYMENTS, key)
    }

    /// List all stored deployments, oldest first by `deployed_at`.
    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        let mut all: Vec<Deployment> = self.list(DEPLOYMENTS)?;
        all.sort_by_key(|d| d.deployed_at);
        Ok(all)
    }

    // ── Incidents ──────────────────────────────────────────────────

    /// Insert or update an incident.
    pub fn put_incident(&self, incident: &Incident) -> StateResult<()> {
        self.put(INCIDENTS, &incident.id, incident)?;
        debug!(id = %incident.id, status = %incident.status, "incident stored");
        Ok(())
    }

    pub fn get_incident(&self, id: &str) -> StateResult<Option<Incident>> {
        self.get(INCIDENTS, id)
    }

    /// List all stored incidents, oldest first by `created_at`.
    pub fn list_incidents(&self) -> StateResult<Vec<Incident>> {
        let mut all: Vec<Incident> = self.list(INCIDENTS)?;
        all.sort_by_key(|i| (i.created_at, i.sequence()));
        Ok(all)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Replace the last published snapshot.
    pub fn put_snapshot(&self, snapshot: &StatusSnapshot) -> StateResult<()> {
        self.put(SNAPSHOTS, LATEST_SNAPSHOT, snapshot)?;
        debug!(version = snapshot.version, "snapshot stored");
        Ok(())
    }

    pub fn latest_snapshot(&self) -> StateResult<Option<StatusSnapshot>> {
        self.get(SNAPSHOTS, LATEST_SNAPSHOT)
    }
}
