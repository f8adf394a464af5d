//! SQLite-backed release store.
//!
//! [`Database`] is a cheap, cloneable handle shared by every request handler.
//! Each public operation runs in its own transaction and resolves its release
//! scope exactly once inside it.

mod lineage;
mod releases;
mod report;
mod schema;
mod scope;
mod versions;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, TransactionBehavior};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::*;

pub use scope::Intent;
pub use versions::Writer;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
    block_on_conflicts: bool,
}

impl Database {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_default() -> anyhow::Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            block_on_conflicts: false,
        }
    }

    /// Refuse to deploy releases with parallel or overwrite conflicts.
    pub fn with_conflict_gate(mut self, enabled: bool) -> Self {
        self.block_on_conflicts = enabled;
        self
    }

    pub fn migrate(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        schema::run_migrations(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // ============================================================
    // Entity Version Store
    // ============================================================

    /// Run several store writes in one transaction against one release.
    ///
    /// The write scope is resolved once before `f` runs. If `f` fails, nothing
    /// it wrote is kept.
    pub fn atomic<T>(
        &self,
        opts: &WriteOptions,
        f: impl FnOnce(&mut Writer<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let context = scope::resolve(&tx, Intent::Write, opts.release_id)?;
        let mut writer = Writer::new(&tx, context, &opts.user_id)?;
        let output = f(&mut writer)?;
        drop(writer);

        tx.commit()?;
        Ok(output)
    }

    pub fn create(
        &self,
        spec: &EntitySpec,
        draft: Attributes,
        opts: &WriteOptions,
    ) -> Result<EntityRecord> {
        self.atomic(opts, |w| w.create(spec, draft))
    }

    pub fn patch(
        &self,
        spec: &EntitySpec,
        entity_id: Uuid,
        partial: Attributes,
        opts: &WriteOptions,
    ) -> Result<EntityRecord> {
        self.atomic(opts, |w| w.patch(spec, entity_id, partial))
    }

    pub fn remove(&self, spec: &EntitySpec, entity_id: Uuid, opts: &WriteOptions) -> Result<()> {
        self.atomic(opts, |w| w.remove(spec, entity_id))
    }

    pub fn get(
        &self,
        spec: &EntitySpec,
        entity_id: Uuid,
        opts: ReadOptions,
    ) -> Result<Option<EntityRecord>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let context = scope::resolve(&tx, Intent::Read, opts.release_id)?;
        let view = versions::ScopedView::new(&tx, context)?;
        view.get(spec, entity_id)
    }

    pub fn find(
        &self,
        spec: &EntitySpec,
        filter: &Attributes,
        opts: ReadOptions,
    ) -> Result<Vec<EntityRecord>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let context = scope::resolve(&tx, Intent::Read, opts.release_id)?;
        let view = versions::ScopedView::new(&tx, context)?;
        view.find(spec, filter)
    }

    /// Every version row of an entity, newest first.
    pub fn history(&self, entity_id: Uuid) -> Result<Option<EntityHistory>> {
        let conn = self.lock()?;
        versions::history(&conn, entity_id)
    }

    // ============================================================
    // Release Context Resolver
    // ============================================================

    /// The release a read or write would run against.
    pub fn release_context(&self, intent: Intent, explicit: Option<Uuid>) -> Result<ReleaseContext> {
        let conn = self.lock()?;
        scope::resolve(&conn, intent, explicit)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            block_on_conflicts: self.block_on_conflicts,
        }
    }
}

fn default_path() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "release-cms")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("release-cms.db"))
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

/// Fixed-width timestamps so stored values order lexicographically.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// `?, ?, ?` with `n` placeholders.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
