//! Release table and lifecycle transitions.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid, report, Database};
use crate::error::{Result, StoreError};
use crate::models::*;

const RELEASE_COLUMNS: &str = "id, name, description, status, deploy_seq, base_release_id, \
     created_by, created_at, deployed_by, deployed_at";

fn release_from_row(row: &Row<'_>) -> rusqlite::Result<Release> {
    Ok(Release {
        id: parse_uuid(row.get::<_, String>(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        status: ReleaseStatus::from_str(&row.get::<_, String>(3)?).unwrap_or(ReleaseStatus::Closed),
        deploy_seq: row.get(4)?,
        base_release_id: row.get::<_, Option<String>>(5)?.map(parse_uuid),
        created_by: row.get(6)?,
        created_at: parse_datetime(row.get::<_, String>(7)?),
        deployed_by: row.get(8)?,
        deployed_at: row.get::<_, Option<String>>(9)?.map(parse_datetime),
    })
}

pub(super) fn fetch(conn: &Connection, id: Uuid) -> Result<Option<Release>> {
    let release = conn
        .query_row(
            &format!("SELECT {} FROM releases WHERE id = ?", RELEASE_COLUMNS),
            [id.to_string()],
            release_from_row,
        )
        .optional()?;
    Ok(release)
}

pub(super) fn require(conn: &Connection, id: Uuid) -> Result<Release> {
    fetch(conn, id)?.ok_or(StoreError::ReleaseNotFound(id))
}

/// The current production release.
pub(super) fn current_deployed(conn: &Connection) -> Result<Option<Release>> {
    let release = conn
        .query_row(
            &format!(
                "SELECT {} FROM releases WHERE status = 'DEPLOYED' ORDER BY deploy_seq DESC LIMIT 1",
                RELEASE_COLUMNS
            ),
            [],
            release_from_row,
        )
        .optional()?;
    Ok(release)
}

/// The most recently created OPEN release.
pub(super) fn newest_open(conn: &Connection) -> Result<Option<Release>> {
    let release = conn
        .query_row(
            &format!(
                "SELECT {} FROM releases WHERE status = 'OPEN'
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                RELEASE_COLUMNS
            ),
            [],
            release_from_row,
        )
        .optional()?;
    Ok(release)
}

fn list(conn: &Connection) -> Result<Vec<Release>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM releases ORDER BY created_at DESC, rowid DESC",
        RELEASE_COLUMNS
    ))?;
    let releases = stmt
        .query_map([], release_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(releases)
}

/// Allocate the next value of the global deploy sequence.
///
/// Must run inside the transaction that stamps the value on a release.
fn next_deploy_seq(conn: &Connection) -> Result<i64> {
    conn.execute(
        "UPDATE counters SET value = value + 1 WHERE name = 'deploy_seq'",
        [],
    )?;
    let seq = conn.query_row(
        "SELECT value FROM counters WHERE name = 'deploy_seq'",
        [],
        |row| row.get(0),
    )?;
    Ok(seq)
}

fn insert(conn: &Connection, input: CreateReleaseInput, user_id: &str) -> Result<Release> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(StoreError::Validation("Release name must not be empty".into()));
    }

    let id = Uuid::new_v4();
    let now = Utc::now();

    conn.execute(
        "INSERT INTO releases (id, name, description, status, created_by, created_at)
         VALUES (?, ?, ?, 'OPEN', ?, ?)",
        (
            id.to_string(),
            &name,
            &input.description,
            user_id,
            format_datetime(now),
        ),
    )?;

    tracing::info!(release_id = %id, name = %name, "Created release");

    Ok(Release {
        id,
        name,
        description: input.description,
        status: ReleaseStatus::Open,
        deploy_seq: None,
        base_release_id: None,
        created_by: user_id.to_string(),
        created_at: now,
        deployed_by: None,
        deployed_at: None,
    })
}

fn set_status(conn: &Connection, id: Uuid, status: ReleaseStatus) -> Result<()> {
    conn.execute(
        "UPDATE releases SET status = ? WHERE id = ?",
        (status.as_str(), id.to_string()),
    )?;
    Ok(())
}

impl Database {
    // ============================================================
    // Release operations
    // ============================================================

    pub fn list_releases(&self) -> Result<Vec<Release>> {
        let conn = self.lock()?;
        list(&conn)
    }

    pub fn get_release(&self, id: Uuid) -> Result<Option<Release>> {
        let conn = self.lock()?;
        fetch(&conn, id)
    }

    /// The release currently serving production reads, if any.
    pub fn current_release(&self) -> Result<Option<Release>> {
        let conn = self.lock()?;
        current_deployed(&conn)
    }

    pub fn create_release(&self, input: CreateReleaseInput, user_id: &str) -> Result<Release> {
        let conn = self.lock()?;
        insert(&conn, input, user_id)
    }

    /// Rename or describe a release, or move it between OPEN and CLOSED.
    pub fn update_release(&self, id: Uuid, input: UpdateReleaseInput) -> Result<Release> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = require(&tx, id)?;

        let name = match input.name {
            Some(name) if name.trim().is_empty() => {
                return Err(StoreError::Validation("Release name must not be empty".into()));
            }
            Some(name) => name.trim().to_string(),
            None => existing.name.clone(),
        };
        // An empty description clears it
        let description = match input.description {
            Some(d) if d.trim().is_empty() => None,
            Some(d) => Some(d),
            None => existing.description.clone(),
        };

        let status = match input.status {
            None => existing.status,
            Some(target) => {
                if !target.is_unreleased() {
                    return Err(StoreError::ReleaseState(format!(
                        "Release status can only be set to OPEN or CLOSED here, not {}",
                        target.as_str()
                    )));
                }
                if !existing.status.is_unreleased() {
                    return Err(StoreError::ReleaseState(format!(
                        "Release {} is {} and can no longer be reopened or closed",
                        id,
                        existing.status.as_str()
                    )));
                }
                target
            }
        };

        tx.execute(
            "UPDATE releases SET name = ?, description = ?, status = ? WHERE id = ?",
            (&name, &description, status.as_str(), id.to_string()),
        )?;
        tx.commit()?;

        if status != existing.status {
            tracing::info!(
                release_id = %id,
                from = existing.status.as_str(),
                to = status.as_str(),
                "Release status changed"
            );
        }

        Ok(Release {
            name,
            description,
            status,
            ..existing
        })
    }

    /// Make a CLOSED release the current production release.
    ///
    /// Allocates the next deploy sequence, pins the release's base to the
    /// release it replaces and demotes that one to SUPERSEDED, all in one
    /// transaction.
    pub fn deploy_release(&self, id: Uuid, user_id: &str) -> Result<Release> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let release = require(&tx, id)?;

        if release.status != ReleaseStatus::Closed {
            return Err(StoreError::ReleaseState(
                "Only CLOSED releases can be deployed".to_string(),
            ));
        }

        if self.block_on_conflicts {
            let conflicts = report::conflicts(&tx, &release)?;
            if conflicts.has_conflicts() {
                tracing::warn!(
                    release_id = %id,
                    parallel = conflicts.parallel,
                    overwrite = conflicts.overwrite,
                    "Deploy blocked by release conflicts"
                );
                return Err(StoreError::ReleaseConflicts {
                    release_id: id,
                    parallel: conflicts.parallel,
                    overwrite: conflicts.overwrite,
                });
            }
        }

        let previous = current_deployed(&tx)?;
        let seq = next_deploy_seq(&tx)?;
        let now = Utc::now();

        if let Some(previous) = &previous {
            set_status(&tx, previous.id, ReleaseStatus::Superseded)?;
        }

        let base_release_id = previous.as_ref().map(|r| r.id);
        tx.execute(
            "UPDATE releases SET status = 'DEPLOYED', deploy_seq = ?, base_release_id = ?,
                    deployed_by = ?, deployed_at = ?
             WHERE id = ?",
            (
                seq,
                base_release_id.map(|u| u.to_string()),
                user_id,
                format_datetime(now),
                id.to_string(),
            ),
        )?;
        tx.commit()?;

        tracing::info!(
            release_id = %id,
            deploy_seq = seq,
            superseded = ?base_release_id,
            "Deployed release"
        );

        Ok(Release {
            status: ReleaseStatus::Deployed,
            deploy_seq: Some(seq),
            base_release_id,
            deployed_by: Some(user_id.to_string()),
            deployed_at: Some(now),
            ..release
        })
    }

    /// Re-deploy a previously deployed release.
    ///
    /// The current DEPLOYED release becomes ROLLED_BACK and the target gets a
    /// fresh deploy sequence, so rollbacks extend the deploy history.
    pub fn rollback_to_release(&self, target_id: Uuid, user_id: &str) -> Result<Release> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let target = require(&tx, target_id)?;

        if target.deploy_seq.is_none() {
            return Err(StoreError::ReleaseState(format!(
                "Release {} was never deployed and cannot be rolled back to",
                target_id
            )));
        }
        if target.status == ReleaseStatus::Deployed {
            return Err(StoreError::ReleaseState(format!(
                "Release {} is already the deployed release",
                target_id
            )));
        }

        let current = current_deployed(&tx)?;
        if let Some(current) = &current {
            set_status(&tx, current.id, ReleaseStatus::RolledBack)?;
        }

        let seq = next_deploy_seq(&tx)?;
        let now = Utc::now();
        tx.execute(
            "UPDATE releases SET status = 'DEPLOYED', deploy_seq = ?, deployed_by = ?, deployed_at = ?
             WHERE id = ?",
            (seq, user_id, format_datetime(now), target_id.to_string()),
        )?;
        tx.commit()?;

        tracing::info!(
            release_id = %target_id,
            deploy_seq = seq,
            rolled_back = ?current.as_ref().map(|r| r.id),
            "Rolled back to release"
        );

        Ok(Release {
            status: ReleaseStatus::Deployed,
            deploy_seq: Some(seq),
            deployed_by: Some(user_id.to_string()),
            deployed_at: Some(now),
            ..target
        })
    }

    /// Create an OPEN release named `name` unless one is already open.
    ///
    /// The check and the insert share one transaction, so concurrent callers
    /// create at most one release.
    pub fn ensure_open_release(&self, name: &str, user_id: &str) -> Result<Option<Release>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if newest_open(&tx)?.is_some() {
            return Ok(None);
        }

        let release = insert(
            &tx,
            CreateReleaseInput {
                name: name.to_string(),
                description: Some("Created at startup".to_string()),
            },
            user_id,
        )?;
        tx.commit()?;
        Ok(Some(release))
    }
}
