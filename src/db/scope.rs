//! Release context resolution.
//!
//! Decides which release an operation runs against. The answer is computed from
//! the connection handed in (normally the operation's own transaction) and is
//! returned as a value, never stored anywhere shared.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::releases;
use crate::error::{Result, StoreError};
use crate::models::{ReleaseContext, ReleaseStatus};

/// Whether an operation reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Read,
    Write,
}

pub fn resolve(conn: &Connection, intent: Intent, explicit: Option<Uuid>) -> Result<ReleaseContext> {
    let current = releases::current_deployed(conn)?.map(|r| r.id);

    let release_id = match explicit {
        Some(id) => {
            let release = releases::require(conn, id)?;
            if intent == Intent::Write && release.status != ReleaseStatus::Open {
                return Err(StoreError::ScopeResolution(format!(
                    "release {} is {} and not open for writes",
                    id,
                    release.status.as_str()
                )));
            }
            id
        }
        None => match intent {
            Intent::Write => releases::newest_open(conn)?
                .map(|r| r.id)
                .ok_or_else(|| StoreError::ScopeResolution("no open release to write into".into()))?,
            Intent::Read => match current {
                Some(id) => id,
                None => releases::newest_open(conn)?
                    .map(|r| r.id)
                    .ok_or_else(|| {
                        StoreError::ScopeResolution("no deployed or open release to read from".into())
                    })?,
            },
        },
    };

    Ok(ReleaseContext {
        release_id,
        is_preview: current != Some(release_id),
    })
}
