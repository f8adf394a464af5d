//! Release lineage used by the effective view.
//!
//! Releases that have not been deployed float on top of the current DEPLOYED
//! release. A deployed (or formerly deployed) release falls back to the base it
//! was pinned to when it went live. Walking those links from a release yields
//! the ordered list of releases whose rows make up its effective view.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use uuid::Uuid;

use super::parse_uuid;
use crate::error::Result;
use crate::models::ReleaseStatus;

#[derive(Debug, Clone, Copy)]
struct Node {
    status: ReleaseStatus,
    base: Option<Uuid>,
}

#[derive(Debug, Default)]
pub struct Lineage {
    nodes: HashMap<Uuid, Node>,
    current: Option<Uuid>,
}

impl Lineage {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT id, status, base_release_id FROM releases")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    parse_uuid(row.get::<_, String>(0)?),
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?.map(parse_uuid),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut lineage = Self::default();
        for (id, status, base) in rows {
            let status = ReleaseStatus::from_str(&status).unwrap_or(ReleaseStatus::Closed);
            if status == ReleaseStatus::Deployed {
                lineage.current = Some(id);
            }
            lineage.nodes.insert(id, Node { status, base });
        }
        Ok(lineage)
    }

    /// The release a release falls back to when it has no row for an entity.
    fn fallback(&self, id: Uuid) -> Option<Uuid> {
        let node = self.nodes.get(&id)?;
        if node.status.is_unreleased() {
            self.current
        } else {
            node.base
        }
    }

    /// Releases consulted for `release_id`, nearest first.
    pub fn chain(&self, release_id: Uuid) -> Vec<Uuid> {
        let mut chain = vec![release_id];
        let mut seen: HashSet<Uuid> = HashSet::from([release_id]);
        let mut cursor = release_id;

        while let Some(next) = self.fallback(cursor) {
            if !seen.insert(next) {
                tracing::warn!(release_id = %release_id, at = %next, "Release lineage contains a cycle");
                break;
            }
            chain.push(next);
            cursor = next;
        }

        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lineage(entries: &[(Uuid, ReleaseStatus, Option<Uuid>)]) -> Lineage {
        let mut lineage = Lineage::default();
        for (id, status, base) in entries {
            if *status == ReleaseStatus::Deployed {
                lineage.current = Some(*id);
            }
            lineage.nodes.insert(
                *id,
                Node {
                    status: *status,
                    base: *base,
                },
            );
        }
        lineage
    }

    #[test]
    fn open_release_falls_back_to_current_deployment() {
        let (r1, r2, r3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let lineage = lineage(&[
            (r1, ReleaseStatus::Superseded, None),
            (r2, ReleaseStatus::Deployed, Some(r1)),
            (r3, ReleaseStatus::Open, None),
        ]);

        assert_eq!(lineage.chain(r3), vec![r3, r2, r1]);
    }

    #[test]
    fn rolled_back_release_keeps_its_pinned_base() {
        let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());
        let lineage = lineage(&[
            (r1, ReleaseStatus::Deployed, None),
            (r2, ReleaseStatus::RolledBack, Some(r1)),
        ]);

        assert_eq!(lineage.chain(r1), vec![r1]);
        assert_eq!(lineage.chain(r2), vec![r2, r1]);
    }

    #[test]
    fn cold_start_chain_is_just_the_release() {
        let r1 = Uuid::new_v4();
        let lineage = lineage(&[(r1, ReleaseStatus::Open, None)]);
        assert_eq!(lineage.chain(r1), vec![r1]);
    }

    #[test]
    fn cycles_are_cut() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let lineage = lineage(&[
            (a, ReleaseStatus::Superseded, Some(b)),
            (b, ReleaseStatus::Superseded, Some(a)),
        ]);
        assert_eq!(lineage.chain(a), vec![a, b]);
    }
}
