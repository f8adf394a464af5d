//! Read-only release reporting: diff, conflicts and stats.

use std::collections::{BTreeSet, HashMap, HashSet};

use rusqlite::Connection;
use serde_json::Value;
use uuid::Uuid;

use super::lineage::Lineage;
use super::versions::{load_effective, Selection};
use super::{format_datetime, parse_uuid, releases, Database};
use crate::error::Result;
use crate::models::*;

fn field_changes(from: Option<&Attributes>, to: Option<&Attributes>) -> Vec<FieldChange> {
    let empty = Attributes::new();
    let from = from.unwrap_or(&empty);
    let to = to.unwrap_or(&empty);

    let fields: BTreeSet<&String> = from.keys().chain(to.keys()).collect();
    fields
        .into_iter()
        .filter_map(|field| {
            let before = from.get(field);
            let after = to.get(field);
            (before != after).then(|| FieldChange {
                field: field.clone(),
                from: before.cloned(),
                to: after.cloned(),
            })
        })
        .collect()
}

pub(super) fn diff(
    conn: &Connection,
    from: &Release,
    to: &Release,
    filter: &DiffFilter,
) -> Result<ReleaseDiff> {
    let lineage = Lineage::load(conn)?;
    let touched = [from.id, to.id];
    let selection = || Selection::TouchedBy {
        releases: &touched,
        entity_type: filter.entity_type.as_deref(),
    };

    let before = load_effective(conn, &lineage.chain(from.id), selection())?;
    let after = load_effective(conn, &lineage.chain(to.id), selection())?;

    let mut order: Vec<Uuid> = Vec::new();
    let mut seen: HashSet<Uuid> = HashSet::new();
    for version in after.iter().chain(before.iter()) {
        if seen.insert(version.entity_id) {
            order.push(version.entity_id);
        }
    }

    let live = |rows: Vec<EntityVersion>| -> HashMap<Uuid, EntityVersion> {
        rows.into_iter()
            .filter(|v| !v.is_deleted)
            .map(|v| (v.entity_id, v))
            .collect()
    };
    let before = live(before);
    let after = live(after);

    // brand_id may be a typed column or a payload field depending on the entity type
    let brand_matches = |v: Option<&EntityVersion>| match (&filter.brand_id, v) {
        (None, _) => true,
        (Some(brand), Some(v)) => match v.column(TypedColumn::BrandId) {
            Some(column) => column == brand.as_str(),
            None => v.payload.get("brand_id").and_then(Value::as_str) == Some(brand.as_str()),
        },
        (Some(_), None) => false,
    };

    let mut entries = Vec::new();
    let mut summary = DiffSummary::default();
    for entity_id in order {
        let old = before.get(&entity_id);
        let new = after.get(&entity_id);
        if !brand_matches(old) && !brand_matches(new) {
            continue;
        }

        let (kind, entity_type) = match (old, new) {
            (None, Some(v)) => (DiffKind::Added, &v.entity_type),
            (Some(v), None) => (DiffKind::Deleted, &v.entity_type),
            (Some(_), Some(v)) => (DiffKind::Modified, &v.entity_type),
            (None, None) => continue,
        };

        let changes = field_changes(
            old.map(EntityVersion::attributes).as_ref(),
            new.map(EntityVersion::attributes).as_ref(),
        );
        if kind == DiffKind::Modified && changes.is_empty() {
            continue;
        }

        match kind {
            DiffKind::Added => summary.added += 1,
            DiffKind::Deleted => summary.deleted += 1,
            DiffKind::Modified => summary.modified += 1,
        }
        entries.push(EntityDiff {
            entity_id,
            entity_type: entity_type.clone(),
            kind,
            changes,
        });
    }
    summary.total = entries.len();

    Ok(ReleaseDiff {
        from_release_id: from.id,
        to_release_id: to.id,
        entries,
        summary,
    })
}

fn shared_entities(conn: &Connection, sql: &str, params: &[String]) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok(parse_uuid(row.get::<_, String>(0)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub(super) fn conflicts(conn: &Connection, release: &Release) -> Result<ConflictReport> {
    let release_id = release.id.to_string();

    let parallel_entities = shared_entities(
        conn,
        "SELECT DISTINCT v.entity_id FROM entity_versions v
         JOIN entity_versions o ON o.entity_id = v.entity_id AND o.release_id <> v.release_id
         JOIN releases r ON r.id = o.release_id
         WHERE v.release_id = ?1 AND r.status IN ('OPEN', 'CLOSED')
         ORDER BY v.entity_id",
        &[release_id.clone()],
    )?;

    let overwrite_entities = shared_entities(
        conn,
        "SELECT DISTINCT v.entity_id FROM entity_versions v
         JOIN entity_versions o ON o.entity_id = v.entity_id AND o.release_id <> v.release_id
         JOIN releases r ON r.id = o.release_id
         WHERE v.release_id = ?1
           AND r.status IN ('DEPLOYED', 'SUPERSEDED')
           AND r.deployed_at > ?2
         ORDER BY v.entity_id",
        &[release_id, format_datetime(release.created_at)],
    )?;

    Ok(ConflictReport {
        release_id: release.id,
        parallel: parallel_entities.len(),
        overwrite: overwrite_entities.len(),
        parallel_entities,
        overwrite_entities,
    })
}

fn stats(conn: &Connection, release_id: Uuid) -> Result<ReleaseStats> {
    let mut stmt = conn.prepare(
        "SELECT entity_type, change_type, COUNT(*) FROM entity_versions
         WHERE release_id = ? GROUP BY entity_type, change_type",
    )?;
    let rows = stmt
        .query_map([release_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? as usize,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stats = ReleaseStats {
        release_id,
        ..Default::default()
    };
    for (entity_type, change_type, count) in rows {
        stats.entities_touched += count;
        *stats.by_entity_type.entry(entity_type).or_default() += count;
        match ChangeType::from_str(&change_type) {
            Some(ChangeType::Create) => stats.created += count,
            Some(ChangeType::Update) => stats.updated += count,
            Some(ChangeType::Delete) => stats.deleted += count,
            None => {}
        }
    }
    Ok(stats)
}

impl Database {
    // ============================================================
    // Release reporting
    // ============================================================

    /// Compare the effective views of two releases over the entities either touches.
    pub fn preview_diff(
        &self,
        from_release_id: Uuid,
        to_release_id: Uuid,
        filter: &DiffFilter,
    ) -> Result<ReleaseDiff> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let from = releases::require(&tx, from_release_id)?;
        let to = releases::require(&tx, to_release_id)?;
        diff(&tx, &from, &to, filter)
    }

    /// Advisory conflict report; see [`ConflictReport`].
    pub fn check_release_conflicts(&self, release_id: Uuid) -> Result<ConflictReport> {
        let conn = self.lock()?;
        let release = releases::require(&conn, release_id)?;
        conflicts(&conn, &release)
    }

    pub fn get_release_stats(&self, release_id: Uuid) -> Result<ReleaseStats> {
        let conn = self.lock()?;
        releases::require(&conn, release_id)?;
        stats(&conn, release_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn field_changes_lists_only_differing_fields() {
        let from = attrs(json!({"slug": "a", "value": "Hello", "note": "x"}));
        let to = attrs(json!({"slug": "a", "value": "Hi", "extra": 1}));

        let changes = field_changes(Some(&from), Some(&to));
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["extra", "note", "value"]);
        assert_eq!(changes[2].from, Some(json!("Hello")));
        assert_eq!(changes[2].to, Some(json!("Hi")));
    }

    #[test]
    fn field_changes_against_nothing_lists_every_field() {
        let to = attrs(json!({"slug": "a"}));
        let changes = field_changes(None, Some(&to));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].from, None);
    }
}
