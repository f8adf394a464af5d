//! Entity Version Store.
//!
//! Generic create/patch/remove/find/get over versioned entities, parameterized by
//! an [`EntitySpec`]. Reads go through the effective view: the nearest release in
//! the scope's lineage that has a row for an entity decides its state.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{params, params_from_iter, types::Type, Connection, Row};
use serde_json::Value;
use uuid::Uuid;

use super::lineage::Lineage;
use super::{format_datetime, parse_datetime, parse_uuid, placeholders};
use crate::error::{Result, StoreError};
use crate::models::*;

const VERSION_COLUMNS: &str = "v.entity_id, v.release_id, v.entity_type, \
     v.title, v.slug, v.status, v.value, v.locale_id, v.brand_id, v.parent_id, \
     v.payload, v.change_type, v.is_deleted, v.created_by, v.created_at, v.updated_by, v.updated_at";

/// Offset of the first typed column in [`VERSION_COLUMNS`].
const TYPED_OFFSET: usize = 3;

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<EntityVersion> {
    let mut columns = TypedValues::new();
    for (i, column) in TypedColumn::ALL.into_iter().enumerate() {
        if let Some(value) = row.get::<_, Option<String>>(TYPED_OFFSET + i)? {
            columns.insert(column, value);
        }
    }

    let payload_json: String = row.get(10)?;
    let payload: Attributes = serde_json::from_str(&payload_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

    Ok(EntityVersion {
        entity_id: parse_uuid(row.get::<_, String>(0)?),
        release_id: parse_uuid(row.get::<_, String>(1)?),
        entity_type: row.get(2)?,
        columns,
        payload,
        change_type: ChangeType::from_str(&row.get::<_, String>(11)?).unwrap_or(ChangeType::Update),
        is_deleted: row.get::<_, i32>(12)? != 0,
        created_by: row.get(13)?,
        created_at: parse_datetime(row.get::<_, String>(14)?),
        updated_by: row.get(15)?,
        updated_at: parse_datetime(row.get::<_, String>(16)?),
    })
}

/// Insert a version row, or overwrite the existing row for the same release.
fn write_version(conn: &Connection, version: &EntityVersion) -> Result<()> {
    let typed: Vec<Option<String>> = TypedColumn::ALL
        .iter()
        .map(|c| version.columns.get(c).cloned())
        .collect();

    conn.execute(
        "INSERT INTO entity_versions (entity_id, release_id, entity_type,
             title, slug, status, value, locale_id, brand_id, parent_id,
             payload, change_type, is_deleted, created_by, created_at, updated_by, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (entity_id, release_id) DO UPDATE SET
             title = excluded.title, slug = excluded.slug, status = excluded.status,
             value = excluded.value, locale_id = excluded.locale_id,
             brand_id = excluded.brand_id, parent_id = excluded.parent_id,
             payload = excluded.payload, change_type = excluded.change_type,
             is_deleted = excluded.is_deleted, updated_by = excluded.updated_by,
             updated_at = excluded.updated_at",
        params![
            version.entity_id.to_string(),
            version.release_id.to_string(),
            &version.entity_type,
            typed[0],
            typed[1],
            typed[2],
            typed[3],
            typed[4],
            typed[5],
            typed[6],
            serde_json::to_string(&version.payload)?,
            version.change_type.as_str(),
            version.is_deleted as i32,
            &version.created_by,
            format_datetime(version.created_at),
            &version.updated_by,
            format_datetime(version.updated_at),
        ],
    )?;
    Ok(())
}

/// Which entities to resolve through the effective view.
pub(super) enum Selection<'a> {
    Entity(Uuid),
    /// Entities of a type with at least one row in the chain matching the columns.
    Type {
        entity_type: &'a str,
        columns: &'a TypedValues,
    },
    /// Entities with a row in any of the given releases.
    TouchedBy {
        releases: &'a [Uuid],
        entity_type: Option<&'a str>,
    },
}

/// Resolve the effective row of every selected entity over `chain`.
///
/// Tombstones are included; callers decide whether a deleted row means absent.
/// Results are in entity creation order.
pub(super) fn load_effective(
    conn: &Connection,
    chain: &[Uuid],
    selection: Selection<'_>,
) -> Result<Vec<EntityVersion>> {
    if chain.is_empty() {
        return Ok(Vec::new());
    }

    let chain_ids: Vec<String> = chain.iter().map(Uuid::to_string).collect();
    let mut params: Vec<String> = chain_ids.clone();
    let mut sql = format!(
        "SELECT {}, e.rowid FROM entity_versions v JOIN entities e ON e.id = v.entity_id
         WHERE v.release_id IN ({})",
        VERSION_COLUMNS,
        placeholders(chain.len())
    );

    match selection {
        Selection::Entity(id) => {
            sql.push_str(" AND v.entity_id = ?");
            params.push(id.to_string());
        }
        Selection::Type {
            entity_type,
            columns,
        } => {
            sql.push_str(" AND v.entity_type = ?");
            params.push(entity_type.to_string());
            if !columns.is_empty() {
                sql.push_str(&format!(
                    " AND v.entity_id IN (SELECT entity_id FROM entity_versions
                      WHERE entity_type = ? AND release_id IN ({})",
                    placeholders(chain.len())
                ));
                params.push(entity_type.to_string());
                params.extend(chain_ids.iter().cloned());
                for (column, value) in columns {
                    sql.push_str(&format!(" AND {} = ?", column.as_str()));
                    params.push(value.clone());
                }
                sql.push(')');
            }
        }
        Selection::TouchedBy {
            releases,
            entity_type,
        } => {
            sql.push_str(&format!(
                " AND v.entity_id IN (SELECT entity_id FROM entity_versions WHERE release_id IN ({})",
                placeholders(releases.len())
            ));
            params.extend(releases.iter().map(Uuid::to_string));
            if let Some(entity_type) = entity_type {
                sql.push_str(" AND entity_type = ?");
                params.push(entity_type.to_string());
            }
            sql.push(')');
        }
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok((version_from_row(row)?, row.get::<_, i64>(17)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let position: HashMap<Uuid, usize> = chain.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut nearest: HashMap<Uuid, (usize, i64, EntityVersion)> = HashMap::new();
    for (version, order) in rows {
        let rank = position.get(&version.release_id).copied().unwrap_or(usize::MAX);
        let closer = nearest
            .get(&version.entity_id)
            .map_or(true, |(best, _, _)| rank < *best);
        if closer {
            nearest.insert(version.entity_id, (rank, order, version));
        }
    }

    let mut resolved: Vec<(i64, EntityVersion)> = nearest
        .into_values()
        .map(|(_, order, version)| (order, version))
        .collect();
    resolved.sort_by_key(|(order, _)| *order);
    Ok(resolved.into_iter().map(|(_, version)| version).collect())
}

pub(super) fn history(conn: &Connection, entity_id: Uuid) -> Result<Option<EntityHistory>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM entity_versions v WHERE v.entity_id = ? ORDER BY v.updated_at DESC",
        VERSION_COLUMNS
    ))?;
    let versions = stmt
        .query_map([entity_id.to_string()], version_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let Some(first) = versions.first() else {
        return Ok(None);
    };

    Ok(Some(EntityHistory {
        entity_id,
        entity_type: first.entity_type.clone(),
        versions,
    }))
}

/// Whether `attributes` has `expected` for `field`. Missing fields compare as null.
fn field_matches(spec: &EntitySpec, attributes: &Attributes, field: &str, expected: &Value) -> bool {
    let actual = attributes.get(field).unwrap_or(&Value::Null);
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        // Typed columns are stored as text, so numeric filters compare by their text form.
        (Value::String(s), Value::Number(n)) => TypedColumn::from_str(field)
            .is_some_and(|c| spec.has_column(c) && *s == n.to_string()),
        // Text filters (query strings) match scalar payload values by their text form.
        (Value::Number(n), Value::String(s)) => n.to_string() == *s,
        (Value::Bool(b), Value::String(s)) => b.to_string() == *s,
        _ => false,
    }
}

/// Read access to the effective view of one release.
pub(super) struct ScopedView<'c> {
    conn: &'c Connection,
    context: ReleaseContext,
    chain: Vec<Uuid>,
}

impl<'c> ScopedView<'c> {
    pub(super) fn new(conn: &'c Connection, context: ReleaseContext) -> Result<Self> {
        let chain = Lineage::load(conn)?.chain(context.release_id);
        Ok(Self {
            conn,
            context,
            chain,
        })
    }

    /// Effective row of an entity, tombstones included.
    fn effective(&self, entity_id: Uuid) -> Result<Option<EntityVersion>> {
        let mut rows = load_effective(self.conn, &self.chain, Selection::Entity(entity_id))?;
        Ok(rows.pop())
    }

    /// Effective row of a live entity of the given type.
    fn live(&self, spec: &EntitySpec, entity_id: Uuid) -> Result<Option<EntityVersion>> {
        Ok(self
            .effective(entity_id)?
            .filter(|v| v.entity_type == spec.entity_type && !v.is_deleted))
    }

    pub(super) fn get(&self, spec: &EntitySpec, entity_id: Uuid) -> Result<Option<EntityRecord>> {
        Ok(self.live(spec, entity_id)?.map(EntityVersion::into_record))
    }

    pub(super) fn find(&self, spec: &EntitySpec, filter: &Attributes) -> Result<Vec<EntityRecord>> {
        // Narrow candidates in SQL on typed columns, then check the effective rows.
        let mut narrowing = TypedValues::new();
        for (field, value) in filter {
            let Some(column) = TypedColumn::from_str(field).filter(|c| spec.has_column(*c)) else {
                continue;
            };
            match value {
                Value::String(s) => {
                    narrowing.insert(column, s.clone());
                }
                Value::Number(n) => {
                    narrowing.insert(column, n.to_string());
                }
                _ => {}
            }
        }

        let rows = load_effective(
            self.conn,
            &self.chain,
            Selection::Type {
                entity_type: spec.entity_type,
                columns: &narrowing,
            },
        )?;

        Ok(rows
            .into_iter()
            .filter(|v| !v.is_deleted)
            .filter(|v| {
                let attributes = v.attributes();
                filter
                    .iter()
                    .all(|(field, expected)| field_matches(spec, &attributes, field, expected))
            })
            .map(EntityVersion::into_record)
            .collect())
    }

    /// First unique key of `spec` that another live entity already holds.
    fn unique_violation(
        &self,
        spec: &EntitySpec,
        columns: &TypedValues,
        exclude: Option<Uuid>,
    ) -> Result<Option<String>> {
        for key in spec.unique_keys {
            let mut tuple = TypedValues::new();
            for column in key.iter() {
                if let Some(value) = columns.get(column) {
                    tuple.insert(*column, value.clone());
                }
            }
            // Incomplete tuples never collide
            if tuple.len() != key.len() {
                continue;
            }

            let candidates = load_effective(
                self.conn,
                &self.chain,
                Selection::Type {
                    entity_type: spec.entity_type,
                    columns: &tuple,
                },
            )?;

            let taken = candidates.iter().any(|v| {
                !v.is_deleted
                    && Some(v.entity_id) != exclude
                    && tuple.iter().all(|(c, value)| v.columns.get(c) == Some(value))
            });
            if taken {
                let described = tuple
                    .iter()
                    .map(|(c, value)| format!("{}={}", c.as_str(), value))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Ok(Some(described));
            }
        }
        Ok(None)
    }
}

/// Write access to one OPEN release, with a scope fixed for its whole lifetime.
///
/// Obtained from [`Database::atomic`](super::Database::atomic); everything done
/// through one writer commits or rolls back together.
pub struct Writer<'c> {
    view: ScopedView<'c>,
    user_id: String,
}

impl<'c> Writer<'c> {
    pub(super) fn new(conn: &'c Connection, context: ReleaseContext, user_id: &str) -> Result<Self> {
        Ok(Self {
            view: ScopedView::new(conn, context)?,
            user_id: user_id.to_string(),
        })
    }

    /// The release this writer is bound to.
    pub fn context(&self) -> ReleaseContext {
        self.view.context
    }

    pub fn get(&self, spec: &EntitySpec, entity_id: Uuid) -> Result<Option<EntityRecord>> {
        self.view.get(spec, entity_id)
    }

    pub fn find(&self, spec: &EntitySpec, filter: &Attributes) -> Result<Vec<EntityRecord>> {
        self.view.find(spec, filter)
    }

    pub fn create(&mut self, spec: &EntitySpec, draft: Attributes) -> Result<EntityRecord> {
        spec.check(&draft)?;
        let split = spec.split(&draft)?;

        if let Some(key) = self.view.unique_violation(spec, &split.columns, None)? {
            return Err(StoreError::DuplicateEntity {
                entity_type: spec.entity_type.to_string(),
                key,
            });
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        self.view.conn.execute(
            "INSERT INTO entities (id, entity_type, created_at) VALUES (?, ?, ?)",
            (id.to_string(), spec.entity_type, format_datetime(now)),
        )?;

        let version = EntityVersion {
            entity_id: id,
            release_id: self.view.context.release_id,
            entity_type: spec.entity_type.to_string(),
            columns: split.columns,
            payload: split.payload,
            change_type: ChangeType::Create,
            is_deleted: false,
            created_by: self.user_id.clone(),
            created_at: now,
            updated_by: self.user_id.clone(),
            updated_at: now,
        };
        write_version(self.view.conn, &version)?;

        tracing::debug!(
            entity_id = %id,
            entity_type = spec.entity_type,
            release_id = %version.release_id,
            "Created entity"
        );
        Ok(version.into_record())
    }

    /// Update an entity in this release.
    ///
    /// An entity this release has not touched yet is copied from the effective
    /// view into the release before the patch applies.
    pub fn patch(
        &mut self,
        spec: &EntitySpec,
        entity_id: Uuid,
        partial: Attributes,
    ) -> Result<EntityRecord> {
        let current = self
            .view
            .live(spec, entity_id)?
            .ok_or(StoreError::EntityNotFound(entity_id))?;
        let split = spec.split(&partial)?;

        let mut columns = current.columns.clone();
        for column in &split.cleared {
            columns.remove(column);
        }
        let key_changed = spec.unique_keys.iter().flat_map(|key| key.iter()).any(|c| {
            split.cleared.contains(c)
                || split
                    .columns
                    .get(c)
                    .is_some_and(|v| current.columns.get(c) != Some(v))
        });
        columns.extend(split.columns);

        let mut payload = current.payload.clone();
        payload.extend(split.payload);

        let release_id = self.view.context.release_id;
        let in_place = current.release_id == release_id;
        let now = Utc::now();
        let version = EntityVersion {
            entity_id,
            release_id,
            entity_type: spec.entity_type.to_string(),
            columns,
            payload,
            change_type: if in_place && current.change_type == ChangeType::Create {
                ChangeType::Create
            } else {
                ChangeType::Update
            },
            is_deleted: false,
            created_by: if in_place {
                current.created_by.clone()
            } else {
                self.user_id.clone()
            },
            created_at: if in_place { current.created_at } else { now },
            updated_by: self.user_id.clone(),
            updated_at: now,
        };

        spec.check(&version.attributes())?;
        if key_changed {
            if let Some(key) = self
                .view
                .unique_violation(spec, &version.columns, Some(entity_id))?
            {
                return Err(StoreError::DuplicateEntity {
                    entity_type: spec.entity_type.to_string(),
                    key,
                });
            }
        }

        write_version(self.view.conn, &version)?;
        tracing::debug!(
            entity_id = %entity_id,
            release_id = %release_id,
            copied_from = ?(!in_place).then_some(current.release_id),
            "Patched entity"
        );
        Ok(version.into_record())
    }

    /// Tombstone an entity in this release.
    pub fn remove(&mut self, spec: &EntitySpec, entity_id: Uuid) -> Result<()> {
        let current = self
            .view
            .live(spec, entity_id)?
            .ok_or(StoreError::EntityNotFound(entity_id))?;

        let release_id = self.view.context.release_id;
        let in_place = current.release_id == release_id;
        let now = Utc::now();
        let tombstone = EntityVersion {
            release_id,
            change_type: ChangeType::Delete,
            is_deleted: true,
            created_by: if in_place {
                current.created_by.clone()
            } else {
                self.user_id.clone()
            },
            created_at: if in_place { current.created_at } else { now },
            updated_by: self.user_id.clone(),
            updated_at: now,
            ..current
        };
        write_version(self.view.conn, &tombstone)?;

        tracing::debug!(entity_id = %entity_id, release_id = %release_id, "Removed entity");
        Ok(())
    }
}
