use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How an entity differs between two releases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffKind {
    Added,
    Deleted,
    Modified,
}

/// One changed field. `None` means the field is absent on that side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub from: Option<Value>,
    pub to: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityDiff {
    pub entity_id: Uuid,
    pub entity_type: String,
    pub kind: DiffKind,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffSummary {
    pub added: usize,
    pub deleted: usize,
    pub modified: usize,
    pub total: usize,
}

/// Result of comparing the effective views of two releases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseDiff {
    pub from_release_id: Uuid,
    pub to_release_id: Uuid,
    pub entries: Vec<EntityDiff>,
    pub summary: DiffSummary,
}

/// Optional filters for [`ReleaseDiff`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffFilter {
    pub entity_type: Option<String>,
    pub brand_id: Option<String>,
}

/// Entities a release touches that are also touched elsewhere.
///
/// - parallel: changed in another release that has not been deployed yet
/// - overwrite: changed by a release deployed after this one was created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictReport {
    pub release_id: Uuid,
    pub parallel: usize,
    pub overwrite: usize,
    pub parallel_entities: Vec<Uuid>,
    pub overwrite_entities: Vec<Uuid>,
}

impl ConflictReport {
    pub fn has_conflicts(&self) -> bool {
        self.parallel > 0 || self.overwrite > 0
    }
}

/// Aggregate counts of what a release changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReleaseStats {
    pub release_id: Uuid,
    pub entities_touched: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub by_entity_type: BTreeMap<String, usize>,
}
