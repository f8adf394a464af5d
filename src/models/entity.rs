use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{TypedColumn, TypedValues};

/// Free-form entity attributes, keyed by field name.
pub type Attributes = serde_json::Map<String, Value>;

/// The kind of change a version row records relative to the release's base.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(Self::Create),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// The state of one entity inside one release.
///
/// Unique per `(entity_id, release_id)`. Mutable while the release is OPEN,
/// frozen afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityVersion {
    pub entity_id: Uuid,
    pub release_id: Uuid,
    pub entity_type: String,
    pub columns: TypedValues,
    pub payload: Attributes,
    pub change_type: ChangeType,
    pub is_deleted: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl EntityVersion {
    /// Typed columns and payload merged into one attribute map.
    ///
    /// Typed columns win over payload keys with the same name.
    pub fn attributes(&self) -> Attributes {
        let mut attributes = self.payload.clone();
        for (column, value) in &self.columns {
            attributes.insert(column.as_str().to_string(), Value::String(value.clone()));
        }
        attributes
    }

    pub fn column(&self, column: TypedColumn) -> Option<&str> {
        self.columns.get(&column).map(String::as_str)
    }

    pub fn into_record(self) -> EntityRecord {
        EntityRecord {
            fields: self.attributes(),
            id: self.entity_id,
            entity_type: self.entity_type,
            release_id: self.release_id,
            change_type: self.change_type,
            updated_by: self.updated_by,
            updated_at: self.updated_at,
        }
    }
}

/// An entity as seen through the effective view at some release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRecord {
    pub id: Uuid,
    pub entity_type: String,
    /// Release the resolved version row belongs to. Differs from the requested
    /// scope when the entity was read through the fallback chain.
    pub release_id: Uuid,
    pub fields: Attributes,
    pub change_type: ChangeType,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// String value of a field, if it is a string.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Options for store writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteOptions {
    pub user_id: String,
    /// Explicit release to write into. Defaults to the newest OPEN release.
    pub release_id: Option<Uuid>,
}

impl WriteOptions {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            release_id: None,
        }
    }

    pub fn in_release(mut self, release_id: Uuid) -> Self {
        self.release_id = Some(release_id);
        self
    }
}

/// Options for store reads.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Explicit release to read at. Defaults to the current DEPLOYED release.
    pub release_id: Option<Uuid>,
}

impl ReadOptions {
    pub fn at(release_id: Uuid) -> Self {
        Self {
            release_id: Some(release_id),
        }
    }
}

/// Version rows of an entity across releases, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityHistory {
    pub entity_id: Uuid,
    pub entity_type: String,
    pub versions: Vec<EntityVersion>,
}
