use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Attributes;
use crate::error::{Result, StoreError};

/// A field promoted to a real column on `entity_versions`.
///
/// Typed columns hold text only; drafts must supply them as JSON strings.
/// Every other attribute of an entity lives in the JSON `payload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypedColumn {
    Title,
    Slug,
    Status,
    Value,
    LocaleId,
    BrandId,
    ParentId,
}

impl TypedColumn {
    /// All typed columns in table order.
    pub const ALL: [TypedColumn; 7] = [
        Self::Title,
        Self::Slug,
        Self::Status,
        Self::Value,
        Self::LocaleId,
        Self::BrandId,
        Self::ParentId,
    ];

    /// Field name, identical to the column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Slug => "slug",
            Self::Status => "status",
            Self::Value => "value",
            Self::LocaleId => "locale_id",
            Self::BrandId => "brand_id",
            Self::ParentId => "parent_id",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

/// Typed column values of one version row. Absent keys are NULL.
pub type TypedValues = BTreeMap<TypedColumn, String>;

/// Draft validator hook.
pub type Validator = fn(&Attributes) -> std::result::Result<(), String>;

/// Declarative description of one entity type.
///
/// Entity types are registered as `const` values, so the set of typed columns
/// and unique keys is fixed at compile time.
#[derive(Debug, Clone, Copy)]
pub struct EntitySpec {
    pub entity_type: &'static str,
    pub typed_columns: &'static [TypedColumn],
    /// Each entry is a tuple of columns that must be unique in the effective view.
    pub unique_keys: &'static [&'static [TypedColumn]],
    pub validate: Option<Validator>,
}

impl EntitySpec {
    pub fn has_column(&self, column: TypedColumn) -> bool {
        self.typed_columns.contains(&column)
    }

    /// Run the validator, if any, over a full draft.
    pub fn check(&self, draft: &Attributes) -> Result<()> {
        match self.validate {
            Some(validate) => validate(draft).map_err(StoreError::Validation),
            None => Ok(()),
        }
    }

    /// Split a draft into typed column values and payload attributes.
    ///
    /// A typed column set to `null` is returned in the cleared list so a patch
    /// can reset it.
    pub fn split(&self, draft: &Attributes) -> Result<SplitDraft> {
        let mut split = SplitDraft::default();

        for (key, value) in draft {
            let column = TypedColumn::from_str(key).filter(|c| self.has_column(*c));
            match (column, value) {
                (Some(column), Value::Null) => split.cleared.push(column),
                (Some(column), Value::String(s)) => {
                    split.columns.insert(column, s.clone());
                }
                (Some(column), other) => {
                    return Err(StoreError::Validation(format!(
                        "{} must be a string, got {}",
                        column.as_str(),
                        other
                    )));
                }
                (None, value) => {
                    split.payload.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(split)
    }
}

/// A draft separated into its storage parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitDraft {
    pub columns: TypedValues,
    pub cleared: Vec<TypedColumn>,
    pub payload: Attributes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const THING: EntitySpec = EntitySpec {
        entity_type: "thing",
        typed_columns: &[TypedColumn::Slug, TypedColumn::Status],
        unique_keys: &[&[TypedColumn::Slug]],
        validate: None,
    };

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn split_separates_typed_columns_from_payload() {
        let split = THING
            .split(&attrs(json!({"slug": "a", "color": "red", "title": "T"})))
            .unwrap();

        assert_eq!(split.columns.get(&TypedColumn::Slug), Some(&"a".to_string()));
        // title is not a typed column for this spec, so it stays in the payload
        assert_eq!(split.payload.get("title"), Some(&json!("T")));
        assert_eq!(split.payload.get("color"), Some(&json!("red")));
    }

    #[test]
    fn split_rejects_non_scalar_typed_values() {
        let err = THING.split(&attrs(json!({"slug": ["a"]}))).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn split_rejects_numbers_for_typed_columns() {
        let err = THING.split(&attrs(json!({"status": 5}))).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        // numbers outside typed columns keep their JSON type
        let split = THING.split(&attrs(json!({"priority": 5}))).unwrap();
        assert_eq!(split.payload.get("priority"), Some(&json!(5)));
    }

    #[test]
    fn split_tracks_cleared_columns() {
        let split = THING.split(&attrs(json!({"status": null}))).unwrap();
        assert_eq!(split.cleared, vec![TypedColumn::Status]);
        assert!(split.columns.is_empty());
    }

    #[test]
    fn typed_column_names_round_trip() {
        for column in TypedColumn::ALL {
            assert_eq!(TypedColumn::from_str(column.as_str()), Some(column));
        }
    }
}
