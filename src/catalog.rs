//! Built-in entity types used by the content features.
//!
//! Feature modules talk to the store only through these specs; adding an entity
//! type means adding a `const` here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::models::{Attributes, EntityRecord, EntitySpec, TypedColumn, WriteOptions};

/// Statuses a translation key or variant may carry.
pub const TRANSLATION_STATUSES: &[&str] = &["draft", "review", "approved"];

pub const TRANSLATION_KEY: EntitySpec = EntitySpec {
    entity_type: "translation_key",
    typed_columns: &[TypedColumn::Slug, TypedColumn::Value, TypedColumn::Status],
    unique_keys: &[&[TypedColumn::Slug]],
    validate: Some(validate_translation_key),
};

pub const TRANSLATION_VARIANT: EntitySpec = EntitySpec {
    entity_type: "translation_variant",
    typed_columns: &[
        TypedColumn::ParentId,
        TypedColumn::LocaleId,
        TypedColumn::Value,
        TypedColumn::Status,
    ],
    unique_keys: &[&[TypedColumn::ParentId, TypedColumn::LocaleId]],
    validate: Some(validate_translation_variant),
};

pub const BRAND: EntitySpec = EntitySpec {
    entity_type: "brand",
    typed_columns: &[TypedColumn::Title, TypedColumn::Slug],
    unique_keys: &[&[TypedColumn::Slug]],
    validate: Some(validate_brand),
};

/// Every registered entity type.
pub const ALL: &[EntitySpec] = &[TRANSLATION_KEY, TRANSLATION_VARIANT, BRAND];

/// Look up a spec by its entity type tag.
pub fn spec_for(entity_type: &str) -> Option<&'static EntitySpec> {
    ALL.iter().find(|spec| spec.entity_type == entity_type)
}

fn non_empty_str<'a>(draft: &'a Attributes, field: &str) -> Option<&'a str> {
    draft
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn check_status(draft: &Attributes) -> std::result::Result<(), String> {
    match draft.get("status") {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(s)) if TRANSLATION_STATUSES.contains(&s.as_str()) => Ok(()),
        Some(other) => Err(format!(
            "status must be one of {}, got {}",
            TRANSLATION_STATUSES.join(", "),
            other
        )),
    }
}

fn validate_translation_key(draft: &Attributes) -> std::result::Result<(), String> {
    let slug = non_empty_str(draft, "slug").ok_or("slug is required")?;
    if slug.chars().any(char::is_whitespace) {
        return Err(format!("slug must not contain whitespace: {:?}", slug));
    }
    check_status(draft)
}

fn validate_translation_variant(draft: &Attributes) -> std::result::Result<(), String> {
    let parent = non_empty_str(draft, "parent_id").ok_or("parent_id is required")?;
    Uuid::parse_str(parent).map_err(|_| format!("parent_id is not a valid id: {}", parent))?;
    non_empty_str(draft, "locale_id").ok_or("locale_id is required")?;
    check_status(draft)
}

fn validate_brand(draft: &Attributes) -> std::result::Result<(), String> {
    non_empty_str(draft, "title").ok_or("title is required")?;
    non_empty_str(draft, "slug").ok_or("slug is required")?;
    Ok(())
}

/// Input for creating a translation key together with its locale variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTranslationKeyInput {
    pub key: Attributes,
    /// Variant drafts; `parent_id` is filled in with the new key's id.
    #[serde(default)]
    pub variants: Vec<Attributes>,
}

/// A translation key and the variants created with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationKeyWithVariants {
    pub key: EntityRecord,
    pub variants: Vec<EntityRecord>,
}

/// Create a key and all of its variants in one transaction.
///
/// If any variant fails validation or collides, the key is not created either.
pub fn create_translation_key(
    db: &Database,
    input: CreateTranslationKeyInput,
    opts: &WriteOptions,
) -> Result<TranslationKeyWithVariants> {
    db.atomic(opts, |writer| {
        let key = writer.create(&TRANSLATION_KEY, input.key)?;

        let mut variants = Vec::with_capacity(input.variants.len());
        for mut draft in input.variants {
            if draft.contains_key("parent_id") {
                return Err(StoreError::Validation(
                    "variant parent_id is assigned from the new key".to_string(),
                ));
            }
            draft.insert("parent_id".to_string(), Value::String(key.id.to_string()));
            variants.push(writer.create(&TRANSLATION_VARIANT, draft)?);
        }

        Ok(TranslationKeyWithVariants { key, variants })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn translation_key_requires_slug() {
        assert!(TRANSLATION_KEY.check(&attrs(json!({"value": "x"}))).is_err());
        assert!(TRANSLATION_KEY.check(&attrs(json!({"slug": "app.title"}))).is_ok());
    }

    #[test]
    fn translation_key_rejects_unknown_status() {
        let draft = attrs(json!({"slug": "app.title", "status": "published"}));
        assert!(TRANSLATION_KEY.check(&draft).is_err());
    }

    #[test]
    fn variant_requires_a_valid_parent() {
        let draft = attrs(json!({"parent_id": "nope", "locale_id": "en"}));
        assert!(TRANSLATION_VARIANT.check(&draft).is_err());

        let draft = attrs(json!({"parent_id": Uuid::new_v4().to_string(), "locale_id": "en"}));
        assert!(TRANSLATION_VARIANT.check(&draft).is_ok());
    }

    #[test]
    fn spec_lookup_by_type() {
        assert_eq!(spec_for("brand").map(|s| s.entity_type), Some("brand"));
        assert!(spec_for("unknown").is_none());
    }
}
