//! Schema model: ordered fields, table-level keys, descriptor persistence.
//!
//! A [`Schema`] owns the ordered field list (order is the positional
//! cell-to-field mapping), the schema-wide missing-value tokens, the
//! primary key, and the foreign-key declarations. Descriptors round-trip
//! through YAML (`serde_yaml`) and import from JSON (`serde_json`), using
//! `camelCase` keys.
//!
//! Schema-definition problems are hard failures raised by [`Schema::validate`]
//! before any row is streamed; they are never reported as row errors.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::field::{Field, FieldType};

pub const DEFAULT_MISSING_VALUES: &[&str] = &[""];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyReference {
    /// Referenced resource name; the empty string means "this table".
    #[serde(default)]
    pub resource: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub fields: Vec<String>,
    pub reference: ForeignKeyReference,
}

impl ForeignKey {
    pub fn is_self_reference(&self) -> bool {
        self.reference.resource.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
    #[serde(default = "Schema::default_missing_values", rename = "missingValues")]
    pub missing_values: Vec<String>,
    #[serde(
        default,
        rename = "primaryKey",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub primary_key: Vec<String>,
    #[serde(
        default,
        rename = "foreignKeys",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub foreign_keys: Vec<ForeignKey>,
}

impl Default for Schema {
    fn default() -> Self {
        Schema {
            fields: Vec::new(),
            missing_values: Self::default_missing_values(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }
}

impl Schema {
    pub fn default_missing_values() -> Vec<String> {
        DEFAULT_MISSING_VALUES
            .iter()
            .map(|token| token.to_string())
            .collect()
    }

    /// Builds an all-`any` schema from a list of labels, the fallback when
    /// inference is disabled.
    pub fn from_field_names<S: AsRef<str>>(names: &[S]) -> Self {
        let fields = names
            .iter()
            .map(|name| Field::new(name.as_ref(), FieldType::Any))
            .collect();
        Schema {
            fields,
            ..Schema::default()
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.name.as_str()).collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }

    /// Hard failure for unknown names, matching the streaming layer's
    /// fail-fast stance on configuration.
    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(|| anyhow!("Schema has no field '{name}'"))
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn remove_field(&mut self, name: &str) -> Result<Field> {
        let index = self
            .fields
            .iter()
            .position(|field| field.name == name)
            .ok_or_else(|| anyhow!("Schema has no field '{name}'"))?;
        Ok(self.fields.remove(index))
    }

    /// Validates the whole definition: unique field names, per-field
    /// constraint support and example round-trips, primary-key membership,
    /// foreign-key membership and arity.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            ensure!(
                seen.insert(field.name.as_str()),
                "Schema has a duplicate field name '{}'",
                field.name
            );
            field
                .validate()
                .with_context(|| format!("Validating field '{}'", field.name))?;
        }
        for name in &self.primary_key {
            ensure!(
                self.has_field(name),
                "Primary key references unknown field '{name}'"
            );
        }
        for (index, fk) in self.foreign_keys.iter().enumerate() {
            for name in &fk.fields {
                ensure!(
                    self.has_field(name),
                    "Foreign key {} references unknown local field '{name}'",
                    index + 1
                );
            }
            ensure!(
                fk.fields.len() == fk.reference.fields.len(),
                "Foreign key {} has {} local field(s) but {} reference field(s)",
                index + 1,
                fk.fields.len(),
                fk.reference.fields.len()
            );
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let schema: Schema = serde_yaml::from_reader(reader).context("Parsing schema YAML")?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing schema YAML")
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing schema to YAML string")
    }

    pub fn from_json_value(descriptor: &JsonValue) -> Result<Self> {
        let schema: Schema = serde_json::from_value(descriptor.clone())
            .context("Parsing schema JSON descriptor")?;
        schema.validate()?;
        Ok(schema)
    }

    /// Shallow-merges a patch descriptor onto this schema. Top-level keys
    /// replace wholesale, except `fields`, which is an object keyed by
    /// field name whose entries merge into the matching field descriptor.
    pub fn patch(&mut self, patch: &JsonValue) -> Result<()> {
        let patch_map = patch
            .as_object()
            .ok_or_else(|| anyhow!("Schema patch must be an object"))?;
        let mut descriptor =
            serde_json::to_value(&*self).context("Serializing schema for patching")?;
        let descriptor_map = descriptor
            .as_object_mut()
            .ok_or_else(|| anyhow!("Schema descriptor is not an object"))?;

        for (key, value) in patch_map {
            if key == "fields" {
                let field_patches = value
                    .as_object()
                    .ok_or_else(|| anyhow!("Schema patch 'fields' must map name to patch"))?;
                let fields = descriptor_map
                    .get_mut("fields")
                    .and_then(|fields| fields.as_array_mut())
                    .ok_or_else(|| anyhow!("Schema descriptor has no fields array"))?;
                for (name, field_patch) in field_patches {
                    let field_patch = field_patch
                        .as_object()
                        .ok_or_else(|| anyhow!("Field patch for '{name}' must be an object"))?;
                    let target = fields
                        .iter_mut()
                        .filter_map(|field| field.as_object_mut())
                        .find(|field| {
                            field.get("name").and_then(|n| n.as_str()) == Some(name.as_str())
                        })
                        .ok_or_else(|| anyhow!("Schema patch targets unknown field '{name}'"))?;
                    for (patch_key, patch_value) in field_patch {
                        target.insert(patch_key.clone(), patch_value.clone());
                    }
                }
            } else {
                descriptor_map.insert(key.clone(), value.clone());
            }
        }

        let patched: Schema =
            serde_json::from_value(descriptor).context("Applying schema patch")?;
        patched.validate()?;
        *self = patched;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn two_field_schema() -> Schema {
        let mut schema = Schema::default();
        schema.add_field(Field::new("id", FieldType::Integer));
        schema.add_field(Field::new("name", FieldType::String));
        schema
    }

    #[test]
    fn field_lookup_is_a_hard_error_for_unknown_names() {
        let schema = two_field_schema();
        assert!(schema.field("id").is_ok());
        assert!(schema.field("missing").is_err());
    }

    #[test]
    fn duplicate_field_names_fail_validation() {
        let mut schema = two_field_schema();
        schema.add_field(Field::new("id", FieldType::String));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn primary_key_members_must_exist() {
        let mut schema = two_field_schema();
        schema.primary_key = vec!["id".to_string()];
        schema.validate().unwrap();
        schema.primary_key = vec!["nope".to_string()];
        assert!(schema.validate().is_err());
    }

    #[test]
    fn foreign_key_arity_must_match() {
        let mut schema = two_field_schema();
        schema.foreign_keys = vec![ForeignKey {
            fields: vec!["id".to_string()],
            reference: ForeignKeyReference {
                resource: String::new(),
                fields: vec!["id".to_string(), "name".to_string()],
            },
        }];
        assert!(schema.validate().is_err());
    }

    #[test]
    fn yaml_round_trip_preserves_the_descriptor() {
        let mut schema = two_field_schema();
        schema.primary_key = vec!["id".to_string()];
        schema.fields[0].constraints.unique = Some(true);

        let file = NamedTempFile::new().expect("temp file");
        schema.save(file.path()).unwrap();
        let loaded = Schema::load(file.path()).unwrap();
        assert_eq!(loaded, schema);
    }

    #[test]
    fn json_descriptor_uses_camel_case_keys() {
        let schema = Schema::from_json_value(&json!({
            "fields": [
                {"name": "id", "type": "integer", "constraints": {"minimum": "1"}},
                {"name": "tag", "type": "string", "constraints": {"minLength": 2}},
            ],
            "missingValues": ["", "NA"],
            "primaryKey": ["id"],
        }))
        .unwrap();
        assert_eq!(schema.missing_values, vec!["", "NA"]);
        assert_eq!(schema.primary_key, vec!["id"]);
        assert_eq!(schema.fields[1].constraints.min_length, Some(2));
    }

    #[test]
    fn patch_merges_per_field_and_replaces_top_level() {
        let mut schema = two_field_schema();
        schema
            .patch(&json!({
                "missingValues": ["", "-"],
                "fields": {"name": {"constraints": {"maxLength": 8}}},
            }))
            .unwrap();
        assert_eq!(schema.missing_values, vec!["", "-"]);
        assert_eq!(schema.fields[1].constraints.max_length, Some(8));
        // Untouched fields keep their definition.
        assert_eq!(schema.fields[0].field_type, FieldType::Integer);

        let err = schema.patch(&json!({"fields": {"ghost": {"type": "string"}}}));
        assert!(err.is_err());
    }
}
