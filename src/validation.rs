//! Configuration validation against a [`Schema`].
//!
//! The walk checks presence of required attributes, value types, nested
//! block item counts and finally runs each attribute's [`Validator`]. Every
//! problem becomes a [`Diagnostic`] bound to the dotted attribute path
//! (`ingress.0.port`).
//!
//! ```
//! use scaleway_provider::schema::{Attribute, Schema};
//! use scaleway_provider::validation::validate;
//! use scaleway_provider::validators::Validator;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("project_id", Attribute::optional_string().with_validator(Validator::Uuid));
//!
//! assert!(validate(&schema, &json!({"name": "vol"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "vol", "project_id": "nope"}));
//! assert_eq!(diagnostics[0].attribute.as_deref(), Some("project_id"));
//! ```
//!
//! [`Validator`]: crate::validators::Validator

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::schema::{Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema};

/// Validate `value` against `schema`. An empty list means the value is valid.
///
/// Computed-only attributes are skipped; null is accepted for anything
/// that is not required.
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut walker = Walker::default();
    walker.block(&schema.block, value, "");
    walker.diagnostics
}

/// Like [`validate`], returning the diagnostics as an error.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Whether `value` is valid against `schema`.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

#[derive(Default)]
struct Walker {
    diagnostics: Vec<Diagnostic>,
}

impl Walker {
    fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn block(&mut self, block: &Block, value: &Value, path: &str) {
        let obj = match value {
            Value::Object(map) => map,
            Value::Null => return,
            other => {
                let diag = Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", type_name(other)));
                self.push(if path.is_empty() {
                    diag
                } else {
                    diag.with_attribute(path)
                });
                return;
            },
        };

        for (name, attr) in &block.attributes {
            self.attribute(attr, obj.get(name), &join_path(path, name));
        }
        for (name, nested) in &block.blocks {
            self.nested(nested, obj.get(name), &join_path(path, name));
        }
    }

    fn attribute(&mut self, attr: &Attribute, value: Option<&Value>, path: &str) {
        if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
            return;
        }

        let value = match value {
            None | Some(Value::Null) => {
                if attr.flags.required {
                    self.push(
                        Diagnostic::error(format!("Missing required attribute '{}'", path))
                            .with_detail("This attribute is required and must be provided")
                            .with_attribute(path),
                    );
                }
                return;
            },
            Some(v) => v,
        };

        let before = self.diagnostics.len();
        self.value_type(&attr.attr_type, value, path);
        if self.diagnostics.len() > before {
            return;
        }

        let Some(validator) = &attr.validator else {
            return;
        };
        match (&attr.attr_type, value) {
            (AttributeType::List(_) | AttributeType::Set(_), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    if let Some(diag) = validator.check(&format!("{}.{}", path, i), item) {
                        self.push(diag);
                    }
                }
            },
            _ => {
                if let Some(diag) = validator.check(path, value) {
                    self.push(diag);
                }
            },
        }
    }

    fn value_type(&mut self, attr_type: &AttributeType, value: &Value, path: &str) {
        match attr_type {
            AttributeType::String if !value.is_string() => self.type_error(path, "string", value),
            AttributeType::Int64 if !is_int64(value) => self.type_error(path, "int64", value),
            AttributeType::Float64 if !value.is_number() => self.type_error(path, "float64", value),
            AttributeType::Bool if !value.is_boolean() => self.type_error(path, "bool", value),
            AttributeType::List(element) | AttributeType::Set(element) => match value.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        self.value_type(element, item, &format!("{}.{}", path, i));
                    }
                },
                None => {
                    let expected = if matches!(attr_type, AttributeType::Set(_)) {
                        "set"
                    } else {
                        "list"
                    };
                    self.type_error(path, expected, value);
                },
            },
            AttributeType::Map(element) => match value.as_object() {
                Some(obj) => {
                    for (key, item) in obj {
                        self.value_type(element, item, &format!("{}.{}", path, key));
                    }
                },
                None => self.type_error(path, "map", value),
            },
            AttributeType::Object(fields) => match value.as_object() {
                Some(obj) => self.object(fields, obj, path),
                None => self.type_error(path, "object", value),
            },
            _ => {},
        }
    }

    // Object fields carry no usage flags, so presence is not enforced.
    fn object(&mut self, fields: &HashMap<String, AttributeType>, obj: &Map<String, Value>, path: &str) {
        for (name, field_type) in fields {
            if let Some(value) = obj.get(name) {
                self.value_type(field_type, value, &join_path(path, name));
            }
        }
    }

    fn nested(&mut self, nested: &NestedBlock, value: Option<&Value>, path: &str) {
        if nested.computed {
            return;
        }

        let value = match value {
            None | Some(Value::Null) => {
                if nested.min_items > 0 {
                    let summary = if nested.nesting_mode == BlockNestingMode::Single {
                        format!("Missing required block '{}'", path)
                    } else {
                        format!("Block '{}' requires at least {} item(s)", path, nested.min_items)
                    };
                    self.push(Diagnostic::error(summary).with_attribute(path));
                }
                return;
            },
            Some(v) => v,
        };

        match (nested.nesting_mode, value) {
            (BlockNestingMode::Single, v) => self.block(&nested.block, v, path),
            (BlockNestingMode::List | BlockNestingMode::Set, Value::Array(items)) => {
                self.item_count(nested, items.len(), path);
                for (i, item) in items.iter().enumerate() {
                    self.block(&nested.block, item, &format!("{}.{}", path, i));
                }
            },
            (BlockNestingMode::Map, Value::Object(items)) => {
                self.item_count(nested, items.len(), path);
                for (key, item) in items {
                    self.block(&nested.block, item, &format!("{}.{}", path, key));
                }
            },
            (mode, v) => {
                let expected = if mode == BlockNestingMode::Map { "map" } else { "list" };
                self.push(
                    Diagnostic::error(format!("Expected {} for block '{}'", expected, path))
                        .with_detail(format!("Got {}", type_name(v)))
                        .with_attribute(path),
                );
            },
        }
    }

    fn item_count(&mut self, nested: &NestedBlock, len: usize, path: &str) {
        let len = len as u32;
        if len < nested.min_items {
            self.push(
                Diagnostic::error(format!(
                    "Block '{}' requires at least {} item(s), got {}",
                    path, nested.min_items, len
                ))
                .with_attribute(path),
            );
        }
        if nested.max_items > 0 && len > nested.max_items {
            self.push(
                Diagnostic::error(format!(
                    "Block '{}' allows at most {} item(s), got {}",
                    path, nested.max_items, len
                ))
                .with_attribute(path),
            );
        }
    }

    fn type_error(&mut self, path: &str, expected: &str, got: &Value) {
        self.push(
            Diagnostic::error(format!("Invalid type for attribute '{}'", path))
                .with_detail(format!("Expected {}, got {}", expected, type_name(got)))
                .with_attribute(path),
        );
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) if n.is_i64() => true,
        Value::Number(n) => n
            .as_f64()
            .is_some_and(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeFlags;
    use crate::validators::Validator;
    use serde_json::json;

    fn volume_schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("size_in_gb", Attribute::optional_int64())
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "zone",
                Attribute::optional_computed_string().with_validator(Validator::OneOf(vec![
                    "fr-par-1".into(),
                    "fr-par-2".into(),
                ])),
            )
    }

    #[test]
    fn test_required_attribute() {
        let schema = volume_schema();
        assert!(validate(&schema, &json!({"name": "data"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("name"));

        let diagnostics = validate(&schema, &json!({"name": null}));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_type_errors() {
        let schema = volume_schema();
        let diagnostics = validate(&schema, &json!({"name": 1, "size_in_gb": "20"}));
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d.summary.contains("Invalid type")));

        assert!(validate(&schema, &json!({"name": "a", "size_in_gb": 20.0})).is_empty());
        assert_eq!(validate(&schema, &json!({"name": "a", "size_in_gb": 20.5})).len(), 1);
    }

    #[test]
    fn test_computed_only_skipped() {
        let schema = volume_schema();
        assert!(validate(&schema, &json!({"name": "a", "id": 12})).is_empty());
    }

    #[test]
    fn test_validator_runs_after_type_check() {
        let schema = volume_schema();
        let diagnostics = validate(&schema, &json!({"name": "a", "zone": "nl-ams-1"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("zone"));
        assert!(diagnostics[0].summary.contains("Invalid value"));

        // A type error is reported once, without the validator piling on.
        let diagnostics = validate(&schema, &json!({"name": "a", "zone": 3}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validator_on_list_elements() {
        let schema = Schema::v0().with_attribute(
            "ips",
            Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::optional())
                .with_validator(Validator::IpAddress),
        );
        assert!(validate(&schema, &json!({"ips": ["10.0.0.1", "::1"]})).is_empty());

        let diagnostics = validate(&schema, &json!({"ips": ["10.0.0.1", "bogus"]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("ips.1"));
    }

    #[test]
    fn test_map_and_object_types() {
        let mut fields = HashMap::new();
        fields.insert("host".to_string(), AttributeType::String);
        fields.insert("port".to_string(), AttributeType::Int64);

        let schema = Schema::v0()
            .with_attribute(
                "labels",
                Attribute::new(AttributeType::map(AttributeType::String), AttributeFlags::optional()),
            )
            .with_attribute(
                "endpoint",
                Attribute::new(AttributeType::Object(fields), AttributeFlags::optional()),
            );

        let diagnostics = validate(&schema, &json!({"labels": {"env": 1}}));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("labels.env"));

        let diagnostics = validate(&schema, &json!({"endpoint": {"host": "h", "port": "80"}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("endpoint.port"));
    }

    #[test]
    fn test_nested_blocks() {
        let schema = Schema::v0().with_block(
            "rule",
            NestedBlock::list(
                Block::new().with_attribute(
                    "port",
                    Attribute::new(AttributeType::Int64, AttributeFlags::required())
                        .with_validator(Validator::Port),
                ),
            )
            .with_min_items(1)
            .with_max_items(2),
        );

        assert!(validate(&schema, &json!({"rule": [{"port": 80}]})).is_empty());

        let diagnostics = validate(&schema, &json!({"rule": []}));
        assert!(diagnostics[0].summary.contains("at least 1"));

        let diagnostics = validate(&schema, &json!({"rule": [{"port": 1}, {"port": 2}, {"port": 3}]}));
        assert!(diagnostics[0].summary.contains("at most 2"));

        let diagnostics = validate(&schema, &json!({"rule": [{"port": 99999}]}));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("rule.0.port"));

        let diagnostics = validate(&schema, &json!({"rule": "x"}));
        assert!(diagnostics[0].summary.contains("Expected list"));
    }

    #[test]
    fn test_missing_single_block() {
        let schema = Schema::v0().with_block(
            "snapshot",
            NestedBlock::single(Block::new().with_attribute("id", Attribute::required_string()))
                .with_min_items(1),
        );
        let diagnostics = validate(&schema, &json!({}));
        assert!(diagnostics[0].summary.contains("Missing required block"));

        let diagnostics = validate(&schema, &json!({"snapshot": {"id": 3}}));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("snapshot.id"));
    }

    #[test]
    fn test_helpers_and_root() {
        let schema = volume_schema();
        assert!(is_valid(&schema, &json!({"name": "a"})));
        assert_eq!(validate_result(&schema, &json!({})).unwrap_err().len(), 1);

        let diagnostics = validate(&schema, &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].attribute.is_none());
    }
}
