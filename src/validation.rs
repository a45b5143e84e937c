//! Schema validation helpers.
//!
//! This module validates a [`Value`] against a [`Schema`]. Configuration is
//! validated before it is fully known, so [`Value::Unknown`] is accepted at
//! any position: the check is deferred to the call that sees the real value.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_protocol::schema::{Schema, Attribute};
//! use hemmer_provider_protocol::validation::validate;
//! use hemmer_provider_protocol::Value;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("count", Attribute::optional_int64());
//!
//! // Valid input
//! let input = Value::from(json!({"name": "test", "count": 42}));
//! assert!(validate(&schema, &input).is_empty());
//!
//! // Not yet known, still valid
//! let input = Value::from(json!({"count": 1})).with_attribute("name", Value::Unknown);
//! assert!(validate(&schema, &input).is_empty());
//!
//! // Invalid input - wrong type for count
//! let input = Value::from(json!({"name": "test", "count": "not a number"}));
//! let diagnostics = validate(&schema, &input);
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics.as_slice()[0].attribute, Some("count".to_string()));
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::schema::{Attribute, AttributeType, Block, BlockNestingMode, NestedBlock, Schema};
use crate::value::{join_path, Value};

/// Validate a value against a schema.
///
/// Returns diagnostics for any validation errors found.
/// An empty collection means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed-only attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - Unknown values satisfy every rule
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Diagnostics {
    validate_block_value(&schema.block, value)
}

/// Validate a value against a block, returning diagnostics.
pub fn validate_block_value(block: &Block, value: &Value) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    validate_block(block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a value against a schema, returning Ok if valid or Err with diagnostics.
///
/// This is a convenience wrapper around [`validate`] that returns a Result.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Diagnostics> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a value is valid against a schema.
///
/// Returns `true` if valid, `false` otherwise.
/// Use [`validate`] to get detailed error information.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Diagnostics) {
    let obj = match value {
        Value::Object(map) | Value::Map(map) => map,
        // Null is valid for optional blocks, unknown can't be checked yet
        Value::Null | Value::Unknown => return,
        _ => {
            diagnostics.push(
                validation_error("Expected object")
                    .with_detail(format!("Got {}", value.type_name()))
                    .with_attribute_if_not_empty(path),
            );
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested_block) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested_block, obj.get(name), &block_path, diagnostics);
    }

    for name in obj.keys() {
        if !block.attributes.contains_key(name) && !block.blocks.contains_key(name) {
            diagnostics.push(
                validation_error(format!("Unsupported attribute '{}'", join_path(path, name)))
                    .with_detail("This attribute is not declared in the schema")
                    .with_attribute(join_path(path, name)),
            );
        }
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Diagnostics,
) {
    // Skip computed-only attributes (provider sets these)
    if attr.flags.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    validation_error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_attribute_type(&attr.attr_type, v, path, diagnostics),
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Diagnostics,
) {
    if value.is_unknown() || value.is_null() {
        return;
    }

    match attr_type {
        AttributeType::String => {
            if value.as_str().is_none() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Float64 => {
            if value.as_number().is_none() {
                diagnostics.push(type_error(path, "float64", value));
            }
        },
        AttributeType::Bool => {
            if value.as_bool().is_none() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) => match value {
            Value::List(items) => validate_elements(element_type, items, path, diagnostics),
            _ => diagnostics.push(type_error(path, "list", value)),
        },
        AttributeType::Set(element_type) => match value {
            // Sets arrive as lists when decoded from JSON
            Value::Set(items) | Value::List(items) => {
                validate_elements(element_type, items, path, diagnostics)
            },
            _ => diagnostics.push(type_error(path, "set", value)),
        },
        AttributeType::Map(value_type) => match value.as_entries() {
            Some(entries) => {
                for (key, val) in entries {
                    let key_path = join_path(path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "map", value)),
        },
        AttributeType::Object(attrs) => match value {
            Value::Object(obj) => validate_object_type(attrs, obj, path, diagnostics),
            _ => diagnostics.push(type_error(path, "object", value)),
        },
        AttributeType::Dynamic => {},
    }
}

fn validate_elements(
    element_type: &AttributeType,
    items: &[Value],
    path: &str,
    diagnostics: &mut Diagnostics,
) {
    for (i, elem) in items.iter().enumerate() {
        let elem_path = join_path(path, &i.to_string());
        validate_attribute_type(element_type, elem, &elem_path, diagnostics);
    }
}

fn validate_object_type(
    attrs: &HashMap<String, AttributeType>,
    obj: &BTreeMap<String, Value>,
    path: &str,
    diagnostics: &mut Diagnostics,
) {
    for (name, attr_type) in attrs {
        let attr_path = join_path(path, name);
        if let Some(value) = obj.get(name) {
            validate_attribute_type(attr_type, value, &attr_path, diagnostics);
        }
        // Object attributes within a type don't have required/optional flags,
        // so we don't enforce presence
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Diagnostics,
) {
    if matches!(value, Some(Value::Unknown)) {
        return;
    }

    match nested.nesting_mode {
        BlockNestingMode::Single => validate_single_block(nested, value, path, diagnostics),
        BlockNestingMode::List | BlockNestingMode::Set => {
            validate_list_block(nested, value, path, diagnostics)
        },
        BlockNestingMode::Map => validate_map_block(nested, value, path, diagnostics),
    }
}

fn validate_single_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Diagnostics,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    validation_error(format!("Missing required block '{}'", path))
                        .with_detail("At least one block is required")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_block(&nested.block, v, path, diagnostics),
    }
}

fn validate_list_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Diagnostics,
) {
    match value {
        None | Some(Value::Null) => check_min_items(nested, None, path, diagnostics),
        Some(Value::List(items)) | Some(Value::Set(items)) => {
            check_item_count(nested, items.len(), path, diagnostics);
            for (i, item) in items.iter().enumerate() {
                let item_path = join_path(path, &i.to_string());
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        Some(v) => {
            diagnostics.push(
                validation_error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", v.type_name()))
                    .with_attribute(path),
            );
        },
    }
}

fn validate_map_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Diagnostics,
) {
    match value {
        None | Some(Value::Null) => check_min_items(nested, None, path, diagnostics),
        Some(v @ (Value::Map(_) | Value::Object(_))) => {
            let entries = v.as_entries().into_iter().flatten();
            let mut count = 0;
            for (key, item) in entries {
                count += 1;
                let item_path = join_path(path, key);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
            check_item_count(nested, count, path, diagnostics);
        },
        Some(v) => {
            diagnostics.push(
                validation_error(format!("Expected map for block '{}'", path))
                    .with_detail(format!("Got {}", v.type_name()))
                    .with_attribute(path),
            );
        },
    }
}

fn check_min_items(
    nested: &NestedBlock,
    count: Option<usize>,
    path: &str,
    diagnostics: &mut Diagnostics,
) {
    if count.is_none() && nested.min_items > 0 {
        diagnostics.push(
            validation_error(format!(
                "Block '{}' requires at least {} item(s)",
                path, nested.min_items
            ))
            .with_attribute(path),
        );
    }
}

fn check_item_count(nested: &NestedBlock, len: usize, path: &str, diagnostics: &mut Diagnostics) {
    let len = len as u32;

    if len < nested.min_items {
        diagnostics.push(
            validation_error(format!(
                "Block '{}' requires at least {} item(s), got {}",
                path, nested.min_items, len
            ))
            .with_attribute(path),
        );
    }

    // 0 means unlimited
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.push(
            validation_error(format!(
                "Block '{}' allows at most {} item(s), got {}",
                path, nested.max_items, len
            ))
            .with_attribute(path),
        );
    }
}

fn is_int64(value: &Value) -> bool {
    match value.as_number() {
        Some(n) if n.as_i64().is_some() => true,
        Some(n) => n
            .as_f64()
            .map(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
            .unwrap_or(false),
        None => false,
    }
}

fn validation_error(summary: impl Into<String>) -> Diagnostic {
    Diagnostic::error(summary).with_kind(DiagnosticKind::Validation)
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    validation_error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, got.type_name()))
        .with_attribute(path)
}
