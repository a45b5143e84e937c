//! Forward migration of stored state to the current schema version.
//!
//! Upgrading runs in two stages. The provider first rewrites the stored
//! value however its versions require, usually with a [`StateUpgrader`].
//! The result is then conformed to the current schema with [`conform`],
//! which coerces primitives and collections into the declared types.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_protocol::schema::{Attribute, Schema};
//! use hemmer_provider_protocol::upgrade::{conform, StateUpgrader};
//! use hemmer_provider_protocol::Value;
//! use serde_json::json;
//!
//! let schema = Schema::new(2).with_attribute("size", Attribute::optional_int64());
//!
//! // Version 0 called the attribute "capacity"
//! let upgrader = StateUpgrader::new().with_step(0, |state| {
//!     let capacity = state.attribute("capacity").clone();
//!     Ok(state.without_attribute("capacity").with_attribute("size", capacity))
//! });
//!
//! let stored = Value::from(json!({"capacity": "10"}));
//! let upgraded = upgrader.upgrade(0, schema.version, stored).unwrap();
//! let conformed = conform(&schema.block, &upgraded).unwrap();
//! assert_eq!(conformed, Value::from(json!({"size": 10})));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::error::ProviderError;
use crate::schema::{AttributeType, Block, BlockNestingMode, NestedBlock};
use crate::value::{join_path, Value};

type UpgradeStep = Arc<dyn Fn(Value) -> Result<Value, ProviderError> + Send + Sync>;

/// A chain of single-version upgrade steps.
///
/// The step registered for version `n` rewrites state stored at `n` into the
/// shape of `n + 1`. Versions without a step are shape compatible with the
/// next one and pass through unchanged.
#[derive(Clone, Default)]
pub struct StateUpgrader {
    steps: BTreeMap<u64, UpgradeStep>,
}

impl StateUpgrader {
    /// Create an upgrader with no steps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the step that upgrades state from `from_version` to the next version.
    pub fn with_step<F>(mut self, from_version: u64, step: F) -> Self
    where
        F: Fn(Value) -> Result<Value, ProviderError> + Send + Sync + 'static,
    {
        self.steps.insert(from_version, Arc::new(step));
        self
    }

    /// Run every step from `stored_version` up to `current_version`.
    pub fn upgrade(
        &self,
        stored_version: u64,
        current_version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.steps
            .range(stored_version..current_version)
            .try_fold(state, |state, (_, step)| step(state))
    }
}

impl fmt::Debug for StateUpgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateUpgrader")
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Coerce a value into the shape a block declares.
///
/// Strings, numbers and bools convert into each other where the text allows
/// it, integral floats become int64, lists and sets convert into each other,
/// and so do objects and maps. Missing attributes become null. Attributes the
/// block does not declare, and values that cannot be coerced, are errors.
pub fn conform(block: &Block, value: &Value) -> Result<Value, Diagnostics> {
    let mut diagnostics = Diagnostics::new();
    let conformed = conform_block(block, value, "", &mut diagnostics);
    if diagnostics.has_errors() {
        Err(diagnostics)
    } else {
        Ok(conformed)
    }
}

fn conform_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Diagnostics) -> Value {
    let entries = match value {
        Value::Null | Value::Unknown => return value.clone(),
        Value::Object(entries) | Value::Map(entries) => entries,
        other => {
            diagnostics.push(
                upgrade_error(format!("Expected object, got {}", other.type_name()))
                    .with_attribute_if_not_empty(path),
            );
            return Value::Null;
        },
    };

    let mut conformed = BTreeMap::new();

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        let attr_value = entries.get(name).unwrap_or(&Value::Null);
        conformed.insert(
            name.clone(),
            conform_type(&attr.attr_type, attr_value, &attr_path, diagnostics),
        );
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        let block_value = entries.get(name).unwrap_or(&Value::Null);
        conformed.insert(
            name.clone(),
            conform_nested(nested, block_value, &block_path, diagnostics),
        );
    }

    for name in entries.keys() {
        if !block.attributes.contains_key(name) && !block.blocks.contains_key(name) {
            diagnostics.push(
                upgrade_error(format!("Unsupported attribute '{}'", join_path(path, name)))
                    .with_detail("The current schema does not declare this stored attribute")
                    .with_attribute(join_path(path, name)),
            );
        }
    }

    Value::Object(conformed)
}

fn conform_nested(
    nested: &NestedBlock,
    value: &Value,
    path: &str,
    diagnostics: &mut Diagnostics,
) -> Value {
    if value.is_null() || value.is_unknown() {
        return value.clone();
    }

    match nested.nesting_mode {
        BlockNestingMode::Single => conform_block(&nested.block, value, path, diagnostics),
        BlockNestingMode::List | BlockNestingMode::Set => match value.as_elements() {
            Some(items) => {
                let items = items.iter().enumerate().map(|(i, item)| {
                    let item_path = join_path(path, &i.to_string());
                    conform_block(&nested.block, item, &item_path, diagnostics)
                });
                if nested.nesting_mode == BlockNestingMode::Set {
                    Value::set(items.collect::<Vec<_>>())
                } else {
                    Value::list(items.collect::<Vec<_>>())
                }
            },
            None => mismatch(path, "list", value, diagnostics),
        },
        BlockNestingMode::Map => match value.as_entries() {
            Some(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(key, item)| {
                        let item_path = join_path(path, key);
                        let conformed = conform_block(&nested.block, item, &item_path, diagnostics);
                        (key.clone(), conformed)
                    })
                    .collect(),
            ),
            None => mismatch(path, "map", value, diagnostics),
        },
    }
}

fn conform_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Diagnostics,
) -> Value {
    if value.is_null() || value.is_unknown() {
        return value.clone();
    }

    match attr_type {
        AttributeType::String => match value {
            Value::String(_) => value.clone(),
            Value::Number(n) => Value::String(n.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            _ => mismatch(path, "string", value, diagnostics),
        },
        AttributeType::Int64 => match to_int64(value) {
            Some(n) => Value::from(n),
            None => mismatch(path, "int64", value, diagnostics),
        },
        AttributeType::Float64 => match value {
            Value::Number(_) => value.clone(),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Value::from(f),
                _ => mismatch(path, "float64", value, diagnostics),
            },
            _ => mismatch(path, "float64", value, diagnostics),
        },
        AttributeType::Bool => match value {
            Value::Bool(_) => value.clone(),
            Value::String(s) if s == "true" => Value::Bool(true),
            Value::String(s) if s == "false" => Value::Bool(false),
            _ => mismatch(path, "bool", value, diagnostics),
        },
        AttributeType::List(element_type) => match value.as_elements() {
            Some(items) => Value::list(conform_elements(element_type, items, path, diagnostics)),
            None => mismatch(path, "list", value, diagnostics),
        },
        AttributeType::Set(element_type) => match value.as_elements() {
            Some(items) => Value::set(conform_elements(element_type, items, path, diagnostics)),
            None => mismatch(path, "set", value, diagnostics),
        },
        AttributeType::Map(value_type) => match value.as_entries() {
            Some(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(key, item)| {
                        let item_path = join_path(path, key);
                        let conformed = conform_type(value_type, item, &item_path, diagnostics);
                        (key.clone(), conformed)
                    })
                    .collect(),
            ),
            None => mismatch(path, "map", value, diagnostics),
        },
        AttributeType::Object(attrs) => match value.as_entries() {
            Some(entries) => conform_object(attrs, entries, path, diagnostics),
            None => mismatch(path, "object", value, diagnostics),
        },
        AttributeType::Dynamic => value.clone(),
    }
}

fn conform_elements(
    element_type: &AttributeType,
    items: &[Value],
    path: &str,
    diagnostics: &mut Diagnostics,
) -> Vec<Value> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let item_path = join_path(path, &i.to_string());
            conform_type(element_type, item, &item_path, diagnostics)
        })
        .collect()
}

fn conform_object(
    attrs: &HashMap<String, AttributeType>,
    entries: &BTreeMap<String, Value>,
    path: &str,
    diagnostics: &mut Diagnostics,
) -> Value {
    let mut conformed = BTreeMap::new();
    for (name, attr_type) in attrs {
        let attr_path = join_path(path, name);
        let attr_value = entries.get(name).unwrap_or(&Value::Null);
        conformed.insert(
            name.clone(),
            conform_type(attr_type, attr_value, &attr_path, diagnostics),
        );
    }
    for name in entries.keys() {
        if !attrs.contains_key(name) {
            diagnostics.push(
                upgrade_error(format!("Unsupported attribute '{}'", join_path(path, name)))
                    .with_attribute(join_path(path, name)),
            );
        }
    }
    Value::Object(conformed)
}

fn to_int64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        },
        _ => None,
    }
}

// 2^63, the first float past i64::MAX
const I64_END: f64 = 9_223_372_036_854_775_808.0;

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < I64_END {
        Some(f as i64)
    } else {
        None
    }
}

fn mismatch(path: &str, expected: &str, got: &Value, diagnostics: &mut Diagnostics) -> Value {
    diagnostics.push(
        upgrade_error(format!("Cannot convert attribute '{}' to {}", path, expected))
            .with_detail(format!("Stored value is {}", got))
            .with_attribute_if_not_empty(path),
    );
    Value::Null
}

fn upgrade_error(summary: String) -> Diagnostic {
    Diagnostic::error(summary).with_kind(DiagnosticKind::SchemaVersion)
}
