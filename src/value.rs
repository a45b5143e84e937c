//! The typed value model carried by every protocol call.
//!
//! A [`Value`] is a closed tagged union. Any position that could hold a
//! concrete value may instead hold [`Value::Unknown`]: the type is fixed but
//! the concrete value will only be determined by apply.
//!
//! Values are never mutated by the protocol. Operations borrow their inputs
//! and build new values, so a `prior` handed to a call is untouched by it.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_protocol::Value;
//! use serde_json::json;
//!
//! let planned = Value::from(json!({"name": "web"})).with_attribute("id", Value::Unknown);
//!
//! assert!(!planned.is_wholly_known());
//! assert_eq!(planned.unknown_paths(), vec!["id".to_string()]);
//! assert_eq!(planned.get("name"), Some(&Value::from("web")));
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Number;

use crate::error::ProviderError;

static NULL: Value = Value::Null;

/// A dynamically-typed value that may be wholly or partially unknown.
///
/// Equality treats [`Value::Unknown`] as distinct from every concrete value
/// and from every other unknown, so a value containing an unknown is not
/// even equal to itself. For that reason `Value` is `PartialEq` but not `Eq`.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The absence of a value.
    #[default]
    Null,
    /// A value that will only be known after apply.
    Unknown,
    /// A boolean.
    Bool(bool),
    /// A number, integral or floating point.
    Number(Number),
    /// A string.
    String(String),
    /// An ordered sequence.
    List(Vec<Value>),
    /// An unordered collection of distinct values.
    Set(Vec<Value>),
    /// A string-keyed collection with a single element type.
    Map(BTreeMap<String, Value>),
    /// A fixed set of named attributes.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Build an object from attribute name/value pairs.
    pub fn object<K: Into<String>>(attributes: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(
            attributes
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    /// Build a map from key/value pairs.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    /// Build a list.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Build a set, dropping known duplicates.
    ///
    /// Unknown elements are never considered duplicates of anything.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        let mut elements: Vec<Value> = Vec::new();
        for item in items {
            if !elements.contains(&item) {
                elements.push(item);
            }
        }
        Self::Set(elements)
    }

    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this is [`Value::Unknown`] at the top level.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Whether the top level is known. Nested elements may still be unknown.
    pub fn is_known(&self) -> bool {
        !self.is_unknown()
    }

    /// Whether no [`Value::Unknown`] appears at any nesting depth.
    pub fn is_wholly_known(&self) -> bool {
        match self {
            Self::Unknown => false,
            Self::List(items) | Self::Set(items) => items.iter().all(Value::is_wholly_known),
            Self::Map(entries) | Self::Object(entries) => {
                entries.values().all(Value::is_wholly_known)
            },
            _ => true,
        }
    }

    /// Dotted paths of every unknown inside this value.
    ///
    /// List and set elements are addressed by index, map and object entries
    /// by key. An unknown at the top level is reported as an empty path.
    pub fn unknown_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_unknown_paths(self, "", &mut paths);
        paths
    }

    /// Look up an attribute of an object or an entry of a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(entries) | Self::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Look up an attribute, treating a missing attribute as null.
    pub fn attribute(&self, name: &str) -> &Value {
        self.get(name).unwrap_or(&NULL)
    }

    /// Return a copy of this object with `name` set to `value`.
    ///
    /// Maps get a new entry. Any other value is replaced by a new object
    /// holding only the given attribute.
    pub fn with_attribute(&self, name: impl Into<String>, value: Value) -> Value {
        match self {
            Self::Object(entries) => {
                let mut entries = entries.clone();
                entries.insert(name.into(), value);
                Self::Object(entries)
            },
            Self::Map(entries) => {
                let mut entries = entries.clone();
                entries.insert(name.into(), value);
                Self::Map(entries)
            },
            _ => Self::object([(name.into(), value)]),
        }
    }

    /// Return a copy of this object or map without `name`.
    pub fn without_attribute(&self, name: &str) -> Value {
        match self {
            Self::Object(entries) => {
                let mut entries = entries.clone();
                entries.remove(name);
                Self::Object(entries)
            },
            Self::Map(entries) => {
                let mut entries = entries.clone();
                entries.remove(name);
                Self::Map(entries)
            },
            other => other.clone(),
        }
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The number, if this is one.
    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Self::Number(n) => Some(n),
            _ => None,
        }
    }

    /// The number as an `i64`, if it is an integer in range.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(Number::as_i64)
    }

    /// The number as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().and_then(Number::as_f64)
    }

    /// The elements of a list or set.
    pub fn as_elements(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) | Self::Set(items) => Some(items),
            _ => None,
        }
    }

    /// The entries of an object or map.
    pub fn as_entries(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(entries) | Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// A short name for the kind of value, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Unknown => "unknown",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
        }
    }
}

fn collect_unknown_paths(value: &Value, path: &str, paths: &mut Vec<String>) {
    match value {
        Value::Unknown => paths.push(path.to_string()),
        Value::List(items) | Value::Set(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_unknown_paths(item, &join_path(path, &i.to_string()), paths);
            }
        },
        Value::Map(entries) | Value::Object(entries) => {
            for (key, item) in entries {
                collect_unknown_paths(item, &join_path(path, key), paths);
            }
        },
        _ => {},
    }
}

/// Join an attribute path segment onto a base path.
pub(crate) fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

/// Numbers compare by value whatever their representation, so `10 == 10.0`.
fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    canonical_f64(a) == canonical_f64(b)
}

// Equal numbers always share this form; distinct large integers may collide.
fn canonical_f64(n: &Number) -> f64 {
    let f = n.as_f64().unwrap_or_default();
    if f == 0.0 {
        0.0
    } else {
        f
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => numbers_equal(a, b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => {
                a.iter().all(|x| b.contains(x)) && b.iter().all(|x| a.contains(x))
            },
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            // Unknown never equals anything, including another unknown.
            _ => false,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null | Self::Unknown => {},
            Self::Bool(b) => b.hash(state),
            Self::Number(n) => canonical_f64(n).to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::List(items) => items.hash(state),
            Self::Set(items) => {
                // Order- and duplicate-insensitive, matching set equality.
                let mut element_hashes: Vec<u64> = items
                    .iter()
                    .map(|item| {
                        let mut hasher = DefaultHasher::new();
                        item.hash(&mut hasher);
                        hasher.finish()
                    })
                    .collect();
                element_hashes.sort_unstable();
                element_hashes.dedup();
                element_hashes.hash(state);
            },
            Self::Map(entries) | Self::Object(entries) => entries.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Unknown => f.write_str("(unknown)"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", s),
            Self::List(items) => write_elements(f, "[", items, "]"),
            Self::Set(items) => write_elements(f, "set[", items, "]"),
            Self::Map(entries) | Self::Object(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                f.write_str("}")
            },
        }
    }
}

fn write_elements(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: &[Value],
    close: &str,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite floats have no number representation and become null.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Self::Null, Self::Number)
    }
}

impl From<serde_json::Value> for Value {
    /// JSON objects become [`Value::Object`] and arrays [`Value::List`].
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from).collect())
            },
            serde_json::Value::Object(entries) => Self::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<Value> for serde_json::Value {
    type Error = ProviderError;

    /// Fails with [`ProviderError::UnknownValue`] naming the first unknown.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        to_json(value, "")
    }
}

fn to_json(value: Value, path: &str) -> Result<serde_json::Value, ProviderError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Unknown => {
            let path = if path.is_empty() { "(root)" } else { path };
            return Err(ProviderError::UnknownValue(path.to_string()));
        },
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Number(n) => serde_json::Value::Number(n),
        Value::String(s) => serde_json::Value::String(s),
        Value::List(items) | Value::Set(items) => serde_json::Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| to_json(item, &join_path(path, &i.to_string())))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(entries) | Value::Object(entries) => serde_json::Value::Object(
            entries
                .into_iter()
                .map(|(key, item)| {
                    let item_path = join_path(path, &key);
                    to_json(item, &item_path).map(|json| (key, json))
                })
                .collect::<Result<_, _>>()?,
        ),
    })
}

impl Serialize for Value {
    /// Serializes as plain JSON. Unknown values cannot be persisted and fail.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Unknown => Err(serde::ser::Error::custom(
                "cannot serialize an unknown value",
            )),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) | Self::Set(items) => serializer.collect_seq(items),
            Self::Map(entries) | Self::Object(entries) => serializer.collect_map(entries),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hash_of(value: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_unknown_is_never_equal() {
        assert_ne!(Value::Unknown, Value::Unknown);
        assert_ne!(Value::Unknown, Value::Null);
        assert_ne!(Value::from("x"), Value::Unknown);

        let partial = Value::list([Value::from(1i64), Value::Unknown]);
        assert_ne!(partial, partial.clone());
    }

    #[test]
    fn test_known_values_compare_structurally() {
        let a = Value::from(json!({"name": "web", "ports": [80, 443]}));
        let b = Value::from(json!({"ports": [80, 443], "name": "web"}));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        // Lists are ordered
        assert_ne!(
            Value::from(json!([1, 2])),
            Value::from(json!([2, 1]))
        );
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let int = Value::from(json!(10));
        let float = Value::from(json!(10.0));
        assert_eq!(int, float);
        assert_eq!(hash_of(&int), hash_of(&float));
        assert_eq!(Value::from(json!(-0.0)), Value::from(json!(0)));
        assert_ne!(Value::from(json!(10)), Value::from(json!(10.5)));
        assert_ne!(Value::from(i64::MAX), Value::from(i64::MAX - 1));

        let a = Value::from(json!({"size": 10}));
        let b = Value::from(json!({"size": 10.0}));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(
            Value::set([Value::from(1i64), Value::from(1.0)]).as_elements().map(<[Value]>::len),
            Some(1)
        );
    }

    #[test]
    fn test_sets_are_unordered_and_distinct() {
        let a = Value::set([Value::from("a"), Value::from("b"), Value::from("a")]);
        let b = Value::set([Value::from("b"), Value::from("a")]);

        assert_eq!(a.as_elements().map(<[Value]>::len), Some(2));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        // Unknown elements are never deduplicated
        let unknowns = Value::set([Value::Unknown, Value::Unknown]);
        assert_eq!(unknowns.as_elements().map(<[Value]>::len), Some(2));
    }

    #[test]
    fn test_map_and_object_are_distinct() {
        let object = Value::object([("a", Value::from(1i64))]);
        let map = Value::map([("a", Value::from(1i64))]);
        assert_ne!(object, map);
    }

    #[test]
    fn test_wholly_known_is_recursive() {
        assert!(Value::Null.is_wholly_known());
        assert!(Value::from(json!({"a": [1, {"b": "c"}]})).is_wholly_known());

        let nested = Value::object([(
            "outer",
            Value::map([("inner", Value::list([Value::Unknown]))]),
        )]);
        assert!(nested.is_known());
        assert!(!nested.is_wholly_known());
        assert_eq!(nested.unknown_paths(), vec!["outer.inner.0".to_string()]);

        assert_eq!(Value::Unknown.unknown_paths(), vec![String::new()]);
    }

    #[test]
    fn test_with_attribute_leaves_original_untouched() {
        let prior = Value::from(json!({"name": "a"}));
        let next = prior.with_attribute("name", Value::from("b"));

        assert_eq!(prior.attribute("name"), &Value::from("a"));
        assert_eq!(next.attribute("name"), &Value::from("b"));

        let trimmed = next.without_attribute("name");
        assert!(trimmed.get("name").is_none());
        assert_eq!(next.attribute("name"), &Value::from("b"));
    }

    #[test]
    fn test_attribute_defaults_to_null() {
        let value = Value::from(json!({"a": 1}));
        assert!(value.attribute("missing").is_null());
        assert!(Value::from("scalar").attribute("a").is_null());
    }

    #[test]
    fn test_json_conversion() {
        let value = Value::from(json!({"size": 10, "tags": ["a"]}));
        assert_eq!(value.attribute("size").as_i64(), Some(10));

        let json: serde_json::Value = value.try_into().unwrap();
        assert_eq!(json, json!({"size": 10, "tags": ["a"]}));
    }

    #[test]
    fn test_json_conversion_rejects_unknown() {
        let value = Value::from(json!({"tags": ["a"]}))
            .with_attribute("nested", Value::object([("id", Value::Unknown)]));

        let err = serde_json::Value::try_from(value).unwrap_err();
        assert!(matches!(err, ProviderError::UnknownValue(ref path) if path == "nested.id"));
    }

    #[test]
    fn test_serialize_rejects_unknown() {
        assert!(serde_json::to_string(&Value::Unknown).is_err());

        let known = Value::set([Value::from(true)]);
        assert_eq!(serde_json::to_string(&known).unwrap(), "[true]");

        let back: Value = serde_json::from_str(r#"{"a":[1,null]}"#).unwrap();
        assert_eq!(back, Value::from(json!({"a": [1, null]})));
    }

    #[test]
    fn test_display() {
        let value = Value::object([
            ("id", Value::Unknown),
            ("name", Value::from("web")),
            ("zones", Value::set([Value::from("a")])),
        ]);
        assert_eq!(
            value.to_string(),
            r#"{"id": (unknown), "name": "web", "zones": set["a"]}"#
        );
    }

    #[test]
    fn test_non_finite_float_is_null() {
        assert!(Value::from(f64::NAN).is_null());
        assert_eq!(Value::from(1.5).as_f64(), Some(1.5));
    }
}
