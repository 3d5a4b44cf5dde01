//! Bounded, cycle-safe projection of values for logging
//!
//! [`Loggable`] is a dynamic value graph whose containers are shared, so it can
//! hold cycles. [`to_log`] walks it with an ancestor list and produces a plain
//! `serde_json::Value` that is always finite.

use parking_lot::RwLock;
use serde_json::{Map, Number, Value};
use std::fmt;
use std::sync::Arc;

/// Strings longer than this are truncated
pub const MAX_LOGGED_STRING_CHARS: usize = 80;

/// Characters kept from a truncated string
pub const TRUNCATED_PREFIX_CHARS: usize = 50;

/// Shared, mutable container node
pub type Shared<T> = Arc<RwLock<T>>;

/// Value graph accepted by the redactor
#[derive(Clone)]
pub enum Loggable {
    /// Absent value
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Callable value; never logged
    Function,
    Array(Shared<Vec<Loggable>>),
    Object(Shared<Vec<(String, Loggable)>>),
}

impl Loggable {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn array(items: Vec<Loggable>) -> Self {
        Self::Array(Arc::new(RwLock::new(items)))
    }

    pub fn object(fields: Vec<(String, Loggable)>) -> Self {
        Self::Object(Arc::new(RwLock::new(fields)))
    }

    /// Set a property on an object node, replacing an existing one.
    ///
    /// No-op for anything but objects.
    pub fn set(&self, key: impl Into<String>, value: Loggable) {
        if let Self::Object(fields) = self {
            let key = key.into();
            let mut fields = fields.write();
            match fields.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => fields.push((key, value)),
            }
        }
    }

    /// Append to an array node. No-op for anything but arrays.
    pub fn push(&self, value: Loggable) {
        if let Self::Array(items) = self {
            items.write().push(value);
        }
    }

    /// Identity of a container node
    fn node_id(&self) -> Option<usize> {
        match self {
            Self::Array(items) => Some(Arc::as_ptr(items) as *const () as usize),
            Self::Object(fields) => Some(Arc::as_ptr(fields) as *const () as usize),
            _ => None,
        }
    }
}

impl fmt::Debug for Loggable {
    // Shallow: the graph may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Number(n) => write!(f, "Number({})", n),
            Self::String(s) => write!(f, "String({:?})", s),
            Self::Function => f.write_str("Function"),
            Self::Array(items) => write!(f, "Array(len={})", items.read().len()),
            Self::Object(fields) => write!(f, "Object(len={})", fields.read().len()),
        }
    }
}

impl From<&Value> for Loggable {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::array(items.iter().map(Self::from).collect()),
            Value::Object(fields) => Self::object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Loggable {
    fn from(value: Value) -> Self {
        Self::from(&value)
    }
}

impl From<&str> for Loggable {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Loggable {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Loggable {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Loggable {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

/// Redact a value graph. `None` means the value is absent from the log.
pub fn to_log(value: &Loggable) -> Option<Value> {
    let mut ancestors = Vec::new();
    redact(value, &mut ancestors)
}

/// Redact a JSON value; absent results become `null`
pub fn redact_json(value: &Value) -> Value {
    to_log(&Loggable::from(value)).unwrap_or(Value::Null)
}

/// Truncate long strings to `<first 50 chars>… [<length>]`
pub fn truncate_for_log(s: &str) -> String {
    let length = s.chars().count();
    if length <= MAX_LOGGED_STRING_CHARS {
        return s.to_string();
    }
    let prefix: String = s.chars().take(TRUNCATED_PREFIX_CHARS).collect();
    format!("{}… [{}]", prefix, length)
}

fn redact(value: &Loggable, ancestors: &mut Vec<usize>) -> Option<Value> {
    match value {
        Loggable::Undefined | Loggable::Function => None,
        Loggable::Null => Some(Value::Null),
        Loggable::Bool(b) => Some(Value::Bool(*b)),
        Loggable::Number(n) => Some(Value::Number(n.clone())),
        Loggable::String(s) => Some(Value::String(truncate_for_log(s))),
        Loggable::Array(items) => {
            let id = value.node_id()?;
            if ancestors.contains(&id) {
                return None;
            }
            ancestors.push(id);
            let redacted = items
                .read()
                .iter()
                .map(|item| redact(item, ancestors).unwrap_or(Value::Null))
                .collect();
            ancestors.pop();
            Some(Value::Array(redacted))
        }
        Loggable::Object(fields) => {
            let id = value.node_id()?;
            if ancestors.contains(&id) {
                return None;
            }
            ancestors.push(id);
            let mut redacted = Map::new();
            for (key, field) in fields.read().iter() {
                if let Some(v) = redact(field, ancestors) {
                    redacted.insert(key.clone(), v);
                }
            }
            ancestors.pop();
            Some(Value::Object(redacted))
        }
    }
}
