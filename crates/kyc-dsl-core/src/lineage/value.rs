//! Tagged values of the rule environment

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute code to value
pub type Environment = BTreeMap<String, Value>;

/// A rule value. There is no null: absent attributes are simply not in the
/// environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Normalize a JSON attribute value. `null` and objects have no
    /// counterpart and are rejected.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, String> {
        match json {
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| format!("number {} is not representable", n)),
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            serde_json::Value::Null => Err("null has no rule value".to_string()),
            serde_json::Value::Object(_) => Err("objects have no rule value".to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json() {
        assert_eq!(Value::from_json(&json!(true)).unwrap(), Value::Bool(true));
        assert_eq!(Value::from_json(&json!(25)).unwrap(), Value::Number(25.0));
        assert_eq!(
            Value::from_json(&json!(["IR", 3])).unwrap(),
            Value::List(vec![Value::from("IR"), Value::Number(3.0)])
        );
        assert!(Value::from_json(&json!(null)).is_err());
        assert!(Value::from_json(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(Value::from(40.0).to_string(), "40");
        assert_eq!(Value::from(12.5).to_string(), "12.5");
        assert_eq!(Value::from("IR").to_string(), "\"IR\"");
        assert_eq!(Value::from(vec!["IR", "KP"]).to_string(), "[\"IR\", \"KP\"]");
    }

    #[test]
    fn test_untagged_json_round_trip() {
        let value = Value::from(vec![Value::from(1.5), Value::from("x"), Value::from(false)]);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, json!([1.5, "x", false]));
        let back: Value = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }
}
