use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bigdecimal::BigDecimal;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A decoded attribute value.
///
/// Numbers keep full decimal precision so identifiers and currency amounts survive the trip
/// into the warehouse unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(BigDecimal),
    String(String),
    Binary(Vec<u8>),
    Sequence(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
}

impl Value {
    /// Returns `true` for values that contribute nothing to a row: null and the empty string.
    ///
    /// Zero, `false` and empty collections are values in their own right.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Bool(_)
            | Value::Number(_)
            | Value::Binary(_)
            | Value::Sequence(_)
            | Value::Mapping(_) => false,
        }
    }

    /// Returns the name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
        }
    }

    /// Converts the value into JSON.
    ///
    /// Numbers that do not fit a JSON number are emitted as strings and binaries are emitted as
    /// base64 strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                let rendered = n.to_string();
                match serde_json::Number::from_str(&rendered) {
                    Ok(number) => serde_json::Value::Number(number),
                    Err(_) => serde_json::Value::String(rendered),
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Binary(bytes) => serde_json::Value::String(BASE64.encode(bytes)),
            Value::Sequence(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
            Value::Mapping(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Renders scalars plainly and collections as JSON.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(BigDecimal::from(value))
    }
}

impl From<BigDecimal> for Value {
    fn from(value: BigDecimal) -> Self {
        Value::Number(value)
    }
}

/// The decoded new image of a change record: attribute names to values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTree {
    root: Value,
}

impl ValueTree {
    pub fn new(attributes: BTreeMap<String, Value>) -> Self {
        Self {
            root: Value::Mapping(attributes),
        }
    }

    /// Returns the whole tree as a mapping value.
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Returns a top-level attribute.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match &self.root {
            Value::Mapping(attributes) => attributes.get(name),
            _ => None,
        }
    }
}

impl Default for ValueTree {
    fn default() -> Self {
        ValueTree::new(BTreeMap::new())
    }
}

impl FromIterator<(String, Value)> for ValueTree {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        ValueTree::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_null_and_empty_string_are_empty() {
        assert!(Value::Null.is_empty());
        assert!(Value::from("").is_empty());
        assert!(!Value::from("a").is_empty());
        assert!(!Value::from(0).is_empty());
        assert!(!Value::from(false).is_empty());
        assert!(!Value::Sequence(vec![]).is_empty());
        assert!(!Value::Mapping(BTreeMap::new()).is_empty());
    }

    #[test]
    fn converts_to_json_without_losing_integers() {
        let value = Value::Mapping(BTreeMap::from([
            ("id".to_string(), Value::from(9_007_199_254_740_993)),
            ("price".to_string(), Value::Number(BigDecimal::from_str("12.50").unwrap())),
            ("raw".to_string(), Value::Binary(b"hi".to_vec())),
            ("tags".to_string(), Value::Sequence(vec![Value::from("a"), Value::Null])),
        ]));

        assert_eq!(
            value.to_json(),
            serde_json::json!({
                "id": 9_007_199_254_740_993u64,
                "price": 12.5,
                "raw": "aGk=",
                "tags": ["a", null],
            })
        );
    }

    #[test]
    fn tree_exposes_top_level_attributes() {
        let tree: ValueTree = [("name".to_string(), Value::from("Ann"))]
            .into_iter()
            .collect();

        assert_eq!(tree.get("name"), Some(&Value::from("Ann")));
        assert_eq!(tree.get("age"), None);
    }
}
