//! Decoding of the typed-attribute encoding used by change-record images.
//!
//! Every node is a single-key object whose key names the variant, e.g. `{"S": "Ann"}`,
//! `{"N": "30"}` or `{"M": {"city": {"S": "Oslo"}}}`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bigdecimal::BigDecimal;
use bigdecimal::num_bigint::Sign;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::{Value, ValueTree};

/// One node of a typed-attribute tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    String(String),
    #[serde(rename = "N")]
    Number(String),
    #[serde(rename = "B")]
    Binary(String),
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    #[serde(rename = "NS")]
    NumberSet(Vec<String>),
    #[serde(rename = "BS")]
    BinarySet(Vec<String>),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "L")]
    List(Vec<AttributeValue>),
    #[serde(rename = "M")]
    Map(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Converts this node and its children into a plain [`Value`].
    pub fn into_value(self) -> EtlResult<Value> {
        let value = match self {
            AttributeValue::String(s) => Value::String(s),
            AttributeValue::Number(n) => Value::Number(parse_number(&n)?),
            AttributeValue::Binary(b) => Value::Binary(parse_binary(&b)?),
            AttributeValue::StringSet(set) => {
                Value::Sequence(set.into_iter().map(Value::String).collect())
            }
            AttributeValue::NumberSet(set) => Value::Sequence(
                set.iter()
                    .map(|n| parse_number(n).map(Value::Number))
                    .collect::<EtlResult<_>>()?,
            ),
            AttributeValue::BinarySet(set) => Value::Sequence(
                set.iter()
                    .map(|b| parse_binary(b).map(Value::Binary))
                    .collect::<EtlResult<_>>()?,
            ),
            AttributeValue::Bool(b) => Value::Bool(b),
            AttributeValue::Null(true) => Value::Null,
            AttributeValue::Null(false) => bail!(
                ErrorKind::AttributeDecodeFailed,
                "Null attribute must carry true"
            ),
            AttributeValue::List(items) => Value::Sequence(
                items
                    .into_iter()
                    .map(AttributeValue::into_value)
                    .collect::<EtlResult<_>>()?,
            ),
            AttributeValue::Map(entries) => Value::Mapping(
                entries
                    .into_iter()
                    .map(|(key, value)| Ok((key, value.into_value()?)))
                    .collect::<EtlResult<_>>()?,
            ),
        };

        Ok(value)
    }
}

/// Decodes a record's new image into a [`ValueTree`].
pub fn decode_image(image: &serde_json::Map<String, serde_json::Value>) -> EtlResult<ValueTree> {
    let mut attributes = BTreeMap::new();
    for (name, node) in image {
        let value = decode_attribute(node).map_err(|err| {
            etl_error!(
                ErrorKind::AttributeDecodeFailed,
                "Failed to decode attribute of new image",
                name,
                source: err
            )
        })?;
        attributes.insert(name.clone(), value);
    }

    Ok(ValueTree::new(attributes))
}

/// Decodes a single typed-attribute node.
pub fn decode_attribute(node: &serde_json::Value) -> EtlResult<Value> {
    let attribute = AttributeValue::deserialize(node).map_err(|err| {
        etl_error!(
            ErrorKind::AttributeDecodeFailed,
            "Malformed typed attribute",
            err,
            source: err
        )
    })?;

    attribute.into_value()
}

/// Most significant digits a number attribute may carry.
const MAX_SIGNIFICANT_DIGITS: u64 = 38;
/// Decimal exponent range of a number attribute's leading digit, i.e. `1E-130..1E+126`.
const MIN_EXPONENT: i128 = -130;
const MAX_EXPONENT: i128 = 125;

fn parse_number(raw: &str) -> EtlResult<BigDecimal> {
    let decimal = BigDecimal::from_str(raw.trim()).map_err(|err| {
        etl_error!(
            ErrorKind::AttributeDecodeFailed,
            "Number attribute is not a decimal",
            raw,
            source: err
        )
    })?;

    let normalized = decimal.normalized();
    let (digits, scale) = normalized.as_bigint_and_exponent();
    if digits.sign() == Sign::NoSign {
        return Ok(decimal);
    }

    let significant = normalized.digits();
    if significant > MAX_SIGNIFICANT_DIGITS {
        bail!(
            ErrorKind::AttributeDecodeFailed,
            "Number attribute has too many significant digits",
            raw
        );
    }

    let exponent = i128::from(significant) - 1 - i128::from(scale);
    if !(MIN_EXPONENT..=MAX_EXPONENT).contains(&exponent) {
        bail!(
            ErrorKind::AttributeDecodeFailed,
            "Number attribute magnitude is out of range",
            raw
        );
    }

    Ok(decimal)
}

fn parse_binary(raw: &str) -> EtlResult<Vec<u8>> {
    BASE64.decode(raw).map_err(|err| {
        etl_error!(
            ErrorKind::AttributeDecodeFailed,
            "Binary attribute is not base64",
            raw,
            source: err
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn decodes_scalars_and_collections() {
        let tree = decode_image(&image(json!({
            "id": {"S": "u1"},
            "age": {"N": "30"},
            "balance": {"N": "12345.678"},
            "active": {"BOOL": true},
            "deleted_at": {"NULL": true},
            "avatar": {"B": "aGk="},
            "tags": {"SS": ["a", "b"]},
            "scores": {"NS": ["1", "2.5"]},
            "address": {"M": {"city": {"S": "Oslo"}, "zip": {"N": "0150"}}},
            "history": {"L": [{"S": "x"}, {"N": "1"}, {"L": []}]},
        })))
        .unwrap();

        assert_eq!(tree.get("id"), Some(&Value::from("u1")));
        assert_eq!(tree.get("age"), Some(&Value::from(30)));
        assert_eq!(
            tree.get("balance"),
            Some(&Value::Number(BigDecimal::from_str("12345.678").unwrap()))
        );
        assert_eq!(tree.get("active"), Some(&Value::Bool(true)));
        assert_eq!(tree.get("deleted_at"), Some(&Value::Null));
        assert_eq!(tree.get("avatar"), Some(&Value::Binary(b"hi".to_vec())));
        assert_eq!(
            tree.get("tags"),
            Some(&Value::Sequence(vec![Value::from("a"), Value::from("b")]))
        );
        assert_eq!(
            tree.get("scores"),
            Some(&Value::Sequence(vec![
                Value::from(1),
                Value::Number(BigDecimal::from_str("2.5").unwrap()),
            ]))
        );
        assert_eq!(
            tree.get("address"),
            Some(&Value::Mapping(BTreeMap::from([
                ("city".to_string(), Value::from("Oslo")),
                ("zip".to_string(), Value::from(150)),
            ])))
        );
        assert_eq!(
            tree.get("history"),
            Some(&Value::Sequence(vec![
                Value::from("x"),
                Value::from(1),
                Value::Sequence(vec![]),
            ]))
        );
    }

    #[test]
    fn keeps_numbers_beyond_float_precision() {
        let value = decode_attribute(&json!({"N": "123456789012345678901234567890.000000001"}))
            .unwrap();

        assert_eq!(
            value.to_string(),
            "123456789012345678901234567890.000000001"
        );
    }

    #[test]
    fn rejects_malformed_nodes() {
        for node in [
            json!({"X": "unknown tag"}),
            json!({}),
            json!({"S": "a", "N": "1"}),
            json!({"M": ["not", "a", "map"]}),
            json!({"N": "thirty"}),
            json!({"B": "not base64!"}),
            json!({"NULL": false}),
            json!({"L": [{"S": "ok"}, {"Q": 1}]}),
            json!("bare string"),
        ] {
            let err = decode_attribute(&node).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AttributeDecodeFailed, "{node}");
        }
    }

    #[test]
    fn enforces_number_range() {
        for raw in [
            "1e4611686018427387904",
            "1e126",
            "-1e126",
            "1e-131",
            "123456789012345678901234567890123456789",
        ] {
            let err = decode_attribute(&json!({"N": raw})).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AttributeDecodeFailed, "{raw}");
            assert_eq!(err.detail(), Some(raw));
        }

        for raw in [
            "0",
            "0e999999",
            "1E-130",
            "9.9999999999999999999999999999999999999E+125",
            "-12345678901234567890123456789012345678",
            "100000000000000000000000000000000000000000000",
        ] {
            assert!(decode_attribute(&json!({"N": raw})).is_ok(), "{raw}");
        }
    }

    #[test]
    fn image_errors_name_the_attribute() {
        let err = decode_image(&image(json!({"id": {"S": "u1"}, "age": {"N": "x"}}))).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AttributeDecodeFailed);
        assert_eq!(err.detail(), Some("age"));
    }
}
