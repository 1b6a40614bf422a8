//! Field extraction from decoded images by pointer path.
//!
//! Paths follow JSON pointer syntax: the empty path addresses the whole image, every other
//! path is a sequence of `/`-prefixed segments, with `~1` standing for `/` and `~0` for `~`
//! inside a segment.

use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{UpsertRow, Value, ValueTree};

/// A parsed pointer path into a [`ValueTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parses a pointer path.
    pub fn parse(raw: &str) -> EtlResult<FieldPath> {
        if raw.is_empty() {
            return Ok(FieldPath {
                raw: String::new(),
                segments: Vec::new(),
            });
        }

        let Some(rest) = raw.strip_prefix('/') else {
            bail!(
                ErrorKind::ConfigError,
                "Field path must be empty or start with '/'",
                raw
            );
        };

        let segments = rest
            .split('/')
            .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
            .collect();

        Ok(FieldPath {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Resolves the path against `value`, returning `None` when any segment is missing, out
    /// of range, or traverses a scalar.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| match current {
                Value::Mapping(entries) => entries.get(segment),
                Value::Sequence(items) => parse_index(segment).and_then(|index| items.get(index)),
                Value::Null
                | Value::Bool(_)
                | Value::Number(_)
                | Value::String(_)
                | Value::Binary(_) => None,
            })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parses a sequence index segment: decimal digits without leading zeros.
fn parse_index(segment: &str) -> Option<usize> {
    let valid = !segment.is_empty()
        && segment.bytes().all(|b| b.is_ascii_digit())
        && (segment == "0" || !segment.starts_with('0'));

    if valid { segment.parse().ok() } else { None }
}

/// Builds the row for one record from the declared columns, in declaration order.
///
/// Columns whose path does not resolve, or resolves to null or an empty string, are left out.
pub fn extract<'a, I>(tree: &ValueTree, columns: I) -> UpsertRow
where
    I: IntoIterator<Item = (&'a str, &'a FieldPath)>,
{
    let mut row = UpsertRow::new();
    for (column, path) in columns {
        match path.resolve(tree.as_value()) {
            Some(value) if !value.is_empty() => row.insert(column, value.clone()),
            _ => {}
        }
    }

    row
}
