use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::LazyLock;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Extracts the table name from a stream source identifier such as
/// `arn:aws:dynamodb:us-east-1:123456789012:table/Users/stream/2021-01-01T00:00:00.000`.
static SOURCE_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:[^:]+:dynamodb:[^:]*:[^:]*:table/([^/]+)/")
        .expect("source table pattern is valid")
});

/// Inbound invocation payload: a batch of change records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvocationPayload {
    #[serde(rename = "Records", default)]
    records: Option<Vec<ChangeRecord>>,
}

impl InvocationPayload {
    pub fn new(records: Vec<ChangeRecord>) -> Self {
        Self {
            records: Some(records),
        }
    }

    /// Returns the records in delivery order; absent and null lists are empty.
    pub fn records(&self) -> &[ChangeRecord] {
        self.records.as_deref().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

/// Kind of change carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    Insert,
    Modify,
    Remove,
    /// Any kind this bridge does not know about.
    #[serde(other)]
    Other,
}

impl EventName {
    /// Returns `true` for kinds that carry a new image to upsert.
    pub fn is_upsert(&self) -> bool {
        matches!(self, EventName::Insert | EventName::Modify)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventName::Insert => "INSERT",
            EventName::Modify => "MODIFY",
            EventName::Remove => "REMOVE",
            EventName::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// One change notification from the source stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRecord {
    #[serde(rename = "eventName")]
    pub event_name: EventName,
    #[serde(rename = "eventSourceARN", default)]
    pub event_source_arn: String,
    #[serde(default)]
    pub dynamodb: Option<StreamRecord>,
}

impl ChangeRecord {
    /// Derives the source table name from the source identifier.
    ///
    /// Fails with [`ErrorKind::MalformedSourceId`] when the identifier has no
    /// `table/<name>/` segment.
    pub fn source_table(&self) -> EtlResult<&str> {
        match SOURCE_TABLE_RE
            .captures(&self.event_source_arn)
            .and_then(|captures| captures.get(1))
        {
            Some(table) => Ok(table.as_str()),
            None => bail!(
                ErrorKind::MalformedSourceId,
                "Source identifier does not name a table",
                self.event_source_arn
            ),
        }
    }

    /// Returns the typed-attribute encoding of the post-change row, if present.
    pub fn new_image(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.dynamodb
            .as_ref()
            .and_then(|stream_record| stream_record.new_image.as_ref())
    }

    /// Position of the record in its stream shard, used to correlate logs.
    pub fn sequence_number(&self) -> Option<&str> {
        self.dynamodb
            .as_ref()
            .and_then(|stream_record| stream_record.sequence_number.as_deref())
    }
}

/// Stream-specific part of a change record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamRecord {
    /// Post-change row in typed-attribute encoding, decoded lazily per record.
    #[serde(rename = "NewImage", default)]
    pub new_image: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(rename = "SequenceNumber", default)]
    pub sequence_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change_record(arn: &str) -> ChangeRecord {
        serde_json::from_value(json!({
            "eventName": "INSERT",
            "eventSourceARN": arn,
            "dynamodb": {"NewImage": {"id": {"S": "u1"}}}
        }))
        .unwrap()
    }

    #[test]
    fn derives_source_table_from_identifier() {
        let record = change_record("arn:aws:dynamodb:us-east-1:123:table/Users/stream/2021");
        assert_eq!(record.source_table().unwrap(), "Users");

        let record = change_record("arn:aws-us-gov:dynamodb:us-gov-west-1:123:table/Orders/stream/x");
        assert_eq!(record.source_table().unwrap(), "Orders");
    }

    #[test]
    fn rejects_identifier_without_table_segment() {
        for arn in [
            "arn:aws:dynamodb:us-east-1:123:stream/2021",
            "arn:aws:dynamodb:us-east-1:123:table/Users",
            "table/Users/stream",
            "",
        ] {
            let err = change_record(arn).source_table().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedSourceId, "{arn}");
        }
    }

    #[test]
    fn unknown_event_names_are_not_upserts() {
        let payload: InvocationPayload = serde_json::from_value(json!({
            "Records": [
                {"eventName": "REMOVE", "eventSourceARN": "x"},
                {"eventName": "TTL_EXPIRE", "eventSourceARN": "x"},
                {"eventName": "MODIFY", "eventSourceARN": "x"},
            ]
        }))
        .unwrap();

        let names: Vec<EventName> = payload.records().iter().map(|r| r.event_name).collect();
        assert_eq!(
            names,
            vec![EventName::Remove, EventName::Other, EventName::Modify]
        );
        assert!(!names[0].is_upsert());
        assert!(!names[1].is_upsert());
        assert!(names[2].is_upsert());
        assert!(payload.records()[0].new_image().is_none());
    }

    #[test]
    fn exposes_stream_sequence_number() {
        let record: ChangeRecord = serde_json::from_value(json!({
            "eventName": "MODIFY",
            "eventSourceARN": "x",
            "dynamodb": {"SequenceNumber": "111", "NewImage": {}}
        }))
        .unwrap();
        assert_eq!(record.sequence_number(), Some("111"));

        assert_eq!(change_record("x").sequence_number(), None);
    }

    #[test]
    fn absent_or_null_records_are_empty() {
        let payload: InvocationPayload = serde_json::from_value(json!({})).unwrap();
        assert!(payload.is_empty());

        let payload: InvocationPayload =
            serde_json::from_value(json!({"Records": null})).unwrap();
        assert!(payload.is_empty());
    }
}
