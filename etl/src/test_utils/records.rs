//! Builders for change records, invocation payloads and mapping registries.

use serde_json::{Value as JsonValue, json};

use crate::registry::MappingRegistry;
use crate::types::InvocationPayload;

/// Source identifier of a stream on `table`.
pub fn stream_arn(table: &str) -> String {
    format!("arn:aws:dynamodb:us-east-1:123456789012:table/{table}/stream/2021-01-01T00:00:00.000")
}

/// A change record in wire form with the given event name, source table and new image.
pub fn change_record(event_name: &str, table: &str, new_image: JsonValue) -> JsonValue {
    json!({
        "eventName": event_name,
        "eventSourceARN": stream_arn(table),
        "dynamodb": {"NewImage": new_image},
    })
}

pub fn insert_record(table: &str, new_image: JsonValue) -> JsonValue {
    change_record("INSERT", table, new_image)
}

pub fn modify_record(table: &str, new_image: JsonValue) -> JsonValue {
    change_record("MODIFY", table, new_image)
}

pub fn remove_record(table: &str) -> JsonValue {
    json!({
        "eventName": "REMOVE",
        "eventSourceARN": stream_arn(table),
        "dynamodb": {"Keys": {"id": {"S": "u1"}}},
    })
}

/// A typed-attribute image of a user with an id, a name and an age.
pub fn user_image(id: &str, name: &str, age: i64) -> JsonValue {
    json!({
        "id": {"S": id},
        "name": {"S": name},
        "age": {"N": age.to_string()},
    })
}

/// Wraps records into an invocation payload in wire form.
pub fn payload(records: Vec<JsonValue>) -> JsonValue {
    json!({ "Records": records })
}

/// Parses a payload built with [`payload`].
pub fn parse_payload(payload: &JsonValue) -> InvocationPayload {
    serde_json::from_value(payload.clone()).expect("payload is well formed")
}

/// A registry mapping `Users` to `users_dw` keyed by `id`, with `name` and `age` columns.
pub fn users_registry() -> MappingRegistry {
    MappingRegistry::from_json(
        r#"{
            "Users": {
                "table": "users_dw",
                "primaryKey": "id",
                "fields": {"id": "/id", "name": "/name", "age": "/age"}
            }
        }"#,
    )
    .expect("users mapping is valid")
}
