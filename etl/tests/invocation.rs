#![cfg(feature = "test-utils")]

use etl::batch::{BatchProcessor, RecordOutcome};
use etl::destination::StatementKind;
use etl::error::ErrorKind;
use etl::registry::MappingRegistry;
use etl::test_utils::memory::{MemoryConnector, MemoryWarehouse};
use etl::test_utils::records::{
    insert_record, modify_record, payload, remove_record, user_image, users_registry,
};
use etl::types::{UpsertRow, Value};
use etl::upsert::{UpsertEngine, UpsertOutcome};
use etl_config::shared::{BridgeConfig, UpsertMode};
use etl_telemetry::tracing::init_test_tracing;
use serde_json::json;

fn users_row(id: &str, name: &str, age: i64) -> UpsertRow {
    UpsertRow::from_iter([
        ("id".to_string(), Value::from(id)),
        ("name".to_string(), Value::from(name)),
        ("age".to_string(), Value::from(age)),
    ])
}

#[tokio::test(flavor = "multi_thread")]
async fn insert_then_update_across_invocations() {
    init_test_tracing();

    let connector = MemoryConnector::default();
    let processor = BatchProcessor::new(users_registry(), UpsertEngine::default());

    let first = payload(vec![insert_record("Users", user_image("u1", "Ann", 30))]);
    let output = processor.handle(first.clone(), &connector).await.unwrap();
    assert_eq!(output, first);

    let second = payload(vec![
        remove_record("Users"),
        modify_record("Users", user_image("u1", "Ann", 31)),
    ]);
    let output = processor.handle(second.clone(), &connector).await.unwrap();
    assert_eq!(output, second);

    let warehouse = connector.warehouse();
    assert_eq!(connector.connects(), 2);
    assert_eq!(warehouse.releases(), 2);
    assert_eq!(
        warehouse.statement_kinds(),
        vec![
            StatementKind::Exists,
            StatementKind::Insert,
            StatementKind::Exists,
            StatementKind::Update,
        ]
    );
    assert_eq!(warehouse.rows("users_dw"), vec![users_row("u1", "Ann", 31)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn replaying_a_batch_converges_to_the_same_state() {
    init_test_tracing();

    let connector = MemoryConnector::default();
    let processor = BatchProcessor::new(users_registry(), UpsertEngine::default());
    let batch = payload(vec![
        insert_record("Users", user_image("u1", "Ann", 30)),
        insert_record("Users", user_image("u2", "Bob", 35)),
    ]);

    processor.handle(batch.clone(), &connector).await.unwrap();
    let after_first = connector.warehouse().rows("users_dw");
    processor.handle(batch, &connector).await.unwrap();

    assert_eq!(connector.warehouse().rows("users_dw"), after_first);
    assert_eq!(
        after_first,
        vec![users_row("u1", "Ann", 30), users_row("u2", "Bob", 35)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn retrying_a_failed_batch_completes_it() {
    init_test_tracing();

    let warehouse = MemoryWarehouse::new();
    let connector = MemoryConnector::new(warehouse.clone());
    let processor = BatchProcessor::new(users_registry(), UpsertEngine::default());
    let batch = payload(vec![
        insert_record("Users", user_image("u1", "Ann", 30)),
        insert_record("Users", user_image("u2", "Bob", 35)),
    ]);

    connector.refuse_connections(ErrorKind::DestinationConnectionFailed);
    let err = processor.handle(batch.clone(), &connector).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DestinationConnectionFailed);
    assert!(warehouse.rows("users_dw").is_empty());

    let connector = MemoryConnector::new(warehouse.clone());
    processor.handle(batch, &connector).await.unwrap();
    assert_eq!(warehouse.rows("users_dw").len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn nested_paths_and_multiple_tables() {
    init_test_tracing();

    let registry = MappingRegistry::from_json(
        r#"{
            "Users": {
                "destinationTable": "users_dw",
                "primaryKeyColumn": "id",
                "columns": {"id": "/id", "city": "/address/city", "first_tag": "/tags/0"}
            },
            "Orders": {
                "table": "sales.orders",
                "primaryKey": "order_id",
                "fields": {"order_id": "/orderId", "total": "/total", "paid": "/paid"}
            }
        }"#,
    )
    .unwrap();
    let connector = MemoryConnector::default();
    let processor = BatchProcessor::new(registry, UpsertEngine::default());

    let batch = payload(vec![
        insert_record(
            "Users",
            json!({
                "id": {"S": "u1"},
                "address": {"M": {"city": {"S": "Oslo"}}},
                "tags": {"L": [{"S": "vip"}, {"S": "beta"}]},
            }),
        ),
        insert_record(
            "Orders",
            json!({
                "orderId": {"N": "1001"},
                "total": {"N": "19.99"},
                "paid": {"BOOL": false},
            }),
        ),
    ]);

    let report = processor
        .run(&serde_json::from_value(batch).unwrap(), &connector)
        .await
        .unwrap();

    assert_eq!(
        report.outcomes(),
        &[
            RecordOutcome::Upserted(UpsertOutcome::Inserted),
            RecordOutcome::Upserted(UpsertOutcome::Inserted),
        ]
    );
    let warehouse = connector.warehouse();
    assert_eq!(
        warehouse.rows("users_dw"),
        vec![UpsertRow::from_iter([
            ("id".to_string(), Value::from("u1")),
            ("city".to_string(), Value::from("Oslo")),
            ("first_tag".to_string(), Value::from("vip")),
        ])]
    );
    let orders = warehouse.rows("sales.orders");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].get("order_id"), Some(&Value::from(1001)));
    assert_eq!(orders[0].get("paid"), Some(&Value::from(false)));
    assert_eq!(orders[0].get("total").unwrap().to_string(), "19.99");
}

#[tokio::test(flavor = "multi_thread")]
async fn configuration_drives_the_processor() {
    init_test_tracing();

    let config: BridgeConfig = serde_json::from_value(json!({
        "warehouse": {
            "host": "localhost",
            "name": "dev",
            "username": "etl",
            "password": "secret",
        },
        "upsert": {"mode": "on_conflict"},
        "mappings": r#"{"Users": {"table": "users_dw", "primaryKey": "id", "fields": {"id": "/id", "name": "/name", "age": "/age"}}}"#,
        "batch_timeout_ms": 5000,
    }))
    .unwrap();
    config.validate().unwrap();

    let registry = MappingRegistry::from_table(&config.mapping_table().unwrap()).unwrap();
    assert_eq!(config.upsert.mode, UpsertMode::OnConflict);
    let processor = BatchProcessor::new(registry, UpsertEngine::new(config.upsert.mode))
        .with_deadline(config.batch_timeout());
    let connector = MemoryConnector::default();

    processor
        .handle(
            payload(vec![insert_record("Users", user_image("u1", "Ann", 30))]),
            &connector,
        )
        .await
        .unwrap();

    assert_eq!(
        connector.warehouse().statement_kinds(),
        vec![StatementKind::Merge]
    );
}
