//! End-to-end scenarios driving a full `Initializer` against
//! `FakeMorayClient`: transient/terminal failures in each phase, forward
//! schema migration, illegal index removal, and data migration under both
//! transient and terminal write failures.

use std::collections::BTreeMap;
use std::sync::Arc;

use buckets_init::client::{BucketSchema, FieldType, SchemaOptions};
use buckets_init::config::{BucketSpec, BucketsConfig};
use buckets_init::error::{MorayError, MorayErrorKind, SchemaError};
use buckets_init::migration::{MigrateCtx, MigrationPlan, MigrationStep, ModelMigrations};
use buckets_init::orchestrator::{DataMigrationsSource, InitializerOptions};
use buckets_init::status::PhaseState;
use buckets_init::testing::{test_logger, Fault, FakeMorayClient, ManualClock};
use buckets_init::{Event, Initializer};

fn widget_schema(version: u32, fields: &[&str]) -> BucketSchema {
    let mut index = BTreeMap::new();
    for f in fields {
        index.insert(f.to_string(), FieldType::String);
    }
    BucketSchema { index, options: SchemaOptions { version }, pre: Vec::new(), post: Vec::new() }
}

fn one_bucket_config(version: u32, fields: &[&str]) -> BucketsConfig {
    let mut specs = BTreeMap::new();
    specs.insert(
        "widget".to_string(),
        BucketSpec { name: "widgets".to_string(), schema: widget_schema(version, fields) },
    );
    BucketsConfig::new(specs)
}

#[tokio::test]
async fn s1_transient_setup_error_retries_then_succeeds() {
    let client = Arc::new(FakeMorayClient::new());
    client.set_get_bucket_fault(Fault::forever(|| MorayError::generic("Mocked transient error"))).await;

    let config = one_bucket_config(1, &["foo"]);
    let initializer = Arc::new(
        Initializer::new(
            test_logger(),
            client.clone(),
            config,
            DataMigrationsSource::None,
            InitializerOptions::default(),
        )
        .await
        .unwrap(),
    );

    let mut events = initializer.subscribe();
    let init = initializer.clone();
    let handle = tokio::spawn(async move { init.start().await });

    // Give the retry loop a few iterations to observe the transient error
    // without ever emitting Event::Error.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let status = initializer.status();
    assert_eq!(status.buckets_setup.state, PhaseState::Started);
    assert!(status.buckets_setup.latest_error.as_deref().unwrap().contains("Mocked transient error"));

    client.clear_faults().await;
    handle.await.unwrap().unwrap();

    let mut saw_done = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::Done) {
            saw_done = true;
        }
        assert!(!matches!(event, Event::Error(_)));
    }
    assert!(saw_done);
}

#[tokio::test]
async fn s2_non_transient_setup_error_aborts_immediately() {
    let client = Arc::new(FakeMorayClient::new());
    client.set_get_bucket_fault(Fault::forever(|| {
        MorayError::named(MorayErrorKind::InvalidBucketConfigError, "bad field type")
    }))
    .await;

    let config = one_bucket_config(1, &["foo"]);
    let initializer = Arc::new(
        Initializer::new(
            test_logger(),
            client.clone(),
            config,
            DataMigrationsSource::None,
            InitializerOptions::default(),
        )
        .await
        .unwrap(),
    );

    let mut events = initializer.subscribe();
    let err = initializer.start().await.unwrap_err();
    assert!(err.to_string().contains("remote rejected schema operation"));

    let status = initializer.status();
    assert_eq!(status.buckets_setup.state, PhaseState::Error);

    let event = events.recv().await.unwrap();
    match event {
        Event::Error(e) => assert!(matches!(&*e, buckets_init::InitializerError::Schema(SchemaError::Remote { .. }))),
        other => panic!("expected Event::Error, got {other:?}"),
    }
}

#[tokio::test]
async fn s3_forward_schema_migration_updates_version() {
    let client = Arc::new(FakeMorayClient::new());
    client.seed_bucket("widgets", widget_schema(1, &["foo"])).await;
    for i in 0..5 {
        client.seed_record("widgets", &format!("k{i}"), serde_json::json!({ "foo": "bar" })).await;
    }

    let config = one_bucket_config(2, &["foo", "bar"]);
    let initializer = Arc::new(
        Initializer::new(
            test_logger(),
            client.clone(),
            config,
            DataMigrationsSource::None,
            InitializerOptions::default(),
        )
        .await
        .unwrap(),
    );

    initializer.start().await.unwrap();

    assert_eq!(client.bucket_version("widgets").await, Some(2));
    let status = initializer.status();
    assert_eq!(status.buckets_setup.state, PhaseState::Done);
    assert_eq!(status.buckets_reindex.state, PhaseState::Done);
}

#[tokio::test]
async fn s4_invalid_index_removal_is_rejected() {
    let client = Arc::new(FakeMorayClient::new());
    client.seed_bucket("widgets", widget_schema(1, &["foo", "bar"])).await;

    let config = one_bucket_config(2, &["foo"]);
    let initializer = Arc::new(
        Initializer::new(
            test_logger(),
            client.clone(),
            config,
            DataMigrationsSource::None,
            InitializerOptions::default(),
        )
        .await
        .unwrap(),
    );

    let err = initializer.start().await.unwrap_err();
    match &*err {
        buckets_init::InitializerError::Schema(SchemaError::InvalidIndexesRemoval { removed, .. }) => {
            assert_eq!(removed, &vec!["bar".to_string()]);
        }
        other => panic!("expected InvalidIndexesRemoval, got {other:?}"),
    }
    // The remote schema must not have been mutated (§4.3 rationale).
    assert_eq!(client.bucket_version("widgets").await, Some(1));
}

fn data_version_config() -> BucketsConfig {
    let mut index = BTreeMap::new();
    index.insert("foo".to_string(), FieldType::String);
    index.insert("data_version".to_string(), FieldType::Number);
    let mut specs = BTreeMap::new();
    specs.insert(
        "widget".to_string(),
        BucketSpec {
            name: "widgets".to_string(),
            schema: BucketSchema { index, options: SchemaOptions { version: 1 }, pre: Vec::new(), post: Vec::new() },
        },
    );
    BucketsConfig::new(specs)
}

fn bump_foo_to_bar_migration() -> MigrationPlan {
    let migrate: buckets_init::migration::MigrateFn = Arc::new(|record, _ctx: &MigrateCtx<'_>| {
        let mut value = record.value.clone();
        value["foo"] = serde_json::json!("bar");
        value["data_version"] = serde_json::json!(1);
        Some(value)
    });
    let mut models = BTreeMap::new();
    models.insert("widget".to_string(), ModelMigrations(vec![MigrationStep { version: 1, migrate }]));
    MigrationPlan(models)
}

#[tokio::test]
async fn s5_data_migration_survives_transient_write_failure() {
    let client = Arc::new(FakeMorayClient::new());
    client.seed_bucket("widgets", data_version_config().get("widget").unwrap().schema.clone()).await;
    for i in 0..5 {
        client.seed_record("widgets", &format!("k{i}"), serde_json::json!({ "foo": "old" })).await;
    }
    client.set_batch_fault(Fault::times(2, || MorayError::generic("Mocked transient error"))).await;

    let clock = Arc::new(ManualClock::new());
    let dyn_clock: Arc<dyn buckets_init::clock::Clock> = clock.clone();
    let mut options = InitializerOptions::default();
    options.clock = Some(dyn_clock);

    let initializer = Arc::new(
        Initializer::new(
            test_logger(),
            client.clone(),
            data_version_config(),
            DataMigrationsSource::Plan(bump_foo_to_bar_migration()),
            options,
        )
        .await
        .unwrap(),
    );

    let init = initializer.clone();
    let handle = tokio::spawn(async move { init.start().await });

    // Advance the manual clock so the backoff runner's sleeps resolve
    // without relying on wall-clock time; interleave a real, tiny sleep so
    // the spawned task actually gets polled between advances.
    for _ in 0..20 {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        clock.advance(std::time::Duration::from_secs(1)).await;
    }

    handle.await.unwrap().unwrap();

    let status = initializer.status();
    assert_eq!(status.data_migrations.state, PhaseState::Done);
    assert_eq!(status.data_migrations.completed.get("widget"), Some(&1));
    assert!(status.data_migrations.latest_errors["widget"].contains("Mocked transient error"));

    for record in client.all_records("widgets").await {
        assert_eq!(record.value["foo"], serde_json::json!("bar"));
        assert_eq!(record.value["data_version"], serde_json::json!(1));
    }
}

#[tokio::test]
async fn s6_data_migration_aborts_on_non_transient_write_failure() {
    let client = Arc::new(FakeMorayClient::new());
    client.seed_bucket("widgets", data_version_config().get("widget").unwrap().schema.clone()).await;
    client.seed_record("widgets", "k0", serde_json::json!({ "foo": "old" })).await;
    client
        .set_batch_fault(Fault::forever(|| MorayError::named(MorayErrorKind::BucketNotFoundError, "gone")))
        .await;

    let initializer = Arc::new(
        Initializer::new(
            test_logger(),
            client.clone(),
            data_version_config(),
            DataMigrationsSource::Plan(bump_foo_to_bar_migration()),
            InitializerOptions::default(),
        )
        .await
        .unwrap(),
    );

    let mut events = initializer.subscribe();
    let err = initializer.start().await.unwrap_err();
    assert!(matches!(&*err, buckets_init::InitializerError::Migration(_)));

    let status = initializer.status();
    assert_eq!(status.data_migrations.state, PhaseState::Error);
    assert!(status.data_migrations.completed.get("widget").is_none());

    let mut saw_error = false;
    let mut saw_done = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::Error(_) => saw_error = true,
            Event::Done => saw_done = true,
            _ => {}
        }
    }
    assert!(saw_error);
    assert!(!saw_done);
}
