//! End-to-end load into a real Postgres
//!
//! Starts a throwaway container, applies `fixtures/schema.sql`, and runs all
//! four datasets through the pipeline. Foreign keys in the schema make any
//! fence violation fail the load.
//!
//! Run with: cargo test -p yelp-ingest --test postgres_e2e_test -- --ignored

mod common;

use common::{init_tracing, test_settings, write_ndjson};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use yelp_ingest::batch::SqlValue;
use yelp_ingest::coordinator::WorkerCoordinator;
use yelp_ingest::datasets::{DatasetFiles, DatasetKind};
use yelp_ingest::db::{ConnectionSource, PgConnectionPool, TableWriter};
use yelp_ingest::pipeline::DatasetPipeline;
use yelp_ingest::schema::{CHECKIN_DAY, CHECKIN_DAY_ID};

async fn start_postgres() -> (ContainerAsync<Postgres>, PgPool) {
    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");
    let host = container.get_host().await.expect("Failed to get container host");
    let port = container
        .get_host_port_ipv4(5432.tcp())
        .await
        .expect("Failed to get container port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .expect("Failed to connect to PostgreSQL");

    sqlx::raw_sql(include_str!("fixtures/schema.sql"))
        .execute(&pool)
        .await
        .expect("Failed to apply schema");

    (container, pool)
}

fn write_dataset(dir: &TempDir) {
    let business = |id: &str, zip: &str, categories: serde_json::Value| {
        json!({
            "business_id": id, "name": format!("Place {id}"), "address": "1 Main St",
            "city": "Tempe", "state": "AZ", "postal_code": zip,
            "latitude": 33.42, "longitude": -111.94,
            "categories": categories, "hours": {"Monday": "9:0-17:0"}
        })
    };
    write_ndjson(
        dir.path(),
        DatasetKind::Business.file_name(),
        &[
            business("b1", "85281", json!(["Food", "Bars"])),
            business("b2", "85282", json!("Food")),
            business("b3", "85283", json!(["Bars"])),
            business("b4", "85281", json!("Food, Bars")),
        ],
    );

    let user = |id: &str, friends: serde_json::Value| {
        json!({
            "user_id": id, "name": format!("User {id}"), "yelping_since": "2014-02-01",
            "review_count": 1, "fans": 0, "average_stars": 4.0,
            "funny": 0, "useful": 0, "cool": 0, "friends": friends
        })
    };
    write_ndjson(
        dir.path(),
        DatasetKind::User.file_name(),
        &[
            user("u1", json!(["u2", "u3", "u4"])),
            user("u2", json!(["u1"])),
            user("u3", json!("None")),
            user("u4", json!(null)),
        ],
    );

    let reviews: Vec<_> = (0..5)
        .map(|i| {
            json!({
                "review_id": format!("r{i}"), "user_id": "u1", "business_id": "b2",
                "stars": 4, "date": format!("2018-01-{:02}T12:00:00", i + 1),
                "text": "Line one\nline two", "useful": 0, "funny": 0, "cool": 0
            })
        })
        .collect();
    write_ndjson(dir.path(), DatasetKind::Review.file_name(), &reviews);

    write_ndjson(
        dir.path(),
        DatasetKind::Checkin.file_name(),
        &[
            json!({"business_id": "b1", "time": {"Friday": {"20:00": 2, "21:00": 1}}}),
            json!({"business_id": "b2", "time": {"Friday": {"20:00": 3}, "Sunday": {"10:00": 5}}}),
            json!({"business_id": "b3", "time": {"Monday": {"8:00": 1}}}),
        ],
    );
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count query failed")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_full_load_into_postgres() {
    init_tracing();
    let (_container, pool) = start_postgres().await;
    let dir = TempDir::new().unwrap();
    write_dataset(&dir);

    let source = Arc::new(PgConnectionPool::from_pool(pool.clone(), 2));
    let pipeline = DatasetPipeline::new(WorkerCoordinator::new(source.clone(), test_settings()));
    let files = DatasetFiles::in_dir(dir.path());

    let summaries = pipeline.run(&files, &[]).await.expect("load failed");
    assert_eq!(summaries.len(), 4);
    assert!(summaries.iter().all(|summary| summary.orphans == 0));

    assert_eq!(count(&pool, "business").await, 4);
    assert_eq!(count(&pool, "categories").await, 2);
    assert_eq!(count(&pool, "business_categories").await, 6);
    assert_eq!(count(&pool, "business_hours").await, 4);
    assert_eq!(count(&pool, "yelp_user").await, 4);
    assert_eq!(count(&pool, "friend").await, 4);
    assert_eq!(count(&pool, "review").await, 5);
    assert_eq!(count(&pool, "checkin_day").await, 4);
    assert_eq!(count(&pool, "checkin_hour").await, 5);

    let text: String = sqlx::query_scalar("SELECT text FROM review WHERE review_id = 'r0'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(text, "Line one line two");

    let rerun = pipeline.run(&files, &[]).await.expect("re-run failed");
    assert!(rerun.iter().all(|summary| summary.total_rows() == 0));
    assert_eq!(count(&pool, "checkin_hour").await, 5);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_small_page_size_splits_statements() {
    let (_container, pool) = start_postgres().await;
    let dir = TempDir::new().unwrap();
    write_dataset(&dir);

    // One row per INSERT statement, all inside one transaction per batch.
    let source = Arc::new(PgConnectionPool::from_pool(pool.clone(), 1));
    let pipeline = DatasetPipeline::new(WorkerCoordinator::new(source, test_settings()));
    let files = DatasetFiles::in_dir(dir.path());

    pipeline
        .run(&files, &[DatasetKind::Business])
        .await
        .expect("load failed");
    assert_eq!(count(&pool, "business_categories").await, 6);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_day_lookup_finds_committed_day() {
    let (_container, pool) = start_postgres().await;
    sqlx::query(
        "INSERT INTO business (business_id, name, address, city, state, fk_zipcode, latitude, longitude)
         VALUES ('b1', 'Cafe', '1 Main', 'Tempe', 'AZ', '85281', 0, 0)",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO checkin_day (fk_business_id, day) VALUES ('b1', 'Friday')")
        .execute(&pool)
        .await
        .unwrap();

    let source = PgConnectionPool::from_pool(pool.clone(), 500);
    let mut conn = source.acquire().await.unwrap();
    let key = [
        ("fk_business_id", SqlValue::from("b1")),
        ("day", SqlValue::from("Friday")),
    ];
    let found = conn.find_id(&CHECKIN_DAY, CHECKIN_DAY_ID, &key).await.unwrap();
    assert_eq!(found, Some(1));

    let missing = [
        ("fk_business_id", SqlValue::from("b1")),
        ("day", SqlValue::from("Monday")),
    ];
    assert_eq!(
        conn.find_id(&CHECKIN_DAY, CHECKIN_DAY_ID, &missing).await.unwrap(),
        None
    );
}
