//! Integration tests for the ingestion pipeline
//!
//! These run against a real PostgreSQL container, so they exercise the
//! natural-key constraint, the INET column handling, and the reporting
//! views exactly as deployed.

mod common;

use anyhow::{anyhow, Result};
use common::TestPostgres;
use radar_ingest::geolocate::{self, GeoCity, GeoProvider};
use radar_ingest::{AttemptStore, LastbParser};
use std::net::IpAddr;

const SAMPLE_LASTB: &str = include_str!("fixtures/sample_lastb.txt");

/// Valid records in the fixture: 19 lines minus reboot, shutdown, a blank
/// line, and the btmp footer.
const SAMPLE_RECORDS: usize = 15;

/// Distinct valid source IPs in the fixture. The hostname line does not
/// count; it is stored as NULL.
const SAMPLE_DISTINCT_IPS: i64 = 9;

struct StubProvider {
    response: Option<GeoCity>,
}

impl GeoProvider for StubProvider {
    fn city(&self, _ip: IpAddr) -> Result<Option<GeoCity>> {
        match &self.response {
            Some(city) => Ok(Some(city.clone())),
            None => Err(anyhow!("reader unavailable")),
        }
    }
}

fn parse_sample() -> Vec<radar_ingest::LoginAttempt> {
    let parser = LastbParser::new().expect("Failed to build parser");
    parser.parse_text(SAMPLE_LASTB)
}

async fn count(pool: &sqlx::PgPool, sql: &str) -> i64 {
    sqlx::query_scalar(sql)
        .fetch_one(pool)
        .await
        .expect("Count query failed")
}

#[tokio::test]
async fn test_reingestion_is_idempotent() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = AttemptStore::new(pg.pool_clone());

    let records = parse_sample();
    assert_eq!(records.len(), SAMPLE_RECORDS);

    let first = store
        .insert_attempts(&records)
        .await
        .expect("First insert failed");
    assert_eq!(first, SAMPLE_RECORDS as u64);

    // The same log window again: nothing new.
    let second = store
        .insert_attempts(&records)
        .await
        .expect("Second insert failed");
    assert_eq!(second, 0);

    let stored = count(pg.pool(), "SELECT COUNT(*) FROM failed_logins").await;
    assert_eq!(stored, SAMPLE_RECORDS as i64);
}

#[tokio::test]
async fn test_overlapping_window_inserts_only_new_records() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = AttemptStore::new(pg.pool_clone());

    let records = parse_sample();
    let (older, newer) = records.split_at(10);

    let first = store
        .insert_attempts(older)
        .await
        .expect("First insert failed");
    assert_eq!(first, older.len() as u64);

    // Second run sees the full window, overlapping the first ten records.
    let second = store
        .insert_attempts(&records)
        .await
        .expect("Second insert failed");
    assert_eq!(second, newer.len() as u64);
}

#[tokio::test]
async fn test_console_logins_deduplicate_on_null_source() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = AttemptStore::new(pg.pool_clone());
    let parser = LastbParser::new().expect("Failed to build parser");

    let line = "user     tty1                          Fri Feb 14 04:00:01 2026 - Fri Feb 14 04:00:01 2026  (00:00)";
    let record = parser.parse_line(line).expect("Console line should parse");
    assert!(record.source_ip.is_none());

    let first = store
        .insert_attempts(std::slice::from_ref(&record))
        .await
        .expect("First insert failed");
    assert_eq!(first, 1);

    // NULLS NOT DISTINCT: the same console attempt is a duplicate even
    // though both rows have a NULL source_ip.
    let second = store
        .insert_attempts(std::slice::from_ref(&record))
        .await
        .expect("Second insert failed");
    assert_eq!(second, 0);
}

#[tokio::test]
async fn test_hostname_source_stored_as_null() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = AttemptStore::new(pg.pool_clone());

    let records = parse_sample();
    store
        .insert_attempts(&records)
        .await
        .expect("Insert failed");

    let raw_line: String = sqlx::query_scalar(
        "SELECT raw_line FROM failed_logins WHERE username = 'guest' AND source_ip IS NULL",
    )
    .fetch_one(pg.pool())
    .await
    .expect("Hostname record should be stored with NULL source_ip");
    assert!(raw_line.contains("evil.example.com"));
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = AttemptStore::new(pg.pool_clone());

    let inserted = store
        .insert_attempts(&[])
        .await
        .expect("Empty insert failed");
    assert_eq!(inserted, 0);

    let stored = count(pg.pool(), "SELECT COUNT(*) FROM failed_logins").await;
    assert_eq!(stored, 0);
}

#[tokio::test]
async fn test_failed_batch_rolls_back_entirely() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = AttemptStore::new(pg.pool_clone());

    let mut records = parse_sample();
    records.truncate(3);

    // PostgreSQL TEXT rejects NUL bytes, so this record fails at insert
    // time, after the three valid ones have already gone into the
    // transaction.
    let mut poisoned = records[0].clone();
    poisoned.username = "root\0".to_string();
    records.push(poisoned);

    let result = store.insert_attempts(&records).await;
    assert!(result.is_err());

    // The valid records from the same batch must not be visible either.
    let stored = count(pg.pool(), "SELECT COUNT(*) FROM failed_logins").await;
    assert_eq!(stored, 0);
}

#[tokio::test]
async fn test_concurrent_ingestion_of_same_window() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store_a = AttemptStore::new(pg.pool_clone());
    let store_b = AttemptStore::new(pg.pool_clone());

    let records = parse_sample();
    let (a, b) = tokio::join!(
        store_a.insert_attempts(&records),
        store_b.insert_attempts(&records),
    );
    let a = a.expect("Concurrent insert A failed");
    let b = b.expect("Concurrent insert B failed");

    // Each record lands exactly once, whichever run got there first.
    assert_eq!(a + b, SAMPLE_RECORDS as u64);

    let stored = count(pg.pool(), "SELECT COUNT(*) FROM failed_logins").await;
    assert_eq!(stored, SAMPLE_RECORDS as i64);
}

#[tokio::test]
async fn test_refresh_views_populates_daily_rollup() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = AttemptStore::new(pg.pool_clone());

    store
        .insert_attempts(&parse_sample())
        .await
        .expect("Insert failed");
    store.refresh_views().await.expect("Refresh failed");

    let rollup_attempts = count(
        pg.pool(),
        "SELECT COALESCE(SUM(attempts), 0)::BIGINT FROM failed_logins_daily",
    )
    .await;
    assert_eq!(rollup_attempts, SAMPLE_RECORDS as i64);
}

#[tokio::test]
async fn test_enrichment_covers_all_new_ips_once() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = AttemptStore::new(pg.pool_clone());

    store
        .insert_attempts(&parse_sample())
        .await
        .expect("Insert failed");

    // All fixture IPs are non-routable, so the provider is never consulted
    // and a failing one does no harm.
    let provider = StubProvider { response: None };
    let enriched = geolocate::enrich_new_ips(&store, &provider)
        .await
        .expect("Enrichment failed");
    assert_eq!(enriched, SAMPLE_DISTINCT_IPS as u64);

    let placeholders = count(
        pg.pool(),
        "SELECT COUNT(*) FROM ip_geolocations WHERE country_code = 'XX' AND country = 'Private'",
    )
    .await;
    assert_eq!(placeholders, SAMPLE_DISTINCT_IPS);

    // Nothing left to enrich on a second pass.
    let again = geolocate::enrich_new_ips(&store, &provider)
        .await
        .expect("Second enrichment failed");
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_enrichment_records_provider_hit() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = AttemptStore::new(pg.pool_clone());
    let parser = LastbParser::new().expect("Failed to build parser");

    let line = "root     ssh:notty    8.8.8.8          Fri Feb 14 03:22:15 2026 - Fri Feb 14 03:22:15 2026  (00:00)";
    let record = parser.parse_line(line).expect("Line should parse");
    store
        .insert_attempts(&[record])
        .await
        .expect("Insert failed");

    let provider = StubProvider {
        response: Some(GeoCity {
            country_code: Some("US".to_string()),
            country: Some("United States".to_string()),
            city: Some("Mountain View".to_string()),
            latitude: Some(37.42),
            longitude: Some(-122.08),
            asn: Some(15169),
        }),
    };
    let enriched = geolocate::enrich_new_ips(&store, &provider)
        .await
        .expect("Enrichment failed");
    assert_eq!(enriched, 1);

    let country: String = sqlx::query_scalar(
        "SELECT country FROM ip_geolocations WHERE ip = '8.8.8.8'::inet",
    )
    .fetch_one(pg.pool())
    .await
    .expect("Geolocation row should exist");
    assert_eq!(country, "United States");

    // The geo view joins enrichment back onto the attempt.
    let joined = count(
        pg.pool(),
        "SELECT COUNT(*) FROM login_attempts_geo WHERE country_code = 'US'",
    )
    .await;
    assert_eq!(joined, 1);
}
