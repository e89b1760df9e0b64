// Storage layer for failed login attempts
//
// All writes go through one transaction per ingestion run. Deduplication is
// delegated to PostgreSQL: the natural key (username, source_ip, timestamp)
// carries a UNIQUE NULLS NOT DISTINCT constraint, and inserts use
// ON CONFLICT DO NOTHING, so concurrent ingestion runs over the same log
// window cannot double-count or fail on each other.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::geolocate::GeoRecord;
use crate::parser::LoginAttempt;

/// Storage handler for the failed-logins store.
pub struct AttemptStore {
    pool: PgPool,
}

impl AttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert parsed login attempts, returning the number of rows that were
    /// genuinely new. Re-ingesting an overlapping log window inserts only
    /// the records not already present.
    ///
    /// The whole batch is one transaction: on any storage failure the
    /// transaction is dropped un-committed and the error surfaces, so a
    /// partially applied batch is never observable.
    pub async fn insert_attempts(&self, records: &[LoginAttempt]) -> Result<u64> {
        if records.is_empty() {
            info!("No records to insert");
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let mut inserted = 0u64;

        for record in records {
            let source_ip = resolve_source_ip(record);

            let result = sqlx::query(
                r#"
                INSERT INTO failed_logins (username, source_ip, timestamp, terminal, protocol, raw_line)
                VALUES ($1, $2::inet, $3, $4, $5, $6)
                ON CONFLICT (username, source_ip, timestamp) DO NOTHING
                "#,
            )
            .bind(&record.username)
            .bind(source_ip.map(|ip| ip.to_string()))
            .bind(record.timestamp)
            .bind(&record.terminal)
            .bind(record.protocol.as_str())
            .bind(&record.raw_line)
            .execute(&mut *tx)
            .await
            .context("Failed to insert login attempt")?;

            inserted += result.rows_affected();
        }

        tx.commit().await.context("Failed to commit transaction")?;

        info!(
            inserted,
            parsed = records.len(),
            "Inserted new failed login records"
        );
        Ok(inserted)
    }

    /// Refresh the reporting materialized views after ingestion.
    pub async fn refresh_views(&self) -> Result<()> {
        sqlx::query("SELECT refresh_materialized_views()")
            .execute(&self.pool)
            .await
            .context("Failed to refresh materialized views")?;

        info!("Materialized views refreshed");
        Ok(())
    }

    /// Distinct stored source IPs that have no geolocation entry yet.
    pub async fn ungeolocated_ips(&self) -> Result<Vec<IpAddr>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT fl.source_ip::TEXT
            FROM failed_logins fl
            LEFT JOIN ip_geolocations geo ON fl.source_ip = geo.ip
            WHERE fl.source_ip IS NOT NULL
              AND geo.ip IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query ungeolocated IPs")?;

        let mut ips = Vec::with_capacity(rows.len());
        for row in rows {
            match row.parse::<IpAddr>() {
                Ok(ip) => ips.push(ip),
                // The column is INET, so this should not happen.
                Err(_) => warn!(value = %row, "unparseable inet value from storage"),
            }
        }
        Ok(ips)
    }

    /// Upsert geolocation records; re-running a lookup updates the existing
    /// row in place.
    pub async fn upsert_geolocations(&self, records: &[GeoRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO ip_geolocations (ip, country_code, country, city, latitude, longitude, asn)
                VALUES ($1::inet, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (ip) DO UPDATE SET
                    country_code = EXCLUDED.country_code,
                    country = EXCLUDED.country,
                    city = EXCLUDED.city,
                    latitude = EXCLUDED.latitude,
                    longitude = EXCLUDED.longitude,
                    asn = EXCLUDED.asn,
                    last_updated = NOW()
                "#,
            )
            .bind(record.ip.to_string())
            .bind(&record.country_code)
            .bind(&record.country)
            .bind(&record.city)
            .bind(record.latitude)
            .bind(record.longitude)
            .bind(record.asn)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert geolocation record")?;
        }

        tx.commit().await.context("Failed to commit transaction")?;

        info!(count = records.len(), "Upserted geolocation records");
        Ok(records.len() as u64)
    }
}

/// Resolve the value stored in the IP column. The parser is permissive about
/// what it carries in `source_ip`; this is the authoritative check, and
/// anything that is not a valid IPv4/IPv6 address (hostnames, malformed
/// candidates) is stored as NULL. The raw line keeps the original text.
fn resolve_source_ip(record: &LoginAttempt) -> Option<IpAddr> {
    let raw = record.source_ip.as_deref()?;
    match raw.parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            debug!(
                source = %raw,
                username = %record.username,
                "non-IP source field, storing NULL"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Protocol;
    use chrono::{TimeZone, Utc};

    fn attempt(source_ip: Option<&str>) -> LoginAttempt {
        LoginAttempt {
            username: "root".to_string(),
            source_ip: source_ip.map(str::to_string),
            timestamp: Utc.with_ymd_and_hms(2026, 2, 14, 3, 22, 15).unwrap(),
            terminal: "ssh:notty".to_string(),
            protocol: Protocol::Ssh,
            raw_line: "root ssh:notty ...".to_string(),
        }
    }

    #[test]
    fn test_resolve_valid_ipv4() {
        let resolved = resolve_source_ip(&attempt(Some("203.0.113.50")));
        assert_eq!(resolved, Some("203.0.113.50".parse().unwrap()));
    }

    #[test]
    fn test_resolve_valid_ipv6() {
        let resolved = resolve_source_ip(&attempt(Some("2001:db8::1")));
        assert_eq!(resolved, Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_resolve_hostname_downgrades_to_none() {
        assert_eq!(resolve_source_ip(&attempt(Some("evil.example.com"))), None);
    }

    #[test]
    fn test_resolve_malformed_ip_downgrades_to_none() {
        // Shape-valid for the parser's permissive IPv6 test, but not an address.
        assert_eq!(resolve_source_ip(&attempt(Some("abcd:::::"))), None);
        assert_eq!(resolve_source_ip(&attempt(Some("999.999.999.999"))), None);
    }

    #[test]
    fn test_resolve_absent_source() {
        assert_eq!(resolve_source_ip(&attempt(None)), None);
    }
}
