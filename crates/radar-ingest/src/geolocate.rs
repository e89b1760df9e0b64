// IP geolocation enrichment
//
// Finds stored source IPs that have no geolocation entry yet, classifies
// them, and upserts the results. The actual city-database reader (MaxMind
// GeoLite2 or compatible) is supplied by the deployment through the
// `GeoProvider` trait; everything else, including the handling of
// non-routable addresses and lookup failures, lives here.

use anyhow::Result;
use std::net::IpAddr;
use tracing::{info, warn};

use crate::storage::AttemptStore;

/// City-level geolocation data returned by a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoCity {
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub asn: Option<i64>,
}

/// Geolocation lookup backend.
///
/// `Ok(None)` means the address is simply not in the provider's database;
/// an `Err` is a provider failure. Neither aborts an enrichment batch.
pub trait GeoProvider {
    fn city(&self, ip: IpAddr) -> Result<Option<GeoCity>>;
}

/// A geolocation row ready for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRecord {
    pub ip: IpAddr,
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub asn: Option<i64>,
}

impl GeoRecord {
    fn placeholder(ip: IpAddr, country: &str, city: Option<&str>) -> Self {
        Self {
            ip,
            country_code: Some("XX".to_string()),
            country: Some(country.to_string()),
            city: city.map(str::to_string),
            latitude: None,
            longitude: None,
            asn: None,
        }
    }
}

/// True for addresses that are not globally routable: RFC 1918 private
/// ranges, loopback, link-local, unspecified, broadcast, the documentation
/// TEST-NETs, and the remaining IANA-reserved v4 blocks. Reserved ranges
/// are folded in with private ones here; all of them get the same
/// placeholder instead of a database lookup.
pub fn is_non_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 0.0.0.0/8 "this network"
                || octets[0] == 0
                // 100.64.0.0/10 carrier-grade NAT
                || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
                // 192.0.0.0/24 IETF protocol assignments
                || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
                // TEST-NET-1/2/3 (RFC 5737)
                || (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
                || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
                || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
                // 198.18.0.0/15 benchmarking
                || (octets[0] == 198 && (octets[1] & 0xfe) == 18)
                // 240.0.0.0/4 reserved for future use
                || octets[0] >= 240
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (segments[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (segments[0] & 0xffc0) == 0xfe80
                // 2001:db8::/32 documentation
                || (segments[0] == 0x2001 && segments[1] == 0x0db8)
        }
    }
}

/// Build the geolocation record for one IP.
pub fn lookup_ip(provider: &dyn GeoProvider, ip: IpAddr) -> GeoRecord {
    if is_non_routable(ip) {
        return GeoRecord::placeholder(ip, "Private", Some("Private network"));
    }

    match provider.city(ip) {
        Ok(Some(city)) => GeoRecord {
            ip,
            country_code: city.country_code,
            country: city.country,
            city: city.city,
            latitude: city.latitude,
            longitude: city.longitude,
            asn: city.asn,
        },
        Ok(None) => GeoRecord::placeholder(ip, "Unknown", None),
        Err(error) => {
            warn!(ip = %ip, error = %error, "geolocation lookup failed");
            GeoRecord::placeholder(ip, "Lookup failed", None)
        }
    }
}

/// Find un-geolocated IPs in storage, look them up, and store the results.
/// Returns the number of IPs enriched.
pub async fn enrich_new_ips(
    store: &AttemptStore,
    provider: &dyn GeoProvider,
) -> Result<u64> {
    let ips = store.ungeolocated_ips().await?;
    if ips.is_empty() {
        info!("No new IPs to geolocate");
        return Ok(0);
    }

    info!(count = ips.len(), "Geolocating new IPs");

    let records: Vec<GeoRecord> = ips
        .into_iter()
        .map(|ip| lookup_ip(provider, ip))
        .collect();

    store.upsert_geolocations(&records).await
}
