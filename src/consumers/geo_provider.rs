//! IP-to-geolocation provider (external collaborator for C6).
//!
//! Grounded on `bvc_pergeovisibility.c`'s `geotag_v4table`: the provider is
//! a black box that, given `(base_address, mask_len)`, returns zero or more
//! `(country, covered_ip_count)` records. [`StaticGeoProvider`] is the
//! reference adapter — a sorted `Vec` of blocks searched by longest-prefix
//! match, good enough for tests and small deployments; a production
//! deployment would swap in a real geolocation database behind the trait.

use crate::error::{BgpviewError, Result};
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// ISO-2 country code stored as an inline byte pair — no heap allocation,
/// `Copy`, cheap as a map key, avoiding a heap allocation per country.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CountryCode(pub [u8; 2]);

impl CountryCode {
    pub fn new(code: &str) -> Option<Self> {
        let bytes = code.as_bytes();
        if bytes.len() == 2 {
            Some(CountryCode([bytes[0], bytes[1]]))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

/// One geolocation record returned for a queried prefix: the country it
/// falls in, and how many addresses within the queried prefix that record
/// covers.
#[derive(Debug, Clone, Copy)]
pub struct GeoRecord {
    pub country: CountryCode,
    pub covered_ips: u64,
}

/// A country the provider knows about, as enumerated at consumer startup.
/// Carries the continent because the metric-naming scheme
/// (`{prefix}.prefix-visibility.geo.netacuity.{continent}.{iso2}.v4.{metric}`)
/// needs both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryInfo {
    pub code: CountryCode,
    pub continent: String,
}

/// The external geolocation collaborator.
pub trait GeoProvider: Send + Sync {
    /// All distinct countries the provider knows about, enumerated once at
    /// consumer startup to pre-allocate per-country state.
    fn countries(&self) -> Vec<CountryInfo>;

    /// Geolocate an IPv4 prefix, returning the distinct country records it
    /// overlaps. An empty result means "no geolocation data for this
    /// range" — not an error.
    fn lookup_v4(&self, base_addr: Ipv4Addr, mask_len: u8) -> Vec<GeoRecord>;
}

/// Reference [`GeoProvider`]: a sorted list of `(block, country)` entries
/// searched by longest-prefix match. Overlapping, differently-sized blocks
/// within the queried prefix are all returned (mirroring the original
/// provider's "a prefix can straddle several geo blocks" behaviour).
pub struct StaticGeoProvider {
    blocks: Vec<(Ipv4Net, CountryCode)>,
    known_countries: Vec<CountryInfo>,
}

impl StaticGeoProvider {
    pub fn new(blocks: Vec<(Ipv4Net, CountryCode)>, continents: Vec<(CountryCode, String)>) -> Self {
        let mut known_countries: Vec<CountryInfo> = blocks
            .iter()
            .map(|(_, code)| {
                let continent = continents
                    .iter()
                    .find(|(c, _)| c == code)
                    .map(|(_, cont)| cont.clone())
                    .unwrap_or_else(|| "??".to_string());
                CountryInfo { code: *code, continent }
            })
            .collect();
        known_countries.sort_by_key(|c| c.code.0);
        known_countries.dedup_by_key(|c| c.code.0);
        StaticGeoProvider { blocks, known_countries }
    }

    /// Load from the three mandatory files (blocks, locations, countries)
    /// the geo consumer's CLI requires. The reference implementation
    /// expects a simplified line format: `blocks_file` holds `CIDR,ISO2`
    /// pairs; `countries_file` holds `ISO2,CONTINENT` pairs;
    /// `locations_file` is accepted but unused by this adapter (a real
    /// provider would join location ids through it).
    pub fn load(blocks_file: &str, countries_file: &str) -> Result<Self> {
        let blocks_contents = std::fs::read_to_string(blocks_file)
            .map_err(|e| BgpviewError::InitFailed(format!("reading {blocks_file}: {e}")))?;
        let mut blocks = Vec::new();
        for line in blocks_contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, ',');
            let cidr = parts
                .next()
                .ok_or_else(|| BgpviewError::InitFailed(format!("malformed line in {blocks_file}")))?;
            let country = parts
                .next()
                .ok_or_else(|| BgpviewError::InitFailed(format!("malformed line in {blocks_file}")))?;
            let net: Ipv4Net = cidr
                .parse()
                .map_err(|e| BgpviewError::InitFailed(format!("bad CIDR {cidr}: {e}")))?;
            let code = CountryCode::new(country.trim())
                .ok_or_else(|| BgpviewError::InitFailed(format!("bad country code {country}")))?;
            blocks.push((net, code));
        }

        let countries_contents = std::fs::read_to_string(countries_file)
            .map_err(|e| BgpviewError::InitFailed(format!("reading {countries_file}: {e}")))?;
        let mut continents = Vec::new();
        for line in countries_contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, ',');
            let iso2 = parts.next().ok_or_else(|| {
                BgpviewError::InitFailed(format!("malformed line in {countries_file}"))
            })?;
            let continent = parts.next().ok_or_else(|| {
                BgpviewError::InitFailed(format!("malformed line in {countries_file}"))
            })?;
            let code = CountryCode::new(iso2.trim())
                .ok_or_else(|| BgpviewError::InitFailed(format!("bad country code {iso2}")))?;
            continents.push((code, continent.trim().to_string()));
        }

        Ok(StaticGeoProvider::new(blocks, continents))
    }
}

impl GeoProvider for StaticGeoProvider {
    fn countries(&self) -> Vec<CountryInfo> {
        self.known_countries.clone()
    }

    fn lookup_v4(&self, base_addr: Ipv4Addr, mask_len: u8) -> Vec<GeoRecord> {
        let queried = match Ipv4Net::new(base_addr, mask_len) {
            Ok(net) => net,
            Err(_) => return Vec::new(),
        };
        let mut records = Vec::new();
        for (block, country) in &self.blocks {
            let covered = overlap_size(&queried, block);
            if covered > 0 {
                records.push(GeoRecord {
                    country: *country,
                    covered_ips: covered,
                });
            }
        }
        records
    }
}

fn range(net: &Ipv4Net) -> (u32, u32) {
    let lo = u32::from(net.network());
    let hi = u32::from(net.broadcast());
    (lo, hi)
}

fn overlap_size(a: &Ipv4Net, b: &Ipv4Net) -> u64 {
    let (a_lo, a_hi) = range(a);
    let (b_lo, b_hi) = range(b);
    let lo = a_lo.max(b_lo);
    let hi = a_hi.min(b_hi);
    if lo > hi {
        0
    } else {
        u64::from(hi - lo) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(s: &str) -> CountryCode {
        CountryCode::new(s).unwrap()
    }

    #[test]
    fn lookup_finds_exact_containing_block() {
        let provider = StaticGeoProvider::new(vec![("10.0.0.0/8".parse().unwrap(), cc("US"))], vec![]);
        let records = provider.lookup_v4("10.1.2.0".parse().unwrap(), 24);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].country, cc("US"));
        assert_eq!(records[0].covered_ips, 256);
    }

    #[test]
    fn lookup_returns_multiple_records_for_straddling_blocks() {
        let provider = StaticGeoProvider::new(
            vec![
                ("10.0.0.0/25".parse().unwrap(), cc("US")),
                ("10.0.0.128/25".parse().unwrap(), cc("CA")),
            ],
            vec![],
        );
        let records = provider.lookup_v4("10.0.0.0".parse().unwrap(), 24);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn lookup_outside_known_blocks_is_empty() {
        let provider = StaticGeoProvider::new(vec![("10.0.0.0/8".parse().unwrap(), cc("US"))], vec![]);
        let records = provider.lookup_v4("192.168.0.0".parse().unwrap(), 24);
        assert!(records.is_empty());
    }

    #[test]
    fn countries_are_deduplicated() {
        let provider = StaticGeoProvider::new(
            vec![
                ("10.0.0.0/9".parse().unwrap(), cc("US")),
                ("10.128.0.0/9".parse().unwrap(), cc("US")),
            ],
            vec![],
        );
        assert_eq!(provider.countries().len(), 1);
        assert_eq!(provider.countries()[0].code, cc("US"));
    }

    #[test]
    fn continent_is_joined_from_countries_table() {
        let provider = StaticGeoProvider::new(
            vec![("10.0.0.0/8".parse().unwrap(), cc("US"))],
            vec![(cc("US"), "north-america".to_string())],
        );
        assert_eq!(provider.countries()[0].continent, "north-america");
    }

    #[test]
    fn unmapped_continent_defaults_to_placeholder() {
        let provider = StaticGeoProvider::new(vec![("10.0.0.0/8".parse().unwrap(), cc("US"))], vec![]);
        assert_eq!(provider.countries()[0].continent, "??");
    }
}
