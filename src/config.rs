//! Configuration structures for the broker and the geo-visibility consumer.
//!
//! Grounded on `edge/config.rs`'s `EdgeConfig`: plain `serde`-derived structs
//! with per-field doc comments, `#[serde(default = "...")]` for fields that
//! need a non-`Default::default()` value, loaded from TOML at the CLI layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interests a client may subscribe to on the sub channel. Hierarchical:
/// `FIRSTFULL` implies `FULL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interest {
    FirstFull,
    Full,
    Partial,
}

/// Bitmask built from one or more [`Interest`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterestSet(pub u8);

impl InterestSet {
    pub const FIRSTFULL: u8 = 0b001;
    pub const FULL: u8 = 0b010;
    pub const PARTIAL: u8 = 0b100;

    pub fn empty() -> Self {
        InterestSet(0)
    }

    pub fn insert(&mut self, interest: Interest) {
        let bit = match interest {
            Interest::FirstFull => Self::FIRSTFULL,
            Interest::Full => Self::FULL,
            Interest::Partial => Self::PARTIAL,
        };
        self.0 |= bit;
        if bit == Self::FIRSTFULL {
            self.0 |= Self::FULL;
        }
    }

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Producer-side declaration of what a client intends to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntentSet(pub u8);

/// Configuration for the client broker (C3).
///
/// All durations are stored as [`Duration`] internally; the TOML representation
/// uses milliseconds for the interval fields to match the CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// URI of the dealer-style request/reply endpoint.
    pub server_uri: String,
    /// URI of the sub-style publish endpoint, if subscribing.
    pub server_sub_uri: Option<String>,
    /// Stable reconnect identity. Generated per connection when absent.
    pub identity: Option<String>,
    /// Interests this client subscribes to.
    pub interests: InterestSet,
    /// Intents this client declares when publishing.
    pub intents: IntentSet,
    /// Interval between heartbeat sends while idle.
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    /// Missed heartbeat intervals tolerated before the connection is
    /// considered degraded and a reconnect is triggered.
    pub heartbeat_liveness: u8,
    /// Minimum reconnect backoff.
    #[serde(with = "duration_millis")]
    pub reconnect_interval_min: Duration,
    /// Maximum reconnect backoff; the actual interval doubles from the
    /// minimum up to this ceiling.
    #[serde(with = "duration_millis")]
    pub reconnect_interval_max: Duration,
    /// Per-request timeout before a retransmit is attempted.
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// Retransmit attempts per request before it is silently dropped.
    pub request_retries: u8,
    /// Extra time the broker waits for in-flight replies after the master
    /// signals shutdown.
    #[serde(with = "duration_millis")]
    pub shutdown_linger: Duration,
    /// Capacity of the outstanding-request table; also the rate-limit
    /// threshold at which the master reader is paused.
    pub max_outstanding_requests: usize,
    /// Maximum number of server messages drained per reactor wakeup.
    pub greedy_max_msg: usize,
    /// Prefix prepended to every emitted metric name.
    pub metric_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            server_uri: "inproc://bgpview-server".to_string(),
            server_sub_uri: None,
            identity: None,
            interests: InterestSet::empty(),
            intents: IntentSet::default(),
            heartbeat_interval: Duration::from_millis(2_000),
            heartbeat_liveness: 3,
            reconnect_interval_min: Duration::from_millis(1_000),
            reconnect_interval_max: Duration::from_millis(32_000),
            request_timeout: Duration::from_millis(5_000),
            request_retries: 3,
            shutdown_linger: Duration::from_millis(2_000),
            max_outstanding_requests: 64,
            greedy_max_msg: 64,
            metric_prefix: "bgpview".to_string(),
        }
    }
}

/// Configuration for the geo-visibility consumer (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConsumerConfig {
    /// Path to the IP-block-to-location-id file.
    pub blocks_file: String,
    /// Path to the location-id-to-country file.
    pub locations_file: String,
    /// Path to the country metadata file.
    pub countries_file: String,
    /// Minimum prefix mask length considered for visibility accounting.
    pub pfx_vis_mask_len_threshold: u8,
    /// Fraction of active prefixes a peer must observe to be full-feed.
    pub full_feed_threshold: f64,
}

impl Default for GeoConsumerConfig {
    fn default() -> Self {
        GeoConsumerConfig {
            blocks_file: String::new(),
            locations_file: String::new(),
            countries_file: String::new(),
            pfx_vis_mask_len_threshold: 6,
            full_feed_threshold: 0.5,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
