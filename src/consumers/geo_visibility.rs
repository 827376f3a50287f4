//! Geo-visibility consumer (C6): per-view geolocation memoization,
//! visibility-threshold bucketing, and metric emission.
//!
//! Grounded on `bvc_pergeovisibility.c`'s `geotag_v4table` / `dump_v4table`
//! / `dump_gen_metrics` / `update_visibility_counters`: the per-prefix memo
//! (there, a `khash_t(country_k_set)*` hung off the view's user pointer;
//! here, a `Vec<usize>` of country-table indices behind [`View::user_data`]),
//! the five fixed threshold buckets, and the running-maximum
//! `max_records_perpfx` that is never reset across views are all carried
//! over field-for-field.

use crate::config::GeoConsumerConfig;
use crate::consumers::geo_provider::{CountryCode, GeoProvider};
use crate::error::{BgpviewError, Result};
use crate::pipeline::{ChainState, Consumer, Prefix, PrefixFamily, View};
use crate::timeseries::{KeyId, KeyPackage, TimeseriesBackend};
use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::{HashMap, HashSet};
use tracing::warn;

pub const NAME: &str = "per-geo-visibility";

const VIS_1_FF_ASN: usize = 0;
const VIS_25_PERCENT: usize = 1;
const VIS_50_PERCENT: usize = 2;
const VIS_75_PERCENT: usize = 3;
const VIS_100_PERCENT: usize = 4;
const VIS_THRESHOLDS_CNT: usize = 5;

fn threshold_name(i: usize) -> &'static str {
    match i {
        VIS_1_FF_ASN => "min_1_ff_peer_asn",
        VIS_25_PERCENT => "min_25%_ff_peer_asns",
        VIS_50_PERCENT => "min_50%_ff_peer_asns",
        VIS_75_PERCENT => "min_75%_ff_peer_asns",
        VIS_100_PERCENT => "min_100%_ff_peer_asns",
        _ => unreachable!("threshold index out of range"),
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct VisibilityCounters {
    visible_pfxs: u32,
    visible_ips: u64,
    ff_peer_asns_sum: u32,
}

/// Per country, the per-view-mutable data plus the stable key ids its
/// metrics are published under.
struct CountryEntry {
    code: CountryCode,
    v4pfxs: HashSet<Prefix>,
    asns: HashSet<u32>,
    buckets: [VisibilityCounters; VIS_THRESHOLDS_CNT],
    asns_idx: KeyId,
    visible_pfxs_idx: [KeyId; VIS_THRESHOLDS_CNT],
    visible_ips_idx: [KeyId; VIS_THRESHOLDS_CNT],
    ff_peer_asns_sum_idx: [KeyId; VIS_THRESHOLDS_CNT],
}

struct GenMetricIds {
    cache_misses_cnt: KeyId,
    cache_hits_cnt: KeyId,
    arrival_delay: KeyId,
    processed_delay: KeyId,
    processing_time: KeyId,
    max_numcountries_perpfx: KeyId,
    avg_numcountries_perpfx: KeyId,
    num_visible_pfx: KeyId,
    max_records_perpfx: KeyId,
}

/// The per-view geolocation memoization consumer (C6).
pub struct GeoVisibilityConsumer {
    provider: Box<dyn GeoProvider>,
    backend: Box<dyn TimeseriesBackend>,
    countries: Vec<CountryEntry>,
    code_to_idx: HashMap<CountryCode, usize>,
    kp_gen: KeyPackage,
    kp_v4: KeyPackage,
    gen_metrics: GenMetricIds,

    // Reset every view.
    cache_misses_cnt: u64,
    cache_hits_cnt: u64,
    max_numcountries_perpfx: u32,
    avg_numcountries_perpfx_sum: f64,
    num_visible_pfx: u32,
    // Never reset across views; see DESIGN.md's open-question note.
    max_records_perpfx: u32,
}

impl GeoVisibilityConsumer {
    /// Startup: enumerate the provider's countries, pre-allocate a
    /// [`CountryEntry`] and five threshold-bucket metrics per country, and
    /// the general (meta) metrics.
    pub fn new(
        metric_prefix: &str,
        provider: Box<dyn GeoProvider>,
        mut backend: Box<dyn TimeseriesBackend>,
    ) -> Result<Self> {
        let mut countries = Vec::new();
        let mut code_to_idx = HashMap::new();
        let mut kp_v4 = KeyPackage::new();

        for info in provider.countries() {
            let asns_idx = kp_v4.register_with(&mut *backend, &format!(
                "{metric_prefix}.prefix-visibility.geo.netacuity.{}.{}.v4.origin_asns_cnt",
                info.continent,
                info.code.as_str()
            ));

            let mut visible_pfxs_idx = [KeyId(0); VIS_THRESHOLDS_CNT];
            let mut visible_ips_idx = [KeyId(0); VIS_THRESHOLDS_CNT];
            let mut ff_peer_asns_sum_idx = [KeyId(0); VIS_THRESHOLDS_CNT];
            for j in 0..VIS_THRESHOLDS_CNT {
                let bucket = threshold_name(j);
                visible_pfxs_idx[j] = kp_v4.register_with(&mut *backend, &format!(
                    "{metric_prefix}.prefix-visibility.geo.netacuity.{}.{}.v4.visibility_threshold.{bucket}.visible_prefixes_cnt",
                    info.continent, info.code.as_str()
                ));
                visible_ips_idx[j] = kp_v4.register_with(&mut *backend, &format!(
                    "{metric_prefix}.prefix-visibility.geo.netacuity.{}.{}.v4.visibility_threshold.{bucket}.visible_ips_cnt",
                    info.continent, info.code.as_str()
                ));
                ff_peer_asns_sum_idx[j] = kp_v4.register_with(&mut *backend, &format!(
                    "{metric_prefix}.prefix-visibility.geo.netacuity.{}.{}.v4.visibility_threshold.{bucket}.ff_peer_asns_sum",
                    info.continent, info.code.as_str()
                ));
            }

            code_to_idx.insert(info.code, countries.len());
            countries.push(CountryEntry {
                code: info.code,
                v4pfxs: HashSet::new(),
                asns: HashSet::new(),
                buckets: [VisibilityCounters::default(); VIS_THRESHOLDS_CNT],
                asns_idx,
                visible_pfxs_idx,
                visible_ips_idx,
                ff_peer_asns_sum_idx,
            });
        }

        let mut kp_gen = KeyPackage::new();
        let meta = |metric: &str| format!("{metric_prefix}.meta.bgpview.consumer.{NAME}.{metric}");
        let gen_metrics = GenMetricIds {
            cache_misses_cnt: kp_gen.register_with(&mut *backend, &meta("cache_miss_cnt")),
            cache_hits_cnt: kp_gen.register_with(&mut *backend, &meta("cache_hit_cnt")),
            arrival_delay: kp_gen.register_with(&mut *backend, &meta("arrival_delay")),
            processed_delay: kp_gen.register_with(&mut *backend, &meta("processed_delay")),
            processing_time: kp_gen.register_with(&mut *backend, &meta("processing_time")),
            max_numcountries_perpfx: kp_gen.register_with(&mut *backend, &meta("max_numcountries_perpfx")),
            avg_numcountries_perpfx: kp_gen.register_with(&mut *backend, &meta("avg_numcountries_perpfx")),
            num_visible_pfx: kp_gen.register_with(&mut *backend, &meta("visible_pfxs_cnt")),
            max_records_perpfx: kp_gen.register_with(&mut *backend, &meta("max_records_perpfx")),
        };

        Ok(GeoVisibilityConsumer {
            provider,
            backend,
            countries,
            code_to_idx,
            kp_gen,
            kp_v4,
            gen_metrics,
            cache_misses_cnt: 0,
            cache_hits_cnt: 0,
            max_numcountries_perpfx: 0,
            avg_numcountries_perpfx_sum: 0.0,
            num_visible_pfx: 0,
            max_records_perpfx: 0,
        })
    }

    /// Build from a [`GeoConsumerConfig`] by loading a [`crate::consumers::StaticGeoProvider`]
    /// from its mandatory files.
    pub fn from_config(
        config: &GeoConsumerConfig,
        backend: Box<dyn TimeseriesBackend>,
        metric_prefix: &str,
    ) -> Result<Self> {
        let provider = crate::consumers::StaticGeoProvider::load(&config.blocks_file, &config.countries_file)?;
        GeoVisibilityConsumer::new(metric_prefix, Box::new(provider), backend)
    }

    /// Mirrors `geotag_v4table`: geolocate (memoized) every eligible IPv4
    /// prefix and fold it into the per-country buckets.
    fn geotag_v4table(
        &mut self,
        view: &mut dyn View,
        chain_state: &ChainState,
        threshold: u8,
    ) -> Result<()> {
        let ff_ids = chain_state.full_feed_peer_ids(PrefixFamily::V4).clone();
        let ff_total = chain_state.full_feed_asn_count(PrefixFamily::V4);

        if !view.has_destructor() {
            // Rust reclaims the boxed memo automatically when `clear()`
            // drops it; the destructor only exists to satisfy the
            // per-prefix user-data channel's contract. Calling `clear()`
            // itself is the pipeline caller's job at view-end, not this
            // consumer's — it owns no more than one view at a time and has
            // no hook for "this was the last consumer to touch it".
            view.set_destructor(Box::new(|_| {}));
        }

        let entries: Vec<_> = view.family_prefixes(PrefixFamily::V4).to_vec();
        let mut max_numcountries_perpfx = self.max_numcountries_perpfx;

        for (prefix, observations) in entries {
            if prefix.prefix_len() < threshold {
                continue;
            }

            let mut ff_asns = HashSet::new();
            let mut ff_origin_asns = HashSet::new();
            for obs in &observations {
                if !ff_ids.contains(&obs.peer_id) {
                    continue;
                }
                if let Some(asn) = view.peer_asn(obs.peer_id) {
                    ff_asns.insert(asn);
                }
                ff_origin_asns.insert(obs.origin.attributed_asn());
            }
            let asns_count = ff_asns.len() as u32;
            self.num_visible_pfx += 1;

            let country_indices: Vec<usize> = match view.user_data(&prefix) {
                Some(memo) => {
                    self.cache_hits_cnt += 1;
                    memo.downcast_ref::<Vec<usize>>()
                        .expect("per-prefix memo always holds Vec<usize>")
                        .clone()
                }
                None => {
                    self.cache_misses_cnt += 1;
                    let base_addr = match prefix {
                        IpNet::V4(net) => net.network(),
                        IpNet::V6(_) => unreachable!("family_prefixes(V4) only yields v4 prefixes"),
                    };
                    let records = self.provider.lookup_v4(base_addr, prefix.prefix_len());
                    if records.len() as u32 > self.max_records_perpfx {
                        self.max_records_perpfx = records.len() as u32;
                    }
                    let mut seen = HashSet::new();
                    for rec in &records {
                        match self.code_to_idx.get(&rec.country) {
                            Some(&idx) => {
                                seen.insert(idx);
                            }
                            None => {
                                warn!(country = rec.country.as_str(), "unknown country from geolocation lookup");
                            }
                        }
                    }
                    let memo: Vec<usize> = seen.into_iter().collect();
                    view.set_user_data(prefix, Box::new(memo.clone()));
                    memo
                }
            };

            let net_size = 32 - prefix.prefix_len();
            for &idx in &country_indices {
                let entry = &mut self.countries[idx];
                entry.v4pfxs.insert(prefix);
                entry.asns.extend(ff_origin_asns.iter().copied());
                update_visibility_counters(&mut entry.buckets, net_size, asns_count, ff_total);
                self.avg_numcountries_perpfx_sum += 1.0;
            }
            if country_indices.len() as u32 > max_numcountries_perpfx {
                max_numcountries_perpfx = country_indices.len() as u32;
            }
        }

        self.max_numcountries_perpfx = max_numcountries_perpfx;
        Ok(())
    }

    /// Mirrors `dump_v4table`: publish and reset every country's per-view
    /// counters, then flush the v4 key package.
    fn dump_v4table(&mut self) {
        for entry in &mut self.countries {
            entry.v4pfxs.clear();
            self.kp_v4.set(entry.asns_idx, entry.asns.len() as u32);
            entry.asns.clear();
            for j in 0..VIS_THRESHOLDS_CNT {
                self.kp_v4.set(entry.visible_pfxs_idx[j], entry.buckets[j].visible_pfxs);
                self.kp_v4.set(entry.visible_ips_idx[j], entry.buckets[j].visible_ips);
                self.kp_v4.set(entry.ff_peer_asns_sum_idx[j], entry.buckets[j].ff_peer_asns_sum);
                entry.buckets[j] = VisibilityCounters::default();
            }
        }
    }

    /// Mirrors `dump_gen_metrics`: publish general metrics, then reset
    /// every counter except `max_records_perpfx`.
    fn dump_gen_metrics(&mut self, arrival_delay: i64, processed_delay: i64, processing_time: i64) {
        let avg = if self.num_visible_pfx > 0 {
            self.avg_numcountries_perpfx_sum / self.num_visible_pfx as f64
        } else {
            0.0
        };

        self.kp_gen.set(self.gen_metrics.cache_misses_cnt, self.cache_misses_cnt);
        self.kp_gen.set(self.gen_metrics.cache_hits_cnt, self.cache_hits_cnt);
        self.kp_gen.set(self.gen_metrics.arrival_delay, arrival_delay);
        self.kp_gen.set(self.gen_metrics.processed_delay, processed_delay);
        self.kp_gen.set(self.gen_metrics.processing_time, processing_time);
        self.kp_gen.set(self.gen_metrics.max_numcountries_perpfx, self.max_numcountries_perpfx);
        self.kp_gen.set(self.gen_metrics.avg_numcountries_perpfx, avg);
        self.kp_gen.set(self.gen_metrics.num_visible_pfx, self.num_visible_pfx);
        self.kp_gen.set(self.gen_metrics.max_records_perpfx, self.max_records_perpfx);

        self.cache_misses_cnt = 0;
        self.cache_hits_cnt = 0;
        self.max_numcountries_perpfx = 0;
        self.avg_numcountries_perpfx_sum = 0.0;
        self.num_visible_pfx = 0;
        // max_records_perpfx is intentionally never reset.
    }

    #[cfg(test)]
    pub(crate) fn cache_counters(&self) -> (u64, u64) {
        (self.cache_misses_cnt, self.cache_hits_cnt)
    }

    #[cfg(test)]
    pub(crate) fn country_bucket(&self, code: CountryCode, bucket: usize) -> (u32, u64, u32) {
        let idx = self.code_to_idx[&code];
        let b = &self.countries[idx].buckets[bucket];
        (b.visible_pfxs, b.visible_ips, b.ff_peer_asns_sum)
    }

    #[cfg(test)]
    pub(crate) fn max_records_perpfx(&self) -> u32 {
        self.max_records_perpfx
    }

    #[cfg(test)]
    pub(crate) fn num_visible_pfx(&self) -> u32 {
        self.num_visible_pfx
    }
}

/// Mirrors `update_visibility_counters`: folds one prefix-country event
/// into every threshold bucket its `asns_count / ff_total` ratio qualifies
/// for. A no-op when `ff_total == 0` or `asns_count == 0`.
fn update_visibility_counters(
    buckets: &mut [VisibilityCounters; VIS_THRESHOLDS_CNT],
    net_size: u8,
    asns_count: u32,
    ff_total: u32,
) {
    if ff_total == 0 || asns_count == 0 {
        return;
    }
    let ips = 1u64 << net_size;

    buckets[VIS_1_FF_ASN].visible_pfxs += 1;
    buckets[VIS_1_FF_ASN].visible_ips += ips;
    buckets[VIS_1_FF_ASN].ff_peer_asns_sum += asns_count;

    let ratio = asns_count as f64 / ff_total as f64;
    if ratio == 1.0 {
        buckets[VIS_100_PERCENT].visible_pfxs += 1;
        buckets[VIS_100_PERCENT].visible_ips += ips;
        buckets[VIS_100_PERCENT].ff_peer_asns_sum += asns_count;
    }
    if ratio >= 0.75 {
        buckets[VIS_75_PERCENT].visible_pfxs += 1;
        buckets[VIS_75_PERCENT].visible_ips += ips;
        buckets[VIS_75_PERCENT].ff_peer_asns_sum += asns_count;
    }
    if ratio >= 0.5 {
        buckets[VIS_50_PERCENT].visible_pfxs += 1;
        buckets[VIS_50_PERCENT].visible_ips += ips;
        buckets[VIS_50_PERCENT].ff_peer_asns_sum += asns_count;
    }
    if ratio >= 0.25 {
        buckets[VIS_25_PERCENT].visible_pfxs += 1;
        buckets[VIS_25_PERCENT].visible_ips += ips;
        buckets[VIS_25_PERCENT].ff_peer_asns_sum += asns_count;
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Consumer for GeoVisibilityConsumer {
    fn name(&self) -> &str {
        NAME
    }

    async fn process_view(&mut self, view: &mut dyn View, chain_state: &mut ChainState) -> Result<()> {
        if !chain_state.visibility_computed {
            return Err(BgpviewError::Precondition(
                "per-geo-visibility requires the visibility consumer to run first".into(),
            ));
        }

        let arrival_delay = now_secs() - view.timestamp();

        if chain_state.usable_table_flag[PrefixFamily::V4 as usize] {
            let threshold = chain_state.pfx_vis_mask_len_threshold;
            self.geotag_v4table(view, chain_state, threshold)?;
            self.dump_v4table();
            self.backend.flush(view.timestamp(), &self.kp_v4).await;
        }

        let processed_delay = now_secs() - view.timestamp();
        let processing_time = processed_delay - arrival_delay;
        self.dump_gen_metrics(arrival_delay, processed_delay, processing_time);
        self.backend.flush(view.timestamp(), &self.kp_gen).await;

        Ok(())
    }
}

/// Small extension used only during startup to register a metric and
/// immediately record its name for the reference [`crate::timeseries::LoggingBackend`].
/// Kept as a free-standing trait rather than widening [`TimeseriesBackend`]
/// itself, since only the registration call site needs it.
trait RegisterInto {
    fn register_with(&mut self, backend: &mut dyn TimeseriesBackend, metric_path: &str) -> KeyId;
}

impl RegisterInto for KeyPackage {
    fn register_with(&mut self, backend: &mut dyn TimeseriesBackend, metric_path: &str) -> KeyId {
        backend.register(metric_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::geo_provider::StaticGeoProvider;
    use crate::pipeline::{ChainState, InMemoryView, OriginAsPathSegment, PrefixObservation};
    use crate::timeseries::LoggingBackend;

    fn obs(peer_id: u32, asn: u32) -> PrefixObservation {
        PrefixObservation {
            peer_id,
            peer_signature: 0,
            origin: OriginAsPathSegment::Asn(asn),
        }
    }

    fn cc(s: &str) -> CountryCode {
        CountryCode::new(s).unwrap()
    }

    fn make_consumer(blocks: Vec<(ipnet::Ipv4Net, CountryCode)>) -> GeoVisibilityConsumer {
        let provider = StaticGeoProvider::new(blocks, vec![(cc("US"), "north-america".to_string())]);
        GeoVisibilityConsumer::new("test", Box::new(provider), Box::new(LoggingBackend::new())).unwrap()
    }

    fn full_feed_chain_state(ff_total: u32, peers: &[u32]) -> ChainState {
        let mut chain_state = ChainState::new("test", 24);
        chain_state.visibility_computed = true;
        chain_state.usable_table_flag[PrefixFamily::V4 as usize] = true;
        chain_state.full_feed_peer_asns_cnt[PrefixFamily::V4 as usize] = ff_total;
        chain_state.full_feed_peer_ids[PrefixFamily::V4 as usize] = peers.iter().copied().collect();
        chain_state
    }

    #[tokio::test]
    async fn cache_counters_reset_after_view_completes() {
        let mut consumer = make_consumer(vec![("10.0.0.0/8".parse().unwrap(), cc("US"))]);
        let mut view = InMemoryView::new(1_700_000_000);
        let prefix: Prefix = "10.1.2.0/24".parse().unwrap();
        view.add_prefix(prefix, vec![obs(1, 65001)]);
        view.set_peer_asn(1, 65001);
        let mut chain_state = full_feed_chain_state(1, &[1]);

        consumer.process_view(&mut view, &mut chain_state).await.unwrap();
        let (misses, _hits) = consumer.cache_counters();
        assert_eq!(misses, 0); // reset by dump_gen_metrics at end of view
    }

    #[tokio::test]
    async fn prefix_below_mask_threshold_is_skipped_entirely() {
        let mut consumer = make_consumer(vec![("10.0.0.0/8".parse().unwrap(), cc("US"))]);
        let mut view = InMemoryView::new(1_700_000_000);
        let prefix: Prefix = "10.0.0.0/5".parse().unwrap();
        view.add_prefix(prefix, vec![obs(1, 65001)]);
        view.set_peer_asn(1, 65001);
        let mut chain_state = full_feed_chain_state(1, &[1]);
        chain_state.pfx_vis_mask_len_threshold = 6;

        consumer.process_view(&mut view, &mut chain_state).await.unwrap();
        assert_eq!(consumer.num_visible_pfx(), 0);
    }

    #[tokio::test]
    async fn zero_full_feed_peers_yields_no_bucket_updates_but_counts_prefix() {
        let mut consumer = make_consumer(vec![("10.0.0.0/8".parse().unwrap(), cc("US"))]);
        let mut view = InMemoryView::new(1_700_000_000);
        let prefix: Prefix = "10.1.2.0/24".parse().unwrap();
        // peer 1 is NOT in the full-feed set.
        view.add_prefix(prefix, vec![obs(1, 65001)]);
        let mut chain_state = full_feed_chain_state(1, &[]);

        consumer.process_view(&mut view, &mut chain_state).await.unwrap();
        let (pfxs, ips, sum) = consumer.country_bucket(cc("US"), VIS_1_FF_ASN);
        assert_eq!((pfxs, ips, sum), (0, 0, 0));
    }

    #[tokio::test]
    async fn threshold_correctness_matches_worked_example() {
        // ff_total = 4, asns_count = 3, mask_len = 24: ff1/25/50/75 update,
        // 100% does not; visible_ips added is 256; ff_peer_asns_sum added
        // to each updated bucket is 3.
        let mut consumer = make_consumer(vec![("10.0.0.0/8".parse().unwrap(), cc("US"))]);
        let mut view = InMemoryView::new(1_700_000_000);
        let prefix: Prefix = "10.1.2.0/24".parse().unwrap();
        view.add_prefix(prefix, vec![obs(1, 1001), obs(2, 1002), obs(3, 1003)]);
        view.set_peer_asn(1, 1001);
        view.set_peer_asn(2, 1002);
        view.set_peer_asn(3, 1003);
        let mut chain_state = full_feed_chain_state(4, &[1, 2, 3]);

        consumer.process_view(&mut view, &mut chain_state).await.unwrap();

        assert_eq!(consumer.country_bucket(cc("US"), VIS_1_FF_ASN), (1, 256, 3));
        assert_eq!(consumer.country_bucket(cc("US"), VIS_25_PERCENT), (1, 256, 3));
        assert_eq!(consumer.country_bucket(cc("US"), VIS_50_PERCENT), (1, 256, 3));
        assert_eq!(consumer.country_bucket(cc("US"), VIS_75_PERCENT), (1, 256, 3));
        assert_eq!(consumer.country_bucket(cc("US"), VIS_100_PERCENT), (0, 0, 0));
    }

    #[tokio::test]
    async fn missing_visibility_precondition_is_an_error() {
        let mut consumer = make_consumer(vec![("10.0.0.0/8".parse().unwrap(), cc("US"))]);
        let mut view = InMemoryView::new(1_700_000_000);
        let mut chain_state = ChainState::new("test", 6);
        // visibility_computed left false.
        let err = consumer.process_view(&mut view, &mut chain_state).await.unwrap_err();
        assert!(matches!(err, BgpviewError::Precondition(_)));
    }

    #[tokio::test]
    async fn max_records_perpfx_is_never_reset_across_views() {
        let mut consumer = make_consumer(vec![
            ("10.0.0.0/25".parse().unwrap(), cc("US")),
            ("10.0.0.128/25".parse().unwrap(), cc("US")),
        ]);
        let mut view = InMemoryView::new(1_700_000_000);
        let prefix: Prefix = "10.0.0.0/24".parse().unwrap();
        view.add_prefix(prefix, vec![obs(1, 1001)]);
        view.set_peer_asn(1, 1001);
        let mut chain_state = full_feed_chain_state(1, &[1]);
        consumer.process_view(&mut view, &mut chain_state).await.unwrap();
        assert_eq!(consumer.max_records_perpfx(), 2);

        // A second, empty view must not reset the running maximum.
        let mut view2 = InMemoryView::new(1_700_000_001);
        let mut chain_state2 = full_feed_chain_state(1, &[1]);
        consumer.process_view(&mut view2, &mut chain_state2).await.unwrap();
        assert_eq!(consumer.max_records_perpfx(), 2);
    }

    #[test]
    fn update_visibility_counters_is_monotone() {
        let mut buckets = [VisibilityCounters::default(); VIS_THRESHOLDS_CNT];
        update_visibility_counters(&mut buckets, 8, 4, 4);
        assert!(buckets[VIS_100_PERCENT].visible_pfxs <= buckets[VIS_75_PERCENT].visible_pfxs);
        assert!(buckets[VIS_75_PERCENT].visible_pfxs <= buckets[VIS_50_PERCENT].visible_pfxs);
        assert!(buckets[VIS_50_PERCENT].visible_pfxs <= buckets[VIS_25_PERCENT].visible_pfxs);
        assert!(buckets[VIS_25_PERCENT].visible_pfxs <= buckets[VIS_1_FF_ASN].visible_pfxs);
    }

    #[test]
    fn update_visibility_counters_noop_when_ff_total_zero() {
        let mut buckets = [VisibilityCounters::default(); VIS_THRESHOLDS_CNT];
        update_visibility_counters(&mut buckets, 8, 4, 0);
        assert_eq!(buckets[VIS_1_FF_ASN].visible_pfxs, 0);
    }
}
