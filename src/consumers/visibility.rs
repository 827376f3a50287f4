//! Visibility consumer (C9, added).
//!
//! Grounded on `bvc_pergeovisibility.c`'s precondition check
//! (`BVC_GET_CHAIN_STATE(consumer)->visibility_computed == 0`): the
//! geo-visibility consumer's precondition assumes full-feed classification
//! is already computed by the time it runs, so this crate needs a real
//! (if minimal) consumer that does that classification and sets the
//! chain-state flag the precondition reads. A peer is full-feed for a
//! family when it observes at least `full_feed_threshold` of that family's
//! active prefixes — the same ratio test netacq's upstream `bvc_visibility`
//! uses, simplified to the one knob this crate's chain state exposes.

use crate::error::Result;
use crate::pipeline::{ChainState, Consumer, PrefixFamily, View};
use async_trait::async_trait;
use std::collections::HashSet;

pub const NAME: &str = "visibility";

/// Classifies full-feed peers per address family and publishes the result
/// into [`ChainState`] for downstream consumers (notably
/// [`crate::consumers::GeoVisibilityConsumer`]) to depend on.
pub struct VisibilityConsumer {
    full_feed_threshold: f64,
}

impl VisibilityConsumer {
    pub fn new(full_feed_threshold: f64) -> Self {
        VisibilityConsumer { full_feed_threshold }
    }
}

#[async_trait]
impl Consumer for VisibilityConsumer {
    fn name(&self) -> &str {
        NAME
    }

    async fn process_view(&mut self, view: &mut dyn View, chain_state: &mut ChainState) -> Result<()> {
        for family in [PrefixFamily::V4, PrefixFamily::V6] {
            let total = view.prefix_count(family);
            let usable = total > 0;
            chain_state.usable_table_flag[family as usize] = usable;

            let mut full_feed_ids = HashSet::new();
            let mut full_feed_asns = HashSet::new();
            if usable {
                for peer_id in view.peer_ids(family) {
                    let observed = view.peer_prefix_count(family, peer_id);
                    let ratio = observed as f64 / total as f64;
                    if ratio >= self.full_feed_threshold {
                        full_feed_ids.insert(peer_id);
                        if let Some(asn) = view.peer_asn(peer_id) {
                            full_feed_asns.insert(asn);
                        }
                    }
                }
            }
            chain_state.full_feed_peer_asns_cnt[family as usize] = full_feed_asns.len() as u32;
            chain_state.full_feed_peer_ids[family as usize] = full_feed_ids;
        }
        chain_state.visibility_computed = true;
        Ok(())
    }
}
