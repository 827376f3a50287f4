//! View pipeline manager (C4) and the per-prefix user-data channel (C5).

pub mod view;

use crate::error::Result;
use std::collections::HashSet;

pub use view::{
    family_of, InMemoryView, OriginAsPathSegment, PeerId, Prefix, PrefixFamily, PrefixObservation,
    View,
};

/// Shared, mutable per-run facts derived by earlier consumers and consumed
/// by later ones: full-feed peer sets per address family, the full-feed ASN
/// count, the mask-length cutoff, a readiness flag, and a metric-prefix
/// string.
#[derive(Debug, Clone, Default)]
pub struct ChainState {
    pub full_feed_peer_ids: [HashSet<PeerId>; 2],
    pub full_feed_peer_asns_cnt: [u32; 2],
    pub usable_table_flag: [bool; 2],
    pub visibility_computed: bool,
    pub pfx_vis_mask_len_threshold: u8,
    pub metric_prefix: String,
}

impl ChainState {
    pub fn new(metric_prefix: impl Into<String>, pfx_vis_mask_len_threshold: u8) -> Self {
        ChainState {
            metric_prefix: metric_prefix.into(),
            pfx_vis_mask_len_threshold,
            ..Default::default()
        }
    }

    pub fn full_feed_peer_ids(&self, family: PrefixFamily) -> &HashSet<PeerId> {
        &self.full_feed_peer_ids[family as usize]
    }

    pub fn full_feed_asn_count(&self, family: PrefixFamily) -> u32 {
        self.full_feed_peer_asns_cnt[family as usize]
    }
}

/// A registered consumer in the pipeline: a tagged `{init, destroy,
/// process_view}` operation set expressed as a trait object, held in
/// declared-dependency order by [`PipelineManager`].
#[async_trait::async_trait]
pub trait Consumer: Send {
    /// Stable name used in logs and metric paths.
    fn name(&self) -> &str;

    /// Process one view, mutating `chain_state` and the consumer's own
    /// aggregates, then flushing its key package for `view`'s timestamp.
    async fn process_view(&mut self, view: &mut dyn View, chain_state: &mut ChainState) -> Result<()>;
}

/// Orchestrates a chain of registered consumers per received view, in
/// declaration order. A non-`Ok` return from any consumer aborts the chain.
pub struct PipelineManager {
    consumers: Vec<Box<dyn Consumer>>,
    chain_state_template: ChainState,
}

impl PipelineManager {
    pub fn new(chain_state_template: ChainState) -> Self {
        PipelineManager {
            consumers: Vec::new(),
            chain_state_template,
        }
    }

    /// Register a consumer. Order matters: callers must register consumers
    /// whose declared dependencies (e.g. `visibility` before
    /// `per-geo-visibility`) run first.
    pub fn register(&mut self, consumer: Box<dyn Consumer>) {
        self.consumers.push(consumer);
    }

    pub async fn process_view(&mut self, view: &mut dyn View) -> Result<()> {
        let mut chain_state = self.chain_state_template.clone();
        for consumer in self.consumers.iter_mut() {
            consumer.process_view(view, &mut chain_state).await?;
        }
        Ok(())
    }
}
