//! Broker state (C3 data model).
//!
//! Grounded on `bgpview_io_client_broker.c`'s `bgpview_io_client_broker_t`:
//! the two sockets, request table, heartbeat/reconnect bookkeeping, and
//! `master_paused`/`shutdown_time` fields, carried over field-for-field.

use crate::config::BrokerConfig;
use crate::request_table::RequestTable;
use std::time::{Duration, Instant};

/// Connection lifecycle state: `CONNECTING -> READY -> (LIVE <-> DEGRADED)
/// -> RECONNECTING | SHUTTING_DOWN -> EXITED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Ready,
    Live,
    Degraded,
    Reconnecting,
    ShuttingDown,
    Exited,
}

/// Mutable state owned exclusively by the broker reactor task. Never shared
/// across tasks — the master only ever sees it through channel messages.
pub struct BrokerState {
    pub config: BrokerConfig,
    pub conn_state: ConnState,
    pub requests: RequestTable,
    pub heartbeat_next: Instant,
    pub heartbeat_liveness_remaining: u8,
    pub reconnect_interval_next: Duration,
    pub shutdown_time: Option<Instant>,
    pub master_paused: bool,
    pub identity: String,
    pub next_seq_num: u32,
}

impl BrokerState {
    pub fn new(config: BrokerConfig) -> Self {
        let capacity = config.max_outstanding_requests;
        let heartbeat_interval = config.heartbeat_interval;
        let heartbeat_liveness = config.heartbeat_liveness;
        let reconnect_min = config.reconnect_interval_min;
        let identity = config
            .identity
            .clone()
            .unwrap_or_else(|| format!("bgpview-client-{}", uuid::Uuid::new_v4()));
        BrokerState {
            config,
            conn_state: ConnState::Connecting,
            requests: RequestTable::new(capacity),
            heartbeat_next: Instant::now() + heartbeat_interval,
            heartbeat_liveness_remaining: heartbeat_liveness,
            reconnect_interval_next: reconnect_min,
            shutdown_time: None,
            master_paused: false,
            identity,
            next_seq_num: 1,
        }
    }

    /// Allocate the next sequence number for a new request.
    pub fn take_seq_num(&mut self) -> u32 {
        let seq = self.next_seq_num;
        self.next_seq_num = self.next_seq_num.wrapping_add(1).max(1);
        seq
    }

    /// Reset liveness bookkeeping after any received server frame, per the
    /// heartbeat protocol.
    pub fn reset_liveness(&mut self) {
        self.heartbeat_liveness_remaining = self.config.heartbeat_liveness;
        self.reconnect_interval_next = self.config.reconnect_interval_min;
        if self.conn_state != ConnState::ShuttingDown {
            self.conn_state = ConnState::Live;
        }
    }

    /// One heartbeat timer tick with no intervening traffic: decrement
    /// liveness, returning `true` if the connection has now gone degraded.
    pub fn tick_heartbeat_liveness(&mut self) -> bool {
        self.heartbeat_liveness_remaining = self.heartbeat_liveness_remaining.saturating_sub(1);
        if self.heartbeat_liveness_remaining == 0 {
            self.conn_state = ConnState::Degraded;
            true
        } else {
            false
        }
    }

    /// Double the reconnect backoff up to the configured maximum.
    pub fn double_reconnect_interval(&mut self) {
        let doubled = self.reconnect_interval_next * 2;
        self.reconnect_interval_next = doubled.min(self.config.reconnect_interval_max);
    }

    /// Invariant check: master reader should be paused iff the request table
    /// is at capacity and the broker isn't shutting down.
    pub fn should_pause_master(&self) -> bool {
        self.requests.is_full() && self.conn_state != ConnState::ShuttingDown
    }

    pub fn enter_shutdown(&mut self) {
        if self.shutdown_time.is_none() {
            self.conn_state = ConnState::ShuttingDown;
            self.shutdown_time = Some(Instant::now() + self.config.shutdown_linger);
        }
    }

    pub fn shutdown_deadline_passed(&self, now: Instant) -> bool {
        matches!(self.shutdown_time, Some(t) if now >= t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_liveness_restores_full_budget_and_min_backoff() {
        let mut state = BrokerState::new(BrokerConfig::default());
        state.heartbeat_liveness_remaining = 0;
        state.reconnect_interval_next = state.config.reconnect_interval_max;
        state.reset_liveness();
        assert_eq!(state.heartbeat_liveness_remaining, state.config.heartbeat_liveness);
        assert_eq!(state.reconnect_interval_next, state.config.reconnect_interval_min);
    }

    #[test]
    fn tick_heartbeat_liveness_degrades_at_zero() {
        let mut cfg = BrokerConfig::default();
        cfg.heartbeat_liveness = 2;
        let mut state = BrokerState::new(cfg);
        assert!(!state.tick_heartbeat_liveness());
        assert!(state.tick_heartbeat_liveness());
        assert_eq!(state.conn_state, ConnState::Degraded);
    }

    #[test]
    fn double_reconnect_interval_caps_at_max() {
        let mut cfg = BrokerConfig::default();
        cfg.reconnect_interval_min = Duration::from_millis(1000);
        cfg.reconnect_interval_max = Duration::from_millis(3000);
        let mut state = BrokerState::new(cfg);
        state.double_reconnect_interval();
        assert_eq!(state.reconnect_interval_next, Duration::from_millis(2000));
        state.double_reconnect_interval();
        assert_eq!(state.reconnect_interval_next, Duration::from_millis(3000));
    }

    #[test]
    fn should_pause_master_iff_table_full_and_not_shutting_down() {
        let mut cfg = BrokerConfig::default();
        cfg.max_outstanding_requests = 1;
        let mut state = BrokerState::new(cfg);
        assert!(!state.should_pause_master());
        let idx = state.requests.find_empty().unwrap();
        state.requests.occupy(
            idx,
            crate::request_table::RequestRecord {
                in_use: false,
                seq_num: 1,
                msg_type: crate::protocol::MsgType::View,
                msg_frames: vec![],
                retries_remaining: 1,
                retry_at: Instant::now(),
            },
        );
        assert!(state.should_pause_master());
        state.enter_shutdown();
        assert!(!state.should_pause_master());
    }
}
