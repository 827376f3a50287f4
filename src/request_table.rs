//! Fixed-capacity table of outstanding requests (C2).
//!
//! Grounded on `bgpview_io_client_broker.c`'s `req_list_find_empty`,
//! `req_list_find`, and `req_list_mark_unused`: a plain `Vec` scanned
//! linearly (capacity is small, typically ≤ 64, so a hash map would be
//! needless ceremony), with in-place reuse of freed slots.

use crate::protocol::{Frame, MsgType};
use std::time::Instant;

/// One outstanding request. `in_use` doubles as the tombstone for a freed
/// slot so the backing `Vec` never shrinks.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub in_use: bool,
    pub seq_num: u32,
    pub msg_type: MsgType,
    pub msg_frames: Vec<Frame>,
    pub retries_remaining: u8,
    pub retry_at: Instant,
}

impl RequestRecord {
    fn vacant() -> Self {
        RequestRecord {
            in_use: false,
            seq_num: 0,
            msg_type: MsgType::View,
            msg_frames: Vec::new(),
            retries_remaining: 0,
            retry_at: Instant::now(),
        }
    }
}

/// Fixed-capacity outstanding-request table.
///
/// Invariant: at most `capacity` entries with `in_use == true`; `req_count()`
/// always equals the count of such entries.
#[derive(Debug)]
pub struct RequestTable {
    records: Vec<RequestRecord>,
    req_count: usize,
}

impl RequestTable {
    pub fn new(capacity: usize) -> Self {
        RequestTable {
            records: (0..capacity).map(|_| RequestRecord::vacant()).collect(),
            req_count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn req_count(&self) -> usize {
        self.req_count
    }

    pub fn is_full(&self) -> bool {
        self.req_count == self.records.len()
    }

    /// Find the index of a free slot, if any.
    pub fn find_empty(&self) -> Option<usize> {
        self.records.iter().position(|r| !r.in_use)
    }

    /// Find the index of the in-use record matching `seq_num`, if any.
    pub fn find_by_seq(&self, seq_num: u32) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.in_use && r.seq_num == seq_num)
    }

    /// Occupy a previously-empty slot with a new record. Panics if `idx` is
    /// already in use — callers must obtain `idx` from [`find_empty`].
    pub fn occupy(&mut self, idx: usize, record: RequestRecord) {
        assert!(!self.records[idx].in_use, "occupy called on a live slot");
        self.records[idx] = record;
        self.records[idx].in_use = true;
        self.req_count += 1;
    }

    pub fn get(&self, idx: usize) -> &RequestRecord {
        &self.records[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut RequestRecord {
        &mut self.records[idx]
    }

    /// Release a record's owned frames and mark the slot free. A no-op if
    /// the slot was already unused.
    pub fn mark_unused(&mut self, idx: usize) {
        if self.records[idx].in_use {
            self.records[idx] = RequestRecord::vacant();
            self.req_count -= 1;
        }
    }

    /// Indices of all in-use records whose `retry_at` has passed.
    pub fn expired(&self, now: Instant) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.in_use && r.retry_at <= now)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(seq_num: u32) -> RequestRecord {
        RequestRecord {
            in_use: false,
            seq_num,
            msg_type: MsgType::View,
            msg_frames: vec![vec![1, 2, 3]],
            retries_remaining: 3,
            retry_at: Instant::now(),
        }
    }

    #[test]
    fn req_count_tracks_in_use_entries() {
        let mut table = RequestTable::new(4);
        assert_eq!(table.req_count(), 0);
        let idx = table.find_empty().unwrap();
        table.occupy(idx, new_record(1));
        assert_eq!(table.req_count(), 1);
        table.mark_unused(idx);
        assert_eq!(table.req_count(), 0);
    }

    #[test]
    fn find_by_seq_locates_live_record_only() {
        let mut table = RequestTable::new(2);
        let idx = table.find_empty().unwrap();
        table.occupy(idx, new_record(5));
        assert_eq!(table.find_by_seq(5), Some(idx));
        table.mark_unused(idx);
        assert_eq!(table.find_by_seq(5), None);
    }

    #[test]
    fn table_reports_full_at_capacity() {
        let mut table = RequestTable::new(2);
        table.occupy(table.find_empty().unwrap(), new_record(1));
        assert!(!table.is_full());
        table.occupy(table.find_empty().unwrap(), new_record(2));
        assert!(table.is_full());
        assert_eq!(table.find_empty(), None);
    }

    #[test]
    fn mark_unused_releases_owned_frames() {
        let mut table = RequestTable::new(1);
        let idx = table.find_empty().unwrap();
        table.occupy(idx, new_record(9));
        assert!(!table.get(idx).msg_frames.is_empty());
        table.mark_unused(idx);
        assert!(table.get(idx).msg_frames.is_empty());
    }

    #[test]
    fn expired_only_returns_in_use_past_retry_at() {
        let mut table = RequestTable::new(2);
        let idx = table.find_empty().unwrap();
        let mut rec = new_record(1);
        rec.retry_at = Instant::now() - std::time::Duration::from_secs(1);
        table.occupy(idx, rec);
        let expired = table.expired(Instant::now());
        assert_eq!(expired, vec![idx]);
    }
}
