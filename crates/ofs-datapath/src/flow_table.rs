//! Flow Table
//!
//! Entries are kept sorted by priority (descending) and then insertion
//! sequence, so a linear scan returns the highest-priority, earliest
//! installed match. Lookups hold the table read lock only; per-entry
//! counters are atomics and instruction lists are swapped lock-free on
//! modify.

use crate::action::{Action, Instruction};
use crate::matching::{FieldSource, Match};
use arc_swap::ArcSwap;
use bitflags::bitflags;
use ofs_common::{AtomicCounter, FlowModFailedCode, OfpError, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

bitflags! {
    /// `ofp_flow_mod_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FlowModFlags: u16 {
        const SEND_FLOW_REM = 1 << 0;
        const CHECK_OVERLAP = 1 << 1;
        const RESET_COUNTS = 1 << 2;
        const NO_PKT_COUNTS = 1 << 3;
        const NO_BYT_COUNTS = 1 << 4;
    }
}

/// What a table does with a packet no entry matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMissPolicy {
    /// Drop and count
    #[default]
    Drop,
    /// Packet-in with reason `NoMatch`
    Controller,
    /// Continue at the next table
    Continue,
}

/// Static table configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub name: String,
    pub max_entries: usize,
    pub miss_policy: TableMissPolicy,
    /// No two entries may match the same packet, whatever their priorities
    pub strict: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_entries: 4096,
            miss_policy: TableMissPolicy::Drop,
            strict: false,
        }
    }
}

/// Why an entry left the table (`ofp_flow_removed_reason`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RemovalReason {
    IdleTimeout = 0,
    HardTimeout = 1,
    Delete = 2,
    GroupDelete = 3,
    MeterDelete = 4,
}

/// Flow table mutation errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowTableError {
    #[error("table {0} is full")]
    TableFull(u8),

    #[error("entry overlaps an existing entry at priority {0}")]
    Overlap(u16),
}

impl From<FlowTableError> for OfpError {
    fn from(e: FlowTableError) -> Self {
        match e {
            FlowTableError::TableFull(_) => OfpError::FlowModFailed(FlowModFailedCode::TableFull),
            FlowTableError::Overlap(_) => OfpError::FlowModFailed(FlowModFailedCode::Overlap),
        }
    }
}

/// Parameters of a new flow entry
#[derive(Debug, Clone, Default)]
pub struct FlowSpec {
    pub priority: u16,
    pub match_fields: Match,
    pub cookie: u64,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub flags: FlowModFlags,
    pub instructions: Vec<Instruction>,
}

/// Installed flow entry
#[derive(Debug)]
pub struct FlowEntry {
    pub table_id: u8,
    pub priority: u16,
    pub match_fields: Match,
    pub cookie: u64,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub flags: FlowModFlags,
    instructions: ArcSwap<Vec<Instruction>>,
    seq: u64,
    installed_at: Timestamp,
    last_used: AtomicU64,
    packets: AtomicCounter,
    bytes: AtomicCounter,
}

impl FlowEntry {
    fn new(table_id: u8, spec: FlowSpec, seq: u64, now: Timestamp) -> Self {
        Self {
            table_id,
            priority: spec.priority,
            match_fields: spec.match_fields,
            cookie: spec.cookie,
            idle_timeout: spec.idle_timeout,
            hard_timeout: spec.hard_timeout,
            flags: spec.flags,
            instructions: ArcSwap::from_pointee(spec.instructions),
            seq,
            installed_at: now,
            last_used: AtomicU64::new(now.as_nanos()),
            packets: AtomicCounter::new(0),
            bytes: AtomicCounter::new(0),
        }
    }

    /// Current instruction list
    #[inline]
    pub fn instructions(&self) -> Arc<Vec<Instruction>> {
        self.instructions.load_full()
    }

    pub fn packet_count(&self) -> u64 {
        self.packets.get()
    }

    pub fn byte_count(&self) -> u64 {
        self.bytes.get()
    }

    pub fn installed_at(&self) -> Timestamp {
        self.installed_at
    }

    pub fn last_used(&self) -> Timestamp {
        Timestamp::from_nanos(self.last_used.load(Ordering::Relaxed))
    }

    /// Time since install
    pub fn duration(&self, now: Timestamp) -> Duration {
        now.saturating_since(self.installed_at)
    }

    /// Priority-0, match-all entry
    pub fn is_table_miss(&self) -> bool {
        self.priority == 0 && self.match_fields.is_empty()
    }

    #[inline]
    fn record_hit(&self, bytes: usize, now: Timestamp) {
        if !self.flags.contains(FlowModFlags::NO_PKT_COUNTS) {
            self.packets.inc();
        }
        if !self.flags.contains(FlowModFlags::NO_BYT_COUNTS) {
            self.bytes.add(bytes as u64);
        }
        self.last_used.fetch_max(now.as_nanos(), Ordering::Relaxed);
    }

    fn reset_counters(&self) {
        self.packets.reset();
        self.bytes.reset();
    }

    /// Timeout that has fired at `now`, hard timeouts taking precedence
    pub fn expiry(&self, now: Timestamp) -> Option<RemovalReason> {
        if self.hard_timeout > 0
            && now.saturating_since(self.installed_at) >= Duration::from_secs(self.hard_timeout as u64)
        {
            return Some(RemovalReason::HardTimeout);
        }
        if self.idle_timeout > 0
            && now.saturating_since(self.last_used()) >= Duration::from_secs(self.idle_timeout as u64)
        {
            return Some(RemovalReason::IdleTimeout);
        }
        None
    }

    fn all_actions(&self) -> Vec<Action> {
        self.instructions().iter().flat_map(|i| i.actions().to_vec()).collect()
    }

    /// Whether any action outputs to `port`
    pub fn outputs_to(&self, port: u32) -> bool {
        self.all_actions().iter().any(|a| a.outputs_to(port))
    }

    /// Whether any action forwards to `group_id`
    pub fn uses_group(&self, group_id: u32) -> bool {
        self.all_actions().iter().any(|a| *a == Action::Group(group_id))
    }

    /// Whether the entry is metered by `meter_id`
    pub fn uses_meter(&self, meter_id: u32) -> bool {
        self.instructions().iter().any(|i| *i == Instruction::Meter(meter_id))
    }
}

/// Selection criteria for modify, delete and stats requests
#[derive(Debug, Clone, Default)]
pub struct FlowFilter {
    pub match_fields: Match,
    /// `Some` for strict requests: priority and match must be identical
    pub strict_priority: Option<u16>,
    pub cookie: u64,
    pub cookie_mask: u64,
    pub out_port: Option<u32>,
    pub out_group: Option<u32>,
}

impl FlowFilter {
    /// Non-strict filter selecting entries covered by `m`
    pub fn covering(m: Match) -> Self {
        Self { match_fields: m, ..Default::default() }
    }

    /// Strict filter selecting the entry with identical match and priority
    pub fn strict(m: Match, priority: u16) -> Self {
        Self { match_fields: m, strict_priority: Some(priority), ..Default::default() }
    }

    pub fn selects(&self, entry: &FlowEntry) -> bool {
        if entry.cookie & self.cookie_mask != self.cookie & self.cookie_mask {
            return false;
        }
        let matched = match self.strict_priority {
            Some(p) => entry.priority == p && entry.match_fields.same_as(&self.match_fields),
            None => self.match_fields.covers(&entry.match_fields),
        };
        matched
            && self.out_port.map_or(true, |p| entry.outputs_to(p))
            && self.out_group.map_or(true, |g| entry.uses_group(g))
    }
}

/// Per-table counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub table_id: u8,
    pub active_count: usize,
    pub lookup_count: u64,
    pub matched_count: u64,
}

/// A single flow table
pub struct FlowTable {
    id: u8,
    config: TableConfig,
    entries: RwLock<Vec<Arc<FlowEntry>>>,
    next_seq: AtomicU64,
    lookups: AtomicCounter,
    matches: AtomicCounter,
}

impl FlowTable {
    pub fn new(id: u8, config: TableConfig) -> Self {
        Self {
            id,
            config,
            entries: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            lookups: AtomicCounter::new(0),
            matches: AtomicCounter::new(0),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn miss_policy(&self) -> TableMissPolicy {
        self.config.miss_policy
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Highest-priority entry matching `pkt`, counting the hit
    #[inline]
    pub fn lookup<S: FieldSource + ?Sized>(&self, pkt: &S) -> Option<Arc<FlowEntry>> {
        self.lookup_at(pkt, Timestamp::now())
    }

    pub fn lookup_at<S: FieldSource + ?Sized>(&self, pkt: &S, now: Timestamp) -> Option<Arc<FlowEntry>> {
        self.lookups.inc();
        let entries = self.entries.read();
        let hit = entries.iter().find(|e| e.match_fields.matches(pkt))?;
        hit.record_hit(pkt.frame_len(), now);
        self.matches.inc();
        Some(Arc::clone(hit))
    }

    /// Install an entry
    ///
    /// An entry with identical match and priority is replaced in place; its
    /// counters carry over unless `RESET_COUNTS` is set. Returns the replaced
    /// entry, if any.
    pub fn add(&self, spec: FlowSpec, now: Timestamp) -> Result<Option<Arc<FlowEntry>>, FlowTableError> {
        let mut entries = self.entries.write();

        let existing = entries
            .iter()
            .position(|e| e.priority == spec.priority && e.match_fields.same_as(&spec.match_fields));

        // Strict tables reject any overlap; CHECK_OVERLAP only within a priority
        let strict = self.config.strict;
        if strict || spec.flags.contains(FlowModFlags::CHECK_OVERLAP) {
            let clash = entries.iter().enumerate().find(|(i, e)| {
                Some(*i) != existing
                    && (strict || e.priority == spec.priority)
                    && e.match_fields.overlaps(&spec.match_fields)
            });
            if let Some((_, e)) = clash {
                return Err(FlowTableError::Overlap(e.priority));
            }
        }

        if let Some(i) = existing {
            let reset = spec.flags.contains(FlowModFlags::RESET_COUNTS);
            let old = Arc::clone(&entries[i]);
            let entry = FlowEntry::new(self.id, spec, old.seq, now);
            if !reset {
                entry.packets.add(old.packet_count());
                entry.bytes.add(old.byte_count());
            }
            entries[i] = Arc::new(entry);
            debug!(table = self.id, priority = old.priority, "flow entry replaced");
            return Ok(Some(old));
        }

        if entries.len() >= self.config.max_entries {
            return Err(FlowTableError::TableFull(self.id));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let priority = spec.priority;
        let pos = entries.partition_point(|e| e.priority >= priority);
        entries.insert(pos, Arc::new(FlowEntry::new(self.id, spec, seq, now)));
        debug!(table = self.id, priority, "flow entry added");
        Ok(None)
    }

    /// Replace the instructions of every selected entry
    ///
    /// Returns the number of entries updated; zero is not an error.
    pub fn modify(&self, filter: &FlowFilter, instructions: Vec<Instruction>, reset_counts: bool) -> usize {
        let entries = self.entries.read();
        let new = Arc::new(instructions);
        let mut n = 0;
        for e in entries.iter().filter(|e| filter.selects(e)) {
            e.instructions.store(Arc::clone(&new));
            if reset_counts {
                e.reset_counters();
            }
            n += 1;
        }
        n
    }

    /// Remove every selected entry, returning them
    pub fn delete(&self, filter: &FlowFilter) -> Vec<Arc<FlowEntry>> {
        self.remove_where(|e| filter.selects(e))
    }

    /// Remove every entry satisfying `pred`
    pub fn remove_where<F: Fn(&FlowEntry) -> bool>(&self, pred: F) -> Vec<Arc<FlowEntry>> {
        let mut entries = self.entries.write();
        let mut removed = Vec::new();
        entries.retain(|e| {
            if pred(e) {
                removed.push(Arc::clone(e));
                false
            } else {
                true
            }
        });
        removed
    }

    /// Remove timed-out entries
    ///
    /// A read-locked scan decides whether there is anything to do. Expiry is
    /// re-evaluated under the write lock, and only entries actually taken out
    /// are returned, so concurrent callers never report the same entry twice.
    pub fn expire(&self, now: Timestamp) -> Vec<(Arc<FlowEntry>, RemovalReason)> {
        if !self.entries.read().iter().any(|e| e.expiry(now).is_some()) {
            return Vec::new();
        }

        let mut entries = self.entries.write();
        let mut expired = Vec::new();
        entries.retain(|e| match e.expiry(now) {
            Some(reason) => {
                expired.push((Arc::clone(e), reason));
                false
            }
            None => true,
        });
        expired
    }

    /// Snapshot of the entries in lookup order
    pub fn entries(&self) -> Vec<Arc<FlowEntry>> {
        self.entries.read().clone()
    }

    pub fn stats(&self) -> TableStats {
        TableStats {
            table_id: self.id,
            active_count: self.len(),
            lookup_count: self.lookups.get(),
            matched_count: self.matches.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofs_common::MatchField;
    use std::collections::HashMap;

    struct Pkt(HashMap<MatchField, u128>);

    impl FieldSource for Pkt {
        fn field(&self, f: MatchField) -> Option<u128> {
            self.0.get(&f).copied()
        }

        fn frame_len(&self) -> usize {
            100
        }
    }

    fn pkt(tcp_dst: u128) -> Pkt {
        Pkt(HashMap::from([(MatchField::EthType, 0x0800), (MatchField::TcpDst, tcp_dst)]))
    }

    fn spec(priority: u16, m: Match, out: u32) -> FlowSpec {
        FlowSpec {
            priority,
            match_fields: m,
            instructions: vec![Instruction::ApplyActions(vec![Action::output(out)])],
            ..Default::default()
        }
    }

    fn table(max_entries: usize) -> FlowTable {
        FlowTable::new(0, TableConfig { max_entries, ..Default::default() })
    }

    fn out_port(e: &FlowEntry) -> u32 {
        match e.instructions()[0].actions()[0] {
            Action::Output { port, .. } => port,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_priority_wins() {
        let t = table(16);
        let now = Timestamp::now();
        t.add(spec(10, Match::any(), 1), now).unwrap();
        t.add(spec(100, Match::any().exact(MatchField::TcpDst, 80), 2), now).unwrap();

        assert_eq!(out_port(&t.lookup(&pkt(80)).unwrap()), 2);
        assert_eq!(out_port(&t.lookup(&pkt(443)).unwrap()), 1);
    }

    #[test]
    fn test_equal_priority_earliest_wins() {
        let t = table(16);
        let now = Timestamp::now();
        t.add(spec(5, Match::any().exact(MatchField::EthType, 0x0800), 1), now).unwrap();
        t.add(spec(5, Match::any().exact(MatchField::TcpDst, 80), 2), now).unwrap();
        assert_eq!(out_port(&t.lookup(&pkt(80)).unwrap()), 1);
    }

    #[test]
    fn test_hit_updates_counters() {
        let t = table(16);
        t.add(spec(1, Match::any(), 1), Timestamp::now()).unwrap();
        let e = t.lookup(&pkt(80)).unwrap();
        t.lookup(&pkt(81)).unwrap();
        assert_eq!(e.packet_count(), 2);
        assert_eq!(e.byte_count(), 200);
        assert_eq!(t.stats().lookup_count, 2);
        assert_eq!(t.stats().matched_count, 2);
    }

    #[test]
    fn test_miss_is_none() {
        let t = table(16);
        t.add(spec(1, Match::any().exact(MatchField::TcpDst, 22), 1), Timestamp::now()).unwrap();
        assert!(t.lookup(&pkt(80)).is_none());
        assert_eq!(t.stats().matched_count, 0);
    }

    #[test]
    fn test_table_full() {
        let t = table(1);
        let now = Timestamp::now();
        t.add(spec(1, Match::any(), 1), now).unwrap();
        assert_eq!(
            t.add(spec(2, Match::any().exact(MatchField::TcpDst, 1), 1), now).unwrap_err(),
            FlowTableError::TableFull(0)
        );
    }

    #[test]
    fn test_identical_add_replaces_and_keeps_counters() {
        let t = table(1);
        let now = Timestamp::now();
        t.add(spec(1, Match::any(), 1), now).unwrap();
        t.lookup(&pkt(80));

        let replaced = t.add(spec(1, Match::any(), 9), now).unwrap();
        assert!(replaced.is_some());
        assert_eq!(t.len(), 1);
        let e = t.lookup(&pkt(80)).unwrap();
        assert_eq!(out_port(&e), 9);
        assert_eq!(e.packet_count(), 2);

        let mut s = spec(1, Match::any(), 3);
        s.flags = FlowModFlags::RESET_COUNTS;
        t.add(s, now).unwrap();
        assert_eq!(t.entries()[0].packet_count(), 0);
    }

    #[test]
    fn test_overlap_checks() {
        let t = table(16);
        let now = Timestamp::now();
        t.add(spec(5, Match::any().masked(MatchField::Ipv4Dst, 0x0a00_0000, 0xff00_0000), 1), now)
            .unwrap();

        let mut s = spec(5, Match::any().exact(MatchField::Ipv4Dst, 0x0a00_0001), 2);
        s.flags = FlowModFlags::CHECK_OVERLAP;
        assert_eq!(t.add(s.clone(), now).unwrap_err(), FlowTableError::Overlap(5));

        // CHECK_OVERLAP only looks at equal priorities
        s.priority = 6;
        assert!(t.add(s, now).is_ok());

        let strict = FlowTable::new(1, TableConfig { strict: true, ..Default::default() });
        strict.add(spec(5, Match::any(), 1), now).unwrap();
        assert!(strict.add(spec(5, Match::any().exact(MatchField::TcpDst, 80), 1), now).is_err());
    }

    #[test]
    fn test_strict_table_rejects_overlap_across_priorities() {
        let t = FlowTable::new(0, TableConfig { strict: true, ..Default::default() });
        let now = Timestamp::now();
        t.add(spec(5, Match::any(), 1), now).unwrap();

        let err = t.add(spec(6, Match::any().exact(MatchField::TcpDst, 80), 2), now).unwrap_err();
        assert_eq!(err, FlowTableError::Overlap(5));
        assert_eq!(t.len(), 1);

        // Disjoint matches coexist at any priority
        let t = FlowTable::new(0, TableConfig { strict: true, ..Default::default() });
        t.add(spec(5, Match::any().exact(MatchField::TcpDst, 80), 1), now).unwrap();
        t.add(spec(9, Match::any().exact(MatchField::TcpDst, 443), 2), now).unwrap();
        assert_eq!(out_port(&t.lookup(&pkt(80)).unwrap()), 1);
        assert_eq!(out_port(&t.lookup(&pkt(443)).unwrap()), 2);

        // Re-adding an identical entry is a replace, not an overlap
        assert!(t.add(spec(5, Match::any().exact(MatchField::TcpDst, 80), 3), now).unwrap().is_some());
    }

    #[test]
    fn test_modify_and_modify_strict() {
        let t = table(16);
        let now = Timestamp::now();
        t.add(spec(10, Match::any().exact(MatchField::TcpDst, 80), 1), now).unwrap();
        t.add(spec(20, Match::any().exact(MatchField::TcpDst, 80).exact(MatchField::EthType, 0x0800), 1), now)
            .unwrap();

        let new = vec![Instruction::ApplyActions(vec![Action::output(7)])];
        let filter = FlowFilter::covering(Match::any().exact(MatchField::TcpDst, 80));
        assert_eq!(t.modify(&filter, new.clone(), false), 2);

        let strict = FlowFilter::strict(Match::any().exact(MatchField::TcpDst, 80), 20);
        assert_eq!(t.modify(&strict, new.clone(), false), 0);
        let strict = FlowFilter::strict(Match::any().exact(MatchField::TcpDst, 80), 10);
        assert_eq!(t.modify(&strict, new, false), 1);
    }

    #[test]
    fn test_delete_filters() {
        let t = table(16);
        let now = Timestamp::now();
        let mut a = spec(10, Match::any().exact(MatchField::TcpDst, 80), 1);
        a.cookie = 0xaa;
        let mut b = spec(10, Match::any().exact(MatchField::TcpDst, 81), 2);
        b.cookie = 0xbb;
        t.add(a, now).unwrap();
        t.add(b, now).unwrap();

        let mut f = FlowFilter::covering(Match::any());
        f.cookie = 0xaa;
        f.cookie_mask = 0xff;
        assert_eq!(t.delete(&f).len(), 1);

        let mut f = FlowFilter::covering(Match::any());
        f.out_port = Some(1);
        assert!(t.delete(&f).is_empty());
        f.out_port = Some(2);
        assert_eq!(t.delete(&f).len(), 1);
        assert!(t.is_empty());
    }

    #[test]
    fn test_delete_nonexistent_is_noop() {
        let t = table(16);
        assert!(t.delete(&FlowFilter::strict(Match::any(), 3)).is_empty());
        assert!(t.delete(&FlowFilter::covering(Match::any())).is_empty());
    }

    #[test]
    fn test_expire() {
        let t = table(16);
        let t0 = Timestamp::from_nanos(1_000_000_000);
        let mut idle = spec(1, Match::any().exact(MatchField::TcpDst, 1), 1);
        idle.idle_timeout = 5;
        let mut hard = spec(1, Match::any().exact(MatchField::TcpDst, 2), 1);
        hard.hard_timeout = 10;
        let mut short = spec(1, Match::any().exact(MatchField::TcpDst, 3), 1);
        short.idle_timeout = 1;
        t.add(idle, t0).unwrap();
        t.add(hard, t0).unwrap();
        t.add(short, t0).unwrap();
        t.add(spec(1, Match::any().exact(MatchField::TcpDst, 4), 1), t0).unwrap();

        let t1 = t0.add(Duration::from_secs(3));
        t.lookup_at(&pkt(1), t1);
        let removed = t.expire(t1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].1, RemovalReason::IdleTimeout);

        let removed = t.expire(t0.add(Duration::from_secs(10)));
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().any(|(_, r)| *r == RemovalReason::HardTimeout));
        assert!(removed.iter().any(|(_, r)| *r == RemovalReason::IdleTimeout));
        assert_eq!(t.len(), 1);
        assert!(t.expire(t0.add(Duration::from_secs(3600))).is_empty());
    }

    #[test]
    fn test_expire_reports_each_entry_once() {
        let t = Arc::new(table(256));
        let t0 = Timestamp::from_nanos(1_000_000_000);
        for port in 0..200u128 {
            let mut s = spec(1, Match::any().exact(MatchField::TcpDst, port), 1);
            s.hard_timeout = 1;
            t.add(s, t0).unwrap();
        }
        let later = t0.add(Duration::from_secs(2));

        let reported: usize = std::thread::scope(|s| {
            let workers: Vec<_> = (0..4).map(|_| s.spawn(|| t.expire(later).len())).collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });
        assert_eq!(reported, 200);
        assert!(t.is_empty());
        assert!(t.expire(later).is_empty());
    }

    #[test]
    fn test_deleted_entry_is_not_reported_as_expired() {
        let t = table(16);
        let t0 = Timestamp::from_nanos(1_000_000_000);
        let mut s = spec(1, Match::any().exact(MatchField::TcpDst, 80), 1);
        s.idle_timeout = 1;
        t.add(s, t0).unwrap();

        assert_eq!(t.delete(&FlowFilter::covering(Match::any())).len(), 1);
        assert!(t.expire(t0.add(Duration::from_secs(5))).is_empty());
    }
}
