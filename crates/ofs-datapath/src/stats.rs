//! Datapath Statistics
//!
//! Lock-free switch-wide counters. Every increment is mirrored to the
//! `metrics` facade so an installed recorder sees the same numbers.

use crate::pipeline::DropReason;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Switch-wide counters (cache-line aligned)
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct DatapathStats {
    pub rx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub dropped: AtomicU64,
    pub table_misses: AtomicU64,
    pub action_errors: AtomicU64,
    pub meter_drops: AtomicU64,
    pub invalid_ttl: AtomicU64,
    pub parse_errors: AtomicU64,
    pub packet_ins: AtomicU64,
    pub events_dropped: AtomicU64,
}

impl DatapathStats {
    #[inline(always)]
    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        metrics::counter!("ofs_datapath_rx_packets").increment(1);
    }

    #[inline(always)]
    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        metrics::counter!("ofs_datapath_tx_packets").increment(1);
    }

    pub fn record_drop(&self, reason: DropReason) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        let specific = match reason {
            DropReason::TableMiss => Some(&self.table_misses),
            DropReason::ActionError | DropReason::GroupDead => Some(&self.action_errors),
            DropReason::Meter => Some(&self.meter_drops),
            DropReason::InvalidTtl => Some(&self.invalid_ttl),
            DropReason::Malformed => Some(&self.parse_errors),
            DropReason::NoAction | DropReason::Ingress => None,
        };
        if let Some(c) = specific {
            c.fetch_add(1, Ordering::Relaxed);
        }
        metrics::counter!("ofs_datapath_dropped", "reason" => reason.as_str()).increment(1);
    }

    pub fn record_packet_in(&self) {
        self.packet_ins.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ofs_datapath_packet_ins").increment(1);
    }

    /// A controller event was discarded because the channel was full
    pub fn record_event_dropped(&self, kind: &'static str) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ofs_datapath_events_dropped", "kind" => kind).increment(1);
    }

    pub fn snapshot(&self) -> DatapathStatsSnapshot {
        DatapathStatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            table_misses: self.table_misses.load(Ordering::Relaxed),
            action_errors: self.action_errors.load(Ordering::Relaxed),
            meter_drops: self.meter_drops.load(Ordering::Relaxed),
            invalid_ttl: self.invalid_ttl.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            packet_ins: self.packet_ins.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Stats snapshot (non-atomic)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatapathStatsSnapshot {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub dropped: u64,
    pub table_misses: u64,
    pub action_errors: u64,
    pub meter_drops: u64,
    pub invalid_ttl: u64,
    pub parse_errors: u64,
    pub packet_ins: u64,
    pub events_dropped: u64,
}

impl DatapathStatsSnapshot {
    pub fn drop_rate(&self) -> f64 {
        if self.rx_packets == 0 {
            return 0.0;
        }
        self.dropped as f64 / self.rx_packets as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_accounting() {
        let s = DatapathStats::default();
        s.record_rx(100);
        s.record_rx(100);
        s.record_drop(DropReason::TableMiss);
        s.record_drop(DropReason::NoAction);

        let snap = s.snapshot();
        assert_eq!(snap.rx_packets, 2);
        assert_eq!(snap.rx_bytes, 200);
        assert_eq!(snap.dropped, 2);
        assert_eq!(snap.table_misses, 1);
        assert_eq!(snap.drop_rate(), 1.0);
    }

    #[test]
    fn test_empty_drop_rate() {
        assert_eq!(DatapathStats::default().snapshot().drop_rate(), 0.0);
    }
}
