//! Meter Table
//!
//! Each band tracks a leaky bucket of offered load: the level drains at the
//! band rate and every metered packet adds its cost (bits for KBPS meters,
//! one for PKTPS). A band is exceeded while its level is above its burst
//! size. Bands are evaluated in ascending rate order and the highest
//! exceeded band decides the outcome.

use bitflags::bitflags;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ofs_common::{AtomicCounter, MeterModFailedCode, OfpError, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Highest assignable meter id
pub const OFPM_MAX: u32 = 0xffff_0000;
/// All meters (delete)
pub const OFPM_ALL: u32 = 0xffff_ffff;

/// Implicit burst window when `BURST` is not requested
const DEFAULT_BURST_SECS: f64 = 0.1;
/// Smallest implicit burst for KBPS meters, in bits
const MIN_BURST_BITS: f64 = 1500.0 * 8.0;

bitflags! {
    /// `ofp_meter_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MeterFlags: u16 {
        const KBPS = 1 << 0;
        const PKTPS = 1 << 1;
        const BURST = 1 << 2;
        const STATS = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandType {
    Drop,
    DscpRemark { prec_level: u8 },
}

/// Meter band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterBand {
    pub band_type: BandType,
    /// kb/s or packets/s depending on the meter flags
    pub rate: u32,
    /// kilobits or packets; only used with the `BURST` flag
    #[serde(default)]
    pub burst_size: u32,
}

impl MeterBand {
    pub fn new_drop(rate: u32, burst_size: u32) -> Self {
        Self { band_type: BandType::Drop, rate, burst_size }
    }

    pub fn new_dscp_remark(rate: u32, burst_size: u32, prec_level: u8) -> Self {
        Self { band_type: BandType::DscpRemark { prec_level }, rate, burst_size }
    }
}

/// Result of metering one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterOutcome {
    Pass,
    Drop,
    Remark { prec_level: u8 },
}

/// Meter table mutation errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterError {
    #[error("meter {0} already exists")]
    Exists(u32),

    #[error("invalid meter id {0}")]
    Invalid(u32),

    #[error("meter {0} does not exist")]
    Unknown(u32),

    #[error("unsupported meter flags {0:#x}")]
    BadFlags(u16),

    #[error("band rate must be positive")]
    BadRate,

    #[error("burst size must be positive with BURST")]
    BadBurst,

    #[error("meter needs at least one band")]
    BadBand,

    #[error("meter table is full")]
    OutOfMeters,

    #[error("too many bands: {0}")]
    OutOfBands(usize),
}

impl From<MeterError> for OfpError {
    fn from(e: MeterError) -> Self {
        use MeterModFailedCode::*;
        OfpError::MeterModFailed(match e {
            MeterError::Exists(_) => MeterExists,
            MeterError::Invalid(_) => InvalidMeter,
            MeterError::Unknown(_) => UnknownMeter,
            MeterError::BadFlags(_) => BadFlags,
            MeterError::BadRate => BadRate,
            MeterError::BadBurst => BadBurst,
            MeterError::BadBand => BadBand,
            MeterError::OutOfMeters => OutOfMeters,
            MeterError::OutOfBands(_) => OutOfBands,
        })
    }
}

/// Raise the drop precedence of an AF codepoint
///
/// AFxy is encoded as `8x + 2y` with class x in 1..=4 and drop precedence y
/// in 1..=3. Other codepoints (BE, EF, CS*) are returned unchanged.
pub fn remark_dscp(dscp: u8, prec_level: u8) -> u8 {
    let class = dscp >> 3;
    let drop = (dscp >> 1) & 0x03;
    if !(1..=4).contains(&class) || dscp & 0x01 != 0 || drop == 0 {
        return dscp;
    }
    let drop = drop.saturating_add(prec_level).min(3);
    (class << 3) | (drop << 1)
}

#[derive(Debug, Clone, Copy)]
struct BandState {
    rate: f64,
    burst: f64,
    level: f64,
}

#[derive(Debug)]
struct MeterState {
    last: Option<Timestamp>,
    bands: Vec<BandState>,
}

#[derive(Debug, Default)]
struct BandCounters {
    packets: AtomicCounter,
    bytes: AtomicCounter,
}

/// Installed meter
#[derive(Debug)]
pub struct Meter {
    pub id: u32,
    pub flags: MeterFlags,
    /// Bands as installed; stats follow this order
    pub bands: Vec<MeterBand>,
    /// Band indexes by ascending rate
    by_rate: Vec<usize>,
    state: Mutex<MeterState>,
    band_counters: Vec<BandCounters>,
    packets: AtomicCounter,
    bytes: AtomicCounter,
    installed_at: Timestamp,
}

impl Meter {
    fn new(id: u32, flags: MeterFlags, bands: Vec<MeterBand>) -> Self {
        let mut by_rate: Vec<usize> = (0..bands.len()).collect();
        by_rate.sort_by_key(|&i| bands[i].rate);
        let pktps = flags.contains(MeterFlags::PKTPS);
        let state = bands
            .iter()
            .map(|b| {
                // kb/s → bits/s; packets/s as is
                let rate = if pktps { b.rate as f64 } else { b.rate as f64 * 1000.0 };
                let burst = if flags.contains(MeterFlags::BURST) {
                    if pktps { b.burst_size as f64 } else { b.burst_size as f64 * 1000.0 }
                } else if pktps {
                    (rate * DEFAULT_BURST_SECS).max(1.0)
                } else {
                    (rate * DEFAULT_BURST_SECS).max(MIN_BURST_BITS)
                };
                BandState { rate, burst, level: 0.0 }
            })
            .collect();
        let band_counters = bands.iter().map(|_| BandCounters::default()).collect();
        Self {
            id,
            flags,
            bands,
            by_rate,
            state: Mutex::new(MeterState { last: None, bands: state }),
            band_counters,
            packets: AtomicCounter::new(0),
            bytes: AtomicCounter::new(0),
            installed_at: Timestamp::now(),
        }
    }

    /// Meter one packet of `len` bytes arriving at `now`
    pub fn apply_at(&self, len: usize, now: Timestamp) -> MeterOutcome {
        self.packets.inc();
        self.bytes.add(len as u64);

        let cost = if self.flags.contains(MeterFlags::PKTPS) { 1.0 } else { len as f64 * 8.0 };
        let fired = {
            let mut st = self.state.lock();
            let elapsed = st.last.map_or(0.0, |t| now.saturating_since(t).as_secs_f64());
            st.last = Some(st.last.map_or(now, |t| t.max(now)));

            let mut fired = None;
            for &i in &self.by_rate {
                let Some(b) = st.bands.get_mut(i) else {
                    continue;
                };
                b.level = (b.level - b.rate * elapsed).max(0.0) + cost;
                b.level = b.level.min(2.0 * b.burst);
                if b.level > b.burst {
                    fired = Some(i);
                }
            }
            fired
        };

        let Some(i) = fired else {
            return MeterOutcome::Pass;
        };
        if let Some(c) = self.band_counters.get(i) {
            c.packets.inc();
            c.bytes.add(len as u64);
        }
        match self.bands[i].band_type {
            BandType::Drop => MeterOutcome::Drop,
            BandType::DscpRemark { prec_level } => MeterOutcome::Remark { prec_level },
        }
    }

    pub fn apply(&self, len: usize) -> MeterOutcome {
        self.apply_at(len, Timestamp::now())
    }

    pub fn stats(&self, now: Timestamp, flow_count: u32) -> MeterStats {
        MeterStats {
            meter_id: self.id,
            flow_count,
            packet_in_count: self.packets.get(),
            byte_in_count: self.bytes.get(),
            duration_nanos: now.saturating_since(self.installed_at).as_nanos() as u64,
            bands: self
                .band_counters
                .iter()
                .map(|c| BandStats { packet_band_count: c.packets.get(), byte_band_count: c.bytes.get() })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BandStats {
    pub packet_band_count: u64,
    pub byte_band_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MeterStats {
    pub meter_id: u32,
    pub flow_count: u32,
    pub packet_in_count: u64,
    pub byte_in_count: u64,
    pub duration_nanos: u64,
    pub bands: Vec<BandStats>,
}

/// All meters of a datapath
pub struct MeterTable {
    meters: DashMap<u32, Arc<Meter>>,
    /// Installed plus reserved slots, bounded by `max_meters`
    occupied: AtomicUsize,
    max_meters: usize,
    max_bands: usize,
}

impl MeterTable {
    pub fn new(max_meters: usize, max_bands: usize) -> Self {
        Self { meters: DashMap::new(), occupied: AtomicUsize::new(0), max_meters, max_bands }
    }

    fn reserve_slot(&self) -> bool {
        self.occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max_meters).then_some(n + 1))
            .is_ok()
    }

    fn remove_one(&self, id: u32) -> Option<u32> {
        let (k, _) = self.meters.remove(&id)?;
        self.occupied.fetch_sub(1, Ordering::AcqRel);
        Some(k)
    }

    pub fn get(&self, id: u32) -> Option<Arc<Meter>> {
        self.meters.get(&id).map(|m| Arc::clone(m.value()))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.meters.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.meters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    fn validate(&self, id: u32, flags: MeterFlags, bands: &[MeterBand]) -> Result<(), MeterError> {
        if id == 0 || id > OFPM_MAX {
            return Err(MeterError::Invalid(id));
        }
        if flags.contains(MeterFlags::KBPS | MeterFlags::PKTPS) {
            return Err(MeterError::BadFlags(flags.bits()));
        }
        if bands.is_empty() {
            return Err(MeterError::BadBand);
        }
        if bands.len() > self.max_bands {
            return Err(MeterError::OutOfBands(bands.len()));
        }
        for b in bands {
            if b.rate == 0 {
                return Err(MeterError::BadRate);
            }
            if flags.contains(MeterFlags::BURST) && b.burst_size == 0 {
                return Err(MeterError::BadBurst);
            }
        }
        Ok(())
    }

    pub fn add(&self, id: u32, flags: MeterFlags, bands: Vec<MeterBand>) -> Result<(), MeterError> {
        self.validate(id, flags, &bands)?;
        match self.meters.entry(id) {
            Entry::Occupied(_) => Err(MeterError::Exists(id)),
            Entry::Vacant(slot) => {
                if !self.reserve_slot() {
                    return Err(MeterError::OutOfMeters);
                }
                slot.insert(Arc::new(Meter::new(id, flags, bands)));
                debug!(meter = id, "meter added");
                Ok(())
            }
        }
    }

    /// Replace flags and bands; rate state and counters restart
    pub fn modify(&self, id: u32, flags: MeterFlags, bands: Vec<MeterBand>) -> Result<(), MeterError> {
        self.validate(id, flags, &bands)?;
        if !self.contains(id) {
            return Err(MeterError::Unknown(id));
        }
        self.meters.insert(id, Arc::new(Meter::new(id, flags, bands)));
        debug!(meter = id, "meter modified");
        Ok(())
    }

    /// Delete one meter, or all for `OFPM_ALL`; returns the ids removed
    pub fn delete(&self, id: u32) -> Vec<u32> {
        if id == OFPM_ALL {
            let ids: Vec<u32> = self.meters.iter().map(|m| *m.key()).collect();
            return ids.into_iter().filter_map(|m| self.remove_one(m)).collect();
        }
        self.remove_one(id).into_iter().collect()
    }

    /// Meter a packet through meter `id`
    pub fn apply(&self, id: u32, len: usize) -> Result<MeterOutcome, MeterError> {
        let meter = self.get(id).ok_or(MeterError::Unknown(id))?;
        Ok(meter.apply(len))
    }

    /// Stats for every meter; `flows_using` counts referencing entries
    pub fn stats<F: Fn(u32) -> u32>(&self, flows_using: F) -> Vec<MeterStats> {
        let now = Timestamp::now();
        let mut stats: Vec<MeterStats> = self.meters.iter().map(|m| m.stats(now, flows_using(m.id))).collect();
        stats.sort_by_key(|s| s.meter_id);
        stats
    }
}
