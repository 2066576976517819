//! Group Table
//!
//! Groups hold ordered action buckets. The table resolves *which* buckets a
//! packet runs through; the pipeline executes the bucket actions.

use crate::action::Action;
use crate::port::Liveness;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ofs_common::{AtomicCounter, FlowKey, GroupModFailedCode, OfpError, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Highest assignable group id
pub const OFPG_MAX: u32 = 0xffff_ff00;
/// All groups (delete)
pub const OFPG_ALL: u32 = 0xffff_fffc;
/// Wildcard group in filters
pub const OFPG_ANY: u32 = 0xffff_ffff;

/// Bound on group-to-group chaining at execution and liveness time
pub const MAX_GROUP_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    All,
    Select,
    Indirect,
    FastFailover,
}

/// Action bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    #[serde(default)]
    pub weight: u16,
    #[serde(default)]
    pub watch_port: Option<u32>,
    #[serde(default)]
    pub watch_group: Option<u32>,
    pub actions: Vec<Action>,
}

impl Bucket {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { weight: 0, watch_port: None, watch_group: None, actions }
    }

    pub fn weighted(weight: u16, actions: Vec<Action>) -> Self {
        Self { weight, ..Self::new(actions) }
    }

    pub fn watching_port(port: u32, actions: Vec<Action>) -> Self {
        Self { watch_port: Some(port), ..Self::new(actions) }
    }

    fn group_refs(&self) -> impl Iterator<Item = u32> + '_ {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Group(g) => Some(*g),
                _ => None,
            })
            .chain(self.watch_group)
    }
}

/// Group table mutation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("group {0} already exists")]
    Exists(u32),

    #[error("group {0} does not exist")]
    Unknown(u32),

    #[error("invalid group: {0}")]
    Invalid(String),

    #[error("group table is full")]
    OutOfGroups,

    #[error("too many buckets: {0}")]
    OutOfBuckets(usize),

    #[error("select bucket weight must be positive")]
    BadWeight,

    #[error("fast-failover bucket {0} has no usable watch")]
    BadWatch(usize),

    #[error("group {0} would form a loop")]
    Loop(u32),

    #[error("group {0} is referenced by group {1}")]
    Chained(u32, u32),

    #[error("bad bucket action: {0}")]
    BadAction(OfpError),
}

impl From<GroupError> for OfpError {
    fn from(e: GroupError) -> Self {
        use GroupModFailedCode::*;
        match e {
            GroupError::Exists(_) => OfpError::GroupModFailed(GroupExists),
            GroupError::Unknown(_) => OfpError::GroupModFailed(UnknownGroup),
            GroupError::Invalid(_) => OfpError::GroupModFailed(InvalidGroup),
            GroupError::OutOfGroups => OfpError::GroupModFailed(OutOfGroups),
            GroupError::OutOfBuckets(_) => OfpError::GroupModFailed(OutOfBuckets),
            GroupError::BadWeight => OfpError::GroupModFailed(BadBucket),
            GroupError::BadWatch(_) => OfpError::GroupModFailed(BadWatch),
            GroupError::Loop(_) => OfpError::GroupModFailed(Loop),
            GroupError::Chained(..) => OfpError::GroupModFailed(ChainedGroup),
            GroupError::BadAction(e) => e,
        }
    }
}

#[derive(Debug, Default)]
struct BucketCounters {
    packets: AtomicCounter,
    bytes: AtomicCounter,
}

/// Installed group
#[derive(Debug)]
pub struct GroupEntry {
    pub id: u32,
    pub group_type: GroupType,
    pub buckets: Vec<Bucket>,
    bucket_counters: Vec<BucketCounters>,
    packets: AtomicCounter,
    bytes: AtomicCounter,
    installed_at: Timestamp,
}

impl GroupEntry {
    fn new(id: u32, group_type: GroupType, buckets: Vec<Bucket>) -> Self {
        let bucket_counters = buckets.iter().map(|_| BucketCounters::default()).collect();
        Self {
            id,
            group_type,
            buckets,
            bucket_counters,
            packets: AtomicCounter::new(0),
            bytes: AtomicCounter::new(0),
            installed_at: Timestamp::now(),
        }
    }

    /// Count a packet entering the group
    pub fn record(&self, bytes: usize) {
        self.packets.inc();
        self.bytes.add(bytes as u64);
    }

    /// Count a packet taking bucket `idx`
    pub fn record_bucket(&self, idx: usize, bytes: usize) {
        if let Some(c) = self.bucket_counters.get(idx) {
            c.packets.inc();
            c.bytes.add(bytes as u64);
        }
    }

    pub fn stats(&self, now: Timestamp) -> GroupStats {
        GroupStats {
            group_id: self.id,
            packet_count: self.packets.get(),
            byte_count: self.bytes.get(),
            duration_nanos: now.saturating_since(self.installed_at).as_nanos() as u64,
            buckets: self
                .bucket_counters
                .iter()
                .map(|c| BucketStats { packet_count: c.packets.get(), byte_count: c.bytes.get() })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub packet_count: u64,
    pub byte_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub group_id: u32,
    pub packet_count: u64,
    pub byte_count: u64,
    pub duration_nanos: u64,
    pub buckets: Vec<BucketStats>,
}

/// All groups of a datapath
pub struct GroupTable {
    groups: DashMap<u32, Arc<GroupEntry>>,
    /// Installed plus reserved slots, bounded by `max_groups`
    occupied: AtomicUsize,
    max_groups: usize,
    max_buckets: usize,
}

impl GroupTable {
    pub fn new(max_groups: usize, max_buckets: usize) -> Self {
        Self { groups: DashMap::new(), occupied: AtomicUsize::new(0), max_groups, max_buckets }
    }

    fn reserve_slot(&self) -> bool {
        self.occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max_groups).then_some(n + 1))
            .is_ok()
    }

    fn remove_one(&self, id: u32) -> Option<u32> {
        let (k, _) = self.groups.remove(&id)?;
        self.occupied.fetch_sub(1, Ordering::AcqRel);
        Some(k)
    }

    pub fn get(&self, id: u32) -> Option<Arc<GroupEntry>> {
        self.groups.get(&id).map(|g| Arc::clone(g.value()))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.groups.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn add(&self, id: u32, group_type: GroupType, buckets: Vec<Bucket>) -> Result<(), GroupError> {
        if self.contains(id) {
            return Err(GroupError::Exists(id));
        }
        // Validation reads other groups, so it runs before the entry is locked
        self.validate(id, group_type, &buckets)?;
        match self.groups.entry(id) {
            Entry::Occupied(_) => Err(GroupError::Exists(id)),
            Entry::Vacant(slot) => {
                if !self.reserve_slot() {
                    return Err(GroupError::OutOfGroups);
                }
                slot.insert(Arc::new(GroupEntry::new(id, group_type, buckets)));
                debug!(group = id, ?group_type, "group added");
                Ok(())
            }
        }
    }

    /// Replace type and buckets; counters restart
    pub fn modify(&self, id: u32, group_type: GroupType, buckets: Vec<Bucket>) -> Result<(), GroupError> {
        if !self.contains(id) {
            return Err(GroupError::Unknown(id));
        }
        self.validate(id, group_type, &buckets)?;
        self.groups.insert(id, Arc::new(GroupEntry::new(id, group_type, buckets)));
        debug!(group = id, ?group_type, "group modified");
        Ok(())
    }

    /// Delete one group, or every group for `OFPG_ALL`
    ///
    /// Returns the ids removed; deleting a missing group removes nothing.
    pub fn delete(&self, id: u32) -> Result<Vec<u32>, GroupError> {
        if id == OFPG_ALL {
            let ids: Vec<u32> = self.groups.iter().map(|g| *g.key()).collect();
            return Ok(ids.into_iter().filter_map(|g| self.remove_one(g)).collect());
        }
        if let Some(user) = self
            .groups
            .iter()
            .find(|g| *g.key() != id && g.buckets.iter().any(|b| b.group_refs().any(|r| r == id)))
        {
            return Err(GroupError::Chained(id, *user.key()));
        }
        Ok(self.remove_one(id).into_iter().collect())
    }

    fn validate(&self, id: u32, group_type: GroupType, buckets: &[Bucket]) -> Result<(), GroupError> {
        if id > OFPG_MAX {
            return Err(GroupError::Invalid(format!("reserved group id {:#x}", id)));
        }
        if buckets.len() > self.max_buckets {
            return Err(GroupError::OutOfBuckets(buckets.len()));
        }
        match group_type {
            GroupType::Indirect if buckets.len() != 1 => {
                return Err(GroupError::Invalid("indirect group needs exactly one bucket".into()));
            }
            GroupType::Select if buckets.iter().any(|b| b.weight == 0) => {
                return Err(GroupError::BadWeight);
            }
            GroupType::FastFailover => {
                for (i, b) in buckets.iter().enumerate() {
                    if b.watch_port.is_none() && b.watch_group.is_none() {
                        return Err(GroupError::BadWatch(i));
                    }
                    if let Some(g) = b.watch_group {
                        if g == id || !self.contains(g) {
                            return Err(GroupError::BadWatch(i));
                        }
                    }
                }
            }
            _ => {}
        }

        for b in buckets {
            for a in &b.actions {
                a.validate().map_err(GroupError::BadAction)?;
            }
            for r in b.group_refs() {
                if r == id {
                    return Err(GroupError::Loop(id));
                }
                if !self.contains(r) {
                    return Err(GroupError::BadAction(OfpError::GroupModFailed(GroupModFailedCode::InvalidGroup)));
                }
                if self.reaches(r, id, 0) {
                    return Err(GroupError::Loop(id));
                }
            }
        }
        Ok(())
    }

    /// Whether `from` (transitively) references `target`
    fn reaches(&self, from: u32, target: u32, depth: usize) -> bool {
        if depth > MAX_GROUP_DEPTH {
            return true;
        }
        let Some(g) = self.get(from) else {
            return false;
        };
        g.buckets
            .iter()
            .flat_map(|b| b.group_refs().collect::<Vec<_>>())
            .any(|r| r == target || self.reaches(r, target, depth + 1))
    }

    fn bucket_live(&self, b: &Bucket, live: &dyn Liveness, depth: usize) -> bool {
        if let Some(p) = b.watch_port {
            if !live.port_live(p) {
                return false;
            }
        }
        if let Some(g) = b.watch_group {
            if !self.group_live(g, live, depth + 1) {
                return false;
            }
        }
        true
    }

    /// A group is live when any of its buckets is
    pub fn group_live(&self, id: u32, live: &dyn Liveness, depth: usize) -> bool {
        if depth > MAX_GROUP_DEPTH {
            return false;
        }
        self.get(id)
            .map_or(false, |g| g.buckets.iter().any(|b| self.bucket_live(b, live, depth)))
    }

    /// Indexes of the buckets a packet with `key` runs through
    ///
    /// Empty when no bucket applies (empty group, or no live bucket).
    pub fn select_buckets(&self, group: &GroupEntry, key: &FlowKey, live: &dyn Liveness) -> Vec<usize> {
        match group.group_type {
            GroupType::All => (0..group.buckets.len()).collect(),
            GroupType::Indirect => group.buckets.first().map(|_| vec![0]).unwrap_or_default(),
            GroupType::FastFailover => group
                .buckets
                .iter()
                .position(|b| self.bucket_live(b, live, 0))
                .into_iter()
                .collect(),
            GroupType::Select => {
                let candidates: Vec<(usize, u64)> = group
                    .buckets
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| self.bucket_live(b, live, 0))
                    .map(|(i, b)| (i, b.weight as u64))
                    .collect();
                let total: u64 = candidates.iter().map(|(_, w)| w).sum();
                if total == 0 {
                    return Vec::new();
                }
                let mut point = key.bucket_hash() % total;
                for (i, w) in candidates {
                    if point < w {
                        return vec![i];
                    }
                    point -= w;
                }
                Vec::new()
            }
        }
    }

    pub fn stats(&self) -> Vec<GroupStats> {
        let now = Timestamp::now();
        let mut stats: Vec<GroupStats> = self.groups.iter().map(|g| g.stats(now)).collect();
        stats.sort_by_key(|s| s.group_id);
        stats
    }
}
