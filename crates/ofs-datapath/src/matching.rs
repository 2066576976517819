//! Flow matching
//!
//! A `Match` is a set of `field = value/mask` predicates. A packet satisfies
//! a predicate when `(field & mask) == value`; a field the packet does not
//! carry never satisfies one.

use ofs_common::{BadMatchCode, MatchField, OfpError, OfpResult};
use serde::{Deserialize, Serialize};

/// Anything that can answer "what is this field's value?"
pub trait FieldSource {
    /// Current value of `field`, `None` when absent
    fn field(&self, field: MatchField) -> Option<u128>;

    /// Frame length in bytes (for byte counters)
    fn frame_len(&self) -> usize;
}

/// A single masked predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchPredicate {
    pub field: MatchField,
    pub value: u128,
    pub mask: u128,
}

impl MatchPredicate {
    #[inline(always)]
    pub fn matches(&self, v: u128) -> bool {
        v & self.mask == self.value
    }

    fn is_exact(&self) -> bool {
        self.mask == self.field.full_mask()
    }
}

/// Flow match: a conjunction of predicates, at most one per field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Match {
    predicates: Vec<MatchPredicate>,
}

impl Match {
    /// Wildcard-all match
    pub fn any() -> Self {
        Self::default()
    }

    /// IPv4 packets
    pub fn ipv4() -> Self {
        Self::any().exact(MatchField::EthType, 0x0800)
    }

    /// TCP over IPv4, enough to match on TCP ports
    pub fn tcp() -> Self {
        Self::ipv4().exact(MatchField::IpProto, 6)
    }

    /// UDP over IPv4
    pub fn udp() -> Self {
        Self::ipv4().exact(MatchField::IpProto, 17)
    }

    /// Add an exact-value predicate
    pub fn exact(self, field: MatchField, value: u128) -> Self {
        self.masked(field, value, field.full_mask())
    }

    /// Add a masked predicate. Value bits outside the mask are cleared.
    pub fn masked(mut self, field: MatchField, value: u128, mask: u128) -> Self {
        self.predicates.push(MatchPredicate { field, value: value & mask, mask });
        self
    }

    pub fn predicates(&self) -> &[MatchPredicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn get(&self, field: MatchField) -> Option<&MatchPredicate> {
        self.predicates.iter().find(|p| p.field == field)
    }

    /// Exact `in_port` this match is pinned to, if any
    pub fn in_port(&self) -> Option<u32> {
        self.get(MatchField::InPort).filter(|p| p.is_exact()).map(|p| p.value as u32)
    }

    /// Check field widths, mask support, duplicates and prerequisites
    pub fn validate(&self) -> OfpResult<()> {
        for (i, p) in self.predicates.iter().enumerate() {
            let full = p.field.full_mask();
            if self.predicates[..i].iter().any(|q| q.field == p.field) {
                return Err(OfpError::BadMatch(BadMatchCode::DupField));
            }
            if p.mask & !full != 0 || p.mask == 0 {
                return Err(OfpError::BadMatch(BadMatchCode::BadMask));
            }
            if p.value & !full != 0 {
                return Err(OfpError::BadMatch(BadMatchCode::BadValue));
            }
            if p.mask != full && !p.field.maskable() {
                return Err(OfpError::BadMatch(BadMatchCode::BadMask));
            }
        }
        // Each prerequisite is itself a predicate, so chains are checked link by link
        for p in &self.predicates {
            if let Some((pre, values)) = p.field.prerequisite() {
                let met = self
                    .get(pre)
                    .map_or(false, |q| values.is_empty() || (q.is_exact() && values.contains(&q.value)));
                if !met {
                    return Err(OfpError::BadMatch(BadMatchCode::BadPrereq));
                }
            }
        }
        Ok(())
    }

    /// Evaluate against a packet
    #[inline]
    pub fn matches<S: FieldSource + ?Sized>(&self, src: &S) -> bool {
        self.predicates
            .iter()
            .all(|p| src.field(p.field).map_or(false, |v| p.matches(v)))
    }

    /// Whether some packet could satisfy both matches
    ///
    /// Two predicates on the same field conflict only when they disagree on
    /// a bit both masks care about.
    pub fn overlaps(&self, other: &Match) -> bool {
        self.predicates.iter().all(|p| match other.get(p.field) {
            Some(q) => {
                let common = p.mask & q.mask;
                p.value & common == q.value & common
            }
            None => true,
        })
    }

    /// Whether every packet matching `narrower` also matches `self`
    ///
    /// Used by non-strict modify/delete and flow stats: the request match
    /// selects every entry at least as specific as itself.
    pub fn covers(&self, narrower: &Match) -> bool {
        self.predicates.iter().all(|p| match narrower.get(p.field) {
            Some(q) => q.mask & p.mask == p.mask && q.value & p.mask == p.value,
            None => false,
        })
    }

    /// Same predicate set, in any order
    pub fn same_as(&self, other: &Match) -> bool {
        self.predicates.len() == other.predicates.len()
            && self.predicates.iter().all(|p| other.get(p.field) == Some(p))
    }
}
