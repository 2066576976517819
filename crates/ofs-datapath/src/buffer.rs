//! Packet Buffers
//!
//! Frames sent to the controller are parked in a fixed ring so a later
//! packet-out or flow-mod can refer to them by `buffer_id` instead of
//! carrying the bytes back.
//!
//! # Design
//!
//! - Power-of-two ring; the slot index lives in the low bits of the id
//! - The high bits carry a per-slot cookie, bumped on every store, so a
//!   stale id never resolves to a newer packet
//! - A slot holding a packet younger than `OVERWRITE_AFTER` is not reused

use crate::packet::Packet;
use ofs_common::{BadRequestCode, OfpError, Timestamp};
use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Buffer id meaning "not buffered"
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// Default ring size
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Age after which an unclaimed packet may be overwritten
pub const OVERWRITE_AFTER: Duration = Duration::from_secs(1);

/// Buffer lookup errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer {0:#x} does not exist")]
    Unknown(u32),

    #[error("buffer {0:#x} was already used")]
    Empty(u32),
}

impl From<BufferError> for OfpError {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::Unknown(_) => OfpError::BadRequest(BadRequestCode::BufferUnknown),
            BufferError::Empty(_) => OfpError::BadRequest(BadRequestCode::BufferEmpty),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    packet: Option<(Packet, u32)>,
    cookie: u32,
    stored_at: Timestamp,
}

#[derive(Debug)]
struct Ring {
    slots: Vec<Slot>,
    next: usize,
}

/// Ring of buffered packets
#[derive(Debug)]
pub struct PacketBuffers {
    ring: Mutex<Ring>,
    bits: u32,
}

impl PacketBuffers {
    /// `capacity` is rounded up to a power of two (at least 2, at most 2^16)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(2, 1 << 16).next_power_of_two();
        let slots = (0..capacity).map(|_| Slot::default()).collect();
        Self {
            ring: Mutex::new(Ring { slots, next: 0 }),
            bits: capacity.trailing_zeros(),
        }
    }

    pub fn capacity(&self) -> usize {
        1 << self.bits
    }

    fn mask(&self) -> u32 {
        (1u32 << self.bits) - 1
    }

    /// Park a packet, returning its id or `OFP_NO_BUFFER` when the next
    /// slot is still holding a fresh packet
    pub fn store(&self, packet: Packet, in_port: u32, now: Timestamp) -> u32 {
        let mut ring = self.ring.lock();
        let idx = ring.next;
        let slot = &mut ring.slots[idx];
        if slot.packet.is_some() && now.saturating_since(slot.stored_at) < OVERWRITE_AFTER {
            return OFP_NO_BUFFER;
        }

        // Cookie 0 at the top of the range would collide with OFP_NO_BUFFER
        slot.cookie = slot.cookie.wrapping_add(1) & (u32::MAX >> self.bits);
        let id = (slot.cookie << self.bits) | idx as u32;
        let id = if id == OFP_NO_BUFFER {
            slot.cookie = 0;
            idx as u32
        } else {
            id
        };
        slot.packet = Some((packet, in_port));
        slot.stored_at = now;
        ring.next = (idx + 1) & self.mask() as usize;
        id
    }

    /// Claim a buffered packet and its input port
    pub fn retrieve(&self, id: u32) -> Result<(Packet, u32), BufferError> {
        if id == OFP_NO_BUFFER {
            return Err(BufferError::Unknown(id));
        }
        let mut ring = self.ring.lock();
        let slot = &mut ring.slots[(id & self.mask()) as usize];
        if slot.cookie != id >> self.bits {
            return Err(BufferError::Unknown(id));
        }
        slot.packet.take().ok_or(BufferError::Empty(id))
    }

    /// Release a buffered packet without using it; `false` when the id
    /// held nothing
    pub fn discard(&self, id: u32) -> bool {
        self.retrieve(id).is_ok()
    }

    /// Number of slots currently holding a packet
    pub fn occupied(&self) -> usize {
        self.ring.lock().slots.iter().filter(|s| s.packet.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::FrameBuilder;

    fn pkt() -> Packet {
        Packet::from_slice(&FrameBuilder::new().ipv4(1, 2, 64, 0).udp(1, 2).build()).unwrap()
    }

    #[test]
    fn test_store_and_retrieve() {
        let b = PacketBuffers::new(4);
        let now = Timestamp::now();
        let id = b.store(pkt(), 3, now);
        assert_ne!(id, OFP_NO_BUFFER);
        assert_eq!(b.occupied(), 1);

        let (p, in_port) = b.retrieve(id).unwrap();
        assert_eq!(in_port, 3);
        assert_eq!(p.data(), pkt().data());
        assert_eq!(b.retrieve(id).unwrap_err(), BufferError::Empty(id));
    }

    #[test]
    fn test_discard_frees_slot() {
        let b = PacketBuffers::new(4);
        let id = b.store(pkt(), 1, Timestamp::now());
        assert!(b.discard(id));
        assert_eq!(b.occupied(), 0);
        assert!(!b.discard(id));
        assert!(!b.discard(OFP_NO_BUFFER));
        assert_eq!(b.retrieve(id).unwrap_err(), BufferError::Empty(id));
    }

    #[test]
    fn test_capacity_rounded() {
        assert_eq!(PacketBuffers::new(200).capacity(), 256);
        assert_eq!(PacketBuffers::new(0).capacity(), 2);
    }

    #[test]
    fn test_stale_id_is_unknown() {
        let b = PacketBuffers::new(2);
        let t0 = Timestamp::from_nanos(1);
        let first = b.store(pkt(), 1, t0);
        b.store(pkt(), 1, t0);

        // Ring is full of fresh packets
        assert_eq!(b.store(pkt(), 1, t0), OFP_NO_BUFFER);

        // Once old enough, the slot is reused under a new cookie
        let later = t0.add(OVERWRITE_AFTER);
        let reused = b.store(pkt(), 1, later);
        assert_ne!(reused, OFP_NO_BUFFER);
        assert_ne!(reused, first);
        assert_eq!(b.retrieve(first).unwrap_err(), BufferError::Unknown(first));
        assert!(b.retrieve(reused).is_ok());
    }

    #[test]
    fn test_error_codes() {
        let e: OfpError = BufferError::Unknown(5).into();
        assert_eq!(e, OfpError::BadRequest(BadRequestCode::BufferUnknown));
        let b = PacketBuffers::new(4);
        assert!(b.retrieve(OFP_NO_BUFFER).is_err());
        assert!(b.retrieve(12345).is_err());
    }
}
