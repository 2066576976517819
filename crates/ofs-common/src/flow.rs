//! Flow identifiers for select-group hashing
//!
//! Packets of the same transport flow must always hash to the same value so
//! a select group keeps them on one bucket and in order.

/// Flow identifier (5-tuple, or L2 addresses for non-IP traffic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C, align(32))]
pub struct FlowKey {
    /// Source address (IPv4 in low bits, or source MAC)
    pub src: u128,
    /// Destination address (IPv4 in low bits, or destination MAC)
    pub dst: u128,
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// IP protocol, or 0 for L2 keys
    pub protocol: u8,
    /// Padding for alignment
    _pad: [u8; 3],
}

impl FlowKey {
    /// Create from an IPv4 transport tuple
    #[inline(always)]
    pub const fn from_v4(
        src_ip: u32,
        dst_ip: u32,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
    ) -> Self {
        Self {
            src: src_ip as u128,
            dst: dst_ip as u128,
            src_port,
            dst_port,
            protocol,
            _pad: [0; 3],
        }
    }

    /// Create from L2 addresses and ethertype (non-IP frames)
    #[inline(always)]
    pub const fn from_l2(src_mac: u128, dst_mac: u128, eth_type: u16) -> Self {
        Self {
            src: src_mac,
            dst: dst_mac,
            src_port: eth_type,
            dst_port: 0,
            protocol: 0,
            _pad: [0; 3],
        }
    }

    /// Get reverse flow key
    #[inline(always)]
    pub const fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
            _pad: [0; 3],
        }
    }

    /// Fast hash using FxHash algorithm
    #[inline(always)]
    pub fn fx_hash(&self) -> u64 {
        const K: u64 = 0x517cc1b727220a95;
        let mut h: u64 = 0;

        h = h.wrapping_add((self.src as u64).wrapping_mul(K));
        h = h.rotate_left(31);
        h = h.wrapping_add(((self.src >> 64) as u64).wrapping_mul(K));
        h = h.rotate_left(31);
        h = h.wrapping_add((self.dst as u64).wrapping_mul(K));
        h = h.rotate_left(31);
        h = h.wrapping_add(((self.dst >> 64) as u64).wrapping_mul(K));
        h = h.rotate_left(31);
        h = h.wrapping_add(
            ((self.src_port as u64) << 48 | (self.dst_port as u64) << 32 | (self.protocol as u64))
                .wrapping_mul(K),
        );
        h
    }

    /// Well-mixed hash for bucket selection
    ///
    /// `fx_hash` is weak in its low bits; a modulo over bucket weights needs
    /// all 64 bits avalanched (murmur3 finaliser).
    #[inline(always)]
    pub fn bucket_hash(&self) -> u64 {
        let mut h = self.fx_hash();
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51afd7ed558ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
        h ^= h >> 33;
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_key_hash_stable() {
        let k1 = FlowKey::from_v4(0xC0A80101, 0x08080808, 12345, 443, 6);
        let k2 = FlowKey::from_v4(0xC0A80101, 0x08080808, 12345, 443, 6);
        let k3 = FlowKey::from_v4(0xC0A80102, 0x08080808, 12345, 443, 6);

        assert_eq!(k1.bucket_hash(), k2.bucket_hash());
        assert_ne!(k1.bucket_hash(), k3.bucket_hash());
    }

    #[test]
    fn test_reverse() {
        let k = FlowKey::from_v4(1, 2, 10, 20, 17);
        let r = k.reverse();
        assert_eq!(r.src, 2);
        assert_eq!(r.dst_port, 10);
        assert_eq!(r.reverse(), k);
    }

    #[test]
    fn test_l2_key_differs_from_v4() {
        let l2 = FlowKey::from_l2(0xaabbccddeeff, 0x112233445566, 0x0806);
        let v4 = FlowKey::from_v4(1, 2, 0x0806, 0, 0);
        assert_ne!(l2.bucket_hash(), v4.bucket_hash());
    }

    #[test]
    fn test_bucket_hash_low_bits_spread() {
        // Sequential source ports must not collapse onto a few residues
        let mut residues = [0u32; 8];
        for port in 0..800u16 {
            let k = FlowKey::from_v4(0x0a000001, 0x0a000002, port, 80, 6);
            residues[(k.bucket_hash() % 8) as usize] += 1;
        }
        for r in residues {
            assert!(r > 50, "residue count {} too small", r);
        }
    }
}
