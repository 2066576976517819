//! Match field catalogue
//!
//! The subset of OXM basic-class fields the datapath parses, matches on and
//! rewrites. Values travel as `u128` so every field (up to 64-bit metadata
//! and 48-bit MAC addresses) fits one representation.

use serde::{Deserialize, Serialize};

/// OXM basic match field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    /// Switch input port
    InPort,
    /// Metadata passed between tables
    Metadata,
    /// Ethernet destination address
    EthDst,
    /// Ethernet source address
    EthSrc,
    /// Ethernet frame type
    EthType,
    /// VLAN id (12 bits)
    VlanVid,
    /// VLAN priority
    VlanPcp,
    /// IP DSCP (6 bits in ToS field)
    IpDscp,
    /// IP ECN (2 bits in ToS field)
    IpEcn,
    /// IP protocol
    IpProto,
    /// IPv4 source address
    Ipv4Src,
    /// IPv4 destination address
    Ipv4Dst,
    /// TCP source port
    TcpSrc,
    /// TCP destination port
    TcpDst,
    /// UDP source port
    UdpSrc,
    /// UDP destination port
    UdpDst,
    /// ICMPv4 type
    Icmpv4Type,
    /// ICMPv4 code
    Icmpv4Code,
}

impl MatchField {
    /// Every supported field, in OXM field-number order
    pub const ALL: [MatchField; 18] = [
        Self::InPort,
        Self::Metadata,
        Self::EthDst,
        Self::EthSrc,
        Self::EthType,
        Self::VlanVid,
        Self::VlanPcp,
        Self::IpDscp,
        Self::IpEcn,
        Self::IpProto,
        Self::Ipv4Src,
        Self::Ipv4Dst,
        Self::TcpSrc,
        Self::TcpDst,
        Self::UdpSrc,
        Self::UdpDst,
        Self::Icmpv4Type,
        Self::Icmpv4Code,
    ];

    /// OXM field number (`oxm_ofb_match_fields`)
    pub const fn oxm_field(&self) -> u8 {
        match self {
            Self::InPort => 0,
            Self::Metadata => 2,
            Self::EthDst => 3,
            Self::EthSrc => 4,
            Self::EthType => 5,
            Self::VlanVid => 6,
            Self::VlanPcp => 7,
            Self::IpDscp => 8,
            Self::IpEcn => 9,
            Self::IpProto => 10,
            Self::Ipv4Src => 11,
            Self::Ipv4Dst => 12,
            Self::TcpSrc => 13,
            Self::TcpDst => 14,
            Self::UdpSrc => 15,
            Self::UdpDst => 16,
            Self::Icmpv4Type => 19,
            Self::Icmpv4Code => 20,
        }
    }

    /// Width of the field in bits
    pub const fn bits(&self) -> u32 {
        match self {
            Self::InPort => 32,
            Self::Metadata => 64,
            Self::EthDst | Self::EthSrc => 48,
            Self::EthType => 16,
            Self::VlanVid => 12,
            Self::VlanPcp => 3,
            Self::IpDscp => 6,
            Self::IpEcn => 2,
            Self::IpProto => 8,
            Self::Ipv4Src | Self::Ipv4Dst => 32,
            Self::TcpSrc | Self::TcpDst | Self::UdpSrc | Self::UdpDst => 16,
            Self::Icmpv4Type | Self::Icmpv4Code => 8,
        }
    }

    /// All-ones mask covering the field width
    #[inline]
    pub const fn full_mask(&self) -> u128 {
        (1u128 << self.bits()) - 1
    }

    /// Whether the field accepts an arbitrary bitmask
    pub const fn maskable(&self) -> bool {
        matches!(
            self,
            Self::Metadata
                | Self::EthDst
                | Self::EthSrc
                | Self::VlanVid
                | Self::Ipv4Src
                | Self::Ipv4Dst
        )
    }

    /// Field that must also be matched for this one to be valid
    ///
    /// The prerequisite has to be matched exactly on one of the listed
    /// values; an empty list only requires it to be present.
    pub const fn prerequisite(&self) -> Option<(MatchField, &'static [u128])> {
        match self {
            Self::VlanPcp => Some((Self::VlanVid, &[])),
            Self::IpDscp | Self::IpEcn | Self::IpProto => Some((Self::EthType, &[0x0800, 0x86dd])),
            Self::Ipv4Src | Self::Ipv4Dst => Some((Self::EthType, &[0x0800])),
            Self::TcpSrc | Self::TcpDst => Some((Self::IpProto, &[6])),
            Self::UdpSrc | Self::UdpDst => Some((Self::IpProto, &[17])),
            Self::Icmpv4Type | Self::Icmpv4Code => Some((Self::IpProto, &[1])),
            _ => None,
        }
    }

    /// Whether a set-field action may rewrite the field
    pub const fn settable(&self) -> bool {
        !matches!(self, Self::InPort | Self::Metadata)
    }
}

/// Convert a MAC address into its field value
#[inline]
pub fn mac_to_u128(mac: [u8; 6]) -> u128 {
    mac.iter().fold(0u128, |acc, b| (acc << 8) | *b as u128)
}

/// Convert a field value back into a MAC address
#[inline]
pub fn u128_to_mac(v: u128) -> [u8; 6] {
    let mut mac = [0u8; 6];
    for (i, b) in mac.iter_mut().enumerate() {
        *b = (v >> (8 * (5 - i))) as u8;
    }
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_masks() {
        assert_eq!(MatchField::VlanVid.full_mask(), 0x0fff);
        assert_eq!(MatchField::EthDst.full_mask(), 0xffff_ffff_ffff);
        assert_eq!(MatchField::Metadata.full_mask(), u64::MAX as u128);
        assert_eq!(MatchField::IpDscp.full_mask(), 0x3f);
    }

    #[test]
    fn test_settable_and_maskable() {
        assert!(!MatchField::InPort.settable());
        assert!(MatchField::Ipv4Dst.settable());
        assert!(MatchField::Ipv4Dst.maskable());
        assert!(!MatchField::TcpDst.maskable());
    }

    #[test]
    fn test_prerequisite_chain() {
        assert_eq!(MatchField::TcpDst.prerequisite(), Some((MatchField::IpProto, &[6u128][..])));
        assert_eq!(MatchField::IpProto.prerequisite().map(|(f, _)| f), Some(MatchField::EthType));
        assert_eq!(MatchField::EthType.prerequisite(), None);
        assert!(MatchField::VlanPcp.prerequisite().unwrap().1.is_empty());
    }

    #[test]
    fn test_mac_conversion() {
        let mac = [0x00, 0x1b, 0x21, 0x3a, 0x4f, 0xff];
        let v = mac_to_u128(mac);
        assert_eq!(v, 0x001b_213a_4fff);
        assert_eq!(u128_to_mac(v), mac);
    }

    #[test]
    fn test_oxm_numbers_unique() {
        let mut seen = std::collections::HashSet::new();
        for f in MatchField::ALL {
            assert!(seen.insert(f.oxm_field()));
        }
    }
}
