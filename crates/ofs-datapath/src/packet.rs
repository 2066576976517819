//! Packet model
//!
//! Ethernet → 802.1Q → IPv4 → TCP/UDP/ICMPv4 header extraction, plus the
//! in-place rewrites the action executor needs (set-field, VLAN push/pop,
//! TTL decrement). Checksums are patched incrementally (RFC 1624) so a
//! rewrite never touches the payload.

use bytes::{Bytes, BytesMut};
use ofs_common::fields::{mac_to_u128, u128_to_mac};
use ofs_common::{FlowKey, MatchField};
use thiserror::Error;

/// IPv4 ethertype
pub const ETH_TYPE_IPV4: u16 = 0x0800;
/// ARP ethertype
pub const ETH_TYPE_ARP: u16 = 0x0806;
/// 802.1Q customer VLAN TPID
pub const ETH_TYPE_VLAN: u16 = 0x8100;
/// 802.1ad service VLAN TPID
pub const ETH_TYPE_QINQ: u16 = 0x88a8;

/// ICMP protocol number
pub const IP_PROTO_ICMP: u8 = 1;
/// TCP protocol number
pub const IP_PROTO_TCP: u8 = 6;
/// UDP protocol number
pub const IP_PROTO_UDP: u8 = 17;

const ETH_HLEN: usize = 14;
const VLAN_HLEN: usize = 4;
const IPV4_MIN_HLEN: usize = 20;

/// Packet parse / rewrite errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("frame truncated: need {needed} bytes, have {len}")]
    Truncated { needed: usize, len: usize },

    #[error("malformed IPv4 header")]
    BadIpv4Header,

    #[error("header for {0:?} not present in packet")]
    MissingHeader(MatchField),

    #[error("field {0:?} cannot be rewritten")]
    NotSettable(MatchField),

    #[error("value {value:#x} does not fit field {field:?}")]
    ValueOutOfRange { field: MatchField, value: u128 },

    #[error("packet has no VLAN tag")]
    NoVlanTag,

    #[error("packet already carries a VLAN tag")]
    VlanTagPresent,

    #[error("invalid VLAN ethertype {0:#06x}")]
    BadVlanEthertype(u16),

    #[error("IP TTL expired")]
    TtlExpired,
}

/// 802.1Q tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VlanTag {
    pub tpid: u16,
    pub vid: u16,
    pub pcp: u8,
}

/// IPv4 header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub dscp: u8,
    pub ecn: u8,
    pub ttl: u8,
    pub proto: u8,
    pub src: u32,
    pub dst: u32,
}

/// Transport header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Header {
    Tcp { src: u16, dst: u16 },
    Udp { src: u16, dst: u16 },
    Icmp { icmp_type: u8, code: u8 },
}

/// Parsed header fields and their offsets in the frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    pub eth_dst: [u8; 6],
    pub eth_src: [u8; 6],
    /// Ethertype after any VLAN tag
    pub eth_type: u16,
    pub vlan: Option<VlanTag>,
    pub ipv4: Option<Ipv4Header>,
    pub l4: Option<L4Header>,
    l3_offset: usize,
    l4_offset: usize,
}

#[inline(always)]
fn be16(data: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([data[off], data[off + 1]])
}

#[inline(always)]
fn be32(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

#[inline(always)]
fn need(data: &[u8], needed: usize) -> Result<(), PacketError> {
    if data.len() < needed {
        return Err(PacketError::Truncated { needed, len: data.len() });
    }
    Ok(())
}

impl HeaderFields {
    /// Parse a raw Ethernet frame
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        need(data, ETH_HLEN)?;

        let mut h = HeaderFields::default();
        h.eth_dst.copy_from_slice(&data[0..6]);
        h.eth_src.copy_from_slice(&data[6..12]);

        let mut eth_type = be16(data, 12);
        let mut l3 = ETH_HLEN;
        if eth_type == ETH_TYPE_VLAN || eth_type == ETH_TYPE_QINQ {
            need(data, ETH_HLEN + VLAN_HLEN)?;
            let tci = be16(data, 14);
            h.vlan = Some(VlanTag {
                tpid: eth_type,
                vid: tci & 0x0fff,
                pcp: (tci >> 13) as u8,
            });
            eth_type = be16(data, 16);
            l3 += VLAN_HLEN;
        }
        h.eth_type = eth_type;
        h.l3_offset = l3;

        if eth_type != ETH_TYPE_IPV4 {
            return Ok(h);
        }

        need(data, l3 + IPV4_MIN_HLEN)?;
        let ver_ihl = data[l3];
        let ihl = ((ver_ihl & 0x0f) as usize) * 4;
        if ver_ihl >> 4 != 4 || ihl < IPV4_MIN_HLEN {
            return Err(PacketError::BadIpv4Header);
        }
        need(data, l3 + ihl)?;

        let tos = data[l3 + 1];
        let proto = data[l3 + 9];
        h.ipv4 = Some(Ipv4Header {
            dscp: tos >> 2,
            ecn: tos & 0x03,
            ttl: data[l3 + 8],
            proto,
            src: be32(data, l3 + 12),
            dst: be32(data, l3 + 16),
        });

        let l4 = l3 + ihl;
        h.l4_offset = l4;

        // Non-first fragments carry no transport header
        let frag_offset = be16(data, l3 + 6) & 0x1fff;
        if frag_offset != 0 {
            return Ok(h);
        }

        h.l4 = match proto {
            IP_PROTO_TCP if data.len() >= l4 + 4 => Some(L4Header::Tcp {
                src: be16(data, l4),
                dst: be16(data, l4 + 2),
            }),
            IP_PROTO_UDP if data.len() >= l4 + 4 => Some(L4Header::Udp {
                src: be16(data, l4),
                dst: be16(data, l4 + 2),
            }),
            IP_PROTO_ICMP if data.len() >= l4 + 2 => Some(L4Header::Icmp {
                icmp_type: data[l4],
                code: data[l4 + 1],
            }),
            _ => None,
        };

        Ok(h)
    }

    /// Value of a header field, `None` when the packet lacks that header
    ///
    /// `InPort` and `Metadata` are pipeline state, not header fields.
    pub fn get(&self, field: MatchField) -> Option<u128> {
        match field {
            MatchField::InPort | MatchField::Metadata => None,
            MatchField::EthDst => Some(mac_to_u128(self.eth_dst)),
            MatchField::EthSrc => Some(mac_to_u128(self.eth_src)),
            MatchField::EthType => Some(self.eth_type as u128),
            MatchField::VlanVid => self.vlan.map(|v| v.vid as u128),
            MatchField::VlanPcp => self.vlan.map(|v| v.pcp as u128),
            MatchField::IpDscp => self.ipv4.map(|ip| ip.dscp as u128),
            MatchField::IpEcn => self.ipv4.map(|ip| ip.ecn as u128),
            MatchField::IpProto => self.ipv4.map(|ip| ip.proto as u128),
            MatchField::Ipv4Src => self.ipv4.map(|ip| ip.src as u128),
            MatchField::Ipv4Dst => self.ipv4.map(|ip| ip.dst as u128),
            MatchField::TcpSrc => match self.l4 {
                Some(L4Header::Tcp { src, .. }) => Some(src as u128),
                _ => None,
            },
            MatchField::TcpDst => match self.l4 {
                Some(L4Header::Tcp { dst, .. }) => Some(dst as u128),
                _ => None,
            },
            MatchField::UdpSrc => match self.l4 {
                Some(L4Header::Udp { src, .. }) => Some(src as u128),
                _ => None,
            },
            MatchField::UdpDst => match self.l4 {
                Some(L4Header::Udp { dst, .. }) => Some(dst as u128),
                _ => None,
            },
            MatchField::Icmpv4Type => match self.l4 {
                Some(L4Header::Icmp { icmp_type, .. }) => Some(icmp_type as u128),
                _ => None,
            },
            MatchField::Icmpv4Code => match self.l4 {
                Some(L4Header::Icmp { code, .. }) => Some(code as u128),
                _ => None,
            },
        }
    }
}

/// Fold a ones' complement accumulator into 16 bits
#[inline(always)]
fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Incrementally update the checksum at `csum_off` after the 16-bit words
/// `old` were replaced by `new` (RFC 1624, eqn. 3)
fn csum_replace(data: &mut [u8], csum_off: usize, old: &[u8], new: &[u8]) {
    let hc = be16(data, csum_off);
    let mut sum = (!hc) as u32;
    for w in old.chunks(2) {
        sum += (!u16::from_be_bytes([w[0], w[1]])) as u32;
    }
    for w in new.chunks(2) {
        sum += u16::from_be_bytes([w[0], w[1]]) as u32;
    }
    let csum = !fold(sum);
    data[csum_off..csum_off + 2].copy_from_slice(&csum.to_be_bytes());
}

/// Full internet checksum over `data`
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for w in &mut chunks {
        sum += u16::from_be_bytes([w[0], w[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    !fold(sum)
}

/// A packet travelling through the datapath
#[derive(Debug, Clone)]
pub struct Packet {
    data: BytesMut,
    headers: HeaderFields,
}

impl Packet {
    /// Parse a frame, copying it into an owned buffer
    pub fn from_slice(frame: &[u8]) -> Result<Self, PacketError> {
        Self::from_bytes(BytesMut::from(frame))
    }

    /// Parse an owned frame
    pub fn from_bytes(data: BytesMut) -> Result<Self, PacketError> {
        let headers = HeaderFields::parse(&data)?;
        Ok(Self { data, headers })
    }

    #[inline]
    pub fn headers(&self) -> &HeaderFields {
        &self.headers
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Immutable copy of the frame for transmission
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    /// Consume into the frame bytes
    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }

    /// Flow identifier used for select-group hashing
    pub fn flow_key(&self) -> FlowKey {
        let h = &self.headers;
        match h.ipv4 {
            Some(ip) => {
                let (sp, dp) = match h.l4 {
                    Some(L4Header::Tcp { src, dst }) | Some(L4Header::Udp { src, dst }) => (src, dst),
                    Some(L4Header::Icmp { icmp_type, code }) => (icmp_type as u16, code as u16),
                    None => (0, 0),
                };
                FlowKey::from_v4(ip.src, ip.dst, sp, dp, ip.proto)
            }
            None => FlowKey::from_l2(mac_to_u128(h.eth_src), mac_to_u128(h.eth_dst), h.eth_type),
        }
    }

    fn reparse(&mut self) -> Result<(), PacketError> {
        self.headers = HeaderFields::parse(&self.data)?;
        Ok(())
    }

    /// Overwrite `bytes` at `off`, patching every checksum in `csums`
    ///
    /// Header starts are all even offsets, so the covering 16-bit words are
    /// aligned the same way the checksums see them.
    fn rewrite(&mut self, off: usize, bytes: &[u8], csums: &[usize]) {
        let start = off & !1;
        let end = (off + bytes.len() + 1) & !1;
        let old: Vec<u8> = self.data[start..end].to_vec();
        self.data[off..off + bytes.len()].copy_from_slice(bytes);
        let new: Vec<u8> = self.data[start..end].to_vec();
        for &c in csums {
            csum_replace(&mut self.data, c, &old, &new);
        }
    }

    fn ip_csum(&self) -> usize {
        self.headers.l3_offset + 10
    }

    /// Offset of the transport checksum covering the IPv4 pseudo-header
    fn l4_pseudo_csum(&self) -> Option<usize> {
        let l4 = self.headers.l4_offset;
        match self.headers.l4 {
            Some(L4Header::Tcp { .. }) if self.data.len() >= l4 + 18 => Some(l4 + 16),
            // A zero UDP checksum means none was computed
            Some(L4Header::Udp { .. }) if self.data.len() >= l4 + 8 && be16(&self.data, l4 + 6) != 0 => {
                Some(l4 + 6)
            }
            _ => None,
        }
    }

    /// Rewrite one header field
    pub fn set_field(&mut self, field: MatchField, value: u128) -> Result<(), PacketError> {
        if !field.settable() {
            return Err(PacketError::NotSettable(field));
        }
        if value & !field.full_mask() != 0 {
            return Err(PacketError::ValueOutOfRange { field, value });
        }
        let missing = PacketError::MissingHeader(field);

        match field {
            MatchField::EthDst => {
                self.data[0..6].copy_from_slice(&u128_to_mac(value));
                self.headers.eth_dst = u128_to_mac(value);
            }
            MatchField::EthSrc => {
                self.data[6..12].copy_from_slice(&u128_to_mac(value));
                self.headers.eth_src = u128_to_mac(value);
            }
            MatchField::EthType => {
                let off = self.headers.l3_offset - 2;
                let prev = [self.data[off], self.data[off + 1]];
                self.data[off..off + 2].copy_from_slice(&(value as u16).to_be_bytes());
                // A type the payload cannot back leaves the frame as it was
                if let Err(e) = self.reparse() {
                    self.data[off..off + 2].copy_from_slice(&prev);
                    return Err(e);
                }
            }
            MatchField::VlanVid | MatchField::VlanPcp => {
                if self.headers.vlan.is_none() {
                    return Err(missing);
                }
                let mut tci = be16(&self.data, 14);
                if field == MatchField::VlanVid {
                    tci = (tci & 0xf000) | value as u16;
                } else {
                    tci = (tci & 0x1fff) | ((value as u16) << 13);
                }
                self.data[14..16].copy_from_slice(&tci.to_be_bytes());
                self.reparse()?;
            }
            MatchField::IpDscp | MatchField::IpEcn => {
                let ip = self.headers.ipv4.ok_or(missing)?;
                let tos = if field == MatchField::IpDscp {
                    ((value as u8) << 2) | ip.ecn
                } else {
                    (ip.dscp << 2) | value as u8
                };
                let csum = self.ip_csum();
                self.rewrite(self.headers.l3_offset + 1, &[tos], &[csum]);
                self.reparse()?;
            }
            MatchField::IpProto => {
                self.headers.ipv4.ok_or(missing)?;
                let csum = self.ip_csum();
                self.rewrite(self.headers.l3_offset + 9, &[value as u8], &[csum]);
                self.reparse()?;
            }
            MatchField::Ipv4Src | MatchField::Ipv4Dst => {
                self.headers.ipv4.ok_or(missing)?;
                let off = self.headers.l3_offset + if field == MatchField::Ipv4Src { 12 } else { 16 };
                let mut csums = vec![self.ip_csum()];
                csums.extend(self.l4_pseudo_csum());
                self.rewrite(off, &(value as u32).to_be_bytes(), &csums);
                self.reparse()?;
            }
            MatchField::TcpSrc | MatchField::TcpDst => {
                if !matches!(self.headers.l4, Some(L4Header::Tcp { .. })) {
                    return Err(missing);
                }
                let l4 = self.headers.l4_offset;
                let off = if field == MatchField::TcpSrc { l4 } else { l4 + 2 };
                let csums: Vec<usize> = self.l4_pseudo_csum().into_iter().collect();
                self.rewrite(off, &(value as u16).to_be_bytes(), &csums);
                self.reparse()?;
            }
            MatchField::UdpSrc | MatchField::UdpDst => {
                if !matches!(self.headers.l4, Some(L4Header::Udp { .. })) {
                    return Err(missing);
                }
                let l4 = self.headers.l4_offset;
                let off = if field == MatchField::UdpSrc { l4 } else { l4 + 2 };
                let csums: Vec<usize> = self.l4_pseudo_csum().into_iter().collect();
                self.rewrite(off, &(value as u16).to_be_bytes(), &csums);
                if let Some(c) = csums.first() {
                    // 0 is reserved for "no checksum"
                    if be16(&self.data, *c) == 0 {
                        self.data[*c..*c + 2].copy_from_slice(&0xffffu16.to_be_bytes());
                    }
                }
                self.reparse()?;
            }
            MatchField::Icmpv4Type | MatchField::Icmpv4Code => {
                if !matches!(self.headers.l4, Some(L4Header::Icmp { .. })) {
                    return Err(missing);
                }
                let l4 = self.headers.l4_offset;
                let off = if field == MatchField::Icmpv4Type { l4 } else { l4 + 1 };
                let csums: Vec<usize> = if self.data.len() >= l4 + 4 { vec![l4 + 2] } else { vec![] };
                self.rewrite(off, &[value as u8], &csums);
                self.reparse()?;
            }
            MatchField::InPort | MatchField::Metadata => return Err(PacketError::NotSettable(field)),
        }
        Ok(())
    }

    /// Insert a new outermost VLAN tag
    ///
    /// Only single-tagged frames are modelled; pushing onto a tagged frame
    /// is rejected.
    pub fn push_vlan(&mut self, tpid: u16) -> Result<(), PacketError> {
        if tpid != ETH_TYPE_VLAN && tpid != ETH_TYPE_QINQ {
            return Err(PacketError::BadVlanEthertype(tpid));
        }
        if self.headers.vlan.is_some() {
            return Err(PacketError::VlanTagPresent);
        }
        let mut out = BytesMut::with_capacity(self.data.len() + VLAN_HLEN);
        out.extend_from_slice(&self.data[..12]);
        out.extend_from_slice(&tpid.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.data[12..]);
        self.data = out;
        self.reparse()
    }

    /// Strip the outermost VLAN tag
    pub fn pop_vlan(&mut self) -> Result<(), PacketError> {
        if self.headers.vlan.is_none() {
            return Err(PacketError::NoVlanTag);
        }
        let mut out = BytesMut::with_capacity(self.data.len() - VLAN_HLEN);
        out.extend_from_slice(&self.data[..12]);
        out.extend_from_slice(&self.data[12 + VLAN_HLEN..]);
        self.data = out;
        self.reparse()
    }

    /// Decrement the IPv4 TTL, returning the new value
    ///
    /// A TTL of 0 or 1 cannot be forwarded and yields `TtlExpired`; the
    /// frame is left untouched in that case.
    pub fn decrement_ttl(&mut self) -> Result<u8, PacketError> {
        let ip = self.headers.ipv4.ok_or(PacketError::MissingHeader(MatchField::IpProto))?;
        if ip.ttl <= 1 {
            return Err(PacketError::TtlExpired);
        }
        let ttl = ip.ttl - 1;
        let csum = self.ip_csum();
        self.rewrite(self.headers.l3_offset + 8, &[ttl], &[csum]);
        if let Some(ip) = self.headers.ipv4.as_mut() {
            ip.ttl = ttl;
        }
        Ok(ttl)
    }
}

// ============================================================================
// Frame builders
// ============================================================================

/// Builder for test and packet-out frames
///
/// Produces a well-formed Ethernet/IPv4/L4 frame with valid checksums.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    eth_dst: [u8; 6],
    eth_src: [u8; 6],
    vlan: Option<(u16, u8)>,
    ip: Option<(u32, u32, u8, u8)>,
    l4: Option<L4Header>,
    payload: Vec<u8>,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self {
            eth_dst: [0x00, 0x00, 0x00, 0x00, 0x00, 0x02],
            eth_src: [0x00, 0x00, 0x00, 0x00, 0x00, 0x01],
            vlan: None,
            ip: None,
            l4: None,
            payload: Vec::new(),
        }
    }
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eth(mut self, src: [u8; 6], dst: [u8; 6]) -> Self {
        self.eth_src = src;
        self.eth_dst = dst;
        self
    }

    pub fn vlan(mut self, vid: u16, pcp: u8) -> Self {
        self.vlan = Some((vid & 0x0fff, pcp & 0x07));
        self
    }

    /// IPv4 header with the given addresses, TTL and DSCP
    pub fn ipv4(mut self, src: u32, dst: u32, ttl: u8, dscp: u8) -> Self {
        self.ip = Some((src, dst, ttl, dscp));
        self
    }

    pub fn tcp(mut self, src: u16, dst: u16) -> Self {
        self.l4 = Some(L4Header::Tcp { src, dst });
        self
    }

    pub fn udp(mut self, src: u16, dst: u16) -> Self {
        self.l4 = Some(L4Header::Udp { src, dst });
        self
    }

    pub fn icmp(mut self, icmp_type: u8, code: u8) -> Self {
        self.l4 = Some(L4Header::Icmp { icmp_type, code });
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    fn l4_bytes(&self, src_ip: u32, dst_ip: u32) -> (u8, Vec<u8>) {
        let (proto, mut seg) = match self.l4 {
            Some(L4Header::Tcp { src, dst }) => {
                let mut seg = vec![0u8; 20];
                seg[0..2].copy_from_slice(&src.to_be_bytes());
                seg[2..4].copy_from_slice(&dst.to_be_bytes());
                seg[12] = 5 << 4;
                seg[13] = 0x02;
                seg[14..16].copy_from_slice(&0xffffu16.to_be_bytes());
                (IP_PROTO_TCP, seg)
            }
            Some(L4Header::Udp { src, dst }) => {
                let mut seg = vec![0u8; 8];
                seg[0..2].copy_from_slice(&src.to_be_bytes());
                seg[2..4].copy_from_slice(&dst.to_be_bytes());
                let len = (8 + self.payload.len()) as u16;
                seg[4..6].copy_from_slice(&len.to_be_bytes());
                (IP_PROTO_UDP, seg)
            }
            Some(L4Header::Icmp { icmp_type, code }) => (IP_PROTO_ICMP, vec![icmp_type, code, 0, 0, 0, 0, 0, 0]),
            None => (0xfd, Vec::new()),
        };
        seg.extend_from_slice(&self.payload);

        match self.l4 {
            Some(L4Header::Tcp { .. }) | Some(L4Header::Udp { .. }) => {
                let mut pseudo = Vec::with_capacity(12 + seg.len());
                pseudo.extend_from_slice(&src_ip.to_be_bytes());
                pseudo.extend_from_slice(&dst_ip.to_be_bytes());
                pseudo.push(0);
                pseudo.push(proto);
                pseudo.extend_from_slice(&(seg.len() as u16).to_be_bytes());
                pseudo.extend_from_slice(&seg);
                let mut csum = internet_checksum(&pseudo);
                let off = if proto == IP_PROTO_TCP { 16 } else { 6 };
                if proto == IP_PROTO_UDP && csum == 0 {
                    csum = 0xffff;
                }
                seg[off..off + 2].copy_from_slice(&csum.to_be_bytes());
            }
            Some(L4Header::Icmp { .. }) => {
                let csum = internet_checksum(&seg);
                seg[2..4].copy_from_slice(&csum.to_be_bytes());
            }
            None => {}
        }
        (proto, seg)
    }

    /// Serialise the frame
    pub fn build(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(64 + self.payload.len());
        frame.extend_from_slice(&self.eth_dst);
        frame.extend_from_slice(&self.eth_src);
        if let Some((vid, pcp)) = self.vlan {
            frame.extend_from_slice(&ETH_TYPE_VLAN.to_be_bytes());
            frame.extend_from_slice(&(((pcp as u16) << 13) | vid).to_be_bytes());
        }

        let Some((src, dst, ttl, dscp)) = self.ip else {
            frame.extend_from_slice(&ETH_TYPE_ARP.to_be_bytes());
            frame.extend_from_slice(&self.payload);
            return frame;
        };

        frame.extend_from_slice(&ETH_TYPE_IPV4.to_be_bytes());
        let (proto, seg) = self.l4_bytes(src, dst);
        let mut ip = [0u8; IPV4_MIN_HLEN];
        ip[0] = 0x45;
        ip[1] = dscp << 2;
        ip[2..4].copy_from_slice(&((IPV4_MIN_HLEN + seg.len()) as u16).to_be_bytes());
        ip[8] = ttl;
        ip[9] = proto;
        ip[12..16].copy_from_slice(&src.to_be_bytes());
        ip[16..20].copy_from_slice(&dst.to_be_bytes());
        let csum = internet_checksum(&ip);
        ip[10..12].copy_from_slice(&csum.to_be_bytes());
        frame.extend_from_slice(&ip);
        frame.extend_from_slice(&seg);
        frame
    }
}
