//! Controller channel framing
//!
//! Splits a byte stream into whole OpenFlow messages using the common
//! 8-byte header. Bytes may arrive in arbitrary fragments; a message is
//! yielded only once all `length` bytes are present.
//!
//! This is a standalone utility for the transport in front of a
//! [`Datapath`](crate::Datapath). The datapath itself only takes typed
//! [`ControllerMessage`](crate::ControllerMessage)s, so body decoding stays
//! with the transport.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// OpenFlow 1.3 wire version
pub const OFP_VERSION: u8 = 0x04;
/// Size of `ofp_header`
pub const OFP_HEADER_LEN: usize = 8;

/// Message types the datapath understands (`ofp_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OfpType {
    Hello = 0,
    Error = 1,
    EchoRequest = 2,
    EchoReply = 3,
    FeaturesRequest = 5,
    FeaturesReply = 6,
    GetConfigRequest = 7,
    GetConfigReply = 8,
    SetConfig = 9,
    PacketIn = 10,
    FlowRemoved = 11,
    PortStatus = 12,
    PacketOut = 13,
    FlowMod = 14,
    GroupMod = 15,
    PortMod = 16,
    MultipartRequest = 18,
    MultipartReply = 19,
    BarrierRequest = 20,
    BarrierReply = 21,
    MeterMod = 29,
}

impl TryFrom<u8> for OfpType {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        use OfpType::*;
        Ok(match v {
            0 => Hello,
            1 => Error,
            2 => EchoRequest,
            3 => EchoReply,
            5 => FeaturesRequest,
            6 => FeaturesReply,
            7 => GetConfigRequest,
            8 => GetConfigReply,
            9 => SetConfig,
            10 => PacketIn,
            11 => FlowRemoved,
            12 => PortStatus,
            13 => PacketOut,
            14 => FlowMod,
            15 => GroupMod,
            16 => PortMod,
            18 => MultipartRequest,
            19 => MultipartReply,
            20 => BarrierRequest,
            21 => BarrierReply,
            29 => MeterMod,
            other => return Err(other),
        })
    }
}

/// Common message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfpHeader {
    pub version: u8,
    pub msg_type: u8,
    pub length: u16,
    pub xid: u32,
}

impl OfpHeader {
    pub fn new(msg_type: OfpType, length: u16, xid: u32) -> Self {
        Self { version: OFP_VERSION, msg_type: msg_type as u8, length, xid }
    }

    /// Decode from the first 8 bytes of `buf`
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < OFP_HEADER_LEN {
            return None;
        }
        Some(Self {
            version: buf[0],
            msg_type: buf[1],
            length: u16::from_be_bytes([buf[2], buf[3]]),
            xid: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    pub fn encode(&self) -> [u8; OFP_HEADER_LEN] {
        let mut out = [0u8; OFP_HEADER_LEN];
        out[0] = self.version;
        out[1] = self.msg_type;
        out[2..4].copy_from_slice(&self.length.to_be_bytes());
        out[4..8].copy_from_slice(&self.xid.to_be_bytes());
        out
    }

    pub fn kind(&self) -> Option<OfpType> {
        OfpType::try_from(self.msg_type).ok()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("message length {0} shorter than header")]
    BadLength(u16),
}

/// Incremental message reader
#[derive(Debug, Default)]
pub struct MessageReader {
    pending: BytesMut,
}

impl MessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Next complete message (header included), if one is buffered
    ///
    /// A header announcing fewer than 8 bytes poisons the stream: the
    /// caller is expected to drop the connection.
    pub fn next_message(&mut self) -> Result<Option<(OfpHeader, Bytes)>, FramingError> {
        let Some(header) = OfpHeader::decode(&self.pending) else {
            return Ok(None);
        };
        let len = header.length as usize;
        if len < OFP_HEADER_LEN {
            return Err(FramingError::BadLength(header.length));
        }
        if self.pending.len() < len {
            return Ok(None);
        }
        let msg = self.pending.split_to(len).freeze();
        Ok(Some((header, msg)))
    }

    /// Drain every complete message
    pub fn drain(&mut self) -> Result<Vec<(OfpHeader, Bytes)>, FramingError> {
        let mut out = Vec::new();
        while let Some(m) = self.next_message()? {
            out.push(m);
        }
        Ok(out)
    }

    /// Discard buffered bytes
    pub fn reset(&mut self) {
        self.pending.advance(self.pending.len());
    }
}
