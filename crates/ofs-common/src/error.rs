//! OpenFlow 1.3 error types reported back to the controller
//!
//! Every rejected controller command maps onto one `OfpError`, which
//! carries the wire `type`/`code` pair of an `OFPT_ERROR` message.

use thiserror::Error;

/// `OFPET_BAD_REQUEST` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BadRequestCode {
    /// Specified buffer has already been used
    BufferEmpty = 7,
    /// Specified buffer does not exist
    BufferUnknown = 8,
    /// Specified table-id invalid or does not exist
    BadTableId = 9,
    /// Invalid port
    BadPort = 11,
    /// Invalid packet in packet-out
    BadPacket = 12,
}

/// `OFPET_BAD_ACTION` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BadActionCode {
    /// Problem validating output port
    BadOutPort = 4,
    /// Bad action argument
    BadArgument = 5,
    /// Problem validating output queue
    BadQueue = 8,
    /// Invalid group id in forward action
    BadOutGroup = 9,
    /// Action can't apply for this match, or set-field missing prerequisite
    MatchInconsistent = 10,
    /// Unsupported type in set-field action
    BadSetType = 13,
    /// Bad argument in set-field action
    BadSetArgument = 15,
}

/// `OFPET_BAD_INSTRUCTION` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BadInstructionCode {
    /// Switch or table does not support the instruction
    UnsupportedInstruction = 1,
    /// Invalid table id specified
    BadTableId = 2,
}

/// `OFPET_BAD_MATCH` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BadMatchCode {
    /// Unsupported field in the match
    BadField = 6,
    /// Unsupported value in a match field
    BadValue = 7,
    /// Unsupported mask specified in the match
    BadMask = 8,
    /// A prerequisite was not met
    BadPrereq = 9,
    /// A field type was duplicated
    DupField = 10,
}

/// `OFPET_FLOW_MOD_FAILED` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FlowModFailedCode {
    /// Flow not added because table was full
    TableFull = 1,
    /// Table does not exist
    BadTableId = 2,
    /// Attempted to add overlapping flow with CHECK_OVERLAP flag set
    Overlap = 3,
    /// Unsupported or unknown command
    BadCommand = 6,
}

/// `OFPET_GROUP_MOD_FAILED` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum GroupModFailedCode {
    /// Group not added because a group ADD attempted to replace an existing group
    GroupExists = 0,
    /// Group not added because the group specified is invalid
    InvalidGroup = 1,
    /// The group table is full
    OutOfGroups = 3,
    /// The maximum number of action buckets for a group has been exceeded
    OutOfBuckets = 4,
    /// Group entry would cause a loop
    Loop = 7,
    /// Group not modified because the group does not exist
    UnknownGroup = 8,
    /// Group not deleted because another group is forwarding to it
    ChainedGroup = 9,
    /// Invalid bucket (e.g. zero weight in a select group)
    BadBucket = 12,
    /// Error in watch port/group
    BadWatch = 13,
}

/// `OFPET_PORT_MOD_FAILED` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PortModFailedCode {
    /// Specified port number does not exist
    BadPort = 0,
    /// Specified hardware address does not match the port number
    BadHwAddr = 1,
    /// Specified config is invalid
    BadConfig = 2,
}

/// `OFPET_METER_MOD_FAILED` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MeterModFailedCode {
    /// Meter not added because a meter ADD attempted to replace an existing meter
    MeterExists = 1,
    /// Meter not added because the meter specified is invalid
    InvalidMeter = 2,
    /// Meter not modified because the meter does not exist
    UnknownMeter = 3,
    /// Flag configuration unsupported
    BadFlags = 5,
    /// Rate unsupported
    BadRate = 6,
    /// Burst size unsupported
    BadBurst = 7,
    /// Band unsupported
    BadBand = 8,
    /// No more meters available
    OutOfMeters = 10,
    /// The maximum number of bands for a meter has been exceeded
    OutOfBands = 11,
}

/// OpenFlow error reply (`OFPT_ERROR` type/code)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfpError {
    /// Request was not understood
    #[error("bad request: {0:?}")]
    BadRequest(BadRequestCode),

    /// Error in action description
    #[error("bad action: {0:?}")]
    BadAction(BadActionCode),

    /// Error in instruction list
    #[error("bad instruction: {0:?}")]
    BadInstruction(BadInstructionCode),

    /// Error in match
    #[error("bad match: {0:?}")]
    BadMatch(BadMatchCode),

    /// Problem modifying flow entry
    #[error("flow mod failed: {0:?}")]
    FlowModFailed(FlowModFailedCode),

    /// Problem modifying group entry
    #[error("group mod failed: {0:?}")]
    GroupModFailed(GroupModFailedCode),

    /// Port mod request failed
    #[error("port mod failed: {0:?}")]
    PortModFailed(PortModFailedCode),

    /// Error in meter
    #[error("meter mod failed: {0:?}")]
    MeterModFailed(MeterModFailedCode),
}

impl OfpError {
    /// Wire value of `ofp_error_type`
    pub fn error_type(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 1,
            Self::BadAction(_) => 2,
            Self::BadInstruction(_) => 3,
            Self::BadMatch(_) => 4,
            Self::FlowModFailed(_) => 5,
            Self::GroupModFailed(_) => 6,
            Self::PortModFailed(_) => 7,
            Self::MeterModFailed(_) => 12,
        }
    }

    /// Wire value of the type-specific error code
    pub fn code(&self) -> u16 {
        match *self {
            Self::BadRequest(c) => c as u16,
            Self::BadAction(c) => c as u16,
            Self::BadInstruction(c) => c as u16,
            Self::BadMatch(c) => c as u16,
            Self::FlowModFailed(c) => c as u16,
            Self::GroupModFailed(c) => c as u16,
            Self::PortModFailed(c) => c as u16,
            Self::MeterModFailed(c) => c as u16,
        }
    }
}

/// Result type for controller-originated commands
pub type OfpResult<T> = Result<T, OfpError>;
