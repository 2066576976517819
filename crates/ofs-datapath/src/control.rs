//! Controller-facing messages
//!
//! Typed equivalents of the OpenFlow 1.3 messages the datapath consumes
//! (flow-mod, group-mod, meter-mod, packet-out, port-mod, set-config) and
//! the asynchronous events it produces (packet-in, flow-removed,
//! port-status, error). Wire encoding of the bodies is left to the transport.

use crate::action::{Action, Instruction};
use crate::buffer::OFP_NO_BUFFER;
use crate::flow_table::{FlowFilter, FlowModFlags, FlowSpec, RemovalReason};
use crate::group::{Bucket, GroupType, OFPG_ANY};
use crate::matching::Match;
use crate::meter::{MeterBand, MeterFlags};
use crate::port::{PortConfig, PortDesc, OFPP_ANY};
use bytes::Bytes;
use ofs_common::OfpError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Table id meaning "all tables" (delete and stats requests)
pub const OFPTT_ALL: u8 = 0xff;

/// Default bytes of a table-miss packet sent to the controller
pub const DEFAULT_MISS_SEND_LEN: u16 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowModCommand {
    Add,
    Modify,
    ModifyStrict,
    Delete,
    DeleteStrict,
}

/// Flow table modification
#[derive(Debug, Clone)]
pub struct FlowMod {
    pub command: FlowModCommand,
    pub table_id: u8,
    pub priority: u16,
    pub match_fields: Match,
    pub cookie: u64,
    /// Restricts modify/delete to entries whose cookie matches under this mask
    pub cookie_mask: u64,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub flags: FlowModFlags,
    /// Buffered packet to run through the new entry's table (add only)
    pub buffer_id: u32,
    /// Delete filter, `OFPP_ANY` for none
    pub out_port: u32,
    /// Delete filter, `OFPG_ANY` for none
    pub out_group: u32,
    pub instructions: Vec<Instruction>,
}

impl FlowMod {
    fn new(command: FlowModCommand, table_id: u8, priority: u16, match_fields: Match) -> Self {
        Self {
            command,
            table_id,
            priority,
            match_fields,
            cookie: 0,
            cookie_mask: 0,
            idle_timeout: 0,
            hard_timeout: 0,
            flags: FlowModFlags::empty(),
            buffer_id: OFP_NO_BUFFER,
            out_port: OFPP_ANY,
            out_group: OFPG_ANY,
            instructions: Vec::new(),
        }
    }

    pub fn add(table_id: u8, priority: u16, match_fields: Match) -> Self {
        Self::new(FlowModCommand::Add, table_id, priority, match_fields)
    }

    pub fn modify(table_id: u8, match_fields: Match) -> Self {
        Self::new(FlowModCommand::Modify, table_id, 0, match_fields)
    }

    pub fn modify_strict(table_id: u8, priority: u16, match_fields: Match) -> Self {
        Self::new(FlowModCommand::ModifyStrict, table_id, priority, match_fields)
    }

    pub fn delete(table_id: u8, match_fields: Match) -> Self {
        Self::new(FlowModCommand::Delete, table_id, 0, match_fields)
    }

    pub fn delete_strict(table_id: u8, priority: u16, match_fields: Match) -> Self {
        Self::new(FlowModCommand::DeleteStrict, table_id, priority, match_fields)
    }

    pub fn with_instructions(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Shorthand for a single apply-actions instruction
    pub fn apply(self, actions: Vec<Action>) -> Self {
        self.with_instructions(vec![Instruction::ApplyActions(actions)])
    }

    pub fn with_cookie(mut self, cookie: u64, cookie_mask: u64) -> Self {
        self.cookie = cookie;
        self.cookie_mask = cookie_mask;
        self
    }

    pub fn with_timeouts(mut self, idle: u16, hard: u16) -> Self {
        self.idle_timeout = idle;
        self.hard_timeout = hard;
        self
    }

    pub fn with_flags(mut self, flags: FlowModFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_buffer(mut self, buffer_id: u32) -> Self {
        self.buffer_id = buffer_id;
        self
    }

    pub fn with_out_port(mut self, port: u32) -> Self {
        self.out_port = port;
        self
    }

    pub fn with_out_group(mut self, group: u32) -> Self {
        self.out_group = group;
        self
    }

    pub fn is_strict(&self) -> bool {
        matches!(self.command, FlowModCommand::ModifyStrict | FlowModCommand::DeleteStrict)
    }

    pub(crate) fn to_spec(&self, instructions: Vec<Instruction>) -> FlowSpec {
        FlowSpec {
            priority: self.priority,
            match_fields: self.match_fields.clone(),
            cookie: self.cookie,
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            flags: self.flags,
            instructions,
        }
    }

    pub(crate) fn to_filter(&self) -> FlowFilter {
        FlowFilter {
            match_fields: self.match_fields.clone(),
            strict_priority: self.is_strict().then_some(self.priority),
            cookie: self.cookie,
            cookie_mask: self.cookie_mask,
            out_port: (self.out_port != OFPP_ANY).then_some(self.out_port),
            out_group: (self.out_group != OFPG_ANY).then_some(self.out_group),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupModCommand {
    Add,
    Modify,
    Delete,
}

/// Group table modification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMod {
    pub command: GroupModCommand,
    pub group_type: GroupType,
    pub group_id: u32,
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

impl GroupMod {
    pub fn add(group_id: u32, group_type: GroupType, buckets: Vec<Bucket>) -> Self {
        Self { command: GroupModCommand::Add, group_type, group_id, buckets }
    }

    pub fn modify(group_id: u32, group_type: GroupType, buckets: Vec<Bucket>) -> Self {
        Self { command: GroupModCommand::Modify, group_type, group_id, buckets }
    }

    pub fn delete(group_id: u32) -> Self {
        Self { command: GroupModCommand::Delete, group_type: GroupType::All, group_id, buckets: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterModCommand {
    Add,
    Modify,
    Delete,
}

/// Meter table modification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterMod {
    pub command: MeterModCommand,
    pub flags: MeterFlags,
    pub meter_id: u32,
    pub bands: Vec<MeterBand>,
}

impl MeterMod {
    pub fn add(meter_id: u32, flags: MeterFlags, bands: Vec<MeterBand>) -> Self {
        Self { command: MeterModCommand::Add, flags, meter_id, bands }
    }

    pub fn modify(meter_id: u32, flags: MeterFlags, bands: Vec<MeterBand>) -> Self {
        Self { command: MeterModCommand::Modify, flags, meter_id, bands }
    }

    pub fn delete(meter_id: u32) -> Self {
        Self { command: MeterModCommand::Delete, flags: MeterFlags::empty(), meter_id, bands: Vec::new() }
    }
}

/// Controller-injected packet
#[derive(Debug, Clone)]
pub struct PacketOut {
    /// Buffered packet to send, or `OFP_NO_BUFFER` with `data`
    pub buffer_id: u32,
    pub in_port: u32,
    pub actions: Vec<Action>,
    pub data: Option<Bytes>,
}

impl PacketOut {
    pub fn from_data(in_port: u32, data: Bytes, actions: Vec<Action>) -> Self {
        Self { buffer_id: OFP_NO_BUFFER, in_port, actions, data: Some(data) }
    }

    pub fn from_buffer(buffer_id: u32, in_port: u32, actions: Vec<Action>) -> Self {
        Self { buffer_id, in_port, actions, data: None }
    }
}

/// Port administrative change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMod {
    pub port_no: u32,
    pub hw_addr: [u8; 6],
    pub config: PortConfig,
    pub mask: PortConfig,
}

/// Runtime switch configuration (`OFPT_SET_CONFIG`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Bytes of a table-miss packet sent to the controller
    pub miss_send_len: u16,
    /// Send packets with an expired TTL to the controller
    pub invalid_ttl_to_controller: bool,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            miss_send_len: DEFAULT_MISS_SEND_LEN,
            invalid_ttl_to_controller: false,
        }
    }
}

/// Inbound controller message
#[derive(Debug, Clone)]
pub enum ControllerMessage {
    FlowMod(FlowMod),
    GroupMod(GroupMod),
    MeterMod(MeterMod),
    PacketOut(PacketOut),
    PortMod(PortMod),
    SetConfig(SwitchConfig),
}

impl ControllerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerMessage::FlowMod(_) => "flow_mod",
            ControllerMessage::GroupMod(_) => "group_mod",
            ControllerMessage::MeterMod(_) => "meter_mod",
            ControllerMessage::PacketOut(_) => "packet_out",
            ControllerMessage::PortMod(_) => "port_mod",
            ControllerMessage::SetConfig(_) => "set_config",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PacketInReason {
    NoMatch = 0,
    Action = 1,
    InvalidTtl = 2,
}

/// Packet sent to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub buffer_id: u32,
    /// Full frame length, even when `data` is truncated
    pub total_len: u16,
    pub reason: PacketInReason,
    pub table_id: u8,
    pub cookie: u64,
    pub in_port: u32,
    pub data: Bytes,
}

/// Entry removal notification
#[derive(Debug, Clone)]
pub struct FlowRemoved {
    pub cookie: u64,
    pub priority: u16,
    pub reason: RemovalReason,
    pub table_id: u8,
    pub duration: Duration,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
    pub match_fields: Match,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortReason {
    Add,
    Delete,
    Modify,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: PortDesc,
}

/// Error reply for a rejected request (`OFPT_ERROR`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorReport {
    pub error: OfpError,
    /// Kind of the request that failed
    pub request: &'static str,
}

impl ErrorReport {
    pub fn error_type(&self) -> u16 {
        self.error.error_type()
    }

    pub fn code(&self) -> u16 {
        self.error.code()
    }
}

/// Asynchronous event for the controller
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    PacketIn(PacketIn),
    FlowRemoved(FlowRemoved),
    PortStatus(PortStatus),
    Error(ErrorReport),
}

impl ControllerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerEvent::PacketIn(_) => "packet_in",
            ControllerEvent::FlowRemoved(_) => "flow_removed",
            ControllerEvent::PortStatus(_) => "port_status",
            ControllerEvent::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofs_common::MatchField;

    #[test]
    fn test_flow_mod_filter() {
        let fm = FlowMod::delete_strict(0, 10, Match::any().exact(MatchField::TcpDst, 80))
            .with_cookie(0x10, 0xf0)
            .with_out_port(3);
        let f = fm.to_filter();
        assert_eq!(f.strict_priority, Some(10));
        assert_eq!(f.out_port, Some(3));
        assert_eq!(f.out_group, None);
        assert_eq!(f.cookie_mask, 0xf0);

        let f = FlowMod::delete(0, Match::any()).to_filter();
        assert_eq!(f.strict_priority, None);
        assert_eq!(f.out_port, None);
    }

    #[test]
    fn test_switch_config_default() {
        let c = SwitchConfig::default();
        assert_eq!(c.miss_send_len, 128);
        assert!(!c.invalid_ttl_to_controller);
    }
}
