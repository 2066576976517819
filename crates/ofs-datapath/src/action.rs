//! Actions, instructions and the per-packet action set

use crate::packet::{PacketError, ETH_TYPE_QINQ, ETH_TYPE_VLAN};
use crate::port::{OFPP_ANY, OFPP_CONTROLLER, OFPP_IN_PORT, OFPP_MAX, OFPP_TABLE};
use ofs_common::{BadActionCode, BadInstructionCode, MatchField, OfpError, OfpResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// `max_len` meaning "send the whole packet, do not buffer"
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

/// Packet action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Forward to a port; `max_len` bytes reach the controller for `CONTROLLER`
    Output { port: u32, max_len: u16 },
    /// Process through a group
    Group(u32),
    /// Select the egress queue
    SetQueue(u32),
    /// Rewrite a header field
    SetField { field: MatchField, value: u128 },
    /// Push a VLAN tag with the given TPID
    PushVlan(u16),
    /// Pop the outer VLAN tag
    PopVlan,
    /// Decrement IPv4 TTL
    DecNwTtl,
}

impl Action {
    /// Shorthand for `Output { port, max_len: OFPCML_NO_BUFFER }`
    pub fn output(port: u32) -> Self {
        Action::Output { port, max_len: OFPCML_NO_BUFFER }
    }

    /// Shorthand for a controller output truncated to `max_len`
    pub fn to_controller(max_len: u16) -> Self {
        Action::Output { port: OFPP_CONTROLLER, max_len }
    }

    pub fn set_field(field: MatchField, value: u128) -> Self {
        Action::SetField { field, value }
    }

    /// Static argument checks (references are checked by the pipeline)
    pub fn validate(&self) -> OfpResult<()> {
        match *self {
            Action::Output { port, .. } => {
                if port == 0 || port == OFPP_ANY || (port > OFPP_MAX && port < OFPP_IN_PORT) {
                    return Err(OfpError::BadAction(BadActionCode::BadOutPort));
                }
            }
            Action::SetField { field, value } => {
                if !field.settable() {
                    return Err(OfpError::BadAction(BadActionCode::BadSetType));
                }
                if value & !field.full_mask() != 0 {
                    return Err(OfpError::BadAction(BadActionCode::BadSetArgument));
                }
            }
            Action::PushVlan(tpid) => {
                if tpid != ETH_TYPE_VLAN && tpid != ETH_TYPE_QINQ {
                    return Err(OfpError::BadAction(BadActionCode::BadArgument));
                }
            }
            Action::Group(_) | Action::SetQueue(_) | Action::PopVlan | Action::DecNwTtl => {}
        }
        Ok(())
    }

    /// Whether this action outputs to `port` (used by `out_port` filters)
    pub fn outputs_to(&self, port: u32) -> bool {
        matches!(*self, Action::Output { port: p, .. } if p == port)
    }
}

/// Flow entry instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Meter(u32),
    ApplyActions(Vec<Action>),
    ClearActions,
    WriteActions(Vec<Action>),
    WriteMetadata { value: u64, mask: u64 },
    GotoTable(u8),
}

impl Instruction {
    /// Execution rank within an entry
    pub fn rank(&self) -> u8 {
        match self {
            Instruction::Meter(_) => 0,
            Instruction::ApplyActions(_) => 1,
            Instruction::ClearActions => 2,
            Instruction::WriteActions(_) => 3,
            Instruction::WriteMetadata { .. } => 4,
            Instruction::GotoTable(_) => 5,
        }
    }

    pub fn actions(&self) -> &[Action] {
        match self {
            Instruction::ApplyActions(a) | Instruction::WriteActions(a) => a,
            _ => &[],
        }
    }
}

/// Check an instruction list and return it in execution order
///
/// Table, group and meter references are resolved by the pipeline; this
/// covers what can be judged from the list alone.
pub fn normalize_instructions(table_id: u8, n_tables: u8, mut list: Vec<Instruction>) -> OfpResult<Vec<Instruction>> {
    list.sort_by_key(Instruction::rank);
    for pair in list.windows(2) {
        if pair[0].rank() == pair[1].rank() {
            return Err(OfpError::BadInstruction(BadInstructionCode::UnsupportedInstruction));
        }
    }
    for inst in &list {
        if let Instruction::GotoTable(t) = *inst {
            if t <= table_id || t >= n_tables {
                return Err(OfpError::BadInstruction(BadInstructionCode::BadTableId));
            }
        }
        for action in inst.actions() {
            action.validate()?;
            if action.outputs_to(OFPP_TABLE) {
                return Err(OfpError::BadAction(BadActionCode::BadOutPort));
            }
        }
    }
    Ok(list)
}

/// Per-packet failure while executing actions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("packet rewrite failed: {0}")]
    Packet(#[from] PacketError),

    #[error("unknown group {0}")]
    UnknownGroup(u32),

    #[error("unknown meter {0}")]
    UnknownMeter(u32),

    #[error("group {0} has no live bucket")]
    NoLiveBucket(u32),

    #[error("group chain deeper than {0}")]
    GroupDepthExceeded(usize),

    #[error("invalid table {0}")]
    BadTable(u8),
}

impl ActionError {
    /// TTL expiry is reported separately from other action failures
    pub fn is_invalid_ttl(&self) -> bool {
        matches!(self, ActionError::Packet(PacketError::TtlExpired))
    }
}

/// Accumulated write-actions, executed when the pipeline ends
///
/// Holds at most one action of each kind (one set-field per field); a
/// later write of the same kind replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSet {
    pop_vlan: bool,
    push_vlan: Option<u16>,
    dec_nw_ttl: bool,
    set_fields: BTreeMap<MatchField, u128>,
    queue: Option<u32>,
    group: Option<u32>,
    output: Option<(u32, u16)>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge actions into the set
    pub fn write(&mut self, actions: &[Action]) {
        for action in actions {
            match *action {
                Action::Output { port, max_len } => self.output = Some((port, max_len)),
                Action::Group(g) => self.group = Some(g),
                Action::SetQueue(q) => self.queue = Some(q),
                Action::SetField { field, value } => {
                    self.set_fields.insert(field, value);
                }
                Action::PushVlan(tpid) => self.push_vlan = Some(tpid),
                Action::PopVlan => self.pop_vlan = true,
                Action::DecNwTtl => self.dec_nw_ttl = true,
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Actions in execution order
    ///
    /// pop VLAN, push VLAN, decrement TTL, set-field, set-queue, group,
    /// output. Output is dropped when a group is present.
    pub fn to_actions(&self) -> Vec<Action> {
        let mut out = Vec::with_capacity(4 + self.set_fields.len());
        if self.pop_vlan {
            out.push(Action::PopVlan);
        }
        if let Some(tpid) = self.push_vlan {
            out.push(Action::PushVlan(tpid));
        }
        if self.dec_nw_ttl {
            out.push(Action::DecNwTtl);
        }
        out.extend(self.set_fields.iter().map(|(&field, &value)| Action::SetField { field, value }));
        if let Some(q) = self.queue {
            out.push(Action::SetQueue(q));
        }
        match (self.group, self.output) {
            (Some(g), _) => out.push(Action::Group(g)),
            (None, Some((port, max_len))) => out.push(Action::Output { port, max_len }),
            (None, None) => {}
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_set_order() {
        let mut set = ActionSet::new();
        set.write(&[
            Action::output(2),
            Action::set_field(MatchField::IpDscp, 10),
            Action::SetQueue(1),
            Action::DecNwTtl,
            Action::PushVlan(ETH_TYPE_VLAN),
        ]);
        assert_eq!(
            set.to_actions(),
            vec![
                Action::PushVlan(ETH_TYPE_VLAN),
                Action::DecNwTtl,
                Action::set_field(MatchField::IpDscp, 10),
                Action::SetQueue(1),
                Action::output(2),
            ]
        );
    }

    #[test]
    fn test_group_suppresses_output() {
        let mut set = ActionSet::new();
        set.write(&[Action::output(2), Action::Group(7)]);
        assert_eq!(set.to_actions(), vec![Action::Group(7)]);
    }

    #[test]
    fn test_later_write_replaces() {
        let mut set = ActionSet::new();
        set.write(&[Action::output(2), Action::set_field(MatchField::TcpDst, 80)]);
        set.write(&[Action::output(3), Action::set_field(MatchField::TcpDst, 81)]);
        assert_eq!(
            set.to_actions(),
            vec![Action::set_field(MatchField::TcpDst, 81), Action::output(3)]
        );
        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn test_normalize_orders_instructions() {
        let list = vec![
            Instruction::GotoTable(2),
            Instruction::ApplyActions(vec![Action::output(1)]),
            Instruction::Meter(1),
        ];
        let list = normalize_instructions(0, 4, list).unwrap();
        assert_eq!(list[0], Instruction::Meter(1));
        assert_eq!(list[2], Instruction::GotoTable(2));
    }

    #[test]
    fn test_normalize_rejects_backward_goto() {
        let err = normalize_instructions(2, 4, vec![Instruction::GotoTable(2)]).unwrap_err();
        assert_eq!(err, OfpError::BadInstruction(BadInstructionCode::BadTableId));
        let err = normalize_instructions(2, 4, vec![Instruction::GotoTable(1)]).unwrap_err();
        assert_eq!(err, OfpError::BadInstruction(BadInstructionCode::BadTableId));
        let err = normalize_instructions(0, 4, vec![Instruction::GotoTable(4)]).unwrap_err();
        assert_eq!(err, OfpError::BadInstruction(BadInstructionCode::BadTableId));
    }

    #[test]
    fn test_normalize_rejects_bad_actions() {
        let dup = vec![Instruction::ClearActions, Instruction::ClearActions];
        assert!(normalize_instructions(0, 1, dup).is_err());

        let set_in_port = vec![Instruction::ApplyActions(vec![Action::set_field(MatchField::InPort, 1)])];
        assert_eq!(
            normalize_instructions(0, 1, set_in_port),
            Err(OfpError::BadAction(BadActionCode::BadSetType))
        );

        let to_table = vec![Instruction::WriteActions(vec![Action::output(OFPP_TABLE)])];
        assert_eq!(
            normalize_instructions(0, 1, to_table),
            Err(OfpError::BadAction(BadActionCode::BadOutPort))
        );
    }
}
