//! Match/Action Pipeline
//!
//! table 0 → lookup → [meter] → apply → clear → write → metadata → goto
//!                                                               ↓
//!                                             action set ← last table
//!
//! The pipeline owns the flow, group and meter tables. Processing a packet
//! is synchronous and never blocks on anything but the per-table read locks
//! and the per-meter mutex; forwarding decisions are returned to the caller
//! as `Output`s rather than transmitted here.

use crate::action::{normalize_instructions, Action, ActionError, ActionSet, Instruction};
use crate::control::{FlowMod, FlowModCommand, GroupMod, GroupModCommand, MeterMod, MeterModCommand, PacketInReason, OFPTT_ALL};
use crate::flow_table::{FlowEntry, FlowFilter, FlowModFlags, FlowTable, RemovalReason, TableConfig, TableMissPolicy, TableStats};
use crate::group::{GroupTable, MAX_GROUP_DEPTH};
use crate::matching::FieldSource;
use crate::meter::{remark_dscp, MeterOutcome, MeterTable};
use crate::packet::Packet;
use crate::port::{Liveness, OFPP_CONTROLLER};
use ofs_common::{BadActionCode, BadRequestCode, FlowModFailedCode, MatchField, MeterModFailedCode, OfpError, OfpResult, Timestamp};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-packet pipeline state
#[derive(Debug, Clone)]
pub struct PacketContext {
    pub packet: Packet,
    pub in_port: u32,
    pub metadata: u64,
    pub table_id: u8,
    pub action_set: ActionSet,
    pub queue_id: u32,
    /// Cookie of the entry that last matched
    pub cookie: u64,
    /// Whether the last matched entry was a table-miss entry
    pub table_miss_hit: bool,
    pub tables_visited: Vec<u8>,
    pub applied: Vec<Action>,
}

impl PacketContext {
    pub fn new(packet: Packet, in_port: u32) -> Self {
        Self {
            packet,
            in_port,
            metadata: 0,
            table_id: 0,
            action_set: ActionSet::new(),
            queue_id: 0,
            cookie: u64::MAX,
            table_miss_hit: false,
            tables_visited: Vec::new(),
            applied: Vec::new(),
        }
    }
}

impl FieldSource for PacketContext {
    #[inline]
    fn field(&self, field: MatchField) -> Option<u128> {
        match field {
            MatchField::InPort => Some(self.in_port as u128),
            MatchField::Metadata => Some(self.metadata as u128),
            other => self.packet.headers().get(other),
        }
    }

    #[inline]
    fn frame_len(&self) -> usize {
        self.packet.len()
    }
}

/// Why the pipeline dropped a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// No entry matched and the table policy is drop
    TableMiss,
    /// Action or reference failure
    ActionError,
    /// A meter band dropped it
    Meter,
    /// TTL expired on decrement
    InvalidTtl,
    /// A group had no live bucket
    GroupDead,
    /// Pipeline ended with nothing to do
    NoAction,
    /// Ingress port missing, down or not receiving
    Ingress,
    /// Frame could not be parsed
    Malformed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::TableMiss => "table_miss",
            DropReason::ActionError => "action_error",
            DropReason::Meter => "meter",
            DropReason::InvalidTtl => "invalid_ttl",
            DropReason::GroupDead => "group_dead",
            DropReason::NoAction => "no_action",
            DropReason::Ingress => "ingress",
            DropReason::Malformed => "malformed",
        }
    }
}

/// A forwarding decision
#[derive(Debug, Clone)]
pub struct Output {
    /// Physical or reserved port
    pub port: u32,
    pub queue_id: u32,
    pub packet: Packet,
    pub in_port: u32,
    /// Bytes for the controller; `None` means the switch `miss_send_len`
    pub max_len: Option<u16>,
    pub reason: PacketInReason,
    pub table_id: u8,
    pub cookie: u64,
}

/// Outcome of running a packet through the pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub outputs: Vec<Output>,
    pub drop: Option<DropReason>,
    pub tables_visited: Vec<u8>,
}

impl PipelineResult {
    pub fn is_dropped(&self) -> bool {
        self.drop.is_some()
    }

    /// Physical port numbers the packet leaves through, in order
    pub fn output_ports(&self) -> Vec<u32> {
        self.outputs.iter().map(|o| o.port).collect()
    }
}

/// An entry removed as a side effect of a mutation or timeout
pub type Removed = (Arc<FlowEntry>, RemovalReason);

/// The multi-table pipeline
pub struct Pipeline {
    tables: Vec<FlowTable>,
    groups: GroupTable,
    meters: MeterTable,
}

impl Pipeline {
    pub fn new(tables: &[TableConfig], groups: GroupTable, meters: MeterTable) -> Self {
        let tables = tables
            .iter()
            .enumerate()
            .map(|(i, c)| FlowTable::new(i as u8, c.clone()))
            .collect();
        Self { tables, groups, meters }
    }

    pub fn table(&self, id: u8) -> Option<&FlowTable> {
        self.tables.get(id as usize)
    }

    pub fn tables(&self) -> &[FlowTable] {
        &self.tables
    }

    pub fn n_tables(&self) -> u8 {
        self.tables.len() as u8
    }

    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    pub fn meters(&self) -> &MeterTable {
        &self.meters
    }

    // ========================================================================
    // Packet processing
    // ========================================================================

    /// Run a packet from `start_table` to completion
    pub fn process(&self, ctx: &mut PacketContext, start_table: u8, live: &dyn Liveness) -> PipelineResult {
        let mut result = PipelineResult::default();
        let mut table_id = start_table;

        loop {
            let Some(table) = self.table(table_id) else {
                warn!(table = table_id, "packet sent to missing table");
                return self.fail(result, ctx, DropReason::ActionError);
            };
            ctx.table_id = table_id;
            ctx.tables_visited.push(table_id);

            let Some(entry) = table.lookup(&*ctx) else {
                match table.miss_policy() {
                    TableMissPolicy::Drop => {
                        debug!(table = table_id, "table miss, dropping");
                        return self.fail(result, ctx, DropReason::TableMiss);
                    }
                    TableMissPolicy::Controller => {
                        result.outputs.push(Output {
                            port: OFPP_CONTROLLER,
                            queue_id: ctx.queue_id,
                            packet: ctx.packet.clone(),
                            in_port: ctx.in_port,
                            max_len: None,
                            reason: PacketInReason::NoMatch,
                            table_id,
                            cookie: u64::MAX,
                        });
                        result.tables_visited = ctx.tables_visited.clone();
                        return result;
                    }
                    TableMissPolicy::Continue if table_id + 1 < self.n_tables() => {
                        table_id += 1;
                        continue;
                    }
                    TableMissPolicy::Continue => {
                        return self.fail(result, ctx, DropReason::TableMiss);
                    }
                }
            };

            ctx.cookie = entry.cookie;
            ctx.table_miss_hit = entry.is_table_miss();

            let mut goto = None;
            for inst in entry.instructions().iter() {
                match inst {
                    Instruction::Meter(id) => match self.meters.apply(*id, ctx.packet.len()) {
                        Ok(MeterOutcome::Pass) => {}
                        Ok(MeterOutcome::Drop) => {
                            debug!(meter = id, "meter band drop");
                            result.outputs.clear();
                            return self.fail(result, ctx, DropReason::Meter);
                        }
                        Ok(MeterOutcome::Remark { prec_level }) => {
                            if let Some(ip) = ctx.packet.headers().ipv4 {
                                let dscp = remark_dscp(ip.dscp, prec_level);
                                if let Err(e) = ctx.packet.set_field(MatchField::IpDscp, dscp as u128) {
                                    return self.action_failed(result, ctx, e.into());
                                }
                            }
                        }
                        Err(_) => return self.action_failed(result, ctx, ActionError::UnknownMeter(*id)),
                    },
                    Instruction::ApplyActions(actions) => {
                        if let Err(e) = self.execute_actions(ctx, actions, live, &mut result, 0) {
                            return self.action_failed(result, ctx, e);
                        }
                    }
                    Instruction::ClearActions => ctx.action_set.clear(),
                    Instruction::WriteActions(actions) => ctx.action_set.write(actions),
                    Instruction::WriteMetadata { value, mask } => {
                        ctx.metadata = (ctx.metadata & !mask) | (value & mask);
                    }
                    Instruction::GotoTable(t) => goto = Some(*t),
                }
            }

            match goto {
                Some(next) if next > table_id => table_id = next,
                Some(next) => return self.action_failed(result, ctx, ActionError::BadTable(next)),
                None => break,
            }
        }

        let actions = ctx.action_set.to_actions();
        ctx.action_set.clear();
        if let Err(e) = self.execute_actions(ctx, &actions, live, &mut result, 0) {
            return self.action_failed(result, ctx, e);
        }
        if result.outputs.is_empty() {
            result.drop = Some(DropReason::NoAction);
        }
        result.tables_visited = ctx.tables_visited.clone();
        result
    }

    fn fail(&self, mut result: PipelineResult, ctx: &PacketContext, reason: DropReason) -> PipelineResult {
        result.drop = Some(reason);
        result.tables_visited = ctx.tables_visited.clone();
        result
    }

    /// Abandon the packet after an action failure
    ///
    /// Copies already emitted by apply-actions are withdrawn; the packet is
    /// dropped as a whole.
    fn action_failed(&self, mut result: PipelineResult, ctx: &PacketContext, err: ActionError) -> PipelineResult {
        result.outputs.clear();
        let reason = if err.is_invalid_ttl() {
            debug!(in_port = ctx.in_port, "TTL expired");
            DropReason::InvalidTtl
        } else if let ActionError::NoLiveBucket(g) = err {
            debug!(group = g, "no live bucket");
            DropReason::GroupDead
        } else {
            warn!(table = ctx.table_id, error = %err, "action failed, dropping packet");
            DropReason::ActionError
        };
        self.fail(result, ctx, reason)
    }

    /// Execute an action list against the context
    ///
    /// Outputs are appended to `result`; nothing is transmitted here.
    pub fn execute_actions(
        &self,
        ctx: &mut PacketContext,
        actions: &[Action],
        live: &dyn Liveness,
        result: &mut PipelineResult,
        depth: usize,
    ) -> Result<(), ActionError> {
        for action in actions {
            ctx.applied.push(action.clone());
            match *action {
                Action::Output { port, max_len } => {
                    let reason = if port == OFPP_CONTROLLER && ctx.table_miss_hit {
                        PacketInReason::NoMatch
                    } else {
                        PacketInReason::Action
                    };
                    result.outputs.push(Output {
                        port,
                        queue_id: ctx.queue_id,
                        packet: ctx.packet.clone(),
                        in_port: ctx.in_port,
                        max_len: Some(max_len),
                        reason,
                        table_id: ctx.table_id,
                        cookie: ctx.cookie,
                    });
                }
                Action::Group(g) => self.execute_group(ctx, g, live, result, depth)?,
                Action::SetQueue(q) => ctx.queue_id = q,
                Action::SetField { field, value } => ctx.packet.set_field(field, value)?,
                Action::PushVlan(tpid) => ctx.packet.push_vlan(tpid)?,
                Action::PopVlan => ctx.packet.pop_vlan()?,
                Action::DecNwTtl => {
                    ctx.packet.decrement_ttl()?;
                }
            }
        }
        Ok(())
    }

    fn execute_group(
        &self,
        ctx: &PacketContext,
        group_id: u32,
        live: &dyn Liveness,
        result: &mut PipelineResult,
        depth: usize,
    ) -> Result<(), ActionError> {
        if depth >= MAX_GROUP_DEPTH {
            return Err(ActionError::GroupDepthExceeded(MAX_GROUP_DEPTH));
        }
        let group = self.groups.get(group_id).ok_or(ActionError::UnknownGroup(group_id))?;
        let len = ctx.packet.len();
        group.record(len);

        let chosen = self.groups.select_buckets(&group, &ctx.packet.flow_key(), live);
        if chosen.is_empty() && !group.buckets.is_empty() {
            return Err(ActionError::NoLiveBucket(group_id));
        }
        for idx in chosen {
            group.record_bucket(idx, len);
            // Each bucket works on its own copy of the packet
            let mut sub = ctx.clone();
            self.execute_actions(&mut sub, &group.buckets[idx].actions, live, result, depth + 1)?;
        }
        Ok(())
    }

    // ========================================================================
    // Controller mutations
    // ========================================================================

    /// Check references an instruction list makes to groups and meters
    fn check_references(&self, instructions: &[Instruction]) -> OfpResult<()> {
        for inst in instructions {
            if let Instruction::Meter(m) = *inst {
                if !self.meters.contains(m) {
                    return Err(OfpError::MeterModFailed(MeterModFailedCode::UnknownMeter));
                }
            }
            for action in inst.actions() {
                if let Action::Group(g) = *action {
                    if !self.groups.contains(g) {
                        return Err(OfpError::BadAction(BadActionCode::BadOutGroup));
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply a flow-mod, returning entries it removed
    pub fn flow_mod(&self, fm: &FlowMod, now: Timestamp) -> OfpResult<Vec<Removed>> {
        let n = self.n_tables();
        match fm.command {
            FlowModCommand::Add | FlowModCommand::Modify | FlowModCommand::ModifyStrict => {
                let table = self
                    .table(fm.table_id)
                    .ok_or(OfpError::FlowModFailed(FlowModFailedCode::BadTableId))?;
                fm.match_fields.validate()?;
                let instructions = normalize_instructions(fm.table_id, n, fm.instructions.clone())?;
                self.check_references(&instructions)?;

                if fm.command == FlowModCommand::Add {
                    table.add(fm.to_spec(instructions), now)?;
                } else {
                    let reset = fm.flags.contains(FlowModFlags::RESET_COUNTS);
                    let updated = table.modify(&fm.to_filter(), instructions, reset);
                    debug!(table = fm.table_id, updated, "flow entries modified");
                }
                Ok(Vec::new())
            }
            FlowModCommand::Delete | FlowModCommand::DeleteStrict => {
                let filter = fm.to_filter();
                let removed: Vec<Removed> = if fm.table_id == OFPTT_ALL {
                    self.tables.iter().flat_map(|t| t.delete(&filter)).map(|e| (e, RemovalReason::Delete)).collect()
                } else {
                    let table = self
                        .table(fm.table_id)
                        .ok_or(OfpError::FlowModFailed(FlowModFailedCode::BadTableId))?;
                    table.delete(&filter).into_iter().map(|e| (e, RemovalReason::Delete)).collect()
                };
                debug!(table = fm.table_id, removed = removed.len(), "flow entries deleted");
                Ok(removed)
            }
        }
    }

    /// Apply a group-mod; deleting a group removes the entries using it
    pub fn group_mod(&self, gm: &GroupMod) -> OfpResult<Vec<Removed>> {
        match gm.command {
            GroupModCommand::Add => {
                self.groups.add(gm.group_id, gm.group_type, gm.buckets.clone())?;
                Ok(Vec::new())
            }
            GroupModCommand::Modify => {
                self.groups.modify(gm.group_id, gm.group_type, gm.buckets.clone())?;
                Ok(Vec::new())
            }
            GroupModCommand::Delete => {
                let ids = self.groups.delete(gm.group_id)?;
                Ok(self.remove_entries(RemovalReason::GroupDelete, |e| ids.iter().any(|g| e.uses_group(*g))))
            }
        }
    }

    /// Apply a meter-mod; deleting a meter removes the entries using it
    pub fn meter_mod(&self, mm: &MeterMod) -> OfpResult<Vec<Removed>> {
        match mm.command {
            MeterModCommand::Add => {
                self.meters.add(mm.meter_id, mm.flags, mm.bands.clone())?;
                Ok(Vec::new())
            }
            MeterModCommand::Modify => {
                self.meters.modify(mm.meter_id, mm.flags, mm.bands.clone())?;
                Ok(Vec::new())
            }
            MeterModCommand::Delete => {
                let ids = self.meters.delete(mm.meter_id);
                Ok(self.remove_entries(RemovalReason::MeterDelete, |e| ids.iter().any(|m| e.uses_meter(*m))))
            }
        }
    }

    fn remove_entries<F: Fn(&FlowEntry) -> bool>(&self, reason: RemovalReason, pred: F) -> Vec<Removed> {
        self.tables
            .iter()
            .flat_map(|t| t.remove_where(&pred))
            .map(|e| (e, reason))
            .collect()
    }

    /// Remove timed-out entries from every table
    pub fn expire(&self, now: Timestamp) -> Vec<Removed> {
        self.tables.iter().flat_map(|t| t.expire(now)).collect()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Entries selected by `filter` in `table_id` (or every table)
    pub fn select(&self, table_id: u8, filter: &FlowFilter) -> OfpResult<Vec<Arc<FlowEntry>>> {
        let tables: Vec<&FlowTable> = if table_id == OFPTT_ALL {
            self.tables.iter().collect()
        } else {
            vec![self.table(table_id).ok_or(OfpError::BadRequest(BadRequestCode::BadTableId))?]
        };
        Ok(tables
            .into_iter()
            .flat_map(|t| t.entries())
            .filter(|e| filter.selects(e))
            .collect())
    }

    pub fn table_stats(&self) -> Vec<TableStats> {
        self.tables.iter().map(|t| t.stats()).collect()
    }

    /// Number of installed entries metered by `meter_id`
    pub fn flows_using_meter(&self, meter_id: u32) -> u32 {
        self.tables
            .iter()
            .flat_map(|t| t.entries())
            .filter(|e| e.uses_meter(meter_id))
            .count() as u32
    }

    /// Validate a packet-out action list
    pub fn check_packet_out_actions(&self, actions: &[Action]) -> OfpResult<()> {
        for a in actions {
            a.validate()?;
            if let Action::Group(g) = *a {
                if !self.groups.contains(g) {
                    return Err(OfpError::BadAction(BadActionCode::BadOutGroup));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::OFPCML_NO_BUFFER;
    use crate::control::{FlowMod, GroupMod, MeterMod};
    use crate::group::{Bucket, GroupType};
    use crate::matching::Match;
    use crate::meter::{MeterBand, MeterFlags};
    use crate::packet::{FrameBuilder, ETH_TYPE_VLAN};
    use ofs_common::BadInstructionCode;

    struct AllLive;

    impl Liveness for AllLive {
        fn port_live(&self, _: u32) -> bool {
            true
        }
    }

    fn pipeline(n: usize) -> Pipeline {
        let tables: Vec<TableConfig> = (0..n).map(|_| TableConfig::default()).collect();
        Pipeline::new(&tables, GroupTable::new(64, 8), MeterTable::new(64, 4))
    }

    fn ctx(tcp_dst: u16) -> PacketContext {
        let frame = FrameBuilder::new().ipv4(0x0a00_0001, 0x0a00_0002, 64, 10).tcp(1234, tcp_dst).build();
        PacketContext::new(Packet::from_slice(&frame).unwrap(), 1)
    }

    fn now() -> Timestamp {
        Timestamp::now()
    }

    #[test]
    fn test_single_table_forward() {
        let p = pipeline(1);
        p.flow_mod(&FlowMod::add(0, 10, Match::tcp().exact(MatchField::TcpDst, 80)).apply(vec![Action::output(2)]), now())
            .unwrap();

        let r = p.process(&mut ctx(80), 0, &AllLive);
        assert_eq!(r.output_ports(), vec![2]);
        assert!(!r.is_dropped());

        let r = p.process(&mut ctx(443), 0, &AllLive);
        assert_eq!(r.drop, Some(DropReason::TableMiss));
    }

    #[test]
    fn test_goto_and_write_actions() {
        let p = pipeline(3);
        p.flow_mod(
            &FlowMod::add(0, 1, Match::any()).with_instructions(vec![
                Instruction::WriteActions(vec![Action::output(5)]),
                Instruction::WriteMetadata { value: 0xab, mask: 0xff },
                Instruction::GotoTable(2),
            ]),
            now(),
        )
        .unwrap();
        p.flow_mod(
            &FlowMod::add(2, 1, Match::any().exact(MatchField::Metadata, 0xab)).with_instructions(vec![
                Instruction::WriteActions(vec![Action::set_field(MatchField::TcpDst, 8080)]),
            ]),
            now(),
        )
        .unwrap();

        let mut c = ctx(80);
        let r = p.process(&mut c, 0, &AllLive);
        assert_eq!(r.tables_visited, vec![0, 2]);
        assert_eq!(r.output_ports(), vec![5]);
        assert_eq!(r.outputs[0].packet.headers().get(MatchField::TcpDst), Some(8080));
        assert_eq!(c.metadata, 0xab);
    }

    #[test]
    fn test_clear_actions() {
        let p = pipeline(2);
        p.flow_mod(
            &FlowMod::add(0, 1, Match::any()).with_instructions(vec![
                Instruction::WriteActions(vec![Action::output(5)]),
                Instruction::GotoTable(1),
            ]),
            now(),
        )
        .unwrap();
        p.flow_mod(&FlowMod::add(1, 1, Match::any()).with_instructions(vec![Instruction::ClearActions]), now())
            .unwrap();
        let r = p.process(&mut ctx(80), 0, &AllLive);
        assert_eq!(r.drop, Some(DropReason::NoAction));
    }

    #[test]
    fn test_backward_goto_rejected_at_install() {
        let p = pipeline(4);
        let err = p
            .flow_mod(&FlowMod::add(2, 1, Match::any()).with_instructions(vec![Instruction::GotoTable(1)]), now())
            .unwrap_err();
        assert_eq!(err, OfpError::BadInstruction(BadInstructionCode::BadTableId));
        assert_eq!(p.table(2).unwrap().len(), 0);
    }

    #[test]
    fn test_bad_table_and_references() {
        let p = pipeline(1);
        assert_eq!(
            p.flow_mod(&FlowMod::add(3, 1, Match::any()), now()).unwrap_err(),
            OfpError::FlowModFailed(FlowModFailedCode::BadTableId)
        );
        assert_eq!(
            p.flow_mod(&FlowMod::add(0, 1, Match::any()).apply(vec![Action::Group(9)]), now()).unwrap_err(),
            OfpError::BadAction(BadActionCode::BadOutGroup)
        );
        assert_eq!(
            p.flow_mod(&FlowMod::add(0, 1, Match::any()).with_instructions(vec![Instruction::Meter(4)]), now())
                .unwrap_err(),
            OfpError::MeterModFailed(MeterModFailedCode::UnknownMeter)
        );
    }

    #[test]
    fn test_miss_policies() {
        let tables = vec![
            TableConfig { miss_policy: TableMissPolicy::Continue, ..Default::default() },
            TableConfig { miss_policy: TableMissPolicy::Controller, ..Default::default() },
        ];
        let p = Pipeline::new(&tables, GroupTable::new(1, 1), MeterTable::new(1, 1));
        let r = p.process(&mut ctx(80), 0, &AllLive);
        assert_eq!(r.tables_visited, vec![0, 1]);
        assert_eq!(r.output_ports(), vec![OFPP_CONTROLLER]);
        assert_eq!(r.outputs[0].reason, PacketInReason::NoMatch);
        assert_eq!(r.outputs[0].max_len, None);
    }

    #[test]
    fn test_table_miss_entry_reports_no_match() {
        let p = pipeline(1);
        p.flow_mod(&FlowMod::add(0, 0, Match::any()).apply(vec![Action::to_controller(64)]), now()).unwrap();
        let r = p.process(&mut ctx(80), 0, &AllLive);
        assert_eq!(r.outputs[0].reason, PacketInReason::NoMatch);
        assert_eq!(r.outputs[0].max_len, Some(64));
    }

    #[test]
    fn test_action_error_drops_whole_packet() {
        let p = pipeline(1);
        p.flow_mod(
            &FlowMod::add(0, 1, Match::any())
                .apply(vec![Action::output(3), Action::set_field(MatchField::UdpDst, 53)]),
            now(),
        )
        .unwrap();
        let r = p.process(&mut ctx(80), 0, &AllLive);
        assert_eq!(r.drop, Some(DropReason::ActionError));
        assert!(r.outputs.is_empty());

        // No state leaks between packets: the next one fails the same way
        let r = p.process(&mut ctx(80), 0, &AllLive);
        assert_eq!(r.drop, Some(DropReason::ActionError));
        assert_eq!(p.table(0).unwrap().entries()[0].packet_count(), 2);
    }

    #[test]
    fn test_group_deleted_after_install_is_action_error() {
        let p = pipeline(1);
        p.group_mod(&GroupMod::add(1, GroupType::Indirect, vec![Bucket::new(vec![Action::output(2)])])).unwrap();
        p.flow_mod(&FlowMod::add(0, 1, Match::any()).apply(vec![Action::Group(1)]), now()).unwrap();
        let r = p.process(&mut ctx(80), 0, &AllLive);
        assert_eq!(r.output_ports(), vec![2]);

        let removed = p.group_mod(&GroupMod::delete(1)).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].1, RemovalReason::GroupDelete);
        assert!(p.table(0).unwrap().is_empty());
    }

    #[test]
    fn test_all_group_fans_out_independent_copies() {
        let p = pipeline(1);
        p.group_mod(&GroupMod::add(
            1,
            GroupType::All,
            vec![
                Bucket::new(vec![Action::set_field(MatchField::TcpDst, 1), Action::output(2)]),
                Bucket::new(vec![Action::output(3)]),
            ],
        ))
        .unwrap();
        p.flow_mod(&FlowMod::add(0, 1, Match::any()).apply(vec![Action::Group(1), Action::output(4)]), now())
            .unwrap();
        let r = p.process(&mut ctx(80), 0, &AllLive);
        assert_eq!(r.output_ports(), vec![2, 3, 4]);
        assert_eq!(r.outputs[0].packet.headers().get(MatchField::TcpDst), Some(1));
        assert_eq!(r.outputs[1].packet.headers().get(MatchField::TcpDst), Some(80));
        assert_eq!(r.outputs[2].packet.headers().get(MatchField::TcpDst), Some(80));
    }

    #[test]
    fn test_fast_failover_with_no_live_bucket_drops() {
        struct NoneLive;
        impl Liveness for NoneLive {
            fn port_live(&self, _: u32) -> bool {
                false
            }
        }
        let p = pipeline(1);
        p.group_mod(&GroupMod::add(1, GroupType::FastFailover, vec![Bucket::watching_port(2, vec![Action::output(2)])]))
            .unwrap();
        p.flow_mod(&FlowMod::add(0, 1, Match::any()).apply(vec![Action::Group(1)]), now()).unwrap();
        let r = p.process(&mut ctx(80), 0, &NoneLive);
        assert_eq!(r.drop, Some(DropReason::GroupDead));
    }

    #[test]
    fn test_meter_drop_and_remark() {
        let p = pipeline(1);
        p.meter_mod(&MeterMod::add(
            1,
            MeterFlags::PKTPS | MeterFlags::BURST,
            vec![MeterBand::new_dscp_remark(1, 1, 1), MeterBand::new_drop(2, 3)],
        ))
        .unwrap();
        p.flow_mod(
            &FlowMod::add(0, 1, Match::any())
                .with_instructions(vec![Instruction::Meter(1), Instruction::ApplyActions(vec![Action::output(2)])]),
            now(),
        )
        .unwrap();

        let first = p.process(&mut ctx(80), 0, &AllLive);
        assert_eq!(first.outputs[0].packet.headers().get(MatchField::IpDscp), Some(10));
        // Over the lower band: AF11 becomes AF12
        let second = p.process(&mut ctx(80), 0, &AllLive);
        assert_eq!(second.outputs[0].packet.headers().get(MatchField::IpDscp), Some(12));

        let drops = (0..4)
            .map(|_| p.process(&mut ctx(80), 0, &AllLive))
            .filter(|r| r.drop == Some(DropReason::Meter))
            .count();
        assert!(drops > 0);

        let removed = p.meter_mod(&MeterMod::delete(1)).unwrap();
        assert_eq!(removed[0].1, RemovalReason::MeterDelete);
    }

    #[test]
    fn test_dec_ttl_expiry() {
        let p = pipeline(1);
        p.flow_mod(&FlowMod::add(0, 1, Match::any()).apply(vec![Action::DecNwTtl, Action::output(2)]), now())
            .unwrap();
        let frame = FrameBuilder::new().ipv4(1, 2, 1, 0).udp(1, 2).build();
        let mut c = PacketContext::new(Packet::from_slice(&frame).unwrap(), 1);
        let r = p.process(&mut c, 0, &AllLive);
        assert_eq!(r.drop, Some(DropReason::InvalidTtl));
    }

    #[test]
    fn test_push_vlan_then_set_vid() {
        let p = pipeline(1);
        p.flow_mod(
            &FlowMod::add(0, 1, Match::any()).with_instructions(vec![Instruction::WriteActions(vec![
                Action::set_field(MatchField::VlanVid, 100),
                Action::PushVlan(ETH_TYPE_VLAN),
                Action::Output { port: 2, max_len: OFPCML_NO_BUFFER },
            ])]),
            now(),
        )
        .unwrap();
        let r = p.process(&mut ctx(80), 0, &AllLive);
        assert_eq!(r.outputs[0].packet.headers().get(MatchField::VlanVid), Some(100));
    }

    #[test]
    fn test_delete_all_tables_and_expire() {
        let p = pipeline(2);
        let t0 = Timestamp::from_nanos(1);
        p.flow_mod(&FlowMod::add(0, 1, Match::any()).with_timeouts(0, 1).with_flags(FlowModFlags::SEND_FLOW_REM), t0)
            .unwrap();
        p.flow_mod(&FlowMod::add(1, 1, Match::any()), t0).unwrap();
        assert_eq!(p.expire(t0.add(std::time::Duration::from_secs(2))).len(), 1);
        assert_eq!(p.flow_mod(&FlowMod::delete(OFPTT_ALL, Match::any()), t0).unwrap().len(), 1);
        assert!(p.flow_mod(&FlowMod::delete(OFPTT_ALL, Match::any()), t0).unwrap().is_empty());
    }
}
