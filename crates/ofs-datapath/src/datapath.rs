//! Datapath
//!
//! Ties the pipeline, ports, packet buffers and controller channel
//! together. Frames enter through [`Datapath::receive`]; controller
//! messages through [`Datapath::handle`]. Asynchronous events leave on a
//! bounded channel and are dropped (and counted) when it is full.

use crate::action::{Instruction, OFPCML_NO_BUFFER};
use crate::buffer::{PacketBuffers, OFP_NO_BUFFER};
use crate::config::{ConfigError, DatapathConfig};
use crate::control::{
    ControllerEvent, ControllerMessage, ErrorReport, FlowMod, FlowModCommand, FlowRemoved, GroupMod, MeterMod, PacketIn,
    PacketInReason, PacketOut, PortMod, PortReason, PortStatus, SwitchConfig,
};
use crate::flow_table::{FlowEntry, FlowFilter, FlowModFlags, TableStats};
use crate::group::{GroupStats, GroupTable};
use crate::matching::Match;
use crate::meter::{MeterStats, MeterTable};
use crate::packet::Packet;
use crate::pipeline::{DropReason, Output, PacketContext, Pipeline, PipelineResult, Removed};
use crate::port::{
    PortConfig, PortDesc, PortError, PortSink, PortSpec, PortStats, PortTable, OFPP_ALL, OFPP_ANY,
    OFPP_CONTROLLER, OFPP_FLOOD, OFPP_IN_PORT, OFPP_LOCAL, OFPP_NORMAL, OFPP_TABLE,
};
use crate::stats::{DatapathStats, DatapathStatsSnapshot};
use arc_swap::ArcSwap;
use bytes::BytesMut;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use ofs_common::{BadRequestCode, OfpError, OfpResult, Timestamp};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Error, Debug)]
pub enum DatapathError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("initial port rejected: {0}")]
    Port(#[from] PortError),

    #[error("failed to spawn flow sweeper: {0}")]
    SweeperSpawn(#[source] std::io::Error),
}

/// One entry of a flow stats reply
#[derive(Debug, Clone)]
pub struct FlowStats {
    pub table_id: u8,
    pub priority: u16,
    pub cookie: u64,
    pub duration: Duration,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub flags: FlowModFlags,
    pub packet_count: u64,
    pub byte_count: u64,
    pub match_fields: Match,
    pub instructions: Vec<Instruction>,
}

impl FlowStats {
    fn from_entry(e: &FlowEntry, now: Timestamp) -> Self {
        Self {
            table_id: e.table_id,
            priority: e.priority,
            cookie: e.cookie,
            duration: e.duration(now),
            idle_timeout: e.idle_timeout,
            hard_timeout: e.hard_timeout,
            flags: e.flags,
            packet_count: e.packet_count(),
            byte_count: e.byte_count(),
            match_fields: e.match_fields.clone(),
            instructions: e.instructions().as_ref().clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    pub packet_count: u64,
    pub byte_count: u64,
    pub flow_count: u32,
}

/// Features reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Features {
    pub datapath_id: u64,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub ports: Vec<PortDesc>,
}

/// OpenFlow 1.3 software datapath
pub struct Datapath {
    config: DatapathConfig,
    switch_config: ArcSwap<SwitchConfig>,
    pipeline: Pipeline,
    ports: PortTable,
    buffers: PacketBuffers,
    events: Sender<ControllerEvent>,
    stats: DatapathStats,
}

impl Datapath {
    /// Build a datapath and the receiving end of its controller channel
    pub fn new(
        config: DatapathConfig,
        sink: Arc<dyn PortSink>,
    ) -> Result<(Arc<Self>, Receiver<ControllerEvent>), DatapathError> {
        config.validate()?;

        let pipeline = Pipeline::new(
            &config.tables,
            GroupTable::new(config.max_groups, config.max_buckets_per_group),
            MeterTable::new(config.max_meters, config.max_bands_per_meter),
        );
        let ports = PortTable::new(sink);
        for spec in &config.ports {
            ports.add(spec.clone())?;
        }
        let (tx, rx) = bounded(config.controller_queue_depth);

        let dp = Self {
            switch_config: ArcSwap::from_pointee(SwitchConfig {
                miss_send_len: config.miss_send_len,
                ..Default::default()
            }),
            pipeline,
            ports,
            buffers: PacketBuffers::new(config.buffer_capacity),
            events: tx,
            stats: DatapathStats::default(),
            config,
        };
        info!(
            datapath_id = dp.config.datapath_id,
            tables = dp.pipeline.n_tables(),
            ports = dp.ports.len(),
            "datapath created"
        );
        Ok((Arc::new(dp), rx))
    }

    pub fn datapath_id(&self) -> u64 {
        self.config.datapath_id
    }

    pub fn config(&self) -> &DatapathConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    pub fn switch_config(&self) -> SwitchConfig {
        **self.switch_config.load()
    }

    // ========================================================================
    // Data path
    // ========================================================================

    /// Process one frame received on `in_port`
    pub fn receive(&self, in_port: u32, frame: &[u8]) -> PipelineResult {
        if !self.ports.on_receive(in_port, frame.len()) {
            trace!(in_port, "frame refused at ingress");
            return self.drop_early(DropReason::Ingress);
        }
        self.stats.record_rx(frame.len());

        let packet = match Packet::from_slice(frame) {
            Ok(p) => p,
            Err(e) => {
                debug!(in_port, error = %e, "malformed frame");
                self.ports.record_rx_error(in_port);
                return self.drop_early(DropReason::Malformed);
            }
        };
        let mut ctx = PacketContext::new(packet, in_port);
        self.run(&mut ctx)
    }

    fn drop_early(&self, reason: DropReason) -> PipelineResult {
        self.stats.record_drop(reason);
        PipelineResult { drop: Some(reason), ..Default::default() }
    }

    /// Run a context through the pipeline from table 0 and act on the result
    fn run(&self, ctx: &mut PacketContext) -> PipelineResult {
        let result = self.pipeline.process(ctx, 0, &self.ports);
        if let Some(reason) = result.drop {
            self.stats.record_drop(reason);
            if reason == DropReason::InvalidTtl && self.switch_config.load().invalid_ttl_to_controller {
                self.packet_in(
                    ctx.packet.clone(),
                    ctx.in_port,
                    PacketInReason::InvalidTtl,
                    ctx.table_id,
                    ctx.cookie,
                    None,
                );
            }
            return result;
        }
        self.dispatch(&result.outputs, false);
        result
    }

    /// Deliver pipeline outputs
    ///
    /// `TABLE` is honoured only for packet-out.
    fn dispatch(&self, outputs: &[Output], from_packet_out: bool) {
        for out in outputs {
            match out.port {
                OFPP_IN_PORT => self.transmit(out.in_port, out.queue_id, &out.packet),
                OFPP_ALL | OFPP_FLOOD => {
                    for port in self.ports.port_numbers() {
                        if port != out.in_port && self.ports.get(port).map_or(false, |p| p.is_live()) {
                            self.transmit(port, out.queue_id, &out.packet);
                        }
                    }
                }
                OFPP_CONTROLLER => {
                    self.packet_in(out.packet.clone(), out.in_port, out.reason, out.table_id, out.cookie, out.max_len)
                }
                OFPP_TABLE if from_packet_out => {
                    let mut ctx = PacketContext::new(out.packet.clone(), out.in_port);
                    self.run(&mut ctx);
                }
                OFPP_TABLE | OFPP_NORMAL | OFPP_ANY => {
                    debug!(port = out.port, "unsupported output port, dropping");
                    self.stats.record_drop(DropReason::ActionError);
                }
                port if port == out.in_port => {
                    trace!(port, "output to ingress port needs IN_PORT, dropping");
                }
                port => self.transmit(port, out.queue_id, &out.packet),
            }
        }
    }

    fn transmit(&self, port: u32, queue_id: u32, packet: &Packet) {
        if self.ports.send(port, queue_id, packet.to_bytes()) {
            self.stats.record_tx(packet.len());
        }
    }

    /// Send a packet to the controller
    ///
    /// The frame is buffered and truncated to `max_len` (or the switch
    /// `miss_send_len`) unless `max_len` is `NO_BUFFER` or the buffer ring
    /// is full, in which case the whole frame goes out unbuffered.
    fn packet_in(
        &self,
        packet: Packet,
        in_port: u32,
        reason: PacketInReason,
        table_id: u8,
        cookie: u64,
        max_len: Option<u16>,
    ) {
        if let Some(port) = self.ports.get(in_port) {
            if port.config().contains(PortConfig::NO_PACKET_IN) {
                trace!(in_port, "packet-in suppressed by port config");
                return;
            }
        }
        let max_len = max_len.unwrap_or(self.switch_config.load().miss_send_len);
        let bytes = packet.to_bytes();
        let total_len = bytes.len().min(u16::MAX as usize) as u16;

        let (buffer_id, data) = if max_len == OFPCML_NO_BUFFER {
            (OFP_NO_BUFFER, bytes)
        } else {
            match self.buffers.store(packet, in_port, Timestamp::now()) {
                OFP_NO_BUFFER => (OFP_NO_BUFFER, bytes),
                id => {
                    let keep = (max_len as usize).min(bytes.len());
                    (id, bytes.slice(..keep))
                }
            }
        };

        self.stats.record_packet_in();
        self.emit(ControllerEvent::PacketIn(PacketIn {
            buffer_id,
            total_len,
            reason,
            table_id,
            cookie,
            in_port,
            data,
        }));
    }

    fn emit(&self, event: ControllerEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                warn!(kind = ev.kind(), "controller channel full, event dropped");
                self.stats.record_event_dropped(ev.kind());
            }
            Err(TrySendError::Disconnected(ev)) => {
                trace!(kind = ev.kind(), "no controller attached, event dropped");
                self.stats.record_event_dropped(ev.kind());
            }
        }
    }

    fn notify_removed(&self, removed: Vec<Removed>) {
        let now = Timestamp::now();
        for (entry, reason) in removed {
            if !entry.flags.contains(FlowModFlags::SEND_FLOW_REM) {
                continue;
            }
            self.emit(ControllerEvent::FlowRemoved(FlowRemoved {
                cookie: entry.cookie,
                priority: entry.priority,
                reason,
                table_id: entry.table_id,
                duration: entry.duration(now),
                idle_timeout: entry.idle_timeout,
                hard_timeout: entry.hard_timeout,
                packet_count: entry.packet_count(),
                byte_count: entry.byte_count(),
                match_fields: entry.match_fields.clone(),
            }));
        }
    }

    // ========================================================================
    // Controller messages
    // ========================================================================

    /// Dispatch a controller message
    ///
    /// A rejection is returned to the caller and also reported on the
    /// event channel as an `Error` event.
    pub fn handle(&self, msg: ControllerMessage) -> OfpResult<()> {
        let request = msg.kind();
        let result = match msg {
            ControllerMessage::FlowMod(fm) => self.flow_mod(&fm),
            ControllerMessage::GroupMod(gm) => self.group_mod(&gm),
            ControllerMessage::MeterMod(mm) => self.meter_mod(&mm),
            ControllerMessage::PacketOut(po) => self.packet_out(po),
            ControllerMessage::PortMod(pm) => self.port_mod(&pm),
            ControllerMessage::SetConfig(c) => {
                self.set_config(c);
                Ok(())
            }
        };
        if let Err(error) = result {
            debug!(request, %error, "controller request rejected");
            self.emit(ControllerEvent::Error(ErrorReport { error, request }));
        }
        result
    }

    /// Apply a flow-mod
    ///
    /// A buffered packet named by an add or modify is run through the
    /// pipeline once the entry is in place.
    pub fn flow_mod(&self, fm: &FlowMod) -> OfpResult<()> {
        let removed = self.pipeline.flow_mod(fm, Timestamp::now()).map_err(|e| {
            debug!(table = fm.table_id, command = ?fm.command, error = %e, "flow-mod rejected");
            self.release_buffer(fm.buffer_id);
            e
        })?;
        self.notify_removed(removed);

        let mutates = matches!(
            fm.command,
            FlowModCommand::Add | FlowModCommand::Modify | FlowModCommand::ModifyStrict
        );
        if mutates && fm.buffer_id != OFP_NO_BUFFER {
            let (packet, in_port) = self.buffers.retrieve(fm.buffer_id)?;
            let mut ctx = PacketContext::new(packet, in_port);
            self.run(&mut ctx);
        }
        Ok(())
    }

    pub fn group_mod(&self, gm: &GroupMod) -> OfpResult<()> {
        let removed = self.pipeline.group_mod(gm)?;
        self.notify_removed(removed);
        Ok(())
    }

    pub fn meter_mod(&self, mm: &MeterMod) -> OfpResult<()> {
        let removed = self.pipeline.meter_mod(mm)?;
        self.notify_removed(removed);
        Ok(())
    }

    /// A rejected request naming a buffer frees that buffer
    fn release_buffer(&self, buffer_id: u32) {
        if buffer_id != OFP_NO_BUFFER && self.buffers.discard(buffer_id) {
            debug!(buffer_id, "buffered packet released");
        }
    }

    fn check_packet_out(&self, po: &PacketOut) -> OfpResult<()> {
        let in_port_ok = matches!(po.in_port, OFPP_CONTROLLER | OFPP_LOCAL | OFPP_ANY)
            || self.ports.get(po.in_port).is_some();
        if !in_port_ok {
            return Err(OfpError::BadRequest(BadRequestCode::BadPort));
        }
        self.pipeline.check_packet_out_actions(&po.actions)
    }

    /// Execute a packet-out
    pub fn packet_out(&self, po: PacketOut) -> OfpResult<()> {
        if let Err(e) = self.check_packet_out(&po) {
            self.release_buffer(po.buffer_id);
            return Err(e);
        }

        let packet = if po.buffer_id != OFP_NO_BUFFER {
            self.buffers.retrieve(po.buffer_id)?.0
        } else {
            let data = po.data.ok_or(OfpError::BadRequest(BadRequestCode::BadPacket))?;
            Packet::from_bytes(BytesMut::from(&data[..]))
                .map_err(|_| OfpError::BadRequest(BadRequestCode::BadPacket))?
        };

        let mut ctx = PacketContext::new(packet, po.in_port);
        let mut result = PipelineResult::default();
        if let Err(e) = self.pipeline.execute_actions(&mut ctx, &po.actions, &self.ports, &mut result, 0) {
            warn!(error = %e, "packet-out actions failed");
            self.stats.record_drop(if e.is_invalid_ttl() { DropReason::InvalidTtl } else { DropReason::ActionError });
            return Ok(());
        }
        self.dispatch(&result.outputs, true);
        Ok(())
    }

    pub fn port_mod(&self, pm: &PortMod) -> OfpResult<()> {
        let desc = self.ports.port_mod(pm.port_no, pm.hw_addr, pm.config, pm.mask)?;
        info!(port = pm.port_no, config = desc.config, "port modified");
        self.emit(ControllerEvent::PortStatus(PortStatus { reason: PortReason::Modify, desc }));
        Ok(())
    }

    pub fn set_config(&self, config: SwitchConfig) {
        debug!(miss_send_len = config.miss_send_len, "switch config updated");
        self.switch_config.store(Arc::new(config));
    }

    // ========================================================================
    // Port management
    // ========================================================================

    pub fn add_port(&self, spec: PortSpec) -> Result<PortDesc, PortError> {
        let desc = self.ports.add(spec)?.desc();
        info!(port = desc.port_no, name = %desc.name, "port added");
        self.emit(ControllerEvent::PortStatus(PortStatus { reason: PortReason::Add, desc: desc.clone() }));
        Ok(desc)
    }

    pub fn remove_port(&self, port_no: u32) -> Result<PortDesc, PortError> {
        let desc = self.ports.remove(port_no).ok_or(PortError::Unknown(port_no))?.desc();
        info!(port = port_no, "port removed");
        self.emit(ControllerEvent::PortStatus(PortStatus { reason: PortReason::Delete, desc: desc.clone() }));
        Ok(desc)
    }

    /// Report a link state change; emits port-status only on a change
    pub fn set_link_state(&self, port_no: u32, up: bool) -> Result<(), PortError> {
        if let Some(desc) = self.ports.set_link(port_no, up)? {
            info!(port = port_no, up, "link state changed");
            self.emit(ControllerEvent::PortStatus(PortStatus { reason: PortReason::Modify, desc }));
        }
        Ok(())
    }

    // ========================================================================
    // Aging
    // ========================================================================

    /// Remove timed-out entries, notifying the controller where asked
    pub fn expire_flows(&self, now: Timestamp) -> usize {
        let removed = self.pipeline.expire(now);
        let n = removed.len();
        if n > 0 {
            debug!(removed = n, "flow entries expired");
        }
        self.notify_removed(removed);
        n
    }

    /// Start the background flow sweeper
    ///
    /// The sweeper holds a weak reference and exits on its own once the
    /// datapath is dropped.
    pub fn start_sweeper(self: &Arc<Self>) -> Result<FlowSweeper, DatapathError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let interval = Duration::from_millis(self.config.sweep_interval_ms);
        let dp: Weak<Self> = Arc::downgrade(self);

        let handle = thread::Builder::new()
            .name(format!("ofs-sweeper-{:x}", self.config.datapath_id))
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(dp) = dp.upgrade() else { break };
                        dp.expire_flows(Timestamp::now());
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(DatapathError::SweeperSpawn)?;

        info!(interval_ms = self.config.sweep_interval_ms, "flow sweeper started");
        Ok(FlowSweeper { stop: Some(stop_tx), thread: Some(handle) })
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn flow_stats(&self, table_id: u8, filter: &FlowFilter) -> OfpResult<Vec<FlowStats>> {
        let now = Timestamp::now();
        Ok(self
            .pipeline
            .select(table_id, filter)?
            .iter()
            .map(|e| FlowStats::from_entry(e, now))
            .collect())
    }

    pub fn aggregate_stats(&self, table_id: u8, filter: &FlowFilter) -> OfpResult<AggregateStats> {
        Ok(self
            .pipeline
            .select(table_id, filter)?
            .iter()
            .fold(AggregateStats::default(), |mut acc, e| {
                acc.packet_count += e.packet_count();
                acc.byte_count += e.byte_count();
                acc.flow_count += 1;
                acc
            }))
    }

    pub fn table_stats(&self) -> Vec<TableStats> {
        self.pipeline.table_stats()
    }

    pub fn port_stats(&self) -> Vec<PortStats> {
        self.ports.stats()
    }

    pub fn group_stats(&self) -> Vec<GroupStats> {
        self.pipeline.groups().stats()
    }

    pub fn meter_stats(&self) -> Vec<MeterStats> {
        self.pipeline.meters().stats(|id| self.pipeline.flows_using_meter(id))
    }

    pub fn stats(&self) -> DatapathStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn features(&self) -> Features {
        Features {
            datapath_id: self.config.datapath_id,
            n_buffers: self.buffers.capacity() as u32,
            n_tables: self.pipeline.n_tables(),
            ports: self.ports.descs(),
        }
    }

    /// Number of packets waiting in the packet-in buffer ring
    pub fn buffered(&self) -> usize {
        self.buffers.occupied()
    }
}

/// Handle to the background flow-aging thread
pub struct FlowSweeper {
    stop: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl FlowSweeper {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Stop the sweeper and wait for it to exit
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            info!("flow sweeper stopped");
        }
    }
}

impl Drop for FlowSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::packet::FrameBuilder;
    use crate::port::tests::{port_spec, CaptureSink};
    use ofs_common::MatchField;

    fn datapath() -> (Arc<Datapath>, Receiver<ControllerEvent>, Arc<CaptureSink>) {
        let sink = Arc::new(CaptureSink::default());
        let config = DatapathConfig { ports: (1..=3).map(port_spec).collect(), ..DatapathConfig::with_tables(2) };
        let (dp, rx) = Datapath::new(config, sink.clone()).unwrap();
        (dp, rx, sink)
    }

    fn frame() -> Vec<u8> {
        FrameBuilder::new().ipv4(0x0a00_0001, 0x0a00_0002, 64, 0).tcp(1000, 80).payload(&[0u8; 200]).build()
    }

    #[test]
    fn test_unknown_ingress_dropped() {
        let (dp, _rx, sink) = datapath();
        let r = dp.receive(9, &frame());
        assert_eq!(r.drop, Some(DropReason::Ingress));
        assert!(sink.frames.lock().is_empty());
    }

    #[test]
    fn test_malformed_counted() {
        let (dp, _rx, _sink) = datapath();
        let r = dp.receive(1, &[0u8; 6]);
        assert_eq!(r.drop, Some(DropReason::Malformed));
        assert_eq!(dp.stats().parse_errors, 1);
        assert_eq!(dp.port_stats()[0].rx_errors, 1);
    }

    #[test]
    fn test_flood_skips_ingress() {
        let (dp, _rx, sink) = datapath();
        dp.flow_mod(&FlowMod::add(0, 1, Match::any()).apply(vec![Action::output(OFPP_FLOOD)])).unwrap();
        dp.receive(2, &frame());
        let ports: Vec<u32> = sink.frames.lock().iter().map(|f| f.0).collect();
        assert_eq!(ports, vec![1, 3]);
    }

    #[test]
    fn test_miss_to_controller_buffers_and_truncates() {
        let (dp, rx, _sink) = datapath();
        dp.flow_mod(&FlowMod::add(0, 0, Match::any()).apply(vec![Action::to_controller(64)])).unwrap();
        let f = frame();
        dp.receive(1, &f);

        let ControllerEvent::PacketIn(pi) = rx.try_recv().unwrap() else {
            panic!("expected packet-in");
        };
        assert_eq!(pi.reason, PacketInReason::NoMatch);
        assert_eq!(pi.total_len as usize, f.len());
        assert_eq!(pi.data.len(), 64);
        assert_ne!(pi.buffer_id, OFP_NO_BUFFER);
        assert_eq!(dp.buffered(), 1);
    }

    #[test]
    fn test_no_packet_in_port_config() {
        let (dp, rx, _sink) = datapath();
        dp.flow_mod(&FlowMod::add(0, 0, Match::any()).apply(vec![Action::to_controller(OFPCML_NO_BUFFER)]))
            .unwrap();
        dp.port_mod(&PortMod {
            port_no: 1,
            hw_addr: port_spec(1).hw_addr,
            config: PortConfig::NO_PACKET_IN,
            mask: PortConfig::NO_PACKET_IN,
        })
        .unwrap();
        assert!(matches!(rx.try_recv(), Ok(ControllerEvent::PortStatus(_))));
        dp.receive(1, &frame());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_invalid_ttl_to_controller() {
        let (dp, rx, _sink) = datapath();
        dp.flow_mod(&FlowMod::add(0, 1, Match::any()).apply(vec![Action::DecNwTtl, Action::output(2)])).unwrap();
        dp.set_config(SwitchConfig { invalid_ttl_to_controller: true, ..Default::default() });

        let f = FrameBuilder::new().ipv4(1, 2, 1, 0).udp(1, 2).build();
        let r = dp.receive(1, &f);
        assert_eq!(r.drop, Some(DropReason::InvalidTtl));
        let ControllerEvent::PacketIn(pi) = rx.try_recv().unwrap() else {
            panic!("expected packet-in");
        };
        assert_eq!(pi.reason, PacketInReason::InvalidTtl);
        assert_eq!(dp.stats().invalid_ttl, 1);
    }

    #[test]
    fn test_packet_out_validation() {
        let (dp, _rx, sink) = datapath();
        let data = bytes::Bytes::from(frame());
        assert_eq!(
            dp.packet_out(PacketOut::from_data(77, data.clone(), vec![Action::output(2)])),
            Err(OfpError::BadRequest(BadRequestCode::BadPort))
        );
        assert_eq!(
            dp.packet_out(PacketOut::from_buffer(5, OFPP_CONTROLLER, vec![Action::output(2)])),
            Err(OfpError::BadRequest(BadRequestCode::BufferEmpty))
        );
        dp.packet_out(PacketOut::from_data(OFPP_CONTROLLER, data, vec![Action::output(2)])).unwrap();
        assert_eq!(sink.frames.lock().len(), 1);
    }

    #[test]
    fn test_packet_out_to_table() {
        let (dp, _rx, sink) = datapath();
        dp.flow_mod(&FlowMod::add(0, 1, Match::any().exact(MatchField::InPort, 1)).apply(vec![Action::output(3)]))
            .unwrap();
        dp.packet_out(PacketOut::from_data(1, bytes::Bytes::from(frame()), vec![Action::output(OFPP_TABLE)]))
            .unwrap();
        assert_eq!(sink.frames.lock()[0].0, 3);
    }

    #[test]
    fn test_full_channel_counts_dropped_events() {
        let sink = Arc::new(CaptureSink::default());
        let config = DatapathConfig { controller_queue_depth: 1, ..Default::default() };
        let (dp, _rx) = Datapath::new(config, sink).unwrap();
        dp.add_port(port_spec(1)).unwrap();
        dp.add_port(port_spec(2)).unwrap();
        assert_eq!(dp.stats().events_dropped, 1);
    }

    #[test]
    fn test_link_state_events() {
        let (dp, rx, _sink) = datapath();
        dp.set_link_state(1, true).unwrap();
        assert!(rx.try_recv().is_err());
        dp.set_link_state(1, false).unwrap();
        let Ok(ControllerEvent::PortStatus(ps)) = rx.try_recv() else {
            panic!("expected port-status");
        };
        assert_eq!(ps.reason, PortReason::Modify);
        assert_eq!(dp.set_link_state(42, true), Err(PortError::Unknown(42)));
    }
}
