//! Port abstraction
//!
//! Ports own their admin config, link state, queues and counters. Frame
//! transmission itself is delegated to a `PortSink`, so the datapath can be
//! wired to sockets, a simulator or a test capture without change.

use bitflags::bitflags;
use bytes::Bytes;
use dashmap::DashMap;
use ofs_common::{AtomicCounter, OfpError, PortModFailedCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Highest number of a physical port
pub const OFPP_MAX: u32 = 0xffff_ff00;
/// Send back out the input port
pub const OFPP_IN_PORT: u32 = 0xffff_fff8;
/// Submit to the first flow table (packet-out only)
pub const OFPP_TABLE: u32 = 0xffff_fff9;
/// Traditional L2/L3 processing (unsupported)
pub const OFPP_NORMAL: u32 = 0xffff_fffa;
/// All ports except the input port
pub const OFPP_FLOOD: u32 = 0xffff_fffb;
/// All ports except the input port
pub const OFPP_ALL: u32 = 0xffff_fffc;
/// Send to the controller
pub const OFPP_CONTROLLER: u32 = 0xffff_fffd;
/// Local openflow "port"
pub const OFPP_LOCAL: u32 = 0xffff_fffe;
/// Wildcard port in filters
pub const OFPP_ANY: u32 = 0xffff_ffff;

/// Default queue every port has
pub const DEFAULT_QUEUE: u32 = 0;

bitflags! {
    /// `ofp_port_config`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PortConfig: u32 {
        const PORT_DOWN = 1 << 0;
        const NO_RECV = 1 << 2;
        const NO_FWD = 1 << 5;
        const NO_PACKET_IN = 1 << 6;
    }
}

bitflags! {
    /// `ofp_port_state`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PortState: u32 {
        const LINK_DOWN = 1 << 0;
        const BLOCKED = 1 << 1;
        const LIVE = 1 << 2;
    }
}

/// Delivers frames to the outside world
pub trait PortSink: Send + Sync {
    /// Transmit `frame` on `port_no` through `queue_id`
    fn transmit(&self, port_no: u32, queue_id: u32, frame: Bytes);
}

/// Port liveness as seen by fast-failover groups
pub trait Liveness {
    fn port_live(&self, port_no: u32) -> bool;
}

/// Port table errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("port {0} already exists")]
    Exists(u32),

    #[error("invalid port number {0}")]
    InvalidNumber(u32),

    #[error("port {0} does not exist")]
    Unknown(u32),

    #[error("hardware address does not match port {0}")]
    HwAddrMismatch(u32),
}

impl From<PortError> for OfpError {
    fn from(e: PortError) -> Self {
        match e {
            PortError::HwAddrMismatch(_) => OfpError::PortModFailed(PortModFailedCode::BadHwAddr),
            _ => OfpError::PortModFailed(PortModFailedCode::BadPort),
        }
    }
}

/// Egress queue description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub queue_id: u32,
    /// Minimum rate in tenths of a percent (informational)
    #[serde(default)]
    pub min_rate: u16,
    /// Maximum rate in tenths of a percent (informational)
    #[serde(default)]
    pub max_rate: u16,
}

/// Port description used for configuration and creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub port_no: u32,
    pub name: String,
    pub hw_addr: [u8; 6],
    #[serde(default)]
    pub curr_speed_kbps: u32,
    #[serde(default)]
    pub queues: Vec<QueueSpec>,
}

#[derive(Debug)]
struct Queue {
    spec: QueueSpec,
    tx_packets: AtomicCounter,
    tx_bytes: AtomicCounter,
}

/// Per-port counters
#[derive(Debug, Default)]
pub struct PortCounters {
    pub rx_packets: AtomicCounter,
    pub rx_bytes: AtomicCounter,
    pub rx_dropped: AtomicCounter,
    pub rx_errors: AtomicCounter,
    pub tx_packets: AtomicCounter,
    pub tx_bytes: AtomicCounter,
    pub tx_dropped: AtomicCounter,
}

/// A switch port
#[derive(Debug)]
pub struct Port {
    spec: PortSpec,
    config: AtomicU32,
    state: AtomicU32,
    queues: Vec<Queue>,
    pub counters: PortCounters,
}

impl Port {
    pub fn new(spec: PortSpec) -> Self {
        let queues = spec
            .queues
            .iter()
            .map(|q| Queue {
                spec: q.clone(),
                tx_packets: AtomicCounter::new(0),
                tx_bytes: AtomicCounter::new(0),
            })
            .collect();
        Self {
            spec,
            config: AtomicU32::new(PortConfig::empty().bits()),
            state: AtomicU32::new(PortState::LIVE.bits()),
            queues,
            counters: PortCounters::default(),
        }
    }

    pub fn port_no(&self) -> u32 {
        self.spec.port_no
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn hw_addr(&self) -> [u8; 6] {
        self.spec.hw_addr
    }

    pub fn config(&self) -> PortConfig {
        PortConfig::from_bits_truncate(self.config.load(Ordering::Acquire))
    }

    pub fn state(&self) -> PortState {
        PortState::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    /// Admin up and link up
    pub fn is_live(&self) -> bool {
        !self.config().contains(PortConfig::PORT_DOWN) && !self.state().contains(PortState::LINK_DOWN)
    }

    fn set_config(&self, config: PortConfig, mask: PortConfig) {
        let cur = self.config();
        let new = (cur & !mask) | (config & mask);
        self.config.store(new.bits(), Ordering::Release);
        self.refresh_live();
    }

    fn set_link(&self, up: bool) -> bool {
        let cur = self.state();
        let mut new = cur;
        new.set(PortState::LINK_DOWN, !up);
        self.state.store(new.bits(), Ordering::Release);
        self.refresh_live();
        cur.contains(PortState::LINK_DOWN) == up
    }

    fn refresh_live(&self) {
        let mut s = self.state();
        s.set(PortState::LIVE, !self.config().contains(PortConfig::PORT_DOWN) && !s.contains(PortState::LINK_DOWN));
        self.state.store(s.bits(), Ordering::Release);
    }

    /// Whether a frame may be accepted on this port
    pub fn can_receive(&self) -> bool {
        self.is_live() && !self.config().contains(PortConfig::NO_RECV)
    }

    fn queue(&self, queue_id: u32) -> Option<&Queue> {
        self.queues.iter().find(|q| q.spec.queue_id == queue_id)
    }

    pub fn has_queue(&self, queue_id: u32) -> bool {
        queue_id == DEFAULT_QUEUE || self.queue(queue_id).is_some()
    }

    pub fn desc(&self) -> PortDesc {
        PortDesc {
            port_no: self.spec.port_no,
            name: self.spec.name.clone(),
            hw_addr: self.spec.hw_addr,
            config: self.config().bits(),
            state: self.state().bits(),
            curr_speed_kbps: self.spec.curr_speed_kbps,
        }
    }

    pub fn stats(&self) -> PortStats {
        let c = &self.counters;
        PortStats {
            port_no: self.spec.port_no,
            rx_packets: c.rx_packets.get(),
            tx_packets: c.tx_packets.get(),
            rx_bytes: c.rx_bytes.get(),
            tx_bytes: c.tx_bytes.get(),
            rx_dropped: c.rx_dropped.get(),
            tx_dropped: c.tx_dropped.get(),
            rx_errors: c.rx_errors.get(),
            queues: self
                .queues
                .iter()
                .map(|q| QueueStats {
                    queue_id: q.spec.queue_id,
                    tx_packets: q.tx_packets.get(),
                    tx_bytes: q.tx_bytes.get(),
                })
                .collect(),
        }
    }
}

/// Port description snapshot (`ofp_port`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortDesc {
    pub port_no: u32,
    pub name: String,
    pub hw_addr: [u8; 6],
    pub config: u32,
    pub state: u32,
    pub curr_speed_kbps: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queue_id: u32,
    pub tx_packets: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortStats {
    pub port_no: u32,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub rx_errors: u64,
    pub queues: Vec<QueueStats>,
}

/// All ports of a datapath
pub struct PortTable {
    ports: DashMap<u32, Arc<Port>>,
    sink: Arc<dyn PortSink>,
    unknown_port_drops: AtomicCounter,
}

impl PortTable {
    pub fn new(sink: Arc<dyn PortSink>) -> Self {
        Self {
            ports: DashMap::new(),
            sink,
            unknown_port_drops: AtomicCounter::new(0),
        }
    }

    pub fn add(&self, spec: PortSpec) -> Result<Arc<Port>, PortError> {
        let no = spec.port_no;
        if no == 0 || (no > OFPP_MAX && no != OFPP_LOCAL) {
            return Err(PortError::InvalidNumber(no));
        }
        match self.ports.entry(no) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(PortError::Exists(no)),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let port = Arc::new(Port::new(spec));
                v.insert(Arc::clone(&port));
                debug!(port = no, name = port.name(), "port added");
                Ok(port)
            }
        }
    }

    pub fn remove(&self, port_no: u32) -> Option<Arc<Port>> {
        self.ports.remove(&port_no).map(|(_, p)| p)
    }

    pub fn get(&self, port_no: u32) -> Option<Arc<Port>> {
        self.ports.get(&port_no).map(|p| Arc::clone(p.value()))
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Physical port numbers in ascending order
    pub fn port_numbers(&self) -> Vec<u32> {
        let mut nos: Vec<u32> = self.ports.iter().map(|p| *p.key()).filter(|n| *n <= OFPP_MAX).collect();
        nos.sort_unstable();
        nos
    }

    /// Frames sent to ports that do not exist
    pub fn unknown_port_drops(&self) -> u64 {
        self.unknown_port_drops.get()
    }

    /// Account a received frame; `false` when the port may not receive
    pub fn on_receive(&self, port_no: u32, len: usize) -> bool {
        let Some(port) = self.get(port_no) else {
            self.unknown_port_drops.inc();
            return false;
        };
        if !port.can_receive() {
            port.counters.rx_dropped.inc();
            return false;
        }
        port.counters.rx_packets.inc();
        port.counters.rx_bytes.add(len as u64);
        true
    }

    /// Count a malformed frame received on `port_no`
    pub fn record_rx_error(&self, port_no: u32) {
        if let Some(port) = self.get(port_no) {
            port.counters.rx_errors.inc();
        }
    }

    /// Transmit on a physical or local port
    ///
    /// Down, non-forwarding or missing ports and unknown queues drop the
    /// frame silently and count it. Returns whether the sink was called.
    pub fn send(&self, port_no: u32, queue_id: u32, frame: Bytes) -> bool {
        let Some(port) = self.get(port_no) else {
            self.unknown_port_drops.inc();
            trace!(port = port_no, "send to unknown port dropped");
            return false;
        };
        if !port.is_live() || port.config().contains(PortConfig::NO_FWD) || !port.has_queue(queue_id) {
            port.counters.tx_dropped.inc();
            trace!(port = port_no, queue = queue_id, "send dropped");
            return false;
        }

        let len = frame.len() as u64;
        port.counters.tx_packets.inc();
        port.counters.tx_bytes.add(len);
        if let Some(q) = port.queue(queue_id) {
            q.tx_packets.inc();
            q.tx_bytes.add(len);
        }
        self.sink.transmit(port_no, queue_id, frame);
        true
    }

    /// Apply a port-mod; returns the updated description
    pub fn port_mod(&self, port_no: u32, hw_addr: [u8; 6], config: PortConfig, mask: PortConfig) -> Result<PortDesc, PortError> {
        let port = self.get(port_no).ok_or(PortError::Unknown(port_no))?;
        if port.hw_addr() != hw_addr {
            return Err(PortError::HwAddrMismatch(port_no));
        }
        port.set_config(config, mask);
        Ok(port.desc())
    }

    /// Change link state; returns the description when the state changed
    pub fn set_link(&self, port_no: u32, up: bool) -> Result<Option<PortDesc>, PortError> {
        let port = self.get(port_no).ok_or(PortError::Unknown(port_no))?;
        if port.set_link(up) {
            Ok(Some(port.desc()))
        } else {
            Ok(None)
        }
    }

    pub fn stats(&self) -> Vec<PortStats> {
        let mut stats: Vec<PortStats> = self.ports.iter().map(|p| p.stats()).collect();
        stats.sort_by_key(|s| s.port_no);
        stats
    }

    pub fn descs(&self) -> Vec<PortDesc> {
        let mut descs: Vec<PortDesc> = self.ports.iter().map(|p| p.desc()).collect();
        descs.sort_by_key(|d| d.port_no);
        descs
    }
}

impl Liveness for PortTable {
    fn port_live(&self, port_no: u32) -> bool {
        self.get(port_no).map_or(false, |p| p.is_live())
    }
}
