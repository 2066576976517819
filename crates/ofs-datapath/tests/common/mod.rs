//! Shared fixtures for datapath integration tests

#![allow(dead_code)]

use bytes::Bytes;
use crossbeam::channel::Receiver;
use ofs_datapath::port::QueueSpec;
use ofs_datapath::{ControllerEvent, Datapath, DatapathConfig, FrameBuilder, PortSink, PortSpec};
use parking_lot::Mutex;
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = ofs_common::logging::init_tracing("ofs_datapath=debug");
    });
}

/// Sink recording every transmitted frame
#[derive(Default)]
pub struct CaptureSink {
    frames: Mutex<Vec<(u32, u32, Bytes)>>,
}

impl CaptureSink {
    pub fn ports(&self) -> Vec<u32> {
        self.frames.lock().iter().map(|(p, _, _)| *p).collect()
    }

    pub fn frames(&self) -> Vec<(u32, u32, Bytes)> {
        self.frames.lock().clone()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl PortSink for CaptureSink {
    fn transmit(&self, port_no: u32, queue_id: u32, frame: Bytes) {
        self.frames.lock().push((port_no, queue_id, frame));
    }
}

pub fn port(no: u32) -> PortSpec {
    PortSpec {
        port_no: no,
        name: format!("eth{}", no),
        hw_addr: [0x02, 0, 0, 0, 0, no as u8],
        curr_speed_kbps: 10_000_000,
        queues: vec![QueueSpec { queue_id: 1, min_rate: 0, max_rate: 1000 }],
    }
}

pub struct Harness {
    pub dp: Arc<Datapath>,
    pub events: Receiver<ControllerEvent>,
    pub sink: Arc<CaptureSink>,
}

impl Harness {
    pub fn new(tables: usize, ports: u32) -> Self {
        Self::with_config(DatapathConfig {
            ports: (1..=ports).map(port).collect(),
            ..DatapathConfig::with_tables(tables)
        })
    }

    pub fn with_config(config: DatapathConfig) -> Self {
        init_tracing();
        let sink = Arc::new(CaptureSink::default());
        let (dp, events) = Datapath::new(config, sink.clone()).expect("valid config");
        Self { dp, events, sink }
    }

    pub fn drain_events(&self) -> Vec<ControllerEvent> {
        self.events.try_iter().collect()
    }
}

/// TCP/IPv4 frame from 10.0.0.1 to 10.0.0.2
pub fn tcp_frame(src_port: u16, dst_port: u16) -> Vec<u8> {
    FrameBuilder::new()
        .ipv4(0x0a00_0001, 0x0a00_0002, 64, 0)
        .tcp(src_port, dst_port)
        .payload(&[0xab; 64])
        .build()
}

pub fn udp_frame(src: u32, dst: u32, src_port: u16, dst_port: u16) -> Vec<u8> {
    FrameBuilder::new().ipv4(src, dst, 64, 0).udp(src_port, dst_port).build()
}
