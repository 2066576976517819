//! Packet Pipeline Benchmarks
//!
//! Parse, rewrite and full datapath traversal.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ofs_common::MatchField;
use ofs_datapath::port::QueueSpec;
use ofs_datapath::{
    Action, Bucket, Datapath, DatapathConfig, FlowMod, FrameBuilder, GroupMod, GroupType, Instruction, Match,
    Packet, PortSink, PortSpec,
};
use std::sync::Arc;

struct NullSink;

impl PortSink for NullSink {
    fn transmit(&self, _port_no: u32, _queue_id: u32, frame: Bytes) {
        black_box(frame);
    }
}

fn frame(i: u32) -> Vec<u8> {
    FrameBuilder::new()
        .ipv4(0x0a00_0000 | i, 0x0a01_0001, 64, 10)
        .tcp(1024 + (i % 4096) as u16, 80)
        .payload(&[0u8; 64])
        .build()
}

fn bench_parse(c: &mut Criterion) {
    let f = frame(1);
    c.bench_function("parse_tcp_ipv4", |b| b.iter(|| black_box(Packet::from_slice(black_box(&f)))));
}

fn bench_set_field(c: &mut Criterion) {
    let packet = Packet::from_slice(&frame(1)).expect("valid frame");
    c.bench_function("set_ipv4_dst_with_checksums", |b| {
        b.iter(|| {
            let mut p = packet.clone();
            let _ = p.set_field(MatchField::Ipv4Dst, black_box(0xc0a8_0001));
            black_box(p)
        })
    });
}

fn datapath() -> Arc<Datapath> {
    let ports = (1..=4)
        .map(|no| PortSpec {
            port_no: no,
            name: format!("eth{}", no),
            hw_addr: [2, 0, 0, 0, 0, no as u8],
            curr_speed_kbps: 10_000_000,
            queues: vec![QueueSpec { queue_id: 1, min_rate: 0, max_rate: 1000 }],
        })
        .collect();
    let (dp, _events) =
        Datapath::new(DatapathConfig { ports, ..DatapathConfig::with_tables(2) }, Arc::new(NullSink)).expect("valid config");

    dp.group_mod(&GroupMod::add(
        1,
        GroupType::Select,
        vec![
            Bucket::weighted(1, vec![Action::output(2)]),
            Bucket::weighted(1, vec![Action::output(3)]),
            Bucket::weighted(2, vec![Action::output(4)]),
        ],
    ))
    .expect("group installs");
    dp.flow_mod(&FlowMod::add(0, 10, Match::tcp().exact(MatchField::TcpDst, 80)).with_instructions(vec![
        Instruction::ApplyActions(vec![Action::DecNwTtl]),
        Instruction::GotoTable(1),
    ]))
    .expect("flow installs");
    dp.flow_mod(&FlowMod::add(1, 1, Match::any()).with_instructions(vec![Instruction::WriteActions(vec![
        Action::set_field(MatchField::IpDscp, 46),
        Action::Group(1),
    ])]))
    .expect("flow installs");
    dp
}

fn bench_datapath_throughput(c: &mut Criterion) {
    let dp = datapath();
    let frames: Vec<Vec<u8>> = (0..64).map(frame).collect();
    let bytes: usize = frames.iter().map(|f| f.len()).sum();

    let mut group = c.benchmark_group("datapath_throughput");
    group.throughput(Throughput::Bytes(bytes as u64));
    group.bench_function("64_packets_two_tables_select_group", |b| {
        b.iter(|| {
            for f in &frames {
                black_box(dp.receive(1, f));
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_set_field, bench_datapath_throughput);
criterion_main!(benches);
