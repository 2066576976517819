//! Property tests for flow table lookup order and counters

use ofs_common::{MatchField, Timestamp};
use ofs_datapath::flow_table::FlowSpec;
use ofs_datapath::{Action, FlowTable, FrameBuilder, Instruction, Match, Packet, PacketContext, TableConfig};
use proptest::prelude::*;
use std::collections::HashSet;

fn packet(tcp_src: u16, tcp_dst: u16) -> PacketContext {
    let frame = FrameBuilder::new().ipv4(0x0a00_0001, 0x0a00_0002, 64, 0).tcp(tcp_src, tcp_dst).build();
    PacketContext::new(Packet::from_slice(&frame).unwrap(), 1)
}

fn spec(priority: u16, m: Match, tag: u32) -> FlowSpec {
    FlowSpec {
        priority,
        match_fields: m,
        cookie: tag as u64,
        instructions: vec![Instruction::ApplyActions(vec![Action::output(tag)])],
        ..Default::default()
    }
}

/// One of a few match shapes over the TCP/IPv4 headers
fn match_strategy() -> impl Strategy<Value = Match> {
    prop_oneof![
        Just(Match::any()),
        (0u16..8).prop_map(|p| Match::any().exact(MatchField::TcpDst, p as u128)),
        (0u32..4).prop_map(|p| Match::any().masked(MatchField::Ipv4Src, 0x0a00_0000 | p as u128, 0xffff_ff0e)),
        (0u16..4).prop_map(|p| Match::any()
            .exact(MatchField::IpProto, 6)
            .exact(MatchField::TcpSrc, p as u128)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn highest_priority_match_wins(
        entries in prop::collection::vec((1u16..1000, match_strategy()), 1..24),
        tcp_src in 0u16..4,
        tcp_dst in 0u16..8,
    ) {
        let table = FlowTable::new(0, TableConfig::default());
        let mut seen = HashSet::new();
        let mut installed = Vec::new();
        for (i, (prio, m)) in entries.into_iter().enumerate() {
            // Distinct priorities only
            if !seen.insert(prio) {
                continue;
            }
            table.add(spec(prio, m.clone(), i as u32), Timestamp::now()).unwrap();
            installed.push((prio, m, i as u64));
        }

        let ctx = packet(tcp_src, tcp_dst);
        let expected = installed
            .iter()
            .filter(|(_, m, _)| m.matches(&ctx))
            .max_by_key(|(p, _, _)| *p)
            .map(|(_, _, cookie)| *cookie);

        prop_assert_eq!(table.lookup(&ctx).map(|e| e.cookie), expected);
    }

    #[test]
    fn equal_priority_ties_go_to_earliest(
        order in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
        prio in 0u16..100,
    ) {
        // Four distinct matches that all accept the test packet
        let shapes = [
            Match::any(),
            Match::any().exact(MatchField::TcpDst, 80),
            Match::any().exact(MatchField::IpProto, 6),
            Match::any().exact(MatchField::TcpSrc, 1234),
        ];
        let table = FlowTable::new(0, TableConfig::default());
        for (seq, &i) in order.iter().enumerate() {
            table.add(spec(prio, shapes[i].clone(), seq as u32), Timestamp::now()).unwrap();
        }
        let hit = table.lookup(&packet(1234, 80)).unwrap();
        prop_assert_eq!(hit.cookie, 0);
    }

    #[test]
    fn lookup_counts_exactly_one_packet(payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let table = FlowTable::new(0, TableConfig::default());
        table.add(spec(5, Match::any().exact(MatchField::TcpDst, 80), 1), Timestamp::now()).unwrap();

        let frame = FrameBuilder::new().ipv4(1, 2, 64, 0).tcp(9, 80).payload(&payload).build();
        let ctx = PacketContext::new(Packet::from_slice(&frame).unwrap(), 1);
        let hit = table.lookup(&ctx).unwrap();

        prop_assert_eq!(hit.packet_count(), 1);
        prop_assert_eq!(hit.byte_count(), frame.len() as u64);
        prop_assert_eq!(table.stats().matched_count, 1);
    }
}
