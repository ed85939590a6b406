// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Identity of flow matches as used by a flow table.

use common::*;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use vrn::print::print_flow_match_into;
use vrn_test_utils as common;

fn hash_of<T: Hash>(val: &T) -> u64 {
    let mut h = DefaultHasher::new();
    val.hash(&mut h);
    h.finish()
}

fn eth_ip_tcp() -> Vec<FlowKey> {
    vec![
        FlowKey::InPort(PKT_IN_PORT),
        FlowKey::EtherType(ETHER_TYPE_IPV4),
        FlowKey::Ipv4 {
            src: PKT_SRC_IP,
            dst: PKT_DST_IP,
            proto: 6,
            tos: PKT_TOS,
        },
        FlowKey::Tcp { src: PKT_SRC_PORT, dst: PKT_DST_PORT },
    ]
}

#[test]
fn same_keys_equal() {
    let a = FlowMatch::new(eth_ip_tcp());
    let b = FlowMatch::new(eth_ip_tcp());
    assert_eq!(a, b);
    assert_eq!(hash_of(&a), hash_of(&b));
    assert_eq!(a.crc32(), b.crc32());
}

#[test]
fn order_matters() {
    let a = FlowMatch::new(eth_ip_tcp());
    let mut keys = eth_ip_tcp();
    keys.swap(0, 1);
    let b = FlowMatch::new(keys);
    assert_ne!(a, b);
    assert_eq!(a.len(), b.len());
}

#[test]
fn user_space_only_follows_keys() {
    let mut fm = FlowMatch::new(eth_ip_tcp());
    assert!(!fm.is_user_space_only());

    fm.add_key(FlowKey::IcmpEcho { ty: 8, code: 0, id: 1 });
    assert!(fm.is_user_space_only());

    // Replacing the keys forgets the software-only key.
    fm.set_keys(eth_ip_tcp());
    assert!(!fm.is_user_space_only());
    assert_eq!(fm, FlowMatch::new(eth_ip_tcp()));

    let mut keys = eth_ip_tcp();
    keys.insert(1, FlowKey::IcmpError { ty: 3, code: 1, data: vec![0x45] });
    fm.set_keys(keys);
    assert!(fm.is_user_space_only());
}

#[test]
fn every_key_classified() {
    let mac = MacAddr::from_const([0x02, 0, 0, 0, 0, 1]);
    let kernel = [
        FlowKey::InPort(1),
        FlowKey::Ethernet { src: mac, dst: MacAddr::BROADCAST },
        FlowKey::EtherType(ETHER_TYPE_ARP),
        FlowKey::Vlan(100),
        FlowKey::Ipv4 { src: PKT_SRC_IP, dst: PKT_DST_IP, proto: 17, tos: 0 },
        FlowKey::Tcp { src: 1, dst: 2 },
        FlowKey::Udp { src: 1, dst: 2 },
        FlowKey::Icmp { ty: 8, code: 0 },
        FlowKey::Arp {
            op: 1,
            sip: PKT_SRC_IP,
            tip: PKT_DST_IP,
            sha: mac,
            tha: MacAddr::ZERO,
        },
        FlowKey::Tunnel { id: 0x1de, src: PKT_SRC_IP, dst: PKT_DST_IP },
        FlowKey::Priority(3),
    ];
    assert!(kernel.iter().all(|k| !k.is_user_space_only()));
    assert!(!FlowMatch::new(kernel.to_vec()).is_user_space_only());

    assert!(FlowKey::IcmpEcho { ty: 0, code: 0, id: 2 }.is_user_space_only());
    assert!(
        FlowKey::IcmpError { ty: 11, code: 0, data: vec![] }
            .is_user_space_only()
    );
}

#[test]
fn usable_as_table_key() {
    let mut table = HashMap::new();
    let pkt = pkt_fixture();
    table.insert(pkt.to_flow_match(), "allow");

    // A later packet of the same flow hits the entry.
    assert_eq!(table.get(&pkt_fixture().to_flow_match()), Some(&"allow"));

    // The reply is a different flow.
    assert_eq!(table.get(&reply_of(&pkt).to_flow_match()), None);
}

#[test]
fn packet_flow_match_layout() {
    let fm = pkt_fixture().to_flow_match();
    let keys = fm.keys();
    assert_eq!(keys.len(), 5);
    assert_eq!(keys[0], FlowKey::InPort(PKT_IN_PORT));
    assert!(matches!(keys[1], FlowKey::Ethernet { .. }));
    assert_eq!(keys[2], FlowKey::EtherType(ETHER_TYPE_IPV4));
    assert_eq!(
        keys[3],
        FlowKey::Ipv4 { src: PKT_SRC_IP, dst: PKT_DST_IP, proto: 6, tos: 34 }
    );
    assert_eq!(keys[4], FlowKey::Tcp { src: 4321, dst: 1234 });
}

#[test]
fn print() {
    let fm = FlowMatch::new(eth_ip_tcp());
    let mut out = vec![];
    print_flow_match_into(&mut out, &fm).unwrap();
    let s = String::from_utf8(out).unwrap();
    assert!(s.contains("4 keys, user space only: false"));
    assert!(s.contains(&format!("0x{:08x}", fm.crc32())));
    assert!(s.contains("tcp(src=4321,dst=1234)"));
}
