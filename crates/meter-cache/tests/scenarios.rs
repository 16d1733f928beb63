//! End-to-end cache scenarios driven through the public API.

use meter_cache::{export_ring, CacheConfig, FlowCache, RingConsumer};
use meter_common::flow::EndReason;
use meter_common::packet::{IPPROTO_TCP, TCP_ACK, TCP_FIN, TCP_PSH, TCP_SYN};
use meter_common::plugin::NoopProcessor;
use meter_common::{Flow, Packet, Timestamp};

fn config() -> CacheConfig {
    CacheConfig {
        cache_size: 256,
        line_size: 8,
        active: 300,
        inactive: 30,
        split_biflow: false,
    }
}

fn cache() -> (FlowCache<NoopProcessor>, RingConsumer) {
    let (tx, rx) = export_ring(1024);
    (FlowCache::new(&config(), NoopProcessor, tx).unwrap(), rx)
}

fn tcp_packet(
    src: &str,
    dst: &str,
    sport: u16,
    dport: u16,
    flags: u8,
    ip_len: u16,
    ts: Timestamp,
) -> Packet<'static> {
    Packet {
        ts,
        src_mac: [0xaa; 6],
        dst_mac: [0xbb; 6],
        src_ip: src.parse().unwrap(),
        dst_ip: dst.parse().unwrap(),
        ip_proto: IPPROTO_TCP,
        src_port: sport,
        dst_port: dport,
        tcp_flags: flags,
        wire_len: ip_len + 14,
        ip_len,
        ip_payload_len: ip_len - 20,
        payload: &[],
        source_pkt: true,
    }
}

fn drain(rx: &RingConsumer) -> Vec<Flow> {
    let mut out = Vec::new();
    while let Some(f) = rx.try_pop() {
        out.push(f);
    }
    out
}

/// Push a clean TCP session (handshake, one data segment each way,
/// FINs both ways) through the cache starting at `base` seconds.
fn feed_clean_session(cache: &mut FlowCache<NoopProcessor>, base: u64) {
    let a = "192.0.2.1";
    let b = "198.51.100.9";
    let steps: [(&str, &str, u16, u16, u8, u16); 6] = [
        (a, b, 49152, 80, TCP_SYN, 60),
        (b, a, 80, 49152, TCP_SYN | TCP_ACK, 60),
        (a, b, 49152, 80, TCP_PSH | TCP_ACK, 140),
        (b, a, 80, 49152, TCP_PSH | TCP_ACK, 240),
        (a, b, 49152, 80, TCP_FIN | TCP_ACK, 40),
        (b, a, 80, 49152, TCP_FIN | TCP_ACK, 40),
    ];
    for (i, (src, dst, sport, dport, flags, len)) in steps.iter().enumerate() {
        let mut p = tcp_packet(
            src,
            dst,
            *sport,
            *dport,
            *flags,
            *len,
            Timestamp::new(base + i as u64, 0),
        );
        cache.put(&mut p);
    }
}

#[test]
fn scenario_clean_close_exports_eof() {
    let (mut cache, rx) = cache();
    feed_clean_session(&mut cache, 100);
    assert!(drain(&rx).is_empty());

    // Idle past the inactive deadline; the sweep exports the closed
    // session with reason Eof because FIN was seen.
    for _ in 0..256 {
        cache.export_expired(200);
    }

    let flows = drain(&rx);
    assert_eq!(flows.len(), 1);
    let f = &flows[0];
    assert_eq!(f.end_reason, EndReason::Eof);
    assert_eq!(f.src_packets, 3);
    assert_eq!(f.dst_packets, 3);
    assert_eq!(f.src_bytes, 60 + 140 + 40);
    assert_eq!(f.dst_bytes, 60 + 240 + 40);
    assert_eq!(f.src_port, 49152);
    assert_eq!(f.dst_port, 80);
    assert!(f.time_first <= f.time_last);
}

#[test]
fn scenario_biflow_first_packet_sets_direction() {
    let (mut cache, rx) = cache();

    let mut first = tcp_packet(
        "1.2.3.4",
        "5.6.7.8",
        1000,
        80,
        TCP_ACK,
        100,
        Timestamp::new(0, 0),
    );
    cache.put(&mut first);
    assert!(first.source_pkt);

    let mut second = tcp_packet(
        "5.6.7.8",
        "1.2.3.4",
        80,
        1000,
        TCP_ACK,
        200,
        Timestamp::new(5, 0),
    );
    cache.put(&mut second);
    assert!(!second.source_pkt);

    cache.finish();
    let flows = drain(&rx);
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].src_port, 1000);
    assert_eq!(flows[0].src_bytes, 100);
    assert_eq!(flows[0].dst_bytes, 200);
}

#[test]
fn scenario_syn_after_close_two_flows() {
    let (mut cache, rx) = cache();
    feed_clean_session(&mut cache, 100);

    let mut syn = tcp_packet(
        "192.0.2.1",
        "198.51.100.9",
        49152,
        80,
        TCP_SYN,
        60,
        Timestamp::new(110, 0),
    );
    cache.put(&mut syn);
    cache.finish();

    let flows = drain(&rx);
    assert_eq!(flows.len(), 2);
    assert_eq!(flows[0].end_reason, EndReason::Eof);
    assert_eq!(flows[0].src_packets + flows[0].dst_packets, 6);
    assert_eq!(flows[1].src_packets, 1);
    assert_eq!(flows[1].dst_packets, 0);
}

#[test]
fn scenario_active_timeout_splits_long_flow() {
    let (mut cache, rx) = cache();

    let mut exported = Vec::new();
    for i in 0..40u64 {
        let mut p = tcp_packet(
            "10.1.1.1",
            "10.2.2.2",
            5000,
            443,
            TCP_ACK,
            120,
            Timestamp::new(i * 10, 0),
        );
        cache.put(&mut p);
        exported.extend(drain(&rx));
    }
    cache.finish();
    exported.extend(drain(&rx));

    assert!(exported.len() >= 2);
    assert_eq!(exported[0].end_reason, EndReason::Active);
    assert!(exported[0].time_last.secs_since(exported[0].time_first) >= 300);

    // Every packet is accounted for across the splits.
    let total: u64 = exported
        .iter()
        .map(|f| u64::from(f.src_packets + f.dst_packets))
        .sum();
    assert_eq!(total, 40);
}
