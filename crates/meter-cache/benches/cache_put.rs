//! Flow cache hot-path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use meter_cache::{export_ring, CacheConfig, FlowCache};
use meter_common::packet::{IPPROTO_TCP, TCP_ACK};
use meter_common::plugin::NoopProcessor;
use meter_common::{Packet, Timestamp};
use std::net::{IpAddr, Ipv4Addr};

fn packet(src: u32, sport: u16, ts: u64) -> Packet<'static> {
    Packet {
        ts: Timestamp::new(ts, 0),
        src_mac: [1; 6],
        dst_mac: [2; 6],
        src_ip: IpAddr::V4(Ipv4Addr::from(src)),
        dst_ip: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
        ip_proto: IPPROTO_TCP,
        src_port: sport,
        dst_port: 443,
        tcp_flags: TCP_ACK,
        wire_len: 74,
        ip_len: 60,
        ip_payload_len: 40,
        payload: &[],
        source_pkt: true,
    }
}

fn bench_put_single_flow(c: &mut Criterion) {
    let cfg = CacheConfig::default();
    let (tx, rx) = export_ring(16384);
    let mut cache = FlowCache::new(&cfg, NoopProcessor, tx).unwrap();

    let mut group = c.benchmark_group("cache_put");
    group.throughput(Throughput::Elements(1));
    group.bench_function("same_flow_hit", |b| {
        b.iter(|| {
            // Constant timestamp keeps the flow inside its timeouts.
            let mut p = packet(0xC0A8_0101, 12345, 0);
            cache.put(black_box(&mut p));
            while rx.try_pop().is_some() {}
        });
    });
    group.finish();
}

fn bench_put_flow_churn(c: &mut Criterion) {
    let cfg = CacheConfig {
        cache_size: 1 << 12,
        line_size: 16,
        ..CacheConfig::default()
    };
    let (tx, rx) = export_ring(16384);
    let mut cache = FlowCache::new(&cfg, NoopProcessor, tx).unwrap();

    let mut group = c.benchmark_group("cache_put");
    group.throughput(Throughput::Elements(1));
    group.bench_function("flow_churn", |b| {
        let mut n = 0u32;
        b.iter(|| {
            let mut p = packet(0x0A00_0000 | (n & 0xFFFF), (n % 16384) as u16, 0);
            cache.put(black_box(&mut p));
            n = n.wrapping_add(1);
            while rx.try_pop().is_some() {}
        });
    });
    group.finish();
}

criterion_group!(benches, bench_put_single_flow, bench_put_flow_churn);
criterion_main!(benches);
