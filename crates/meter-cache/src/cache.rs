//! Set-associative flow cache
//!
//! Slots are grouped into lines sharing a hash prefix. Within a line,
//! position 0 is most recently used and the tail is the eviction
//! target; new flows enter at the middle so one-shot flows cannot
//! displace recent heavy hitters. A hash of 0 marks an empty slot.
//!
//! The table holds boxed slots so LRU rotation and eviction shifts
//! move pointers, not records.

use meter_common::flow::EndReason;
use meter_common::packet::{TCP_FIN, TCP_RST, TCP_SYN};
use meter_common::plugin::{ActionMask, FlowProcessor};
use meter_common::{Flow, MeterError, MeterResult, Packet};

use crate::config::CacheConfig;
use crate::key::FlowKey;
use crate::ring::RingProducer;
use crate::stats::CacheStats;

#[derive(Default)]
struct Slot {
    hash: u64,
    flow: Flow,
}

impl Slot {
    #[inline]
    fn is_empty(&self) -> bool {
        self.hash == 0
    }

    #[inline]
    fn belongs(&self, hash: u64) -> bool {
        self.hash == hash
    }
}

/// Inactive flows with FIN or RST end as Eof, others as Inactive.
fn timeout_reason(flow: &Flow) -> EndReason {
    if flow.saw_fin_or_rst() {
        EndReason::Eof
    } else {
        EndReason::Inactive
    }
}

pub struct FlowCache<P: FlowProcessor> {
    table: Vec<Box<Slot>>,
    cache_size: usize,
    line_size: usize,
    line_mask: u64,
    /// Insert position for flows that displaced the line tail.
    new_idx: usize,
    active: u64,
    inactive: u64,
    split_biflow: bool,
    /// Round-robin cursor of the incremental expiry sweep.
    sweep_idx: usize,
    processor: P,
    ring: RingProducer,
    stats: CacheStats,
}

impl<P: FlowProcessor> FlowCache<P> {
    pub fn new(cfg: &CacheConfig, processor: P, ring: RingProducer) -> MeterResult<Self> {
        cfg.validate()?;
        let cache_size = cfg.cache_size as usize;
        let line_size = cfg.line_size as usize;
        if cache_size == 0 {
            return Err(MeterError::Config("cache needs at least one slot".into()));
        }
        let mut table = Vec::new();
        table.try_reserve_exact(cache_size).map_err(|_| {
            MeterError::Config("not enough memory for the flow table".into())
        })?;
        table.resize_with(cache_size, Box::default);
        Ok(Self {
            table,
            cache_size,
            line_size,
            line_mask: u64::from((cfg.cache_size - 1) & !(cfg.line_size - 1)),
            new_idx: line_size / 2,
            active: u64::from(cfg.active),
            inactive: u64::from(cfg.inactive),
            split_biflow: cfg.split_biflow,
            sweep_idx: 0,
            processor,
            ring,
            stats: CacheStats::default(),
        })
    }

    /// Feed one packet through the cache. Sets `pkt.source_pkt` after
    /// keying; analyzers see it in every later callback.
    pub fn put(&mut self, pkt: &mut Packet) {
        self.processor.pre_create(pkt);

        let Some((key, key_inv)) = FlowKey::pair(pkt) else {
            self.stats.malformed += 1;
            return;
        };

        let mut hashval = key.hash();
        let mut line_index = (hashval & self.line_mask) as usize;
        let mut flow_index = 0usize;
        let mut found = false;
        let mut source_flow = true;

        for i in line_index..line_index + self.line_size {
            if self.table[i].belongs(hashval) {
                found = true;
                flow_index = i;
                break;
            }
        }

        if !found && !self.split_biflow {
            let hash_inv = key_inv.hash();
            let line_inv = (hash_inv & self.line_mask) as usize;
            for i in line_inv..line_inv + self.line_size {
                if self.table[i].belongs(hash_inv) {
                    found = true;
                    source_flow = false;
                    hashval = hash_inv;
                    line_index = line_inv;
                    flow_index = i;
                    break;
                }
            }
        }

        if found {
            let depth = (flow_index - line_index + 1) as u64;
            self.stats.lookups += depth;
            self.stats.lookups_sq += depth * depth;
            self.stats.hits += 1;

            // Promote to the head of the line.
            self.table[line_index..=flow_index].rotate_right(1);
            flow_index = line_index;
        } else {
            let empty = (line_index..line_index + self.line_size)
                .find(|&i| self.table[i].is_empty());
            match empty {
                Some(i) => {
                    flow_index = i;
                    self.stats.empty += 1;
                }
                None => {
                    // Line full: evict the tail, then shift the middle
                    // of the line right so the newcomer lands at the
                    // new-entry position.
                    let tail = line_index + self.line_size - 1;
                    self.processor.pre_export(&mut self.table[tail].flow);
                    self.table[tail].flow.end_reason = EndReason::NoResources;
                    self.export_at(tail);
                    self.stats.expired += 1;

                    let new_index = line_index + self.new_idx;
                    self.table[new_index..=tail].rotate_right(1);
                    flow_index = new_index;
                    self.stats.not_empty += 1;
                }
            }
        }

        pkt.source_pkt = source_flow;

        // Back-to-back sessions on one 5-tuple: a SYN against a flow
        // that already recorded FIN or RST in this direction closes
        // the old flow and starts over.
        let dir_flags = if source_flow {
            self.table[flow_index].flow.src_tcp_flags
        } else {
            self.table[flow_index].flow.dst_tcp_flags
        };
        if pkt.tcp_flags & TCP_SYN != 0 && dir_flags & (TCP_FIN | TCP_RST) != 0 {
            self.table[flow_index].flow.end_reason = EndReason::Eof;
            self.export_at(flow_index);
            self.put(pkt);
            return;
        }

        if self.table[flow_index].is_empty() {
            self.table[flow_index].hash = hashval;
            self.table[flow_index].flow = Flow::create(pkt);
            let ret = self.processor.post_create(&mut self.table[flow_index].flow, pkt);
            if ret.flush() {
                self.table[flow_index].flow.end_reason = EndReason::Forced;
                self.export_at(flow_index);
                self.stats.flushed += 1;
            }
        } else {
            if pkt.ts.secs_since(self.table[flow_index].flow.time_last) >= self.inactive {
                self.table[flow_index].flow.end_reason =
                    timeout_reason(&self.table[flow_index].flow);
                self.processor.pre_export(&mut self.table[flow_index].flow);
                self.export_at(flow_index);
                self.stats.expired += 1;
                self.put(pkt);
                return;
            }

            let ret = self.processor.pre_update(&mut self.table[flow_index].flow, pkt);
            if ret.flush() {
                self.flush_at(pkt, flow_index, ret, source_flow);
                return;
            }
            self.table[flow_index].flow.update(pkt, source_flow);
            let ret = self.processor.post_update(&mut self.table[flow_index].flow, pkt);
            if ret.flush() {
                self.flush_at(pkt, flow_index, ret, source_flow);
                return;
            }

            if pkt.ts.secs_since(self.table[flow_index].flow.time_first) >= self.active {
                self.table[flow_index].flow.end_reason = EndReason::Active;
                self.processor.pre_export(&mut self.table[flow_index].flow);
                self.export_at(flow_index);
                self.stats.expired += 1;
            }
        }

        self.export_expired(pkt.ts.sec);
    }

    /// Analyzer-requested flush. With reinsert, the current packet
    /// restarts a fresh flow in the same slot and `post_create` runs
    /// again for it.
    fn flush_at(&mut self, pkt: &mut Packet, index: usize, mask: ActionMask, fwd: bool) {
        self.stats.flushed += 1;

        if mask.reinsert() {
            let slot = &mut self.table[index];
            slot.flow.end_reason = EndReason::Forced;
            let exported = std::mem::take(&mut slot.flow);
            let mut resident = exported.restarted();
            resident.update(pkt, fwd);
            slot.flow = resident;
            // Hash is untouched: the successor keeps the slot's
            // identity.
            self.ring.push(exported);
            self.stats.exported += 1;

            let ret = self.processor.post_create(&mut self.table[index].flow, pkt);
            if ret.flush() {
                self.flush_at(pkt, index, ret, fwd);
            }
        } else {
            self.table[index].flow.end_reason = EndReason::Forced;
            self.export_at(index);
        }
    }

    /// Move the record at `index` to the export ring and free the
    /// slot. The ring push blocks when the consumer lags.
    fn export_at(&mut self, index: usize) {
        let slot = &mut self.table[index];
        let flow = std::mem::take(&mut slot.flow);
        slot.hash = 0;
        self.ring.push(flow);
        self.stats.exported += 1;
    }

    /// Incremental expiry: examine half a line per call, round-robin
    /// over the whole table, and export anything past its inactive
    /// deadline.
    pub fn export_expired(&mut self, now_sec: u64) {
        for i in self.sweep_idx..self.sweep_idx + self.new_idx {
            if !self.table[i].is_empty()
                && now_sec.saturating_sub(self.table[i].flow.time_last.sec) >= self.inactive
            {
                self.table[i].flow.end_reason = timeout_reason(&self.table[i].flow);
                self.processor.pre_export(&mut self.table[i].flow);
                self.export_at(i);
                self.stats.expired += 1;
            }
        }
        self.sweep_idx = (self.sweep_idx + self.new_idx) & (self.cache_size - 1);
    }

    /// Export every live flow with reason Forced. Called once at
    /// shutdown.
    pub fn finish(&mut self) {
        for i in 0..self.cache_size {
            if !self.table[i].is_empty() {
                self.processor.pre_export(&mut self.table[i].flow);
                self.table[i].flow.end_reason = EndReason::Forced;
                self.export_at(i);
                self.stats.expired += 1;
            }
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of occupied slots.
    pub fn live_flows(&self) -> usize {
        self.table.iter().filter(|s| !s.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{export_ring, RingConsumer};
    use meter_common::packet::IPPROTO_TCP;
    use meter_common::plugin::NoopProcessor;
    use meter_common::Timestamp;
    use std::net::IpAddr;

    fn cfg(size: u32, line: u32) -> CacheConfig {
        CacheConfig {
            cache_size: size,
            line_size: line,
            active: 300,
            inactive: 30,
            split_biflow: false,
        }
    }

    fn packet(
        src: &str,
        dst: &str,
        sport: u16,
        dport: u16,
        flags: u8,
        ts_sec: u64,
    ) -> Packet<'static> {
        Packet {
            ts: Timestamp::new(ts_sec, 0),
            src_mac: [2; 6],
            dst_mac: [4; 6],
            src_ip: src.parse::<IpAddr>().unwrap(),
            dst_ip: dst.parse::<IpAddr>().unwrap(),
            ip_proto: IPPROTO_TCP,
            src_port: sport,
            dst_port: dport,
            tcp_flags: flags,
            wire_len: 74,
            ip_len: 60,
            ip_payload_len: 40,
            payload: &[],
            source_pkt: true,
        }
    }

    fn single_line_cache() -> (FlowCache<NoopProcessor>, RingConsumer) {
        // cache_size == line_size puts every flow into one line.
        let (tx, rx) = export_ring(64);
        (
            FlowCache::new(&cfg(8, 8), NoopProcessor, tx).unwrap(),
            rx,
        )
    }

    fn drain(rx: &RingConsumer) -> Vec<Flow> {
        let mut out = Vec::new();
        while let Some(f) = rx.try_pop() {
            out.push(f);
        }
        out
    }

    #[test]
    fn test_lru_promotes_hit_to_head() {
        let (mut cache, _rx) = single_line_cache();
        // New flows fill empty slots in scan order: 1000, 1001, 1002.
        for (i, sport) in [1000u16, 1001, 1002].iter().enumerate() {
            let mut p = packet("10.0.0.1", "10.0.0.2", *sport, 80, 0, i as u64);
            cache.put(&mut p);
        }
        assert_eq!(cache.table[0].flow.src_port, 1000);
        assert_eq!(cache.table[1].flow.src_port, 1001);
        assert_eq!(cache.table[2].flow.src_port, 1002);

        // Hit the record at position 2; it moves to position 0 and
        // positions 0..1 each shift down by one.
        let mut p = packet("10.0.0.1", "10.0.0.2", 1002, 80, 0, 3);
        cache.put(&mut p);
        assert_eq!(cache.table[0].flow.src_port, 1002);
        assert_eq!(cache.table[1].flow.src_port, 1000);
        assert_eq!(cache.table[2].flow.src_port, 1001);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_line_eviction_exports_tail() {
        let (mut cache, rx) = single_line_cache();
        // Fill all 8 slots with distinct flows.
        for sport in 0..8u16 {
            let mut p = packet("10.0.0.1", "10.0.0.2", 2000 + sport, 80, 0, u64::from(sport));
            cache.put(&mut p);
        }
        assert_eq!(cache.live_flows(), 8);
        assert!(drain(&rx).is_empty());

        // One more: the flow sitting at the line tail is evicted with
        // NoResources and the newcomer sits at line/2.
        let mut p = packet("10.0.0.1", "10.0.0.2", 2008, 80, 0, 8);
        cache.put(&mut p);

        let exported = drain(&rx);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].src_port, 2007);
        assert_eq!(exported[0].end_reason, EndReason::NoResources);
        assert_eq!(cache.table[4].flow.src_port, 2008);
        assert_eq!(cache.live_flows(), 8);
    }

    #[test]
    fn test_biflow_folds_reverse_direction() {
        let (tx, rx) = export_ring(64);
        let mut cache = FlowCache::new(&cfg(64, 4), NoopProcessor, tx).unwrap();

        let mut fwd = packet("1.2.3.4", "5.6.7.8", 1000, 80, 0, 0);
        cache.put(&mut fwd);
        assert!(fwd.source_pkt);

        let mut rev = packet("5.6.7.8", "1.2.3.4", 80, 1000, 0, 1);
        cache.put(&mut rev);
        assert!(!rev.source_pkt);

        assert_eq!(cache.live_flows(), 1);
        cache.finish();
        let flows = drain(&rx);
        assert_eq!(flows.len(), 1);
        let f = &flows[0];
        // First packet defines the canonical direction.
        assert_eq!(f.src_port, 1000);
        assert_eq!(f.src_packets, 1);
        assert_eq!(f.dst_packets, 1);
    }

    #[test]
    fn test_split_biflow_keeps_directions_apart() {
        let (tx, rx) = export_ring(64);
        let mut split = cfg(64, 4);
        split.split_biflow = true;
        let mut cache = FlowCache::new(&split, NoopProcessor, tx).unwrap();

        let mut fwd = packet("1.2.3.4", "5.6.7.8", 1000, 80, 0, 0);
        cache.put(&mut fwd);
        let mut rev = packet("5.6.7.8", "1.2.3.4", 80, 1000, 0, 1);
        cache.put(&mut rev);

        assert_eq!(cache.live_flows(), 2);
        cache.finish();
        assert_eq!(drain(&rx).len(), 2);
    }

    #[test]
    fn test_inactive_timeout_reason() {
        let (tx, rx) = export_ring(64);
        let mut cache = FlowCache::new(&cfg(64, 4), NoopProcessor, tx).unwrap();

        let mut p = packet("1.2.3.4", "5.6.7.8", 1000, 80, 0, 100);
        cache.put(&mut p);
        // Next packet on the same tuple past the inactive deadline:
        // old flow exported as Inactive, packet starts a new flow.
        let mut p = packet("1.2.3.4", "5.6.7.8", 1000, 80, 0, 131);
        cache.put(&mut p);

        let exported = drain(&rx);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].end_reason, EndReason::Inactive);
        assert_eq!(exported[0].src_packets, 1);
        assert_eq!(cache.live_flows(), 1);
    }

    #[test]
    fn test_active_timeout_reason() {
        let (tx, rx) = export_ring(64);
        let mut cache = FlowCache::new(&cfg(64, 4), NoopProcessor, tx).unwrap();

        // Continuous traffic: packets every 10 s never trip the
        // inactive timeout, but the flow crosses the active deadline.
        let mut ts = 0;
        loop {
            let mut p = packet("1.2.3.4", "5.6.7.8", 1000, 80, 0, ts);
            cache.put(&mut p);
            if let Some(f) = rx.try_pop() {
                assert_eq!(f.end_reason, EndReason::Active);
                assert_eq!(f.time_last.secs_since(f.time_first), 300);
                break;
            }
            ts += 10;
            assert!(ts < 1000, "active timeout never fired");
        }

        // The tuple is free again; the next packet creates a fresh
        // flow.
        let mut p = packet("1.2.3.4", "5.6.7.8", 1000, 80, 0, ts + 10);
        cache.put(&mut p);
        assert_eq!(cache.live_flows(), 1);
    }

    #[test]
    fn test_syn_after_close_starts_new_flow() {
        let (tx, rx) = export_ring(64);
        let mut cache = FlowCache::new(&cfg(64, 4), NoopProcessor, tx).unwrap();

        // Scenario: handshake, data, FINs both ways, then a new SYN.
        let mut p = packet("1.2.3.4", "5.6.7.8", 1000, 80, TCP_SYN, 0);
        cache.put(&mut p);
        let mut p = packet("5.6.7.8", "1.2.3.4", 80, 1000, TCP_SYN | 0x10, 0);
        cache.put(&mut p);
        let mut p = packet("1.2.3.4", "5.6.7.8", 1000, 80, TCP_FIN | 0x10, 1);
        cache.put(&mut p);
        let mut p = packet("5.6.7.8", "1.2.3.4", 80, 1000, TCP_FIN | 0x10, 1);
        cache.put(&mut p);
        assert!(drain(&rx).is_empty());

        let mut p = packet("1.2.3.4", "5.6.7.8", 1000, 80, TCP_SYN, 2);
        cache.put(&mut p);

        let exported = drain(&rx);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].end_reason, EndReason::Eof);
        assert_eq!(exported[0].src_packets + exported[0].dst_packets, 4);

        cache.finish();
        let rest = drain(&rx);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].src_packets, 1);
    }

    #[test]
    fn test_sweep_expires_idle_flows() {
        let (tx, rx) = export_ring(64);
        let mut cache = FlowCache::new(&cfg(16, 4), NoopProcessor, tx).unwrap();

        let mut p = packet("1.2.3.4", "5.6.7.8", 1000, 80, 0, 0);
        cache.put(&mut p);

        // Sweep the whole table at a time past the deadline; the
        // cursor covers line/2 slots per call.
        for _ in 0..8 {
            cache.export_expired(31);
        }
        let exported = drain(&rx);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].end_reason, EndReason::Inactive);
        assert_eq!(cache.live_flows(), 0);
    }

    #[test]
    fn test_malformed_packet_dropped() {
        let (tx, rx) = export_ring(64);
        let mut cache = FlowCache::new(&cfg(64, 4), NoopProcessor, tx).unwrap();

        let mut bad = packet("1.2.3.4", "5.6.7.8", 1, 2, 0, 0);
        bad.dst_ip = "2001:db8::1".parse().unwrap();
        cache.put(&mut bad);

        assert_eq!(cache.stats().malformed, 1);
        assert_eq!(cache.live_flows(), 0);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_finish_exports_everything_forced() {
        let (tx, rx) = export_ring(64);
        let mut cache = FlowCache::new(&cfg(64, 4), NoopProcessor, tx).unwrap();

        for sport in 0..10u16 {
            let mut p = packet("1.2.3.4", "5.6.7.8", 3000 + sport, 80, 0, 0);
            cache.put(&mut p);
        }
        cache.finish();

        let exported = drain(&rx);
        assert_eq!(exported.len(), 10);
        assert!(exported.iter().all(|f| f.end_reason == EndReason::Forced));
        assert_eq!(cache.live_flows(), 0);
    }
}
