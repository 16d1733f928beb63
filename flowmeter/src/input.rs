//! Synthetic packet source
//!
//! Generates a bounded stream of well-formed packets for end-to-end
//! runs and throughput measurements. Two modes: `1f` replays one
//! long-lived flow, `nf` emits a fresh one-packet flow every time.
//! Synthetic time advances a few microseconds per packet so cache
//! timeouts behave as they would on a live link.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;

use meter_cache::CacheStats;
use meter_common::options::{parse_value, OptionsParser};
use meter_common::packet::{IPPROTO_TCP, TCP_ACK};
use meter_common::{MeterError, MeterResult, Packet, Timestamp};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DEFAULT_PACKET_SIZE: u16 = 512;
const TICK_USEC: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// One flow taking every packet.
    OneFlow,
    /// A new one-packet flow per packet.
    ManyFlows,
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    mode: Mode,
    seed: u64,
    /// Wall-clock bound in seconds, 0 for unbounded.
    duration: u64,
    /// Packet count bound, 0 for unbounded.
    count: u64,
    size: u16,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            mode: Mode::OneFlow,
            seed: 0,
            duration: 10,
            count: 0,
            size: DEFAULT_PACKET_SIZE,
        }
    }
}

impl BenchConfig {
    pub fn options() -> OptionsParser {
        OptionsParser::new("bench", "Input plugin generating synthetic packets")
            .arg("m", "mode", "STR", "1f (one N-packet flow) or nf (N one-packet flows)")
            .arg("S", "seed", "NUM", "Random generator seed")
            .arg("d", "duration", "TIME", "Generation duration in seconds, 0 = unbounded")
            .arg("p", "count", "SIZE", "Packet count, 0 = unbounded")
            .arg("s", "size", "SIZE", "Packet size in bytes")
    }

    pub fn from_options(params: &str) -> MeterResult<Self> {
        let mut cfg = Self::default();
        for (key, value) in Self::options().parse(params)? {
            match key {
                "mode" => {
                    cfg.mode = match value.unwrap_or_default() {
                        "1f" => Mode::OneFlow,
                        "nf" => Mode::ManyFlows,
                        other => {
                            return Err(MeterError::Options(format!(
                                "bench: unknown mode '{other}'"
                            )))
                        }
                    }
                }
                "seed" => cfg.seed = parse_value(key, value.unwrap_or_default())?,
                "duration" => cfg.duration = parse_value(key, value.unwrap_or_default())?,
                "count" => cfg.count = parse_value(key, value.unwrap_or_default())?,
                "size" => {
                    cfg.size = parse_value(key, value.unwrap_or_default())?;
                    if cfg.size < 64 {
                        return Err(MeterError::Options(
                            "bench: packet size must be at least 64".into(),
                        ));
                    }
                }
                _ => unreachable!(),
            }
        }
        if cfg.count == 0 && cfg.duration == 0 {
            return Err(MeterError::Config(
                "bench: either count or duration must bound the run".into(),
            ));
        }
        Ok(cfg)
    }
}

pub struct BenchInput {
    cfg: BenchConfig,
    rng: StdRng,
    payload: Vec<u8>,
    started: Instant,
    ts: Timestamp,
    generated: u64,
}

impl BenchInput {
    pub fn from_options(params: &str) -> MeterResult<Self> {
        Ok(Self::new(BenchConfig::from_options(params)?))
    }

    pub fn new(cfg: BenchConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let payload_len = cfg.size.saturating_sub(54) as usize;
        let payload = (0..payload_len).map(|_| rng.gen()).collect();
        Self {
            cfg,
            rng,
            payload,
            started: Instant::now(),
            ts: Timestamp::now(),
            generated: 0,
        }
    }

    pub fn generated(&self) -> u64 {
        self.generated
    }

    /// Next synthetic packet, or `None` once a bound is reached.
    pub fn next_packet(&mut self) -> Option<Packet<'_>> {
        if self.cfg.count != 0 && self.generated >= self.cfg.count {
            return None;
        }
        if self.cfg.duration != 0 && self.started.elapsed().as_secs() >= self.cfg.duration {
            return None;
        }

        self.generated += 1;
        self.ts.usec += TICK_USEC;
        if self.ts.usec >= 1_000_000 {
            self.ts.sec += 1;
            self.ts.usec -= 1_000_000;
        }

        let (src_ip, src_port) = match self.cfg.mode {
            Mode::OneFlow => (Ipv4Addr::new(192, 168, 1, 1), 40000),
            Mode::ManyFlows => (
                Ipv4Addr::from(self.rng.gen::<u32>() | 0x0a00_0000),
                self.rng.gen_range(1024..u16::MAX),
            ),
        };

        Some(Packet {
            ts: self.ts,
            src_mac: [0x02, 0, 0, 0, 0, 1],
            dst_mac: [0x02, 0, 0, 0, 0, 2],
            src_ip: IpAddr::V4(src_ip),
            dst_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 254)),
            ip_proto: IPPROTO_TCP,
            src_port,
            dst_port: 80,
            tcp_flags: TCP_ACK,
            wire_len: self.cfg.size,
            ip_len: self.cfg.size.saturating_sub(14),
            ip_payload_len: self.cfg.size.saturating_sub(34),
            payload: &self.payload,
            source_pkt: true,
        })
    }

    /// Log a generation summary next to the cache's own counters.
    pub fn report(&self, cache: &CacheStats) {
        tracing::info!(
            packets = self.generated,
            flows = cache.exported,
            "benchmark input finished"
        );
    }
}
