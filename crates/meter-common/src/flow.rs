//! Per-flow aggregate owned by the cache
//!
//! A flow keeps the canonical 5-tuple of its first packet, the MAC
//! addresses captured from that packet, per-direction counters, and
//! the analyzer extensions attached along the way. The 5-tuple never
//! changes after creation; only counters, timestamps and extensions
//! mutate, and only from the cache's single-threaded update path.

use std::net::{IpAddr, Ipv4Addr};

use crate::ext::ExtensionSet;
use crate::packet::{Packet, IPPROTO_TCP, TCP_FIN, TCP_RST};
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IpVersion {
    #[default]
    V4 = 4,
    V6 = 6,
}

/// Why a flow left the cache (RFC 7011 flowEndReason code points).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EndReason {
    /// Not exported yet.
    #[default]
    None = 0,
    /// Inactive timeout expired without FIN/RST ever seen.
    Inactive = 1,
    /// Active timeout expired.
    Active = 2,
    /// TCP connection ended (FIN or RST observed).
    Eof = 3,
    /// Shutdown or analyzer-driven flush.
    Forced = 4,
    /// Evicted under cache-line pressure.
    NoResources = 5,
}

/// One live biflow record.
#[derive(Debug, Clone)]
pub struct Flow {
    pub ip_version: IpVersion,
    pub ip_proto: u8,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub time_first: Timestamp,
    pub time_last: Timestamp,
    pub src_packets: u32,
    pub dst_packets: u32,
    pub src_bytes: u64,
    pub dst_bytes: u64,
    pub src_tcp_flags: u8,
    pub dst_tcp_flags: u8,
    pub end_reason: EndReason,
    pub extensions: ExtensionSet,
}

impl Default for Flow {
    fn default() -> Self {
        Self {
            ip_version: IpVersion::V4,
            ip_proto: 0,
            src_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_port: 0,
            src_mac: [0; 6],
            dst_mac: [0; 6],
            time_first: Timestamp::default(),
            time_last: Timestamp::default(),
            src_packets: 0,
            dst_packets: 0,
            src_bytes: 0,
            dst_bytes: 0,
            src_tcp_flags: 0,
            dst_tcp_flags: 0,
            end_reason: EndReason::None,
            extensions: ExtensionSet::default(),
        }
    }
}

impl Flow {
    /// Populate a fresh flow from its first packet. The packet defines
    /// the canonical forward direction.
    pub fn create(pkt: &Packet) -> Self {
        let ip_version = match pkt.src_ip {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        };
        Self {
            ip_version,
            ip_proto: pkt.ip_proto,
            src_ip: pkt.src_ip,
            dst_ip: pkt.dst_ip,
            src_port: pkt.src_port,
            dst_port: pkt.dst_port,
            src_mac: pkt.src_mac,
            dst_mac: pkt.dst_mac,
            time_first: pkt.ts,
            time_last: pkt.ts,
            src_packets: 1,
            dst_packets: 0,
            src_bytes: u64::from(pkt.ip_len),
            dst_bytes: 0,
            src_tcp_flags: if pkt.ip_proto == IPPROTO_TCP {
                pkt.tcp_flags
            } else {
                0
            },
            dst_tcp_flags: 0,
            end_reason: EndReason::None,
            extensions: ExtensionSet::default(),
        }
    }

    /// Fold one more packet into the flow. `fwd` tells which
    /// direction's counters to advance.
    pub fn update(&mut self, pkt: &Packet, fwd: bool) {
        self.time_last = pkt.ts;
        if fwd {
            self.src_packets += 1;
            self.src_bytes += u64::from(pkt.ip_len);
            if pkt.ip_proto == IPPROTO_TCP {
                self.src_tcp_flags |= pkt.tcp_flags;
            }
        } else {
            self.dst_packets += 1;
            self.dst_bytes += u64::from(pkt.ip_len);
            if pkt.ip_proto == IPPROTO_TCP {
                self.dst_tcp_flags |= pkt.tcp_flags;
            }
        }
    }

    /// A successor flow restarting in the same slot: same identity,
    /// counters zeroed, no extensions. `time_first` carries over the
    /// predecessor's `time_last` so there is no gap in coverage.
    pub fn restarted(&self) -> Flow {
        Flow {
            ip_version: self.ip_version,
            ip_proto: self.ip_proto,
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            src_port: self.src_port,
            dst_port: self.dst_port,
            src_mac: self.src_mac,
            dst_mac: self.dst_mac,
            time_first: self.time_last,
            time_last: self.time_last,
            ..Flow::default()
        }
    }

    /// OR of both directions' TCP flags.
    #[inline]
    pub fn tcp_flags_combined(&self) -> u8 {
        self.src_tcp_flags | self.dst_tcp_flags
    }

    /// True when the accumulated flags show a closed TCP session.
    #[inline]
    pub fn saw_fin_or_rst(&self) -> bool {
        self.tcp_flags_combined() & (TCP_FIN | TCP_RST) != 0
    }
}
