//! Per-packet record consumed by the flow cache
//!
//! Inputs normalize every captured frame into a `Packet`. Downstream
//! stages treat it as read-only, with one exception: the cache sets
//! `source_pkt` after keying to tell analyzers whether the packet
//! travels in the flow's canonical forward direction.

use std::net::IpAddr;

use crate::time::Timestamp;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;

/// One captured frame, normalized.
///
/// The payload is a borrowed view into the input-owned buffer and must
/// stay valid until the cache's `put` returns. For ICMP the input
/// stage folds type/code into `dst_port`; protocols without ports
/// carry 0.
#[derive(Debug, Clone)]
pub struct Packet<'a> {
    pub ts: Timestamp,
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub ip_proto: u8,
    pub src_port: u16,
    pub dst_port: u16,
    /// TCP flag byte, meaningful only when `ip_proto` is TCP.
    pub tcp_flags: u8,
    /// Length of the frame on the wire.
    pub wire_len: u16,
    /// Total IP length (header + payload); flow byte counters
    /// accumulate this value.
    pub ip_len: u16,
    /// IP payload length (L4 header + payload).
    pub ip_payload_len: u16,
    /// L4 payload.
    pub payload: &'a [u8],
    /// Set by the cache: packet direction matches the flow's canonical
    /// forward direction.
    pub source_pkt: bool,
}

impl<'a> Packet<'a> {
    /// L4 payload length.
    #[inline]
    pub fn payload_len(&self) -> u16 {
        self.payload.len() as u16
    }

    #[inline]
    pub fn is_tcp(&self) -> bool {
        self.ip_proto == IPPROTO_TCP
    }

    #[inline]
    pub fn is_udp(&self) -> bool {
        self.ip_proto == IPPROTO_UDP
    }
}
