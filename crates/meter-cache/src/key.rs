//! Flow keys and hashing
//!
//! The canonical key packs (ports, L4 proto, IP version, addresses)
//! into a fixed byte layout; the inverse key swaps the endpoints so
//! the reverse direction of a conversation hashes to its own line.
//! Keys are hashed with XXH64; the high bits select the cache line.

use std::net::IpAddr;

use meter_common::Packet;
use xxhash_rust::xxh64::xxh64;

const KEY_LEN_V4: usize = 14;
const KEY_LEN_V6: usize = 38;

/// Packed flow key, hashable for line selection.
#[derive(Debug, Clone, Copy)]
pub struct FlowKey {
    buf: [u8; KEY_LEN_V6],
    len: usize,
}

impl FlowKey {
    /// Build the forward and inverse keys from a packet's L3/L4
    /// fields. Returns `None` for IP versions the cache does not
    /// support; such packets are dropped without mutating anything.
    pub fn pair(pkt: &Packet) -> Option<(FlowKey, FlowKey)> {
        match (pkt.src_ip, pkt.dst_ip) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => Some((
                Self::packed(
                    pkt.src_port,
                    pkt.dst_port,
                    pkt.ip_proto,
                    4,
                    &src.octets(),
                    &dst.octets(),
                ),
                Self::packed(
                    pkt.dst_port,
                    pkt.src_port,
                    pkt.ip_proto,
                    4,
                    &dst.octets(),
                    &src.octets(),
                ),
            )),
            (IpAddr::V6(src), IpAddr::V6(dst)) => Some((
                Self::packed(
                    pkt.src_port,
                    pkt.dst_port,
                    pkt.ip_proto,
                    6,
                    &src.octets(),
                    &dst.octets(),
                ),
                Self::packed(
                    pkt.dst_port,
                    pkt.src_port,
                    pkt.ip_proto,
                    6,
                    &dst.octets(),
                    &src.octets(),
                ),
            )),
            _ => None,
        }
    }

    fn packed(
        src_port: u16,
        dst_port: u16,
        proto: u8,
        version: u8,
        src_ip: &[u8],
        dst_ip: &[u8],
    ) -> FlowKey {
        let mut buf = [0u8; KEY_LEN_V6];
        buf[0..2].copy_from_slice(&src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&dst_port.to_be_bytes());
        buf[4] = proto;
        buf[5] = version;
        buf[6..6 + src_ip.len()].copy_from_slice(src_ip);
        buf[6 + src_ip.len()..6 + 2 * src_ip.len()].copy_from_slice(dst_ip);
        let len = if src_ip.len() == 4 { KEY_LEN_V4 } else { KEY_LEN_V6 };
        FlowKey { buf, len }
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        xxh64(&self.buf[..self.len], 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_common::packet::IPPROTO_TCP;
    use meter_common::Timestamp;

    fn packet(src: &str, dst: &str, sport: u16, dport: u16) -> Packet<'static> {
        Packet {
            ts: Timestamp::default(),
            src_mac: [0; 6],
            dst_mac: [0; 6],
            src_ip: src.parse().unwrap(),
            dst_ip: dst.parse().unwrap(),
            ip_proto: IPPROTO_TCP,
            src_port: sport,
            dst_port: dport,
            tcp_flags: 0,
            wire_len: 64,
            ip_len: 50,
            ip_payload_len: 30,
            payload: &[],
            source_pkt: true,
        }
    }

    #[test]
    fn test_inverse_symmetry() {
        let fwd_pkt = packet("1.2.3.4", "5.6.7.8", 1000, 80);
        let rev_pkt = packet("5.6.7.8", "1.2.3.4", 80, 1000);

        let (k, k_inv) = FlowKey::pair(&fwd_pkt).unwrap();
        let (rk, rk_inv) = FlowKey::pair(&rev_pkt).unwrap();

        // The reverse packet's forward key equals the forward packet's
        // inverse key, and vice versa.
        assert_eq!(k.hash(), rk_inv.hash());
        assert_eq!(k_inv.hash(), rk.hash());
        assert_ne!(k.hash(), k_inv.hash());
    }

    #[test]
    fn test_distinct_tuples_differ() {
        let a = FlowKey::pair(&packet("1.2.3.4", "5.6.7.8", 1000, 80)).unwrap().0;
        let b = FlowKey::pair(&packet("1.2.3.4", "5.6.7.8", 1001, 80)).unwrap().0;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_v6_keys() {
        let pkt = packet("2001:db8::1", "2001:db8::2", 1234, 53);
        let (k, k_inv) = FlowKey::pair(&pkt).unwrap();
        assert_ne!(k.hash(), k_inv.hash());
    }

    #[test]
    fn test_mixed_versions_rejected() {
        let pkt = packet("1.2.3.4", "5.6.7.8", 1, 2);
        let mut bad = pkt.clone();
        bad.dst_ip = "2001:db8::1".parse().unwrap();
        assert!(FlowKey::pair(&bad).is_none());
    }
}
