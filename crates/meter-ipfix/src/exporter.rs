//! IPFIX message assembly and transport
//!
//! Data records accumulate per template until the next record would
//! push the message past the MTU; the message is then framed and
//! written to the collector socket. TCP write failure tears the
//! session down: the sequence number restarts at 0, templates are
//! re-marked un-exported, and the reconnect path resends them before
//! any data. Reconnect attempts are rate-limited; while the back-off
//! runs, records count as dropped.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use meter_common::output::{Output, OutputStats};
use meter_common::{Flow, IpVersion, MeterResult, Timestamp};

use crate::config::IpfixConfig;
use crate::elements::{
    basic_record_len, BASIC_TEMPLATE_V4, BASIC_TEMPLATE_V6, FIRST_TEMPLATE_ID, HEADER_SIZE,
    IPFIX_VERSION, SET_HEADER_SIZE, TEMPLATE_SET_ID,
};
use crate::template::TemplateStore;

#[cfg(feature = "msec-timestamps")]
fn ts_value(ts: Timestamp) -> u64 {
    ts.as_unix_millis()
}

#[cfg(not(feature = "msec-timestamps"))]
fn ts_value(ts: Timestamp) -> u64 {
    ts.as_ntp64()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Errors that mean the transport session is gone and a reconnect is
/// needed, as opposed to transient trouble worth only a drop. The
/// errno set is exact; anything outside it drops the message without
/// touching the session.
#[cfg(unix)]
fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(
            libc::ECONNRESET
                | libc::EPIPE
                | libc::ENOTCONN
                | libc::EHOSTUNREACH
                | libc::ENETDOWN
                | libc::ENETUNREACH
                | libc::ENOBUFS
                | libc::ENOMEM
                | libc::EINTR
                | libc::ENOTSOCK
        )
    )
}

#[cfg(not(unix))]
fn is_connection_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionReset
            | BrokenPipe
            | NotConnected
            | HostUnreachable
            | NetworkDown
            | NetworkUnreachable
            | OutOfMemory
            | Interrupted
    )
}

enum Socket {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

enum SendOutcome {
    Sent,
    /// Session torn down; resend after reconnect.
    Resend,
    Dropped,
}

pub struct IpfixExporter {
    cfg: IpfixConfig,
    /// Template field lists per extension id, captured from the
    /// pipeline at startup.
    ext_fields: Vec<&'static [&'static str]>,
    store: TemplateStore,
    socket: Option<Socket>,
    /// 0 while connected, otherwise unix seconds of the last
    /// reconnect attempt (1 forces an immediate retry).
    last_reconnect: u64,
    /// Data records exported this transport session, modulo 2^32.
    seq: u32,
    /// Messages written to the wire.
    messages_sent: u64,
    seen: u64,
    dropped: u64,
    /// Per-template accumulation budget: mtu minus message header.
    max_buffer: usize,
}

impl IpfixExporter {
    pub fn new(
        cfg: IpfixConfig,
        ext_fields: Vec<&'static [&'static str]>,
    ) -> MeterResult<Self> {
        cfg.validate()?;
        let max_buffer = cfg.mtu as usize - HEADER_SIZE;
        let mut exporter = Self {
            store: TemplateStore::new(FIRST_TEMPLATE_ID, max_buffer),
            ext_fields,
            socket: None,
            last_reconnect: 0,
            seq: 0,
            messages_sent: 0,
            seen: 0,
            dropped: 0,
            max_buffer,
            cfg,
        };
        if let Err(e) = exporter.connect() {
            tracing::warn!(
                host = %exporter.cfg.host,
                port = exporter.cfg.port,
                error = %e,
                "collector not reachable, will retry"
            );
            exporter.last_reconnect = now_secs();
        }
        Ok(exporter)
    }

    pub fn sequence(&self) -> u32 {
        self.seq
    }

    pub fn template_count(&self) -> usize {
        self.store.len()
    }

    fn connect(&mut self) -> std::io::Result<()> {
        let target = (self.cfg.host.as_str(), self.cfg.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no collector address")
            })?;
        let socket = if self.cfg.udp {
            let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let sock = UdpSocket::bind(bind_addr)?;
            sock.connect(target)?;
            Socket::Udp(sock)
        } else {
            let stream = TcpStream::connect(target)?;
            let _ = stream.set_nodelay(true);
            Socket::Tcp(stream)
        };
        tracing::info!(collector = %target, udp = self.cfg.udp, "connected to collector");
        self.socket = Some(socket);
        Ok(())
    }

    /// Reconnect gate: true when the socket is usable. Attempts are
    /// spaced by the reconnect timeout; a successful reconnect resends
    /// every template before data resumes.
    fn ensure_connected(&mut self) -> bool {
        if self.last_reconnect == 0 {
            return self.socket.is_some();
        }
        if self.last_reconnect + self.cfg.reconnect_timeout <= now_secs() {
            if self.connect().is_ok() {
                self.last_reconnect = 0;
                self.store.expire_all();
                self.send_templates();
                return true;
            }
            self.last_reconnect = now_secs();
        }
        false
    }

    /// Message header: version, length, export time, sequence number,
    /// observation domain.
    fn fill_header(&self, msg: &mut [u8]) {
        let len = msg.len() as u16;
        msg[0..2].copy_from_slice(&IPFIX_VERSION.to_be_bytes());
        msg[2..4].copy_from_slice(&len.to_be_bytes());
        msg[4..8].copy_from_slice(&(now_secs() as u32).to_be_bytes());
        msg[8..12].copy_from_slice(&self.seq.to_be_bytes());
        msg[12..16].copy_from_slice(&self.cfg.odid.to_be_bytes());
    }

    fn send_message(&mut self, msg: &mut [u8]) -> SendOutcome {
        if !self.ensure_connected() {
            return SendOutcome::Dropped;
        }
        let result = match self.socket.as_mut() {
            Some(Socket::Tcp(stream)) => stream.write_all(msg),
            Some(Socket::Udp(sock)) => sock.send(msg).map(|_| ()),
            None => return SendOutcome::Dropped,
        };
        match result {
            Ok(()) => {
                self.messages_sent += 1;
                SendOutcome::Sent
            }
            Err(e) if is_connection_error(&e) => {
                tracing::warn!(error = %e, "collector connection lost");
                self.socket = None;
                // Retry on the very next send.
                self.last_reconnect = 1;
                // The sequence number is unique per transport session.
                self.seq = 0;
                msg[8..12].copy_from_slice(&0u32.to_be_bytes());
                SendOutcome::Resend
            }
            Err(e) => {
                tracing::debug!(error = %e, "send to collector failed");
                SendOutcome::Dropped
            }
        }
    }

    /// Send every template not yet delivered in this session; for UDP
    /// also re-arm templates whose refresh interval ran out.
    fn send_templates(&mut self) {
        let now = now_secs();
        if self.cfg.udp {
            for t in self.store.iter_mut() {
                if self.cfg.template_refresh != 0 && t.export_time + self.cfg.template_refresh <= now
                {
                    t.exported = false;
                }
                if self.cfg.template_refresh_msgs != 0
                    && t.export_message + self.cfg.template_refresh_msgs <= self.messages_sent
                {
                    t.exported = false;
                }
            }
        }

        let total: usize = self
            .store
            .iter()
            .filter(|t| !t.exported)
            .map(|t| t.record.len())
            .sum();
        if total == 0 {
            return;
        }

        let mut msg = vec![0u8; HEADER_SIZE + SET_HEADER_SIZE];
        let messages_sent = self.messages_sent;
        for t in self.store.iter_mut() {
            if !t.exported {
                msg.extend_from_slice(&t.record);
                t.exported = true;
                t.export_time = now;
                t.export_message = messages_sent;
            }
        }
        msg[HEADER_SIZE..HEADER_SIZE + 2].copy_from_slice(&TEMPLATE_SET_ID.to_be_bytes());
        let set_len = (SET_HEADER_SIZE + total) as u16;
        msg[HEADER_SIZE + 2..HEADER_SIZE + 4].copy_from_slice(&set_len.to_be_bytes());
        self.fill_header(&mut msg);

        if self.cfg.verbose {
            tracing::info!(bytes = msg.len(), "sending template message");
        }
        // On failure the reconnect path re-expires and resends all
        // templates, so no retry is needed here.
        let _ = self.send_message(&mut msg);
    }

    /// Package and send every template buffer holding records. Loops
    /// until all buffers fit into messages.
    fn send_data(&mut self) {
        let mtu = self.cfg.mtu as usize;
        loop {
            let mut msg = vec![0u8; HEADER_SIZE];
            let mut flows: u32 = 0;
            for t in self.store.iter_mut() {
                if t.record_count > 0 && msg.len() + t.data.len() <= mtu {
                    let set_len = (t.data.len() as u16).to_be_bytes();
                    t.data[2..4].copy_from_slice(&set_len);
                    msg.extend_from_slice(&t.data);
                    flows += u32::from(t.record_count);
                    t.reset_data();
                }
            }
            if msg.len() == HEADER_SIZE {
                return;
            }
            self.fill_header(&mut msg);

            if self.cfg.verbose {
                tracing::info!(bytes = msg.len(), flows, "sending data message");
            }
            match self.send_message(&mut msg) {
                SendOutcome::Sent => self.seq = self.seq.wrapping_add(flows),
                SendOutcome::Resend => match self.send_message(&mut msg) {
                    SendOutcome::Sent => self.seq = self.seq.wrapping_add(flows),
                    _ => self.dropped += u64::from(flows),
                },
                SendOutcome::Dropped => self.dropped += u64::from(flows),
            }
        }
    }

    /// Append one flow to its template buffer. False means the record
    /// does not fit into the remaining buffer space.
    fn append_record(&mut self, flow: &Flow, tidx: usize) -> bool {
        let basic = match flow.ip_version {
            IpVersion::V4 => basic_record_len(BASIC_TEMPLATE_V4),
            IpVersion::V6 => basic_record_len(BASIC_TEMPLATE_V6),
        };
        let ext_len: usize = flow.extensions.iter().map(|(_, e)| e.ipfix_len()).sum();

        let dir = self.cfg.dir;
        let template = self.store.get_mut(tidx);
        if template.data.len() + basic + ext_len > self.max_buffer {
            return false;
        }

        let names = match flow.ip_version {
            IpVersion::V4 => BASIC_TEMPLATE_V4,
            IpVersion::V6 => BASIC_TEMPLATE_V6,
        };
        for name in names {
            put_basic_field(&mut template.data, name, flow, dir);
        }
        // Extension ids ascend here exactly as in the template build.
        for (_, ext) in flow.extensions.iter() {
            ext.write_ipfix(&mut template.data);
        }
        template.record_count += 1;
        true
    }
}

fn put_ip4(buf: &mut BytesMut, addr: std::net::IpAddr) {
    match addr {
        // Already network order; copied as-is.
        std::net::IpAddr::V4(a) => buf.put_slice(&a.octets()),
        std::net::IpAddr::V6(_) => buf.put_u32(0),
    }
}

fn put_ip6(buf: &mut BytesMut, addr: std::net::IpAddr) {
    match addr {
        std::net::IpAddr::V6(a) => buf.put_slice(&a.octets()),
        std::net::IpAddr::V4(_) => buf.put_slice(&[0u8; 16]),
    }
}

/// Table interpreter for the basic record: big-endian for 2/4/8-byte
/// integers, IPv4 addresses exempt.
fn put_basic_field(buf: &mut BytesMut, name: &str, flow: &Flow, dir: u16) {
    match name {
        "FLOW_END_REASON" => buf.put_u8(flow.end_reason as u8),
        "BYTES" => buf.put_u64(flow.src_bytes),
        "BYTES_REV" => buf.put_u64(flow.dst_bytes),
        "PACKETS" => buf.put_u64(u64::from(flow.src_packets)),
        "PACKETS_REV" => buf.put_u64(u64::from(flow.dst_packets)),
        "FLOW_START" => buf.put_u64(ts_value(flow.time_first)),
        "FLOW_END" => buf.put_u64(ts_value(flow.time_last)),
        "L3_PROTO" => buf.put_u8(flow.ip_version as u8),
        "L4_PROTO" => buf.put_u8(flow.ip_proto),
        "L4_TCP_FLAGS" => buf.put_u8(flow.src_tcp_flags),
        "L4_TCP_FLAGS_REV" => buf.put_u8(flow.dst_tcp_flags),
        "L4_PORT_SRC" => buf.put_u16(flow.src_port),
        "L4_PORT_DST" => buf.put_u16(flow.dst_port),
        "INPUT_INTERFACE" => buf.put_u16(dir),
        "L3_IPV4_ADDR_SRC" => put_ip4(buf, flow.src_ip),
        "L3_IPV4_ADDR_DST" => put_ip4(buf, flow.dst_ip),
        "L3_IPV6_ADDR_SRC" => put_ip6(buf, flow.src_ip),
        "L3_IPV6_ADDR_DST" => put_ip6(buf, flow.dst_ip),
        "L2_SRC_MAC" => buf.put_slice(&flow.src_mac),
        "L2_DST_MAC" => buf.put_slice(&flow.dst_mac),
        other => debug_assert!(false, "unhandled basic field {other}"),
    }
}

impl Output for IpfixExporter {
    fn export(&mut self, flow: &Flow) {
        self.seen += 1;

        let tidx = match self.store.resolve(
            flow.ip_version,
            flow.extensions.bitmask(),
            &self.ext_fields,
        ) {
            Ok(idx) => idx,
            Err(e) => {
                tracing::warn!(error = %e, "cannot build template for flow");
                self.dropped += 1;
                return;
            }
        };

        if !self.append_record(flow, tidx) {
            self.flush();
            if !self.append_record(flow, tidx) {
                // A single record bigger than the message budget is
                // dropped whole, never truncated mid-field.
                self.dropped += 1;
            }
        }
    }

    fn flush(&mut self) {
        self.send_templates();
        self.send_data();
    }

    fn close(&mut self) {
        self.flush();
        self.socket = None;
        tracing::info!(
            seen = self.seen,
            dropped = self.dropped,
            messages = self.messages_sent,
            templates = self.store.len(),
            "ipfix exporter closed"
        );
    }

    fn stats(&self) -> OutputStats {
        OutputStats {
            seen: self.seen,
            dropped: self.dropped,
        }
    }
}
