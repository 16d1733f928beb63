//! Analyzer extensions attached to flows
//!
//! The set of extension types is closed and known at startup, so
//! extensions are a tagged enum rather than trait objects. Each
//! registered analyzer gets a dense numeric id at startup; a flow
//! stores at most one extension per id in a dense array, which keeps
//! lookup O(1) and makes the exporter's fingerprint bitmask a simple
//! fold over occupied slots.
//!
//! Extension payloads know how to encode themselves as the
//! vendor-specific portion of an IPFIX data record, in the exact order
//! of their template field list.

use std::fmt;

use bytes::{BufMut, BytesMut};

/// Upper bound on registered analyzer ids. The exporter's template
/// fingerprint packs ids into a 64-bit mask.
pub const MAX_EXTENSIONS: usize = 64;

pub type ExtensionId = u8;

/// IPFIX variable-length encoding: one-byte length for 0..=254, the
/// 255 escape followed by a big-endian u16 otherwise.
pub fn put_varlen(buf: &mut BytesMut, data: &[u8]) {
    let data = &data[..data.len().min(u16::MAX as usize)];
    if data.len() < 255 {
        buf.put_u8(data.len() as u8);
    } else {
        buf.put_u8(255);
        buf.put_u16(data.len() as u16);
    }
    buf.put_slice(data);
}

/// Encoded size of a variable-length field.
#[inline]
pub fn varlen_size(len: usize) -> usize {
    let len = len.min(u16::MAX as usize);
    if len < 255 {
        1 + len
    } else {
        3 + len
    }
}

/// HTTP request/response data extracted by the http analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpData {
    pub method: String,
    pub host: String,
    pub uri: String,
    pub user_agent: String,
    pub referer: String,
    pub content_type: String,
    pub status_code: u16,
    pub request_seen: bool,
    pub response_seen: bool,
}

pub const HTTP_TEMPLATE: &[&str] = &[
    "HTTP_USERAGENT",
    "HTTP_METHOD",
    "HTTP_DOMAIN",
    "HTTP_REFERER",
    "HTTP_URI",
    "HTTP_CONTENT_TYPE",
    "HTTP_STATUS",
];

/// TLS handshake data extracted by the tls analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsData {
    pub version: u16,
    pub sni: String,
    pub alpn: String,
    /// Hex-encoded MD5 of the JA3 string.
    pub ja3: String,
}

pub const TLS_TEMPLATE: &[&str] = &["TLS_VERSION", "TLS_SNI", "TLS_ALPN", "TLS_JA3"];

/// DNS query/response data extracted by the dns analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsData {
    pub id: u16,
    pub answers: u16,
    pub rcode: u8,
    pub qtype: u16,
    pub qclass: u16,
    pub rr_ttl: u32,
    pub rlength: u16,
    /// EDNS payload size from the OPT record.
    pub psize: u16,
    /// DNSSEC OK bit from the OPT record.
    pub dnssec_ok: u8,
    pub qname: String,
    pub rdata: String,
}

pub const DNS_TEMPLATE: &[&str] = &[
    "DNS_ANSWERS",
    "DNS_RCODE",
    "DNS_QTYPE",
    "DNS_CLASS",
    "DNS_RR_TTL",
    "DNS_RLENGTH",
    "DNS_PSIZE",
    "DNS_DO",
    "DNS_ID",
    "DNS_NAME",
    "DNS_RDATA",
];

/// SIP message data extracted by the sip analyzer. One SIP message
/// per flow: the analyzer restarts the flow on every new message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SipData {
    /// Request method code (1..=10) or 99 for a reply.
    pub msg_type: u16,
    pub status_code: u16,
    pub cseq: String,
    pub calling_party: String,
    pub called_party: String,
    pub call_id: String,
    pub user_agent: String,
    pub request_uri: String,
    pub via: String,
}

pub const SIP_TEMPLATE: &[&str] = &[
    "SIP_MSG_TYPE",
    "SIP_STATUS_CODE",
    "SIP_CSEQ",
    "SIP_CALLING_PARTY",
    "SIP_CALLED_PARTY",
    "SIP_CALL_ID",
    "SIP_USER_AGENT",
    "SIP_REQUEST_URI",
    "SIP_VIA",
];

/// SMTP session summary accumulated by the smtp analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmtpData {
    /// Bitmask of commands seen.
    pub command_flags: u32,
    pub mail_count: u32,
    pub rcpt_count: u32,
    /// Bitmask of reply codes seen.
    pub code_flags: u32,
    pub code_2xx: u32,
    pub code_3xx: u32,
    pub code_4xx: u32,
    pub code_5xx: u32,
    pub domain: String,
    pub first_sender: String,
    pub first_recipient: String,
    /// Between DATA and the terminating dot; lines are message body,
    /// not commands.
    pub data_transfer: bool,
}

pub const SMTP_TEMPLATE: &[&str] = &[
    "SMTP_COMMANDS",
    "SMTP_MAIL_COUNT",
    "SMTP_RCPT_COUNT",
    "SMTP_STATUS_CODES",
    "SMTP_CODE_2XX_COUNT",
    "SMTP_CODE_3XX_COUNT",
    "SMTP_CODE_4XX_COUNT",
    "SMTP_CODE_5XX_COUNT",
    "SMTP_DOMAIN",
    "SMTP_SENDER",
    "SMTP_RECIPIENT",
];

pub const HISTOGRAM_BINS: usize = 8;

/// Per-direction packet-size and inter-packet-time histograms kept by
/// the phists analyzer. Bins are powers of two: below 16, then one
/// bin per octave up to 1024 and above.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhistsData {
    /// Payload-size histograms, forward and reverse.
    pub size_hist: [[u32; HISTOGRAM_BINS]; 2],
    /// Inter-packet-time histograms in milliseconds.
    pub ipt_hist: [[u32; HISTOGRAM_BINS]; 2],
    /// Last packet time per direction in milliseconds, 0 before the
    /// first sample.
    pub last_ts: [u64; 2],
}

pub const PHISTS_TEMPLATE: &[&str] = &[
    "S_PHISTS_SIZES",
    "S_PHISTS_IPT",
    "D_PHISTS_SIZES",
    "D_PHISTS_IPT",
];

/// basicList semantic "ordered" (RFC 6313).
const BASICLIST_ORDERED: u8 = 4;

/// Encode a u32 array as an RFC 6313 basicList inside a
/// variable-length field: semantic, inner element id (enterprise bit
/// set), element length, enterprise number, then the values.
pub fn put_basiclist_u32(buf: &mut BytesMut, pen: u32, inner_id: u16, values: &[u32]) {
    let content = 9 + 4 * values.len();
    debug_assert!(content < 255);
    buf.put_u8(content as u8);
    buf.put_u8(BASICLIST_ORDERED);
    buf.put_u16(inner_id | 0x8000);
    buf.put_u16(4);
    buf.put_u32(pen);
    for v in values {
        buf.put_u32(*v);
    }
}

/// Encoded size of one u32 basicList.
pub fn basiclist_u32_size(count: usize) -> usize {
    varlen_size(9 + 4 * count)
}

/// NTP header data extracted by the ntp analyzer. Reference id and
/// timestamps are carried as rendered text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NtpData {
    pub leap: u8,
    pub version: u8,
    pub mode: u8,
    pub stratum: u8,
    pub poll: u8,
    pub precision: u8,
    pub delay: u32,
    pub dispersion: u32,
    pub reference_id: String,
    pub reference: String,
    pub origin: String,
    pub receive: String,
    pub sent: String,
}

pub const NTP_TEMPLATE: &[&str] = &[
    "NTP_LEAP",
    "NTP_VERSION",
    "NTP_MODE",
    "NTP_STRATUM",
    "NTP_POLL",
    "NTP_PRECISION",
    "NTP_DELAY",
    "NTP_DISPERSION",
    "NTP_REF_ID",
    "NTP_REF",
    "NTP_ORIG",
    "NTP_RECV",
    "NTP_SENT",
];

/// Closed set of extension payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionData {
    Http(HttpData),
    Tls(TlsData),
    Dns(DnsData),
    Sip(SipData),
    Smtp(SmtpData),
    Ntp(NtpData),
    Phists(PhistsData),
}

/// Inner basicList element ids of the phists histograms.
const EL_S_PHISTS_SIZES: u16 = 1060;
const EL_S_PHISTS_IPT: u16 = 1061;
const EL_D_PHISTS_SIZES: u16 = 1062;
const EL_D_PHISTS_IPT: u16 = 1063;
/// Enterprise number the phists histogram elements live under.
const PEN_PHISTS: u32 = 8057;

impl ExtensionData {
    /// IPFIX field names, in serialization order.
    pub fn template_fields(&self) -> &'static [&'static str] {
        match self {
            ExtensionData::Http(_) => HTTP_TEMPLATE,
            ExtensionData::Tls(_) => TLS_TEMPLATE,
            ExtensionData::Dns(_) => DNS_TEMPLATE,
            ExtensionData::Sip(_) => SIP_TEMPLATE,
            ExtensionData::Smtp(_) => SMTP_TEMPLATE,
            ExtensionData::Ntp(_) => NTP_TEMPLATE,
            ExtensionData::Phists(_) => PHISTS_TEMPLATE,
        }
    }

    /// Exact number of bytes `write_ipfix` will append.
    pub fn ipfix_len(&self) -> usize {
        match self {
            ExtensionData::Http(d) => {
                varlen_size(d.user_agent.len())
                    + varlen_size(d.method.len())
                    + varlen_size(d.host.len())
                    + varlen_size(d.referer.len())
                    + varlen_size(d.uri.len())
                    + varlen_size(d.content_type.len())
                    + 2
            }
            ExtensionData::Tls(d) => {
                2 + varlen_size(d.sni.len()) + varlen_size(d.alpn.len()) + varlen_size(d.ja3.len())
            }
            ExtensionData::Dns(d) => {
                2 + 1 + 2 + 2 + 4 + 2 + 2 + 1 + 2
                    + varlen_size(d.qname.len())
                    + varlen_size(d.rdata.len())
            }
            ExtensionData::Sip(d) => {
                2 + 2
                    + varlen_size(d.cseq.len())
                    + varlen_size(d.calling_party.len())
                    + varlen_size(d.called_party.len())
                    + varlen_size(d.call_id.len())
                    + varlen_size(d.user_agent.len())
                    + varlen_size(d.request_uri.len())
                    + varlen_size(d.via.len())
            }
            ExtensionData::Smtp(d) => {
                8 * 4
                    + varlen_size(d.domain.len())
                    + varlen_size(d.first_sender.len())
                    + varlen_size(d.first_recipient.len())
            }
            ExtensionData::Ntp(d) => {
                6 + 4 + 4
                    + varlen_size(d.reference_id.len())
                    + varlen_size(d.reference.len())
                    + varlen_size(d.origin.len())
                    + varlen_size(d.receive.len())
                    + varlen_size(d.sent.len())
            }
            ExtensionData::Phists(_) => 4 * basiclist_u32_size(HISTOGRAM_BINS),
        }
    }

    /// Append this extension's data-record bytes, in template field
    /// order, big-endian.
    pub fn write_ipfix(&self, buf: &mut BytesMut) {
        match self {
            ExtensionData::Http(d) => {
                put_varlen(buf, d.user_agent.as_bytes());
                put_varlen(buf, d.method.as_bytes());
                put_varlen(buf, d.host.as_bytes());
                put_varlen(buf, d.referer.as_bytes());
                put_varlen(buf, d.uri.as_bytes());
                put_varlen(buf, d.content_type.as_bytes());
                buf.put_u16(d.status_code);
            }
            ExtensionData::Tls(d) => {
                buf.put_u16(d.version);
                put_varlen(buf, d.sni.as_bytes());
                put_varlen(buf, d.alpn.as_bytes());
                put_varlen(buf, d.ja3.as_bytes());
            }
            ExtensionData::Dns(d) => {
                buf.put_u16(d.answers);
                buf.put_u8(d.rcode);
                buf.put_u16(d.qtype);
                buf.put_u16(d.qclass);
                buf.put_u32(d.rr_ttl);
                buf.put_u16(d.rlength);
                buf.put_u16(d.psize);
                buf.put_u8(d.dnssec_ok);
                buf.put_u16(d.id);
                put_varlen(buf, d.qname.as_bytes());
                put_varlen(buf, d.rdata.as_bytes());
            }
            ExtensionData::Sip(d) => {
                buf.put_u16(d.msg_type);
                buf.put_u16(d.status_code);
                put_varlen(buf, d.cseq.as_bytes());
                put_varlen(buf, d.calling_party.as_bytes());
                put_varlen(buf, d.called_party.as_bytes());
                put_varlen(buf, d.call_id.as_bytes());
                put_varlen(buf, d.user_agent.as_bytes());
                put_varlen(buf, d.request_uri.as_bytes());
                put_varlen(buf, d.via.as_bytes());
            }
            ExtensionData::Smtp(d) => {
                buf.put_u32(d.command_flags);
                buf.put_u32(d.mail_count);
                buf.put_u32(d.rcpt_count);
                buf.put_u32(d.code_flags);
                buf.put_u32(d.code_2xx);
                buf.put_u32(d.code_3xx);
                buf.put_u32(d.code_4xx);
                buf.put_u32(d.code_5xx);
                put_varlen(buf, d.domain.as_bytes());
                put_varlen(buf, d.first_sender.as_bytes());
                put_varlen(buf, d.first_recipient.as_bytes());
            }
            ExtensionData::Ntp(d) => {
                buf.put_u8(d.leap);
                buf.put_u8(d.version);
                buf.put_u8(d.mode);
                buf.put_u8(d.stratum);
                buf.put_u8(d.poll);
                buf.put_u8(d.precision);
                buf.put_u32(d.delay);
                buf.put_u32(d.dispersion);
                put_varlen(buf, d.reference_id.as_bytes());
                put_varlen(buf, d.reference.as_bytes());
                put_varlen(buf, d.origin.as_bytes());
                put_varlen(buf, d.receive.as_bytes());
                put_varlen(buf, d.sent.as_bytes());
            }
            ExtensionData::Phists(d) => {
                put_basiclist_u32(buf, PEN_PHISTS, EL_S_PHISTS_SIZES, &d.size_hist[0]);
                put_basiclist_u32(buf, PEN_PHISTS, EL_S_PHISTS_IPT, &d.ipt_hist[0]);
                put_basiclist_u32(buf, PEN_PHISTS, EL_D_PHISTS_SIZES, &d.size_hist[1]);
                put_basiclist_u32(buf, PEN_PHISTS, EL_D_PHISTS_IPT, &d.ipt_hist[1]);
            }
        }
    }
}

impl fmt::Display for ExtensionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionData::Http(d) => write!(
                f,
                "http=\"{} {}{} {}\"",
                d.method, d.host, d.uri, d.status_code
            ),
            ExtensionData::Tls(d) => {
                write!(f, "tls=\"{:#06x} {} {}\"", d.version, d.sni, d.ja3)
            }
            ExtensionData::Dns(d) => write!(
                f,
                "dns=\"{} qtype={} rcode={} {}\"",
                d.qname, d.qtype, d.rcode, d.rdata
            ),
            ExtensionData::Sip(d) => write!(
                f,
                "sip=\"type={} {} -> {} {}\"",
                d.msg_type, d.calling_party, d.called_party, d.call_id
            ),
            ExtensionData::Smtp(d) => write!(
                f,
                "smtp=\"{} mails={} rcpts={}\"",
                d.domain, d.mail_count, d.rcpt_count
            ),
            ExtensionData::Ntp(d) => write!(
                f,
                "ntp=\"v{} mode={} stratum={} ref={}\"",
                d.version, d.mode, d.stratum, d.reference_id
            ),
            ExtensionData::Phists(d) => {
                let sum = |h: &[u32; HISTOGRAM_BINS]| h.iter().sum::<u32>();
                write!(
                    f,
                    "phists=\"fwd={} rev={}\"",
                    sum(&d.size_hist[0]),
                    sum(&d.size_hist[1])
                )
            }
        }
    }
}

/// Dense per-flow extension storage indexed by registered id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    slots: Vec<Option<ExtensionData>>,
}

impl ExtensionSet {
    /// Attach or replace the extension stored under `id`.
    pub fn insert(&mut self, id: ExtensionId, data: ExtensionData) {
        let idx = id as usize;
        debug_assert!(idx < MAX_EXTENSIONS);
        if self.slots.len() <= idx {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx] = Some(data);
    }

    pub fn get(&self, id: ExtensionId) -> Option<&ExtensionData> {
        self.slots.get(id as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: ExtensionId) -> Option<&mut ExtensionData> {
        self.slots.get_mut(id as usize).and_then(|s| s.as_mut())
    }

    pub fn remove(&mut self, id: ExtensionId) -> Option<ExtensionData> {
        self.slots.get_mut(id as usize).and_then(|s| s.take())
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Occupied ids packed into a bitmask; the exporter's template
    /// fingerprint.
    pub fn bitmask(&self) -> u64 {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .fold(0u64, |m, (i, _)| m | (1u64 << i))
    }

    /// Occupied slots in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ExtensionId, &ExtensionData)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|d| (i as ExtensionId, d)))
    }
}
