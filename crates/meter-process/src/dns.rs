//! DNS analyzer
//!
//! Parses the header, the first question and the first answer of UDP
//! DNS traffic, plus the OPT pseudo-record for the EDNS payload size
//! and the DNSSEC OK bit. Query and response merge into one
//! extension on the flow.

use meter_common::ext::{DnsData, ExtensionData, ExtensionId, DNS_TEMPLATE};
use meter_common::plugin::ActionMask;
use meter_common::{Flow, Packet};

use crate::plugin::ProcessPlugin;

const DNS_PORT: u16 = 53;
const TYPE_A: u16 = 1;
const TYPE_NS: u16 = 2;
const TYPE_CNAME: u16 = 5;
const TYPE_PTR: u16 = 12;
const TYPE_AAAA: u16 = 28;
const TYPE_OPT: u16 = 41;
const MAX_NAME: usize = 253;
const MAX_RDATA_RAW: usize = 32;
/// Compression pointer chains are bounded to keep hostile payloads
/// from looping the parser.
const MAX_POINTER_HOPS: usize = 8;
const MAX_RECORDS: usize = 64;

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn u8(&mut self) -> Option<u8> {
        let v = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(v)
    }

    fn u16(&mut self) -> Option<u16> {
        let b = self.data.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        let b = self.data.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let b = self.data.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(b)
    }

    /// Decode a (possibly compressed) domain name and leave the
    /// cursor after its in-line representation.
    fn name(&mut self) -> Option<String> {
        let mut out = String::new();
        let mut pos = self.pos;
        let mut hops = 0;
        let mut jumped = false;
        loop {
            let len = *self.data.get(pos)? as usize;
            if len == 0 {
                pos += 1;
                if !jumped {
                    self.pos = pos;
                }
                return Some(out);
            }
            if len & 0xc0 == 0xc0 {
                let lo = *self.data.get(pos + 1)? as usize;
                if !jumped {
                    self.pos = pos + 2;
                }
                jumped = true;
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return None;
                }
                pos = ((len & 0x3f) << 8) | lo;
                continue;
            }
            if len & 0xc0 != 0 {
                return None;
            }
            let label = self.data.get(pos + 1..pos + 1 + len)?;
            if !out.is_empty() {
                out.push('.');
            }
            if out.len() + len > MAX_NAME {
                return None;
            }
            out.push_str(&String::from_utf8_lossy(label));
            pos += 1 + len;
        }
    }
}

#[derive(Debug, Default)]
struct Parsed {
    response: bool,
    data: DnsData,
}

fn render_rdata(rtype: u16, rdata: &[u8], msg: &[u8], rdata_pos: usize) -> String {
    match rtype {
        TYPE_A if rdata.len() == 4 => {
            std::net::Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]).to_string()
        }
        TYPE_AAAA if rdata.len() == 16 => {
            let mut o = [0u8; 16];
            o.copy_from_slice(rdata);
            std::net::Ipv6Addr::from(o).to_string()
        }
        TYPE_NS | TYPE_CNAME | TYPE_PTR => Reader::new(msg, rdata_pos).name().unwrap_or_default(),
        _ => {
            let end = rdata.len().min(MAX_RDATA_RAW);
            rdata[..end]
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>()
        }
    }
}

fn parse_dns(payload: &[u8]) -> Option<Parsed> {
    if payload.len() < 12 {
        return None;
    }
    let mut r = Reader::new(payload, 0);
    let id = r.u16()?;
    let flags = r.u16()?;
    let qdcount = r.u16()?;
    let ancount = r.u16()?;
    let nscount = r.u16()?;
    let arcount = r.u16()?;

    let mut parsed = Parsed {
        response: flags & 0x8000 != 0,
        data: DnsData {
            id,
            rcode: (flags & 0x000f) as u8,
            answers: ancount,
            psize: 0,
            ..DnsData::default()
        },
    };

    if qdcount > 0 {
        parsed.data.qname = r.name()?;
        parsed.data.qtype = r.u16()?;
        parsed.data.qclass = r.u16()?;
    }

    // Walk the remaining sections: first answer fills the RR fields,
    // an OPT record anywhere fills the EDNS values.
    let records = (ancount as usize + nscount as usize + arcount as usize).min(MAX_RECORDS);
    let mut first_answer = ancount > 0;
    for _ in 0..records {
        let Some(_) = r.name() else { break };
        let Some(rtype) = r.u16() else { break };
        let Some(class) = r.u16() else { break };
        let Some(ttl) = r.u32() else { break };
        let Some(rdlength) = r.u16() else { break };
        let rdata_pos = r.pos;
        let Some(rdata) = r.take(rdlength as usize) else {
            break;
        };

        if rtype == TYPE_OPT {
            // For OPT the class carries the EDNS payload size and the
            // high TTL bit is DNSSEC OK.
            parsed.data.psize = class;
            parsed.data.dnssec_ok = ((ttl >> 15) & 1) as u8;
        } else if first_answer {
            parsed.data.rr_ttl = ttl;
            parsed.data.rlength = rdlength;
            parsed.data.rdata = render_rdata(rtype, rdata, payload, rdata_pos);
            first_answer = false;
        }
    }

    Some(parsed)
}

fn merge(data: &mut DnsData, parsed: &Parsed) {
    let p = &parsed.data;
    data.id = p.id;
    if !p.qname.is_empty() {
        data.qname = p.qname.clone();
        data.qtype = p.qtype;
        data.qclass = p.qclass;
    }
    if p.psize != 0 {
        data.psize = p.psize;
        data.dnssec_ok = p.dnssec_ok;
    }
    if parsed.response {
        data.answers = p.answers;
        data.rcode = p.rcode;
        data.rr_ttl = p.rr_ttl;
        data.rlength = p.rlength;
        if !p.rdata.is_empty() {
            data.rdata = p.rdata.clone();
        }
    }
}

#[derive(Default)]
pub struct DnsPlugin {
    ext_id: ExtensionId,
}

impl DnsPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn relevant(pkt: &Packet) -> bool {
        pkt.is_udp() && (pkt.src_port == DNS_PORT || pkt.dst_port == DNS_PORT)
    }

    fn apply(&self, flow: &mut Flow, pkt: &Packet) {
        if !Self::relevant(pkt) {
            return;
        }
        let Some(parsed) = parse_dns(pkt.payload) else {
            return;
        };
        if let Some(ExtensionData::Dns(data)) = flow.extensions.get_mut(self.ext_id) {
            merge(data, &parsed);
            return;
        }
        let mut data = DnsData::default();
        merge(&mut data, &parsed);
        flow.extensions.insert(self.ext_id, ExtensionData::Dns(data));
    }
}

impl ProcessPlugin for DnsPlugin {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn assign_ext_id(&mut self, id: ExtensionId) {
        self.ext_id = id;
    }

    fn template_fields(&self) -> &'static [&'static str] {
        DNS_TEMPLATE
    }

    fn post_create(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        self.apply(flow, pkt);
        ActionMask::NONE
    }

    fn post_update(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        self.apply(flow, pkt);
        ActionMask::NONE
    }
}
