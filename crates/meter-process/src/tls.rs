//! TLS analyzer
//!
//! Walks the ClientHello to pull out the negotiated version offer,
//! SNI, ALPN list and the JA3 fingerprint (MD5 over version, cipher
//! suites, extension types, supported groups and EC point formats,
//! GREASE values excluded).

use md5::{Digest, Md5};
use meter_common::ext::{ExtensionData, ExtensionId, TlsData, TLS_TEMPLATE};
use meter_common::plugin::ActionMask;
use meter_common::{Flow, Packet};

use crate::plugin::ProcessPlugin;

const CONTENT_TYPE_HANDSHAKE: u8 = 22;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;
const EXT_ALPN: u16 = 0x0010;
const MAX_SNI: usize = 128;
const MAX_ALPN: usize = 64;

/// GREASE values follow the 0x?a?a pattern and are excluded from JA3.
#[inline]
fn is_grease(v: u16) -> bool {
    v & 0x0f0f == 0x0a0a && (v >> 8) == (v & 0xff)
}

/// Bounds-checked cursor over the hello bytes.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self) -> Option<u8> {
        let v = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(v)
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.data.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(bytes)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }
}

fn parse_client_hello(payload: &[u8]) -> Option<TlsData> {
    if payload.len() < 5 || payload[0] != CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    let record_len = u16::from_be_bytes([payload[3], payload[4]]) as usize;
    let end = payload.len().min(5 + record_len);
    let hs = &payload[5..end];
    if hs.len() < 4 || hs[0] != HANDSHAKE_CLIENT_HELLO {
        return None;
    }

    let mut r = Reader::new(&hs[4..]);
    let version = r.u16()?;
    r.skip(32)?; // random
    let sid_len = r.u8()? as usize;
    r.skip(sid_len)?;

    let cs_len = r.u16()? as usize;
    let mut ciphers = Vec::with_capacity(cs_len / 2);
    let mut cs = Reader::new(r.take(cs_len)?);
    while let Some(c) = cs.u16() {
        if !is_grease(c) {
            ciphers.push(c);
        }
    }

    let comp_len = r.u8()? as usize;
    r.skip(comp_len)?;

    let mut data = TlsData {
        version,
        ..TlsData::default()
    };
    let mut ext_types = Vec::new();
    let mut groups = Vec::new();
    let mut formats = Vec::new();

    if let Some(ext_total) = r.u16() {
        let mut exts = Reader::new(r.take(ext_total as usize).unwrap_or(&[]));
        while let (Some(ext_type), Some(ext_len)) = (exts.u16(), exts.u16()) {
            let Some(body) = exts.take(ext_len as usize) else {
                break;
            };
            if !is_grease(ext_type) {
                ext_types.push(ext_type);
            }
            // A malformed extension body loses that extension's
            // values but never aborts the hello parse.
            match ext_type {
                EXT_SERVER_NAME => {
                    if let Some(sni) = parse_sni(body) {
                        data.sni = sni;
                    }
                }
                EXT_ALPN => {
                    if let Some(alpn) = parse_alpn(body) {
                        data.alpn = alpn;
                    }
                }
                EXT_SUPPORTED_GROUPS => {
                    let mut b = Reader::new(body);
                    let _ = b.u16(); // list length
                    while let Some(g) = b.u16() {
                        if !is_grease(g) {
                            groups.push(g);
                        }
                    }
                }
                EXT_EC_POINT_FORMATS => {
                    let mut b = Reader::new(body);
                    let _ = b.u8(); // list length
                    while let Some(f) = b.u8() {
                        formats.push(f);
                    }
                }
                _ => {}
            }
        }
    }

    data.ja3 = ja3_hash(version, &ciphers, &ext_types, &groups, &formats);
    Some(data)
}

fn parse_sni(body: &[u8]) -> Option<String> {
    let mut b = Reader::new(body);
    b.u16()?; // list length
    if b.u8()? != 0 {
        return None;
    }
    let name_len = b.u16()? as usize;
    let name = b.take(name_len)?;
    Some(String::from_utf8_lossy(&name[..name.len().min(MAX_SNI)]).into_owned())
}

fn parse_alpn(body: &[u8]) -> Option<String> {
    let mut b = Reader::new(body);
    b.u16()?; // list length
    let mut names = Vec::new();
    while let Some(len) = b.u8() {
        match b.take(len as usize) {
            Some(proto) => names.push(String::from_utf8_lossy(proto).into_owned()),
            None => break,
        }
    }
    let mut joined = names.join(";");
    if joined.len() > MAX_ALPN {
        let mut end = MAX_ALPN;
        while !joined.is_char_boundary(end) {
            end -= 1;
        }
        joined.truncate(end);
    }
    Some(joined)
}

fn join_nums<T: ToString>(vals: &[T]) -> String {
    vals.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn ja3_hash(version: u16, ciphers: &[u16], exts: &[u16], groups: &[u16], formats: &[u8]) -> String {
    let ja3 = format!(
        "{},{},{},{},{}",
        version,
        join_nums(ciphers),
        join_nums(exts),
        join_nums(groups),
        join_nums(formats)
    );
    let mut hasher = Md5::new();
    hasher.update(ja3.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default)]
pub struct TlsPlugin {
    ext_id: ExtensionId,
}

impl TlsPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_parse(&self, flow: &mut Flow, pkt: &Packet) {
        if !pkt.is_tcp() || pkt.payload.is_empty() {
            return;
        }
        if flow.extensions.get(self.ext_id).is_some() {
            return;
        }
        if let Some(data) = parse_client_hello(pkt.payload) {
            flow.extensions.insert(self.ext_id, ExtensionData::Tls(data));
        }
    }
}

impl ProcessPlugin for TlsPlugin {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn assign_ext_id(&mut self, id: ExtensionId) {
        self.ext_id = id;
    }

    fn template_fields(&self) -> &'static [&'static str] {
        TLS_TEMPLATE
    }

    fn post_create(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        self.try_parse(flow, pkt);
        ActionMask::NONE
    }

    fn post_update(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        self.try_parse(flow, pkt);
        ActionMask::NONE
    }
}
