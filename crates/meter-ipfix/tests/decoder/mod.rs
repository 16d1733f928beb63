//! Minimal reference decoder used to verify emitted messages.
//!
//! Parses the message header, template sets and data sets by hand;
//! data records are split into per-field byte vectors using a decoded
//! template, including the variable-length encoding.
#![allow(dead_code)] // not every test binary uses every helper

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub pen: u32,
    pub id: u16,
    pub len: u16,
}

#[derive(Debug, Clone)]
pub struct TemplateSpec {
    pub id: u16,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone)]
pub enum Set {
    Templates(Vec<TemplateSpec>),
    Data { template_id: u16, body: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct Message {
    pub version: u16,
    pub length: u16,
    pub export_time: u32,
    pub sequence: u32,
    pub odid: u32,
    pub sets: Vec<Set>,
}

fn be16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn be32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

pub fn decode_message(buf: &[u8]) -> Message {
    assert!(buf.len() >= 16, "short message: {} bytes", buf.len());
    let version = be16(&buf[0..2]);
    let length = be16(&buf[2..4]);
    assert_eq!(version, 10, "not an IPFIX message");
    assert_eq!(
        length as usize,
        buf.len(),
        "header length does not match payload"
    );

    let mut sets = Vec::new();
    let mut pos = 16;
    while pos + 4 <= buf.len() {
        let set_id = be16(&buf[pos..pos + 2]);
        let set_len = be16(&buf[pos + 2..pos + 4]) as usize;
        assert!(set_len >= 4, "set length too small");
        assert!(pos + set_len <= buf.len(), "set overruns message");
        let body = &buf[pos + 4..pos + set_len];
        if set_id == 2 {
            sets.push(Set::Templates(decode_template_set(body)));
        } else {
            assert!(set_id >= 256, "reserved set id {set_id}");
            sets.push(Set::Data {
                template_id: set_id,
                body: body.to_vec(),
            });
        }
        pos += set_len;
    }
    assert_eq!(pos, buf.len(), "trailing bytes after last set");

    Message {
        version,
        length,
        export_time: be32(&buf[4..8]),
        sequence: be32(&buf[8..12]),
        odid: be32(&buf[12..16]),
        sets,
    }
}

fn decode_template_set(mut body: &[u8]) -> Vec<TemplateSpec> {
    let mut templates = Vec::new();
    while body.len() >= 4 {
        let id = be16(&body[0..2]);
        let field_count = be16(&body[2..4]) as usize;
        body = &body[4..];
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            assert!(body.len() >= 4, "truncated field specifier");
            let raw_id = be16(&body[0..2]);
            let len = be16(&body[2..4]);
            body = &body[4..];
            let pen = if raw_id & 0x8000 != 0 {
                assert!(body.len() >= 4, "missing enterprise number");
                let pen = be32(&body[0..4]);
                body = &body[4..];
                pen
            } else {
                0
            };
            fields.push(FieldSpec {
                pen,
                id: raw_id & 0x7fff,
                len,
            });
        }
        templates.push(TemplateSpec { id, fields });
    }
    templates
}

/// Split a data-set body into records of per-field byte vectors.
pub fn decode_records(spec: &TemplateSpec, mut body: &[u8]) -> Vec<Vec<Vec<u8>>> {
    let mut records = Vec::new();
    while !body.is_empty() {
        let mut fields = Vec::with_capacity(spec.fields.len());
        for f in &spec.fields {
            let len = if f.len == 0xffff {
                assert!(!body.is_empty(), "missing varlen prefix");
                let first = body[0] as usize;
                if first == 255 {
                    let l = be16(&body[1..3]) as usize;
                    body = &body[3..];
                    l
                } else {
                    body = &body[1..];
                    first
                }
            } else {
                f.len as usize
            };
            assert!(body.len() >= len, "field overruns data set");
            fields.push(body[..len].to_vec());
            body = &body[len..];
        }
        records.push(fields);
    }
    records
}

/// Find a template by id across every template set of a message list.
pub fn find_template(messages: &[Message], id: u16) -> Option<TemplateSpec> {
    for m in messages {
        for s in &m.sets {
            if let Set::Templates(ts) = s {
                if let Some(t) = ts.iter().find(|t| t.id == id) {
                    return Some(t.clone());
                }
            }
        }
    }
    None
}
