//! Template records and the fingerprint store
//!
//! A template is built once per (IP version, extension-bitmask)
//! fingerprint and stays stable for the whole export session. Each
//! template owns the accumulation buffer its data records collect in,
//! prefixed with a data-set header whose length is patched when the
//! buffer is packaged into a message.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use meter_common::ext::MAX_EXTENSIONS;
use meter_common::{IpVersion, MeterError, MeterResult};

use crate::elements::{element, BASIC_TEMPLATE_V4, BASIC_TEMPLATE_V6, SET_HEADER_SIZE};

#[derive(Debug)]
pub struct Template {
    pub id: u16,
    /// Wire template record: header plus field specifiers.
    pub record: Vec<u8>,
    pub field_count: u16,
    /// Data-set header plus accumulated data records.
    pub data: BytesMut,
    pub record_count: u16,
    /// Sent to the collector in the current transport session.
    pub exported: bool,
    /// Unix seconds of the last template send.
    pub export_time: u64,
    /// Message counter value at the last template send.
    pub export_message: u64,
}

impl Template {
    /// Assemble the wire template record for `fields` and an empty
    /// data buffer.
    pub fn build<'a>(
        id: u16,
        fields: impl Iterator<Item = &'a str>,
        data_capacity: usize,
    ) -> MeterResult<Self> {
        let mut record = Vec::with_capacity(64);
        record.extend_from_slice(&id.to_be_bytes());
        record.extend_from_slice(&0u16.to_be_bytes()); // field count, patched below

        let mut field_count = 0u16;
        for name in fields {
            let def = element(name).ok_or_else(|| {
                MeterError::Config(format!("unknown IPFIX element '{name}' in template"))
            })?;
            let mut eid = def.id;
            if def.pen != 0 {
                eid |= 0x8000;
            }
            record.extend_from_slice(&eid.to_be_bytes());
            record.extend_from_slice(&def.len.wire().to_be_bytes());
            if def.pen != 0 {
                record.extend_from_slice(&def.pen.to_be_bytes());
            }
            field_count += 1;
        }
        record[2..4].copy_from_slice(&field_count.to_be_bytes());

        let mut data = BytesMut::with_capacity(data_capacity);
        data.put_u16(id);
        data.put_u16(0); // set length, patched when packaged

        Ok(Self {
            id,
            record,
            field_count,
            data,
            record_count: 0,
            exported: false,
            export_time: 0,
            export_message: 0,
        })
    }

    /// Drop accumulated data records, keeping the set header.
    pub fn reset_data(&mut self) {
        self.data.truncate(SET_HEADER_SIZE);
        self.record_count = 0;
    }
}

/// Templates keyed by (IP version, extension bitmask).
pub struct TemplateStore {
    templates: Vec<Template>,
    index: HashMap<(u8, u64), usize>,
    next_id: u16,
    data_capacity: usize,
}

impl TemplateStore {
    pub fn new(first_id: u16, data_capacity: usize) -> Self {
        Self {
            templates: Vec::new(),
            index: HashMap::new(),
            next_id: first_id,
            data_capacity,
        }
    }

    /// Resolve the template for a fingerprint, building it on first
    /// use from the basic field list plus each present extension's
    /// fields in id order.
    pub fn resolve(
        &mut self,
        version: IpVersion,
        mask: u64,
        ext_fields: &[&'static [&'static str]],
    ) -> MeterResult<usize> {
        let key = (version as u8, mask);
        if let Some(&idx) = self.index.get(&key) {
            return Ok(idx);
        }

        for id in 0..MAX_EXTENSIONS {
            if mask & (1u64 << id) != 0 && id >= ext_fields.len() {
                return Err(MeterError::Export(format!(
                    "flow carries extension id {id} with no registered analyzer"
                )));
            }
        }

        let basic = match version {
            IpVersion::V4 => BASIC_TEMPLATE_V4,
            IpVersion::V6 => BASIC_TEMPLATE_V6,
        };
        let names = basic.iter().copied().chain(
            (0..ext_fields.len())
                .filter(|id| mask & (1u64 << id) != 0)
                .flat_map(|id| ext_fields[id].iter().copied()),
        );
        let template = Template::build(self.next_id, names, self.data_capacity)?;
        tracing::debug!(id = template.id, mask, version = version as u8, "new template");
        self.next_id += 1;
        self.templates.push(template);
        let idx = self.templates.len() - 1;
        self.index.insert(key, idx);
        Ok(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Template {
        &mut self.templates[idx]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Template> {
        self.templates.iter_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }

    /// Mark every template un-exported so the next flush resends them
    /// all. Used after reconnect and by the UDP refresh timers.
    pub fn expire_all(&mut self) {
        for t in &mut self.templates {
            t.exported = false;
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_common::ext::{DNS_TEMPLATE, HTTP_TEMPLATE};

    #[test]
    fn test_template_record_wire_format() {
        let t = Template::build(258, ["L4_PORT_SRC", "TLS_SNI"].into_iter(), 1024).unwrap();
        // Header: id 258, field count 2.
        assert_eq!(&t.record[0..2], &258u16.to_be_bytes());
        assert_eq!(&t.record[2..4], &2u16.to_be_bytes());
        // L4_PORT_SRC: IANA element 7, length 2, no enterprise number.
        assert_eq!(&t.record[4..6], &7u16.to_be_bytes());
        assert_eq!(&t.record[6..8], &2u16.to_be_bytes());
        // TLS_SNI: enterprise bit set, variable length, PEN follows.
        assert_eq!(&t.record[8..10], &(808u16 | 0x8000).to_be_bytes());
        assert_eq!(&t.record[10..12], &0xffffu16.to_be_bytes());
        assert_eq!(&t.record[12..16], &8057u32.to_be_bytes());
        assert_eq!(t.record.len(), 16);
        assert_eq!(t.field_count, 2);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Template::build(258, ["NOT_A_FIELD"].into_iter(), 1024).is_err());
    }

    #[test]
    fn test_data_buffer_starts_with_set_header() {
        let mut t = Template::build(300, ["BYTES"].into_iter(), 1024).unwrap();
        assert_eq!(&t.data[0..2], &300u16.to_be_bytes());
        assert_eq!(t.data.len(), SET_HEADER_SIZE);

        t.data.extend_from_slice(&[1, 2, 3]);
        t.record_count = 1;
        t.reset_data();
        assert_eq!(t.data.len(), SET_HEADER_SIZE);
        assert_eq!(t.record_count, 0);
    }

    #[test]
    fn test_store_fingerprint_stability() {
        let ext_fields: Vec<&'static [&'static str]> = vec![HTTP_TEMPLATE, DNS_TEMPLATE];
        let mut store = TemplateStore::new(258, 1024);

        let a = store.resolve(IpVersion::V4, 0b01, &ext_fields).unwrap();
        let b = store.resolve(IpVersion::V4, 0b01, &ext_fields).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);

        // Different mask, different version: new ids, incrementally
        // assigned from 258.
        let c = store.resolve(IpVersion::V4, 0b11, &ext_fields).unwrap();
        let d = store.resolve(IpVersion::V6, 0b01, &ext_fields).unwrap();
        assert_eq!(store.get_mut(a).id, 258);
        assert_eq!(store.get_mut(c).id, 259);
        assert_eq!(store.get_mut(d).id, 260);
    }

    #[test]
    fn test_store_field_counts_include_extensions() {
        let ext_fields: Vec<&'static [&'static str]> = vec![HTTP_TEMPLATE];
        let mut store = TemplateStore::new(258, 1024);
        let idx = store.resolve(IpVersion::V4, 0b1, &ext_fields).unwrap();
        assert_eq!(
            store.get_mut(idx).field_count as usize,
            BASIC_TEMPLATE_V4.len() + HTTP_TEMPLATE.len()
        );
    }

    #[test]
    fn test_unregistered_extension_id_rejected() {
        let ext_fields: Vec<&'static [&'static str]> = vec![HTTP_TEMPLATE];
        let mut store = TemplateStore::new(258, 1024);
        assert!(store.resolve(IpVersion::V4, 0b10, &ext_fields).is_err());
    }

    #[test]
    fn test_expire_all() {
        let ext_fields: Vec<&'static [&'static str]> = vec![];
        let mut store = TemplateStore::new(258, 1024);
        let idx = store.resolve(IpVersion::V4, 0, &ext_fields).unwrap();
        store.get_mut(idx).exported = true;
        store.expire_all();
        assert!(!store.get_mut(idx).exported);
    }
}
