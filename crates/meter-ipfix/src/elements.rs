//! IPFIX information elements and template field lists
//!
//! One data table drives template construction and record
//! serialization. Variable-length fields advertise length 65535 in
//! the template record and use the one-byte/escape length prefix in
//! data records.

pub const IPFIX_VERSION: u16 = 10;
pub const TEMPLATE_SET_ID: u16 = 2;
/// Set ids up to 255 are reserved; data sets start here.
pub const FIRST_TEMPLATE_ID: u16 = 258;
pub const HEADER_SIZE: usize = 16;
pub const SET_HEADER_SIZE: usize = 4;
/// 1500 minus ethernet, IP and UDP headers.
pub const DEFAULT_MTU: u16 = 1458;

/// Reverse-direction fields (RFC 5103).
pub const PEN_REVERSE: u32 = 29305;
/// CESNET vendor fields.
pub const PEN_CESNET: u32 = 8057;
/// Flowmon vendor fields.
pub const PEN_FLOWMON: u32 = 39499;

#[cfg(feature = "msec-timestamps")]
mod ts {
    /// flowStartMilliseconds / flowEndMilliseconds.
    pub const FLOW_START_ID: u16 = 152;
    pub const FLOW_END_ID: u16 = 153;
}
#[cfg(not(feature = "msec-timestamps"))]
mod ts {
    /// flowStartSeconds / flowEndSeconds NTP variants.
    pub const FLOW_START_ID: u16 = 154;
    pub const FLOW_END_ID: u16 = 155;
}

/// On-wire length of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLen {
    Fixed(u16),
    Variable,
}

impl FieldLen {
    /// Length advertised in the template record.
    pub fn wire(self) -> u16 {
        match self {
            FieldLen::Fixed(n) => n,
            FieldLen::Variable => 0xffff,
        }
    }
}

/// One information element.
#[derive(Debug, Clone, Copy)]
pub struct ElementDef {
    pub name: &'static str,
    pub pen: u32,
    pub id: u16,
    pub len: FieldLen,
}

const fn fixed(name: &'static str, pen: u32, id: u16, len: u16) -> ElementDef {
    ElementDef {
        name,
        pen,
        id,
        len: FieldLen::Fixed(len),
    }
}

const fn var(name: &'static str, pen: u32, id: u16) -> ElementDef {
    ElementDef {
        name,
        pen,
        id,
        len: FieldLen::Variable,
    }
}

/// Every element any template in this exporter can reference.
pub const ELEMENTS: &[ElementDef] = &[
    // Basic flow fields.
    fixed("FLOW_END_REASON", 0, 136, 1),
    fixed("BYTES", 0, 1, 8),
    fixed("BYTES_REV", PEN_REVERSE, 1, 8),
    fixed("PACKETS", 0, 2, 8),
    fixed("PACKETS_REV", PEN_REVERSE, 2, 8),
    fixed("FLOW_START", 0, ts::FLOW_START_ID, 8),
    fixed("FLOW_END", 0, ts::FLOW_END_ID, 8),
    fixed("L3_PROTO", 0, 60, 1),
    fixed("L4_PROTO", 0, 4, 1),
    fixed("L4_TCP_FLAGS", 0, 6, 1),
    fixed("L4_TCP_FLAGS_REV", PEN_REVERSE, 6, 1),
    fixed("L4_PORT_SRC", 0, 7, 2),
    fixed("L4_PORT_DST", 0, 11, 2),
    fixed("INPUT_INTERFACE", 0, 10, 2),
    fixed("L3_IPV4_ADDR_SRC", 0, 8, 4),
    fixed("L3_IPV4_ADDR_DST", 0, 12, 4),
    fixed("L3_IPV6_ADDR_SRC", 0, 27, 16),
    fixed("L3_IPV6_ADDR_DST", 0, 28, 16),
    fixed("L2_SRC_MAC", 0, 56, 6),
    fixed("L2_DST_MAC", 0, 80, 6),
    // HTTP.
    var("HTTP_USERAGENT", PEN_FLOWMON, 20),
    var("HTTP_METHOD", PEN_CESNET, 200),
    var("HTTP_DOMAIN", PEN_FLOWMON, 1),
    var("HTTP_REFERER", PEN_FLOWMON, 3),
    var("HTTP_URI", PEN_FLOWMON, 2),
    var("HTTP_CONTENT_TYPE", PEN_FLOWMON, 10),
    fixed("HTTP_STATUS", PEN_FLOWMON, 12, 2),
    // TLS.
    fixed("TLS_VERSION", PEN_FLOWMON, 333, 2),
    var("TLS_SNI", PEN_CESNET, 808),
    var("TLS_ALPN", PEN_FLOWMON, 337),
    var("TLS_JA3", PEN_FLOWMON, 357),
    // DNS.
    fixed("DNS_ANSWERS", PEN_CESNET, 14, 2),
    fixed("DNS_RCODE", PEN_CESNET, 1, 1),
    fixed("DNS_QTYPE", PEN_CESNET, 3, 2),
    fixed("DNS_CLASS", PEN_CESNET, 4, 2),
    fixed("DNS_RR_TTL", PEN_CESNET, 5, 4),
    fixed("DNS_RLENGTH", PEN_CESNET, 6, 2),
    fixed("DNS_PSIZE", PEN_CESNET, 8, 2),
    fixed("DNS_DO", PEN_CESNET, 9, 1),
    fixed("DNS_ID", PEN_CESNET, 10, 2),
    var("DNS_NAME", PEN_CESNET, 2),
    var("DNS_RDATA", PEN_CESNET, 7),
    // SIP.
    fixed("SIP_MSG_TYPE", PEN_CESNET, 100, 2),
    fixed("SIP_STATUS_CODE", PEN_CESNET, 101, 2),
    var("SIP_CALL_ID", PEN_CESNET, 102),
    var("SIP_CALLING_PARTY", PEN_CESNET, 103),
    var("SIP_CALLED_PARTY", PEN_CESNET, 104),
    var("SIP_VIA", PEN_CESNET, 105),
    var("SIP_USER_AGENT", PEN_CESNET, 106),
    var("SIP_REQUEST_URI", PEN_CESNET, 107),
    var("SIP_CSEQ", PEN_CESNET, 108),
    // SMTP.
    fixed("SMTP_COMMANDS", PEN_CESNET, 810, 4),
    fixed("SMTP_MAIL_COUNT", PEN_CESNET, 811, 4),
    fixed("SMTP_RCPT_COUNT", PEN_CESNET, 812, 4),
    var("SMTP_SENDER", PEN_CESNET, 813),
    var("SMTP_RECIPIENT", PEN_CESNET, 814),
    fixed("SMTP_STATUS_CODES", PEN_CESNET, 815, 4),
    fixed("SMTP_CODE_2XX_COUNT", PEN_CESNET, 816, 4),
    fixed("SMTP_CODE_3XX_COUNT", PEN_CESNET, 817, 4),
    fixed("SMTP_CODE_4XX_COUNT", PEN_CESNET, 818, 4),
    fixed("SMTP_CODE_5XX_COUNT", PEN_CESNET, 819, 4),
    var("SMTP_DOMAIN", PEN_CESNET, 820),
    // Packet histograms, carried as basicList (element 291).
    var("S_PHISTS_SIZES", 0, 291),
    var("S_PHISTS_IPT", 0, 291),
    var("D_PHISTS_SIZES", 0, 291),
    var("D_PHISTS_IPT", 0, 291),
    // NTP.
    fixed("NTP_LEAP", PEN_CESNET, 18, 1),
    fixed("NTP_VERSION", PEN_CESNET, 19, 1),
    fixed("NTP_MODE", PEN_CESNET, 20, 1),
    fixed("NTP_STRATUM", PEN_CESNET, 21, 1),
    fixed("NTP_POLL", PEN_CESNET, 22, 1),
    fixed("NTP_PRECISION", PEN_CESNET, 23, 1),
    fixed("NTP_DELAY", PEN_CESNET, 24, 4),
    fixed("NTP_DISPERSION", PEN_CESNET, 25, 4),
    var("NTP_REF_ID", PEN_CESNET, 26),
    var("NTP_REF", PEN_CESNET, 27),
    var("NTP_ORIG", PEN_CESNET, 28),
    var("NTP_RECV", PEN_CESNET, 29),
    var("NTP_SENT", PEN_CESNET, 30),
];

/// Look up an element by template field name.
pub fn element(name: &str) -> Option<&'static ElementDef> {
    ELEMENTS.iter().find(|e| e.name == name)
}

/// Basic field set, IPv4 variant, in wire order.
pub const BASIC_TEMPLATE_V4: &[&str] = &[
    "FLOW_END_REASON",
    "BYTES",
    "BYTES_REV",
    "PACKETS",
    "PACKETS_REV",
    "FLOW_START",
    "FLOW_END",
    "L3_PROTO",
    "L4_PROTO",
    "L4_TCP_FLAGS",
    "L4_TCP_FLAGS_REV",
    "L4_PORT_SRC",
    "L4_PORT_DST",
    "INPUT_INTERFACE",
    "L3_IPV4_ADDR_SRC",
    "L3_IPV4_ADDR_DST",
    "L2_SRC_MAC",
    "L2_DST_MAC",
];

/// Basic field set, IPv6 variant.
pub const BASIC_TEMPLATE_V6: &[&str] = &[
    "FLOW_END_REASON",
    "BYTES",
    "BYTES_REV",
    "PACKETS",
    "PACKETS_REV",
    "FLOW_START",
    "FLOW_END",
    "L3_PROTO",
    "L4_PROTO",
    "L4_TCP_FLAGS",
    "L4_TCP_FLAGS_REV",
    "L4_PORT_SRC",
    "L4_PORT_DST",
    "INPUT_INTERFACE",
    "L3_IPV6_ADDR_SRC",
    "L3_IPV6_ADDR_DST",
    "L2_SRC_MAC",
    "L2_DST_MAC",
];

/// Sum of the fixed-field lengths of a basic template.
pub fn basic_record_len(names: &[&str]) -> usize {
    names
        .iter()
        .map(|n| match element(n).map(|e| e.len) {
            Some(FieldLen::Fixed(l)) => l as usize,
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_basic_field_is_defined() {
        for name in BASIC_TEMPLATE_V4.iter().chain(BASIC_TEMPLATE_V6) {
            assert!(element(name).is_some(), "missing element {name}");
        }
    }

    #[test]
    fn test_basic_record_lengths() {
        assert_eq!(basic_record_len(BASIC_TEMPLATE_V4), 79);
        assert_eq!(basic_record_len(BASIC_TEMPLATE_V6), 103);
    }

    #[test]
    fn test_reverse_fields_use_reverse_pen() {
        assert_eq!(element("BYTES_REV").unwrap().pen, PEN_REVERSE);
        assert_eq!(element("L4_TCP_FLAGS_REV").unwrap().pen, PEN_REVERSE);
        assert_eq!(element("BYTES").unwrap().pen, 0);
    }

    #[test]
    fn test_variable_wire_length_sentinel() {
        assert_eq!(element("TLS_SNI").unwrap().len.wire(), 0xffff);
        assert_eq!(element("HTTP_STATUS").unwrap().len.wire(), 2);
    }

    #[test]
    fn test_no_duplicate_names() {
        for (i, a) in ELEMENTS.iter().enumerate() {
            for b in &ELEMENTS[i + 1..] {
                assert_ne!(a.name, b.name, "duplicate element name {}", a.name);
            }
        }
    }
}
