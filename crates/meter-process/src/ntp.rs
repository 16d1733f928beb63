//! NTP analyzer
//!
//! Reads the 48-byte header of UDP NTP traffic. The reference id is
//! rendered as ASCII below stratum 2 and as a dotted IPv4 address
//! otherwise; the four timestamps are rendered as decimal seconds
//! with the full 32-bit fraction resolved.

use meter_common::ext::{ExtensionData, ExtensionId, NtpData, NTP_TEMPLATE};
use meter_common::plugin::ActionMask;
use meter_common::{Flow, Packet};

use crate::plugin::ProcessPlugin;

const NTP_PORT: u16 = 123;
const HEADER_LEN: usize = 48;

fn be32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Render a 64-bit NTP timestamp as "seconds.fraction" with
/// nanosecond precision.
fn timestamp_text(b: &[u8]) -> String {
    let secs = be32(&b[0..4]);
    let frac = be32(&b[4..8]);
    let nanos = (u64::from(frac) * 1_000_000_000) >> 32;
    format!("{secs}.{nanos:09}")
}

fn reference_id_text(stratum: u8, b: &[u8]) -> String {
    if stratum < 2 {
        // Primary servers carry a short ASCII identifier.
        b.iter()
            .take_while(|&&c| c != 0)
            .map(|&c| if c.is_ascii_graphic() { c as char } else { '.' })
            .collect()
    } else {
        std::net::Ipv4Addr::new(b[0], b[1], b[2], b[3]).to_string()
    }
}

fn parse_ntp(payload: &[u8]) -> Option<NtpData> {
    if payload.len() < HEADER_LEN {
        return None;
    }
    let mode = payload[0] & 0x07;
    // Client, server and broadcast packets only.
    if !(3..=5).contains(&mode) {
        return None;
    }
    let stratum = payload[1];
    Some(NtpData {
        leap: payload[0] >> 6,
        version: (payload[0] >> 3) & 0x07,
        mode,
        stratum,
        poll: payload[2],
        precision: payload[3],
        delay: be32(&payload[4..8]),
        dispersion: be32(&payload[8..12]),
        reference_id: reference_id_text(stratum, &payload[12..16]),
        reference: timestamp_text(&payload[16..24]),
        origin: timestamp_text(&payload[24..32]),
        receive: timestamp_text(&payload[32..40]),
        sent: timestamp_text(&payload[40..48]),
    })
}

#[derive(Default)]
pub struct NtpPlugin {
    ext_id: ExtensionId,
}

impl NtpPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, flow: &mut Flow, pkt: &Packet) {
        if !pkt.is_udp() || (pkt.src_port != NTP_PORT && pkt.dst_port != NTP_PORT) {
            return;
        }
        if let Some(data) = parse_ntp(pkt.payload) {
            flow.extensions.insert(self.ext_id, ExtensionData::Ntp(data));
        }
    }
}

impl ProcessPlugin for NtpPlugin {
    fn name(&self) -> &'static str {
        "ntp"
    }

    fn assign_ext_id(&mut self, id: ExtensionId) {
        self.ext_id = id;
    }

    fn template_fields(&self) -> &'static [&'static str] {
        NTP_TEMPLATE
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
