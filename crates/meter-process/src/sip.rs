//! SIP analyzer
//!
//! Every SIP message becomes its own flow record: when a packet with
//! a recognizable SIP start line arrives on a flow that is already
//! carrying data, the analyzer asks the cache to flush the flow and
//! reinsert the packet, then parses the message into the successor's
//! extension.

use meter_common::ext::{ExtensionData, ExtensionId, SipData, SIP_TEMPLATE};
use meter_common::plugin::ActionMask;
use meter_common::{Flow, Packet};

use crate::plugin::ProcessPlugin;

const SIP_PORT: u16 = 5060;
const SIP_PORT_TLS: u16 = 5061;
const MAX_FIELD: usize = 128;
/// Reply start lines map to this message type; the status code
/// carries the specifics.
const MSG_TYPE_REPLY: u16 = 99;

const METHODS: &[(&str, u16)] = &[
    ("INVITE", 1),
    ("ACK", 2),
    ("CANCEL", 3),
    ("BYE", 4),
    ("REGISTER", 5),
    ("OPTIONS", 6),
    ("PUBLISH", 7),
    ("NOTIFY", 8),
    ("INFO", 9),
    ("SUBSCRIBE", 10),
];

/// Message type from the start line, or `None` when this is not SIP.
fn message_type(payload: &[u8]) -> Option<u16> {
    let line_end = payload.iter().position(|&b| b == b'\n')?;
    let line = std::str::from_utf8(&payload[..line_end]).ok()?;

    if line.starts_with("SIP/2.0 ") {
        return Some(MSG_TYPE_REPLY);
    }
    for (method, code) in METHODS {
        if let Some(rest) = line.strip_prefix(method) {
            // Request lines read "METHOD sip:uri SIP/2.0"; the scheme
            // check keeps SSDP NOTIFY and HTTP verbs out.
            if rest.starts_with(" sip:") || rest.starts_with(" sips:") {
                return Some(*code);
            }
        }
    }
    None
}

/// Strip a From/To/Via value down to the bare URI: drop the display
/// name before the scheme colon and anything after `>` or `;`.
fn uri_of(value: &str) -> &str {
    let value = value.split('>').next().unwrap_or(value);
    let value = value.split(';').next().unwrap_or(value);
    match value.find(':') {
        Some(pos) => &value[pos + 1..],
        None => "",
    }
}

fn set_capped(target: &mut String, value: &str) {
    target.clear();
    let mut end = value.len().min(MAX_FIELD);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    target.push_str(&value[..end]);
}

fn parse_sip(payload: &[u8], msg_type: u16) -> Option<SipData> {
    let text = String::from_utf8_lossy(payload);
    let mut lines = text.lines();
    let start = lines.next()?;
    let mut data = SipData {
        msg_type,
        ..SipData::default()
    };

    let mut tokens = start.split(' ');
    tokens.next()?; // method, or the protocol tag of a reply
    let second = tokens.next().unwrap_or("");
    if msg_type == MSG_TYPE_REPLY {
        data.status_code = second.parse().ok()?;
    } else {
        set_capped(&mut data.request_uri, second);
    }

    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        // Compact header forms are single letters.
        if key.eq_ignore_ascii_case("from") || key.eq_ignore_ascii_case("f") {
            set_capped(&mut data.calling_party, uri_of(value));
        } else if key.eq_ignore_ascii_case("to") || key.eq_ignore_ascii_case("t") {
            set_capped(&mut data.called_party, uri_of(value));
        } else if key.eq_ignore_ascii_case("via") || key.eq_ignore_ascii_case("v") {
            if data.via.is_empty() {
                set_capped(&mut data.via, value);
            } else if data.via.len() + value.len() + 1 <= MAX_FIELD {
                data.via.push(';');
                data.via.push_str(value);
            }
        } else if key.eq_ignore_ascii_case("call-id") || key.eq_ignore_ascii_case("i") {
            set_capped(&mut data.call_id, value);
        } else if key.eq_ignore_ascii_case("user-agent") {
            set_capped(&mut data.user_agent, value);
        } else if key.eq_ignore_ascii_case("cseq") {
            set_capped(&mut data.cseq, value);
        }
    }
    Some(data)
}

#[derive(Default)]
pub struct SipPlugin {
    ext_id: ExtensionId,
}

impl SipPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn relevant(pkt: &Packet) -> bool {
        let ports = [pkt.src_port, pkt.dst_port];
        ports.contains(&SIP_PORT) || ports.contains(&SIP_PORT_TLS)
    }

    fn apply(&self, flow: &mut Flow, pkt: &Packet) {
        if !Self::relevant(pkt) {
            return;
        }
        let Some(msg_type) = message_type(pkt.payload) else {
            return;
        };
        if let Some(data) = parse_sip(pkt.payload, msg_type) {
            flow.extensions.insert(self.ext_id, ExtensionData::Sip(data));
        }
    }
}

impl ProcessPlugin for SipPlugin {
    fn name(&self) -> &'static str {
        "sip"
    }

    fn assign_ext_id(&mut self, id: ExtensionId) {
        self.ext_id = id;
    }

    fn template_fields(&self) -> &'static [&'static str] {
        SIP_TEMPLATE
    }

    fn post_create(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        self.apply(flow, pkt);
        ActionMask::NONE
    }

    fn pre_update(&mut self, _flow: &mut Flow, pkt: &Packet) -> ActionMask {
        // A new message-type header starts the next logical session;
        // the flow restarts from this packet.
        if Self::relevant(pkt) && message_type(pkt.payload).is_some() {
            return ActionMask::FLUSH_WITH_REINSERT;
        }
        ActionMask::NONE
    }
}
