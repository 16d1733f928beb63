//! SMTP analyzer
//!
//! Summarizes a mail session: a bitmask of commands, a bitmask of
//! reply codes with per-class counters, the EHLO/HELO domain and the
//! first sender/recipient. Lines between DATA and the terminating dot
//! are message body and are not interpreted.

use meter_common::ext::{ExtensionData, ExtensionId, SmtpData, SMTP_TEMPLATE};
use meter_common::plugin::ActionMask;
use meter_common::{Flow, Packet};

use crate::plugin::ProcessPlugin;

const SMTP_PORT: u16 = 25;
const MAX_FIELD: usize = 255;

mod cmd {
    pub const EHLO: u32 = 0x0001;
    pub const HELO: u32 = 0x0002;
    pub const MAIL: u32 = 0x0004;
    pub const RCPT: u32 = 0x0008;
    pub const DATA: u32 = 0x0010;
    pub const RSET: u32 = 0x0020;
    pub const VRFY: u32 = 0x0040;
    pub const EXPN: u32 = 0x0080;
    pub const HELP: u32 = 0x0100;
    pub const NOOP: u32 = 0x0200;
    pub const QUIT: u32 = 0x0400;
    pub const UNKNOWN: u32 = 0x8000;
}

mod code {
    pub const C211: u32 = 0x0000_0001;
    pub const C214: u32 = 0x0000_0002;
    pub const C220: u32 = 0x0000_0004;
    pub const C221: u32 = 0x0000_0008;
    pub const C250: u32 = 0x0000_0010;
    pub const C251: u32 = 0x0000_0020;
    pub const C252: u32 = 0x0000_0040;
    pub const C354: u32 = 0x0000_0080;
    pub const C421: u32 = 0x0000_0100;
    pub const C450: u32 = 0x0000_0200;
    pub const C451: u32 = 0x0000_0400;
    pub const C452: u32 = 0x0000_0800;
    pub const C455: u32 = 0x0000_1000;
    pub const C500: u32 = 0x0000_2000;
    pub const C501: u32 = 0x0000_4000;
    pub const C502: u32 = 0x0000_8000;
    pub const C503: u32 = 0x0001_0000;
    pub const C504: u32 = 0x0002_0000;
    pub const C550: u32 = 0x0004_0000;
    pub const C551: u32 = 0x0008_0000;
    pub const C552: u32 = 0x0010_0000;
    pub const C553: u32 = 0x0020_0000;
    pub const C554: u32 = 0x0040_0000;
    pub const C555: u32 = 0x0080_0000;
    pub const SPAM: u32 = 0x4000_0000;
    pub const UNKNOWN: u32 = 0x8000_0000;
}

fn command_bit(command: &str) -> u32 {
    match command {
        "EHLO" => cmd::EHLO,
        "HELO" => cmd::HELO,
        "MAIL" => cmd::MAIL,
        "RCPT" => cmd::RCPT,
        "DATA" => cmd::DATA,
        "RSET" => cmd::RSET,
        "VRFY" => cmd::VRFY,
        "EXPN" => cmd::EXPN,
        "HELP" => cmd::HELP,
        "NOOP" => cmd::NOOP,
        "QUIT" => cmd::QUIT,
        _ => cmd::UNKNOWN,
    }
}

fn code_bit(code: u16) -> u32 {
    match code {
        211 => code::C211,
        214 => code::C214,
        220 => code::C220,
        221 => code::C221,
        250 => code::C250,
        251 => code::C251,
        252 => code::C252,
        354 => code::C354,
        421 => code::C421,
        450 => code::C450,
        451 => code::C451,
        452 => code::C452,
        455 => code::C455,
        500 => code::C500,
        501 => code::C501,
        502 => code::C502,
        503 => code::C503,
        504 => code::C504,
        550 => code::C550,
        551 => code::C551,
        552 => code::C552,
        553 => code::C553,
        554 => code::C554,
        555 => code::C555,
        _ => code::UNKNOWN,
    }
}

fn set_capped(target: &mut String, value: &str) {
    let mut end = value.len().min(MAX_FIELD);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    target.clear();
    target.push_str(&value[..end]);
}

/// The address inside `MAIL FROM:<addr>` / `RCPT TO:<addr>`.
fn angle_address(rest: &str) -> &str {
    let rest = rest.split_once(':').map(|(_, r)| r).unwrap_or(rest);
    let rest = rest.trim();
    rest.trim_start_matches('<').trim_end_matches('>').trim()
}

fn parse_commands(payload: &str, data: &mut SmtpData) {
    for line in payload.lines() {
        if data.data_transfer {
            if line == "." {
                data.data_transfer = false;
            }
            continue;
        }
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let bit = command_bit(&verb.to_ascii_uppercase());
        data.command_flags |= bit;
        match bit {
            cmd::EHLO | cmd::HELO => set_capped(&mut data.domain, rest.trim()),
            cmd::MAIL => {
                data.mail_count += 1;
                if data.first_sender.is_empty() {
                    set_capped(&mut data.first_sender, angle_address(rest));
                }
            }
            cmd::RCPT => {
                data.rcpt_count += 1;
                if data.first_recipient.is_empty() {
                    set_capped(&mut data.first_recipient, angle_address(rest));
                }
            }
            cmd::DATA => data.data_transfer = true,
            _ => {}
        }
    }
}

fn parse_replies(payload: &str, data: &mut SmtpData) {
    for line in payload.lines() {
        let Some(prefix) = line.get(..3) else {
            continue;
        };
        let Ok(code) = prefix.parse::<u16>() else {
            continue;
        };
        // Multiline replies continue with "250-..."; count the final
        // line of each reply only.
        if line.as_bytes().get(3) == Some(&b'-') {
            continue;
        }
        data.code_flags |= code_bit(code);
        if line.to_ascii_uppercase().contains("SPAM") {
            data.code_flags |= code::SPAM;
        }
        match code / 100 {
            2 => data.code_2xx += 1,
            3 => data.code_3xx += 1,
            4 => data.code_4xx += 1,
            5 => data.code_5xx += 1,
            _ => {}
        }
    }
}

#[derive(Default)]
pub struct SmtpPlugin {
    ext_id: ExtensionId,
}

impl SmtpPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, flow: &mut Flow, pkt: &Packet) {
        if !pkt.is_tcp() || pkt.payload.is_empty() {
            return;
        }
        let to_server = pkt.dst_port == SMTP_PORT;
        let from_server = pkt.src_port == SMTP_PORT;
        if !to_server && !from_server {
            return;
        }
        let payload = String::from_utf8_lossy(pkt.payload);

        if flow.extensions.get(self.ext_id).is_none() {
            flow.extensions
                .insert(self.ext_id, ExtensionData::Smtp(SmtpData::default()));
        }
        let Some(ExtensionData::Smtp(data)) = flow.extensions.get_mut(self.ext_id) else {
            return;
        };
        if to_server {
            parse_commands(&payload, data);
        } else {
            parse_replies(&payload, data);
        }
    }
}

impl ProcessPlugin for SmtpPlugin {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn assign_ext_id(&mut self, id: ExtensionId) {
        self.ext_id = id;
    }

    fn template_fields(&self) -> &'static [&'static str] {
        SMTP_TEMPLATE
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
