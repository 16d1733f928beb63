//! Line-per-flow text sink
//!
//! Prints one line per exported flow to stdout or a file:
//! `mac conversation packets bytes tcp-flags time extensions`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::IpAddr;

use chrono::DateTime;
use meter_common::options::OptionsParser;
use meter_common::output::{Output, OutputStats};
use meter_common::time::Timestamp;
use meter_common::{Flow, IpVersion, MeterError, MeterResult};

fn mac_text(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

fn time_text(ts: Timestamp) -> String {
    match DateTime::from_timestamp(ts.sec as i64, ts.usec * 1000) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        None => format!("{}.{:06}", ts.sec, ts.usec),
    }
}

fn endpoint_text(ip: IpAddr, port: u16, version: IpVersion) -> String {
    match version {
        IpVersion::V4 => format!("{ip}:{port}"),
        IpVersion::V6 => format!("[{ip}]:{port}"),
    }
}

pub struct TextOutput {
    out: Box<dyn Write + Send>,
    hide_mac: bool,
    stats: OutputStats,
}

impl TextOutput {
    pub fn options() -> OptionsParser {
        OptionsParser::new("text", "Output plugin for text export")
            .arg("f", "file", "PATH", "Write to a file instead of stdout")
            .flag("m", "mac", "Hide MAC addresses")
    }

    /// Build from a `key=value;key=value` init string.
    pub fn from_options(params: &str) -> MeterResult<Self> {
        let mut file: Option<&str> = None;
        let mut hide_mac = false;
        for (key, value) in Self::options().parse(params)? {
            match key {
                "file" => file = value,
                "mac" => hide_mac = true,
                _ => unreachable!(),
            }
        }
        let out: Box<dyn Write + Send> = match file {
            Some(path) => Box::new(BufWriter::new(File::create(path).map_err(|e| {
                MeterError::Config(format!("cannot open output file '{path}': {e}"))
            })?)),
            None => Box::new(io::stdout()),
        };
        Ok(Self::with_writer(out, hide_mac))
    }

    pub fn with_writer(mut out: Box<dyn Write + Send>, hide_mac: bool) -> Self {
        let header = if hide_mac {
            "conversation packets bytes tcp-flags time extensions"
        } else {
            "mac conversation packets bytes tcp-flags time extensions"
        };
        let _ = writeln!(out, "{header}");
        Self {
            out,
            hide_mac,
            stats: OutputStats::default(),
        }
    }

    fn print_flow(&mut self, flow: &Flow) -> io::Result<()> {
        if !self.hide_mac {
            write!(
                self.out,
                "{}->{} ",
                mac_text(&flow.src_mac),
                mac_text(&flow.dst_mac)
            )?;
        }
        write!(
            self.out,
            "{:2}@{}->{} {}->{} {}->{} {}->{} {}->{}",
            flow.ip_proto,
            endpoint_text(flow.src_ip, flow.src_port, flow.ip_version),
            endpoint_text(flow.dst_ip, flow.dst_port, flow.ip_version),
            flow.src_packets,
            flow.dst_packets,
            flow.src_bytes,
            flow.dst_bytes,
            flow.src_tcp_flags,
            flow.dst_tcp_flags,
            time_text(flow.time_first),
            time_text(flow.time_last),
        )?;
        for (_, ext) in flow.extensions.iter() {
            write!(self.out, " {ext}")?;
        }
        writeln!(self.out)
    }
}

impl Output for TextOutput {
    fn export(&mut self, flow: &Flow) {
        self.stats.seen += 1;
        if let Err(e) = self.print_flow(flow) {
            tracing::debug!(error = %e, "text output write failed");
            self.stats.dropped += 1;
        }
    }

    fn flush(&mut self) {
        let _ = self.out.flush();
    }

    fn close(&mut self) {
        self.flush();
    }

    fn stats(&self) -> OutputStats {
        self.stats
    }
}
