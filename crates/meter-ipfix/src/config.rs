//! IPFIX exporter configuration

use meter_common::options::{parse_value, OptionsParser};
use meter_common::{MeterError, MeterResult};

use crate::elements::{DEFAULT_MTU, HEADER_SIZE, SET_HEADER_SIZE};

pub const DEFAULT_PORT: u16 = 4739;
pub const DEFAULT_RECONNECT_SECS: u64 = 60;
pub const DEFAULT_TEMPLATE_REFRESH_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct IpfixConfig {
    /// Collector address.
    pub host: String,
    pub port: u16,
    /// Use UDP instead of TCP.
    pub udp: bool,
    /// Observation domain id.
    pub odid: u32,
    /// Direction bit field, emitted in the ingress-interface element.
    pub dir: u16,
    /// Maximum message payload size.
    pub mtu: u16,
    /// UDP template refresh interval in seconds, 0 disables.
    pub template_refresh: u64,
    /// UDP template refresh by exported-message count, 0 disables.
    pub template_refresh_msgs: u64,
    /// Back-off between reconnect attempts.
    pub reconnect_timeout: u64,
    pub verbose: bool,
}

impl Default for IpfixConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            udp: false,
            odid: 0,
            dir: 0,
            mtu: DEFAULT_MTU,
            template_refresh: DEFAULT_TEMPLATE_REFRESH_SECS,
            template_refresh_msgs: 0,
            reconnect_timeout: DEFAULT_RECONNECT_SECS,
            verbose: false,
        }
    }
}

impl IpfixConfig {
    pub fn options() -> OptionsParser {
        OptionsParser::new("ipfix", "Output plugin for IPFIX export")
            .arg("h", "host", "ADDR", "Remote collector address")
            .arg("p", "port", "PORT", "Remote collector port")
            .flag("u", "udp", "Use UDP transport")
            .arg("I", "id", "NUM", "Observation domain identification")
            .arg("d", "dir", "NUM", "Direction bit field value")
            .arg("m", "mtu", "SIZE", "Maximum size of an exported message")
            .arg("t", "template", "SECONDS", "UDP template refresh interval")
            .flag("v", "verbose", "Log template and message details")
    }

    pub fn from_options(params: &str) -> MeterResult<Self> {
        let mut cfg = Self::default();
        for (key, value) in Self::options().parse(params)? {
            match key {
                "host" => cfg.host = value.unwrap_or_default().to_string(),
                "port" => cfg.port = parse_value(key, value.unwrap_or_default())?,
                "udp" => cfg.udp = true,
                "id" => cfg.odid = parse_value(key, value.unwrap_or_default())?,
                "dir" => cfg.dir = parse_value(key, value.unwrap_or_default())?,
                "mtu" => cfg.mtu = parse_value(key, value.unwrap_or_default())?,
                "template" => {
                    cfg.template_refresh = parse_value(key, value.unwrap_or_default())?
                }
                "verbose" => cfg.verbose = true,
                _ => unreachable!(),
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> MeterResult<()> {
        if (self.mtu as usize) <= HEADER_SIZE + SET_HEADER_SIZE {
            return Err(MeterError::Config(format!(
                "ipfix mtu must exceed {} bytes",
                HEADER_SIZE + SET_HEADER_SIZE
            )));
        }
        if self.host.is_empty() {
            return Err(MeterError::Config("ipfix collector host is empty".into()));
        }
        Ok(())
    }
}
