//! Flow cache configuration

use meter_common::options::{parse_value, OptionsParser};
use meter_common::{MeterError, MeterResult};

pub const DEFAULT_CACHE_SIZE: u32 = 1 << 17;
pub const DEFAULT_LINE_SIZE: u32 = 16;
pub const DEFAULT_ACTIVE_TIMEOUT: u32 = 300;
pub const DEFAULT_INACTIVE_TIMEOUT: u32 = 30;

/// Cache geometry and timeouts.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total slot count, a power of two.
    pub cache_size: u32,
    /// Slots per line, a power of two, at least 2.
    pub line_size: u32,
    /// Active timeout in seconds, measured from the first packet.
    pub active: u32,
    /// Inactive timeout in seconds, measured from the last packet.
    pub inactive: u32,
    /// Keep each direction in its own flow instead of folding.
    pub split_biflow: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            line_size: DEFAULT_LINE_SIZE,
            active: DEFAULT_ACTIVE_TIMEOUT,
            inactive: DEFAULT_INACTIVE_TIMEOUT,
            split_biflow: false,
        }
    }
}

impl CacheConfig {
    pub fn options() -> OptionsParser {
        OptionsParser::new("cache", "Flow storage implemented as a set-associative hash table")
            .arg("s", "size", "EXPONENT", "Cache size as a power of two")
            .arg("l", "line", "EXPONENT", "Line size as a power of two")
            .arg("a", "active", "TIME", "Active timeout in seconds")
            .arg("i", "inactive", "TIME", "Inactive timeout in seconds")
            .flag("b", "split-biflow", "Do not fold the reverse direction into the flow")
    }

    /// Parse a `key=value;key=value` init string.
    pub fn from_options(params: &str) -> MeterResult<Self> {
        let mut cfg = Self::default();
        for (key, value) in Self::options().parse(params)? {
            match key {
                "size" => {
                    let exp: u32 = parse_value(key, value.unwrap_or_default())?;
                    if !(4..=30).contains(&exp) {
                        return Err(MeterError::Config(
                            "cache size exponent must be between 4 and 30".into(),
                        ));
                    }
                    cfg.cache_size = 1 << exp;
                }
                "line" => {
                    let exp: u32 = parse_value(key, value.unwrap_or_default())?;
                    if !(1..=10).contains(&exp) {
                        return Err(MeterError::Config(
                            "cache line exponent must be between 1 and 10".into(),
                        ));
                    }
                    cfg.line_size = 1 << exp;
                }
                "active" => cfg.active = parse_value(key, value.unwrap_or_default())?,
                "inactive" => cfg.inactive = parse_value(key, value.unwrap_or_default())?,
                "split-biflow" => cfg.split_biflow = true,
                _ => unreachable!(),
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> MeterResult<()> {
        if !self.cache_size.is_power_of_two() || !self.line_size.is_power_of_two() {
            return Err(MeterError::Config(
                "cache and line sizes must be powers of two".into(),
            ));
        }
        if self.line_size < 2 {
            return Err(MeterError::Config("cache line needs at least 2 slots".into()));
        }
        if self.cache_size < self.line_size {
            return Err(MeterError::Config(
                "cache must hold at least one full line".into(),
            ));
        }
        Ok(())
    }
}
