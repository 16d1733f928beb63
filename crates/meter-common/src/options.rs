//! Declarative `key=value;key=value` option strings
//!
//! Every component (cache, outputs, processing plugins, inputs) is
//! configured through a short init string. A component declares its
//! options up front; parsing resolves short or long names, enforces
//! argument presence and rejects unknown keys. The declared table also
//! renders the component's usage listing.

use crate::error::{MeterError, MeterResult};

/// One declared option.
#[derive(Debug, Clone, Copy)]
pub struct OptSpec {
    pub short: &'static str,
    pub long: &'static str,
    /// Value placeholder shown in usage, empty for flags.
    pub hint: &'static str,
    pub description: &'static str,
    pub requires_arg: bool,
}

/// Declared option table for a single component.
#[derive(Debug, Clone)]
pub struct OptionsParser {
    name: &'static str,
    description: &'static str,
    options: Vec<OptSpec>,
}

impl OptionsParser {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            options: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declare an option taking a value.
    pub fn arg(
        mut self,
        short: &'static str,
        long: &'static str,
        hint: &'static str,
        description: &'static str,
    ) -> Self {
        self.options.push(OptSpec {
            short,
            long,
            hint,
            description,
            requires_arg: true,
        });
        self
    }

    /// Declare a value-less flag.
    pub fn flag(mut self, short: &'static str, long: &'static str, description: &'static str) -> Self {
        self.options.push(OptSpec {
            short,
            long,
            hint: "",
            description,
            requires_arg: false,
        });
        self
    }

    /// Parse an init string into `(canonical long name, value)` pairs.
    ///
    /// Items are separated by `;`; each item is `key=value` or a bare
    /// flag key. Short and long names are both accepted; the returned
    /// key is always the long name.
    pub fn parse<'a>(&self, params: &'a str) -> MeterResult<Vec<(&'static str, Option<&'a str>)>> {
        let mut out = Vec::new();
        for item in params.split(';') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let (key, value) = match item.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (item, None),
            };
            let spec = self
                .options
                .iter()
                .find(|o| o.long == key || o.short == key)
                .ok_or_else(|| {
                    MeterError::Options(format!("{}: unknown option '{}'", self.name, key))
                })?;
            if spec.requires_arg && value.is_none() {
                return Err(MeterError::Options(format!(
                    "{}: option '{}' requires a value",
                    self.name, spec.long
                )));
            }
            if !spec.requires_arg && value.is_some() {
                return Err(MeterError::Options(format!(
                    "{}: option '{}' takes no value",
                    self.name, spec.long
                )));
            }
            out.push((spec.long, value));
        }
        Ok(out)
    }

    /// Render the usage listing for this component.
    pub fn usage(&self) -> String {
        let mut s = format!("{} - {}\n", self.name, self.description);
        for o in &self.options {
            if o.requires_arg {
                s.push_str(&format!(
                    "  {}|{}={}  {}\n",
                    o.short, o.long, o.hint, o.description
                ));
            } else {
                s.push_str(&format!("  {}|{}  {}\n", o.short, o.long, o.description));
            }
        }
        s
    }
}

/// Parse an option value, reporting the offending key on failure.
pub fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> MeterResult<T> {
    value
        .parse::<T>()
        .map_err(|_| MeterError::Options(format!("invalid value '{}' for option '{}'", value, key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> OptionsParser {
        OptionsParser::new("cache", "flow cache")
            .arg("s", "size", "EXPONENT", "cache size as a power of two")
            .arg("a", "active", "TIME", "active timeout in seconds")
            .flag("b", "split-biflow", "do not fold reverse direction")
    }

    #[test]
    fn test_parse_long_and_short() {
        let pairs = parser().parse("size=17;a=120;split-biflow").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("size", Some("17")),
                ("active", Some("120")),
                ("split-biflow", None)
            ]
        );
    }

    #[test]
    fn test_empty_and_whitespace() {
        let pairs = parser().parse("  ; size = 10 ;;").unwrap();
        assert_eq!(pairs, vec![("size", Some("10"))]);
        assert!(parser().parse("").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(parser().parse("bogus=1").is_err());
    }

    #[test]
    fn test_missing_argument_rejected() {
        assert!(parser().parse("size").is_err());
    }

    #[test]
    fn test_flag_with_value_rejected() {
        assert!(parser().parse("split-biflow=yes").is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<u32>("size", "17").unwrap(), 17);
        assert!(parse_value::<u32>("size", "x").is_err());
    }

    #[test]
    fn test_usage_lists_options() {
        let u = parser().usage();
        assert!(u.contains("size=EXPONENT"));
        assert!(u.contains("split-biflow"));
    }
}
