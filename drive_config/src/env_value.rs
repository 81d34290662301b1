use std::time::Duration;

use utils::ByteSize;

/// Parsing of configuration values from environment variable strings.
pub trait EnvConfigValue: Sized {
    fn parse_env(raw: &str) -> Result<Self, String>;
}

macro_rules! impl_from_str_env_value {
    ($($ty:ty),+) => {
        $(
            impl EnvConfigValue for $ty {
                fn parse_env(raw: &str) -> Result<Self, String> {
                    raw.trim().parse().map_err(|e| format!("{e}"))
                }
            }
        )+
    };
}

impl_from_str_env_value!(usize, u64, u32, f64, bool, String);

impl EnvConfigValue for ByteSize {
    fn parse_env(raw: &str) -> Result<Self, String> {
        raw.parse()
    }
}

/// Durations accept `ms`, `s`, or `m` suffixes; a bare number means seconds.
impl EnvConfigValue for Duration {
    fn parse_env(raw: &str) -> Result<Self, String> {
        let s = raw.trim().to_ascii_lowercase();

        let (digits, unit_ms) = if let Some(d) = s.strip_suffix("ms") {
            (d, 1f64)
        } else if let Some(d) = s.strip_suffix('s') {
            (d, 1_000f64)
        } else if let Some(d) = s.strip_suffix('m') {
            (d, 60_000f64)
        } else {
            (s.as_str(), 1_000f64)
        };

        let value: f64 = digits.trim().parse().map_err(|_| format!("invalid duration: {raw:?}"))?;
        if value < 0.0 {
            return Err(format!("negative duration: {raw:?}"));
        }

        Ok(Duration::from_millis((value * unit_ms) as u64))
    }
}
