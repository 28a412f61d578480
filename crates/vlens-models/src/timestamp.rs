//! Timestamp parsing for model output.
//!
//! Models are asked for absolute seconds but regularly answer with clock
//! strings instead. Both shapes are accepted: `HH:MM:SS[.mmm]`, `MM:SS[.mmm]`,
//! plain seconds, or a JSON number.

use serde::de::{self, Deserializer, Visitor};
use thiserror::Error;

/// Timestamp parsing error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimestampError {
    #[error("Timestamp cannot be empty")]
    Empty,
    #[error("Timestamp cannot be negative")]
    Negative,
    #[error("Invalid {0} value: {1}")]
    InvalidValue(&'static str, String),
    #[error("Invalid timestamp format '{0}'. Use HH:MM:SS, MM:SS or seconds")]
    InvalidFormat(String),
}

/// Parse a clock string or plain seconds into total seconds.
///
/// # Examples
/// ```
/// use vlens_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timestamp("90.5").unwrap(), 90.5);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    const UNITS: [&str; 3] = ["hours", "minutes", "seconds"];
    let parts: Vec<&str> = ts.split(':').collect();
    if parts.len() > 3 {
        return Err(TimestampError::InvalidFormat(ts.to_string()));
    }

    let names = &UNITS[3 - parts.len()..];
    let mut total = 0.0;
    for (part, name) in parts.iter().zip(names) {
        let value: f64 = part
            .trim()
            .parse()
            .map_err(|_| TimestampError::InvalidValue(*name, part.to_string()))?;
        if value < 0.0 {
            return Err(TimestampError::Negative);
        }
        total = total * 60.0 + value;
    }
    Ok(total)
}

/// Format seconds as `HH:MM:SS`, dropping fractional seconds.
pub fn format_seconds(total_secs: f64) -> String {
    let whole = total_secs.max(0.0).floor() as u64;
    format!("{:02}:{:02}:{:02}", whole / 3600, (whole % 3600) / 60, whole % 60)
}

/// Serde helper accepting either a number of seconds or a clock string.
pub fn deserialize_seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    struct SecondsVisitor;

    impl Visitor<'_> for SecondsVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("seconds as a number or an HH:MM:SS string")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            if v < 0.0 {
                return Err(E::custom(TimestampError::Negative));
            }
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            self.visit_f64(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            parse_timestamp(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(SecondsVisitor)
}
