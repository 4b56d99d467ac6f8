//! Human-friendly scalar grammars used by the config file: durations
//! (`150s`, `5m`, `1h30m`) and byte sizes (`1k`, `16M`, plain integers).

use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

pub const KILOBYTE: usize = 1024;
pub const MEGABYTE: usize = 1024 * KILOBYTE;
pub const GIGABYTE: usize = 1024 * MEGABYTE;

/// A byte count, deserializable from a plain integer or a string with a
/// `k`, `M` or `G` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub usize);

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte count, either an integer or a string like '1k'")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                Ok(ByteSize(value as usize))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                if value < 0 {
                    return Err(E::custom("byte size cannot be negative"));
                }
                Ok(ByteSize(value as usize))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                parse_byte_size(value).map(ByteSize).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

/// Parses `16`, `1k`, `32M` or `2G` into a byte count.
pub fn parse_byte_size(input: &str) -> Result<usize, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty byte size".to_string());
    }

    let (numeric, multiplier) = match s.strip_suffix(['k', 'M', 'G']) {
        Some(numeric) => {
            let multiplier = match &s[s.len() - 1..] {
                "k" => KILOBYTE,
                "M" => MEGABYTE,
                _ => GIGABYTE,
            };
            (numeric, multiplier)
        }
        None => (s, 1),
    };

    let value: usize = numeric
        .trim()
        .parse()
        .map_err(|_| format!("invalid byte size '{input}'"))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("byte size '{input}' overflows"))
}

/// Parses a Go-style duration string: one or more `<integer><unit>`
/// segments, units `ns`, `us`, `ms`, `s`, `m`, `h` (e.g. `300ms`,
/// `150s`, `1h30m`).
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut rest = s;
    let mut total = Duration::ZERO;

    while !rest.is_empty() {
        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return Err(format!("invalid duration '{input}'"));
        }

        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration '{input}'"))?;
        rest = &rest[digits..];

        let unit_len = rest.chars().take_while(char::is_ascii_alphabetic).count();
        let segment = match &rest[..unit_len] {
            "ns" => Duration::from_nanos(value),
            "us" => Duration::from_micros(value),
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            unit => return Err(format!("unknown unit '{unit}' in duration '{input}'")),
        };
        rest = &rest[unit_len..];

        total += segment;
    }

    Ok(total)
}

pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(de::Error::custom)
}
