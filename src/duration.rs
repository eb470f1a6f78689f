//! Duration strings for timeouts and poll intervals.
//!
//! Workflow documents express durations the way the compute tooling always
//! has: a sequence of decimal numbers with unit suffixes, e.g. `"10m"`,
//! `"0.1s"`, `"1h30m"`, `"500ms"`.

use std::time::Duration;

use crate::error::{Error, Result};

/// Parse a duration string such as `"10m"`, `"0.1s"` or `"1h30m"`.
///
/// Supported units: `ns`, `us`, `ms`, `s`, `m`, `h`. Numbers may carry a
/// fractional part. Negative or bare-number durations are rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let original = s;
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidInput("empty duration".to_string()));
    }
    if s.starts_with('-') {
        return Err(Error::InvalidInput(format!(
            "negative duration {:?}",
            original
        )));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(Error::InvalidInput(format!(
                "invalid duration {:?}",
                original
            )));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid duration {:?}", original)))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            unit => {
                return Err(Error::InvalidInput(format!(
                    "unknown unit {:?} in duration {:?}",
                    unit, original
                )))
            }
        };
        rest = &rest[unit_len..];
        total += Duration::from_nanos((value * nanos_per_unit) as u64);
    }

    Ok(total)
}
