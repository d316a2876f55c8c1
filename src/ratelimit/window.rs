//! Window duration parsing.
//!
//! Rule windows are written as a sequence of decimal numbers with unit
//! suffixes, such as `"30s"`, `"1m"`, `"1h30m"` or `"1.5h"`. Valid units are
//! `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`.

use std::time::Duration;

use thiserror::Error;

const NANOSECOND: u64 = 1;
const MICROSECOND: u64 = 1_000 * NANOSECOND;
const MILLISECOND: u64 = 1_000 * MICROSECOND;
const SECOND: u64 = 1_000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;

/// Error returned when a window string is not a valid duration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct WindowParseError {
    input: String,
    reason: String,
}

impl WindowParseError {
    fn new(input: &str, reason: String) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }

    /// The text that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

fn unit_nanos(unit: &str) -> Option<u64> {
    match unit {
        "ns" => Some(NANOSECOND),
        "us" | "µs" | "μs" => Some(MICROSECOND),
        "ms" => Some(MILLISECOND),
        "s" => Some(SECOND),
        "m" => Some(MINUTE),
        "h" => Some(HOUR),
        _ => None,
    }
}

fn out_of_range(input: &str) -> WindowParseError {
    WindowParseError::new(input, format!("duration out of range: '{}'", input))
}

/// Parse a window string into a [`Duration`].
///
/// A leading `+` is accepted. Negative durations cannot be represented and
/// are rejected unless they are zero. The bare string `"0"` parses to
/// [`Duration::ZERO`]; callers that need a positive span must check for it.
pub fn parse_window(input: &str) -> Result<Duration, WindowParseError> {
    let mut rest = input;
    let mut negative = false;

    if let Some(stripped) = rest.strip_prefix('-') {
        negative = true;
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('+') {
        rest = stripped;
    }

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(WindowParseError::new(
            input,
            "duration cannot be empty".to_string(),
        ));
    }

    let mut total: u64 = 0;
    while !rest.is_empty() {
        if !rest.starts_with(|c: char| c == '.' || c.is_ascii_digit()) {
            return Err(WindowParseError::new(
                input,
                format!("expected a number in duration: '{}'", input),
            ));
        }

        // Integer part
        let int_len = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (int_digits, after_int) = rest.split_at(int_len);
        let mut value: u64 = 0;
        for digit in int_digits.bytes() {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u64::from(digit - b'0')))
                .ok_or_else(|| out_of_range(input))?;
        }
        rest = after_int;

        // Fractional part; digits past u64 precision are dropped
        let mut fraction: u64 = 0;
        let mut scale: f64 = 1.0;
        let mut has_fraction = false;
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_len = after_dot
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_dot.len());
            let (frac_digits, after_frac) = after_dot.split_at(frac_len);
            for digit in frac_digits.bytes() {
                if let Some(next) = fraction
                    .checked_mul(10)
                    .and_then(|f| f.checked_add(u64::from(digit - b'0')))
                {
                    fraction = next;
                    scale *= 10.0;
                }
            }
            has_fraction = !frac_digits.is_empty();
            rest = after_frac;
        }

        if int_digits.is_empty() && !has_fraction {
            return Err(WindowParseError::new(
                input,
                format!("expected a number in duration: '{}'", input),
            ));
        }

        let unit_len = rest
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (unit, after_unit) = rest.split_at(unit_len);
        if unit.is_empty() {
            return Err(WindowParseError::new(
                input,
                format!("missing unit in duration: '{}'", input),
            ));
        }
        let unit = unit_nanos(unit).ok_or_else(|| {
            WindowParseError::new(
                input,
                format!("unknown unit '{}' in duration: '{}'", unit, input),
            )
        })?;
        rest = after_unit;

        let mut nanos = value.checked_mul(unit).ok_or_else(|| out_of_range(input))?;
        if fraction > 0 {
            let extra = (fraction as f64 * (unit as f64 / scale)) as u64;
            nanos = nanos.checked_add(extra).ok_or_else(|| out_of_range(input))?;
        }
        total = total.checked_add(nanos).ok_or_else(|| out_of_range(input))?;
    }

    if negative && total > 0 {
        return Err(WindowParseError::new(
            input,
            format!("duration cannot be negative: '{}'", input),
        ));
    }

    Ok(Duration::from_nanos(total))
}
