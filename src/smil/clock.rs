//! SMIL clock values.

use std::fmt;

/// A duration in milliseconds, written as a SMIL full clock value
/// (`H:MM:SS.mmm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ClockValue(pub u64);

impl ClockValue {
    pub fn millis(self) -> u64 {
        self.0
    }

    /// Parse a full (`H:MM:SS.mmm`) or partial (`MM:SS.mmm`) clock value, or
    /// a timecount with an `h`, `min`, `s` or `ms` suffix.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.contains(':') {
            let mut parts: Vec<&str> = s.split(':').collect();
            if parts.len() > 3 {
                return None;
            }
            let seconds = seconds_to_millis(parts.pop()?)?;
            let minutes: u64 = parts.pop().map_or(Some(0), |m| m.parse().ok())?;
            let hours: u64 = parts.pop().map_or(Some(0), |h| h.parse().ok())?;
            return Some(ClockValue(
                hours * 3_600_000 + minutes * 60_000 + seconds,
            ));
        }

        let (number, scale) = if let Some(n) = s.strip_suffix("ms") {
            (n, 1.0)
        } else if let Some(n) = s.strip_suffix("min") {
            (n, 60_000.0)
        } else if let Some(n) = s.strip_suffix('h') {
            (n, 3_600_000.0)
        } else if let Some(n) = s.strip_suffix('s') {
            (n, 1000.0)
        } else {
            (s, 1000.0)
        };
        let value: f64 = number.trim().parse().ok()?;
        (value.is_finite() && value >= 0.0).then(|| ClockValue((value * scale).round() as u64))
    }
}

fn seconds_to_millis(s: &str) -> Option<u64> {
    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    let whole: u64 = whole.parse().ok()?;
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut millis = 0;
    for (i, digit) in frac.chars().take(3).enumerate() {
        millis += u64::from(digit.to_digit(10)?) * 10u64.pow(2 - i as u32);
    }
    Some(whole * 1000 + millis)
}

impl fmt::Display for ClockValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.0 % 1000;
        let total_secs = self.0 / 1000;
        let secs = total_secs % 60;
        let mins = (total_secs / 60) % 60;
        let hours = total_secs / 3600;
        write!(f, "{}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
    }
}
