//! Human-readable byte sizes.
//!
//! Sizes use decimal units throughout: `1K` is 1000 bytes, matching how
//! servers and download tools usually report transfer sizes.

use super::ConfigError;

const KB: u64 = 1000;
const MB: u64 = KB * 1000;
const GB: u64 = MB * 1000;

/// Parse a size such as `1048576`, `500K`, `100M` or `2g`.
///
/// The optional suffix is case-insensitive and scales by powers of 1000.
pub fn parse_size(input: &str) -> Result<u64, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidSize {
        value: input.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = input.trim();
    let Some(last) = trimmed.chars().last() else {
        return Err(invalid("empty size"));
    };

    let (digits, multiplier) = match last.to_ascii_uppercase() {
        'K' => (&trimmed[..trimmed.len() - 1], KB),
        'M' => (&trimmed[..trimmed.len() - 1], MB),
        'G' => (&trimmed[..trimmed.len() - 1], GB),
        _ => (trimmed, 1),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| invalid("expected a whole number with an optional K, M or G suffix"))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| invalid("size is too large"))
}

/// Format a byte count with one decimal place, e.g. `2.5 KB` or `100.0 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < KB {
        return format!("{} B", bytes);
    }

    let mut divisor = KB;
    let mut unit = 0;
    while bytes / divisor >= KB && unit < UNITS.len() - 1 {
        divisor *= KB;
        unit += 1;
    }

    format!("{:.1} {}", bytes as f64 / divisor as f64, UNITS[unit])
}
