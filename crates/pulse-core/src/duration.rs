//! Human-readable duration strings ("500ms", "10s", "5m", "24h", "7d").

use std::time::Duration;

/// Parse a duration string like "5s", "500ms", "1m", "24h", "7d".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    let (digits, unit) = match s.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&s[..idx], Some(c)),
        _ => (s, None),
    };
    let value = digits.trim().parse::<u64>().ok()?;
    let secs = match unit {
        None | Some('s') => value,
        Some('m') => value.checked_mul(60)?,
        Some('h') => value.checked_mul(60 * 60)?,
        Some('d') => value.checked_mul(24 * 60 * 60)?,
        Some(_) => return None,
    };
    Some(Duration::from_secs(secs))
}

/// Render a duration back in the largest whole unit ("5m", "90s", "250ms").
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if d.subsec_millis() != 0 || secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    if secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs % 3_600 == 0 {
        format!("{}h", secs / 3_600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
