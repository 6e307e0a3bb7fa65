/// Minutes in one day. Every valid time of day is strictly below this.
pub const MINUTES_PER_DAY: u16 = 1440;

/// A `HH:MM` string that does not match `([0-1]?[0-9]|2[0-3]):[0-5][0-9]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedTime(pub String);

impl std::fmt::Display for MalformedTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed time of day: {:?} (expected HH:MM, 24-hour)", self.0)
    }
}

impl std::error::Error for MalformedTime {}

/// Parse a 24-hour `HH:MM` (or `H:MM`) string into minutes since midnight.
pub fn to_minutes(time: &str) -> Result<u16, MalformedTime> {
    let malformed = || MalformedTime(time.to_string());
    let (hours, minutes) = time.split_once(':').ok_or_else(malformed)?;

    if hours.is_empty() || hours.len() > 2 || !hours.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    if minutes.len() != 2 || !minutes.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    // Both halves are 1-2 ASCII digits, so these parses cannot fail.
    let h: u16 = hours.parse().map_err(|_| malformed())?;
    let m: u16 = minutes.parse().map_err(|_| malformed())?;
    if h > 23 || m > 59 {
        return Err(malformed());
    }
    Ok(h * 60 + m)
}

/// Render minutes since midnight as zero-padded `HH:MM`.
pub fn format_minutes(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Half-open overlap test on `[start, end)` intervals.
/// Intervals that only touch at a boundary do not overlap.
pub fn overlaps(start_a: u16, end_a: u16, start_b: u16, end_b: u16) -> bool {
    start_a < end_b && end_a > start_b
}
