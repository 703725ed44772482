//! RFC3339 timestamps as persisted on tasks and namespace annotations.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::ModelError;

/// Current UTC time formatted as RFC3339.
pub fn now_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}

pub fn format_rfc3339(at: OffsetDateTime) -> String {
    // Rfc3339 formatting only fails for years outside 0..=9999.
    at.format(&Rfc3339).unwrap_or_default()
}

pub fn parse_rfc3339(value: &str) -> Result<OffsetDateTime, ModelError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| ModelError::InvalidTimestamp {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Whole seconds elapsed between two RFC3339 timestamps.
///
/// Unparseable or reversed inputs yield `0`.
pub fn elapsed_seconds(start: &str, end: &str) -> u64 {
    match (parse_rfc3339(start), parse_rfc3339(end)) {
        (Ok(s), Ok(e)) if e >= s => (e - s).whole_seconds() as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_parseable() {
        let now = now_rfc3339();
        assert!(parse_rfc3339(&now).is_ok());
    }

    #[test]
    fn elapsed_between_two_points() {
        let secs = elapsed_seconds("2024-01-01T00:00:00Z", "2024-01-01T00:01:30Z");
        assert_eq!(secs, 90);
    }

    #[test]
    fn elapsed_is_zero_for_garbage_or_reversed() {
        assert_eq!(elapsed_seconds("", "2024-01-01T00:00:00Z"), 0);
        assert_eq!(
            elapsed_seconds("2024-01-01T00:01:00Z", "2024-01-01T00:00:00Z"),
            0
        );
    }
}
