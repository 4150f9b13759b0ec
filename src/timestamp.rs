//! Wall-clock helpers shared by records that carry timestamps.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Current UTC time formatted as RFC3339.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = now_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
        assert!(OffsetDateTime::parse(&ts, &Rfc3339).is_ok());
    }
}
