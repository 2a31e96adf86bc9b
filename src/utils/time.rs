//! Date helpers for trade bookkeeping.

use chrono::{DateTime, Utc};

/// Human readable holding time between two instants, e.g. `"1d 3h 25m"`.
///
/// Negative spans (clock skew between open and close) render as zero.
pub fn duration_label(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let total_minutes = (to - from).num_minutes().max(0);
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;
    format!("{days}d {hours}h {minutes}m")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_duration_label() {
        let open = Utc::now();
        let close = open + Duration::days(1) + Duration::hours(3) + Duration::minutes(25);
        assert_eq!(duration_label(open, close), "1d 3h 25m");
    }

    #[test]
    fn test_duration_label_clamps_negative() {
        let open = Utc::now();
        assert_eq!(duration_label(open, open - Duration::minutes(5)), "0d 0h 0m");
    }
}
