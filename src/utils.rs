use std::time::Duration;

/// Format a `Duration` for log fields with automatic unit scaling, e.g.
/// `1.94ms` or `2.34s`.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}
