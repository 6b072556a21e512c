//! Human-readable byte and duration formatting for API responses and logs

/// Format a byte count as a short human-readable string ("1.2MB", "512B").
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[(&str, u64)] = &[
        ("TB", 1024 * 1024 * 1024 * 1024),
        ("GB", 1024 * 1024 * 1024),
        ("MB", 1024 * 1024),
        ("KB", 1024),
    ];

    for &(unit, divisor) in UNITS {
        if bytes >= divisor {
            let value = bytes / divisor;
            let decimal = (bytes % divisor) * 10 / divisor;

            if decimal > 0 {
                return format!("{}.{}{}", value, decimal, unit);
            }
            return format!("{}{}", value, unit);
        }
    }

    format!("{}B", bytes)
}

/// Format a transfer rate in bytes/second.
pub fn format_rate(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

/// Format a second count as "Ns", "Nm", or "NhMm".
///
/// `None` (unknown ETA) renders as "unknown".
pub fn format_duration(seconds: Option<u64>) -> String {
    let Some(seconds) = seconds else {
        return "unknown".to_string();
    };

    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        format!("{}h{}m", hours, minutes)
    }
}
