use chrono::{DateTime, Utc};

/// Human-readable age of a timestamp relative to `now`:
/// "just now", "5m ago", "2h ago", "3d ago".
pub fn age_display(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - updated_at).num_minutes();
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        // Round up: 1h 30m+ becomes 2h
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
