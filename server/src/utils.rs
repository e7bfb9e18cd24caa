use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Trim a user supplied label; None when empty or longer than `max_chars`
pub fn normalize_label(raw: &str, max_chars: usize) -> Option<String> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > max_chars {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_after_2020() {
        assert!(get_timestamp() > 1_577_836_800_000);
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Barn ", 8), Some("Barn".to_string()));
        assert_eq!(normalize_label("   ", 8), None);
        assert_eq!(normalize_label("", 8), None);
        assert_eq!(normalize_label("abcdefghi", 8), None);
        assert_eq!(normalize_label("zażółć", 6), Some("zażółć".to_string()));
    }
}
