use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
    time::{Duration, Instant},
};

fn shorten(value: &str, head: usize, tail: usize) -> String {
    if value.len() <= head + tail {
        return value.to_string();
    }
    format!("{}..{}", &value[..head], &value[value.len() - tail..])
}

/// Chunk hashes are 96 hex characters; keep log lines readable.
pub fn redact_hex(value: &str) -> String {
    shorten(value, 8, 8)
}

/// Interval gate for repeated warnings. Returns true when the caller should
/// emit the warning, at most once per `interval` per key.
pub fn warn_throttled(key: &'static str, interval: Duration) -> bool {
    static LAST_WARN: OnceLock<Mutex<HashMap<&'static str, Instant>>> = OnceLock::new();
    let map = LAST_WARN.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let now = Instant::now();
    match guard.get_mut(key) {
        Some(last) if now.saturating_duration_since(*last) < interval => false,
        Some(last) => {
            *last = now;
            true
        }
        None => {
            guard.insert(key, now);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_hex_shortens_long_values() {
        let value = "0123456789abcdef0123456789abcdef";
        assert_eq!(redact_hex(value), "01234567..89abcdef");
        assert_eq!(redact_hex("abcdef"), "abcdef");
    }

    #[test]
    fn warn_throttled_suppresses_within_interval() {
        assert!(warn_throttled("test-throttle-a", Duration::from_secs(3600)));
        assert!(!warn_throttled("test-throttle-a", Duration::from_secs(3600)));
    }

    #[test]
    fn warn_throttled_with_zero_interval_always_fires() {
        assert!(warn_throttled("test-throttle-b", Duration::ZERO));
        assert!(warn_throttled("test-throttle-b", Duration::ZERO));
    }
}
