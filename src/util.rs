// =============================================================================
// Shared utilities
// =============================================================================

use std::time::Instant;

/// Convert a JSON-ish numeric value to `f64`, mapping NaN/infinite/unparseable
/// inputs to `0.0` instead of propagating an error.
///
/// Upstream payloads occasionally carry `"NaN"` or empty strings where a
/// price or size is expected; every call site in this crate would otherwise
/// need its own guard.
pub fn safe_float(val: &serde_json::Value) -> f64 {
    let f = match val {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if f.is_nan() || f.is_infinite() {
        0.0
    } else {
        f
    }
}

/// Same conversion for an already-typed `&str`.
pub fn safe_float_str(val: &str) -> f64 {
    let f = val.trim().parse::<f64>().unwrap_or(0.0);
    if f.is_nan() || f.is_infinite() {
        0.0
    } else {
        f
    }
}

/// Unix epoch seconds as a float, matching Python's `time.time()` used
/// throughout the upstream schema (`first_seen`, `updated_at`, `detected_at`, ...).
pub fn unix_time() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Unix epoch milliseconds, used by the trade stream and order-flow buffers.
pub fn unix_time_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A monotonic clock handle for rate-limiter-style refill math, mirroring
/// Python's `time.monotonic()` (not affected by wall-clock adjustments).
pub fn monotonic() -> Instant {
    Instant::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn safe_float_parses_numbers_and_strings() {
        assert_eq!(safe_float(&json!(1.5)), 1.5);
        assert_eq!(safe_float(&json!("2.25")), 2.25);
    }

    #[test]
    fn safe_float_rejects_nan_and_garbage() {
        assert_eq!(safe_float(&json!("not-a-number")), 0.0);
        assert_eq!(safe_float(&json!(null)), 0.0);
        assert_eq!(safe_float_str("inf"), 0.0);
        assert_eq!(safe_float_str(""), 0.0);
    }

    #[test]
    fn unix_time_is_plausible() {
        let t = unix_time();
        assert!(t > 1_700_000_000.0);
    }
}
