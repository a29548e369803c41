//! Utility functions for the membership layer

use chrono::Utc;

/// Get current wall-clock timestamp in milliseconds since UNIX epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
