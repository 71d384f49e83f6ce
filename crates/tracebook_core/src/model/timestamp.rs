//! Formatted wall-clock timestamps for `createDate` / `updateDate`.

use chrono::Local;

/// Persisted timestamp layout, e.g. `10/18/26 14:03:59`.
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%y %H:%M:%S";

/// Returns the current local time formatted with [`TIMESTAMP_FORMAT`].
pub fn current_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}
