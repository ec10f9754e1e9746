//! Duration parsing shared by the config blocks.

use std::time::Duration;

/// Parse a human readable duration (e.g. `15s`, `100ms`) that must be greater than zero.
///
/// Every duration flag feeds a timer or a sleep, and tokio panics on a zero timer period.
pub fn parse_nonzero_duration(s: &str) -> Result<Duration, String> {
    let d = humantime::parse_duration(s).map_err(|e| e.to_string())?;
    if d.is_zero() {
        return Err(format!("duration must be greater than zero, got '{s}'"));
    }
    Ok(d)
}
