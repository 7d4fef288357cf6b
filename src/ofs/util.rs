//! Small helpers shared across the engine.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the current timestamp since the Unix epoch.
pub fn get_timestamp() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System clock panic!")
}

/// Returns the current timestamp in whole seconds, as stored in on-disk
/// records.
pub fn now_secs() -> u64 {
    get_timestamp().as_secs()
}

/// Performs a division of `a` by `b`, rounding up.
pub fn ceil_division(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_division_rounds_up() {
        assert_eq!(ceil_division(0, 8), 0);
        assert_eq!(ceil_division(1, 8), 1);
        assert_eq!(ceil_division(8, 8), 1);
        assert_eq!(ceil_division(9, 8), 2);
        assert_eq!(ceil_division(4092, 4092), 1);
        assert_eq!(ceil_division(4093, 4092), 2);
    }
}
