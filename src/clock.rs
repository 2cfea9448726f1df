// SPDX-License-Identifier: MIT
//
// The two timestamp conventions carried on the wire: `ft_timestamp` (Windows
// file-time ticks, 100ns units since 1601-01-01 UTC) for cross-machine
// correlation, and `hp_timestamp_us` (a monotonic microsecond clock anchored
// at process start) for same-process ordering when wall-clock resolution
// isn't enough.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

const UNIX_TO_FILETIME_EPOCH_SECS: i64 = 11_644_473_600;

pub fn file_time_now() -> i64 {
    let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = since_epoch.as_secs() as i64 + UNIX_TO_FILETIME_EPOCH_SECS;
    let nanos = since_epoch.subsec_nanos() as i64;
    secs * 10_000_000 + nanos / 100
}

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

/// Monotonic microseconds since process start, nanoseconds rounded to the
/// nearest microsecond via `(ns + 500) / 1000`.
pub fn high_precision_micros_now() -> i64 {
    let nanos = process_start().elapsed().as_nanos() as i64;
    (nanos + 500) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_time_is_after_unix_epoch_in_filetime_units() {
        let ft = file_time_now();
        // 2001-09-09 in filetime ticks, sanity lower bound well before any
        // plausible test run.
        assert!(ft > 126_230_000_000_000_000);
    }

    #[test]
    fn high_precision_clock_is_monotonic() {
        let a = high_precision_micros_now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = high_precision_micros_now();
        assert!(b > a);
    }
}
