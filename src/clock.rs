//! Host clock source.
//!
//! All event timestamps are expressed on the boot clock so they line up
//! with the rest of the system trace. `CLOCK_BOOTTIME` keeps counting
//! across suspend, which `CLOCK_MONOTONIC` does not.

#[cfg(any(target_os = "linux", target_os = "android"))]
const CLOCK_ID: libc::clockid_t = libc::CLOCK_BOOTTIME;

// No boot clock outside Linux; the monotonic clock is the closest thing.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const CLOCK_ID: libc::clockid_t = libc::CLOCK_MONOTONIC;

/// Current host time in nanoseconds on the boot clock.
pub fn boottime_ns() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // clock_gettime only fails for an invalid clock id.
    unsafe {
        libc::clock_gettime(CLOCK_ID, &mut ts);
    }
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}
