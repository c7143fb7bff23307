//! Upload names derived from the local wall-clock time.
//!
//! The base name has second resolution (`YYYY-MM-DD_HH_MM_SS`), so two
//! uploads within the same second would collide. [`UploadNamer`] appends a
//! short random suffix by default to keep names distinct.

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use rand::Rng;

/// A source of local wall-clock time.
pub trait WallClock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Reads the system clock in the server's local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl WallClock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Formats `at` as `YYYY-MM-DD_HH_MM_SS`.
///
/// Every component except the year is zero-padded to two digits.
pub fn timestamp_name(at: &NaiveDateTime) -> String {
    format!(
        "{}-{:02}-{:02}_{:02}_{:02}_{:02}",
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Produces names for uploaded files.
#[derive(Debug, Clone)]
pub struct UploadNamer<K = LocalClock> {
    clock: K,
    suffix: bool,
}

impl UploadNamer<LocalClock> {
    pub fn new(suffix: bool) -> Self {
        Self::with_clock(LocalClock, suffix)
    }
}

impl<K: WallClock> UploadNamer<K> {
    pub fn with_clock(clock: K, suffix: bool) -> Self {
        Self { clock, suffix }
    }

    /// Returns the name for an upload happening now.
    ///
    /// With the suffix enabled the name is the timestamp followed by `_` and
    /// eight lowercase hex digits.
    pub fn next_name(&self) -> String {
        let base = timestamp_name(&self.clock.now());
        if self.suffix {
            let tag: u32 = rand::rng().random();
            format!("{base}_{tag:08x}")
        } else {
            base
        }
    }
}
