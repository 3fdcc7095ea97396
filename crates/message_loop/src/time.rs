// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Monotonic time values used to schedule tasks.
//!
//! Both types are plain nanosecond integers. Arithmetic saturates at the bounds of the
//! representation. [`TimePoint::max()`] means "never" and absorbs any delta applied to it,
//! while arithmetic on any other time point saturates one tick short of it, so no finite
//! deadline turns into the sentinel by accident.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const NANOS_PER_MICRO: i64 = 1_000;
const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// A signed span of time with nanosecond precision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeDelta {
    nanos: i64,
}

impl TimeDelta {
    /// A delta of zero length.
    #[must_use]
    pub const fn zero() -> Self {
        Self { nanos: 0 }
    }

    /// The most negative representable delta.
    #[must_use]
    pub const fn min() -> Self {
        Self { nanos: i64::MIN }
    }

    /// The largest representable delta.
    #[must_use]
    pub const fn max() -> Self {
        Self { nanos: i64::MAX }
    }

    /// Creates a delta from whole nanoseconds.
    #[must_use]
    pub const fn from_nanoseconds(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Creates a delta from whole microseconds, saturating on overflow.
    #[must_use]
    pub const fn from_microseconds(micros: i64) -> Self {
        Self {
            nanos: micros.saturating_mul(NANOS_PER_MICRO),
        }
    }

    /// Creates a delta from whole milliseconds, saturating on overflow.
    #[must_use]
    pub const fn from_milliseconds(millis: i64) -> Self {
        Self {
            nanos: millis.saturating_mul(NANOS_PER_MILLI),
        }
    }

    /// Creates a delta from whole seconds, saturating on overflow.
    #[must_use]
    pub const fn from_seconds(seconds: i64) -> Self {
        Self {
            nanos: seconds.saturating_mul(NANOS_PER_SECOND),
        }
    }

    /// Creates a delta from fractional milliseconds, rounding toward zero.
    ///
    /// Values outside the representable range saturate; NaN becomes zero.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "float to int casts saturate, which is the documented behavior"
    )]
    #[expect(clippy::cast_precision_loss, reason = "nanosecond precision is not expected from floats")]
    pub fn from_milliseconds_f64(millis: f64) -> Self {
        Self {
            nanos: (millis * NANOS_PER_MILLI as f64) as i64,
        }
    }

    /// Creates a delta from fractional seconds, rounding toward zero.
    ///
    /// Values outside the representable range saturate; NaN becomes zero.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "float to int casts saturate, which is the documented behavior"
    )]
    #[expect(clippy::cast_precision_loss, reason = "nanosecond precision is not expected from floats")]
    pub fn from_seconds_f64(seconds: f64) -> Self {
        Self {
            nanos: (seconds * NANOS_PER_SECOND as f64) as i64,
        }
    }

    /// Whole nanoseconds in this delta.
    #[must_use]
    pub const fn to_nanoseconds(self) -> i64 {
        self.nanos
    }

    /// Whole microseconds in this delta, truncated toward zero.
    #[must_use]
    pub const fn to_microseconds(self) -> i64 {
        self.nanos / NANOS_PER_MICRO
    }

    /// Whole milliseconds in this delta, truncated toward zero.
    #[must_use]
    pub const fn to_milliseconds(self) -> i64 {
        self.nanos / NANOS_PER_MILLI
    }

    /// Whole seconds in this delta, truncated toward zero.
    #[must_use]
    pub const fn to_seconds(self) -> i64 {
        self.nanos / NANOS_PER_SECOND
    }

    /// Fractional milliseconds in this delta.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "callers asked for a float")]
    pub fn to_milliseconds_f64(self) -> f64 {
        self.nanos as f64 / NANOS_PER_MILLI as f64
    }

    /// Fractional seconds in this delta.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "callers asked for a float")]
    pub fn to_seconds_f64(self) -> f64 {
        self.nanos as f64 / NANOS_PER_SECOND as f64
    }

    /// Converts to a standard library duration. Negative deltas become [`Duration::ZERO`].
    #[must_use]
    pub fn to_duration(self) -> Duration {
        u64::try_from(self.nanos).map_or(Duration::ZERO, Duration::from_nanos)
    }
}

impl From<Duration> for TimeDelta {
    fn from(value: Duration) -> Self {
        Self {
            nanos: i64::try_from(value.as_nanos()).unwrap_or(i64::MAX),
        }
    }
}

impl Add for TimeDelta {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            nanos: self.nanos.saturating_add(rhs.nanos),
        }
    }
}

impl Sub for TimeDelta {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            nanos: self.nanos.saturating_sub(rhs.nanos),
        }
    }
}

impl Neg for TimeDelta {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            nanos: self.nanos.saturating_neg(),
        }
    }
}

impl AddAssign for TimeDelta {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for TimeDelta {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl fmt::Display for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.to_milliseconds_f64())
    }
}

/// An instant on the process-wide monotonic clock.
///
/// The clock epoch is the first time anything in the process asked for the current time.
/// [`TimePoint::max()`] is the "never" sentinel: a task scheduled for it has the lowest
/// priority, and a wake-up requested for it does nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint {
    ticks: i64,
}

impl TimePoint {
    /// Reads the monotonic clock.
    #[must_use]
    pub fn now() -> Self {
        let epoch = *CLOCK_EPOCH.get_or_init(Instant::now);

        Self {
            ticks: i64::try_from(epoch.elapsed().as_nanos()).unwrap_or(i64::MAX),
        }
    }

    /// The earliest representable time point.
    #[must_use]
    pub const fn min() -> Self {
        Self { ticks: i64::MIN }
    }

    /// The "infinite future" sentinel.
    #[must_use]
    pub const fn max() -> Self {
        Self { ticks: i64::MAX }
    }

    /// Creates a time point that lies `delta` after the clock epoch.
    #[must_use]
    pub const fn from_epoch_delta(delta: TimeDelta) -> Self {
        Self {
            ticks: delta.to_nanoseconds(),
        }
    }

    /// Creates a time point from raw nanosecond ticks since the clock epoch.
    #[must_use]
    pub const fn from_ticks(ticks: i64) -> Self {
        Self { ticks }
    }

    /// Time elapsed between the clock epoch and this time point.
    #[must_use]
    pub const fn to_epoch_delta(self) -> TimeDelta {
        TimeDelta::from_nanoseconds(self.ticks)
    }

    /// Raw nanosecond ticks since the clock epoch.
    #[must_use]
    pub const fn ticks(self) -> i64 {
        self.ticks
    }

    /// Whether this is the [`TimePoint::max()`] sentinel.
    #[must_use]
    pub const fn is_max(self) -> bool {
        self.ticks == i64::MAX
    }

    /// Keeps the sentinel as is and clamps finite results below it.
    const fn clamp_finite(self, nanos: Option<i64>) -> Self {
        if self.is_max() {
            return self;
        }

        match nanos {
            Some(ticks) if ticks < LATEST_FINITE_TICKS => Self { ticks },
            // Only a negative operand can overflow downwards.
            None if self.ticks < 0 => Self::min(),
            _ => Self {
                ticks: LATEST_FINITE_TICKS,
            },
        }
    }
}

const LATEST_FINITE_TICKS: i64 = i64::MAX - 1;

static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

impl Add<TimeDelta> for TimePoint {
    type Output = Self;

    fn add(self, rhs: TimeDelta) -> Self {
        self.clamp_finite(self.ticks.checked_add(rhs.to_nanoseconds()))
    }
}

impl Sub<TimeDelta> for TimePoint {
    type Output = Self;

    fn sub(self, rhs: TimeDelta) -> Self {
        self.clamp_finite(self.ticks.checked_sub(rhs.to_nanoseconds()))
    }
}

impl Sub for TimePoint {
    type Output = TimeDelta;

    fn sub(self, rhs: Self) -> TimeDelta {
        TimeDelta::from_nanoseconds(self.ticks.saturating_sub(rhs.ticks))
    }
}

impl AddAssign<TimeDelta> for TimePoint {
    fn add_assign(&mut self, rhs: TimeDelta) {
        *self = *self + rhs;
    }
}

impl SubAssign<TimeDelta> for TimePoint {
    fn sub_assign(&mut self, rhs: TimeDelta) {
        *self = *self - rhs;
    }
}
