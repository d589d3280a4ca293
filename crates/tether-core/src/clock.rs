// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tick time: the engine's only time dimension.
//!
//! Every value in the core is indexed by a signed 64-bit logical tick.
//! [`TickTime`] adds a sub-tick fraction for presentation-layer interpolation
//! and an optional wall-clock millisecond stamp used only for telemetry; all
//! orderings are lexicographic over `(tick, sub_tick)` and never consult the
//! wall clock. [`TickClock`] is the single legal source of "now".

use core::cmp::Ordering;
use core::fmt;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Logical simulation step counter.
pub type Tick = i64;

/// A point in tick time: integer tick plus sub-tick fraction in `[0, 1)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TickTime {
    /// Integer tick.
    pub tick: Tick,
    /// Fraction of the way through `tick`, clamped to `[0, 1)`.
    pub sub_tick: f32,
    /// Wall-clock milliseconds since the Unix epoch. Telemetry only; never
    /// participates in ordering.
    pub wall_ms: Option<u64>,
}

impl TickTime {
    /// Tick time at the start of `tick`.
    #[must_use]
    pub fn at(tick: Tick) -> Self {
        Self {
            tick,
            sub_tick: 0.0,
            wall_ms: None,
        }
    }

    /// Tick time with an explicit sub-tick fraction (clamped into `[0, 1)`).
    #[must_use]
    pub fn with_sub_tick(tick: Tick, sub_tick: f32) -> Self {
        Self {
            tick,
            sub_tick: clamp_sub_tick(sub_tick),
            wall_ms: None,
        }
    }

    /// Continuous tick value `tick + sub_tick` for interpolation math.
    #[must_use]
    pub fn as_continuous(self) -> f64 {
        self.tick as f64 + f64::from(self.sub_tick)
    }

    /// Lexicographic comparison over `(tick, sub_tick)`.
    #[must_use]
    pub fn cmp_time(self, rhs: Self) -> Ordering {
        self.tick.cmp(&rhs.tick).then_with(|| {
            self.sub_tick
                .partial_cmp(&rhs.sub_tick)
                .unwrap_or(Ordering::Equal)
        })
    }
}

impl PartialEq for TickTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_time(*other) == Ordering::Equal
    }
}

impl PartialOrd for TickTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp_time(*other))
    }
}

impl fmt::Display for TickTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}+{:.3}", self.tick, self.sub_tick)
    }
}

fn clamp_sub_tick(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 0.999_999)
    } else {
        0.0
    }
}

/// Inclusive tick range `[start, end]`. Empty when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickRange {
    /// First tick in the range.
    pub start: Tick,
    /// Last tick in the range (inclusive).
    pub end: Tick,
}

impl TickRange {
    /// Constructs `[start, end]`.
    #[must_use]
    pub fn new(start: Tick, end: Tick) -> Self {
        Self { start, end }
    }

    /// The single-tick range `[tick, tick]`.
    #[must_use]
    pub fn single(tick: Tick) -> Self {
        Self::new(tick, tick)
    }

    /// True when the range contains no ticks.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.start > self.end
    }

    /// Number of ticks covered (0 for empty ranges).
    #[must_use]
    pub fn len(self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start) as u64 + 1
        }
    }

    /// True when `tick` lies within the range.
    #[must_use]
    pub fn contains(self, tick: Tick) -> bool {
        !self.is_empty() && tick >= self.start && tick <= self.end
    }

    /// Intersection with `rhs` (possibly empty).
    #[must_use]
    pub fn intersect(self, rhs: Self) -> Self {
        Self::new(self.start.max(rhs.start), self.end.min(rhs.end))
    }
}

/// Monotonic tick clock driven by the coordinator.
///
/// The tick counter only moves forward through [`TickClock::advance`] (and
/// [`TickClock::set_tick`] for resync). `now` derives a sub-tick fraction from
/// the wall clock elapsed since the last advance, clamped so presentation can
/// never read a fraction outside `[0, 1)`.
#[derive(Debug)]
pub struct TickClock {
    tick: AtomicI64,
    tick_duration: Duration,
    started: Instant,
    last_advance: parking_lot::Mutex<Instant>,
}

impl TickClock {
    /// Creates a clock at tick 0 running at `tick_rate_hz`.
    ///
    /// A zero or non-finite rate falls back to the 20 Hz default.
    #[must_use]
    pub fn new(tick_rate_hz: f64) -> Self {
        let rate = if tick_rate_hz.is_finite() && tick_rate_hz > 0.0 {
            tick_rate_hz
        } else {
            20.0
        };
        let now = Instant::now();
        Self {
            tick: AtomicI64::new(0),
            tick_duration: Duration::from_secs_f64(1.0 / rate),
            started: now,
            last_advance: parking_lot::Mutex::new(now),
        }
    }

    /// Duration of one tick.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// The current integer tick.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick.load(AtomicOrdering::Acquire)
    }

    /// Advances the clock by one tick and returns the new tick.
    pub fn advance(&self) -> Tick {
        *self.last_advance.lock() = Instant::now();
        self.tick.fetch_add(1, AtomicOrdering::AcqRel) + 1
    }

    /// Forces the tick counter (resync after joining an authoritative peer).
    pub fn set_tick(&self, tick: Tick) {
        *self.last_advance.lock() = Instant::now();
        self.tick.store(tick, AtomicOrdering::Release);
    }

    /// The current tick time, with sub-tick fraction and telemetry wall stamp.
    #[must_use]
    pub fn now(&self) -> TickTime {
        let elapsed = self.last_advance.lock().elapsed();
        let fraction = elapsed.as_secs_f32() / self.tick_duration.as_secs_f32();
        TickTime {
            tick: self.tick(),
            sub_tick: clamp_sub_tick(fraction),
            wall_ms: wall_ms_now(),
        }
    }

    /// Expected-minus-current tick, from wall time elapsed since construction.
    ///
    /// Positive drift means the clock is running behind its configured rate.
    #[must_use]
    pub fn tick_drift(&self) -> i64 {
        let expected =
            (self.started.elapsed().as_secs_f64() / self.tick_duration.as_secs_f64()) as i64;
        expected - self.tick()
    }
}

fn wall_ms_now() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotone() {
        let clock = TickClock::new(20.0);
        assert_eq!(clock.tick(), 0);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(clock.tick(), 2);
    }

    #[test]
    fn set_tick_resyncs() {
        let clock = TickClock::new(20.0);
        clock.set_tick(500);
        assert_eq!(clock.tick(), 500);
        assert_eq!(clock.advance(), 501);
    }

    #[test]
    fn now_sub_tick_stays_in_unit_interval() {
        let clock = TickClock::new(1_000_000.0);
        // At a million Hz the elapsed fraction overflows immediately; the
        // clamp keeps presentation time inside the current tick.
        std::thread::sleep(Duration::from_millis(2));
        let now = clock.now();
        assert!(now.sub_tick >= 0.0 && now.sub_tick < 1.0);
    }

    #[test]
    fn tick_time_orders_lexicographically() {
        let a = TickTime::with_sub_tick(3, 0.9);
        let b = TickTime::with_sub_tick(4, 0.1);
        let c = TickTime::with_sub_tick(4, 0.2);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(TickTime::at(4), TickTime::at(4));
    }

    #[test]
    fn empty_range_contains_nothing() {
        let empty = TickRange::new(5, 4);
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
        assert!(!empty.contains(5));

        let r = TickRange::new(2, 4);
        assert_eq!(r.len(), 3);
        assert!(r.contains(2) && r.contains(4));
        assert!(!r.contains(5));
    }

    #[test]
    fn intersect_clips_to_overlap() {
        let a = TickRange::new(0, 10);
        let b = TickRange::new(5, 20);
        assert_eq!(a.intersect(b), TickRange::new(5, 10));
        assert!(a.intersect(TickRange::new(11, 20)).is_empty());
    }
}
