//! # Server Tick Clock
//!
//! Fixed-timestep schedule at [`SERVER_TICK_SPEED`] ticks per second.
//!
//! ## Design
//!
//! Tick `n` starts at `game_start + n * tick_duration`. The loop advances while
//! the clock has passed the start of the next tick, so a slow iteration is
//! followed by catch-up ticks instead of drift.

use crate::SERVER_TICK_SPEED;
use std::time::{Duration, Instant};

/// Tick counter value that forces a map reload before it can overflow.
pub const TICK_RELOAD_THRESHOLD: i32 = 0x6FFF_FFFF;

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickStats {
    /// Minimum tick duration observed.
    pub min_tick_us: u64,
    /// Maximum tick duration observed.
    pub max_tick_us: u64,
    /// Average tick duration (rolling).
    pub avg_tick_us: u64,
    /// Number of late ticks (took longer than budget).
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn new(tick_duration: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: duration_us(tick_duration),
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Game tick schedule.
#[derive(Clone, Debug)]
pub struct TickClock {
    tick_duration: Duration,
    game_start: Instant,
    tick: i32,
    stats: TickStats,
}

impl TickClock {
    /// Creates a schedule with tick 0 starting at `start`.
    #[must_use]
    pub fn new(tick_rate: u32, start: Instant) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            tick_duration,
            game_start: start,
            tick: 0,
            stats: TickStats::new(tick_duration),
        }
    }

    /// Creates a schedule at [`SERVER_TICK_SPEED`].
    #[must_use]
    pub fn server(start: Instant) -> Self {
        Self::new(SERVER_TICK_SPEED, start)
    }

    /// Current tick.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> i32 {
        self.tick
    }

    /// Target tick duration.
    #[inline]
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Scheduled start of `tick`.
    #[must_use]
    pub fn tick_start(&self, tick: i32) -> Instant {
        let ticks = u32::try_from(tick.max(0)).unwrap_or(0);
        self.game_start + self.tick_duration * ticks
    }

    /// True when `now` has passed the start of the next tick.
    #[must_use]
    pub fn next_tick_due(&self, now: Instant) -> bool {
        now > self.tick_start(self.tick + 1)
    }

    /// Advances to the next tick and returns it.
    pub fn advance(&mut self) -> i32 {
        self.tick += 1;
        self.tick
    }

    /// Restarts the schedule at tick 0.
    pub fn restart(&mut self, now: Instant) {
        self.game_start = now;
        self.tick = 0;
    }

    /// True once the counter is close enough to overflow to force a reload.
    #[must_use]
    pub const fn needs_wrap(&self) -> bool {
        self.tick >= TICK_RELOAD_THRESHOLD
    }

    /// Time left until the next tick starts.
    #[must_use]
    pub fn until_next_tick(&self, now: Instant) -> Duration {
        self.tick_start(self.tick + 1).saturating_duration_since(now)
    }

    /// Signed milliseconds from `now` until `tick` starts.
    #[must_use]
    pub fn ms_until(&self, tick: i32, now: Instant) -> i32 {
        let start = self.tick_start(tick);
        let ms = if start >= now {
            i64::try_from(start.duration_since(now).as_millis()).unwrap_or(i64::MAX)
        } else {
            -i64::try_from(now.duration_since(start).as_millis()).unwrap_or(i64::MAX)
        };
        i32::try_from(ms).unwrap_or(if ms < 0 { i32::MIN } else { i32::MAX })
    }

    /// Records how long one tick took to process.
    pub fn record(&mut self, took: Duration) {
        let us = duration_us(took);
        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(us);

        // Rolling average
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + us) / 16;

        if took > self.tick_duration {
            self.stats.late_ticks += 1;
        }
    }

    /// Returns tick statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }
}
