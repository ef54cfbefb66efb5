use std::time::Duration;
use std::time::Instant;

/// Timing snapshot handed to the update callback.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StepTime {
    /// Seconds simulated by this update.
    pub elapsed_seconds: f32,
    pub total: Duration,
    /// Updates run so far, including this one.
    pub frame_count: u64,
}

/// Drives update callbacks in either variable or fixed time steps.
///
/// Deltas are clamped to `max_delta` so a debugger pause does not turn into
/// thousands of catch-up updates.
#[derive(Debug, Clone)]
pub struct StepTimer {
    last: Instant,
    max_delta: Duration,
    fixed_step: Option<Duration>,
    leftover: Duration,
    total: Duration,
    elapsed: Duration,
    frame_count: u64,
    frames_this_second: u32,
    second_counter: Duration,
    frames_per_second: u32,
}

impl StepTimer {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            last: now,
            max_delta: Duration::from_millis(100),
            fixed_step: None,
            leftover: Duration::ZERO,
            total: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame_count: 0,
            frames_this_second: 0,
            second_counter: Duration::ZERO,
            frames_per_second: 0,
        }
    }

    /// `Some(step)` switches to fixed time steps, e.g. 1/60 s.
    pub fn set_fixed_time_step(&mut self, step: Option<Duration>) {
        self.fixed_step = step.filter(|step| !step.is_zero());
    }

    pub fn set_max_delta(&mut self, max_delta: Duration) {
        self.max_delta = max_delta;
    }

    /// Number of updates run so far. Nothing should be drawn while this is zero.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frames_per_second(&self) -> u32 {
        self.frames_per_second
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    /// Forgets time accumulated since the last tick, for use after an
    /// intentional stall such as a blocking load.
    pub fn reset_elapsed(&mut self) {
        self.last = Instant::now();
        self.leftover = Duration::ZERO;
        self.frames_this_second = 0;
        self.second_counter = Duration::ZERO;
        self.frames_per_second = 0;
    }

    pub fn tick(&mut self, update: impl FnMut(StepTime)) {
        self.tick_at(Instant::now(), update);
    }

    pub fn tick_at(&mut self, now: Instant, mut update: impl FnMut(StepTime)) {
        let delta = now.saturating_duration_since(self.last).min(self.max_delta);
        self.last = now;
        self.second_counter += delta;

        let last_frame_count = self.frame_count;
        match self.fixed_step {
            Some(step) => {
                // snap deltas within a quarter millisecond of the step to it,
                // so vsync jitter does not accumulate
                let mut delta = delta;
                if delta.abs_diff(step) < Duration::from_micros(250) {
                    delta = step;
                }
                self.leftover += delta;
                while self.leftover >= step {
                    self.elapsed = step;
                    self.total += step;
                    self.leftover -= step;
                    self.frame_count += 1;
                    update(self.snapshot());
                }
            }
            None => {
                self.elapsed = delta;
                self.total += delta;
                self.leftover = Duration::ZERO;
                self.frame_count += 1;
                update(self.snapshot());
            }
        }

        if self.frame_count != last_frame_count {
            self.frames_this_second += 1;
        }
        if self.second_counter >= Duration::from_secs(1) {
            self.frames_per_second = self.frames_this_second;
            self.frames_this_second = 0;
            self.second_counter = self.second_counter.saturating_sub(Duration::from_secs(1));
        }
    }

    fn snapshot(&self) -> StepTime {
        StepTime {
            elapsed_seconds: self.elapsed.as_secs_f32(),
            total: self.total,
            frame_count: self.frame_count,
        }
    }
}

impl Default for StepTimer {
    fn default() -> Self {
        Self::new()
    }
}
