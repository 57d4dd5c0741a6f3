// src/time.rs
//! Frame timing for the render loop
//!
//! Tracks per-frame delta time, accumulates fixed simulation steps and
//! enforces the frame rate cap by sleeping out the remainder of the budget.

use std::time::{Duration, Instant};

pub struct FrameTimer {
    last_frame: Instant,
    frame_budget: Duration,
    fixed_step: Duration,
    accumulator: Duration,
    /// Upper bound on fixed steps consumed per frame, so a long stall does
    /// not turn into a catch-up spiral.
    max_steps_per_frame: u32,
}

impl FrameTimer {
    pub fn new(frame_cap_hz: u32, fixed_timestep_hz: u32) -> Self {
        Self {
            last_frame: Instant::now(),
            frame_budget: Duration::from_secs(1) / frame_cap_hz.max(1),
            fixed_step: Duration::from_secs(1) / fixed_timestep_hz.max(1),
            accumulator: Duration::ZERO,
            max_steps_per_frame: 5,
        }
    }

    /// Advances the clock and returns the variable delta for this frame.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now - self.last_frame;
        self.last_frame = now;
        self.accumulator += delta;
        delta.as_secs_f32()
    }

    /// Drains one fixed step from the accumulator, if a full step is banked.
    /// Call in a loop after `tick` until it returns `None`.
    pub fn fixed_step(&mut self) -> Option<f32> {
        if self.accumulator >= self.fixed_step {
            self.accumulator -= self.fixed_step;
            Some(self.fixed_step.as_secs_f32())
        } else {
            None
        }
    }

    pub fn max_steps_per_frame(&self) -> u32 {
        self.max_steps_per_frame
    }

    /// Sleeps out whatever is left of this frame's budget.
    pub fn wait_for_next_frame(&self) {
        let spent = self.last_frame.elapsed();
        if spent < self.frame_budget {
            std::thread::sleep(self.frame_budget - spent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_step_drains_accumulator() {
        let mut timer = FrameTimer::new(144, 60);
        timer.accumulator = Duration::from_millis(50);

        let mut steps = 0;
        while timer.fixed_step().is_some() {
            steps += 1;
        }

        // 50 ms at a 60 Hz step holds exactly three 16.6 ms steps
        assert_eq!(steps, 3);
        assert!(timer.accumulator < timer.fixed_step);
    }

    #[test]
    fn test_zero_rates_clamped() {
        let timer = FrameTimer::new(0, 0);
        assert_eq!(timer.frame_budget, Duration::from_secs(1));
        assert_eq!(timer.fixed_step, Duration::from_secs(1));
    }
}
