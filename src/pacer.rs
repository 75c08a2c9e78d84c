//! Real time pacing. The host tells the pacer how much wall clock time went by, and the pacer tells the host how many
//! frames to emulate to keep up. Time that can't be caught up on (the host was suspended, a debugger was attached)
//! is dropped rather than replayed as a burst of frames.

use std::time::Duration;

/// The GBA refresh rate: 16.78MHz / 280896 cycles per frame.
pub const FRAME_RATE: f64 = 59.73;

const MIN_SPEED: f64 = 0.1;
const MAX_BACKLOG: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct FramePacer {
    speed: f64,
    backlog: Duration,
}

impl Default for FramePacer {
    fn default() -> FramePacer {
        FramePacer::new(1.0)
    }
}

impl FramePacer {
    pub fn new(speed: f64) -> FramePacer {
        let mut pacer = FramePacer {
            speed: 1.0,
            backlog: Duration::default(),
        };
        pacer.set_speed(speed);
        pacer
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Sets the emulation speed multiplier. Anything below 0.1x (including NaN) is treated as 0.1x.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = if speed >= MIN_SPEED { speed } else { MIN_SPEED };
    }

    /// Wall clock time one emulated frame takes at the current speed.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / (FRAME_RATE * self.speed))
    }

    /// Accounts for `elapsed` wall clock time and returns how many frames are now due.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        let max_backlog = MAX_BACKLOG.mul_f64(self.speed.max(1.0));
        self.backlog = (self.backlog + elapsed).min(max_backlog);

        let frame = self.frame_duration();
        let mut frames = 0;
        while self.backlog >= frame {
            self.backlog -= frame;
            frames += 1;
        }
        frames
    }

    /// How long the host can sleep before the next frame is due.
    pub fn until_next_frame(&self) -> Duration {
        self.frame_duration().checked_sub(self.backlog).unwrap_or_default()
    }
}
