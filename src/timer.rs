//! Non-blocking software timer over a millisecond tick.

/// Millisecond tick, wraps around.
pub type Tick = u32;

/// Polled timer.
///
/// The first [`Timer::expired`] call on a stopped timer arms it, later calls
/// report `true` once the duration elapsed and stop the timer again.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    start: Tick,
    duration: Tick,
    running: bool,
}

impl Timer {
    pub const fn new(duration: Tick) -> Self {
        Timer {
            start: 0,
            duration,
            running: false,
        }
    }

    pub fn duration(&self) -> Tick {
        self.duration
    }

    /// Takes effect for the running period too.
    pub fn set_duration(&mut self, duration: Tick) {
        self.duration = duration;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Arm the timer at `now`, whatever its state.
    pub fn restart(&mut self, now: Tick) {
        self.start = now;
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn expired(&mut self, now: Tick) -> bool {
        if !self.running {
            self.restart(now);
            return false;
        }

        let done = now.wrapping_sub(self.start) >= self.duration;
        self.running = !done;

        done
    }
}
