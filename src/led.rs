//! Status LED blink state machine.

use crate::timer::{Tick, Timer};

use switch_hal::OutputSwitch;

/// Burst of blinks: `blinks` pulses of `on_ms` separated by `off_short_ms`,
/// bursts separated by `off_long_ms` when repeating.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    pub on_ms: Tick,
    pub off_short_ms: Tick,
    pub off_long_ms: Tick,
    pub blinks: u8,
}

impl Default for BlinkPattern {
    fn default() -> Self {
        BlinkPattern {
            on_ms: 200,
            off_short_ms: 200,
            off_long_ms: 2000,
            blinks: 2,
        }
    }
}

/// Blink command.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkMode {
    Stop,
    Once,
    Forever,
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedState {
    Off,
    On,
    OffShort,
    OffLong,
}

/// Blinking LED.
pub struct Blinker<Led: OutputSwitch> {
    led: Led,
    pattern: BlinkPattern,
    mode: BlinkMode,
    state: LedState,
    timer: Timer,
    remaining: u8,
}

impl<Led: OutputSwitch> Blinker<Led> {
    /// Takes the LED and switches it off.
    pub fn new(mut led: Led, pattern: BlinkPattern) -> Result<Self, Led::Error> {
        led.off()?;

        Ok(Blinker {
            led,
            pattern,
            mode: BlinkMode::Stop,
            state: LedState::Off,
            timer: Timer::new(pattern.on_ms),
            remaining: pattern.blinks,
        })
    }

    pub fn mode(&self) -> BlinkMode {
        self.mode
    }

    /// Start a burst, or keep bursting with [`BlinkMode::Forever`].
    pub fn start(&mut self, mode: BlinkMode) {
        self.mode = mode;
    }

    /// Stop blinking and switch the LED off.
    pub fn stop(&mut self) -> Result<(), Led::Error> {
        self.mode = BlinkMode::Stop;
        self.state = LedState::Off;
        self.led.off()
    }

    fn switch_on(&mut self, now: Tick) -> Result<(), Led::Error> {
        self.timer.set_duration(self.pattern.on_ms);
        self.timer.restart(now);
        self.state = LedState::On;
        self.led.on()
    }

    fn switch_off(&mut self, now: Tick, duration: Tick, state: LedState) -> Result<(), Led::Error> {
        self.timer.set_duration(duration);
        self.timer.restart(now);
        self.state = state;
        self.led.off()
    }

    /// Drive the LED, call periodically.
    pub fn update(&mut self, now: Tick) -> Result<(), Led::Error> {
        match self.state {
            LedState::Off => {
                if self.mode != BlinkMode::Stop {
                    self.remaining = self.pattern.blinks;
                    self.switch_on(now)?;
                }
            }
            LedState::On => {
                if self.timer.expired(now) {
                    self.remaining = self.remaining.saturating_sub(1);

                    if self.remaining > 0 {
                        self.switch_off(now, self.pattern.off_short_ms, LedState::OffShort)?;
                    } else if self.mode == BlinkMode::Forever {
                        self.remaining = self.pattern.blinks;
                        self.switch_off(now, self.pattern.off_long_ms, LedState::OffLong)?;
                    } else {
                        self.mode = BlinkMode::Stop;
                        self.state = LedState::Off;
                        self.led.off()?;
                    }
                }
            }
            LedState::OffShort | LedState::OffLong => {
                if self.timer.expired(now) {
                    self.switch_on(now)?;
                }
            }
        }

        Ok(())
    }

    pub fn release(self) -> Led {
        self.led
    }
}
