//! Button debounce state machine with short/long press classification.

use crate::timer::{Tick, Timer};

use switch_hal::InputSwitch;

#[cfg(feature = "log")]
use log::trace;

#[cfg(feature = "defmt-log")]
use defmt::trace;

/// Debounce delay, ms.
pub const DEBOUNCE_MS: Tick = 40;
/// Hold time that turns a press into a long press, ms.
pub const LONG_PRESS_MS: Tick = 3000;

/// Press classified on release.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPress {
    NoPress,
    Single,
    Long,
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButtonState {
    Up,
    Falling,
    Down,
    HeldLong,
    Rising,
}

/// Debounced button.
pub struct Debouncer<Btn: InputSwitch> {
    button: Btn,
    state: ButtonState,
    debounce: Timer,
    hold: Timer,
    long_pressed: bool,
    key: KeyPress,
}

impl<Btn: InputSwitch> Debouncer<Btn> {
    pub fn new(button: Btn) -> Self {
        Debouncer {
            button,
            state: ButtonState::Up,
            debounce: Timer::new(DEBOUNCE_MS),
            hold: Timer::new(LONG_PRESS_MS),
            long_pressed: false,
            key: KeyPress::NoPress,
        }
    }

    fn set_state(&mut self, state: ButtonState) {
        trace!("button {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn released(&mut self) {
        if self.long_pressed {
            self.key = KeyPress::Long;
        } else if self.key != KeyPress::Long {
            self.key = KeyPress::Single;
        }

        self.long_pressed = false;
    }

    /// Sample the button, call periodically.
    pub fn update(&mut self, now: Tick) -> Result<(), Btn::Error> {
        let pressed = self.button.is_active()?;

        match self.state {
            ButtonState::Up => {
                if pressed {
                    self.debounce.restart(now);
                    self.set_state(ButtonState::Falling);
                }
            }
            ButtonState::Falling => {
                if self.debounce.expired(now) {
                    if pressed {
                        self.hold.restart(now);
                        self.set_state(ButtonState::Down);
                    } else {
                        self.set_state(ButtonState::Up);
                    }
                }
            }
            ButtonState::Down => {
                if !pressed {
                    self.debounce.restart(now);
                    self.set_state(ButtonState::Rising);
                } else if self.hold.expired(now) {
                    self.set_state(ButtonState::HeldLong);
                }
            }
            ButtonState::HeldLong => {
                if !pressed {
                    self.long_pressed = true;
                    self.debounce.restart(now);
                    self.set_state(ButtonState::Rising);
                }
            }
            ButtonState::Rising => {
                if self.debounce.expired(now) {
                    if !pressed {
                        self.released();
                        self.set_state(ButtonState::Up);
                    } else if self.long_pressed {
                        self.set_state(ButtonState::HeldLong);
                    } else {
                        self.set_state(ButtonState::Down);
                    }
                }
            }
        }

        Ok(())
    }

    /// Latched press, cleared by the read.
    pub fn read_key(&mut self) -> KeyPress {
        core::mem::replace(&mut self.key, KeyPress::NoPress)
    }

    pub fn release(self) -> Btn {
        self.button
    }
}
