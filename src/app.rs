//! Measurement loop: sample the sensor, keep running statistics on the card,
//! report over the console.

use crate::{
    button::{Debouncer, KeyPress},
    consts::{tokens, Block, BLOCK_SIZE},
    led::{BlinkMode, Blinker},
    sht30::{Hygrometer, Measurement},
    storage::BlockStorage,
    timer::{Tick, Timer},
};

use core::fmt::Write;
use switch_hal::{InputSwitch, OutputSwitch};

#[cfg(feature = "log")]
use log::{info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{info, warn};

/// Sampling period, ms.
pub const MEASURE_PERIOD_MS: Tick = 5000;
/// Card block holding the statistics record.
pub const RECORD_BLOCK: u32 = 0;

const RECORD_LEN: usize = 12;

/// Running sums of the samples taken so far.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Statistics {
    pub sum_temperature: f32,
    pub sum_humidity: f32,
    pub count: u32,
}

impl Statistics {
    pub fn add(&mut self, measurement: &Measurement) {
        self.sum_temperature += measurement.temperature;
        self.sum_humidity += measurement.humidity;
        self.count = self.count.saturating_add(1);
    }

    /// Mean values, `None` without samples.
    pub fn averages(&self) -> Option<Measurement> {
        if self.count == 0 {
            return None;
        }

        let count = self.count as f32;
        Some(Measurement {
            temperature: self.sum_temperature / count,
            humidity: self.sum_humidity / count,
        })
    }

    /// Record layout: the two sums then the count, little-endian, padded
    /// with the erased pattern.
    pub fn encode(&self) -> Block {
        let mut block = [tokens::ERASED; BLOCK_SIZE];
        block[0..4].copy_from_slice(&self.sum_temperature.to_le_bytes());
        block[4..8].copy_from_slice(&self.sum_humidity.to_le_bytes());
        block[8..RECORD_LEN].copy_from_slice(&self.count.to_le_bytes());
        block
    }

    /// An erased block decodes as no samples.
    pub fn decode(block: &Block) -> Self {
        let word = |at: usize| [block[at], block[at + 1], block[at + 2], block[at + 3]];

        let count = u32::from_le_bytes(word(8));
        if count == u32::MAX {
            return Statistics::default();
        }

        Statistics {
            sum_temperature: f32::from_le_bytes(word(0)),
            sum_humidity: f32::from_le_bytes(word(4)),
            count,
        }
    }
}

/// Measurement loop state.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerState {
    Idle,
    ShowData,
    ResetData,
}

/// Pin failure while driving the user interface.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<L, B> {
    Led(L),
    Button(B),
}

/// The node's main loop.
pub struct SensorLogger<S, H, Led, Btn, W>
where
    S: BlockStorage,
    H: Hygrometer,
    Led: OutputSwitch,
    Btn: InputSwitch,
    W: Write,
{
    storage: S,
    sensor: H,
    led: Blinker<Led>,
    button: Debouncer<Btn>,
    console: W,
    statistics: Statistics,
    state: LoggerState,
    measure: Timer,
}

impl<S, H, Led, Btn, W> SensorLogger<S, H, Led, Btn, W>
where
    S: BlockStorage,
    H: Hygrometer,
    Led: OutputSwitch,
    Btn: InputSwitch,
    W: Write,
{
    pub fn new(storage: S, sensor: H, led: Blinker<Led>, button: Debouncer<Btn>, console: W) -> Self {
        SensorLogger {
            storage,
            sensor,
            led,
            button,
            console,
            statistics: Statistics::default(),
            state: LoggerState::Idle,
            measure: Timer::new(MEASURE_PERIOD_MS),
        }
    }

    pub fn state(&self) -> LoggerState {
        self.state
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn console(&self) -> &W {
        &self.console
    }

    pub fn release(self) -> (S, H, Blinker<Led>, Debouncer<Btn>, W) {
        (self.storage, self.sensor, self.led, self.button, self.console)
    }

    /// Bring up the sensor and the card, restore the saved statistics.
    ///
    /// Failures are reported and leave the loop running with empty
    /// statistics.
    pub fn start(&mut self, now: Tick) {
        if let Err(e) = self.sensor.init() {
            warn!("Sensor init failed");
            let _ = writeln!(self.console, "sensor init error: {:?}", e);
        }

        match self.storage.init() {
            Ok(()) => self.restore(),
            Err(e) => {
                warn!("Storage init failed");
                let _ = writeln!(self.console, "storage init error: {:?}", e);
            }
        }

        self.state = LoggerState::Idle;
        self.measure.restart(now);
    }

    fn restore(&mut self) {
        let mut block = [0; BLOCK_SIZE];

        match self.storage.read(RECORD_BLOCK, &mut block) {
            Ok(()) => {
                self.statistics = Statistics::decode(&block);
                info!("Restored {} samples", self.statistics.count);
                let _ = writeln!(self.console, "restored {} samples", self.statistics.count);
            }
            Err(e) => {
                warn!("Statistics restore failed");
                let _ = writeln!(self.console, "storage read error: {:?}", e);
            }
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.storage.write(RECORD_BLOCK, &self.statistics.encode()) {
            warn!("Statistics write failed");
            let _ = writeln!(self.console, "storage write error: {:?}", e);
        }
    }

    fn sample(&mut self) {
        self.led.start(BlinkMode::Once);

        match self.sensor.measure() {
            Ok(m) => {
                let _ = writeln!(
                    self.console,
                    "T: {:.2} C, RH: {:.2} %",
                    m.temperature, m.humidity
                );
                self.statistics.add(&m);
                self.persist();
            }
            Err(e) => {
                warn!("Measurement failed");
                let _ = writeln!(self.console, "sensor error: {:?}", e);
            }
        }
    }

    fn show(&mut self) {
        match self.statistics.averages() {
            Some(avg) => {
                let _ = writeln!(
                    self.console,
                    "average of {} samples: T: {:.2} C, RH: {:.2} %",
                    self.statistics.count, avg.temperature, avg.humidity
                );
            }
            None => {
                let _ = writeln!(self.console, "no samples");
            }
        }
    }

    fn reset(&mut self, now: Tick) {
        info!("Statistics reset");
        self.statistics = Statistics::default();

        if let Err(e) = self.storage.erase(RECORD_BLOCK) {
            warn!("Statistics erase failed");
            let _ = writeln!(self.console, "storage erase error: {:?}", e);
        } else {
            let _ = writeln!(self.console, "statistics cleared");
        }

        self.measure.restart(now);
    }

    /// One loop iteration, call periodically.
    pub fn poll(&mut self, now: Tick) -> Result<(), Error<Led::Error, Btn::Error>> {
        self.led.update(now).map_err(Error::Led)?;
        self.button.update(now).map_err(Error::Button)?;

        self.state = match self.state {
            LoggerState::Idle => {
                if self.measure.expired(now) {
                    self.measure.restart(now);
                    self.sample();
                }

                match self.button.read_key() {
                    KeyPress::NoPress => LoggerState::Idle,
                    KeyPress::Single => LoggerState::ShowData,
                    KeyPress::Long => LoggerState::ResetData,
                }
            }
            LoggerState::ShowData => {
                self.show();
                LoggerState::Idle
            }
            LoggerState::ResetData => {
                self.reset(now);
                LoggerState::Idle
            }
        };

        Ok(())
    }
}
