//! SHT30 humidity and temperature sensor over I2C.

use crate::crc::crc8;

use embedded_hal::blocking::{
    delay::DelayMs,
    i2c::{Read, Write},
};

#[cfg(feature = "log")]
use log::{info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{info, warn};

/// 7-bit bus address, ADDR pin low.
pub const ADDRESS: u8 = 0x44;

pub mod commands {
    /// Soft reset.
    pub const SOFT_RESET: u16 = 0x30A2;
    /// Stop periodic acquisition.
    pub const BREAK: u16 = 0x3093;
    /// Fetch the last periodic measurement.
    pub const FETCH_DATA: u16 = 0xE000;
}

/// Measurement repeatability.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeatability {
    High,
    Medium,
    Low,
}

/// Periodic acquisition rate, measurements per second.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    HalfHz,
    Hz1,
    Hz2,
    Hz4,
    Hz10,
}

/// Sensor error.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Bus error.
    I2c(E),
    /// Checksum mismatch in the received data.
    Crc,
}

/// One temperature/humidity reading.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Measurement {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity, percent.
    pub humidity: f32,
}

/// A temperature/humidity sensor.
pub trait Hygrometer {
    type Error: core::fmt::Debug;

    fn init(&mut self) -> Result<(), Self::Error>;

    fn measure(&mut self) -> Result<Measurement, Self::Error>;
}

/// Single shot command and its conversion time in ms.
fn single_shot(clock_stretching: bool, repeatability: Repeatability) -> (u16, u32) {
    match (clock_stretching, repeatability) {
        (true, Repeatability::High) => (0x2C06, 15),
        (true, Repeatability::Medium) => (0x2C0D, 6),
        (true, Repeatability::Low) => (0x2C10, 4),
        (false, Repeatability::High) => (0x2400, 15),
        (false, Repeatability::Medium) => (0x240B, 6),
        (false, Repeatability::Low) => (0x2416, 4),
    }
}

fn periodic(repeatability: Repeatability, rate: Rate) -> u16 {
    match (rate, repeatability) {
        (Rate::HalfHz, Repeatability::High) => 0x2032,
        (Rate::HalfHz, Repeatability::Medium) => 0x2024,
        (Rate::HalfHz, Repeatability::Low) => 0x202F,
        (Rate::Hz1, Repeatability::High) => 0x2130,
        (Rate::Hz1, Repeatability::Medium) => 0x2126,
        (Rate::Hz1, Repeatability::Low) => 0x212D,
        (Rate::Hz2, Repeatability::High) => 0x2236,
        (Rate::Hz2, Repeatability::Medium) => 0x2220,
        (Rate::Hz2, Repeatability::Low) => 0x222B,
        (Rate::Hz4, Repeatability::High) => 0x2334,
        (Rate::Hz4, Repeatability::Medium) => 0x2322,
        (Rate::Hz4, Repeatability::Low) => 0x2329,
        (Rate::Hz10, Repeatability::High) => 0x2737,
        (Rate::Hz10, Repeatability::Medium) => 0x2721,
        (Rate::Hz10, Repeatability::Low) => 0x272A,
    }
}

/// Decode two checked words: temperature then humidity.
fn decode<E>(data: &[u8; 6]) -> Result<Measurement, Error<E>> {
    if crc8(&data[0..2]) != data[2] || crc8(&data[3..5]) != data[5] {
        return Err(Error::Crc);
    }

    let raw_temperature = f32::from(u16::from_be_bytes([data[0], data[1]]));
    let raw_humidity = f32::from(u16::from_be_bytes([data[3], data[4]]));

    Ok(Measurement {
        temperature: -45.0 + 175.0 * (raw_temperature / 65535.0),
        humidity: 100.0 * (raw_humidity / 65535.0),
    })
}

/// SHT30 driver.
pub struct Sht30<I2C, D> {
    i2c: I2C,
    delay: D,
    single_shot: u16,
    conversion_ms: u32,
}

impl<I2C, D, E> Sht30<I2C, D>
where
    I2C: Write<Error = E> + Read<Error = E>,
    D: DelayMs<u32>,
{
    pub fn new(i2c: I2C, delay: D, clock_stretching: bool, repeatability: Repeatability) -> Self {
        let (single_shot, conversion_ms) = single_shot(clock_stretching, repeatability);

        Sht30 {
            i2c,
            delay,
            single_shot,
            conversion_ms,
        }
    }

    /// Select the single shot command used by [`Sht30::measure`].
    pub fn configure(&mut self, clock_stretching: bool, repeatability: Repeatability) {
        let (single_shot, conversion_ms) = single_shot(clock_stretching, repeatability);
        self.single_shot = single_shot;
        self.conversion_ms = conversion_ms;
    }

    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    fn command(&mut self, command: u16) -> Result<(), Error<E>> {
        self.i2c
            .write(ADDRESS, &command.to_be_bytes())
            .map_err(Error::I2c)
    }

    fn read_measurement(&mut self) -> Result<Measurement, Error<E>> {
        let mut data = [0; 6];
        self.i2c.read(ADDRESS, &mut data).map_err(Error::I2c)?;

        let measurement = decode(&data);
        if measurement.is_err() {
            warn!("SHT30 checksum mismatch");
        }

        measurement
    }

    pub fn soft_reset(&mut self) -> Result<(), Error<E>> {
        info!("SHT30 soft reset");
        self.command(commands::SOFT_RESET)
    }

    /// Single shot measurement, blocks for the conversion time.
    pub fn measure(&mut self) -> Result<Measurement, Error<E>> {
        self.command(self.single_shot)?;
        self.delay.delay_ms(self.conversion_ms);
        self.read_measurement()
    }

    /// Switch to periodic acquisition, a running one is stopped first.
    pub fn start_periodic(&mut self, repeatability: Repeatability, rate: Rate) -> Result<(), Error<E>> {
        // sensor NACKs the break when idle
        let _ = self.stop_periodic();
        self.command(periodic(repeatability, rate))
    }

    pub fn stop_periodic(&mut self) -> Result<(), Error<E>> {
        self.command(commands::BREAK)
    }

    /// Latest periodic measurement.
    pub fn fetch(&mut self) -> Result<Measurement, Error<E>> {
        self.command(commands::FETCH_DATA)?;
        self.read_measurement()
    }
}

impl<I2C, D, E> Hygrometer for Sht30<I2C, D>
where
    I2C: Write<Error = E> + Read<Error = E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    type Error = Error<E>;

    fn init(&mut self) -> Result<(), Self::Error> {
        self.soft_reset()
    }

    fn measure(&mut self) -> Result<Measurement, Self::Error> {
        Sht30::measure(self)
    }
}
