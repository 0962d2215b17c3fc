//! Firmware logic of a sensor logging node, written in Embedded Rust.
//!
//! The heart of the crate is [`SdMmcSpi`], an SD/MMC block storage driver
//! talking to the card over SPI: card handshake, command framing, single
//! block read, write and erase. Around it live the node's collaborators:
//! the [`Sht30`] humidity/temperature sensor, the button [`Debouncer`], the
//! LED [`Blinker`] and the [`SensorLogger`] measurement loop that persists
//! running statistics to the card.
//!
//! ## Features
//!
//! * `log` (default): log through the `log` facade.
//! * `defmt-log`: turn off the default features and enable this one to log
//! over defmt instead.

#![cfg_attr(not(test), no_std)]


mod block;
mod command;
mod config;
mod consts;
mod crc;
mod response;
mod state;

pub mod app;
pub mod button;
pub mod led;
pub mod sht30;
pub mod storage;
pub mod timer;

pub use crate::app::{LoggerState, SensorLogger, Statistics};
pub use crate::button::{Debouncer, KeyPress};
pub use crate::config::{DefaultSdMmcSpiConfig, SdMmcSpiConfig};
pub use crate::consts::{Block, BLOCK_SIZE};
pub use crate::led::{BlinkMode, BlinkPattern, Blinker};
pub use crate::response::R1Response;
pub use crate::sht30::{Hygrometer, Measurement, Sht30};
pub use crate::state::CardState;
pub use crate::storage::BlockStorage;
pub use crate::timer::{Tick, Timer};
pub use diskio::{
    BlockSize, DiskioDevice, Error as DiskioError, IoctlCmd, Lba, Status, StatusFlag,
};

use crate::consts::tokens;

use core::{
    cell::{Cell, RefCell},
    marker::PhantomData,
};
use embedded_hal::blocking::{delay::DelayMs, spi::Transfer};
use switch_hal::OutputSwitch;

#[cfg(feature = "log")]
use log::{error, info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{error, info, warn};

/// [`SdMmcSpi`] result error.
///
/// `T` - transport error type.
/// `S` - select switch type.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<T, S> {
    /// Error from the SPI peripheral.
    Transport(T),
    /// Couldn't set a select.
    SelectError(S),
    /// No card answered go idle.
    CardNotFound,
    /// Card rejected SEND_IF_COND with this R1, it predates SD 2.0.
    UnsupportedCard(u8),
    /// Card echoed a different check pattern.
    EchoMismatch(u16),
    /// No ready response when executing this command.
    TimeoutCommand(u8),
    /// No start token when reading data from the card.
    TimeoutReadBuffer,
    /// Card stayed busy for the whole configured budget.
    TimeoutWaitNotBusy,
    /// Card rejected this command.
    ErrorCommand(u8),
    /// Card rejected the written data with this token.
    WriteError(u8),
    /// Can't perform this operation with the card in this state.
    BadState,
}

impl<T, S> Error<T, S> {
    /// Bounded retry budget exhausted.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::TimeoutCommand(_) | Error::TimeoutReadBuffer | Error::TimeoutWaitNotBusy
        )
    }
}

/// Error type alias.
type ErrorFor<T> = <T as DiskioDevice>::HardwareError;

/// SD Card SPI driver.
///
/// `Spi` - SPI.
/// `Cs` - Chip select output switch.
/// `Delay` - Millisecond delay.
/// `Config` - Config implementation of driver config trait.
pub struct SdMmcSpi<Spi, Cs, Delay, Config = DefaultSdMmcSpiConfig>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Delay: DelayMs<u32>,
    Config: SdMmcSpiConfig,
{
    spi: RefCell<Spi>,
    cs: RefCell<Cs>,
    delay: RefCell<Delay>,
    status: Status,
    state: Cell<CardState>,
    config: PhantomData<Config>,
}

impl<Spi, Cs, Delay, Config> SdMmcSpi<Spi, Cs, Delay, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Delay: DelayMs<u32>,
    Config: SdMmcSpiConfig,
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Creates a new [`SdMmcSpi<Spi, Cs, Delay, Config>`].
    ///
    /// `spi` - SPI instance.
    /// `cs` - chip select output switch.
    /// `delay` - millisecond delay.
    pub fn new(spi: Spi, cs: Cs, delay: Delay) -> Self {
        SdMmcSpi {
            spi: RefCell::new(spi),
            cs: RefCell::new(cs),
            delay: RefCell::new(delay),
            status: StatusFlag::NotInitialized.into(),
            state: Cell::new(CardState::Uninitialized),
            config: PhantomData::<Config>,
        }
    }

    /// Releases the SPI, chip select and delay.
    pub fn release(self) -> (Spi, Cs, Delay) {
        (
            self.spi.into_inner(),
            self.cs.into_inner(),
            self.delay.into_inner(),
        )
    }

    /// Current card session state.
    pub fn state(&self) -> CardState {
        self.state.get()
    }

    /// Validate buffer for read/write.
    fn validate_buffer_len(buf_len: usize) -> Result<(), DiskioError<ErrorFor<Self>>> {
        if buf_len == 0 || buf_len % BLOCK_SIZE != 0 {
            error!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, BLOCK_SIZE
            );
            Err(DiskioError::InvalidArgument)
        } else {
            Ok(())
        }
    }

    /// Validate initialzed.
    fn validate_initialized(&self) -> Result<(), DiskioError<ErrorFor<Self>>> {
        if self.status.contains(StatusFlag::NotInitialized) {
            Err(DiskioError::NotInitialized)
        } else {
            Ok(())
        }
    }

    /// Convert lba of the `index`-th block of a transfer.
    fn convert_lba(lba: Lba, index: usize) -> Result<u32, DiskioError<ErrorFor<Self>>> {
        u32::try_from(lba)
            .ok()
            .zip(u32::try_from(index).ok())
            .and_then(|(lba, index)| lba.checked_add(index))
            .ok_or(DiskioError::InvalidArgument)
    }

    /// Blocking delay.
    fn delay_ms(&self, ms: u32) {
        self.delay.borrow_mut().delay_ms(ms);
    }

    /// Activate chip select.
    fn select(&self) -> Result<(), ErrorFor<Self>> {
        self.cs.borrow_mut().on().map_err(Error::SelectError)
    }

    /// Deactivate chip select.
    fn unselect(&self) -> Result<(), ErrorFor<Self>> {
        self.cs.borrow_mut().off().map_err(Error::SelectError)
    }

    /// Run `f` with the card selected, the card is released whatever `f`
    /// returns.
    fn cs_scope<F, R>(&self, f: F) -> Result<R, ErrorFor<Self>>
    where
        F: FnOnce(&Self) -> Result<R, ErrorFor<Self>>,
    {
        self.select()?;
        let result = f(self);
        self.unselect()?;

        result
    }

    /// Send one byte and receive one byte.
    fn transfer(&self, data: u8) -> Result<u8, ErrorFor<Self>> {
        self.spi
            .borrow_mut()
            .transfer(&mut [data])
            .map(|b| b[0])
            .map_err(Error::Transport)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    fn receive(&self) -> Result<u8, ErrorFor<Self>> {
        self.transfer(tokens::FILLER)
    }

    /// Send a byte to the SD card.
    fn send(&self, data: u8) -> Result<(), ErrorFor<Self>> {
        self.transfer(data).map(|_| ())
    }

    /// Receive a slice from the SD card.
    fn receive_slice(&self, data: &mut [u8]) -> Result<(), ErrorFor<Self>> {
        for byte in data.iter_mut() {
            *byte = self.receive()?;
        }

        Ok(())
    }

    /// Send a slice to the SD card.
    fn send_slice(&self, data: &[u8]) -> Result<(), ErrorFor<Self>> {
        for byte in data.iter() {
            self.send(*byte)?;
        }

        Ok(())
    }

    /// Skip byte.
    fn skip_byte(&self) -> Result<(), ErrorFor<Self>> {
        self.receive().map(|_| ())
    }

    /// One deselected filler byte followed by 1 ms, lets the card finish
    /// internal work between commands.
    fn filler(&self) -> Result<(), ErrorFor<Self>> {
        self.unselect()?;
        self.send(tokens::FILLER)?;
        self.delay_ms(1);

        Ok(())
    }

    /// Power-up clocks with the card deselected.
    fn wake_up(&self) -> Result<(), ErrorFor<Self>> {
        self.unselect()?;
        self.delay_ms(Config::POWER_UP_DELAY_MS);

        for _ in 0..Config::WAKE_UP_BYTES {
            self.send(tokens::FILLER)?;
        }

        Ok(())
    }

    /// Handshake: wake up, go idle, interface check, operating condition.
    fn handshake(&self) -> Result<(), ErrorFor<Self>> {
        self.state.set(CardState::Uninitialized);

        self.wake_up()?;
        self.go_idle()?;
        self.filler()?;
        self.check_interface_condition()?;
        self.filler()?;

        match self.negotiate_operating_condition(false) {
            Ok(()) => {}
            Err(err) if err.is_timeout() && !Config::REQUIRE_READY_ON_INIT => {
                warn!("SD not ready after negotiation, leaving it to the first command");
            }
            Err(err) => return Err(err),
        }

        self.filler()
    }

    /// Initialize SD.
    ///
    /// Success only guarantees the voltage check passed: a card that kept
    /// negotiating may still reject the first read or write, which the
    /// caller should retry.
    pub fn init(&mut self) -> Result<(), ErrorFor<Self>> {
        info!("SD initialize started");

        let result = self.handshake();

        self.status = match &result {
            Ok(_) => {
                info!("SD successfully initialized, state: {:?}", self.state.get());
                Status::default()
            }
            Err(_) => {
                error!("Failed to initialize SD");
                self.state.set(CardState::Uninitialized);
                StatusFlag::ErrorOccured | StatusFlag::NotInitialized
            }
        };

        result
    }
}

impl<Spi, Cs, Delay, Config> DiskioDevice for SdMmcSpi<Spi, Cs, Delay, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Delay: DelayMs<u32>,
    Config: SdMmcSpiConfig,
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    type HardwareError = Error<Spi::Error, Cs::Error>;

    fn status(&self) -> Status {
        self.status
    }

    fn reset(&mut self) {
        info!("SD reset invoked");
        self.status = StatusFlag::NotInitialized.into();
        self.state.set(CardState::Uninitialized);
    }

    fn initialize(&mut self) -> Result<(), DiskioError<Self::HardwareError>> {
        if !self.status.contains(StatusFlag::NotInitialized) {
            warn!("SD already is initialized");
            return Err(DiskioError::AlreadyInitialized);
        }

        self.init().map_err(DiskioError::Hardware)
    }

    fn read(&self, buf: &mut [u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Self::validate_buffer_len(buf.len())?;
        self.validate_initialized()?;

        for (index, chunk) in buf.chunks_mut(BLOCK_SIZE).enumerate() {
            let address = Self::convert_lba(lba, index)?;
            let block = <&mut Block>::try_from(chunk).map_err(|_| DiskioError::InvalidArgument)?;

            self.read_block(address, block)
                .map_err(DiskioError::Hardware)?;
        }

        Ok(())
    }

    fn write(&self, buf: &[u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Self::validate_buffer_len(buf.len())?;
        self.validate_initialized()?;

        for (index, chunk) in buf.chunks(BLOCK_SIZE).enumerate() {
            let address = Self::convert_lba(lba, index)?;
            let block = <&Block>::try_from(chunk).map_err(|_| DiskioError::InvalidArgument)?;

            self.write_block(address, block)
                .map_err(DiskioError::Hardware)?;
        }

        Ok(())
    }

    fn ioctl(&self, cmd: IoctlCmd) -> Result<(), DiskioError<Self::HardwareError>> {
        match cmd {
            IoctlCmd::CtrlSync => self.wait_not_busy().map_err(DiskioError::Hardware),
            IoctlCmd::GetBlockSize(block_size) => {
                *block_size = BLOCK_SIZE;
                Ok(())
            }
            _ => Err(DiskioError::NotSupported),
        }
    }
}

impl<Spi, Cs, Delay, Config> BlockStorage for SdMmcSpi<Spi, Cs, Delay, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Delay: DelayMs<u32>,
    Config: SdMmcSpiConfig,
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    type Error = Error<Spi::Error, Cs::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        SdMmcSpi::init(self)
    }

    fn read(&mut self, address: u32, block: &mut Block) -> Result<(), Self::Error> {
        self.read_block(address, block)
    }

    fn write(&mut self, address: u32, block: &Block) -> Result<(), Self::Error> {
        self.write_block(address, block)
    }

    fn erase(&mut self, address: u32) -> Result<(), Self::Error> {
        self.erase_block(address)
    }
}
