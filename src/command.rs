//! Command layer: frames, R1/R7 responses and the card handshake steps.

use crate::{
    consts::{args, checksums, commands, tokens},
    crc::crc7,
    response::{r7_echo, R1Response, R7Payload},
    CardState, Error, ErrorFor, SdMmcSpi, SdMmcSpiConfig,
};

use embedded_hal::blocking::{delay::DelayMs, spi::Transfer};
use switch_hal::OutputSwitch;

#[cfg(feature = "log")]
use log::{debug, info, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, info, trace, warn};

/// Command frame length.
pub(crate) const FRAME_LEN: usize = 6;

/// Build a command frame: command byte, big-endian argument, checksum.
pub(crate) fn command_frame(cmd: u8, arg: u32, crc: u8) -> [u8; FRAME_LEN] {
    let arg = arg.to_be_bytes();

    [
        commands::CMD_BASE | (cmd & commands::INDEX_MASK),
        arg[0],
        arg[1],
        arg[2],
        arg[3],
        crc,
    ]
}

/// Checksum byte of a command sent while the card still checks CRC.
pub(crate) fn handshake_checksum(cmd: u8, arg: u32) -> u8 {
    let frame = command_frame(cmd, arg, 0);

    (crc7(&frame[..FRAME_LEN - 1]) << 1) | 0x01
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
    /// Poll for R1 after a frame.
    ///
    /// Returns the last byte read when no byte had bit 7 clear, the caller
    /// decides what a missing response means.
    fn exchange_command(&self, frame: &[u8; FRAME_LEN]) -> Result<R1Response, ErrorFor<Self>> {
        self.send_slice(frame)?;

        let mut r1 = R1Response(tokens::FILLER);

        for _ in 0..Config::R1_ATTEMPTS {
            r1 = R1Response(self.receive()?);

            if r1.is_valid() {
                break;
            }
        }

        trace!("CMD{} -> 0x{:02X}", frame[0] & commands::INDEX_MASK, r1.0);

        Ok(r1)
    }

    /// Frame and exchange a command with the card already selected.
    pub(crate) fn command(&self, cmd: u8, arg: u32, crc: u8) -> Result<R1Response, ErrorFor<Self>> {
        self.exchange_command(&command_frame(cmd, arg, crc))
    }

    /// Send command.
    ///
    /// The card is selected for the exchange and stays selected unless
    /// `release` is set.
    pub(crate) fn send_command(
        &self,
        cmd: u8,
        arg: u32,
        crc: u8,
        release: bool,
    ) -> Result<R1Response, ErrorFor<Self>> {
        self.select()?;
        let result = self.command(cmd, arg, crc);

        if release {
            self.unselect()?;
        }

        result
    }

    /// Enter SD to SPI mode.
    pub(crate) fn go_idle(&self) -> Result<(), ErrorFor<Self>> {
        let crc = handshake_checksum(commands::CMD0, 0);

        for i in 0..Config::GO_IDLE_ATTEMPTS {
            info!("Enter to SPI mode for SD, attempt: {}", i + 1);

            let r1 = self.send_command(commands::CMD0, 0x0000_0000, crc, true)?;

            if r1 == R1Response::IN_IDLE_STATE {
                self.state.set(CardState::IdleNegotiated);
                return Ok(());
            }

            warn!("Wrong response from CMD{}: 0x{:02X}", commands::CMD0, r1.0);

            self.delay_ms(Config::GO_IDLE_RETRY_DELAY_MS);
        }

        Err(Error::CardNotFound)
    }

    /// Read the four trailing bytes of R7, each polled past the idle bus.
    fn receive_r7(&self) -> Result<R7Payload, ErrorFor<Self>> {
        let mut payload = R7Payload::default();

        for byte in payload.iter_mut() {
            for _ in 0..Config::R7_BYTE_ATTEMPTS {
                *byte = self.receive()?;

                if *byte != tokens::FILLER {
                    break;
                }
            }
        }

        Ok(payload)
    }

    /// SEND_IF_COND exchange, the card is selected by the caller.
    fn exchange_interface_condition(&self) -> Result<(), ErrorFor<Self>> {
        let crc = handshake_checksum(commands::CMD8, args::IF_COND_PATTERN);
        let r1 = self.command(commands::CMD8, args::IF_COND_PATTERN, crc)?;

        if r1 != R1Response::IN_IDLE_STATE {
            warn!("SD rejected CMD{}: 0x{:02X}", commands::CMD8, r1.0);
            return Err(Error::UnsupportedCard(r1.0));
        }

        let echo = r7_echo(&self.receive_r7()?);

        if echo != args::IF_COND_PATTERN as u16 {
            warn!("SD echoed 0x{:04X} instead of the check pattern", echo);
            return Err(Error::EchoMismatch(echo));
        }

        Ok(())
    }

    /// Verify SD Memory Card interface operating condition.
    pub(crate) fn check_interface_condition(&self) -> Result<(), ErrorFor<Self>> {
        info!("Verifing SD Memory Card interface operating condition");

        self.cs_scope(Self::exchange_interface_condition)?;

        self.state.set(CardState::VoltageChecked);

        Ok(())
    }

    /// Sends host capacity support information and activates.
    ///
    /// Without `force` the negotiation repeats until the card reports ready,
    /// `force` performs a single round and accepts any answer.
    pub(crate) fn negotiate_operating_condition(&self, force: bool) -> Result<(), ErrorFor<Self>> {
        if !force {
            info!("Sending host capacity support information and activates");
        }

        for round in 0..Config::OP_COND_ATTEMPTS {
            self.send_command(commands::CMD55, 0x0000_0000, checksums::DISABLED, true)?;
            let r1 = self.send_command(
                commands::ACMD41,
                args::HIGH_CAPACITY_SUPPORT,
                checksums::DISABLED,
                true,
            )?;
            self.filler()?;

            if r1 == R1Response::READY_STATE {
                debug!("SD ready after {} round(s)", round + 1);
                self.state.set(CardState::Ready);
                return Ok(());
            }

            if force {
                trace!("SD not ready yet: 0x{:02X}", r1.0);
                return Ok(());
            }
        }

        Err(Error::TimeoutCommand(commands::ACMD41))
    }
}
