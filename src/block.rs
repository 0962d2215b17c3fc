//! Block I/O layer: single block read, write and erase.

use crate::{
    consts::{checksums, commands, tokens, Block, BLOCK_SIZE},
    response::R1Response,
    Error, ErrorFor, SdMmcSpi, SdMmcSpiConfig,
};

use embedded_hal::blocking::{delay::DelayMs, spi::Transfer};
use switch_hal::OutputSwitch;

#[cfg(feature = "log")]
use log::{debug, error, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, warn};

/// Filler bytes around a block transfer.
const SETTLE_BYTES: usize = 3;
/// Filler bytes between the forced negotiation and a write.
const WRITE_SETTLE_BYTES: usize = 2;
/// Trailing checksum bytes of a data block.
const DATA_CRC_LEN: usize = 2;

impl<Spi, Cs, Delay, Config> SdMmcSpi<Spi, Cs, Delay, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Delay: DelayMs<u32>,
    Config: SdMmcSpiConfig,
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Validate state for block I/O.
    fn validate_state(&self) -> Result<(), ErrorFor<Self>> {
        let state = self.state.get();

        if state.accepts_io() {
            Ok(())
        } else {
            warn!("SD block I/O in state {:?}", state);
            Err(Error::BadState)
        }
    }

    /// Wait for token.
    fn wait_for_token<F: Fn(u8) -> bool>(
        &self,
        token_validator: F,
        attempts: usize,
        error: ErrorFor<Self>,
    ) -> Result<u8, ErrorFor<Self>> {
        for _ in 0..attempts {
            let token = self.receive()?;

            if token_validator(token) {
                return Ok(token);
            }
        }

        Err(error)
    }

    /// Poll the selected card until it stops driving the busy level.
    fn poll_not_busy(&self) -> Result<(), ErrorFor<Self>> {
        let mut polls = 0;

        loop {
            let status = self.receive()?;
            self.delay_ms(1);
            polls += 1;

            if status != tokens::BUSY {
                return Ok(());
            }

            if let Some(max) = Config::WAIT_NOT_BUSY_ATTEMPTS {
                if polls >= max {
                    return Err(Error::TimeoutWaitNotBusy);
                }
            }
        }
    }

    /// Wait until the card is not busy.
    ///
    /// Observes the card at least once. With the default config there is no
    /// bound: a card stuck busy stalls the caller.
    pub(crate) fn wait_not_busy(&self) -> Result<(), ErrorFor<Self>> {
        self.cs_scope(Self::poll_not_busy)
    }

    /// Read data.
    fn read_data(&self, data: &mut [u8]) -> Result<(), ErrorFor<Self>> {
        self.wait_for_token(
            |token| token == tokens::DATA_START_BLOCK,
            Config::READ_TOKEN_ATTEMPTS,
            Error::TimeoutReadBuffer,
        )?;

        self.receive_slice(data)?;

        for _ in 0..DATA_CRC_LEN {
            self.skip_byte()?;
        }

        Ok(())
    }

    /// Write data.
    fn write_data(&self, token: u8, data: &[u8]) -> Result<(), ErrorFor<Self>> {
        self.send(token)?;
        self.send_slice(data)?;

        for _ in 0..DATA_CRC_LEN {
            self.send(tokens::FILLER)?;
        }

        let response = self.receive()?;

        if (response & tokens::DATA_RES_MASK) != tokens::DATA_RES_ACCEPTED {
            Err(Error::WriteError(response))
        } else {
            Ok(())
        }
    }

    fn read_selected(&self, address: u32, block: &mut Block) -> Result<(), ErrorFor<Self>> {
        let r1 = self.command(commands::CMD17, address, checksums::DISABLED)?;

        if r1 != R1Response::READY_STATE {
            return Err(Error::ErrorCommand(commands::CMD17));
        }

        self.read_data(block)
    }

    fn write_selected(&self, address: u32, block: &Block) -> Result<(), ErrorFor<Self>> {
        let r1 = self.command(commands::CMD24, address, checksums::DISABLED)?;

        if r1 != R1Response::READY_STATE {
            return Err(Error::ErrorCommand(commands::CMD24));
        }

        self.write_data(tokens::DATA_START_BLOCK, block)
    }

    /// Read the block at `address` into `block`.
    ///
    /// `address` is sent to the card unmodified.
    pub fn read_block(&self, address: u32, block: &mut Block) -> Result<(), ErrorFor<Self>> {
        self.validate_state()?;

        for _ in 0..SETTLE_BYTES {
            self.filler()?;
        }

        let result = self.cs_scope(|s| s.read_selected(address, block));

        if result.is_err() {
            error!("SD read of block {} failed", address);
            return result;
        }

        self.wait_not_busy()?;

        for _ in 0..SETTLE_BYTES {
            self.filler()?;
        }

        debug!("SD read block {}", address);

        Ok(())
    }

    /// Write `block` to the block at `address`.
    ///
    /// Each write first runs one forced negotiation round, a card that fell
    /// back to idle is ready again before the write command.
    pub fn write_block(&self, address: u32, block: &Block) -> Result<(), ErrorFor<Self>> {
        self.validate_state()?;

        self.wait_not_busy()?;
        self.negotiate_operating_condition(true)?;

        for _ in 0..WRITE_SETTLE_BYTES {
            self.filler()?;
        }

        let result = self.cs_scope(|s| s.write_selected(address, block));

        if result.is_err() {
            error!("SD write of block {} failed", address);
            return result;
        }

        self.wait_not_busy()?;

        debug!("SD wrote block {}", address);

        Ok(())
    }

    /// Overwrite the block at `address` with `0xFF`.
    pub fn erase_block(&self, address: u32) -> Result<(), ErrorFor<Self>> {
        let erased: Block = [tokens::ERASED; BLOCK_SIZE];

        self.write_block(address, &erased)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        consts::{commands, tokens, Block, BLOCK_SIZE},
        test::{driver, init_logger, Card, Event, FastConfig, SimError, SimSdMmc},
        CardState, DefaultSdMmcSpiConfig, DiskioDevice, DiskioError, Error, IoctlCmd, StatusFlag,
    };
    use std::{cell::RefCell, rc::Rc};

    fn initialized() -> (Rc<RefCell<Card>>, SimSdMmc<DefaultSdMmcSpiConfig>) {
        let card = Card::shared();
        let mut sd = driver::<DefaultSdMmcSpiConfig>(&card);
        sd.init().unwrap();
        (card, sd)
    }

    fn pattern(seed: u8) -> Block {
        let mut block = [0; BLOCK_SIZE];
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(31).wrapping_add(seed);
        }
        block
    }

    #[test]
    fn write_then_read_round_trips() {
        init_logger();
        let card = Card::shared();
        let mut sd = driver::<DefaultSdMmcSpiConfig>(&card);
        sd.init().unwrap();

        for (seed, address) in [0, 1, 511, 0x0012_3456, 0x7FFF_FFFF, u32::MAX]
            .iter()
            .enumerate()
        {
            let data = pattern(seed as u8);
            let mut out = [0; BLOCK_SIZE];

            sd.write_block(*address, &data).unwrap();
            sd.read_block(*address, &mut out).unwrap();

            assert_eq!(out[..], data[..]);
            assert_eq!(card.borrow().blocks[address][..], data[..]);
        }

        assert!(!card.borrow().selected);
    }

    #[test]
    fn address_is_sent_unmodified() {
        let card = Card::shared();
        let mut sd = driver::<DefaultSdMmcSpiConfig>(&card);
        sd.init().unwrap();

        let mut out = [0; BLOCK_SIZE];
        sd.read_block(0xDEAD_BEEF, &mut out).unwrap();
        sd.write_block(0x0000_0200, &out).unwrap();

        let card = card.borrow();
        assert_eq!(card.frames_of(commands::CMD17).next().unwrap().arg, 0xDEAD_BEEF);
        assert_eq!(card.frames_of(commands::CMD24).next().unwrap().arg, 0x0000_0200);
    }

    #[test]
    fn erase_fills_with_ones() {
        let card = Card::shared();
        let mut sd = driver::<DefaultSdMmcSpiConfig>(&card);
        sd.init().unwrap();

        sd.write_block(7, &pattern(3)).unwrap();
        sd.erase_block(7).unwrap();

        let mut out = [0; BLOCK_SIZE];
        sd.read_block(7, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == tokens::ERASED));
    }

    #[test]
    fn missing_read_token_times_out() {
        let card = Card::shared();
        let mut sd = driver::<FastConfig>(&card);
        sd.init().unwrap();
        card.borrow_mut().drop_read_token = true;

        let mut out = [0xA5; BLOCK_SIZE];
        assert_eq!(sd.read_block(3, &mut out), Err(Error::TimeoutReadBuffer));
        assert!(out.iter().all(|&b| b == 0xA5));
        assert!(!card.borrow().selected);
    }

    #[test]
    fn rejected_read_command_fails() {
        let card = Card::shared();
        let mut sd = driver::<DefaultSdMmcSpiConfig>(&card);
        sd.init().unwrap();
        card.borrow_mut().read_r1 = 0x20;

        let mut out = [0; BLOCK_SIZE];
        assert_eq!(
            sd.read_block(3, &mut out),
            Err(Error::ErrorCommand(commands::CMD17))
        );
        assert!(!card.borrow().selected);
    }

    #[test]
    fn rejected_data_response_fails_and_deselects() {
        init_logger();
        let card = Card::shared();
        let mut sd = driver::<DefaultSdMmcSpiConfig>(&card);
        sd.init().unwrap();
        card.borrow_mut().data_response = 0b0000_1011;

        assert_eq!(
            sd.write_block(5, &pattern(1)),
            Err(Error::WriteError(0b0000_1011))
        );

        let card = card.borrow();
        assert!(!card.selected);
        assert_eq!(card.events.last(), Some(&Event::Deselect));
        assert!(!card.blocks.contains_key(&5));
    }

    #[test]
    fn rejected_write_command_sends_no_payload() {
        let card = Card::shared();
        let mut sd = driver::<DefaultSdMmcSpiConfig>(&card);
        sd.init().unwrap();
        card.borrow_mut().write_r1 = 0x40;

        assert_eq!(
            sd.write_block(5, &[0; BLOCK_SIZE]),
            Err(Error::ErrorCommand(commands::CMD24))
        );

        let card = card.borrow();
        let cmd24 = card.frames_of(commands::CMD24).next().unwrap();
        let sent_after: Vec<u8> = card.events[cmd24.at + 1..]
            .iter()
            .filter_map(|e| match e {
                Event::Exchange { out, .. } => Some(*out),
                _ => None,
            })
            .collect();
        assert!(sent_after.iter().all(|&b| b == tokens::FILLER));
        assert!(sent_after.len() < BLOCK_SIZE);
        assert!(!card.selected);
    }

    #[test]
    fn write_renegotiates_before_command() {
        let card = Card::shared();
        let mut sd = driver::<DefaultSdMmcSpiConfig>(&card);
        sd.init().unwrap();
        let acmd41_after_init = card.borrow().frames_of(commands::ACMD41).count();

        sd.write_block(1, &pattern(9)).unwrap();

        let card = card.borrow();
        assert_eq!(
            card.frames_of(commands::ACMD41).count(),
            acmd41_after_init + 1
        );
        let acmd41 = card.frames_of(commands::ACMD41).last().unwrap();
        let cmd24 = card.frames_of(commands::CMD24).next().unwrap();
        assert!(acmd41.at < cmd24.at);
    }

    #[test]
    fn write_waits_for_programming() {
        let card = Card::shared();
        let mut sd = driver::<DefaultSdMmcSpiConfig>(&card);
        sd.init().unwrap();
        card.borrow_mut().busy_polls = 4;

        sd.write_block(2, &pattern(2)).unwrap();

        let card = card.borrow();
        let last_select = card
            .events
            .iter()
            .rposition(|e| *e == Event::Select)
            .unwrap();
        let polled: Vec<u8> = card.events[last_select..]
            .iter()
            .filter_map(|e| match e {
                Event::Exchange { input, .. } => Some(*input),
                _ => None,
            })
            .collect();
        assert_eq!(polled, vec![0x00, 0x00, 0x00, 0x00, 0xFF]);
        assert!(!card.selected);
    }

    #[test]
    fn wait_not_busy_observes_at_least_once() {
        let card = Card::shared();
        let sd = driver::<DefaultSdMmcSpiConfig>(&card);

        sd.wait_not_busy().unwrap();

        assert_eq!(
            card.borrow().events,
            vec![
                Event::Select,
                Event::Exchange {
                    out: tokens::FILLER,
                    input: tokens::FILLER
                },
                Event::Delay(1),
                Event::Deselect,
            ]
        );
    }

    #[test]
    fn wait_not_busy_returns_once_card_releases() {
        let card = Card::shared();
        card.borrow_mut().set_busy(3);
        let sd = driver::<DefaultSdMmcSpiConfig>(&card);

        sd.wait_not_busy().unwrap();

        let card = card.borrow();
        let inputs: Vec<u8> = card.exchanges().iter().map(|&(_, input)| input).collect();
        assert_eq!(inputs, vec![0x00, 0x00, 0x00, 0xFF]);
        assert_eq!(card.delays(), vec![1; 4]);
    }

    #[test]
    fn transport_failure_during_write_releases_card() {
        let data = [0x07; BLOCK_SIZE];

        let (card, sd) = initialized();
        let before = card.borrow().exchanges().len();
        sd.write_block(3, &data).unwrap();
        let transfers = card.borrow().exchanges().len() - before;

        for left in 0..transfers {
            let (card, sd) = initialized();
            card.borrow_mut().transfers_left = Some(left);

            assert_eq!(
                sd.write_block(3, &data),
                Err(Error::Transport(SimError)),
                "bus failed after {} transfers",
                left
            );
            assert!(!card.borrow().selected, "bus failed after {} transfers", left);
        }

        let (card, sd) = initialized();
        card.borrow_mut().transfers_left = Some(transfers);
        sd.write_block(3, &data).unwrap();
        assert_eq!(card.borrow().blocks[&3][..], data[..]);
    }

    #[test]
    fn transport_failure_during_read_releases_card() {
        let mut out = [0; BLOCK_SIZE];

        let (card, sd) = initialized();
        let before = card.borrow().exchanges().len();
        sd.read_block(5, &mut out).unwrap();
        let transfers = card.borrow().exchanges().len() - before;

        for left in 0..transfers {
            let (card, sd) = initialized();
            card.borrow_mut().transfers_left = Some(left);

            assert_eq!(
                sd.read_block(5, &mut out),
                Err(Error::Transport(SimError)),
                "bus failed after {} transfers",
                left
            );
            assert!(!card.borrow().selected, "bus failed after {} transfers", left);
        }
    }

    #[test]
    fn transport_failure_while_busy_releases_card() {
        let card = Card::shared();
        card.borrow_mut().set_busy(10);
        card.borrow_mut().transfers_left = Some(3);
        let sd = driver::<DefaultSdMmcSpiConfig>(&card);

        assert_eq!(sd.wait_not_busy(), Err(Error::Transport(SimError)));
        assert_eq!(card.borrow().delays(), vec![1; 3]);
        assert!(!card.borrow().selected);
    }

    #[test]
    fn select_failure_stops_block_io() {
        let (card, sd) = initialized();
        let frames = card.borrow().frames.len();
        card.borrow_mut().fail_select = true;

        let mut out = [0; BLOCK_SIZE];
        assert_eq!(sd.read_block(1, &mut out), Err(Error::SelectError(SimError)));
        assert_eq!(sd.write_block(1, &out), Err(Error::SelectError(SimError)));
        assert_eq!(sd.erase_block(1), Err(Error::SelectError(SimError)));
        assert_eq!(sd.wait_not_busy(), Err(Error::SelectError(SimError)));

        let card = card.borrow();
        assert_eq!(card.frames.len(), frames);
        assert!(card.blocks.is_empty());
        assert!(!card.selected);
    }

    #[test]
    fn bounded_wait_not_busy_times_out() {
        let card = Card::shared();
        card.borrow_mut().set_busy(usize::MAX);
        let sd = driver::<FastConfig>(&card);

        assert_eq!(sd.wait_not_busy(), Err(Error::TimeoutWaitNotBusy));
        assert_eq!(card.borrow().delays().len(), 50);
        assert!(!card.borrow().selected);
    }

    #[test]
    fn block_io_needs_init() {
        let card = Card::shared();
        let sd = driver::<DefaultSdMmcSpiConfig>(&card);

        let mut out = [0; BLOCK_SIZE];
        assert_eq!(sd.read_block(0, &mut out), Err(Error::BadState));
        assert_eq!(sd.write_block(0, &out), Err(Error::BadState));
        assert_eq!(sd.erase_block(0), Err(Error::BadState));
        assert!(card.borrow().events.is_empty());
    }

    #[test]
    fn diskio_splits_into_single_blocks() {
        let card = Card::shared();
        let mut sd = driver::<DefaultSdMmcSpiConfig>(&card);

        let mut buf = [0; 2 * BLOCK_SIZE];
        assert!(matches!(
            DiskioDevice::read(&sd, &mut buf, 0),
            Err(DiskioError::NotInitialized)
        ));

        assert!(sd.initialize().is_ok());
        assert!(!sd.status().contains(StatusFlag::NotInitialized));
        assert!(matches!(
            sd.initialize(),
            Err(DiskioError::AlreadyInitialized)
        ));

        buf[..BLOCK_SIZE].copy_from_slice(&pattern(1));
        buf[BLOCK_SIZE..].copy_from_slice(&pattern(2));
        assert!(DiskioDevice::write(&sd, &buf, 10).is_ok());

        let mut out = [0; 2 * BLOCK_SIZE];
        assert!(DiskioDevice::read(&sd, &mut out, 10).is_ok());
        assert_eq!(out[..], buf[..]);

        {
            let card = card.borrow();
            assert_eq!(card.blocks[&10][..], pattern(1)[..]);
            assert_eq!(card.blocks[&11][..], pattern(2)[..]);
        }

        assert!(matches!(
            DiskioDevice::read(&sd, &mut out[..100], 0),
            Err(DiskioError::InvalidArgument)
        ));

        let mut block_size = 0;
        assert!(sd.ioctl(IoctlCmd::GetBlockSize(&mut block_size)).is_ok());
        assert_eq!(block_size, BLOCK_SIZE);
        assert!(sd.ioctl(IoctlCmd::CtrlSync).is_ok());

        sd.reset();
        assert!(sd.status().contains(StatusFlag::NotInitialized));
        assert_eq!(sd.state(), CardState::Uninitialized);
    }
}
