/// Size of a storage block in bytes.
pub const BLOCK_SIZE: usize = 512;

/// A single storage block.
pub type Block = [u8; BLOCK_SIZE];

pub mod commands {
    /// Fixed `01` start bits of a command byte.
    pub const CMD_BASE: u8 = 0x40;
    /// Mask of the command index in a command byte.
    pub const INDEX_MASK: u8 = 0x3F;
    /// GO_IDLE_STATE - init card in spi mode if CS low.
    pub const CMD0: u8 = 0;
    /// SEND_IF_COND - verify SD Memory Card interface operating condition.
    pub const CMD8: u8 = 8;
    /// READ_SINGLE_BLOCK - read a single data block from the card.
    pub const CMD17: u8 = 17;
    /// WRITE_BLOCK - write a single data block to the card.
    pub const CMD24: u8 = 24;
    /// APP_CMD - escape for application specific command.
    pub const CMD55: u8 = 55;
    /// SD_SEND_OP_COND - Sends host capacity support information and activates
    /// the card's initialization process.
    pub const ACMD41: u8 = 41;
}

pub mod args {
    /// SEND_IF_COND argument: 2.7-3.6V supply and the check pattern.
    pub const IF_COND_PATTERN: u32 = 0x0000_01AA;
    /// Host capacity support bit of the SD_SEND_OP_COND argument.
    pub const HIGH_CAPACITY_SUPPORT: u32 = 1 << 30;
}

pub mod checksums {
    /// Trailing byte sent once CRC checking is off.
    pub const DISABLED: u8 = 0x01;
}

pub mod tokens {
    /// Filler byte clocked out while receiving.
    pub const FILLER: u8 = 0xFF;
    /// Start data token for read or write single block.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Mask for data response tokens after a write block operation.
    pub const DATA_RES_MASK: u8 = 0x1F;
    /// Write data accepted token.
    pub const DATA_RES_ACCEPTED: u8 = 0x05;
    /// Value the card drives while programming.
    pub const BUSY: u8 = 0x00;
    /// Byte used to fill an erased block.
    pub const ERASED: u8 = 0xFF;
}
