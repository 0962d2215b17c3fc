//! Block storage contract consumed by the application.

use crate::consts::Block;

/// A device storing 512-byte blocks.
///
/// Single caller, blocking. Implementations do not retry failed transfers,
/// retry policy belongs to the caller.
pub trait BlockStorage {
    /// Error of the underlying device.
    type Error: core::fmt::Debug;

    /// Bring the device up.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Read the block at `address`.
    fn read(&mut self, address: u32, block: &mut Block) -> Result<(), Self::Error>;

    /// Write the block at `address`.
    fn write(&mut self, address: u32, block: &Block) -> Result<(), Self::Error>;

    /// Erase the block at `address`, it reads back as `0xFF`.
    fn erase(&mut self, address: u32) -> Result<(), Self::Error>;
}
