/// Represents config for [`SdMmcSpi`](crate::SdMmcSpi).
///
/// Every budget is a poll count. Busy polls are spaced by a 1 ms delay, so
/// [`WAIT_NOT_BUSY_ATTEMPTS`](SdMmcSpiConfig::WAIT_NOT_BUSY_ATTEMPTS) is a
/// deadline in milliseconds.
pub trait SdMmcSpiConfig {
    /// Filler bytes sent with the card deselected before the first command.
    const WAKE_UP_BYTES: usize;
    /// Settle delay before the wake-up clocks, in ms.
    const POWER_UP_DELAY_MS: u32;
    /// Max attempts to read R1.
    const R1_ATTEMPTS: usize;
    /// Max attempts to enter SPI mode.
    const GO_IDLE_ATTEMPTS: usize;
    /// Delay after a failed attempt to enter SPI mode, in ms.
    const GO_IDLE_RETRY_DELAY_MS: u32;
    /// Max attempts to read each trailing byte of R7.
    const R7_BYTE_ATTEMPTS: usize;
    /// Max rounds of the operating condition negotiation.
    const OP_COND_ATTEMPTS: usize;
    /// Max attempts to find the read data token.
    const READ_TOKEN_ATTEMPTS: usize;
    /// Max busy polls, `None` waits forever.
    const WAIT_NOT_BUSY_ATTEMPTS: Option<usize>;
    /// Fail init when the card never reports ready.
    const REQUIRE_READY_ON_INIT: bool;
}

/// Default implementation of [`SdMmcSpiConfig`](crate::SdMmcSpiConfig).
pub struct DefaultSdMmcSpiConfig;

impl SdMmcSpiConfig for DefaultSdMmcSpiConfig {
    const WAKE_UP_BYTES: usize = 10;
    const POWER_UP_DELAY_MS: u32 = 10;
    const R1_ATTEMPTS: usize = 10;
    const GO_IDLE_ATTEMPTS: usize = 10;
    const GO_IDLE_RETRY_DELAY_MS: u32 = 10;
    const R7_BYTE_ATTEMPTS: usize = 1000;
    const OP_COND_ATTEMPTS: usize = 10_000;
    const READ_TOKEN_ATTEMPTS: usize = 10_000;
    const WAIT_NOT_BUSY_ATTEMPTS: Option<usize> = None;
    const REQUIRE_READY_ON_INIT: bool = false;
}
