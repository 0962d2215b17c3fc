/// Card session state, advanced by the handshake.
///
/// ```text
/// Uninitialized --go idle--> IdleNegotiated --interface check--> VoltageChecked
///       ^                                                            |
///       |                                              negotiation ready
///       +------------------ init failure ----------------------------v
///                                                                  Ready
/// ```
///
/// The forced negotiation issued before every write moves a card to
/// [`CardState::Ready`] when it answers ready and keeps the current state
/// otherwise.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    /// No handshake done, or the last one failed.
    Uninitialized,
    /// Card answered go idle in SPI mode.
    IdleNegotiated,
    /// Card accepted the supply voltage and echoed the check pattern.
    VoltageChecked,
    /// Card reported the end of its initialization.
    Ready,
}

impl CardState {
    /// Block I/O is allowed once the voltage check passed.
    ///
    /// A card still negotiating may become ready on its first real command.
    pub fn accepts_io(self) -> bool {
        matches!(self, CardState::VoltageChecked | CardState::Ready)
    }
}

impl Default for CardState {
    fn default() -> Self {
        CardState::Uninitialized
    }
}
