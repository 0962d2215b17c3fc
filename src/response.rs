use bitfield::bitfield;

bitfield! {
    /// R1 response bitset.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
    pub struct R1Response(u8);
    impl Debug;
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illegal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
    pub start_bit, _: 7;
}

impl R1Response {
    /// Card finished initialization, no error flags.
    pub const READY_STATE: R1Response = R1Response(0x00);
    /// Card is in idle state, no error flags.
    pub const IN_IDLE_STATE: R1Response = R1Response(0x01);

    /// A response starts with a cleared bit 7, anything else is the idle bus.
    pub fn is_valid(&self) -> bool {
        !self.start_bit()
    }
}

/// Trailing four bytes of an R7 response.
pub type R7Payload = [u8; 4];

/// Voltage accepted and check pattern echoed by SEND_IF_COND.
pub fn r7_echo(payload: &R7Payload) -> u16 {
    u16::from_be_bytes([payload[2], payload[3]])
}
