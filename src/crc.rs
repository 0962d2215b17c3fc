/// CRC-7 calculation.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0;
    for mut byte in data.iter().cloned() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((byte & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            byte <<= 1;
        }
    }
    crc
}

/// CRC-8 calculation, polynomial 0x31, init 0xFF.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFF_u8;
    for &byte in data {
        crc ^= byte;
        for _bit in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}
