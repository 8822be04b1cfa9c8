// Licensed under the Apache-2.0 license

//! Status codes presented by the TWI peripheral in the upper five bits of the
//! status register.

use crate::twi::registers::STATUS_MASK;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum StatusCode {
    /// Illegal START or STOP condition on the bus.
    IllegalStartStop = 0x00,
    StartTransmitted = 0x08,
    RepeatedStart = 0x10,
    /// SLA+W transmitted, ACK received.
    SlaveWriteAck = 0x18,
    /// SLA+W transmitted, NACK received.
    SlaveWriteNack = 0x20,
    DataTransmittedAck = 0x28,
    DataTransmittedNack = 0x30,
    /// Arbitration lost in SLA+R/W or data bytes.
    ArbitrationLost = 0x38,
    /// SLA+R transmitted, ACK received.
    SlaveReadAck = 0x40,
    /// SLA+R transmitted, NACK received.
    SlaveReadNack = 0x48,
    DataReceivedAck = 0x50,
    DataReceivedNack = 0x58,
    OwnAddressWrite = 0x60,
    ArbitrationLostOwnAddressWrite = 0x68,
    GeneralCall = 0x70,
    ArbitrationLostGeneralCall = 0x78,
    SlaveDataReceivedAck = 0x80,
    SlaveDataReceivedNack = 0x88,
    GeneralCallDataReceivedAck = 0x90,
    GeneralCallDataReceivedNack = 0x98,
    /// STOP or repeated START received while addressed as slave.
    StopOrRepeatedStart = 0xA0,
    OwnAddressRead = 0xA8,
    ArbitrationLostOwnAddressRead = 0xB0,
    SlaveDataTransmittedAck = 0xB8,
    SlaveDataTransmittedNack = 0xC0,
    /// Last byte (TWEA cleared) transmitted, ACK received.
    SlaveLastDataTransmittedAck = 0xC8,
    /// No relevant state information, TWINT clear.
    NoRelevantState = 0xF8,
}

impl StatusCode {
    /// Decodes the status bits of a raw status register value.
    ///
    /// The prescaler bits are ignored. Values outside the known set yield
    /// `None`.
    #[must_use]
    pub fn from_register(value: u8) -> Option<Self> {
        match value & STATUS_MASK {
            0x00 => Some(Self::IllegalStartStop),
            0x08 => Some(Self::StartTransmitted),
            0x10 => Some(Self::RepeatedStart),
            0x18 => Some(Self::SlaveWriteAck),
            0x20 => Some(Self::SlaveWriteNack),
            0x28 => Some(Self::DataTransmittedAck),
            0x30 => Some(Self::DataTransmittedNack),
            0x38 => Some(Self::ArbitrationLost),
            0x40 => Some(Self::SlaveReadAck),
            0x48 => Some(Self::SlaveReadNack),
            0x50 => Some(Self::DataReceivedAck),
            0x58 => Some(Self::DataReceivedNack),
            0x60 => Some(Self::OwnAddressWrite),
            0x68 => Some(Self::ArbitrationLostOwnAddressWrite),
            0x70 => Some(Self::GeneralCall),
            0x78 => Some(Self::ArbitrationLostGeneralCall),
            0x80 => Some(Self::SlaveDataReceivedAck),
            0x88 => Some(Self::SlaveDataReceivedNack),
            0x90 => Some(Self::GeneralCallDataReceivedAck),
            0x98 => Some(Self::GeneralCallDataReceivedNack),
            0xA0 => Some(Self::StopOrRepeatedStart),
            0xA8 => Some(Self::OwnAddressRead),
            0xB0 => Some(Self::ArbitrationLostOwnAddressRead),
            0xB8 => Some(Self::SlaveDataTransmittedAck),
            0xC0 => Some(Self::SlaveDataTransmittedNack),
            0xC8 => Some(Self::SlaveLastDataTransmittedAck),
            0xF8 => Some(Self::NoRelevantState),
            _ => None,
        }
    }

    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Codes signalling that this peripheral lost arbitration as a master.
    #[must_use]
    pub const fn is_arbitration_lost(self) -> bool {
        matches!(
            self,
            Self::ArbitrationLost
                | Self::ArbitrationLostOwnAddressWrite
                | Self::ArbitrationLostGeneralCall
                | Self::ArbitrationLostOwnAddressRead
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prescaler_bits_are_ignored() {
        assert_eq!(
            StatusCode::from_register(0x1B),
            Some(StatusCode::SlaveWriteAck)
        );
        assert_eq!(
            StatusCode::from_register(0xFF),
            Some(StatusCode::NoRelevantState)
        );
    }

    #[test]
    fn test_unknown_codes_are_rejected() {
        for raw in [0xD0, 0xD8, 0xE0, 0xE8, 0xF0] {
            assert_eq!(StatusCode::from_register(raw), None);
        }
    }

    #[test]
    fn test_every_known_code_decodes_to_itself() {
        for raw in (0x00..=0xF8u8).step_by(8) {
            if let Some(code) = StatusCode::from_register(raw) {
                assert_eq!(code.code(), raw);
            }
        }
    }

    #[test]
    fn test_arbitration_lost_family() {
        assert!(StatusCode::ArbitrationLost.is_arbitration_lost());
        assert!(StatusCode::ArbitrationLostOwnAddressRead.is_arbitration_lost());
        assert!(!StatusCode::SlaveWriteNack.is_arbitration_lost());
    }
}
