// Licensed under the Apache-2.0 license

//! Common types for the TWI driver: configuration, protocol state and errors.

use core::fmt;

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use fugit::HertzU32;

use crate::twi::registers::TwiRegisters;

/// Largest payload accepted by a single master transaction.
pub const MAX_TRANSFER_LEN: usize = 32;

/// Highest seven-bit address.
pub const MAX_ADDRESS: u8 = 0x7F;

/// Address reserved for the general call.
pub const GENERAL_CALL_ADDRESS: u8 = 0x00;

/// R/W bit of the address byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Direction {
    Write = 0,
    Read = 1,
}

impl Direction {
    /// Builds the SLA+R/W byte.
    #[must_use]
    pub const fn address_byte(self, address: u8) -> u8 {
        (address << 1) | self as u8
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Prescaler {
    #[default]
    Div1 = 0,
    Div4 = 1,
    Div16 = 2,
    Div64 = 3,
}

impl Prescaler {
    #[must_use]
    pub const fn divisor(self) -> u32 {
        match self {
            Prescaler::Div1 => 1,
            Prescaler::Div4 => 4,
            Prescaler::Div16 => 16,
            Prescaler::Div64 => 64,
        }
    }

    /// Decodes the prescaler bits of the status register. The reserved third
    /// bit is ignored.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Prescaler::Div1,
            1 => Prescaler::Div4,
            2 => Prescaler::Div16,
            _ => Prescaler::Div64,
        }
    }
}

/// Protocol state of one bus instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    NotInitialised,
    Disabled,
    Ready,
    MasterTransmitting,
    MasterReceiving,
    MasterTxFinished,
    MasterRxFinished,
    SlaveReceiving,
    SlaveTransmitting,
    PeripheralError,
}

impl State {
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, State::MasterTxFinished | State::MasterRxFinished)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Instance id outside the configured range.
    DeviceNotFound,
    /// No register handle bound to the instance.
    NullHandle,
    NotInitialised,
    /// Address or address mask above 0x7F.
    InvalidAddress,
    /// Requested bus speed cannot be produced from the CPU clock.
    InvalidConfiguration,
    RequestTooShort,
    RequestTooLong,
    /// A transaction is in flight; try again later.
    AlreadyProcessing,
    MaxRetriesHit,
    /// Illegal START or STOP detected by the peripheral.
    BusErrorHardware,
    ArbitrationLost,
    /// Status code that has no meaning in the current state.
    UnexpectedStatus(u8),
    /// The application never installed a slave handler.
    SlaveHandlersNotSet,
    /// Slave command byte not understood by the handler.
    UnknownCommand,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::ArbitrationLost => ErrorKind::ArbitrationLoss,
            Error::BusErrorHardware => ErrorKind::Bus,
            Error::MaxRetriesHit => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            _ => ErrorKind::Other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DeviceNotFound => f.write_str("no such TWI instance"),
            Error::NullHandle => f.write_str("register handle not set"),
            Error::NotInitialised => f.write_str("instance not initialised"),
            Error::InvalidAddress => f.write_str("address out of range"),
            Error::InvalidConfiguration => f.write_str("invalid bus configuration"),
            Error::RequestTooShort => f.write_str("request too short"),
            Error::RequestTooLong => f.write_str("request too long"),
            Error::AlreadyProcessing => f.write_str("transaction in progress"),
            Error::MaxRetriesHit => f.write_str("retry budget exhausted"),
            Error::BusErrorHardware => f.write_str("bus error"),
            Error::ArbitrationLost => f.write_str("arbitration lost"),
            Error::UnexpectedStatus(code) => write!(f, "unexpected status 0x{code:02X}"),
            Error::SlaveHandlersNotSet => f.write_str("slave handlers not set"),
            Error::UnknownCommand => f.write_str("unknown slave command"),
        }
    }
}

/// Configuration applied by [`Twi::init`](crate::twi::Twi::init).
#[derive(Clone, Copy)]
pub struct TwiConfig<'r> {
    pub handle: Option<&'r dyn TwiRegisters>,
    /// Raw TWBR value.
    pub bitrate: u8,
    pub prescaler: Prescaler,
    /// Own seven-bit slave address.
    pub slave_address: u8,
    /// Seven-bit address mask; set bits are ignored during address matching.
    pub address_mask: u8,
    pub general_call_enabled: bool,
    /// Interrupt-driven operation (TWIE); polling otherwise.
    pub interrupt_mode: bool,
}

impl Default for TwiConfig<'_> {
    fn default() -> Self {
        Self {
            handle: None,
            bitrate: 0,
            prescaler: Prescaler::Div1,
            slave_address: 0,
            address_mask: 0,
            general_call_enabled: false,
            interrupt_mode: false,
        }
    }
}

impl TwiConfig<'_> {
    /// SCL frequency produced by this configuration.
    #[must_use]
    pub fn scl_frequency(&self, cpu: HertzU32) -> HertzU32 {
        let divider = 16 + 2 * u32::from(self.bitrate) * self.prescaler.divisor();
        HertzU32::from_raw(cpu.to_Hz() / divider)
    }
}

/// Computes TWBR and prescaler for the requested SCL frequency, choosing the
/// smallest prescaler that fits.
///
/// # Errors
///
/// `InvalidConfiguration` if the SCL frequency is zero, faster than
/// `cpu / 16`, or too slow for the largest divider.
pub fn bitrate_for(cpu: HertzU32, scl: HertzU32) -> Result<(u8, Prescaler), Error> {
    let cpu = cpu.to_Hz();
    let scl = scl.to_Hz();
    if scl == 0 || cpu / scl < 16 {
        return Err(Error::InvalidConfiguration);
    }
    let ticks = cpu / scl - 16;
    for prescaler in [
        Prescaler::Div1,
        Prescaler::Div4,
        Prescaler::Div16,
        Prescaler::Div64,
    ] {
        let twbr = ticks / (2 * prescaler.divisor());
        if let Ok(twbr) = u8::try_from(twbr) {
            return Ok((twbr, prescaler));
        }
    }
    Err(Error::InvalidConfiguration)
}

pub struct TwiConfigBuilder<'r> {
    config: TwiConfig<'r>,
}

impl Default for TwiConfigBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r> TwiConfigBuilder<'r> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: TwiConfig::default(),
        }
    }
    #[must_use]
    pub fn handle(mut self, handle: &'r dyn TwiRegisters) -> Self {
        self.config.handle = Some(handle);
        self
    }
    #[must_use]
    pub fn bitrate(mut self, bitrate: u8) -> Self {
        self.config.bitrate = bitrate;
        self
    }
    #[must_use]
    pub fn prescaler(mut self, prescaler: Prescaler) -> Self {
        self.config.prescaler = prescaler;
        self
    }
    /// Derives bitrate and prescaler from the clock pair. An unreachable
    /// frequency leaves the current values untouched; use [`bitrate_for`] to
    /// observe the failure.
    #[must_use]
    pub fn frequency(mut self, cpu: HertzU32, scl: HertzU32) -> Self {
        if let Ok((bitrate, prescaler)) = bitrate_for(cpu, scl) {
            self.config.bitrate = bitrate;
            self.config.prescaler = prescaler;
        }
        self
    }
    #[must_use]
    pub fn slave_address(mut self, address: u8) -> Self {
        self.config.slave_address = address;
        self
    }
    #[must_use]
    pub fn address_mask(mut self, mask: u8) -> Self {
        self.config.address_mask = mask;
        self
    }
    #[must_use]
    pub fn general_call(mut self, enabled: bool) -> Self {
        self.config.general_call_enabled = enabled;
        self
    }
    #[must_use]
    pub fn interrupt_mode(mut self, enabled: bool) -> Self {
        self.config.interrupt_mode = enabled;
        self
    }
    #[must_use]
    pub fn build(self) -> TwiConfig<'r> {
        self.config
    }
}
