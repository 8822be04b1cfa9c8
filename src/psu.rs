// Licensed under the Apache-2.0 license

//! Register map the bench supply exposes on the bus as a TWI slave.
//!
//! A remote master writes a command byte to select a register, then either
//! keeps writing (fan speed only) or issues a repeated START and reads one
//! byte back.

use core::cell::Cell;

use crate::twi::{Error, SlaveExchange, SlaveFlow, SlaveHandler};

pub const CMD_TEMPERATURE_1: u8 = 0x01;
pub const CMD_TEMPERATURE_2: u8 = 0x02;
pub const CMD_FAN_SPEED: u8 = 0x03;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    Temperature1 = CMD_TEMPERATURE_1,
    Temperature2 = CMD_TEMPERATURE_2,
    FanSpeed = CMD_FAN_SPEED,
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            CMD_TEMPERATURE_1 => Ok(Command::Temperature1),
            CMD_TEMPERATURE_2 => Ok(Command::Temperature2),
            CMD_FAN_SPEED => Ok(Command::FanSpeed),
            _ => Err(Error::UnknownCommand),
        }
    }
}

/// Live values of the supply plus the register selection of the current
/// remote master.
#[derive(Debug, Default)]
pub struct PsuRegisters {
    /// Heatsink temperature in degrees Celsius.
    pub temperature_1: Cell<u8>,
    /// Transformer temperature in degrees Celsius.
    pub temperature_2: Cell<u8>,
    /// Fan PWM duty, 0..=255.
    pub fan_speed: Cell<u8>,
    selected: Cell<Option<Command>>,
    transactions: Cell<u32>,
    general_calls: Cell<u32>,
}

impl PsuRegisters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn selected(&self) -> Option<Command> {
        self.selected.get()
    }

    /// Completed slave transfers.
    #[must_use]
    pub fn transactions(&self) -> u32 {
        self.transactions.get()
    }

    #[must_use]
    pub fn general_calls(&self) -> u32 {
        self.general_calls.get()
    }

    fn value(&self, command: Command) -> u8 {
        match command {
            Command::Temperature1 => self.temperature_1.get(),
            Command::Temperature2 => self.temperature_2.get(),
            Command::FanSpeed => self.fan_speed.get(),
        }
    }
}

impl SlaveHandler for PsuRegisters {
    fn handle_data(&self, _bus: usize, exchange: SlaveExchange<'_>) -> Result<SlaveFlow, Error> {
        match exchange {
            SlaveExchange::Received {
                index,
                general_call: true,
                ..
            } => {
                if index == 0 {
                    self.general_calls.set(self.general_calls.get() + 1);
                }
                Ok(SlaveFlow::More)
            }
            SlaveExchange::Received { index: 0, byte, .. } => {
                let command = Command::try_from(byte).inspect_err(|_| self.selected.set(None))?;
                self.selected.set(Some(command));
                Ok(SlaveFlow::More)
            }
            SlaveExchange::Received { byte, .. } => match self.selected.get() {
                Some(Command::FanSpeed) => {
                    self.fan_speed.set(byte);
                    Ok(SlaveFlow::LastByte)
                }
                // temperatures are read-only
                Some(_) => Ok(SlaveFlow::LastByte),
                None => Err(Error::UnknownCommand),
            },
            SlaveExchange::Requested { byte, .. } => {
                let command = self.selected.get().ok_or(Error::UnknownCommand)?;
                *byte = self.value(command);
                Ok(SlaveFlow::LastByte)
            }
        }
    }

    fn transmission_over(&self, _bus: usize) {
        self.transactions.set(self.transactions.get() + 1);
    }
}
