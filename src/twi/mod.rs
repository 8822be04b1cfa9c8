// Licensed under the Apache-2.0 license

//! Interrupt-driven TWI (I2C) driver for AVR peripherals.
//!
//! The driver is a state machine advanced by [`Twi::process`], one status
//! code at a time. It acts as a master (`write`, `read`) and, whenever
//! another master addresses it, as a slave serviced by a [`SlaveHandler`].
//! Register access goes through [`TwiRegisters`], so the same code runs on
//! hardware and against the bus simulator.

pub mod common;
pub mod controller;
#[cfg(feature = "hardware-atmega328p")]
pub mod hardware;
mod master;
pub mod registers;
mod slave;
pub mod status;
pub mod traits;

pub use common::{
    bitrate_for, Direction, Error, Prescaler, State, TwiConfig, TwiConfigBuilder,
    GENERAL_CALL_ADDRESS, MAX_ADDRESS, MAX_TRANSFER_LEN,
};
pub use controller::{Twi, TWI_INSTANCES};
pub use registers::{ControlRegister, Register, RegisterFile, TwiRegisters};
pub use status::StatusCode;
pub use traits::{NotConfigured, SlaveExchange, SlaveFlow, SlaveHandler};
