// Licensed under the Apache-2.0 license

//! TWI register handle.
//!
//! The driver touches the peripheral exclusively through a [`TwiRegisters`]
//! handle. On target the handle is memory mapped (see
//! [`hardware`](crate::twi::hardware)); in tests it is a [`RegisterFile`] that
//! the simulated peripheral shares with the driver.

use core::cell::Cell;

/// Interrupt enable.
pub const TWIE: u8 = 1 << 0;
/// Peripheral enable.
pub const TWEN: u8 = 1 << 2;
/// Write collision flag.
pub const TWWC: u8 = 1 << 3;
/// STOP condition.
pub const TWSTO: u8 = 1 << 4;
/// START condition.
pub const TWSTA: u8 = 1 << 5;
/// Enable acknowledge.
pub const TWEA: u8 = 1 << 6;
/// Interrupt flag, cleared by writing one.
pub const TWINT: u8 = 1 << 7;

/// Prescaler bits of the status register.
pub const PRESCALER_MASK: u8 = 0x07;
/// Status code bits of the status register.
pub const STATUS_MASK: u8 = 0xF8;
/// General call recognition bit of the address register.
pub const GENERAL_CALL_BIT: u8 = 0x01;
/// Seven-bit address field of the address and address-mask registers.
pub const ADDRESS_MASK: u8 = 0xFE;
pub const ADDRESS_SHIFT: u8 = 1;

/// Control bits that survive every command written to the peripheral.
const PERSISTENT_BITS: u8 = TWEN | TWIE;

/// Registers of one TWI peripheral.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    Bitrate,
    Status,
    Address,
    Data,
    Control,
    AddressMask,
}

impl Register {
    /// Offset from the bitrate register, matching the AVR data-space layout
    /// (TWBR, TWSR, TWAR, TWDR, TWCR, TWAMR).
    #[must_use]
    pub const fn offset(self) -> usize {
        match self {
            Register::Bitrate => 0,
            Register::Status => 1,
            Register::Address => 2,
            Register::Data => 3,
            Register::Control => 4,
            Register::AddressMask => 5,
        }
    }
}

/// Byte-wide access to the registers of one TWI peripheral.
///
/// Accesses take `&self` because the storage behind a handle is hardware (or a
/// cell standing in for it) and changes outside the driver's control.
pub trait TwiRegisters {
    fn read(&self, register: Register) -> u8;
    fn write(&self, register: Register, value: u8);
}

/// Write discipline for the control register.
///
/// Writing one to TWINT clears the interrupt flag and starts the next bus
/// operation, so a control write is either a deliberate command
/// ([`trigger`](Self::trigger)) or a configuration change that must never
/// carry TWINT ([`update`](Self::update)). Both are a single store.
#[derive(Clone, Copy)]
pub struct ControlRegister<'r> {
    regs: &'r dyn TwiRegisters,
}

impl<'r> ControlRegister<'r> {
    pub fn new(regs: &'r dyn TwiRegisters) -> Self {
        Self { regs }
    }

    /// Clears TWINT and starts the next operation described by `flags`
    /// (any of TWSTA, TWSTO, TWEA). Enable and interrupt-enable bits keep their
    /// current value.
    pub fn trigger(self, flags: u8) {
        let persistent = self.regs.read(Register::Control) & PERSISTENT_BITS;
        let flags = flags & (TWSTA | TWSTO | TWEA);
        self.regs
            .write(Register::Control, TWINT | persistent | flags);
    }

    /// Changes the bits selected by `mask` without acknowledging a pending
    /// interrupt.
    pub fn update(self, mask: u8, value: u8) {
        let current = self.regs.read(Register::Control);
        let next = ((current & !mask) | (value & mask)) & !TWINT;
        self.regs.write(Register::Control, next);
    }

    #[must_use]
    pub fn interrupt_pending(self) -> bool {
        self.regs.read(Register::Control) & TWINT != 0
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.regs.read(Register::Control)
    }
}

/// Cell-backed register block behaving like the peripheral's register file.
///
/// Writes through [`TwiRegisters`] follow the hardware rules: writing one to
/// TWINT clears it (and the status reads 0xF8 until the next event), only the
/// prescaler bits of the status register are writable. The peripheral side
/// (a simulator or a test) uses the inherent methods to raise status codes
/// and observe commands.
#[derive(Debug)]
pub struct RegisterFile {
    bitrate: Cell<u8>,
    status: Cell<u8>,
    address: Cell<u8>,
    data: Cell<u8>,
    control: Cell<u8>,
    address_mask: Cell<u8>,
    command_pending: Cell<bool>,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bitrate: Cell::new(0),
            status: Cell::new(STATUS_MASK),
            address: Cell::new(0),
            data: Cell::new(0),
            control: Cell::new(0),
            address_mask: Cell::new(0),
            command_pending: Cell::new(false),
        }
    }

    fn cell(&self, register: Register) -> &Cell<u8> {
        match register {
            Register::Bitrate => &self.bitrate,
            Register::Status => &self.status,
            Register::Address => &self.address,
            Register::Data => &self.data,
            Register::Control => &self.control,
            Register::AddressMask => &self.address_mask,
        }
    }

    /// Raw register contents, bypassing write semantics.
    #[must_use]
    pub fn peek(&self, register: Register) -> u8 {
        self.cell(register).get()
    }

    /// Raw store, bypassing write semantics.
    pub fn poke(&self, register: Register, value: u8) {
        self.cell(register).set(value);
    }

    /// Presents `status` and sets TWINT, as the peripheral does at the end of
    /// every bus event.
    pub fn raise(&self, status: u8) {
        let prescaler = self.status.get() & PRESCALER_MASK;
        self.status.set((status & STATUS_MASK) | prescaler);
        self.control.set(self.control.get() | TWINT);
    }

    /// Loads a byte shifted in from the bus.
    pub fn load_data(&self, value: u8) {
        self.data.set(value);
    }

    /// True once per control write that cleared TWINT.
    pub fn take_command(&self) -> bool {
        self.command_pending.replace(false)
    }

    /// STOP has been put on the bus; hardware clears TWSTO by itself.
    pub fn complete_stop(&self) {
        self.control.set(self.control.get() & !TWSTO);
    }
}

impl TwiRegisters for RegisterFile {
    fn read(&self, register: Register) -> u8 {
        self.cell(register).get()
    }

    fn write(&self, register: Register, value: u8) {
        match register {
            Register::Control => {
                let current = self.control.get();
                let mut next = (value & !TWINT) | (current & TWINT);
                if value & TWINT != 0 {
                    next &= !TWINT;
                    self.command_pending.set(true);
                    let prescaler = self.status.get() & PRESCALER_MASK;
                    self.status.set(STATUS_MASK | prescaler);
                }
                self.control.set(next);
            }
            Register::Status => {
                let status = self.status.get() & STATUS_MASK;
                self.status.set(status | (value & PRESCALER_MASK));
            }
            _ => self.cell(register).set(value),
        }
    }
}
