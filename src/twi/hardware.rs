// Licensed under the Apache-2.0 license

//! # Memory-mapped TWI registers of the ATmega328P family
//!
//! The ATmega328P has one TWI peripheral (TWI0); the ATmega328PB adds a
//! second one (TWI1). Both use the same six-register layout, so a single
//! [`MmioRegisters`] type covers either block and the driver's instance
//! table can hold both behind `&dyn TwiRegisters`:
//!
//! ```rust,ignore
//! use labpsu_twi::twi::hardware::instantiate_hardware;
//! use labpsu_twi::twi::{Twi, TwiConfigBuilder};
//!
//! // SAFETY: called once at startup, before interrupts are enabled.
//! let blocks = unsafe { instantiate_hardware() };
//! let mut twi: Twi = Twi::default();
//! for (id, block) in blocks.iter().enumerate() {
//!     let config = TwiConfigBuilder::new().handle(block).bitrate(72).build();
//!     twi.init(id, &config)?;
//! }
//! ```

use crate::twi::registers::{Register, TwiRegisters};

/// Data-space address of TWBR0.
pub const TWI0_BASE: usize = 0xB8;
/// Data-space address of TWBR1 (ATmega328PB only).
pub const TWI1_BASE: usize = 0xD8;

/// Register block of one TWI peripheral, accessed with volatile loads and
/// stores.
#[derive(Debug)]
pub struct MmioRegisters {
    base: usize,
}

impl MmioRegisters {
    /// # Safety
    ///
    /// `base` must be the address of a TWI register block and no other
    /// handle may drive the same block.
    #[must_use]
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn address(&self, register: Register) -> *mut u8 {
        (self.base + register.offset()) as *mut u8
    }
}

impl TwiRegisters for MmioRegisters {
    fn read(&self, register: Register) -> u8 {
        // SAFETY: the address lies inside the block guaranteed by `new`.
        unsafe { core::ptr::read_volatile(self.address(register)) }
    }

    fn write(&self, register: Register, value: u8) {
        // SAFETY: as above.
        unsafe { core::ptr::write_volatile(self.address(register), value) }
    }
}

/// Handles for both TWI blocks of an ATmega328PB.
///
/// # Safety
///
/// Must be called at most once; the returned handles are the only owners of
/// the register blocks.
#[must_use]
pub unsafe fn instantiate_hardware() -> [MmioRegisters; 2] {
    [MmioRegisters::new(TWI0_BASE), MmioRegisters::new(TWI1_BASE)]
}
