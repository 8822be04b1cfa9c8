// Licensed under the Apache-2.0 license

//! Simulated PSU register device.
//!
//! The first byte of a write selects a register, further bytes are written
//! to it with auto-increment. Reads return the selected register and
//! auto-increment as well. Only the fan speed is writable.

use core::cell::{Cell, RefCell};

use heapless::Vec;

use crate::psu::Command;
use crate::sim::interface::{BusDevice, BusEvent, DeviceInterface};

/// Bytes kept in the receive log.
pub const LOG_CAPACITY: usize = 32;

/// Value read from unmapped registers.
const UNMAPPED: u8 = 0xFF;

#[derive(Debug)]
pub struct FakeSlave {
    iface: DeviceInterface,
    pub temperature_1: Cell<u8>,
    pub temperature_2: Cell<u8>,
    pub fan_speed: Cell<u8>,
    /// NACK every data byte while set.
    pub nack_data: Cell<bool>,
    pointer: Cell<u8>,
    index: Cell<usize>,
    addressed: Cell<bool>,
    general_call: Cell<bool>,
    general_calls: Cell<usize>,
    transactions: Cell<usize>,
    received: RefCell<Vec<u8, LOG_CAPACITY>>,
}

impl FakeSlave {
    #[must_use]
    pub fn new(address: u8) -> Self {
        let iface = DeviceInterface::new();
        iface.address.set(address);
        iface.enabled.set(true);
        iface.ack.set(true);
        Self {
            iface,
            temperature_1: Cell::new(0),
            temperature_2: Cell::new(0),
            fan_speed: Cell::new(0),
            nack_data: Cell::new(false),
            pointer: Cell::new(0),
            index: Cell::new(0),
            addressed: Cell::new(false),
            general_call: Cell::new(false),
            general_calls: Cell::new(0),
            transactions: Cell::new(0),
            received: RefCell::new(Vec::new()),
        }
    }

    /// Register currently selected for the next access.
    #[must_use]
    pub fn pointer(&self) -> u8 {
        self.pointer.get()
    }

    /// Transfers that ended while this device was selected.
    #[must_use]
    pub fn transactions(&self) -> usize {
        self.transactions.get()
    }

    #[must_use]
    pub fn general_calls(&self) -> usize {
        self.general_calls.get()
    }

    /// Every data byte written to this device, oldest first.
    #[must_use]
    pub fn received(&self) -> Vec<u8, LOG_CAPACITY> {
        self.received.borrow().clone()
    }

    fn register(&self, selector: u8) -> u8 {
        match Command::try_from(selector) {
            Ok(Command::Temperature1) => self.temperature_1.get(),
            Ok(Command::Temperature2) => self.temperature_2.get(),
            Ok(Command::FanSpeed) => self.fan_speed.get(),
            Err(_) => UNMAPPED,
        }
    }

    fn store(&self, selector: u8, value: u8) {
        if let Ok(Command::FanSpeed) = Command::try_from(selector) {
            self.fan_speed.set(value);
        }
    }

    fn received_byte(&self, byte: u8) {
        let _ = self.received.borrow_mut().push(byte);
        if self.general_call.get() {
            return;
        }
        if self.index.get() == 0 {
            self.pointer.set(byte);
        } else {
            self.store(self.pointer.get(), byte);
            self.pointer.set(self.pointer.get().wrapping_add(1));
        }
    }

    fn finish(&self) {
        if self.addressed.replace(false) {
            self.transactions.set(self.transactions.get() + 1);
        }
        self.general_call.set(false);
        self.iface.ack.set(true);
    }
}

impl BusDevice for FakeSlave {
    fn interface(&self) -> &DeviceInterface {
        &self.iface
    }

    fn process(&self) {
        let Some(event) = self.iface.take_event() else {
            return;
        };
        match event {
            BusEvent::Addressed { read, general_call } => {
                self.addressed.set(true);
                self.general_call.set(general_call);
                self.index.set(0);
                if general_call {
                    self.general_calls.set(self.general_calls.get() + 1);
                }
                if read {
                    self.iface.data.set(self.register(self.pointer.get()));
                }
                self.iface.ack.set(!self.nack_data.get());
            }
            BusEvent::DataReceived { byte, acked } if self.addressed.get() => {
                if acked {
                    self.received_byte(byte);
                    self.index.set(self.index.get() + 1);
                } else {
                    self.finish();
                }
            }
            BusEvent::DataSent { acked } if self.addressed.get() => {
                self.pointer.set(self.pointer.get().wrapping_add(1));
                if acked {
                    self.iface.data.set(self.register(self.pointer.get()));
                } else {
                    self.finish();
                }
            }
            BusEvent::Stop => self.finish(),
            _ => {}
        }
    }
}
