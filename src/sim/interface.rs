// Licensed under the Apache-2.0 license

//! The wire-level view a simulated device exposes to the bus.

use core::cell::Cell;

/// What the bus did to a device during the last step. Consumed by the
/// device's own `process`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusEvent {
    /// This device's START (or repeated START) went out on the bus.
    Start { repeated: bool },
    /// Another master started a transfer.
    StartObserved,
    /// This device, as master, sent the address byte.
    AddressSent { read: bool, acked: bool },
    /// This device was selected as slave.
    Addressed { read: bool, general_call: bool },
    /// A data byte left this device; `acked` is the receiver's answer.
    DataSent { acked: bool },
    /// A data byte arrived; `acked` is this device's own answer.
    DataReceived { byte: u8, acked: bool },
    /// STOP or repeated START ended the transfer this device took part in.
    Stop,
}

/// Line-level interface of one bus participant.
///
/// The device writes its requests (`start`, `stop`, `data`, `ack`) and the
/// simulator consumes them. `ready` is false while the device still holds
/// the clock low.
#[derive(Debug)]
pub struct DeviceInterface {
    pub start: Cell<bool>,
    pub stop: Cell<bool>,
    pub ready: Cell<bool>,
    pub data: Cell<u8>,
    pub ack: Cell<bool>,
    /// Seven-bit slave address.
    pub address: Cell<u8>,
    /// Address bits ignored during matching.
    pub address_mask: Cell<u8>,
    pub general_call_enabled: Cell<bool>,
    pub enabled: Cell<bool>,
    pub lost_arbitration: Cell<bool>,
    pub event: Cell<Option<BusEvent>>,
}

impl Default for DeviceInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceInterface {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start: Cell::new(false),
            stop: Cell::new(false),
            ready: Cell::new(true),
            data: Cell::new(0xFF),
            ack: Cell::new(false),
            address: Cell::new(0),
            address_mask: Cell::new(0),
            general_call_enabled: Cell::new(false),
            enabled: Cell::new(false),
            lost_arbitration: Cell::new(false),
            event: Cell::new(None),
        }
    }

    pub fn post(&self, event: BusEvent) {
        self.event.set(Some(event));
    }

    pub fn take_event(&self) -> Option<BusEvent> {
        self.event.take()
    }

    /// Whether this device answers a transfer to `address`.
    #[must_use]
    pub fn answers(&self, address: u8, read: bool) -> bool {
        if !self.enabled.get() || !self.ack.get() {
            return false;
        }
        if address == 0 {
            return !read && self.general_call_enabled.get();
        }
        (address ^ self.address.get()) & !self.address_mask.get() & 0x7F == 0
    }
}

/// A participant on the simulated bus.
pub trait BusDevice {
    fn interface(&self) -> &DeviceInterface;

    /// Reacts to the event posted by the last bus step.
    fn process(&self);
}
