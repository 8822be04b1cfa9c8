// Licensed under the Apache-2.0 license

//! Scripted bus master.
//!
//! Runs one write, read, or write-then-read (joined by a repeated START)
//! per request and reports how it ended. It never retries.

use core::cell::{Cell, RefCell};

use heapless::Vec;

use crate::sim::interface::{BusDevice, BusEvent, DeviceInterface};
use crate::sim::SimError;
use crate::twi::{Direction, MAX_ADDRESS};

/// Largest transfer the fake master can script.
pub const SCRIPT_CAPACITY: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MasterOutcome {
    Idle,
    Pending,
    Completed,
    /// Address or data byte was not acknowledged.
    Nacked,
    ArbitrationLost,
}

#[derive(Debug)]
pub struct FakeMaster {
    iface: DeviceInterface,
    address: Cell<u8>,
    transmit: RefCell<Vec<u8, SCRIPT_CAPACITY>>,
    tx_index: Cell<usize>,
    receive_len: Cell<usize>,
    received: RefCell<Vec<u8, SCRIPT_CAPACITY>>,
    outcome: Cell<MasterOutcome>,
}

impl Default for FakeMaster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMaster {
    #[must_use]
    pub fn new() -> Self {
        let iface = DeviceInterface::new();
        iface.enabled.set(true);
        Self {
            iface,
            address: Cell::new(0),
            transmit: RefCell::new(Vec::new()),
            tx_index: Cell::new(0),
            receive_len: Cell::new(0),
            received: RefCell::new(Vec::new()),
            outcome: Cell::new(MasterOutcome::Idle),
        }
    }

    /// # Errors
    ///
    /// See [`write_read`](Self::write_read).
    pub fn write(&self, address: u8, data: &[u8]) -> Result<(), SimError> {
        self.write_read(address, data, 0)
    }

    /// # Errors
    ///
    /// See [`write_read`](Self::write_read).
    pub fn read(&self, address: u8, len: usize) -> Result<(), SimError> {
        self.write_read(address, &[], len)
    }

    /// Writes `data`, then reads `len` bytes after a repeated START. Either
    /// part may be empty, not both.
    ///
    /// # Errors
    ///
    /// `Busy` while a request runs, `InvalidRequest` for an empty request,
    /// an address above 0x7F or more than [`SCRIPT_CAPACITY`] bytes.
    pub fn write_read(&self, address: u8, data: &[u8], len: usize) -> Result<(), SimError> {
        if self.outcome.get() == MasterOutcome::Pending {
            return Err(SimError::Busy);
        }
        if address > MAX_ADDRESS || (data.is_empty() && len == 0) || len > SCRIPT_CAPACITY {
            return Err(SimError::InvalidRequest);
        }
        let transmit = Vec::from_slice(data).map_err(|()| SimError::InvalidRequest)?;
        *self.transmit.borrow_mut() = transmit;
        self.received.borrow_mut().clear();
        self.address.set(address);
        self.tx_index.set(0);
        self.receive_len.set(len);
        self.outcome.set(MasterOutcome::Pending);
        self.iface.start.set(true);
        Ok(())
    }

    #[must_use]
    pub fn outcome(&self) -> MasterOutcome {
        self.outcome.get()
    }

    #[must_use]
    pub fn received(&self) -> Vec<u8, SCRIPT_CAPACITY> {
        self.received.borrow().clone()
    }

    fn end(&self, outcome: MasterOutcome) {
        self.outcome.set(outcome);
        self.iface.stop.set(true);
    }

    fn writing(&self) -> bool {
        self.tx_index.get() < self.transmit.borrow().len()
    }

    /// ACK unless the next byte is the last one wanted.
    fn ack_next(&self) {
        let remaining = self
            .receive_len
            .get()
            .saturating_sub(self.received.borrow().len());
        self.iface.ack.set(remaining > 1);
    }
}

impl BusDevice for FakeMaster {
    fn interface(&self) -> &DeviceInterface {
        &self.iface
    }

    fn process(&self) {
        let event = self.iface.take_event();
        if self.iface.lost_arbitration.replace(false) {
            self.outcome.set(MasterOutcome::ArbitrationLost);
            return;
        }
        let Some(event) = event else {
            return;
        };
        match event {
            BusEvent::Start { .. } => {
                let direction = if self.writing() {
                    Direction::Write
                } else {
                    Direction::Read
                };
                self.iface.data.set(direction.address_byte(self.address.get()));
            }
            BusEvent::AddressSent { acked: false, .. } => self.end(MasterOutcome::Nacked),
            BusEvent::AddressSent { read: true, .. } => self.ack_next(),
            BusEvent::AddressSent { read: false, .. } => {
                let first = self.transmit.borrow().first().copied();
                if let Some(byte) = first {
                    self.iface.data.set(byte);
                }
            }
            BusEvent::DataSent { acked: false } => self.end(MasterOutcome::Nacked),
            BusEvent::DataSent { acked: true } => {
                self.tx_index.set(self.tx_index.get() + 1);
                let next = self.transmit.borrow().get(self.tx_index.get()).copied();
                match next {
                    Some(byte) => self.iface.data.set(byte),
                    None if self.receive_len.get() > 0 => self.iface.start.set(true),
                    None => self.end(MasterOutcome::Completed),
                }
            }
            BusEvent::DataReceived { byte, .. } => {
                let full = {
                    let mut received = self.received.borrow_mut();
                    let _ = received.push(byte);
                    received.len() >= self.receive_len.get()
                };
                if full {
                    self.end(MasterOutcome::Completed);
                } else {
                    self.ack_next();
                }
            }
            BusEvent::StartObserved | BusEvent::Addressed { .. } | BusEvent::Stop => {}
        }
    }
}
