// Licensed under the Apache-2.0 license

//! Simulated TWI peripheral.
//!
//! `TwiDevice` sits between a driver instance and the simulated bus: bus
//! events become status codes in the instance's [`RegisterFile`], commands
//! the driver writes to the control register become line requests on the
//! [`DeviceInterface`]. The driver is serviced the way firmware would do it:
//! from the interrupt (only while TWINT is set) when TWIE is enabled, from a
//! polling loop on every tick otherwise.

use core::cell::{Cell, RefCell};

use crate::common::{Logger, NoOpLogger};
use crate::sim::interface::{BusDevice, BusEvent, DeviceInterface};
use crate::twi::registers::{
    Register, RegisterFile, ADDRESS_SHIFT, GENERAL_CALL_BIT, TWEA, TWEN, TWIE, TWINT, TWSTA,
    TWSTO,
};
use crate::twi::{Error, StatusCode, Twi, TWI_INSTANCES};

pub struct TwiDevice<'a, 'r, 'b, L: Logger = NoOpLogger, const N: usize = TWI_INSTANCES> {
    twi: &'a RefCell<Twi<'r, 'b, L, N>>,
    id: usize,
    regs: &'a RegisterFile,
    iface: DeviceInterface,
    /// Owns the bus as master.
    master: Cell<bool>,
    /// Selected as slave by the current transfer.
    addressed: Cell<bool>,
    general_call: Cell<bool>,
    /// Lost the START; the loss is reported after the address phase.
    arbitration_lost: Cell<bool>,
    last_error: Cell<Option<Error>>,
}

impl<'a, 'r, 'b, L: Logger, const N: usize> TwiDevice<'a, 'r, 'b, L, N> {
    /// `regs` must be the register file bound to instance `id` of `twi`.
    pub fn new(twi: &'a RefCell<Twi<'r, 'b, L, N>>, id: usize, regs: &'a RegisterFile) -> Self {
        Self {
            twi,
            id,
            regs,
            iface: DeviceInterface::new(),
            master: Cell::new(false),
            addressed: Cell::new(false),
            general_call: Cell::new(false),
            arbitration_lost: Cell::new(false),
            last_error: Cell::new(None),
        }
    }

    /// Last error returned by `process`, cleared by reading it.
    pub fn take_error(&self) -> Option<Error> {
        self.last_error.take()
    }

    /// Presents an illegal START/STOP to the driver.
    pub fn inject_bus_error(&self) {
        self.regs.raise(StatusCode::IllegalStartStop.code());
    }

    fn service(&self) {
        let Ok(mut twi) = self.twi.try_borrow_mut() else {
            return;
        };
        if let Err(error) = twi.process(self.id) {
            self.last_error.set(Some(error));
        }
    }

    fn status_for(&self, event: BusEvent) -> Option<StatusCode> {
        let status = match event {
            BusEvent::Start { repeated } => {
                self.master.set(true);
                if repeated {
                    StatusCode::RepeatedStart
                } else {
                    StatusCode::StartTransmitted
                }
            }
            BusEvent::StartObserved => return None,
            BusEvent::AddressSent { read, acked } => match (read, acked) {
                (false, true) => StatusCode::SlaveWriteAck,
                (false, false) => StatusCode::SlaveWriteNack,
                (true, true) => StatusCode::SlaveReadAck,
                (true, false) => StatusCode::SlaveReadNack,
            },
            BusEvent::Addressed { read, general_call } => {
                self.addressed.set(true);
                self.general_call.set(general_call);
                if read {
                    StatusCode::OwnAddressRead
                } else if general_call {
                    StatusCode::GeneralCall
                } else {
                    StatusCode::OwnAddressWrite
                }
            }
            BusEvent::DataSent { acked } if self.master.get() => {
                if acked {
                    StatusCode::DataTransmittedAck
                } else {
                    StatusCode::DataTransmittedNack
                }
            }
            BusEvent::DataSent { acked } if self.addressed.get() => {
                let last = self.regs.peek(Register::Control) & TWEA == 0;
                if !acked {
                    self.addressed.set(false);
                    StatusCode::SlaveDataTransmittedNack
                } else if last {
                    self.addressed.set(false);
                    StatusCode::SlaveLastDataTransmittedAck
                } else {
                    StatusCode::SlaveDataTransmittedAck
                }
            }
            BusEvent::DataReceived { byte, acked } if self.master.get() => {
                self.regs.load_data(byte);
                if acked {
                    StatusCode::DataReceivedAck
                } else {
                    StatusCode::DataReceivedNack
                }
            }
            BusEvent::DataReceived { byte, acked } if self.addressed.get() => {
                self.regs.load_data(byte);
                let general_call = self.general_call.get();
                if !acked {
                    self.addressed.set(false);
                }
                match (general_call, acked) {
                    (false, true) => StatusCode::SlaveDataReceivedAck,
                    (false, false) => StatusCode::SlaveDataReceivedNack,
                    (true, true) => StatusCode::GeneralCallDataReceivedAck,
                    (true, false) => StatusCode::GeneralCallDataReceivedNack,
                }
            }
            BusEvent::Stop if self.addressed.replace(false) => StatusCode::StopOrRepeatedStart,
            BusEvent::DataSent { .. } | BusEvent::DataReceived { .. } | BusEvent::Stop => {
                return None
            }
        };
        Some(status)
    }

    /// Status after losing arbitration: addressed by the winner, or plain
    /// loss.
    fn lost_status(&self, event: Option<BusEvent>) -> StatusCode {
        match event.and_then(|event| self.status_for(event)) {
            Some(StatusCode::OwnAddressWrite) => StatusCode::ArbitrationLostOwnAddressWrite,
            Some(StatusCode::GeneralCall) => StatusCode::ArbitrationLostGeneralCall,
            Some(StatusCode::OwnAddressRead) => StatusCode::ArbitrationLostOwnAddressRead,
            _ => StatusCode::ArbitrationLost,
        }
    }

    /// Turns the last control write into line requests. True when a STOP
    /// released the bus.
    fn apply_command(&self) -> bool {
        if !self.regs.take_command() {
            return false;
        }
        let control = self.regs.peek(Register::Control);
        let mut released = false;
        if control & TWSTO != 0 {
            self.regs.complete_stop();
            if self.master.replace(false) {
                self.iface.stop.set(true);
                released = true;
            }
        }
        if control & TWSTA != 0 {
            self.iface.start.set(true);
        }
        self.iface.data.set(self.regs.peek(Register::Data));
        released
    }

    fn refresh(&self) {
        let control = self.regs.peek(Register::Control);
        let address = self.regs.peek(Register::Address);
        self.iface.ack.set(control & TWEA != 0);
        self.iface.ready.set(control & TWINT == 0);
        self.iface.enabled.set(control & TWEN != 0);
        self.iface.address.set(address >> ADDRESS_SHIFT);
        self.iface
            .general_call_enabled
            .set(address & GENERAL_CALL_BIT != 0);
        self.iface
            .address_mask
            .set(self.regs.peek(Register::AddressMask) >> ADDRESS_SHIFT);
    }
}

impl<L: Logger, const N: usize> BusDevice for TwiDevice<'_, '_, '_, L, N> {
    fn interface(&self) -> &DeviceInterface {
        &self.iface
    }

    fn process(&self) {
        let event = self.iface.take_event();
        if self.iface.lost_arbitration.replace(false) {
            self.master.set(false);
            self.arbitration_lost.set(true);
        } else if self.arbitration_lost.replace(false) {
            self.regs.raise(self.lost_status(event).code());
        } else if let Some(status) = event.and_then(|event| self.status_for(event)) {
            self.regs.raise(status.code());
        }

        let interrupt_mode = self.regs.peek(Register::Control) & TWIE != 0;
        if !interrupt_mode || self.regs.peek(Register::Control) & TWINT != 0 {
            self.service();
        }
        if self.apply_command() && interrupt_mode {
            // idle-loop poll once the bus is released
            self.service();
        }
        self.refresh();
    }
}
