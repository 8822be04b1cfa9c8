// Licensed under the Apache-2.0 license

//! Master transmitter and receiver steps.

use crate::common::Logger;
use crate::twi::common::{Direction, Error, State};
use crate::twi::controller::{Instance, Payload};
use crate::twi::registers::{ControlRegister, Register, TwiRegisters, TWEA, TWSTA, TWSTO};
use crate::twi::status::StatusCode;
use crate::{twi_debug, twi_error};

impl Instance<'_, '_> {
    /// Sends STOP and fails the transaction once the retry budget is spent.
    fn give_up<L: Logger>(&mut self, bus: usize, control: ControlRegister<'_>, logger: &mut L) -> Result<(), Error> {
        control.trigger(TWSTO | TWEA);
        self.transaction.abort(Error::MaxRetriesHit);
        self.state = State::Ready;
        twi_error!(
            logger,
            "twi{}: 0x{:02X} gave up after {} attempts",
            bus,
            self.transaction.address,
            self.transaction.attempts
        );
        Err(Error::MaxRetriesHit)
    }

    /// Lost the bus to another master. Codes that also address us as a slave
    /// continue in the slave branch.
    fn lost_arbitration<L: Logger>(
        &mut self,
        bus: usize,
        regs: &dyn TwiRegisters,
        status: StatusCode,
        logger: &mut L,
    ) -> Result<(), Error> {
        self.transaction.abort(Error::ArbitrationLost);
        self.state = State::Ready;
        twi_debug!(logger, "twi{}: arbitration lost (0x{:02X})", bus, status.code());
        if status == StatusCode::ArbitrationLost {
            ControlRegister::new(regs).trigger(TWEA);
            return Err(Error::ArbitrationLost);
        }
        self.ready(bus, regs, status, logger)
    }

    fn master_unexpected<L: Logger>(
        &mut self,
        bus: usize,
        control: ControlRegister<'_>,
        status: StatusCode,
        logger: &mut L,
    ) -> Result<(), Error> {
        let error = Error::UnexpectedStatus(status.code());
        control.trigger(TWSTO | TWEA);
        self.transaction.abort(error);
        self.state = State::Ready;
        twi_error!(logger, "twi{}: unexpected 0x{:02X} as master", bus, status.code());
        Err(error)
    }

    fn send_command<L: Logger>(&mut self, bus: usize, regs: &dyn TwiRegisters, status: StatusCode, logger: &mut L) {
        self.transaction.repeated_start = status == StatusCode::RepeatedStart;
        regs.write(Register::Data, self.transaction.command);
        ControlRegister::new(regs).trigger(TWEA);
        if self.transaction.repeated_start {
            twi_debug!(logger, "twi{}: repeated START, SLA 0x{:02X}", bus, self.transaction.command);
        }
    }

    pub(crate) fn master_tx<L: Logger>(
        &mut self,
        bus: usize,
        regs: &dyn TwiRegisters,
        status: StatusCode,
        logger: &mut L,
    ) -> Result<(), Error> {
        let control = ControlRegister::new(regs);
        match status {
            StatusCode::StartTransmitted | StatusCode::RepeatedStart => {
                self.send_command(bus, regs, status, logger);
                Ok(())
            }
            StatusCode::SlaveWriteAck => {
                self.transaction.repeated_start = false;
                self.transaction.attempts = 0;
                match self.transaction.tx_byte() {
                    Some(byte) => {
                        regs.write(Register::Data, byte);
                        control.trigger(TWEA);
                        Ok(())
                    }
                    None => self.master_unexpected(bus, control, status, logger),
                }
            }
            StatusCode::SlaveWriteNack => {
                if self.transaction.retry_exhausted() {
                    return self.give_up(bus, control, logger);
                }
                control.trigger(TWSTA | TWEA);
                Ok(())
            }
            StatusCode::DataTransmittedAck => {
                self.transaction.index += 1;
                if matches!(self.transaction.payload, Payload::Receive(_)) {
                    // opcode written, turn around for the data phase
                    self.transaction.command = Direction::Read.address_byte(self.transaction.address);
                    self.transaction.index = 0;
                    self.state = State::MasterTxFinished;
                    control.trigger(TWSTA | TWEA);
                    return Ok(());
                }
                match self.transaction.tx_byte() {
                    Some(byte) => {
                        regs.write(Register::Data, byte);
                        control.trigger(TWEA);
                    }
                    None => {
                        control.trigger(TWSTO | TWEA);
                        self.transaction.outcome = Some(Ok(()));
                        self.state = State::MasterTxFinished;
                    }
                }
                Ok(())
            }
            StatusCode::DataTransmittedNack => {
                if self.transaction.retry_exhausted() {
                    return self.give_up(bus, control, logger);
                }
                match self.transaction.tx_byte() {
                    Some(byte) => {
                        regs.write(Register::Data, byte);
                        control.trigger(TWEA);
                        Ok(())
                    }
                    None => self.master_unexpected(bus, control, status, logger),
                }
            }
            _ if status.is_arbitration_lost() => self.lost_arbitration(bus, regs, status, logger),
            _ => self.master_unexpected(bus, control, status, logger),
        }
    }

    pub(crate) fn master_rx<L: Logger>(
        &mut self,
        bus: usize,
        regs: &dyn TwiRegisters,
        status: StatusCode,
        logger: &mut L,
    ) -> Result<(), Error> {
        let control = ControlRegister::new(regs);
        let len = self.transaction.payload.len();
        match status {
            StatusCode::StartTransmitted | StatusCode::RepeatedStart => {
                self.send_command(bus, regs, status, logger);
                Ok(())
            }
            StatusCode::SlaveReadAck => {
                self.transaction.repeated_start = false;
                self.transaction.attempts = 0;
                // NACK the only byte
                let ack = if len.saturating_sub(self.transaction.index) > 1 {
                    TWEA
                } else {
                    0
                };
                control.trigger(ack);
                Ok(())
            }
            StatusCode::SlaveReadNack => {
                if self.transaction.retry_exhausted() {
                    return self.give_up(bus, control, logger);
                }
                control.trigger(TWSTA | TWEA);
                Ok(())
            }
            StatusCode::DataReceivedAck => {
                if !self.store_received(regs) {
                    return self.master_unexpected(bus, control, status, logger);
                }
                let ack = if len.saturating_sub(self.transaction.index) > 1 {
                    TWEA
                } else {
                    0
                };
                control.trigger(ack);
                Ok(())
            }
            StatusCode::DataReceivedNack => {
                self.store_received(regs);
                if self.transaction.index >= len {
                    control.trigger(TWSTO | TWEA);
                    self.transaction.outcome = Some(Ok(()));
                    self.state = State::MasterRxFinished;
                    return Ok(());
                }
                if self.transaction.restart_exhausted() {
                    return self.give_up(bus, control, logger);
                }
                self.transaction.index = 0;
                control.trigger(TWSTA | TWEA);
                Ok(())
            }
            _ if status.is_arbitration_lost() => self.lost_arbitration(bus, regs, status, logger),
            _ => self.master_unexpected(bus, control, status, logger),
        }
    }

    /// Moves the data register into the receive buffer. False when the
    /// buffer is already full.
    fn store_received(&mut self, regs: &dyn TwiRegisters) -> bool {
        let transaction = &mut self.transaction;
        let Payload::Receive(buffer) = &mut transaction.payload else {
            return false;
        };
        match buffer.get_mut(transaction.index) {
            Some(slot) => {
                *slot = regs.read(Register::Data);
                transaction.index += 1;
                true
            }
            None => false,
        }
    }
}
