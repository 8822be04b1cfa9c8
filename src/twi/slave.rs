// Licensed under the Apache-2.0 license

//! Slave receiver and transmitter steps, and the idle-state branch that
//! detects being addressed.

use crate::common::Logger;
use crate::twi::common::{Error, State};
use crate::twi::controller::Instance;
use crate::twi::registers::{ControlRegister, Register, TwiRegisters, TWEA};
use crate::twi::status::StatusCode;
use crate::twi::traits::{SlaveExchange, SlaveFlow};
use crate::{twi_debug, twi_error};

/// Byte shifted out when the handler has nothing to send.
const IDLE_BYTE: u8 = 0xFF;

impl Instance<'_, '_> {
    pub(crate) fn ready<L: Logger>(
        &mut self,
        bus: usize,
        regs: &dyn TwiRegisters,
        status: StatusCode,
        logger: &mut L,
    ) -> Result<(), Error> {
        let control = ControlRegister::new(regs);
        match status {
            StatusCode::OwnAddressWrite
            | StatusCode::ArbitrationLostOwnAddressWrite
            | StatusCode::GeneralCall
            | StatusCode::ArbitrationLostGeneralCall => {
                if status.is_arbitration_lost() {
                    self.transaction.abort(Error::ArbitrationLost);
                }
                self.state = State::SlaveReceiving;
                self.slave_index = 0;
                self.general_call = matches!(
                    status,
                    StatusCode::GeneralCall | StatusCode::ArbitrationLostGeneralCall
                );
                twi_debug!(logger, "twi{}: addressed for write (0x{:02X})", bus, status.code());
                control.trigger(TWEA);
                Ok(())
            }
            StatusCode::OwnAddressRead | StatusCode::ArbitrationLostOwnAddressRead => {
                if status.is_arbitration_lost() {
                    self.transaction.abort(Error::ArbitrationLost);
                }
                self.state = State::SlaveTransmitting;
                self.slave_index = 0;
                self.general_call = false;
                twi_debug!(logger, "twi{}: addressed for read", bus);
                self.slave_transmit(bus, regs, logger)
            }
            _ => {
                // stale event, keep listening
                twi_debug!(logger, "twi{}: stray status 0x{:02X}", bus, status.code());
                control.trigger(TWEA);
                Ok(())
            }
        }
    }

    /// Asks the handler for the next byte and loads it.
    fn slave_transmit<L: Logger>(
        &mut self,
        bus: usize,
        regs: &dyn TwiRegisters,
        logger: &mut L,
    ) -> Result<(), Error> {
        let control = ControlRegister::new(regs);
        let mut byte = IDLE_BYTE;
        let exchange = SlaveExchange::Requested {
            index: self.slave_index,
            byte: &mut byte,
        };
        let flow = self.handler.handle_data(bus, exchange);
        self.slave_index += 1;
        match flow {
            Ok(SlaveFlow::More) => {
                regs.write(Register::Data, byte);
                control.trigger(TWEA);
                Ok(())
            }
            Ok(SlaveFlow::LastByte) => {
                regs.write(Register::Data, byte);
                control.trigger(0);
                Ok(())
            }
            Err(error) => {
                self.slave_errors = self.slave_errors.saturating_add(1);
                regs.write(Register::Data, IDLE_BYTE);
                control.trigger(0);
                twi_error!(logger, "twi{}: slave transmit failed: {}", bus, error);
                Err(error)
            }
        }
    }

    /// Ends the slave transfer and re-arms address recognition.
    fn end_transfer(&mut self, bus: usize, control: ControlRegister<'_>) {
        self.handler.transmission_over(bus);
        self.state = State::Ready;
        self.slave_index = 0;
        self.general_call = false;
        control.trigger(TWEA);
    }

    fn slave_unexpected<L: Logger>(
        &mut self,
        bus: usize,
        control: ControlRegister<'_>,
        status: StatusCode,
        logger: &mut L,
    ) -> Result<(), Error> {
        self.end_transfer(bus, control);
        twi_error!(logger, "twi{}: unexpected 0x{:02X} as slave", bus, status.code());
        Err(Error::UnexpectedStatus(status.code()))
    }

    pub(crate) fn slave_rx<L: Logger>(
        &mut self,
        bus: usize,
        regs: &dyn TwiRegisters,
        status: StatusCode,
        logger: &mut L,
    ) -> Result<(), Error> {
        let control = ControlRegister::new(regs);
        match status {
            StatusCode::SlaveDataReceivedAck | StatusCode::GeneralCallDataReceivedAck => {
                let exchange = SlaveExchange::Received {
                    index: self.slave_index,
                    byte: regs.read(Register::Data),
                    general_call: self.general_call,
                };
                self.slave_index += 1;
                match self.handler.handle_data(bus, exchange) {
                    Ok(SlaveFlow::More) => {
                        control.trigger(TWEA);
                        Ok(())
                    }
                    Ok(SlaveFlow::LastByte) => {
                        control.trigger(0);
                        Ok(())
                    }
                    Err(error) => {
                        self.slave_errors = self.slave_errors.saturating_add(1);
                        control.trigger(0);
                        twi_error!(logger, "twi{}: slave receive failed: {}", bus, error);
                        Err(error)
                    }
                }
            }
            StatusCode::SlaveDataReceivedNack
            | StatusCode::GeneralCallDataReceivedNack
            | StatusCode::StopOrRepeatedStart => {
                self.end_transfer(bus, control);
                Ok(())
            }
            _ => self.slave_unexpected(bus, control, status, logger),
        }
    }

    pub(crate) fn slave_tx<L: Logger>(
        &mut self,
        bus: usize,
        regs: &dyn TwiRegisters,
        status: StatusCode,
        logger: &mut L,
    ) -> Result<(), Error> {
        let control = ControlRegister::new(regs);
        match status {
            StatusCode::SlaveDataTransmittedAck => self.slave_transmit(bus, regs, logger),
            StatusCode::SlaveDataTransmittedNack
            | StatusCode::SlaveLastDataTransmittedAck
            | StatusCode::StopOrRepeatedStart => {
                self.end_transfer(bus, control);
                Ok(())
            }
            _ => self.slave_unexpected(bus, control, status, logger),
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    use crate::common::NoOpLogger;
    use crate::twi::common::{Error, State, TwiConfigBuilder};
    use crate::twi::registers::{Register, RegisterFile, TWEA};
    use crate::twi::traits::{SlaveExchange, SlaveFlow, SlaveHandler};
    use crate::twi::Twi;

    type TestTwi<'a> = Twi<'a, 'a, NoOpLogger, 2>;

    /// Records received bytes and answers reads with an incrementing pattern.
    #[derive(Default)]
    struct Recorder {
        received: RefCell<Vec<(usize, usize, u8, bool)>>,
        last_after: Cell<usize>,
        finished: Cell<usize>,
    }

    impl SlaveHandler for Recorder {
        fn handle_data(&self, bus: usize, exchange: SlaveExchange<'_>) -> Result<SlaveFlow, Error> {
            let index = match exchange {
                SlaveExchange::Received {
                    index,
                    byte,
                    general_call,
                } => {
                    self.received
                        .borrow_mut()
                        .push((bus, index, byte, general_call));
                    index
                }
                SlaveExchange::Requested { index, byte } => {
                    *byte = 0xA0 + index as u8;
                    index
                }
            };
            if self.last_after.get() != 0 && index + 1 >= self.last_after.get() {
                Ok(SlaveFlow::LastByte)
            } else {
                Ok(SlaveFlow::More)
            }
        }

        fn transmission_over(&self, _bus: usize) {
            self.finished.set(self.finished.get() + 1);
        }
    }

    fn step(twi: &mut TestTwi<'_>, regs: &RegisterFile, id: usize, status: u8) -> Result<(), Error> {
        regs.raise(status);
        twi.process(id)
    }

    fn initialised<'a>(regs: &'a RegisterFile, id: usize) -> TestTwi<'a> {
        let mut twi = TestTwi::new(NoOpLogger);
        let config = TwiConfigBuilder::new()
            .handle(regs)
            .slave_address(0x30)
            .general_call(true)
            .build();
        twi.init(id, &config).unwrap();
        twi
    }

    #[test]
    fn test_slave_receive_reaches_handler_of_serviced_instance() {
        let regs = RegisterFile::new();
        let recorder = Recorder::default();
        let mut twi = initialised(&regs, 1);
        twi.set_slave_handler(1, &recorder).unwrap();

        step(&mut twi, &regs, 1, 0x60).unwrap();
        assert_eq!(twi.state(1), Ok(State::SlaveReceiving));
        for byte in [0x03, 0x55] {
            regs.load_data(byte);
            step(&mut twi, &regs, 1, 0x80).unwrap();
            assert_ne!(regs.peek(Register::Control) & TWEA, 0);
        }
        step(&mut twi, &regs, 1, 0xA0).unwrap();

        assert_eq!(
            *recorder.received.borrow(),
            [(1, 0, 0x03, false), (1, 1, 0x55, false)]
        );
        assert_eq!(recorder.finished.get(), 1);
        assert_eq!(twi.state(1), Ok(State::Ready));
    }

    #[test]
    fn test_general_call_is_flagged() {
        let regs = RegisterFile::new();
        let recorder = Recorder::default();
        let mut twi = initialised(&regs, 0);
        twi.slave_set_data_handler(0, &recorder).unwrap();

        step(&mut twi, &regs, 0, 0x70).unwrap();
        regs.load_data(0x06);
        step(&mut twi, &regs, 0, 0x90).unwrap();
        step(&mut twi, &regs, 0, 0xA0).unwrap();
        assert_eq!(*recorder.received.borrow(), [(0, 0, 0x06, true)]);
    }

    #[test]
    fn test_last_byte_nacks_next() {
        let regs = RegisterFile::new();
        let recorder = Recorder::default();
        recorder.last_after.set(1);
        let mut twi = initialised(&regs, 0);
        twi.slave_set_transmission_over_callback(0, &recorder).unwrap();

        step(&mut twi, &regs, 0, 0x60).unwrap();
        regs.load_data(0x01);
        step(&mut twi, &regs, 0, 0x80).unwrap();
        assert_eq!(regs.peek(Register::Control) & TWEA, 0);
        step(&mut twi, &regs, 0, 0x88).unwrap();
        assert_ne!(regs.peek(Register::Control) & TWEA, 0);
        assert_eq!(recorder.finished.get(), 1);
        assert_eq!(twi.state(0), Ok(State::Ready));
    }

    #[test]
    fn test_slave_transmit_sequence() {
        let regs = RegisterFile::new();
        let recorder = Recorder::default();
        recorder.last_after.set(2);
        let mut twi = initialised(&regs, 0);
        twi.set_slave_handler(0, &recorder).unwrap();

        step(&mut twi, &regs, 0, 0xA8).unwrap();
        assert_eq!(twi.state(0), Ok(State::SlaveTransmitting));
        assert_eq!(regs.peek(Register::Data), 0xA0);
        assert_ne!(regs.peek(Register::Control) & TWEA, 0);

        step(&mut twi, &regs, 0, 0xB8).unwrap();
        assert_eq!(regs.peek(Register::Data), 0xA1);
        assert_eq!(regs.peek(Register::Control) & TWEA, 0);

        step(&mut twi, &regs, 0, 0xC8).unwrap();
        assert_eq!(recorder.finished.get(), 1);
        assert_eq!(twi.state(0), Ok(State::Ready));
    }

    #[test]
    fn test_missing_handler_reports_error() {
        let regs = RegisterFile::new();
        let mut twi = initialised(&regs, 0);

        step(&mut twi, &regs, 0, 0x60).unwrap();
        regs.load_data(0x01);
        assert_eq!(
            step(&mut twi, &regs, 0, 0x80),
            Err(Error::SlaveHandlersNotSet)
        );
        assert_eq!(regs.peek(Register::Control) & TWEA, 0);

        step(&mut twi, &regs, 0, 0x88).unwrap();
        assert_eq!(
            step(&mut twi, &regs, 0, 0xA8),
            Err(Error::SlaveHandlersNotSet)
        );
        assert_eq!(regs.peek(Register::Data), 0xFF);
        assert_eq!(twi.slave_error_count(0), Ok(2));
    }

    #[test]
    fn test_handler_errors_are_counted_until_init() {
        let regs = RegisterFile::new();
        let recorder = Recorder::default();
        let mut twi = initialised(&regs, 0);
        assert_eq!(twi.slave_error_count(0), Ok(0));

        step(&mut twi, &regs, 0, 0x60).unwrap();
        regs.load_data(0x01);
        assert_eq!(
            step(&mut twi, &regs, 0, 0x80),
            Err(Error::SlaveHandlersNotSet)
        );
        step(&mut twi, &regs, 0, 0x88).unwrap();
        assert_eq!(twi.slave_error_count(0), Ok(1));

        // a handler that accepts the byte leaves the count alone
        twi.set_slave_handler(0, &recorder).unwrap();
        step(&mut twi, &regs, 0, 0x60).unwrap();
        regs.load_data(0x02);
        step(&mut twi, &regs, 0, 0x80).unwrap();
        step(&mut twi, &regs, 0, 0xA0).unwrap();
        assert_eq!(twi.slave_error_count(0), Ok(1));

        let config = TwiConfigBuilder::new().handle(&regs).build();
        twi.init(0, &config).unwrap();
        assert_eq!(twi.slave_error_count(0), Ok(0));
        assert_eq!(twi.slave_error_count(2), Err(Error::DeviceNotFound));
    }

    #[test]
    fn test_stray_status_in_ready_rearms_ack() {
        let regs = RegisterFile::new();
        let mut twi = initialised(&regs, 0);
        step(&mut twi, &regs, 0, 0xC0).unwrap();
        assert!(regs.take_command());
        assert_ne!(regs.peek(Register::Control) & TWEA, 0);
        assert_eq!(twi.state(0), Ok(State::Ready));
    }

    #[test]
    fn test_unexpected_code_ends_slave_transfer() {
        let regs = RegisterFile::new();
        let recorder = Recorder::default();
        let mut twi = initialised(&regs, 0);
        twi.set_slave_handler(0, &recorder).unwrap();
        step(&mut twi, &regs, 0, 0x60).unwrap();
        assert_eq!(
            step(&mut twi, &regs, 0, 0x18),
            Err(Error::UnexpectedStatus(0x18))
        );
        assert_eq!(recorder.finished.get(), 1);
        assert_eq!(twi.state(0), Ok(State::Ready));
    }
}
