// Licensed under the Apache-2.0 license

use core::cell::RefCell;
use core::fmt;

use crate::common::{Logger, NoOpLogger};
use crate::psu::{PsuRegisters, CMD_FAN_SPEED, CMD_TEMPERATURE_1};
use crate::sim::{
    BusDevice, BusSimulator, FakeMaster, FakeSlave, MasterOutcome, SimError, TwiDevice,
};
use crate::twi::{
    Error, RegisterFile, State, Twi, TwiConfigBuilder, GENERAL_CALL_ADDRESS, TWI_INSTANCES,
};
use crate::{twi_debug, twi_error};

type BusTwi<'a> = Twi<'a, 'a, NoOpLogger, TWI_INSTANCES>;

const SEED: u64 = 0x7E57;
const TICKS: usize = 60;
const SENSOR_ADDRESS: u8 = 0x20;
const ABSENT_ADDRESS: u8 = 0x50;
const DRIVER_ADDRESS: u8 = 0x31;

#[derive(Debug, PartialEq, Eq)]
pub enum Failure {
    Twi(Error),
    Sim(SimError),
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Failure::Twi(error)
    }
}

impl From<SimError> for Failure {
    fn from(error: SimError) -> Self {
        Failure::Sim(error)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Twi(error) => write!(f, "driver: {error}"),
            Failure::Sim(error) => write!(f, "simulator: {error}"),
        }
    }
}

/// Runs every scenario and logs one line each. Returns the number of
/// failures.
pub fn run_twi_bus_tests<L: Logger>(logger: &mut L) -> usize {
    twi_debug!(logger, "=== TWI Bus Tests ===");

    let results = [
        ("read with opcode", test_read_with_opcode()),
        ("retry exhaustion", test_retry_exhaustion()),
        ("arbitration between instances", test_arbitration()),
        ("general call", test_general_call()),
        ("slave receive and transmit", test_slave_exchange()),
        ("bus error recovery", test_bus_error_recovery()),
    ];

    let mut failed = 0;
    for (name, result) in results {
        match result {
            Ok(()) => twi_debug!(logger, "Testing {}... PASSED", name),
            Err(failure) => {
                failed += 1;
                twi_error!(logger, "Testing {}... FAILED ({})", name, failure);
            }
        }
    }

    if failed == 0 {
        twi_debug!(logger, "=== All TWI Bus Tests Passed ===");
    }
    failed
}

pub fn test_read_with_opcode() -> Result<(), Failure> {
    let regs = RegisterFile::new();
    let sensor = FakeSlave::new(SENSOR_ADDRESS);
    sensor.temperature_1.set(42);
    let mut buffer = [0u8; 1];
    let twi = RefCell::new(BusTwi::new(NoOpLogger));
    let config = TwiConfigBuilder::new().handle(&regs).build();
    twi.borrow_mut().init(0, &config)?;
    let device = TwiDevice::new(&twi, 0, &regs);
    let mut bus = BusSimulator::new(SEED);
    bus.register(&device)?;
    bus.register(&sensor)?;

    twi.borrow_mut()
        .read(0, SENSOR_ADDRESS, Some(CMD_TEMPERATURE_1), &mut buffer, 3)?;
    assert!(twi.borrow().is_master_buffer_locked(0));
    bus.run(TICKS);

    assert!(!twi.borrow().is_master_buffer_locked(0));
    assert_eq!(twi.borrow_mut().poll_transaction(0), Ok(()));
    let received = twi.borrow_mut().take_receive_buffer(0)?;
    assert_eq!(received.as_deref(), Some(&[42u8][..]));
    assert_eq!(sensor.received().as_slice(), &[CMD_TEMPERATURE_1]);
    Ok(())
}

pub fn test_retry_exhaustion() -> Result<(), Failure> {
    let regs = RegisterFile::new();
    let sensor = FakeSlave::new(SENSOR_ADDRESS);
    let data = [CMD_FAN_SPEED, 0x40];
    let twi = RefCell::new(BusTwi::new(NoOpLogger));
    let config = TwiConfigBuilder::new().handle(&regs).build();
    twi.borrow_mut().init(0, &config)?;
    let device = TwiDevice::new(&twi, 0, &regs);
    let mut bus = BusSimulator::new(SEED);
    bus.register(&device)?;
    bus.register(&sensor)?;

    twi.borrow_mut().write(0, ABSENT_ADDRESS, &data, 3)?;
    bus.run(TICKS);

    // first attempt plus three retries
    assert_eq!(bus.stats().address_nacks, 4);
    assert_eq!(device.take_error(), Some(Error::MaxRetriesHit));
    assert!(!twi.borrow().is_master_buffer_locked(0));
    assert_eq!(
        twi.borrow_mut().poll_transaction(0),
        Err(nb::Error::Other(Error::MaxRetriesHit))
    );
    assert_eq!(twi.borrow().state(0)?, State::Ready);
    assert_eq!(sensor.transactions(), 0);
    Ok(())
}

pub fn test_arbitration() -> Result<(), Failure> {
    let first_regs = RegisterFile::new();
    let second_regs = RegisterFile::new();
    let sensor = FakeSlave::new(SENSOR_ADDRESS);
    let first_data = [CMD_FAN_SPEED, 0x10];
    let second_data = [CMD_FAN_SPEED, 0x20];
    let twi = RefCell::new(BusTwi::new(NoOpLogger));
    for (id, regs) in [&first_regs, &second_regs].into_iter().enumerate() {
        let config = TwiConfigBuilder::new().handle(regs).build();
        twi.borrow_mut().init(id, &config)?;
    }
    let first = TwiDevice::new(&twi, 0, &first_regs);
    let second = TwiDevice::new(&twi, 1, &second_regs);
    let mut bus = BusSimulator::new(SEED);
    bus.register(&first)?;
    bus.register(&second)?;
    bus.register(&sensor)?;

    twi.borrow_mut().write(0, SENSOR_ADDRESS, &first_data, 0)?;
    twi.borrow_mut().write(1, SENSOR_ADDRESS, &second_data, 0)?;
    bus.run(TICKS);

    assert_eq!(bus.stats().arbitration_losses, 1);
    let first_outcome = twi.borrow_mut().poll_transaction(0);
    let second_outcome = twi.borrow_mut().poll_transaction(1);
    let (fan_speed, loser) = match (first_outcome, second_outcome) {
        (Ok(()), Err(nb::Error::Other(Error::ArbitrationLost))) => (0x10, &second),
        (Err(nb::Error::Other(Error::ArbitrationLost)), Ok(())) => (0x20, &first),
        other => panic!("unexpected outcomes {other:?}"),
    };
    assert_eq!(sensor.fan_speed.get(), fan_speed);
    assert_eq!(loser.take_error(), Some(Error::ArbitrationLost));
    assert_eq!(sensor.transactions(), 1);
    assert_eq!(twi.borrow().state(0)?, State::Ready);
    assert_eq!(twi.borrow().state(1)?, State::Ready);
    Ok(())
}

pub fn test_general_call() -> Result<(), Failure> {
    let regs = RegisterFile::new();
    let psu = PsuRegisters::new();
    let master = FakeMaster::new();
    let twi = RefCell::new(BusTwi::new(NoOpLogger));
    let config = TwiConfigBuilder::new()
        .handle(&regs)
        .slave_address(DRIVER_ADDRESS)
        .general_call(true)
        .build();
    twi.borrow_mut().init(1, &config)?;
    twi.borrow_mut().set_slave_handler(1, &psu)?;
    let device = TwiDevice::new(&twi, 1, &regs);
    let mut bus = BusSimulator::new(SEED);
    bus.register(&master)?;
    bus.register(&device)?;

    master.write(GENERAL_CALL_ADDRESS, &[CMD_FAN_SPEED, 0x44])?;
    bus.run(TICKS);
    assert_eq!(master.outcome(), MasterOutcome::Completed);
    assert_eq!(psu.general_calls(), 1);
    // broadcast bytes are not register writes
    assert_eq!(psu.fan_speed.get(), 0);
    assert_eq!(psu.transactions(), 1);

    twi.borrow_mut().set_general_call_enabled(1, false)?;
    master.write(GENERAL_CALL_ADDRESS, &[CMD_FAN_SPEED, 0x44])?;
    bus.run(TICKS);
    assert_eq!(master.outcome(), MasterOutcome::Nacked);
    assert_eq!(psu.general_calls(), 1);
    assert_eq!(twi.borrow().state(1)?, State::Ready);
    Ok(())
}

pub fn test_slave_exchange() -> Result<(), Failure> {
    let regs = RegisterFile::new();
    let psu = PsuRegisters::new();
    psu.temperature_1.set(37);
    let master = FakeMaster::new();
    let twi = RefCell::new(BusTwi::new(NoOpLogger));
    let config = TwiConfigBuilder::new()
        .handle(&regs)
        .slave_address(DRIVER_ADDRESS)
        .build();
    twi.borrow_mut().init(1, &config)?;
    twi.borrow_mut().set_slave_handler(1, &psu)?;
    let device = TwiDevice::new(&twi, 1, &regs);
    let mut bus = BusSimulator::new(SEED);
    bus.register(&master)?;
    bus.register(&device)?;

    master.write(DRIVER_ADDRESS, &[CMD_FAN_SPEED, 0x80])?;
    bus.run(TICKS);
    assert_eq!(master.outcome(), MasterOutcome::Completed);
    assert_eq!(psu.fan_speed.get(), 0x80);
    assert_eq!(twi.borrow().state(1)?, State::Ready);

    master.write_read(DRIVER_ADDRESS, &[CMD_TEMPERATURE_1], 1)?;
    bus.run(TICKS);
    assert_eq!(master.outcome(), MasterOutcome::Completed);
    assert_eq!(master.received().as_slice(), &[37]);
    assert_eq!(twi.borrow().state(1)?, State::Ready);
    assert_eq!(device.take_error(), None);
    Ok(())
}

pub fn test_bus_error_recovery() -> Result<(), Failure> {
    let regs = RegisterFile::new();
    let sensor = FakeSlave::new(SENSOR_ADDRESS);
    let interrupted = [CMD_FAN_SPEED, 0x55];
    let retried = [CMD_FAN_SPEED, 0x66];
    let twi = RefCell::new(BusTwi::new(NoOpLogger));
    let config = TwiConfigBuilder::new().handle(&regs).build();
    twi.borrow_mut().init(0, &config)?;
    let device = TwiDevice::new(&twi, 0, &regs);
    let mut bus = BusSimulator::new(SEED);
    bus.register(&device)?;
    bus.register(&sensor)?;

    twi.borrow_mut().write(0, SENSOR_ADDRESS, &interrupted, 0)?;
    // START request, START, address phase
    bus.run(3);
    assert!(twi.borrow().is_master_buffer_locked(0));

    device.inject_bus_error();
    device.process();
    assert_eq!(device.take_error(), Some(Error::BusErrorHardware));
    assert_eq!(
        twi.borrow_mut().poll_transaction(0),
        Err(nb::Error::Other(Error::BusErrorHardware))
    );
    bus.run(TICKS);
    assert_eq!(sensor.fan_speed.get(), 0);

    twi.borrow_mut().write(0, SENSOR_ADDRESS, &retried, 0)?;
    bus.run(TICKS);
    assert_eq!(twi.borrow_mut().poll_transaction(0), Ok(()));
    assert_eq!(sensor.fan_speed.get(), 0x66);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::WriteLogger;

    #[test]
    fn test_read_with_opcode_on_bus() {
        test_read_with_opcode().unwrap();
    }

    #[test]
    fn test_retry_exhaustion_on_bus() {
        test_retry_exhaustion().unwrap();
    }

    #[test]
    fn test_arbitration_on_bus() {
        test_arbitration().unwrap();
    }

    #[test]
    fn test_general_call_on_bus() {
        test_general_call().unwrap();
    }

    #[test]
    fn test_slave_exchange_on_bus() {
        test_slave_exchange().unwrap();
    }

    #[test]
    fn test_bus_error_recovery_on_bus() {
        test_bus_error_recovery().unwrap();
    }

    #[test]
    fn test_runner_reports_every_scenario() {
        let mut buf = [0u8; 1024];
        let mut logger = WriteLogger::new(&mut buf[..]);
        assert_eq!(run_twi_bus_tests(&mut logger), 0);
        let unused = logger.into_inner().len();
        let written = buf.len() - unused;

        let text = core::str::from_utf8(&buf[..written]).unwrap();
        assert_eq!(text.matches("PASSED").count(), 6);
        assert!(text.ends_with("=== All TWI Bus Tests Passed ===\r\n"));
    }
}
