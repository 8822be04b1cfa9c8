// Licensed under the Apache-2.0 license

//! TWI driver front end.
//!
//! [`Twi`] owns the state of every bus instance of the chip. All operations
//! are non-blocking: `write` and `read` only queue a transaction and assert
//! START, the bus work happens in [`Twi::process`], which the TWI interrupt
//! handler (or a polling loop) calls once per status code presented by the
//! peripheral.

use crate::common::{Logger, NoOpLogger};
use crate::twi::common::{
    Direction, Error, Prescaler, State, TwiConfig, MAX_ADDRESS, MAX_TRANSFER_LEN,
};
use crate::twi::registers::{
    ControlRegister, Register, TwiRegisters, ADDRESS_MASK, ADDRESS_SHIFT, GENERAL_CALL_BIT,
    PRESCALER_MASK, STATUS_MASK, TWEA, TWEN, TWIE, TWSTA, TWSTO,
};
use crate::twi::status::StatusCode;
use crate::twi::traits::{NotConfigured, SlaveHandler};
use crate::{twi_debug, twi_error};

/// Number of TWI peripherals on the ATmega328PB.
pub const TWI_INSTANCES: usize = 2;

/// Caller-owned data of a master transaction. Never copied.
#[derive(Debug, Default)]
pub(crate) enum Payload<'b> {
    #[default]
    None,
    Transmit(&'b [u8]),
    Receive(&'b mut [u8]),
}

impl Payload<'_> {
    pub(crate) fn len(&self) -> usize {
        match self {
            Payload::None => 0,
            Payload::Transmit(data) => data.len(),
            Payload::Receive(buffer) => buffer.len(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Transaction<'b> {
    pub(crate) address: u8,
    /// SLA+R/W byte sent after the next START.
    pub(crate) command: u8,
    pub(crate) payload: Payload<'b>,
    /// Register selector written before a read.
    pub(crate) opcode: Option<u8>,
    pub(crate) index: usize,
    /// Retry budget, zero for unlimited.
    pub(crate) retries: u8,
    pub(crate) attempts: u16,
    /// Data phases restarted after an early NACK. Never reset by an ACK.
    pub(crate) restarts: u16,
    pub(crate) locked: bool,
    pub(crate) repeated_start: bool,
    pub(crate) outcome: Option<Result<(), Error>>,
}

impl Transaction<'_> {
    /// Counts a NACK and reports whether the budget is spent.
    pub(crate) fn retry_exhausted(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.retries != 0 && self.attempts > u16::from(self.retries)
    }

    /// Counts a data-phase restart and reports whether the budget is spent.
    pub(crate) fn restart_exhausted(&mut self) -> bool {
        self.restarts = self.restarts.saturating_add(1);
        self.retries != 0 && self.restarts > u16::from(self.retries)
    }

    /// Unlocks a pending transaction with `error` as its outcome.
    pub(crate) fn abort(&mut self, error: Error) {
        if self.locked {
            self.locked = false;
            self.outcome = Some(Err(error));
        }
    }

    /// Byte at the current index of the transmit phase. A read with an opcode
    /// transmits only the opcode.
    pub(crate) fn tx_byte(&self) -> Option<u8> {
        match &self.payload {
            Payload::Transmit(data) => data.get(self.index).copied(),
            Payload::Receive(_) if self.index == 0 => self.opcode,
            _ => None,
        }
    }
}

/// Per-bus driver state.
pub(crate) struct Instance<'r, 'b> {
    pub(crate) regs: Option<&'r dyn TwiRegisters>,
    pub(crate) handler: &'r dyn SlaveHandler,
    pub(crate) state: State,
    pub(crate) initialised: bool,
    pub(crate) transaction: Transaction<'b>,
    /// Byte counter of the current slave transfer.
    pub(crate) slave_index: usize,
    pub(crate) general_call: bool,
    /// Handler errors since `init`; each one NACKed its byte.
    pub(crate) slave_errors: u16,
}

impl<'r, 'b> Instance<'r, 'b> {
    fn new() -> Self {
        Self {
            regs: None,
            handler: &NotConfigured,
            state: State::NotInitialised,
            initialised: false,
            transaction: Transaction::default(),
            slave_index: 0,
            general_call: false,
            slave_errors: 0,
        }
    }

    fn handle(&self) -> Result<&'r dyn TwiRegisters, Error> {
        self.regs.ok_or(Error::NullHandle)
    }

    fn initialised_handle(&self) -> Result<&'r dyn TwiRegisters, Error> {
        if !self.initialised {
            return Err(Error::NotInitialised);
        }
        self.handle()
    }

    fn check_request(&self, regs: &dyn TwiRegisters, address: u8, len: usize) -> Result<(), Error> {
        if address > MAX_ADDRESS {
            return Err(Error::InvalidAddress);
        }
        if len == 0 {
            return Err(Error::RequestTooShort);
        }
        if len > MAX_TRANSFER_LEN {
            return Err(Error::RequestTooLong);
        }
        let status = regs.read(Register::Status) & STATUS_MASK;
        let settled = ControlRegister::new(regs).interrupt_pending()
            || status == StatusCode::NoRelevantState.code()
            || status == StatusCode::IllegalStartStop.code();
        if self.state != State::Ready || self.transaction.locked || !settled {
            return Err(Error::AlreadyProcessing);
        }
        Ok(())
    }

    fn start(&mut self, regs: &dyn TwiRegisters, transaction: Transaction<'b>, state: State) {
        self.transaction = transaction;
        self.state = state;
        ControlRegister::new(regs).trigger(TWSTA | TWEA);
    }

    /// Retires a transaction that ended with STOP.
    fn complete_finished<L: Logger>(&mut self, bus: usize, logger: &mut L) {
        if self.state.is_finished() && self.transaction.outcome.is_some() {
            self.transaction.locked = false;
            self.state = State::Ready;
            twi_debug!(logger, "twi{}: transaction to 0x{:02X} complete", bus, self.transaction.address);
        }
    }

    fn unknown_status<L: Logger>(
        &mut self,
        bus: usize,
        control: ControlRegister<'_>,
        raw: u8,
        logger: &mut L,
    ) -> Result<(), Error> {
        let error = Error::UnexpectedStatus(raw);
        match self.state {
            State::Ready | State::Disabled | State::NotInitialised => control.trigger(TWEA),
            _ => {
                // release SCL with address recognition off until recovery
                control.trigger(TWSTO);
                self.transaction.abort(error);
                self.state = State::PeripheralError;
            }
        }
        twi_error!(logger, "twi{}: unknown status 0x{:02X} in {:?}", bus, raw, self.state);
        Err(error)
    }

    pub(crate) fn process<L: Logger>(&mut self, bus: usize, logger: &mut L) -> Result<(), Error> {
        let regs = self.handle()?;
        if !self.initialised {
            return Err(Error::NotInitialised);
        }
        let control = ControlRegister::new(regs);
        if !control.interrupt_pending() {
            self.complete_finished(bus, logger);
            return Ok(());
        }

        let raw = regs.read(Register::Status) & STATUS_MASK;
        let Some(status) = StatusCode::from_register(raw) else {
            return self.unknown_status(bus, control, raw, logger);
        };

        if status == StatusCode::IllegalStartStop {
            control.trigger(TWSTO | TWEA);
            self.transaction.abort(Error::BusErrorHardware);
            self.state = State::Ready;
            twi_error!(logger, "twi{}: illegal START/STOP, bus released", bus);
            return Err(Error::BusErrorHardware);
        }

        self.complete_finished(bus, logger);
        match self.state {
            State::Ready | State::MasterRxFinished => self.ready(bus, regs, status, logger),
            State::MasterTransmitting => self.master_tx(bus, regs, status, logger),
            State::MasterTxFinished => {
                // opcode sent, repeated START for the data phase pending
                self.state = State::MasterReceiving;
                self.master_rx(bus, regs, status, logger)
            }
            State::MasterReceiving => self.master_rx(bus, regs, status, logger),
            State::SlaveReceiving => self.slave_rx(bus, regs, status, logger),
            State::SlaveTransmitting => self.slave_tx(bus, regs, status, logger),
            State::PeripheralError => {
                control.trigger(0);
                Err(Error::UnexpectedStatus(raw))
            }
            State::NotInitialised | State::Disabled => Ok(()),
        }
    }
}

/// Generates set/get pairs for the seven-bit address fields.
macro_rules! address_field_accessors {
    ($($field:ident => $register:expr),* $(,)?) => {
        paste::paste! {
            $(
                #[doc = concat!("Programs the seven-bit `", stringify!($field), "` field.")]
                ///
                /// # Errors
                ///
                /// `DeviceNotFound`, `NullHandle`, or `InvalidAddress` above 0x7F.
                pub fn [<set_ $field>](&mut self, id: usize, value: u8) -> Result<(), Error> {
                    let regs = self.instance(id)?.handle()?;
                    if value > MAX_ADDRESS {
                        return Err(Error::InvalidAddress);
                    }
                    let current = regs.read($register);
                    regs.write($register, (current & !ADDRESS_MASK) | (value << ADDRESS_SHIFT));
                    Ok(())
                }

                #[doc = concat!("Reads back the seven-bit `", stringify!($field), "` field.")]
                ///
                /// # Errors
                ///
                /// `DeviceNotFound` or `NullHandle`.
                pub fn [<get_ $field>](&self, id: usize) -> Result<u8, Error> {
                    let regs = self.instance(id)?.handle()?;
                    Ok((regs.read($register) & ADDRESS_MASK) >> ADDRESS_SHIFT)
                }
            )*
        }
    };
}

/// Driver for the TWI peripherals of one chip.
///
/// `'r` is the lifetime of register handles and slave handlers, `'b` the
/// lifetime of the buffers lent to master transactions.
pub struct Twi<'r, 'b, L: Logger = NoOpLogger, const N: usize = TWI_INSTANCES> {
    instances: [Instance<'r, 'b>; N],
    logger: L,
}

impl<L: Logger + Default, const N: usize> Default for Twi<'_, '_, L, N> {
    fn default() -> Self {
        Self::new(L::default())
    }
}

impl<'r, 'b, L: Logger, const N: usize> Twi<'r, 'b, L, N> {
    pub fn new(logger: L) -> Self {
        Self {
            instances: core::array::from_fn(|_| Instance::new()),
            logger,
        }
    }

    fn instance(&self, id: usize) -> Result<&Instance<'r, 'b>, Error> {
        self.instances.get(id).ok_or(Error::DeviceNotFound)
    }

    fn instance_mut(&mut self, id: usize) -> Result<&mut Instance<'r, 'b>, Error> {
        self.instances.get_mut(id).ok_or(Error::DeviceNotFound)
    }

    /// Configuration with every field cleared and no handle.
    #[must_use]
    pub fn get_default_config() -> TwiConfig<'r> {
        TwiConfig::default()
    }

    /// Binds a register handle without touching the hardware.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` for an id outside the instance table.
    pub fn set_handle(&mut self, id: usize, handle: &'r dyn TwiRegisters) -> Result<(), Error> {
        self.instance_mut(id)?.regs = Some(handle);
        Ok(())
    }

    /// # Errors
    ///
    /// `DeviceNotFound`, or `NullHandle` if nothing is bound.
    pub fn get_handle(&self, id: usize) -> Result<&'r dyn TwiRegisters, Error> {
        self.instance(id)?.handle()
    }

    /// Applies `config` and enables the peripheral with address recognition.
    ///
    /// Any previously installed slave handler is replaced by one that rejects
    /// every exchange.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound`, `NullHandle` when the configuration has no handle,
    /// `InvalidAddress` when the slave address or mask exceeds 0x7F.
    pub fn init(&mut self, id: usize, config: &TwiConfig<'r>) -> Result<(), Error> {
        let Self { instances, logger } = self;
        let instance = instances.get_mut(id).ok_or(Error::DeviceNotFound)?;
        let regs = config.handle.ok_or(Error::NullHandle)?;
        if config.slave_address > MAX_ADDRESS || config.address_mask > MAX_ADDRESS {
            return Err(Error::InvalidAddress);
        }

        instance.handler = &NotConfigured;
        instance.regs = Some(regs);
        instance.transaction = Transaction::default();
        instance.slave_index = 0;
        instance.slave_errors = 0;

        let control = ControlRegister::new(regs);
        control.update(TWEN | TWEA | TWIE | TWSTA | TWSTO, 0);
        regs.write(Register::Bitrate, config.bitrate);
        regs.write(Register::Status, config.prescaler as u8);
        let general_call = if config.general_call_enabled {
            GENERAL_CALL_BIT
        } else {
            0
        };
        regs.write(
            Register::Address,
            (config.slave_address << ADDRESS_SHIFT) | general_call,
        );
        regs.write(Register::AddressMask, config.address_mask << ADDRESS_SHIFT);
        let interrupts = if config.interrupt_mode { TWIE } else { 0 };
        control.update(TWEN | TWEA | TWIE, TWEN | TWEA | interrupts);

        instance.state = State::Ready;
        instance.initialised = true;
        twi_debug!(
            logger,
            "twi{}: init address 0x{:02X} twbr {} prescaler {:?}",
            id,
            config.slave_address,
            config.bitrate,
            config.prescaler
        );
        Ok(())
    }

    /// Disables the peripheral, writes the default configuration back and
    /// forgets the handle.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn deinit(&mut self, id: usize) -> Result<(), Error> {
        let instance = self.instance_mut(id)?;
        let regs = instance.handle()?;
        let defaults = TwiConfig::default();

        ControlRegister::new(regs).update(TWEN | TWEA | TWIE | TWSTA | TWSTO, 0);
        regs.write(Register::Bitrate, defaults.bitrate);
        regs.write(Register::Status, defaults.prescaler as u8);
        regs.write(Register::Address, defaults.slave_address);
        regs.write(Register::AddressMask, defaults.address_mask);

        *instance = Instance::new();
        twi_debug!(self.logger, "twi{}: deinit", id);
        Ok(())
    }

    /// Turns the peripheral on. An initialised instance returns to `Ready`
    /// and drops any transaction left over from a peripheral error.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn enable(&mut self, id: usize) -> Result<(), Error> {
        let instance = self.instance_mut(id)?;
        let regs = instance.handle()?;
        ControlRegister::new(regs).update(TWEN | TWEA, TWEN | TWEA);
        if instance.initialised {
            instance.transaction = Transaction::default();
            instance.state = State::Ready;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn disable(&mut self, id: usize) -> Result<(), Error> {
        let instance = self.instance_mut(id)?;
        let regs = instance.handle()?;
        ControlRegister::new(regs).update(TWEN | TWEA, 0);
        if instance.initialised {
            instance.state = State::Disabled;
        }
        Ok(())
    }

    address_field_accessors! {
        slave_address => Register::Address,
        address_mask => Register::AddressMask,
    }

    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn set_baudrate(&mut self, id: usize, bitrate: u8) -> Result<(), Error> {
        self.instance(id)?.handle()?.write(Register::Bitrate, bitrate);
        Ok(())
    }

    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn get_baudrate(&self, id: usize) -> Result<u8, Error> {
        Ok(self.instance(id)?.handle()?.read(Register::Bitrate))
    }

    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn set_prescaler(&mut self, id: usize, prescaler: Prescaler) -> Result<(), Error> {
        let regs = self.instance(id)?.handle()?;
        let status = regs.read(Register::Status);
        regs.write(
            Register::Status,
            (status & !PRESCALER_MASK) | prescaler as u8,
        );
        Ok(())
    }

    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn get_prescaler(&self, id: usize) -> Result<Prescaler, Error> {
        let regs = self.instance(id)?.handle()?;
        Ok(Prescaler::from_bits(regs.read(Register::Status)))
    }

    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn set_general_call_enabled(&mut self, id: usize, enabled: bool) -> Result<(), Error> {
        let regs = self.instance(id)?.handle()?;
        let address = regs.read(Register::Address) & !GENERAL_CALL_BIT;
        let bit = if enabled { GENERAL_CALL_BIT } else { 0 };
        regs.write(Register::Address, address | bit);
        Ok(())
    }

    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn get_general_call_enabled(&self, id: usize) -> Result<bool, Error> {
        let regs = self.instance(id)?.handle()?;
        Ok(regs.read(Register::Address) & GENERAL_CALL_BIT != 0)
    }

    /// Switches between interrupt-driven and polled operation. Never
    /// acknowledges a pending interrupt.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn set_interrupt_mode(&mut self, id: usize, enabled: bool) -> Result<(), Error> {
        let regs = self.instance(id)?.handle()?;
        ControlRegister::new(regs).update(TWIE, if enabled { TWIE } else { 0 });
        Ok(())
    }

    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn get_interrupt_mode(&self, id: usize) -> Result<bool, Error> {
        let regs = self.instance(id)?.handle()?;
        Ok(ControlRegister::new(regs).bits() & TWIE != 0)
    }

    /// Status bits of the status register, prescaler masked off.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` or `NullHandle`.
    pub fn get_status_code(&self, id: usize) -> Result<u8, Error> {
        let regs = self.instance(id)?.handle()?;
        Ok(regs.read(Register::Status) & STATUS_MASK)
    }

    /// Installs the application's slave callbacks.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound`.
    pub fn set_slave_handler(&mut self, id: usize, handler: &'r dyn SlaveHandler) -> Result<(), Error> {
        self.instance_mut(id)?.handler = handler;
        Ok(())
    }

    /// Installs the handler whose `handle_data` receives and supplies slave
    /// bytes.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound`.
    pub fn slave_set_data_handler(&mut self, id: usize, handler: &'r dyn SlaveHandler) -> Result<(), Error> {
        self.set_slave_handler(id, handler)
    }

    /// Installs the handler whose `transmission_over` runs at the end of each
    /// slave transfer.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound`.
    pub fn slave_set_transmission_over_callback(
        &mut self,
        id: usize,
        handler: &'r dyn SlaveHandler,
    ) -> Result<(), Error> {
        self.set_slave_handler(id, handler)
    }

    /// Queues a master write of `data` to `address` and asserts START.
    ///
    /// `data` stays borrowed until the transaction completes. `retries` bounds
    /// the number of repeated attempts after a NACK; zero retries forever.
    ///
    /// # Errors
    ///
    /// In order: `DeviceNotFound`, `NotInitialised`, `InvalidAddress`,
    /// `RequestTooShort`, `RequestTooLong`, `AlreadyProcessing`.
    pub fn write(&mut self, id: usize, address: u8, data: &'b [u8], retries: u8) -> Result<(), Error> {
        let instance = self.instance_mut(id)?;
        let regs = instance.initialised_handle()?;
        instance.check_request(regs, address, data.len())?;

        let transaction = Transaction {
            address,
            command: Direction::Write.address_byte(address),
            payload: Payload::Transmit(data),
            retries,
            locked: true,
            ..Transaction::default()
        };
        instance.start(regs, transaction, State::MasterTransmitting);
        twi_debug!(self.logger, "twi{}: write {} bytes to 0x{:02X}", id, data.len(), address);
        Ok(())
    }

    /// Queues a master read of `buffer.len()` bytes from `address`.
    ///
    /// With an `opcode` the driver first writes it, then issues a repeated
    /// START and reads. The buffer is filled in place and can be reclaimed
    /// with [`take_receive_buffer`](Self::take_receive_buffer).
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    pub fn read(
        &mut self,
        id: usize,
        address: u8,
        opcode: Option<u8>,
        buffer: &'b mut [u8],
        retries: u8,
    ) -> Result<(), Error> {
        let instance = self.instance_mut(id)?;
        let regs = instance.initialised_handle()?;
        instance.check_request(regs, address, buffer.len())?;

        let len = buffer.len();
        let (direction, state) = match opcode {
            Some(_) => (Direction::Write, State::MasterTransmitting),
            None => (Direction::Read, State::MasterReceiving),
        };
        let transaction = Transaction {
            address,
            command: direction.address_byte(address),
            payload: Payload::Receive(buffer),
            opcode,
            retries,
            locked: true,
            ..Transaction::default()
        };
        instance.start(regs, transaction, state);
        twi_debug!(self.logger, "twi{}: read {} bytes from 0x{:02X}", id, len, address);
        Ok(())
    }

    /// Services the peripheral once. Call from the TWI interrupt or poll it.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound`, `NullHandle`, `NotInitialised`, and the bus errors
    /// raised by this step (`BusErrorHardware`, `ArbitrationLost`,
    /// `MaxRetriesHit`, `UnexpectedStatus`, or whatever the slave handler
    /// returned). None of them leave the driver unusable.
    pub fn process(&mut self, id: usize) -> Result<(), Error> {
        let Self { instances, logger } = self;
        let instance = instances.get_mut(id).ok_or(Error::DeviceNotFound)?;
        instance.process(id, logger)
    }

    /// True while a master transaction owns its buffer. Unknown ids are never
    /// locked.
    #[must_use]
    pub fn is_master_buffer_locked(&self, id: usize) -> bool {
        self.instances
            .get(id)
            .is_some_and(|instance| instance.transaction.locked)
    }

    /// # Errors
    ///
    /// `DeviceNotFound`.
    pub fn state(&self, id: usize) -> Result<State, Error> {
        Ok(self.instance(id)?.state)
    }

    /// Slave handler errors counted since `init`.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound`.
    pub fn slave_error_count(&self, id: usize) -> Result<u16, Error> {
        Ok(self.instance(id)?.slave_errors)
    }

    /// Non-blocking completion check of the last master transaction.
    ///
    /// Returns `WouldBlock` while the transaction runs, then its outcome
    /// exactly once. With nothing outstanding it returns `Ok`.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound`, or the error the transaction failed with.
    pub fn poll_transaction(&mut self, id: usize) -> nb::Result<(), Error> {
        let instance = self.instance_mut(id)?;
        if instance.transaction.locked {
            return Err(nb::Error::WouldBlock);
        }
        match instance.transaction.outcome.take() {
            Some(Err(error)) => Err(nb::Error::Other(error)),
            Some(Ok(())) | None => Ok(()),
        }
    }

    /// Hands back the buffer lent to the last read once it is released.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound`, or `AlreadyProcessing` while the read is running.
    pub fn take_receive_buffer(&mut self, id: usize) -> Result<Option<&'b mut [u8]>, Error> {
        let instance = self.instance_mut(id)?;
        if instance.transaction.locked {
            return Err(Error::AlreadyProcessing);
        }
        match core::mem::take(&mut instance.transaction.payload) {
            Payload::Receive(buffer) => Ok(Some(buffer)),
            other => {
                instance.transaction.payload = other;
                Ok(None)
            }
        }
    }

    pub fn logger(&mut self) -> &mut L {
        &mut self.logger
    }
}
