// Licensed under the Apache-2.0 license

//! Bus simulator and fake devices for exercising the TWI driver without
//! hardware.

use core::fmt;

pub mod bus;
pub mod fake_master;
pub mod fake_slave;
pub mod interface;
pub mod twi_device;

pub use bus::{BusSimulator, BusState, BusStats, TransactionMode, MAX_DEVICES};
pub use fake_master::{FakeMaster, MasterOutcome};
pub use fake_slave::FakeSlave;
pub use interface::{BusDevice, BusEvent, DeviceInterface};
pub use twi_device::TwiDevice;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SimError {
    /// The simulator's device table is full.
    DeviceLimitReached,
    /// A fake device is still running its previous request.
    Busy,
    InvalidRequest,
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::DeviceLimitReached => f.write_str("device table full"),
            SimError::Busy => f.write_str("device busy"),
            SimError::InvalidRequest => f.write_str("invalid request"),
        }
    }
}
