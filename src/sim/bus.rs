// Licensed under the Apache-2.0 license

//! Discrete-event model of an I2C bus.
//!
//! Every [`tick`](BusSimulator::tick) resolves one bus step (START
//! contention, address phase, or one data byte) from the requests the
//! registered devices left in their [`DeviceInterface`], posts the resulting
//! [`BusEvent`]s, and then lets each device react through
//! [`BusDevice::process`].
//!
//! ```text
//! Idle --START--> SlaveAddressing --ACK--> Active --STOP--> Idle
//!                      ^  |NACK              |
//!                      |  +-- waits for      | repeated START
//!                      |      START/STOP     |
//!                      +---------------------+
//! ```

use heapless::Vec;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::common::{Logger, NoOpLogger};
use crate::sim::interface::{BusDevice, BusEvent, DeviceInterface};
use crate::sim::SimError;
use crate::twi::GENERAL_CALL_ADDRESS;
use crate::{twi_debug, twi_error};

/// Capacity of the device table.
pub const MAX_DEVICES: usize = 8;

/// Seed used by [`BusSimulator::default`].
pub const DEFAULT_SEED: u64 = 0x5EED_0F_7A11;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransactionMode {
    Write,
    Read,
    GeneralCall,
}

/// Bus phase. Master and slave indexes only exist while the bus is busy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusState {
    Idle,
    SlaveAddressing {
        master: usize,
        /// The last address byte went unanswered; only START or STOP moves
        /// the bus on.
        nacked: bool,
    },
    Active {
        master: usize,
        mode: TransactionMode,
        slaves: Vec<usize, MAX_DEVICES>,
    },
}

impl BusState {
    #[must_use]
    pub fn master(&self) -> Option<usize> {
        match self {
            BusState::Idle => None,
            BusState::SlaveAddressing { master, .. } | BusState::Active { master, .. } => {
                Some(*master)
            }
        }
    }
}

/// Counters accumulated over the lifetime of a simulator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusStats {
    pub starts: u32,
    pub arbitration_losses: u32,
    pub address_nacks: u32,
    pub data_nacks: u32,
    pub bytes_transferred: u32,
}

pub struct BusSimulator<'d, L: Logger = NoOpLogger> {
    devices: Vec<&'d dyn BusDevice, MAX_DEVICES>,
    state: BusState,
    rng: SmallRng,
    stats: BusStats,
    logger: L,
}

impl Default for BusSimulator<'_> {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl BusSimulator<'_> {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_logger(seed, NoOpLogger)
    }
}

impl<'d, L: Logger> BusSimulator<'d, L> {
    pub fn with_logger(seed: u64, logger: L) -> Self {
        Self {
            devices: Vec::new(),
            state: BusState::Idle,
            rng: SmallRng::seed_from_u64(seed),
            stats: BusStats::default(),
            logger,
        }
    }

    /// Attaches a device. Registering the same device again is a no-op.
    ///
    /// # Errors
    ///
    /// `DeviceLimitReached` when the table is full.
    pub fn register(&mut self, device: &'d dyn BusDevice) -> Result<(), SimError> {
        let known = self.devices.iter().any(|existing| {
            core::ptr::addr_eq(
                *existing as *const dyn BusDevice,
                device as *const dyn BusDevice,
            )
        });
        if known {
            return Ok(());
        }
        self.devices.push(device).map_err(|_| {
            twi_error!(self.logger, "sim: device table full");
            SimError::DeviceLimitReached
        })
    }

    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn state(&self) -> &BusState {
        &self.state
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        self.stats
    }

    /// One bus step followed by one `process` call per device.
    pub fn tick(&mut self) {
        self.step();
        for device in &self.devices {
            device.process();
        }
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Ticks until the bus is idle again or `limit` ticks have passed.
    /// Returns the number of ticks run.
    pub fn run_until_idle(&mut self, limit: usize) -> usize {
        for ticks in 1..=limit {
            self.tick();
            if self.state == BusState::Idle {
                return ticks;
            }
        }
        limit
    }

    fn interface(&self, index: usize) -> Option<&'d DeviceInterface> {
        let device: &'d dyn BusDevice = *self.devices.get(index)?;
        Some(device.interface())
    }

    fn step(&mut self) {
        self.state = match core::mem::replace(&mut self.state, BusState::Idle) {
            BusState::Idle => self.idle(),
            BusState::SlaveAddressing { master, nacked } => self.addressing(master, nacked),
            BusState::Active {
                master,
                mode,
                slaves,
            } => self.active(master, mode, slaves),
        };
    }

    fn idle(&mut self) -> BusState {
        let mut candidates: Vec<usize, MAX_DEVICES> = Vec::new();
        for (index, device) in self.devices.iter().enumerate() {
            let iface = device.interface();
            // STOP without a bus to release
            iface.stop.set(false);
            if iface.start.get() {
                let _ = candidates.push(index);
            }
        }
        let pick = match candidates.len() {
            0 => return BusState::Idle,
            1 => 0,
            contenders => self.rng.gen_range(0..contenders),
        };
        let Some(&master) = candidates.get(pick) else {
            return BusState::Idle;
        };

        for (index, device) in self.devices.iter().enumerate() {
            let iface = device.interface();
            if index == master {
                iface.start.set(false);
                iface.post(BusEvent::Start { repeated: false });
            } else {
                if candidates.contains(&index) {
                    iface.start.set(false);
                    iface.lost_arbitration.set(true);
                    self.stats.arbitration_losses += 1;
                }
                iface.post(BusEvent::StartObserved);
            }
        }
        self.stats.starts += 1;
        twi_debug!(
            self.logger,
            "sim: START by device {} ({} contenders)",
            master,
            candidates.len()
        );
        BusState::SlaveAddressing {
            master,
            nacked: false,
        }
    }

    fn addressing(&mut self, master: usize, nacked: bool) -> BusState {
        let Some(m) = self.interface(master) else {
            return BusState::Idle;
        };
        if m.stop.replace(false) {
            return BusState::Idle;
        }
        if m.start.replace(false) {
            m.post(BusEvent::Start { repeated: true });
            self.stats.starts += 1;
            return BusState::SlaveAddressing {
                master,
                nacked: false,
            };
        }
        if nacked || !m.ready.get() {
            return BusState::SlaveAddressing { master, nacked };
        }

        let byte = m.data.get();
        let address = byte >> 1;
        let read = byte & 1 != 0;
        let general_call = address == GENERAL_CALL_ADDRESS;
        let mut slaves: Vec<usize, MAX_DEVICES> = Vec::new();
        for (index, device) in self.devices.iter().enumerate() {
            if index != master && device.interface().answers(address, read) {
                let _ = slaves.push(index);
            }
        }

        if slaves.is_empty() {
            m.post(BusEvent::AddressSent { read, acked: false });
            self.stats.address_nacks += 1;
            twi_debug!(self.logger, "sim: no device at 0x{:02X}", address);
            return BusState::SlaveAddressing {
                master,
                nacked: true,
            };
        }

        m.post(BusEvent::AddressSent { read, acked: true });
        for &slave in &slaves {
            if let Some(iface) = self.interface(slave) {
                iface.post(BusEvent::Addressed { read, general_call });
            }
        }
        let mode = if general_call {
            TransactionMode::GeneralCall
        } else if read {
            TransactionMode::Read
        } else {
            TransactionMode::Write
        };
        BusState::Active {
            master,
            mode,
            slaves,
        }
    }

    fn notify_stop(&self, slaves: &[usize]) {
        for &slave in slaves {
            if let Some(iface) = self.interface(slave) {
                iface.post(BusEvent::Stop);
            }
        }
    }

    fn active(
        &mut self,
        master: usize,
        mode: TransactionMode,
        mut slaves: Vec<usize, MAX_DEVICES>,
    ) -> BusState {
        let Some(m) = self.interface(master) else {
            self.notify_stop(&slaves);
            return BusState::Idle;
        };
        if m.stop.replace(false) {
            self.notify_stop(&slaves);
            return BusState::Idle;
        }
        if m.start.replace(false) {
            self.notify_stop(&slaves);
            m.post(BusEvent::Start { repeated: true });
            self.stats.starts += 1;
            return BusState::SlaveAddressing {
                master,
                nacked: false,
            };
        }

        // clock stretching
        let stretched = !m.ready.get()
            || slaves
                .iter()
                .filter_map(|&slave| self.interface(slave))
                .any(|iface| !iface.ready.get());
        if stretched {
            return BusState::Active {
                master,
                mode,
                slaves,
            };
        }

        match mode {
            TransactionMode::Write | TransactionMode::GeneralCall => {
                let byte = m.data.get();
                let devices = &self.devices;
                // a slave that NACKs has left the transfer
                slaves.retain(|&slave| {
                    let Some(iface) = devices.get(slave).map(|device| device.interface()) else {
                        return false;
                    };
                    let ack = iface.ack.get();
                    iface.post(BusEvent::DataReceived { byte, acked: ack });
                    ack
                });
                let acked = !slaves.is_empty();
                m.post(BusEvent::DataSent { acked });
                if !acked {
                    self.stats.data_nacks += 1;
                    twi_debug!(self.logger, "sim: data byte 0x{:02X} NACKed", byte);
                }
            }
            TransactionMode::Read => {
                // open drain: any device pulling a bit low wins
                let byte = slaves
                    .iter()
                    .filter_map(|&slave| self.interface(slave))
                    .fold(0xFF, |wired, iface| wired & iface.data.get());
                let acked = m.ack.get();
                for iface in slaves.iter().filter_map(|&slave| self.interface(slave)) {
                    iface.post(BusEvent::DataSent { acked });
                }
                if !acked {
                    // slave transmitters stop after the master's NACK
                    slaves.clear();
                }
                m.post(BusEvent::DataReceived { byte, acked });
            }
        }
        self.stats.bytes_transferred += 1;
        BusState::Active {
            master,
            mode,
            slaves,
        }
    }
}
