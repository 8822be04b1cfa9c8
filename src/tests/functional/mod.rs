// Licensed under the Apache-2.0 license

//! End-to-end checks of the TWI driver on the simulated bus. They run on the
//! host under `cargo test` and can be called from firmware with the debug
//! UART as logger.

pub mod twi_bus_test;
