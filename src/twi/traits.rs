// Licensed under the Apache-2.0 license

//! # Slave-side capability
//!
//! When another master addresses this peripheral, the driver hands every byte
//! to a [`SlaveHandler`] supplied by the application. The handler decides what
//! the byte means, what to answer on a read, and whether the bus should be
//! told that the transfer is over.
//!
//! ## Exchange flow
//!
//! ```text
//! SLA+W  -> Received{0} -> Received{1} -> ... -> transmission_over()
//! SLA+R  -> Requested{0} -> Requested{1} -> ... -> transmission_over()
//! ```
//!
//! Returning [`SlaveFlow::LastByte`] makes the driver answer the next byte with
//! NACK (receive) or clear TWEA before shifting out the current byte
//! (transmit), so the remote master sees the end of the data.

use crate::twi::common::Error;

/// One byte of a slave transfer.
#[derive(Debug, PartialEq, Eq)]
pub enum SlaveExchange<'a> {
    /// A remote master wrote `byte`; `index` counts from zero after the
    /// address byte.
    Received {
        index: usize,
        byte: u8,
        general_call: bool,
    },
    /// A remote master reads; the handler stores the byte to send in `byte`.
    Requested { index: usize, byte: &'a mut u8 },
}

/// Handler's verdict on the exchange that just happened.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveFlow {
    /// Keep acknowledging.
    More,
    /// End the transfer after this byte.
    LastByte,
}

/// Application callbacks for slave operation.
///
/// Both methods are called from [`Twi::process`](crate::twi::Twi::process),
/// usually in interrupt context. They must not block.
pub trait SlaveHandler {
    /// Consume a received byte or produce one to transmit.
    ///
    /// # Errors
    ///
    /// Any error ends the transfer: the driver NACKs the next byte (or sends
    /// its last byte) and returns the error from `process`.
    fn handle_data(&self, bus: usize, exchange: SlaveExchange<'_>) -> Result<SlaveFlow, Error>;

    /// The remote master ended the transfer (STOP, repeated START, or NACK).
    fn transmission_over(&self, bus: usize);
}

/// Handler installed until the application provides its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotConfigured;

impl SlaveHandler for NotConfigured {
    fn handle_data(&self, _bus: usize, _exchange: SlaveExchange<'_>) -> Result<SlaveFlow, Error> {
        Err(Error::SlaveHandlersNotSet)
    }

    fn transmission_over(&self, _bus: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_configured_rejects_every_exchange() {
        let handler = NotConfigured;
        let received = SlaveExchange::Received {
            index: 0,
            byte: 0x01,
            general_call: false,
        };
        assert_eq!(
            handler.handle_data(0, received),
            Err(Error::SlaveHandlersNotSet)
        );

        let mut byte = 0;
        let requested = SlaveExchange::Requested {
            index: 0,
            byte: &mut byte,
        };
        assert_eq!(
            handler.handle_data(1, requested),
            Err(Error::SlaveHandlersNotSet)
        );
        assert_eq!(byte, 0);
    }
}
