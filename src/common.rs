// Licensed under the Apache-2.0 license

//! Logging sinks shared by the driver and the bus simulator.
//!
//! The driver never formats into a buffer of its own: messages are handed to a
//! [`Logger`] as `fmt::Arguments`, so a build using [`NoOpLogger`] carries no
//! formatting code at all.

use core::fmt;

/// Destination for diagnostic messages.
pub trait Logger {
    fn debug(&mut self, args: fmt::Arguments<'_>);
    fn error(&mut self, args: fmt::Arguments<'_>);
}

/// Logger that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn debug(&mut self, _args: fmt::Arguments<'_>) {}
    fn error(&mut self, _args: fmt::Arguments<'_>) {}
}

/// Logger writing one line per message to an `embedded_io` sink, usually the
/// debug UART.
pub struct WriteLogger<W: embedded_io::Write> {
    out: W,
}

impl<W: embedded_io::Write> WriteLogger<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, level: &str, args: fmt::Arguments<'_>) {
        // A full UART must not stall the ISR that produced the message.
        let _ = self.out.write_all(level.as_bytes());
        let _ = self.out.write_fmt(args);
        let _ = self.out.write_all(b"\r\n");
    }
}

impl<W: embedded_io::Write> Logger for WriteLogger<W> {
    fn debug(&mut self, args: fmt::Arguments<'_>) {
        self.line("[DEBUG] ", args);
    }

    fn error(&mut self, args: fmt::Arguments<'_>) {
        self.line("[ERROR] ", args);
    }
}

impl<L: Logger + ?Sized> Logger for &mut L {
    fn debug(&mut self, args: fmt::Arguments<'_>) {
        (**self).debug(args);
    }

    fn error(&mut self, args: fmt::Arguments<'_>) {
        (**self).error(args);
    }
}

#[macro_export]
macro_rules! twi_debug {
    ($logger:expr, $($arg:tt)*) => {
        {
            #[allow(unused_imports)]
            use $crate::common::Logger as _;
            $logger.debug(format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! twi_error {
    ($logger:expr, $($arg:tt)*) => {
        {
            #[allow(unused_imports)]
            use $crate::common::Logger as _;
            $logger.error(format_args!($($arg)*))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::vec::Vec;

    #[derive(Default)]
    struct RecordingLogger {
        lines: Vec<String>,
    }

    impl Logger for RecordingLogger {
        fn debug(&mut self, args: fmt::Arguments<'_>) {
            self.lines.push(std::format!("debug: {args}"));
        }

        fn error(&mut self, args: fmt::Arguments<'_>) {
            self.lines.push(std::format!("error: {args}"));
        }
    }

    #[test]
    fn test_write_logger_formats_lines() {
        let mut buf = [0u8; 64];
        {
            let mut logger = WriteLogger::new(&mut buf[..]);
            logger.debug(format_args!("status 0x{:02X}", 0x28));
        }
        assert!(buf.starts_with(b"[DEBUG] status 0x28\r\n"));
    }

    #[test]
    fn test_write_logger_drops_overflow() {
        let mut buf = [0u8; 8];
        let mut logger = WriteLogger::new(&mut buf[..]);
        logger.error(format_args!("a message longer than the sink"));
        assert_eq!(&buf, b"[ERROR] ");
    }

    fn report<L: Logger>(logger: &mut L, code: u8) {
        twi_error!(logger, "status 0x{:02X}", code);
    }

    #[test]
    fn test_macros_accept_borrowed_logger() {
        let mut logger = RecordingLogger::default();
        report(&mut logger, 0x38);
        report(&mut &mut logger, 0x20);
        assert_eq!(logger.lines, ["error: status 0x38", "error: status 0x20"]);
    }

    #[test]
    fn test_macros_forward_to_logger() {
        let mut logger = RecordingLogger::default();
        twi_debug!(logger, "bus {}", 1);
        twi_error!(logger, "lost");
        assert_eq!(logger.lines, ["debug: bus 1", "error: lost"]);
    }
}
