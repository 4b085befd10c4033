//! Console plumbing shared by the boot program and the monitor.

#![no_std]

use core::fmt;

mod line;
pub mod uart;

pub use line::{read_line, LINE_LEN};

pub const ESC: u8 = 0x1b;
pub const BACKSPACE: u8 = 0x08;
pub const DELETE: u8 = 0x7f;

/// A byte-oriented terminal.
pub trait Console: fmt::Write {
    /// Blocks until a byte arrives. `None` means the input side is closed for good.
    fn read_byte(&mut self) -> Option<u8>;

    /// Returns a byte if one is already waiting.
    fn poll_byte(&mut self) -> Option<u8>;

    /// Sends a raw byte, bypassing UTF-8 formatting.
    fn write_byte(&mut self, byte: u8);
}

impl<C: Console + ?Sized> Console for &mut C {
    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }

    fn poll_byte(&mut self) -> Option<u8> {
        (**self).poll_byte()
    }

    fn write_byte(&mut self, byte: u8) {
        (**self).write_byte(byte)
    }
}
