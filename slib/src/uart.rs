//! UART channel registers.

use core::fmt;

use bitflags::bitflags;
use soc::regs::{Mmio, UART_BASE, UART_SPACING};

use crate::Console;

pub const DATA: usize = 0x0;
pub const CTRL: usize = 0x4;
pub const STATUS: usize = 0x4;
pub const FIFO: usize = 0x8;

bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Status: u32 {
        const RX_FIFO_EMPTY = 0x0000_0001;
        const RX_FIFO_FULL = 0x0000_0002;
        const RX_DATA_READY = 0x0000_0004;
        const RX_OVERRUN = 0x0000_0008;
        const RX_FIFO_ENABLED = 0x0000_0020;
        const TX_FIFO_EMPTY = 0x0001_0000;
        const TX_FIFO_FULL = 0x0002_0000;
        const TX_BUSY = 0x0004_0000;
        const TX_DATA_LOADED = 0x0008_0000;
        const TX_FIFO_ENABLED = 0x0040_0000;
    }

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Ctrl: u32 {
        const RX_ENABLE = 0x0000_0001;
        const RX_FIFO_ENABLE = 0x0000_0002;
        const RX_RESET = 0x0000_0004;
        const TX_ENABLE = 0x0001_0000;
        const TX_FIFO_ENABLE = 0x0002_0000;
        const TX_RESET = 0x0004_0000;
    }
}

impl Ctrl {
    pub const UNBUFFERED: Self = Self::TX_ENABLE.union(Self::RX_ENABLE);
    pub const BUFFERED: Self = Self::UNBUFFERED
        .union(Self::TX_FIFO_ENABLE)
        .union(Self::RX_FIFO_ENABLE);
}

impl Status {
    /// Whether the transmitter can take another byte.
    pub fn tx_ready(self) -> bool {
        if self.contains(Self::TX_FIFO_ENABLED) {
            !self.contains(Self::TX_FIFO_FULL)
        } else {
            !self.contains(Self::TX_DATA_LOADED)
        }
    }
}

pub struct Uart {
    regs: Mmio,
}

impl Uart {
    /// # Safety
    ///
    /// Must only be called on the target. Channel 0 is the console, channel 1 the debug port.
    pub unsafe fn new(channel: u8) -> Self {
        Self {
            regs: unsafe { Mmio::new(UART_BASE + usize::from(channel) * UART_SPACING) },
        }
    }

    pub fn status(&self) -> Status {
        Status::from_bits_retain(self.regs.read(STATUS))
    }

    pub fn set_fifo(&mut self, enabled: bool) {
        let ctrl = if enabled {
            Ctrl::BUFFERED
        } else {
            Ctrl::UNBUFFERED
        };
        self.regs.write(CTRL, ctrl.bits());
    }
}

impl fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

impl Console for Uart {
    fn read_byte(&mut self) -> Option<u8> {
        loop {
            if let Some(byte) = self.poll_byte() {
                return Some(byte);
            }
        }
    }

    fn poll_byte(&mut self) -> Option<u8> {
        self.status()
            .contains(Status::RX_DATA_READY)
            .then(|| self.regs.read(DATA) as u8)
    }

    fn write_byte(&mut self, byte: u8) {
        while !self.status().tx_ready() {}
        self.regs.write(DATA, u32::from(byte));
    }
}

#[cfg(test)]
mod tests {
    use crate::uart::{Ctrl, Status};

    #[test]
    fn tx_ready_depends_on_fifo_mode() {
        assert!(Status::empty().tx_ready());
        assert!(!Status::TX_DATA_LOADED.tx_ready());
        assert!((Status::TX_FIFO_ENABLED | Status::TX_DATA_LOADED).tx_ready());
        assert!(!(Status::TX_FIFO_ENABLED | Status::TX_FIFO_FULL).tx_ready());
    }

    #[test]
    fn control_words() {
        assert_eq!(Ctrl::UNBUFFERED.bits(), 0x0001_0001);
        assert_eq!(Ctrl::BUFFERED.bits(), 0x0003_0003);
    }
}
