//! The flat address space shared by the monitor and the applications it loads.

use slib::{
    uart::{self, Status},
    Console,
};
use soc::{regs::UART_BASE, SocConfig};
use zpu::{Bus, Fault};

const UART0: u32 = UART_BASE as u32;

/// Backing store for every implemented memory region, from address zero up to the top of the
/// highest one.
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new(size: u32) -> Self {
        Self {
            bytes: vec![0; size as usize],
        }
    }

    pub fn for_config(cfg: &SocConfig) -> Self {
        Self::new(cfg.memory_top())
    }

    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn slice(&self, addr: u32, len: u32) -> Result<&[u8], Fault> {
        let start = addr as usize;
        self.bytes
            .get(start..start.saturating_add(len as usize))
            .ok_or(Fault::Bus { addr })
    }

    pub fn slice_mut(&mut self, addr: u32, len: u32) -> Result<&mut [u8], Fault> {
        let start = addr as usize;
        self.bytes
            .get_mut(start..start.saturating_add(len as usize))
            .ok_or(Fault::Bus { addr })
    }
}

impl Bus for Memory {
    fn read_u8(&mut self, addr: u32) -> Result<u8, Fault> {
        self.bytes[..].read_u8(addr)
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), Fault> {
        self.bytes[..].write_u8(addr, value)
    }
}

/// Memory with the console UART mapped at its hardware address, as an interpreted application
/// sees the bus. The UART registers only take word accesses.
pub struct Mapped<'a, C: ?Sized> {
    mem: &'a mut Memory,
    console: &'a mut C,
    rx: Option<u8>,
}

impl<'a, C: Console + ?Sized> Mapped<'a, C> {
    pub fn new(mem: &'a mut Memory, console: &'a mut C) -> Self {
        Self {
            mem,
            console,
            rx: None,
        }
    }

    fn uart_reg(addr: u32) -> Option<usize> {
        addr.checked_sub(UART0)
            .filter(|&offset| offset < soc::regs::UART_SPACING as u32)
            .map(|offset| offset as usize)
    }

    fn status(&mut self) -> Status {
        if self.rx.is_none() {
            self.rx = self.console.poll_byte();
        }
        let rx = if self.rx.is_some() {
            Status::RX_DATA_READY
        } else {
            Status::RX_FIFO_EMPTY
        };
        Status::TX_FIFO_EMPTY | rx
    }
}

impl<C: Console + ?Sized> Bus for Mapped<'_, C> {
    fn read_u8(&mut self, addr: u32) -> Result<u8, Fault> {
        match Self::uart_reg(addr) {
            Some(_) => Err(Fault::Bus { addr }),
            None => self.mem.read_u8(addr),
        }
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), Fault> {
        match Self::uart_reg(addr) {
            Some(_) => Err(Fault::Bus { addr }),
            None => self.mem.write_u8(addr, value),
        }
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32, Fault> {
        match Self::uart_reg(addr) {
            Some(uart::DATA) => {
                let byte = self.rx.take().or_else(|| self.console.poll_byte());
                Ok(byte.map_or(0, u32::from))
            }
            Some(uart::STATUS) => Ok(self.status().bits()),
            Some(_) => Ok(0),
            None => self.mem.read_u32(addr),
        }
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), Fault> {
        match Self::uart_reg(addr) {
            Some(uart::DATA) => {
                self.console.write_byte(value as u8);
                Ok(())
            }
            // Control and FIFO registers have no hosted effect.
            Some(_) => Ok(()),
            None => self.mem.write_u32(addr, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use slib::uart::{self, Status};

    use super::*;
    use crate::dump::tests::Tty;

    #[test]
    fn sized_from_config() {
        let mem = Memory::for_config(&SocConfig::BUILTIN);
        assert_eq!(mem.size(), SocConfig::BUILTIN.memory_top());
    }

    #[test]
    fn slices_are_bounds_checked() {
        let mut mem = Memory::new(0x100);
        mem.slice_mut(0xf0, 0x10).unwrap().fill(7);
        assert_eq!(mem.read_u32(0xfc).unwrap(), 0x0707_0707);
        assert_eq!(mem.slice(0xf0, 0x11).err(), Some(Fault::Bus { addr: 0xf0 }));
        assert!(mem.read_u8(0x100).is_err());
    }

    #[test]
    fn uart_window() {
        let mut mem = Memory::new(0x100);
        let mut tty = Tty::default();
        tty.keys.push_back(b'k');
        let mut bus = Mapped::new(&mut mem, &mut tty);
        let data = UART0 + uart::DATA as u32;
        let status = UART0 + uart::STATUS as u32;

        bus.write_u32(data, u32::from(b'!')).unwrap();
        let ready = Status::from_bits_retain(bus.read_u32(status).unwrap());
        assert!(ready.contains(Status::RX_DATA_READY));
        assert!(ready.tx_ready());
        assert_eq!(bus.read_u32(data).unwrap(), u32::from(b'k'));
        let idle = Status::from_bits_retain(bus.read_u32(status).unwrap());
        assert!(!idle.contains(Status::RX_DATA_READY));
        assert!(bus.read_u8(data).is_err());

        bus.write_u32(0x10, 0x0102_0304).unwrap();
        assert_eq!(bus.read_u8(0x13).unwrap(), 4);
        assert_eq!(tty.output, b"!");
    }
}
