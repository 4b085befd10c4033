use crate::Fault;

/// Big-endian byte addressed memory as seen by the CPU.
pub trait Bus {
    fn read_u8(&mut self, addr: u32) -> Result<u8, Fault>;

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), Fault>;

    fn read_u16(&mut self, addr: u32) -> Result<u16, Fault> {
        Ok(u16::from_be_bytes([
            self.read_u8(addr)?,
            self.read_u8(addr.wrapping_add(1))?,
        ]))
    }

    fn write_u16(&mut self, addr: u32, value: u16) -> Result<(), Fault> {
        let [hi, lo] = value.to_be_bytes();
        self.write_u8(addr, hi)?;
        self.write_u8(addr.wrapping_add(1), lo)
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32, Fault> {
        let hi = u32::from(self.read_u16(addr)?);
        let lo = u32::from(self.read_u16(addr.wrapping_add(2))?);
        Ok((hi << 16) | lo)
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), Fault> {
        self.write_u16(addr, (value >> 16) as u16)?;
        self.write_u16(addr.wrapping_add(2), value as u16)
    }
}

impl Bus for [u8] {
    fn read_u8(&mut self, addr: u32) -> Result<u8, Fault> {
        self.get(addr as usize).copied().ok_or(Fault::Bus { addr })
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), Fault> {
        let byte = self.get_mut(addr as usize).ok_or(Fault::Bus { addr })?;
        *byte = value;
        Ok(())
    }
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn read_u8(&mut self, addr: u32) -> Result<u8, Fault> {
        (**self).read_u8(addr)
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), Fault> {
        (**self).write_u8(addr, value)
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32, Fault> {
        (**self).read_u32(addr)
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), Fault> {
        (**self).write_u32(addr, value)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Bus, Fault};

    #[test]
    fn words_are_big_endian() {
        let mut mem = [0u8; 8];
        let bus = &mut mem[..];

        bus.write_u32(0, 0x1234_5678).unwrap();
        bus.write_u16(4, 0xabcd).unwrap();

        assert_eq!(mem[..6], [0x12, 0x34, 0x56, 0x78, 0xab, 0xcd]);
        assert_eq!(mem[..].read_u32(2).unwrap(), 0x5678_abcd);
    }

    #[test]
    fn out_of_range() {
        let mut mem = [0u8; 4];

        assert_eq!(mem[..].read_u32(2), Err(Fault::Bus { addr: 4 }));
        assert_eq!(mem[..].write_u8(9, 1), Err(Fault::Bus { addr: 9 }));
    }
}
