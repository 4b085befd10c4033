use crate::{Bus, Fault};

/// Return address planted under the arguments of [`Cpu::call`]. Execution stops once the callee
/// pops it into `pc`.
pub const RETURN_TRAP: u32 = 0xffff_fffc;

mod op {
    pub const BREAKPOINT: u8 = 0x00;
    pub const PUSHSP: u8 = 0x02;
    pub const POPPC: u8 = 0x04;
    pub const ADD: u8 = 0x05;
    pub const AND: u8 = 0x06;
    pub const OR: u8 = 0x07;
    pub const LOAD: u8 = 0x08;
    pub const NOT: u8 = 0x09;
    pub const FLIP: u8 = 0x0a;
    pub const NOP: u8 = 0x0b;
    pub const STORE: u8 = 0x0c;
    pub const POPSP: u8 = 0x0d;

    pub const LOADH: u8 = 34;
    pub const STOREH: u8 = 35;
    pub const LESSTHAN: u8 = 36;
    pub const LESSTHANOREQUAL: u8 = 37;
    pub const ULESSTHAN: u8 = 38;
    pub const ULESSTHANOREQUAL: u8 = 39;
    pub const SWAP: u8 = 40;
    pub const MULT: u8 = 41;
    pub const LSHIFTRIGHT: u8 = 42;
    pub const ASHIFTLEFT: u8 = 43;
    pub const ASHIFTRIGHT: u8 = 44;
    pub const CALL: u8 = 45;
    pub const EQ: u8 = 46;
    pub const NEQ: u8 = 47;
    pub const NEG: u8 = 48;
    pub const SUB: u8 = 49;
    pub const XOR: u8 = 50;
    pub const LOADB: u8 = 51;
    pub const STOREB: u8 = 52;
    pub const DIV: u8 = 53;
    pub const MOD: u8 = 54;
    pub const EQBRANCH: u8 = 55;
    pub const NEQBRANCH: u8 = 56;
    pub const POPPCREL: u8 = 57;
    pub const CONFIG: u8 = 58;
    pub const PUSHPC: u8 = 59;
    pub const PUSHSPADD: u8 = 61;
    pub const MULT16X16: u8 = 62;
    pub const CALLPCREL: u8 = 63;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cpu {
    pub pc: u32,
    pub sp: u32,
    /// Set while the previous instruction was an `IM`, so the next one extends the immediate.
    idim: bool,
}

impl Cpu {
    pub fn new(pc: u32, sp: u32) -> Self {
        Self { pc, sp, idim: false }
    }

    /// Calls the function at `entry` with the stack starting at `sp`, and runs until it returns.
    ///
    /// `args` are pushed last to first so the first one sits right above the return address.
    pub fn call(
        &mut self,
        bus: &mut (impl Bus + ?Sized),
        entry: u32,
        sp: u32,
        args: &[u32],
    ) -> Result<(), Fault> {
        self.sp = sp;
        self.idim = false;
        for &arg in args.iter().rev() {
            self.push(bus, arg)?;
        }
        self.push(bus, RETURN_TRAP)?;
        self.pc = entry;
        self.run_until(bus, RETURN_TRAP)
    }

    pub fn run_until(&mut self, bus: &mut (impl Bus + ?Sized), stop: u32) -> Result<(), Fault> {
        while self.pc != stop {
            self.step(bus)?;
        }
        Ok(())
    }

    fn push(&mut self, bus: &mut (impl Bus + ?Sized), value: u32) -> Result<(), Fault> {
        self.sp = self.sp.wrapping_sub(4);
        bus.write_u32(self.sp, value)
    }

    fn pop(&mut self, bus: &mut (impl Bus + ?Sized)) -> Result<u32, Fault> {
        let value = bus.read_u32(self.sp)?;
        self.sp = self.sp.wrapping_add(4);
        Ok(value)
    }

    fn top(&self, bus: &mut (impl Bus + ?Sized)) -> Result<u32, Fault> {
        bus.read_u32(self.sp)
    }

    fn set_top(&self, bus: &mut (impl Bus + ?Sized), value: u32) -> Result<(), Fault> {
        bus.write_u32(self.sp, value)
    }

    /// Pops `a` (the top), then `b`, and pushes `f(a, b)`.
    fn binary(
        &mut self,
        bus: &mut (impl Bus + ?Sized),
        f: impl FnOnce(u32, u32) -> u32,
    ) -> Result<(), Fault> {
        let a = self.pop(bus)?;
        let b = self.top(bus)?;
        self.set_top(bus, f(a, b))
    }

    fn unary(
        &mut self,
        bus: &mut (impl Bus + ?Sized),
        f: impl FnOnce(u32) -> u32,
    ) -> Result<(), Fault> {
        let a = self.top(bus)?;
        self.set_top(bus, f(a))
    }

    /// `sp` relative address of the `LOADSP`/`STORESP` operand field.
    fn sp_offset(&self, opcode: u8) -> u32 {
        self.sp.wrapping_add((u32::from(opcode & 0x1f) ^ 0x10) * 4)
    }

    /// Executes one instruction.
    pub fn step(&mut self, bus: &mut (impl Bus + ?Sized)) -> Result<(), Fault> {
        let pc = self.pc;
        let opcode = bus.read_u8(pc)?;
        trace!("{pc:08x}  {opcode:02x}  sp:{:08x}", self.sp);

        let idim = self.idim;
        self.idim = false;
        let mut next = pc.wrapping_add(1);

        match opcode {
            0x80..=0xff => {
                let imm = u32::from(opcode & 0x7f);
                if idim {
                    let top = self.top(bus)?;
                    self.set_top(bus, (top << 7) | imm)?;
                } else {
                    // Sign extend the 7-bit field.
                    self.push(bus, ((imm << 25) as i32 >> 25) as u32)?;
                }
                self.idim = true;
            }
            0x60..=0x7f => {
                let value = bus.read_u32(self.sp_offset(opcode))?;
                self.push(bus, value)?;
            }
            0x40..=0x5f => {
                let addr = self.sp_offset(opcode);
                let value = self.pop(bus)?;
                bus.write_u32(addr, value)?;
            }
            0x20..=0x3f => next = self.emulated(bus, pc, opcode)?,
            0x10..=0x1f => {
                let value = bus.read_u32(self.sp.wrapping_add(u32::from(opcode & 0xf) * 4))?;
                self.unary(bus, |top| top.wrapping_add(value))?;
            }
            op::BREAKPOINT => return Err(Fault::Breakpoint { pc }),
            op::PUSHSP => {
                let sp = self.sp;
                self.push(bus, sp)?;
            }
            op::POPPC => next = self.pop(bus)?,
            op::ADD => self.binary(bus, u32::wrapping_add)?,
            op::AND => self.binary(bus, |a, b| a & b)?,
            op::OR => self.binary(bus, |a, b| a | b)?,
            op::LOAD => {
                let addr = self.top(bus)?;
                let value = bus.read_u32(addr)?;
                self.set_top(bus, value)?;
            }
            op::NOT => self.unary(bus, |a| !a)?,
            op::FLIP => self.unary(bus, u32::reverse_bits)?,
            op::NOP => {}
            op::STORE => {
                let addr = self.pop(bus)?;
                let value = self.pop(bus)?;
                bus.write_u32(addr, value)?;
            }
            op::POPSP => self.sp = self.top(bus)?,
            _ => return Err(Fault::Illegal { pc, opcode }),
        }

        self.pc = next;
        Ok(())
    }

    /// Opcodes the smallest cores trap to microcode for. Returns the next `pc`.
    fn emulated(
        &mut self,
        bus: &mut (impl Bus + ?Sized),
        pc: u32,
        opcode: u8,
    ) -> Result<u32, Fault> {
        let next = pc.wrapping_add(1);
        let flag = |b: bool| u32::from(b);

        match opcode {
            op::LOADH => {
                let addr = self.top(bus)?;
                let value = bus.read_u16(addr)?;
                self.set_top(bus, value.into())?;
            }
            op::STOREH => {
                let addr = self.pop(bus)?;
                let value = self.pop(bus)?;
                bus.write_u16(addr, value as u16)?;
            }
            op::LESSTHAN => self.binary(bus, |a, b| flag((a as i32) < (b as i32)))?,
            op::LESSTHANOREQUAL => self.binary(bus, |a, b| flag((a as i32) <= (b as i32)))?,
            op::ULESSTHAN => self.binary(bus, |a, b| flag(a < b))?,
            op::ULESSTHANOREQUAL => self.binary(bus, |a, b| flag(a <= b))?,
            op::SWAP => self.unary(bus, |a| a.rotate_left(16))?,
            op::MULT => self.binary(bus, u32::wrapping_mul)?,
            op::LSHIFTRIGHT => self.binary(bus, |shift, value| {
                value.checked_shr(shift & 0x3f).unwrap_or(0)
            })?,
            op::ASHIFTLEFT => self.binary(bus, |shift, value| {
                value.checked_shl(shift & 0x3f).unwrap_or(0)
            })?,
            op::ASHIFTRIGHT => self.binary(bus, |shift, value| {
                ((value as i32) >> (shift & 0x3f).min(31)) as u32
            })?,
            op::CALL => {
                let target = self.top(bus)?;
                self.set_top(bus, next)?;
                return Ok(target);
            }
            op::EQ => self.binary(bus, |a, b| flag(a == b))?,
            op::NEQ => self.binary(bus, |a, b| flag(a != b))?,
            op::NEG => self.unary(bus, u32::wrapping_neg)?,
            op::SUB => self.binary(bus, |a, b| b.wrapping_sub(a))?,
            op::XOR => self.binary(bus, |a, b| a ^ b)?,
            op::LOADB => {
                let addr = self.top(bus)?;
                let value = bus.read_u8(addr)?;
                self.set_top(bus, value.into())?;
            }
            op::STOREB => {
                let addr = self.pop(bus)?;
                let value = self.pop(bus)?;
                bus.write_u8(addr, value as u8)?;
            }
            op::DIV | op::MOD => {
                let a = self.pop(bus)? as i32;
                let b = self.top(bus)? as i32;
                if b == 0 {
                    return Err(Fault::DivideByZero { pc });
                }
                let result = if opcode == op::DIV {
                    a.wrapping_div(b)
                } else {
                    a.wrapping_rem(b)
                };
                self.set_top(bus, result as u32)?;
            }
            op::EQBRANCH | op::NEQBRANCH => {
                let target = pc.wrapping_add(self.pop(bus)?);
                let compare = self.pop(bus)?;
                if (compare == 0) == (opcode == op::EQBRANCH) {
                    return Ok(target);
                }
            }
            op::POPPCREL => return Ok(pc.wrapping_add(self.pop(bus)?)),
            op::CONFIG => {
                self.pop(bus)?;
            }
            op::PUSHPC => self.push(bus, pc)?,
            op::PUSHSPADD => {
                let sp = self.sp;
                self.unary(bus, |words| sp.wrapping_add(words.wrapping_mul(4)))?;
            }
            op::MULT16X16 => self.binary(bus, |a, b| (a & 0xffff) * (b & 0xffff))?,
            op::CALLPCREL => {
                let offset = self.top(bus)?;
                self.set_top(bus, next)?;
                return Ok(pc.wrapping_add(offset));
            }
            _ => return Err(Fault::Illegal { pc, opcode }),
        }
        Ok(next)
    }
}
