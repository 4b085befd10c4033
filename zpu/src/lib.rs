//! Interpreter for the ZPU, a zero-operand stack machine.
//!
//! The whole machine state is a program counter and a stack pointer; the stack itself lives in
//! the same flat, big-endian memory as code and data. All 32 emulated opcodes are executed
//! directly instead of trapping into a microcode vector.

#![no_std]

#[macro_use]
extern crate log;

use core::fmt;

mod bus;
mod cpu;

pub use bus::Bus;
pub use cpu::{Cpu, RETURN_TRAP};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// The program hit a `BREAKPOINT` opcode at `pc`.
    Breakpoint { pc: u32 },
    Illegal { pc: u32, opcode: u8 },
    DivideByZero { pc: u32 },
    /// An access fell outside the memory behind the bus.
    Bus { addr: u32 },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Breakpoint { pc } => write!(f, "breakpoint at {pc:08x}"),
            Self::Illegal { pc, opcode } => write!(f, "illegal opcode {opcode:02x} at {pc:08x}"),
            Self::DivideByZero { pc } => write!(f, "divide by zero at {pc:08x}"),
            Self::Bus { addr } => write!(f, "bus error at {addr:08x}"),
        }
    }
}
