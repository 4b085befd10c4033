//! SD/MMC block I/O for the ZPU SoC.
//!
//! The card protocol runs in the controller; software pokes a sector address and a command,
//! then shuttles bytes while polling the status register. A countdown guards every transfer
//! so a hung controller gets reset and retried instead of stalling the caller forever.

#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;
#[macro_use]
extern crate log;

use core::fmt;

use bitflags::bitflags;

mod disks;
mod extent;
pub mod mmio;
pub mod rafile;

pub use disks::{ioctl, Disks, Policy};
pub use extent::{BlockDevice, Drive, Extent};

pub const SECTOR_SIZE: usize = 512;

/// Failure half of a block device result. Success is `Ok`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiskError {
    Error,
    NotReady,
    ParamError,
}

impl DiskError {
    /// Numeric `DRESULT` code.
    pub const fn code(self) -> u8 {
        match self {
            Self::Error => 1,
            Self::NotReady => 3,
            Self::ParamError => 4,
        }
    }
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "R/W error",
            Self::NotReady => "not ready",
            Self::ParamError => "invalid parameter",
        })
    }
}

pub type DResult<T = ()> = Result<T, DiskError>;

bitflags! {
    /// Drive status as reported to the filesystem layer.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct DStatus: u8 {
        const NOINIT = 0x01;
        const NODISK = 0x02;
        const PROTECT = 0x04;
    }
}

bitflags! {
    /// Live SD controller status register.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SdStatus: u32 {
        const CONTINUE = 0x0000_0001;
        const BUSY = 0x0000_0002;
        const HNDSHK_OUT = 0x0000_0004;
        const HNDSHK_IN = 0x0000_0008;
        const DATA_REQ = 0x0000_0010;
        const DATA_VALID = 0x0000_0020;
        const OVERRUN = 0x0000_0040;
        const IDLESTATE = 0x0001_0000;
        const ERASERESET = 0x0002_0000;
        const ILLEGALCMD = 0x0004_0000;
        const CRCERROR = 0x0008_0000;
        const ERASESEQ = 0x0010_0000;
        const ADDRERR = 0x0020_0000;
        const PARAMERR = 0x0040_0000;

        /// Card-reported error bits.
        const ERROR = 0xFFFF_0000;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CardType {
    Sd,
    Sdhc,
}

impl CardType {
    /// `1` selects SDHC, anything else SD.
    pub const fn from_index(index: u32) -> Self {
        if index == 1 {
            Self::Sdhc
        } else {
            Self::Sd
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SdCommand {
    Reset,
    Write,
    Read,
    CardType(CardType),
}

impl SdCommand {
    pub const fn code(self) -> u32 {
        match self {
            Self::Reset => 0x01,
            Self::Write => 0x02,
            Self::Read => 0x04,
            Self::CardType(CardType::Sd) => 0x08,
            Self::CardType(CardType::Sdhc) => 0x88,
        }
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0x01 => Self::Reset,
            0x02 => Self::Write,
            0x04 => Self::Read,
            0x08 => Self::CardType(CardType::Sd),
            0x88 => Self::CardType(CardType::Sdhc),
            _ => return None,
        })
    }
}

/// Capacity of a card, in sectors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Geometry {
    pub sectors: u32,
    pub erase_block: u32,
}

/// One SD controller channel.
pub trait SdController {
    fn set_address(&mut self, sector: u32);

    fn command(&mut self, command: SdCommand);

    fn status(&mut self) -> SdStatus;

    fn read_data(&mut self) -> u8;

    fn write_data(&mut self, byte: u8);

    /// Card capacity, if the controller can report it.
    fn geometry(&self) -> Option<Geometry> {
        None
    }
}

impl<C: SdController + ?Sized> SdController for &mut C {
    fn set_address(&mut self, sector: u32) {
        (**self).set_address(sector);
    }

    fn command(&mut self, command: SdCommand) {
        (**self).command(command);
    }

    fn status(&mut self) -> SdStatus {
        (**self).status()
    }

    fn read_data(&mut self) -> u8 {
        (**self).read_data()
    }

    fn write_data(&mut self, byte: u8) {
        (**self).write_data(byte);
    }

    fn geometry(&self) -> Option<Geometry> {
        (**self).geometry()
    }
}

#[cfg(feature = "alloc")]
impl<C: SdController + ?Sized> SdController for alloc::boxed::Box<C> {
    fn set_address(&mut self, sector: u32) {
        (**self).set_address(sector);
    }

    fn command(&mut self, command: SdCommand) {
        (**self).command(command);
    }

    fn status(&mut self) -> SdStatus {
        (**self).status()
    }

    fn read_data(&mut self) -> u8 {
        (**self).read_data()
    }

    fn write_data(&mut self, byte: u8) {
        (**self).write_data(byte);
    }

    fn geometry(&self) -> Option<Geometry> {
        (**self).geometry()
    }
}

/// A seconds-resolution watchdog for bounding polls.
pub trait Countdown {
    fn start(&mut self, secs: u32);

    fn expired(&mut self) -> bool;
}

#[cfg(feature = "alloc")]
impl<T: Countdown + ?Sized> Countdown for alloc::boxed::Box<T> {
    fn start(&mut self, secs: u32) {
        (**self).start(secs);
    }

    fn expired(&mut self) -> bool {
        (**self).expired()
    }
}
