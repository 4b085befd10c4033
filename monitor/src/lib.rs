//! The two programs that run on the SoC: IOCP, the boot program, and ZPUTA, the diagnostic
//! shell. Both are written against the device seams in [`Board`], so the same code runs on the
//! hardware or against the hosted emulation in [`hosted`].

#[macro_use]
extern crate log;

pub mod dump;
pub mod exec;
pub mod fs;
pub mod hosted;
pub mod iocp;
pub mod mem;
mod platform;
pub mod zputa;

use std::{cell::RefCell, rc::Rc};

use sdmmc::{Countdown, Disks, SdController};
use slib::Console;
use soc::SocConfig;

pub use exec::{ExecError, Machine, Mode};
pub use iocp::Iocp;
pub use mem::Memory;
pub use platform::Platform;
pub use zputa::Zputa;

/// SD drives as the monitor holds them, whatever the controllers behind them.
pub type BoxedDisks = Disks<Box<dyn SdController>, Box<dyn Countdown>>;

/// The drives, shared between the raw disk commands and the FAT volumes mounted on them.
pub type SharedDisks = Rc<RefCell<BoxedDisks>>;

/// Everything a program needs from the SoC it runs on.
pub struct Board<'c> {
    pub cfg: &'c SocConfig,
    pub console: Box<dyn Console>,
    pub platform: Box<dyn Platform>,
    pub disks: SharedDisks,
    pub fs: Box<dyn fs::FileSystem>,
    pub machine: Box<dyn Machine>,
    pub mem: Memory,
}
