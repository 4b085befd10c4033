//! Bindings to the SoC's SD controller and seconds-down timer.

use soc::regs::{timer, Mmio, SD_BASE, SD_SPACING, TIMER_BASE};

use crate::{Countdown, SdCommand, SdController, SdStatus};

const ADDR: usize = 0x0;
const DATA: usize = 0x4;
const CMD: usize = 0xC;
const STATUS: usize = 0xC;

/// SD controller channel `n` of the SoC.
pub struct MmioCard {
    regs: Mmio,
}

impl MmioCard {
    /// # Safety
    ///
    /// Must only be called on the target, once per channel.
    pub unsafe fn new(channel: u8) -> Self {
        Self {
            regs: unsafe { Mmio::new(SD_BASE + usize::from(channel) * SD_SPACING) },
        }
    }
}

impl SdController for MmioCard {
    fn set_address(&mut self, sector: u32) {
        self.regs.write(ADDR, sector);
    }

    fn command(&mut self, command: SdCommand) {
        self.regs.write(CMD, command.code());
    }

    fn status(&mut self) -> SdStatus {
        SdStatus::from_bits_retain(self.regs.read(STATUS))
    }

    fn read_data(&mut self) -> u8 {
        self.regs.read(DATA) as u8
    }

    fn write_data(&mut self, byte: u8) {
        self.regs.write(DATA, u32::from(byte));
    }
}

/// Timer 0's seconds-down counter.
pub struct SecondsDown {
    regs: Mmio,
}

impl SecondsDown {
    /// # Safety
    ///
    /// Must only be called on the target. Other users of the seconds counter get clobbered.
    pub unsafe fn new() -> Self {
        Self {
            regs: unsafe { Mmio::new(TIMER_BASE) },
        }
    }
}

impl Countdown for SecondsDown {
    fn start(&mut self, secs: u32) {
        self.regs.write(timer::SECONDS_DOWN, secs);
    }

    fn expired(&mut self) -> bool {
        self.regs.read(timer::SECONDS_DOWN) == 0
    }
}
