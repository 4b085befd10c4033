//! Memory-mapped peripheral layout of the SoC.

use bitflags::bitflags;

pub const IO_BASE: usize = 0x0F0_0000;
pub const IOCTL_BASE: usize = IO_BASE + 0x800;
pub const SD_BASE: usize = IO_BASE + 0x900;
pub const SD_SPACING: usize = 0x10;
pub const UART_BASE: usize = IO_BASE + 0xA00;
pub const UART_SPACING: usize = 0x10;
pub const INTERRUPT_BASE: usize = IO_BASE + 0xB00;
pub const TIMER_BASE: usize = IO_BASE + 0xC00;
pub const SPI_BASE: usize = IO_BASE + 0xD00;
pub const PS2_BASE: usize = IO_BASE + 0xE00;
pub const SOCCFG_BASE: usize = IO_BASE + 0xF00;

/// Offsets into the SoC configuration register block.
pub mod soccfg {
    pub const ZPU_ID: u32 = 0x00;
    pub const SYSFREQ: u32 = 0x04;
    pub const MEMFREQ: u32 = 0x08;
    pub const WBMEMFREQ: u32 = 0x0c;
    pub const DEVIMPL: u32 = 0x10;
    pub const BRAMADDR: u32 = 0x14;
    pub const BRAMSIZE: u32 = 0x18;
    pub const RAMADDR: u32 = 0x1c;
    pub const RAMSIZE: u32 = 0x20;
    pub const BRAMINSNADDR: u32 = 0x24;
    pub const BRAMINSNSIZE: u32 = 0x28;
    pub const SDRAMADDR: u32 = 0x2c;
    pub const SDRAMSIZE: u32 = 0x30;
    pub const WBSDRAMADDR: u32 = 0x34;
    pub const WBSDRAMSIZE: u32 = 0x38;
    pub const CPURSTADDR: u32 = 0x3c;
    pub const CPUMEMSTART: u32 = 0x40;
    pub const STACKSTART: u32 = 0x44;

    /// Number of 32-bit registers in the block.
    pub const WORDS: usize = 18;

    /// Marker carried in the top nibble of `ZPU_ID` when the block exists.
    pub const MARKER: u32 = 0xa;

    pub const SD_COUNT_MASK: u32 = 0x0000_0C00;
    pub const SD_COUNT_SHIFT: u32 = 10;
    pub const INTR_COUNT_MASK: u32 = 0x0000_01F0;
    pub const INTR_COUNT_SHIFT: u32 = 4;
    pub const TIMER_COUNT_MASK: u32 = 0x0000_0007;
}

/// Timer 0 register offsets (relative to [`TIMER_BASE`]).
pub mod timer {
    pub const MICROSEC_DOWN: usize = 0x00;
    pub const MILLISEC_DOWN: usize = 0x04;
    pub const MILLISEC_UP: usize = 0x08;
    pub const SECONDS_DOWN: usize = 0x0C;
}

bitflags! {
    /// Interrupt controller source bits.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Interrupts: u32 {
        const TIMER = 0x0000_0002;
        const PS2 = 0x0000_0004;
        const IOCTL_RD = 0x0000_0008;
        const IOCTL_WR = 0x0000_0010;
        const UART0_RX = 0x0000_0020;
        const UART0_TX = 0x0000_0040;
        const UART1_RX = 0x0000_0080;
        const UART1_TX = 0x0000_0100;
    }
}

/// Read-only view of a block of 32-bit registers.
pub trait RegisterBlock {
    fn read(&self, offset: u32) -> u32;
}

/// Register image held in ordinary memory, indexed by byte offset. Offsets past the end read
/// as zero, like an unpopulated bus.
impl RegisterBlock for [u32] {
    fn read(&self, offset: u32) -> u32 {
        self.get(offset as usize / 4).copied().unwrap_or(0)
    }
}

impl<const N: usize> RegisterBlock for [u32; N] {
    fn read(&self, offset: u32) -> u32 {
        self.as_slice().read(offset)
    }
}

/// A window of hardware registers at a fixed physical address.
#[derive(Copy, Clone, Debug)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must point at a mapped register block for as long as the value lives.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub fn read(&self, offset: usize) -> u32 {
        unsafe { ((self.base + offset) as *const u32).read_volatile() }
    }

    pub fn write(&self, offset: usize, value: u32) {
        unsafe { ((self.base + offset) as *mut u32).write_volatile(value) }
    }
}

impl RegisterBlock for Mmio {
    fn read(&self, offset: u32) -> u32 {
        Mmio::read(self, offset as usize)
    }
}
