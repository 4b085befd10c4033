use core::fmt;

use bitflags::bitflags;

use crate::regs::{soccfg, RegisterBlock};

const CLK_FREQ: u32 = 100_000_000;

/// A contiguous span of the flat address space.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Region {
    pub addr: u32,
    pub size: u32,
}

impl Region {
    pub const fn new(addr: u32, size: u32) -> Self {
        Self { addr, size }
    }

    /// One past the last byte of the region.
    pub const fn end(&self) -> u32 {
        self.addr.wrapping_add(self.size)
    }

    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.addr && addr < self.end()
    }
}

bitflags! {
    /// Peripherals present in the SoC, laid out as in the `DEVIMPL` register.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Devices: u32 {
        const WB = 0x0040_0000;
        const WB_SDRAM = 0x0020_0000;
        const WB_I2C = 0x0010_0000;
        const BRAM = 0x0008_0000;
        const RAM = 0x0004_0000;
        const INSN_BRAM = 0x0002_0000;
        const SDRAM = 0x0001_0000;
        const IOCTL = 0x0000_8000;
        const PS2 = 0x0000_4000;
        const SPI = 0x0000_2000;
        const SD = 0x0000_1000;
        const INTRCTL = 0x0000_0200;
        const TIMER1 = 0x0000_0008;
    }
}

/// Where a [`SocConfig`] came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Source {
    Builtin,
    Registers,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ZpuModel {
    Small,
    Medium,
    Flex,
    Evo,
    EvoMin,
    Unknown,
}

impl ZpuModel {
    /// Decodes the model from the high byte of a ZPU id.
    pub const fn from_id(id: u16) -> Self {
        match id >> 8 {
            0x01 => Self::Small,
            0x02 => Self::Medium,
            0x03 => Self::Flex,
            0x04 => Self::Evo,
            0x05 => Self::EvoMin,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ZpuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Small => "Small",
            Self::Medium => "Medium",
            Self::Flex => "Flex",
            Self::Evo => "EVO",
            Self::EvoMin => "EVOmin",
            Self::Unknown => "Unknown",
        })
    }
}

/// Capabilities and memory map of the running SoC.
///
/// Built once during startup and handed out by reference afterwards; nothing mutates it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SocConfig {
    pub insn_bram: Region,
    pub bram: Region,
    pub ram: Region,
    pub sdram: Region,
    pub wb_sdram: Region,
    pub reset_vector: u32,
    pub cpu_mem_base: u32,
    pub stack_start: u32,
    pub zpu_id: u16,
    pub sys_freq: u32,
    pub mem_freq: u32,
    pub wb_mem_freq: u32,
    pub source: Source,
    pub devices: Devices,
    pub sd_cards: u8,
    pub intr_channels: u8,
    pub timers: u8,
}

impl SocConfig {
    /// Compiled-in description used when the configuration block is absent.
    pub const BUILTIN: Self = Self {
        insn_bram: Region::new(0x0000_0000, 0x0000_7FFF),
        bram: Region::new(0x0000_0000, 0x0000_7FFF),
        ram: Region::new(0x0001_0000, 0x0000_7FFF),
        sdram: Region::new(0x0001_0000, 0x0081_0000),
        wb_sdram: Region::new(0x0100_0000, 0x017F_FFFF),
        reset_vector: 0x0000_0000,
        cpu_mem_base: 0x0000_0000,
        stack_start: 0x0000_7800,
        zpu_id: 0x0000,
        sys_freq: CLK_FREQ,
        mem_freq: CLK_FREQ,
        wb_mem_freq: CLK_FREQ,
        source: Source::Builtin,
        devices: Devices::BRAM
            .union(Devices::RAM)
            .union(Devices::INSN_BRAM)
            .union(Devices::SDRAM)
            .union(Devices::IOCTL)
            .union(Devices::PS2)
            .union(Devices::SPI)
            .union(Devices::SD)
            .union(Devices::INTRCTL)
            .union(Devices::TIMER1),
        sd_cards: 1,
        intr_channels: 16,
        timers: 1,
    };

    /// Picks the register block if the hardware advertises one, otherwise the builtin
    /// constants. Without the `soccfg` feature the registers are never consulted.
    pub fn discover<R: RegisterBlock + ?Sized>(regs: &R) -> Self {
        if cfg!(feature = "soccfg") && Self::has_registers(regs) {
            Self::from_registers(regs)
        } else {
            Self::BUILTIN
        }
    }

    pub fn has_registers<R: RegisterBlock + ?Sized>(regs: &R) -> bool {
        regs.read(soccfg::ZPU_ID) >> 28 == soccfg::MARKER
    }

    pub fn from_registers<R: RegisterBlock + ?Sized>(regs: &R) -> Self {
        let region = |addr, size| Region::new(regs.read(addr), regs.read(size));
        let impl_bits = regs.read(soccfg::DEVIMPL);

        Self {
            insn_bram: region(soccfg::BRAMINSNADDR, soccfg::BRAMINSNSIZE),
            bram: region(soccfg::BRAMADDR, soccfg::BRAMSIZE),
            ram: region(soccfg::RAMADDR, soccfg::RAMSIZE),
            sdram: region(soccfg::SDRAMADDR, soccfg::SDRAMSIZE),
            wb_sdram: region(soccfg::WBSDRAMADDR, soccfg::WBSDRAMSIZE),
            reset_vector: regs.read(soccfg::CPURSTADDR),
            cpu_mem_base: regs.read(soccfg::CPUMEMSTART),
            stack_start: regs.read(soccfg::STACKSTART),
            zpu_id: regs.read(soccfg::ZPU_ID) as u16,
            sys_freq: regs.read(soccfg::SYSFREQ),
            mem_freq: regs.read(soccfg::MEMFREQ),
            wb_mem_freq: regs.read(soccfg::WBMEMFREQ),
            source: Source::Registers,
            devices: Devices::from_bits_truncate(impl_bits),
            sd_cards: ((impl_bits & soccfg::SD_COUNT_MASK) >> soccfg::SD_COUNT_SHIFT) as u8,
            intr_channels: ((impl_bits & soccfg::INTR_COUNT_MASK) >> soccfg::INTR_COUNT_SHIFT)
                as u8,
            timers: (impl_bits & soccfg::TIMER_COUNT_MASK) as u8,
        }
    }

    /// Renders the configuration as the hardware register block would present it.
    pub fn to_registers(&self) -> [u32; soccfg::WORDS] {
        let mut regs = [0; soccfg::WORDS];
        let mut set = |offset: u32, value: u32| regs[offset as usize / 4] = value;

        set(soccfg::ZPU_ID, soccfg::MARKER << 28 | u32::from(self.zpu_id));
        set(soccfg::SYSFREQ, self.sys_freq);
        set(soccfg::MEMFREQ, self.mem_freq);
        set(soccfg::WBMEMFREQ, self.wb_mem_freq);
        set(
            soccfg::DEVIMPL,
            self.devices.bits()
                | (u32::from(self.sd_cards) << soccfg::SD_COUNT_SHIFT) & soccfg::SD_COUNT_MASK
                | (u32::from(self.intr_channels) << soccfg::INTR_COUNT_SHIFT)
                    & soccfg::INTR_COUNT_MASK
                | u32::from(self.timers) & soccfg::TIMER_COUNT_MASK,
        );
        set(soccfg::BRAMADDR, self.bram.addr);
        set(soccfg::BRAMSIZE, self.bram.size);
        set(soccfg::RAMADDR, self.ram.addr);
        set(soccfg::RAMSIZE, self.ram.size);
        set(soccfg::BRAMINSNADDR, self.insn_bram.addr);
        set(soccfg::BRAMINSNSIZE, self.insn_bram.size);
        set(soccfg::SDRAMADDR, self.sdram.addr);
        set(soccfg::SDRAMSIZE, self.sdram.size);
        set(soccfg::WBSDRAMADDR, self.wb_sdram.addr);
        set(soccfg::WBSDRAMSIZE, self.wb_sdram.size);
        set(soccfg::CPURSTADDR, self.reset_vector);
        set(soccfg::CPUMEMSTART, self.cpu_mem_base);
        set(soccfg::STACKSTART, self.stack_start);
        regs
    }

    pub fn model(&self) -> ZpuModel {
        ZpuModel::from_id(self.zpu_id)
    }

    pub fn has(&self, devices: Devices) -> bool {
        self.devices.contains(devices)
    }

    /// Implemented memory regions.
    pub fn regions(&self) -> impl Iterator<Item = Region> + '_ {
        [
            (Devices::INSN_BRAM, self.insn_bram),
            (Devices::BRAM, self.bram),
            (Devices::RAM, self.ram),
            (Devices::SDRAM, self.sdram),
            (Devices::WB_SDRAM, self.wb_sdram),
        ]
        .into_iter()
        .filter(|&(device, _)| self.has(device))
        .map(|(_, region)| region)
    }

    /// The implemented region holding `addr` that reaches furthest, since regions may overlap.
    pub fn region_containing(&self, addr: u32) -> Option<Region> {
        self.regions()
            .filter(|region| region.contains(addr))
            .max_by_key(Region::end)
    }

    /// Highest address covered by any implemented region.
    pub fn memory_top(&self) -> u32 {
        self.regions().map(|region| region.end()).max().unwrap_or(0)
    }
}

struct Freq(u32);

impl fmt::Display for Freq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}MHz", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

impl fmt::Display for SocConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SoC Configuration")?;
        if self.source == Source::Registers {
            f.write_str(" (from SoC config)")?;
        }
        f.write_str(":\nDevices implemented:\n")?;

        for (device, name, region) in [
            (Devices::WB_SDRAM, "WB SDRAM ", self.wb_sdram),
            (Devices::SDRAM, "SDRAM    ", self.sdram),
            (Devices::INSN_BRAM, "INSN BRAM", self.insn_bram),
            (Devices::BRAM, "BRAM     ", self.bram),
            (Devices::RAM, "RAM      ", self.ram),
        ] {
            if self.has(device) {
                writeln!(f, "    {name} ({:08X}:{:08X}).", region.addr, region.end())?;
            }
        }
        if self.has(Devices::SD) {
            writeln!(f, "    SD CARD   (Devices ={:02}).", self.sd_cards)?;
        }
        if self.has(Devices::TIMER1) {
            writeln!(f, "    TIMER1    (Timers  ={:02}).", self.timers)?;
        }
        if self.has(Devices::INTRCTL) {
            writeln!(f, "    INTR CTRL (Channels={:02}).", self.intr_channels)?;
        }
        for (device, name) in [
            (Devices::WB, "WISHBONE BUS"),
            (Devices::WB_I2C, "WB I2C"),
            (Devices::IOCTL, "IOCTL"),
            (Devices::PS2, "PS2"),
            (Devices::SPI, "SPI"),
        ] {
            if self.has(device) {
                writeln!(f, "    {name}")?;
            }
        }

        f.write_str("Addresses:\n")?;
        writeln!(f, "    CPU Reset Vector Address = {:08X}", self.reset_vector)?;
        writeln!(f, "    CPU Memory Start Address = {:08X}", self.cpu_mem_base)?;
        writeln!(f, "    Stack Start Address      = {:08X}", self.stack_start)?;
        f.write_str("Misc:\n")?;
        writeln!(f, "    ZPU Id                   = {:04X}", self.zpu_id)?;
        writeln!(f, "    System Clock Freq        = {}", Freq(self.sys_freq))?;
        if self.has(Devices::SDRAM) {
            writeln!(f, "    SDRAM Clock Freq         = {}", Freq(self.mem_freq))?;
        }
        if self.has(Devices::WB_SDRAM) {
            writeln!(f, "    Wishbone SDRAM Clock Freq= {}", Freq(self.wb_mem_freq))?;
        }
        f.write_str("\n")
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::string::ToString;

    use crate::{regs::soccfg, Devices, Region, SocConfig, Source, ZpuModel};

    #[test]
    fn builtin_matches_compiled_defaults() {
        let cfg = SocConfig::BUILTIN;

        assert_eq!(cfg.source, Source::Builtin);
        assert_eq!(cfg.ram, Region::new(0x10000, 0x7FFF));
        assert_eq!(cfg.stack_start, 0x7800);
        assert!(cfg.has(Devices::SD | Devices::TIMER1 | Devices::INTRCTL));
        assert!(!cfg.has(Devices::WB));
        assert!(!cfg.has(Devices::WB_SDRAM));
        assert_eq!((cfg.sd_cards, cfg.intr_channels, cfg.timers), (1, 16, 1));
    }

    #[test]
    fn decode_register_block() {
        let mut regs = [0u32; soccfg::WORDS];
        regs[0] = 0xA000_0401;
        regs[1] = 50_000_000;
        regs[4] = 0x0040_0000 | 0x0008_0000 | 0x0000_1000 | 0x0000_0800 | 0x0000_0080 | 0x2;
        regs[5] = 0x0;
        regs[6] = 0x4000;
        regs[17] = 0x3800;

        let cfg = SocConfig::discover(&regs);

        assert_eq!(cfg.source, Source::Registers);
        assert_eq!(cfg.zpu_id, 0x0401);
        assert_eq!(cfg.model(), ZpuModel::Evo);
        assert_eq!(cfg.sys_freq, 50_000_000);
        assert_eq!(cfg.devices, Devices::WB | Devices::BRAM | Devices::SD);
        assert_eq!(cfg.sd_cards, 2);
        assert_eq!(cfg.intr_channels, 8);
        assert_eq!(cfg.timers, 2);
        assert_eq!(cfg.bram, Region::new(0, 0x4000));
        assert_eq!(cfg.stack_start, 0x3800);
    }

    #[test]
    fn missing_marker_falls_back_to_builtin() {
        let regs = [0x0000_0401u32; soccfg::WORDS];

        assert_eq!(SocConfig::discover(&regs), SocConfig::BUILTIN);
    }

    #[test]
    fn register_image_decodes_to_same_config() {
        let cfg = SocConfig {
            source: Source::Registers,
            ..SocConfig::BUILTIN
        };

        assert_eq!(SocConfig::from_registers(&cfg.to_registers()), cfg);
    }

    #[test]
    fn region_lookup_prefers_furthest_reach() {
        let cfg = SocConfig::BUILTIN;

        assert_eq!(cfg.region_containing(0x10000), Some(cfg.sdram));
        assert_eq!(cfg.region_containing(0x400), Some(cfg.insn_bram));
        assert_eq!(cfg.region_containing(0x0090_0000), None);
        assert_eq!(cfg.memory_top(), 0x0082_0000);
    }

    #[test]
    fn display_lists_devices_and_addresses() {
        let text = SocConfig::BUILTIN.to_string();

        assert!(text.starts_with("SoC Configuration:\nDevices implemented:\n"));
        assert!(text.contains("    SDRAM     (00010000:00820000).\n"));
        assert!(text.contains("    SD CARD   (Devices =01).\n"));
        assert!(text.contains("    Stack Start Address      = 00007800\n"));
        assert!(text.contains("    System Clock Freq        = 100.0000MHz\n"));
        assert!(!text.contains("WISHBONE"));
    }

    #[test]
    fn model_names() {
        assert_eq!(ZpuModel::from_id(0x0102).to_string(), "Small");
        assert_eq!(ZpuModel::from_id(0x0500).to_string(), "EVOmin");
        assert_eq!(ZpuModel::from_id(0).to_string(), "Unknown");
    }
}
