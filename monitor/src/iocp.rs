//! IOCP, the boot program.
//!
//! Boots `BOOT.ROM` from the SD card when there is one. Otherwise it offers a single-key menu
//! for uploading, inspecting and starting applications, and boots whatever is preloaded once
//! nobody has pressed a key for a few seconds.

use std::{thread, time::Duration};

use sdmmc::{CardType, DStatus};
use slib::Console;
use soc::{regs::Interrupts, Devices, SocConfig};
use zpu::{Bus, Fault};

use crate::{
    dump::{memory_dump, Width},
    exec::{self, Machine},
    fs::{FileSystem, OpenMode},
    Board, Memory, Platform, SharedDisks,
};

pub const VERSION: &str = "v1.5";
pub const VERSION_DATE: &str = "29/08/2019";

pub const BOOT_FILE: &str = "BOOT.ROM";
/// Where `BOOT.ROM` is loaded and entered.
pub const BOOT_ADDR: u32 = 0x1000;
/// Offset of the application area inside BRAM.
pub const BRAM_APP_OFFSET: u32 = 0x2000;
/// Seconds of timer ticks before a preloaded application is started.
const AUTOBOOT_TICKS: u32 = 5;
/// Stack space kept clear of uploads.
const STACK_HEADROOM: u32 = 504;
const RAM_FILL: u32 = 0xaa55_ff00;
const POLL_INTERVAL: Duration = Duration::from_millis(1);

const HELP: &str = "\
0: Execute App in Boot BRAM.                   1: Execute App in RAM
2: Upload App to BRAM.                         3: Upload App to RAM.
4: Dump BRAM Memory.                           5: Dump Stack Memory.
6: Dump RAM Memory.                            d: List SD directory.
c: Clear RAM.                                  C: Clear BRAM App Memory.
h: Show this screen.                           i: Configuration information.
R: Reset system.
";

macro_rules! out {
    ($iocp:expr, $($arg:tt)*) => {{
        let _ = write!($iocp.console, $($arg)*);
    }};
}

pub struct Iocp<'c> {
    cfg: &'c SocConfig,
    console: Box<dyn Console>,
    platform: Box<dyn Platform>,
    disks: SharedDisks,
    fs: Box<dyn FileSystem>,
    machine: Box<dyn Machine>,
    mem: Memory,
}

impl<'c> Iocp<'c> {
    pub fn new(board: Board<'c>) -> Self {
        let Board {
            cfg,
            console,
            platform,
            disks,
            fs,
            machine,
            mem,
        } = board;
        Self {
            cfg,
            console,
            platform,
            disks,
            fs,
            machine,
            mem,
        }
    }

    pub fn memory(&mut self) -> &mut Memory {
        &mut self.mem
    }

    pub fn boot(mut self) -> ! {
        self.platform.enable_interrupts(Interrupts::TIMER);
        self.version(true);

        if !self.mount() {
            out!(self, "Failed to mount disk.\n");
            self.platform.reboot();
        }
        if self.fs.open(BOOT_FILE, OpenMode::READ).is_ok() {
            out!(self, "Boot SD\n");
            self.platform.reset_millis();
            match exec::load(&mut *self.fs, &mut self.mem, self.cfg, BOOT_FILE, BOOT_ADDR) {
                Ok(len) => {
                    info!("booting {BOOT_FILE} ({len} bytes)");
                    self.machine
                        .jump(&mut self.mem, &mut *self.console, BOOT_ADDR);
                }
                Err(e) => {
                    error!("{BOOT_FILE}: {e}");
                    self.platform.reboot();
                }
            }
        }

        let entry = self.menu();
        self.start(entry)
    }

    fn version(&mut self, show_config: bool) {
        let cfg = self.cfg;
        out!(
            self,
            "\n** IOCP BIOS ({} ZPU, rev{:02x}) {VERSION} {VERSION_DATE} **\n",
            cfg.model(),
            cfg.zpu_id as u8
        );
        if show_config {
            out!(self, "{cfg}");
        }
    }

    /// Brings up drive 0 and its filesystem. Boards without SD drives keep the filesystem
    /// elsewhere and only need the mount.
    fn mount(&mut self) -> bool {
        let disk_ready = {
            let mut disks = self.disks.borrow_mut();
            disks.is_empty() || !disks.initialize(0, CardType::Sdhc).contains(DStatus::NOINIT)
        };
        disk_ready && self.fs.mount(0).is_ok()
    }

    /// Serves keys until an application is chosen or autoboots, returning its entry point.
    fn menu(&mut self) -> u32 {
        out!(self, "* ");
        loop {
            let mut entry = None;
            if let Some(key) = self.console.poll_byte() {
                self.console.write_byte(key);
                out!(self, "\n");
                entry = self.command(key);
                out!(self, "* ");
            }
            if entry.is_none() && self.platform.ticks() > AUTOBOOT_TICKS {
                entry = self.autoboot_entry();
                if entry.is_some() {
                    out!(self, "..autobooting.\n");
                }
            }
            if let Some(entry) = entry.filter(|&e| e != 0) {
                return entry;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn start(&mut self, entry: u32) -> ! {
        self.platform.disable_interrupts(Interrupts::TIMER);
        out!(self, "\nStart App @ 0x{entry:08X}\n");
        info!("starting application at {entry:08x}");
        self.machine.jump(&mut self.mem, &mut *self.console, entry)
    }

    fn bram_app(&self) -> u32 {
        self.cfg.bram.addr.wrapping_add(BRAM_APP_OFFSET)
    }

    fn has_ram(&self) -> bool {
        self.cfg.has(Devices::RAM) || self.cfg.has(Devices::SDRAM)
    }

    /// The first application area holding something, BRAM before RAM.
    pub fn autoboot_entry(&mut self) -> Option<u32> {
        let bram_app = self.bram_app();
        if self.cfg.has(Devices::BRAM) && self.mem.read_u32(bram_app).is_ok_and(|w| w != 0) {
            return Some(bram_app);
        }
        let ram = self.cfg.ram.addr;
        if self.has_ram() && self.mem.read_u32(ram).is_ok_and(|w| w != 0) {
            return Some(ram);
        }
        None
    }

    /// Acts on one menu key. Returns the entry point of an application to start.
    pub fn command(&mut self, key: u8) -> Option<u32> {
        let cfg = self.cfg;
        match key {
            b'0' => return Some(self.bram_app()),
            b'1' => return Some(cfg.ram.addr),
            b'2' if cfg.has(Devices::BRAM) => {
                let limit = cfg
                    .bram
                    .size
                    .saturating_sub(BRAM_APP_OFFSET + STACK_HEADROOM);
                self.upload(self.bram_app(), limit);
            }
            b'3' if self.has_ram() => {
                self.upload(cfg.ram.addr, cfg.ram.size.saturating_sub(STACK_HEADROOM));
            }
            b'4' => {
                if cfg.has(Devices::INSN_BRAM) || cfg.has(Devices::BRAM) {
                    out!(self, "Dump BRAM Memory\n");
                    self.dump(cfg.bram.addr, cfg.bram.size);
                } else {
                    out!(self, "BRAM memory not implemented.\n");
                }
            }
            b'5' => {
                out!(self, "Dump Stack Memory\n");
                self.dump(cfg.stack_start.saturating_sub(STACK_HEADROOM), 512);
            }
            b'6' => {
                if cfg.has(Devices::RAM) {
                    out!(self, "Dump RAM\n");
                    self.dump(cfg.ram.addr, cfg.ram.size);
                } else {
                    out!(self, "RAM memory not implemented.\n");
                }
            }
            b'C' => {
                if cfg.has(Devices::BRAM) && cfg.has(Devices::INSN_BRAM) {
                    out!(self, "Clearing BRAM Memory\n");
                    self.fill(cfg.bram.addr, cfg.bram.size, 0);
                } else {
                    out!(self, "BRAM memory not implemented.\n");
                }
            }
            b'c' => {
                if cfg.has(Devices::RAM) {
                    out!(self, "Clearing RAM\n");
                    self.fill(cfg.ram.addr, cfg.ram.size, RAM_FILL);
                } else {
                    out!(self, "RAM memory not implemented.\n");
                }
            }
            b'd' => self.list_directory(),
            b'R' => {
                out!(self, "Restarting...\n");
                self.platform.reboot();
            }
            b'h' => {
                self.version(false);
                out!(self, "{HELP}");
            }
            b'i' => self.version(true),
            _ => {}
        }
        None
    }

    fn upload(&mut self, addr: u32, size: u32) {
        out!(self, "Binary upload, waiting...\n");
        let console = &mut self.console;
        let mem = &mut self.mem;
        let mut fault = None::<Fault>;
        let received = upload::receive(
            || console.read_byte(),
            |offset, word| {
                if let Err(e) = mem.write_u32(addr.wrapping_add(offset), word) {
                    fault.get_or_insert(e);
                }
            },
            size.saturating_sub(8),
        );
        match (received, fault) {
            (Ok(header), None) => debug!("received {} bytes at {addr:08x}", header.len),
            (Ok(_), Some(fault)) => out!(self, "{fault}\n"),
            (Err(e), _) => out!(self, "{e}\n"),
        }
    }

    fn dump(&mut self, start: u32, size: u32) {
        memory_dump(&mut *self.console, &mut self.mem, start, size, Width::Byte, start, 32);
        out!(self, "\n\nDumping completed.\n\n");
    }

    fn fill(&mut self, start: u32, size: u32, word: u32) {
        let end = start.saturating_add(size);
        for addr in (start..end).step_by(4) {
            if self.mem.write_u32(addr, word).is_err() {
                break;
            }
        }
    }

    fn list_directory(&mut self) {
        match self.fs.read_dir("") {
            Ok(entries) => {
                for entry in entries {
                    if entry.is_dir() {
                        out!(self, "   <dir>  {}\n", entry.name);
                    } else {
                        out!(self, "{:08X}  {}\n", entry.size, entry.name);
                    }
                }
            }
            Err(e) => out!(self, "Error: {:x}\n", e.code()),
        }
    }
}
