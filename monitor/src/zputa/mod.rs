//! ZPUTA, the interactive test shell.
//!
//! One command line at a time is read from the console, decoded against the command table and
//! handed to its handler. A word that is not a command names an application: it is loaded from
//! `0:\bin\<word>.ZPU` and called with the rest of the line. Handlers report everything on the
//! console, so a failing command never ends the session.

use std::collections::BTreeMap;

use cmd::{Args, Builtins, CommandTable, Decoded, Key};
use sdmmc::{CardType, DStatus, SECTOR_SIZE};
use slib::{read_line, Console, LINE_LEN};
use soc::SocConfig;

use crate::{
    exec::{self, Env, ExecError, Machine, Mode},
    fs::{File, FileSystem},
    Board, Memory, Platform, SharedDisks,
};

/// Writes to the shell console. A console that rejects output has nowhere to report it.
macro_rules! out {
    ($z:expr, $($arg:tt)*) => {{
        let _ = ::std::fmt::Write::write_fmt(&mut *$z.console, format_args!($($arg)*));
    }};
}

mod buffer;
mod files;
mod memory;
mod system;

pub const VERSION: &str = "v1.3";
pub const VERSION_DATE: &str = "18/07/2019";
const NAME: &str = "ZPUTA";

/// Where applications run by name are loaded and entered.
pub const APP_ADDR: u32 = 0x0001_0000;
const APP_DRIVE: u8 = 0;
const APP_DIR: &str = "bin";
const APP_EXT: &str = "ZPU";

type Handler = for<'z, 'c, 'a> fn(&'z mut Zputa<'c>, Args<'a>);

/// State that lives from one command to the next.
struct Session {
    disk_ready: bool,
    fs_ready: bool,
    file: Option<Box<dyn File>>,
    /// Working buffer shared by the disk, buffer and file commands.
    buf: [u8; SECTOR_SIZE],
    /// Next sector for `ddump` without an explicit one.
    sector: u32,
    /// Chunk size for `fread` and `fwrite`.
    block_len: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            disk_ready: false,
            fs_ready: false,
            file: None,
            buf: [0; SECTOR_SIZE],
            sector: 0,
            block_len: SECTOR_SIZE as u32,
        }
    }
}

pub struct Zputa<'c> {
    cfg: &'c SocConfig,
    console: Box<dyn Console>,
    platform: Box<dyn Platform>,
    disks: SharedDisks,
    fs: Box<dyn FileSystem>,
    machine: Box<dyn Machine>,
    mem: Memory,
    table: CommandTable,
    handlers: BTreeMap<Key, Handler>,
    session: Session,
    app_addr: u32,
}

const HANDLERS: &[(Key, Handler)] = &[
    (Key::DISK_DUMP, buffer::ddump),
    (Key::DISK_INIT, buffer::dinit),
    (Key::DISK_STATUS, buffer::dstat),
    (Key::DISK_IOCTL_SYNC, buffer::dioctl),
    (Key::BUFFER_DUMP, buffer::bdump),
    (Key::BUFFER_EDIT, buffer::bedit),
    (Key::BUFFER_READ, buffer::bread),
    (Key::BUFFER_WRITE, buffer::bwrite),
    (Key::BUFFER_FILL, buffer::bfill),
    (Key::BUFFER_LEN, buffer::blen),
    (Key::FS_INIT, files::finit),
    (Key::FS_OPEN, files::fopen),
    (Key::FS_CLOSE, files::fclose),
    (Key::FS_SEEK, files::fseek),
    (Key::FS_READ, files::fread),
    (Key::FS_INSPECT, files::finspect),
    (Key::FS_WRITE, files::fwrite),
    (Key::FS_TRUNC, files::ftrunc),
    (Key::FS_RENAME, files::frename),
    (Key::FS_DELETE, files::fdel),
    (Key::FS_CREATEDIR, files::fmkdir),
    (Key::FS_DIRLIST, files::fdir),
    (Key::FS_CAT, files::fcat),
    (Key::FS_COPY, files::fcp),
    (Key::FS_CONCAT, files::fconcat),
    (Key::FS_XTRACT, files::fxtract),
    (Key::FS_LOAD, files::fload),
    (Key::FS_EXEC, files::fexec),
    (Key::FS_SAVE, files::fsave),
    (Key::FS_DUMP, files::fdump),
    (Key::FS_CHANGEDIR, files::fcd),
    (Key::FS_SHOWDIR, files::fshowdir),
    (Key::MEM_CLEAR, memory::mclear),
    (Key::MEM_COPY, memory::mcopy),
    (Key::MEM_DIFF, memory::mdiff),
    (Key::MEM_DUMP, memory::mdump),
    (Key::MEM_EDIT_BYTES, memory::meb),
    (Key::MEM_EDIT_HWORD, memory::meh),
    (Key::MEM_EDIT_WORD, memory::mew),
    (Key::HW_INTR_DISABLE, system::hid),
    (Key::HW_INTR_ENABLE, system::hie),
    (Key::HW_FIFO_DISABLE, system::hfd),
    (Key::HW_FIFO_ENABLE, system::hfe),
    (Key::EXECUTE, system::jmp),
    (Key::CALL, system::call),
    (Key::MISC_RESTART_APP, system::restart),
    (Key::MISC_REBOOT, system::reset),
    (Key::MISC_HELP, system::help),
    (Key::MISC_INFO, system::info),
    (Key::MISC_TEST, system::test),
];

fn handler(key: Key) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|&&(k, _)| k == key)
        .map(|&(_, handler)| handler)
}

impl<'c> Zputa<'c> {
    pub fn new(board: Board<'c>, builtins: &Builtins) -> Self {
        let table = CommandTable::new(builtins);
        let mut handlers = BTreeMap::new();
        for entry in table.builtins() {
            match handler(entry.key) {
                Some(handler) => {
                    handlers.insert(entry.key, handler);
                }
                None => warn!("{} has no handler", entry.name),
            }
        }
        debug!("{} commands available", handlers.len());

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
            table,
            handlers,
            session: Session::default(),
            app_addr: APP_ADDR,
        }
    }

    /// Moves where applications run by name are loaded.
    pub fn with_app_addr(mut self, addr: u32) -> Self {
        self.app_addr = addr;
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    /// Starts up and serves commands until the console runs dry.
    pub fn run(&mut self) {
        self.startup();

        let mut line = [0; LINE_LEN];
        loop {
            out!(self, "* ");
            let Some(input) = read_line(&mut *self.console, &mut line) else {
                info!("console closed");
                return;
            };
            self.execute(input);
        }
    }

    /// Announces the shell and brings up drive 0 and its filesystem.
    ///
    /// A board without SD drives keeps its filesystem elsewhere, so only the mount decides
    /// whether applications can be run by name.
    pub fn startup(&mut self) {
        out!(self, "Running...\n");
        out!(self, "Enabling interrupts...\n");
        self.version(true);

        let disk_ready = {
            let mut disks = self.disks.borrow_mut();
            disks.is_empty() || !disks.initialize(0, CardType::Sdhc).contains(DStatus::NOINIT)
        };
        let fs_ready = disk_ready && self.fs.mount(0).is_ok();
        if fs_ready {
            self.session.disk_ready = true;
            self.session.fs_ready = true;
        } else {
            out!(self, "Failed to initialise sd card 0, please init manually.\n");
        }
    }

    /// Runs one command line.
    pub fn execute(&mut self, line: &str) {
        match self.table.decode(line) {
            (Decoded::NoKey, _) => {}
            (Decoded::Key(key), rest) => match self.handlers.get(&key) {
                Some(&handler) => handler(self, Args::new(rest)),
                None => out!(self, "Bad command.\n"),
            },
            (Decoded::BadKey, line) => self.run_app(line),
        }
    }

    fn version(&mut self, show_config: bool) {
        let cfg = self.cfg;
        out!(
            self,
            "\n** {NAME} ({} ZPU, rev {:02x}) {VERSION} {VERSION_DATE} **\n\n",
            cfg.model(),
            cfg.zpu_id as u8
        );
        if show_config {
            out!(self, "{cfg}");
        }
    }

    fn env(&mut self) -> Env<'_> {
        Env {
            fs: &mut *self.fs,
            mem: &mut self.mem,
            console: &mut *self.console,
            machine: &mut *self.machine,
            cfg: self.cfg,
        }
    }

    /// Treats the first word as an application name and calls it with the rest of the line.
    fn run_app(&mut self, line: &str) {
        let mut args = Args::new(line);
        let Some(name) = args.next_str() else {
            return;
        };
        if !(self.session.disk_ready && self.session.fs_ready) {
            out!(self, "Bad command.\n");
            return;
        }

        let path = format!("{APP_DRIVE}:\\{APP_DIR}\\{name}.{APP_EXT}");
        let addr = self.app_addr;
        let result = exec::publish_args(&mut self.mem, args.rest())
            .map_err(ExecError::from)
            .and_then(|argv| exec::execute(self.env(), &path, addr, addr, Mode::Call, argv, 0));
        match result {
            Ok(code) => debug!("{path} returned {code}"),
            Err(ExecError::Fs(e)) => {
                debug!("{path}: {e}");
                out!(self, "Bad command.\n");
            }
            Err(e) => out!(self, "{e}\n"),
        }
    }
}
