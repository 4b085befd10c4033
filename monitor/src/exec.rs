//! Loading raw application images and handing control to them.
//!
//! An image is copied verbatim to its load address and entered either as a function taking
//! five words (`arg1, arg2, &memreg, globals, config`) or by a jump that never comes back.
//! Nothing isolates the image from the monitor: it runs in the same flat memory and can
//! overwrite anything.

use std::{fmt, mem};

use slib::Console;
use soc::SocConfig;
use zpu::{Bus, Cpu, Fault};

use crate::{
    fs::{FileSystem, FsError, OpenMode},
    mem::{Mapped, Memory},
};

/// Images may not be loaded below this address; the vectors and the ABI block live there.
pub const LOAD_GUARD: u32 = 0x400;
/// Where the configuration register image is published for applications.
pub const APP_CONFIG_ADDR: u32 = 0x300;
/// NUL terminated argument string for applications run from the command line.
pub const APP_ARGS_ADDR: u32 = 0x350;
pub const APP_ARGS_LEN: u32 = APP_MEMREG_ADDR - APP_ARGS_ADDR;
/// Word an application stores its result through.
pub const APP_MEMREG_ADDR: u32 = 0x3F0;
/// Hosted builds have no C globals block to share.
pub const APP_GLOBALS: u32 = 0;

const CHUNK: u32 = 512;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Call = 0,
    Jump = 1,
}

impl TryFrom<u32> for Mode {
    type Error = ExecError;

    fn try_from(code: u32) -> Result<Self, ExecError> {
        match code {
            0 => Ok(Self::Call),
            1 => Ok(Self::Jump),
            code => Err(ExecError::Mode(code)),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExecError {
    Fs(FsError),
    /// The image does not fit the memory region it would be loaded into.
    Overflow { addr: u32, len: u32 },
    Mode(u32),
    /// The interpreted application faulted.
    Fault(Fault),
}

impl From<FsError> for ExecError {
    fn from(e: FsError) -> Self {
        Self::Fs(e)
    }
}

impl From<Fault> for ExecError {
    fn from(e: Fault) -> Self {
        Self::Fault(e)
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fs(e) => e.fmt(f),
            Self::Overflow { addr, len } => {
                write!(f, "Image of {len} bytes does not fit at {addr:08x}.")
            }
            Self::Mode(mode) => write!(f, "Unknown execution mode {mode}."),
            Self::Fault(fault) => write!(f, "Application fault: {fault}."),
        }
    }
}

impl std::error::Error for ExecError {}

/// Whatever actually runs loaded code.
pub trait Machine {
    /// Calls `entry` with the five ABI words and returns the application's result.
    fn call(
        &mut self,
        mem: &mut Memory,
        console: &mut dyn Console,
        entry: u32,
        args: [u32; 5],
    ) -> Result<u32, Fault>;

    /// Transfers control to `entry` for good.
    fn jump(&mut self, mem: &mut Memory, console: &mut dyn Console, entry: u32) -> !;
}

/// Runs ZPU images in the instruction set interpreter on a private stack.
pub struct Interp {
    stack: u32,
}

impl Interp {
    pub fn new(stack: u32) -> Self {
        Self { stack }
    }

    pub fn for_config(cfg: &SocConfig) -> Self {
        Self::new(cfg.stack_start)
    }
}

impl Machine for Interp {
    fn call(
        &mut self,
        mem: &mut Memory,
        console: &mut dyn Console,
        entry: u32,
        args: [u32; 5],
    ) -> Result<u32, Fault> {
        mem.write_u32(APP_MEMREG_ADDR, 0)?;
        info!("calling {entry:08x} with {args:08x?}");
        let mut cpu = Cpu::new(entry, self.stack);
        cpu.call(&mut Mapped::new(&mut *mem, console), entry, self.stack, &args)?;
        mem.read_u32(APP_MEMREG_ADDR)
    }

    fn jump(&mut self, mem: &mut Memory, console: &mut dyn Console, entry: u32) -> ! {
        info!("jumping to {entry:08x}");
        let mut cpu = Cpu::new(entry, self.stack);
        let mut bus = Mapped::new(mem, console);
        let fault = loop {
            if let Err(fault) = cpu.step(&mut bus) {
                break fault;
            }
        };
        // There is nothing to return to; the hosted machine halts with the CPU.
        error!("halted: {fault}");
        std::process::exit(1)
    }
}

/// Runs images in place on the ZPU itself.
pub struct Native(());

impl Native {
    /// # Safety
    ///
    /// Only valid when the monitor runs on the ZPU and every entry address handed to the
    /// machine holds code built for the application ABI.
    pub unsafe fn new() -> Self {
        Self(())
    }
}

type AppFn = extern "C" fn(u32, u32, *mut u32, u32, u32) -> u32;
type BootFn = extern "C" fn() -> !;

impl Machine for Native {
    fn call(
        &mut self,
        _: &mut Memory,
        _: &mut dyn Console,
        entry: u32,
        [arg1, arg2, memreg, globals, config]: [u32; 5],
    ) -> Result<u32, Fault> {
        // SAFETY: guaranteed by the contract of `Native::new`.
        let app = unsafe { mem::transmute::<usize, AppFn>(entry as usize) };
        Ok(app(arg1, arg2, memreg as usize as *mut u32, globals, config))
    }

    fn jump(&mut self, _: &mut Memory, _: &mut dyn Console, entry: u32) -> ! {
        // SAFETY: guaranteed by the contract of `Native::new`.
        let boot = unsafe { mem::transmute::<usize, BootFn>(entry as usize) };
        boot()
    }
}

/// The pieces a load touches.
pub struct Env<'a> {
    pub fs: &'a mut dyn FileSystem,
    pub mem: &'a mut Memory,
    pub console: &'a mut dyn Console,
    pub machine: &'a mut dyn Machine,
    pub cfg: &'a SocConfig,
}

/// Copies the file at `path` to `addr`, returning its length.
///
/// The image has to fit inside the implemented region containing `addr`; otherwise nothing is
/// written.
pub fn load(
    fs: &mut dyn FileSystem,
    mem: &mut Memory,
    cfg: &SocConfig,
    path: &str,
    addr: u32,
) -> Result<u32, ExecError> {
    if addr < LOAD_GUARD {
        return Err(FsError::InvalidParameter.into());
    }
    let mut file = fs.open(path, OpenMode::OPEN_EXISTING | OpenMode::READ)?;

    let len = file.size();
    let fits = addr.checked_add(len).is_some_and(|end| {
        end <= mem.size() && cfg.region_containing(addr).is_some_and(|r| end <= r.end())
    });
    if !fits {
        return Err(ExecError::Overflow { addr, len });
    }

    let mut loaded = 0;
    while loaded < len {
        let chunk = mem.slice_mut(addr + loaded, CHUNK.min(len - loaded))?;
        let n = file.read(chunk)?;
        if n == 0 {
            break;
        }
        loaded += n as u32;
    }
    debug!("loaded {path} ({loaded} bytes) at {addr:08x}");
    Ok(loaded)
}

/// Publishes `args` as a NUL terminated string for the next application, truncating it to fit.
pub fn publish_args(mem: &mut Memory, args: &str) -> Result<u32, Fault> {
    let area = mem.slice_mut(APP_ARGS_ADDR, APP_ARGS_LEN)?;
    let n = args.len().min(area.len() - 1);
    area[..n].copy_from_slice(&args.as_bytes()[..n]);
    area[n] = 0;
    Ok(APP_ARGS_ADDR)
}

/// Loads `path` at `load_addr` and enters it at `exec_addr`.
///
/// Calls return the application's result word. Jumps do not return.
pub fn execute(
    env: Env<'_>,
    path: &str,
    load_addr: u32,
    exec_addr: u32,
    mode: Mode,
    arg1: u32,
    arg2: u32,
) -> Result<u32, ExecError> {
    let Env {
        fs,
        mem,
        console,
        machine,
        cfg,
    } = env;
    load(fs, mem, cfg, path, load_addr)?;

    for (i, word) in cfg.to_registers().into_iter().enumerate() {
        mem.write_u32(APP_CONFIG_ADDR + 4 * i as u32, word)?;
    }
    match mode {
        Mode::Call => {
            let args = [arg1, arg2, APP_MEMREG_ADDR, APP_GLOBALS, APP_CONFIG_ADDR];
            Ok(machine.call(mem, console, exec_addr, args)?)
        }
        Mode::Jump => machine.jump(mem, console, exec_addr),
    }
}
