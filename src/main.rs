use std::{cell::RefCell, env, ffi::OsString, path::PathBuf, rc::Rc};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum, ValueHint};
use cmd::Builtins;
use monitor::{
    exec::Interp,
    fs::{FatFs, FileSystem, HostFs},
    hosted::{HostPlatform, ImageCard, StdConsole, StdCountdown},
    Board, BoxedDisks, Iocp, Memory, Zputa,
};
use sdmmc::Policy;
use soc::SocConfig;

/// Drives the SD controller block can address.
const MAX_DISKS: usize = 3;

/// Run the IOCP boot program or the ZPUTA shell on a hosted ZPU SoC.
///
/// SD card images given with `--disk` become drives 0, 1 and 2, and the FAT volume on each is
/// the logical drive of the same number. `--root` serves the files from a host directory
/// instead, leaving the images to the raw disk commands.
#[derive(Parser, Debug)]
#[command(version, author)]
#[command(infer_subcommands = true, infer_long_args = true)]
#[command(max_term_width = 100)]
#[cfg_attr(test, command(help_expected = true))]
struct ZpuSim {
    /// The program to boot
    #[arg(short, long, value_enum, default_value_t = Program::Zputa)]
    program: Program,

    /// SD card image to attach as the next drive, up to three
    #[arg(short = 'd', long = "disk", value_hint = ValueHint::FilePath)]
    disks: Vec<PathBuf>,

    /// Serve the files of drive 0 from this directory rather than the SD card
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    root: Option<PathBuf>,

    /// Only build in the commands of the minimal ZPUTA
    #[arg(long)]
    minimal: bool,

    /// Attempts per sector before a transfer fails
    #[arg(long, default_value_t = Policy::default().attempts)]
    attempts: u32,

    /// Seconds to wait for the card on each handshake
    #[arg(long, default_value_t = Policy::default().timeout_secs)]
    timeout_secs: u32,

    /// Where applications run by name are loaded, in hex
    #[arg(long, value_parser = parse_hex, default_value = "10000")]
    app_addr: u32,
}

#[derive(ValueEnum, Copy, Clone, Debug, Eq, PartialEq)]
enum Program {
    Iocp,
    Zputa,
}

fn parse_hex(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

/// The arguments that boot IOCP with everything else unchanged.
fn reboot_args(args: &[OsString]) -> Vec<OsString> {
    let mut out = Vec::with_capacity(args.len() + 2);
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("-p" | "--program") => {
                args.next();
            }
            Some(flag) if flag.starts_with("--program=") || flag.starts_with("-p") => {}
            _ => out.push(arg.clone()),
        }
    }
    out.extend(["--program".into(), "iocp".into()]);
    out
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let ZpuSim {
        program,
        disks: images,
        root,
        minimal,
        attempts,
        timeout_secs,
        app_addr,
    } = ZpuSim::parse();
    if images.len() > MAX_DISKS {
        bail!("At most {MAX_DISKS} disks can be attached.");
    }

    let cfg = SocConfig::BUILTIN;
    let policy = Policy {
        attempts,
        timeout_secs,
    };
    let mut disks = BoxedDisks::new(Box::new(StdCountdown::default()), policy);
    for image in &images {
        let card = ImageCard::open(image)
            .with_context(|| format!("Failed to open SD image {}", image.display()))?;
        if disks.attach(Box::new(card)).is_err() {
            bail!("No free drive for {}.", image.display());
        }
    }

    let disks = Rc::new(RefCell::new(disks));
    let fs: Box<dyn FileSystem> = match root {
        Some(root) => {
            let mut fs = HostFs::new();
            fs.attach(0, &root)
                .with_context(|| format!("Failed to attach {}", root.display()))?;
            Box::new(fs)
        }
        None => Box::new(FatFs::new(Rc::clone(&disks))),
    };

    let console = StdConsole::new().context("Failed to set up the terminal")?;
    let restart = env::args_os().skip(1).collect::<Vec<_>>();
    let reboot = reboot_args(&restart);
    log::debug!("restart with {restart:?}, reboot with {reboot:?}");

    let board = Board {
        cfg: &cfg,
        console: Box::new(console),
        platform: Box::new(HostPlatform::new(restart, reboot)),
        disks,
        fs,
        machine: Box::new(Interp::for_config(&cfg)),
        mem: Memory::for_config(&cfg),
    };
    match program {
        Program::Iocp => Iocp::new(board).boot(),
        Program::Zputa => {
            let builtins = if minimal {
                Builtins::minimal()
            } else {
                Builtins::all()
            };
            Zputa::new(board, &builtins).with_app_addr(app_addr).run();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_app() {
        ZpuSim::command().debug_assert();
    }

    #[test]
    fn reboot_switches_to_iocp() {
        let args = ["-d", "sd.img", "--program", "zputa", "--root=files", "-pzputa"]
            .map(OsString::from);

        assert_eq!(
            reboot_args(&args),
            ["-d", "sd.img", "--root=files", "--program", "iocp"].map(OsString::from)
        );
    }

    #[test]
    fn hex_addresses() {
        assert_eq!(parse_hex("10000"), Ok(0x10000));
        assert_eq!(parse_hex("0x2000"), Ok(0x2000));
        assert!(parse_hex("xyz").is_err());
    }
}
