use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use rustix::termios::{isatty, tcgetattr, tcsetattr, OptionalActions};

/// Send an application to IOCP. Press `U` on the boot menu first.
#[derive(Parser, Debug)]
#[command(version, author)]
#[command(infer_subcommands = true, infer_long_args = true)]
#[command(arg_required_else_help = true)]
#[command(max_term_width = 100)]
#[cfg_attr(test, command(help_expected = true))]
struct Uploader {
    /// The serial port IOCP listens on
    #[arg(value_hint = ValueHint::FilePath)]
    device: PathBuf,

    /// The application image
    #[arg(value_hint = ValueHint::FilePath)]
    file: PathBuf,

    /// Line speed, left alone if omitted
    #[arg(short = 'b', long = "baud-rate")]
    baud_rate: Option<u32>,
}

fn main() -> Result<()> {
    let Uploader {
        device: path,
        file,
        baud_rate,
    } = Uploader::parse();

    let payload = fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    let frame = upload::encode(&payload).context("Application is too large to upload")?;

    let device = File::options()
        .write(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    if isatty(&device) {
        let mut termios = tcgetattr(&device).context("Failed to read terminal settings")?;
        termios.make_raw();
        if let Some(baud_rate) = baud_rate {
            termios
                .set_speed(baud_rate)
                .with_context(|| format!("Unsupported baud rate {baud_rate}"))?;
        }
        tcsetattr(&device, OptionalActions::Drain, &termios)
            .context("Failed to configure the terminal")?;
    }

    let mut device = BufWriter::new(device);
    device.write_all(&frame.prefix())?;
    for part in frame.parts() {
        device.write_all(part)?;
    }
    device.flush()?;

    println!(
        "Sent {} bytes, crc {:08X}.",
        frame.header.len, frame.header.crc
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_app() {
        Uploader::command().debug_assert();
    }
}
