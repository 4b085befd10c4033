//! The SoC's devices emulated on a host: the console on stdio, SD cards as image files and the
//! timers on the system clock.

use std::{
    env,
    ffi::OsString,
    fmt,
    fs::File,
    io::{self, Read, Write},
    os::unix::{fs::FileExt, process::CommandExt},
    path::Path,
    process::{self, Command},
    sync::{
        mpsc::{self, Receiver},
        OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use rustix::termios::{self, LocalModes, OptionalActions, SpecialCodeIndex, Termios};
use sdmmc::{Countdown, Geometry, SdCommand, SdController, SdStatus, SECTOR_SIZE};
use slib::Console;
use soc::regs::Interrupts;

use crate::Platform;

static SAVED_TERMINAL: OnceLock<Termios> = OnceLock::new();

/// Puts the terminal back the way [`StdConsole::new`] found it.
pub fn restore_terminal() {
    if let Some(saved) = SAVED_TERMINAL.get() {
        if let Err(e) = termios::tcsetattr(io::stdin(), OptionalActions::Now, saved) {
            warn!("failed to restore terminal: {e}");
        }
    }
}

/// The console UART on stdin/stdout.
///
/// A terminal is switched to unbuffered input without echo so keys arrive one at a time. When
/// stdin is not a terminal nothing is ever "pressed": [`Console::poll_byte`] stays empty and
/// only blocking reads see the input.
pub struct StdConsole {
    input: Receiver<u8>,
    interactive: bool,
    out: io::Stdout,
}

impl StdConsole {
    pub fn new() -> io::Result<Self> {
        let stdin = io::stdin();
        let interactive = termios::isatty(&stdin);
        if interactive {
            let saved = termios::tcgetattr(&stdin)?;
            let mut raw = saved.clone();
            raw.local_modes.remove(LocalModes::ICANON | LocalModes::ECHO);
            raw.special_codes[SpecialCodeIndex::VMIN] = 1;
            raw.special_codes[SpecialCodeIndex::VTIME] = 0;
            termios::tcsetattr(&stdin, OptionalActions::Now, &raw)?;
            let _ = SAVED_TERMINAL.set(saved);
        }

        let (tx, input) = mpsc::channel();
        thread::Builder::new()
            .name("console".to_owned())
            .spawn(move || {
                for byte in io::stdin().lock().bytes() {
                    let Ok(byte) = byte else {
                        break;
                    };
                    if tx.send(byte).is_err() {
                        break;
                    }
                }
                debug!("console input closed");
            })?;

        Ok(Self {
            input,
            interactive,
            out: io::stdout(),
        })
    }
}

impl Drop for StdConsole {
    fn drop(&mut self) {
        restore_terminal();
    }
}

impl fmt::Write for StdConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut out = self.out.lock();
        out.write_all(s.as_bytes())
            .and_then(|()| out.flush())
            .map_err(|_| fmt::Error)
    }
}

impl Console for StdConsole {
    fn read_byte(&mut self) -> Option<u8> {
        self.input.recv().ok()
    }

    fn poll_byte(&mut self) -> Option<u8> {
        if self.interactive {
            self.input.try_recv().ok()
        } else {
            None
        }
    }

    fn write_byte(&mut self, byte: u8) {
        let mut out = self.out.lock();
        let _ = out.write_all(&[byte]).and_then(|()| out.flush());
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    Idle,
    Reading(usize),
    Writing(usize),
    Failed(SdStatus),
}

/// An SD controller whose card is a raw image file.
///
/// Transfers follow the controller handshake: after a read command the sector streams out one
/// byte per `DATA_VALID`, after a write command the controller asks for 512 bytes with
/// `DATA_REQ` and commits the sector once the last one arrives.
pub struct ImageCard {
    image: File,
    sectors: u32,
    state: State,
    address: u32,
    sector: [u8; SECTOR_SIZE],
}

impl ImageCard {
    pub fn open(path: &Path) -> io::Result<Self> {
        let image = File::options().read(true).write(true).open(path)?;
        let sectors = u32::try_from(image.metadata()?.len() / SECTOR_SIZE as u64)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "image too large"))?;
        info!("{}: {sectors} sectors", path.display());
        Ok(Self {
            image,
            sectors,
            state: State::Idle,
            address: 0,
            sector: [0; SECTOR_SIZE],
        })
    }

    fn offset(&self) -> Option<u64> {
        (self.address < self.sectors).then(|| u64::from(self.address) * SECTOR_SIZE as u64)
    }

    fn start_read(&mut self) -> State {
        let Some(offset) = self.offset() else {
            return State::Failed(SdStatus::ADDRERR);
        };
        match self.image.read_exact_at(&mut self.sector, offset) {
            Ok(()) => State::Reading(0),
            Err(e) => {
                warn!("image read of sector {} failed: {e}", self.address);
                State::Failed(SdStatus::CRCERROR)
            }
        }
    }

    fn commit(&mut self) -> State {
        let Some(offset) = self.offset() else {
            return State::Failed(SdStatus::ADDRERR);
        };
        match self.image.write_all_at(&self.sector, offset) {
            Ok(()) => State::Idle,
            Err(e) => {
                warn!("image write of sector {} failed: {e}", self.address);
                State::Failed(SdStatus::CRCERROR)
            }
        }
    }
}

impl SdController for ImageCard {
    fn set_address(&mut self, sector: u32) {
        self.address = sector;
    }

    fn command(&mut self, command: SdCommand) {
        self.state = match command {
            SdCommand::Read => self.start_read(),
            SdCommand::Write if self.offset().is_some() => State::Writing(0),
            SdCommand::Write => State::Failed(SdStatus::ADDRERR),
            SdCommand::Reset | SdCommand::CardType(_) => State::Idle,
        };
    }

    fn status(&mut self) -> SdStatus {
        match self.state {
            State::Idle => SdStatus::empty(),
            State::Reading(_) => SdStatus::BUSY | SdStatus::DATA_VALID,
            State::Writing(_) => SdStatus::BUSY | SdStatus::DATA_REQ,
            State::Failed(error) => error,
        }
    }

    fn read_data(&mut self) -> u8 {
        let State::Reading(n) = self.state else {
            return 0xff;
        };
        self.state = if n + 1 == SECTOR_SIZE {
            State::Idle
        } else {
            State::Reading(n + 1)
        };
        self.sector[n]
    }

    fn write_data(&mut self, byte: u8) {
        let State::Writing(n) = self.state else {
            return;
        };
        self.sector[n] = byte;
        self.state = if n + 1 == SECTOR_SIZE {
            self.commit()
        } else {
            State::Writing(n + 1)
        };
    }

    fn geometry(&self) -> Option<Geometry> {
        Some(Geometry {
            sectors: self.sectors,
            erase_block: 1,
        })
    }
}

/// The seconds down counter, on the monotonic clock.
#[derive(Default)]
pub struct StdCountdown {
    deadline: Option<Instant>,
}

impl Countdown for StdCountdown {
    fn start(&mut self, secs: u32) {
        self.deadline = Some(Instant::now() + Duration::from_secs(u64::from(secs)));
    }

    fn expired(&mut self) -> bool {
        self.deadline.map_or(true, |deadline| Instant::now() >= deadline)
    }
}

/// Interrupts, timers and resets for a hosted SoC. Restarting replaces the process with a
/// fresh copy of itself.
pub struct HostPlatform {
    interrupts: Interrupts,
    uart_fifo: bool,
    epoch: Instant,
    timer_since: Option<Instant>,
    restart_args: Vec<OsString>,
    reboot_args: Vec<OsString>,
}

impl HostPlatform {
    /// `restart_args` relaunch the current program, `reboot_args` the boot program.
    pub fn new(restart_args: Vec<OsString>, reboot_args: Vec<OsString>) -> Self {
        Self {
            interrupts: Interrupts::empty(),
            uart_fifo: true,
            epoch: Instant::now(),
            timer_since: None,
            restart_args,
            reboot_args,
        }
    }

    pub fn interrupts(&self) -> Interrupts {
        self.interrupts
    }

    pub fn uart_fifo(&self) -> bool {
        self.uart_fifo
    }
}

fn exec(args: &[OsString]) -> ! {
    restore_terminal();
    let e = match env::current_exe() {
        Ok(exe) => Command::new(exe).args(args).exec(),
        Err(e) => e,
    };
    error!("failed to restart: {e}");
    process::exit(1)
}

impl Platform for HostPlatform {
    fn disable_interrupts(&mut self, sources: Interrupts) {
        self.interrupts.remove(sources);
        if sources.contains(Interrupts::TIMER) {
            self.timer_since = None;
        }
        debug!("interrupts now {:#x}", self.interrupts.bits());
    }

    fn enable_interrupts(&mut self, sources: Interrupts) {
        self.interrupts.insert(sources);
        if sources.contains(Interrupts::TIMER) && self.timer_since.is_none() {
            self.timer_since = Some(Instant::now());
        }
        debug!("interrupts now {:#x}", self.interrupts.bits());
    }

    fn set_uart_fifo(&mut self, enabled: bool) {
        self.uart_fifo = enabled;
    }

    fn millis(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn reset_millis(&mut self) {
        self.epoch = Instant::now();
    }

    fn ticks(&self) -> u32 {
        self.timer_since
            .map_or(0, |since| since.elapsed().as_secs() as u32)
    }

    fn restart(&mut self) -> ! {
        info!("restarting with {:?}", self.restart_args);
        exec(&self.restart_args)
    }

    fn reboot(&mut self) -> ! {
        info!("rebooting with {:?}", self.reboot_args);
        exec(&self.reboot_args)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use sdmmc::{ioctl, CardType, DStatus, Disks, Policy};

    use super::*;

    fn image(sectors: usize) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sd.img");
        let contents: Vec<u8> = (0..sectors * SECTOR_SIZE).map(|i| (i / SECTOR_SIZE) as u8).collect();
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn image_card_through_the_driver() {
        let (_dir, path) = image(4);
        let mut disks: Disks<ImageCard, StdCountdown> =
            Disks::new(StdCountdown::default(), Policy::default());
        disks.attach(ImageCard::open(&path).unwrap()).ok().unwrap();
        assert_eq!(disks.initialize(0, CardType::Sdhc), DStatus::empty());

        let mut buf = [0; 2 * SECTOR_SIZE];
        assert_eq!(disks.read(0, &mut buf, 1, 2), Ok(()));
        assert!(buf[..SECTOR_SIZE].iter().all(|&b| b == 1));
        assert!(buf[SECTOR_SIZE..].iter().all(|&b| b == 2));

        buf.fill(0xa5);
        assert_eq!(disks.write(0, &buf, 3, 1), Ok(()));
        assert_eq!(disks.ioctl(0, ioctl::GET_SECTOR_COUNT), Ok(4));
        assert_eq!(disks.ioctl(0, ioctl::GET_BLOCK_SIZE), Ok(1));
        drop(disks);

        let written = fs::read(&path).unwrap();
        assert!(written[3 * SECTOR_SIZE..].iter().all(|&b| b == 0xa5));
    }

    #[test]
    fn out_of_range_sector_reports_an_address_error() {
        let (_dir, path) = image(1);
        let mut card = ImageCard::open(&path).unwrap();

        card.set_address(1);
        card.command(SdCommand::Read);
        assert_eq!(card.status(), SdStatus::ADDRERR);
        card.command(SdCommand::Reset);
        assert_eq!(card.status(), SdStatus::empty());
    }

    #[test]
    fn timer_ticks_only_while_enabled() {
        let mut platform = HostPlatform::new(Vec::new(), Vec::new());
        assert_eq!(platform.ticks(), 0);

        platform.enable_interrupts(Interrupts::TIMER | Interrupts::UART0_RX);
        assert!(platform.interrupts().contains(Interrupts::UART0_RX));
        platform.disable_interrupts(Interrupts::TIMER);
        assert_eq!(platform.interrupts(), Interrupts::UART0_RX);
        assert_eq!(platform.ticks(), 0);

        platform.set_uart_fifo(false);
        assert!(!platform.uart_fifo());
    }

    #[test]
    fn countdown() {
        let mut timer = StdCountdown::default();
        assert!(timer.expired());
        timer.start(60);
        assert!(!timer.expired());
        timer.start(0);
        assert!(timer.expired());
    }
}
