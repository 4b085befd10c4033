use heapless::Vec;

use crate::{
    CardType, Countdown, DResult, DStatus, DiskError, SdCommand, SdController, SdStatus,
    SECTOR_SIZE,
};

/// Control codes accepted by [`Disks::ioctl`].
pub mod ioctl {
    /// Wait for any pending write to land.
    pub const CTRL_SYNC: u8 = 0;
    pub const GET_SECTOR_COUNT: u8 = 1;
    pub const GET_SECTOR_SIZE: u8 = 2;
    /// Erase block size, in sectors.
    pub const GET_BLOCK_SIZE: u8 = 3;
}

/// How hard to try before giving up on a sector.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Policy {
    pub attempts: u32,
    pub timeout_secs: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout_secs: 5,
        }
    }
}

struct Slot<C> {
    card: C,
    status: DStatus,
}

enum Transfer {
    Complete(SdStatus),
    Stalled(SdStatus),
}

/// The attached SD drives, sharing one countdown timer.
pub struct Disks<C, T, const N: usize = 4> {
    slots: Vec<Slot<C>, N>,
    timer: T,
    policy: Policy,
}

impl<C: SdController, T: Countdown, const N: usize> Disks<C, T, N> {
    pub fn new(timer: T, policy: Policy) -> Self {
        Self {
            slots: Vec::new(),
            timer,
            policy,
        }
    }

    /// Registers a controller as the next drive number, returning it. Hands the card back when
    /// every slot is taken.
    pub fn attach(&mut self, card: C) -> Result<u8, C> {
        let drive = self.slots.len() as u8;
        self.slots
            .push(Slot {
                card,
                status: DStatus::NOINIT,
            })
            .map_err(|slot| slot.card)?;
        Ok(drive)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: Policy) {
        self.policy = policy;
    }

    pub fn status(&self, drive: u8) -> DStatus {
        self.slots
            .get(usize::from(drive))
            .map_or(DStatus::NOINIT, |slot| slot.status)
    }

    /// Resets the card and waits for it to come out of busy.
    pub fn initialize(&mut self, drive: u8, card_type: CardType) -> DStatus {
        let Some(slot) = self.slots.get_mut(usize::from(drive)) else {
            return DStatus::NOINIT;
        };

        slot.card.command(SdCommand::CardType(card_type));
        slot.card.command(SdCommand::Reset);
        self.timer.start(self.policy.timeout_secs);
        let mut status = slot.card.status();
        while status.contains(SdStatus::BUSY) && !self.timer.expired() {
            status = slot.card.status();
        }

        if status.intersects(SdStatus::ERROR | SdStatus::BUSY) {
            warn!("sd{drive}: initialisation failed, status {:#010x}", status.bits());
            slot.status.insert(DStatus::NOINIT);
        } else {
            info!("sd{drive}: ready ({card_type:?})");
            slot.status.remove(DStatus::NOINIT);
        }
        slot.status
    }

    /// Reads `count` consecutive sectors starting at `sector` into `buf`.
    pub fn read(&mut self, drive: u8, buf: &mut [u8], sector: u32, count: u32) -> DResult {
        let len = Self::span(buf.len(), count)?;
        let (slot, timer, policy) = self.ready(drive)?;

        for (lba, chunk) in (sector..).zip(buf[..len].chunks_exact_mut(SECTOR_SIZE)) {
            with_retry(slot, policy, drive, lba, "read", |card| {
                read_sector(card, timer, policy.timeout_secs, lba, chunk)
            })?;
        }
        Ok(())
    }

    /// Writes `count` consecutive sectors from `buf` starting at `sector`.
    pub fn write(&mut self, drive: u8, buf: &[u8], sector: u32, count: u32) -> DResult {
        let len = Self::span(buf.len(), count)?;
        let (slot, timer, policy) = self.ready(drive)?;

        for (lba, chunk) in (sector..).zip(buf[..len].chunks_exact(SECTOR_SIZE)) {
            with_retry(slot, policy, drive, lba, "write", |card| {
                write_sector(card, timer, policy.timeout_secs, lba, chunk)
            })?;
        }
        Ok(())
    }

    pub fn ioctl(&mut self, drive: u8, code: u8) -> DResult<u32> {
        let (slot, timer, policy) = self.ready(drive)?;

        match code {
            ioctl::CTRL_SYNC => {
                timer.start(policy.timeout_secs);
                while slot.card.status().contains(SdStatus::BUSY) {
                    if timer.expired() {
                        error!("sd{drive}: sync timed out");
                        reset(&mut slot.card);
                        return Err(DiskError::Error);
                    }
                }
                Ok(0)
            }
            ioctl::GET_SECTOR_COUNT => slot
                .card
                .geometry()
                .map(|geometry| geometry.sectors)
                .ok_or(DiskError::Error),
            ioctl::GET_SECTOR_SIZE => Ok(SECTOR_SIZE as u32),
            ioctl::GET_BLOCK_SIZE => slot
                .card
                .geometry()
                .map(|geometry| geometry.erase_block)
                .ok_or(DiskError::Error),
            _ => Err(DiskError::ParamError),
        }
    }

    fn ready(&mut self, drive: u8) -> DResult<(&mut Slot<C>, &mut T, Policy)> {
        match self.slots.get_mut(usize::from(drive)) {
            Some(slot) if !slot.status.contains(DStatus::NOINIT) => {
                Ok((slot, &mut self.timer, self.policy))
            }
            _ => Err(DiskError::NotReady),
        }
    }

    fn span(available: usize, count: u32) -> DResult<usize> {
        let len = (count as usize)
            .checked_mul(SECTOR_SIZE)
            .ok_or(DiskError::ParamError)?;
        if len > available {
            return Err(DiskError::ParamError);
        }
        Ok(len)
    }
}

fn with_retry<C: SdController>(
    slot: &mut Slot<C>,
    policy: Policy,
    drive: u8,
    lba: u32,
    op: &str,
    mut attempt: impl FnMut(&mut C) -> Transfer,
) -> DResult {
    for n in 1..=policy.attempts {
        let status = match attempt(&mut slot.card) {
            Transfer::Complete(status) if !status.intersects(SdStatus::ERROR) => return Ok(()),
            Transfer::Complete(status) => status,
            Transfer::Stalled(status) => {
                reset(&mut slot.card);
                if !status.intersects(SdStatus::ERROR) {
                    warn!(
                        "sd{drive}: {op} of sector {lba} stalled, attempt {n}/{}",
                        policy.attempts
                    );
                    continue;
                }
                status
            }
        };

        error!("sd{drive}: {op} of sector {lba} failed, status {:#010x}", status.bits());
        return Err(DiskError::Error);
    }

    error!("sd{drive}: {op} of sector {lba} gave up after {} attempts", policy.attempts);
    slot.status.insert(DStatus::NOINIT);
    Err(DiskError::Error)
}

fn read_sector<C: SdController, T: Countdown>(
    card: &mut C,
    timer: &mut T,
    timeout_secs: u32,
    lba: u32,
    chunk: &mut [u8],
) -> Transfer {
    timer.start(timeout_secs);
    card.set_address(lba);
    card.command(SdCommand::Read);

    let mut received = 0;
    loop {
        let status = card.status();
        if status.contains(SdStatus::DATA_VALID) {
            chunk[received] = card.read_data();
            received += 1;
        }

        if received == SECTOR_SIZE {
            return Transfer::Complete(status);
        }
        if !status.intersects(SdStatus::BUSY | SdStatus::DATA_VALID) || timer.expired() {
            return Transfer::Stalled(status);
        }
    }
}

fn write_sector<C: SdController, T: Countdown>(
    card: &mut C,
    timer: &mut T,
    timeout_secs: u32,
    lba: u32,
    chunk: &[u8],
) -> Transfer {
    timer.start(timeout_secs);
    card.set_address(lba);
    card.command(SdCommand::Write);

    let mut sent = 0;
    loop {
        let status = card.status();
        if status.contains(SdStatus::DATA_REQ) && sent < SECTOR_SIZE {
            card.write_data(chunk[sent]);
            sent += 1;
        }

        if !status.contains(SdStatus::BUSY) {
            return if sent == SECTOR_SIZE {
                Transfer::Complete(status)
            } else {
                Transfer::Stalled(status)
            };
        }
        if timer.expired() {
            return Transfer::Stalled(status);
        }
    }
}

fn reset<C: SdController>(card: &mut C) {
    card.command(SdCommand::Reset);
    while card.status().contains(SdStatus::BUSY) {}
}

#[cfg(test)]
pub(crate) mod tests {
    extern crate std;

    use std::{vec, vec::Vec};

    use crate::{
        ioctl, CardType, Countdown, DStatus, DiskError, Disks, Geometry, Policy, SdCommand,
        SdController, SdStatus, SECTOR_SIZE,
    };

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum State {
        Idle,
        Reading(usize),
        Writing(usize),
        Hung,
    }

    /// Emulated controller over an in-memory card image.
    pub(crate) struct FakeCard {
        pub image: Vec<u8>,
        pub commands: Vec<SdCommand>,
        pub addresses: Vec<u32>,
        /// Number of upcoming read/write commands that hang instead of transferring.
        pub hang: usize,
        pub error: SdStatus,
        pub registers_touched: usize,
        state: State,
        address: u32,
        pending: [u8; SECTOR_SIZE],
    }

    impl FakeCard {
        pub fn new(sectors: usize) -> Self {
            Self {
                image: (0..sectors * SECTOR_SIZE).map(|i| (i * 7 % 251) as u8).collect(),
                commands: Vec::new(),
                addresses: Vec::new(),
                hang: 0,
                error: SdStatus::empty(),
                registers_touched: 0,
                state: State::Idle,
                address: 0,
                pending: [0; SECTOR_SIZE],
            }
        }

        fn sector(&self) -> core::ops::Range<usize> {
            let start = self.address as usize * SECTOR_SIZE;
            start..start + SECTOR_SIZE
        }
    }

    impl SdController for FakeCard {
        fn set_address(&mut self, sector: u32) {
            self.registers_touched += 1;
            self.address = sector;
            self.addresses.push(sector);
        }

        fn command(&mut self, command: SdCommand) {
            self.registers_touched += 1;
            self.commands.push(command);
            self.state = match command {
                SdCommand::Read | SdCommand::Write if self.hang > 0 => {
                    self.hang -= 1;
                    State::Hung
                }
                SdCommand::Read => {
                    let range = self.sector();
                    self.pending.copy_from_slice(&self.image[range]);
                    State::Reading(0)
                }
                SdCommand::Write => State::Writing(0),
                SdCommand::Reset | SdCommand::CardType(_) => State::Idle,
            };
        }

        fn status(&mut self) -> SdStatus {
            self.registers_touched += 1;
            self.error
                | match self.state {
                    State::Idle => SdStatus::empty(),
                    State::Reading(_) => SdStatus::BUSY | SdStatus::DATA_VALID,
                    State::Writing(_) => SdStatus::BUSY | SdStatus::DATA_REQ,
                    State::Hung => SdStatus::BUSY,
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
            self.pending[n]
        }

        fn write_data(&mut self, byte: u8) {
            let State::Writing(n) = self.state else {
                return;
            };
            self.pending[n] = byte;
            if n + 1 == SECTOR_SIZE {
                let range = self.sector();
                self.image[range].copy_from_slice(&self.pending);
                self.state = State::Idle;
            } else {
                self.state = State::Writing(n + 1);
            }
        }

        fn geometry(&self) -> Option<Geometry> {
            Some(Geometry {
                sectors: (self.image.len() / SECTOR_SIZE) as u32,
                erase_block: 8,
            })
        }
    }

    /// Expires after a fixed number of polls.
    #[derive(Default)]
    pub(crate) struct Polls {
        pub budget: u32,
        left: u32,
    }

    impl Countdown for Polls {
        fn start(&mut self, _secs: u32) {
            self.left = if self.budget == 0 { 2000 } else { self.budget };
        }

        fn expired(&mut self) -> bool {
            self.left = self.left.saturating_sub(1);
            self.left == 0
        }
    }

    pub(crate) fn ready_disks(card: FakeCard) -> Disks<FakeCard, Polls> {
        let mut disks = Disks::new(Polls::default(), Policy::default());
        assert_eq!(disks.attach(card).ok(), Some(0));
        assert_eq!(disks.initialize(0, CardType::Sdhc), DStatus::empty());
        disks
    }

    #[test]
    fn read_fills_consecutive_sectors() {
        let card = FakeCard::new(8);
        let expected = card.image[2 * SECTOR_SIZE..5 * SECTOR_SIZE].to_vec();
        let mut disks = ready_disks(card);

        let mut buf = vec![0; 3 * SECTOR_SIZE];
        assert_eq!(disks.read(0, &mut buf, 2, 3), Ok(()));

        assert_eq!(buf, expected);
        assert_eq!(disks.slots[0].card.addresses, [2, 3, 4]);
    }

    #[test]
    fn write_lands_in_image() {
        let mut disks = ready_disks(FakeCard::new(4));

        let buf = [0x5a; 2 * SECTOR_SIZE];
        assert_eq!(disks.write(0, &buf, 1, 2), Ok(()));

        let image = &disks.slots[0].card.image;
        assert!(image[SECTOR_SIZE..3 * SECTOR_SIZE].iter().all(|&b| b == 0x5a));
        assert_ne!(image[0], 0x5a);
    }

    #[test]
    fn uninitialised_drive_is_not_ready_without_touching_hardware() {
        let mut disks = Disks::<FakeCard, Polls>::new(Polls::default(), Policy::default());
        disks.attach(FakeCard::new(1)).ok();

        let mut buf = [0; SECTOR_SIZE];
        assert_eq!(disks.read(0, &mut buf, 0, 1), Err(DiskError::NotReady));
        assert_eq!(disks.write(0, &buf, 0, 1), Err(DiskError::NotReady));
        assert_eq!(disks.ioctl(0, ioctl::CTRL_SYNC), Err(DiskError::NotReady));
        assert_eq!(disks.slots[0].card.registers_touched, 0);
    }

    #[test]
    fn unknown_drive_is_not_ready() {
        let mut disks = ready_disks(FakeCard::new(1));

        let mut buf = [0; SECTOR_SIZE];
        assert_eq!(disks.read(99, &mut buf, 0, 1), Err(DiskError::NotReady));
        assert_eq!(disks.status(99), DStatus::NOINIT);
    }

    #[test]
    fn recovers_from_transient_stall() {
        let mut card = FakeCard::new(2);
        card.hang = 2;
        let expected = card.image[SECTOR_SIZE..].to_vec();
        let mut disks = ready_disks(card);
        // Enough polls for a full sector, so only the hung commands time out.
        disks.timer.budget = 2 * SECTOR_SIZE as u32;

        let mut buf = [0; SECTOR_SIZE];
        assert_eq!(disks.read(0, &mut buf, 1, 1), Ok(()));
        assert_eq!(disks.slots[0].card.addresses, [1, 1, 1]);

        assert_eq!(buf[..], expected[..]);
        assert_eq!(disks.status(0), DStatus::empty());
    }

    #[test]
    fn gives_up_after_three_attempts() {
        let mut card = FakeCard::new(2);
        card.hang = usize::MAX;
        let mut disks = ready_disks(card);
        disks.timer.budget = 50;
        disks.slots[0].card.commands.clear();

        let mut buf = [0; SECTOR_SIZE];
        assert_eq!(disks.read(0, &mut buf, 0, 1), Err(DiskError::Error));

        let card = &mut disks.slots[0].card;
        let reads = card.commands.iter().filter(|&&c| c == SdCommand::Read).count();
        let resets = card.commands.iter().filter(|&&c| c == SdCommand::Reset).count();
        assert_eq!((reads, resets), (3, 3));
        assert!(!card.status().contains(SdStatus::BUSY));
        assert_eq!(disks.status(0), DStatus::NOINIT);
    }

    #[test]
    fn write_retries_honour_policy() {
        let mut card = FakeCard::new(1);
        card.hang = usize::MAX;
        let mut disks = ready_disks(card);
        disks.timer.budget = 10;
        disks.set_policy(Policy {
            attempts: 5,
            timeout_secs: 1,
        });

        assert_eq!(disks.write(0, &[0; SECTOR_SIZE], 0, 1), Err(DiskError::Error));

        let writes = disks.slots[0]
            .card
            .commands
            .iter()
            .filter(|&&c| c == SdCommand::Write)
            .count();
        assert_eq!(writes, 5);
    }

    #[test]
    fn card_error_fails_but_keeps_drive_ready() {
        let mut disks = ready_disks(FakeCard::new(1));
        disks.slots[0].card.error = SdStatus::CRCERROR;

        let mut buf = [0; SECTOR_SIZE];
        assert_eq!(disks.read(0, &mut buf, 0, 1), Err(DiskError::Error));
        assert_eq!(disks.status(0), DStatus::empty());
    }

    #[test]
    fn short_buffer_is_a_parameter_error() {
        let mut disks = ready_disks(FakeCard::new(4));

        let mut buf = [0; SECTOR_SIZE];
        assert_eq!(disks.read(0, &mut buf, 0, 2), Err(DiskError::ParamError));
    }

    #[test]
    fn ioctl_reports_geometry() {
        let mut disks = ready_disks(FakeCard::new(16));

        assert_eq!(disks.ioctl(0, ioctl::CTRL_SYNC), Ok(0));
        assert_eq!(disks.ioctl(0, ioctl::GET_SECTOR_COUNT), Ok(16));
        assert_eq!(disks.ioctl(0, ioctl::GET_SECTOR_SIZE), Ok(512));
        assert_eq!(disks.ioctl(0, ioctl::GET_BLOCK_SIZE), Ok(8));
        assert_eq!(disks.ioctl(0, 42), Err(DiskError::ParamError));
    }

    #[test]
    fn initialise_fails_on_hung_card() {
        let mut card = FakeCard::new(1);
        card.error = SdStatus::ILLEGALCMD;
        let mut disks = Disks::<FakeCard, Polls>::new(Polls::default(), Policy::default());
        disks.attach(card).ok();

        assert_eq!(disks.initialize(0, CardType::Sd), DStatus::NOINIT);
        assert_eq!(
            disks.slots[0].card.commands,
            [SdCommand::CardType(CardType::Sd), SdCommand::Reset]
        );
    }

    #[test]
    fn attach_is_bounded() {
        let mut disks = Disks::<FakeCard, Polls, 1>::new(Polls::default(), Policy::default());

        assert_eq!(disks.attach(FakeCard::new(1)).ok(), Some(0));
        assert!(disks.attach(FakeCard::new(1)).is_err());
        assert_eq!(disks.len(), 1);
    }
}
