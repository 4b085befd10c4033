//! Raw disk access and the sector-sized working buffer.

use cmd::Args;
use sdmmc::{ioctl, CardType, DStatus, SECTOR_SIZE};

use super::{memory::edit, Zputa};
use crate::{
    dump::{memory_dump, Width},
    fs::FsError,
};

const BUF_LEN: u32 = SECTOR_SIZE as u32;

/// The physical drive named by `value`, complaining when no drive can have that number.
fn drive(z: &mut Zputa<'_>, value: u32) -> Option<u8> {
    let drive = u8::try_from(value).ok();
    if drive.is_none() {
        out!(z, "Bad disk id!\n");
    }
    drive
}

pub(super) fn ddump(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(drive) = args.next_uint().and_then(|value| drive(z, value)) else {
        return;
    };
    let sector = args.next_uint().unwrap_or(z.session.sector);
    if let Err(e) = z.disks.borrow_mut().read(drive, &mut z.session.buf, sector, 1) {
        out!(z, "rc={}\n", e.code());
        return;
    }
    z.session.sector = sector.wrapping_add(1);
    out!(z, "Sector:{sector}\n");
    memory_dump(&mut *z.console, &mut z.session.buf[..], 0, BUF_LEN, Width::Half, 0, 32);
}

pub(super) fn dinit(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(value) = args.next_uint() else {
        out!(z, "Bad disk id!\n");
        return;
    };
    let Some(drive) = drive(z, value) else {
        return;
    };
    let card_type = args.next_uint().map_or(CardType::Sdhc, CardType::from_index);
    let status = z.disks.borrow_mut().initialize(drive, card_type);
    if status.contains(DStatus::NOINIT) {
        out!(z, "Failed to initialise.\n");
    } else {
        out!(z, "Initialised.\n");
        z.session.disk_ready = true;
    }
}

pub(super) fn dstat(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(drive) = args.next_uint().and_then(|value| drive(z, value)) else {
        return;
    };
    let sectors = z.disks.borrow_mut().ioctl(drive, ioctl::GET_SECTOR_COUNT);
    if let Ok(sectors) = sectors {
        out!(z, "Drive size: {sectors} sectors\n");
    }
    let block = z.disks.borrow_mut().ioctl(drive, ioctl::GET_BLOCK_SIZE);
    if let Ok(block) = block {
        out!(z, "Erase block: {block} sectors\n");
    }
}

pub(super) fn dioctl(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(drive) = args.next_uint().and_then(|value| drive(z, value)) else {
        return;
    };
    let rc = z
        .disks
        .borrow_mut()
        .ioctl(drive, ioctl::CTRL_SYNC)
        .map_or_else(|e| e.code(), |_| 0);
    out!(z, "rc={rc}\n");
}

pub(super) fn bdump(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(offset) = args.next_uint() else {
        return;
    };
    if offset >= BUF_LEN {
        out!(z, "{}\n", FsError::InvalidParameter);
        return;
    }
    memory_dump(
        &mut *z.console,
        &mut z.session.buf[..],
        offset,
        BUF_LEN - offset,
        Width::Half,
        offset,
        32,
    );
}

pub(super) fn bedit(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(offset) = args.next_uint() else {
        return;
    };
    edit(&mut *z.console, &mut z.session.buf[..], offset, 4, Width::Byte, args);
}

/// `bread` and `bwrite`: `<pd#> <sect> [<n>]`.
fn transfer_args(z: &mut Zputa<'_>, mut args: Args<'_>) -> Option<(u8, u32, u32)> {
    let drive = args.next_uint()?;
    let sector = args.next_uint()?;
    let drive = self::drive(z, drive)?;
    Some((drive, sector, args.next_uint().unwrap_or(1)))
}

pub(super) fn bread(z: &mut Zputa<'_>, args: Args<'_>) {
    let Some((drive, sector, count)) = transfer_args(z, args) else {
        return;
    };
    let rc = z
        .disks
        .borrow_mut()
        .read(drive, &mut z.session.buf, sector, count)
        .map_or_else(|e| e.code(), |()| 0);
    out!(z, "rc={rc}\n");
}

pub(super) fn bwrite(z: &mut Zputa<'_>, args: Args<'_>) {
    let Some((drive, sector, count)) = transfer_args(z, args) else {
        return;
    };
    let rc = z
        .disks
        .borrow_mut()
        .write(drive, &z.session.buf, sector, count)
        .map_or_else(|e| e.code(), |()| 0);
    out!(z, "rc={rc}\n");
}

pub(super) fn bfill(z: &mut Zputa<'_>, mut args: Args<'_>) {
    if let Some(value) = args.next_uint() {
        z.session.buf.fill(value as u8);
    }
}

pub(super) fn blen(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let len = args.next_uint().unwrap_or(0);
    if len == 0 || len > BUF_LEN {
        out!(z, "{}\n", FsError::InvalidParameter);
        return;
    }
    z.session.block_len = len;
    out!(z, "R/W length = {len}\n");
}
