use crate::{rafile::SectorFile, Countdown, DResult, Disks, SdController, SECTOR_SIZE};

/// Anything that moves whole sectors.
pub trait BlockDevice {
    fn read_blocks(&mut self, buf: &mut [u8], sector: u32, count: u32) -> DResult;

    fn write_blocks(&mut self, buf: &[u8], sector: u32, count: u32) -> DResult;
}

impl<B: BlockDevice + ?Sized> BlockDevice for &mut B {
    fn read_blocks(&mut self, buf: &mut [u8], sector: u32, count: u32) -> DResult {
        (**self).read_blocks(buf, sector, count)
    }

    fn write_blocks(&mut self, buf: &[u8], sector: u32, count: u32) -> DResult {
        (**self).write_blocks(buf, sector, count)
    }
}

/// A single drive of a [`Disks`] set.
pub struct Drive<'a, C, T, const N: usize> {
    disks: &'a mut Disks<C, T, N>,
    drive: u8,
}

impl<C: SdController, T: Countdown, const N: usize> Disks<C, T, N> {
    pub fn drive(&mut self, drive: u8) -> Drive<'_, C, T, N> {
        Drive { disks: self, drive }
    }
}

impl<C: SdController, T: Countdown, const N: usize> BlockDevice for Drive<'_, C, T, N> {
    fn read_blocks(&mut self, buf: &mut [u8], sector: u32, count: u32) -> DResult {
        self.disks.read(self.drive, buf, sector, count)
    }

    fn write_blocks(&mut self, buf: &[u8], sector: u32, count: u32) -> DResult {
        self.disks.write(self.drive, buf, sector, count)
    }
}

/// A file laid out contiguously on a block device: `size` bytes starting at sector `start`.
pub struct Extent<B> {
    dev: B,
    start: u32,
    size: u32,
    cursor: u32,
}

impl<B: BlockDevice> Extent<B> {
    pub fn new(dev: B, start: u32, size: u32) -> Self {
        Self {
            dev,
            start,
            size,
            cursor: 0,
        }
    }

    pub fn into_inner(self) -> B {
        self.dev
    }
}

impl<B: BlockDevice> SectorFile for Extent<B> {
    fn read_sector(&mut self, buf: &mut [u8; SECTOR_SIZE]) -> bool {
        let offset = self.cursor as usize * SECTOR_SIZE;
        if offset >= self.size as usize {
            return false;
        }
        self.dev
            .read_blocks(buf, self.start + self.cursor, 1)
            .is_ok()
    }

    fn next_sector(&mut self) -> bool {
        self.cursor += 1;
        true
    }

    fn seek(&mut self, offset: u32) -> bool {
        if offset % SECTOR_SIZE as u32 != 0 || offset > self.size {
            return false;
        }
        self.cursor = offset / SECTOR_SIZE as u32;
        true
    }

    fn size(&self) -> u32 {
        self.size
    }
}
