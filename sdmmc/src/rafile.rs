//! Byte-granular reads over storage that only moves whole sectors.
//!
//! [`RaFile`] keeps one scratch sector. Whenever the logical offset is not sector aligned, the
//! scratch buffer holds the sector containing it, so the next read can drain the tail before
//! going back to aligned transfers.

use core::mem;

use crate::SECTOR_SIZE;

const SECTOR: u32 = SECTOR_SIZE as u32;

/// Sector-at-a-time access to an open file.
pub trait SectorFile {
    /// Reads the sector under the cursor without advancing. The tail of a short final sector is
    /// unspecified.
    fn read_sector(&mut self, buf: &mut [u8; SECTOR_SIZE]) -> bool;

    /// Moves the cursor to the following sector.
    fn next_sector(&mut self) -> bool;

    /// Moves the cursor to a sector-aligned byte offset.
    fn seek(&mut self, offset: u32) -> bool;

    fn size(&self) -> u32;
}

/// Resolves paths to [`SectorFile`]s.
pub trait SectorSource {
    type File: SectorFile;

    fn open(&mut self, path: &str) -> Option<Self::File>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Origin {
    Set,
    Cur,
}

pub struct RaFile<F> {
    file: F,
    ptr: u32,
    size: u32,
    buffer: [u8; SECTOR_SIZE],
}

impl<F: SectorFile> RaFile<F> {
    pub fn open<S: SectorSource<File = F>>(src: &mut S, path: &str) -> Option<Self> {
        src.open(path).map(Self::new)
    }

    pub fn new(file: F) -> Self {
        Self {
            size: file.size(),
            file,
            ptr: 0,
            buffer: [0; SECTOR_SIZE],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn position(&self) -> u32 {
        self.ptr
    }

    pub fn into_inner(self) -> F {
        self.file
    }

    /// Fills `buf` from the current position. Fails without reading anything if that would run
    /// past the end of the file.
    pub fn read(&mut self, mut buf: &mut [u8]) -> bool {
        match u32::try_from(buf.len()) {
            Ok(len) if self.ptr.checked_add(len).is_some_and(|end| end <= self.size) => {}
            _ => return false,
        }

        let intra = (self.ptr % SECTOR) as usize;
        if intra != 0 {
            let n = (SECTOR_SIZE - intra).min(buf.len());
            let (head, rest) = mem::take(&mut buf).split_at_mut(n);
            head.copy_from_slice(&self.buffer[intra..intra + n]);
            self.ptr += n as u32;
            buf = rest;
        }

        while buf.len() >= SECTOR_SIZE {
            let (sector, rest) = mem::take(&mut buf).split_at_mut(SECTOR_SIZE);
            let Ok(sector) = <&mut [u8; SECTOR_SIZE]>::try_from(sector) else {
                return false;
            };
            if !self.file.read_sector(sector) {
                return false;
            }
            self.file.next_sector();
            self.ptr += SECTOR;
            buf = rest;
        }

        if !buf.is_empty() {
            if !self.file.read_sector(&mut self.buffer) {
                return false;
            }
            self.file.next_sector();
            buf.copy_from_slice(&self.buffer[..buf.len()]);
            self.ptr += buf.len() as u32;
        }
        true
    }

    pub fn seek(&mut self, offset: i64, origin: Origin) -> bool {
        let target = match origin {
            Origin::Set => offset,
            Origin::Cur => i64::from(self.ptr) + offset,
        };
        let Ok(target) = u32::try_from(target) else {
            return false;
        };
        if target > self.size {
            return false;
        }

        let intra = target % SECTOR;
        if !self.file.seek(target - intra) {
            return false;
        }
        if intra != 0 {
            if !self.file.read_sector(&mut self.buffer) {
                return false;
            }
            self.file.next_sector();
        }
        self.ptr = target;
        true
    }
}
