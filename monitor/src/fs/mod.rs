//! The filesystem the shell drives: FatFS semantics, expressed as traits.

use std::fmt;

use bitflags::bitflags;
use sdmmc::{
    rafile::{SectorFile, SectorSource},
    SECTOR_SIZE,
};

mod fat;
mod host;
mod path;

pub use fat::FatFs;
pub use host::HostFs;

/// Every failure a filesystem call can report, numbered as FatFS numbers its `FRESULT`s.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FsError {
    DiskErr = 1,
    IntErr,
    NotReady,
    NoFile,
    NoPath,
    InvalidName,
    Denied,
    Exist,
    InvalidObject,
    WriteProtected,
    InvalidDrive,
    NotEnabled,
    NoFilesystem,
    MkfsAborted,
    Timeout,
    Locked,
    NotEnoughCore,
    TooManyOpenFiles,
    InvalidParameter,
}

impl FsError {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DiskErr => "Disk Error",
            Self::IntErr => "Internal error.",
            Self::NotReady => "Disk not ready.",
            Self::NoFile => "No file found.",
            Self::NoPath => "No path found.",
            Self::InvalidName => "Invalid filename.",
            Self::Denied => "Access denied.",
            Self::Exist => "File already exists.",
            Self::InvalidObject => "File handle invalid.",
            Self::WriteProtected => "SD is write protected.",
            Self::InvalidDrive => "Drive number is invalid.",
            Self::NotEnabled => "Disk not enabled.",
            Self::NoFilesystem => "No compatible filesystem found on disk.",
            Self::MkfsAborted => "Format aborted.",
            Self::Timeout => "Timeout, operation cancelled.",
            Self::Locked => "File is locked.",
            Self::NotEnoughCore => "Insufficient memory.",
            Self::TooManyOpenFiles => "Too many open files.",
            Self::InvalidParameter => "Parameters incorrect.",
        })
    }
}

impl std::error::Error for FsError {}

pub type FResult<T> = Result<T, FsError>;

/// The console line for a filesystem result.
pub struct Outcome<T>(pub FResult<T>);

impl<T> fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Ok(_) => f.write_str("Success."),
            Err(e) => e.fmt(f),
        }
    }
}

bitflags! {
    /// `f_open` mode byte.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct OpenMode: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        const CREATE_NEW = 0x04;
        const CREATE_ALWAYS = 0x08;
        const OPEN_ALWAYS = 0x10;
        const OPEN_APPEND = 0x30;
    }

    /// Directory entry attribute byte.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

impl OpenMode {
    /// Open an existing file, fail otherwise. Has no bits of its own.
    pub const OPEN_EXISTING: Self = Self::empty();
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub size: u32,
    pub attributes: Attributes,
    /// FAT packed date: years since 1980 in bits 15..9, month 8..5, day 4..0.
    pub date: u16,
    /// FAT packed time: hours 15..11, minutes 10..5, seconds / 2 in 4..0.
    pub time: u16,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }
}

pub trait File {
    /// Reads up to `buf.len()` bytes; a short count means end of file.
    fn read(&mut self, buf: &mut [u8]) -> FResult<usize>;

    fn write(&mut self, buf: &[u8]) -> FResult<usize>;

    /// Moves the file pointer. Seeking past the end of a writable file extends it.
    fn seek(&mut self, offset: u32) -> FResult<()>;

    fn tell(&self) -> u32;

    fn size(&self) -> u32;

    /// Cuts the file at the file pointer.
    fn truncate(&mut self) -> FResult<()>;

    fn sync(&mut self) -> FResult<()>;
}

impl<F: File + ?Sized> File for Box<F> {
    fn read(&mut self, buf: &mut [u8]) -> FResult<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> FResult<usize> {
        (**self).write(buf)
    }

    fn seek(&mut self, offset: u32) -> FResult<()> {
        (**self).seek(offset)
    }

    fn tell(&self) -> u32 {
        (**self).tell()
    }

    fn size(&self) -> u32 {
        (**self).size()
    }

    fn truncate(&mut self) -> FResult<()> {
        (**self).truncate()
    }

    fn sync(&mut self) -> FResult<()> {
        (**self).sync()
    }
}

/// A set of volumes addressed as `N:path`, with a current directory.
pub trait FileSystem {
    /// Registers logical drive `drive` so later calls can reach it.
    fn mount(&mut self, drive: u8) -> FResult<()>;

    fn open(&mut self, path: &str, mode: OpenMode) -> FResult<Box<dyn File>>;

    fn rename(&mut self, from: &str, to: &str) -> FResult<()>;

    fn unlink(&mut self, path: &str) -> FResult<()>;

    fn mkdir(&mut self, path: &str) -> FResult<()>;

    fn chdir(&mut self, path: &str) -> FResult<()>;

    fn getcwd(&self) -> FResult<String>;

    fn read_dir(&mut self, path: &str) -> FResult<Vec<DirEntry>>;

    /// Free space on the volume holding `path`, in bytes.
    fn free_space(&mut self, path: &str) -> FResult<u64>;
}

/// Sector-granular view of an open [`File`], for [`sdmmc::rafile::RaFile`].
pub struct Sectors<F> {
    file: F,
    cursor: u32,
}

impl<F: File> Sectors<F> {
    pub fn new(file: F) -> Self {
        Self { file, cursor: 0 }
    }

    pub fn into_inner(self) -> F {
        self.file
    }
}

impl<F: File> SectorFile for Sectors<F> {
    fn read_sector(&mut self, buf: &mut [u8; SECTOR_SIZE]) -> bool {
        if self.cursor >= self.file.size() || self.file.seek(self.cursor).is_err() {
            return false;
        }
        matches!(self.file.read(buf), Ok(n) if n > 0)
    }

    fn next_sector(&mut self) -> bool {
        self.cursor = self.cursor.saturating_add(SECTOR_SIZE as u32);
        true
    }

    fn seek(&mut self, offset: u32) -> bool {
        if offset % SECTOR_SIZE as u32 != 0 || offset > self.file.size() {
            return false;
        }
        self.cursor = offset;
        true
    }

    fn size(&self) -> u32 {
        self.file.size()
    }
}

/// Opens files read-only on a [`FileSystem`] for random access.
pub struct Volume<'a>(pub &'a mut dyn FileSystem);

impl SectorSource for Volume<'_> {
    type File = Sectors<Box<dyn File>>;

    fn open(&mut self, path: &str) -> Option<Self::File> {
        self.0
            .open(path, OpenMode::OPEN_EXISTING | OpenMode::READ)
            .ok()
            .map(Sectors::new)
    }
}

#[cfg(test)]
mod tests {
    use sdmmc::rafile::{Origin, RaFile};

    use super::*;

    struct Blob {
        data: Vec<u8>,
        pos: u32,
    }

    impl File for Blob {
        fn read(&mut self, buf: &mut [u8]) -> FResult<usize> {
            let start = (self.pos as usize).min(self.data.len());
            let n = buf.len().min(self.data.len() - start);
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            self.pos += n as u32;
            Ok(n)
        }

        fn write(&mut self, _: &[u8]) -> FResult<usize> {
            Err(FsError::Denied)
        }

        fn seek(&mut self, offset: u32) -> FResult<()> {
            self.pos = offset;
            Ok(())
        }

        fn tell(&self) -> u32 {
            self.pos
        }

        fn size(&self) -> u32 {
            self.data.len() as u32
        }

        fn truncate(&mut self) -> FResult<()> {
            Err(FsError::Denied)
        }

        fn sync(&mut self) -> FResult<()> {
            Ok(())
        }
    }

    #[test]
    fn messages() {
        assert_eq!(FsError::NoFile.to_string(), "No file found.");
        assert_eq!(FsError::InvalidParameter.code(), 19);
        assert_eq!(Outcome(Ok::<_, FsError>(())).to_string(), "Success.");
        assert_eq!(
            Outcome::<()>(Err(FsError::NoFilesystem)).to_string(),
            "No compatible filesystem found on disk."
        );
    }

    #[test]
    fn random_access_over_a_file() {
        let data: Vec<u8> = (0..1500u32).map(|i| (i * 7) as u8).collect();
        let mut file = RaFile::new(Sectors::new(Blob {
            data: data.clone(),
            pos: 0,
        }));

        assert!(file.seek(700, Origin::Set));
        let mut buf = [0; 600];
        assert!(file.read(&mut buf));
        assert_eq!(buf[..], data[700..1300]);

        let mut tail = [0; 300];
        assert!(!file.read(&mut tail));
        let mut tail = [0; 200];
        assert!(file.read(&mut tail));
        assert_eq!(tail[..], data[1300..]);
    }
}
