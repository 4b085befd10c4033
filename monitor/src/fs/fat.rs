//! FAT volumes on the SD drives. Every sector goes through the block driver, so driver
//! failures surface as filesystem results.

use std::{
    error::Error,
    fmt,
    io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
    rc::Rc,
};

use fatfs::FsOptions;
use sdmmc::{ioctl, DiskError, SECTOR_SIZE};

use super::{
    path::{Location, VOLUMES},
    Attributes, DirEntry, FResult, File, FileSystem, FsError, OpenMode,
};
use crate::SharedDisks;

type Volume = fatfs::FileSystem<DriveIo>;
type Dir<'a> = fatfs::Dir<'a, DriveIo>;
type Entry<'a> = fatfs::DirEntry<'a, DriveIo>;
type Stream<'a> = fatfs::File<'a, DriveIo>;

/// A driver failure carried through `io::Error` so it can be told apart from FAT errors.
#[derive(Copy, Clone, Debug)]
struct DriveFault(DiskError);

impl fmt::Display for DriveFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "drive {}", self.0)
    }
}

impl Error for DriveFault {}

fn fault(e: DiskError) -> io::Error {
    let kind = match e {
        DiskError::NotReady => ErrorKind::NotConnected,
        DiskError::Error | DiskError::ParamError => ErrorKind::Other,
    };
    io::Error::new(kind, DriveFault(e))
}

fn drive_fault(e: &io::Error) -> Option<DiskError> {
    e.get_ref()
        .and_then(|inner| inner.downcast_ref::<DriveFault>())
        .map(|fault| fault.0)
}

fn disk_error(e: DiskError) -> FsError {
    match e {
        DiskError::NotReady => FsError::NotReady,
        DiskError::Error | DiskError::ParamError => FsError::DiskErr,
    }
}

fn fs_error(e: io::Error) -> FsError {
    if let Some(e) = drive_fault(&e) {
        return disk_error(e);
    }
    match e.kind() {
        ErrorKind::NotFound => FsError::NoFile,
        ErrorKind::AlreadyExists => FsError::Exist,
        ErrorKind::InvalidInput => FsError::InvalidName,
        ErrorKind::PermissionDenied => FsError::Denied,
        ErrorKind::UnexpectedEof => FsError::DiskErr,
        _ => {
            debug!("fat error: {e}");
            FsError::IntErr
        }
    }
}

fn clamp(len: u64) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// One SD drive as a seekable byte stream. Partial sectors are read, patched and written back.
pub struct DriveIo {
    disks: SharedDisks,
    drive: u8,
    len: u64,
    pos: u64,
    sector: [u8; SECTOR_SIZE],
}

impl DriveIo {
    pub fn new(disks: SharedDisks, drive: u8) -> Result<Self, DiskError> {
        let sectors = disks.borrow_mut().ioctl(drive, ioctl::GET_SECTOR_COUNT)?;
        Ok(Self {
            disks,
            drive,
            len: u64::from(sectors) * SECTOR_SIZE as u64,
            pos: 0,
            sector: [0; SECTOR_SIZE],
        })
    }

    /// The sector under the cursor, the offset into it and how many bytes of `want` fit.
    fn span(&self, want: usize) -> io::Result<(u32, usize, usize)> {
        let lba = u32::try_from(self.pos / SECTOR_SIZE as u64)
            .map_err(|_| fault(DiskError::ParamError))?;
        let offset = (self.pos % SECTOR_SIZE as u64) as usize;
        let left = usize::try_from(self.len - self.pos).unwrap_or(usize::MAX);
        Ok((lba, offset, want.min(SECTOR_SIZE - offset).min(left)))
    }

    fn load(&mut self, lba: u32) -> io::Result<()> {
        self.disks
            .borrow_mut()
            .read(self.drive, &mut self.sector, lba, 1)
            .map_err(fault)
    }
}

impl Read for DriveIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.len {
            return Ok(0);
        }
        let (lba, offset, n) = self.span(buf.len())?;
        self.load(lba)?;
        buf[..n].copy_from_slice(&self.sector[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for DriveIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.len {
            return Ok(0);
        }
        let (lba, offset, n) = self.span(buf.len())?;
        if n < SECTOR_SIZE {
            self.load(lba)?;
        }
        self.sector[offset..offset + n].copy_from_slice(&buf[..n]);
        self.disks
            .borrow_mut()
            .write(self.drive, &self.sector, lba, 1)
            .map_err(fault)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.disks
            .borrow_mut()
            .ioctl(self.drive, ioctl::CTRL_SYNC)
            .map(drop)
            .map_err(fault)
    }
}

impl Seek for DriveIo {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        self.pos = target
            .filter(|&target| target <= self.len)
            .ok_or_else(|| fault(DiskError::ParamError))?;
        Ok(self.pos)
    }
}

/// Looks `name` up in `dir` by long or short name, ignoring case like FAT does.
fn find<'a>(dir: &Dir<'a>, name: &str) -> FResult<Option<Entry<'a>>> {
    for entry in dir.iter() {
        let entry = entry.map_err(fs_error)?;
        if entry.file_name().eq_ignore_ascii_case(name)
            || entry.short_file_name().eq_ignore_ascii_case(name)
        {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

fn open_dir<'a>(volume: &'a Volume, components: &[String]) -> FResult<Dir<'a>> {
    let mut dir = volume.root_dir();
    for name in components {
        match find(&dir, name)? {
            Some(entry) if entry.is_dir() => dir = entry.to_dir(),
            _ => return Err(FsError::NoPath),
        }
    }
    Ok(dir)
}

/// The directory holding `location`, the name it is looked up under and its entry, if any.
fn lookup<'a, 'l>(
    volume: &'a Volume,
    location: &'l Location,
) -> FResult<(Dir<'a>, &'l str, Option<Entry<'a>>)> {
    let (name, parents) = location.split_last().ok_or(FsError::InvalidName)?;
    let dir = open_dir(volume, parents)?;
    let entry = find(&dir, name)?;
    Ok((dir, name, entry))
}

fn is_empty(dir: &Dir<'_>) -> FResult<bool> {
    for entry in dir.iter() {
        let name = entry.map_err(fs_error)?.file_name();
        if name != "." && name != ".." {
            return Ok(false);
        }
    }
    Ok(true)
}

fn pack_date(year: u16, month: u16, day: u16) -> u16 {
    year.saturating_sub(1980) << 9 | month << 5 | day
}

fn pack_time(hour: u16, min: u16, sec: u16) -> u16 {
    hour << 11 | min << 5 | sec / 2
}

/// The FAT volume on SD drive `N` is logical drive `N:`.
pub struct FatFs {
    disks: SharedDisks,
    volumes: [Option<Rc<Volume>>; VOLUMES],
    cwd: Location,
}

impl FatFs {
    pub fn new(disks: SharedDisks) -> Self {
        Self {
            disks,
            volumes: Default::default(),
            cwd: Location::default(),
        }
    }

    fn volume(&self, drive: u8) -> FResult<&Rc<Volume>> {
        match self.volumes.get(usize::from(drive)) {
            None => Err(FsError::InvalidDrive),
            Some(None) => Err(FsError::NotEnabled),
            Some(Some(volume)) => Ok(volume),
        }
    }
}

impl FileSystem for FatFs {
    fn mount(&mut self, drive: u8) -> FResult<()> {
        let slot = self
            .volumes
            .get_mut(usize::from(drive))
            .ok_or(FsError::InvalidDrive)?;
        *slot = None;

        let io = DriveIo::new(Rc::clone(&self.disks), drive).map_err(disk_error)?;
        let volume = Volume::new(io, FsOptions::new()).map_err(|e| match drive_fault(&e) {
            Some(e) => disk_error(e),
            None => {
                debug!("drive {drive}: {e}");
                FsError::NoFilesystem
            }
        })?;
        info!("drive {drive}: FAT volume mounted");
        *slot = Some(Rc::new(volume));
        Ok(())
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> FResult<Box<dyn File>> {
        let location = self.cwd.join(path)?;
        let volume = Rc::clone(self.volume(location.drive)?);

        let (path, size) = {
            let (dir, name, entry) = lookup(&volume, &location)?;
            let creates = mode
                .intersects(OpenMode::CREATE_NEW | OpenMode::CREATE_ALWAYS | OpenMode::OPEN_ALWAYS);
            let (name, size) = match entry {
                Some(entry) if entry.is_dir() => return Err(FsError::NoFile),
                Some(_) if mode.contains(OpenMode::CREATE_NEW) => return Err(FsError::Exist),
                Some(entry) if mode.contains(OpenMode::CREATE_ALWAYS) => {
                    entry.to_file().truncate().map_err(fs_error)?;
                    (entry.file_name(), 0)
                }
                Some(entry) => (entry.file_name(), clamp(entry.len())),
                None if creates => {
                    dir.create_file(name).map_err(fs_error)?;
                    (name.to_owned(), 0)
                }
                None => return Err(FsError::NoFile),
            };

            let mut path = location.components[..location.components.len() - 1].join("/");
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(&name);
            (path, size)
        };

        debug!("opened {}:{path} ({mode:?})", location.drive);
        Ok(Box::new(FatFile {
            volume,
            path,
            readable: mode.contains(OpenMode::READ),
            writable: mode.contains(OpenMode::WRITE),
            pos: if mode.contains(OpenMode::OPEN_APPEND) {
                size
            } else {
                0
            },
            size,
        }))
    }

    fn rename(&mut self, from: &str, to: &str) -> FResult<()> {
        let from = self.cwd.join(from)?;
        let to = self.cwd.join(to)?;
        if from.drive != to.drive {
            return Err(FsError::InvalidDrive);
        }
        let volume = self.volume(from.drive)?;

        let (_, _, source) = lookup(volume, &from)?;
        if source.is_none() {
            return Err(FsError::NoFile);
        }
        let (target_dir, target_name, existing) = lookup(volume, &to)?;
        if existing.is_some() {
            return Err(FsError::Exist);
        }
        volume
            .root_dir()
            .rename(&from.components.join("/"), &target_dir, target_name)
            .map_err(fs_error)
    }

    fn unlink(&mut self, path: &str) -> FResult<()> {
        let location = self.cwd.join(path)?;
        let volume = self.volume(location.drive)?;

        let (dir, _, entry) = lookup(volume, &location)?;
        let entry = entry.ok_or(FsError::NoFile)?;
        if entry.is_dir() && !is_empty(&entry.to_dir())? {
            return Err(FsError::Denied);
        }
        dir.remove(&entry.file_name()).map_err(fs_error)
    }

    fn mkdir(&mut self, path: &str) -> FResult<()> {
        let location = self.cwd.join(path)?;
        let volume = self.volume(location.drive)?;

        match lookup(volume, &location)? {
            (_, _, Some(_)) => Err(FsError::Exist),
            (dir, name, None) => dir.create_dir(name).map(drop).map_err(fs_error),
        }
    }

    fn chdir(&mut self, path: &str) -> FResult<()> {
        let location = self.cwd.join(path)?;
        open_dir(self.volume(location.drive)?, &location.components)?;
        self.cwd = location;
        Ok(())
    }

    fn getcwd(&self) -> FResult<String> {
        self.volume(self.cwd.drive)?;
        Ok(self.cwd.to_string())
    }

    fn read_dir(&mut self, path: &str) -> FResult<Vec<DirEntry>> {
        let location = self.cwd.join(path)?;
        let dir = open_dir(self.volume(location.drive)?, &location.components)?;

        let mut entries = Vec::new();
        for entry in dir.iter() {
            let entry = entry.map_err(fs_error)?;
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let modified = entry.modified();
            let (date, time) = (modified.date, modified.time);
            entries.push(DirEntry {
                size: if entry.is_dir() { 0 } else { clamp(entry.len()) },
                attributes: Attributes::from_bits_truncate(entry.attributes().bits()),
                date: pack_date(date.year, date.month, date.day),
                time: pack_time(time.hour, time.min, time.sec),
                name,
            });
        }
        Ok(entries)
    }

    fn free_space(&mut self, path: &str) -> FResult<u64> {
        let location = self.cwd.join(path)?;
        let stats = self
            .volume(location.drive)?
            .stats()
            .map_err(fs_error)?;
        Ok(u64::from(stats.free_clusters()) * u64::from(stats.cluster_size()))
    }
}

/// An open file. The FAT handle is reopened for every call, so the file holds no borrow of
/// its volume between commands.
struct FatFile {
    volume: Rc<Volume>,
    path: String,
    readable: bool,
    writable: bool,
    pos: u32,
    size: u32,
}

impl FatFile {
    fn with<T>(&self, op: impl FnOnce(&mut Stream<'_>) -> io::Result<T>) -> FResult<T> {
        let mut stream = self.volume.root_dir().open_file(&self.path).map_err(fs_error)?;
        stream
            .seek(SeekFrom::Start(self.pos.min(self.size).into()))
            .map_err(fs_error)?;
        let result = op(&mut stream).map_err(fs_error)?;
        if self.writable {
            stream.flush().map_err(fs_error)?;
        }
        Ok(result)
    }
}

impl File for FatFile {
    fn read(&mut self, buf: &mut [u8]) -> FResult<usize> {
        if !self.readable {
            return Err(FsError::Denied);
        }
        let n = self.with(|stream| {
            let mut total = 0;
            while total < buf.len() {
                match stream.read(&mut buf[total..])? {
                    0 => break,
                    n => total += n,
                }
            }
            Ok(total)
        })?;
        self.pos += n as u32;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> FResult<usize> {
        if !self.writable {
            return Err(FsError::Denied);
        }
        self.with(|stream| stream.write_all(buf))?;
        self.pos += buf.len() as u32;
        self.size = self.size.max(self.pos);
        Ok(buf.len())
    }

    fn seek(&mut self, offset: u32) -> FResult<()> {
        if offset > self.size {
            if !self.writable {
                self.pos = self.size;
                return Ok(());
            }
            let gap = (offset - self.size) as usize;
            self.pos = self.size;
            self.with(|stream| stream.write_all(&vec![0; gap]))?;
            self.size = offset;
        }
        self.pos = offset;
        Ok(())
    }

    fn tell(&self) -> u32 {
        self.pos
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn truncate(&mut self) -> FResult<()> {
        if !self.writable {
            return Err(FsError::Denied);
        }
        self.with(|stream| stream.truncate())?;
        self.size = self.pos;
        Ok(())
    }

    fn sync(&mut self) -> FResult<()> {
        if self.writable {
            self.with(|stream| stream.flush())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, fs, io::Cursor};

    use fatfs::FormatVolumeOptions;
    use sdmmc::{CardType, Policy};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        hosted::{ImageCard, StdCountdown},
        BoxedDisks,
    };

    const SECTORS: usize = 2048;

    /// A formatted card image holding `files`, attached and initialised as drive 0.
    fn card(files: &[(&str, &[u8])]) -> (TempDir, SharedDisks) {
        let mut image = Cursor::new(vec![0; SECTORS * SECTOR_SIZE]);
        fatfs::format_volume(&mut image, FormatVolumeOptions::new()).unwrap();
        {
            let volume = fatfs::FileSystem::new(&mut image, FsOptions::new()).unwrap();
            let root = volume.root_dir();
            root.create_dir("BIN").unwrap();
            for (name, contents) in files {
                root.create_file(name).unwrap().write_all(contents).unwrap();
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sd.img");
        fs::write(&path, image.into_inner()).unwrap();
        let mut disks = BoxedDisks::new(Box::new(StdCountdown::default()), Policy::default());
        assert!(disks.attach(Box::new(ImageCard::open(&path).unwrap())).is_ok());
        disks.initialize(0, CardType::Sdhc);
        (dir, Rc::new(RefCell::new(disks)))
    }

    fn mounted(files: &[(&str, &[u8])]) -> (TempDir, FatFs) {
        let (dir, disks) = card(files);
        let mut fat = FatFs::new(disks);
        fat.mount(0).unwrap();
        (dir, fat)
    }

    #[test]
    fn drive_io_patches_partial_sectors() {
        let (_dir, disks) = card(&[]);
        let mut io = DriveIo::new(Rc::clone(&disks), 0).unwrap();

        io.seek(SeekFrom::Start(510)).unwrap();
        io.write_all(&[1, 2, 3, 4]).unwrap();
        io.seek(SeekFrom::Start(508)).unwrap();
        let mut buf = [0xff; 8];
        io.read_exact(&mut buf).unwrap();

        let mut sector = [0; SECTOR_SIZE];
        disks.borrow_mut().read(0, &mut sector, 0, 1).unwrap();
        assert_eq!(&buf[2..6], [1, 2, 3, 4]);
        assert_eq!(&sector[510..], [1, 2]);
        assert!(io.seek(SeekFrom::End(1)).is_err());
    }

    #[test]
    fn mount_needs_a_ready_drive_and_a_volume() {
        let (_dir, disks) = card(&[]);
        let mut fat = FatFs::new(Rc::clone(&disks));
        assert_eq!(fat.mount(1).err(), Some(FsError::NotReady));
        assert_eq!(fat.mount(12).err(), Some(FsError::InvalidDrive));
        assert_eq!(
            fat.open("0:x", OpenMode::READ).err(),
            Some(FsError::NotEnabled)
        );
        fat.mount(0).unwrap();

        disks.borrow_mut().write(0, &[0; SECTOR_SIZE], 0, 1).unwrap();
        assert_eq!(fat.mount(0).err(), Some(FsError::NoFilesystem));
        assert_eq!(fat.getcwd().err(), Some(FsError::NotEnabled));
    }

    #[test]
    fn files_read_and_write_through_the_driver() {
        let (_dir, mut fat) = mounted(&[("hello.txt", b"hello world")]);

        let mut file = fat.open("0:/HELLO.TXT", OpenMode::READ).unwrap();
        let mut buf = [0; 32];
        assert_eq!(file.read(&mut buf).unwrap(), 11);
        assert_eq!(&buf[..11], b"hello world");
        assert_eq!(file.write(b"x").err(), Some(FsError::Denied));

        let mut file = fat
            .open("new.bin", OpenMode::CREATE_ALWAYS | OpenMode::WRITE | OpenMode::READ)
            .unwrap();
        file.write(&[7; 1000]).unwrap();
        file.seek(1200).unwrap();
        assert_eq!(file.size(), 1200);
        file.seek(600).unwrap();
        file.truncate().unwrap();
        drop(file);

        let mut file = fat.open("new.bin", OpenMode::READ).unwrap();
        assert_eq!(file.size(), 600);
        let mut buf = vec![0; 700];
        assert_eq!(file.read(&mut buf).unwrap(), 600);
        assert!(buf[..600].iter().all(|&b| b == 7));

        let mut file = fat
            .open("new.bin", OpenMode::OPEN_APPEND | OpenMode::WRITE)
            .unwrap();
        assert_eq!(file.tell(), 600);
        assert_eq!(
            fat.open("new.bin", OpenMode::CREATE_NEW | OpenMode::WRITE).err(),
            Some(FsError::Exist)
        );
        file.write(b"end").unwrap();
        assert_eq!(file.size(), 603);
    }

    #[test]
    fn directories() {
        let (_dir, mut fat) = mounted(&[]);

        assert_eq!(fat.getcwd().unwrap(), "0:/");
        fat.mkdir("work").unwrap();
        assert_eq!(fat.mkdir("WORK").err(), Some(FsError::Exist));
        fat.chdir("work").unwrap();
        assert_eq!(fat.getcwd().unwrap(), "0:/work");
        assert_eq!(fat.chdir("nowhere").err(), Some(FsError::NoPath));

        fat.open("a.txt", OpenMode::CREATE_NEW | OpenMode::WRITE)
            .unwrap();
        fat.rename("a.txt", "b.txt").unwrap();
        assert_eq!(fat.rename("gone", "c.txt").err(), Some(FsError::NoFile));
        let names: Vec<_> = fat.read_dir("").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["b.txt"]);

        fat.chdir("..").unwrap();
        let root = fat.read_dir("0:/").unwrap();
        assert!(root.iter().any(|e| e.name == "BIN" && e.is_dir()));
        assert_eq!(fat.unlink("work").err(), Some(FsError::Denied));
        fat.unlink("work/b.txt").unwrap();
        fat.unlink("work").unwrap();
        assert_eq!(fat.open("work/x", OpenMode::READ).err(), Some(FsError::NoPath));
        assert!(fat.free_space("0:").unwrap() > 0);
    }

    #[test]
    fn driver_failures_become_disk_errors() {
        let (dir, mut fat) = mounted(&[("hello.txt", b"hello")]);
        let mut file = fat.open("hello.txt", OpenMode::READ).unwrap();

        // Everything past the boot sector now fails with a CRC error.
        fs::OpenOptions::new()
            .write(true)
            .open(dir.path().join("sd.img"))
            .unwrap()
            .set_len(SECTOR_SIZE as u64)
            .unwrap();
        let mut buf = [0; 8];
        assert_eq!(file.read(&mut buf).err(), Some(FsError::DiskErr));
        assert_eq!(fat.read_dir("").err(), Some(FsError::DiskErr));

        *fat.disks.borrow_mut() =
            BoxedDisks::new(Box::new(StdCountdown::default()), Policy::default());
        assert_eq!(fat.mount(0).err(), Some(FsError::NotReady));
        assert_eq!(fs_error(fault(DiskError::ParamError)), FsError::DiskErr);
    }

    #[test]
    fn timestamps_pack_like_fat() {
        assert_eq!(pack_date(2019, 7, 18), (39 << 9) | (7 << 5) | 18);
        assert_eq!(pack_date(1970, 1, 1), (1 << 5) | 1);
        assert_eq!(pack_time(13, 5, 42), (13 << 11) | (5 << 5) | 21);
    }
}
