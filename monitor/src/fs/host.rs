use std::{
    fs::{self, OpenOptions},
    io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, Datelike, Local, Timelike};

use super::{
    path::{Location, VOLUMES},
    Attributes, DirEntry, FResult, File, FileSystem, FsError, OpenMode,
};

/// Serves each logical drive from a host directory. Names match case-insensitively like FAT.
pub struct HostFs {
    roots: [Option<PathBuf>; VOLUMES],
    mounted: [bool; VOLUMES],
    cwd: Location,
}

impl HostFs {
    pub fn new() -> Self {
        Self {
            roots: Default::default(),
            mounted: [false; VOLUMES],
            cwd: Location::default(),
        }
    }

    pub fn attach(&mut self, drive: u8, root: impl Into<PathBuf>) -> FResult<()> {
        let slot = self
            .roots
            .get_mut(usize::from(drive))
            .ok_or(FsError::InvalidDrive)?;
        *slot = Some(root.into());
        Ok(())
    }

    fn root(&self, drive: u8) -> FResult<&Path> {
        let drive = usize::from(drive);
        match self.roots.get(drive) {
            None => Err(FsError::InvalidDrive),
            Some(_) if !self.mounted[drive] => Err(FsError::NotEnabled),
            Some(None) => Err(FsError::NotReady),
            Some(Some(root)) => Ok(root),
        }
    }

    fn resolve(&self, path: &str) -> FResult<Location> {
        self.cwd.join(path)
    }

    /// Maps a location onto the host, fixing up the case of every existing component. The
    /// flag tells whether the last component exists.
    fn locate(&self, location: &mut Location) -> FResult<(PathBuf, bool)> {
        let mut host = self.root(location.drive)?.to_path_buf();
        let last = location.components.len();
        for (i, name) in location.components.iter_mut().enumerate() {
            match find(&host, name)? {
                Some(found) => {
                    *name = found;
                    host.push(&*name);
                    if i + 1 < last && !host.is_dir() {
                        return Err(FsError::NoPath);
                    }
                }
                None if i + 1 == last => {
                    host.push(&*name);
                    return Ok((host, false));
                }
                None => return Err(FsError::NoPath),
            }
        }
        Ok((host, true))
    }

    fn existing(&self, path: &str) -> FResult<PathBuf> {
        let mut location = self.resolve(path)?;
        match self.locate(&mut location)? {
            (host, true) => Ok(host),
            (_, false) => Err(FsError::NoFile),
        }
    }
}

impl Default for HostFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Looks `name` up in `dir`, exact spelling first.
fn find(dir: &Path, name: &str) -> FResult<Option<String>> {
    if dir.join(name).exists() {
        return Ok(Some(name.to_owned()));
    }
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        if let Some(found) = entry.file_name().to_str() {
            if found.eq_ignore_ascii_case(name) {
                return Ok(Some(found.to_owned()));
            }
        }
    }
    Ok(None)
}

fn io_error(e: io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NoFile,
        ErrorKind::PermissionDenied => FsError::Denied,
        ErrorKind::AlreadyExists => FsError::Exist,
        ErrorKind::InvalidInput => FsError::InvalidParameter,
        _ => {
            debug!("host filesystem error: {e}");
            FsError::DiskErr
        }
    }
}

fn clamp(len: u64) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

fn fat_timestamp(modified: SystemTime) -> (u16, u16) {
    let local = DateTime::<Local>::from(modified);
    let Some(years) = local.year().checked_sub(1980).filter(|y| (0..128).contains(y)) else {
        return (0, 0);
    };
    let date = (years as u16) << 9 | (local.month() as u16) << 5 | local.day() as u16;
    let time =
        (local.hour() as u16) << 11 | (local.minute() as u16) << 5 | (local.second() / 2) as u16;
    (date, time)
}

impl FileSystem for HostFs {
    fn mount(&mut self, drive: u8) -> FResult<()> {
        let slot = usize::from(drive);
        let root = self.roots.get(slot).ok_or(FsError::InvalidDrive)?;
        match root {
            Some(root) if root.is_dir() => {
                info!("drive {drive}: mounted from {}", root.display());
                self.mounted[slot] = true;
                Ok(())
            }
            Some(_) => Err(FsError::NoFilesystem),
            None => Err(FsError::NotReady),
        }
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> FResult<Box<dyn File>> {
        let mut location = self.resolve(path)?;
        let (host, exists) = self.locate(&mut location)?;
        if exists && host.is_dir() {
            return Err(FsError::NoFile);
        }

        let writable = mode.contains(OpenMode::WRITE);
        let creates =
            mode.intersects(OpenMode::CREATE_NEW | OpenMode::CREATE_ALWAYS | OpenMode::OPEN_ALWAYS);
        let mut options = OpenOptions::new();
        // The host wants write access for anything that may create or truncate.
        options.read(true).write(writable || creates);
        if mode.contains(OpenMode::CREATE_NEW) {
            if exists {
                return Err(FsError::Exist);
            }
            options.create_new(true);
        } else if mode.contains(OpenMode::CREATE_ALWAYS) {
            options.create(true).truncate(true);
        } else if mode.intersects(OpenMode::OPEN_ALWAYS) {
            options.create(true);
        } else if !exists {
            return Err(FsError::NoFile);
        }

        let mut file = options.open(&host).map_err(io_error)?;
        let size = clamp(file.metadata().map_err(io_error)?.len());
        let mut pos = 0;
        if mode.contains(OpenMode::OPEN_APPEND) {
            file.seek(SeekFrom::End(0)).map_err(io_error)?;
            pos = size;
        }
        debug!("opened {} ({mode:?})", host.display());
        Ok(Box::new(HostFile {
            file,
            readable: mode.contains(OpenMode::READ),
            writable,
            pos,
            size,
        }))
    }

    fn rename(&mut self, from: &str, to: &str) -> FResult<()> {
        let source = self.existing(from)?;
        let mut target = self.resolve(to)?;
        match self.locate(&mut target)? {
            (_, true) => Err(FsError::Exist),
            (dest, false) => fs::rename(source, dest).map_err(io_error),
        }
    }

    fn unlink(&mut self, path: &str) -> FResult<()> {
        let host = self.existing(path)?;
        if host.is_dir() {
            fs::remove_dir(host).map_err(|e| match io_error(e) {
                FsError::DiskErr => FsError::Denied,
                e => e,
            })
        } else {
            fs::remove_file(host).map_err(io_error)
        }
    }

    fn mkdir(&mut self, path: &str) -> FResult<()> {
        let mut location = self.resolve(path)?;
        match self.locate(&mut location)? {
            (_, true) => Err(FsError::Exist),
            (host, false) => fs::create_dir(host).map_err(io_error),
        }
    }

    fn chdir(&mut self, path: &str) -> FResult<()> {
        let mut location = self.resolve(path)?;
        match self.locate(&mut location)? {
            (host, true) if host.is_dir() => {
                self.cwd = location;
                Ok(())
            }
            _ => Err(FsError::NoPath),
        }
    }

    fn getcwd(&self) -> FResult<String> {
        self.root(self.cwd.drive)?;
        Ok(self.cwd.to_string())
    }

    fn read_dir(&mut self, path: &str) -> FResult<Vec<DirEntry>> {
        let mut location = self.resolve(path)?;
        let host = match self.locate(&mut location)? {
            (host, true) if host.is_dir() => host,
            _ => return Err(FsError::NoPath),
        };

        let mut entries = Vec::new();
        for entry in fs::read_dir(host).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let meta = entry.metadata().map_err(io_error)?;

            let mut attributes = if meta.is_dir() {
                Attributes::DIRECTORY
            } else {
                Attributes::ARCHIVE
            };
            attributes.set(Attributes::READ_ONLY, meta.permissions().readonly());
            attributes.set(Attributes::HIDDEN, name.starts_with('.'));
            let (date, time) = meta.modified().map(fat_timestamp).unwrap_or((0, 0));

            entries.push(DirEntry {
                name,
                size: if meta.is_dir() { 0 } else { clamp(meta.len()) },
                attributes,
                date,
                time,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn free_space(&mut self, path: &str) -> FResult<u64> {
        let location = self.resolve(path)?;
        let root = self.root(location.drive)?;
        let stat = rustix::fs::statvfs(root).map_err(|e| io_error(e.into()))?;
        Ok(stat.f_bavail * stat.f_frsize)
    }
}

struct HostFile {
    file: fs::File,
    readable: bool,
    writable: bool,
    pos: u32,
    size: u32,
}

impl File for HostFile {
    fn read(&mut self, buf: &mut [u8]) -> FResult<usize> {
        if !self.readable {
            return Err(FsError::Denied);
        }
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(io_error(e)),
            }
        }
        self.pos += total as u32;
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> FResult<usize> {
        if !self.writable {
            return Err(FsError::Denied);
        }
        self.file.write_all(buf).map_err(io_error)?;
        self.pos += buf.len() as u32;
        self.size = self.size.max(self.pos);
        Ok(buf.len())
    }

    fn seek(&mut self, offset: u32) -> FResult<()> {
        let offset = if offset > self.size && !self.writable {
            self.size
        } else {
            offset
        };
        if offset > self.size {
            self.file.set_len(offset.into()).map_err(io_error)?;
            self.size = offset;
        }
        self.file
            .seek(SeekFrom::Start(offset.into()))
            .map_err(io_error)?;
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
        self.file.set_len(self.pos.into()).map_err(io_error)?;
        self.size = self.pos;
        Ok(())
    }

    fn sync(&mut self) -> FResult<()> {
        if self.writable {
            self.file.sync_data().map_err(io_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn volume() -> (TempDir, HostFs) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("BIN")).unwrap();
        fs::write(dir.path().join("BIN/Hello.ZPU"), b"hello").unwrap();

        let mut hfs = HostFs::new();
        hfs.attach(0, dir.path()).unwrap();
        hfs.mount(0).unwrap();
        (dir, hfs)
    }

    #[test]
    fn mounting() {
        let mut hfs = HostFs::new();
        assert_eq!(hfs.mount(0).err(), Some(FsError::NotReady));
        assert_eq!(hfs.mount(12).err(), Some(FsError::InvalidDrive));
        hfs.attach(1, "/definitely/not/here").unwrap();
        assert_eq!(hfs.mount(1).err(), Some(FsError::NoFilesystem));

        assert_eq!(
            hfs.open("1:x", OpenMode::READ).err(),
            Some(FsError::NotEnabled)
        );
    }

    #[test]
    fn names_are_case_insensitive() {
        let (_dir, mut hfs) = volume();

        let mut file = hfs.open("0:\\bin\\hello.zpu", OpenMode::READ).unwrap();
        let mut buf = [0; 16];
        assert_eq!(file.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(file.tell(), 5);

        assert_eq!(
            hfs.open("0:/bin/nope.zpu", OpenMode::READ).err(),
            Some(FsError::NoFile)
        );
        assert_eq!(
            hfs.open("0:/nodir/x", OpenMode::READ).err(),
            Some(FsError::NoPath)
        );
        assert_eq!(
            hfs.open("bad?name", OpenMode::READ).err(),
            Some(FsError::InvalidName)
        );
    }

    #[test]
    fn open_dispositions() {
        let (dir, mut hfs) = volume();

        assert_eq!(
            hfs.open("bin/hello.zpu", OpenMode::CREATE_NEW | OpenMode::WRITE)
                .err(),
            Some(FsError::Exist)
        );

        let mut file = hfs
            .open("new.txt", OpenMode::CREATE_ALWAYS | OpenMode::WRITE)
            .unwrap();
        file.write(b"abcdef").unwrap();
        file.seek(2).unwrap();
        file.truncate().unwrap();
        assert_eq!(file.size(), 2);
        file.sync().unwrap();
        drop(file);
        assert_eq!(fs::read(dir.path().join("new.txt")).unwrap(), b"ab");

        let mut file = hfs
            .open("new.txt", OpenMode::OPEN_APPEND | OpenMode::WRITE)
            .unwrap();
        assert_eq!(file.tell(), 2);
        file.write(b"cd").unwrap();
        drop(file);
        assert_eq!(fs::read(dir.path().join("new.txt")).unwrap(), b"abcd");

        let mut file = hfs.open("new.txt", OpenMode::READ).unwrap();
        assert_eq!(file.write(b"x").err(), Some(FsError::Denied));
    }

    #[test]
    fn directories() {
        let (_dir, mut hfs) = volume();

        assert_eq!(hfs.getcwd().unwrap(), "0:/");
        hfs.mkdir("work").unwrap();
        assert_eq!(hfs.mkdir("WORK").err(), Some(FsError::Exist));
        hfs.chdir("work").unwrap();
        assert_eq!(hfs.getcwd().unwrap(), "0:/work");

        hfs.open("a.txt", OpenMode::CREATE_NEW | OpenMode::WRITE)
            .unwrap();
        hfs.rename("a.txt", "b.txt").unwrap();
        assert_eq!(hfs.rename("gone", "c.txt").err(), Some(FsError::NoFile));

        let names: Vec<_> = hfs
            .read_dir("")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["b.txt"]);

        hfs.chdir("..").unwrap();
        let root = hfs.read_dir("0:/").unwrap();
        assert!(root.iter().any(|e| e.name == "BIN" && e.is_dir()));
        assert_eq!(hfs.unlink("work").err(), Some(FsError::Denied));
        hfs.unlink("work/b.txt").unwrap();
        hfs.unlink("work").unwrap();
        assert_eq!(hfs.chdir("work").err(), Some(FsError::NoPath));
    }

    #[test]
    fn timestamps_pack_like_fat() {
        let (date, time) = fat_timestamp(SystemTime::now());
        assert!(date >> 9 >= 40);
        assert!(time >> 11 < 24);
    }
}
