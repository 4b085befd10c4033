//! Filesystem commands.

use cmd::Args;
use sdmmc::{
    rafile::{Origin, RaFile},
    SECTOR_SIZE,
};

use super::Zputa;
use crate::{
    dump::{memory_dump, print_stats, Width},
    exec::{self, ExecError, Mode},
    fs::{Attributes, DirEntry, FResult, FsError, OpenMode, Outcome, Sectors},
};

const BUF_LEN: u32 = SECTOR_SIZE as u32;
/// Bytes per console write in `fcat`.
const CAT_CHUNK: usize = 80;

const READ: OpenMode = OpenMode::OPEN_EXISTING.union(OpenMode::READ);
const CREATE: OpenMode = OpenMode::CREATE_ALWAYS.union(OpenMode::WRITE);

impl Zputa<'_> {
    fn report<T>(&mut self, result: FResult<T>) {
        out!(self, "{}\n", Outcome(result));
    }

    fn stats(&mut self, bytes: u32, action: &str) {
        let millis = self.platform.millis();
        print_stats(&mut *self.console, bytes, millis, action);
    }
}

pub(super) fn finit(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let drive = args.next_uint().unwrap_or(0);
    if drive > 9 {
        return;
    }
    match z.fs.mount(drive as u8) {
        Ok(()) => {
            out!(z, "Initialised.\n");
            z.session.fs_ready = true;
        }
        Err(e) => out!(z, "{e}\n"),
    }
}

pub(super) fn fopen(z: &mut Zputa<'_>, mut args: Args<'_>) {
    if z.session.file.is_some() {
        out!(z, "File already open, please close before re-opening\n");
        return;
    }
    let Some(mode) = args.next_uint() else {
        return;
    };
    let result = z.fs.open(args.rest(), OpenMode::from_bits_truncate(mode as u8));
    let (result, file) = match result {
        Ok(file) => (Ok(()), Some(file)),
        Err(e) => (Err(e), None),
    };
    z.report(result);
    z.session.file = file;
}

pub(super) fn fclose(z: &mut Zputa<'_>, _args: Args<'_>) {
    let Some(file) = z.session.file.as_mut() else {
        out!(z, "No file open, cannot close.\n");
        return;
    };
    let result = file.sync();
    if result.is_ok() {
        z.session.file = None;
    }
    z.report(result);
}

pub(super) fn fseek(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(file) = z.session.file.as_mut() else {
        out!(z, "No file open, cannot seek.\n");
        return;
    };
    let Some(offset) = args.next_uint() else {
        return;
    };
    let result = file.seek(offset);
    let ptr = file.tell();
    let ok = result.is_ok();
    z.report(result);
    if ok {
        out!(z, "fptr = {ptr}(0x{ptr:X})\n");
    }
}

pub(super) fn fread(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let len = args.next_uint().unwrap_or(0);
    let Some(file) = z.session.file.as_mut() else {
        out!(z, "No file open, cannot read.\n");
        return;
    };
    if len > BUF_LEN {
        out!(z, "{}\n", FsError::InvalidParameter);
        return;
    }

    z.platform.reset_millis();
    let block = z.session.block_len;
    let mut loaded = 0;
    while loaded < len {
        let chunk = block.min(len - loaded);
        let buf = &mut z.session.buf[loaded as usize..(loaded + chunk) as usize];
        match file.read(buf) {
            Ok(n) => {
                loaded += n as u32;
                if n < chunk as usize {
                    break;
                }
            }
            Err(e) => {
                out!(z, "{e}\n");
                return;
            }
        }
    }
    z.stats(loaded, "read");
}

pub(super) fn fwrite(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let len = args.next_uint().unwrap_or(0);
    let Some(file) = z.session.file.as_mut() else {
        out!(z, "No file open, cannot write.\n");
        return;
    };
    if len > BUF_LEN {
        out!(z, "{}\n", FsError::InvalidParameter);
        return;
    }

    z.platform.reset_millis();
    let block = z.session.block_len;
    let mut written = 0;
    while written < len {
        let chunk = block.min(len - written);
        let buf = &z.session.buf[written as usize..(written + chunk) as usize];
        match file.write(buf) {
            Ok(n) => {
                written += n as u32;
                if n < chunk as usize {
                    break;
                }
            }
            Err(e) => {
                out!(z, "{e}\n");
                return;
            }
        }
    }
    z.stats(written, "written");
}

pub(super) fn finspect(z: &mut Zputa<'_>, mut args: Args<'_>) {
    if z.session.file.is_none() {
        out!(z, "No file open, buffer contents invalid.\n");
        return;
    }
    let offset = args.next_uint().unwrap_or(0);
    let len = args.next_uint().unwrap_or(0);
    if offset >= BUF_LEN || offset.saturating_add(len) > BUF_LEN {
        out!(z, "{}\n", FsError::InvalidParameter);
        return;
    }
    let len = if len == 0 { BUF_LEN - offset } else { len };
    memory_dump(
        &mut *z.console,
        &mut z.session.buf[..],
        offset,
        len,
        Width::Half,
        offset,
        16,
    );
}

pub(super) fn ftrunc(z: &mut Zputa<'_>, _args: Args<'_>) {
    let Some(file) = z.session.file.as_mut() else {
        out!(z, "No file open, cannot truncate.\n");
        return;
    };
    let result = file.truncate();
    z.report(result);
}

pub(super) fn frename(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(from) = args.next_str() else {
        return;
    };
    let result = z.fs.rename(from, args.rest());
    z.report(result);
}

pub(super) fn fdel(z: &mut Zputa<'_>, args: Args<'_>) {
    let result = z.fs.unlink(args.rest());
    z.report(result);
}

pub(super) fn fmkdir(z: &mut Zputa<'_>, args: Args<'_>) {
    let result = z.fs.mkdir(args.rest());
    z.report(result);
}

pub(super) fn fcd(z: &mut Zputa<'_>, args: Args<'_>) {
    let result = z.fs.chdir(args.rest());
    z.report(result);
}

pub(super) fn fshowdir(z: &mut Zputa<'_>, _args: Args<'_>) {
    match z.fs.getcwd() {
        Ok(cwd) => out!(z, "{cwd}\n"),
        Err(e) => out!(z, "{e}\n"),
    }
}

fn attribute_flags(entry: &DirEntry) -> [char; 5] {
    let flag = |a: Attributes, c| if entry.attributes.contains(a) { c } else { '-' };
    [
        flag(Attributes::DIRECTORY, 'D'),
        flag(Attributes::READ_ONLY, 'R'),
        flag(Attributes::HIDDEN, 'H'),
        flag(Attributes::SYSTEM, 'S'),
        flag(Attributes::ARCHIVE, 'A'),
    ]
}

fn list_line(entry: &DirEntry) -> String {
    let [d, r, h, s, a] = attribute_flags(entry);
    let year = (entry.date >> 9) + 1980;
    let month = (entry.date >> 5) & 0xf;
    let day = entry.date & 0x1f;
    let hour = entry.time >> 11;
    let minute = (entry.time >> 5) & 0x3f;
    format!(
        "{d}{r}{h}{s}{a} {year}/{month:02}/{day:02} {hour:02}:{minute:02} {:9}  {}\n",
        entry.size, entry.name
    )
}

pub(super) fn fdir(z: &mut Zputa<'_>, args: Args<'_>) {
    let path = args.rest();
    let entries = match z.fs.read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            out!(z, "{e}\n");
            return;
        }
    };

    let (mut files, mut dirs, mut total) = (0u32, 0u32, 0u64);
    for entry in &entries {
        if entry.is_dir() {
            dirs += 1;
        } else {
            files += 1;
            total += u64::from(entry.size);
        }
        out!(z, "{}", list_line(entry));
    }
    out!(z, "{files:4} File(s),{total:10} bytes total\n{dirs:4} Dir(s)");
    match z.fs.free_space(path) {
        Ok(free) => out!(z, ", {:10}KiB free\n", free / 1024),
        Err(_) => out!(z, "\n"),
    }
}

pub(super) fn fcat(z: &mut Zputa<'_>, args: Args<'_>) {
    let mut file = match z.fs.open(args.rest(), READ) {
        Ok(file) => file,
        Err(e) => {
            out!(z, "{e}\n");
            return;
        }
    };
    let mut chunk = [0; CAT_CHUNK];
    loop {
        match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => chunk[..n].iter().for_each(|&b| z.console.write_byte(b)),
            Err(e) => {
                out!(z, "{e}\n");
                return;
            }
        }
    }
    out!(z, "\n");
}

/// Writes `sources` one after the other into a fresh `dst`.
fn copy_files(z: &mut Zputa<'_>, sources: &[&str], dst: &str) -> FResult<u32> {
    let mut inputs = Vec::with_capacity(sources.len());
    for src in sources {
        inputs.push(z.fs.open(src, READ)?);
    }
    let mut output = z.fs.open(dst, CREATE)?;

    let mut copied = 0;
    for input in &mut inputs {
        loop {
            let n = input.read(&mut z.session.buf)?;
            if n == 0 {
                break;
            }
            output.write(&z.session.buf[..n])?;
            copied += n as u32;
        }
    }
    output.sync()?;
    Ok(copied)
}

fn copy_command(z: &mut Zputa<'_>, mut args: Args<'_>, inputs: usize) {
    let mut names = Vec::with_capacity(inputs + 1);
    for _ in 0..=inputs {
        match args.next_str() {
            Some(name) => names.push(name),
            None => {
                out!(z, "{}\n", FsError::InvalidParameter);
                return;
            }
        }
    }
    let (dst, sources) = names.split_last().map(|(d, s)| (*d, s)).unwrap_or_default();

    z.platform.reset_millis();
    match copy_files(z, sources, dst) {
        Ok(copied) => z.stats(copied, "copied"),
        Err(e) => out!(z, "{e}\n"),
    }
}

pub(super) fn fcp(z: &mut Zputa<'_>, args: Args<'_>) {
    copy_command(z, args, 1);
}

pub(super) fn fconcat(z: &mut Zputa<'_>, args: Args<'_>) {
    copy_command(z, args, 2);
}

/// Copies `len` bytes from `start` in `src` into a fresh `dst`, stopping at the end of `src`.
fn extract(z: &mut Zputa<'_>, src: &str, dst: &str, start: u32, len: u32) -> FResult<u32> {
    let mut input = RaFile::new(Sectors::new(z.fs.open(src, READ)?));
    if !input.seek(i64::from(start), Origin::Set) {
        return Err(FsError::InvalidParameter);
    }
    let mut output = z.fs.open(dst, CREATE)?;

    let mut remaining = len.min(input.size().saturating_sub(start));
    let mut copied = 0;
    while remaining > 0 {
        let n = remaining.min(BUF_LEN) as usize;
        let buf = &mut z.session.buf[..n];
        if !input.read(buf) {
            return Err(FsError::DiskErr);
        }
        output.write(buf)?;
        copied += n as u32;
        remaining -= n as u32;
    }
    output.sync()?;
    Ok(copied)
}

pub(super) fn fxtract(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let (Some(src), Some(dst)) = (args.next_str(), args.next_str()) else {
        out!(z, "{}\n", FsError::InvalidParameter);
        return;
    };
    let start = args.next_uint().unwrap_or(0);
    let len = args.next_uint().unwrap_or(u32::MAX);

    z.platform.reset_millis();
    match extract(z, src, dst, start, len) {
        Ok(copied) => z.stats(copied, "copied"),
        Err(e) => out!(z, "{e}\n"),
    }
}

pub(super) fn fload(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(name) = args.next_str() else {
        return;
    };
    let addr = args.next_addr().unwrap_or(z.app_addr);

    z.platform.reset_millis();
    match exec::load(&mut *z.fs, &mut z.mem, z.cfg, name, addr) {
        Ok(len) => z.stats(len, "read"),
        Err(e) => out!(z, "{e}\n"),
    }
}

fn save(z: &mut Zputa<'_>, name: &str, addr: u32, len: u32) -> Result<u32, ExecError> {
    if len == 0 {
        return Err(FsError::InvalidParameter.into());
    }
    let bytes = z.mem.slice(addr, len)?;
    let mut file = z.fs.open(name, CREATE)?;
    let mut written = 0;
    for chunk in bytes.chunks(SECTOR_SIZE) {
        written += file.write(chunk)? as u32;
    }
    file.sync()?;
    Ok(written)
}

pub(super) fn fsave(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(name) = args.next_str() else {
        return;
    };
    let addr = args.next_addr().unwrap_or(0);
    let len = args.next_uint().unwrap_or(0);

    z.platform.reset_millis();
    match save(z, name, addr, len) {
        Ok(written) => z.stats(written, "written"),
        Err(e) => out!(z, "{e}\n"),
    }
}

pub(super) fn fexec(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(name) = args.next_str() else {
        return;
    };
    let load_addr = args.next_addr().unwrap_or(z.app_addr);
    let exec_addr = args.next_addr().unwrap_or(load_addr);
    let result = Mode::try_from(args.next_uint().unwrap_or(0))
        .and_then(|mode| exec::execute(z.env(), name, load_addr, exec_addr, mode, 0, 0));
    match result {
        Ok(code) => debug!("{name} returned {code}"),
        Err(e) => out!(z, "{e}\n"),
    }
}

/// Dumps `name` a sector at a time, labelling rows with file offsets. Returns the bytes shown.
fn dump_file(z: &mut Zputa<'_>, name: &str, width: Width) -> FResult<u32> {
    let mut file = z.fs.open(name, READ)?;
    let mut offset = 0;
    loop {
        let n = file.read(&mut z.session.buf)? as u32;
        if n == 0 {
            break;
        }
        let buf = &mut z.session.buf[..n as usize];
        let more = memory_dump(&mut *z.console, buf, 0, n, width, offset, 32);
        offset += n;
        if !more {
            break;
        }
    }
    Ok(offset)
}

pub(super) fn fdump(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(name) = args.next_str() else {
        return;
    };
    let width = match args.next_uint().unwrap_or(0) {
        0 => Some(Width::Byte),
        bits => Width::from_bits(bits),
    };
    let Some(width) = width else {
        out!(z, "{}\n", FsError::InvalidParameter);
        return;
    };

    z.platform.reset_millis();
    match dump_file(z, name, width) {
        Ok(shown) => z.stats(shown, "read"),
        Err(e) => out!(z, "{e}\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, size: u32, attributes: Attributes) -> DirEntry {
        DirEntry {
            name: name.into(),
            size,
            attributes,
            // 2019-07-18 13:45
            date: (39 << 9) | (7 << 5) | 18,
            time: (13 << 11) | (45 << 5),
        }
    }

    #[test]
    fn listing_lines() {
        assert_eq!(
            list_line(&entry("BOOT.ROM", 4096, Attributes::ARCHIVE)),
            "----A 2019/07/18 13:45      4096  BOOT.ROM\n"
        );
        assert_eq!(
            list_line(&entry("bin", 0, Attributes::DIRECTORY | Attributes::READ_ONLY)),
            "DR--- 2019/07/18 13:45         0  bin\n"
        );
    }
}
