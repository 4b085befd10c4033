use cmd::Args;
use slib::{read_line, Console, LINE_LEN};
use soc::{Devices, Region, SocConfig};
use zpu::{Bus, Fault};

use super::Zputa;
use crate::dump::{memory_dump, Width};

fn load(bus: &mut (impl Bus + ?Sized), addr: u32, width: Width) -> Result<u32, Fault> {
    match width {
        Width::Byte => bus.read_u8(addr).map(u32::from),
        Width::Half => bus.read_u16(addr).map(u32::from),
        Width::Word => bus.read_u32(addr),
    }
}

fn store(bus: &mut (impl Bus + ?Sized), addr: u32, width: Width, value: u32) -> Result<(), Fault> {
    match width {
        Width::Byte => bus.write_u8(addr, value as u8),
        Width::Half => bus.write_u16(addr, value as u16),
        Width::Word => bus.write_u32(addr, value),
    }
}

/// Stores the values left in `args` from `addr` onwards or, with none given, edits one cell at
/// a time: `.` ends the session, an empty line steps over the cell.
pub(super) fn edit(
    console: &mut dyn Console,
    bus: &mut (impl Bus + ?Sized),
    mut addr: u32,
    addr_digits: usize,
    width: Width,
    mut args: Args<'_>,
) {
    let step = width.bytes();
    if let Some(first) = args.next_uint() {
        let mut value = Some(first);
        while let Some(v) = value {
            if let Err(fault) = store(bus, addr, width, v) {
                let _ = writeln!(console, "{fault}");
                return;
            }
            addr = addr.wrapping_add(step);
            value = args.next_uint();
        }
        return;
    }

    let digits = 2 * step as usize;
    let mut line = [0; LINE_LEN];
    loop {
        let current = match load(bus, addr, width) {
            Ok(current) => current,
            Err(fault) => {
                let _ = writeln!(console, "{fault}");
                return;
            }
        };
        let _ = write!(console, "{addr:0addr_digits$X} {current:0digits$X}-");
        let Some(input) = read_line(console, &mut line) else {
            return;
        };
        if input.starts_with('.') {
            return;
        }
        if input.is_empty() {
            addr = addr.wrapping_add(step);
            continue;
        }
        match Args::new(input).next_uint() {
            Some(value) => {
                if let Err(fault) = store(bus, addr, width, value) {
                    let _ = writeln!(console, "{fault}");
                    return;
                }
                addr = addr.wrapping_add(step);
            }
            None => {
                let _ = console.write_str("???\n");
            }
        }
    }
}

/// `<start> <end>` followed by one more word.
fn range_args(args: &mut Args<'_>) -> Option<(u32, u32)> {
    Some((args.next_addr()?, args.next_addr()?))
}

pub(super) fn mclear(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some((start, end)) = range_args(&mut args) else {
        return;
    };
    let word = args.next_uint().unwrap_or(0);
    out!(z, "Clearing...");
    for addr in (start..end).step_by(4) {
        if let Err(fault) = z.mem.write_u32(addr, word) {
            out!(z, "{fault}");
            break;
        }
    }
    out!(z, "\n");
}

pub(super) fn mcopy(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some((start, end)) = range_args(&mut args) else {
        return;
    };
    let Some(dst) = args.next_addr() else {
        return;
    };
    out!(z, "Copying...");
    for (src, dst) in (start..end).zip(dst..) {
        if let Err(fault) = z.mem.read_u8(src).and_then(|b| z.mem.write_u8(dst, b)) {
            out!(z, "{fault}");
            break;
        }
    }
    out!(z, "\n");
}

pub(super) fn mdiff(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some((start, end)) = range_args(&mut args) else {
        return;
    };
    let Some(other) = args.next_addr() else {
        return;
    };
    out!(z, "Comparing...");
    for (a, b) in (start..end).zip(other..) {
        match (z.mem.read_u8(a), z.mem.read_u8(b)) {
            (Ok(x), Ok(y)) if x != y => out!(z, "{a:08x}({x:08x})->{b:08x}({y:08x})\n"),
            (Ok(_), Ok(_)) => {}
            (Err(fault), _) | (_, Err(fault)) => {
                out!(z, "{fault}");
                break;
            }
        }
    }
    out!(z, "\n");
}

/// What `mdump` shows when not told: the first memory that holds code, else the stack.
fn default_region(cfg: &SocConfig) -> Region {
    if cfg.has(Devices::INSN_BRAM) {
        cfg.insn_bram
    } else if cfg.has(Devices::BRAM) {
        cfg.bram
    } else if cfg.has(Devices::RAM) || cfg.has(Devices::SDRAM) {
        cfg.ram
    } else {
        Region::new(cfg.stack_start.saturating_sub(512), 520)
    }
}

pub(super) fn mdump(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let region = default_region(z.cfg);
    let start = args.next_addr().unwrap_or(region.addr);
    let end = args
        .next_addr()
        .unwrap_or_else(|| start.saturating_add(region.size));
    let width = args
        .next_uint()
        .and_then(Width::from_bits)
        .unwrap_or(Width::Byte);

    out!(z, "Dump Memory\n");
    let size = end.saturating_sub(start);
    memory_dump(&mut *z.console, &mut z.mem, start, size, width, start, 32);
    out!(z, "\nComplete.\n");
}

fn edit_memory(z: &mut Zputa<'_>, mut args: Args<'_>, width: Width) {
    let Some(addr) = args.next_addr() else {
        return;
    };
    edit(&mut *z.console, &mut z.mem, addr, 8, width, args);
}

pub(super) fn meb(z: &mut Zputa<'_>, args: Args<'_>) {
    edit_memory(z, args, Width::Byte);
}

pub(super) fn meh(z: &mut Zputa<'_>, args: Args<'_>) {
    edit_memory(z, args, Width::Half);
}

pub(super) fn mew(z: &mut Zputa<'_>, args: Args<'_>) {
    edit_memory(z, args, Width::Word);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::tests::Tty;

    #[test]
    fn edit_with_values_stores_consecutive_cells() {
        let mut tty = Tty::default();
        let mut buf = [0u8; 8];

        edit(&mut tty, &mut buf[..], 2, 4, Width::Half, Args::new("0x1234 0x5678"));
        assert_eq!(buf, [0, 0, 0x12, 0x34, 0x56, 0x78, 0, 0]);
        assert!(tty.output.is_empty());
    }

    #[test]
    fn interactive_edit() {
        let mut tty = Tty::typed("0x41\n\nzz\n0x43\n.\n");
        let mut buf = [0u8; 8];

        edit(&mut tty, &mut buf[..], 0, 4, Width::Byte, Args::new(""));
        assert_eq!(&buf[..4], [0x41, 0, 0x43, 0]);
        let text = tty.text();
        assert!(text.starts_with("0000 00-0x41\n0001 00-\n0002 00-zz\n???\n0002 00-0x43\n"));
        assert!(text.ends_with("0003 00-.\n"));
    }

    #[test]
    fn edit_stops_at_the_end_of_the_target() {
        let mut tty = Tty::default();
        let mut buf = [0u8; 4];

        edit(&mut tty, &mut buf[..], 3, 4, Width::Byte, Args::new("1 2"));
        assert_eq!(buf[3], 1);
        assert_eq!(tty.text(), "bus error at 00000004\n");
    }

    #[test]
    fn mdump_defaults_follow_the_memory_map() {
        let cfg = SocConfig::BUILTIN;
        assert_eq!(default_region(&cfg), cfg.insn_bram);

        let mut bare = cfg;
        bare.devices = Devices::empty();
        assert_eq!(default_region(&bare), Region::new(0x7600, 520));
    }
}
