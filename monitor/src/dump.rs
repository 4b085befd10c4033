//! Hex dump pager and transfer statistics.

use slib::{Console, ESC};
use zpu::Bus;

/// Cell size of a dump.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Width {
    Byte = 1,
    Half = 2,
    Word = 4,
}

impl Width {
    /// Maps a width in bits; anything else is rejected.
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::Byte),
            16 => Some(Self::Half),
            32 => Some(Self::Word),
            _ => None,
        }
    }

    pub const fn bytes(self) -> u32 {
        self as u32
    }
}

/// Dumps `size` bytes from `start`, `row` bytes per line, labelling lines from `label`.
///
/// A space pauses the listing until the next space; ESC aborts it, in which case the result is
/// `false`. Unreadable bytes show as blanks.
pub fn memory_dump(
    console: &mut (impl Console + ?Sized),
    bus: &mut (impl Bus + ?Sized),
    start: u32,
    size: u32,
    width: Width,
    label: u32,
    row: u32,
) -> bool {
    let end = start.saturating_add(size);
    let mut pnt = start;
    let mut addr = label;
    loop {
        let _ = write!(console, "{addr:08X}:  ");
        let mut i = 0;
        while i < row {
            let cell = pnt.wrapping_add(i);
            let digits = 2 * width.bytes() as usize;
            let value = match width {
                _ if cell >= end => None,
                Width::Byte => bus.read_u8(cell).ok().map(u32::from),
                Width::Half => bus.read_u16(cell).ok().map(u32::from),
                Width::Word => bus.read_u32(cell).ok(),
            };
            let _ = match value {
                Some(value) => write!(console, "{value:0digits$X} "),
                None => write!(console, "{:digits$} ", ""),
            };
            i += width.bytes();
        }

        let _ = console.write_str(" |");
        for i in 0..row {
            let cell = pnt.wrapping_add(i);
            let c = match bus.read_u8(cell) {
                Ok(c @ b' '..=b'~') if cell < end => c,
                _ => b' ',
            };
            console.write_byte(c);
        }
        let _ = console.write_str("|\r\n");

        pnt = pnt.wrapping_add(row);
        addr = addr.wrapping_add(row);

        let mut key = console.poll_byte();
        if key == Some(b' ') {
            loop {
                key = console.read_byte();
                if matches!(key, Some(b' ' | ESC) | None) {
                    break;
                }
            }
        }
        if key == Some(ESC) {
            return false;
        }
        if pnt >= end {
            return true;
        }
    }
}

/// Transfer rate in bytes per second; sub-second transfers are scaled up.
pub fn bytes_per_sec(bytes: u32, millis: u32) -> u32 {
    match millis {
        0 => bytes,
        1..=999 => (u64::from(bytes) * 1000 / u64::from(millis)) as u32,
        _ => bytes / (millis / 1000),
    }
}

pub fn print_stats(console: &mut (impl Console + ?Sized), bytes: u32, millis: u32, action: &str) {
    let rate = bytes_per_sec(bytes, millis);
    let _ = write!(console, "\n{bytes} bytes {action} at {rate} bytes/sec.\n");
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::VecDeque, fmt};

    use slib::{Console, ESC};

    use super::*;

    /// Console fed from a script, capturing everything written.
    #[derive(Default)]
    pub struct Tty {
        pub input: VecDeque<u8>,
        /// Bytes handed out by `poll_byte`; `read_byte` ignores this.
        pub keys: VecDeque<u8>,
        pub output: Vec<u8>,
    }

    impl Tty {
        pub fn typed(input: &str) -> Self {
            Self {
                input: input.bytes().collect(),
                ..Self::default()
            }
        }

        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }
    }

    impl fmt::Write for Tty {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.output.extend_from_slice(s.as_bytes());
            Ok(())
        }
    }

    impl Console for Tty {
        fn read_byte(&mut self) -> Option<u8> {
            self.input.pop_front()
        }

        fn poll_byte(&mut self) -> Option<u8> {
            self.keys.pop_front()
        }

        fn write_byte(&mut self, byte: u8) {
            self.output.push(byte);
        }
    }

    #[test]
    fn byte_rows() {
        let mut tty = Tty::default();
        let mut data = *b"Hello, world!\x01\x02\x03";

        assert!(memory_dump(&mut tty, &mut data[..], 0, 16, Width::Byte, 0x100, 16));
        assert_eq!(
            tty.text(),
            "00000100:  48 65 6C 6C 6F 2C 20 77 6F 72 6C 64 21 01 02 03  |Hello, world!   |\r\n"
        );
    }

    #[test]
    fn partial_row_is_padded() {
        let mut tty = Tty::default();
        let mut data = [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0];

        assert!(memory_dump(&mut tty, &mut data[..], 0, 6, Width::Half, 0, 8));
        let expected = format!("00000000:  1234 5678 9ABC {:5} | 4Vx    |\r\n", "");
        assert_eq!(tty.text(), expected);
    }

    #[test]
    fn word_rows_advance_label() {
        let mut tty = Tty::default();
        let mut data = [0u8; 64];
        data[32..36].copy_from_slice(&0xdead_beefu32.to_be_bytes());

        assert!(memory_dump(&mut tty, &mut data[..], 0, 64, Width::Word, 0x1000, 32));
        let text = tty.text();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("00001020:  DEADBEEF 00000000"));
    }

    #[test]
    fn escape_aborts_and_space_pauses() {
        let mut tty = Tty::default();
        tty.keys.push_back(ESC);
        let mut data = [0u8; 64];
        assert!(!memory_dump(&mut tty, &mut data[..], 0, 64, Width::Byte, 0, 16));
        assert_eq!(tty.text().lines().count(), 1);

        let mut tty = Tty::default();
        tty.keys.push_back(b' ');
        tty.input.extend([b'x', b' ']);
        assert!(memory_dump(&mut tty, &mut data[..], 0, 32, Width::Byte, 0, 16));
        assert_eq!(tty.text().lines().count(), 2);
        assert!(tty.input.is_empty());
    }

    #[test]
    fn rates() {
        assert_eq!(bytes_per_sec(512, 0), 512);
        assert_eq!(bytes_per_sec(512, 500), 1024);
        assert_eq!(bytes_per_sec(10_000, 2500), 5000);

        let mut tty = Tty::default();
        print_stats(&mut tty, 2048, 1000, "read");
        assert_eq!(tty.text(), "\n2048 bytes read at 2048 bytes/sec.\n");
    }
}
