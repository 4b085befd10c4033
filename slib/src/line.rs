use core::str;

use crate::{Console, BACKSPACE, DELETE};

/// Longest line the editor accepts, terminator included.
pub const LINE_LEN: usize = 120;

/// Reads one line with echo and backspace handling. Control characters and anything beyond
/// the buffer are dropped. Returns `None` once the console has no more input.
pub fn read_line<'a>(
    console: &mut (impl Console + ?Sized),
    buf: &'a mut [u8; LINE_LEN],
) -> Option<&'a str> {
    let mut len = 0;
    loop {
        match console.read_byte()? {
            b'\r' | b'\n' => break,
            BACKSPACE | DELETE => {
                if len > 0 {
                    len -= 1;
                    console.write_byte(BACKSPACE);
                    console.write_byte(b' ');
                    console.write_byte(BACKSPACE);
                }
            }
            c @ b' '..=b'~' if len < LINE_LEN - 1 => {
                buf[len] = c;
                len += 1;
                console.write_byte(c);
            }
            _ => {}
        }
    }
    console.write_byte(b'\n');

    // Only printable ASCII is ever stored.
    str::from_utf8(&buf[..len]).ok()
}

#[cfg(test)]
mod tests {
    extern crate std;

    use core::fmt;
    use std::{collections::VecDeque, vec::Vec};

    use crate::{read_line, Console, LINE_LEN};

    struct Script {
        input: VecDeque<u8>,
        output: Vec<u8>,
    }

    impl Script {
        fn new(input: &[u8]) -> Self {
            Self {
                input: input.iter().copied().collect(),
                output: Vec::new(),
            }
        }
    }

    impl fmt::Write for Script {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.output.extend_from_slice(s.as_bytes());
            Ok(())
        }
    }

    impl Console for Script {
        fn read_byte(&mut self) -> Option<u8> {
            self.input.pop_front()
        }

        fn poll_byte(&mut self) -> Option<u8> {
            self.input.pop_front()
        }

        fn write_byte(&mut self, byte: u8) {
            self.output.push(byte);
        }
    }

    #[test]
    fn echoes_and_edits() {
        let mut console = Script::new(b"mdx\x08ump 10\r");
        let mut buf = [0; LINE_LEN];

        assert_eq!(read_line(&mut console, &mut buf), Some("mdump 10"));
        assert_eq!(console.output, b"mdx\x08 \x08ump 10\n");
    }

    #[test]
    fn backspace_on_empty_line_is_ignored() {
        let mut console = Script::new(b"\x7f\x7fa\x1b\n");
        let mut buf = [0; LINE_LEN];

        assert_eq!(read_line(&mut console, &mut buf), Some("a"));
        assert_eq!(console.output, b"a\n");
    }

    #[test]
    fn overlong_input_is_clipped() {
        let mut input = std::vec![b'x'; 200];
        input.push(b'\r');
        let mut console = Script::new(&input);
        let mut buf = [0; LINE_LEN];

        assert_eq!(read_line(&mut console, &mut buf).map(str::len), Some(LINE_LEN - 1));
    }

    #[test]
    fn closed_input() {
        let mut console = Script::new(b"half");
        let mut buf = [0; LINE_LEN];

        assert_eq!(read_line(&mut console, &mut buf), None);
    }
}
