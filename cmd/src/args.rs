//! Whitespace separated command arguments.

/// Cursor over the text following a command word.
#[derive(Copy, Clone, Debug)]
pub struct Args<'a> {
    rest: &'a str,
}

impl<'a> Args<'a> {
    pub fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    pub fn is_empty(&self) -> bool {
        self.rest.trim_start().is_empty()
    }

    /// Whatever has not been consumed yet, leading blanks removed.
    pub fn rest(&self) -> &'a str {
        self.rest.trim_start()
    }

    pub fn next_str(&mut self) -> Option<&'a str> {
        let s = self.rest.trim_start();
        if s.is_empty() {
            self.rest = s;
            return None;
        }
        let end = s.find(|c: char| c.is_ascii_whitespace()).unwrap_or(s.len());
        let (token, rest) = s.split_at(end);
        self.rest = rest;
        Some(token)
    }

    /// Signed integer: decimal unless prefixed with `0x`, `0b` or a bare `0` (octal).
    ///
    /// A malformed token is consumed all the same.
    pub fn next_int(&mut self) -> Option<i32> {
        self.next_str().and_then(parse_int)
    }

    pub fn next_uint(&mut self) -> Option<u32> {
        self.next_int().map(|n| n as u32)
    }

    /// Hexadecimal with an optional `0x` prefix.
    pub fn next_addr(&mut self) -> Option<u32> {
        self.next_str().and_then(parse_addr)
    }
}

fn parse_int(token: &str) -> Option<i32> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, token),
    };

    let (radix, digits) = if let Some(hex) = digits.strip_prefix("0x") {
        (16, hex)
    } else if let Some(bin) = digits.strip_prefix("0b") {
        (2, bin)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    if digits.is_empty() {
        return None;
    }

    // Wraps so 0xFFFFFFFF round-trips through `next_uint`.
    let mut value = 0u32;
    for c in digits.chars() {
        let digit = c.to_digit(radix)?;
        value = value.wrapping_mul(radix).wrapping_add(digit);
    }
    let value = value as i32;
    Some(if negative { value.wrapping_neg() } else { value })
}

fn parse_addr(token: &str) -> Option<u32> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use crate::Args;

    #[test]
    fn mdump_style_arguments() {
        let mut args = Args::new("1000 2000 16");

        assert_eq!(args.next_addr(), Some(0x1000));
        assert_eq!(args.next_addr(), Some(0x2000));
        assert_eq!(args.next_uint(), Some(16));
        assert!(args.is_empty());
        assert_eq!(args.next_uint(), None);
    }

    #[test]
    fn integer_prefixes() {
        let mut args = Args::new("10 0x1F 0b101 017 -5 0 -0x10 0xFFFFFFFF");

        assert_eq!(args.next_int(), Some(10));
        assert_eq!(args.next_int(), Some(0x1f));
        assert_eq!(args.next_int(), Some(5));
        assert_eq!(args.next_int(), Some(0o17));
        assert_eq!(args.next_int(), Some(-5));
        assert_eq!(args.next_int(), Some(0));
        assert_eq!(args.next_int(), Some(-16));
        assert_eq!(args.next_uint(), Some(0xffff_ffff));
    }

    #[test]
    fn malformed_tokens_are_consumed() {
        let mut args = Args::new("12a 0x 08 7");

        assert_eq!(args.next_int(), None);
        assert_eq!(args.next_int(), None);
        assert_eq!(args.next_int(), None);
        assert_eq!(args.next_int(), Some(7));
    }

    #[test]
    fn addresses_are_hex() {
        let mut args = Args::new("0x300 ff 0XAbC zz");

        assert_eq!(args.next_addr(), Some(0x300));
        assert_eq!(args.next_addr(), Some(0xff));
        assert_eq!(args.next_addr(), Some(0xabc));
        assert_eq!(args.next_addr(), None);
    }

    #[test]
    fn rest_keeps_unparsed_text() {
        let mut args = Args::new("  w   some file.txt ");

        assert_eq!(args.next_str(), Some("w"));
        assert_eq!(args.rest(), "some file.txt ");
        assert_eq!(args.next_str(), Some("some"));
        assert_eq!(args.next_str(), Some("file.txt"));
        assert_eq!(args.next_str(), None);
    }
}
