use core::fmt::{self, Write};

use crate::{CommandTable, Group, HelpDescriptor};

const NO_HELP: &str = " No help available.";

/// Writes the help screen, two commands per line, grouped under `[GROUP NAME]` headers.
///
/// A non-empty `filter` keeps the groups whose name contains it (with all their commands) and
/// the commands whose name contains it. `-` marks commands that are built in, `*` those that
/// are only listed.
pub fn render(
    table: &CommandTable,
    help: &[HelpDescriptor],
    filter: &str,
    out: &mut impl Write,
) -> fmt::Result {
    for group in Group::ALL {
        let group_match = group.name().contains(filter);
        if group_match {
            writeln!(out, "[{}]", group.name())?;
        }

        let mut column = 0;
        for entry in table.entries() {
            if entry.group != group || !(group_match || entry.name.contains(filter)) {
                continue;
            }

            let marker = if entry.builtin { '-' } else { '*' };
            let mut synopsis = Synopsis::default();
            let description = match help.iter().find(|h| h.key == entry.key) {
                Some(h) => {
                    write!(synopsis, "{} {}", entry.name, h.params)?;
                    h.description
                }
                None => {
                    write!(synopsis, "{}{NO_HELP}", entry.name)?;
                    NO_HELP
                }
            };
            write!(out, "{:<40} {marker} {description:<40}", synopsis.as_str())?;

            column += 1;
            if column == 2 {
                column = 0;
                out.write_char('\n')?;
            }
        }
        if column == 1 {
            out.write_char('\n')?;
        }
        if group_match {
            out.write_char('\n')?;
        }
    }
    Ok(())
}

/// Formatting scratch for one synopsis column.
#[derive(Default)]
struct Synopsis(heapless::String<64>);

impl Synopsis {
    fn as_str(&self) -> &str {
        &self.0
    }
}

impl Write for Synopsis {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // Truncate rather than fail: the column is only 40 wide anyway.
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}
