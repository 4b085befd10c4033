use heapless::Vec;

use crate::{Group, Key};

/// Whether a command can be built into the monitor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Availability {
    /// Always present.
    Default,
    /// Present when selected in [`Builtins`].
    Optional,
    /// Never built in; only shows up on the help screen.
    Listed,
}

/// A static command table entry.
#[derive(Copy, Clone, Debug)]
pub struct Command {
    pub name: &'static str,
    pub key: Key,
    pub availability: Availability,
}

/// Parameters and description shown by `help`.
#[derive(Copy, Clone, Debug)]
pub struct HelpDescriptor {
    pub key: Key,
    pub params: &'static str,
    pub description: &'static str,
}

const fn cmd(name: &'static str, key: Key, availability: Availability) -> Command {
    Command {
        name,
        key,
        availability,
    }
}

const fn help(key: Key, params: &'static str, description: &'static str) -> HelpDescriptor {
    HelpDescriptor {
        key,
        params,
        description,
    }
}

use Availability::{Default as D, Listed as L, Optional as O};

/// Every command known to the monitor, in help screen order.
pub static COMMANDS: &[Command] = &[
    cmd("ddump", Key::DISK_DUMP, O),
    cmd("dinit", Key::DISK_INIT, D),
    cmd("dstat", Key::DISK_STATUS, O),
    cmd("dioctl", Key::DISK_IOCTL_SYNC, D),
    cmd("bdump", Key::BUFFER_DUMP, O),
    cmd("bedit", Key::BUFFER_EDIT, O),
    cmd("bread", Key::BUFFER_READ, O),
    cmd("bwrite", Key::BUFFER_WRITE, O),
    cmd("bfill", Key::BUFFER_FILL, O),
    cmd("blen", Key::BUFFER_LEN, O),
    cmd("finit", Key::FS_INIT, D),
    cmd("fopen", Key::FS_OPEN, O),
    cmd("fclose", Key::FS_CLOSE, O),
    cmd("fseek", Key::FS_SEEK, O),
    cmd("fread", Key::FS_READ, O),
    cmd("finspect", Key::FS_INSPECT, O),
    cmd("fwrite", Key::FS_WRITE, O),
    cmd("ftrunc", Key::FS_TRUNC, O),
    cmd("falloc", Key::FS_ALLOCBLOCK, L),
    cmd("fattr", Key::FS_CHANGEATTRIB, L),
    cmd("ftime", Key::FS_CHANGETIME, L),
    cmd("frename", Key::FS_RENAME, O),
    cmd("fdel", Key::FS_DELETE, O),
    cmd("fmkdir", Key::FS_CREATEDIR, O),
    cmd("fstat", Key::FS_STATUS, L),
    cmd("fdir", Key::FS_DIRLIST, O),
    cmd("fcat", Key::FS_CAT, O),
    cmd("fcp", Key::FS_COPY, O),
    cmd("fconcat", Key::FS_CONCAT, O),
    cmd("fxtract", Key::FS_XTRACT, O),
    cmd("fload", Key::FS_LOAD, O),
    cmd("fexec", Key::FS_EXEC, O),
    cmd("fsave", Key::FS_SAVE, O),
    cmd("fdump", Key::FS_DUMP, O),
    cmd("fcd", Key::FS_CHANGEDIR, O),
    cmd("fdrive", Key::FS_CHANGEDRIVE, L),
    cmd("fshowdir", Key::FS_SHOWDIR, O),
    cmd("flabel", Key::FS_SETLABEL, L),
    cmd("fmkfs", Key::FS_CREATEFS, L),
    cmd("mclear", Key::MEM_CLEAR, O),
    cmd("mcopy", Key::MEM_COPY, O),
    cmd("mdiff", Key::MEM_DIFF, O),
    cmd("mdump", Key::MEM_DUMP, O),
    cmd("mtest", Key::MEM_TEST, L),
    cmd("meb", Key::MEM_EDIT_BYTES, O),
    cmd("meh", Key::MEM_EDIT_HWORD, O),
    cmd("mew", Key::MEM_EDIT_WORD, O),
    cmd("hid", Key::HW_INTR_DISABLE, D),
    cmd("hie", Key::HW_INTR_ENABLE, D),
    cmd("hr", Key::HW_SHOW_REGISTER, L),
    cmd("ht", Key::HW_TEST_TIMERS, L),
    cmd("hfd", Key::HW_FIFO_DISABLE, D),
    cmd("hfe", Key::HW_FIFO_ENABLE, D),
    cmd("dhry", Key::TEST_DHRYSTONE, L),
    cmd("coremark", Key::TEST_COREMARK, L),
    cmd("call", Key::CALL, D),
    cmd("jmp", Key::EXECUTE, D),
    cmd("restart", Key::MISC_RESTART_APP, D),
    cmd("reset", Key::MISC_REBOOT, D),
    cmd("help", Key::MISC_HELP, O),
    cmd("info", Key::MISC_INFO, D),
    cmd("time", Key::MISC_SETTIME, L),
    cmd("test", Key::MISC_TEST, D),
];

pub static HELP: &[HelpDescriptor] = &[
    help(Key::DISK_DUMP, "[<pd#> <sect>]", "Dump a sector"),
    help(Key::DISK_INIT, "<pd#> [<card type>]", "Initialize disk"),
    help(Key::DISK_STATUS, "<pd#>", "Show disk status"),
    help(Key::DISK_IOCTL_SYNC, "<pd#>", "ioctl(CTRL_SYNC)"),
    help(Key::BUFFER_DUMP, "<ofs>", "Dump buffer"),
    help(Key::BUFFER_EDIT, "<ofs> [<data>] ...", "Edit buffer"),
    help(Key::BUFFER_READ, "<pd#> <sect> [<num>]", "Read into buffer"),
    help(Key::BUFFER_WRITE, "<pd#> <sect> [<num>]", "Write buffer to disk"),
    help(Key::BUFFER_FILL, "<val>", "Fill buffer"),
    help(Key::BUFFER_LEN, "<len>", "Set read/write length for fr/fw command"),
    help(Key::FS_INIT, "<ld#> [<mount>]", "Force init the volume"),
    help(Key::FS_OPEN, "<mode> <file>", "Open a file"),
    help(Key::FS_CLOSE, "", "Close the file"),
    help(Key::FS_SEEK, "<ofs>", "Move fp in normal seek"),
    help(Key::FS_READ, "<len>", "Read part of file into buffer"),
    help(Key::FS_INSPECT, "<ofs> [<len>]", "Read part of file and examine"),
    help(Key::FS_WRITE, "<len>", "Write part of buffer into file"),
    help(Key::FS_TRUNC, "", "Truncate the file at current fp"),
    help(Key::FS_ALLOCBLOCK, "<fsz> <opt>", "Allocate ctg blks to file"),
    help(Key::FS_CHANGEATTRIB, "<atrr> <mask> <name>", "Change object attribute"),
    help(Key::FS_CHANGETIME, "<y> <m> <d> <h> <M> <s> <fn>", "Change object timestamp"),
    help(Key::FS_RENAME, "<org name> <new name>", "Rename an object"),
    help(Key::FS_DELETE, "<obj name>", "Delete an object"),
    help(Key::FS_CREATEDIR, "<dir name>", "Create a directory"),
    help(Key::FS_STATUS, "[<path>]", "Show volume status"),
    help(Key::FS_DIRLIST, "[<path>]", "Show a directory"),
    help(Key::FS_CAT, "<name>", "Output file contents"),
    help(Key::FS_COPY, "<src file> <dst file>", "Copy a file"),
    help(Key::FS_CONCAT, "<src fn1> < src fn2> <dst fn>", "Concatenate 2 files"),
    help(Key::FS_XTRACT, "<src> <dst> <start pos> <len>", "Extract a portion of file"),
    help(Key::FS_LOAD, "<name> [<addr>]", "Load a file into memory"),
    help(Key::FS_EXEC, "<name> <ldAddr> <xAddr> <mode>", "Load and execute file"),
    help(Key::FS_SAVE, "<name> <addr> <len>", "Save memory range to a file"),
    help(Key::FS_DUMP, "<name> [<width>]", "Dump a file contents as hex"),
    help(Key::FS_CHANGEDIR, "<path>", "Change current directory"),
    help(Key::FS_CHANGEDRIVE, "<path>", "Change current drive"),
    help(Key::FS_SHOWDIR, "", "Show current directory"),
    help(Key::FS_SETLABEL, "<label>", "Set volume label"),
    help(Key::FS_CREATEFS, "<ld#> <type> <au>", "Create FAT volume"),
    help(Key::MEM_CLEAR, "<start> <end> [<word>]", "Clear memory"),
    help(Key::MEM_COPY, "<start> <end> <dst addr>", "Copy memory"),
    help(Key::MEM_DIFF, "<start> <end> <cmp addr>", "Compare memory"),
    help(Key::MEM_DUMP, "[<start> [<end>] [<size>]]", "Dump memory"),
    help(Key::MEM_EDIT_BYTES, "<addr> <byte> [...]", "Edit memory (Bytes)"),
    help(Key::MEM_EDIT_HWORD, "<addr> <h-word> [...]", "Edit memory (H-Word)"),
    help(Key::MEM_EDIT_WORD, "<addr> <word> [...]", "Edit memory (Word)"),
    help(Key::MEM_TEST, "[<start> [<end>] [iter]", "Test memory"),
    help(Key::HW_INTR_DISABLE, "", "Disable Interrupts"),
    help(Key::HW_INTR_ENABLE, "", "Enable Interrupts"),
    help(Key::HW_SHOW_REGISTER, "", "Display Register Information"),
    help(Key::HW_TEST_TIMERS, "", "Test uS Timer"),
    help(Key::HW_FIFO_DISABLE, "", "Disable UART FIFO"),
    help(Key::HW_FIFO_ENABLE, "", "Enable UART FIFO"),
    help(Key::TEST_DHRYSTONE, "", "Dhrystone Test v2.1"),
    help(Key::TEST_COREMARK, "", "CoreMark Test v1.0"),
    help(Key::CALL, "<addr>", "Call function @ <addr>"),
    help(Key::EXECUTE, "<addr>", "Execute code @ <addr>"),
    help(Key::MISC_RESTART_APP, "", "Restart application"),
    help(Key::MISC_REBOOT, "", "Reset system"),
    help(Key::MISC_HELP, "[<cmd %>|<group %>]", "Show this screen"),
    help(Key::MISC_INFO, "", "Config info"),
    help(Key::MISC_SETTIME, "[<y> <m> <d> <h> <M> <s>]", "Set/Show current time"),
    help(Key::MISC_TEST, "", "Test Screen"),
];

/// The set of optional commands compiled into a monitor build.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Builtins([u64; 3]);

impl Builtins {
    pub const fn empty() -> Self {
        Self([0; 3])
    }

    /// Every command that can be built in.
    pub fn all() -> Self {
        COMMANDS
            .iter()
            .filter(|c| c.availability != Availability::Listed)
            .map(|c| c.key)
            .collect()
    }

    /// The lean build: memory editing plus loading and running apps.
    pub fn minimal() -> Self {
        [
            Key::MEM_CLEAR,
            Key::MEM_DUMP,
            Key::MEM_EDIT_BYTES,
            Key::MEM_EDIT_HWORD,
            Key::MEM_EDIT_WORD,
            Key::FS_LOAD,
            Key::FS_EXEC,
        ]
        .into_iter()
        .collect()
    }

    pub fn insert(&mut self, key: Key) {
        self.0[usize::from(key.0 / 64)] |= 1 << (key.0 % 64);
    }

    pub fn remove(&mut self, key: Key) {
        self.0[usize::from(key.0 / 64)] &= !(1 << (key.0 % 64));
    }

    pub fn contains(&self, key: Key) -> bool {
        self.0[usize::from(key.0 / 64)] & (1 << (key.0 % 64)) != 0
    }
}

impl FromIterator<Key> for Builtins {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        let mut builtins = Self::empty();
        for key in iter {
            builtins.insert(key);
        }
        builtins
    }
}

/// A row of the active command table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub builtin: bool,
    pub key: Key,
    pub group: Group,
}

/// Result of decoding an input line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decoded {
    NoKey,
    BadKey,
    Key(Key),
}

pub const MAX_COMMANDS: usize = 96;

/// The commands of one monitor build: what can be run, plus whatever the help screen lists.
pub struct CommandTable {
    entries: Vec<CommandDescriptor, MAX_COMMANDS>,
}

impl CommandTable {
    pub fn new(builtins: &Builtins) -> Self {
        let with_help = builtins.contains(Key::MISC_HELP);
        let mut entries = Vec::new();
        for command in COMMANDS {
            let builtin = command.availability == Availability::Default
                || command.availability == Availability::Optional && builtins.contains(command.key);
            let Some(group) = command.key.group() else {
                continue;
            };
            if !builtin && !with_help {
                continue;
            }

            let entry = CommandDescriptor {
                name: command.name,
                builtin,
                key: command.key,
                group,
            };
            if entries.push(entry).is_err() {
                warn!("command table full, dropping {}", command.name);
            }
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[CommandDescriptor] {
        &self.entries
    }

    pub fn builtins(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.entries.iter().filter(|entry| entry.builtin)
    }

    /// Splits the command word off `line` and looks it up among the builtins. On a match the
    /// second half is the text after the command word; otherwise it is the whole line.
    pub fn decode<'a>(&self, line: &'a str) -> (Decoded, &'a str) {
        if line.is_empty() {
            return (Decoded::NoKey, line);
        }

        let (token, rest) = line.split_once(' ').unwrap_or((line, ""));
        match self.builtins().find(|entry| entry.name == token) {
            Some(entry) => {
                debug!("decoded {token:?} as key {}", entry.key);
                (Decoded::Key(entry.key), rest)
            }
            None => (Decoded::BadKey, line),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use crate::{
        table::{Availability, COMMANDS, HELP},
        Builtins, CommandTable, Decoded, Key,
    };

    #[test]
    fn names_and_keys_are_unique() {
        for (i, a) in COMMANDS.iter().enumerate() {
            for b in &COMMANDS[i + 1..] {
                assert_ne!(a.name, b.name);
                assert_ne!(a.key, b.key);
            }
            assert!(a.key.group().is_some(), "{} has no group", a.name);
        }
        assert!(COMMANDS.len() <= super::MAX_COMMANDS);
    }

    #[test]
    fn every_builtin_decodes_with_trailing_text() {
        let table = CommandTable::new(&Builtins::all());

        for entry in table.builtins() {
            let line = [entry.name, " 1 2 three"].concat();
            assert_eq!(
                table.decode(&line),
                (Decoded::Key(entry.key), "1 2 three"),
                "{}",
                entry.name
            );
            assert_eq!(table.decode(entry.name), (Decoded::Key(entry.key), ""));
        }
    }

    #[test]
    fn empty_and_unknown_lines() {
        let table = CommandTable::new(&Builtins::all());

        assert_eq!(table.decode(""), (Decoded::NoKey, ""));
        assert_eq!(
            table.decode("nosuchcommand"),
            (Decoded::BadKey, "nosuchcommand")
        );
        assert_eq!(table.decode("hello world"), (Decoded::BadKey, "hello world"));
        assert_eq!(table.decode("MDUMP"), (Decoded::BadKey, "MDUMP"));
        assert_eq!(table.decode("mdum"), (Decoded::BadKey, "mdum"));
        assert_eq!(table.decode("mdumpx 1000"), (Decoded::BadKey, "mdumpx 1000"));
    }

    #[test]
    fn help_only_entries_never_decode() {
        let table = CommandTable::new(&Builtins::all());

        let dhry = table
            .entries()
            .iter()
            .find(|entry| entry.name == "dhry")
            .unwrap();
        assert!(!dhry.builtin);
        assert_eq!(table.decode("dhry"), (Decoded::BadKey, "dhry"));
    }

    #[test]
    fn minimal_build_without_help_lists_only_builtins() {
        let table = CommandTable::new(&Builtins::minimal());

        assert!(table.entries().iter().all(|entry| entry.builtin));
        assert_eq!(
            table.decode("mdump 1000 2000 16"),
            (Decoded::Key(Key::MEM_DUMP), "1000 2000 16")
        );
        assert_eq!(table.decode("fcat x"), (Decoded::BadKey, "fcat x"));
        assert_eq!(table.decode("dinit 0"), (Decoded::Key(Key::DISK_INIT), "0"));
    }

    #[test]
    fn all_excludes_listed_commands() {
        let all = Builtins::all();

        for command in COMMANDS {
            assert_eq!(
                all.contains(command.key),
                command.availability != Availability::Listed,
                "{}",
                command.name
            );
        }
    }

    #[test]
    fn builtins_set_ops() {
        let mut set = Builtins::empty();
        set.insert(Key(130));
        set.insert(Key(3));

        assert!(set.contains(Key(130)));
        assert!(set.contains(Key(3)));
        assert!(!set.contains(Key(131)));
        set.remove(Key(130));
        assert!(!set.contains(Key(130)));
    }

    #[test]
    fn help_keys_exist() {
        for help in HELP {
            assert!(COMMANDS.iter().any(|c| c.key == help.key), "{}", help.key);
        }
    }
}
