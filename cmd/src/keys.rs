use core::fmt;

/// Numeric identity of a command. Keys are grouped in fixed ranges, see [`Group::of`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Key(pub u8);

impl Key {
    pub const DISK_DUMP: Self = Self(1);
    pub const DISK_INIT: Self = Self(2);
    pub const DISK_STATUS: Self = Self(3);
    pub const DISK_IOCTL_SYNC: Self = Self(4);

    pub const BUFFER_DUMP: Self = Self(10);
    pub const BUFFER_EDIT: Self = Self(11);
    pub const BUFFER_READ: Self = Self(12);
    pub const BUFFER_WRITE: Self = Self(13);
    pub const BUFFER_FILL: Self = Self(14);
    pub const BUFFER_LEN: Self = Self(15);

    pub const FS_INIT: Self = Self(20);
    pub const FS_STATUS: Self = Self(21);
    pub const FS_DIRLIST: Self = Self(22);
    pub const FS_OPEN: Self = Self(23);
    pub const FS_CLOSE: Self = Self(24);
    pub const FS_SEEK: Self = Self(25);
    pub const FS_READ: Self = Self(26);
    pub const FS_CAT: Self = Self(27);
    pub const FS_INSPECT: Self = Self(28);
    pub const FS_WRITE: Self = Self(29);
    pub const FS_TRUNC: Self = Self(30);
    pub const FS_RENAME: Self = Self(31);
    pub const FS_DELETE: Self = Self(32);
    pub const FS_CREATEDIR: Self = Self(33);
    pub const FS_ALLOCBLOCK: Self = Self(34);
    pub const FS_CHANGEATTRIB: Self = Self(35);
    pub const FS_CHANGETIME: Self = Self(36);
    pub const FS_COPY: Self = Self(37);
    pub const FS_CHANGEDIR: Self = Self(38);
    pub const FS_CHANGEDRIVE: Self = Self(39);
    pub const FS_SHOWDIR: Self = Self(40);
    pub const FS_SETLABEL: Self = Self(41);
    pub const FS_CREATEFS: Self = Self(42);
    pub const FS_LOAD: Self = Self(43);
    pub const FS_DUMP: Self = Self(44);
    pub const FS_CONCAT: Self = Self(45);
    pub const FS_XTRACT: Self = Self(46);
    pub const FS_SAVE: Self = Self(47);
    pub const FS_EXEC: Self = Self(48);

    pub const MEM_CLEAR: Self = Self(60);
    pub const MEM_COPY: Self = Self(61);
    pub const MEM_DIFF: Self = Self(63);
    pub const MEM_DUMP: Self = Self(64);
    pub const MEM_EDIT_BYTES: Self = Self(65);
    pub const MEM_EDIT_HWORD: Self = Self(66);
    pub const MEM_EDIT_WORD: Self = Self(67);
    pub const MEM_TEST: Self = Self(68);

    pub const HW_INTR_DISABLE: Self = Self(80);
    pub const HW_INTR_ENABLE: Self = Self(81);
    pub const HW_SHOW_REGISTER: Self = Self(82);
    pub const HW_TEST_TIMERS: Self = Self(83);
    pub const HW_FIFO_DISABLE: Self = Self(84);
    pub const HW_FIFO_ENABLE: Self = Self(85);

    pub const TEST_DHRYSTONE: Self = Self(100);
    pub const TEST_COREMARK: Self = Self(101);

    pub const EXECUTE: Self = Self(120);
    pub const CALL: Self = Self(121);

    pub const MISC_RESTART_APP: Self = Self(130);
    pub const MISC_REBOOT: Self = Self(131);
    pub const MISC_HELP: Self = Self(132);
    pub const MISC_INFO: Self = Self(133);
    pub const MISC_SETTIME: Self = Self(134);
    pub const MISC_TEST: Self = Self(135);

    pub const fn group(self) -> Option<Group> {
        Group::of(self)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Help screen sections.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Group {
    Disk = 1,
    Buffer,
    Fs,
    Mem,
    Hw,
    Test,
    Exec,
    Misc,
}

impl Group {
    pub const ALL: [Self; 8] = [
        Self::Disk,
        Self::Buffer,
        Self::Fs,
        Self::Mem,
        Self::Hw,
        Self::Test,
        Self::Exec,
        Self::Misc,
    ];

    /// The group owning `key`, decided purely by key range.
    pub const fn of(key: Key) -> Option<Self> {
        Some(match key.0 {
            1..=9 => Self::Disk,
            10..=19 => Self::Buffer,
            20..=59 => Self::Fs,
            60..=79 => Self::Mem,
            80..=99 => Self::Hw,
            100..=119 => Self::Test,
            120..=129 => Self::Exec,
            130..=149 => Self::Misc,
            _ => return None,
        })
    }

    pub const fn key(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Disk => "DISK IO CONTROLS",
            Self::Buffer => "DISK BUFFER CONTROLS",
            Self::Fs => "FILESYSTEM CONTROLS",
            Self::Mem => "MEMORY",
            Self::Hw => "HARDWARE",
            Self::Test => "TESTING",
            Self::Exec => "EXECUTION",
            Self::Misc => "MISC COMMANDS",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Group, Key};

    #[test]
    fn ranges_pick_groups() {
        assert_eq!(Key::DISK_IOCTL_SYNC.group(), Some(Group::Disk));
        assert_eq!(Key::BUFFER_LEN.group(), Some(Group::Buffer));
        assert_eq!(Key::FS_EXEC.group(), Some(Group::Fs));
        assert_eq!(Key::MEM_TEST.group(), Some(Group::Mem));
        assert_eq!(Key::HW_FIFO_ENABLE.group(), Some(Group::Hw));
        assert_eq!(Key::TEST_COREMARK.group(), Some(Group::Test));
        assert_eq!(Key::CALL.group(), Some(Group::Exec));
        assert_eq!(Key::MISC_TEST.group(), Some(Group::Misc));
        assert_eq!(Key(0).group(), None);
        assert_eq!(Key(150).group(), None);
    }

    #[test]
    fn group_keys_follow_declaration() {
        for (i, group) in Group::ALL.iter().enumerate() {
            assert_eq!(usize::from(group.key()), i + 1);
        }
        assert_eq!(Group::Misc.name(), "MISC COMMANDS");
    }
}
