use std::fmt;

use super::{FResult, FsError};

/// Logical drives `0:` through `9:`.
pub const VOLUMES: usize = 10;

/// A resolved `N:dir/name` path. Never holds `.` or `..`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(super) struct Location {
    pub drive: u8,
    pub components: Vec<String>,
}

impl Location {
    /// Resolves `path` with `self` as the current directory. A path naming another drive
    /// starts at that drive's root.
    pub fn join(&self, path: &str) -> FResult<Self> {
        let (drive, rest) = match path.split_once(':') {
            Some((drive, rest)) => (drive.parse().map_err(|_| FsError::InvalidDrive)?, rest),
            None => (self.drive, path),
        };
        if usize::from(drive) >= VOLUMES {
            return Err(FsError::InvalidDrive);
        }

        let mut components = if rest.starts_with(['/', '\\']) || drive != self.drive {
            Vec::new()
        } else {
            self.components.clone()
        };
        for part in rest.split(['/', '\\']) {
            match part {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                name if name.contains(|c: char| c.is_control() || "\"*:<>?|".contains(c)) => {
                    return Err(FsError::InvalidName);
                }
                name => components.push(name.to_owned()),
            }
        }
        Ok(Self { drive, components })
    }

    /// The last component and the directories leading to it. `None` for a drive root.
    pub fn split_last(&self) -> Option<(&str, &[String])> {
        self.components
            .split_last()
            .map(|(name, parents)| (name.as_str(), parents))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}", self.drive, self.components.join("/"))
    }
}
