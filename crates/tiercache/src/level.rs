//! Cache level bitmask.

use std::fmt;
use std::ops::BitOr;

/// Selects which tiers a write touches.
///
/// `BOTH` additionally keeps the local copy in sync with remote changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Level(u8);

impl Level {
    pub const LOCAL: Level = Level(0b01);
    pub const REMOTE: Level = Level(0b10);
    pub const BOTH: Level = Level(0b11);

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build a level from raw bits, ignoring unknown bits.
    ///
    /// Returns `None` when no tier is selected.
    pub const fn from_bits(bits: u8) -> Option<Level> {
        let bits = bits & Self::BOTH.0;
        if bits == 0 {
            None
        } else {
            Some(Level(bits))
        }
    }

    pub const fn is_local(self) -> bool {
        self.0 & Self::LOCAL.0 != 0
    }

    pub const fn is_remote(self) -> bool {
        self.0 & Self::REMOTE.0 != 0
    }

    pub const fn is_synced(self) -> bool {
        self.0 == Self::BOTH.0
    }

    /// Default-level policy: an explicit level wins, otherwise remote when a
    /// remote store is configured and local when it is not.
    pub fn resolve(explicit: Option<Level>, has_remote: bool) -> Level {
        match explicit {
            Some(level) => level,
            None if has_remote => Level::REMOTE,
            None => Level::LOCAL,
        }
    }
}

impl BitOr for Level {
    type Output = Level;

    fn bitor(self, rhs: Level) -> Level {
        Level(self.0 | rhs.0)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0b01 => "local",
            0b10 => "remote",
            _ => "both",
        };
        f.write_str(name)
    }
}
