//! Change events
//!
//! An [`Event`] is one decoded inotify record. It refers to its watch only by
//! [`WatchHandle`]; the path is looked up in the registry when needed, and a
//! handle that no longer resolves is a normal outcome (the directory may be
//! gone by the time the event is processed).

use std::ffi::OsString;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::BitOr;

use async_trait::async_trait;

use crate::WatchError;

/// Kernel-assigned identifier of a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(i32);

impl WatchHandle {
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl Display for WatchHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of change kinds, with inotify's bit values
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const CREATE: Self = Self(libc::IN_CREATE);
    pub const CLOSE_WRITE: Self = Self(libc::IN_CLOSE_WRITE);
    pub const DELETE: Self = Self(libc::IN_DELETE);
    pub const MOVED_FROM: Self = Self(libc::IN_MOVED_FROM);
    pub const MOVED_TO: Self = Self(libc::IN_MOVED_TO);
    pub const IS_DIR: Self = Self(libc::IN_ISDIR);
    /// The watch was removed (explicitly or because its directory went away)
    pub const IGNORED: Self = Self(libc::IN_IGNORED);
    /// The kernel queue overflowed and events were lost
    pub const OVERFLOW: Self = Self(libc::IN_Q_OVERFLOW);

    /// The changes the daemon subscribes to on every directory
    pub const FOLLOWED: Self = Self(
        libc::IN_CREATE | libc::IN_CLOSE_WRITE | libc::IN_DELETE | libc::IN_MOVED_FROM | libc::IN_MOVED_TO,
    );

    const NAMES: [(Self, &'static str); 8] = [
        (Self::CREATE, "CREATE"),
        (Self::CLOSE_WRITE, "CLOSE_WRITE"),
        (Self::DELETE, "DELETE"),
        (Self::MOVED_FROM, "MOVED_FROM"),
        (Self::MOVED_TO, "MOVED_TO"),
        (Self::IS_DIR, "ISDIR"),
        (Self::IGNORED, "IGNORED"),
        (Self::OVERFLOW, "Q_OVERFLOW"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_created(self) -> bool {
        self.contains(Self::CREATE)
    }

    pub fn is_close_write(self) -> bool {
        self.contains(Self::CLOSE_WRITE)
    }

    pub fn is_deleted(self) -> bool {
        self.contains(Self::DELETE)
    }

    pub fn is_moved_from(self) -> bool {
        self.contains(Self::MOVED_FROM)
    }

    pub fn is_moved_to(self) -> bool {
        self.contains(Self::MOVED_TO)
    }

    pub fn is_dir(self) -> bool {
        self.contains(Self::IS_DIR)
    }

    pub fn is_ignored(self) -> bool {
        self.contains(Self::IGNORED)
    }

    pub fn is_overflow(self) -> bool {
        self.contains(Self::OVERFLOW)
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Debug for EventMask {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "{:#x}", self.0)
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// One change reported by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub watch: WatchHandle,
    pub mask: EventMask,
    /// Links the two halves of a rename; 0 for everything else
    pub cookie: u32,
    /// Entry name relative to the watched directory; empty for events about
    /// the directory itself
    pub name: OsString,
}

impl Event {
    pub fn new(watch: WatchHandle, mask: EventMask, cookie: u32, name: impl Into<OsString>) -> Self {
        Self {
            watch,
            mask,
            cookie,
            name: name.into(),
        }
    }
}

/// Lazy, infinite sequence of events
///
/// `next_event` is the watch loop's suspension point: it waits without
/// blocking the runtime thread. An `Err` means the channel is broken.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Event, WatchError>;
}
