//! Linux inotify backend
//!
//! One inotify instance serves the whole daemon. [`Inotify::init`] splits it
//! into the [`InotifyWatches`] half used by the registry and the
//! [`InotifyEvents`] half the watch loop reads from. The events half is the
//! `inotify` crate's tokio stream, so reading suspends the loop instead of
//! blocking the runtime thread.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::StreamExt;
use inotify::{EventOwned, EventStream, WatchDescriptor, WatchMask, Watches};
use tracing::trace;

use crate::events::{Event, EventMask, EventSource, WatchHandle};
use crate::registry::WatchBackend;
use crate::WatchError;

/// Enough for a few hundred records with typical names
const READ_BUFFER_LEN: usize = 64 * 1024;

/// Factory for the two halves of an inotify instance
pub struct Inotify;

impl Inotify {
    /// Opens an inotify instance and registers it with the reactor
    ///
    /// Must be called from within a tokio runtime.
    pub fn init() -> Result<(InotifyWatches, InotifyEvents), WatchError> {
        let inotify = inotify::Inotify::init().map_err(WatchError::Fatal)?;
        let watches = inotify.watches();
        let stream = inotify
            .into_event_stream(vec![0u8; READ_BUFFER_LEN])
            .map_err(WatchError::Fatal)?;

        Ok((
            InotifyWatches {
                watches,
                descriptors: HashMap::new(),
            },
            InotifyEvents {
                stream: Box::pin(stream),
            },
        ))
    }
}

/// Adds and removes watches on the shared instance
pub struct InotifyWatches {
    watches: Watches,
    // Handles whose watch may still be live; the kernel reuses ids only
    // after IGNORED, so a stale entry is replaced on reuse
    descriptors: HashMap<WatchHandle, WatchDescriptor>,
}

impl WatchBackend for InotifyWatches {
    fn add(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchHandle> {
        let wd = self.watches.add(path, watch_mask(mask))?;
        let handle = WatchHandle::new(wd.get_watch_descriptor_id());
        self.descriptors.insert(handle, wd);
        Ok(handle)
    }

    fn remove(&mut self, handle: WatchHandle) -> io::Result<()> {
        let wd = self.descriptors.remove(&handle).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no watch with handle {handle}"))
        })?;
        self.watches.remove(wd)
    }
}

/// Mask handed to the kernel for a directory watch
///
/// Directories only, and a symlink is never followed.
fn watch_mask(mask: EventMask) -> WatchMask {
    let mut watch = WatchMask::ONLYDIR | WatchMask::DONT_FOLLOW;
    let bits = [
        (EventMask::CREATE, WatchMask::CREATE),
        (EventMask::CLOSE_WRITE, WatchMask::CLOSE_WRITE),
        (EventMask::DELETE, WatchMask::DELETE),
        (EventMask::MOVED_FROM, WatchMask::MOVED_FROM),
        (EventMask::MOVED_TO, WatchMask::MOVED_TO),
    ];
    for (ours, theirs) in bits {
        if mask.contains(ours) {
            watch |= theirs;
        }
    }
    watch
}

/// Reads events from the shared instance
pub struct InotifyEvents {
    stream: Pin<Box<EventStream<Vec<u8>>>>,
}

#[async_trait]
impl EventSource for InotifyEvents {
    async fn next_event(&mut self) -> Result<Event, WatchError> {
        loop {
            match self.stream.next().await {
                Some(Ok(event)) => {
                    let event = convert(event);
                    trace!(handle = %event.watch, mask = ?event.mask, "Read inotify event");
                    return Ok(event);
                }
                Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Some(Err(e)) => return Err(WatchError::Fatal(e)),
                None => {
                    return Err(WatchError::Fatal(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "inotify event stream ended",
                    )))
                }
            }
        }
    }
}

fn convert(event: EventOwned) -> Event {
    Event::new(
        WatchHandle::new(event.wd.get_watch_descriptor_id()),
        EventMask::from_bits(event.mask.bits()),
        event.cookie,
        event.name.unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::time::Duration;

    use super::*;

    async fn next(events: &mut InotifyEvents) -> Event {
        tokio::time::timeout(Duration::from_secs(5), events.next_event())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_watch_mask_is_directory_only() {
        let mask = watch_mask(EventMask::FOLLOWED);
        assert!(mask.contains(WatchMask::ONLYDIR | WatchMask::DONT_FOLLOW));
        assert!(mask.contains(WatchMask::CREATE | WatchMask::CLOSE_WRITE | WatchMask::DELETE));
        assert!(mask.contains(WatchMask::MOVED_FROM | WatchMask::MOVED_TO));
        assert!(!mask.contains(WatchMask::MODIFY));

        let mask = watch_mask(EventMask::CREATE);
        assert!(!mask.contains(WatchMask::DELETE));
    }

    #[tokio::test]
    async fn test_reads_real_events() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut watches, mut events) = Inotify::init().unwrap();
        let handle = watches.add(tmp.path(), EventMask::FOLLOWED).unwrap();

        std::fs::write(tmp.path().join("hello.txt"), b"hi").unwrap();

        let first = next(&mut events).await;
        assert_eq!(first.watch, handle);
        assert!(first.mask.is_created());
        assert_eq!(first.name, OsString::from("hello.txt"));

        let second = next(&mut events).await;
        assert!(second.mask.is_close_write());
    }

    #[tokio::test]
    async fn test_rename_halves_share_cookie() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"x").unwrap();
        let (mut watches, mut events) = Inotify::init().unwrap();
        watches.add(tmp.path(), EventMask::FOLLOWED).unwrap();

        std::fs::rename(tmp.path().join("a.txt"), tmp.path().join("b.txt")).unwrap();

        let from = next(&mut events).await;
        let to = next(&mut events).await;
        assert!(from.mask.contains(EventMask::MOVED_FROM));
        assert!(to.mask.contains(EventMask::MOVED_TO));
        assert_ne!(from.cookie, 0);
        assert_eq!(from.cookie, to.cookie);
        assert_eq!(to.name, OsString::from("b.txt"));
    }

    #[tokio::test]
    async fn test_watch_rejects_regular_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let (mut watches, _events) = Inotify::init().unwrap();
        assert!(watches.add(tmp.path(), EventMask::FOLLOWED).is_err());
    }

    #[tokio::test]
    async fn test_remove_emits_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut watches, mut events) = Inotify::init().unwrap();
        let handle = watches.add(tmp.path(), EventMask::FOLLOWED).unwrap();
        watches.remove(handle).unwrap();

        let event = next(&mut events).await;
        assert_eq!(event.watch, handle);
        assert!(event.mask.is_ignored());
    }

    #[tokio::test]
    async fn test_remove_unknown_handle_fails() {
        let (mut watches, _events) = Inotify::init().unwrap();
        let err = watches.remove(WatchHandle::new(4242)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
