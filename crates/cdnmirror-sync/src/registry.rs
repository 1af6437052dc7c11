//! Watch registry
//!
//! Bidirectional bookkeeping between watched directory paths and the
//! handles the kernel assigned to them. The OS side is behind
//! [`WatchBackend`] so the registry and everything above it can be driven
//! by a fake in tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::events::{EventMask, WatchHandle};
use crate::WatchError;

/// The OS operations the registry needs
pub trait WatchBackend: Send {
    /// Starts watching directory `path` for `mask`
    fn add(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchHandle>;

    /// Stops watching `handle`
    fn remove(&mut self, handle: WatchHandle) -> io::Result<()>;
}

/// One registered watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    pub handle: WatchHandle,
    pub path: PathBuf,
}

/// Result of [`WatchRegistry::add_tree`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TreeScan {
    /// Handles installed by this scan
    pub handles: Vec<WatchHandle>,
    /// Regular files found below the root, sorted
    pub files: Vec<PathBuf>,
}

/// Path <-> handle mapping over a [`WatchBackend`]
///
/// Invariant: every registered path maps to exactly one handle and back.
pub struct WatchRegistry {
    backend: Box<dyn WatchBackend>,
    by_handle: HashMap<WatchHandle, Watch>,
    by_path: HashMap<PathBuf, WatchHandle>,
}

impl WatchRegistry {
    pub fn new(backend: Box<dyn WatchBackend>) -> Self {
        Self {
            backend,
            by_handle: HashMap::new(),
            by_path: HashMap::new(),
        }
    }

    /// Installs a watch on directory `path`
    pub fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<Watch, WatchError> {
        if self.by_path.contains_key(path) {
            return Err(WatchError::DuplicateWatch(path.to_path_buf()));
        }

        let handle = self.backend.add(path, mask).map_err(|source| WatchError::Os {
            path: path.to_path_buf(),
            source,
        })?;

        // The kernel hands back the existing handle when the inode is
        // already watched under another path
        if let Some(existing) = self.by_handle.get(&handle) {
            return Err(WatchError::HandleInUse {
                handle,
                path: path.to_path_buf(),
                existing: existing.path.clone(),
            });
        }

        let watch = Watch {
            handle,
            path: path.to_path_buf(),
        };
        self.by_handle.insert(handle, watch.clone());
        self.by_path.insert(watch.path.clone(), handle);
        trace!(handle = %handle, path = %path.display(), "Watch added");
        Ok(watch)
    }

    /// Removes the watch on `path`, releasing the OS resource
    pub fn remove_watch(&mut self, path: &Path) -> Option<Watch> {
        let handle = *self.by_path.get(path)?;
        self.remove_handle(handle)
    }

    /// Removes the watch `handle`, releasing the OS resource
    pub fn remove_handle(&mut self, handle: WatchHandle) -> Option<Watch> {
        let watch = self.forget(handle)?;
        if let Err(e) = self.backend.remove(handle) {
            // Already gone on the kernel side (directory deleted)
            debug!(handle = %handle, path = %watch.path.display(), error = %e, "Watch removal failed");
        }
        Some(watch)
    }

    /// Drops the bookkeeping for a handle the kernel already released
    pub fn forget(&mut self, handle: WatchHandle) -> Option<Watch> {
        let watch = self.by_handle.remove(&handle)?;
        self.by_path.remove(&watch.path);
        trace!(handle = %handle, path = %watch.path.display(), "Watch forgotten");
        Some(watch)
    }

    /// Removes the watch on `root` and every watch below it
    pub fn remove_tree(&mut self, root: &Path) -> Vec<Watch> {
        let mut doomed: Vec<WatchHandle> = self
            .by_path
            .iter()
            .filter(|(path, _)| path.starts_with(root))
            .map(|(_, handle)| *handle)
            .collect();
        doomed.sort();
        doomed
            .into_iter()
            .filter_map(|handle| self.remove_handle(handle))
            .collect()
    }

    pub fn watch_from_handle(&self, handle: WatchHandle) -> Result<&Watch, WatchError> {
        self.by_handle
            .get(&handle)
            .ok_or(WatchError::UnknownHandle(handle))
    }

    pub fn handle_for(&self, path: &Path) -> Option<WatchHandle> {
        self.by_path.get(path).copied()
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// Watches `root` and every directory below it, collecting regular files
    ///
    /// A root that is already watched is kept. Subdirectories that vanish or
    /// cannot be read during the walk are skipped; the root failing is an
    /// error. Symlinks are not followed.
    pub fn add_tree(&mut self, root: &Path, mask: EventMask) -> Result<TreeScan, WatchError> {
        let mut scan = TreeScan::default();

        let added_root = match self.add_watch(root, mask) {
            Ok(watch) => {
                scan.handles.push(watch.handle);
                true
            }
            Err(WatchError::DuplicateWatch(_)) => false,
            Err(e) => return Err(e),
        };

        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(source) if dir == root => {
                    if added_root {
                        self.remove_watch(root);
                    }
                    return Err(WatchError::Os { path: dir, source });
                }
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };

            for entry in entries.flatten() {
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                let path = entry.path();

                if file_type.is_dir() {
                    if !self.is_watching(&path) {
                        match self.add_watch(&path, mask) {
                            Ok(watch) => scan.handles.push(watch.handle),
                            Err(e) => {
                                warn!(path = %path.display(), error = %e, "Skipping directory");
                                continue;
                            }
                        }
                    }
                    stack.push(path);
                } else if file_type.is_file() {
                    scan.files.push(path);
                }
            }
        }

        scan.files.sort();
        debug!(
            root = %root.display(),
            watches = scan.handles.len(),
            files = scan.files.len(),
            "Tree watched"
        );
        Ok(scan)
    }
}
