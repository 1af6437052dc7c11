//! The watch loop
//!
//! Single task owning the registry, the pairing buffer and the job sink.
//! Events are taken one at a time from the [`EventSource`]; every mutation
//! of the registry happens synchronously between two awaits, so the
//! handle/path mapping never changes under a half-processed event.
//!
//! ## Event rules
//!
//! | event | job |
//! |---|---|
//! | file close-write | upload |
//! | file create | none (the close-write follows) |
//! | file delete | delete |
//! | directory create | watch the tree, upload every file in it |
//! | directory delete | none (its files report their own deletes) |
//! | paired move, file | server-side move, or delete + upload across workers |
//! | paired move, directory | re-watch, then one move per file |
//! | orphan moved-from | delete (file) or delete-prefix (directory) |
//! | orphan moved-to | upload (file) or watch + upload all (directory) |
//! | queue overflow | reconcile every rule |

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use cdnmirror_core::config::ConfigEntry;
use cdnmirror_core::domain::Job;
use cdnmirror_core::settings::DaemonSettings;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::events::{Event, EventMask, EventSource, WatchHandle};
use crate::pairing::{CookiePairing, ResolvedEvent};
use crate::registry::{TreeScan, WatchRegistry};
use crate::translator::{JobTranslator, Site, TranslateError};
use crate::worker::JobSink;
use crate::WatchError;

/// A path an event refers to, with the index of the rule covering it
#[derive(Debug, Clone)]
struct Located {
    entry: usize,
    path: PathBuf,
    is_dir: bool,
}

pub struct WatchLoop {
    registry: WatchRegistry,
    /// Which rule each watch belongs to
    owners: HashMap<WatchHandle, usize>,
    entries: Vec<ConfigEntry>,
    pairing: CookiePairing,
    translator: JobTranslator,
    sink: Box<dyn JobSink>,
    mask: EventMask,
    sweep_interval: Duration,
}

impl WatchLoop {
    pub fn new(
        registry: WatchRegistry,
        entries: Vec<ConfigEntry>,
        translator: JobTranslator,
        sink: Box<dyn JobSink>,
        settings: &DaemonSettings,
    ) -> Self {
        Self {
            registry,
            owners: HashMap::new(),
            entries,
            pairing: CookiePairing::new(settings.grace_period()),
            translator,
            sink,
            mask: EventMask::FOLLOWED,
            sweep_interval: settings.sweep_interval(),
        }
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Rename halves waiting for their partner
    pub fn pending_moves(&self) -> usize {
        self.pairing.pending_count()
    }

    /// Installs the startup watches: every rule's directory and everything
    /// below it
    ///
    /// A rule directory that cannot be watched is an error; the daemon
    /// refuses to start half-blind.
    pub fn seed(&mut self) -> Result<(), WatchError> {
        for index in 0..self.entries.len() {
            let root = self.entries[index].local_dir.clone();
            let watch = self.registry.add_watch(&root, self.mask)?;
            self.owners.insert(watch.handle, index);

            let scan = self.registry.add_tree(&root, self.mask)?;
            self.adopt(&scan, index);
            info!(
                root = %root.display(),
                watches = scan.handles.len() + 1,
                files = scan.files.len(),
                "Watching"
            );
        }
        Ok(())
    }

    /// Queues one reconcile job per rule
    pub fn reconcile_all(&mut self) {
        let jobs: Result<Vec<Job>, TranslateError> = self
            .entries
            .iter()
            .map(|entry| self.translator.reconcile(Site::new(entry, &entry.local_dir)))
            .collect();
        self.submit(jobs);
    }

    /// Runs until `shutdown` fires or the event source breaks
    ///
    /// Jobs still queued in workers when this returns are abandoned.
    pub async fn run<S>(&mut self, source: &mut S, shutdown: CancellationToken) -> Result<(), WatchError>
    where
        S: EventSource + ?Sized,
    {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(pending_moves = self.pairing.pending_count(), "Watch loop stopped");
                    return Ok(());
                }

                event = source.next_event() => match event {
                    Ok(event) => self.handle_event(event, Instant::now()),
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Event source failed");
                        return Err(e);
                    }
                    Err(e) => warn!(error = %e, "Event source error"),
                },

                _ = sweep.tick() => self.sweep(Instant::now()),
            }
        }
    }

    /// Processes one raw event received at `now`
    pub fn handle_event(&mut self, event: Event, now: Instant) {
        trace!(handle = %event.watch, mask = ?event.mask, cookie = event.cookie, name = ?event.name, "Event");

        if event.mask.is_overflow() {
            warn!("Kernel event queue overflowed; reconciling every tree");
            self.reconcile_all();
            return;
        }

        if event.mask.is_ignored() {
            if let Some(watch) = self.registry.forget(event.watch) {
                self.owners.remove(&watch.handle);
                debug!(path = %watch.path.display(), "Watch released by kernel");
            }
            return;
        }

        if event.mask.is_created() {
            if event.mask.is_dir() {
                match self.locate(&event) {
                    // Already picked up by the walk of a new parent
                    Some(at) if self.registry.is_watching(&at.path) => {
                        trace!(path = %at.path.display(), "Created directory already watched");
                    }
                    Some(at) => self.watch_new_tree(at),
                    None => {}
                }
            }
            return;
        }

        if let Some(resolved) = self.pairing.push(event, now) {
            self.dispatch(resolved);
        }
    }

    /// Releases rename halves whose grace period is over
    pub fn sweep(&mut self, now: Instant) {
        for resolved in self.pairing.expire(now) {
            self.dispatch(resolved);
        }
    }

    fn dispatch(&mut self, resolved: ResolvedEvent) {
        match resolved {
            ResolvedEvent::Single(event) => self.on_single(event),
            ResolvedEvent::Moved { from, to } => self.on_moved(from, to),
            ResolvedEvent::OrphanFrom(event) => {
                if let Some(at) = self.locate(&event) {
                    self.on_moved_out(at);
                }
            }
            ResolvedEvent::OrphanTo(event) => {
                if let Some(at) = self.locate(&event) {
                    self.on_moved_in(at);
                }
            }
        }
    }

    fn on_single(&mut self, event: Event) {
        let Some(at) = self.locate(&event) else {
            return;
        };

        if event.mask.is_deleted() {
            if at.is_dir {
                self.unwatch(&at);
            } else {
                let job = self.translator.delete(self.site(&at));
                self.submit(job.map(|job| vec![job]));
            }
        } else if event.mask.is_close_write() && !at.is_dir {
            let job = self.translator.upload(self.site(&at));
            self.submit(job.map(|job| vec![job]));
        } else {
            trace!(mask = ?event.mask, path = %at.path.display(), "Ignoring event");
        }
    }

    fn on_moved(&mut self, from: Event, to: Event) {
        match (self.locate(&from), self.locate(&to)) {
            (Some(source), Some(dest)) if dest.is_dir => self.on_tree_moved(source, dest),
            (Some(source), Some(dest)) => {
                let jobs = self.translator.moved(self.site(&source), self.site(&dest));
                self.submit(jobs);
            }
            (Some(source), None) => self.on_moved_out(source),
            (None, Some(dest)) => self.on_moved_in(dest),
            (None, None) => {}
        }
    }

    /// A directory moved within the watched trees
    ///
    /// The old watches are removed before the new location is walked, so
    /// no handle ends up mapped to two paths.
    fn on_tree_moved(&mut self, source: Located, dest: Located) {
        self.unwatch(&source);
        let Some(scan) = self.watch_tree(&dest) else {
            return;
        };
        let jobs = self
            .translator
            .moved_tree(self.site(&source), self.site(&dest), &scan.files);
        self.submit(jobs);
    }

    /// Something left the watched trees
    fn on_moved_out(&mut self, at: Located) {
        if at.is_dir {
            self.unwatch(&at);
            let job = self.translator.delete_tree(self.site(&at));
            self.submit(job.map(|job| vec![job]));
        } else {
            let job = self.translator.delete(self.site(&at));
            self.submit(job.map(|job| vec![job]));
        }
    }

    /// Something arrived from outside the watched trees
    fn on_moved_in(&mut self, at: Located) {
        if at.is_dir {
            self.watch_new_tree(at);
        } else {
            let job = self.translator.upload(self.site(&at));
            self.submit(job.map(|job| vec![job]));
        }
    }

    fn watch_new_tree(&mut self, at: Located) {
        let Some(scan) = self.watch_tree(&at) else {
            return;
        };
        let site_entry = &self.entries[at.entry];
        let jobs: Result<Vec<Job>, TranslateError> = scan
            .files
            .iter()
            .map(|file| self.translator.upload(Site::new(site_entry, file)))
            .collect();
        self.submit(jobs);
    }

    fn watch_tree(&mut self, at: &Located) -> Option<TreeScan> {
        match self.registry.add_tree(&at.path, self.mask) {
            Ok(scan) => {
                self.adopt(&scan, at.entry);
                Some(scan)
            }
            Err(e) => {
                // Usually gone again before we got to it
                warn!(path = %at.path.display(), error = %e, "Cannot watch directory");
                None
            }
        }
    }

    fn unwatch(&mut self, at: &Located) {
        for watch in self.registry.remove_tree(&at.path) {
            self.owners.remove(&watch.handle);
        }
    }

    fn adopt(&mut self, scan: &TreeScan, entry: usize) {
        for handle in &scan.handles {
            self.owners.insert(*handle, entry);
        }
    }

    fn locate(&self, event: &Event) -> Option<Located> {
        let watch = match self.registry.watch_from_handle(event.watch) {
            Ok(watch) => watch,
            Err(e) => {
                warn!(error = %e, mask = ?event.mask, name = ?event.name, "Dropping event for stale watch");
                return None;
            }
        };
        let Some(&entry) = self.owners.get(&event.watch) else {
            warn!(handle = %event.watch, "Watch has no rule; dropping event");
            return None;
        };
        Some(Located {
            entry,
            path: watch.path.join(&event.name),
            is_dir: event.mask.is_dir(),
        })
    }

    fn site<'a>(&'a self, at: &'a Located) -> Site<'a> {
        Site::new(&self.entries[at.entry], &at.path)
    }

    fn submit(&mut self, jobs: Result<Vec<Job>, TranslateError>) {
        let jobs = match jobs {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "Cannot build job; event dropped");
                return;
            }
        };
        for job in jobs {
            debug!(job = %job, "Job queued");
            if let Err(e) = self.sink.submit(job) {
                warn!(error = %e, "Cannot queue job; dropped");
            }
        }
    }
}
