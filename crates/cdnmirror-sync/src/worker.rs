//! Per-destination workers
//!
//! Every distinct [`WorkerKey`] (account + container URL) gets one worker:
//! an unbounded FIFO queue drained by its own task. Jobs for one key run
//! strictly in arrival order, one at a time; workers for different keys run
//! concurrently on the runtime and never block each other.
//!
//! ## Retry Logic
//!
//! Each remote request is retried on transient failures (network errors,
//! timeouts, HTTP 429 and 5xx) with exponential backoff: `base`, `2*base`,
//! `4*base`, ... capped at `max`, up to `max_attempts` attempts in total.
//! Any other 4xx is permanent. A job that fails permanently is logged with a
//! [`FailureRecord`] and dropped; the worker moves on to the next job.
//!
//! ## Stale objects
//!
//! A worker remembers the targets whose last upload was skipped (file gone)
//! or failed. The remote copy of such a target is older than the local
//! content, so a later move away from it uploads the destination file
//! instead of copying the stale object.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cdnmirror_core::domain::{
    path_to_object_name, AccountCache, AccountError, AccountSession, Job, JobId, JobOp, ObjectRef, WorkerKey,
};
use cdnmirror_core::ports::{ITransport, RemoteRequest, RemoteResponse};
use cdnmirror_core::settings::WorkerSettings;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::remote::{self, RemoteObject, LISTING_LIMIT};
use crate::RemoteError;

// ============================================================================
// Retry policy
// ============================================================================

/// Attempt ceiling and backoff schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_backoff: Duration::from_millis(settings.base_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&WorkerSettings::default())
    }
}

// ============================================================================
// Statistics and failure records
// ============================================================================

/// Structured record of a dropped job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub job_id: JobId,
    pub worker: String,
    pub operation: &'static str,
    pub description: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    fn new(key: &WorkerKey, job: &Job, err: &RemoteError) -> Self {
        Self {
            job_id: job.id,
            worker: key.to_string(),
            operation: job.op.kind(),
            description: job.op.to_string(),
            error: err.to_string(),
            failed_at: Utc::now(),
        }
    }
}

/// Counters shared between a worker and its handle
#[derive(Debug, Default)]
pub struct WorkerStats {
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    soft_cap_crossings: AtomicU64,
    last_failure: Mutex<Option<FailureRecord>>,
}

impl WorkerStats {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Requests that were retried after a transient failure
    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    /// Times the queue grew past the soft cap
    pub fn soft_cap_crossings(&self) -> u64 {
        self.soft_cap_crossings.load(Ordering::Relaxed)
    }

    pub fn last_failure(&self) -> Option<FailureRecord> {
        self.last_failure.lock().ok().and_then(|slot| slot.clone())
    }

    fn record_failure(&self, record: FailureRecord) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut slot) = self.last_failure.lock() {
            *slot = Some(record);
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Why a job could not be queued
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("worker {0} has stopped")]
    WorkerStopped(WorkerKey),
}

/// Where the watch loop sends the jobs it builds
pub trait JobSink: Send {
    fn submit(&mut self, job: Job) -> Result<(), SubmitError>;
}

/// The manager's side of one worker
pub struct WorkerHandle {
    key: WorkerKey,
    sender: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    stats: Arc<WorkerStats>,
    above_soft_cap: bool,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn key(&self) -> &WorkerKey {
        &self.key
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    /// Queues `job`; hands it back if the worker task is gone
    fn enqueue(&mut self, job: Job, soft_cap: usize) -> Result<(), Job> {
        let depth = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if let Err(mpsc::error::SendError(job)) = self.sender.send(job) {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(job);
        }

        if depth > soft_cap {
            if !self.above_soft_cap {
                warn!(worker = %self.key, depth, soft_cap, "Worker queue above soft cap");
                self.stats.soft_cap_crossings.fetch_add(1, Ordering::Relaxed);
                self.above_soft_cap = true;
            }
        } else {
            self.above_soft_cap = false;
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    // Queued jobs are abandoned with the manager
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns every worker, creating them on first use
pub struct WorkerManager {
    accounts: Arc<AccountCache>,
    transport: Arc<dyn ITransport>,
    policy: RetryPolicy,
    soft_cap: usize,
    workers: HashMap<WorkerKey, WorkerHandle>,
}

impl WorkerManager {
    pub fn new(
        accounts: Arc<AccountCache>,
        transport: Arc<dyn ITransport>,
        policy: RetryPolicy,
        soft_cap: usize,
    ) -> Self {
        Self {
            accounts,
            transport,
            policy,
            soft_cap,
            workers: HashMap::new(),
        }
    }

    /// The worker for `key`, spawned on first request
    ///
    /// Must be called from within a tokio runtime.
    pub fn get_worker(&mut self, key: &WorkerKey) -> Result<&mut WorkerHandle, AccountError> {
        match self.workers.entry(key.clone()) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let session = Arc::clone(self.accounts.get(&key.account)?);
                let handle = spawn_worker(
                    key.clone(),
                    session,
                    Arc::clone(&self.transport),
                    self.policy.clone(),
                );
                Ok(slot.insert(handle))
            }
        }
    }

    /// Routes `job` to the worker for its key
    pub fn add_job(&mut self, job: Job) -> Result<(), SubmitError> {
        let key = job.worker_key();
        let soft_cap = self.soft_cap;
        let job = match self.get_worker(&key)?.enqueue(job, soft_cap) {
            Ok(()) => return Ok(()),
            Err(job) => job,
        };

        warn!(worker = %key, "Worker task gone; restarting it");
        self.workers.remove(&key);
        self.get_worker(&key)?
            .enqueue(job, soft_cap)
            .map_err(|_| SubmitError::WorkerStopped(key))
    }

    pub fn worker(&self, key: &WorkerKey) -> Option<&WorkerHandle> {
        self.workers.get(key)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Jobs queued or running across all workers
    pub fn total_pending(&self) -> usize {
        self.workers.values().map(WorkerHandle::pending).sum()
    }
}

impl JobSink for WorkerManager {
    fn submit(&mut self, job: Job) -> Result<(), SubmitError> {
        self.add_job(job)
    }
}

fn spawn_worker(
    key: WorkerKey,
    session: Arc<AccountSession>,
    transport: Arc<dyn ITransport>,
    policy: RetryPolicy,
) -> WorkerHandle {
    let (sender, receiver) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let stats = Arc::new(WorkerStats::default());

    let worker = Worker {
        key: key.clone(),
        session,
        transport,
        policy,
        pending: Arc::clone(&pending),
        stats: Arc::clone(&stats),
        stale: HashSet::new(),
    };
    let span = tracing::info_span!("worker", worker = %key);
    let task = tokio::spawn(worker.run(receiver).instrument(span));
    debug!(worker = %key, "Worker spawned");

    WorkerHandle {
        key,
        sender,
        pending,
        stats,
        above_soft_cap: false,
        task,
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    key: WorkerKey,
    session: Arc<AccountSession>,
    transport: Arc<dyn ITransport>,
    policy: RetryPolicy,
    pending: Arc<AtomicUsize>,
    stats: Arc<WorkerStats>,
    /// Targets whose remote object does not hold the latest local content
    stale: HashSet<ObjectRef>,
}

impl Worker {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = receiver.recv().await {
            self.process(job).await;
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        debug!("Worker queue closed");
    }

    #[tracing::instrument(name = "job", skip_all, fields(id = %job.id, op = job.op.kind()))]
    async fn process(&mut self, job: Job) {
        debug!(job = %job.op, "Job started");
        match self.execute(&job.op).await {
            Ok(()) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                info!(job = %job.op, "Job completed");
            }
            Err(err) => {
                let record = FailureRecord::new(&self.key, &job, &err);
                let json = serde_json::to_string(&record).unwrap_or_default();
                error!(job = %job.op, error = %err, record = %json, "Job failed permanently; dropped");
                self.stats.record_failure(record);
            }
        }
    }

    async fn execute(&mut self, op: &JobOp) -> Result<(), RemoteError> {
        match op {
            JobOp::Upload { local, target } => self.upload(local, target).await,
            JobOp::Delete { target } => self.delete(target).await,
            JobOp::ServerSideMove { source, dest, local } => self.server_side_move(source, dest, local).await,
            JobOp::DeletePrefix { prefix } => self.delete_prefix(prefix).await,
            JobOp::Reconcile { local_root, prefix } => self.reconcile(local_root, prefix).await,
        }
    }

    async fn upload(&mut self, local: &Path, target: &ObjectRef) -> Result<(), RemoteError> {
        match self.put_file(local, target).await {
            Ok(true) => {
                self.stale.remove(target);
                Ok(())
            }
            Ok(false) => {
                self.stale.insert(target.clone());
                Ok(())
            }
            Err(err) => {
                self.stale.insert(target.clone());
                Err(err)
            }
        }
    }

    /// Streams `local` to `target`; `Ok(false)` when the file is gone
    async fn put_file(&self, local: &Path, target: &ObjectRef) -> Result<bool, RemoteError> {
        let metadata = match tokio::fs::metadata(local).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // A later delete or move event covers it
                info!(path = %local.display(), "Local file vanished before upload; skipping");
                return Ok(false);
            }
            Err(e) => {
                return Err(RemoteError::permanent(format!("cannot read {}: {e}", local.display())));
            }
        };
        remote::check_upload_size(local, metadata.len())?;

        self.send(remote::upload_request(&self.session, target, local)).await?;
        Ok(true)
    }

    async fn delete(&mut self, target: &ObjectRef) -> Result<(), RemoteError> {
        match self.send(remote::delete_request(&self.session, target)).await {
            Ok(_) => {}
            Err(err) if err.status() == Some(404) => {
                debug!(target = %target, "Object already absent");
            }
            Err(err) => return Err(err),
        }
        self.stale.remove(target);
        Ok(())
    }

    async fn server_side_move(
        &mut self,
        source: &ObjectRef,
        dest: &ObjectRef,
        local: &Path,
    ) -> Result<(), RemoteError> {
        if self.stale.remove(source) {
            debug!(source = %source, "Move source is stale remotely; uploading destination");
            self.upload(local, dest).await?;
            return self.delete(source).await;
        }

        match self.send(remote::copy_request(&self.session, source, dest)).await {
            Ok(_) => {}
            Err(err) if err.status() == Some(404) => {
                debug!(source = %source, "Move source missing remotely; uploading destination");
                return self.upload(local, dest).await;
            }
            Err(err) => return Err(err),
        }
        self.delete(source).await
    }

    async fn delete_prefix(&mut self, prefix: &ObjectRef) -> Result<(), RemoteError> {
        let objects = self.list(prefix).await?;
        let mut failed = 0usize;
        for object in &objects {
            let target = prefix.with_name(&object.name);
            if let Err(err) = self.delete(&target).await {
                warn!(target = %target, error = %err, "Delete under prefix failed");
                failed += 1;
            }
        }
        debug!(prefix = %prefix, deleted = objects.len() - failed, "Prefix deleted");
        if failed > 0 {
            return Err(RemoteError::permanent(format!(
                "{failed} of {} deletes failed",
                objects.len()
            )));
        }
        Ok(())
    }

    async fn reconcile(&mut self, local_root: &Path, prefix: &ObjectRef) -> Result<(), RemoteError> {
        let remote: HashMap<String, u64> = self
            .list(prefix)
            .await?
            .into_iter()
            .map(|object| (object.name, object.bytes))
            .collect();

        let files = walk_files(local_root)
            .await
            .map_err(|e| RemoteError::permanent(format!("cannot walk {}: {e}", local_root.display())))?;

        let (mut uploaded, mut unchanged, mut failed) = (0usize, 0usize, 0usize);
        for (path, size) in files {
            let Ok(relative) = path.strip_prefix(local_root) else {
                continue;
            };
            let target = prefix.child(path_to_object_name(relative));
            if remote.get(target.name()) == Some(&size) {
                unchanged += 1;
                continue;
            }
            match self.upload(&path, &target).await {
                Ok(()) => uploaded += 1,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Reconcile upload failed");
                    failed += 1;
                }
            }
        }

        info!(root = %local_root.display(), uploaded, unchanged, failed, "Reconciled");
        if failed > 0 {
            return Err(RemoteError::permanent(format!("{failed} uploads failed")));
        }
        Ok(())
    }

    /// Every object below `prefix`, following listing pages
    async fn list(&self, prefix: &ObjectRef) -> Result<Vec<RemoteObject>, RemoteError> {
        let mut objects = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let request = remote::listing_request(&self.session, prefix, marker.as_deref());
            let response = match self.send(request).await {
                Ok(response) => response,
                // no container yet, nothing below the prefix
                Err(err) if err.status() == Some(404) => return Ok(objects),
                Err(err) => return Err(err),
            };

            let page = remote::parse_listing(&response.body)?;
            let full_page = page.len() >= LISTING_LIMIT;
            marker = page.last().map(|object| object.name.clone());
            objects.extend(page);
            if !full_page || marker.is_none() {
                return Ok(objects);
            }
        }
    }

    /// Sends `request`, retrying transient failures per the policy
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        let context = format!("{} {}", request.method, request.url.path());
        let mut attempt = 1;
        loop {
            let outcome = match self.transport.send(request.clone()).await {
                Ok(response) => match RemoteError::from_status(response.status, &context) {
                    None => Ok(response),
                    Some(err) => Err(err),
                },
                Err(err) => Err(RemoteError::from(err)),
            };

            match outcome {
                Ok(response) => {
                    if attempt > 1 {
                        info!(request = %context, attempt, "Request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= self.policy.max_attempts => {
                    return Err(RemoteError::Exhausted {
                        attempts: attempt,
                        last: err.to_string(),
                    });
                }
                Err(err) => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        request = %context,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, retrying"
                    );
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Regular files below `root` with their sizes, sorted by path
async fn walk_files(root: &Path) -> std::io::Result<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if dir == root => return Err(e),
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                let size = entry.metadata().await?.len();
                files.push((entry.path(), size));
            }
        }
    }

    files.sort();
    Ok(files)
}
