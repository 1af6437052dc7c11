//! Fakes shared by the unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cdnmirror_core::config::ConfigEntry;
use cdnmirror_core::domain::{AccountCache, AccountSession, Job, ObjectRef, ServiceEndpoint};
use cdnmirror_core::ports::{ITransport, RemoteRequest, RemoteResponse, TransportError};
use tokio::sync::mpsc;
use url::Url;

use crate::events::{Event, EventMask, EventSource, WatchHandle};
use crate::registry::WatchBackend;
use crate::worker::{JobSink, SubmitError};
use crate::WatchError;

pub const ENDPOINT: &str = "https://storage.example.com/v1/AUTH_bob";

pub fn session() -> AccountSession {
    AccountSession::new(
        "bob",
        "tok-bob",
        vec![ServiceEndpoint {
            region: "DFW".to_string(),
            public_url: ENDPOINT.to_string(),
            internal_url: Some("https://snet-storage.example.com/v1/AUTH_bob".to_string()),
        }],
    )
}

pub fn accounts() -> AccountCache {
    let mut cache = AccountCache::new();
    cache.insert(session());
    cache
}

pub fn entry(local_dir: &str, container: &str, remote_dir: &str) -> ConfigEntry {
    ConfigEntry {
        username: "bob".to_string(),
        region: "DFW".to_string(),
        snet: false,
        local_dir: PathBuf::from(local_dir),
        container: container.to_string(),
        remote_dir: remote_dir.to_string(),
    }
}

pub fn object(container: &str, name: &str) -> ObjectRef {
    ObjectRef::new(Url::parse(ENDPOINT).unwrap(), container, name).unwrap()
}

/// Polls `done` while letting spawned tasks and paused time move forward
pub async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ----------------------------------------------------------------------------
// Watch backend
// ----------------------------------------------------------------------------

#[derive(Default)]
struct BackendState {
    next: i32,
    aliases: HashMap<PathBuf, WatchHandle>,
    failing: HashSet<PathBuf>,
    removed: Vec<WatchHandle>,
}

/// In-memory [`WatchBackend`] handing out sequential handles
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    /// Makes `add(path)` return `handle`, as the kernel does for a second
    /// path to an already watched inode
    pub fn alias(&self, path: &Path, handle: WatchHandle) {
        self.state.lock().unwrap().aliases.insert(path.to_path_buf(), handle);
    }

    pub fn fail_on(&self, path: &Path) {
        self.state.lock().unwrap().failing.insert(path.to_path_buf());
    }

    pub fn removed(&self) -> Vec<WatchHandle> {
        self.state.lock().unwrap().removed.clone()
    }
}

impl WatchBackend for FakeBackend {
    fn add(&mut self, path: &Path, _mask: EventMask) -> io::Result<WatchHandle> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(path) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        if let Some(handle) = state.aliases.get(path) {
            return Ok(*handle);
        }
        state.next += 1;
        Ok(WatchHandle::new(state.next))
    }

    fn remove(&mut self, handle: WatchHandle) -> io::Result<()> {
        self.state.lock().unwrap().removed.push(handle);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// Records requests and answers from a script, then with a default status
pub struct ScriptedTransport {
    requests: Mutex<Vec<RemoteRequest>>,
    script: Mutex<VecDeque<Result<RemoteResponse, TransportError>>>,
    stalled: Mutex<Option<String>>,
    default_status: u16,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::with_default_status(200)
    }
}

impl ScriptedTransport {
    pub fn with_default_status(status: u16) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            stalled: Mutex::new(None),
            default_status: status,
        }
    }

    /// Queues the answer to the next unanswered request
    pub fn respond(&self, outcome: Result<RemoteResponse, TransportError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Requests whose URL path starts with `prefix` never complete
    pub fn stall_path(&self, prefix: &str) {
        *self.stalled.lock().unwrap() = Some(prefix.to_string());
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ITransport for ScriptedTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError> {
        let stalled = self
            .stalled
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|prefix| request.url.path().starts_with(prefix.as_str()));
        if stalled {
            std::future::pending::<()>().await;
        }

        self.requests.lock().unwrap().push(request);
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(RemoteResponse::new(self.default_status)))
    }
}

// ----------------------------------------------------------------------------
// Job sink and event source
// ----------------------------------------------------------------------------

/// Collects submitted jobs
#[derive(Clone, Default)]
pub struct RecordingSink {
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl RecordingSink {
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    /// Operation descriptions, e.g. `upload /data/a.txt -> c1/a.txt`
    pub fn described(&self) -> Vec<String> {
        self.jobs().iter().map(|job| job.op.to_string()).collect()
    }
}

impl JobSink for RecordingSink {
    fn submit(&mut self, job: Job) -> Result<(), SubmitError> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// Event source fed from a channel; a closed channel is a fatal error
pub struct ChannelSource {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl ChannelSource {
    pub fn new() -> (mpsc::UnboundedSender<Event>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self { receiver })
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Result<Event, WatchError> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| WatchError::Fatal(io::Error::from(io::ErrorKind::BrokenPipe)))
    }
}
