//! Units of remote work
//!
//! A [`Job`] is created from a resolved filesystem event (or by the startup
//! phase), routed to the worker named by its [`WorkerKey`], executed once and
//! discarded.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::errors::AccountError;

// ============================================================================
// ObjectRef
// ============================================================================

/// A remote object, or an object-name prefix, inside one container
///
/// Displays as `container/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    endpoint: Url,
    container: String,
    name: String,
}

impl ObjectRef {
    /// Builds a reference; `name` is normalized to `/`-separated segments
    /// without leading, trailing or doubled separators
    pub fn new(
        endpoint: Url,
        container: impl Into<String>,
        name: impl AsRef<str>,
    ) -> Result<Self, AccountError> {
        if endpoint.cannot_be_a_base() {
            return Err(AccountError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(Self {
            endpoint,
            container: container.into(),
            name: join_object_name([name.as_ref()]),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Object name within the container (empty for the container root)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same container, different object name
    pub fn with_name(&self, name: impl AsRef<str>) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            container: self.container.clone(),
            name: join_object_name([name.as_ref()]),
        }
    }

    /// A reference to `self.name/child`
    pub fn child(&self, child: impl AsRef<str>) -> Self {
        self.with_name(join_object_name([self.name.as_str(), child.as_ref()]))
    }

    /// `endpoint/container`
    pub fn container_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.container);
        }
        url
    }

    /// `endpoint/container/name`, every segment percent-encoded
    pub fn url(&self) -> Url {
        let mut url = self.container_url();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.extend(self.name.split('/').filter(|s| !s.is_empty()));
        }
        url
    }

    /// Value of the `Destination` header of a server-side copy:
    /// `container/name`, encoded as it appears in [`url`](Self::url)
    pub fn destination_header(&self) -> String {
        let full = self.url();
        let base = self.endpoint.path().trim_end_matches('/');
        full.path()
            .strip_prefix(base)
            .unwrap_or(full.path())
            .trim_start_matches('/')
            .to_string()
    }

    /// Listing prefix for everything below this reference
    ///
    /// Empty for the container root, otherwise `name/`.
    pub fn listing_prefix(&self) -> String {
        if self.name.is_empty() {
            String::new()
        } else {
            format!("{}/", self.name)
        }
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.container)
        } else {
            write!(f, "{}/{}", self.container, self.name)
        }
    }
}

/// Joins object-name parts with exactly one `/` between non-empty segments
pub fn join_object_name<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .flat_map(|p| p.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Converts a relative filesystem path into an object-name fragment
///
/// Only normal components survive; `.` and `..` are dropped.
pub fn path_to_object_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// WorkerKey
// ============================================================================

/// Identity of the ordered queue a job is routed to
///
/// Two jobs with the same key execute strictly in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerKey {
    /// Account (username) the requests are authenticated as
    pub account: String,
    /// Container URL all of the worker's objects live under
    pub root: Url,
}

impl WorkerKey {
    pub fn new(account: impl Into<String>, root: Url) -> Self {
        Self {
            account: account.into(),
            root,
        }
    }

    /// Key of the worker that owns `target` for `account`
    pub fn for_target(account: &str, target: &ObjectRef) -> Self {
        Self::new(account, target.container_url())
    }
}

impl Display for WorkerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.account, self.root)
    }
}

// ============================================================================
// Job
// ============================================================================

/// Identifier used to correlate a job's log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The remote operation a job performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOp {
    /// PUT the local file's current content to `target`
    Upload { local: PathBuf, target: ObjectRef },
    /// DELETE `target`
    Delete { target: ObjectRef },
    /// Copy `source` to `dest` on the server, then delete `source`
    ///
    /// `local` is the file's new location; it is uploaded to `dest` instead
    /// when the store no longer has `source`.
    ServerSideMove {
        source: ObjectRef,
        dest: ObjectRef,
        local: PathBuf,
    },
    /// Delete every object below `prefix`
    DeletePrefix { prefix: ObjectRef },
    /// Upload every file under `local_root` that is missing below `prefix`
    /// or differs from it in size
    Reconcile { local_root: PathBuf, prefix: ObjectRef },
}

impl JobOp {
    /// Short operation name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            JobOp::Upload { .. } => "upload",
            JobOp::Delete { .. } => "delete",
            JobOp::ServerSideMove { .. } => "server_side_move",
            JobOp::DeletePrefix { .. } => "delete_prefix",
            JobOp::Reconcile { .. } => "reconcile",
        }
    }

    /// The object whose worker owns this operation
    pub fn primary_target(&self) -> &ObjectRef {
        match self {
            JobOp::Upload { target, .. } | JobOp::Delete { target } => target,
            JobOp::ServerSideMove { source, .. } => source,
            JobOp::DeletePrefix { prefix } | JobOp::Reconcile { prefix, .. } => prefix,
        }
    }
}

impl Display for JobOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JobOp::Upload { local, target } => {
                write!(f, "upload {} -> {}", local.display(), target)
            }
            JobOp::Delete { target } => write!(f, "delete {target}"),
            JobOp::ServerSideMove { source, dest, .. } => write!(f, "move {source} -> {dest}"),
            JobOp::DeletePrefix { prefix } => write!(f, "delete prefix {prefix}/"),
            JobOp::Reconcile { local_root, prefix } => {
                write!(f, "reconcile {} -> {}", local_root.display(), prefix)
            }
        }
    }
}

/// A unit of remote work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    /// Username whose session authenticates the requests
    pub account: String,
    pub op: JobOp,
}

impl Job {
    pub fn new(account: impl Into<String>, op: JobOp) -> Self {
        Self {
            id: JobId::new(),
            account: account.into(),
            op,
        }
    }

    pub fn upload(account: impl Into<String>, local: PathBuf, target: ObjectRef) -> Self {
        Self::new(account, JobOp::Upload { local, target })
    }

    pub fn delete(account: impl Into<String>, target: ObjectRef) -> Self {
        Self::new(account, JobOp::Delete { target })
    }

    pub fn server_side_move(
        account: impl Into<String>,
        source: ObjectRef,
        dest: ObjectRef,
        local: PathBuf,
    ) -> Self {
        Self::new(account, JobOp::ServerSideMove { source, dest, local })
    }

    pub fn delete_prefix(account: impl Into<String>, prefix: ObjectRef) -> Self {
        Self::new(account, JobOp::DeletePrefix { prefix })
    }

    pub fn reconcile(account: impl Into<String>, local_root: PathBuf, prefix: ObjectRef) -> Self {
        Self::new(account, JobOp::Reconcile { local_root, prefix })
    }

    /// The worker this job must be routed to
    pub fn worker_key(&self) -> WorkerKey {
        WorkerKey::for_target(&self.account, self.op.primary_target())
    }
}

impl Display for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id, self.op)
    }
}
