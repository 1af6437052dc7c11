//! Event -> job translation
//!
//! Pure mapping from "this path under this rule changed" to the remote work
//! that mirrors it. No I/O happens here; directory walks are done by the
//! caller and handed in as file lists.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cdnmirror_core::config::ConfigEntry;
use cdnmirror_core::domain::{
    join_object_name, path_to_object_name, AccountCache, AccountError, Job, ObjectRef,
};
use thiserror::Error;

/// Why an event could not become a job
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// The path is not under the rule's local directory
    #[error("{path} is outside {root}")]
    OutsideTree { path: PathBuf, root: PathBuf },

    #[error(transparent)]
    Account(#[from] AccountError),
}

/// A path together with the rule that covers it
#[derive(Debug, Clone, Copy)]
pub struct Site<'a> {
    pub entry: &'a ConfigEntry,
    pub path: &'a Path,
}

impl<'a> Site<'a> {
    pub fn new(entry: &'a ConfigEntry, path: &'a Path) -> Self {
        Self { entry, path }
    }
}

/// Builds jobs for resolved events
#[derive(Debug, Clone)]
pub struct JobTranslator {
    accounts: Arc<AccountCache>,
}

impl JobTranslator {
    pub fn new(accounts: Arc<AccountCache>) -> Self {
        Self { accounts }
    }

    /// Remote counterpart of `site.path`
    ///
    /// The object name is `remote_dir` joined with the path relative to
    /// `local_dir`; the rule's own directory maps to the bare prefix.
    pub fn target(&self, site: Site<'_>) -> Result<ObjectRef, TranslateError> {
        let entry = site.entry;
        let relative = site
            .path
            .strip_prefix(&entry.local_dir)
            .map_err(|_| TranslateError::OutsideTree {
                path: site.path.to_path_buf(),
                root: entry.local_dir.clone(),
            })?;

        let session = self.accounts.get(&entry.username)?;
        let endpoint = session.endpoint_url(&entry.region, entry.snet)?;
        let name = join_object_name([entry.remote_dir.as_str(), path_to_object_name(relative).as_str()]);
        Ok(ObjectRef::new(endpoint, entry.container.clone(), name)?)
    }

    /// A file was written or arrived
    pub fn upload(&self, site: Site<'_>) -> Result<Job, TranslateError> {
        let target = self.target(site)?;
        Ok(Job::upload(&site.entry.username, site.path.to_path_buf(), target))
    }

    /// A file disappeared
    pub fn delete(&self, site: Site<'_>) -> Result<Job, TranslateError> {
        let target = self.target(site)?;
        Ok(Job::delete(&site.entry.username, target))
    }

    /// A directory disappeared without a trace of its contents
    pub fn delete_tree(&self, site: Site<'_>) -> Result<Job, TranslateError> {
        let prefix = self.target(site)?;
        Ok(Job::delete_prefix(&site.entry.username, prefix))
    }

    /// Bring everything below `site` up to date
    pub fn reconcile(&self, site: Site<'_>) -> Result<Job, TranslateError> {
        let prefix = self.target(site)?;
        Ok(Job::reconcile(&site.entry.username, site.path.to_path_buf(), prefix))
    }

    /// A file was renamed from `from` to `to`, both inside watched trees
    ///
    /// Within one worker this is a server-side move. Across workers the
    /// ordering of a copy against the source worker's queue cannot be
    /// guaranteed, so it becomes a delete on the source's worker and an
    /// upload on the destination's.
    pub fn moved(&self, from: Site<'_>, to: Site<'_>) -> Result<Vec<Job>, TranslateError> {
        let source = self.target(from)?;
        let dest = self.target(to)?;

        if source == dest && from.entry.username == to.entry.username {
            return Ok(Vec::new());
        }

        let same_worker = from.entry.username == to.entry.username
            && source.container_url() == dest.container_url();
        if same_worker {
            return Ok(vec![Job::server_side_move(
                &from.entry.username,
                source,
                dest,
                to.path.to_path_buf(),
            )]);
        }

        Ok(vec![
            Job::delete(&from.entry.username, source),
            Job::upload(&to.entry.username, to.path.to_path_buf(), dest),
        ])
    }

    /// A directory was renamed from `from` to `to`; `files` are the regular
    /// files now found under `to.path`
    ///
    /// Every file becomes a per-file move from its old relative position.
    pub fn moved_tree(
        &self,
        from: Site<'_>,
        to: Site<'_>,
        files: &[PathBuf],
    ) -> Result<Vec<Job>, TranslateError> {
        let mut jobs = Vec::with_capacity(files.len());
        for file in files {
            let relative = file.strip_prefix(to.path).map_err(|_| TranslateError::OutsideTree {
                path: file.clone(),
                root: to.path.to_path_buf(),
            })?;
            let old = from.path.join(relative);
            jobs.extend(self.moved(Site::new(from.entry, &old), Site::new(to.entry, file))?);
        }
        Ok(jobs)
    }
}
