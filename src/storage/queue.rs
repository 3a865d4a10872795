//! Branch queue: deduplicated FIFO of branches waiting to be processed

use super::{STORE_VERSION, load_file, lock, save_file};
use crate::error::Result;
use crate::types::Branch;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error};

#[derive(Serialize, Deserialize)]
struct QueueFile {
    version: u32,
    #[serde(default)]
    branches: Vec<Branch>,
}

/// Branch queue shared by the event dispatcher and the worker
///
/// Every operation runs under one mutex, which is never held across an
/// `.await`. A branch, keyed by `(repository, id)`, is queued at most once.
/// No operation fails: persistence errors are logged and the in-memory queue
/// stays authoritative.
pub struct BranchQueue {
    branches: Mutex<VecDeque<Branch>>,
    queued: Notify,
    path: Option<PathBuf>,
}

impl BranchQueue {
    /// Queue that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            branches: Mutex::new(VecDeque::new()),
            queued: Notify::new(),
            path: None,
        }
    }

    /// Queue persisted at `path`, loading whatever it already holds
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let branches = load_file::<QueueFile>(&path)?
            .map(|file| file.branches.into_iter().collect())
            .unwrap_or_default();

        Ok(Self {
            branches: Mutex::new(branches),
            queued: Notify::new(),
            path: Some(path),
        })
    }

    /// Add a branch unless it is already queued, waking the worker.
    ///
    /// Returns whether the branch was added.
    pub fn enqueue(&self, branch: Branch) -> bool {
        let mut branches = lock(&self.branches);
        if branches.iter().any(|b| b.is(&branch.repository, &branch.id)) {
            debug!(branch = %branch.full_name, "branch already queued");
            return false;
        }

        debug!(branch = %branch.full_name, id = %branch.id, "queueing branch");
        branches.push_back(branch);
        self.persist(&branches);
        drop(branches);

        self.queued.notify_one();
        true
    }

    /// Wait until a branch is queued, then remove and return the oldest one.
    ///
    /// The wait re-checks the queue at least every `poll`.
    pub async fn dequeue(&self, poll: Duration) -> Branch {
        loop {
            let queued = self.queued.notified();
            if let Some(branch) = self.try_dequeue() {
                return branch;
            }
            let _ = tokio::time::timeout(poll, queued).await;
        }
    }

    /// Remove and return the oldest branch, if any
    pub fn try_dequeue(&self) -> Option<Branch> {
        let mut branches = lock(&self.branches);
        let branch = branches.pop_front()?;
        self.persist(&branches);
        Some(branch)
    }

    /// Whether the branch is queued
    pub fn contains(&self, repository: &str, branch_id: &str) -> bool {
        lock(&self.branches)
            .iter()
            .any(|b| b.is(repository, branch_id))
    }

    /// Drop the branch from the queue, returning whether it was there
    pub fn remove(&self, repository: &str, branch_id: &str) -> bool {
        let mut branches = lock(&self.branches);
        let before = branches.len();
        branches.retain(|b| !b.is(repository, branch_id));
        if branches.len() == before {
            return false;
        }

        debug!(repository, id = branch_id, "removed branch from queue");
        self.persist(&branches);
        true
    }

    /// Whether anything is queued
    pub fn has_queued(&self) -> bool {
        !lock(&self.branches).is_empty()
    }

    /// Number of queued branches
    pub fn len(&self) -> usize {
        lock(&self.branches).len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        !self.has_queued()
    }

    fn persist(&self, branches: &VecDeque<Branch>) {
        let Some(path) = &self.path else {
            return;
        };

        let file = QueueFile {
            version: STORE_VERSION,
            branches: branches.iter().cloned().collect(),
        };
        if let Err(e) = save_file(path, "branch queue", &file) {
            error!(error = %e, "failed to persist branch queue");
        }
    }
}
