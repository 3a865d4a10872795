//! Worker loop and startup backlog load

use crate::api::MergebotApi;
use crate::api::find;
use crate::config::{BotConfig, Timings};
use crate::error::Result;
use crate::process::{BranchProcessor, ProcessOutcome};
use crate::storage::{BranchQueue, ReviewStore};
use crate::types::Branch;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the worker loop needs
pub struct Worker {
    api: Arc<dyn MergebotApi>,
    queue: Arc<BranchQueue>,
    processor: BranchProcessor,
    timings: Timings,
}

impl Worker {
    /// Create a worker
    pub fn new(
        api: Arc<dyn MergebotApi>,
        queue: Arc<BranchQueue>,
        processor: BranchProcessor,
        timings: Timings,
    ) -> Self {
        Self {
            api,
            queue,
            processor,
            timings,
        }
    }

    /// Wait for the next branch and drive it to a terminal outcome.
    ///
    /// Returns `None` when the dequeued branch no longer exists.
    pub async fn process_next(&self) -> Option<ProcessOutcome> {
        let mut branch = self.queue.dequeue(self.timings.dequeue_poll).await;

        match find::branch_name(self.api.as_ref(), &branch.repository, &branch.id).await {
            Ok(name) if name.is_empty() => {
                warn!(id = %branch.id, branch = %branch.full_name, "branch no longer exists, dropping it");
                return None;
            }
            Ok(name) => branch.full_name = name,
            Err(e) => warn!(
                id = %branch.id,
                branch = %branch.full_name,
                error = %e,
                "unable to resolve current branch name, using the queued one"
            ),
        }

        let outcome = self.processor.process(&branch).await;
        match outcome {
            ProcessOutcome::Ok => info!(branch = %branch.full_name, "branch processing completed"),
            ProcessOutcome::Failed => info!(branch = %branch.full_name, "branch processing failed"),
            ProcessOutcome::NotReady => {
                info!(branch = %branch.full_name, "branch is not ready, it will be queued again");
                self.requeue(branch).await;
            }
        }
        Some(outcome)
    }

    async fn requeue(&self, branch: Branch) {
        if !self.queue.contains(&branch.repository, &branch.id) {
            self.queue.enqueue(branch);
        }
        tokio::time::sleep(self.timings.not_ready_backoff).await;
    }
}

/// Drain the queue forever, one branch at a time
pub async fn run_worker(worker: Worker) {
    info!("worker started");
    loop {
        worker.process_next().await;
    }
}

/// Seed the stores with the work that accumulated while the bot was down
pub async fn load_branches_to_process(
    api: &dyn MergebotApi,
    config: &BotConfig,
    queue: &BranchQueue,
    reviews: &ReviewStore,
) -> Result<()> {
    info!("retrieving branches to process");
    let repo = &config.repository;
    let status = config.status_attribute();

    if config.review_filter_enabled() {
        let pending = find::find_pending_branches_with_reviews(
            api,
            repo,
            &config.branch_prefix,
            &status.name,
            &status.merged_value,
        )
        .await?;

        for entry in pending {
            reviews.upsert(entry.review);
            if !config.attribute_filter_enabled() {
                queue.enqueue(entry.branch);
            }
        }
    }

    if config.attribute_filter_enabled() {
        let resolved = find::find_resolved_branches(
            api,
            repo,
            &config.branch_prefix,
            &status.name,
            &status.resolved_value,
        )
        .await?;

        for branch in resolved {
            queue.enqueue(branch);
        }
    }

    info!(queued = queue.len(), reviews = reviews.len(), "backlog loaded");
    Ok(())
}
