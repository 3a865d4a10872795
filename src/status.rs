//! Branch and issue status transitions
//!
//! A failed transition never aborts processing: the error is logged and
//! carried in the returned [`StatusChange`] so it can be appended to the
//! notification.

use crate::api::MergebotApi;
use crate::config::BotConfig;
use crate::error::{Error, Result};
use crate::storage::ReviewStore;
use crate::types::{Branch, ReviewStatus};
use tracing::{error, info};

/// Outcome of a status transition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusChange {
    /// Set when the transition failed
    pub error_message: Option<String>,
}

impl StatusChange {
    /// Whether the transition went through
    pub fn is_successful(&self) -> bool {
        self.error_message.is_none()
    }

    /// Append the error, if any, to a notification message
    pub fn append_to(&self, message: String) -> String {
        match &self.error_message {
            Some(err) => format!("{message}\n{err}"),
            None => message,
        }
    }
}

/// Drives the status attribute, the issue status field and review resets
pub struct StatusUpdater<'a> {
    api: &'a dyn MergebotApi,
    config: &'a BotConfig,
    reviews: &'a ReviewStore,
}

impl<'a> StatusUpdater<'a> {
    /// Create an updater
    pub fn new(api: &'a dyn MergebotApi, config: &'a BotConfig, reviews: &'a ReviewStore) -> Self {
        Self { api, config, reviews }
    }

    /// Mark the branch as being tested
    pub async fn set_testing(&self, branch: &Branch, task: &str) -> StatusChange {
        let status = self.config.status_attribute();
        let result = async {
            if !status.testing_value.is_empty() {
                self.set_attribute(branch, &status.testing_value).await?;
            }
            if let Some(issues) = &self.config.issues
                && !issues.status_field.testing_value.is_empty()
            {
                self.set_issue_status(task, &issues.status_field.testing_value).await?;
            }
            Ok::<(), Error>(())
        }
        .await;
        finish(branch, &status.testing_value, result)
    }

    /// Mark the branch as failed, sending its reviews back to pending
    pub async fn set_failed(&self, branch: &Branch, task: &str) -> StatusChange {
        let status = self.config.status_attribute();
        let result = async {
            if self.config.review_filter_enabled() {
                self.reset_reviews(branch).await?;
            }
            self.set_attribute(branch, &status.failed_value).await?;
            if let Some(issues) = &self.config.issues {
                self.set_issue_status(task, &issues.status_field.failed_value).await?;
            }
            Ok::<(), Error>(())
        }
        .await;
        finish(branch, &status.failed_value, result)
    }

    /// Mark the branch as merged
    pub async fn set_merged(&self, branch: &Branch, task: &str) -> StatusChange {
        let status = self.config.status_attribute();
        let result = async {
            self.set_attribute(branch, &status.merged_value).await?;
            if let Some(issues) = &self.config.issues {
                self.set_issue_status(task, &issues.status_field.merged_value).await?;
            }
            Ok::<(), Error>(())
        }
        .await;
        finish(branch, &status.merged_value, result)
    }

    /// Put the branch back to resolved so it gets picked up again
    pub async fn set_resolved(&self, branch: &Branch) -> StatusChange {
        let status = self.config.status_attribute();
        let result = self.set_attribute(branch, &status.resolved_value).await;
        finish(branch, &status.resolved_value, result)
    }

    async fn set_attribute(&self, branch: &Branch, value: &str) -> Result<()> {
        let attribute = self.config.status_attribute().name.as_str();
        info!(branch = %branch.full_name, attribute, value, "setting branch status");
        self.api
            .change_branch_attribute(&branch.repository, &branch.full_name, attribute, value)
            .await
    }

    async fn set_issue_status(&self, task: &str, value: &str) -> Result<()> {
        let Some(issues) = &self.config.issues else {
            return Ok(());
        };
        let field = issues.status_field.name.as_str();
        info!(task, field, value, "setting issue status");
        self.api
            .set_issue_field(&issues.plug, &issues.project_key, task, field, value)
            .await
    }

    // The store catches up through the review-changed events this triggers.
    async fn reset_reviews(&self, branch: &Branch) -> Result<()> {
        for review in self.reviews.get_by_branch(&branch.repository, &branch.id) {
            self.api
                .update_review(&branch.repository, &review.id, ReviewStatus::PENDING_ID, &review.title)
                .await?;
        }
        Ok(())
    }
}

fn finish(branch: &Branch, value: &str, result: Result<()>) -> StatusChange {
    match result {
        Ok(()) => StatusChange::default(),
        Err(e) => {
            error!(branch = %branch.full_name, value, error = %e, "status change failed");
            StatusChange {
                error_message: Some(format!(
                    "There was an error setting the branch [{}] as [{value}]. Error: {e}.",
                    branch.full_name
                )),
            }
        }
    }
}
