//! Event dispatcher: turns server change events into queue work
//!
//! Two event kinds matter, branch attribute changes and code review changes.
//! Events are handled one at a time, in arrival order; handling never blocks
//! and never calls out to the server.

use crate::config::BotConfig;
use crate::error::{Error, Result};
use crate::storage::{BranchQueue, ReviewStore};
use crate::types::{Branch, Review, ReviewStatus, local_branch_name};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Event name of a branch attribute change
pub const BRANCH_ATTRIBUTE_CHANGED: &str = "branchAttributeChanged";

/// Event name of a code review change
pub const CODE_REVIEW_CHANGED: &str = "codeReviewChanged";

/// Payload of a branch attribute change
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BranchAttributeChanged {
    /// Repository name
    pub repository: String,
    /// Branch id
    pub branch_id: String,
    /// Full branch name
    pub branch_full_name: String,
    /// Branch owner
    pub branch_owner: String,
    /// Branch comment
    pub branch_comment: String,
    /// Name of the attribute that changed
    pub attribute_name: String,
    /// New attribute value
    pub attribute_value: String,
}

/// Payload of a code review change
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CodeReviewChanged {
    /// Repository name
    pub repository: String,
    /// Review id
    pub code_review_id: String,
    /// Reviewed branch id
    pub branch_id: String,
    /// Full branch name
    pub branch_full_name: String,
    /// Branch owner
    pub branch_owner: String,
    /// Branch comment
    pub branch_comment: String,
    /// Review status (name or numeric id)
    pub code_review_status: String,
    /// Review title
    pub code_review_title: String,
}

impl BranchAttributeChanged {
    fn branch(&self) -> Branch {
        Branch::new(
            &self.repository,
            &self.branch_id,
            &self.branch_full_name,
            &self.branch_owner,
            &self.branch_comment,
        )
    }
}

impl CodeReviewChanged {
    fn branch(&self) -> Branch {
        Branch::new(
            &self.repository,
            &self.branch_id,
            &self.branch_full_name,
            &self.branch_owner,
            &self.branch_comment,
        )
    }

    fn review(&self) -> Review {
        Review::new(
            &self.repository,
            &self.code_review_id,
            &self.branch_id,
            ReviewStatus::from_wire(&self.code_review_status),
            &self.code_review_title,
        )
    }
}

/// An inbound event
#[derive(Debug, Clone)]
pub enum Event {
    /// A branch attribute changed
    BranchAttributeChanged(BranchAttributeChanged),
    /// A code review was created, updated or deleted
    CodeReviewChanged(CodeReviewChanged),
    /// Any other event kind
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    properties: serde_json::Value,
}

impl Event {
    /// Parse an event message: `{"event": "<kind>", "properties": {...}}`
    pub fn parse(message: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(message)
            .map_err(|e| Error::Transport(format!("unable to parse incoming event: {e}")))?;

        match envelope.event.as_str() {
            BRANCH_ATTRIBUTE_CHANGED => Ok(Self::BranchAttributeChanged(
                serde_json::from_value(envelope.properties)?,
            )),
            CODE_REVIEW_CHANGED => Ok(Self::CodeReviewChanged(serde_json::from_value(
                envelope.properties,
            )?)),
            _ => Ok(Self::Other(envelope.event)),
        }
    }
}

/// Routes events into the branch queue and the review store
pub struct EventDispatcher {
    config: Arc<BotConfig>,
    queue: Arc<BranchQueue>,
    reviews: Arc<ReviewStore>,
}

impl EventDispatcher {
    /// Create a dispatcher over the shared queue and review store
    pub fn new(config: Arc<BotConfig>, queue: Arc<BranchQueue>, reviews: Arc<ReviewStore>) -> Self {
        Self {
            config,
            queue,
            reviews,
        }
    }

    /// Handle a raw event message. Malformed messages are logged and dropped.
    pub fn on_message(&self, message: &str) {
        debug!(message, "event received");
        match Event::parse(message) {
            Ok(event) => self.dispatch(event),
            Err(e) => error!(error = %e, message, "dropping malformed event"),
        }
    }

    /// Handle a parsed event
    pub fn dispatch(&self, event: Event) {
        match event {
            Event::BranchAttributeChanged(e) => self.on_branch_attribute_changed(&e),
            Event::CodeReviewChanged(e) => self.on_code_review_changed(&e),
            Event::Other(kind) => debug!(kind, "ignoring event"),
        }
    }

    fn on_branch_attribute_changed(&self, e: &BranchAttributeChanged) {
        if !self.is_tracked(&e.repository, &e.branch_full_name) {
            return;
        }

        let status = self.config.status_attribute();
        if !e.attribute_name.eq_ignore_ascii_case(&status.name) {
            return;
        }

        if !e.attribute_value.eq_ignore_ascii_case(&status.resolved_value) {
            if self.queue.remove(&e.repository, &e.branch_id) {
                info!(branch = %e.branch_full_name, value = %e.attribute_value, "branch no longer resolved, dequeued");
            }
            return;
        }

        if self.queue.enqueue(e.branch()) {
            info!(branch = %e.branch_full_name, "branch resolved, queued");
        }
    }

    fn on_code_review_changed(&self, e: &CodeReviewChanged) {
        if !self.is_tracked(&e.repository, &e.branch_full_name) {
            return;
        }

        let review = e.review();
        let attribute_filter = self.config.attribute_filter_enabled();

        if review.is_deleted() {
            self.reviews.delete(&review.repository, &review.id);

            if !attribute_filter
                && self.reviews.get_by_branch(&e.repository, &e.branch_id).is_empty()
                && self.queue.remove(&e.repository, &e.branch_id)
            {
                info!(branch = %e.branch_full_name, "last review deleted, branch dequeued");
            }
            return;
        }

        self.reviews.upsert(review);

        if attribute_filter {
            return;
        }

        if self.queue.enqueue(e.branch()) {
            info!(branch = %e.branch_full_name, "review changed, branch queued");
        }
    }

    /// Repository matches and the local branch name carries the prefix
    fn is_tracked(&self, repository: &str, branch_full_name: &str) -> bool {
        if !repository.eq_ignore_ascii_case(&self.config.repository) {
            return false;
        }

        let prefix = &self.config.branch_prefix;
        if prefix.is_empty() {
            return true;
        }

        starts_with_ignore_case(local_branch_name(branch_full_name), prefix)
    }
}

/// Case-insensitive prefix test
pub fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.to_lowercase().starts_with(&prefix.to_lowercase())
}
