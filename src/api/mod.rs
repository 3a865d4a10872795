//! Server, CI, issue tracker and notifier capabilities
//!
//! Everything the bot needs from the outside world goes through
//! [`MergebotApi`], so the processing logic works the same against the REST
//! client or a test double.

pub mod find;
mod rest;

pub use rest::RestApi;

use crate::error::Result;
use crate::merge::MergeReport;
use crate::types::{
    BranchModel, ChangesetModel, FindRow, LaunchPlanRequest, MergeToRequest, MergeToResponse,
    PlanStatus,
};
use async_trait::async_trait;

/// Capability trait for every collaborator the bot talks to
///
/// Repository-scoped calls take the repository name explicitly; branch names
/// are full names (a leading `/` is accepted).
#[async_trait]
pub trait MergebotApi: Send + Sync {
    // =========================================================================
    // Branches and changesets
    // =========================================================================

    /// Get a branch by full name
    async fn get_branch(&self, repo: &str, branch: &str) -> Result<BranchModel>;

    /// Get a changeset by number
    async fn get_changeset(&self, repo: &str, changeset_id: i64) -> Result<ChangesetModel>;

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Read the value of an attribute applied to a branch
    async fn get_branch_attribute(&self, repo: &str, branch: &str, attribute: &str)
    -> Result<String>;

    /// Set the value of an attribute applied to a branch
    async fn change_branch_attribute(
        &self,
        repo: &str,
        branch: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()>;

    /// Create an attribute type in the repository
    async fn create_attribute(&self, repo: &str, name: &str, comment: &str) -> Result<bool>;

    // =========================================================================
    // Merging
    // =========================================================================

    /// Merge a branch or a shelve into a destination branch
    async fn merge_to(&self, repo: &str, request: &MergeToRequest) -> Result<MergeToResponse>;

    /// Whether merging `source` into `destination` is currently allowed
    async fn is_merge_allowed(&self, repo: &str, source: &str, destination: &str) -> Result<bool>;

    /// Delete a shelve
    async fn delete_shelve(&self, repo: &str, shelve_id: i64) -> Result<()>;

    // =========================================================================
    // Queries
    // =========================================================================

    /// Run a find query, projecting the given fields
    async fn find(
        &self,
        repo: &str,
        query: &str,
        date_format: &str,
        fields: &[&str],
    ) -> Result<Vec<FindRow>>;

    /// Find branches joined with the reviews targeting them
    async fn find_branches_with_reviews(
        &self,
        repo: &str,
        review_conditions: &str,
        branch_conditions: &str,
        date_format: &str,
        fields: &[&str],
    ) -> Result<Vec<FindRow>>;

    // =========================================================================
    // Code reviews, users and telemetry
    // =========================================================================

    /// Update a code review's status (numeric id) and title
    async fn update_review(&self, repo: &str, review_id: &str, status: i32, title: &str)
    -> Result<()>;

    /// Get a user's profile as raw JSON
    async fn get_user_profile(&self, user: &str) -> Result<serde_json::Value>;

    /// Upload a merge report for this bot
    async fn report_merge(&self, bot_name: &str, report: &MergeReport) -> Result<()>;

    // =========================================================================
    // Issue tracker
    // =========================================================================

    /// Whether the issue tracker plug can reach its backend
    async fn is_issue_tracker_connected(&self, plug: &str) -> Result<bool>;

    /// Read a field of an issue
    async fn get_issue_field(
        &self,
        plug: &str,
        project_key: &str,
        task: &str,
        field: &str,
    ) -> Result<String>;

    /// Set a field of an issue
    async fn set_issue_field(
        &self,
        plug: &str,
        project_key: &str,
        task: &str,
        field: &str,
        value: &str,
    ) -> Result<()>;

    /// Get the web URL of an issue
    async fn get_issue_url(&self, plug: &str, project_key: &str, task: &str) -> Result<String>;

    // =========================================================================
    // Notifications and CI
    // =========================================================================

    /// Send a message through a notifier plug
    async fn notify_message(&self, notifier: &str, message: &str, recipients: &[String])
    -> Result<()>;

    /// Launch a CI plan, returning the execution id
    async fn launch_plan(&self, ci: &str, plan: &str, request: &LaunchPlanRequest)
    -> Result<String>;

    /// Poll the status of a CI plan execution
    async fn get_plan_status(&self, ci: &str, execution_id: &str, plan: &str)
    -> Result<PlanStatus>;
}
