//! Core types for the mergebot

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// A branch tracked by the bot.
///
/// Identity is `(repository, id)`. The full name can change between enqueue
/// and processing because branches may be renamed, so the worker re-resolves
/// it on dequeue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Branch {
    /// Repository the branch lives in
    pub repository: String,
    /// Server-side branch id
    pub id: String,
    /// Full path name (e.g. `/main/AST-001`)
    pub full_name: String,
    /// Branch owner, first notification recipient
    pub owner: String,
    /// Free-text branch comment
    pub comment: String,
}

impl Branch {
    /// Create a new branch record
    pub fn new(
        repository: impl Into<String>,
        id: impl Into<String>,
        full_name: impl Into<String>,
        owner: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            id: id.into(),
            full_name: full_name.into(),
            owner: owner.into(),
            comment: comment.into(),
        }
    }

    /// Local name of the branch (last path segment)
    pub fn local_name(&self) -> &str {
        local_branch_name(&self.full_name)
    }

    /// Whether this record has the same identity as `(repository, id)`
    pub fn is(&self, repository: &str, id: &str) -> bool {
        self.repository == repository && self.id == id
    }
}

/// Last path segment of a full branch name: `/main/AST-001` -> `AST-001`
pub fn local_branch_name(full_name: &str) -> &str {
    full_name.rsplit('/').next().unwrap_or(full_name)
}

/// Code review status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewStatus {
    /// Waiting for a reviewer
    Pending,
    /// Reviewer approved the changes
    Approved,
    /// Reviewer asked for rework
    Reworked,
    /// Reviewer rejected the changes
    Rejected,
    /// A reviewer is looking at it
    UnderReview,
    /// The review was removed; in change events this marks a deletion
    Discarded,
}

impl ReviewStatus {
    /// Server numeric id used when resetting a review to pending
    pub const PENDING_ID: i32 = 0;

    /// Parse a status name as sent by the server (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        match normalized.as_str() {
            "pending" => Some(Self::Pending),
            "approved" | "reviewed" => Some(Self::Approved),
            "reworked" | "rework-required" => Some(Self::Reworked),
            "rejected" => Some(Self::Rejected),
            "under-review" => Some(Self::UnderReview),
            "discarded" | "deleted" => Some(Self::Discarded),
            _ => None,
        }
    }

    /// Map a numeric status id from query results
    pub const fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::Pending),
            1 => Some(Self::Approved),
            2 => Some(Self::Reworked),
            _ => None,
        }
    }

    /// Interpret a status from events or query results, which carry either
    /// a numeric id or a name. Unknown values count as pending.
    pub fn from_wire(value: &str) -> Self {
        let status = value
            .trim()
            .parse::<i32>()
            .map_or_else(|_| Self::parse(value), Self::from_id);

        status.unwrap_or_else(|| {
            warn!(status = value, "unknown review status, treating it as pending");
            Self::Pending
        })
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Reworked => write!(f, "reworked"),
            Self::Rejected => write!(f, "rejected"),
            Self::UnderReview => write!(f, "under-review"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

/// A code review targeting a branch.
///
/// Identity is `(repository, id)`; several reviews may target one branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Review {
    /// Repository the review lives in
    pub repository: String,
    /// Review id
    pub id: String,
    /// Id of the reviewed branch
    pub branch_id: String,
    /// Current status
    pub status: ReviewStatus,
    /// Review title
    pub title: String,
}

impl Review {
    /// Create a new review record
    pub fn new(
        repository: impl Into<String>,
        id: impl Into<String>,
        branch_id: impl Into<String>,
        status: ReviewStatus,
        title: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            id: id.into(),
            branch_id: branch_id.into(),
            status,
            title: title.into(),
        }
    }

    /// Whether the review is approved
    pub fn is_approved(&self) -> bool {
        self.status == ReviewStatus::Approved
    }

    /// Whether this review record represents a deletion
    pub fn is_deleted(&self) -> bool {
        self.status == ReviewStatus::Discarded
    }
}

// =============================================================================
// Server models
// =============================================================================

/// Branch as returned by the server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BranchModel {
    /// Numeric branch id
    pub id: i64,
    /// Full branch name
    pub name: String,
    /// Repository id
    pub repository_id: String,
    /// Head changeset id
    pub head_changeset: i64,
    /// Owner
    pub owner: String,
}

/// Changeset as returned by the server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangesetModel {
    /// Changeset number
    pub changeset_id: i64,
    /// Changeset guid
    pub guid: String,
    /// Author
    pub owner: String,
    /// Branch the changeset belongs to
    pub branch: String,
}

/// Server-reported outcome of a merge-to request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeToStatus {
    /// Merge (or shelve, or checkin) done
    #[serde(rename = "OK")]
    Ok,
    /// Source already merged into destination
    MergeNotNeeded,
    /// No common ancestor found
    AncestorNotFound,
    /// Merge has conflicts the server cannot resolve
    Conflicts,
    /// Generic failure
    Error,
    /// Destination head moved since the shelve was created
    DestinationChanges,
}

impl fmt::Display for MergeToStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::MergeNotNeeded => write!(f, "MergeNotNeeded"),
            Self::AncestorNotFound => write!(f, "AncestorNotFound"),
            Self::Conflicts => write!(f, "Conflicts"),
            Self::Error => write!(f, "Error"),
            Self::DestinationChanges => write!(f, "DestinationChanges"),
        }
    }
}

/// What a merge-to request merges from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeSource {
    /// A branch, by full name
    Branch(String),
    /// A previously created shelve, by id
    Shelve(i64),
}

/// Merge-to request payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeToRequest {
    /// Merge source
    pub source: MergeSource,
    /// Destination branch name
    pub destination: String,
    /// Checkin comment
    pub comment: String,
    /// Only create a shelve holding the merge result
    pub create_shelve: bool,
    /// Fail with `DestinationChanges` if the destination head moved
    pub ensure_no_dst_changes: bool,
}

/// Merge-to response payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeToResponse {
    /// Outcome
    pub status: MergeToStatus,
    /// Server message (diagnostic on failure)
    #[serde(default)]
    pub message: String,
    /// Shelve id (shelve requests) or changeset id (checkins); zero when none
    #[serde(default)]
    pub changeset_number: i64,
}

/// CI plan status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanStatus {
    /// The plan execution ended
    pub is_finished: bool,
    /// The plan execution succeeded
    pub succeeded: bool,
    /// Free-text explanation from the CI system
    pub explanation: String,
}

/// CI plan launch payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchPlanRequest {
    /// Object to build (`sh:<id>@<repspec>` or `cs:<id>@<repspec>`)
    pub object_spec: String,
    /// Launch comment
    pub comment: String,
    /// Build properties
    pub properties: BTreeMap<String, String>,
}

/// One row of a field-projected find query
pub type FindRow = serde_json::Map<String, serde_json::Value>;

/// Read a field from a find row as a string (empty when missing)
pub fn row_field(row: &FindRow, field: &str) -> String {
    match row.get(field) {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
