//! Bot configuration
//!
//! The JSON configuration file is read once at startup, normalized into a
//! [`BotConfig`] and validated by [`check`]. The processor only ever sees the
//! validated value.

pub mod check;

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default issue tracker project key
pub const DEFAULT_PROJECT_KEY: &str = "default_proj";

/// Lifecycle values of a status attribute (or issue status field)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusProperty {
    /// Attribute or field name
    pub name: String,
    /// Value marking the branch ready to merge
    pub resolved_value: String,
    /// Value set while building
    pub testing_value: String,
    /// Value set on failure
    pub failed_value: String,
    /// Value set once merged
    pub merged_value: String,
}

/// How the bot decides a branch is ready
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchLifecycle {
    /// Only process branches whose reviews are all approved
    pub review_filter_enabled: bool,
    /// Branch status attribute
    pub status_attribute: StatusProperty,
}

impl BranchLifecycle {
    /// Whether branches are picked up by their status attribute
    pub fn attribute_filter_enabled(&self) -> bool {
        !self.status_attribute.name.trim().is_empty()
            && !self.status_attribute.resolved_value.trim().is_empty()
    }
}

/// Issue tracker settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueTrackerConfig {
    /// Issue tracker plug name
    pub plug: String,
    /// Project key issues live under
    pub project_key: String,
    /// Field holding the issue title
    pub title_field: String,
    /// Issue status field lifecycle
    pub status_field: StatusProperty,
}

/// CI settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiConfig {
    /// CI plug name
    pub plug: String,
    /// Plan run on the merge shelves before checkin
    pub plan: String,
    /// Plan run on the merged changesets after checkin (may be empty)
    pub plan_after_checkin: String,
}

impl CiConfig {
    /// The post-checkin plan, if one is configured
    pub fn post_checkin_plan(&self) -> Option<&str> {
        let plan = self.plan_after_checkin.trim();
        (!plan.is_empty()).then_some(plan)
    }
}

/// A notification channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Name of the entry in the configuration
    pub name: String,
    /// Notifier plug name
    pub plug: String,
    /// Dot path into the user profile holding the notifier address
    pub user_profile_field: String,
    /// Recipients added to every message
    pub fixed_recipients: Vec<String>,
}

/// Validated bot configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    /// Server address
    pub server: String,
    /// Repository the bot watches
    pub repository: String,
    /// Local branch name prefix (may be empty)
    pub branch_prefix: String,
    /// Branch attribute listing merge destinations
    pub merge_to_attribute: String,
    /// API key of the bot user
    pub api_key: String,
    /// Readiness settings
    pub lifecycle: BranchLifecycle,
    /// Issue tracker, if any
    pub issues: Option<IssueTrackerConfig>,
    /// CI, if any
    pub ci: Option<CiConfig>,
    /// Notification channels
    pub notifiers: Vec<NotifierConfig>,
}

impl BotConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate a configuration document
    pub fn from_json(content: &str) -> Result<Self> {
        let config = Self::parse(content)?;
        check::check(&config)?;
        Ok(config)
    }

    /// Parse and normalize a configuration document without validating it
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("malformed configuration: {e}")))?;
        raw.normalize()
    }

    /// Whether branches are picked up by their status attribute
    pub fn attribute_filter_enabled(&self) -> bool {
        self.lifecycle.attribute_filter_enabled()
    }

    /// Whether branches must have every review approved
    pub fn review_filter_enabled(&self) -> bool {
        self.lifecycle.review_filter_enabled
    }

    /// The branch status attribute
    pub fn status_attribute(&self) -> &StatusProperty {
        &self.lifecycle.status_attribute
    }
}

/// Delays used by the worker and the build orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Interval between CI plan status polls
    pub build_poll_interval: Duration,
    /// Give up waiting for a CI plan after this long
    pub build_timeout: Duration,
    /// Pause after a branch is not ready
    pub not_ready_backoff: Duration,
    /// Bounded wait of an empty queue before re-checking
    pub dequeue_poll: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            build_poll_interval: Duration::from_secs(5),
            build_timeout: Duration::from_secs(4 * 60 * 60),
            not_ready_backoff: Duration::from_secs(5),
            dequeue_poll: Duration::from_secs(1),
        }
    }
}

/// Split a `;`/`,` separated list, trimming entries and dropping empty ones
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

// =============================================================================
// Raw file format
// =============================================================================

#[derive(Deserialize)]
struct RawConfig {
    server: Option<String>,
    repository: Option<String>,
    branch_prefix: Option<String>,
    merge_to_branches_attr_name: Option<String>,
    bot_user: Option<String>,
    plastic_group: Option<RawPlastic>,
    issues_group: Option<RawIssues>,
    ci_group: Option<RawCi>,
    notifier_group: Option<BTreeMap<String, RawNotifier>>,
}

#[derive(Deserialize)]
struct RawPlastic {
    code_review_group: Option<RawCodeReview>,
    status_attribute_group: Option<RawStatus>,
}

#[derive(Deserialize)]
struct RawCodeReview {
    is_enabled: Option<RawFlag>,
}

/// `true`/`false` or `"yes"`/`"no"`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawFlag {
    Bool(bool),
    Text(String),
}

#[derive(Deserialize, Default)]
struct RawStatus {
    name: Option<String>,
    resolved_value: Option<String>,
    testing_value: Option<String>,
    failed_value: Option<String>,
    merged_value: Option<String>,
}

#[derive(Deserialize)]
struct RawIssues {
    plug: Option<String>,
    project_key: Option<String>,
    title_field: Option<String>,
    status_field_group: Option<RawStatus>,
}

#[derive(Deserialize)]
struct RawCi {
    plug: Option<String>,
    plan: Option<String>,
    #[serde(rename = "planAfterCheckin")]
    plan_after_checkin: Option<String>,
}

#[derive(Deserialize)]
struct RawNotifier {
    plug: Option<String>,
    user_profile_field: Option<String>,
    fixed_recipients: Option<String>,
}

impl RawFlag {
    fn to_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(value) => Ok(*value),
            Self::Text(text) if text.eq_ignore_ascii_case("yes") => Ok(true),
            Self::Text(text) if text.eq_ignore_ascii_case("no") => Ok(false),
            Self::Text(text) => Err(Error::Config(format!("Value {text} is not supported"))),
        }
    }
}

impl From<RawStatus> for StatusProperty {
    fn from(raw: RawStatus) -> Self {
        Self {
            name: raw.name.unwrap_or_default(),
            resolved_value: raw.resolved_value.unwrap_or_default(),
            testing_value: raw.testing_value.unwrap_or_default(),
            failed_value: raw.failed_value.unwrap_or_default(),
            merged_value: raw.merged_value.unwrap_or_default(),
        }
    }
}

/// Missing and empty plugs both mean "not configured"
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl RawConfig {
    fn normalize(self) -> Result<BotConfig> {
        let lifecycle = match self.plastic_group {
            Some(plastic) => BranchLifecycle {
                review_filter_enabled: match plastic.code_review_group.and_then(|g| g.is_enabled) {
                    Some(flag) => flag.to_bool()?,
                    None => false,
                },
                status_attribute: plastic.status_attribute_group.unwrap_or_default().into(),
            },
            None => BranchLifecycle::default(),
        };

        let issues = self.issues_group.and_then(|raw| {
            non_empty(raw.plug).map(|plug| IssueTrackerConfig {
                plug,
                project_key: non_empty(raw.project_key)
                    .unwrap_or_else(|| DEFAULT_PROJECT_KEY.to_string()),
                title_field: raw.title_field.unwrap_or_default(),
                status_field: raw.status_field_group.unwrap_or_default().into(),
            })
        });

        let ci = self.ci_group.and_then(|raw| {
            non_empty(raw.plug).map(|plug| CiConfig {
                plug,
                plan: raw.plan.unwrap_or_default(),
                plan_after_checkin: raw.plan_after_checkin.unwrap_or_default(),
            })
        });

        let notifiers = self
            .notifier_group
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, raw)| {
                non_empty(raw.plug).map(|plug| NotifierConfig {
                    name,
                    plug,
                    user_profile_field: raw.user_profile_field.unwrap_or_default(),
                    fixed_recipients: split_list(&raw.fixed_recipients.unwrap_or_default()),
                })
            })
            .collect();

        Ok(BotConfig {
            server: self.server.unwrap_or_default(),
            repository: self.repository.unwrap_or_default(),
            branch_prefix: self.branch_prefix.unwrap_or_default(),
            merge_to_attribute: self.merge_to_branches_attr_name.unwrap_or_default(),
            api_key: self.bot_user.unwrap_or_default(),
            lifecycle,
            issues,
            ci,
            notifiers,
        })
    }
}
