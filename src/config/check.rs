//! Configuration validation
//!
//! Every problem found is reported, one bullet per line, in a single
//! [`Error::Config`].

use super::{BotConfig, BranchLifecycle, CiConfig, IssueTrackerConfig, NotifierConfig, StatusProperty};
use crate::error::{Error, Result};

/// Validate a configuration, reporting every problem at once
pub fn check(config: &BotConfig) -> Result<()> {
    let problems = problems(config);
    if problems.is_empty() {
        return Ok(());
    }

    Err(Error::Config(format!(
        "mergebot can't start without specifying a valid config for the following fields:\n{}",
        problems.join("\n")
    )))
}

/// Every problem found in a configuration
pub fn problems(config: &BotConfig) -> Vec<String> {
    let mut problems = Vec::new();

    for (value, field) in [
        (&config.server, "server"),
        (&config.repository, "repository"),
        (
            &config.merge_to_attribute,
            "attribute name to specify merge destination branches",
        ),
        (&config.api_key, "user api key"),
    ] {
        if value.is_empty() {
            problems.push(field_error(field));
        }
    }

    problems.extend(check_lifecycle(&config.lifecycle));

    if let Some(issues) = &config.issues {
        problems.extend(check_issue_tracker(issues));
    }

    if let Some(ci) = &config.ci {
        problems.extend(check_ci(ci));
    }

    for notifier in &config.notifiers {
        problems.extend(check_notifier(notifier));
    }

    problems
}

/// Problems in the branch lifecycle section
pub fn check_lifecycle(lifecycle: &BranchLifecycle) -> Vec<String> {
    if !lifecycle.review_filter_enabled && !lifecycle.attribute_filter_enabled() {
        return vec![
            "* Either the 'Process reviewed branches only' or the 'Branch lifecycle configuration \
             with a status attribute' must be properly enabled in the 'Branch lifecycle' section."
                .to_string(),
        ];
    }

    check_status_property(
        &lifecycle.status_attribute,
        lifecycle.review_filter_enabled,
        "of the status attribute for Plastic config",
    )
}

fn check_issue_tracker(issues: &IssueTrackerConfig) -> Vec<String> {
    let mut problems = Vec::new();

    if issues.plug.is_empty() {
        problems.push(field_error("plug name for Issue Tracker config"));
    }

    if issues.title_field.is_empty() {
        problems.push(field_error("title field for Issue Tracker config"));
    }

    problems.extend(check_status_property(
        &issues.status_field,
        false,
        "of the status field for Issue Tracker config",
    ));
    problems
}

fn check_ci(ci: &CiConfig) -> Vec<String> {
    let mut problems = Vec::new();

    if ci.plug.is_empty() {
        problems.push(field_error("plug name for CI config"));
    }

    // the post-checkin plan is optional
    if ci.plan.is_empty() {
        problems.push(field_error("plan branch for CI config"));
    }

    problems
}

/// Problems in one notifier entry
pub fn check_notifier(notifier: &NotifierConfig) -> Vec<String> {
    let mut problems = Vec::new();

    if notifier.plug.is_empty() {
        problems.push(field_error(&format!(
            "plug name for Notifier '{}' config",
            notifier.name
        )));
    }

    if notifier.user_profile_field.is_empty() && notifier.fixed_recipients.is_empty() {
        problems.push(format!(
            "* There is no destination info in the Notifier '{}' config. Please specify a user \
             profile field, a list of recipients or both (recommended).",
            notifier.name
        ));
    }

    problems
}

/// With the review filter on, resolved and failed values may be left empty
fn check_status_property(
    status: &StatusProperty,
    review_filter_enabled: bool,
    group: &str,
) -> Vec<String> {
    let mut problems = Vec::new();

    if status.name.is_empty() {
        problems.push(field_error(&format!("name {group}")));
    }

    if status.resolved_value.is_empty() && !review_filter_enabled {
        problems.push(field_error(&format!("resolved value {group}")));
    }

    if status.failed_value.is_empty() && !review_filter_enabled {
        problems.push(field_error(&format!("failed value {group}")));
    }

    if status.merged_value.is_empty() {
        problems.push(field_error(&format!("merged value {group}")));
    }

    for (label, other) in [("merged", &status.merged_value), ("failed", &status.failed_value)] {
        if !status.resolved_value.is_empty()
            && !other.is_empty()
            && status.resolved_value.to_lowercase() == other.to_lowercase()
        {
            problems.push(format!(
                "The '{label}' attribute value: [{}] must be different than 'resolved' \
                 attribute value: [{other}] (case insensitive)",
                status.resolved_value
            ));
        }
    }

    problems
}

fn field_error(field: &str) -> String {
    format!("* The {field} must be defined.")
}
