//! Shared test utilities

#![allow(dead_code)]

mod mock_api;

pub use mock_api::{
    AttributeChange, IssueFieldChange, LaunchCall, MockMergebotApi, Notification,
};

use mergebot::config::{
    BotConfig, BranchLifecycle, CiConfig, IssueTrackerConfig, NotifierConfig, StatusProperty,
    Timings,
};
use mergebot::types::{Branch, FindRow};
use std::time::Duration;

/// Repository used throughout the tests
pub const REPO: &str = "assets";

/// Server used throughout the tests
pub const SERVER: &str = "localhost:8084";

/// Status attribute lifecycle used throughout the tests
pub fn status_attribute() -> StatusProperty {
    StatusProperty {
        name: "status".to_string(),
        resolved_value: "resolved".to_string(),
        testing_value: "testing".to_string(),
        failed_value: "failed".to_string(),
        merged_value: "merged".to_string(),
    }
}

/// Attribute-filtered config with CI (pre and post plans) and one notifier
pub fn bot_config() -> BotConfig {
    BotConfig {
        server: SERVER.to_string(),
        repository: REPO.to_string(),
        branch_prefix: "AST-".to_string(),
        merge_to_attribute: "target".to_string(),
        api_key: "key".to_string(),
        lifecycle: BranchLifecycle {
            review_filter_enabled: false,
            status_attribute: status_attribute(),
        },
        issues: None,
        ci: Some(CiConfig {
            plug: "jenkins".to_string(),
            plan: "debug".to_string(),
            plan_after_checkin: "release".to_string(),
        }),
        notifiers: vec![NotifierConfig {
            name: "notifier1".to_string(),
            plug: "email".to_string(),
            user_profile_field: String::new(),
            fixed_recipients: vec!["lead".to_string()],
        }],
    }
}

/// Issue tracker settings whose resolved status is `validated`
pub fn issue_tracker() -> IssueTrackerConfig {
    IssueTrackerConfig {
        plug: "tts".to_string(),
        project_key: "AST".to_string(),
        title_field: "title".to_string(),
        status_field: StatusProperty {
            name: "state".to_string(),
            resolved_value: "validated".to_string(),
            testing_value: "testing".to_string(),
            failed_value: "open".to_string(),
            merged_value: "closed".to_string(),
        },
    }
}

/// Timings small enough for tests
pub fn fast_timings() -> Timings {
    Timings {
        build_poll_interval: Duration::from_millis(1),
        build_timeout: Duration::from_millis(20),
        not_ready_backoff: Duration::from_millis(1),
        dequeue_poll: Duration::from_millis(5),
    }
}

/// The branch `/main/AST-001` with id 1
pub fn task_branch() -> Branch {
    Branch::new(REPO, "1", "/main/AST-001", "pixi", "branch comment")
}

/// Register the task branch and destinations, pointing the merge-to
/// attribute at the destinations
pub fn setup_merge(api: &MockMergebotApi, destinations: &[&str]) {
    api.add_branch("/main/AST-001", 1);
    for (i, destination) in destinations.iter().enumerate() {
        api.add_branch(destination, 100 + i64::try_from(i).unwrap());
    }
    api.set_attribute("/main/AST-001", "target", &destinations.join(", "));
}

/// Build a find row from JSON
pub fn row(json: &str) -> FindRow {
    serde_json::from_str(json).unwrap()
}
