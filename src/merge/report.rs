//! Merge telemetry uploaded after every processing attempt

use crate::types::{BranchModel, MergeToStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

const TASK_TITLE: &str = "taskTitle";
const TASK_URL: &str = "taskUrl";
const BUILD_TIME: &str = "buildTimeMs";
const UNEXPECTED_ERROR: &str = "unexpectedError";

/// One name/value entry of a merge report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportProperty {
    /// Property name
    pub name: String,
    /// Property value
    pub value: String,
}

/// What happened while processing one branch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// When processing started
    pub timestamp: DateTime<Utc>,
    /// Repository id of the source branch
    pub repository_id: String,
    /// Source branch id
    pub branch_id: i64,
    /// Ordered properties; setting an existing name replaces its value
    pub properties: Vec<ReportProperty>,
}

impl MergeReport {
    /// Start a report for the source branch
    pub fn new(branch: &BranchModel) -> Self {
        Self {
            timestamp: Utc::now(),
            repository_id: branch.repository_id.clone(),
            branch_id: branch.id,
            properties: Vec::new(),
        }
    }

    /// Value of a property, if set
    pub fn get(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Set a property, replacing the value if the name is already present
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => self.properties.push(ReportProperty { name, value }),
        }
    }

    /// Record the issue title and URL
    pub fn set_issue(&mut self, title: &str, url: &str) {
        self.set(TASK_TITLE, title);
        self.set(TASK_URL, url);
    }

    /// Record a shelve created for `destination`
    pub fn add_succeeded_merge(&mut self, destination: &str) {
        self.set(merge_property(destination), MergeToStatus::Ok.to_string());
    }

    /// Record a shelve merge that failed for `destination`
    pub fn add_failed_merge(&mut self, destination: &str, status: MergeToStatus, message: &str) {
        self.set(merge_property(destination), format!("{status}: {message}"));
    }

    /// Record the checkin outcome for `destination`
    pub fn update_merge(&mut self, destination: &str, status: MergeToStatus, changeset: i64) {
        self.set(merge_property(destination), status.to_string());
        if changeset > 0 {
            self.set(format!("changeset.{destination}"), changeset.to_string());
        }
    }

    /// Record how long a build stage took
    pub fn add_build_time(&mut self, millis: u128) {
        self.set(BUILD_TIME, millis.to_string());
    }

    /// Record a build plan that passed
    pub fn add_succeeded_build(&mut self, plan: &str) {
        self.set(build_property(plan), "ok");
    }

    /// Record a build plan that failed
    pub fn add_failed_build(&mut self, plan: &str, message: &str) {
        self.set(build_property(plan), format!("failed: {message}"));
    }

    /// Record an unexpected fault
    pub fn set_unexpected_error(&mut self, message: &str) {
        self.set(UNEXPECTED_ERROR, message);
    }
}

fn merge_property(destination: &str) -> String {
    format!("merge.{destination}")
}

fn build_property(plan: &str) -> String {
    format!("build.{plan}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> MergeReport {
        MergeReport::new(&BranchModel {
            id: 12,
            name: "/main/AST-1".to_string(),
            repository_id: "repo-3".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_checkin_overwrites_shelve_status() {
        let mut report = report();
        report.add_succeeded_merge("/main");
        report.update_merge("/main", MergeToStatus::DestinationChanges, 0);
        assert_eq!(report.get("merge./main"), Some("DestinationChanges"));
        assert_eq!(report.get("changeset./main"), None);

        report.update_merge("/main", MergeToStatus::Ok, 77);
        assert_eq!(report.get("merge./main"), Some("OK"));
        assert_eq!(report.get("changeset./main"), Some("77"));
        assert_eq!(report.properties.len(), 2);
    }

    #[test]
    fn test_serialized_shape() {
        let mut report = report();
        report.add_failed_merge("/main", MergeToStatus::Conflicts, "two heads");
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["repositoryId"], "repo-3");
        assert_eq!(json["branchId"], 12);
        assert_eq!(json["properties"][0]["name"], "merge./main");
        assert_eq!(json["properties"][0]["value"], "Conflicts: two heads");
    }
}
