//! Merge orchestration: shelve, checkin and cleanup
//!
//! A processing attempt first merges the source branch into a shelve per
//! destination, then (after the shelves built) checks each shelve in. Both
//! steps visit every destination and accumulate outcomes instead of stopping
//! at the first failure. Shelves are always deleted at the end of the attempt
//! with [`safe_delete_shelves`].

mod report;

pub use report::{MergeReport, ReportProperty};

use crate::api::MergebotApi;
use crate::error::Result;
use crate::types::{Branch, MergeSource, MergeToRequest, MergeToStatus};
use tracing::{debug, info, warn};

/// Outcome of merging the source branch into a shelve for one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShelveOutcome {
    /// The destination already contains the branch
    NotNeeded(String),
    /// Merge result stored in this shelve
    Shelved(i64),
    /// Merge failed with this diagnostic
    Failed(String),
}

/// Per-destination shelve outcomes, in destination order
#[derive(Debug, Clone, Default)]
pub struct ShelveResult {
    outcomes: Vec<(String, ShelveOutcome)>,
}

impl ShelveResult {
    /// Record the outcome for a destination
    pub fn push(&mut self, destination: impl Into<String>, outcome: ShelveOutcome) {
        self.outcomes.push((destination.into(), outcome));
    }

    /// Every outcome, in destination order
    pub fn outcomes(&self) -> &[(String, ShelveOutcome)] {
        &self.outcomes
    }

    /// `(destination, shelve id)` for every shelve created
    pub fn shelves(&self) -> Vec<(&str, i64)> {
        self.outcomes
            .iter()
            .filter_map(|(dst, outcome)| match outcome {
                ShelveOutcome::Shelved(id) => Some((dst.as_str(), *id)),
                _ => None,
            })
            .collect()
    }

    /// Destinations that got a shelve
    pub fn shelve_destinations(&self) -> Vec<&str> {
        self.shelves().into_iter().map(|(dst, _)| dst).collect()
    }

    /// Failure diagnostics
    pub fn errors(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                ShelveOutcome::Failed(msg) => Some(msg.as_str()),
                _ => None,
            })
            .collect()
    }

    /// "Already merged" notices
    pub fn not_needed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                ShelveOutcome::NotNeeded(msg) => Some(msg.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether any destination failed
    pub fn has_errors(&self) -> bool {
        !self.errors().is_empty()
    }

    /// Whether every destination was already merged
    pub fn all_not_needed(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, ShelveOutcome::NotNeeded(_)))
    }
}

/// Outcome of checking in one shelve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckinOutcome {
    /// Checked in as this changeset
    Succeeded(i64),
    /// The destination moved while the branch was being processed
    DestinationChanged(String),
    /// Checkin failed with this diagnostic
    Failed(String),
}

/// Per-destination checkin outcomes, in destination order
#[derive(Debug, Clone, Default)]
pub struct CheckinResult {
    outcomes: Vec<(String, CheckinOutcome)>,
}

impl CheckinResult {
    /// Record the outcome for a destination
    pub fn push(&mut self, destination: impl Into<String>, outcome: CheckinOutcome) {
        self.outcomes.push((destination.into(), outcome));
    }

    /// `(destination, changeset)` for every successful checkin
    pub fn changesets(&self) -> Vec<(&str, i64)> {
        self.outcomes
            .iter()
            .filter_map(|(dst, outcome)| match outcome {
                CheckinOutcome::Succeeded(cs) => Some((dst.as_str(), *cs)),
                _ => None,
            })
            .collect()
    }

    /// Hard failure diagnostics
    pub fn errors(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                CheckinOutcome::Failed(msg) => Some(msg.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Destination-changed diagnostics
    pub fn warnings(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                CheckinOutcome::DestinationChanged(msg) => Some(msg.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Checkin comment for merging `source` into `destination`
pub fn merge_comment(bot_name: &str, source: &str, task_title: Option<&str>, destination: &str) -> String {
    match task_title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => format!("Mergebot [{bot_name}]: Merged [{source} - {title}] to [{destination}]"),
        None => format!("Mergebot [{bot_name}]: Merged [{source}] to [{destination}]"),
    }
}

/// Merge `branch` into a shelve for every destination.
///
/// Outcomes are appended to `result` as they happen, so shelves created
/// before a transport error are still known to the caller for cleanup.
pub async fn try_merge_to_shelves(
    api: &dyn MergebotApi,
    bot_name: &str,
    branch: &Branch,
    task_title: Option<&str>,
    destinations: &[String],
    report: &mut MergeReport,
    result: &mut ShelveResult,
) -> Result<()> {
    for destination in destinations {
        let request = MergeToRequest {
            source: MergeSource::Branch(branch.full_name.clone()),
            destination: destination.clone(),
            comment: merge_comment(bot_name, &branch.full_name, task_title, destination),
            create_shelve: true,
            ensure_no_dst_changes: false,
        };

        debug!(branch = %branch.full_name, destination, "merging to shelve");
        let response = api.merge_to(&branch.repository, &request).await?;

        if response.status == MergeToStatus::MergeNotNeeded {
            info!(branch = %branch.full_name, destination, "merge not needed");
            result.push(
                destination,
                ShelveOutcome::NotNeeded(format!(
                    "Branch [{}] was already merged to [{destination}] (No merge needed).",
                    branch.full_name
                )),
            );
            continue;
        }

        if is_failed_merge(response.status, response.changeset_number) {
            warn!(
                branch = %branch.full_name,
                destination,
                status = %response.status,
                message = %response.message,
                "merge to shelve failed"
            );
            report.add_failed_merge(destination, response.status, &response.message);
            result.push(
                destination,
                ShelveOutcome::Failed(format!(
                    "Can't merge branch [{}] to [{destination}]. Reason: {}.",
                    branch.full_name, response.message
                )),
            );
            continue;
        }

        info!(
            branch = %branch.full_name,
            destination,
            shelve = response.changeset_number,
            "created merge shelve"
        );
        report.add_succeeded_merge(destination);
        result.push(destination, ShelveOutcome::Shelved(response.changeset_number));
    }

    Ok(())
}

/// Check in every shelve, requiring the destination head to be unchanged
pub async fn try_apply_shelves(
    api: &dyn MergebotApi,
    bot_name: &str,
    branch: &Branch,
    task_title: Option<&str>,
    destinations: &[String],
    shelves: &ShelveResult,
    report: &mut MergeReport,
) -> Result<CheckinResult> {
    let mut result = CheckinResult::default();
    let shelves = shelves.shelves();

    for destination in destinations {
        let Some(&(_, shelve_id)) = shelves.iter().find(|(dst, _)| *dst == destination.as_str())
        else {
            continue;
        };

        let request = MergeToRequest {
            source: MergeSource::Shelve(shelve_id),
            destination: destination.clone(),
            comment: merge_comment(bot_name, &branch.full_name, task_title, destination),
            create_shelve: false,
            ensure_no_dst_changes: true,
        };

        debug!(branch = %branch.full_name, destination, shelve_id, "checking in shelve");
        let response = api.merge_to(&branch.repository, &request).await?;
        report.update_merge(destination, response.status, response.changeset_number);

        let outcome = match response.status {
            MergeToStatus::Ok => {
                info!(destination, changeset = response.changeset_number, "checked in shelve");
                CheckinOutcome::Succeeded(response.changeset_number)
            }
            MergeToStatus::DestinationChanges => {
                warn!(destination, shelve_id, "destination changed during processing");
                CheckinOutcome::DestinationChanged(format!(
                    "Can't checkin shelve [{shelve_id}], the resulting shelve from merging branch \
                     [{src}] to [{destination}]. Reason: new changesets appeared in destination \
                     branch while mergebot {bot_name} was processing the merge from [{src}] to \
                     [{destination}].\n{}",
                    response.message,
                    src = branch.full_name,
                ))
            }
            status => {
                warn!(destination, shelve_id, %status, message = %response.message, "checkin failed");
                CheckinOutcome::Failed(format!(
                    "Can't checkin shelve [{shelve_id}], the resulting shelve from merging branch \
                     [{}] to [{destination}]. Reason: {}",
                    branch.full_name, response.message
                ))
            }
        };
        result.push(destination, outcome);
    }

    Ok(result)
}

/// Delete every shelve of the attempt, logging failures and carrying on
pub async fn safe_delete_shelves(api: &dyn MergebotApi, repository: &str, shelves: &ShelveResult) {
    for (_, shelve_id) in shelves.shelves() {
        match api.delete_shelve(repository, shelve_id).await {
            Ok(()) => debug!(shelve_id, "deleted shelve"),
            Err(e) => warn!(
                "Unable to delete shelve {shelve_id} on repository '{repository}': {e}"
            ),
        }
    }
}

const fn is_failed_merge(status: MergeToStatus, changeset_number: i64) -> bool {
    matches!(
        status,
        MergeToStatus::AncestorNotFound | MergeToStatus::Conflicts | MergeToStatus::Error
    ) || changeset_number == 0
}
