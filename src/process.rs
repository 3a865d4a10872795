//! Branch processor: drives one dequeued branch to a terminal outcome
//!
//! The steps, in order:
//!
//! 1. Derive the task number from the branch name
//! 2. Check readiness (reviews, issue tracker), silently retrying if unmet
//! 3. Resolve and validate the destination branches
//! 4. Merge into a shelve per destination
//! 5. Build the shelves (pre-checkin stage)
//! 6. Check the shelves in
//! 7. Build the resulting changesets (post-checkin stage)
//!
//! Whatever happens, the merge report is uploaded and every shelve created
//! during the attempt is deleted before [`BranchProcessor::process`] returns.

use crate::api::MergebotApi;
use crate::build::{self, BuildStage, BuildTask};
use crate::config::{BotConfig, Timings, split_list};
use crate::error::{Error, Result};
use crate::events::starts_with_ignore_case;
use crate::merge::{self, CheckinResult, MergeReport, ShelveResult};
use crate::notify::notify_task_status;
use crate::status::StatusUpdater;
use crate::storage::ReviewStore;
use crate::types::{Branch, local_branch_name};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Terminal classification of one processing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Merged (and built, if configured)
    Ok,
    /// Gave up on the branch; its status says why
    Failed,
    /// Not ready yet; the branch must be queued again
    NotReady,
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Failed => write!(f, "failed"),
            Self::NotReady => write!(f, "not ready"),
        }
    }
}

/// State that must survive an early exit so it can be cleaned up
#[derive(Default)]
struct Attempt {
    report: Option<MergeReport>,
    shelves: ShelveResult,
}

/// Runs the processing state machine for one branch at a time
pub struct BranchProcessor {
    api: Arc<dyn MergebotApi>,
    config: Arc<BotConfig>,
    reviews: Arc<ReviewStore>,
    bot_name: String,
    timings: Timings,
}

impl BranchProcessor {
    /// Create a processor
    pub fn new(
        api: Arc<dyn MergebotApi>,
        config: Arc<BotConfig>,
        reviews: Arc<ReviewStore>,
        bot_name: impl Into<String>,
        timings: Timings,
    ) -> Self {
        Self {
            api,
            config,
            reviews,
            bot_name: bot_name.into(),
            timings,
        }
    }

    /// Process a branch. Never fails: unexpected errors become
    /// [`ProcessOutcome::Failed`].
    pub async fn process(&self, branch: &Branch) -> ProcessOutcome {
        info!(branch = %branch.full_name, id = %branch.id, "processing branch");

        let mut attempt = Attempt::default();
        let task = task_number(&branch.full_name, &self.config.branch_prefix);

        let outcome = match self.try_process(branch, task.as_deref(), &mut attempt).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let task = task.as_deref().unwrap_or_default();
                self.fail_unexpectedly(branch, task, &mut attempt, &e).await
            }
        };

        if let Some(report) = &attempt.report {
            self.report_merge(branch, report).await;
        }
        merge::safe_delete_shelves(self.api(), &branch.repository, &attempt.shelves).await;

        info!(branch = %branch.full_name, %outcome, "finished processing branch");
        outcome
    }

    async fn try_process(
        &self,
        branch: &Branch,
        task: Option<&str>,
        attempt: &mut Attempt,
    ) -> Result<ProcessOutcome> {
        let Some(task) = task else {
            debug!(branch = %branch.full_name, prefix = %self.config.branch_prefix, "branch name does not match prefix");
            return Ok(ProcessOutcome::NotReady);
        };

        if !self.is_task_ready(branch, task).await? {
            debug!(branch = %branch.full_name, task, "task is not ready");
            return Ok(ProcessOutcome::NotReady);
        }

        let status = self.status();
        let attribute = &self.config.merge_to_attribute;
        let failed_value = &self.config.status_attribute().failed_value;
        let spec = self.branch_spec(&branch.full_name);

        let destinations = self.destinations(branch).await;
        if destinations.is_empty() {
            let change = status.set_failed(branch, task).await;
            let message = format!(
                "The attribute [{attribute}] of branch [{spec}] is not properly set. \
                 Branch [{spec}] status will be set as 'failed': [{failed_value}]."
            );
            self.notify(branch, &change.append_to(message)).await;
            return Ok(ProcessOutcome::Failed);
        }

        for destination in &destinations {
            if self.branch_exists(&branch.repository, destination).await {
                continue;
            }

            let change = status.set_failed(branch, task).await;
            let message = format!(
                "The destination branch [{}] specified in attribute [{attribute}] of branch \
                 [{spec}] does not exist. Branch [{spec}] status will be set as 'failed': \
                 [{failed_value}].",
                self.branch_spec(destination)
            );
            self.notify(branch, &change.append_to(message)).await;
            return Ok(ProcessOutcome::Failed);
        }

        for destination in &destinations {
            if !self
                .api
                .is_merge_allowed(&branch.repository, &branch.full_name, destination)
                .await?
            {
                warn!(
                    branch = %branch.full_name,
                    destination,
                    "branch is not yet ready to be merged, jumping to next branch in the queue"
                );
                return Ok(ProcessOutcome::NotReady);
            }
        }

        let model = self.api.get_branch(&branch.repository, &branch.full_name).await?;
        let report = attempt.report.insert(MergeReport::new(&model));
        let task_title = self.issue_info(task, report).await?;

        merge::try_merge_to_shelves(
            self.api(),
            &self.bot_name,
            branch,
            task_title.as_deref(),
            &destinations,
            report,
            &mut attempt.shelves,
        )
        .await?;
        let shelves = &attempt.shelves;

        if shelves.all_not_needed() {
            let change = status.set_merged(branch, task).await;
            let message = shelves.not_needed().join("\n");
            self.notify(branch, &change.append_to(message)).await;
            return Ok(ProcessOutcome::Failed);
        }

        if shelves.has_errors() {
            let change = status.set_failed(branch, task).await;
            let mut lines = shelves.errors();
            lines.extend(shelves.not_needed());
            self.notify(branch, &change.append_to(lines.join("\n"))).await;
            return Ok(ProcessOutcome::Failed);
        }

        let merged_to = shelves.shelve_destinations().join(", ");
        let not_needed = shelves.not_needed();
        if !not_needed.is_empty() {
            let message = format!(
                "Branch [{b}] is already merged to some of the specified destination branches in \
                 the attribute [{attribute}]. The {bot} mergebot will continue building the \
                 merge(s) from branch [{b}] to [{merged_to}].\n\nReport of already merged \
                 branches:\n\t{}",
                not_needed.join("\n\t"),
                b = branch.full_name,
                bot = self.bot_name,
            );
            self.notify(branch, &message).await;
        }

        if !self
            .pre_checkin_stage(branch, task, &destinations, shelves, report)
            .await?
        {
            return Ok(ProcessOutcome::Failed);
        }

        let checkins = merge::try_apply_shelves(
            self.api(),
            &self.bot_name,
            branch,
            task_title.as_deref(),
            &destinations,
            shelves,
            report,
        )
        .await?;

        let errors = checkins.errors();
        let warnings = checkins.warnings();
        let has_changesets = !checkins.changesets().is_empty();

        if errors.is_empty() && warnings.is_empty() {
            let change = status.set_merged(branch, task).await;
            let message = format!(
                "OK: Branch [{}] was successfully merged to [{merged_to}]",
                branch.full_name
            );
            self.notify(branch, &change.append_to(message)).await;
            return self
                .post_checkin_stage(branch, task, &destinations, &checkins, report)
                .await;
        }

        if !errors.is_empty() {
            let change = status.set_failed(branch, task).await;
            let mut lines = errors;
            lines.extend(warnings);
            let message = format!(
                "Failed build. The result of building merges from branch [{}] to [{merged_to}] \
                 went OK, but there were some errors checking-in the resulting shelves:\n\t{}",
                branch.full_name,
                lines.join("\n\t"),
            );
            if has_changesets {
                self.post_checkin_stage(branch, task, &destinations, &checkins, report)
                    .await?;
            }
            self.notify(branch, &change.append_to(message)).await;
            return Ok(ProcessOutcome::Failed);
        }

        let change = status.set_resolved(branch).await;
        let message = format!(
            "Branch [{}] will be enqueued again, as new changesets appeared in merge destination \
             branches, and thus, the branch needs to be tested again to include those new \
             changesets in the merge. Full report:\n\t{}",
            branch.full_name,
            warnings.join("\n\t"),
        );
        if has_changesets {
            self.post_checkin_stage(branch, task, &destinations, &checkins, report)
                .await?;
        }
        self.notify(branch, &change.append_to(message)).await;
        Ok(ProcessOutcome::NotReady)
    }

    // =========================================================================
    // Readiness and destinations
    // =========================================================================

    async fn is_task_ready(&self, branch: &Branch, task: &str) -> Result<bool> {
        let review_filter = self.config.review_filter_enabled();
        if review_filter
            && !self
                .reviews
                .all_approved_and_at_least_one(&branch.repository, &branch.id)
        {
            return Ok(false);
        }

        let Some(issues) = &self.config.issues else {
            return Ok(true);
        };

        info!(plug = %issues.plug, "checking if issue tracker is available");
        if !self.api.is_issue_tracker_connected(&issues.plug).await? {
            warn!(plug = %issues.plug, "issue tracker is not available");
            return Ok(false);
        }

        let status = self
            .api
            .get_issue_field(&issues.plug, &issues.project_key, task, &issues.status_field.name)
            .await?;
        debug!(
            task,
            expected = %issues.status_field.resolved_value,
            actual = %status,
            "issue tracker status"
        );
        Ok(status == issues.status_field.resolved_value)
    }

    async fn destinations(&self, branch: &Branch) -> Vec<String> {
        let attribute = &self.config.merge_to_attribute;
        match self
            .api
            .get_branch_attribute(&branch.repository, &branch.full_name, attribute)
            .await
        {
            Ok(raw) => parse_destinations(&raw),
            Err(e) => {
                warn!(
                    "Unable to retrieve attribute [{attribute}] value from branch [{}]. Error: {e}",
                    branch.full_name
                );
                Vec::new()
            }
        }
    }

    async fn branch_exists(&self, repository: &str, branch: &str) -> bool {
        match self.api.get_branch(repository, branch).await {
            Ok(model) => !model.name.trim().is_empty(),
            Err(e) => {
                warn!("Unable to locate branch name [{branch}] in repository [{repository}]. Error: {e}");
                false
            }
        }
    }

    /// Read the issue title and URL into the report, returning the title
    async fn issue_info(&self, task: &str, report: &mut MergeReport) -> Result<Option<String>> {
        let Some(issues) = &self.config.issues else {
            return Ok(None);
        };

        info!(task, "obtaining task title and URL");
        let title = self
            .api
            .get_issue_field(&issues.plug, &issues.project_key, task, &issues.title_field)
            .await?;
        let url = self
            .api
            .get_issue_url(&issues.plug, &issues.project_key, task)
            .await?;
        report.set_issue(&title, &url);
        Ok(Some(title))
    }

    // =========================================================================
    // Build stages
    // =========================================================================

    async fn pre_checkin_stage(
        &self,
        branch: &Branch,
        task: &str,
        destinations: &[String],
        shelves: &ShelveResult,
        report: &mut MergeReport,
    ) -> Result<bool> {
        let Some(ci) = &self.config.ci else {
            let message = no_ci_message(task);
            info!("{message}");
            self.notify(branch, &message).await;
            return Ok(true);
        };

        let objects = shelves.shelves();
        if objects.is_empty() {
            let message = format!(
                "Something wrong happened. There are no merge-to shelves to build task {task}"
            );
            info!("{message}");
            self.notify(branch, &message).await;
            self.status().set_failed(branch, task).await;
            return Ok(false);
        }

        let message = format!(
            "Testing branch [{}] before being merged in the following destination branches: [{}].",
            branch.full_name,
            shelves.shelve_destinations().join(", ")
        );
        info!("{message}");
        self.status().set_testing(branch, task).await;
        self.notify(branch, &message).await;

        let build_task = BuildTask {
            branch,
            task_number: task,
            destinations,
            objects: &objects,
        };
        let started = Instant::now();
        let result = build::try_build_task(
            self.api(),
            &self.config,
            ci,
            &build_task,
            BuildStage::PreCheckin,
            &self.timings,
        )
        .await?;
        report.add_build_time(started.elapsed().as_millis());

        if result.all_successful() {
            report.add_succeeded_build(&ci.plan);
            return Ok(true);
        }

        let message = result.errors.join("\n");
        report.add_failed_build(&ci.plan, &message);
        let change = self.status().set_failed(branch, task).await;
        self.notify(branch, &change.append_to(message)).await;
        Ok(false)
    }

    async fn post_checkin_stage(
        &self,
        branch: &Branch,
        task: &str,
        destinations: &[String],
        checkins: &CheckinResult,
        report: &mut MergeReport,
    ) -> Result<ProcessOutcome> {
        let Some(ci) = self
            .config
            .ci
            .as_ref()
            .filter(|ci| ci.post_checkin_plan().is_some())
        else {
            info!("{}", no_ci_message(task));
            return Ok(ProcessOutcome::Ok);
        };

        let objects = checkins.changesets();
        if objects.is_empty() {
            let message = format!(
                "Something wrong happened. There are no merge-to changesets to build after \
                 merging branch [{}] to its destination branches.",
                branch.full_name
            );
            info!("{message}");
            self.notify(branch, &message).await;
            return Ok(ProcessOutcome::Failed);
        }

        let merged_to = objects
            .iter()
            .map(|(dst, _)| *dst)
            .collect::<Vec<_>>()
            .join(", ");
        let message = format!(
            "Testing branch [{}] after being merged in the following destination branches: [{merged_to}].",
            branch.full_name
        );
        info!("{message}");
        self.notify(branch, &message).await;

        let build_task = BuildTask {
            branch,
            task_number: task,
            destinations,
            objects: &objects,
        };
        let started = Instant::now();
        let result = build::try_build_task(
            self.api(),
            &self.config,
            ci,
            &build_task,
            BuildStage::PostCheckin,
            &self.timings,
        )
        .await?;
        report.add_build_time(started.elapsed().as_millis());

        if result.all_successful() {
            report.add_succeeded_build(&ci.plan_after_checkin);
            let message = format!(
                "Build successful after merging branch [{}] to the following destination \
                 branches: [{merged_to}].",
                branch.full_name
            );
            self.notify(branch, &message).await;
            return Ok(ProcessOutcome::Ok);
        }

        let message = result.errors.join("\n");
        report.add_failed_build(&ci.plan_after_checkin, &message);
        self.notify(branch, &message).await;
        Ok(ProcessOutcome::Failed)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn fail_unexpectedly(
        &self,
        branch: &Branch,
        task: &str,
        attempt: &mut Attempt,
        err: &Error,
    ) -> ProcessOutcome {
        error!(
            "The attempt to process task {task} failed for branch {}: {err}",
            branch.full_name
        );

        self.status().set_failed(branch, task).await;
        let message = format!(
            "Can't process branch [{}] because of an unexpected error: {err}.",
            branch.full_name
        );
        self.notify(branch, &message).await;

        if let Some(report) = attempt.report.as_mut() {
            report.set_unexpected_error(&err.to_string());
        }
        ProcessOutcome::Failed
    }

    async fn report_merge(&self, branch: &Branch, report: &MergeReport) {
        if let Err(e) = self.api.report_merge(&self.bot_name, report).await {
            error!(
                "Unable to report merge for branch '{}' on repository '{}': {e}",
                branch.full_name, branch.repository
            );
        }
    }

    async fn notify(&self, branch: &Branch, message: &str) {
        notify_task_status(self.api(), &branch.owner, message, &self.config.notifiers).await;
    }

    fn status(&self) -> StatusUpdater<'_> {
        StatusUpdater::new(self.api(), &self.config, &self.reviews)
    }

    fn api(&self) -> &dyn MergebotApi {
        self.api.as_ref()
    }

    /// `<branch>@<repository>@<server>`
    fn branch_spec(&self, branch: &str) -> String {
        format!("{branch}@{}@{}", self.config.repository, self.config.server)
    }
}

fn no_ci_message(task: &str) -> String {
    format!(
        "No Continuous Integration Plug was set for this mergebot. Therefore, no build actions \
         for task {task} will be performed."
    )
}

/// Task number of a branch: its local name without the configured prefix.
///
/// `None` when the prefix does not match.
pub fn task_number(full_name: &str, prefix: &str) -> Option<String> {
    let name = local_branch_name(full_name);
    if prefix.is_empty() {
        return Some(name.to_string());
    }
    if !starts_with_ignore_case(name, prefix) {
        return None;
    }
    name.get(prefix.len()..).map(ToString::to_string)
}

/// Parse the merge-to attribute value: `;`/`,` separated, trimmed, unique
pub fn parse_destinations(raw: &str) -> Vec<String> {
    let mut destinations: Vec<String> = Vec::new();
    for destination in split_list(raw) {
        if !destinations.contains(&destination) {
            destinations.push(destination);
        }
    }
    destinations
}
