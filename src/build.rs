//! Build orchestration: run the CI plan over merge results
//!
//! Pre-checkin builds run over the merge shelves and stop at the first
//! failure. Post-checkin builds run over the checked-in changesets and keep
//! going after a failure so every destination gets built.

use crate::api::MergebotApi;
use crate::config::{BotConfig, CiConfig, Timings};
use crate::error::Result;
use crate::types::{Branch, LaunchPlanRequest, PlanStatus};
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Build property keys sent with every plan launch
pub mod properties {
    /// Source branch full name
    pub const BRANCH_NAME: &str = "branch.name";
    /// Task number derived from the branch name
    pub const TASK_NUMBER: &str = "task.number";
    /// Head changeset number of the source branch
    pub const BRANCH_HEAD: &str = "branch.head.changeset";
    /// Head changeset guid of the source branch
    pub const BRANCH_HEAD_GUID: &str = "branch.head.guid";
    /// Owner of the source branch head changeset
    pub const CHANGESET_OWNER: &str = "branch.head.owner";
    /// Destination branch name
    pub const TRUNK_NAME: &str = "trunk.name";
    /// Head changeset number of the destination branch
    pub const TRUNK_HEAD: &str = "trunk.head.changeset";
    /// Head changeset guid of the destination branch
    pub const TRUNK_HEAD_GUID: &str = "trunk.head.guid";
    /// `<repository>@<server>`
    pub const REPSPEC: &str = "repspec";
    /// Label to apply (always empty)
    pub const LABEL: &str = "label";
    /// `pre` or `post`
    pub const STAGE: &str = "stage";
}

/// When a build runs relative to the checkin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Over the merge shelves, before checkin
    PreCheckin,
    /// Over the checked-in changesets
    PostCheckin,
}

impl BuildStage {
    const fn object_prefix(self) -> &'static str {
        match self {
            Self::PreCheckin => "sh",
            Self::PostCheckin => "cs",
        }
    }

    const fn object_name(self) -> &'static str {
        match self {
            Self::PreCheckin => "shelve",
            Self::PostCheckin => "changeset",
        }
    }

    /// Value of the `stage` build property
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreCheckin => "pre",
            Self::PostCheckin => "post",
        }
    }

    /// The plan this stage runs
    pub fn plan(self, ci: &CiConfig) -> &str {
        match self {
            Self::PreCheckin => &ci.plan,
            Self::PostCheckin => &ci.plan_after_checkin,
        }
    }
}

/// Outcome of building every destination of a stage
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    /// One diagnostic per failed build
    pub errors: Vec<String>,
}

impl BuildResult {
    /// Whether every launched build passed
    pub fn all_successful(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Everything a stage needs to launch builds for one branch
pub struct BuildTask<'a> {
    /// Source branch
    pub branch: &'a Branch,
    /// Task number derived from the branch name
    pub task_number: &'a str,
    /// Destinations, in processing order
    pub destinations: &'a [String],
    /// Build object (shelve or changeset) per destination
    pub objects: &'a [(&'a str, i64)],
}

/// Build every destination that has an object, following the stage's
/// continuation rule
pub async fn try_build_task(
    api: &dyn MergebotApi,
    config: &BotConfig,
    ci: &CiConfig,
    task: &BuildTask<'_>,
    stage: BuildStage,
    timings: &Timings,
) -> Result<BuildResult> {
    let mut result = BuildResult::default();
    let plan = stage.plan(ci);
    let repspec = format!("{}@{}", task.branch.repository, config.server);

    for destination in task.destinations {
        let Some(&(_, object_id)) = task.objects.iter().find(|(dst, _)| *dst == destination.as_str())
        else {
            continue;
        };

        let object_spec = format!("{}:{object_id}@{repspec}", stage.object_prefix());
        let comment = format!(
            "Building {name} [{object_spec}], the resulting {name} from merging branch [{}] to [{destination}]",
            task.branch.full_name,
            name = stage.object_name(),
        );

        let request = LaunchPlanRequest {
            object_spec: object_spec.clone(),
            comment: format!("MergeBot - {comment}"),
            properties: build_properties(api, config, task, destination, stage).await?,
        };

        let status = run_plan(api, ci, plan, &request, &comment, timings).await?;
        if status.succeeded {
            info!(plan, object = %object_spec, "build succeeded");
            continue;
        }

        warn!(plan, object = %object_spec, explanation = %status.explanation, "build failed");
        let explanation = if status.explanation.trim().is_empty() {
            String::new()
        } else {
            format!("Error: [{}] ", status.explanation)
        };
        result.errors.push(format!(
            "Build failed. The build plan [{plan}] of the resulting {} [{object_spec}] from merging \
             branch [{}] to [{destination}] has failed. {explanation}Please check your Continuous \
             Integration report to find out more info about what happened.",
            stage.object_name(),
            task.branch.full_name,
        ));

        if stage == BuildStage::PreCheckin {
            break;
        }
    }

    Ok(result)
}

/// Launch a plan and wait for it to finish.
///
/// A plan still running after the build timeout is reported as failed.
async fn run_plan(
    api: &dyn MergebotApi,
    ci: &CiConfig,
    plan: &str,
    request: &LaunchPlanRequest,
    comment: &str,
    timings: &Timings,
) -> Result<PlanStatus> {
    let execution_id = api.launch_plan(&ci.plug, plan, request).await?;
    debug!(plan, execution_id, "launched plan");

    let started = Instant::now();
    loop {
        let status = api.get_plan_status(&ci.plug, &execution_id, plan).await?;
        if status.is_finished {
            return Ok(status);
        }

        tokio::time::sleep(timings.build_poll_interval).await;
        if started.elapsed() >= timings.build_timeout {
            break;
        }
    }

    Ok(PlanStatus {
        is_finished: false,
        succeeded: false,
        explanation: format!(
            "{} reached the time limit to get the status for plan:'{plan}' and \
             executionId:'{execution_id}'\nRequest details: objectSpec:'{}' and comment:'{comment}'",
            ci.plug, request.object_spec
        ),
    })
}

async fn build_properties(
    api: &dyn MergebotApi,
    config: &BotConfig,
    task: &BuildTask<'_>,
    destination: &str,
    stage: BuildStage,
) -> Result<BTreeMap<String, String>> {
    let repo = &config.repository;
    let branch_head = api.get_branch(repo, &task.branch.full_name).await?.head_changeset;
    let branch_head = api.get_changeset(repo, branch_head).await?;
    let trunk_head = api.get_branch(repo, destination).await?.head_changeset;
    let trunk_head = api.get_changeset(repo, trunk_head).await?;

    let entries = [
        (properties::BRANCH_NAME, task.branch.full_name.clone()),
        (properties::TASK_NUMBER, task.task_number.to_string()),
        (properties::BRANCH_HEAD, branch_head.changeset_id.to_string()),
        (properties::BRANCH_HEAD_GUID, branch_head.guid),
        (properties::CHANGESET_OWNER, branch_head.owner),
        (properties::TRUNK_NAME, destination.to_string()),
        (properties::TRUNK_HEAD, trunk_head.changeset_id.to_string()),
        (properties::TRUNK_HEAD_GUID, trunk_head.guid),
        (properties::REPSPEC, format!("{repo}@{}", config.server)),
        (properties::LABEL, String::new()),
        (properties::STAGE, stage.as_str().to_string()),
    ];

    Ok(entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect())
}
