//! Mock server API for testing
//!
//! Not every helper is used by every test binary.

#![allow(dead_code)]

use async_trait::async_trait;
use mergebot::api::MergebotApi;
use mergebot::error::{Error, Result};
use mergebot::merge::MergeReport;
use mergebot::types::{
    BranchModel, ChangesetModel, FindRow, LaunchPlanRequest, MergeSource, MergeToRequest,
    MergeToResponse, MergeToStatus, PlanStatus,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

/// Call record for `change_branch_attribute`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    pub branch: String,
    pub attribute: String,
    pub value: String,
}

/// Call record for `launch_plan`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCall {
    pub plan: String,
    pub object_spec: String,
    pub destination: String,
    pub comment: String,
    pub properties: BTreeMap<String, String>,
}

/// Call record for `notify_message`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub notifier: String,
    pub message: String,
    pub recipients: Vec<String>,
}

/// Call record for `set_issue_field`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueFieldChange {
    pub task: String,
    pub field: String,
    pub value: String,
}

/// Hand-written mock of the server API
///
/// Features:
/// - Branches exist only once registered with `add_branch`
/// - Shelve merges succeed with auto-incrementing shelve ids unless scripted
/// - Checkins succeed with auto-incrementing changesets unless scripted
/// - Builds pass unless a plan is scripted to fail for a destination
/// - Error injection per method name
/// - Call tracking for verification
pub struct MockMergebotApi {
    next_object: AtomicI64,
    branches: Mutex<HashMap<String, BranchModel>>,
    attributes: Mutex<HashMap<(String, String), String>>,
    existing_attribute_types: Mutex<HashSet<String>>,
    disallowed_merges: Mutex<HashSet<String>>,
    shelve_responses: Mutex<HashMap<String, MergeToResponse>>,
    checkin_responses: Mutex<HashMap<String, MergeToResponse>>,
    failing_builds: Mutex<HashMap<(String, String), String>>,
    unfinished_plans: Mutex<bool>,
    issue_fields: Mutex<HashMap<(String, String), String>>,
    issue_tracker_connected: Mutex<bool>,
    find_responses: Mutex<Vec<(String, Vec<FindRow>)>>,
    branches_with_reviews: Mutex<Vec<FindRow>>,
    profiles: Mutex<HashMap<String, serde_json::Value>>,
    failing_methods: Mutex<HashSet<String>>,
    executions: Mutex<HashMap<String, PlanStatus>>,
    // Call tracking
    attribute_changes: Mutex<Vec<AttributeChange>>,
    created_attributes: Mutex<Vec<String>>,
    merge_calls: Mutex<Vec<MergeToRequest>>,
    deleted_shelves: Mutex<Vec<i64>>,
    launches: Mutex<Vec<LaunchCall>>,
    status_polls: Mutex<usize>,
    notifications: Mutex<Vec<Notification>>,
    review_updates: Mutex<Vec<(String, i32)>>,
    issue_changes: Mutex<Vec<IssueFieldChange>>,
    reports: Mutex<Vec<MergeReport>>,
    find_queries: Mutex<Vec<String>>,
}

impl Default for MockMergebotApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMergebotApi {
    /// Create an empty mock
    pub fn new() -> Self {
        Self {
            next_object: AtomicI64::new(1),
            branches: Mutex::new(HashMap::new()),
            attributes: Mutex::new(HashMap::new()),
            existing_attribute_types: Mutex::new(HashSet::new()),
            disallowed_merges: Mutex::new(HashSet::new()),
            shelve_responses: Mutex::new(HashMap::new()),
            checkin_responses: Mutex::new(HashMap::new()),
            failing_builds: Mutex::new(HashMap::new()),
            unfinished_plans: Mutex::new(false),
            issue_fields: Mutex::new(HashMap::new()),
            issue_tracker_connected: Mutex::new(true),
            find_responses: Mutex::new(Vec::new()),
            branches_with_reviews: Mutex::new(Vec::new()),
            profiles: Mutex::new(HashMap::new()),
            failing_methods: Mutex::new(HashSet::new()),
            executions: Mutex::new(HashMap::new()),
            attribute_changes: Mutex::new(Vec::new()),
            created_attributes: Mutex::new(Vec::new()),
            merge_calls: Mutex::new(Vec::new()),
            deleted_shelves: Mutex::new(Vec::new()),
            launches: Mutex::new(Vec::new()),
            status_polls: Mutex::new(0),
            notifications: Mutex::new(Vec::new()),
            review_updates: Mutex::new(Vec::new()),
            issue_changes: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            find_queries: Mutex::new(Vec::new()),
        }
    }

    // === Setup ===

    /// Register a branch so `get_branch` finds it
    pub fn add_branch(&self, name: &str, id: i64) {
        self.branches.lock().unwrap().insert(
            name.to_string(),
            BranchModel {
                id,
                name: name.to_string(),
                repository_id: "1".to_string(),
                head_changeset: id * 10,
                owner: "owner".to_string(),
            },
        );
    }

    /// Set an attribute value on a branch
    pub fn set_attribute(&self, branch: &str, attribute: &str, value: &str) {
        self.attributes
            .lock()
            .unwrap()
            .insert((branch.to_string(), attribute.to_string()), value.to_string());
    }

    /// Mark an attribute type as existing in the repository
    pub fn add_attribute_type(&self, name: &str) {
        self.existing_attribute_types
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    /// Make `is_merge_allowed` answer false for a destination
    pub fn disallow_merge_to(&self, destination: &str) {
        self.disallowed_merges
            .lock()
            .unwrap()
            .insert(destination.to_string());
    }

    /// Script the shelve merge response for a destination
    pub fn set_shelve_response(&self, destination: &str, status: MergeToStatus, message: &str) {
        let changeset_number = if status == MergeToStatus::Ok {
            self.next_object.fetch_add(1, Ordering::SeqCst)
        } else {
            0
        };
        self.shelve_responses.lock().unwrap().insert(
            destination.to_string(),
            MergeToResponse {
                status,
                message: message.to_string(),
                changeset_number,
            },
        );
    }

    /// Answer the shelve merge to a destination with `OK` and a fixed id
    pub fn set_shelve_id(&self, destination: &str, shelve_id: i64) {
        self.shelve_responses.lock().unwrap().insert(
            destination.to_string(),
            MergeToResponse {
                status: MergeToStatus::Ok,
                message: String::new(),
                changeset_number: shelve_id,
            },
        );
    }

    /// Script the checkin response for a destination
    pub fn set_checkin_response(&self, destination: &str, status: MergeToStatus, message: &str) {
        self.checkin_responses.lock().unwrap().insert(
            destination.to_string(),
            MergeToResponse {
                status,
                message: message.to_string(),
                changeset_number: 0,
            },
        );
    }

    /// Make `plan` fail when building the merge to `destination`
    pub fn fail_build(&self, plan: &str, destination: &str, explanation: &str) {
        self.failing_builds.lock().unwrap().insert(
            (plan.to_string(), destination.to_string()),
            explanation.to_string(),
        );
    }

    /// Make every plan stay unfinished forever
    pub fn never_finish_plans(&self) {
        *self.unfinished_plans.lock().unwrap() = true;
    }

    /// Set an issue field value
    pub fn set_issue_field_value(&self, task: &str, field: &str, value: &str) {
        self.issue_fields
            .lock()
            .unwrap()
            .insert((task.to_string(), field.to_string()), value.to_string());
    }

    /// Set whether the issue tracker answers
    pub fn set_issue_tracker_connected(&self, connected: bool) {
        *self.issue_tracker_connected.lock().unwrap() = connected;
    }

    /// Rows returned by `find` for queries containing `pattern`
    pub fn add_find_response(&self, pattern: &str, rows: Vec<FindRow>) {
        self.find_responses
            .lock()
            .unwrap()
            .push((pattern.to_string(), rows));
    }

    /// Rows returned by `find_branches_with_reviews`
    pub fn set_branches_with_reviews(&self, rows: Vec<FindRow>) {
        *self.branches_with_reviews.lock().unwrap() = rows;
    }

    /// Set a user profile
    pub fn set_profile(&self, user: &str, profile: serde_json::Value) {
        self.profiles
            .lock()
            .unwrap()
            .insert(user.to_string(), profile);
    }

    /// Make a method return an error
    pub fn fail_on(&self, method: &str) {
        self.failing_methods
            .lock()
            .unwrap()
            .insert(method.to_string());
    }

    // === Call inspection ===

    pub fn attribute_changes(&self) -> Vec<AttributeChange> {
        self.attribute_changes.lock().unwrap().clone()
    }

    /// Values written to one attribute, in order
    pub fn attribute_values(&self, attribute: &str) -> Vec<String> {
        self.attribute_changes()
            .into_iter()
            .filter(|c| c.attribute == attribute)
            .map(|c| c.value)
            .collect()
    }

    pub fn created_attributes(&self) -> Vec<String> {
        self.created_attributes.lock().unwrap().clone()
    }

    pub fn merge_calls(&self) -> Vec<MergeToRequest> {
        self.merge_calls.lock().unwrap().clone()
    }

    /// Shelve requests only
    pub fn shelve_calls(&self) -> Vec<MergeToRequest> {
        self.merge_calls()
            .into_iter()
            .filter(|r| r.create_shelve)
            .collect()
    }

    /// Checkin requests only
    pub fn checkin_calls(&self) -> Vec<MergeToRequest> {
        self.merge_calls()
            .into_iter()
            .filter(|r| matches!(r.source, MergeSource::Shelve(_)))
            .collect()
    }

    pub fn deleted_shelves(&self) -> Vec<i64> {
        self.deleted_shelves.lock().unwrap().clone()
    }

    pub fn launches(&self) -> Vec<LaunchCall> {
        self.launches.lock().unwrap().clone()
    }

    pub fn status_polls(&self) -> usize {
        *self.status_polls.lock().unwrap()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    /// Notified message texts, in order
    pub fn messages(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .map(|n| n.message)
            .collect()
    }

    pub fn review_updates(&self) -> Vec<(String, i32)> {
        self.review_updates.lock().unwrap().clone()
    }

    pub fn issue_changes(&self) -> Vec<IssueFieldChange> {
        self.issue_changes.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<MergeReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn find_queries(&self) -> Vec<String> {
        self.find_queries.lock().unwrap().clone()
    }

    fn check(&self, method: &str) -> Result<()> {
        if self.failing_methods.lock().unwrap().contains(method) {
            return Err(Error::Api(format!("{method} failed")));
        }
        Ok(())
    }

    fn next_object(&self) -> i64 {
        self.next_object.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl MergebotApi for MockMergebotApi {
    async fn get_branch(&self, _repo: &str, branch: &str) -> Result<BranchModel> {
        self.check("get_branch")?;
        self.branches
            .lock()
            .unwrap()
            .get(branch)
            .cloned()
            .ok_or_else(|| Error::Api(format!("branch {branch} not found")))
    }

    async fn get_changeset(&self, _repo: &str, changeset_id: i64) -> Result<ChangesetModel> {
        self.check("get_changeset")?;
        Ok(ChangesetModel {
            changeset_id,
            guid: format!("guid-{changeset_id}"),
            owner: "owner".to_string(),
            branch: String::new(),
        })
    }

    async fn get_branch_attribute(&self, _repo: &str, branch: &str, attribute: &str) -> Result<String> {
        self.check("get_branch_attribute")?;
        Ok(self
            .attributes
            .lock()
            .unwrap()
            .get(&(branch.to_string(), attribute.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn change_branch_attribute(
        &self,
        _repo: &str,
        branch: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        self.check("change_branch_attribute")?;
        self.attribute_changes.lock().unwrap().push(AttributeChange {
            branch: branch.to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn create_attribute(&self, _repo: &str, name: &str, _comment: &str) -> Result<bool> {
        self.check("create_attribute")?;
        self.created_attributes.lock().unwrap().push(name.to_string());
        self.add_attribute_type(name);
        Ok(true)
    }

    async fn merge_to(&self, _repo: &str, request: &MergeToRequest) -> Result<MergeToResponse> {
        self.check("merge_to")?;
        self.merge_calls.lock().unwrap().push(request.clone());

        let scripted = if request.create_shelve {
            self.shelve_responses.lock().unwrap().get(&request.destination).cloned()
        } else {
            self.checkin_responses.lock().unwrap().get(&request.destination).cloned()
        };

        Ok(scripted.unwrap_or_else(|| MergeToResponse {
            status: MergeToStatus::Ok,
            message: String::new(),
            changeset_number: self.next_object(),
        }))
    }

    async fn is_merge_allowed(&self, _repo: &str, _source: &str, destination: &str) -> Result<bool> {
        self.check("is_merge_allowed")?;
        Ok(!self.disallowed_merges.lock().unwrap().contains(destination))
    }

    async fn delete_shelve(&self, _repo: &str, shelve_id: i64) -> Result<()> {
        self.deleted_shelves.lock().unwrap().push(shelve_id);
        self.check("delete_shelve")
    }

    async fn find(
        &self,
        _repo: &str,
        query: &str,
        _date_format: &str,
        _fields: &[&str],
    ) -> Result<Vec<FindRow>> {
        self.check("find")?;
        self.find_queries.lock().unwrap().push(query.to_string());

        if let Some(name) = query.strip_prefix("attributetype where name='") {
            let name = name.trim_end().trim_end_matches('\'');
            if self.existing_attribute_types.lock().unwrap().contains(name) {
                let mut row = FindRow::new();
                row.insert("name".to_string(), name.into());
                return Ok(vec![row]);
            }
            return Ok(Vec::new());
        }

        Ok(self
            .find_responses
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| query.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn find_branches_with_reviews(
        &self,
        _repo: &str,
        _review_conditions: &str,
        _branch_conditions: &str,
        _date_format: &str,
        _fields: &[&str],
    ) -> Result<Vec<FindRow>> {
        self.check("find_branches_with_reviews")?;
        Ok(self.branches_with_reviews.lock().unwrap().clone())
    }

    async fn update_review(&self, _repo: &str, review_id: &str, status: i32, _title: &str) -> Result<()> {
        self.check("update_review")?;
        self.review_updates
            .lock()
            .unwrap()
            .push((review_id.to_string(), status));
        Ok(())
    }

    async fn get_user_profile(&self, user: &str) -> Result<serde_json::Value> {
        self.check("get_user_profile")?;
        self.profiles
            .lock()
            .unwrap()
            .get(user)
            .cloned()
            .ok_or_else(|| Error::Api(format!("user {user} not found")))
    }

    async fn report_merge(&self, _bot_name: &str, report: &MergeReport) -> Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        self.check("report_merge")
    }

    async fn is_issue_tracker_connected(&self, _plug: &str) -> Result<bool> {
        self.check("is_issue_tracker_connected")?;
        Ok(*self.issue_tracker_connected.lock().unwrap())
    }

    async fn get_issue_field(
        &self,
        _plug: &str,
        _project_key: &str,
        task: &str,
        field: &str,
    ) -> Result<String> {
        self.check("get_issue_field")?;
        Ok(self
            .issue_fields
            .lock()
            .unwrap()
            .get(&(task.to_string(), field.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_issue_field(
        &self,
        _plug: &str,
        _project_key: &str,
        task: &str,
        field: &str,
        value: &str,
    ) -> Result<()> {
        self.check("set_issue_field")?;
        self.issue_changes.lock().unwrap().push(IssueFieldChange {
            task: task.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn get_issue_url(&self, _plug: &str, project_key: &str, task: &str) -> Result<String> {
        self.check("get_issue_url")?;
        Ok(format!("https://issues.example.com/{project_key}-{task}"))
    }

    async fn notify_message(&self, notifier: &str, message: &str, recipients: &[String]) -> Result<()> {
        self.check("notify_message")?;
        self.notifications.lock().unwrap().push(Notification {
            notifier: notifier.to_string(),
            message: message.to_string(),
            recipients: recipients.to_vec(),
        });
        Ok(())
    }

    async fn launch_plan(&self, _ci: &str, plan: &str, request: &LaunchPlanRequest) -> Result<String> {
        self.check("launch_plan")?;
        let destination = request
            .properties
            .get("trunk.name")
            .cloned()
            .unwrap_or_default();

        let status = if *self.unfinished_plans.lock().unwrap() {
            PlanStatus::default()
        } else {
            match self
                .failing_builds
                .lock()
                .unwrap()
                .get(&(plan.to_string(), destination.clone()))
            {
                Some(explanation) => PlanStatus {
                    is_finished: true,
                    succeeded: false,
                    explanation: explanation.clone(),
                },
                None => PlanStatus {
                    is_finished: true,
                    succeeded: true,
                    explanation: String::new(),
                },
            }
        };

        let execution_id = format!("exec-{}", self.next_object());
        self.executions
            .lock()
            .unwrap()
            .insert(execution_id.clone(), status);
        self.launches.lock().unwrap().push(LaunchCall {
            plan: plan.to_string(),
            object_spec: request.object_spec.clone(),
            destination,
            comment: request.comment.clone(),
            properties: request.properties.clone(),
        });
        Ok(execution_id)
    }

    async fn get_plan_status(&self, _ci: &str, execution_id: &str, _plan: &str) -> Result<PlanStatus> {
        self.check("get_plan_status")?;
        *self.status_polls.lock().unwrap() += 1;
        self.executions
            .lock()
            .unwrap()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| Error::Api(format!("unknown execution {execution_id}")))
    }
}
