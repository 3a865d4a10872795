//! REST implementation of the mergebot capabilities

use crate::api::MergebotApi;
use crate::error::{Error, Result};
use crate::merge::MergeReport;
use crate::types::{
    BranchModel, ChangesetModel, FindRow, LaunchPlanRequest, MergeSource, MergeToRequest,
    MergeToResponse, PlanStatus,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// REST client for the server API
pub struct RestApi {
    client: Client,
    base_url: String,
    api_key: String,
}

/// Generic `{ "value": ... }` response
#[derive(Deserialize)]
struct SingleResponse {
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
struct MergeAllowedResponse {
    #[serde(default)]
    result: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MergeToPayload<'a> {
    source_type: &'static str,
    source: String,
    destination: &'a str,
    comment: &'a str,
    create_shelve: bool,
    ensure_no_dst_changes: bool,
}

impl<'a> From<&'a MergeToRequest> for MergeToPayload<'a> {
    fn from(request: &'a MergeToRequest) -> Self {
        let (source_type, source) = match &request.source {
            MergeSource::Branch(name) => ("Branch", strip_root(name).to_string()),
            MergeSource::Shelve(id) => ("Shelve", id.to_string()),
        };
        Self {
            source_type,
            source,
            destination: &request.destination,
            comment: &request.comment,
            create_shelve: request.create_shelve,
            ensure_no_dst_changes: request.ensure_no_dst_changes,
        }
    }
}

/// Branch names are addressed without their leading slash
fn strip_root(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

impl RestApi {
    /// Create a new client for the server at `base_url`
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| Error::Api(format!("invalid REST API URL '{base_url}': {e}")))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Api(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn repo_url(&self, repo: &str, path: &str) -> String {
        self.api_url(&format!("/repos/{}{}", encode(repo), path))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("ApiKey {}", self.api_key))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = self
            .authorized(builder)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Api(e.to_string()))?;
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        Ok(self.send(builder).await?.json().await?)
    }
}

#[async_trait]
impl MergebotApi for RestApi {
    async fn get_branch(&self, repo: &str, branch: &str) -> Result<BranchModel> {
        debug!(repo, branch, "getting branch");
        let url = self.repo_url(repo, &format!("/branches/{}", encode(strip_root(branch))));
        let model: BranchModel = self.send_json(self.client.get(&url)).await?;
        debug!(branch_id = model.id, head = model.head_changeset, "got branch");
        Ok(model)
    }

    async fn get_changeset(&self, repo: &str, changeset_id: i64) -> Result<ChangesetModel> {
        debug!(repo, changeset_id, "getting changeset");
        let url = self.repo_url(repo, &format!("/changesets/{changeset_id}"));
        self.send_json(self.client.get(&url)).await
    }

    async fn get_branch_attribute(
        &self,
        repo: &str,
        branch: &str,
        attribute: &str,
    ) -> Result<String> {
        debug!(repo, branch, attribute, "getting branch attribute");
        let url = self.repo_url(
            repo,
            &format!(
                "/attributes/{}/branch/{}",
                encode(attribute),
                encode(strip_root(branch))
            ),
        );
        let response: SingleResponse = self.send_json(self.client.get(&url)).await?;
        Ok(response.value)
    }

    async fn change_branch_attribute(
        &self,
        repo: &str,
        branch: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        debug!(repo, branch, attribute, value, "changing branch attribute");
        let url = self.repo_url(repo, &format!("/attributes/{}", encode(attribute)));
        self.send(self.client.put(&url).json(&serde_json::json!({
            "targetType": "Branch",
            "targetName": strip_root(branch),
            "value": value,
        })))
        .await?;
        Ok(())
    }

    async fn create_attribute(&self, repo: &str, name: &str, comment: &str) -> Result<bool> {
        debug!(repo, name, "creating attribute");
        let url = self.repo_url(repo, "/attributes");
        let response: SingleResponse = self
            .send_json(
                self.client
                    .post(&url)
                    .json(&serde_json::json!({ "name": name, "comment": comment })),
            )
            .await?;
        Ok(parse_bool(&response.value))
    }

    async fn merge_to(&self, repo: &str, request: &MergeToRequest) -> Result<MergeToResponse> {
        let payload = MergeToPayload::from(request);
        debug!(
            repo,
            source_type = payload.source_type,
            source = %payload.source,
            destination = %request.destination,
            create_shelve = request.create_shelve,
            "requesting merge"
        );
        let url = self.repo_url(repo, "/mergeto");
        let response: MergeToResponse =
            self.send_json(self.client.post(&url).json(&payload)).await?;
        debug!(status = %response.status, changeset = response.changeset_number, "merge answered");
        Ok(response)
    }

    async fn is_merge_allowed(&self, repo: &str, source: &str, destination: &str) -> Result<bool> {
        debug!(repo, source, destination, "checking whether merge is allowed");
        let url = self.repo_url(
            repo,
            &format!(
                "/branches/{}/mergeto/{}/allowed",
                encode(strip_root(source)),
                encode(strip_root(destination))
            ),
        );
        let response: MergeAllowedResponse = self.send_json(self.client.get(&url)).await?;
        Ok(response.result.trim().eq_ignore_ascii_case("ok"))
    }

    async fn delete_shelve(&self, repo: &str, shelve_id: i64) -> Result<()> {
        debug!(repo, shelve_id, "deleting shelve");
        let url = self.repo_url(repo, &format!("/shelves/{shelve_id}"));
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }

    async fn find(
        &self,
        repo: &str,
        query: &str,
        date_format: &str,
        fields: &[&str],
    ) -> Result<Vec<FindRow>> {
        debug!(repo, query, "running find query");
        let url = self.repo_url(repo, "/find");
        let rows: Vec<FindRow> = self
            .send_json(self.client.get(&url).query(&[
                ("query", query),
                ("queryDateFormat", date_format),
                ("fields", &fields.join(",")),
            ]))
            .await?;
        debug!(count = rows.len(), "find query answered");
        Ok(rows)
    }

    async fn find_branches_with_reviews(
        &self,
        repo: &str,
        review_conditions: &str,
        branch_conditions: &str,
        date_format: &str,
        fields: &[&str],
    ) -> Result<Vec<FindRow>> {
        debug!(repo, "finding branches with reviews");
        let url = self.repo_url(repo, "/find-branches-with-reviews");
        let rows: Vec<FindRow> = self
            .send_json(self.client.get(&url).query(&[
                ("reviewConditions", review_conditions),
                ("branchConditions", branch_conditions),
                ("queryDateFormat", date_format),
                ("fields", &fields.join(",")),
            ]))
            .await?;
        debug!(count = rows.len(), "branches with reviews found");
        Ok(rows)
    }

    async fn update_review(
        &self,
        repo: &str,
        review_id: &str,
        status: i32,
        title: &str,
    ) -> Result<()> {
        debug!(repo, review_id, status, "updating review");
        let url = self.repo_url(repo, &format!("/codereviews/{}", encode(review_id)));
        self.send(
            self.client
                .put(&url)
                .json(&serde_json::json!({ "status": status, "title": title })),
        )
        .await?;
        Ok(())
    }

    async fn get_user_profile(&self, user: &str) -> Result<serde_json::Value> {
        debug!(user, "getting user profile");
        let url = self.api_url(&format!("/users/{}/profile", encode(user)));
        self.send_json(self.client.get(&url)).await
    }

    async fn report_merge(&self, bot_name: &str, report: &MergeReport) -> Result<()> {
        debug!(bot_name, branch_id = report.branch_id, "uploading merge report");
        let url = self.api_url(&format!("/mergereports/{}", encode(bot_name)));
        self.send(self.client.put(&url).json(report)).await?;
        Ok(())
    }

    async fn is_issue_tracker_connected(&self, plug: &str) -> Result<bool> {
        debug!(plug, "checking issue tracker connection");
        let url = self.api_url(&format!("/issues/{}/checkconnection", encode(plug)));
        let response: SingleResponse = self.send_json(self.client.get(&url)).await?;
        Ok(parse_bool(&response.value))
    }

    async fn get_issue_field(
        &self,
        plug: &str,
        project_key: &str,
        task: &str,
        field: &str,
    ) -> Result<String> {
        debug!(plug, project_key, task, field, "getting issue field");
        let url = self.api_url(&format!(
            "/issues/{}/{}/{}/{}",
            encode(plug),
            encode(project_key),
            encode(task),
            encode(field)
        ));
        let response: SingleResponse = self.send_json(self.client.get(&url)).await?;
        Ok(response.value)
    }

    async fn set_issue_field(
        &self,
        plug: &str,
        project_key: &str,
        task: &str,
        field: &str,
        value: &str,
    ) -> Result<()> {
        debug!(plug, project_key, task, field, value, "setting issue field");
        let url = self.api_url(&format!(
            "/issues/{}/{}/{}/{}",
            encode(plug),
            encode(project_key),
            encode(task),
            encode(field)
        ));
        self.send(
            self.client
                .put(&url)
                .json(&serde_json::json!({ "newValue": value })),
        )
        .await?;
        Ok(())
    }

    async fn get_issue_url(&self, plug: &str, project_key: &str, task: &str) -> Result<String> {
        debug!(plug, project_key, task, "getting issue url");
        let url = self.api_url(&format!(
            "/issues/{}/{}/{}/url",
            encode(plug),
            encode(project_key),
            encode(task)
        ));
        let response: SingleResponse = self.send_json(self.client.get(&url)).await?;
        Ok(response.value)
    }

    async fn notify_message(
        &self,
        notifier: &str,
        message: &str,
        recipients: &[String],
    ) -> Result<()> {
        debug!(notifier, recipients = ?recipients, "sending notification");
        let url = self.api_url(&format!("/notify/{}", encode(notifier)));
        self.send(self.client.post(&url).json(&serde_json::json!({
            "message": message,
            "recipients": recipients,
        })))
        .await?;
        Ok(())
    }

    async fn launch_plan(
        &self,
        ci: &str,
        plan: &str,
        request: &LaunchPlanRequest,
    ) -> Result<String> {
        debug!(ci, plan, object_spec = %request.object_spec, "launching CI plan");
        let url = self.api_url(&format!("/ci/{}/{}", encode(ci), encode(plan)));
        let response: SingleResponse = self.send_json(self.client.post(&url).json(request)).await?;
        debug!(execution_id = %response.value, "CI plan launched");
        Ok(response.value)
    }

    async fn get_plan_status(
        &self,
        ci: &str,
        execution_id: &str,
        plan: &str,
    ) -> Result<PlanStatus> {
        debug!(ci, execution_id, plan, "getting CI plan status");
        let url = self.api_url(&format!("/ci/{}/{}", encode(ci), encode(execution_id)));
        self.send_json(self.client.get(&url).query(&[("planPath", plan)]))
            .await
    }
}
