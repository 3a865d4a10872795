//! Find queries used at startup and when dequeuing branches

use crate::api::MergebotApi;
use crate::error::Result;
use crate::types::{Branch, FindRow, Review, ReviewStatus, row_field};
use chrono::{DateTime, Local, Months};
use tracing::debug;

/// Date format understood by the server's query engine
pub const QUERY_DATE_FORMAT: &str = "yyyy-MM-dd HH:mm:ss";

/// Same format, in chrono syntax
const CHRONO_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BRANCH_FIELDS: &[&str] = &["id", "name", "owner", "comment"];

const BRANCH_WITH_REVIEW_FIELDS: &[&str] = &[
    "branchid",
    "branchname",
    "branchowner",
    "branchcomment",
    "reviewid",
    "reviewtargetid",
    "reviewstatus",
    "reviewtitle",
];

/// A branch joined with one review targeting it
#[derive(Debug, Clone)]
pub struct BranchWithReview {
    /// The reviewed branch
    pub branch: Branch,
    /// The review
    pub review: Review,
}

/// Resolve the current full name of a branch by id.
///
/// Returns an empty string when the branch no longer exists.
pub async fn branch_name(api: &dyn MergebotApi, repo: &str, branch_id: &str) -> Result<String> {
    let query = format!("branch where id={branch_id}");
    let rows = api.find(repo, &query, QUERY_DATE_FORMAT, &["name"]).await?;
    Ok(rows.first().map(|row| row_field(row, "name")).unwrap_or_default())
}

/// Branches matching the prefix whose status attribute is the resolved value
pub async fn find_resolved_branches(
    api: &dyn MergebotApi,
    repo: &str,
    prefix: &str,
    status_attribute: &str,
    resolved_value: &str,
) -> Result<Vec<Branch>> {
    let query = resolved_branches_query(prefix, status_attribute, resolved_value, one_year_ago());
    let rows = api.find(repo, &query, QUERY_DATE_FORMAT, BRANCH_FIELDS).await?;
    debug!(count = rows.len(), "found resolved branches");

    Ok(rows
        .iter()
        .map(|row| {
            Branch::new(
                repo,
                row_field(row, "id"),
                row_field(row, "name"),
                row_field(row, "owner"),
                row_field(row, "comment"),
            )
        })
        .collect())
}

/// Branches matching the prefix, not yet merged, with the reviews targeting them
pub async fn find_pending_branches_with_reviews(
    api: &dyn MergebotApi,
    repo: &str,
    prefix: &str,
    status_attribute: &str,
    merged_value: &str,
) -> Result<Vec<BranchWithReview>> {
    let branch_conditions =
        pending_branches_conditions(prefix, status_attribute, merged_value, one_year_ago());
    let rows = api
        .find_branches_with_reviews(
            repo,
            "",
            &branch_conditions,
            QUERY_DATE_FORMAT,
            BRANCH_WITH_REVIEW_FIELDS,
        )
        .await?;
    debug!(count = rows.len(), "found branches with reviews");

    Ok(rows.iter().map(|row| branch_with_review(repo, row)).collect())
}

/// Whether an attribute type with this name exists in the repository
pub async fn exists_attribute_name(api: &dyn MergebotApi, repo: &str, name: &str) -> Result<bool> {
    let query = format!("attributetype where name='{name}' ");
    let rows = api.find(repo, &query, QUERY_DATE_FORMAT, &["name"]).await?;
    Ok(!rows.is_empty())
}

fn branch_with_review(repo: &str, row: &FindRow) -> BranchWithReview {
    BranchWithReview {
        branch: Branch::new(
            repo,
            row_field(row, "branchid"),
            row_field(row, "branchname"),
            row_field(row, "branchowner"),
            row_field(row, "branchcomment"),
        ),
        review: Review::new(
            repo,
            row_field(row, "reviewid"),
            row_field(row, "reviewtargetid"),
            ReviewStatus::from_wire(&row_field(row, "reviewstatus")),
            row_field(row, "reviewtitle"),
        ),
    }
}

fn one_year_ago() -> DateTime<Local> {
    let now = Local::now();
    now.checked_sub_months(Months::new(12)).unwrap_or(now)
}

fn resolved_branches_query(
    prefix: &str,
    status_attribute: &str,
    resolved_value: &str,
    since: DateTime<Local>,
) -> String {
    format!(
        "branch where ( {} ) and date > '{}' and attribute='{status_attribute}' and ( {} ) ",
        any_case_like("name", prefix),
        since.format(CHRONO_DATE_FORMAT),
        any_case_equals("attrvalue", resolved_value),
    )
}

fn pending_branches_conditions(
    prefix: &str,
    status_attribute: &str,
    merged_value: &str,
    since: DateTime<Local>,
) -> String {
    format!(
        "( {} ) and ( date > '{}' ) and ( (not attribute='{status_attribute}') or \
         (attribute='{status_attribute}' and not ( {} )) ) ",
        any_case_like("name", prefix),
        since.format(CHRONO_DATE_FORMAT),
        any_case_equals("attrvalue", merged_value),
    )
}

/// The query engine compares case-sensitively, so try the usual casings
fn any_case_like(field: &str, prefix: &str) -> String {
    format!(
        "{field} like '{prefix}%' or {field} like '{}%' or {field} like '{}%'",
        prefix.to_lowercase(),
        prefix.to_uppercase()
    )
}

fn any_case_equals(field: &str, value: &str) -> String {
    format!(
        "{field}='{value}' or {field}='{}' or {field}='{}'",
        value.to_lowercase(),
        value.to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_date() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_resolved_branches_query() {
        let query = resolved_branches_query("Ast-", "status", "Resolved", fixed_date());
        assert!(query.starts_with("branch where ( name like 'Ast-%' or name like 'ast-%' or name like 'AST-%' )"));
        assert!(query.contains("date > '2024-03-01 10:30:00'"));
        assert!(query.contains("attribute='status'"));
        assert!(query.contains("attrvalue='Resolved' or attrvalue='resolved' or attrvalue='RESOLVED'"));
    }

    #[test]
    fn test_pending_branches_conditions_exclude_merged() {
        let conditions = pending_branches_conditions("AST-", "status", "merged", fixed_date());
        assert!(conditions.contains("(not attribute='status')"));
        assert!(conditions.contains("not ( attrvalue='merged' or attrvalue='merged' or attrvalue='MERGED' )"));
    }

    #[test]
    fn test_branch_with_review_from_row() {
        let row: FindRow = serde_json::from_str(
            r#"{"branchid": 10, "branchname": "/main/AST-1", "branchowner": "jo",
                "branchcomment": "", "reviewid": 55, "reviewtargetid": 10,
                "reviewstatus": 1, "reviewtitle": "please"}"#,
        )
        .unwrap();

        let entry = branch_with_review("assets", &row);
        assert_eq!(entry.branch.id, "10");
        assert_eq!(entry.branch.full_name, "/main/AST-1");
        assert_eq!(entry.review.id, "55");
        assert_eq!(entry.review.branch_id, "10");
        assert!(entry.review.is_approved());
    }
}
