//! Response shapes of the tracker's REST API (only fields we care about).

use serde::Deserialize;

use crate::models::{Issue, NO_PRIORITY, UNASSIGNED, UNKNOWN_TYPE};

/// Response from GET /rest/api/2/issue/{key}, also one item of a search.
#[derive(Debug, Deserialize)]
pub struct IssueResponse {
    pub id: String,
    pub key: String,
    pub fields: IssueFields,
}

#[derive(Debug, Deserialize)]
pub struct IssueFields {
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: NamedField,
    #[serde(default)]
    pub assignee: Option<UserField>,
    #[serde(default)]
    pub issuetype: Option<NamedField>,
    #[serde(default)]
    pub priority: Option<NamedField>,
}

#[derive(Debug, Deserialize)]
pub struct NamedField {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UserField {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

/// Response from GET /rest/api/2/search
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub issues: Vec<IssueResponse>,
}

impl IssueResponse {
    /// Map into the internal model, filling in the sentinel defaults.
    pub fn into_issue(self) -> Issue {
        let fields = self.fields;
        Issue {
            id: self.id,
            key: self.key,
            summary: fields.summary,
            description: fields.description.filter(|d| !d.is_empty()),
            status: fields.status.name,
            assignee: fields
                .assignee
                .and_then(|a| a.display_name)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| UNASSIGNED.to_string()),
            issue_type: fields
                .issuetype
                .map(|t| t.name)
                .unwrap_or_else(|| UNKNOWN_TYPE.to_string()),
            priority: fields
                .priority
                .map(|p| p.name)
                .unwrap_or_else(|| NO_PRIORITY.to_string()),
        }
    }
}

impl SearchResponse {
    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
            .into_iter()
            .map(IssueResponse::into_issue)
            .collect()
    }
}
