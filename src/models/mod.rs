//! Data models for Tiller.
//!
//! - [`Issue`]: an issue tracker record, immutable once constructed
//! - [`BranchRecord`]: a local branch associated with its resolved issue
//! - [`BranchList`]: the ordered, key-unique list of branch records

use serde::{Deserialize, Serialize};

/// Assignee shown when the tracker reports none.
pub const UNASSIGNED: &str = "Unassigned";

/// Priority shown when the tracker reports none.
pub const NO_PRIORITY: &str = "None";

/// Issue type shown when the tracker reports none.
pub const UNKNOWN_TYPE: &str = "Unknown";

/// An issue tracker record.
///
/// Replaced wholesale on refetch, never mutated in place. The serialized
/// shape is the one stored in the persistent cache document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Tracker-internal id (opaque)
    pub id: String,
    /// Issue key, e.g. `ABC-123`
    pub key: String,
    /// One-line summary
    pub summary: String,
    /// Long-form description, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Workflow status label
    pub status: String,
    /// Assignee display name, never empty
    pub assignee: String,
    /// Issue type label (Bug, Story, Task, ...)
    #[serde(rename = "type")]
    pub issue_type: String,
    /// Priority label
    pub priority: String,
}

/// A local branch associated with an issue key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    /// Local branch name
    pub branch_name: String,
    /// Issue key extracted from the branch name
    pub issue_key: String,
    /// Resolved issue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<Issue>,
    /// Child issues of the resolved issue, in tracker order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_issues: Option<Vec<Issue>>,
    /// Whether this branch is currently checked out
    pub is_active: bool,
}

impl BranchRecord {
    /// Create a record for a resolved branch.
    pub fn new(
        branch_name: impl Into<String>,
        issue_key: impl Into<String>,
        issue: Option<Issue>,
        sub_issues: Option<Vec<Issue>>,
        is_active: bool,
    ) -> Self {
        Self {
            branch_name: branch_name.into(),
            issue_key: issue_key.into(),
            issue,
            sub_issues,
            is_active,
        }
    }

    /// Child issues, empty if none were resolved.
    pub fn children(&self) -> &[Issue] {
        self.sub_issues.as_deref().unwrap_or_default()
    }
}

/// Ordered list of branch records with at most one record per issue key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchList {
    records: Vec<BranchRecord>,
}

impl BranchList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in display order.
    pub fn records(&self) -> &[BranchRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record by issue key.
    pub fn get(&self, issue_key: &str) -> Option<&BranchRecord> {
        self.records.iter().find(|r| r.issue_key == issue_key)
    }

    /// The checked-out branch's record, if tracked.
    pub fn active(&self) -> Option<&BranchRecord> {
        self.records.iter().find(|r| r.is_active)
    }

    /// Merge a record into the list.
    ///
    /// - An existing record with the same key is replaced at its position,
    ///   unless the new record is active, in which case it moves to the front.
    /// - A new inactive record is appended; a new active record is prepended.
    /// - Merging an active record clears the active flag everywhere else.
    pub fn merge(&mut self, record: BranchRecord) {
        if record.is_active {
            self.records.retain(|r| r.issue_key != record.issue_key);
            for existing in &mut self.records {
                existing.is_active = false;
            }
            self.records.insert(0, record);
            return;
        }

        match self
            .records
            .iter()
            .position(|r| r.issue_key == record.issue_key)
        {
            Some(index) => self.records[index] = record,
            None => self.records.push(record),
        }
    }

    /// Mark every record as not checked out.
    pub fn deactivate_all(&mut self) {
        for record in &mut self.records {
            record.is_active = false;
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Copy of the records for publishing.
    pub fn snapshot(&self) -> Vec<BranchRecord> {
        self.records.clone()
    }
}
