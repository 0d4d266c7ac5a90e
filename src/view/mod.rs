//! Projection of branch records into a tree of view nodes.
//!
//! Nothing is precomputed: the host asks for the children of a node (or of
//! the root) and gets them projected from the latest snapshot. Every node
//! kind knows how to present itself ([`ViewNode::tree_item`]) and how to
//! expand ([`ViewNode::children`]).

pub mod render;

use serde::Serialize;

use crate::models::{BranchRecord, Issue};
use crate::reconciler::Snapshot;

pub use render::render_tree;

/// Context value attached to issue nodes for host actions.
pub const ISSUE_CONTEXT: &str = "issue";

/// Label of the details section.
pub const DETAILS_LABEL: &str = "📋 Details";

/// Label of the sub-issues section.
pub const SUB_ISSUES_LABEL: &str = "📑 Sub-issues";

/// Marker placed before the checked-out branch's label.
pub const ACTIVE_MARKER: &str = "✨";

/// Description shown on the checked-out branch's node.
pub const ACTIVE_DESCRIPTION: &str = "Current Branch";

/// Longest description excerpt shown in a tooltip.
const TOOLTIP_DESCRIPTION_CHARS: usize = 200;

/// Whether and how a node can be expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Collapsible {
    /// Leaf
    None,
    /// Expandable, shown closed
    Collapsed,
    /// Expandable, shown open
    Expanded,
}

/// How a node is presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeItem {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Markdown hover text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    pub collapsible: Collapsible,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_value: Option<&'static str>,
}

impl TreeItem {
    fn leaf(label: String) -> Self {
        Self {
            label,
            description: None,
            tooltip: None,
            collapsible: Collapsible::None,
            context_value: None,
        }
    }
}

/// A node of the projected tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewNode {
    /// A branch's issue at the root, or a child issue under a sub-issues section.
    Issue {
        issue_key: String,
        /// Unset for child issues
        branch_name: Option<String>,
        issue: Option<Issue>,
        sub_issues: Vec<Issue>,
        is_active: bool,
    },
    /// Field list of an issue
    Details { issue: Issue },
    /// The issue's long-form description
    Description { text: String },
    /// Children of an issue
    SubIssues { parent_key: String, items: Vec<Issue> },
    /// One `Name: value` line
    DetailItem { label: String },
}

impl ViewNode {
    /// Root node for a branch record.
    pub fn from_record(record: &BranchRecord) -> Self {
        ViewNode::Issue {
            issue_key: record.issue_key.clone(),
            branch_name: Some(record.branch_name.clone()),
            issue: record.issue.clone(),
            sub_issues: record.children().to_vec(),
            is_active: record.is_active,
        }
    }

    /// Node for a child issue. Child issues never list their own children.
    pub fn from_child(issue: &Issue) -> Self {
        ViewNode::Issue {
            issue_key: issue.key.clone(),
            branch_name: None,
            issue: Some(issue.clone()),
            sub_issues: Vec::new(),
            is_active: false,
        }
    }

    /// Issue key this node refers to, for issue nodes.
    pub fn issue_key(&self) -> Option<&str> {
        match self {
            ViewNode::Issue { issue_key, .. } => Some(issue_key),
            _ => None,
        }
    }

    /// How the node is presented.
    pub fn tree_item(&self) -> TreeItem {
        match self {
            ViewNode::Issue {
                issue_key,
                branch_name,
                issue,
                is_active,
                ..
            } => issue_item(issue_key, branch_name.as_deref(), issue.as_ref(), *is_active),
            ViewNode::Details { .. } => TreeItem {
                collapsible: Collapsible::Expanded,
                ..TreeItem::leaf(DETAILS_LABEL.to_string())
            },
            ViewNode::SubIssues { .. } => TreeItem {
                collapsible: Collapsible::Collapsed,
                ..TreeItem::leaf(SUB_ISSUES_LABEL.to_string())
            },
            ViewNode::Description { text } => TreeItem::leaf(format!("Description: {}", text)),
            ViewNode::DetailItem { label } => TreeItem::leaf(label.clone()),
        }
    }

    /// Children of this node.
    pub fn children(&self) -> Vec<ViewNode> {
        match self {
            ViewNode::Issue {
                issue: Some(issue),
                issue_key,
                sub_issues,
                ..
            } => {
                let mut sections = vec![ViewNode::Details {
                    issue: issue.clone(),
                }];
                if !sub_issues.is_empty() {
                    sections.push(ViewNode::SubIssues {
                        parent_key: issue_key.clone(),
                        items: sub_issues.clone(),
                    });
                }
                sections
            }
            ViewNode::Details { issue } => detail_items(issue),
            ViewNode::SubIssues { items, .. } => items.iter().map(ViewNode::from_child).collect(),
            ViewNode::Issue { issue: None, .. }
            | ViewNode::Description { .. }
            | ViewNode::DetailItem { .. } => Vec::new(),
        }
    }
}

fn issue_item(
    issue_key: &str,
    branch_name: Option<&str>,
    issue: Option<&Issue>,
    is_active: bool,
) -> TreeItem {
    let title = issue
        .map(|i| i.summary.as_str())
        .filter(|summary| !summary.is_empty())
        .or(branch_name)
        .unwrap_or_default();
    let mut label = format!("{} - {}", issue_key, title);
    if is_active {
        label = format!("{} {}", ACTIVE_MARKER, label);
    }

    let Some(issue) = issue else {
        return TreeItem {
            description: is_active.then(|| ACTIVE_DESCRIPTION.to_string()),
            ..TreeItem::leaf(label)
        };
    };

    TreeItem {
        label: format!("{} {}", type_icon(&issue.issue_type), label),
        description: Some(if is_active {
            ACTIVE_DESCRIPTION.to_string()
        } else {
            issue.status.clone()
        }),
        tooltip: Some(tooltip(issue)),
        collapsible: Collapsible::Collapsed,
        context_value: Some(ISSUE_CONTEXT),
    }
}

fn detail_items(issue: &Issue) -> Vec<ViewNode> {
    let mut items: Vec<ViewNode> = [
        format!("Type: {}", issue.issue_type),
        format!("Status: {}", issue.status),
        format!("Priority: {}", issue.priority),
        format!("Assignee: {}", issue.assignee),
    ]
    .into_iter()
    .map(|label| ViewNode::DetailItem { label })
    .collect();

    if let Some(text) = issue.description.as_ref().filter(|d| !d.is_empty()) {
        items.push(ViewNode::Description { text: text.clone() });
    }
    items
}

/// Pictogram for an issue type (case-insensitive).
pub fn type_icon(issue_type: &str) -> &'static str {
    match issue_type.to_lowercase().as_str() {
        "bug" => "🐛",
        "story" => "📖",
        "task" => "✅",
        "epic" => "🚀",
        "sub-task" => "📎",
        "sub-bug" => "🪲",
        _ => "📋",
    }
}

/// Markdown hover text for an issue.
pub fn tooltip(issue: &Issue) -> String {
    let mut text = format!(
        "### {}: {}\n\n**Type:** {}  \n**Status:** {}  \n**Priority:** {}  \n**Assignee:** {}  \n",
        issue.key, issue.summary, issue.issue_type, issue.status, issue.priority, issue.assignee
    );
    if let Some(description) = issue.description.as_deref().filter(|d| !d.is_empty()) {
        let excerpt: String = description.chars().take(TOOLTIP_DESCRIPTION_CHARS).collect();
        let ellipsis = if description.chars().count() > TOOLTIP_DESCRIPTION_CHARS {
            "..."
        } else {
            ""
        };
        text.push_str(&format!("\n---\n\n{}{}", excerpt, ellipsis));
    }
    text
}

/// Root nodes for a list of records.
pub fn roots(records: &[BranchRecord]) -> Vec<ViewNode> {
    records.iter().map(ViewNode::from_record).collect()
}

/// Children of `parent`, or the root nodes when `parent` is `None`.
pub fn children(records: &[BranchRecord], parent: Option<&ViewNode>) -> Vec<ViewNode> {
    match parent {
        None => roots(records),
        Some(node) => node.children(),
    }
}

/// Holds the latest published snapshot and projects it on request.
#[derive(Debug, Clone, Default)]
pub struct ViewProjector {
    snapshot: Snapshot,
    generation: u64,
}

impl ViewProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot. Nodes handed out earlier are stale afterwards.
    pub fn update(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
        self.generation += 1;
    }

    /// Number of updates received so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn records(&self) -> &[BranchRecord] {
        &self.snapshot
    }

    pub fn roots(&self) -> Vec<ViewNode> {
        roots(&self.snapshot)
    }

    pub fn children(&self, parent: Option<&ViewNode>) -> Vec<ViewNode> {
        children(&self.snapshot, parent)
    }

    /// Root node of the checked-out branch.
    pub fn active_node(&self) -> Option<ViewNode> {
        self.snapshot
            .iter()
            .find(|record| record.is_active)
            .map(ViewNode::from_record)
    }

    /// Root node for an issue key.
    pub fn find(&self, issue_key: &str) -> Option<ViewNode> {
        self.snapshot
            .iter()
            .find(|record| record.issue_key == issue_key)
            .map(ViewNode::from_record)
    }
}

/// What a host action (open, copy) applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueTarget {
    /// A raw issue key
    Key(String),
    /// A view node, e.g. the checked-out branch's
    Node(ViewNode),
}

impl IssueTarget {
    /// The issue key, if the target refers to one.
    pub fn issue_key(&self) -> Option<&str> {
        match self {
            IssueTarget::Key(key) => Some(key.trim()).filter(|k| !k.is_empty()),
            IssueTarget::Node(node) => node.issue_key(),
        }
    }
}
