//! Plain-text rendering of the projected tree.

use super::{Collapsible, ViewNode};

/// Render `roots` as an indented tree.
///
/// Nodes shown open by default are expanded; `expand_all` expands every
/// expandable node.
pub fn render_tree(roots: &[ViewNode], expand_all: bool) -> String {
    let mut out = String::new();
    for (i, node) in roots.iter().enumerate() {
        render_node(&mut out, node, "", i + 1 == roots.len(), expand_all);
    }
    out
}

fn render_node(out: &mut String, node: &ViewNode, prefix: &str, last: bool, expand_all: bool) {
    let item = node.tree_item();
    let branch = if last { "└── " } else { "├── " };

    out.push_str(prefix);
    out.push_str(branch);
    out.push_str(&item.label);
    if let Some(description) = &item.description {
        out.push_str("  (");
        out.push_str(description);
        out.push(')');
    }
    out.push('\n');

    let expand = match item.collapsible {
        Collapsible::None => false,
        Collapsible::Expanded => true,
        Collapsible::Collapsed => expand_all,
    };
    if !expand {
        return;
    }

    let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
    let children = node.children();
    for (i, child) in children.iter().enumerate() {
        render_node(out, child, &child_prefix, i + 1 == children.len(), expand_all);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BranchRecord;
    use crate::test_utils::issue;
    use crate::view::roots;

    fn records() -> Vec<BranchRecord> {
        vec![
            BranchRecord::new(
                "ABC-1-foo",
                "ABC-1",
                Some(issue("ABC-1", "Foo")),
                Some(vec![issue("ABC-3", "Child")]),
                true,
            ),
            BranchRecord::new("ABC-2-bar", "ABC-2", Some(issue("ABC-2", "Bar")), None, false),
        ]
    }

    #[test]
    fn test_render_collapsed_shows_roots_only() {
        let text = render_tree(&roots(&records()), false);
        assert_eq!(
            text,
            "├── ✅ ✨ ABC-1 - Foo  (Current Branch)\n└── ✅ ABC-2 - Bar  (To Do)\n"
        );
    }

    #[test]
    fn test_render_expanded_shows_every_level() {
        let text = render_tree(&roots(&records()), true);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "├── ✅ ✨ ABC-1 - Foo  (Current Branch)");
        assert_eq!(lines[1], "│   ├── 📋 Details");
        assert_eq!(lines[2], "│   │   ├── Type: Task");
        assert!(lines.contains(&"│   └── 📑 Sub-issues"));
        assert!(lines.contains(&"│       └── ✅ ABC-3 - Child  (To Do)"));
        assert!(lines.contains(&"    └── 📋 Details"));
        assert!(lines.contains(&"        └── Assignee: Unassigned"));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render_tree(&[], true), "");
    }
}
