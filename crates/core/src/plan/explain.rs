//! EXPLAIN rendering: one line per node, indented by depth with
//! box-drawing branch prefixes.

use crate::exe::Node;

/// Render a plan tree below a root label.
///
/// ```text
/// SELECT
///   └── ClientFilter: count > 5
///       └── ClientAggregate: group by ownerid; count(*) as count
///           └── FetchXmlScan: account (autopage)
/// ```
pub fn render(label: &str, root: &Node, decoration: Option<&str>) -> String {
	let mut out = String::new();
	out.push_str(label);
	if let Some(decoration) = decoration {
		out.push_str(" (");
		out.push_str(decoration);
		out.push(')');
	}
	out.push('\n');
	render_node(&mut out, root, "  ", true);
	out
}

fn render_node(out: &mut String, node: &Node, prefix: &str, last: bool) {
	out.push_str(prefix);
	out.push_str(if last {
		"└── "
	} else {
		"├── "
	});
	out.push_str(&node.describe());
	out.push('\n');
	let children = node.children();
	let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
	for (i, child) in children.iter().enumerate() {
		render_node(out, child, &child_prefix, i + 1 == children.len());
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::RowStream;
	use crate::err::Result;
	use crate::exe::{ExecContext, PlanNode};
	use async_trait::async_trait;
	use std::sync::Arc;

	struct Fake {
		name: &'static str,
		children: Vec<Node>,
	}

	#[async_trait]
	impl PlanNode for Fake {
		fn describe(&self) -> String {
			self.name.to_owned()
		}

		fn children(&self) -> Vec<Node> {
			self.children.clone()
		}

		async fn execute(&self, _: &ExecContext) -> Result<RowStream> {
			unreachable!("explain never executes")
		}
	}

	fn node(name: &'static str, children: Vec<Node>) -> Node {
		Arc::new(Fake {
			name,
			children,
		})
	}

	#[test]
	fn renders_nested_tree() {
		let tree = node(
			"ClientFilter: count > 5",
			vec![node(
				"ClientAggregate: group by ownerid; count(*) as count",
				vec![node("FetchXmlScan: account (autopage)", vec![])],
			)],
		);
		let text = render("SELECT", &tree, None);
		let expected = "SELECT\n  └── ClientFilter: count > 5\n      └── ClientAggregate: \
		                group by ownerid; count(*) as count\n          └── FetchXmlScan: \
		                account (autopage)\n";
		assert_eq!(text, expected);
	}

	#[test]
	fn sibling_branches_use_tee_prefixes() {
		let tree = node("HashJoin (Inner): a = b", vec![node("Left", vec![]), node("Right", vec![])]);
		let text = render("SELECT", &tree, None);
		assert!(text.contains("├── Left"));
		assert!(text.contains("└── Right"));
	}

	#[test]
	fn root_decoration_appends_pool_info() {
		let tree = node("MergeAggregate: avg", vec![]);
		let text = render("SELECT", &tree, Some("Pool capacity: 4, Effective parallelism: 4"));
		assert!(text.starts_with("SELECT (Pool capacity: 4, Effective parallelism: 4)\n"));
	}
}
