//! Tree display utilities for query plans.

use std::fmt;

/// A node in a display tree.
///
/// Children are returned as owned handles so that views over borrowed
/// structures (for example a plan DAG walked from its sinks) can be rendered
/// without materialising a tree first.
pub trait TreeNode {
    /// Get the display label of this node.
    fn label(&self) -> String;

    /// Get child nodes.
    fn children(&self) -> Vec<Box<dyn TreeNode + '_>>;

    /// Get additional details to display.
    fn details(&self) -> Option<String> {
        None
    }
}

/// Helper for displaying one or more trees.
pub struct DisplayTree<'a> {
    roots: Vec<Box<dyn TreeNode + 'a>>,
}

impl<'a> DisplayTree<'a> {
    /// Create a display over a single root.
    pub fn new(root: Box<dyn TreeNode + 'a>) -> Self {
        Self { roots: vec![root] }
    }

    /// Create a display over several roots, rendered one after another.
    pub fn forest(roots: Vec<Box<dyn TreeNode + 'a>>) -> Self {
        Self { roots }
    }

    fn fmt_node(
        f: &mut fmt::Formatter<'_>,
        node: &dyn TreeNode,
        prefix: &str,
        is_last: bool,
    ) -> fmt::Result {
        let connector = if is_last { "└─ " } else { "├─ " };
        write!(f, "{prefix}{connector}")?;
        Self::fmt_label(f, node)?;

        let children = node.children();
        let child_prefix = format!("{prefix}{}", if is_last { "   " } else { "│  " });
        for (i, child) in children.iter().enumerate() {
            Self::fmt_node(f, child.as_ref(), &child_prefix, i == children.len() - 1)?;
        }
        Ok(())
    }

    fn fmt_label(f: &mut fmt::Formatter<'_>, node: &dyn TreeNode) -> fmt::Result {
        write!(f, "{}", node.label())?;
        if let Some(details) = node.details() {
            write!(f, " ({details})")?;
        }
        writeln!(f)
    }
}

impl fmt::Display for DisplayTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for root in &self.roots {
            Self::fmt_label(f, root.as_ref())?;
            let children = root.children();
            for (i, child) in children.iter().enumerate() {
                Self::fmt_node(f, child.as_ref(), "", i == children.len() - 1)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestNode {
        name: String,
        detail: Option<String>,
        children: Vec<TestNode>,
    }

    impl TestNode {
        fn leaf(name: &str) -> Self {
            Self {
                name: name.to_string(),
                detail: None,
                children: vec![],
            }
        }
    }

    impl TreeNode for TestNode {
        fn label(&self) -> String {
            self.name.clone()
        }

        fn children(&self) -> Vec<Box<dyn TreeNode + '_>> {
            self.children
                .iter()
                .map(|c| Box::new(TestNodeRef(c)) as Box<dyn TreeNode + '_>)
                .collect()
        }

        fn details(&self) -> Option<String> {
            self.detail.clone()
        }
    }

    struct TestNodeRef<'a>(&'a TestNode);

    impl TreeNode for TestNodeRef<'_> {
        fn label(&self) -> String {
            self.0.label()
        }

        fn children(&self) -> Vec<Box<dyn TreeNode + '_>> {
            self.0.children()
        }

        fn details(&self) -> Option<String> {
            self.0.details()
        }
    }

    #[test]
    fn test_display_tree() {
        let tree = TestNode {
            name: "yield".to_string(),
            detail: Some("_result".to_string()),
            children: vec![TestNode::leaf("merge"), TestNode::leaf("filter")],
        };

        let output = DisplayTree::new(Box::new(tree)).to_string();
        assert_eq!(output, "yield (_result)\n├─ merge\n└─ filter\n");
    }

    #[test]
    fn test_display_forest() {
        let roots: Vec<Box<dyn TreeNode>> =
            vec![Box::new(TestNode::leaf("a")), Box::new(TestNode::leaf("b"))];
        let output = DisplayTree::forest(roots).to_string();
        assert_eq!(output, "a\nb\n");
    }
}
