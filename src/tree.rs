//! Arena-based tree structure shared by streamed posterior samples and the
//! summary target tree.
//!
//! Nodes are stored in a flat `Vec` and refer to each other by index, which
//! keeps traversal iterative (no recursion limits on very deep trees) and
//! lets per-node data such as clade codes live in parallel arrays.

use std::collections::BTreeMap;

/// A node attribute value as read from a tree log or written by the
/// annotator.
///
/// The type of each value is decided when it is read, not declared up front:
/// the same attribute name may carry numbers on one log and strings on
/// another. `Labels` is produced only by the annotator (frequency sets), the
/// parser never yields it.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Real(f64),
    Boolean(bool),
    Discrete(String),
    RealVector(Vec<f64>),
    Labels(Vec<String>),
}

impl AttributeValue {
    /// The value as a number, if it is one. Booleans map to 0.0 / 1.0.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            AttributeValue::Real(x) => Some(*x),
            AttributeValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            AttributeValue::RealVector(v) => Some(v),
            _ => None,
        }
    }
}

/// One node of a [`SummaryTree`].
#[derive(Clone, Debug, Default)]
pub struct TreeNode {
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Height above the youngest tip. Derived from branch lengths for
    /// streamed trees, rewritten by the annotator on the target tree.
    pub height: f64,
    /// Length of the branch leading to this node, if known.
    pub length: Option<f64>,
    /// Taxon label, set for tips only.
    pub taxon: Option<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A rooted tree with per-node named attributes.
///
/// Used both for the immutable trees of the posterior stream and for the
/// mutable target tree that the annotator writes summary statistics onto.
#[derive(Clone, Debug, Default)]
pub struct SummaryTree {
    nodes: Vec<TreeNode>,
    root: usize,
}

impl SummaryTree {
    pub fn new() -> Self {
        SummaryTree {
            nodes: Vec::new(),
            root: 0,
        }
    }

    /// Appends a fresh node, wiring it under `parent` when given, and returns
    /// its index.
    pub fn add_node(&mut self, parent: Option<usize>) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            parent,
            ..TreeNode::default()
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(idx);
        }
        idx
    }

    pub fn set_root(&mut self, idx: usize) {
        self.root = idx;
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, idx: usize) -> &TreeNode {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut TreeNode {
        &mut self.nodes[idx]
    }

    pub fn is_leaf(&self, idx: usize) -> bool {
        self.nodes[idx].is_leaf()
    }

    pub fn set_attribute(&mut self, idx: usize, name: &str, value: AttributeValue) {
        self.nodes[idx].attributes.insert(name.to_string(), value);
    }

    /// Number of tips.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Taxon labels of the tips, in node-index order.
    pub fn leaf_taxa(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .filter_map(|n| n.taxon.as_deref())
    }

    /// Post-order node indices (children before parents), computed with an
    /// explicit stack so arbitrarily deep trees cannot overflow the call
    /// stack.
    pub fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        if self.nodes.is_empty() {
            return order;
        }
        let mut stack = vec![(self.root, false)];
        while let Some((idx, expanded)) = stack.pop() {
            if expanded {
                order.push(idx);
                continue;
            }
            stack.push((idx, true));
            for &child in self.nodes[idx].children.iter().rev() {
                stack.push((child, false));
            }
        }
        order
    }

    /// Pre-order node indices (parents before children).
    pub fn pre_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        if self.nodes.is_empty() {
            return order;
        }
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            for &child in self.nodes[idx].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Derives node heights from branch lengths: the height of a node is the
    /// depth of the deepest tip minus the node's own depth from the root.
    /// Missing branch lengths count as zero.
    pub fn assign_heights_from_lengths(&mut self) {
        let order = self.pre_order();
        let mut depth = vec![0.0f64; self.nodes.len()];
        let mut max_depth = 0.0f64;
        for &idx in &order {
            if let Some(p) = self.nodes[idx].parent {
                depth[idx] = depth[p] + self.nodes[idx].length.unwrap_or(0.0);
            }
            if self.nodes[idx].is_leaf() && depth[idx] > max_depth {
                max_depth = depth[idx];
            }
        }
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            node.height = max_depth - depth[idx];
        }
    }

    /// Rewrites branch lengths from the current node heights
    /// (`parent height - node height`). The root keeps no branch length.
    pub fn assign_lengths_from_heights(&mut self) {
        for idx in 0..self.nodes.len() {
            match self.nodes[idx].parent {
                Some(p) => {
                    let length = self.nodes[p].height - self.nodes[idx].height;
                    self.nodes[idx].length = Some(length);
                }
                None => self.nodes[idx].length = None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ((A:1,B:1):1,C:2);
    fn balanced() -> SummaryTree {
        let mut t = SummaryTree::new();
        let root = t.add_node(None);
        let ab = t.add_node(Some(root));
        let a = t.add_node(Some(ab));
        let b = t.add_node(Some(ab));
        let c = t.add_node(Some(root));
        t.node_mut(a).taxon = Some("A".into());
        t.node_mut(b).taxon = Some("B".into());
        t.node_mut(c).taxon = Some("C".into());
        t.node_mut(ab).length = Some(1.0);
        t.node_mut(a).length = Some(1.0);
        t.node_mut(b).length = Some(1.0);
        t.node_mut(c).length = Some(2.0);
        t.set_root(root);
        t
    }

    #[test]
    fn test_post_order_children_first() {
        let t = balanced();
        let order = t.post_order();
        assert_eq!(order.len(), 5);
        let pos = |i: usize| order.iter().position(|&x| x == i).unwrap();
        for idx in 0..t.node_count() {
            for &c in &t.node(idx).children {
                assert!(pos(c) < pos(idx));
            }
        }
        // Root comes last
        assert_eq!(*order.last().unwrap(), t.root());
    }

    #[test]
    fn test_pre_order_parents_first() {
        let t = balanced();
        let order = t.pre_order();
        assert_eq!(order[0], t.root());
        let pos = |i: usize| order.iter().position(|&x| x == i).unwrap();
        for idx in 0..t.node_count() {
            if let Some(p) = t.node(idx).parent {
                assert!(pos(p) < pos(idx));
            }
        }
    }

    #[test]
    fn test_heights_from_lengths() {
        let mut t = balanced();
        t.assign_heights_from_lengths();
        // tips all at depth 2, so heights 0; internal node at depth 1
        assert_eq!(t.node(t.root()).height, 2.0);
        for idx in 0..t.node_count() {
            if t.is_leaf(idx) {
                assert_eq!(t.node(idx).height, 0.0);
            }
        }
        assert_eq!(t.node(1).height, 1.0);
    }

    #[test]
    fn test_lengths_from_heights() {
        let mut t = balanced();
        t.assign_heights_from_lengths();
        t.node_mut(1).height = 1.5;
        t.assign_lengths_from_heights();
        assert_eq!(t.node(1).length, Some(0.5));
        assert_eq!(t.node(2).length, Some(1.5));
        assert_eq!(t.node(t.root()).length, None);
    }

    #[test]
    fn test_attribute_value_typing() {
        assert_eq!(AttributeValue::Real(2.5).as_real(), Some(2.5));
        assert_eq!(AttributeValue::Boolean(true).as_real(), Some(1.0));
        assert_eq!(AttributeValue::Discrete("x".into()).as_real(), None);
        let v = AttributeValue::RealVector(vec![1.0, 2.0]);
        assert_eq!(v.as_vector(), Some(&[1.0, 2.0][..]));
    }
}
