//! Canonical node ordering.
//!
//! Nodes are ordered by name case-insensitively, then ordinally, and nodes
//! whose names are identical are ordered by their parent chains. Sorting is
//! indirect: an index permutation is sorted and then inverted into a ranking
//! used to rebuild the table with remapped parent pointers.

use std::cmp::Ordering;

use super::node::{BuilderNode, Node, TextSpan, ROOT_NODE_PARENT_INDEX};

pub fn compare_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

pub fn equals_ignore_case(a: &str, b: &str) -> bool {
    compare_ignore_case(a, b) == Ordering::Equal
}

/// Case-insensitive order with an ordinal tiebreak, so the order is total over
/// distinct strings.
pub fn compare_total(a: &str, b: &str) -> Ordering {
    compare_ignore_case(a, b).then_with(|| a.cmp(b))
}

/// Compares two builder nodes by name and then by ancestry.
///
/// Walks both parent chains in lock step rather than recursing, so nesting
/// depth is not bounded by the stack.
pub fn compare_nodes(mut x: usize, mut y: usize, nodes: &[BuilderNode]) -> Ordering {
    loop {
        let (x_node, y_node) = (&nodes[x], &nodes[y]);
        let comparison = compare_total(&x_node.name, &y_node.name);
        if comparison != Ordering::Equal || x_node.parent_index == y_node.parent_index {
            return comparison;
        }

        if x_node.is_root() {
            return Ordering::Less;
        }
        if y_node.is_root() {
            return Ordering::Greater;
        }

        x = x_node.parent_index as usize;
        y = y_node.parent_index as usize;
    }
}

/// Output of [`sort_nodes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedNodes {
    pub concatenated_names: String,
    pub nodes: Vec<Node>,
    /// `ranking[original_index]` is the node's position in `nodes`
    pub ranking: Vec<usize>,
}

pub fn sort_nodes(unsorted: &[BuilderNode]) -> SortedNodes {
    debug_assert!(
        unsorted.iter().filter(|node| node.is_root()).count() == 1,
        "node list must contain exactly one root"
    );
    debug_assert!(unsorted
        .iter()
        .enumerate()
        .all(|(index, node)| node.is_root() || (node.parent_index as usize) < index));

    let mut order: Vec<usize> = (0..unsorted.len()).collect();
    order.sort_by(|&x, &y| compare_nodes(x, y, unsorted));

    let mut ranking = vec![0usize; unsorted.len()];
    for (sorted_index, &original_index) in order.iter().enumerate() {
        ranking[original_index] = sorted_index;
    }

    let mut concatenated_names = String::new();
    let mut nodes = Vec::with_capacity(unsorted.len());
    let mut last: Option<(&str, TextSpan)> = None;

    for &original_index in &order {
        let node = &unsorted[original_index];
        let span = match last {
            Some((last_name, last_span)) if last_name == node.name => last_span,
            _ => {
                let span = TextSpan::new(concatenated_names.len() as u32, node.name.len() as u32);
                concatenated_names.push_str(&node.name);
                last = Some((node.name.as_str(), span));
                span
            }
        };

        let parent_index = if node.is_root() {
            ROOT_NODE_PARENT_INDEX
        } else {
            ranking[node.parent_index as usize] as i32
        };
        nodes.push(Node::new(span, parent_index));
    }

    SortedNodes {
        concatenated_names,
        nodes,
        ranking,
    }
}
