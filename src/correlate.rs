//! Mirrors the array shape of a source path onto a destination path.
//!
//! A mapping such as `$.X[*].Y[*]` -> `$.A[*].B[*]` must reproduce, branch by
//! branch, the cardinalities found in the source: two `X` entries holding
//! three and two `Y` entries yield two `A` entries holding three and two `B`
//! entries. The correspondence is built breadth-first as a tree of index
//! tuples and then walked depth-first to pair every leaf with one source value.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::error::{MessageError, Result};
use crate::path::{self, WildcardPath};

#[derive(Debug, Clone)]
struct CorrelationNode {
    indices: Vec<usize>,
    children: Vec<usize>,
}

/// Index tuples for every wildcard level, rooted at the destination's fixed prefix.
#[derive(Debug, Clone)]
pub struct CorrelationTree {
    nodes: Vec<CorrelationNode>,
    depth: usize,
}

impl CorrelationTree {
    pub fn build(source: &Value, source_path: &WildcardPath) -> Result<Self> {
        let depth = source_path.wildcard_count();
        let mut nodes = vec![CorrelationNode {
            indices: Vec::new(),
            children: Vec::new(),
        }];
        let mut frontier = vec![0usize];
        for level in 0..depth {
            let mut next = Vec::new();
            for parent in frontier {
                let indices = nodes[parent].indices.clone();
                let width = path::count(source, &source_path.prefix(level, &indices))?;
                for index in 0..width {
                    let mut child_indices = indices.clone();
                    child_indices.push(index);
                    let id = nodes.len();
                    nodes.push(CorrelationNode {
                        indices: child_indices,
                        children: Vec::new(),
                    });
                    nodes[parent].children.push(id);
                    next.push(id);
                }
            }
            frontier = next;
        }
        Ok(Self { nodes, depth })
    }

    /// Fully indexed leaves in depth-first, index order.
    pub fn leaves(&self) -> Vec<&[usize]> {
        let mut out = Vec::new();
        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if node.indices.len() == self.depth {
                out.push(node.indices.as_slice());
                continue;
            }
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

/// Writes `source_values` (the flattened matches of `source_path`) into
/// `destination` along `destination_path`, one value per source leaf.
pub fn project(
    source: &Value,
    source_path: &str,
    mut destination: Value,
    destination_path: &str,
    source_values: &[Value],
) -> Result<Value> {
    let structural = |message: String| MessageError::Structural {
        source_path: source_path.to_string(),
        destination: destination_path.to_string(),
        message,
    };

    let source_shape = WildcardPath::parse(source_path);
    let destination_shape = WildcardPath::parse(destination_path);
    if source_shape.wildcard_count() != destination_shape.wildcard_count() {
        return Err(structural(format!(
            "source has {} wildcard segments but destination has {}",
            source_shape.wildcard_count(),
            destination_shape.wildcard_count()
        )));
    }

    let tree = CorrelationTree::build(source, &source_shape)?;
    let mut renumber = DenseIndices::default();
    let mut slots = Vec::new();
    for indices in tree.leaves() {
        if path::first(source, &source_shape.concrete(indices))?.is_some() {
            slots.push(destination_shape.concrete(&renumber.assign(indices)));
        }
    }
    if slots.len() != source_values.len() {
        return Err(structural(format!(
            "{} destination slots for {} source values",
            slots.len(),
            source_values.len()
        )));
    }

    // the destination array is rebuilt, never merged with what was there
    let root = destination_shape.prefix(0, &[]);
    if !slots.is_empty() || path::first(&destination, &root)?.is_some() {
        path::assign(&mut destination, &root, Value::Array(Vec::new()))?;
    }

    debug!(
        source = source_path,
        destination = destination_path,
        slots = slots.len(),
        "projecting array-shaped output"
    );
    for (slot, value) in slots.iter().zip(source_values) {
        path::assign(&mut destination, slot, value.clone())?;
    }
    Ok(destination)
}

/// Maps source index tuples onto gap-free destination tuples, numbering the
/// children of each destination parent in the order they are first kept.
#[derive(Debug, Default)]
struct DenseIndices {
    seen: HashMap<(Vec<usize>, usize), usize>,
    widths: HashMap<Vec<usize>, usize>,
}

impl DenseIndices {
    fn assign(&mut self, source: &[usize]) -> Vec<usize> {
        let mut dense = Vec::with_capacity(source.len());
        for &index in source {
            let key = (dense.clone(), index);
            let next = match self.seen.get(&key) {
                Some(existing) => *existing,
                None => {
                    let width = self.widths.entry(dense.clone()).or_insert(0);
                    let fresh = *width;
                    *width += 1;
                    self.seen.insert(key, fresh);
                    fresh
                }
            };
            dense.push(next);
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mirrors_nested_cardinalities() {
        let source = json!({ "X": [{ "Y": [1, 2] }, { "Y": [3] }] });
        let result = project(
            &source,
            "$.X[*].Y[*]",
            json!({}),
            "$.A[*].B[*]",
            &[json!(1), json!(2), json!(3)],
        )
        .unwrap();
        assert_eq!(result, json!({ "A": [{ "B": [1, 2] }, { "B": [3] }] }));
    }

    #[test]
    fn tree_leaves_follow_index_order() {
        let source = json!({ "X": [{ "Y": [1, 2, 3] }, { "Y": [4, 5] }] });
        let tree = CorrelationTree::build(&source, &WildcardPath::parse("$.X[*].Y[*]")).unwrap();
        let leaves: Vec<Vec<usize>> = tree.leaves().into_iter().map(<[usize]>::to_vec).collect();
        assert_eq!(
            leaves,
            vec![vec![0, 0], vec![0, 1], vec![0, 2], vec![1, 0], vec![1, 1]]
        );
    }

    #[test]
    fn keeps_fields_after_the_last_wildcard() {
        let source = json!({ "granules": [{ "id": "g1" }, { "id": "g2" }] });
        let result = project(
            &source,
            "$.granules[*].id",
            json!({ "payload": { "other": true } }),
            "$.payload.ids[*].value",
            &[json!("g1"), json!("g2")],
        )
        .unwrap();
        assert_eq!(
            result,
            json!({
                "payload": {
                    "other": true,
                    "ids": [{ "value": "g1" }, { "value": "g2" }]
                }
            })
        );
    }

    #[test]
    fn skips_branches_missing_the_tail() {
        let source = json!({ "items": [{ "id": 1 }, {}, { "id": 3 }] });
        let result = project(
            &source,
            "$.items[*].id",
            json!({}),
            "$.ids[*]",
            &[json!(1), json!(3)],
        )
        .unwrap();
        assert_eq!(result, json!({ "ids": [1, 3] }));
    }

    #[test]
    fn nested_branches_without_values_leave_no_gaps() {
        let source = json!({
            "X": [
                { "Y": [{ "v": 1 }, {}, { "v": 2 }] },
                { "Y": [{}] },
                { "Y": [{ "v": 3 }] }
            ]
        });
        let result = project(
            &source,
            "$.X[*].Y[*].v",
            json!({}),
            "$.A[*].B[*]",
            &[json!(1), json!(2), json!(3)],
        )
        .unwrap();
        assert_eq!(result, json!({ "A": [{ "B": [1, 2] }, { "B": [3] }] }));
    }

    #[test]
    fn replaces_existing_destination_arrays() {
        let result = project(
            &json!({ "X": [1, 2] }),
            "$.X[*]",
            json!({ "meta": { "A": [9, 9, 9, 9], "keep": true } }),
            "$.meta.A[*]",
            &[json!(1), json!(2)],
        )
        .unwrap();
        assert_eq!(result, json!({ "meta": { "A": [1, 2], "keep": true } }));

        let emptied = project(
            &json!({ "X": [] }),
            "$.X[*]",
            json!({ "meta": { "A": [9, 9] } }),
            "$.meta.A[*]",
            &[],
        )
        .unwrap();
        assert_eq!(emptied, json!({ "meta": { "A": [] } }));
    }

    #[test]
    fn rejects_mismatched_wildcard_counts() {
        let err = project(&json!({ "X": [] }), "$.X[*]", json!({}), "$.A[*].B[*]", &[])
            .unwrap_err();
        assert!(matches!(err, MessageError::Structural { .. }));
    }

    #[test]
    fn empty_source_arrays_project_nothing() {
        let result = project(&json!({ "X": [] }), "$.X[*]", json!({}), "$.A[*]", &[]).unwrap();
        assert_eq!(result, json!({}));
    }
}
