//! Compressed points-to graphs: the per-function escape summary.
//!
//! A summary is the canonical, caller-independent form of a function's
//! escape behavior. Nodes are addressed by an anchor (a formal parameter,
//! the return value, or one of the function's internal drains) plus a
//! field-access path from that anchor. Summaries are the only thing that
//! crosses function boundaries: callers embed them, the driver compares
//! them structurally to detect fixpoints, and previous compilations encode
//! them as dense annotation bitmasks.
//!
//! Everything here is kept sorted and deduplicated under the total order on
//! compressed nodes, so two structurally identical points-to graphs always
//! produce byte-for-byte identical summaries.

use indexmap::IndexSet;
use kestrel_ir::{EscapeAnnotation, FieldId};
use serde::{Deserialize, Serialize};

/// Anchor of a compressed node.
///
/// The derived order (return, then parameters, then drains) is part of the
/// summary's canonical form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum NodeKind {
    Return,
    Param(u32),
    Drain(u32),
}

/// A field-access path from an anchor, ordered lexicographically by field
/// identity.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FieldPath(pub Vec<FieldId>);

impl FieldPath {
    pub fn empty() -> Self {
        FieldPath(Vec::new())
    }

    pub fn child(&self, field: FieldId) -> Self {
        let mut path = self.0.clone();
        path.push(field);
        FieldPath(path)
    }
}

/// One addressable node of a compressed graph.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CompressedNode {
    pub kind: NodeKind,
    pub path: FieldPath,
}

impl CompressedNode {
    pub fn root(kind: NodeKind) -> Self {
        CompressedNode {
            kind,
            path: FieldPath::empty(),
        }
    }

    pub fn field(&self, field: FieldId) -> Self {
        CompressedNode {
            kind: self.kind,
            path: self.path.child(field),
        }
    }
}

/// A may-alias edge between two compressed nodes: the value at `from` may
/// hold the value at `to`.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CompressedEdge {
    pub from: CompressedNode,
    pub to: CompressedNode,
}

/// The canonical escape analysis result for one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSummary {
    pub param_count: u32,
    /// Number of internal drains the summary references.
    pub drain_count: u32,
    /// Sorted, deduplicated may-alias edges.
    pub edges: Vec<CompressedEdge>,
    /// Sorted, deduplicated escaping nodes.
    pub escapes: Vec<CompressedNode>,
}

impl FunctionSummary {
    /// The empty summary: nothing aliases, nothing escapes. Used for calls
    /// the analysis chooses to be optimistic about.
    pub fn optimistic(param_count: u32) -> Self {
        FunctionSummary {
            param_count,
            drain_count: 0,
            edges: Vec::new(),
            escapes: Vec::new(),
        }
    }

    /// The all-escaping summary: every parameter and the return value
    /// escape. Safe stand-in whenever a real result is unavailable.
    pub fn pessimistic(param_count: u32) -> Self {
        let mut escapes: Vec<CompressedNode> = (0..param_count)
            .map(|i| CompressedNode::root(NodeKind::Param(i)))
            .collect();
        escapes.push(CompressedNode::root(NodeKind::Return));
        let mut summary = FunctionSummary {
            param_count,
            drain_count: 0,
            edges: Vec::new(),
            escapes,
        };
        summary.canonicalize();
        summary
    }

    /// Sorts and deduplicates the edge and escape lists, establishing the
    /// canonical form compared across recomputations.
    pub fn canonicalize(&mut self) {
        self.edges.sort();
        self.edges.dedup();
        self.escapes.sort();
        self.escapes.dedup();
    }

    pub fn is_optimistic(&self) -> bool {
        self.edges.is_empty() && self.escapes.is_empty()
    }

    /// Decodes the dense annotation of a body-less function.
    ///
    /// Slot `param_count` is the return value. Nibble codes select whether
    /// each end of a points-to relation is the slot itself or its contents
    /// (the array-elements slot).
    pub fn from_annotation(annotation: &EscapeAnnotation, param_count: u32) -> Self {
        // Annotations narrower than the signature simply contribute nothing
        // for the missing slots.
        let slots = param_count + 1;
        let slot_node = |slot: u32| {
            if slot == param_count {
                CompressedNode::root(NodeKind::Return)
            } else {
                CompressedNode::root(NodeKind::Param(slot))
            }
        };

        let mut edges = IndexSet::new();
        let mut escapes = IndexSet::new();
        for from in 0..slots {
            if annotation.slot_escapes(from) {
                escapes.insert(slot_node(from));
            }
            for to in 0..slots {
                let (from_node, to_node) = match annotation.points_to_kind(from, to) {
                    0 => continue,
                    1 => (slot_node(from), slot_node(to)),
                    2 => (slot_node(from), slot_node(to).field(FieldId::ELEMENTS)),
                    3 => (slot_node(from).field(FieldId::ELEMENTS), slot_node(to)),
                    _ => (
                        slot_node(from).field(FieldId::ELEMENTS),
                        slot_node(to).field(FieldId::ELEMENTS),
                    ),
                };
                edges.insert(CompressedEdge {
                    from: from_node,
                    to: to_node,
                });
            }
        }

        let mut summary = FunctionSummary {
            param_count,
            drain_count: 0,
            edges: edges.into_iter().collect(),
            escapes: escapes.into_iter().collect(),
        };
        summary.canonicalize();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_order_is_return_params_drains() {
        let ret = CompressedNode::root(NodeKind::Return);
        let p0 = CompressedNode::root(NodeKind::Param(0));
        let p1 = CompressedNode::root(NodeKind::Param(1));
        let d0 = CompressedNode::root(NodeKind::Drain(0));
        let mut nodes = vec![d0.clone(), p1.clone(), ret.clone(), p0.clone()];
        nodes.sort();
        assert_eq!(nodes, vec![ret, p0, p1, d0]);
    }

    #[test]
    fn paths_order_lexicographically() {
        let p = CompressedNode::root(NodeKind::Param(0));
        let short = p.field(FieldId(1));
        let long = p.field(FieldId(1)).field(FieldId(0));
        let other = p.field(FieldId(2));
        assert!(p < short);
        assert!(short < long, "a prefix sorts before its extensions");
        assert!(long < other);
    }

    #[test]
    fn canonicalize_sorts_and_dedups() {
        let p0 = CompressedNode::root(NodeKind::Param(0));
        let ret = CompressedNode::root(NodeKind::Return);
        let mut summary = FunctionSummary {
            param_count: 1,
            drain_count: 0,
            edges: vec![
                CompressedEdge {
                    from: p0.clone(),
                    to: ret.clone(),
                },
                CompressedEdge {
                    from: p0.clone(),
                    to: ret.clone(),
                },
            ],
            escapes: vec![p0.clone(), ret.clone(), p0.clone()],
        };
        summary.canonicalize();
        assert_eq!(summary.edges.len(), 1);
        assert_eq!(summary.escapes, vec![ret, p0]);
    }

    #[test]
    fn pessimistic_escapes_every_slot() {
        let summary = FunctionSummary::pessimistic(2);
        assert_eq!(summary.escapes.len(), 3, "two params plus return");
        assert!(summary.edges.is_empty());
        assert!(!summary.is_optimistic());
        assert!(FunctionSummary::optimistic(2).is_optimistic());
    }

    #[test]
    fn annotation_decodes_to_edges_and_escapes() {
        // Two parameters: slot 2 is the return. Param 0 escapes; param 1's
        // contents point to the return value.
        let mut ann = EscapeAnnotation::new(3);
        ann.mark_escapes(0);
        ann.set_points_to(1, 2, 3);
        let summary = FunctionSummary::from_annotation(&ann, 2);

        assert_eq!(
            summary.escapes,
            vec![CompressedNode::root(NodeKind::Param(0))]
        );
        assert_eq!(summary.edges.len(), 1);
        let edge = &summary.edges[0];
        assert_eq!(
            edge.from,
            CompressedNode::root(NodeKind::Param(1)).field(FieldId::ELEMENTS)
        );
        assert_eq!(edge.to, CompressedNode::root(NodeKind::Return));
    }

    #[test]
    fn summary_serializes_round_trip() {
        let summary = FunctionSummary::pessimistic(1);
        let json = serde_json::to_string(&summary).unwrap();
        let back: FunctionSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }
}
