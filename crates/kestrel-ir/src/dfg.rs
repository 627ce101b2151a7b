//! Per-function dataflow graphs.
//!
//! A dataflow graph is the typed, flattened view of one function body: one
//! node per value-producing operation, plus the parameter list, the set of
//! nodes feeding the function's return, and per-node lexical scope depth.
//! Nodes are immutable once the graph is built.

use crate::AllocSiteId;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Index of a dataflow node within its owning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DfId(pub u32);

impl std::fmt::Display for DfId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "d{}", self.0)
    }
}

/// Identity of a field, unique per declared field across the program.
///
/// Two labels are reserved and never collide with declared fields: the
/// synthetic slot shared by all elements of an array, and the internal
/// label used to aggregate a function's return paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub u32);

impl FieldId {
    /// The single aliased "contents" slot of an array value.
    pub const ELEMENTS: FieldId = FieldId(u32::MAX - 1);
    /// Reserved label aggregating all return edges on the returns node.
    pub const RETURNS: FieldId = FieldId(u32::MAX);
}

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            FieldId::ELEMENTS => write!(f, ".[]"),
            FieldId::RETURNS => write!(f, ".ret"),
            FieldId(n) => write!(f, ".f{n}"),
        }
    }
}

bitflags! {
    /// Attribute flags attached to a dataflow node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DfFlags: u8 {
        /// The node executes inside a loop body.
        const IN_LOOP = 1 << 0;
        /// The node's value feeds an exception path.
        const THROWS = 1 << 1;
    }
}

/// Static shape of an allocation, as far as the front end could determine it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocShape {
    /// A plain object instance of statically known size.
    Object { bytes: u32 },
    /// An array; the element size is always known, the length only when the
    /// source length expression was a compile-time constant.
    Array {
        elem_bytes: u32,
        const_len: Option<u32>,
        of_objects: bool,
    },
}

impl AllocShape {
    /// Total byte size if statically known.
    pub fn static_bytes(&self) -> Option<u64> {
        match *self {
            AllocShape::Object { bytes } => Some(bytes as u64),
            AllocShape::Array {
                elem_bytes,
                const_len: Some(len),
                ..
            } => Some(elem_bytes as u64 * len as u64),
            AllocShape::Array { .. } => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, AllocShape::Array { .. })
    }
}

/// One value-producing operation in a function body.
///
/// A closed set: the analysis matches exhaustively and the compiler enforces
/// coverage when new kinds are added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfNode {
    /// An allocation site producing a fresh object or array.
    Alloc { site: AllocSiteId, shape: AllocShape },
    /// The value returned by a call; the call's callee and arguments live in
    /// the call graph, keyed by this node.
    Call,
    /// `receiver.field` read. A `None` receiver is an access through an
    /// unknown/external object.
    FieldRead {
        receiver: Option<DfId>,
        field: FieldId,
    },
    /// `receiver.field = value` write. A `None` receiver stores through an
    /// unknown/external object.
    FieldWrite {
        receiver: Option<DfId>,
        field: FieldId,
        value: DfId,
    },
    /// `array[i]` read; all elements share one slot.
    ArrayRead { array: DfId },
    /// `array[i] = value` write.
    ArrayWrite { array: DfId, value: DfId },
    /// A variable merge point: the variable may hold any of the listed values.
    Variable { values: Vec<DfId> },
    /// Reference to formal parameter `index`.
    Parameter { index: u32 },
    /// A primitive constant; participates in the graph but never holds a
    /// heap reference.
    Const,
    /// The null reference.
    Null,
}

/// A dataflow node together with its per-function attributes.
#[derive(Debug, Clone)]
pub struct DfNodeData {
    pub kind: DfNode,
    /// Lexical nesting depth; 0 is the function root scope.
    pub scope_depth: u32,
    pub flags: DfFlags,
}

/// The dataflow body of one declared function.
#[derive(Debug, Clone, Default)]
pub struct DataFlowGraph {
    nodes: Vec<DfNodeData>,
    params: Vec<DfId>,
    returns: Vec<DfId>,
}

impl DataFlowGraph {
    pub fn new() -> Self {
        DataFlowGraph::default()
    }

    pub fn push(&mut self, data: DfNodeData) -> DfId {
        let id = DfId(self.nodes.len() as u32);
        if let DfNode::Parameter { .. } = data.kind {
            self.params.push(id);
        }
        self.nodes.push(data);
        id
    }

    pub fn node(&self, id: DfId) -> Option<&DfNodeData> {
        self.nodes.get(id.0 as usize)
    }

    pub fn node_mut(&mut self, id: DfId) -> Option<&mut DfNodeData> {
        self.nodes.get_mut(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = DfId> + '_ {
        (0..self.nodes.len() as u32).map(DfId)
    }

    /// Parameter nodes in declaration order.
    pub fn params(&self) -> &[DfId] {
        &self.params
    }

    /// Nodes feeding the function's declared return points; these are the
    /// function's literal return expressions.
    pub fn returns(&self) -> &[DfId] {
        &self.returns
    }

    pub fn mark_return(&mut self, id: DfId) {
        if !self.returns.contains(&id) {
            self.returns.push(id);
        }
    }

    /// All allocation sites in this body, in node order.
    pub fn alloc_sites(&self) -> Vec<AllocSiteId> {
        self.nodes
            .iter()
            .filter_map(|n| match n.kind {
                DfNode::Alloc { site, .. } => Some(site),
                _ => None,
            })
            .collect()
    }
}
