//! Call graph and external-function escape annotations.
//!
//! The call graph is built (and devirtualized as far as feasible) by an
//! upstream pass; the escape analysis consumes it read-only. Virtual call
//! sites that could not be devirtualized are kept as `Callee::Virtual` and
//! resolved by the engine's unknown-call policy.

use crate::dfg::DfId;
use crate::FunctionId;
use rustc_hash::FxHashMap;

/// Resolution state of a call site's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    /// Statically resolved target symbol.
    Direct(FunctionId),
    /// Unresolved virtual dispatch.
    Virtual,
}

/// One call site inside a caller's body.
#[derive(Debug, Clone)]
pub struct CallSite {
    /// The `Call` dataflow node producing the call's result value.
    pub call_node: DfId,
    pub callee: Callee,
    /// Actual argument dataflow nodes, in parameter order.
    pub args: Vec<DfId>,
}

/// Program-wide call graph with a reverse-edge index.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    sites: FxHashMap<FunctionId, Vec<CallSite>>,
    callers: FxHashMap<FunctionId, Vec<FunctionId>>,
}

impl CallGraph {
    pub fn new() -> Self {
        CallGraph::default()
    }

    pub fn add_site(&mut self, caller: FunctionId, site: CallSite) {
        if let Callee::Direct(callee) = site.callee {
            let backs = self.callers.entry(callee).or_default();
            if !backs.contains(&caller) {
                backs.push(caller);
            }
        }
        self.sites.entry(caller).or_default().push(site);
    }

    /// Call sites of one function, in body order.
    pub fn sites(&self, caller: FunctionId) -> &[CallSite] {
        self.sites.get(&caller).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Functions with at least one direct call to `callee`.
    pub fn callers(&self, callee: FunctionId) -> &[FunctionId] {
        self.callers
            .get(&callee)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Direct callees of `caller`, deduplicated, in first-site order.
    pub fn direct_callees(&self, caller: FunctionId) -> Vec<FunctionId> {
        let mut out = Vec::new();
        for site in self.sites(caller) {
            if let Callee::Direct(callee) = site.callee {
                if !out.contains(&callee) {
                    out.push(callee);
                }
            }
        }
        out
    }
}

/// Precomputed escape summary of a body-less function, in the dense numeric
/// form produced by a previous compilation.
///
/// `escapes` has one bit per slot: bit `i` for parameter `i`, bit
/// `param_count` for the return slot. `points_to` has one word per slot;
/// nibble `j` of word `i` encodes how slot `i` may point to slot `j`:
///
/// * 1: `i` points to `j`
/// * 2: `i` points to `j`'s contents
/// * 3: `i`'s contents point to `j`
/// * 4: `i`'s contents point to `j`'s contents
///
/// Annotations are limited to 8 slots (7 parameters plus return) by the
/// nibble encoding; larger signatures carry no annotation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EscapeAnnotation {
    pub escapes: u32,
    pub points_to: Vec<u32>,
}

impl EscapeAnnotation {
    /// Maximum number of slots (parameters + return) an annotation encodes.
    pub const MAX_SLOTS: u32 = 8;

    pub fn new(slots: u32) -> Self {
        EscapeAnnotation {
            escapes: 0,
            points_to: vec![0; slots.min(Self::MAX_SLOTS) as usize],
        }
    }

    pub fn slot_count(&self) -> u32 {
        self.points_to.len() as u32
    }

    /// Marks slot `i` (parameter index, or `param_count` for return) escaping.
    pub fn mark_escapes(&mut self, slot: u32) {
        self.escapes |= 1 << slot;
    }

    pub fn slot_escapes(&self, slot: u32) -> bool {
        self.escapes & (1 << slot) != 0
    }

    /// Sets the points-to nibble for `(from, to)` to `kind` (1..=4).
    pub fn set_points_to(&mut self, from: u32, to: u32, kind: u8) {
        debug_assert!(kind <= 4);
        if let Some(word) = self.points_to.get_mut(from as usize) {
            let shift = (to % Self::MAX_SLOTS) * 4;
            *word = (*word & !(0xF << shift)) | ((kind as u32 & 0xF) << shift);
        }
    }

    /// Reads the points-to nibble for `(from, to)`; 0 means no relation.
    pub fn points_to_kind(&self, from: u32, to: u32) -> u8 {
        self.points_to
            .get(from as usize)
            .map(|word| ((word >> ((to % Self::MAX_SLOTS) * 4)) & 0xF) as u8)
            .unwrap_or(0)
    }
}
