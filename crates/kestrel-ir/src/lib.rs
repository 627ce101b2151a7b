//! Input-side IR consumed by the kestrel escape analysis.
//!
//! This crate owns the data model the backend collaborators hand to the
//! analysis engine: function symbols, per-function dataflow graphs, the
//! (already devirtualized) call graph, and the dense escape annotations
//! carried by body-less external functions. The engine in `kestrel-escape`
//! consumes all of this read-only.
//!
//! Design: all graph structures use flat `Vec` arenas addressed by `u32`
//! newtype indices rather than references, keeping them decoupled from any
//! arena lifetimes and trivially cloneable for per-call-site inlining.

pub mod build;
pub mod callgraph;
pub mod dfg;

pub use build::{FunctionBuilder, ModuleBuilder};
pub use callgraph::{CallGraph, CallSite, Callee, EscapeAnnotation};
pub use dfg::{AllocShape, DataFlowGraph, DfFlags, DfId, DfNode, DfNodeData, FieldId};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Unique identifier for a function symbol (declared or external).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Identity of one allocation site in the original source, used to report
/// computed lifetimes back to codegen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocSiteId(pub u32);

impl std::fmt::Display for AllocSiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// A function symbol: name, formal parameter count, and either a dataflow
/// body (declared) or an optional precomputed annotation (external).
///
/// The implicit "return" slot has index `param_count`.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub param_count: u32,
    pub kind: SymbolKind,
}

/// Whether a symbol carries a body or is external.
#[derive(Debug, Clone)]
pub enum SymbolKind {
    /// A function with a known dataflow-graph body.
    Declared(DataFlowGraph),
    /// A cross-module/library function; may carry a precomputed escape
    /// summary in dense bitmask form.
    External(Option<EscapeAnnotation>),
}

/// A whole compilation unit: the symbol table plus the set of externally
/// callable entry points.
#[derive(Debug, Clone, Default)]
pub struct Module {
    symbols: Vec<Symbol>,
    /// Externally-callable functions (analysis roots for stack budgeting).
    pub roots: Vec<FunctionId>,
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }

    /// Adds a symbol and returns its id.
    pub fn push_symbol(&mut self, symbol: Symbol) -> FunctionId {
        let id = FunctionId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        id
    }

    pub fn symbol(&self, id: FunctionId) -> Option<&Symbol> {
        self.symbols.get(id.0 as usize)
    }

    pub fn name(&self, id: FunctionId) -> &str {
        self.symbol(id).map(|s| s.name.as_str()).unwrap_or("<unknown>")
    }

    pub fn param_count(&self, id: FunctionId) -> u32 {
        self.symbol(id).map(|s| s.param_count).unwrap_or(0)
    }

    /// Returns the dataflow body of a declared function, if any.
    pub fn body(&self, id: FunctionId) -> Option<&DataFlowGraph> {
        match self.symbol(id).map(|s| &s.kind) {
            Some(SymbolKind::Declared(dfg)) => Some(dfg),
            _ => None,
        }
    }

    /// Returns the escape annotation of an external symbol, if any.
    pub fn annotation(&self, id: FunctionId) -> Option<&EscapeAnnotation> {
        match self.symbol(id).map(|s| &s.kind) {
            Some(SymbolKind::External(ann)) => ann.as_ref(),
            _ => None,
        }
    }

    /// All declared (body-bearing) function ids, in id order.
    pub fn declared(&self) -> Vec<FunctionId> {
        self.symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.kind, SymbolKind::Declared(_)))
            .map(|(i, _)| FunctionId(i as u32))
            .collect()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Map from allocation site to the declared function containing it.
    pub fn sites_by_function(&self) -> FxHashMap<AllocSiteId, FunctionId> {
        let mut map = FxHashMap::default();
        for id in self.declared() {
            if let Some(body) = self.body(id) {
                for site in body.alloc_sites() {
                    map.insert(site, id);
                }
            }
        }
        map
    }
}
