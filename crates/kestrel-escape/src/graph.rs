//! Mutable per-function points-to graphs.
//!
//! One graph is built per analyzed function (or per recursive component
//! representative, with same-component callees inlined into it) and
//! discarded once its summary and lifetimes are extracted. Nodes live in a
//! flat arena addressed by [`PtId`]; the union-find drain pointer and all
//! edges are indices into the same arena.
//!
//! Edge semantics: an assignment edge `a -> b` records `a = b`, i.e. the
//! two may hold the same object. For closure purposes the relation is
//! undirected; it is stored directed with an explicit reverse list so both
//! directions stay cheap to walk. Field edges are directed and labeled, one
//! per field identity, created lazily and shared between reads and writes
//! of that field.

use crate::config::{EscapeAnalysisConfig, UnknownCallPolicy};
use crate::lifetime::{depth, Lifetime};
use crate::stats::AnalysisSink;
use crate::summary::{CompressedNode, FunctionSummary, NodeKind};
use kestrel_ir::{
    AllocShape, AllocSiteId, CallGraph, Callee, DataFlowGraph, DfFlags, DfId, DfNode, FieldId,
    FunctionId, Module,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

/// Index of a node within its owning points-to graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PtId(pub u32);

impl std::fmt::Display for PtId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One points-to node.
#[derive(Debug, Clone)]
pub(crate) struct PtNode {
    /// Current scope depth; lowered during closure computation.
    pub depth: i32,
    /// Depth at creation; a node whose depth never dropped is stack-kind.
    pub start_depth: i32,
    /// Outgoing assignment edges.
    pub edges: Vec<PtId>,
    /// Incoming assignment edges.
    pub reverse: Vec<PtId>,
    /// Outgoing field edges, one per field identity.
    pub fields: FxHashMap<FieldId, PtId>,
    /// Union-find pointer to this node's drain; `None` before compression.
    pub drain: Option<PtId>,
    /// Bitmask of formal parameters that can reach this node.
    pub referenced_by: u64,
    pub escape_origin: bool,
    pub escapes: bool,
    /// Lifetime override applied after closure (array-budget demotion).
    pub forced: Option<Lifetime>,
    /// Allocation identity, set only for the primary instance.
    pub site: Option<AllocSiteId>,
    pub shape: Option<AllocShape>,
    /// The node is one of the function's literal return expressions.
    pub literal_return: bool,
    pub is_drain: bool,
    /// Synthesized during analysis (drain, summary proxy) rather than
    /// mirroring a dataflow value or field slot.
    pub synthetic: bool,
}

impl PtNode {
    fn at(depth_value: i32, synthetic: bool) -> Self {
        PtNode {
            depth: depth_value,
            start_depth: depth_value,
            edges: Vec::new(),
            reverse: Vec::new(),
            fields: FxHashMap::default(),
            drain: None,
            referenced_by: 0,
            escape_origin: false,
            escapes: false,
            forced: None,
            site: None,
            shape: None,
            literal_return: false,
            is_drain: false,
            synthetic,
        }
    }
}

/// The points-to graph of one function under analysis.
#[derive(Debug, Clone, Default)]
pub struct PointsToGraph {
    pub(crate) nodes: Vec<PtNode>,
    /// Primary-instance parameter nodes, in declaration order.
    pub(crate) params: Vec<PtId>,
    /// The dedicated returns node of the primary instance.
    pub(crate) returns_node: Option<PtId>,
}

impl PointsToGraph {
    pub fn new() -> Self {
        PointsToGraph::default()
    }

    /// Adds a node mirroring a real dataflow value at the given depth.
    pub fn add_node(&mut self, depth_value: i32) -> PtId {
        self.push(PtNode::at(depth_value, false))
    }

    /// Adds a synthesized node (drain, embedding proxy).
    pub fn add_synthetic(&mut self, depth_value: i32) -> PtId {
        self.push(PtNode::at(depth_value, true))
    }

    fn push(&mut self, node: PtNode) -> PtId {
        let id = PtId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = PtId> + '_ {
        (0..self.nodes.len() as u32).map(PtId)
    }

    pub(crate) fn node(&self, id: PtId) -> &PtNode {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn node_mut(&mut self, id: PtId) -> &mut PtNode {
        &mut self.nodes[id.0 as usize]
    }

    /// Records `from = to`. Self-edges and duplicates are dropped.
    pub fn add_assignment_edge(&mut self, from: PtId, to: PtId) {
        if from == to || self.node(from).edges.contains(&to) {
            return;
        }
        self.node_mut(from).edges.push(to);
        self.node_mut(to).reverse.push(from);
    }

    /// The node holding `of.field`, created on first use at the owner's
    /// depth. Reads and writes of the same field share this node.
    pub fn field_node(&mut self, of: PtId, field: FieldId) -> PtId {
        if let Some(&existing) = self.node(of).fields.get(&field) {
            return existing;
        }
        let owner_depth = self.node(of).depth;
        let child = self.push(PtNode::at(owner_depth, false));
        self.node_mut(of).fields.insert(field, child);
        child
    }

    pub fn mark_escape_origin(&mut self, id: PtId) {
        self.node_mut(id).escape_origin = true;
    }

    pub fn set_allocation(&mut self, id: PtId, site: AllocSiteId, shape: AllocShape) {
        let node = self.node_mut(id);
        node.site = Some(site);
        node.shape = Some(shape);
    }

    pub fn depth_of(&self, id: PtId) -> i32 {
        self.node(id).depth
    }

    pub fn escapes(&self, id: PtId) -> bool {
        self.node(id).escapes
    }

    pub fn params(&self) -> &[PtId] {
        &self.params
    }

    pub fn returns_root(&self) -> Option<PtId> {
        self.returns_node
    }

    /// Declares the primary parameter nodes. Used when assembling a graph
    /// directly instead of through [`GraphBuilder`].
    pub fn set_params(&mut self, params: Vec<PtId>) {
        self.params = params;
    }

    /// Declares the dedicated returns node.
    pub fn set_returns_root(&mut self, id: PtId) {
        self.returns_node = Some(id);
    }

    pub fn assignment_targets(&self, id: PtId) -> &[PtId] {
        &self.node(id).edges
    }

    pub fn assignment_sources(&self, id: PtId) -> &[PtId] {
        &self.node(id).reverse
    }

    pub fn field_targets(&self, id: PtId) -> impl Iterator<Item = (FieldId, PtId)> + '_ {
        self.node(id).fields.iter().map(|(&f, &t)| (f, t))
    }

    /// Resolves a node's drain with path compression. A node without a
    /// drain pointer is its own representative.
    pub fn actual_drain(&mut self, id: PtId) -> PtId {
        let mut root = id;
        loop {
            match self.node(root).drain {
                Some(next) if next != root => root = next,
                _ => break,
            }
        }
        let mut cursor = id;
        while cursor != root {
            let next = match self.node(cursor).drain {
                Some(next) if next != cursor => next,
                _ => break,
            };
            self.node_mut(cursor).drain = Some(root);
            cursor = next;
        }
        root
    }

    /// Read-only drain resolution (no path compression).
    pub fn drain_root(&self, id: PtId) -> PtId {
        let mut root = id;
        loop {
            match self.node(root).drain {
                Some(next) if next != root => root = next,
                _ => break,
            }
        }
        root
    }

    /// All primary-instance allocation nodes with their sites.
    pub fn allocation_nodes(&self) -> Vec<(AllocSiteId, PtId)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.site.map(|s| (s, PtId(i as u32))))
            .collect()
    }

    /// Forces every node's depth to the global sentinel, invalidating the
    /// graph so subsequent lifetime extraction is pessimistic.
    pub fn force_all_global(&mut self) {
        for node in &mut self.nodes {
            node.depth = depth::GLOBAL;
        }
    }

    /// Recomputes the `referenced_by` bitmask of every node by walking
    /// forward from each parameter over assignment and field edges.
    pub fn compute_referenced_by(&mut self) {
        let params = self.params.clone();
        for (index, &param) in params.iter().enumerate() {
            let bit = 1u64 << (index as u64).min(63);
            let mut seen = FxHashSet::default();
            let mut work = vec![param];
            while let Some(id) = work.pop() {
                if !seen.insert(id) {
                    continue;
                }
                self.node_mut(id).referenced_by |= bit;
                let node = self.node(id);
                work.extend(node.edges.iter().copied());
                work.extend(node.fields.values().copied());
            }
        }
    }

    /// Derives a node's lifetime from its closure state. Only meaningful
    /// after escape propagation ran.
    pub fn lifetime_of(&self, id: PtId) -> Lifetime {
        let node = self.node(id);
        if node.escapes || node.depth == depth::GLOBAL {
            return Lifetime::Global;
        }
        if let Some(forced) = node.forced {
            return forced;
        }
        match node.depth {
            depth::PARAMETER => Lifetime::Argument,
            depth::RETURN_VALUE => {
                if node.literal_return {
                    Lifetime::ReturnValue
                } else {
                    Lifetime::IndirectReturnValue
                }
            }
            _ if node.depth == node.start_depth => Lifetime::Stack,
            _ => Lifetime::Local,
        }
    }
}

/// A finished (possibly partial) build of one function's graph.
#[derive(Debug)]
pub struct BuiltGraph {
    pub function: FunctionId,
    pub graph: PointsToGraph,
    /// Dataflow-to-points-to mapping for the primary instance.
    pub primary: FxHashMap<DfId, PtId>,
}

/// Outcome of graph construction.
#[derive(Debug)]
pub enum BuildOutcome {
    Complete(BuiltGraph),
    /// The node ceiling was exceeded; the partial graph is retained so the
    /// pessimistic path can still extract (forced-global) lifetimes.
    Overflow(BuiltGraph),
}

/// Nesting bound for on-the-fly component inlining. The node ceiling is the
/// primary circuit breaker; this one keeps the inliner's recursion shallow
/// even when individual bodies are tiny.
const MAX_INLINE_DEPTH: u32 = 64;

enum Instance {
    Primary,
    Inlined { base_depth: i32 },
}

struct Instantiation {
    map: FxHashMap<DfId, PtId>,
    params: Vec<PtId>,
    /// The node holding the instance's returned values (the returns node's
    /// reserved field slot).
    return_slot: PtId,
}

/// Translates one function's dataflow graph (plus inlined same-component
/// callees) into a points-to graph.
pub struct GraphBuilder<'a> {
    module: &'a Module,
    call_graph: &'a CallGraph,
    summaries: &'a FxHashMap<FunctionId, FunctionSummary>,
    config: &'a EscapeAnalysisConfig,
    sink: &'a mut dyn AnalysisSink,
    /// Members of the strongly-connected component under recursion-to-loop
    /// conversion; empty for plain functions.
    component: FxHashSet<FunctionId>,
    /// The component member whose calls are rewritten as parameter-variable
    /// bindings instead of being inlined.
    representative: Option<FunctionId>,
    function: FunctionId,
    graph: PointsToGraph,
    /// Accumulating parameter variables for recursive calls to the
    /// representative, plus its return slot binding.
    rec_params: Vec<PtId>,
    rec_return: Option<PtId>,
    overflow: bool,
}

impl<'a> GraphBuilder<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        module: &'a Module,
        call_graph: &'a CallGraph,
        summaries: &'a FxHashMap<FunctionId, FunctionSummary>,
        config: &'a EscapeAnalysisConfig,
        sink: &'a mut dyn AnalysisSink,
        function: FunctionId,
        component: FxHashSet<FunctionId>,
        representative: Option<FunctionId>,
    ) -> Self {
        GraphBuilder {
            module,
            call_graph,
            summaries,
            config,
            sink,
            component,
            representative,
            function,
            graph: PointsToGraph::new(),
            rec_params: Vec::new(),
            rec_return: None,
            overflow: false,
        }
    }

    pub fn build(mut self) -> BuildOutcome {
        let primary = match self.module.body(self.function) {
            Some(body) => self.instantiate(body, Instance::Primary),
            None => None,
        };

        let primary_map = match primary {
            Some(inst) => {
                self.graph.params = inst.params.clone();
                self.process_calls(self.function, &inst.map, 0);
                inst.map
            }
            None => FxHashMap::default(),
        };

        let built = BuiltGraph {
            function: self.function,
            graph: self.graph,
            primary: primary_map,
        };
        if self.overflow {
            BuildOutcome::Overflow(built)
        } else {
            BuildOutcome::Complete(built)
        }
    }

    fn over_limit(&mut self) -> bool {
        if self.graph.len() > self.config.node_limit {
            self.overflow = true;
        }
        self.overflow
    }

    /// Creates points-to nodes for every dataflow value of one body
    /// instance. Operands always precede their users in dataflow id order,
    /// so a single forward pass can wire edges as it goes.
    fn instantiate(&mut self, body: &DataFlowGraph, instance: Instance) -> Option<Instantiation> {
        let (primary, base) = match instance {
            Instance::Primary => (true, depth::ROOT_SCOPE),
            Instance::Inlined { base_depth } => (false, base_depth + 1),
        };

        let returns_depth = if primary { depth::RETURN_VALUE } else { base };
        let returns = self.graph.add_synthetic(returns_depth);
        if primary {
            self.graph.returns_node = Some(returns);
        }
        let return_slot = self.graph.field_node(returns, FieldId::RETURNS);

        let mut map: FxHashMap<DfId, PtId> = FxHashMap::default();
        let mut params = Vec::new();

        for id in body.ids() {
            if self.over_limit() {
                return None;
            }
            let data = match body.node(id) {
                Some(data) => data.clone(),
                None => continue,
            };
            let scope = base + data.scope_depth as i32;
            let pt = match &data.kind {
                DfNode::Parameter { .. } => {
                    let node_depth = if primary { depth::PARAMETER } else { base };
                    let pt = self.graph.add_node(node_depth);
                    params.push(pt);
                    pt
                }
                DfNode::Alloc { site, shape } => {
                    let pt = self.graph.add_node(scope);
                    if primary {
                        self.graph.set_allocation(pt, *site, *shape);
                    }
                    pt
                }
                DfNode::Call | DfNode::Const | DfNode::Null => self.graph.add_node(scope),
                DfNode::Variable { values } => {
                    let pt = self.graph.add_node(scope);
                    for value in values {
                        if let Some(&v) = map.get(value) {
                            self.graph.add_assignment_edge(pt, v);
                        }
                    }
                    pt
                }
                DfNode::FieldRead {
                    receiver: Some(receiver),
                    field,
                } => match map.get(receiver) {
                    Some(&r) => self.graph.field_node(r, *field),
                    None => self.graph.add_node(scope),
                },
                DfNode::FieldRead { receiver: None, .. } => {
                    // Access through an unknown receiver: the value read is
                    // beyond the analysis' horizon.
                    let pt = self.graph.add_node(scope);
                    self.graph.mark_escape_origin(pt);
                    pt
                }
                DfNode::FieldWrite {
                    receiver: Some(receiver),
                    field,
                    value,
                } => {
                    let slot = match map.get(receiver) {
                        Some(&r) => self.graph.field_node(r, *field),
                        None => self.graph.add_node(scope),
                    };
                    if let Some(&v) = map.get(value) {
                        self.graph.add_assignment_edge(slot, v);
                    }
                    slot
                }
                DfNode::FieldWrite {
                    receiver: None,
                    value,
                    ..
                } => {
                    // Store through an unknown receiver: the stored value
                    // escapes everything we can see.
                    if let Some(&v) = map.get(value) {
                        self.graph.mark_escape_origin(v);
                    }
                    let pt = self.graph.add_node(scope);
                    self.graph.mark_escape_origin(pt);
                    pt
                }
                DfNode::ArrayRead { array } => match map.get(array) {
                    Some(&a) => self.graph.field_node(a, FieldId::ELEMENTS),
                    None => self.graph.add_node(scope),
                },
                DfNode::ArrayWrite { array, value } => {
                    let slot = match map.get(array) {
                        Some(&a) => self.graph.field_node(a, FieldId::ELEMENTS),
                        None => self.graph.add_node(scope),
                    };
                    if let Some(&v) = map.get(value) {
                        self.graph.add_assignment_edge(slot, v);
                    }
                    slot
                }
            };
            if data.flags.contains(DfFlags::THROWS) {
                self.graph.mark_escape_origin(pt);
            }
            map.insert(id, pt);
        }

        for &ret in body.returns() {
            if let Some(&r) = map.get(&ret) {
                self.graph.add_assignment_edge(return_slot, r);
                if primary {
                    let node = self.graph.node_mut(r);
                    // Parameters keep their own sentinel even when returned.
                    if node.depth >= depth::ROOT_SCOPE {
                        node.depth = depth::RETURN_VALUE;
                        node.start_depth = depth::RETURN_VALUE;
                    }
                    node.literal_return = true;
                }
            }
        }

        Some(Instantiation {
            map,
            params,
            return_slot,
        })
    }

    /// Applies every call site of `function` onto the instance mapped by
    /// `map`.
    fn process_calls(
        &mut self,
        function: FunctionId,
        map: &FxHashMap<DfId, PtId>,
        inline_depth: u32,
    ) {
        let sites = self.call_graph.sites(function).to_vec();
        for site in sites {
            if self.overflow {
                return;
            }
            let result = map.get(&site.call_node).copied();
            let args: Vec<Option<PtId>> =
                site.args.iter().map(|a| map.get(a).copied()).collect();

            match site.callee {
                Callee::Virtual => self.apply_unknown(result, &args),
                Callee::Direct(callee) => {
                    if Some(callee) == self.representative {
                        self.bind_recursive(result, &args);
                    } else if self.component.contains(&callee) {
                        self.inline_member(callee, result, &args, inline_depth);
                    } else if let Some(summary) = self.summaries.get(&callee) {
                        let summary = summary.clone();
                        self.embed_summary(callee, &summary, result, &args);
                    } else if let Some(annotation) = self.module.annotation(callee) {
                        let summary = FunctionSummary::from_annotation(
                            annotation,
                            self.module.param_count(callee),
                        );
                        self.embed_summary(callee, &summary, result, &args);
                    } else {
                        self.apply_unknown(result, &args);
                    }
                }
            }
        }
    }

    /// Resolution for calls without a usable summary.
    fn apply_unknown(&mut self, result: Option<PtId>, args: &[Option<PtId>]) {
        match self.config.unknown_call_policy {
            UnknownCallPolicy::Optimistic => {
                debug!(function = %self.module.name(self.function), "unknown call treated optimistically");
            }
            UnknownCallPolicy::Pessimistic => {
                for arg in args.iter().flatten() {
                    self.graph.mark_escape_origin(*arg);
                }
                if let Some(result) = result {
                    self.graph.mark_escape_origin(result);
                }
            }
        }
    }

    /// Rewrites a recursive call to the component representative as
    /// accumulating parameter-variable bindings.
    fn bind_recursive(&mut self, result: Option<PtId>, args: &[Option<PtId>]) {
        if self.rec_params.is_empty() {
            let formals = self.graph.params.clone();
            for &formal in &formals {
                let variable = self.graph.add_synthetic(depth::PARAMETER);
                self.graph.add_assignment_edge(formal, variable);
                self.rec_params.push(variable);
            }
            self.rec_return = self
                .graph
                .returns_node
                .map(|r| self.graph.field_node(r, FieldId::RETURNS));
        }
        for (variable, arg) in self.rec_params.clone().into_iter().zip(args.iter()) {
            if let Some(arg) = arg {
                self.graph.add_assignment_edge(variable, *arg);
            }
        }
        if let (Some(result), Some(slot)) = (result, self.rec_return) {
            self.graph.add_assignment_edge(result, slot);
        }
    }

    /// Inlines a same-component (non-representative) callee bodily: a fresh
    /// instance of its dataflow nodes is stamped out via a remapping table
    /// and its own call sites are processed under the same rules.
    fn inline_member(
        &mut self,
        callee: FunctionId,
        result: Option<PtId>,
        args: &[Option<PtId>],
        inline_depth: u32,
    ) {
        if inline_depth >= MAX_INLINE_DEPTH {
            self.overflow = true;
            return;
        }
        let Some(body) = self.module.body(callee) else {
            self.apply_unknown(result, args);
            return;
        };
        let base_depth = result
            .map(|r| self.graph.depth_of(r))
            .unwrap_or(depth::ROOT_SCOPE);
        let Some(inst) = self.instantiate(body, Instance::Inlined { base_depth }) else {
            return;
        };
        for (formal, arg) in inst.params.iter().zip(args.iter()) {
            if let Some(arg) = arg {
                self.graph.add_assignment_edge(*formal, *arg);
            }
        }
        if let Some(result) = result {
            self.graph.add_assignment_edge(result, inst.return_slot);
        }
        self.process_calls(callee, &inst.map, inline_depth + 1);
    }

    /// Embeds a callee's compressed summary at one call site: fresh proxies
    /// stand in for the callee's drains, parameter/return anchors map onto
    /// the actual arguments and result, and every summary edge and escape
    /// is replicated by walking field paths from the mapped roots.
    fn embed_summary(
        &mut self,
        callee: FunctionId,
        summary: &FunctionSummary,
        result: Option<PtId>,
        args: &[Option<PtId>],
    ) {
        let base_depth = result
            .map(|r| self.graph.depth_of(r))
            .unwrap_or(depth::ROOT_SCOPE);
        let proxies: Vec<PtId> = (0..summary.drain_count)
            .map(|_| self.graph.add_synthetic(base_depth))
            .collect();
        if self.over_limit() {
            return;
        }

        let mut skipped = false;
        let resolve = |graph: &mut PointsToGraph, node: &CompressedNode| -> Option<PtId> {
            let root = match node.kind {
                NodeKind::Return => result,
                NodeKind::Param(i) => args.get(i as usize).copied().flatten(),
                NodeKind::Drain(d) => proxies.get(d as usize).copied(),
            }?;
            let mut current = root;
            for &field in &node.path.0 {
                current = graph.field_node(current, field);
            }
            Some(current)
        };

        for edge in &summary.edges {
            let from = resolve(&mut self.graph, &edge.from);
            let to = resolve(&mut self.graph, &edge.to);
            match (from, to) {
                (Some(from), Some(to)) => self.graph.add_assignment_edge(from, to),
                _ => skipped = true,
            }
        }
        for escape in &summary.escapes {
            match resolve(&mut self.graph, escape) {
                Some(node) => self.graph.mark_escape_origin(node),
                None => skipped = true,
            }
        }
        if skipped {
            warn!(
                callee = %self.module.name(callee),
                caller = %self.module.name(self.function),
                "summary contribution referred to a missing argument; skipped"
            );
            self.sink.record_skipped_contribution(callee);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::NullSink;
    use kestrel_ir::ModuleBuilder;

    fn build_one(
        module: &Module,
        call_graph: &CallGraph,
        function: FunctionId,
        config: &EscapeAnalysisConfig,
    ) -> BuiltGraph {
        let summaries = FxHashMap::default();
        let mut sink = NullSink;
        let builder = GraphBuilder::new(
            module,
            call_graph,
            &summaries,
            config,
            &mut sink,
            function,
            FxHashSet::default(),
            None,
        );
        match builder.build() {
            BuildOutcome::Complete(built) => built,
            BuildOutcome::Overflow(_) => panic!("unexpected overflow"),
        }
    }

    #[test]
    fn field_nodes_are_shared_between_reads_and_writes() {
        let mut g = PointsToGraph::new();
        let owner = g.add_node(0);
        let read = g.field_node(owner, FieldId(7));
        let write = g.field_node(owner, FieldId(7));
        let other = g.field_node(owner, FieldId(8));
        assert_eq!(read, write);
        assert_ne!(read, other);
    }

    #[test]
    fn assignment_edges_dedupe_and_reverse() {
        let mut g = PointsToGraph::new();
        let a = g.add_node(0);
        let b = g.add_node(0);
        g.add_assignment_edge(a, b);
        g.add_assignment_edge(a, b);
        g.add_assignment_edge(a, a);
        assert_eq!(g.assignment_targets(a), &[b]);
        assert_eq!(g.assignment_sources(b), &[a]);
        assert!(g.assignment_targets(b).is_empty());
    }

    #[test]
    fn parameters_and_returns_get_sentinel_depths() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 1);
        mb.define(f, |b| {
            let x = b.alloc_object(16);
            b.ret(x);
        });
        let (module, cg) = mb.finish();
        let built = build_one(&module, &cg, f, &EscapeAnalysisConfig::default());

        let body = module.body(f).unwrap();
        let param_pt = built.primary[&body.params()[0]];
        let ret_pt = built.primary[&body.returns()[0]];
        assert_eq!(built.graph.depth_of(param_pt), depth::PARAMETER);
        assert_eq!(built.graph.depth_of(ret_pt), depth::RETURN_VALUE);
        assert!(built.graph.node(ret_pt).literal_return);
    }

    #[test]
    fn unknown_receiver_write_marks_escape_origin() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 0);
        mb.define(f, |b| {
            let x = b.alloc_object(16);
            b.field_write(None, FieldId(0), x);
        });
        let (module, cg) = mb.finish();
        let built = build_one(&module, &cg, f, &EscapeAnalysisConfig::default());

        let allocs = built.graph.allocation_nodes();
        assert_eq!(allocs.len(), 1);
        assert!(built.graph.node(allocs[0].1).escape_origin);
    }

    #[test]
    fn node_ceiling_reports_overflow_with_partial_graph() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 0);
        mb.define(f, |b| {
            for _ in 0..32 {
                b.alloc_object(16);
            }
        });
        let (module, cg) = mb.finish();
        let config = EscapeAnalysisConfig {
            node_limit: 8,
            ..EscapeAnalysisConfig::default()
        };
        let summaries = FxHashMap::default();
        let mut sink = NullSink;
        let builder = GraphBuilder::new(
            &module,
            &cg,
            &summaries,
            &config,
            &mut sink,
            f,
            FxHashSet::default(),
            None,
        );
        match builder.build() {
            BuildOutcome::Overflow(built) => {
                assert!(!built.graph.is_empty(), "partial graph must be retained");
            }
            BuildOutcome::Complete(_) => panic!("ceiling should have tripped"),
        }
    }

    #[test]
    fn pessimistic_policy_marks_unknown_call_args() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 0);
        mb.define(f, |b| {
            let x = b.alloc_object(16);
            b.call(Callee::Virtual, &[x]);
        });
        let (module, cg) = mb.finish();

        let optimistic = build_one(&module, &cg, f, &EscapeAnalysisConfig::default());
        let (site, pt) = optimistic.graph.allocation_nodes()[0];
        assert!(!optimistic.graph.node(pt).escape_origin);

        let config = EscapeAnalysisConfig {
            unknown_call_policy: UnknownCallPolicy::Pessimistic,
            ..EscapeAnalysisConfig::default()
        };
        let pessimistic = build_one(&module, &cg, f, &config);
        let (site2, pt2) = pessimistic.graph.allocation_nodes()[0];
        assert_eq!(site, site2);
        assert!(pessimistic.graph.node(pt2).escape_origin);
    }

    #[test]
    fn embedded_summary_replays_edges_and_escapes() {
        use crate::summary::CompressedEdge;

        let mut mb = ModuleBuilder::new();
        let callee = mb.declare("callee", 2);
        let caller = mb.declare("caller", 0);
        mb.define(callee, |_| {});
        mb.define(caller, |b| {
            let x = b.alloc_object(16);
            let y = b.alloc_object(16);
            b.call(Callee::Direct(callee), &[x, y]);
        });
        let (module, cg) = mb.finish();

        // callee stores param 1 into param 0's field 3 and leaks param 1.
        let mut summary = FunctionSummary::optimistic(2);
        summary.edges.push(CompressedEdge {
            from: CompressedNode::root(NodeKind::Param(0)).field(FieldId(3)),
            to: CompressedNode::root(NodeKind::Param(1)),
        });
        summary.escapes.push(CompressedNode::root(NodeKind::Param(1)));
        summary.canonicalize();
        let mut summaries = FxHashMap::default();
        summaries.insert(callee, summary);

        let config = EscapeAnalysisConfig::default();
        let mut sink = NullSink;
        let builder = GraphBuilder::new(
            &module,
            &cg,
            &summaries,
            &config,
            &mut sink,
            caller,
            FxHashSet::default(),
            None,
        );
        let built = match builder.build() {
            BuildOutcome::Complete(built) => built,
            BuildOutcome::Overflow(_) => panic!("unexpected overflow"),
        };

        let mut graph = built.graph;
        let allocs = graph.allocation_nodes();
        let (_, x_pt) = allocs[0];
        let (_, y_pt) = allocs[1];
        let slot = graph.field_node(x_pt, FieldId(3));
        assert!(
            graph.assignment_targets(slot).contains(&y_pt),
            "summary edge must be replayed through the argument's field"
        );
        assert!(graph.node(y_pt).escape_origin, "summary escape must seed the argument");
    }
}
