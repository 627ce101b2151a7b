//! Interprocedural driver.
//!
//! Visits every declared function exactly once, in reverse topological
//! order of the call-graph condensation, so each callee's summary exists
//! (or has deliberately been stood in for) before its callers need it.
//! Recursive components are broken by electing a representative whose
//! same-component calls are rewritten into an iterative parameter-variable
//! form; when that is infeasible the component degrades to an ordered
//! pessimistic traversal. No per-function failure aborts the pass: every
//! failure path substitutes the pessimistic summary and global lifetimes.
//! Only an internal invariant violation is fatal.

use crate::budget::{self, ArgLocality, FunctionRecord, StackBudget};
use crate::compress;
use crate::condense::{condense, condense_subset, is_self_recursive};
use crate::config::EscapeAnalysisConfig;
use crate::error::EscapeError;
use crate::graph::{BuildOutcome, BuiltGraph, GraphBuilder, PointsToGraph, PtId};
use crate::lifetime::{depth, Lifetime};
use crate::stats::AnalysisSink;
use crate::summary::FunctionSummary;
use kestrel_ir::{AllocSiteId, CallGraph, Callee, DfId, FunctionId, Module};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// Re-analysis bound for the pessimistic component traversal; if the
/// summaries have not reached a structural fixpoint by then, the whole
/// component is forced pessimistic.
const MAX_COMPONENT_SWEEPS: usize = 3;

/// Estimator cost of a re-entrant call treated as a bounded unrolled loop,
/// charged once per nesting level.
const UNROLLED_CALL_COST: usize = 16;

/// Everything the analysis hands downstream: one resolved lifetime per
/// allocation site, the per-function summaries, and the stack-budget
/// estimates.
#[derive(Debug)]
pub struct EscapeAnalysisOutcome {
    pub lifetimes: FxHashMap<AllocSiteId, Lifetime>,
    pub summaries: FxHashMap<FunctionId, FunctionSummary>,
    pub stack_budgets: FxHashMap<FunctionId, StackBudget>,
}

/// Runs the whole escape analysis over one compilation unit.
pub fn analyze(
    module: &Module,
    call_graph: &CallGraph,
    config: &EscapeAnalysisConfig,
    sink: &mut dyn AnalysisSink,
) -> Result<EscapeAnalysisOutcome, EscapeError> {
    let components = condense(module, call_graph);
    let mut driver = Driver {
        module,
        call_graph,
        config,
        sink,
        summaries: FxHashMap::default(),
        lifetimes: FxHashMap::default(),
        records: FxHashMap::default(),
    };

    for component in &components {
        driver.sink.record_component(component.len());
        if component.len() == 1 && !is_self_recursive(call_graph, component[0]) {
            driver.analyze_plain(component[0])?;
        } else {
            driver.analyze_component(component)?;
        }
    }

    let stack_budgets = budget::compute(module, call_graph, &driver.records, &components)?;
    Ok(EscapeAnalysisOutcome {
        lifetimes: driver.lifetimes,
        summaries: driver.summaries,
        stack_budgets,
    })
}

struct Driver<'a> {
    module: &'a Module,
    call_graph: &'a CallGraph,
    config: &'a EscapeAnalysisConfig,
    sink: &'a mut dyn AnalysisSink,
    summaries: FxHashMap<FunctionId, FunctionSummary>,
    lifetimes: FxHashMap<AllocSiteId, Lifetime>,
    records: FxHashMap<FunctionId, FunctionRecord>,
}

impl Driver<'_> {
    /// Intraprocedural analysis of one non-recursive function.
    fn analyze_plain(&mut self, f: FunctionId) -> Result<(), EscapeError> {
        debug!(function = %self.module.name(f), "escape analysis");
        let outcome = GraphBuilder::new(
            self.module,
            self.call_graph,
            &self.summaries,
            self.config,
            &mut *self.sink,
            f,
            FxHashSet::default(),
            None,
        )
        .build();
        match outcome {
            BuildOutcome::Complete(built) => self.finish(f, built),
            BuildOutcome::Overflow(built) => {
                self.pessimize(f, Some(built));
                Ok(())
            }
        }
    }

    /// Compression pipeline for a successfully built graph.
    fn finish(&mut self, f: FunctionId, built: BuiltGraph) -> Result<(), EscapeError> {
        let BuiltGraph {
            mut graph, primary, ..
        } = built;
        compress::build_drains(&mut graph);
        compress::verify_drains(&graph)?;
        compress::compute_closure(&mut graph, self.config, &mut *self.sink);
        let lifetimes = compress::extract_lifetimes(&graph, &mut *self.sink);
        let summary = compress::summarize(&mut graph, self.module.param_count(f));
        self.record_budget_inputs(f, &graph, &primary);
        self.lifetimes.extend(lifetimes);
        self.summaries.insert(f, summary);
        self.sink.record_function(f);
        Ok(())
    }

    /// Substitutes the safe result: pessimistic summary, global lifetime
    /// for every allocation site. When a partial graph exists its depths
    /// are forced global first so extraction still runs.
    fn pessimize(&mut self, f: FunctionId, built: Option<BuiltGraph>) {
        debug!(function = %self.module.name(f), "pessimistic fallback");
        self.sink.record_pessimized(f);
        if let Some(built) = built {
            let mut graph = built.graph;
            graph.force_all_global();
            let lifetimes = compress::extract_lifetimes(&graph, &mut *self.sink);
            self.lifetimes.extend(lifetimes);
        }
        if let Some(body) = self.module.body(f) {
            for site in body.alloc_sites() {
                self.lifetimes.insert(site, Lifetime::Global);
            }
        }
        self.summaries
            .insert(f, FunctionSummary::pessimistic(self.module.param_count(f)));
        self.records.insert(f, FunctionRecord::default());
    }

    /// Analysis of one strongly-connected (recursive) component.
    fn analyze_component(&mut self, members: &[FunctionId]) -> Result<(), EscapeError> {
        if members.len() == 1 {
            if self.try_representative(members[0], members)? {
                return Ok(());
            }
            return self.pessimistic_traversal(members);
        }

        let Some((representative, estimated)) = self.choose_representative(members) else {
            return self.pessimistic_traversal(members);
        };
        if estimated > self.config.node_limit {
            debug!(
                representative = %self.module.name(representative),
                estimated,
                "component inlining over budget"
            );
            return self.pessimistic_traversal(members);
        }
        if !self.try_representative(representative, members)? {
            return self.pessimistic_traversal(members);
        }

        // With the representative resolved, recurse on what is left of the
        // component; it may have fallen apart into smaller pieces.
        let remainder: Vec<FunctionId> = members
            .iter()
            .copied()
            .filter(|&m| m != representative)
            .collect();
        for component in condense_subset(self.module, self.call_graph, &remainder) {
            if component.len() == 1 && !is_self_recursive(self.call_graph, component[0]) {
                self.analyze_plain(component[0])?;
            } else {
                self.analyze_component(&component)?;
            }
        }
        Ok(())
    }

    /// Analyzes `rep` with all other component members inlined and its own
    /// recursive calls converted to the iterative parameter-variable form.
    /// Returns false when infeasible (estimate or ceiling exceeded).
    fn try_representative(
        &mut self,
        rep: FunctionId,
        members: &[FunctionId],
    ) -> Result<bool, EscapeError> {
        let set: FxHashSet<FunctionId> = members.iter().copied().collect();
        let (nesting, size) = self.estimate_inlining(rep, &set);
        debug!(
            representative = %self.module.name(rep),
            nesting,
            size,
            "recursion-to-loop conversion"
        );
        if size > self.config.node_limit {
            return Ok(false);
        }
        let outcome = GraphBuilder::new(
            self.module,
            self.call_graph,
            &self.summaries,
            self.config,
            &mut *self.sink,
            rep,
            set,
            Some(rep),
        )
        .build();
        match outcome {
            BuildOutcome::Complete(built) => {
                self.finish(rep, built)?;
                Ok(true)
            }
            BuildOutcome::Overflow(_) => Ok(false),
        }
    }

    /// Picks the component member that, as representative, minimizes
    /// (recursion nesting, estimated inlined size).
    fn choose_representative(&self, members: &[FunctionId]) -> Option<(FunctionId, usize)> {
        let set: FxHashSet<FunctionId> = members.iter().copied().collect();
        let mut best: Option<(u32, usize, FunctionId)> = None;
        for &candidate in members {
            let (nesting, size) = self.estimate_inlining(candidate, &set);
            let key = (nesting, size, candidate);
            if best.map_or(true, |b| key < b) {
                best = Some(key);
            }
        }
        best.map(|(_, size, f)| (f, size))
    }

    fn estimate_inlining(&self, rep: FunctionId, set: &FxHashSet<FunctionId>) -> (u32, usize) {
        let mut nesting = 0u32;
        let mut active: Vec<FunctionId> = Vec::new();
        let size = self.estimate_from(rep, rep, set, 0, &mut active, &mut nesting);
        (nesting, size)
    }

    /// Recursive size/nesting estimator. Re-entrant calls behave like a
    /// bounded unrolled loop: a small fixed cost per nesting level instead
    /// of another expansion.
    fn estimate_from(
        &self,
        f: FunctionId,
        rep: FunctionId,
        set: &FxHashSet<FunctionId>,
        level: u32,
        active: &mut Vec<FunctionId>,
        nesting: &mut u32,
    ) -> usize {
        *nesting = (*nesting).max(level);
        let mut size = self.module.body(f).map(|b| b.len()).unwrap_or(0);
        for site in self.call_graph.sites(f) {
            let Callee::Direct(callee) = site.callee else {
                continue;
            };
            if !set.contains(&callee) {
                continue;
            }
            if callee == rep || active.contains(&callee) {
                size = size.saturating_add(UNROLLED_CALL_COST * (level as usize + 1));
            } else {
                active.push(callee);
                size = size
                    .saturating_add(self.estimate_from(callee, rep, set, level + 1, active, nesting));
                active.pop();
            }
        }
        size
    }

    /// Last-resort handling of a recursive component: analyze members in
    /// order, breaking cycles among pending functions by pre-assigning the
    /// pessimistic summary, and re-sweep until two consecutive sweeps agree
    /// structurally. Termination is unconditional; non-convergence forces
    /// the whole component pessimistic.
    fn pessimistic_traversal(&mut self, members: &[FunctionId]) -> Result<(), EscapeError> {
        debug!(size = members.len(), "ordered pessimistic component traversal");
        let set: FxHashSet<FunctionId> = members.iter().copied().collect();
        let mut previous: Option<FxHashMap<FunctionId, FunctionSummary>> = None;
        for _ in 0..MAX_COMPONENT_SWEEPS {
            for &f in members {
                for callee in self.call_graph.direct_callees(f) {
                    if set.contains(&callee) && !self.summaries.contains_key(&callee) {
                        self.summaries.insert(
                            callee,
                            FunctionSummary::pessimistic(self.module.param_count(callee)),
                        );
                    }
                }
                self.analyze_plain(f)?;
            }
            let current: FxHashMap<FunctionId, FunctionSummary> = members
                .iter()
                .filter_map(|&f| self.summaries.get(&f).map(|s| (f, s.clone())))
                .collect();
            if previous.as_ref() == Some(&current) {
                return Ok(());
            }
            previous = Some(current);
        }
        for &f in members {
            self.pessimize(f, None);
        }
        Ok(())
    }

    /// Captures what stack budgeting will need once this graph is gone:
    /// the function's stack-eligible byte total and each call argument's
    /// observed locality.
    fn record_budget_inputs(
        &mut self,
        f: FunctionId,
        graph: &PointsToGraph,
        primary: &FxHashMap<DfId, PtId>,
    ) {
        let mut local_bytes = 0u64;
        for (_, id) in graph.allocation_nodes() {
            if !budget::stack_eligible(graph.lifetime_of(id)) {
                continue;
            }
            if let Some(bytes) = graph.node(id).shape.and_then(|s| s.static_bytes()) {
                local_bytes = local_bytes.saturating_add(bytes);
            }
        }

        let mut call_args: FxHashMap<DfId, Vec<ArgLocality>> = FxHashMap::default();
        for site in self.call_graph.sites(f) {
            let mut localities = Vec::with_capacity(site.args.len());
            for arg in &site.args {
                let locality = match primary.get(arg) {
                    None => ArgLocality::NonLocal,
                    Some(&pt) => {
                        if let Some(index) = graph.params().iter().position(|&p| p == pt) {
                            ArgLocality::FromParam(index as u32)
                        } else if !graph.escapes(pt) && graph.depth_of(pt) >= depth::ROOT_SCOPE {
                            ArgLocality::Local
                        } else {
                            ArgLocality::NonLocal
                        }
                    }
                };
                localities.push(locality);
            }
            call_args.insert(site.call_node, localities);
        }
        self.records.insert(
            f,
            FunctionRecord {
                local_bytes,
                call_args,
            },
        );
    }
}
