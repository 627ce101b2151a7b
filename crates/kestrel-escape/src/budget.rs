//! Stack budgeting: shared "outer" stack regions across call subtrees.
//!
//! A best-effort sizing pass run after all escape summaries are final. For
//! every function it estimates how many bytes of stack-eligible allocations
//! a call subtree could carve from one shared region passed down by a
//! caller (the outer stack), and the largest region any single call path
//! needs on its own (the inner stack). Purely a size/performance heuristic;
//! lifetime correctness never depends on it.
//!
//! The traversal walks the call graph along edges where every argument is
//! known local under the caller's locality mask. Same-component (recursive)
//! calls and calls under a loop always force a fresh inner region, which is
//! what keeps the walk acyclic; a cycle showing up anyway means the
//! condensation this pass was handed is inconsistent, and that is fatal.

use crate::error::EscapeError;
use crate::lifetime::Lifetime;
use kestrel_ir::{CallGraph, Callee, DfFlags, DfId, FunctionId, Module};
use rustc_hash::{FxHashMap, FxHashSet};

/// Locality of one actual argument, as observed in the caller's points-to
/// graph when its summary was extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLocality {
    /// Points into the caller's own frame-local data.
    Local,
    /// Escaping, global, or returned; never frame-local.
    NonLocal,
    /// Passes the caller's own formal parameter through; locality depends
    /// on what the caller was given.
    FromParam(u32),
}

/// Per-function inputs this pass needs, recorded by the driver before the
/// points-to graphs are discarded.
#[derive(Debug, Clone, Default)]
pub struct FunctionRecord {
    /// Bytes of statically-sized allocations with stack or local lifetime.
    pub local_bytes: u64,
    /// Argument localities per call node.
    pub call_args: FxHashMap<DfId, Vec<ArgLocality>>,
}

/// Which of a function's parameters point into caller-local data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalityMask(pub u64);

impl LocalityMask {
    /// The entry mask of an externally-callable root: nothing is local.
    pub const ALL_GLOBAL: LocalityMask = LocalityMask(0);

    pub fn is_local(self, param: u32) -> bool {
        self.0 & (1 << param.min(63)) != 0
    }

    pub fn with_local(self, param: u32) -> LocalityMask {
        LocalityMask(self.0 | (1 << param.min(63)))
    }
}

/// The computed stack estimates for one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackBudget {
    /// Bytes a shared outer region must provide for this function's whole
    /// outer-eligible call subtree.
    pub outer_bytes: u64,
    /// Largest inner region any single call path below this function needs.
    pub inner_bytes: u64,
}

struct Ctx<'a> {
    module: &'a Module,
    call_graph: &'a CallGraph,
    records: &'a FxHashMap<FunctionId, FunctionRecord>,
    component_of: FxHashMap<FunctionId, usize>,
}

/// Computes outer/inner stack estimates for every declared function,
/// starting each from the all-global locality mask.
pub fn compute(
    module: &Module,
    call_graph: &CallGraph,
    records: &FxHashMap<FunctionId, FunctionRecord>,
    components: &[Vec<FunctionId>],
) -> Result<FxHashMap<FunctionId, StackBudget>, EscapeError> {
    let mut component_of = FxHashMap::default();
    for (index, component) in components.iter().enumerate() {
        for &f in component {
            component_of.insert(f, index);
        }
    }
    let ctx = Ctx {
        module,
        call_graph,
        records,
        component_of,
    };

    let mut budgets = FxHashMap::default();
    let mut inner_memo: FxHashMap<FunctionId, u64> = FxHashMap::default();
    for f in module.declared() {
        let mut reached: FxHashSet<(FunctionId, LocalityMask)> = FxHashSet::default();
        let mut active: Vec<(FunctionId, LocalityMask)> = Vec::new();
        collect_outer(&ctx, f, LocalityMask::ALL_GLOBAL, &mut reached, &mut active)?;
        // One physical allocation counts once no matter how many locality
        // masks reach its function.
        let functions: FxHashSet<FunctionId> = reached.iter().map(|&(g, _)| g).collect();
        let mut outer_bytes = 0u64;
        for g in functions {
            outer_bytes = outer_bytes.saturating_add(ctx.record(g)?.local_bytes);
        }

        let mut active = FxHashSet::default();
        let inner_bytes = inner(&ctx, f, &mut inner_memo, &mut active)?;
        budgets.insert(
            f,
            StackBudget {
                outer_bytes,
                inner_bytes,
            },
        );
    }
    Ok(budgets)
}

impl Ctx<'_> {
    fn record(&self, f: FunctionId) -> Result<&FunctionRecord, EscapeError> {
        self.records
            .get(&f)
            .ok_or(EscapeError::MissingResult { function: f })
    }

    fn same_component(&self, a: FunctionId, b: FunctionId) -> bool {
        match (self.component_of.get(&a), self.component_of.get(&b)) {
            (Some(ca), Some(cb)) => ca == cb,
            _ => false,
        }
    }

    fn call_in_loop(&self, caller: FunctionId, call_node: DfId) -> bool {
        self.module
            .body(caller)
            .and_then(|body| body.node(call_node))
            .map(|data| data.flags.contains(DfFlags::IN_LOOP))
            .unwrap_or(false)
    }
}

/// Collects the (function, mask) pairs whose allocations can share one
/// outer region rooted at `f` under `mask`.
fn collect_outer(
    ctx: &Ctx<'_>,
    f: FunctionId,
    mask: LocalityMask,
    reached: &mut FxHashSet<(FunctionId, LocalityMask)>,
    active: &mut Vec<(FunctionId, LocalityMask)>,
) -> Result<(), EscapeError> {
    let key = (f, mask);
    if active.contains(&key) {
        return Err(EscapeError::UnexpectedCycle {
            pass: "stack budgeting (outer traversal)",
        });
    }
    if !reached.insert(key) {
        return Ok(());
    }
    active.push(key);
    let record = ctx.record(f)?;
    for site in ctx.call_graph.sites(f) {
        let Callee::Direct(callee) = site.callee else {
            continue;
        };
        if ctx.module.body(callee).is_none() {
            continue;
        }
        // Recursion and loop bodies always get a fresh inner region; an
        // outer pass is never legal across a back-edge.
        if ctx.same_component(f, callee) || ctx.call_in_loop(f, site.call_node) {
            continue;
        }
        let Some(localities) = record.call_args.get(&site.call_node) else {
            continue;
        };
        let mut callee_mask = LocalityMask::ALL_GLOBAL;
        let mut all_local = true;
        for (param, locality) in localities.iter().enumerate() {
            let local = match locality {
                ArgLocality::Local => true,
                ArgLocality::NonLocal => false,
                ArgLocality::FromParam(i) => mask.is_local(*i),
            };
            if local {
                callee_mask = callee_mask.with_local(param as u32);
            } else {
                all_local = false;
            }
        }
        if !all_local {
            continue;
        }
        collect_outer(ctx, callee, callee_mask, reached, active)?;
    }
    active.pop();
    Ok(())
}

/// The largest stack requirement of any single call path starting at `f`.
fn inner(
    ctx: &Ctx<'_>,
    f: FunctionId,
    memo: &mut FxHashMap<FunctionId, u64>,
    active: &mut FxHashSet<FunctionId>,
) -> Result<u64, EscapeError> {
    if let Some(&known) = memo.get(&f) {
        return Ok(known);
    }
    if !active.insert(f) {
        return Err(EscapeError::UnexpectedCycle {
            pass: "stack budgeting (inner traversal)",
        });
    }
    let mut deepest = 0u64;
    for callee in ctx.call_graph.direct_callees(f) {
        if ctx.module.body(callee).is_none() || ctx.same_component(f, callee) {
            continue;
        }
        deepest = deepest.max(inner(ctx, callee, memo, active)?);
    }
    active.remove(&f);
    let total = ctx.record(f)?.local_bytes.saturating_add(deepest);
    memo.insert(f, total);
    Ok(total)
}

/// True when a lifetime makes an allocation eligible for a stack region.
pub fn stack_eligible(lifetime: Lifetime) -> bool {
    matches!(lifetime, Lifetime::Stack | Lifetime::Local)
}
