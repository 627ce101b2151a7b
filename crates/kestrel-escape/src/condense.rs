//! Call-graph condensation.
//!
//! Tarjan's algorithm over the call graph restricted to functions with
//! known bodies, run with an explicit stack so deep call chains cannot
//! overflow the compiler's own stack. Components come out in reverse
//! topological order of the condensation DAG (every callee component
//! before its callers), which is exactly the order the interprocedural
//! driver wants.

use kestrel_ir::{CallGraph, FunctionId, Module};
use rustc_hash::{FxHashMap, FxHashSet};

/// Strongly-connected components of the body-bearing call graph, callees
/// first. Component members are sorted by function id.
pub fn condense(module: &Module, call_graph: &CallGraph) -> Vec<Vec<FunctionId>> {
    condense_subset(module, call_graph, &module.declared())
}

/// Condensation of the call graph induced on `subset`; edges leaving the
/// subset are ignored. Used when a component representative has been peeled
/// off and the remainder must be re-ordered.
pub fn condense_subset(
    module: &Module,
    call_graph: &CallGraph,
    subset: &[FunctionId],
) -> Vec<Vec<FunctionId>> {
    let declared: Vec<FunctionId> = subset
        .iter()
        .copied()
        .filter(|&f| module.body(f).is_some())
        .collect();
    let declared_set: FxHashSet<FunctionId> = declared.iter().copied().collect();
    let successors = |f: FunctionId| -> Vec<FunctionId> {
        call_graph
            .direct_callees(f)
            .into_iter()
            .filter(|callee| declared_set.contains(callee))
            .collect()
    };

    let mut index: FxHashMap<FunctionId, u32> = FxHashMap::default();
    let mut lowlink: FxHashMap<FunctionId, u32> = FxHashMap::default();
    let mut on_stack: FxHashSet<FunctionId> = FxHashSet::default();
    let mut stack: Vec<FunctionId> = Vec::new();
    let mut next_index = 0u32;
    let mut components: Vec<Vec<FunctionId>> = Vec::new();

    for &start in &declared {
        if index.contains_key(&start) {
            continue;
        }
        index.insert(start, next_index);
        lowlink.insert(start, next_index);
        next_index += 1;
        stack.push(start);
        on_stack.insert(start);

        let mut frames: Vec<(FunctionId, Vec<FunctionId>, usize)> =
            vec![(start, successors(start), 0)];
        while let Some((v, succs, i)) = frames.pop() {
            if i < succs.len() {
                let w = succs[i];
                frames.push((v, succs, i + 1));
                if !index.contains_key(&w) {
                    index.insert(w, next_index);
                    lowlink.insert(w, next_index);
                    next_index += 1;
                    stack.push(w);
                    on_stack.insert(w);
                    let w_succs = successors(w);
                    frames.push((w, w_succs, 0));
                } else if on_stack.contains(&w) {
                    let low = lowlink[&v].min(index[&w]);
                    lowlink.insert(v, low);
                }
            } else {
                if lowlink[&v] == index[&v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack.remove(&w);
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort();
                    components.push(component);
                }
                if let Some(&(parent, _, _)) = frames.last() {
                    let low = lowlink[&parent].min(lowlink[&v]);
                    lowlink.insert(parent, low);
                }
            }
        }
    }
    components
}

/// True when the component consists of a single function calling itself.
pub fn is_self_recursive(call_graph: &CallGraph, function: FunctionId) -> bool {
    call_graph.direct_callees(function).contains(&function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_ir::{Callee, ModuleBuilder};

    #[test]
    fn chain_yields_callees_first() {
        let mut mb = ModuleBuilder::new();
        let a = mb.declare("a", 0);
        let b = mb.declare("b", 0);
        let c = mb.declare("c", 0);
        mb.define(a, |fb| {
            fb.call(Callee::Direct(b), &[]);
        });
        mb.define(b, |fb| {
            fb.call(Callee::Direct(c), &[]);
        });
        mb.define(c, |_| {});
        let (module, cg) = mb.finish();

        let components = condense(&module, &cg);
        assert_eq!(components, vec![vec![c], vec![b], vec![a]]);
    }

    #[test]
    fn mutual_recursion_is_one_component() {
        let mut mb = ModuleBuilder::new();
        let even = mb.declare("even", 1);
        let odd = mb.declare("odd", 1);
        let main = mb.declare("main", 0);
        mb.define(even, |fb| {
            let p = fb.param(0);
            fb.call(Callee::Direct(odd), &[p]);
        });
        mb.define(odd, |fb| {
            let p = fb.param(0);
            fb.call(Callee::Direct(even), &[p]);
        });
        mb.define(main, |fb| {
            let x = fb.constant();
            fb.call(Callee::Direct(even), &[x]);
        });
        let (module, cg) = mb.finish();

        let components = condense(&module, &cg);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], vec![even, odd]);
        assert_eq!(components[1], vec![main]);
    }

    #[test]
    fn external_callees_are_not_graph_nodes() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 0);
        let ext = mb.external("ext", 0, None);
        mb.define(f, |fb| {
            fb.call(Callee::Direct(ext), &[]);
        });
        let (module, cg) = mb.finish();

        let components = condense(&module, &cg);
        assert_eq!(components, vec![vec![f]]);
    }

    #[test]
    fn self_recursion_is_detected() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 1);
        let g = mb.declare("g", 0);
        mb.define(f, |fb| {
            let p = fb.param(0);
            fb.call(Callee::Direct(f), &[p]);
        });
        mb.define(g, |_| {});
        let (_, cg) = mb.finish();

        assert!(is_self_recursive(&cg, f));
        assert!(!is_self_recursive(&cg, g));
    }
}
