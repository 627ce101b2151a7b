//! Graph compression: drain building, closure, and summary extraction.
//!
//! Assignment edges mean "may hold the same value", which future field
//! accesses must treat as an undirected equivalence: after `a = b`, an
//! access of `a.f` is an access of `b.f`. Keeping field edges directed and
//! labeled while honoring that equivalence requires collapsing each
//! assignment-connected component onto a single representative (its drain)
//! and moving every field edge to originate there. The drained graph is
//! then small enough to close over depths and escapes and to re-compress
//! into the exported summary.
//!
//! Invariant: a drain never has outgoing assignment edges, only field
//! edges, and every component member reaches its drain by assignment edges
//! once compression completes.

use crate::config::EscapeAnalysisConfig;
use crate::error::EscapeError;
use crate::graph::{PointsToGraph, PtId};
use crate::lifetime::Lifetime;
use crate::stats::AnalysisSink;
use crate::summary::{CompressedEdge, CompressedNode, FunctionSummary, NodeKind};
use indexmap::IndexSet;
use kestrel_ir::{AllocShape, AllocSiteId, FieldId};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// Collapses every assignment-connected component onto a drain and resolves
/// all multi-edges. Never fails: every merge strictly reduces the number of
/// distinct drains, so the loop terminates.
pub fn build_drains(g: &mut PointsToGraph) {
    let components = assignment_components(g);
    // Field edges are collected per drain while merging may still redirect
    // them; they are written back once the drain set is stable.
    let mut pending: FxHashMap<PtId, Vec<(FieldId, PtId)>> = FxHashMap::default();

    for component in &components {
        let drain = match elect_drain(g, component) {
            Some(existing) => existing,
            None => {
                let min_depth = component
                    .iter()
                    .map(|&n| g.depth_of(n))
                    .min()
                    .unwrap_or(crate::lifetime::depth::ROOT_SCOPE);
                g.add_synthetic(min_depth)
            }
        };
        g.node_mut(drain).is_drain = true;
        g.node_mut(drain).drain = Some(drain);

        let mut fields: Vec<(FieldId, PtId)> = Vec::new();
        for &member in component {
            g.node_mut(member).drain = Some(drain);
            fields.extend(g.node_mut(member).fields.drain());
        }
        fields.sort();
        pending.insert(drain, fields);
    }

    // Resolve multi-edges: one field label leading from a drain into two
    // different drains merges those target components into one. Redirecting
    // a freshly synthesized drain is preferred over a real value's drain so
    // no spurious constraints attach to real values.
    loop {
        let mut merged = false;
        let mut drain_ids: Vec<PtId> = pending.keys().copied().collect();
        drain_ids.sort();
        for d in drain_ids {
            let Some(list) = pending.get(&d) else { continue };
            let list = list.clone();
            let mut by_field: FxHashMap<FieldId, Vec<PtId>> = FxHashMap::default();
            for (field, target) in list {
                by_field.entry(field).or_default().push(target);
            }
            let mut field_ids: Vec<FieldId> = by_field.keys().copied().collect();
            field_ids.sort();
            for field in field_ids {
                let targets = &by_field[&field];
                let mut distinct: Vec<PtId> = Vec::new();
                for &t in targets {
                    let td = g.actual_drain(t);
                    if !distinct.contains(&td) {
                        distinct.push(td);
                    }
                }
                if distinct.len() < 2 {
                    continue;
                }
                let survivor = pick_survivor(g, &distinct);
                for &loser in &distinct {
                    if loser == survivor {
                        continue;
                    }
                    g.node_mut(loser).drain = Some(survivor);
                    g.node_mut(loser).is_drain = false;
                    let moved = pending.remove(&loser).unwrap_or_default();
                    pending.entry(survivor).or_default().extend(moved);
                }
                merged = true;
            }
        }
        if !merged {
            break;
        }
    }

    // Re-coalesce: duplicate same-label edges whose targets now share one
    // drain keep a single representative; the redundant targets are chained
    // to it by assignment so no reachability is lost.
    let mut entries: Vec<(PtId, Vec<(FieldId, PtId)>)> = pending.into_iter().collect();
    entries.sort_by_key(|(d, _)| *d);
    for (drain, mut list) in entries {
        list.sort();
        let mut representative: FxHashMap<FieldId, PtId> = FxHashMap::default();
        for (field, target) in list {
            match representative.get(&field) {
                None => {
                    representative.insert(field, target);
                }
                Some(&kept) if kept == target => {}
                Some(&kept) => {
                    if !g.node(target).is_drain {
                        g.add_assignment_edge(target, kept);
                    }
                }
            }
        }
        let mut writeback: Vec<(FieldId, PtId)> = representative.into_iter().collect();
        writeback.sort();
        for (field, target) in writeback {
            g.node_mut(drain).fields.insert(field, target);
        }
    }

    // Make every drain discoverable by following assignment edges forward.
    let ids: Vec<PtId> = g.ids().collect();
    for id in ids {
        let drain = g.actual_drain(id);
        if drain != id {
            g.add_assignment_edge(id, drain);
        }
    }
}

/// Checks the drain invariant; a violation is a compiler bug.
pub fn verify_drains(g: &PointsToGraph) -> Result<(), EscapeError> {
    for id in g.ids() {
        let node = g.node(id);
        if node.is_drain && !node.edges.is_empty() {
            return Err(EscapeError::InvariantViolation {
                context: format!("drain {id} has outgoing assignment edges"),
            });
        }
    }
    Ok(())
}

/// Partitions nodes into components connected via assignment edges treated
/// as undirected.
fn assignment_components(g: &PointsToGraph) -> Vec<Vec<PtId>> {
    let mut seen: FxHashSet<PtId> = FxHashSet::default();
    let mut components = Vec::new();
    for start in g.ids() {
        if seen.contains(&start) {
            continue;
        }
        let mut component = Vec::new();
        let mut work = vec![start];
        while let Some(id) = work.pop() {
            if !seen.insert(id) {
                continue;
            }
            component.push(id);
            work.extend(g.assignment_targets(id).iter().copied());
            work.extend(g.assignment_sources(id).iter().copied());
        }
        component.sort();
        components.push(component);
    }
    components
}

/// An existing node qualifies as its component's drain when it has no
/// outgoing assignment edges of its own and every other member points at it
/// directly or transitively. At most one such node can exist per component:
/// two sinks cannot both reach each other.
fn elect_drain(g: &PointsToGraph, component: &[PtId]) -> Option<PtId> {
    for &candidate in component {
        if !g.assignment_targets(candidate).is_empty() {
            continue;
        }
        let mut seen: FxHashSet<PtId> = FxHashSet::default();
        let mut work = vec![candidate];
        while let Some(id) = work.pop() {
            if !seen.insert(id) {
                continue;
            }
            work.extend(g.assignment_sources(id).iter().copied());
        }
        if component.iter().all(|m| seen.contains(m)) {
            return Some(candidate);
        }
    }
    None
}

fn pick_survivor(g: &PointsToGraph, candidates: &[PtId]) -> PtId {
    candidates
        .iter()
        .copied()
        .find(|&c| !g.node(c).synthetic)
        .unwrap_or(candidates[0])
}

/// Runs depth relaxation, escape propagation, and the array stack budget
/// over a drained graph. After this, [`PointsToGraph::lifetime_of`] is
/// final.
pub fn compute_closure(
    g: &mut PointsToGraph,
    config: &EscapeAnalysisConfig,
    sink: &mut dyn AnalysisSink,
) {
    relax_depths(g);
    propagate_escapes(g);
    apply_array_budget(g, config, sink);
}

/// Lowers each assignment target to the shallower (more escaping) depth of
/// anything it may equal. Depths only decrease, so the worklist terminates.
fn relax_depths(g: &mut PointsToGraph) {
    let mut work: Vec<PtId> = g.ids().collect();
    work.sort_by_key(|&id| std::cmp::Reverse(g.depth_of(id)));
    while let Some(id) = work.pop() {
        let source_depth = g.depth_of(id);
        let targets = g.assignment_targets(id).to_vec();
        for target in targets {
            if g.depth_of(target) > source_depth {
                g.node_mut(target).depth = source_depth;
                work.push(target);
            }
        }
    }
}

/// Marks escaping every node reachable from an escape origin forward via
/// any edge kind, and every node that can reach an origin backward via
/// assignment edges (only assignment establishes "may be the same value").
fn propagate_escapes(g: &mut PointsToGraph) {
    let origins: Vec<PtId> = g.ids().filter(|&id| g.node(id).escape_origin).collect();
    let mut escaping: FxHashSet<PtId> = FxHashSet::default();

    let mut work = origins.clone();
    let mut seen: FxHashSet<PtId> = FxHashSet::default();
    while let Some(id) = work.pop() {
        if !seen.insert(id) {
            continue;
        }
        escaping.insert(id);
        let node = g.node(id);
        work.extend(node.edges.iter().copied());
        work.extend(node.fields.values().copied());
    }

    let mut work = origins;
    let mut seen: FxHashSet<PtId> = FxHashSet::default();
    while let Some(id) = work.pop() {
        if !seen.insert(id) {
            continue;
        }
        escaping.insert(id);
        work.extend(g.assignment_sources(id).iter().copied());
    }

    for id in escaping {
        g.node_mut(id).escapes = true;
    }
}

/// Admits statically-sized stack-lifetime arrays against the per-function
/// byte budget, smallest first. Denied primitive arrays are forced global;
/// denied object arrays are (when configured) re-added as escape origins so
/// dependent nodes' escaping status stays consistent.
fn apply_array_budget(
    g: &mut PointsToGraph,
    config: &EscapeAnalysisConfig,
    sink: &mut dyn AnalysisSink,
) {
    let mut candidates: Vec<(u64, AllocSiteId, PtId, bool)> = Vec::new();
    for (site, id) in g.allocation_nodes() {
        if g.lifetime_of(id) != Lifetime::Stack {
            continue;
        }
        let Some(shape) = g.node(id).shape else { continue };
        if !shape.is_array() {
            continue;
        }
        let Some(bytes) = shape.static_bytes() else { continue };
        let of_objects = matches!(
            shape,
            AllocShape::Array {
                of_objects: true,
                ..
            }
        );
        candidates.push((bytes, site, id, of_objects));
    }
    candidates.sort();

    let mut used = 0u64;
    let mut demoted = false;
    for (bytes, site, id, of_objects) in candidates {
        if used + bytes <= config.stack_array_budget {
            used += bytes;
            sink.record_stack_array(site, bytes);
        } else if of_objects && config.demote_object_arrays {
            debug!(%site, bytes, "object array denied stack budget; re-propagating as escape");
            g.mark_escape_origin(id);
            demoted = true;
        } else {
            g.node_mut(id).forced = Some(Lifetime::Global);
        }
    }
    if demoted {
        propagate_escapes(g);
    }
}

/// Reads out the final lifetime of every allocation site in the graph's
/// primary instance.
pub fn extract_lifetimes(
    g: &PointsToGraph,
    sink: &mut dyn AnalysisSink,
) -> FxHashMap<AllocSiteId, Lifetime> {
    let mut lifetimes = FxHashMap::default();
    for (site, id) in g.allocation_nodes() {
        let lifetime = g.lifetime_of(id);
        sink.record_lifetime(site, lifetime);
        lifetimes.insert(site, lifetime);
    }
    lifetimes
}

/// Extracts the minimal exported summary from a drained, closed graph
/// ("painting").
///
/// Only what a caller can observe survives: drains reachable from the
/// parameters and return value, minus cactus leaves that add no
/// information, plus two corrections for known-lossy cases (escape origins
/// not reachable from any root, and stripped drains that were the only
/// witness of a parameter aliasing relationship).
pub fn summarize(g: &mut PointsToGraph, param_count: u32) -> FunctionSummary {
    g.compute_referenced_by();

    let params = g.params().to_vec();
    let returns = g.returns_root();
    let mut roots: Vec<PtId> = params.clone();
    roots.extend(returns);

    // Interesting drains: those reachable from the externally observable
    // roots.
    let mut interesting: FxHashSet<PtId> = FxHashSet::default();
    {
        let mut seen: FxHashSet<PtId> = FxHashSet::default();
        let mut work = roots.clone();
        while let Some(id) = work.pop() {
            if !seen.insert(id) {
                continue;
            }
            interesting.insert(g.drain_root(id));
            let node = g.node(id);
            work.extend(node.edges.iter().copied());
            work.extend(node.fields.values().copied());
        }
    }
    let root_drains: FxHashSet<PtId> = roots.iter().map(|&r| g.drain_root(r)).collect();

    // Any escaping component member makes its drain informative.
    let ids: Vec<PtId> = g.ids().collect();
    let mut escaping_drains: FxHashSet<PtId> = FxHashSet::default();
    for &id in &ids {
        if g.node(id).escapes {
            escaping_drains.insert(g.drain_root(id));
        }
    }

    // Strip cactus leaves: a non-root drain with no live outgoing field
    // edges, at most one incoming field edge, and no escaping member adds
    // nothing beyond what the parameter graph already implies.
    loop {
        let mut incoming: FxHashMap<PtId, usize> = FxHashMap::default();
        let mut sorted: Vec<PtId> = interesting.iter().copied().collect();
        sorted.sort();
        for &d in &sorted {
            let mut fields: Vec<(FieldId, PtId)> = g.field_targets(d).collect();
            fields.sort();
            for (_, target) in fields {
                let td = g.drain_root(target);
                if td != d {
                    *incoming.entry(td).or_insert(0) += 1;
                }
            }
        }
        let mut stripped = false;
        for &d in &sorted {
            if root_drains.contains(&d) || escaping_drains.contains(&d) {
                continue;
            }
            let live_out = g
                .field_targets(d)
                .filter(|&(_, target)| {
                    let td = g.drain_root(target);
                    td != d && interesting.contains(&td)
                })
                .count();
            if live_out == 0 && incoming.get(&d).copied().unwrap_or(0) <= 1 {
                interesting.remove(&d);
                stripped = true;
            }
        }
        if !stripped {
            break;
        }
    }

    // Paint every node field-reachable from a root through interesting
    // drains with a compressed identity. The internal returns label does
    // not extend paths: the returns node's slot *is* the return value.
    let mut painted: FxHashMap<PtId, CompressedNode> = FxHashMap::default();
    let mut work: Vec<PtId> = Vec::new();
    for (index, &param) in params.iter().enumerate() {
        painted.insert(param, CompressedNode::root(NodeKind::Param(index as u32)));
        work.push(param);
    }
    if let Some(ret) = returns {
        painted.insert(ret, CompressedNode::root(NodeKind::Return));
        work.push(ret);
    }

    let mut drain_count = 0u32;
    loop {
        while let Some(id) = work.pop() {
            let Some(ident) = painted.get(&id).cloned() else { continue };
            let drain = g.drain_root(id);
            if !interesting.contains(&drain) {
                continue;
            }
            let mut fields: Vec<(FieldId, PtId)> = g.field_targets(drain).collect();
            fields.sort();
            for (field, target) in fields {
                if painted.contains_key(&target) {
                    continue;
                }
                let child = if field == FieldId::RETURNS {
                    ident.clone()
                } else {
                    ident.field(field)
                };
                painted.insert(target, child);
                work.push(target);
            }
        }
        // Interesting drains left unpainted (not field-reachable from any
        // root) still need an identity when they carry information.
        let mut sorted: Vec<PtId> = interesting.iter().copied().collect();
        sorted.sort();
        let next = sorted.into_iter().find(|&d| {
            !painted.contains_key(&d)
                && (escaping_drains.contains(&d) || !g.node(d).fields.is_empty())
        });
        match next {
            Some(d) => {
                painted.insert(d, CompressedNode::root(NodeKind::Drain(drain_count)));
                drain_count += 1;
                work.push(d);
            }
            None => break,
        }
    }

    // Closure assignment edges between painted nodes, re-derived through
    // unpainted intermediaries so compression does not lose connectivity.
    let mut edges: IndexSet<CompressedEdge> = IndexSet::default();
    let mut painted_ids: Vec<PtId> = painted.keys().copied().collect();
    painted_ids.sort();
    for &from in &painted_ids {
        let from_ident = painted[&from].clone();
        let mut seen: FxHashSet<PtId> = FxHashSet::default();
        let mut stack: Vec<PtId> = g.assignment_targets(from).to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(to_ident) = painted.get(&id) {
                if *to_ident != from_ident {
                    edges.insert(CompressedEdge {
                        from: from_ident.clone(),
                        to: to_ident.clone(),
                    });
                }
                continue;
            }
            stack.extend(g.assignment_targets(id).iter().copied());
        }
    }

    let mut escapes: IndexSet<CompressedNode> = IndexSet::default();
    for &id in &painted_ids {
        if g.node(id).escapes {
            escapes.insert(painted[&id].clone());
        }
    }

    // Correction 1: escape origins not reachable from any root would vanish
    // from the summary. One synthesized escaping node per affected drain
    // group keeps the reachability they implied.
    let mut affected: Vec<PtId> = Vec::new();
    for &id in &ids {
        if g.node(id).escapes && !painted.contains_key(&id) {
            let drain = g.drain_root(id);
            if !painted.contains_key(&drain) && !affected.contains(&drain) {
                affected.push(drain);
            }
        }
    }
    affected.sort();
    for drain in affected {
        let anchors = connected_painted(g, &painted_ids, drain);
        if anchors.is_empty() {
            debug!("escape confined to analysis-internal nodes; dropped from summary");
            continue;
        }
        let synthesized = CompressedNode::root(NodeKind::Drain(drain_count));
        drain_count += 1;
        escapes.insert(synthesized.clone());
        for anchor in anchors {
            edges.insert(CompressedEdge {
                from: painted[&anchor].clone(),
                to: synthesized.clone(),
            });
        }
    }

    // Correction 2: a drain optimized away during leaf stripping (or never
    // painted) may have been the only witness that two roots are not
    // provably distinct. If painted nodes with different referencing sets
    // point into it, removing it would assert a non-existent separation;
    // restore it.
    let mut unpainted_drains: Vec<PtId> = ids
        .iter()
        .copied()
        .filter(|&d| g.node(d).is_drain && !painted.contains_key(&d))
        .collect();
    unpainted_drains.sort();
    for drain in unpainted_drains {
        let anchors = connected_painted(g, &painted_ids, drain);
        if anchors.len() < 2 {
            continue;
        }
        let masks: FxHashSet<u64> = anchors
            .iter()
            .map(|&id| g.node(id).referenced_by)
            .collect();
        if masks.len() < 2 {
            continue;
        }
        let restored = CompressedNode::root(NodeKind::Drain(drain_count));
        drain_count += 1;
        for anchor in anchors {
            edges.insert(CompressedEdge {
                from: painted[&anchor].clone(),
                to: restored.clone(),
            });
        }
    }

    let mut summary = FunctionSummary {
        param_count,
        drain_count,
        edges: edges.into_iter().collect(),
        escapes: escapes.into_iter().collect(),
    };
    summary.canonicalize();
    summary
}

/// Painted nodes connected to `drain`'s component: members of it, or nodes
/// with a direct assignment edge into it.
fn connected_painted(g: &PointsToGraph, painted_ids: &[PtId], drain: PtId) -> Vec<PtId> {
    let mut out: Vec<PtId> = Vec::new();
    for &id in painted_ids {
        let touches = g.drain_root(id) == drain
            || g
                .assignment_targets(id)
                .iter()
                .chain(g.assignment_sources(id).iter())
                .any(|&n| g.drain_root(n) == drain);
        if touches {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::NullSink;

    fn drained_snapshot(g: &PointsToGraph) -> Vec<(PtId, PtId, Vec<(FieldId, PtId)>)> {
        let mut out = Vec::new();
        for id in g.ids() {
            let mut fields: Vec<(FieldId, PtId)> = g.field_targets(id).collect();
            fields.sort();
            out.push((id, g.drain_root(id), fields));
        }
        out
    }

    #[test]
    fn sink_node_is_elected_drain() {
        let mut g = PointsToGraph::new();
        let a = g.add_node(0);
        let b = g.add_node(0);
        let c = g.add_node(0);
        g.add_assignment_edge(a, b);
        g.add_assignment_edge(b, c);
        let before = g.len();

        build_drains(&mut g);

        assert_eq!(g.len(), before, "no drain should be synthesized");
        assert_eq!(g.drain_root(a), c);
        assert_eq!(g.drain_root(b), c);
        assert!(g.assignment_targets(a).contains(&c));
        verify_drains(&g).unwrap();
    }

    #[test]
    fn cyclic_component_synthesizes_a_drain() {
        let mut g = PointsToGraph::new();
        let a = g.add_node(0);
        let b = g.add_node(0);
        g.add_assignment_edge(a, b);
        g.add_assignment_edge(b, a);
        let before = g.len();

        build_drains(&mut g);

        assert_eq!(g.len(), before + 1, "a fresh drain is required");
        let drain = g.drain_root(a);
        assert_eq!(g.drain_root(b), drain);
        assert_ne!(drain, a);
        assert_ne!(drain, b);
        verify_drains(&g).unwrap();
    }

    #[test]
    fn multi_edges_merge_target_components() {
        // Two aliased objects each write a different value into the same
        // field: after compression one drain carries one edge for that
        // field, and both values share a component.
        let mut g = PointsToGraph::new();
        let s1 = g.add_node(0);
        let s2 = g.add_node(0);
        g.add_assignment_edge(s1, s2);
        let f = FieldId(4);
        let t1 = g.field_node(s1, f);
        let t2 = g.field_node(s2, f);
        let v1 = g.add_node(1);
        let v2 = g.add_node(1);
        g.add_assignment_edge(t1, v1);
        g.add_assignment_edge(t2, v2);

        build_drains(&mut g);

        let owner = g.drain_root(s1);
        assert_eq!(g.drain_root(s2), owner);
        let fields: Vec<(FieldId, PtId)> = g.field_targets(owner).collect();
        assert_eq!(
            fields.iter().filter(|(field, _)| *field == f).count(),
            1,
            "exactly one edge per field label per drain"
        );
        assert_eq!(
            g.drain_root(t1),
            g.drain_root(t2),
            "both field slots collapse into one component"
        );
        assert_eq!(g.drain_root(v1), g.drain_root(v2));
        verify_drains(&g).unwrap();
    }

    #[test]
    fn drain_building_is_idempotent() {
        let mut g = PointsToGraph::new();
        let a = g.add_node(0);
        let b = g.add_node(1);
        let c = g.add_node(2);
        g.add_assignment_edge(a, b);
        g.add_assignment_edge(c, b);
        let f = g.field_node(a, FieldId(0));
        g.add_assignment_edge(f, c);

        build_drains(&mut g);
        let first = drained_snapshot(&g);
        build_drains(&mut g);
        let second = drained_snapshot(&g);

        assert_eq!(first, second, "re-draining an already drained graph is a no-op");
        verify_drains(&g).unwrap();
    }

    #[test]
    fn depth_relaxation_follows_chains() {
        use crate::lifetime::depth;
        let mut g = PointsToGraph::new();
        let global = g.add_node(depth::GLOBAL);
        let mid = g.add_node(3);
        let deep = g.add_node(5);
        g.add_assignment_edge(global, mid);
        g.add_assignment_edge(mid, deep);

        relax_depths(&mut g);

        assert_eq!(g.depth_of(mid), depth::GLOBAL);
        assert_eq!(g.depth_of(deep), depth::GLOBAL, "relaxation must reach transitively");
    }

    #[test]
    fn escapes_propagate_forward_any_edge_and_backward_by_assignment() {
        let mut g = PointsToGraph::new();
        let origin = g.add_node(0);
        let held = g.add_node(0);
        let content = g.field_node(origin, FieldId(1));
        let holder = g.add_node(0);
        let sibling_content_holder = g.add_node(0);
        g.add_assignment_edge(origin, held);
        g.add_assignment_edge(holder, origin);
        g.add_assignment_edge(sibling_content_holder, content);
        g.mark_escape_origin(origin);

        propagate_escapes(&mut g);

        assert!(g.escapes(origin));
        assert!(g.escapes(held), "forward via assignment");
        assert!(g.escapes(content), "forward via field edge");
        assert!(g.escapes(holder), "backward via assignment");
        assert!(
            !g.escapes(sibling_content_holder),
            "backward through a field edge must not propagate"
        );
    }

    #[test]
    fn stripped_aliasing_witness_is_restored() {
        // The documented lossy shape: two parameters point into a shared
        // node that is not field-reachable from any root. Dropping it would
        // assert the parameters are provably distinct; the summary must
        // restore a drain witnessing the potential aliasing.
        let mut g = PointsToGraph::new();
        let p0 = g.add_node(crate::lifetime::depth::PARAMETER);
        let p1 = g.add_node(crate::lifetime::depth::PARAMETER);
        let shared = g.add_node(0);
        g.add_assignment_edge(p0, shared);
        g.add_assignment_edge(p1, shared);
        g.set_params(vec![p0, p1]);

        build_drains(&mut g);
        compute_closure(&mut g, &EscapeAnalysisConfig::default(), &mut NullSink);
        let summary = summarize(&mut g, 2);

        assert!(summary.drain_count >= 1, "a witness drain must be emitted");
        let p0_edges: Vec<_> = summary
            .edges
            .iter()
            .filter(|e| e.from == CompressedNode::root(NodeKind::Param(0)))
            .collect();
        let p1_edges: Vec<_> = summary
            .edges
            .iter()
            .filter(|e| e.from == CompressedNode::root(NodeKind::Param(1)))
            .collect();
        assert!(!p0_edges.is_empty() && !p1_edges.is_empty());
        assert_eq!(
            p0_edges[0].to, p1_edges[0].to,
            "both parameters must point at the same restored drain"
        );
    }

    #[test]
    fn unreachable_escape_origin_synthesizes_summary_node() {
        // A value stored from a parameter escapes through a node that is
        // not field-reachable from any root; the summary must still tell
        // callers the parameter's value can escape.
        let mut g = PointsToGraph::new();
        let p0 = g.add_node(crate::lifetime::depth::PARAMETER);
        let hidden = g.add_node(0);
        g.add_assignment_edge(hidden, p0);
        g.mark_escape_origin(hidden);
        g.set_params(vec![p0]);

        build_drains(&mut g);
        compute_closure(&mut g, &EscapeAnalysisConfig::default(), &mut NullSink);
        let summary = summarize(&mut g, 1);

        // The parameter itself escapes (backward assignment propagation),
        // and it must be visible in the summary.
        assert!(
            summary
                .escapes
                .contains(&CompressedNode::root(NodeKind::Param(0))),
            "escape must surface for the parameter: {summary:?}"
        );
    }

    #[test]
    fn array_budget_admits_smallest_first_and_forces_rest_global() {
        use kestrel_ir::AllocSiteId;
        let mut g = PointsToGraph::new();
        let small = g.add_node(0);
        let big = g.add_node(0);
        g.set_allocation(
            small,
            AllocSiteId(0),
            AllocShape::Array {
                elem_bytes: 4,
                const_len: Some(4),
                of_objects: false,
            },
        );
        g.set_allocation(
            big,
            AllocSiteId(1),
            AllocShape::Array {
                elem_bytes: 4,
                const_len: Some(100),
                of_objects: false,
            },
        );

        build_drains(&mut g);
        let config = EscapeAnalysisConfig {
            stack_array_budget: 64,
            ..EscapeAnalysisConfig::default()
        };
        compute_closure(&mut g, &config, &mut NullSink);

        assert_eq!(g.lifetime_of(small), Lifetime::Stack);
        assert_eq!(
            g.lifetime_of(big),
            Lifetime::Global,
            "denied primitive arrays fall back to global"
        );
    }

    #[test]
    fn denied_object_array_escape_reaches_dependents() {
        use kestrel_ir::AllocSiteId;
        let mut g = PointsToGraph::new();
        let arr = g.add_node(0);
        let elem = g.add_node(0);
        g.set_allocation(
            arr,
            AllocSiteId(0),
            AllocShape::Array {
                elem_bytes: 8,
                const_len: Some(64),
                of_objects: true,
            },
        );
        g.set_allocation(elem, AllocSiteId(1), AllocShape::Object { bytes: 16 });
        let slot = g.field_node(arr, FieldId::ELEMENTS);
        g.add_assignment_edge(slot, elem);

        build_drains(&mut g);
        let config = EscapeAnalysisConfig {
            stack_array_budget: 16,
            demote_object_arrays: true,
            ..EscapeAnalysisConfig::default()
        };
        compute_closure(&mut g, &config, &mut NullSink);

        assert_eq!(g.lifetime_of(arr), Lifetime::Global);
        assert_eq!(
            g.lifetime_of(elem),
            Lifetime::Global,
            "re-propagation must reach values stored in the denied array"
        );
    }
}
