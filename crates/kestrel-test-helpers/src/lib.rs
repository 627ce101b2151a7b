//! Shared helpers for kestrel integration tests.
//!
//! Small, recognizable program shapes used across the escape-analysis test
//! suites, so individual tests read as scenarios instead of IR plumbing.

use kestrel_ir::{
    AllocSiteId, CallGraph, Callee, FieldId, FunctionId, Module, ModuleBuilder,
};

/// A module with a single function and its one allocation site.
pub struct SingleFunction {
    pub module: Module,
    pub call_graph: CallGraph,
    pub function: FunctionId,
    pub site: AllocSiteId,
}

/// `fun f(): Any { val x = Any(); return x }`
pub fn returns_fresh_allocation() -> SingleFunction {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", 0);
    let mut site = AllocSiteId(0);
    mb.define(f, |b| {
        site = b.peek_site();
        let x = b.alloc_object(16);
        b.ret(x);
    });
    mb.root(f);
    let (module, call_graph) = mb.finish();
    SingleFunction {
        module,
        call_graph,
        function: f,
        site,
    }
}

/// A function storing a fresh allocation into a global (unknown receiver)
/// field.
pub fn stores_into_global() -> SingleFunction {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", 0);
    let mut site = AllocSiteId(0);
    mb.define(f, |b| {
        site = b.peek_site();
        let x = b.alloc_object(16);
        b.field_write(None, FieldId(0), x);
    });
    mb.root(f);
    let (module, call_graph) = mb.finish();
    SingleFunction {
        module,
        call_graph,
        function: f,
        site,
    }
}

/// `fun rec(n: Int): Node { return if (n == 0) Node() else rec(n - 1) }`
pub fn self_recursive_returning_allocation() -> SingleFunction {
    let mut mb = ModuleBuilder::new();
    let rec = mb.declare("rec", 1);
    let mut site = AllocSiteId(0);
    mb.define(rec, |b| {
        site = b.peek_site();
        let node = b.alloc_object(24);
        b.ret(node);
        let n = b.param(0);
        let again = b.call(Callee::Direct(rec), &[n]);
        b.ret(again);
    });
    mb.root(rec);
    let (module, call_graph) = mb.finish();
    SingleFunction {
        module,
        call_graph,
        function: rec,
        site,
    }
}

/// Two mutually recursive functions, each allocating.
pub fn mutually_recursive_pair() -> (Module, CallGraph, FunctionId, FunctionId) {
    let mut mb = ModuleBuilder::new();
    let ping = mb.declare("ping", 1);
    let pong = mb.declare("pong", 1);
    mb.define(ping, |b| {
        let p = b.param(0);
        let x = b.alloc_object(8);
        let r = b.call(Callee::Direct(pong), &[p]);
        b.ret(x);
        b.ret(r);
    });
    mb.define(pong, |b| {
        let p = b.param(0);
        let r = b.call(Callee::Direct(ping), &[p]);
        b.ret(r);
    });
    mb.root(ping);
    let (module, call_graph) = mb.finish();
    (module, call_graph, ping, pong)
}
