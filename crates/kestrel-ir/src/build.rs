//! Programmatic construction of modules, bodies, and call graphs.
//!
//! Upstream IR construction drives these builders when lowering a program;
//! the analysis crate's tests use them to assemble small inputs directly.

use crate::callgraph::{CallGraph, CallSite, Callee, EscapeAnnotation};
use crate::dfg::{AllocShape, DataFlowGraph, DfFlags, DfId, DfNode, DfNodeData, FieldId};
use crate::{AllocSiteId, FunctionId, Module, Symbol, SymbolKind};

/// Builds a [`Module`] plus its [`CallGraph`].
///
/// Functions are declared first (so calls can reference forward ids), then
/// given bodies with [`ModuleBuilder::define`].
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
    call_graph: CallGraph,
    next_site: u32,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        ModuleBuilder::default()
    }

    /// Declares a function with a (for now) empty body.
    pub fn declare(&mut self, name: &str, param_count: u32) -> FunctionId {
        self.module.push_symbol(Symbol {
            name: name.to_string(),
            param_count,
            kind: SymbolKind::Declared(DataFlowGraph::new()),
        })
    }

    /// Declares a body-less external symbol.
    pub fn external(
        &mut self,
        name: &str,
        param_count: u32,
        annotation: Option<EscapeAnnotation>,
    ) -> FunctionId {
        self.module.push_symbol(Symbol {
            name: name.to_string(),
            param_count,
            kind: SymbolKind::External(annotation),
        })
    }

    /// Marks a function as externally callable.
    pub fn root(&mut self, id: FunctionId) {
        if !self.module.roots.contains(&id) {
            self.module.roots.push(id);
        }
    }

    /// Builds the body of a previously declared function.
    ///
    /// Panics if `id` was not declared via [`ModuleBuilder::declare`].
    pub fn define(&mut self, id: FunctionId, build: impl FnOnce(&mut FunctionBuilder)) {
        let param_count = self.module.param_count(id);
        let mut fb = FunctionBuilder::new(param_count, self.next_site);
        build(&mut fb);
        self.next_site = fb.next_site;

        let symbol = self
            .module
            .symbols_mut()
            .get_mut(id.0 as usize)
            .unwrap_or_else(|| panic!("define() on undeclared function {id}"));
        match &mut symbol.kind {
            SymbolKind::Declared(body) => *body = fb.dfg,
            SymbolKind::External(_) => panic!("define() on external function {id}"),
        }
        for site in fb.sites {
            self.call_graph.add_site(id, site);
        }
    }

    pub fn finish(self) -> (Module, CallGraph) {
        (self.module, self.call_graph)
    }
}

impl Module {
    pub(crate) fn symbols_mut(&mut self) -> &mut Vec<Symbol> {
        &mut self.symbols
    }
}

/// Builds one function body.
///
/// Parameter nodes are created up front; all other nodes are appended in
/// program order. Scope depth and loop context are tracked by the
/// [`FunctionBuilder::scoped`] / [`FunctionBuilder::looped`] combinators.
#[derive(Debug)]
pub struct FunctionBuilder {
    dfg: DataFlowGraph,
    sites: Vec<CallSite>,
    scope: u32,
    loop_depth: u32,
    next_site: u32,
}

impl FunctionBuilder {
    fn new(param_count: u32, next_site: u32) -> Self {
        let mut fb = FunctionBuilder {
            dfg: DataFlowGraph::new(),
            sites: Vec::new(),
            scope: 0,
            loop_depth: 0,
            next_site,
        };
        for index in 0..param_count {
            fb.push(DfNode::Parameter { index });
        }
        fb
    }

    fn push(&mut self, kind: DfNode) -> DfId {
        let mut flags = DfFlags::default();
        if self.loop_depth > 0 {
            flags |= DfFlags::IN_LOOP;
        }
        self.dfg.push(DfNodeData {
            kind,
            scope_depth: self.scope,
            flags,
        })
    }

    /// The node for formal parameter `index`.
    pub fn param(&self, index: u32) -> DfId {
        self.dfg.params()[index as usize]
    }

    pub fn alloc_object(&mut self, bytes: u32) -> DfId {
        let site = AllocSiteId(self.next_site);
        self.next_site += 1;
        self.push(DfNode::Alloc {
            site,
            shape: AllocShape::Object { bytes },
        })
    }

    pub fn alloc_array(
        &mut self,
        elem_bytes: u32,
        const_len: Option<u32>,
        of_objects: bool,
    ) -> DfId {
        let site = AllocSiteId(self.next_site);
        self.next_site += 1;
        self.push(DfNode::Alloc {
            site,
            shape: AllocShape::Array {
                elem_bytes,
                const_len,
                of_objects,
            },
        })
    }

    /// The site id the next allocation will receive.
    pub fn peek_site(&self) -> AllocSiteId {
        AllocSiteId(self.next_site)
    }

    pub fn constant(&mut self) -> DfId {
        self.push(DfNode::Const)
    }

    pub fn null(&mut self) -> DfId {
        self.push(DfNode::Null)
    }

    pub fn variable(&mut self, values: &[DfId]) -> DfId {
        self.push(DfNode::Variable {
            values: values.to_vec(),
        })
    }

    pub fn field_read(&mut self, receiver: Option<DfId>, field: FieldId) -> DfId {
        self.push(DfNode::FieldRead { receiver, field })
    }

    pub fn field_write(&mut self, receiver: Option<DfId>, field: FieldId, value: DfId) -> DfId {
        self.push(DfNode::FieldWrite {
            receiver,
            field,
            value,
        })
    }

    pub fn array_read(&mut self, array: DfId) -> DfId {
        self.push(DfNode::ArrayRead { array })
    }

    pub fn array_write(&mut self, array: DfId, value: DfId) -> DfId {
        self.push(DfNode::ArrayWrite { array, value })
    }

    /// Adds a call and registers its call site.
    pub fn call(&mut self, callee: Callee, args: &[DfId]) -> DfId {
        let call_node = self.push(DfNode::Call);
        self.sites.push(CallSite {
            call_node,
            callee,
            args: args.to_vec(),
        });
        call_node
    }

    /// Marks a node as feeding the function's return.
    pub fn ret(&mut self, value: DfId) {
        self.dfg.mark_return(value);
    }

    /// Marks a node's value as feeding an exception path.
    pub fn throws(&mut self, value: DfId) {
        if let Some(data) = self.dfg.node(value) {
            let mut data = data.clone();
            data.flags |= DfFlags::THROWS;
            self.replace(value, data);
        }
    }

    fn replace(&mut self, id: DfId, data: DfNodeData) {
        // Nodes are append-only except for flag updates.
        if let Some(slot) = self.dfg.node_mut(id) {
            *slot = data;
        }
    }

    /// Runs `build` one lexical scope deeper.
    pub fn scoped(&mut self, build: impl FnOnce(&mut Self)) {
        self.scope += 1;
        build(self);
        self.scope -= 1;
    }

    /// Runs `build` inside a loop body (one scope deeper, loop context set).
    pub fn looped(&mut self, build: impl FnOnce(&mut Self)) {
        self.scope += 1;
        self.loop_depth += 1;
        build(self);
        self.loop_depth -= 1;
        self.scope -= 1;
    }
}


impl FunctionBuilder {
    /// Test-facing accessor for a node's data.
    pub fn dfg_node(&self, id: DfId) -> &DfNodeData {
        self.dfg.node(id).unwrap_or_else(|| panic!("unknown node {id}"))
    }
}
