//! Analysis configuration.

/// Policy for call sites the analysis cannot reason about: virtual calls
/// that were not devirtualized and external functions without annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownCallPolicy {
    /// Assume the call has no escape effect. Unsound but profitable: the
    /// common case for unannotated externals is that they do not retain
    /// their arguments, and assuming otherwise forces heap allocation
    /// almost everywhere.
    #[default]
    Optimistic,
    /// Assume every argument and the result escape. Sound and slow.
    Pessimistic,
}

/// Tunables of the escape analysis phase.
#[derive(Debug, Clone)]
pub struct EscapeAnalysisConfig {
    /// Hard ceiling on points-to nodes per analyzed function/component.
    /// Exceeding it converts the analysis of that function into the
    /// pessimistic result instead of running unbounded.
    pub node_limit: usize,
    /// Total bytes of statically-sized arrays allowed on the stack per
    /// function.
    pub stack_array_budget: u64,
    /// How to treat calls with no usable summary.
    pub unknown_call_policy: UnknownCallPolicy,
    /// When an object-element array is denied its stack slot by the budget,
    /// re-add it as an escape origin (keeping dependent nodes consistent)
    /// instead of only forcing it global.
    pub demote_object_arrays: bool,
}

impl Default for EscapeAnalysisConfig {
    fn default() -> Self {
        EscapeAnalysisConfig {
            node_limit: 100_000,
            stack_array_budget: 16 * 1024,
            unknown_call_policy: UnknownCallPolicy::default(),
            demote_object_arrays: true,
        }
    }
}
