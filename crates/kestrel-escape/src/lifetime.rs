//! Lifetimes and scope depths.
//!
//! A node's depth is an integer proxy for its escape scope: smaller values
//! denote broader (more escaping) scope. Negative values are sentinels for
//! the non-lexical scopes; function body scopes count up from
//! [`depth::ROOT_SCOPE`].

use serde::{Deserialize, Serialize};

/// The abstract storage duration class assigned to one allocation site.
///
/// `Stack` is the most restrictive and cheapest placement; `Global` is the
/// conservative fallback every unresolved case degrades to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifetime {
    /// Never leaves its allocating scope; eligible for stack placement.
    Stack,
    /// Leaves its allocating scope but not the function.
    Local,
    /// May alias a formal parameter; lives at most as long as the caller's
    /// argument.
    Argument,
    /// Is one of the function's literal return expressions.
    ReturnValue,
    /// Flows into the returned value without being returned directly.
    IndirectReturnValue,
    /// Escapes all statically-known scopes; must be heap (GC) allocated.
    Global,
}

/// Scope-depth sentinels.
pub mod depth {
    /// Escapes everything; the pessimistic fallback depth.
    pub const GLOBAL: i32 = -3;
    /// The scope of a formal parameter.
    pub const PARAMETER: i32 = -2;
    /// The scope of the function's return value.
    pub const RETURN_VALUE: i32 = -1;
    /// The function root scope; deeper lexical scopes count up from here.
    pub const ROOT_SCOPE: i32 = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_sort_below_body_scopes() {
        assert!(depth::GLOBAL < depth::PARAMETER);
        assert!(depth::PARAMETER < depth::RETURN_VALUE);
        assert!(depth::RETURN_VALUE < depth::ROOT_SCOPE);
    }

    #[test]
    fn lifetime_serializes() {
        let json = serde_json::to_string(&Lifetime::ReturnValue).unwrap();
        assert_eq!(json, "\"ReturnValue\"");
    }
}
