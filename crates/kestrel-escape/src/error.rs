//! Fatal error taxonomy.
//!
//! Only internal invariant violations are errors; everything else the
//! analysis can hit (size blowup, non-convergence, unresolvable annotation
//! references) degrades to a pessimistic-but-safe result instead.

use kestrel_ir::FunctionId;
use thiserror::Error;

/// Unrecoverable internal failures of the escape analysis phase.
///
/// Any of these indicates a compiler bug, not a property of the analyzed
/// program; the displayed guidance names the workaround (disabling the
/// phase) so a build can proceed while the bug is reported.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EscapeError {
    #[error(
        "escape analysis internal invariant violated: {context}; \
         this is a compiler bug; disable the escape analysis phase and file a report"
    )]
    InvariantViolation { context: String },

    #[error(
        "escape analysis found a cycle during {pass} where the call-graph \
         condensation guarantees acyclicity; this is a compiler bug; disable \
         the escape analysis phase and file a report"
    )]
    UnexpectedCycle { pass: &'static str },

    #[error(
        "escape analysis has no recorded result for function {function} \
         which was expected to be analyzed; this is a compiler bug; disable \
         the escape analysis phase and file a report"
    )]
    MissingResult { function: FunctionId },
}
