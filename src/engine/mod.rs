//! The symbolic analysis engine.
//!
//! Two tightly coupled components form the engine:
//!
//! - [`ExpressionClasses`] - A global value-numbering registry mapping
//!   structurally equal expressions to shared equivalence classes, with a
//!   sound partial "known different" relation between classes.
//! - [`MachineState`] - The per-program-point tracker consuming instructions
//!   one at a time and maintaining sparse stack/storage/memory knowledge, with
//!   a fixpoint-safe merge operation for control-flow joins.
//!
//! The registry has no knowledge of control flow; the tracker has no knowledge
//! of expression internals beyond equality and difference queries. One registry
//! is shared by every state of an analysis pass so class ids stay comparable
//! across basic blocks.

pub mod classes;
pub(crate) mod fold;
pub mod state;

// Re-export primary types at module level
pub use classes::{ClassId, Expression, ExpressionClasses, SharedClasses, Term};
pub use state::{MachineState, StoreOperation, StoreTarget};
