//! # evmstate Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and
//! traits from the evmstate library. Import this module to get quick access to the
//! essential types for symbolic machine-state analysis.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all evmstate operations
pub use crate::Error;

/// The result type used throughout evmstate
pub use crate::Result;

// ================================================================================================
// Instruction Vocabulary
// ================================================================================================

/// Side-effect flags for instructions
pub use crate::isa::Effects;

/// One instruction record fed to the tracker
pub use crate::isa::Item;

/// EVM instruction opcodes
pub use crate::isa::Opcode;

/// Per-opcode arity and return-count metadata
pub use crate::isa::InstructionInfo;

// ================================================================================================
// Analysis Engine
// ================================================================================================

/// Equivalence class identifier
pub use crate::engine::ClassId;

/// Global value numbering registry
pub use crate::engine::{ExpressionClasses, SharedClasses};

/// Per-program-point knowledge tracker
pub use crate::engine::MachineState;

/// Record of an executed write
pub use crate::engine::{StoreOperation, StoreTarget};

/// Operation tag of one expression node
pub use crate::engine::Term;
