//! Instruction set vocabulary for the analysis engine.
//!
//! This module defines the input data model of the analysis: opcodes with their
//! declared arities and side-effect flags, and the instruction records (items)
//! that make up the analyzed stream. It intentionally contains no assembler,
//! encoder or gas metadata — those live in collaborating crates; the analysis
//! only needs to know what an instruction consumes, produces and may clobber.

pub mod item;
pub mod opcode;

// Re-export primary types at module level
pub use item::Item;
pub use opcode::{Effects, InstructionInfo, Opcode};
