// Copyright 2026 The evmstate contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # evmstate
//!
//! Symbolic machine-state tracking and global value numbering for EVM bytecode
//! optimization. `evmstate` is the analysis core of a peephole/global bytecode
//! optimizer: it consumes a linear stream of instructions and maintains, at every
//! program point, what is provably known about the machine's stack, storage and
//! memory — expressed as equivalence classes of expressions.
//!
//! ## Features
//!
//! - **Global value numbering** - Structurally equal expressions share one
//!   equivalence class, with commutative-operand canonicalization and eager
//!   constant folding
//! - **Redundant-write detection** - Storage/memory writes of a value already
//!   known to be present are recognized so the optimizer can elide them
//! - **Sound aliasing rules** - Knowledge survives a write only when the written
//!   location is provably different (exact for storage, word-width-disjoint for
//!   memory); everything else is conservatively invalidated
//! - **Fixpoint-safe merging** - Control-flow join points merge two states by
//!   intersection with guaranteed monotonic shrinkage, so iterative analysis of
//!   loops always terminates
//! - **Keccak-256 region reasoning** - Content hashes over small, statically
//!   known memory regions are folded to their literal digest and memoized
//!
//! ## Quick Start
//!
//! ```rust
//! use evmstate::prelude::*;
//! use primitive_types::U256;
//!
//! let classes = ExpressionClasses::new_shared();
//! let mut state = MachineState::new(classes);
//!
//! // PUSH 0x2a, PUSH 0, SSTORE
//! state.feed(&Item::push(0x2a))?;
//! state.feed(&Item::push(0))?;
//! let store = state.feed(&Item::Op(Opcode::Sstore))?;
//! assert!(store.is_some());
//!
//! // The same store again is recognized as redundant.
//! state.feed(&Item::push(0x2a))?;
//! state.feed(&Item::push(0))?;
//! let store = state.feed(&Item::Op(Opcode::Sstore))?;
//! assert!(store.is_none());
//! # Ok::<(), evmstate::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `evmstate` is organized into two tightly coupled components plus the input
//! vocabulary they consume:
//!
//! - [`engine::ExpressionClasses`] - The expression class registry: an
//!   append-only arena of immutable expressions with a canonical-form map for
//!   deduplication. Provides equality and the sound "known different" relation
//!   used to justify retaining knowledge across aliasing writes.
//! - [`engine::MachineState`] - The per-program-point state tracker: stack
//!   height, sparse stack/storage/memory maps from class to class, a sequence
//!   counter disambiguating reads separated by writes, and the merge operation
//!   used at control-flow joins.
//! - [`isa`] - The instruction data model fed into the tracker: opcodes with
//!   arity/return metadata and side-effect flags, plus the assembly item kinds
//!   (literal push, label push, label marker, verbatim bytecode).
//!
//! Data flows one direction per step: instruction → tracker reads its maps →
//! tracker queries/creates classes in the registry → tracker updates its maps →
//! optionally emits a [`engine::StoreOperation`] for the optimizer.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). The engine never
//! fails on valid input — every unhandled instruction has a conservative "treat
//! as unknown" fallback. The only errors are internal invariant violations,
//! surfaced as [`Error::Internal`] with the source location of the violated
//! check; they indicate a bug in the instruction stream producer and abort the
//! analysis pass rather than risking a silent miscompilation.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// This module provides a curated selection of the most frequently used types
/// from across the evmstate library, allowing for convenient glob imports.
///
/// # Example
///
/// ```rust
/// use evmstate::prelude::*;
///
/// let classes = ExpressionClasses::new_shared();
/// let mut state = MachineState::new(classes);
/// state.feed(&Item::push(1))?;
/// assert_eq!(state.stack_height(), 1);
/// # Ok::<(), evmstate::Error>(())
/// ```
pub mod prelude;

/// Instruction set vocabulary consumed by the analysis engine.
///
/// This module defines the data model for the instruction stream fed into the
/// tracker. It deliberately contains no assembler or serialization logic — only
/// the metadata the analysis needs:
///
/// - [`isa::Opcode`] - EVM instruction opcodes with arity, return count and
///   stack delta
/// - [`isa::Effects`] - Side-effect flags (may read/write memory and/or storage)
/// - [`isa::Item`] - One instruction record: an executable opcode, a literal or
///   label push, a label marker, an immutable assignment, or a verbatim block
pub mod isa;

/// The symbolic analysis engine: expression classes and machine state.
///
/// # Key Types
///
/// - [`engine::ExpressionClasses`] - Global value numbering registry
/// - [`engine::MachineState`] - Per-program-point knowledge tracker
/// - [`engine::StoreOperation`] - Record of an executed write, consumed by the
///   optimizer to decide whether the write is redundant
/// - [`engine::Term`] - The operation tag of one expression node
///
/// # Examples
///
/// ```rust
/// use evmstate::prelude::*;
///
/// let classes = ExpressionClasses::new_shared();
/// let mut state = MachineState::new(classes.clone());
///
/// // Two loads of the same slot with no intervening write share a class.
/// state.feed(&Item::push(7))?;
/// state.feed(&Item::Op(Opcode::Sload))?;
/// let first = state.relative_stack_element(0);
/// state.feed(&Item::Op(Opcode::Pop))?;
/// state.feed(&Item::push(7))?;
/// state.feed(&Item::Op(Opcode::Sload))?;
/// assert_eq!(first, state.relative_stack_element(0));
/// # Ok::<(), evmstate::Error>(())
/// ```
pub mod engine;

/// Public Error type for all errors of this crate
pub use error::Error;

/// `Result<T, Error>`
///
/// The standard result type used throughout the evmstate library, using the
/// crate's unified [`enum@Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
