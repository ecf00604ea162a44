//! EVM opcode definitions and per-instruction metadata.
//!
//! This module provides the instruction metadata the analysis engine needs:
//! declared argument count, declared return count, net stack delta, side-effect
//! flags and a handful of semantic predicates (commutativity, determinism,
//! DUP/SWAP positions).
//!
//! The metadata is assumed stable across EVM versions for the instructions the
//! engine special-cases; version differences only affect instruction names and
//! availability, neither of which the analysis depends on.

use bitflags::bitflags;
use strum::{Display, EnumCount, EnumIter};

bitflags! {
    /// Side-effect flags of an instruction.
    ///
    /// The analysis only acts on the write flags: a possible write to a region
    /// for which no special handling exists invalidates all knowledge about that
    /// region. Read flags are carried for completeness so collaborators can make
    /// scheduling decisions without a second metadata source.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Effects: u8 {
        /// The instruction may read memory.
        const READS_MEMORY = 0x01;
        /// The instruction may write memory.
        const WRITES_MEMORY = 0x02;
        /// The instruction may read storage.
        const READS_STORAGE = 0x04;
        /// The instruction may write storage.
        const WRITES_STORAGE = 0x08;
    }
}

/// Declared argument and return-value counts of an instruction.
///
/// `args` values are consumed from the top of the stack downward; `ret` values
/// are pushed in their place. The net stack delta is `ret - args`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionInfo {
    /// Number of stack arguments consumed.
    pub args: usize,
    /// Number of stack values produced.
    pub ret: usize,
}

impl InstructionInfo {
    /// Net change to the stack height caused by the instruction.
    #[must_use]
    pub fn deposit(&self) -> i32 {
        self.ret as i32 - self.args as i32
    }
}

/// EVM instruction opcodes.
///
/// Only opcodes, arity and effect metadata are modeled — no encoding, gas or
/// version information. The analysis engine treats every opcode it does not
/// special-case through the generic path: consume `args` classes, invalidate
/// regions per [`Effects`], and push `ret` result classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumCount, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum Opcode {
    // Stop and arithmetic
    Stop,
    Add,
    Mul,
    Sub,
    Div,
    Sdiv,
    Mod,
    Smod,
    Addmod,
    Mulmod,
    Exp,
    Signextend,

    // Comparison and bitwise logic
    Lt,
    Gt,
    Slt,
    Sgt,
    Eq,
    Iszero,
    And,
    Or,
    Xor,
    Not,
    Byte,
    Shl,
    Shr,
    Sar,

    // Hashing
    Keccak256,

    // Environment
    Address,
    Balance,
    Origin,
    Caller,
    Callvalue,
    Calldataload,
    Calldatasize,
    Calldatacopy,
    Codesize,
    Codecopy,
    Gasprice,
    Extcodesize,
    Extcodecopy,
    Returndatasize,
    Returndatacopy,
    Extcodehash,

    // Block information
    Blockhash,
    Coinbase,
    Timestamp,
    Number,
    Prevrandao,
    Gaslimit,
    Chainid,
    Selfbalance,
    Basefee,

    // Stack, memory, storage and flow
    Pop,
    Mload,
    Mstore,
    Mstore8,
    Sload,
    Sstore,
    Jump,
    Jumpi,
    Pc,
    Msize,
    Gas,
    Jumpdest,
    Mcopy,

    // Duplication
    Dup1,
    Dup2,
    Dup3,
    Dup4,
    Dup5,
    Dup6,
    Dup7,
    Dup8,
    Dup9,
    Dup10,
    Dup11,
    Dup12,
    Dup13,
    Dup14,
    Dup15,
    Dup16,

    // Exchange
    Swap1,
    Swap2,
    Swap3,
    Swap4,
    Swap5,
    Swap6,
    Swap7,
    Swap8,
    Swap9,
    Swap10,
    Swap11,
    Swap12,
    Swap13,
    Swap14,
    Swap15,
    Swap16,

    // Logging
    Log0,
    Log1,
    Log2,
    Log3,
    Log4,

    // System
    Create,
    Call,
    Callcode,
    Return,
    Delegatecall,
    Create2,
    Staticcall,
    Revert,
    Invalid,
    Selfdestruct,
}

impl Opcode {
    /// Returns the declared argument and return-value counts of this opcode.
    #[must_use]
    pub fn info(self) -> InstructionInfo {
        // DUPn reads n elements and leaves n + 1; SWAPn touches n + 1 and
        // leaves them all.
        if let Some(n) = self.dup_position() {
            return InstructionInfo { args: n, ret: n + 1 };
        }
        if let Some(n) = self.swap_position() {
            return InstructionInfo {
                args: n + 1,
                ret: n + 1,
            };
        }

        let (args, ret) = match self {
            Opcode::Stop | Opcode::Jumpdest | Opcode::Invalid => (0, 0),

            Opcode::Add
            | Opcode::Mul
            | Opcode::Sub
            | Opcode::Div
            | Opcode::Sdiv
            | Opcode::Mod
            | Opcode::Smod
            | Opcode::Exp
            | Opcode::Signextend
            | Opcode::Lt
            | Opcode::Gt
            | Opcode::Slt
            | Opcode::Sgt
            | Opcode::Eq
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Byte
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Sar
            | Opcode::Keccak256 => (2, 1),

            Opcode::Addmod | Opcode::Mulmod => (3, 1),

            Opcode::Iszero
            | Opcode::Not
            | Opcode::Balance
            | Opcode::Calldataload
            | Opcode::Extcodesize
            | Opcode::Extcodehash
            | Opcode::Blockhash
            | Opcode::Mload
            | Opcode::Sload => (1, 1),

            Opcode::Address
            | Opcode::Origin
            | Opcode::Caller
            | Opcode::Callvalue
            | Opcode::Calldatasize
            | Opcode::Codesize
            | Opcode::Gasprice
            | Opcode::Returndatasize
            | Opcode::Coinbase
            | Opcode::Timestamp
            | Opcode::Number
            | Opcode::Prevrandao
            | Opcode::Gaslimit
            | Opcode::Chainid
            | Opcode::Selfbalance
            | Opcode::Basefee
            | Opcode::Pc
            | Opcode::Msize
            | Opcode::Gas => (0, 1),

            Opcode::Calldatacopy
            | Opcode::Codecopy
            | Opcode::Returndatacopy
            | Opcode::Mcopy => (3, 0),
            Opcode::Extcodecopy => (4, 0),

            Opcode::Pop | Opcode::Jump | Opcode::Selfdestruct => (1, 0),
            Opcode::Mstore | Opcode::Mstore8 | Opcode::Sstore | Opcode::Jumpi => (2, 0),
            Opcode::Return | Opcode::Revert => (2, 0),

            Opcode::Log0 => (2, 0),
            Opcode::Log1 => (3, 0),
            Opcode::Log2 => (4, 0),
            Opcode::Log3 => (5, 0),
            Opcode::Log4 => (6, 0),

            Opcode::Create => (3, 1),
            Opcode::Create2 => (4, 1),
            Opcode::Call | Opcode::Callcode => (7, 1),
            Opcode::Delegatecall | Opcode::Staticcall => (6, 1),

            // DUP and SWAP were handled above.
            _ => (0, 0),
        };
        InstructionInfo { args, ret }
    }

    /// Net change to the stack height caused by this opcode.
    #[must_use]
    pub fn deposit(self) -> i32 {
        self.info().deposit()
    }

    /// Returns the side-effect flags of this opcode.
    #[must_use]
    pub fn effects(self) -> Effects {
        match self {
            Opcode::Keccak256 | Opcode::Return | Opcode::Revert => Effects::READS_MEMORY,
            Opcode::Mload => Effects::READS_MEMORY,
            Opcode::Log0 | Opcode::Log1 | Opcode::Log2 | Opcode::Log3 | Opcode::Log4 => {
                Effects::READS_MEMORY
            }

            Opcode::Mstore | Opcode::Mstore8 => Effects::WRITES_MEMORY,
            Opcode::Calldatacopy | Opcode::Codecopy | Opcode::Returndatacopy => {
                Effects::WRITES_MEMORY
            }
            Opcode::Extcodecopy => Effects::WRITES_MEMORY,
            Opcode::Mcopy => Effects::READS_MEMORY | Effects::WRITES_MEMORY,

            Opcode::Sload => Effects::READS_STORAGE,
            Opcode::Sstore => Effects::WRITES_STORAGE,

            Opcode::Create | Opcode::Create2 => {
                Effects::READS_MEMORY | Effects::READS_STORAGE | Effects::WRITES_STORAGE
            }
            Opcode::Call | Opcode::Callcode | Opcode::Delegatecall => {
                Effects::READS_MEMORY
                    | Effects::WRITES_MEMORY
                    | Effects::READS_STORAGE
                    | Effects::WRITES_STORAGE
            }
            Opcode::Staticcall => {
                Effects::READS_MEMORY | Effects::WRITES_MEMORY | Effects::READS_STORAGE
            }
            Opcode::Selfdestruct => Effects::WRITES_STORAGE,

            _ => Effects::empty(),
        }
    }

    /// Returns whether two applications of this opcode to equal arguments are
    /// guaranteed to produce equal results within one execution.
    ///
    /// Non-deterministic opcodes never share an equivalence class, even for
    /// structurally identical applications.
    #[must_use]
    pub fn is_deterministic(self) -> bool {
        !matches!(
            self,
            Opcode::Create
                | Opcode::Create2
                | Opcode::Call
                | Opcode::Callcode
                | Opcode::Delegatecall
                | Opcode::Staticcall
                | Opcode::Gas
                | Opcode::Pc
                | Opcode::Msize
                | Opcode::Blockhash
        )
    }

    /// Returns whether swapping the two operands of this opcode preserves its
    /// result. Commutative operands are canonically ordered before value
    /// numbering so that `ADD(a, b)` and `ADD(b, a)` share a class.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Eq
        )
    }

    /// For `DUPn`, returns `n` (the 1-based depth of the duplicated element).
    #[must_use]
    pub fn dup_position(self) -> Option<usize> {
        match self {
            Opcode::Dup1 => Some(1),
            Opcode::Dup2 => Some(2),
            Opcode::Dup3 => Some(3),
            Opcode::Dup4 => Some(4),
            Opcode::Dup5 => Some(5),
            Opcode::Dup6 => Some(6),
            Opcode::Dup7 => Some(7),
            Opcode::Dup8 => Some(8),
            Opcode::Dup9 => Some(9),
            Opcode::Dup10 => Some(10),
            Opcode::Dup11 => Some(11),
            Opcode::Dup12 => Some(12),
            Opcode::Dup13 => Some(13),
            Opcode::Dup14 => Some(14),
            Opcode::Dup15 => Some(15),
            Opcode::Dup16 => Some(16),
            _ => None,
        }
    }

    /// For `SWAPn`, returns `n` (the 1-based depth of the element exchanged
    /// with the top of the stack).
    #[must_use]
    pub fn swap_position(self) -> Option<usize> {
        match self {
            Opcode::Swap1 => Some(1),
            Opcode::Swap2 => Some(2),
            Opcode::Swap3 => Some(3),
            Opcode::Swap4 => Some(4),
            Opcode::Swap5 => Some(5),
            Opcode::Swap6 => Some(6),
            Opcode::Swap7 => Some(7),
            Opcode::Swap8 => Some(8),
            Opcode::Swap9 => Some(9),
            Opcode::Swap10 => Some(10),
            Opcode::Swap11 => Some(11),
            Opcode::Swap12 => Some(12),
            Opcode::Swap13 => Some(13),
            Opcode::Swap14 => Some(14),
            Opcode::Swap15 => Some(15),
            Opcode::Swap16 => Some(16),
            _ => None,
        }
    }
}
