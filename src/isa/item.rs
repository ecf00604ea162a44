//! Instruction records fed to the analysis engine.
//!
//! An [`Item`] is one element of the linear instruction stream the tracker
//! consumes. Besides executable opcodes, the stream carries assembly-level
//! markers the analysis must understand: literal pushes, control-flow-label
//! pushes, label markers, immutable assignments and verbatim bytecode blocks.

use primitive_types::U256;

use crate::isa::Opcode;

/// One instruction record of the analyzed stream.
///
/// Items are produced by the assembler/disassembler collaborators and consumed
/// one at a time by [`crate::engine::MachineState::feed`]. Every item declares
/// its stack effect through [`arguments`](Item::arguments) and
/// [`return_values`](Item::return_values).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// An executable instruction.
    Op(Opcode),

    /// Push of a literal machine word.
    Push(U256),

    /// Push of a control-flow label ("tag"). Kept distinct from [`Item::Push`]
    /// because the label's final byte offset is unknown during analysis, and
    /// because label-valued stack slots participate in tag-union widening at
    /// control-flow merges.
    PushTag(U256),

    /// A label marker. No machine-state change; jump targets resolve here.
    Label(U256),

    /// Assignment to an immutable. Breaks the block downstream, so only its
    /// stack effect matters to the analysis: exactly two pops.
    AssignImmutable,

    /// A verbatim bytecode block with unknown effects. Consumes `args` stack
    /// elements, produces `rets` unknown values and invalidates all memory and
    /// storage knowledge.
    Verbatim {
        /// Stack elements consumed by the block.
        args: usize,
        /// Stack values produced by the block.
        rets: usize,
    },
}

impl Item {
    /// Convenience constructor for a small literal push.
    #[must_use]
    pub fn push(value: u64) -> Self {
        Item::Push(U256::from(value))
    }

    /// Convenience constructor for a label push.
    #[must_use]
    pub fn push_tag(tag: u64) -> Self {
        Item::PushTag(U256::from(tag))
    }

    /// Number of stack elements this item consumes.
    #[must_use]
    pub fn arguments(&self) -> usize {
        match self {
            Item::Op(op) => op.info().args,
            Item::Push(_) | Item::PushTag(_) | Item::Label(_) => 0,
            Item::AssignImmutable => 2,
            Item::Verbatim { args, .. } => *args,
        }
    }

    /// Number of stack values this item produces.
    #[must_use]
    pub fn return_values(&self) -> usize {
        match self {
            Item::Op(op) => op.info().ret,
            Item::Push(_) | Item::PushTag(_) => 1,
            Item::Label(_) | Item::AssignImmutable => 0,
            Item::Verbatim { rets, .. } => *rets,
        }
    }

    /// Net change to the stack height caused by this item.
    #[must_use]
    pub fn deposit(&self) -> i32 {
        match self {
            Item::Op(op) => op.deposit(),
            Item::AssignImmutable => -2,
            _ => self.return_values() as i32 - self.arguments() as i32,
        }
    }
}
