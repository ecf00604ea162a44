//! Global value numbering over immutable expression nodes.
//!
//! The registry maps structurally equal expressions to a shared equivalence
//! class id. Expressions live in an append-only arena and reference only
//! earlier-created classes, so the whole structure is an acyclic DAG with
//! plain integer edges — no shared ownership or cycles to manage.
//!
//! Canonicalization happens at [`ExpressionClasses::find`] time:
//!
//! - Operands of commutative opcodes are ordered by class id
//! - Pure opcodes over fully-constant operands are evaluated immediately and
//!   unified with the class of the literal result
//! - Non-deterministic opcodes (calls, `GAS`, `PC`, ...) never unify; every
//!   application gets a fresh class
//!
//! The registry also provides the sound "known different" relation used by the
//! state tracker to retain storage/memory knowledge across aliasing writes.
//! The relation never reports a false positive: it only proves difference for
//! values that decompose to the same base plus distinct constant offsets (or
//! to plain distinct constants).

use std::collections::HashMap;
use std::{cell::RefCell, fmt, rc::Rc};

use primitive_types::U256;

use crate::{engine::fold, isa::Opcode};

/// Identifier of one equivalence class of expressions.
///
/// Ids are opaque, contiguous and monotonically assigned by the registry that
/// owns them. Two classes from the same registry are equal iff their
/// expressions are proven to evaluate identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(u32);

impl ClassId {
    /// Returns the arena index of this class.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Operation tag of one expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Term {
    /// One instruction application.
    Op(Opcode),
    /// A compile-time constant machine word.
    Literal(U256),
    /// A pushed control-flow label.
    LabelRef(U256),
    /// Sentinel for a lazily materialized stack slot at an absolute height.
    /// Keyed by the height so re-reading the same absent slot yields the same
    /// class.
    Slot(i32),
    /// A fresh, never-unifying value: results of unknown-effect instructions,
    /// verbatim return values and tag-union placeholders.
    Opaque(u64),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Op(op) => write!(f, "{}", op),
            Term::Literal(value) => write!(f, "0x{:x}", value),
            Term::LabelRef(tag) => write!(f, "tag_{}", tag),
            Term::Slot(height) => write!(f, "slot({})", height),
            Term::Opaque(token) => write!(f, "unknown{}", token),
        }
    }
}

/// One immutable expression node.
///
/// An expression is an operation tag, the classes of its operands and an
/// optional sequence number. The sequence number distinguishes otherwise
/// identical expressions separated by an intervening write — two `SLOAD`s of
/// the same slot must not unify across a store that may have changed the slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression {
    term: Term,
    args: Vec<ClassId>,
    sequence: u32,
}

impl Expression {
    /// The operation tag of this expression.
    #[must_use]
    pub fn term(&self) -> Term {
        self.term
    }

    /// The operand classes of this expression.
    #[must_use]
    pub fn args(&self) -> &[ClassId] {
        &self.args
    }

    /// The disambiguating sequence number, or 0 for pure expressions.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

/// Shared handle to one registry, passed to every [`crate::engine::MachineState`]
/// of an analysis pass so that class ids remain comparable across states.
pub type SharedClasses = Rc<RefCell<ExpressionClasses>>;

/// Global value numbering registry.
///
/// One registry is shared by all machine states analyzing a compilation unit.
/// Classes, once created, are immutable; the only mutation is the allocation
/// of new classes, which is why the registry sits behind a single shared
/// handle ([`SharedClasses`]) rather than being copied per state.
///
/// The registry never fails on valid input. Identical-expression floods
/// degrade lookup performance, not correctness; memory is bounded structurally
/// by the contiguous class numbering.
#[derive(Debug, Default)]
pub struct ExpressionClasses {
    /// Arena of canonical expressions, indexed by class id.
    expressions: Vec<Expression>,
    /// Canonical form → class id, for deduplication.
    canonical: HashMap<Expression, ClassId>,
    /// Counter backing [`ExpressionClasses::new_class`].
    next_opaque: u64,
}

impl ExpressionClasses {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry behind a shared handle.
    #[must_use]
    pub fn new_shared() -> SharedClasses {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Number of classes allocated so far.
    #[must_use]
    pub fn size(&self) -> usize {
        self.expressions.len()
    }

    /// Iterates over all class ids in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        (0..self.expressions.len()).map(|index| ClassId(index as u32))
    }

    /// Finds or creates the equivalence class of an expression.
    ///
    /// Commutative operands are canonically ordered, and pure opcodes over
    /// fully-constant operands are folded into the class of their literal
    /// result. Non-deterministic opcodes always allocate a fresh class.
    ///
    /// # Arguments
    ///
    /// * `term` - The operation tag
    /// * `args` - Operand classes, top of stack first
    /// * `sequence` - Sequence number for expressions whose value depends on
    ///   write ordering; 0 for pure expressions
    pub fn find(&mut self, term: Term, mut args: Vec<ClassId>, sequence: u32) -> ClassId {
        if let Term::Op(op) = term {
            if op.is_commutative() && args.len() == 2 && args[0] > args[1] {
                args.swap(0, 1);
            }

            if sequence == 0 {
                let constants: Option<Vec<U256>> =
                    args.iter().map(|arg| self.known_constant(*arg)).collect();
                if let Some(constants) = constants {
                    if let Some(value) = fold::fold(op, &constants) {
                        return self.find_literal(value);
                    }
                }
            }

            if !op.is_deterministic() {
                return self.allocate(Expression {
                    term,
                    args,
                    sequence,
                });
            }
        }

        let expression = Expression {
            term,
            args,
            sequence,
        };
        if let Some(&id) = self.canonical.get(&expression) {
            return id;
        }
        let id = self.allocate(expression.clone());
        self.canonical.insert(expression, id);
        id
    }

    /// Finds or creates the class of a literal constant.
    pub fn find_literal(&mut self, value: U256) -> ClassId {
        self.find(Term::Literal(value), Vec::new(), 0)
    }

    /// Finds or creates the class of a pushed control-flow label.
    pub fn find_label(&mut self, tag: U256) -> ClassId {
        self.find(Term::LabelRef(tag), Vec::new(), 0)
    }

    /// Finds or creates the class of an unmaterialized stack slot at an
    /// absolute height. Deduplicated by height, so repeated reads of the same
    /// absent slot agree.
    pub fn find_slot(&mut self, height: i32) -> ClassId {
        self.find(Term::Slot(height), Vec::new(), 0)
    }

    /// Allocates a fresh class that will never unify with any other.
    ///
    /// Used for opaque values: results of instructions with unknown side
    /// effects, verbatim bytecode return values and tag-union placeholders.
    pub fn new_class(&mut self) -> ClassId {
        let token = self.next_opaque;
        self.next_opaque += 1;
        self.allocate(Expression {
            term: Term::Opaque(token),
            args: Vec::new(),
            sequence: 0,
        })
    }

    /// Returns the canonical expression of a class (the first one registered).
    #[must_use]
    pub fn representative(&self, id: ClassId) -> &Expression {
        &self.expressions[id.index()]
    }

    /// Returns the literal value of a class, if it is statically known to be a
    /// compile-time constant.
    #[must_use]
    pub fn known_constant(&self, id: ClassId) -> Option<U256> {
        match self.representative(id).term {
            Term::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Sound test that two classes provably denote different values.
    ///
    /// Never reports a false positive: returns `true` only when both classes
    /// decompose to the same base value plus distinct constant offsets (plain
    /// constants are the degenerate case with no base). Returns `false` in
    /// every situation where difference cannot be proven, including `a == b`.
    #[must_use]
    pub fn known_to_be_different(&self, a: ClassId, b: ClassId) -> bool {
        if a == b {
            return false;
        }
        let (base_a, offset_a) = self.decompose(a);
        let (base_b, offset_b) = self.decompose(b);
        base_a == base_b && offset_a != offset_b
    }

    /// Sound test that two classes provably differ by at least `n`, in both
    /// directions modulo 2^256.
    ///
    /// Used for byte-granular memory, where a write overlaps an earlier one
    /// unless the addresses are a full word apart. Like
    /// [`known_to_be_different`](Self::known_to_be_different), this never
    /// reports a false positive.
    #[must_use]
    pub fn known_to_be_different_by_at_least(&self, a: ClassId, b: ClassId, n: u64) -> bool {
        if n == 0 {
            return true;
        }
        let (base_a, offset_a) = self.decompose(a);
        let (base_b, offset_b) = self.decompose(b);
        if base_a != base_b {
            return false;
        }
        let distance = offset_a.overflowing_sub(offset_b).0;
        let n = U256::from(n);
        // Clear of overlap in both directions: n <= distance <= 2^256 - n.
        distance >= n && distance <= U256::zero().overflowing_sub(n).0
    }

    /// Decomposes a class into `base + constant offset`.
    ///
    /// A plain constant yields no base; an `ADD` chain with constant addends
    /// yields the innermost non-constant class and the accumulated offset;
    /// anything else is its own base with offset 0. Recursion terminates
    /// because operands always refer to earlier-created classes.
    fn decompose(&self, id: ClassId) -> (Option<ClassId>, U256) {
        if let Some(constant) = self.known_constant(id) {
            return (None, constant);
        }
        let expr = self.representative(id);
        if expr.term == Term::Op(Opcode::Add) && expr.args.len() == 2 {
            if let Some(constant) = self.known_constant(expr.args[0]) {
                let (base, offset) = self.decompose(expr.args[1]);
                return (
                    base.or(Some(expr.args[1])),
                    offset.overflowing_add(constant).0,
                );
            }
            if let Some(constant) = self.known_constant(expr.args[1]) {
                let (base, offset) = self.decompose(expr.args[0]);
                return (
                    base.or(Some(expr.args[0])),
                    offset.overflowing_add(constant).0,
                );
            }
        }
        (Some(id), U256::zero())
    }

    fn allocate(&mut self, expression: Expression) -> ClassId {
        let id = ClassId(self.expressions.len() as u32);
        self.expressions.push(expression);
        id
    }
}
