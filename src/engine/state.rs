//! Per-program-point machine-state tracking.
//!
//! [`MachineState`] consumes a linear instruction stream one item at a time and
//! maintains what is provably known at the current program point: the stack
//! height, a sparse map from stack positions to equivalence classes, sparse
//! storage and memory maps from location class to value class, a monotonically
//! increasing sequence counter, and a memoization cache for content hashes over
//! memory regions.
//!
//! # Soundness
//!
//! The tracker never claims false knowledge. Whenever a write might alias an
//! existing fact and the two locations cannot be proven disjoint, the fact is
//! dropped. Instructions with unknown side effects discard entire regions of
//! knowledge. The cost of this conservatism is only a forfeited optimization
//! opportunity, never a miscompilation.
//!
//! # Control-flow joins
//!
//! When two paths converge, [`MachineState::merge`] reduces the caller's state
//! to the knowledge common to both. Merging can only lose information and the
//! stack height can only shrink, so iterating merges around a loop back-edge is
//! guaranteed to reach a fixpoint; the surrounding analysis detects convergence
//! with the height-normalized equality test.
//!
//! # Sequence numbers
//!
//! The sequence counter disambiguates otherwise identical expressions separated
//! by a write. Every write bumps it twice — once before the write's own
//! expression is numbered and once after — so reads ordered after the write can
//! never unify with reads ordered before it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::rc::Rc;

use primitive_types::U256;
use sha3::{Digest, Keccak256};

use crate::{
    engine::{ClassId, ExpressionClasses, SharedClasses, Term},
    isa::{Effects, Item, Opcode},
    Result,
};

/// Maximum byte length of a hashed memory region the tracker reasons about.
///
/// Longer (or unknown-length) regions are treated as fully opaque even when a
/// prefix is statically known.
const MAX_TRACKED_HASH_LENGTH: u64 = 128;

/// Width of one machine word in bytes. Memory writes closer than this to an
/// existing fact may overlap it.
const WORD_SIZE: u64 = 32;

/// Which region a store operation wrote to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTarget {
    /// Persistent storage, slot-granular.
    Storage,
    /// Memory, byte-granular.
    Memory,
}

/// Record of an executed write, emitted by [`MachineState::feed`].
///
/// The optimizer uses these records to recognize and eliminate redundant
/// writes: a write whose value is already known to be present produces no
/// store operation at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOperation {
    /// The region written to.
    pub target: StoreTarget,
    /// Class of the written slot/address.
    pub slot: ClassId,
    /// Sequence number at the time of the write.
    pub sequence_number: u32,
    /// Class of the store expression itself.
    pub expression: ClassId,
}

/// Bidirectional memoization of tag-union classes.
///
/// Two ordinary maps kept in sync: class → label set for widening queries,
/// label set → class so repeated merges of the same label sets reuse one
/// synthetic class instead of allocating duplicates.
#[derive(Debug, Clone, Default)]
struct TagUnions {
    by_class: HashMap<ClassId, BTreeSet<U256>>,
    by_tags: HashMap<BTreeSet<U256>, ClassId>,
}

/// Knowledge about the machine state at a specific program point.
///
/// One instance exists per analyzed basic-block path; all instances of one
/// analysis pass share a single [`ExpressionClasses`] registry so class ids
/// remain comparable across states.
///
/// # Example
///
/// ```rust
/// use evmstate::prelude::*;
///
/// let classes = ExpressionClasses::new_shared();
/// let mut state = MachineState::new(classes);
///
/// state.feed(&Item::push(5))?;
/// state.feed(&Item::push(0))?;
/// let store = state.feed(&Item::Op(Opcode::Sstore))?;
/// assert_eq!(store.map(|op| op.target), Some(StoreTarget::Storage));
/// # Ok::<(), evmstate::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MachineState {
    /// Registry shared across all states of the analysis pass.
    classes: SharedClasses,
    /// Current stack height, relative to the reference frame of the first
    /// instruction. May be negative.
    stack_height: i32,
    /// Sparse stack knowledge. Absent positions below the height are unknown
    /// and materialize lazily on first read.
    stack: BTreeMap<i32, ClassId>,
    /// Known storage content: slot class → value class.
    storage: BTreeMap<ClassId, ClassId>,
    /// Known memory content: address class → value class.
    memory: BTreeMap<ClassId, ClassId>,
    /// Memoized content hashes, keyed by decomposed word classes and length.
    known_hashes: HashMap<(Vec<ClassId>, u64), ClassId>,
    /// Memoized tag-union classes for computed-jump tracking.
    tag_unions: TagUnions,
    /// Monotonic counter; bumped twice per write and per unknown side effect.
    sequence_number: u32,
}

impl MachineState {
    /// Creates a state with no knowledge, starting at stack height 0.
    #[must_use]
    pub fn new(classes: SharedClasses) -> Self {
        Self {
            classes,
            stack_height: 0,
            stack: BTreeMap::new(),
            storage: BTreeMap::new(),
            memory: BTreeMap::new(),
            known_hashes: HashMap::new(),
            tag_unions: TagUnions::default(),
            sequence_number: 1,
        }
    }

    /// Returns a handle to the shared expression class registry.
    #[must_use]
    pub fn classes(&self) -> SharedClasses {
        Rc::clone(&self.classes)
    }

    /// Current stack height.
    #[must_use]
    pub fn stack_height(&self) -> i32 {
        self.stack_height
    }

    /// Current sequence number.
    #[must_use]
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Number of known stack facts.
    #[must_use]
    pub fn stack_facts(&self) -> usize {
        self.stack.len()
    }

    /// Number of known storage facts.
    #[must_use]
    pub fn storage_facts(&self) -> usize {
        self.storage.len()
    }

    /// Number of known memory facts.
    #[must_use]
    pub fn memory_facts(&self) -> usize {
        self.memory.len()
    }

    /// Consumes one instruction and advances the state.
    ///
    /// Returns a [`StoreOperation`] for storage/memory writes that actually
    /// change knowledge; a write of a value already known to be present is
    /// recognized as redundant and returns `None` without bumping the sequence
    /// counter.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for programming errors in the
    /// instruction stream (currently: a swap of a stack slot with itself).
    /// Instructions the tracker does not understand are never errors — they
    /// fall back to "treat the result as unknown".
    pub fn feed(&mut self, item: &Item) -> Result<Option<StoreOperation>> {
        match item {
            // Labels carry no machine-state change.
            Item::Label(_) => Ok(None),

            // Breaks the block downstream; only the stack effect matters,
            // which is the same as two POPs.
            Item::AssignImmutable => {
                self.feed(&Item::Op(Opcode::Pop))?;
                self.feed(&Item::Op(Opcode::Pop))
            }

            Item::Verbatim { args, rets } => {
                self.sequence_number += 2;
                self.reset_memory();
                self.reset_known_hashes();
                self.reset_storage();

                // Consume all arguments and place unknown return values.
                self.trim_stack_above(self.stack_height - *args as i32);
                self.stack_height += item.deposit();
                for i in 0..*rets {
                    let class = self.classes.borrow_mut().new_class();
                    self.set_stack_element(self.stack_height - i as i32, class);
                }
                Ok(None)
            }

            Item::Push(value) => {
                let class = self.classes.borrow_mut().find_literal(*value);
                self.stack_height += 1;
                self.set_stack_element(self.stack_height, class);
                Ok(None)
            }

            Item::PushTag(tag) => {
                let class = self.classes.borrow_mut().find_label(*tag);
                self.stack_height += 1;
                self.set_stack_element(self.stack_height, class);
                Ok(None)
            }

            Item::Op(op) => self.feed_op(*op),
        }
    }

    /// Class at an absolute stack position, materializing it if absent.
    ///
    /// Positions below the current height that were never written are not
    /// undefined behavior — they hold unknown-but-stable values which get a
    /// class on first read, deduplicated by height.
    pub fn stack_element(&mut self, height: i32) -> ClassId {
        if let Some(&class) = self.stack.get(&height) {
            return class;
        }
        let class = self.classes.borrow_mut().find_slot(height);
        self.stack.insert(height, class);
        class
    }

    /// Class at a position relative to the current top of the stack
    /// (offset 0 = top), materializing it if absent.
    pub fn relative_stack_element(&mut self, offset: i32) -> ClassId {
        self.stack_element(self.stack_height + offset)
    }

    /// Reduces this state to the knowledge common with `other`.
    ///
    /// Called when two control-flow paths converge:
    ///
    /// 1. Stack slots (aligned by the height offset) keep their class when
    ///    equal in both states; slots holding control-flow labels on both
    ///    sides widen to a memoized tag-union class; everything else drops.
    /// 2. If the states have different heights, the surviving slots are
    ///    re-expressed relative to the smaller height — knowledge only ever
    ///    shrinks, which makes iterative merging over loop back-edges
    ///    terminate.
    /// 3. Storage and memory keep only entries equal in key and value.
    /// 4. With `combine_sequence_numbers`, the counter becomes the maximum of
    ///    the two histories so future stamps collide with neither.
    pub fn merge(&mut self, other: &MachineState, combine_sequence_numbers: bool) {
        let stack_diff = self.stack_height - other.stack_height;

        let stack = std::mem::take(&mut self.stack);
        for (&height, &class) in &stack {
            let Some(&other_class) = other.stack.get(&(height - stack_diff)) else {
                continue;
            };
            if class == other_class {
                self.stack.insert(height, class);
                continue;
            }
            let these = self.tags_in_expression(class);
            let those = self.tags_in_expression(other_class);
            if !these.is_empty() && !those.is_empty() {
                let mut union = these;
                union.extend(those);
                let widened = self.tag_union(union);
                self.stack.insert(height, widened);
            }
        }

        // Use the smaller stack height. Essential to terminate in case of loops.
        if stack_diff > 0 {
            self.stack = self
                .stack
                .iter()
                .map(|(&height, &class)| (height - stack_diff, class))
                .collect();
            self.stack_height = other.stack_height;
        }

        intersect(&mut self.storage, &other.storage);
        intersect(&mut self.memory, &other.memory);

        if combine_sequence_numbers {
            self.sequence_number = self.sequence_number.max(other.sequence_number);
        }
    }

    /// Drops every stack slot currently holding a tag-union class.
    ///
    /// Control-flow label tracking is intentionally short-lived: tag unions
    /// exist so computed-jump analysis stays precise across merges, and must
    /// not survive into stable long-term knowledge.
    pub fn clear_tag_unions(&mut self) {
        let by_class = &self.tag_unions.by_class;
        self.stack.retain(|_, class| !by_class.contains_key(class));
    }

    /// Set of control-flow labels a class is known to take values from.
    ///
    /// A tag-union class yields its memoized label set; a plain label
    /// reference yields the singleton of itself; anything else yields the
    /// empty set ("not label-valued").
    #[must_use]
    pub fn tags_in_expression(&self, id: ClassId) -> BTreeSet<U256> {
        if let Some(tags) = self.tag_unions.by_class.get(&id) {
            return tags.clone();
        }
        match self.classes.borrow().representative(id).term() {
            Term::LabelRef(tag) => std::iter::once(tag).collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Deterministic, complete rendering of the state for diagnostics.
    #[must_use]
    pub fn dump(&self) -> String {
        let classes = self.classes.borrow();
        let mut out = String::new();
        let _ = writeln!(out, "=== State ===");
        let _ = writeln!(out, "Stack height: {}", self.stack_height);
        let _ = writeln!(out, "Equivalence classes:");
        for id in classes.ids() {
            let _ = writeln!(out, "  {}", describe(&classes, id));
        }
        let _ = writeln!(out, "Stack:");
        for (height, class) in &self.stack {
            let _ = writeln!(out, "  {}: {}", height, describe(&classes, *class));
        }
        let _ = writeln!(out, "Storage:");
        for (slot, value) in &self.storage {
            let _ = writeln!(
                out,
                "  {} -> {}",
                describe(&classes, *slot),
                describe(&classes, *value)
            );
        }
        let _ = writeln!(out, "Memory:");
        for (address, value) in &self.memory {
            let _ = writeln!(
                out,
                "  {} -> {}",
                describe(&classes, *address),
                describe(&classes, *value)
            );
        }
        out
    }

    fn feed_op(&mut self, op: Opcode) -> Result<Option<StoreOperation>> {
        let mut operation = None;

        if let Some(position) = op.dup_position() {
            let class = self.stack_element(self.stack_height - (position as i32 - 1));
            self.set_stack_element(self.stack_height + 1, class);
        } else if let Some(position) = op.swap_position() {
            self.swap_stack_elements(self.stack_height, self.stack_height - position as i32)?;
        } else if op != Opcode::Pop {
            let info = op.info();
            let mut arguments = Vec::with_capacity(info.args);
            for i in 0..info.args {
                arguments.push(self.stack_element(self.stack_height - i as i32));
            }

            match op {
                Opcode::Sstore => {
                    operation = self.store_in_storage(arguments[0], arguments[1]);
                }
                Opcode::Sload => {
                    let value = self.load_from_storage(arguments[0]);
                    self.set_stack_element(self.stack_height + op.deposit(), value);
                }
                Opcode::Mstore => {
                    operation = self.store_in_memory(arguments[0], arguments[1]);
                }
                Opcode::Mload => {
                    let value = self.load_from_memory(arguments[0]);
                    self.set_stack_element(self.stack_height + op.deposit(), value);
                }
                Opcode::Keccak256 => {
                    let value = self.apply_keccak256(arguments[0], arguments[1]);
                    self.set_stack_element(self.stack_height + op.deposit(), value);
                }
                _ => {
                    // Generic path: invalidate whatever the instruction may
                    // clobber, then value-number the result. We could be more
                    // fine-grained (CALL only invalidates part of memory),
                    // but we are not for now.
                    let effects = op.effects();
                    let invalidates_memory = effects.contains(Effects::WRITES_MEMORY);
                    let invalidates_storage = effects.contains(Effects::WRITES_STORAGE);
                    if invalidates_memory {
                        self.reset_memory();
                        self.reset_known_hashes();
                    }
                    if invalidates_storage {
                        self.reset_storage();
                    }
                    let side_effecting = invalidates_memory || invalidates_storage;
                    if side_effecting {
                        // Twice, because the instruction can read and write.
                        self.sequence_number += 2;
                    }
                    debug_assert!(info.ret <= 1);
                    if info.ret == 1 {
                        let sequence = if side_effecting {
                            self.sequence_number
                        } else {
                            0
                        };
                        let class =
                            self.classes
                                .borrow_mut()
                                .find(Term::Op(op), arguments, sequence);
                        self.set_stack_element(self.stack_height + op.deposit(), class);
                    }
                }
            }
        }

        self.trim_stack_above(self.stack_height + op.deposit());
        self.stack_height += op.deposit();
        Ok(operation)
    }

    fn set_stack_element(&mut self, height: i32, class: ClassId) {
        self.stack.insert(height, class);
    }

    fn swap_stack_elements(&mut self, height_a: i32, height_b: i32) -> Result<()> {
        if height_a == height_b {
            return Err(internal_error!(
                "swap of stack slot {} with itself",
                height_a
            ));
        }
        // Materialize both before exchanging.
        let a = self.stack_element(height_a);
        let b = self.stack_element(height_b);
        self.stack.insert(height_a, b);
        self.stack.insert(height_b, a);
        Ok(())
    }

    /// Drops stack entries strictly above `height`; they fall out of scope.
    fn trim_stack_above(&mut self, height: i32) {
        let _ = self.stack.split_off(&(height + 1));
    }

    fn store_in_storage(&mut self, slot: ClassId, value: ClassId) -> Option<StoreOperation> {
        if self.storage.get(&slot) == Some(&value) {
            // The value is already there; the optimizer can elide this write.
            return None;
        }
        self.sequence_number += 1;

        // Retain knowledge that provably survives the write: slots different
        // from the written one, or slots already holding the written value.
        let retained: BTreeMap<ClassId, ClassId> = {
            let classes = self.classes.borrow();
            self.storage
                .iter()
                .filter(|(k, v)| classes.known_to_be_different(**k, slot) || **v == value)
                .map(|(k, v)| (*k, *v))
                .collect()
        };
        self.storage = retained;

        let expression = self.classes.borrow_mut().find(
            Term::Op(Opcode::Sstore),
            vec![slot, value],
            self.sequence_number,
        );
        let operation = StoreOperation {
            target: StoreTarget::Storage,
            slot,
            sequence_number: self.sequence_number,
            expression,
        };
        self.storage.insert(slot, value);
        // Second bump so reads ordered after this write get a distinct stamp.
        self.sequence_number += 1;
        Some(operation)
    }

    fn load_from_storage(&mut self, slot: ClassId) -> ClassId {
        if let Some(&value) = self.storage.get(&slot) {
            return value;
        }
        // Unknown reads are stable for the rest of the analysis window unless
        // a later write invalidates them.
        let value =
            self.classes
                .borrow_mut()
                .find(Term::Op(Opcode::Sload), vec![slot], self.sequence_number);
        self.storage.insert(slot, value);
        value
    }

    fn store_in_memory(&mut self, address: ClassId, value: ClassId) -> Option<StoreOperation> {
        if self.memory.get(&address) == Some(&value) {
            return None;
        }
        self.sequence_number += 1;

        // Memory is byte-granular: a fact survives only when its address is a
        // full word away from the written one. Equal values are not enough —
        // a misaligned overlapping write shifts bytes under the older fact.
        let retained: BTreeMap<ClassId, ClassId> = {
            let classes = self.classes.borrow();
            self.memory
                .iter()
                .filter(|(k, _)| classes.known_to_be_different_by_at_least(**k, address, WORD_SIZE))
                .map(|(k, v)| (*k, *v))
                .collect()
        };
        self.memory = retained;

        let expression = self.classes.borrow_mut().find(
            Term::Op(Opcode::Mstore),
            vec![address, value],
            self.sequence_number,
        );
        let operation = StoreOperation {
            target: StoreTarget::Memory,
            slot: address,
            sequence_number: self.sequence_number,
            expression,
        };
        self.memory.insert(address, value);
        self.sequence_number += 1;
        Some(operation)
    }

    fn load_from_memory(&mut self, address: ClassId) -> ClassId {
        if let Some(&value) = self.memory.get(&address) {
            return value;
        }
        let value = self.classes.borrow_mut().find(
            Term::Op(Opcode::Mload),
            vec![address],
            self.sequence_number,
        );
        self.memory.insert(address, value);
        value
    }

    /// Content hash over a memory region.
    ///
    /// For regions with a known length of at most [`MAX_TRACKED_HASH_LENGTH`]
    /// bytes, the region decomposes into words resolved through memory
    /// knowledge; the result is memoized per (word classes, length), and when
    /// every word is a known constant the digest is computed outright and
    /// unified with its literal class. Everything else is an opaque class
    /// stamped with the current sequence number.
    fn apply_keccak256(&mut self, start: ClassId, length: ClassId) -> ClassId {
        let known_length = self.classes.borrow().known_constant(length);
        let byte_length = match known_length {
            Some(l) if l <= U256::from(MAX_TRACKED_HASH_LENGTH) => l.low_u64(),
            // Unknown or too large: give up on the region's content.
            _ => {
                return self.classes.borrow_mut().find(
                    Term::Op(Opcode::Keccak256),
                    vec![start, length],
                    self.sequence_number,
                )
            }
        };

        let mut words = Vec::new();
        let mut offset = 0u64;
        while offset < byte_length {
            let address = {
                let mut classes = self.classes.borrow_mut();
                let offset_class = classes.find_literal(U256::from(offset));
                classes.find(Term::Op(Opcode::Add), vec![start, offset_class], 0)
            };
            words.push(self.load_from_memory(address));
            offset += WORD_SIZE;
        }

        if let Some(&cached) = self.known_hashes.get(&(words.clone(), byte_length)) {
            return cached;
        }

        let constants: Option<Vec<U256>> = {
            let classes = self.classes.borrow();
            words.iter().map(|w| classes.known_constant(*w)).collect()
        };
        let value = if let Some(constants) = constants {
            // Fully constant region: compute the digest of the concatenated,
            // length-truncated big-endian words right here.
            let mut data = Vec::with_capacity(constants.len() * WORD_SIZE as usize);
            for constant in &constants {
                let mut word = [0u8; 32];
                constant.to_big_endian(&mut word);
                data.extend_from_slice(&word);
            }
            data.truncate(byte_length as usize);
            let digest = Keccak256::digest(&data);
            self.classes
                .borrow_mut()
                .find_literal(U256::from_big_endian(digest.as_slice()))
        } else {
            self.classes.borrow_mut().find(
                Term::Op(Opcode::Keccak256),
                vec![start, length],
                self.sequence_number,
            )
        };
        self.known_hashes.insert((words, byte_length), value);
        value
    }

    /// Memoized synthetic class for a set of control-flow labels.
    fn tag_union(&mut self, tags: BTreeSet<U256>) -> ClassId {
        if let Some(&id) = self.tag_unions.by_tags.get(&tags) {
            return id;
        }
        let id = self.classes.borrow_mut().new_class();
        self.tag_unions.by_class.insert(id, tags.clone());
        self.tag_unions.by_tags.insert(tags, id);
        id
    }

    fn reset_storage(&mut self) {
        self.storage.clear();
    }

    fn reset_memory(&mut self) {
        self.memory.clear();
    }

    fn reset_known_hashes(&mut self) {
        self.known_hashes.clear();
    }
}

/// Equality up to a constant stack-height offset.
///
/// Storage and memory maps must match exactly; stack maps must match after
/// normalizing for the height difference. Consistent with [`MachineState::merge`]:
/// `a == b` holds exactly when merging would lose nothing.
impl PartialEq for MachineState {
    fn eq(&self, other: &Self) -> bool {
        if self.storage != other.storage || self.memory != other.memory {
            return false;
        }
        let stack_diff = self.stack_height - other.stack_height;
        self.stack.len() == other.stack.len()
            && self
                .stack
                .iter()
                .zip(other.stack.iter())
                .all(|((&h1, &c1), (&h2, &c2))| h1 - stack_diff == h2 && c1 == c2)
    }
}

impl Eq for MachineState {}

/// Removes everything from `this` that is absent from or different in `other`.
fn intersect(this: &mut BTreeMap<ClassId, ClassId>, other: &BTreeMap<ClassId, ClassId>) {
    this.retain(|key, value| other.get(key) == Some(value));
}

/// One-line rendering of a class: id, term, sequence stamp and operands.
fn describe(classes: &ExpressionClasses, id: ClassId) -> String {
    let expr = classes.representative(id);
    let mut out = String::new();
    let _ = write!(out, "{}: {}", id, expr.term());
    if expr.sequence() != 0 {
        let _ = write!(out, "@{}", expr.sequence());
    }
    let _ = write!(out, "(");
    for arg in expr.args() {
        let _ = write!(out, "{},", arg);
    }
    let _ = write!(out, ")");
    out
}
