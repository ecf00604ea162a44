//! End-to-end tests for the analysis engine.
//!
//! All tests follow the same pattern:
//! 1. Build an instruction sequence from [`Item`]s
//! 2. Feed it through one or more [`MachineState`]s sharing a registry
//! 3. Verify the resulting knowledge, store operations and merge behavior
//!
//! The scenarios cover the engine's observable guarantees: redundant-write
//! elision, read stability, invalidation across opaque instructions, merge
//! idempotence and monotonic shrinkage, tag-union widening and content-hash
//! memoization.

use evmstate::prelude::*;
use primitive_types::U256;
use sha3::{Digest, Keccak256};

/// Feeds a sequence of items, panicking on internal errors.
fn run(state: &mut MachineState, items: &[Item]) -> Vec<StoreOperation> {
    items
        .iter()
        .filter_map(|item| state.feed(item).expect("valid instruction stream"))
        .collect()
}

#[test]
fn redundant_storage_write_is_elided() {
    let classes = ExpressionClasses::new_shared();
    let mut state = MachineState::new(classes.clone());

    // PUSH 5, PUSH 0, SSTORE
    let stores = run(
        &mut state,
        &[Item::push(5), Item::push(0), Item::Op(Opcode::Sstore)],
    );
    assert_eq!(stores.len(), 1);
    assert_eq!(stores[0].target, StoreTarget::Storage);
    assert_eq!(
        classes.borrow().known_constant(stores[0].slot),
        Some(U256::zero())
    );
    // The write bumped the counter twice: once before numbering the store
    // expression, once after.
    assert_eq!(state.sequence_number(), 3);
    assert_eq!(state.storage_facts(), 1);

    // The exact same store again is recognized as redundant: no store
    // operation, no sequence bump.
    let stores = run(
        &mut state,
        &[Item::push(5), Item::push(0), Item::Op(Opcode::Sstore)],
    );
    assert!(stores.is_empty());
    assert_eq!(state.sequence_number(), 3);
    assert_eq!(state.storage_facts(), 1);
}

#[test]
fn redundant_memory_write_is_elided() {
    let classes = ExpressionClasses::new_shared();
    let mut state = MachineState::new(classes);

    let stores = run(
        &mut state,
        &[Item::push(7), Item::push(64), Item::Op(Opcode::Mstore)],
    );
    assert_eq!(stores.len(), 1);
    assert_eq!(stores[0].target, StoreTarget::Memory);
    let seq = state.sequence_number();

    let stores = run(
        &mut state,
        &[Item::push(7), Item::push(64), Item::Op(Opcode::Mstore)],
    );
    assert!(stores.is_empty());
    assert_eq!(state.sequence_number(), seq);
}

#[test]
fn storage_reads_are_stable_without_intervening_writes() {
    let classes = ExpressionClasses::new_shared();
    let mut state = MachineState::new(classes);

    // SLOAD of an unknown slot twice in a row yields the identical class.
    run(&mut state, &[Item::push(33), Item::Op(Opcode::Sload)]);
    let first = state.relative_stack_element(0);
    run(
        &mut state,
        &[Item::Op(Opcode::Pop), Item::push(33), Item::Op(Opcode::Sload)],
    );
    let second = state.relative_stack_element(0);
    assert_eq!(first, second);
}

#[test]
fn opaque_instruction_invalidates_storage_reads() {
    let classes = ExpressionClasses::new_shared();
    let mut state = MachineState::new(classes.clone());

    // SSTORE 5 into slot 8, remember the stored value's class.
    run(
        &mut state,
        &[Item::push(5), Item::push(8), Item::Op(Opcode::Sstore)],
    );
    run(&mut state, &[Item::push(8), Item::Op(Opcode::Sload)]);
    let before = state.relative_stack_element(0);
    assert_eq!(classes.borrow().known_constant(before), Some(U256::from(5u64)));
    run(&mut state, &[Item::Op(Opcode::Pop)]);

    // CALL may write storage: all storage knowledge is discarded.
    let mut call = vec![Item::push(0); 7];
    call.push(Item::Op(Opcode::Call));
    run(&mut state, &call);
    run(
        &mut state,
        &[Item::Op(Opcode::Pop), Item::push(8), Item::Op(Opcode::Sload)],
    );
    let after = state.relative_stack_element(0);

    // The second load must not reuse the pre-call value.
    assert_ne!(before, after);
    assert_eq!(classes.borrow().known_constant(after), None);
}

#[test]
fn aliasing_storage_write_retains_provably_disjoint_slots() {
    let classes = ExpressionClasses::new_shared();
    let mut state = MachineState::new(classes);

    // Two facts at constant slots 0 and 1.
    run(
        &mut state,
        &[
            Item::push(10),
            Item::push(0),
            Item::Op(Opcode::Sstore),
            Item::push(11),
            Item::push(1),
            Item::Op(Opcode::Sstore),
        ],
    );
    assert_eq!(state.storage_facts(), 2);

    // A write to an unknown slot could alias either; both drop, only the new
    // fact remains.
    run(
        &mut state,
        &[
            Item::push(12),
            Item::Op(Opcode::Calldatasize),
            Item::Op(Opcode::Sstore),
        ],
    );
    assert_eq!(state.storage_facts(), 1);

    // A write to constant slot 7 provably misses constant slot 0, so both
    // constant facts survive; the unknown-slot fact cannot be proven disjoint
    // from either write and drops along the way.
    run(
        &mut state,
        &[
            Item::push(13),
            Item::push(0),
            Item::Op(Opcode::Sstore),
            Item::push(14),
            Item::push(7),
            Item::Op(Opcode::Sstore),
        ],
    );
    assert_eq!(state.storage_facts(), 2);
}

#[test]
fn overlapping_memory_write_invalidates_within_a_word() {
    let classes = ExpressionClasses::new_shared();
    let mut state = MachineState::new(classes);

    run(
        &mut state,
        &[Item::push(1), Item::push(0), Item::Op(Opcode::Mstore)],
    );
    assert_eq!(state.memory_facts(), 1);

    // 16 bytes away: may overlap, the old fact drops.
    run(
        &mut state,
        &[Item::push(2), Item::push(16), Item::Op(Opcode::Mstore)],
    );
    assert_eq!(state.memory_facts(), 1);

    // 48 bytes away from 16: provably disjoint, both facts survive.
    run(
        &mut state,
        &[Item::push(3), Item::push(64), Item::Op(Opcode::Mstore)],
    );
    assert_eq!(state.memory_facts(), 2);
}

#[test]
fn merge_of_identical_states_is_idempotent() {
    let classes = ExpressionClasses::new_shared();
    let mut state = MachineState::new(classes);
    run(
        &mut state,
        &[
            Item::push(5),
            Item::push(0),
            Item::Op(Opcode::Sstore),
            Item::push(1),
            Item::Op(Opcode::Mload),
        ],
    );

    let other = state.clone();
    assert_eq!(state, other);

    state.merge(&other, true);
    assert_eq!(state, other);
    assert_eq!(state.stack_facts(), other.stack_facts());
    assert_eq!(state.storage_facts(), other.storage_facts());
    assert_eq!(state.memory_facts(), other.memory_facts());
    assert_eq!(state.sequence_number(), other.sequence_number());
}

#[test]
fn merge_shrinks_monotonically_and_converges() {
    let classes = ExpressionClasses::new_shared();

    let mut a = MachineState::new(classes.clone());
    run(
        &mut a,
        &[
            Item::push(5),
            Item::push(0),
            Item::Op(Opcode::Sstore),
            Item::push(9),
            Item::push(32),
            Item::Op(Opcode::Mstore),
            Item::push(1),
            Item::push(2),
        ],
    );

    let mut b = MachineState::new(classes);
    run(
        &mut b,
        &[Item::push(5), Item::push(0), Item::Op(Opcode::Sstore), Item::push(1)],
    );

    let max_stack = a.stack_facts().min(b.stack_facts());
    let max_storage = a.storage_facts().min(b.storage_facts());
    let max_memory = a.memory_facts().min(b.memory_facts());

    a.merge(&b, true);
    assert!(a.stack_facts() <= max_stack);
    assert!(a.storage_facts() <= max_storage);
    assert!(a.memory_facts() <= max_memory);
    // Heights shrink to the smaller of the two.
    assert_eq!(a.stack_height(), b.stack_height());

    // Iterating the merge reaches a fixpoint: nothing more is lost.
    let converged = a.clone();
    a.merge(&b, true);
    assert_eq!(a, converged);
    a.merge(&converged, true);
    assert_eq!(a, converged);
}

#[test]
fn merge_aligns_stacks_by_height_offset() {
    let classes = ExpressionClasses::new_shared();

    // Same pushed value at different absolute heights.
    let mut a = MachineState::new(classes.clone());
    run(&mut a, &[Item::push(0xaa), Item::push(0xbb)]);

    let mut b = MachineState::new(classes);
    run(
        &mut b,
        &[Item::push(1), Item::Op(Opcode::Pop), Item::Op(Opcode::Pop)],
    );
    run(&mut b, &[Item::push(0xaa), Item::push(0xbb)]);

    assert_eq!(a.stack_height(), 2);
    assert_eq!(b.stack_height(), 1);

    // The offset-aligned slots agree, so merging keeps them and re-expresses
    // the taller state's slots relative to the smaller height.
    a.merge(&b, false);
    assert_eq!(a.stack_height(), 1);
    assert_eq!(a.stack_facts(), 2);
    assert_eq!(a, b);
}

#[test]
fn merge_widens_label_slots_to_tag_unions() {
    let classes = ExpressionClasses::new_shared();

    let mut a = MachineState::new(classes.clone());
    run(&mut a, &[Item::push_tag(1)]);
    let mut b = MachineState::new(classes);
    run(&mut b, &[Item::push_tag(2)]);

    a.merge(&b, false);
    assert_eq!(a.stack_facts(), 1);
    let union = a.relative_stack_element(0);
    let tags = a.tags_in_expression(union);
    assert_eq!(
        tags.into_iter().collect::<Vec<_>>(),
        vec![U256::from(1u64), U256::from(2u64)]
    );

    // Repeated merges of the same label sets reuse the memoized class.
    a.merge(&b, false);
    assert_eq!(a.relative_stack_element(0), union);

    // Tag unions are short-lived: the reconciliation pass drops them.
    a.clear_tag_unions();
    assert_eq!(a.stack_facts(), 0);
}

#[test]
fn merge_drops_mismatched_non_label_slots() {
    let classes = ExpressionClasses::new_shared();

    let mut a = MachineState::new(classes.clone());
    run(&mut a, &[Item::push(1)]);
    let mut b = MachineState::new(classes);
    run(&mut b, &[Item::push(2)]);

    a.merge(&b, false);
    assert_eq!(a.stack_facts(), 0);
    assert_eq!(a.stack_height(), 1);
}

#[test]
fn merge_combines_sequence_numbers_on_request() {
    let classes = ExpressionClasses::new_shared();

    let mut a = MachineState::new(classes.clone());
    let mut b = MachineState::new(classes);
    run(
        &mut b,
        &[Item::push(5), Item::push(0), Item::Op(Opcode::Sstore)],
    );
    assert!(b.sequence_number() > a.sequence_number());

    let mut merged_without = a.clone();
    merged_without.merge(&b, false);
    assert_eq!(merged_without.sequence_number(), a.sequence_number());

    a.merge(&b, true);
    assert_eq!(a.sequence_number(), b.sequence_number());
}

#[test]
fn constant_region_hash_folds_to_literal_digest() {
    let classes = ExpressionClasses::new_shared();
    let mut state = MachineState::new(classes.clone());

    // MSTORE 0x11 at 0 and 0x22 at 32, then KECCAK256(0, 64).
    run(
        &mut state,
        &[
            Item::push(0x11),
            Item::push(0),
            Item::Op(Opcode::Mstore),
            Item::push(0x22),
            Item::push(32),
            Item::Op(Opcode::Mstore),
            Item::push(64),
            Item::push(0),
            Item::Op(Opcode::Keccak256),
        ],
    );
    let hash = state.relative_stack_element(0);

    let mut data = [0u8; 64];
    U256::from(0x11u64).to_big_endian(&mut data[..32]);
    U256::from(0x22u64).to_big_endian(&mut data[32..]);
    let expected = U256::from_big_endian(Keccak256::digest(data).as_slice());
    assert_eq!(classes.borrow().known_constant(hash), Some(expected));

    // Hashing the same region again returns the identical class.
    run(
        &mut state,
        &[
            Item::Op(Opcode::Pop),
            Item::push(64),
            Item::push(0),
            Item::Op(Opcode::Keccak256),
        ],
    );
    assert_eq!(state.relative_stack_element(0), hash);
}

#[test]
fn truncated_constant_region_hash_uses_partial_word() {
    let classes = ExpressionClasses::new_shared();
    let mut state = MachineState::new(classes.clone());

    // A 5-byte region covers one word, truncated after 5 bytes.
    run(
        &mut state,
        &[
            Item::push(0xdeadbeef),
            Item::push(0),
            Item::Op(Opcode::Mstore),
            Item::push(5),
            Item::push(0),
            Item::Op(Opcode::Keccak256),
        ],
    );
    let hash = state.relative_stack_element(0);

    let mut word = [0u8; 32];
    U256::from(0xdeadbeefu64).to_big_endian(&mut word);
    let expected = U256::from_big_endian(Keccak256::digest(&word[..5]).as_slice());
    assert_eq!(classes.borrow().known_constant(hash), Some(expected));
}

#[test]
fn hash_of_unknown_region_is_memoized_per_word_classes() {
    let classes = ExpressionClasses::new_shared();
    let mut state = MachineState::new(classes.clone());

    // Store an unknown value, then hash its word twice.
    run(
        &mut state,
        &[
            Item::Op(Opcode::Calldatasize),
            Item::push(0),
            Item::Op(Opcode::Mstore),
            Item::push(32),
            Item::push(0),
            Item::Op(Opcode::Keccak256),
        ],
    );
    let first = state.relative_stack_element(0);
    assert_eq!(classes.borrow().known_constant(first), None);

    run(
        &mut state,
        &[
            Item::Op(Opcode::Pop),
            Item::push(32),
            Item::push(0),
            Item::Op(Opcode::Keccak256),
        ],
    );
    assert_eq!(state.relative_stack_element(0), first);
}

#[test]
fn memory_write_invalidates_cached_hashes() {
    let classes = ExpressionClasses::new_shared();
    let mut state = MachineState::new(classes);

    run(
        &mut state,
        &[
            Item::push(0x11),
            Item::push(0),
            Item::Op(Opcode::Mstore),
            Item::push(32),
            Item::push(0),
            Item::Op(Opcode::Keccak256),
        ],
    );
    let before = state.relative_stack_element(0);

    // Overwrite the hashed word, hash again: a different class results.
    run(
        &mut state,
        &[
            Item::Op(Opcode::Pop),
            Item::push(0x33),
            Item::push(0),
            Item::Op(Opcode::Mstore),
            Item::push(32),
            Item::push(0),
            Item::Op(Opcode::Keccak256),
        ],
    );
    let after = state.relative_stack_element(0);
    assert_ne!(before, after);
}

#[test]
fn equal_subexpressions_share_classes_across_states() {
    let classes = ExpressionClasses::new_shared();

    let mut a = MachineState::new(classes.clone());
    let mut b = MachineState::new(classes);

    // Both states compute CALLDATALOAD(4) + 1.
    let items = [
        Item::push(4),
        Item::Op(Opcode::Calldataload),
        Item::push(1),
        Item::Op(Opcode::Add),
    ];
    run(&mut a, &items);
    run(&mut b, &items);

    assert_eq!(a.relative_stack_element(0), b.relative_stack_element(0));
}
