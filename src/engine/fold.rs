//! Constant evaluation of pure opcodes over 256-bit machine words.
//!
//! The expression class registry folds any pure operation whose operands are all
//! known constants into the literal result, so that e.g. `ADD(2, 3)` and the
//! literal `5` share one equivalence class. This module implements the EVM
//! semantics of those operations: wrapping arithmetic modulo 2^256, zero results
//! for division/modulo by zero, and two's-complement signed variants.

use primitive_types::{U256, U512};

use crate::isa::Opcode;

/// Sign bit of a 256-bit machine word.
fn is_negative(value: U256) -> bool {
    value.bit(255)
}

/// Two's-complement negation modulo 2^256.
fn twos_neg(value: U256) -> U256 {
    U256::zero().overflowing_sub(value).0
}

/// Absolute value under two's-complement interpretation.
///
/// The most negative value (-2^255) has no positive counterpart and maps to
/// itself, which matches the EVM's SDIV/SMOD edge cases.
fn twos_abs(value: U256) -> U256 {
    if is_negative(value) {
        twos_neg(value)
    } else {
        value
    }
}

/// Signed comparison via sign-bit flip.
fn signed_lt(a: U256, b: U256) -> bool {
    let flip = U256::one() << 255;
    (a ^ flip) < (b ^ flip)
}

fn bool_word(b: bool) -> U256 {
    if b {
        U256::one()
    } else {
        U256::zero()
    }
}

/// Narrows a 512-bit intermediate that is known to fit into 256 bits.
fn narrow(value: U512) -> U256 {
    U256::try_from(value).unwrap_or_default()
}

/// Evaluates a pure opcode over constant operands.
///
/// Returns `None` for opcodes that are not pure compile-time functions of their
/// operands (loads, environment queries, side-effecting instructions) or when
/// the operand count does not match the opcode's declared arity. The registry
/// treats a `None` as "do not fold" and falls back to structural value
/// numbering.
pub(crate) fn fold(op: Opcode, args: &[U256]) -> Option<U256> {
    if args.len() != op.info().args {
        return None;
    }

    let value = match op {
        Opcode::Add => args[0].overflowing_add(args[1]).0,
        Opcode::Sub => args[0].overflowing_sub(args[1]).0,
        Opcode::Mul => args[0].overflowing_mul(args[1]).0,

        Opcode::Div => {
            if args[1].is_zero() {
                U256::zero()
            } else {
                args[0] / args[1]
            }
        }
        Opcode::Sdiv => {
            if args[1].is_zero() {
                U256::zero()
            } else {
                let quotient = twos_abs(args[0]) / twos_abs(args[1]);
                if is_negative(args[0]) != is_negative(args[1]) {
                    twos_neg(quotient)
                } else {
                    quotient
                }
            }
        }
        Opcode::Mod => {
            if args[1].is_zero() {
                U256::zero()
            } else {
                args[0] % args[1]
            }
        }
        Opcode::Smod => {
            if args[1].is_zero() {
                U256::zero()
            } else {
                // Sign follows the dividend.
                let remainder = twos_abs(args[0]) % twos_abs(args[1]);
                if is_negative(args[0]) {
                    twos_neg(remainder)
                } else {
                    remainder
                }
            }
        }

        Opcode::Addmod => {
            if args[2].is_zero() {
                U256::zero()
            } else {
                narrow((U512::from(args[0]) + U512::from(args[1])) % U512::from(args[2]))
            }
        }
        Opcode::Mulmod => {
            if args[2].is_zero() {
                U256::zero()
            } else {
                narrow(args[0].full_mul(args[1]) % U512::from(args[2]))
            }
        }

        Opcode::Exp => args[0].overflowing_pow(args[1]).0,

        Opcode::Signextend => {
            // Byte index 31 or above leaves the word unchanged.
            if args[0] >= U256::from(31u64) {
                args[1]
            } else {
                let bit = args[0].low_u64() as usize * 8 + 7;
                let mask = (U256::one() << (bit + 1)) - U256::one();
                if args[1].bit(bit) {
                    args[1] | !mask
                } else {
                    args[1] & mask
                }
            }
        }

        Opcode::Lt => bool_word(args[0] < args[1]),
        Opcode::Gt => bool_word(args[0] > args[1]),
        Opcode::Slt => bool_word(signed_lt(args[0], args[1])),
        Opcode::Sgt => bool_word(signed_lt(args[1], args[0])),
        Opcode::Eq => bool_word(args[0] == args[1]),
        Opcode::Iszero => bool_word(args[0].is_zero()),

        Opcode::And => args[0] & args[1],
        Opcode::Or => args[0] | args[1],
        Opcode::Xor => args[0] ^ args[1],
        Opcode::Not => !args[0],

        Opcode::Byte => {
            if args[0] >= U256::from(32u64) {
                U256::zero()
            } else {
                // byte() indexes from the least significant end.
                U256::from(args[1].byte(31 - args[0].low_u64() as usize))
            }
        }

        Opcode::Shl => {
            if args[0] >= U256::from(256u64) {
                U256::zero()
            } else {
                args[1] << args[0].low_u64() as usize
            }
        }
        Opcode::Shr => {
            if args[0] >= U256::from(256u64) {
                U256::zero()
            } else {
                args[1] >> args[0].low_u64() as usize
            }
        }
        Opcode::Sar => {
            if args[0] >= U256::from(256u64) {
                if is_negative(args[1]) {
                    U256::MAX
                } else {
                    U256::zero()
                }
            } else {
                let shift = args[0].low_u64() as usize;
                let shifted = args[1] >> shift;
                if is_negative(args[1]) && shift > 0 {
                    shifted | !(U256::MAX >> shift)
                } else {
                    shifted
                }
            }
        }

        _ => return None,
    };

    Some(value)
}
