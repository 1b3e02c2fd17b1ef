//! Zero-closure propagation.
//!
//! Given seed values assumed to be exactly zero, computes the transitive
//! set of same-block operations that are also provably zero. The rules are
//! conservative: an opcode not listed here stops propagation.

use std::collections::VecDeque;

use indexmap::IndexSet;

use refract_ir::uses::UseIndex;
use refract_ir::{BinOp, Function, OpId, OpKind, Operand};

/// Walk each seed's users and collect every operation that folds to zero
/// under the assumption that all seeds are zero.
///
/// Propagation never leaves the defining operation's block; a cross-block
/// escape is handled by the profitability and merge logic instead.
pub(crate) fn fold_closure(func: &Function, uses: &UseIndex, seeds: &[OpId]) -> IndexSet<OpId> {
    let mut folded = IndexSet::new();
    let mut queue: VecDeque<OpId> = seeds.iter().copied().collect();
    while let Some(def) = queue.pop_front() {
        for &user in uses.users(def) {
            if uses.def_block(user) != uses.def_block(def) {
                continue;
            }
            if folded.contains(&user) {
                continue;
            }
            if folds_to_zero(func, def, user, &folded) {
                folded.insert(user);
                queue.push_back(user);
            }
        }
    }
    folded
}

/// Does `user` evaluate to zero given that `zero` is known to be zero?
///
/// `folded` holds the operations already proven zero; the select rule
/// consults it so two reconverging zero chains combine. That makes the
/// rule sensitive to discovery order within one closure construction —
/// accepted imprecision, not a bug.
fn folds_to_zero(func: &Function, zero: OpId, user: OpId, folded: &IndexSet<OpId>) -> bool {
    match &func.op(user).kind {
        OpKind::Binary { op, lhs, rhs } => match op {
            BinOp::Mul | BinOp::And => true,
            // Watch out for the zero in the denominator.
            BinOp::Div => !rhs.refers_to(zero),
            BinOp::Sub => {
                if lhs.is_zero_literal() || rhs.is_zero_literal() {
                    return true;
                }
                let other = if lhs.refers_to(zero) { rhs } else { lhs };
                other.refers_to(zero) || is_folded(other, folded)
            }
            BinOp::Add => false,
        },

        // Zero is transparent across representation changes.
        OpKind::Bitcast { .. } | OpKind::SignExtend { .. } => true,

        // saturate(0) == 0.
        OpKind::Saturate { .. } => true,

        OpKind::Select { on_true, on_false, .. } => {
            // Assuming the used value is 0, the select is 0 when the other
            // arm is a zero literal, or when that arm already folded.
            if on_true.is_zero_literal() || on_false.is_zero_literal() {
                return true;
            }
            let other = if on_true.refers_to(zero) { on_false } else { on_true };
            is_folded(other, folded)
        }

        // max(0, x) or max(x, 0) == 0 when x == 0.
        OpKind::Max { lhs, rhs } => lhs.is_zero_literal() || rhs.is_zero_literal(),

        // min(0, c) == 0 needs c >= 0.
        OpKind::Min { lhs, rhs } => {
            lhs.is_non_negative_literal() || rhs.is_non_negative_literal()
        }

        _ => false,
    }
}

fn is_folded(operand: &Operand, folded: &IndexSet<OpId>) -> bool {
    operand.as_value().is_some_and(|v| folded.contains(&v))
}
