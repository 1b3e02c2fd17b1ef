//! Profitability estimation.
//!
//! A split duplicates the block tail into the fast path, so it is only
//! worthwhile when the folded operations outnumber the survivors by the
//! family's configured ratio.

use std::collections::HashSet;

use indexmap::IndexSet;

use refract_ir::uses::UseIndex;
use refract_ir::{BinOp, Function, OpId, OpKind, Operand};

use super::Candidate;

/// Combined threshold and ratio check for an already-folded candidate.
pub(crate) fn is_split_profitable(
    func: &Function,
    uses: &UseIndex,
    candidate: &Candidate,
    folded: &IndexSet<OpId>,
) -> bool {
    let folded_count = folded.len();
    folded_count > candidate.fold_threshold
        // Checking several channels costs extra compares, so the bar rises.
        && (candidate.seeds.len() == 1 || folded_count > candidate.fold_threshold_multi_channel)
        && early_out_benefit(func, uses, candidate.root, folded, candidate.ratio_needed)
}

/// Scan the block backward from its end down to (exclusive) `root`,
/// classifying each operation as needed on the duplicated path or not.
///
/// An operation is needed when it has a memory-writing side effect, when a
/// terminator consumes it, when a use escapes the block, or when another
/// needed operation consumes it. Needed operations count as duplicated
/// work, except a zero-identity add (`x + 0` with the zero operand folded)
/// which the fast path drops for free.
pub(crate) fn early_out_benefit(
    func: &Function,
    uses: &UseIndex,
    root: OpId,
    folded: &IndexSet<OpId>,
    ratio_needed: usize,
) -> bool {
    let block = uses.def_block(root).expect("candidate root is block-local");
    let body = &func.block(block).body;
    let root_pos = body.iter().position(|&o| o == root).expect("root listed in its block");
    let tail = &body[root_pos + 1..];

    let mut needed: HashSet<OpId> = HashSet::new();
    let mut duplicated = 0usize;

    for &id in tail.iter().rev() {
        if folded.contains(&id) {
            continue;
        }
        let op = func.op(id);
        let inst_needed = op.kind.has_side_effect()
            || !uses.terminator_users(id).is_empty()
            || uses
                .users(id)
                .iter()
                .any(|&user| uses.def_block(user) != Some(block) || needed.contains(&user));
        if inst_needed {
            if !is_zero_identity_add(&op.kind, folded) {
                duplicated += 1;
            }
            needed.insert(id);
        }
    }

    duplicated * ratio_needed <= tail.len()
}

fn is_zero_identity_add(kind: &OpKind, folded: &IndexSet<OpId>) -> bool {
    match kind {
        OpKind::Binary { op: BinOp::Add, lhs, rhs } => {
            operand_folded(lhs, folded) || operand_folded(rhs, folded)
        }
        _ => false,
    }
}

fn operand_folded(operand: &Operand, folded: &IndexSet<OpId>) -> bool {
    operand.as_value().is_some_and(|v| folded.contains(&v))
}
