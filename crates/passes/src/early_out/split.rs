//! Block splitting for an accepted candidate.
//!
//! Builds the seed-is-zero guard and carves the candidate's block into the
//! four-block split shape:
//!
//! ```text
//! prefix:  ... root, guard cmps      Branch(guard, if, else)
//! if:      clone with folded = 0     Jump(endif)
//! else:    original tail             Jump(endif)
//! endif:   merge nodes, remainder    original terminator
//! ```
//!
//! The else block ends at the last folded operation; everything after it
//! is shared and lives in the endif block. This step assumes the
//! profitability estimator already validated the candidate and performs no
//! further validation.

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;

use refract_ir::uses::UseIndex;
use refract_ir::{
    BinOp, BlockId, CmpPred, Function, Literal, OpId, OpKind, Operand, Operation, Terminator, Type,
};

use super::Candidate;

/// Split the candidate's block. Returns the else block, where scanning
/// resumes.
pub(crate) fn split_at_candidate(
    func: &mut Function,
    uses: &UseIndex,
    candidate: &Candidate,
    folded: &IndexSet<OpId>,
) -> BlockId {
    debug_assert!(!folded.is_empty(), "split requires a non-empty folded set");

    let block = uses.def_block(candidate.root).expect("candidate root is block-local");
    let guard = build_guard(func, block, candidate);
    let guard_pos = func.position(block, guard).expect("guard was just inserted");

    // The else block ends at the last folded operation; if every folded
    // operation precedes the guard the whole tail is duplicated.
    let last_folded_pos = func
        .block(block)
        .body
        .iter()
        .rposition(|id| folded.contains(id))
        .filter(|&pos| pos > guard_pos)
        .unwrap_or(func.block(block).body.len() - 1);

    let else_block = func.alloc_block();
    let if_block = func.alloc_block();
    let endif_block = func.alloc_block();

    // Carve the body. Ownership of the tail operations moves to the new
    // blocks; the arena indices stay stable.
    let tail: Vec<OpId> = func.block_mut(block).body.split_off(guard_pos + 1);
    let (else_ops, endif_ops) = tail.split_at(last_folded_pos - guard_pos);
    let else_ops: Vec<OpId> = else_ops.to_vec();
    func.block_mut(else_block).body = else_ops.clone();
    func.block_mut(endif_block).body = endif_ops.to_vec();

    let original_term =
        func.block_mut(block).terminator.take().expect("split block is terminated");
    let successors = original_term.successors();
    func.block_mut(endif_block).terminate(original_term);
    func.block_mut(else_block).terminate(Terminator::Jump(endif_block));
    func.block_mut(block).terminate(Terminator::Branch {
        cond: Operand::Value(guard),
        then_block: if_block,
        else_block,
    });

    // Phi arms in former successors now arrive from the endif block.
    for succ in successors {
        retarget_phi_arms(func, succ, block, endif_block);
    }

    // Clone the else body into the if block with a deep value remap.
    let mut vmap: HashMap<OpId, OpId> = HashMap::new();
    for &id in &else_ops {
        let mut op = func.op(id).clone();
        for operand in op.kind.operands_mut() {
            if let Some(value) = operand.as_value() {
                if let Some(&mapped) = vmap.get(&value) {
                    *operand = Operand::Value(mapped);
                }
            }
        }
        let clone = func.push_op(if_block, op);
        vmap.insert(id, clone);
    }
    func.block_mut(if_block).terminate(Terminator::Jump(endif_block));

    // Merge nodes: every else-defined value consumed outside the else
    // block gets a two-arm phi at the head of the endif block.
    let else_set: HashSet<OpId> = else_ops.iter().copied().collect();
    let mut merge_nodes: Vec<OpId> = Vec::new();
    let mut insert_at = 0usize;
    for &id in &else_ops {
        let Some(ty) = func.op(id).ty else { continue };
        let escapes = !uses.terminator_users(id).is_empty()
            || uses.users(id).iter().any(|user| !else_set.contains(user));
        if !escapes {
            continue;
        }

        let clone = vmap[&id];
        let phi = Operation::phi(
            vec![(else_block, Operand::Value(id)), (if_block, Operand::Value(clone))],
            ty,
        );
        let phi_id = func.insert_op(endif_block, insert_at, phi);
        insert_at += 1;
        merge_nodes.push(phi_id);

        // Reroute every use outside the else block through the merge node.
        let outside_users: Vec<OpId> =
            uses.users(id).iter().copied().filter(|user| !else_set.contains(user)).collect();
        for user in outside_users {
            replace_value(func.op_mut(user).kind.operands_mut(), id, Operand::Value(phi_id));
        }
        for b in 0..func.blocks.len() {
            if BlockId(b as u32) == else_block {
                continue;
            }
            if let Some(term) = &mut func.blocks[b].terminator {
                replace_value(term.operands_mut(), id, Operand::Value(phi_id));
            }
        }
    }

    // Fast path: substitute the type-correct zero literal for every folded
    // value's clone. Folded values ahead of the guard have no clone; they
    // are computed in the prefix and equal zero whenever the guard passes.
    let mut zero_for_clone: HashMap<OpId, Literal> = HashMap::new();
    for &fv in folded {
        if let Some(&clone) = vmap.get(&fv) {
            let ty = func.op(fv).ty.expect("folded operations produce values");
            zero_for_clone.insert(clone, ty.zero());
        }
    }
    let if_body: Vec<OpId> = func.block(if_block).body.clone();
    for id in if_body {
        substitute_zeros(func.op_mut(id).kind.operands_mut(), &zero_for_clone);
    }
    for phi_id in merge_nodes {
        substitute_zeros(func.op_mut(phi_id).kind.operands_mut(), &zero_for_clone);
    }

    else_block
}

/// Build the `seed == 0` comparison chain immediately after the root and
/// return the operation producing the combined condition.
fn build_guard(func: &mut Function, block: BlockId, candidate: &Candidate) -> OpId {
    let root_pos = func.position(block, candidate.root).expect("root listed in its block");
    let mut insert = root_pos + 1;
    let mut combined: Option<OpId> = None;

    for &seed in &candidate.seeds {
        let ty = func.op(seed).ty.expect("seed values are non-void");
        let pred = if ty.is_int() { CmpPred::IntEq } else { CmpPred::FloatOeq };
        let cmp = func.insert_op(block, insert, Operation::cmp(pred, seed, ty.zero()));
        insert += 1;
        combined = Some(match combined {
            None => cmp,
            Some(previous) => {
                let and = func.insert_op(
                    block,
                    insert,
                    Operation::binary(BinOp::And, previous, cmp, Type::Bool),
                );
                insert += 1;
                and
            }
        });
    }

    combined.expect("candidate has at least one seed")
}

/// Rewrite phi arms in `block` that name `from` as predecessor to name
/// `to` instead.
fn retarget_phi_arms(func: &mut Function, block: BlockId, from: BlockId, to: BlockId) {
    let body: Vec<OpId> = func.block(block).body.clone();
    for id in body {
        if let OpKind::Phi { arms } = &mut func.op_mut(id).kind {
            for (pred, _) in arms.iter_mut() {
                if *pred == from {
                    *pred = to;
                }
            }
        }
    }
}

fn replace_value(operands: Vec<&mut Operand>, from: OpId, to: Operand) {
    for operand in operands {
        if operand.refers_to(from) {
            *operand = to;
        }
    }
}

fn substitute_zeros(operands: Vec<&mut Operand>, zero_for_clone: &HashMap<OpId, Literal>) {
    for operand in operands {
        if let Some(value) = operand.as_value() {
            if let Some(&zero) = zero_for_clone.get(&value) {
                *operand = Operand::Literal(zero);
            }
        }
    }
}
