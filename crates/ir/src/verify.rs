//! Operation graph validation.
//!
//! Validates that a function is well-formed SSA:
//! - every operand references a live, value-producing operation
//! - every use is dominated by its definition
//! - all blocks have terminators and are reachable
//! - phi nodes have arms for all predecessors
//!
//! Passes that restructure control flow run this after every transform in
//! tests; it is the "generic SSA verifier" downstream passes rely on.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::graph::{BlockId, Function, OpId, OpKind};

/// A single verification failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// An operand references an operation no block lists.
    #[error("{user} in {block} uses dead value {value}")]
    DeadValue { value: OpId, user: OpId, block: BlockId },

    /// An operand references a void operation.
    #[error("{user} uses void operation {value}")]
    VoidUse { value: OpId, user: OpId },

    /// A use is not dominated by its definition.
    #[error("use of {value} by {user} in {block} is not dominated by its definition")]
    UseNotDominated { value: OpId, user: OpId, block: BlockId },

    /// A terminator operand is not dominated by its definition.
    #[error("terminator of {block} uses {value} which does not dominate it")]
    TerminatorUseNotDominated { value: OpId, block: BlockId },

    /// A block has no terminator.
    #[error("{block} has no terminator")]
    MissingTerminator { block: BlockId },

    /// A terminator names a block that does not exist.
    #[error("{block} branches to unknown {target}")]
    UnknownSuccessor { block: BlockId, target: BlockId },

    /// An operation is listed in more than one block body position.
    #[error("{op} is listed more than once")]
    DuplicateListing { op: OpId },

    /// A phi node is missing an arm for a predecessor.
    #[error("phi in {block} is missing an arm for predecessor {missing_pred}")]
    IncompletePhi { block: BlockId, missing_pred: BlockId },

    /// A phi arm names a block that is not a predecessor.
    #[error("phi in {block} has an arm for non-predecessor {pred}")]
    StrayPhiArm { block: BlockId, pred: BlockId },

    /// A non-entry block has no predecessors.
    #[error("{block} is unreachable")]
    UnreachableBlock { block: BlockId },
}

/// Validate a function.
///
/// Returns `Ok(())` if the function is valid, or the list of violations.
pub fn verify(func: &Function) -> Result<(), Vec<VerifyError>> {
    let mut errors = Vec::new();

    let preds = func.predecessors();
    let doms = Dominators::compute(func, &preds);

    // Where (block, position) each live operation is listed.
    let mut def_site: HashMap<OpId, (BlockId, usize)> = HashMap::new();
    for block in &func.blocks {
        for (pos, &id) in block.body.iter().enumerate() {
            if def_site.insert(id, (block.id, pos)).is_some() {
                errors.push(VerifyError::DuplicateListing { op: id });
            }
        }
    }

    for (i, block) in func.blocks.iter().enumerate() {
        let block_id = BlockId(i as u32);
        if block_id != func.entry() && preds[i].is_empty() {
            errors.push(VerifyError::UnreachableBlock { block: block_id });
        }

        let Some(term) = &block.terminator else {
            errors.push(VerifyError::MissingTerminator { block: block_id });
            continue;
        };
        for succ in term.successors() {
            if succ.0 as usize >= func.blocks.len() {
                errors.push(VerifyError::UnknownSuccessor { block: block_id, target: succ });
            }
        }

        for (pos, &id) in block.body.iter().enumerate() {
            let op = func.op(id);
            if let OpKind::Phi { arms } = &op.kind {
                let pred_set: HashSet<BlockId> = preds[i].iter().copied().collect();
                for pred in &pred_set {
                    if !arms.iter().any(|(b, _)| b == pred) {
                        errors.push(VerifyError::IncompletePhi {
                            block: block_id,
                            missing_pred: *pred,
                        });
                    }
                }
                for (arm_block, value) in arms {
                    if !pred_set.contains(arm_block) {
                        errors.push(VerifyError::StrayPhiArm { block: block_id, pred: *arm_block });
                    }
                    // A phi use must be available at the end of the arm's
                    // predecessor, not at the phi itself.
                    if let Some(value) = value.as_value() {
                        check_available_at_block_end(
                            func, &def_site, &doms, value, id, *arm_block, &mut errors,
                        );
                    }
                }
                continue;
            }

            for operand in op.kind.operands() {
                let Some(value) = operand.as_value() else { continue };
                let Some(&(def_block, def_pos)) = def_site.get(&value) else {
                    errors.push(VerifyError::DeadValue { value, user: id, block: block_id });
                    continue;
                };
                if func.op(value).ty.is_none() {
                    errors.push(VerifyError::VoidUse { value, user: id });
                    continue;
                }
                let dominated = if def_block == block_id {
                    def_pos < pos
                } else {
                    doms.dominates(def_block, block_id)
                };
                if !dominated {
                    errors.push(VerifyError::UseNotDominated { value, user: id, block: block_id });
                }
            }
        }

        for operand in term.operands() {
            let Some(value) = operand.as_value() else { continue };
            match def_site.get(&value) {
                None => {
                    // Terminator uses of dead values surface as
                    // not-dominated; keep one error shape for both.
                    errors.push(VerifyError::TerminatorUseNotDominated { value, block: block_id });
                }
                Some(&(def_block, _)) => {
                    if def_block != block_id && !doms.dominates(def_block, block_id) {
                        errors.push(VerifyError::TerminatorUseNotDominated {
                            value,
                            block: block_id,
                        });
                    }
                }
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check_available_at_block_end(
    func: &Function,
    def_site: &HashMap<OpId, (BlockId, usize)>,
    doms: &Dominators,
    value: OpId,
    user: OpId,
    at_block: BlockId,
    errors: &mut Vec<VerifyError>,
) {
    match def_site.get(&value) {
        None => errors.push(VerifyError::DeadValue { value, user, block: at_block }),
        Some(&(def_block, _)) => {
            if def_block != at_block && !doms.dominates(def_block, at_block) {
                errors.push(VerifyError::UseNotDominated { value, user, block: at_block });
            }
        }
    }
}

/// Immediate-dominator tree, computed with the standard iterative
/// algorithm over a reverse postorder.
struct Dominators {
    /// Immediate dominator per block; `None` for the entry and for
    /// unreachable blocks.
    idom: Vec<Option<BlockId>>,
    /// Reverse-postorder number per block; unreachable blocks have none.
    rpo_number: Vec<Option<usize>>,
}

impl Dominators {
    fn compute(func: &Function, preds: &[Vec<BlockId>]) -> Self {
        let n = func.blocks.len();

        // Reverse postorder from the entry.
        let mut postorder = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        let mut stack = vec![(func.entry(), 0usize)];
        visited[func.entry().0 as usize] = true;
        while let Some(&(block, next)) = stack.last() {
            let succs = func
                .block(block)
                .terminator
                .as_ref()
                .map(|t| t.successors())
                .unwrap_or_default();
            if next < succs.len() {
                stack.last_mut().expect("non-empty stack").1 += 1;
                let succ = succs[next];
                if (succ.0 as usize) < n && !visited[succ.0 as usize] {
                    visited[succ.0 as usize] = true;
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
                stack.pop();
            }
        }
        let rpo: Vec<BlockId> = postorder.iter().rev().copied().collect();
        let mut rpo_number = vec![None; n];
        for (i, &b) in rpo.iter().enumerate() {
            rpo_number[b.0 as usize] = Some(i);
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in &preds[block.0 as usize] {
                    if rpo_number[pred.0 as usize].is_none() {
                        continue;
                    }
                    if pred != func.entry() && idom[pred.0 as usize].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => {
                            intersect(&idom, &rpo_number, pred, current, func.entry())
                        }
                    });
                }
                if new_idom.is_some() && idom[block.0 as usize] != new_idom {
                    idom[block.0 as usize] = new_idom;
                    changed = true;
                }
            }
        }

        Dominators { idom, rpo_number }
    }

    /// True if `a` dominates `b` (strictly or reflexively).
    fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if self.rpo_number[b.0 as usize].is_none() {
            // Unreachable uses are reported separately; do not cascade.
            return true;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom[current.0 as usize] {
                Some(next) => current = next,
                None => return false,
            }
        }
    }
}

fn intersect(
    idom: &[Option<BlockId>],
    rpo_number: &[Option<usize>],
    a: BlockId,
    b: BlockId,
    entry: BlockId,
) -> BlockId {
    // Standard two-finger walk: both inputs are already-processed blocks,
    // so their idom chains reach the entry.
    let number = |x: BlockId| rpo_number[x.0 as usize].expect("reachable block");
    let parent =
        |x: BlockId| if x == entry { entry } else { idom[x.0 as usize].expect("processed block") };
    let mut f1 = a;
    let mut f2 = b;
    while f1 != f2 {
        while number(f1) > number(f2) {
            f1 = parent(f1);
        }
        while number(f2) > number(f1) {
            f2 = parent(f2);
        }
    }
    f1
}
