//! Reverse-use index.
//!
//! The operation graph stores def-to-operand edges only; passes that need
//! user edges build a [`UseIndex`] once per scan and rebuild it explicitly
//! after any structural edit (block split, clone). The index is never
//! patched incrementally.

use crate::graph::{BlockId, Function, OpId};

/// Users and defining blocks for every operation in a function, captured at
/// build time.
///
/// User lists follow block order then body order, so iteration over users
/// is deterministic. Terminator uses are tracked separately because a
/// terminator is not an operation and has no id.
#[derive(Debug)]
pub struct UseIndex {
    /// Operations consuming each operation's value, indexed by `OpId`.
    users: Vec<Vec<OpId>>,
    /// Blocks whose terminator consumes each operation's value.
    terminator_users: Vec<Vec<BlockId>>,
    /// The block each operation's body listed it in, indexed by `OpId`.
    def_block: Vec<Option<BlockId>>,
}

impl UseIndex {
    /// Build the index from the current state of `func`.
    pub fn build(func: &Function) -> Self {
        let n = func.ops.len();
        let mut users = vec![Vec::new(); n];
        let mut terminator_users = vec![Vec::new(); n];
        let mut def_block = vec![None; n];

        for block in &func.blocks {
            for &id in &block.body {
                def_block[id.0 as usize] = Some(block.id);
            }
        }
        for block in &func.blocks {
            for &id in &block.body {
                for operand in func.op(id).kind.operands() {
                    if let Some(value) = operand.as_value() {
                        users[value.0 as usize].push(id);
                    }
                }
            }
            if let Some(term) = &block.terminator {
                for operand in term.operands() {
                    if let Some(value) = operand.as_value() {
                        terminator_users[value.0 as usize].push(block.id);
                    }
                }
            }
        }

        UseIndex { users, terminator_users, def_block }
    }

    /// Operations that consume the value of `op`.
    pub fn users(&self, op: OpId) -> &[OpId] {
        &self.users[op.0 as usize]
    }

    /// Blocks whose terminator consumes the value of `op`.
    pub fn terminator_users(&self, op: OpId) -> &[BlockId] {
        &self.terminator_users[op.0 as usize]
    }

    /// True if `op` has exactly one consumer, counting terminator uses.
    pub fn has_single_use(&self, op: OpId) -> bool {
        self.users(op).len() + self.terminator_users(op).len() == 1
    }

    /// Total number of consumers of `op`, counting terminator uses.
    pub fn use_count(&self, op: OpId) -> usize {
        self.users(op).len() + self.terminator_users(op).len()
    }

    /// The block that listed `op` in its body when the index was built.
    pub fn def_block(&self, op: OpId) -> Option<BlockId> {
        self.def_block[op.0 as usize]
    }
}
