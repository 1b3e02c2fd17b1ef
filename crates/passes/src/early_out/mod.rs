//! Speculative early-exit optimization ("early-out").
//!
//! Recognizes computation patterns whose result is provably zero whenever a
//! small seed set of values is zero, and — when the skipped work outweighs
//! the duplicated work — rewrites the block into a guarded branch:
//!
//! ```text
//! a = some value
//! if a == 0 { result = 0 } else { result = a * expensive_tail() }
//! ```
//!
//! The pass runs one function at a time, synchronously:
//!
//! 1. Pattern matchers ([`patterns`]) propose a candidate: a guard
//!    insertion point plus one to three seed values.
//! 2. The zero-closure propagator ([`fold`]) computes the set of
//!    block-local operations that become zero under the seed assumption.
//! 3. The profitability estimator ([`benefit`]) weighs skipped operations
//!    against the operations that must be duplicated on the fast path.
//! 4. The transformer ([`split`]) splits the block, clones the fast path
//!    with folded values replaced by literal zero, and reconciles live-out
//!    values with merge nodes.
//!
//! A successful split invalidates the in-flight block scan; the driver
//! treats it as a hard restart signal and resumes scanning on the freshly
//! created else block. Rejected candidates are never re-attempted within
//! the same invocation.

mod benefit;
mod fold;
mod patterns;
mod split;

#[cfg(test)]
mod tests;

use smallvec::SmallVec;
use tracing::{debug, trace};

use refract_ir::uses::UseIndex;
use refract_ir::{BlockId, Function, OpId};

use crate::config::{EarlyOutConfig, PatternMask};

/// Default fold-count threshold: a split must remove more than this many
/// operations from the fast path.
const FOLD_THRESHOLD: usize = 5;
/// Higher threshold applied when several seed channels must be checked.
const FOLD_THRESHOLD_MULTI_CHANNEL: usize = 10;
/// Default duplicated-to-skipped ratio bound.
const RATIO_NEEDED: usize = 10;

/// Dot-product-max family thresholds: a single-value closure is common,
/// so the fold bar is higher and the ratio bar lower.
const DOT_MAX_FOLD_THRESHOLD: usize = 9;
const DOT_MAX_RATIO_NEEDED: usize = 3;

/// Direct-output family thresholds: any positive fold is worthwhile.
const DIRECT_OUTPUT_THRESHOLD: usize = 1;

/// A proposed split: guard insertion point, seed values, and the
/// profitability thresholds of the matching pattern family.
///
/// Transient: created by a matcher, consumed immediately, never persisted.
#[derive(Debug)]
pub(crate) struct Candidate {
    /// The operation the guard comparison is inserted after.
    pub root: OpId,
    /// Values compared against zero at run time (1 to 3).
    pub seeds: SmallVec<[OpId; 3]>,
    /// Minimum folded-set size for the split to be worthwhile.
    pub fold_threshold: usize,
    /// Minimum folded-set size when more than one seed must be checked.
    pub fold_threshold_multi_channel: usize,
    /// Bound on duplicated work per skipped operation.
    pub ratio_needed: usize,
}

/// Advisory counters. Never consulted for correctness.
#[derive(Debug, Clone, Copy, Default)]
pub struct EarlyOutStats {
    /// Block scans started, counting restarts after splits.
    pub blocks_scanned: usize,
    /// Structural matches proposed by the matchers.
    pub candidates: usize,
    /// Candidates accepted and split.
    pub splits: usize,
    /// Total operations folded to zero across accepted candidates.
    pub ops_folded: usize,
}

/// The early-out pass.
pub struct EarlyOut {
    config: EarlyOutConfig,
    stats: EarlyOutStats,
}

impl EarlyOut {
    /// Create the pass with an explicit configuration.
    pub fn new(config: EarlyOutConfig) -> Self {
        EarlyOut { config, stats: EarlyOutStats::default() }
    }

    /// Counters accumulated across every [`run`](Self::run) so far.
    pub fn stats(&self) -> &EarlyOutStats {
        &self.stats
    }

    /// Run the pass on one function. Returns true if anything changed.
    pub fn run(&mut self, func: &mut Function) -> bool {
        let enabled = self.config.effective_patterns();
        if enabled.is_empty() {
            return false;
        }

        // Captured once: the direct-output gate compares against the
        // original function length, not the post-split length.
        let shader_length = func.op_count();

        let mut changed = false;
        let mut index = 0;
        while index < func.blocks.len() {
            let block = BlockId(index as u32);
            changed |= self.process_block(func, block, enabled, shader_length);
            index += 1;
        }

        debug!(
            stage = ?self.config.stage,
            blocks = func.blocks.len(),
            splits = self.stats.splits,
            folded = self.stats.ops_folded,
            "early-out pass finished"
        );
        changed
    }

    /// Scan one block to completion, restarting on the new else block
    /// whenever a split lands.
    fn process_block(
        &mut self,
        func: &mut Function,
        block: BlockId,
        enabled: PatternMask,
        shader_length: usize,
    ) -> bool {
        let mut changed = false;
        let mut current = block;
        loop {
            self.stats.blocks_scanned += 1;
            match self.scan_block(func, current, enabled, shader_length) {
                Some(resume) => {
                    // The block list changed under us; abandon the scan and
                    // re-enter on the surviving tail.
                    changed = true;
                    current = resume;
                }
                None => break,
            }
        }
        changed
    }

    /// One scan over a block. Returns the block to resume on if a split
    /// occurred, `None` when the scan ran to the end without splitting.
    fn scan_block(
        &mut self,
        func: &mut Function,
        block: BlockId,
        enabled: PatternMask,
        shader_length: usize,
    ) -> Option<BlockId> {
        let uses = UseIndex::build(func);
        let mut index = 0;
        while index < func.block(block).body.len() {
            let op_id = func.block(block).body[index];
            let next = func.block(block).body.get(index + 1).copied();

            if let Some(candidate) =
                patterns::match_candidate(func, &uses, block, op_id, enabled, shader_length)
            {
                self.stats.candidates += 1;
                trace!(root = %candidate.root, seeds = candidate.seeds.len(), "early-out candidate");
                if let Some(resume) = self.try_fold_and_split(func, &uses, &candidate) {
                    return Some(resume);
                }
            }

            // Matchers may have reordered the body; resume at whatever
            // position the remembered next operation now occupies.
            index = match next {
                Some(op) => func.position(block, op).unwrap_or(usize::MAX),
                None => break,
            };
        }
        None
    }

    /// Fold the candidate's seeds, check profitability, and split.
    fn try_fold_and_split(
        &mut self,
        func: &mut Function,
        uses: &UseIndex,
        candidate: &Candidate,
    ) -> Option<BlockId> {
        if candidate.seeds.is_empty() {
            return None;
        }
        let folded = fold::fold_closure(func, uses, &candidate.seeds);
        if !benefit::is_split_profitable(func, uses, candidate, &folded) {
            trace!(root = %candidate.root, folded = folded.len(), "candidate not profitable");
            return None;
        }

        self.stats.splits += 1;
        self.stats.ops_folded += folded.len();
        debug!(root = %candidate.root, folded = folded.len(), "splitting block for early out");
        Some(split::split_at_candidate(func, uses, candidate, &folded))
    }
}
