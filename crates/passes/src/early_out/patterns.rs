//! Structural pattern matchers.
//!
//! Each matcher recognizes one family of computation shapes and, on
//! success, produces a [`Candidate`] naming the guard insertion point and
//! the seed values to compare against zero. Matchers fail closed: a
//! structural mismatch returns `None` with no side effects. A successful
//! match may reorder operations inside the block (moving sample channels
//! next to their producer, hoisting a lighting compare's dependencies);
//! those movements persist even if the candidate is later rejected as
//! unprofitable.

use std::collections::HashSet;

use smallvec::{smallvec, SmallVec};

use refract_ir::uses::UseIndex;
use refract_ir::{BinOp, BlockId, CmpPred, Function, Literal, OpId, OpKind, Operand, SampleKind, Type};

use super::{
    Candidate, DIRECT_OUTPUT_THRESHOLD, DOT_MAX_FOLD_THRESHOLD, DOT_MAX_RATIO_NEEDED,
    FOLD_THRESHOLD, FOLD_THRESHOLD_MULTI_CHANNEL, RATIO_NEEDED,
};
use crate::config::PatternMask;

/// Queue bound for the direct-output multiply expansion.
const MUL_CHAIN_LIMIT: usize = 8;
/// Depth bound for the direct-output cheap-channel check.
const OUTPUT_DEPTH_LIMIT: usize = 5;

/// Try every enabled family against `op_id` as root, in priority order.
/// The first structural match wins; there is no backtracking across
/// families for a given root operation.
pub(crate) fn match_candidate(
    func: &mut Function,
    uses: &UseIndex,
    block: BlockId,
    op_id: OpId,
    enabled: PatternMask,
    shader_length: usize,
) -> Option<Candidate> {
    let kind = func.op(op_id).kind.clone();
    match kind {
        OpKind::Sample { kind, .. } if enabled.contains(PatternMask::SAMPLE) => {
            let channels = match_sample_channels(func, uses, block, op_id, kind)?;
            let mut seeds: SmallVec<[OpId; 3]> = channels.clone();
            let mut root = move_to_def(func, block, op_id, &channels);
            fold_from_add(func, uses, block, &mut seeds, &mut root);
            Some(Candidate {
                root,
                seeds,
                fold_threshold: FOLD_THRESHOLD,
                fold_threshold_multi_channel: FOLD_THRESHOLD_MULTI_CHANNEL,
                ratio_needed: RATIO_NEEDED,
            })
        }

        OpKind::Max { .. } if enabled.contains(PatternMask::DOT_MAX) => {
            let dp = dot_product_source(func, uses, block, op_id)?;
            // A dot product folds to a single value, so the fold bar is
            // higher and the ratio bar lower for this family.
            Some(Candidate {
                root: op_id,
                seeds: smallvec![dp],
                fold_threshold: DOT_MAX_FOLD_THRESHOLD,
                fold_threshold_multi_channel: FOLD_THRESHOLD_MULTI_CHANNEL,
                ratio_needed: DOT_MAX_RATIO_NEEDED,
            })
        }

        OpKind::Saturate { .. } if enabled.contains(PatternMask::DOT_SATURATE) => {
            let dp = dot_product_source(func, uses, block, op_id)?;
            Some(Candidate {
                root: op_id,
                seeds: smallvec![dp],
                fold_threshold: FOLD_THRESHOLD,
                fold_threshold_multi_channel: FOLD_THRESHOLD_MULTI_CHANNEL,
                ratio_needed: RATIO_NEEDED,
            })
        }

        OpKind::Cmp { pred: CmpPred::FloatOgt, .. } if enabled.contains(PatternMask::NDOTL) => {
            match_ndotl(func, uses, block, op_id)?;
            // Pull the compare and its dependency chain as early as
            // possible so the guard skips the largest possible tail.
            hoist_dependencies(func, block, op_id);
            Some(Candidate {
                root: op_id,
                seeds: smallvec![op_id],
                fold_threshold: FOLD_THRESHOLD,
                fold_threshold_multi_channel: FOLD_THRESHOLD_MULTI_CHANNEL,
                ratio_needed: RATIO_NEEDED,
            })
        }

        OpKind::Output { .. } if enabled.contains(PatternMask::DIRECT_OUTPUT) => {
            let (channel, sample) = match_direct_output(func, uses, block, op_id, shader_length)?;
            let root = move_to_def(func, block, sample, &[channel]);
            // Any positive fold is worthwhile when everything but the
            // alpha channel is cheap.
            Some(Candidate {
                root,
                seeds: smallvec![channel],
                fold_threshold: DIRECT_OUTPUT_THRESHOLD,
                fold_threshold_multi_channel: DIRECT_OUTPUT_THRESHOLD,
                ratio_needed: DIRECT_OUTPUT_THRESHOLD,
            })
        }

        OpKind::Binary { op: BinOp::Mul, .. } if enabled.contains(PatternMask::MUL_MAX) => {
            let seed = match_mul_max(func, uses, block, op_id)?;
            Some(Candidate {
                root: op_id,
                seeds: smallvec![seed],
                fold_threshold: FOLD_THRESHOLD,
                fold_threshold_multi_channel: FOLD_THRESHOLD_MULTI_CHANNEL,
                ratio_needed: RATIO_NEEDED,
            })
        }

        OpKind::Select { .. } if enabled.contains(PatternMask::SELECT_CMP) => {
            let seed = match_select_compare(func, uses, block, op_id)?;
            // The closure is often just the select itself; any fold at all
            // justifies the guard if the ratio check holds.
            Some(Candidate {
                root: op_id,
                seeds: smallvec![seed],
                fold_threshold: 0,
                fold_threshold_multi_channel: 0,
                ratio_needed: RATIO_NEEDED,
            })
        }

        _ => None,
    }
}

// ---------------------------------------------------------------------
// Texture-sample-extract
// ---------------------------------------------------------------------

/// Every consumer of the sample must be a literal-lane extract in the same
/// block, optionally through a single-use bitcast. At most three channels;
/// the shadow-compare variant allows exactly one channel at lane 0.
fn match_sample_channels(
    func: &Function,
    uses: &UseIndex,
    block: BlockId,
    sample: OpId,
    kind: SampleKind,
) -> Option<SmallVec<[OpId; 3]>> {
    if !uses.terminator_users(sample).is_empty() {
        return None;
    }
    let users = uses.users(sample);
    if users.is_empty() {
        return None;
    }

    let mut channels: SmallVec<[OpId; 3]> = SmallVec::new();
    for &user in users {
        let mut target = user;
        if matches!(func.op(user).kind, OpKind::Bitcast { .. }) && uses.has_single_use(user) {
            target = uses.users(user).first().copied()?;
        }
        match &func.op(target).kind {
            OpKind::Extract { lane: Operand::Literal(Literal::I32(_)), .. }
                if uses.def_block(target) == Some(block) =>
            {
                channels.push(target);
            }
            _ => return None,
        }
    }

    if kind == SampleKind::SampleLc && (channels.len() != 1 || extract_lane(func, channels[0]) != Some(0))
    {
        return None;
    }
    if channels.len() > 3 {
        return None;
    }
    Some(channels)
}

fn extract_lane(func: &Function, id: OpId) -> Option<i32> {
    match func.op(id).kind {
        OpKind::Extract { lane: Operand::Literal(Literal::I32(lane)), .. } => Some(lane),
        _ => None,
    }
}

/// Move `users` (and any interposed bitcasts) directly after `def` so the
/// guard can be inserted right behind the whole group. Returns the last
/// moved operation, the new guard insertion point.
fn move_to_def(func: &mut Function, block: BlockId, def: OpId, users: &[OpId]) -> OpId {
    let mut insert_after = def;
    for &user in users {
        let interposed = match &func.op(user).kind {
            OpKind::Extract { vector, .. } => vector.as_value().filter(|&v| v != def),
            _ => None,
        };
        if let Some(bitcast) = interposed {
            func.move_op_after(block, bitcast, insert_after);
            insert_after = bitcast;
        }
    }
    for &user in users {
        func.move_op_after(block, user, insert_after);
        insert_after = user;
    }
    insert_after
}

/// Single-channel refinement: when the one extracted channel only feeds an
/// add tree whose every leaf is a lane-0 sample extract, fold from the add
/// result instead of the raw channel.
fn fold_from_add(
    func: &Function,
    uses: &UseIndex,
    block: BlockId,
    seeds: &mut SmallVec<[OpId; 3]>,
    root: &mut OpId,
) {
    if seeds.len() != 1 {
        return;
    }
    let channel = seeds[0];
    if !uses.has_single_use(channel) {
        return;
    }
    let Some(&user) = uses.users(channel).first() else { return };
    if !matches!(func.op(user).kind, OpKind::Binary { op: BinOp::Add, .. }) {
        return;
    }
    if uses.def_block(user) != Some(block) {
        return;
    }
    if track_add_sources(func, user) {
        seeds[0] = user;
        *root = user;
    }
}

/// Every leaf of the add tree must be a lane-0 extract of a sample (plain
/// or shadow-compare variant).
fn track_add_sources(func: &Function, add: OpId) -> bool {
    let OpKind::Binary { op: BinOp::Add, lhs, rhs } = func.op(add).kind else {
        return false;
    };
    for operand in [lhs, rhs] {
        let Some(value) = operand.as_value() else { return false };
        match &func.op(value).kind {
            OpKind::Binary { op: BinOp::Add, .. } => {
                if !track_add_sources(func, value) {
                    return false;
                }
            }
            OpKind::Extract { vector, lane } => {
                if !matches!(lane, Operand::Literal(Literal::I32(0))) {
                    return false;
                }
                let sampled = vector.as_value().map(|v| &func.op(v).kind);
                if !matches!(
                    sampled,
                    Some(OpKind::Sample { kind: SampleKind::Sample | SampleKind::SampleLc, .. })
                ) {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

// ---------------------------------------------------------------------
// Dot products
// ---------------------------------------------------------------------

fn is_float_mul(func: &Function, operand: &Operand) -> bool {
    operand.as_value().is_some_and(|v| {
        matches!(func.op(v).kind, OpKind::Binary { op: BinOp::Mul, .. })
            && func.op(v).ty == Some(Type::F32)
    })
}

fn is_mul_pair_add(func: &Function, operand: &Operand) -> bool {
    operand.as_value().is_some_and(|v| match &func.op(v).kind {
        OpKind::Binary { op: BinOp::Add, lhs, rhs } => {
            is_float_mul(func, lhs) && is_float_mul(func, rhs)
        }
        _ => false,
    })
}

/// Matches the decomposed 3-term dot product in either associativity:
/// `add(mul, add(mul, mul))` or `add(add(mul, mul), mul)`.
fn dot_product_match(func: &Function, id: OpId) -> bool {
    match &func.op(id).kind {
        OpKind::Binary { op: BinOp::Add, lhs, rhs } => {
            (is_float_mul(func, lhs) && is_mul_pair_add(func, rhs))
                || (is_mul_pair_add(func, lhs) && is_float_mul(func, rhs))
        }
        _ => false,
    }
}

/// The reduction's source operand must be a same-block dot product; it
/// becomes the seed.
fn dot_product_source(
    func: &Function,
    uses: &UseIndex,
    block: BlockId,
    root: OpId,
) -> Option<OpId> {
    let source = match &func.op(root).kind {
        OpKind::Max { lhs, .. } => lhs.as_value()?,
        OpKind::Saturate { value } => value.as_value()?,
        _ => return None,
    };
    (uses.def_block(source) == Some(block) && dot_product_match(func, source)).then_some(source)
}

// ---------------------------------------------------------------------
// N-dot-L lighting
// ---------------------------------------------------------------------

/// The lighting shape: `dot(N, L)` compared greater-than-zero, the compare
/// sign-extended into a mask that is ANDed into exactly three channels,
/// each bitcast back to float and multiplied down to a max-with-zero.
fn match_ndotl(func: &Function, uses: &UseIndex, _block: BlockId, cmp: OpId) -> Option<()> {
    let OpKind::Cmp { pred: CmpPred::FloatOgt, lhs, rhs } = func.op(cmp).kind else {
        return None;
    };
    if !rhs.is_zero_literal() || !uses.has_single_use(cmp) {
        return None;
    }
    let source = lhs.as_value()?;
    if !dot_product_match(func, source) {
        return None;
    }

    let sext = uses.users(cmp).first().copied()?;
    if !matches!(func.op(sext).kind, OpKind::SignExtend { .. }) || uses.use_count(sext) != 3 {
        return None;
    }

    for &and_op in uses.users(sext) {
        if !matches!(func.op(and_op).kind, OpKind::Binary { op: BinOp::And, .. })
            || !uses.has_single_use(and_op)
        {
            return None;
        }
        let bitcast = uses.users(and_op).first().copied()?;
        if !matches!(func.op(bitcast).kind, OpKind::Bitcast { .. })
            || !uses.has_single_use(bitcast)
        {
            return None;
        }

        // Follow the single-use multiply chain until a max-with-zero.
        let mut current = uses.users(bitcast).first().copied();
        while let Some(op) = current {
            if !uses.has_single_use(op) {
                break;
            }
            match &func.op(op).kind {
                OpKind::Max { rhs, .. } => {
                    if rhs.is_zero_literal() {
                        break;
                    }
                    return None;
                }
                OpKind::Binary { op: BinOp::Mul, .. } => {
                    current = uses.users(op).first().copied();
                }
                _ => return None,
            }
        }
    }

    Some(())
}

/// Schedule `root`'s whole dependency chain as early in the block as is
/// legal, operands before users. Values from other blocks, phis, and
/// side-effecting operations stay put.
fn hoist_dependencies(func: &mut Function, block: BlockId, root: OpId) {
    let mut scheduled: HashSet<OpId> = HashSet::new();
    let mut insert_pos: Option<OpId> = func.block(block).body.first().copied();
    schedule_up(func, block, Operand::Value(root), &mut insert_pos, &mut scheduled);
}

fn schedule_up(
    func: &mut Function,
    block: BlockId,
    operand: Operand,
    insert_pos: &mut Option<OpId>,
    scheduled: &mut HashSet<OpId>,
) -> bool {
    let Some(id) = operand.as_value() else { return false };
    if func.position(block, id).is_none() {
        return false;
    }
    if matches!(func.op(id).kind, OpKind::Phi { .. }) || func.op(id).kind.has_side_effect() {
        return false;
    }
    if scheduled.contains(&id) {
        // Already placed; later siblings must land after it.
        if let Some(pos) = *insert_pos {
            if !precedes(func, block, id, pos) {
                *insert_pos = Some(id);
            }
        }
        return false;
    }

    let mut changed = false;
    for dep in func.op(id).kind.operands() {
        changed |= schedule_up(func, block, dep, insert_pos, scheduled);
    }
    scheduled.insert(id);

    if let Some(pos) = *insert_pos {
        if precedes(func, block, id, pos) {
            return changed;
        }
        if id != pos {
            func.move_op_after(block, id, pos);
        }
    } else {
        func.move_op_to_front(block, id);
    }
    *insert_pos = Some(id);
    true
}

fn precedes(func: &Function, block: BlockId, a: OpId, b: OpId) -> bool {
    let pa = func.position(block, a).expect("op listed in block");
    let pb = func.position(block, b).expect("op listed in block");
    pa < pb
}

// ---------------------------------------------------------------------
// Direct output
// ---------------------------------------------------------------------

/// Find the pixel-shader case where most of the computation feeds the
/// alpha channel through a short multiply chain rooted at a texture
/// sample, while the color channels are cheap. Returns the seed extract
/// and its sample.
fn match_direct_output(
    func: &Function,
    uses: &UseIndex,
    block: BlockId,
    output: OpId,
    shader_length: usize,
) -> Option<(OpId, OpId)> {
    let OpKind::Output { args } = func.op(output).kind else { return None };

    // Only handle blocks with a single output write.
    let output_count = func
        .block(block)
        .body
        .iter()
        .filter(|&&id| matches!(func.op(id).kind, OpKind::Output { .. }))
        .count();
    if output_count != 1 {
        return None;
    }

    args[3].as_value()?;

    // Breadth-first expansion of the alpha operand through multiplies,
    // looking for an extract of a sample whose coordinates are all
    // constants or shader inputs.
    let mut queue: Vec<Operand> = vec![args[3]];
    let mut found: Option<(OpId, OpId)> = None;
    let mut index = 0;
    while index < queue.len() && index < MUL_CHAIN_LIMIT {
        if let Some(value) = queue[index].as_value() {
            match &func.op(value).kind {
                OpKind::Extract { vector, .. } => {
                    if let Some(sample) = vector.as_value() {
                        if let OpKind::Sample { coords, .. } = &func.op(sample).kind {
                            for coord in coords {
                                let from_input = coord.as_value().is_some_and(|c| {
                                    matches!(func.op(c).kind, OpKind::Input { .. })
                                });
                                if !matches!(coord, Operand::Literal(_)) && !from_input {
                                    return None;
                                }
                            }
                            found = Some((value, sample));
                            break;
                        }
                    }
                }
                OpKind::Binary { op: BinOp::Mul, lhs, rhs } => {
                    queue.push(*lhs);
                    queue.push(*rhs);
                }
                _ => {}
            }
        }
        index += 1;
    }
    let (channel, sample) = found?;

    // The guard will be placed next to the sample, so both must be local.
    if uses.def_block(channel) != Some(block) || uses.def_block(sample) != Some(block) {
        return None;
    }

    // Color channels must be cheap and the shader long enough that a
    // guard is worth the control flow.
    for arg in &args[..3] {
        if short_path_depth(func, *arg, OUTPUT_DEPTH_LIMIT) >= OUTPUT_DEPTH_LIMIT {
            return None;
        }
    }
    if shader_length <= OUTPUT_DEPTH_LIMIT * 10 {
        return None;
    }

    Some((channel, sample))
}

/// Dependency depth of `operand`, capped at `limit`.
fn short_path_depth(func: &Function, operand: Operand, limit: usize) -> usize {
    if limit == 0 {
        return 0;
    }
    match operand.as_value() {
        Some(value) => {
            let mut deepest = 0;
            for dep in func.op(value).kind.operands() {
                deepest = deepest.max(short_path_depth(func, dep, limit - 1));
            }
            1 + deepest
        }
        None => 0,
    }
}

// ---------------------------------------------------------------------
// Multiply-max
// ---------------------------------------------------------------------

/// `a = x * x` where every consumer is a single-use multiply reduced with
/// max-to-zero. The squared value `x` is the seed: when it is zero the
/// square, every product, and every reduction collapse with it.
fn match_mul_max(func: &Function, uses: &UseIndex, block: BlockId, mul: OpId) -> Option<OpId> {
    let OpKind::Binary { op: BinOp::Mul, lhs, rhs } = func.op(mul).kind else {
        return None;
    };
    if lhs != rhs || func.op(mul).ty != Some(Type::F32) {
        return None;
    }
    if !uses.terminator_users(mul).is_empty() {
        return None;
    }
    for &user in uses.users(mul) {
        if !matches!(func.op(user).kind, OpKind::Binary { op: BinOp::Mul, .. })
            || !uses.has_single_use(user)
        {
            return None;
        }
        let Some(&reduction) = uses.users(user).first() else { return None };
        let OpKind::Max { rhs, .. } = func.op(reduction).kind else { return None };
        if !rhs.is_zero_literal() {
            return None;
        }
    }
    let seed = lhs.as_value()?;
    (uses.def_block(seed) == Some(block)).then_some(seed)
}

// ---------------------------------------------------------------------
// Select-compare
// ---------------------------------------------------------------------

/// A select whose condition is a single-use compare of a same-block value
/// against zero. The compared value is the seed.
fn match_select_compare(
    func: &Function,
    uses: &UseIndex,
    block: BlockId,
    select: OpId,
) -> Option<OpId> {
    let OpKind::Select { cond, .. } = func.op(select).kind else { return None };
    let compare = cond.as_value()?;
    let OpKind::Cmp { pred, lhs, rhs } = func.op(compare).kind else { return None };
    if !matches!(pred, CmpPred::FloatOgt | CmpPred::FloatOeq) {
        return None;
    }
    if !uses.has_single_use(compare) || !rhs.is_zero_literal() {
        return None;
    }
    let seed = lhs.as_value()?;
    if uses.def_block(seed) != Some(block) {
        return None;
    }
    Some(seed)
}
