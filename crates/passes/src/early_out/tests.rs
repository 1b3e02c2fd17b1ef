//! Tests for the early-out pass: each pattern family end to end, the
//! threshold and ratio boundaries, and interpreter-backed equivalence
//! checks on every transformed function.

use indexmap::IndexSet;
use smallvec::smallvec;

use refract_ir::interpret::evaluate;
use refract_ir::uses::UseIndex;
use refract_ir::verify::verify;
use refract_ir::{
    BinOp, CmpPred, Function, Literal, OpId, OpKind, Operand, Operation, SampleKind, Terminator,
    Type,
};

use super::{benefit, fold, Candidate, EarlyOut};
use crate::config::{EarlyOutConfig, PatternMask, ShaderStage};

fn pixel_pass() -> EarlyOut {
    EarlyOut::new(EarlyOutConfig::new(ShaderStage::Pixel))
}

fn compute_pass() -> EarlyOut {
    EarlyOut::new(EarlyOutConfig::new(ShaderStage::Compute))
}

/// Gradient sampler: every lane is a multiple of the first coordinate, so
/// coordinate zero yields an all-zero texel.
fn grad_sampler(_: SampleKind, coords: &[Literal]) -> [f32; 4] {
    let c = match coords[0] {
        Literal::F32(v) => v,
        _ => panic!("non-float sample coordinate"),
    };
    [c, c * 2.0, c * 3.0, c * 4.0]
}

/// Assert the transformed function observably behaves like the original.
fn assert_equivalent(original: &Function, transformed: &Function, inputs: &[f32]) {
    let before = evaluate(original, inputs, grad_sampler);
    let after = evaluate(transformed, inputs, grad_sampler);
    assert_eq!(before, after, "behavior diverged for inputs {inputs:?}");
}

// ---------------------------------------------------------------------
// Multiply-max
// ---------------------------------------------------------------------

/// t = x*x shared by three channels, each multiplied and clamped with
/// max-to-zero.
fn mul_max_function() -> Function {
    let mut func = Function::new();
    let b0 = func.entry();
    let x = func.push_op(b0, Operation::input(0));
    let t = func.push_op(b0, Operation::binary(BinOp::Mul, x, x, Type::F32));
    let p: Vec<OpId> = (1..=3).map(|slot| func.push_op(b0, Operation::input(slot))).collect();
    let m: Vec<OpId> =
        p.iter().map(|&p| func.push_op(b0, Operation::binary(BinOp::Mul, p, t, Type::F32))).collect();
    let r: Vec<OpId> = m.iter().map(|&m| func.push_op(b0, Operation::max(m, Literal::F32(0.0)))).collect();
    func.push_op(
        b0,
        Operation::output([
            Operand::Value(r[0]),
            Operand::Value(r[1]),
            Operand::Value(r[2]),
            Operand::Literal(Literal::F32(0.0)),
        ]),
    );
    func.block_mut(b0).terminate(Terminator::Return(None));
    func
}

#[test]
fn shared_square_with_three_clamped_channels_splits() {
    let original = mul_max_function();
    let mut func = original.clone();
    let mut pass = pixel_pass();

    assert!(pass.run(&mut func));
    assert_eq!(func.blocks.len(), 4);
    assert_eq!(pass.stats().splits, 1);
    // {t, m0, m1, m2, r0, r1, r2}
    assert_eq!(pass.stats().ops_folded, 7);
    assert!(verify(&func).is_ok(), "{:?}", verify(&func));

    assert_equivalent(&original, &func, &[0.0, 2.0, 3.0, 4.0]);
    assert_equivalent(&original, &func, &[1.5, 2.0, 3.0, 4.0]);
    assert_equivalent(&original, &func, &[-0.5, -2.0, 0.0, 7.0]);
}

#[test]
fn rerunning_after_split_changes_nothing() {
    let mut func = mul_max_function();
    let mut pass = pixel_pass();
    assert!(pass.run(&mut func));
    let blocks_after_first = func.blocks.len();

    // The literal-zero substitution removed the structural pattern; the
    // seed's remaining consumers live in other blocks, so the closure is
    // empty and nothing fires again.
    let mut second = pixel_pass();
    assert!(!second.run(&mut func));
    assert_eq!(func.blocks.len(), blocks_after_first);
    assert_eq!(second.stats().splits, 0);
}

// ---------------------------------------------------------------------
// Dot-product reductions
// ---------------------------------------------------------------------

/// dp = x0*x1 + y0*y1 + z0*z1 reduced with max(dp, 0), optionally feeding
/// a chain of `tail` extra multiplies.
fn dot_max_function(tail: usize) -> Function {
    let mut func = Function::new();
    let b0 = func.entry();
    let ins: Vec<OpId> = (0..6).map(|slot| func.push_op(b0, Operation::input(slot))).collect();
    let cs: Vec<OpId> =
        (0..tail).map(|i| func.push_op(b0, Operation::input(6 + i as u32))).collect();
    let m1 = func.push_op(b0, Operation::binary(BinOp::Mul, ins[0], ins[1], Type::F32));
    let m2 = func.push_op(b0, Operation::binary(BinOp::Mul, ins[2], ins[3], Type::F32));
    let m3 = func.push_op(b0, Operation::binary(BinOp::Mul, ins[4], ins[5], Type::F32));
    let s = func.push_op(b0, Operation::binary(BinOp::Add, m1, m2, Type::F32));
    let dp = func.push_op(b0, Operation::binary(BinOp::Add, s, m3, Type::F32));
    let mx = func.push_op(b0, Operation::max(dp, Literal::F32(0.0)));
    let mut last = mx;
    for &c in &cs {
        last = func.push_op(b0, Operation::binary(BinOp::Mul, last, c, Type::F32));
    }
    func.block_mut(b0).terminate(Terminator::Return(Some(Operand::Value(last))));
    func
}

#[test]
fn bare_dot_product_reduction_is_below_threshold() {
    // A one-value closure does not clear the 9-fold bar even though the
    // pattern matches structurally.
    let mut func = dot_max_function(0);
    let mut pass = pixel_pass();

    assert!(!pass.run(&mut func));
    assert_eq!(func.blocks.len(), 1);
    assert_eq!(pass.stats().candidates, 1);
    assert_eq!(pass.stats().splits, 0);
}

#[test]
fn dot_product_with_expensive_tail_splits() {
    let original = dot_max_function(9);
    let mut func = original.clone();
    let mut pass = pixel_pass();

    assert!(pass.run(&mut func));
    assert_eq!(func.blocks.len(), 4);
    // {max, v1..v9}
    assert_eq!(pass.stats().ops_folded, 10);
    assert!(verify(&func).is_ok(), "{:?}", verify(&func));

    // All-zero left-hand vector: dp == 0 exactly.
    let zero_dp = [0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
    let live_dp = [1.0, 1.0, 1.0, 2.0, 1.0, 3.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
    assert_equivalent(&original, &func, &zero_dp);
    assert_equivalent(&original, &func, &live_dp);
}

#[test]
fn disabled_family_never_fires() {
    let mut func = dot_max_function(9);
    let mut pass = EarlyOut::new(EarlyOutConfig {
        stage: ShaderStage::Pixel,
        patterns: PatternMask::all().difference(PatternMask::DOT_MAX),
    });

    assert!(!pass.run(&mut func));
    assert_eq!(func.blocks.len(), 1);
    assert_eq!(pass.stats().candidates, 0);
}

// ---------------------------------------------------------------------
// Texture-sample-extract
// ---------------------------------------------------------------------

/// Sample with `channels` extracts, each feeding a four-op foldable chain.
fn sample_function(channels: i32) -> Function {
    let mut func = Function::new();
    let b0 = func.entry();
    let u = func.push_op(b0, Operation::input(0));
    let v = func.push_op(b0, Operation::input(1));
    let scale: Vec<OpId> =
        (0..channels).map(|i| func.push_op(b0, Operation::input(2 + i as u32))).collect();
    let bias: Vec<OpId> =
        (0..channels).map(|i| func.push_op(b0, Operation::input(8 + i as u32))).collect();
    let s = func.push_op(
        b0,
        Operation::sample(SampleKind::Sample, vec![Operand::Value(u), Operand::Value(v)]),
    );
    let mut results = Vec::new();
    for lane in 0..channels {
        let e = func.push_op(b0, Operation::extract(s, lane, Type::F32));
        let a = func.push_op(b0, Operation::binary(BinOp::Mul, e, scale[lane as usize], Type::F32));
        let b = func.push_op(b0, Operation::binary(BinOp::Mul, a, bias[lane as usize], Type::F32));
        let f = func.push_op(b0, Operation::max(b, Literal::F32(0.0)));
        let g = func.push_op(b0, Operation::binary(BinOp::Mul, f, scale[lane as usize], Type::F32));
        results.push(g);
    }
    let arg = |i: usize| {
        results.get(i).map(|&g| Operand::Value(g)).unwrap_or(Operand::Literal(Literal::F32(0.0)))
    };
    func.push_op(b0, Operation::output([arg(0), arg(1), arg(2), arg(3)]));
    func.block_mut(b0).terminate(Terminator::Return(None));
    func
}

#[test]
fn sample_three_channels_splits() {
    let original = sample_function(3);
    let mut func = original.clone();
    let mut pass = pixel_pass();

    assert!(pass.run(&mut func));
    assert_eq!(func.blocks.len(), 4);
    // Four folded operations per channel.
    assert_eq!(pass.stats().ops_folded, 12);
    assert!(verify(&func).is_ok(), "{:?}", verify(&func));

    let zero_texel = [0.0, 0.5, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 5.0, 6.0, 7.0];
    let live_texel = [0.5, 0.5, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 5.0, 6.0, 7.0];
    assert_equivalent(&original, &func, &zero_texel);
    assert_equivalent(&original, &func, &live_texel);
}

#[test]
fn sample_with_four_channels_never_matches() {
    let mut func = sample_function(4);
    let mut pass = EarlyOut::new(EarlyOutConfig {
        stage: ShaderStage::Pixel,
        patterns: PatternMask::SAMPLE,
    });

    assert!(!pass.run(&mut func));
    assert_eq!(func.blocks.len(), 1);
    assert_eq!(pass.stats().candidates, 0);
}

/// Shadow-compare sample with one extract at `lane` feeding a multiply
/// chain.
fn sample_lc_function(lane: i32) -> Function {
    let mut func = Function::new();
    let b0 = func.entry();
    let u = func.push_op(b0, Operation::input(0));
    let v = func.push_op(b0, Operation::input(1));
    let cs: Vec<OpId> = (0..6).map(|i| func.push_op(b0, Operation::input(2 + i))).collect();
    let s = func.push_op(
        b0,
        Operation::sample(SampleKind::SampleLc, vec![Operand::Value(u), Operand::Value(v)]),
    );
    let e = func.push_op(b0, Operation::extract(s, lane, Type::F32));
    let mut last = e;
    for &c in &cs {
        last = func.push_op(b0, Operation::binary(BinOp::Mul, last, c, Type::F32));
    }
    func.block_mut(b0).terminate(Terminator::Return(Some(Operand::Value(last))));
    func
}

#[test]
fn sample_lc_single_channel_splits() {
    let original = sample_lc_function(0);
    let mut func = original.clone();
    let mut pass = pixel_pass();

    assert!(pass.run(&mut func));
    assert_eq!(func.blocks.len(), 4);
    assert!(verify(&func).is_ok(), "{:?}", verify(&func));

    assert_equivalent(&original, &func, &[0.0, 9.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_equivalent(&original, &func, &[2.0, 9.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn sample_lc_rejects_other_lanes() {
    let mut func = sample_lc_function(1);
    let mut pass = pixel_pass();

    assert!(!pass.run(&mut func));
    assert_eq!(func.blocks.len(), 1);
}

#[test]
fn sample_folds_from_add_of_two_samples() {
    // One shadow-compare channel whose only use is an add tree of lane-0
    // sample extracts: the add result becomes the seed.
    let mut func = Function::new();
    let b0 = func.entry();
    let coords: Vec<OpId> = (0..4).map(|i| func.push_op(b0, Operation::input(i))).collect();
    let cs: Vec<OpId> = (0..6).map(|i| func.push_op(b0, Operation::input(4 + i))).collect();
    let s1 = func.push_op(
        b0,
        Operation::sample(
            SampleKind::SampleLc,
            vec![Operand::Value(coords[0]), Operand::Value(coords[1])],
        ),
    );
    let s2 = func.push_op(
        b0,
        Operation::sample(
            SampleKind::Sample,
            vec![Operand::Value(coords[2]), Operand::Value(coords[3])],
        ),
    );
    let e1 = func.push_op(b0, Operation::extract(s1, 0, Type::F32));
    let e2 = func.push_op(b0, Operation::extract(s2, 0, Type::F32));
    let sum = func.push_op(b0, Operation::binary(BinOp::Add, e1, e2, Type::F32));
    let mut last = sum;
    for &c in &cs {
        last = func.push_op(b0, Operation::binary(BinOp::Mul, last, c, Type::F32));
    }
    func.block_mut(b0).terminate(Terminator::Return(Some(Operand::Value(last))));

    let original = func.clone();
    let mut pass = pixel_pass();
    assert!(pass.run(&mut func));
    assert_eq!(func.blocks.len(), 4);
    assert!(verify(&func).is_ok(), "{:?}", verify(&func));

    // The guard compares the add result, not the raw channel.
    let prefix = func.block(func.entry());
    let Some(Terminator::Branch { cond, .. }) = &prefix.terminator else {
        panic!("prefix must end in a branch");
    };
    let guard = cond.as_value().expect("guard is an operation");
    let OpKind::Cmp { pred: CmpPred::FloatOeq, lhs, .. } = &func.op(guard).kind else {
        panic!("guard must be a float compare");
    };
    assert_eq!(lhs.as_value(), Some(sum));

    // u + w == 0 when both lane-0 texels are opposite.
    assert_equivalent(&original, &func, &[2.0, 0.0, -2.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_equivalent(&original, &func, &[1.0, 0.0, 5.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

// ---------------------------------------------------------------------
// N-dot-L lighting
// ---------------------------------------------------------------------

fn ndotl_function() -> (Function, OpId, OpId) {
    let mut func = Function::new();
    let b0 = func.entry();
    let nl: Vec<OpId> = (0..6).map(|i| func.push_op(b0, Operation::input(i))).collect();
    let a = func.push_op(b0, Operation::binary(BinOp::Mul, nl[0], nl[1], Type::F32));
    let b = func.push_op(b0, Operation::binary(BinOp::Mul, nl[2], nl[3], Type::F32));
    let c = func.push_op(b0, Operation::binary(BinOp::Mul, nl[4], nl[5], Type::F32));
    let s = func.push_op(b0, Operation::binary(BinOp::Add, a, b, Type::F32));
    let dp = func.push_op(b0, Operation::binary(BinOp::Add, s, c, Type::F32));

    // Color terms defined between the dot product and the compare; the
    // matcher hoists the compare's chain above them.
    let colors: Vec<OpId> = (6..9).map(|i| func.push_op(b0, Operation::input(i))).collect();
    let ks: Vec<OpId> = (9..12).map(|i| func.push_op(b0, Operation::input(i))).collect();

    let cmp = func.push_op(b0, Operation::cmp(CmpPred::FloatOgt, dp, Literal::F32(0.0)));
    let sext = func.push_op(b0, Operation::sign_extend(cmp));
    let mut shaded = Vec::new();
    for lane in 0..3 {
        let bits = func.push_op(b0, Operation::bitcast(colors[lane], Type::I32));
        let masked = func.push_op(b0, Operation::binary(BinOp::And, bits, sext, Type::I32));
        let back = func.push_op(b0, Operation::bitcast(masked, Type::F32));
        let lit = func.push_op(b0, Operation::binary(BinOp::Mul, back, ks[lane], Type::F32));
        let clamped = func.push_op(b0, Operation::max(lit, Literal::F32(0.0)));
        shaded.push(clamped);
    }
    func.push_op(
        b0,
        Operation::output([
            Operand::Value(shaded[0]),
            Operand::Value(shaded[1]),
            Operand::Value(shaded[2]),
            Operand::Literal(Literal::F32(1.0)),
        ]),
    );
    func.block_mut(b0).terminate(Terminator::Return(None));
    (func, cmp, colors[0])
}

#[test]
fn ndotl_splits_and_hoists() {
    let (original, cmp, first_color) = ndotl_function();
    let mut func = original.clone();
    let mut pass = pixel_pass();

    assert!(pass.run(&mut func));
    assert_eq!(func.blocks.len(), 4);
    // sext + 3 * (and, bitcast, mul, max)
    assert_eq!(pass.stats().ops_folded, 13);
    assert!(verify(&func).is_ok(), "{:?}", verify(&func));

    // The compare chain was hoisted: the compare stayed in the prefix
    // while the unrelated color loads fell into the else block.
    let entry = func.entry();
    assert!(func.position(entry, cmp).is_some());
    assert!(func.position(entry, first_color).is_none());

    // Back-facing: dp <= 0, the masked path produces black.
    let back_facing = [0.0, 0.0, 0.0, 0.0, 1.0, -1.0, 0.5, 0.6, 0.7, 2.0, 3.0, 4.0];
    let front_facing = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.5, 0.6, 0.7, 2.0, 3.0, 4.0];
    assert_equivalent(&original, &func, &back_facing);
    assert_equivalent(&original, &func, &front_facing);
}

// ---------------------------------------------------------------------
// Direct output
// ---------------------------------------------------------------------

fn direct_output_function() -> Function {
    let mut func = Function::new();
    let b0 = func.entry();
    let u = func.push_op(b0, Operation::input(0));
    let v = func.push_op(b0, Operation::input(1));
    let red = func.push_op(b0, Operation::input(2));
    let green = func.push_op(b0, Operation::input(3));
    let mut pad = func.push_op(b0, Operation::input(4));
    for _ in 0..45 {
        pad = func.push_op(b0, Operation::binary(BinOp::Add, pad, Literal::F32(1.0), Type::F32));
    }
    let k1 = func.push_op(b0, Operation::input(5));
    let k2 = func.push_op(b0, Operation::input(6));
    let s = func.push_op(
        b0,
        Operation::sample(SampleKind::Sample, vec![Operand::Value(u), Operand::Value(v)]),
    );
    let e = func.push_op(b0, Operation::extract(s, 3, Type::F32));
    let t1 = func.push_op(b0, Operation::binary(BinOp::Mul, e, k1, Type::F32));
    let t2 = func.push_op(b0, Operation::binary(BinOp::Mul, t1, k2, Type::F32));
    func.push_op(
        b0,
        Operation::output([
            Operand::Value(red),
            Operand::Value(green),
            Operand::Literal(Literal::F32(0.25)),
            Operand::Value(t2),
        ]),
    );
    func.block_mut(b0).terminate(Terminator::Return(None));
    func
}

#[test]
fn direct_output_splits_on_alpha_chain() {
    let original = direct_output_function();
    let mut func = original.clone();
    let mut pass = pixel_pass();

    assert!(pass.run(&mut func));
    assert_eq!(func.blocks.len(), 4);
    assert_eq!(pass.stats().splits, 1);
    assert!(verify(&func).is_ok(), "{:?}", verify(&func));

    // Lane 3 of the gradient sampler is 4 * u.
    assert_equivalent(&original, &func, &[0.0, 0.5, 0.3, 0.4, 0.0, 2.0, 3.0]);
    assert_equivalent(&original, &func, &[0.5, 0.5, 0.3, 0.4, 0.0, 2.0, 3.0]);
}

#[test]
fn direct_output_is_pixel_only() {
    // Same function, compute stage: the direct-output family is filtered
    // out and the sample family's closure is too small.
    let mut func = direct_output_function();
    let mut pass = compute_pass();

    assert!(!pass.run(&mut func));
    assert_eq!(func.blocks.len(), 1);
}

// ---------------------------------------------------------------------
// Select-compare
// ---------------------------------------------------------------------

fn select_compare_function() -> Function {
    let mut func = Function::new();
    let b0 = func.entry();
    let x = func.push_op(b0, Operation::input(0));
    let y = func.push_op(b0, Operation::input(1));
    let ks: Vec<OpId> = (0..6).map(|i| func.push_op(b0, Operation::input(2 + i))).collect();
    let v = func.push_op(b0, Operation::binary(BinOp::Mul, x, y, Type::F32));
    let cond = func.push_op(b0, Operation::cmp(CmpPred::FloatOeq, v, Literal::F32(0.0)));
    let sel = func.push_op(b0, Operation::select(cond, Literal::F32(0.0), v, Type::F32));
    let mut last = sel;
    for &k in &ks {
        last = func.push_op(b0, Operation::binary(BinOp::Mul, last, k, Type::F32));
    }
    func.block_mut(b0).terminate(Terminator::Return(Some(Operand::Value(last))));
    func
}

#[test]
fn select_compare_splits() {
    let original = select_compare_function();
    let mut func = original.clone();
    let mut pass = compute_pass();

    assert!(pass.run(&mut func));
    assert_eq!(func.blocks.len(), 4);
    // {select, w1..w6}
    assert_eq!(pass.stats().ops_folded, 7);
    assert!(verify(&func).is_ok(), "{:?}", verify(&func));

    assert_equivalent(&original, &func, &[0.0, 5.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0]);
    assert_equivalent(&original, &func, &[3.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0]);
}

#[test]
fn select_compare_is_compute_only() {
    let mut func = select_compare_function();
    let mut pass = pixel_pass();

    assert!(!pass.run(&mut func));
    assert_eq!(func.blocks.len(), 1);
}

#[test]
fn select_closure_is_just_the_select() {
    // Minimal shape: the closure of the compared value is the
    // select alone; the compare itself never folds.
    let mut func = Function::new();
    let b0 = func.entry();
    let x = func.push_op(b0, Operation::input(0));
    let y = func.push_op(b0, Operation::input(1));
    let v = func.push_op(b0, Operation::binary(BinOp::Mul, x, y, Type::F32));
    let cond = func.push_op(b0, Operation::cmp(CmpPred::FloatOeq, v, Literal::F32(0.0)));
    let sel = func.push_op(b0, Operation::select(cond, Literal::F32(0.0), v, Type::F32));
    func.block_mut(b0).terminate(Terminator::Return(Some(Operand::Value(sel))));

    let uses = UseIndex::build(&func);
    let folded = fold::fold_closure(&func, &uses, &[v]);
    assert_eq!(folded.len(), 1);
    assert!(folded.contains(&sel));
    assert!(!folded.contains(&cond));
}

// ---------------------------------------------------------------------
// Zero-closure rules
// ---------------------------------------------------------------------

#[test]
fn closure_rules_divide_subtract_min_max() {
    let mut func = Function::new();
    let b0 = func.entry();
    let seed = func.push_op(b0, Operation::input(0));
    let k = func.push_op(b0, Operation::input(1));

    // Dividing BY the folded value never folds; dividing it does.
    let denom = func.push_op(b0, Operation::binary(BinOp::Div, k, seed, Type::F32));
    let numer = func.push_op(b0, Operation::binary(BinOp::Div, seed, k, Type::F32));
    // Subtract folds with a literal zero on either side or seed - seed.
    let sub_zero = func.push_op(b0, Operation::binary(BinOp::Sub, seed, Literal::F32(0.0), Type::F32));
    let sub_live = func.push_op(b0, Operation::binary(BinOp::Sub, k, seed, Type::F32));
    let sub_self = func.push_op(b0, Operation::binary(BinOp::Sub, seed, seed, Type::F32));
    // Min needs a non-negative literal; max needs an exact zero.
    let min_pos = func.push_op(b0, Operation::min(seed, Literal::F32(2.0)));
    let min_neg = func.push_op(b0, Operation::min(seed, Literal::F32(-1.0)));
    let max_pos = func.push_op(b0, Operation::max(seed, Literal::F32(1.0)));
    let sat = func.push_op(b0, Operation::saturate(seed));
    func.block_mut(b0).terminate(Terminator::Return(Some(Operand::Value(sat))));

    let uses = UseIndex::build(&func);
    let folded = fold::fold_closure(&func, &uses, &[seed]);

    assert!(!folded.contains(&denom));
    assert!(folded.contains(&numer));
    assert!(folded.contains(&sub_zero));
    assert!(!folded.contains(&sub_live));
    assert!(folded.contains(&sub_self));
    assert!(folded.contains(&min_pos));
    assert!(!folded.contains(&min_neg));
    assert!(!folded.contains(&max_pos));
    assert!(folded.contains(&sat));
}

#[test]
fn closure_stays_inside_the_seed_block() {
    let mut func = Function::new();
    let b0 = func.entry();
    let seed = func.push_op(b0, Operation::input(0));
    let local = func.push_op(b0, Operation::binary(BinOp::Mul, seed, seed, Type::F32));
    let b1 = func.alloc_block();
    func.block_mut(b0).terminate(Terminator::Jump(b1));
    let remote = func.push_op(b1, Operation::binary(BinOp::Mul, seed, seed, Type::F32));
    func.block_mut(b1).terminate(Terminator::Return(Some(Operand::Value(remote))));

    let uses = UseIndex::build(&func);
    let folded = fold::fold_closure(&func, &uses, &[seed]);
    assert!(folded.contains(&local));
    assert!(!folded.contains(&remote));
}

// ---------------------------------------------------------------------
// Profitability boundaries
// ---------------------------------------------------------------------

/// x, root = x*x, then a chain of `n` multiplies, then `extra` trailing
/// operations built by the caller.
fn chain_function(n: usize) -> (Function, OpId, OpId, Vec<OpId>) {
    let mut func = Function::new();
    let b0 = func.entry();
    let x = func.push_op(b0, Operation::input(0));
    let root = func.push_op(b0, Operation::binary(BinOp::Mul, x, x, Type::F32));
    let mut chain = Vec::new();
    let mut last = root;
    for _ in 0..n {
        last = func.push_op(b0, Operation::binary(BinOp::Mul, last, x, Type::F32));
        chain.push(last);
    }
    (func, x, root, chain)
}

fn candidate(root: OpId, seed: OpId, thresholds: (usize, usize, usize)) -> Candidate {
    Candidate {
        root,
        seeds: smallvec![seed],
        fold_threshold: thresholds.0,
        fold_threshold_multi_channel: thresholds.1,
        ratio_needed: thresholds.2,
    }
}

#[test]
fn fold_threshold_boundary() {
    let (mut func, x, root, chain) = chain_function(6);
    let b0 = func.entry();
    func.block_mut(b0).terminate(Terminator::Return(None));
    let uses = UseIndex::build(&func);

    let six: IndexSet<OpId> = chain.iter().copied().collect();
    let five: IndexSet<OpId> = chain[..5].iter().copied().collect();

    // FoldThreshold + 1 foldable operations fire; FoldThreshold does not.
    assert!(benefit::is_split_profitable(&func, &uses, &candidate(root, x, (5, 10, 10)), &six));
    assert!(!benefit::is_split_profitable(&func, &uses, &candidate(root, x, (5, 10, 10)), &five));
}

#[test]
fn multi_channel_threshold_is_stricter() {
    let (mut func, x, root, chain) = chain_function(11);
    let b0 = func.entry();
    let x2 = func.push_op(b0, Operation::input(1));
    func.block_mut(b0).terminate(Terminator::Return(None));
    let uses = UseIndex::build(&func);

    let six: IndexSet<OpId> = chain[..6].iter().copied().collect();
    let eleven: IndexSet<OpId> = chain.iter().copied().collect();

    let mut multi = candidate(root, x, (5, 10, 10));
    multi.seeds = smallvec![x, x2];

    assert!(!benefit::is_split_profitable(&func, &uses, &multi, &six));
    assert!(benefit::is_split_profitable(&func, &uses, &multi, &eleven));
}

#[test]
fn ratio_boundary_and_monotonic_conservatism() {
    // Nine folded chain ops plus one needed survivor: exactly a 1-in-10
    // duplication ratio.
    let (mut func, x, root, chain) = chain_function(9);
    let b0 = func.entry();
    let d = func.push_op(b0, Operation::binary(BinOp::Add, x, Literal::F32(1.0), Type::F32));
    func.block_mut(b0).terminate(Terminator::Return(Some(Operand::Value(d))));
    let uses = UseIndex::build(&func);
    let folded: IndexSet<OpId> = chain.iter().copied().collect();

    // Equality fires; anything stricter does not; raising the ratio can
    // only shrink the set of accepted candidates.
    let mut fired = Vec::new();
    for ratio in [1, 5, 10, 11, 20] {
        let ok =
            benefit::is_split_profitable(&func, &uses, &candidate(root, x, (5, 10, ratio)), &folded);
        fired.push(ok);
    }
    assert_eq!(fired, vec![true, true, true, false, false]);
}

#[test]
fn zero_identity_add_is_free() {
    // The surviving operation is x + folded, which the fast path drops,
    // so even an absurd ratio accepts the candidate.
    let (mut func, x, root, chain) = chain_function(9);
    let b0 = func.entry();
    let d = func.push_op(
        b0,
        Operation::binary(BinOp::Add, chain[8], x, Type::F32),
    );
    func.block_mut(b0).terminate(Terminator::Return(Some(Operand::Value(d))));
    let uses = UseIndex::build(&func);
    let folded: IndexSet<OpId> = chain.iter().copied().collect();

    assert!(benefit::is_split_profitable(
        &func,
        &uses,
        &candidate(root, x, (5, 10, 1000)),
        &folded
    ));
}

// ---------------------------------------------------------------------
// Restart and nested splits
// ---------------------------------------------------------------------

#[test]
fn split_restarts_and_splits_again_inside_the_tail() {
    // The first split's else block still contains a second squared-multiply
    // pattern rooted at a folded intermediate; the restarted scan finds it.
    let mut func = Function::new();
    let b0 = func.entry();
    let x = func.push_op(b0, Operation::input(0));
    let ps: Vec<OpId> = (0..3).map(|i| func.push_op(b0, Operation::input(1 + i))).collect();
    let qs: Vec<OpId> = (0..3).map(|i| func.push_op(b0, Operation::input(4 + i))).collect();
    let t1 = func.push_op(b0, Operation::binary(BinOp::Mul, x, x, Type::F32));
    let ms: Vec<OpId> = ps
        .iter()
        .map(|&p| func.push_op(b0, Operation::binary(BinOp::Mul, p, t1, Type::F32)))
        .collect();
    let rs: Vec<OpId> =
        ms.iter().map(|&m| func.push_op(b0, Operation::max(m, Literal::F32(0.0)))).collect();
    let w = func.push_op(b0, Operation::binary(BinOp::Mul, rs[0], rs[1], Type::F32));
    let t2 = func.push_op(b0, Operation::binary(BinOp::Mul, w, w, Type::F32));
    let us: Vec<OpId> = qs
        .iter()
        .map(|&q| func.push_op(b0, Operation::binary(BinOp::Mul, q, t2, Type::F32)))
        .collect();
    let vs: Vec<OpId> =
        us.iter().map(|&u| func.push_op(b0, Operation::max(u, Literal::F32(0.0)))).collect();
    func.push_op(
        b0,
        Operation::output([
            Operand::Value(vs[0]),
            Operand::Value(vs[1]),
            Operand::Value(vs[2]),
            Operand::Value(rs[2]),
        ]),
    );
    func.block_mut(b0).terminate(Terminator::Return(None));

    let original = func.clone();
    let mut pass = pixel_pass();
    assert!(pass.run(&mut func));

    assert_eq!(pass.stats().splits, 2);
    assert_eq!(func.blocks.len(), 7);
    // First split folds the whole chain (15); the second refolds the inner
    // pattern inside the else block (7).
    assert_eq!(pass.stats().ops_folded, 22);
    assert!(verify(&func).is_ok(), "{:?}", verify(&func));

    // x == 0 takes the outer fast path; w == 0 the inner one.
    assert_equivalent(&original, &func, &[0.0, 1.0, 1.0, 1.0, 1.0, 2.0, 3.0]);
    assert_equivalent(&original, &func, &[2.0, 0.0, 1.0, 1.0, 1.0, 2.0, 3.0]);
    assert_equivalent(&original, &func, &[2.0, 3.0, 1.0, 1.0, 1.0, 2.0, 3.0]);
}
