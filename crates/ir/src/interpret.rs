//! Reference interpreter for the operation graph.
//!
//! Executes a [`Function`] directly: shader inputs come from a slot-indexed
//! slice, texture samples from a caller-provided callback, and every
//! `Output` write is recorded in order. The interpreter exists so that
//! transformation soundness can be stated as an executable property —
//! a rewritten function must produce the same outputs as the original for
//! the same inputs.
//!
//! Malformed graphs (use before definition, type-mismatched operands) are
//! programming errors and panic; run [`crate::verify::verify`] first.

use crate::graph::{BinOp, BlockId, CmpPred, Function, Literal, OpKind, Operand, SampleKind, Terminator};

/// The observable result of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    /// Value of the `Return` terminator, if any.
    pub ret: Option<Literal>,
    /// Every `Output` write, in execution order.
    pub outputs: Vec<[f32; 4]>,
}

/// Execute `func` with the given input slots and texture sampler.
pub fn evaluate<S>(func: &Function, inputs: &[f32], mut sampler: S) -> EvalResult
where
    S: FnMut(SampleKind, &[Literal]) -> [f32; 4],
{
    let mut values: Vec<Option<Literal>> = vec![None; func.ops.len()];
    let mut outputs = Vec::new();
    let mut current = func.entry();
    let mut prev: Option<BlockId> = None;

    loop {
        let block = func.block(current);
        for &id in &block.body {
            match &func.op(id).kind {
                OpKind::Output { args } => {
                    let mut write = [0.0f32; 4];
                    for (channel, arg) in args.iter().enumerate() {
                        write[channel] = as_f32(eval_operand(&values, *arg));
                    }
                    outputs.push(write);
                }
                OpKind::Phi { arms } => {
                    let pred = prev.expect("phi node in entry block");
                    let (_, incoming) = arms
                        .iter()
                        .find(|(b, _)| *b == pred)
                        .expect("phi arm for executed predecessor");
                    values[id.0 as usize] = Some(eval_operand(&values, *incoming));
                }
                kind => {
                    let result = eval_op(kind, &values, inputs, &mut sampler);
                    values[id.0 as usize] = Some(result);
                }
            }
        }

        match block.terminator.as_ref().expect("terminated block") {
            Terminator::Return(v) => {
                return EvalResult { ret: (*v).map(|o| eval_operand(&values, o)), outputs };
            }
            Terminator::Jump(b) => {
                prev = Some(current);
                current = *b;
            }
            Terminator::Branch { cond, then_block, else_block } => {
                let taken = as_bool(eval_operand(&values, *cond));
                prev = Some(current);
                current = if taken { *then_block } else { *else_block };
            }
        }
    }
}

fn eval_operand(values: &[Option<Literal>], operand: Operand) -> Literal {
    match operand {
        Operand::Literal(lit) => lit,
        Operand::Value(id) => values[id.0 as usize].expect("value evaluated before use"),
    }
}

fn eval_op<S>(
    kind: &OpKind,
    values: &[Option<Literal>],
    inputs: &[f32],
    sampler: &mut S,
) -> Literal
where
    S: FnMut(SampleKind, &[Literal]) -> [f32; 4],
{
    let operand = |o: Operand| eval_operand(values, o);
    match kind {
        OpKind::Binary { op, lhs, rhs } => eval_binary(*op, operand(*lhs), operand(*rhs)),
        OpKind::Cmp { pred, lhs, rhs } => {
            Literal::Bool(eval_cmp(*pred, operand(*lhs), operand(*rhs)))
        }
        OpKind::Select { cond, on_true, on_false } => {
            if as_bool(operand(*cond)) {
                operand(*on_true)
            } else {
                operand(*on_false)
            }
        }
        OpKind::Saturate { value } => Literal::F32(as_f32(operand(*value)).clamp(0.0, 1.0)),
        OpKind::Min { lhs, rhs } => Literal::F32(as_f32(operand(*lhs)).min(as_f32(operand(*rhs)))),
        OpKind::Max { lhs, rhs } => Literal::F32(as_f32(operand(*lhs)).max(as_f32(operand(*rhs)))),
        OpKind::SignExtend { value } => {
            // i1 -> i32 sign extension: true becomes an all-ones mask.
            Literal::I32(if as_bool(operand(*value)) { -1 } else { 0 })
        }
        OpKind::Bitcast { value } => bitcast(operand(*value)),
        OpKind::Extract { vector, lane } => {
            let lane = match operand(*lane) {
                Literal::I32(i) => i as usize,
                other => panic!("non-integer extract lane: {other:?}"),
            };
            match operand(*vector) {
                Literal::Vec4F32(v) => Literal::F32(v[lane]),
                Literal::Vec4I32(v) => Literal::I32(v[lane]),
                other => panic!("extract from non-vector: {other:?}"),
            }
        }
        OpKind::Sample { kind, coords } => {
            let coords: Vec<Literal> = coords.iter().map(|c| operand(*c)).collect();
            Literal::Vec4F32(sampler(*kind, &coords))
        }
        OpKind::Input { slot } => Literal::F32(inputs.get(*slot as usize).copied().unwrap_or(0.0)),
        OpKind::Output { .. } | OpKind::Phi { .. } => {
            unreachable!("handled by the block execution loop")
        }
    }
}

fn eval_binary(op: BinOp, lhs: Literal, rhs: Literal) -> Literal {
    match (lhs, rhs) {
        (Literal::F32(a), Literal::F32(b)) => Literal::F32(match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::And => panic!("bitwise and on float operands"),
        }),
        (Literal::I32(a), Literal::I32(b)) => Literal::I32(match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div => a.checked_div(b).unwrap_or(0),
            BinOp::And => a & b,
        }),
        (Literal::Bool(a), Literal::Bool(b)) => match op {
            BinOp::And => Literal::Bool(a & b),
            _ => panic!("arithmetic on bool operands"),
        },
        (a, b) => panic!("type-mismatched binary operands: {a:?}, {b:?}"),
    }
}

fn eval_cmp(pred: CmpPred, lhs: Literal, rhs: Literal) -> bool {
    match pred {
        CmpPred::FloatOgt => as_f32(lhs) > as_f32(rhs),
        CmpPred::FloatOeq => as_f32(lhs) == as_f32(rhs),
        CmpPred::IntEq => match (lhs, rhs) {
            (Literal::I32(a), Literal::I32(b)) => a == b,
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (a, b) => panic!("integer compare on {a:?}, {b:?}"),
        },
    }
}

fn bitcast(value: Literal) -> Literal {
    match value {
        Literal::F32(v) => Literal::I32(v.to_bits() as i32),
        Literal::I32(v) => Literal::F32(f32::from_bits(v as u32)),
        Literal::Vec4F32(v) => Literal::Vec4I32(v.map(|x| x.to_bits() as i32)),
        Literal::Vec4I32(v) => Literal::Vec4F32(v.map(|x| f32::from_bits(x as u32))),
        Literal::Bool(_) => panic!("bitcast of bool"),
    }
}

fn as_f32(value: Literal) -> f32 {
    match value {
        Literal::F32(v) => v,
        other => panic!("expected f32 value, got {other:?}"),
    }
}

fn as_bool(value: Literal) -> bool {
    match value {
        Literal::Bool(v) => v,
        other => panic!("expected bool value, got {other:?}"),
    }
}
