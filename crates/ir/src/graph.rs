//! Operation graph type definitions.
//!
//! Defines the core types for the SSA-form control-flow graph that backend
//! passes read and mutate. A [`Function`] owns an append-only arena of
//! [`Operation`]s with stable [`OpId`] indices; values *are* operation
//! indices, so every value has exactly one producer by construction.
//! Block bodies are ordered lists of arena indices; moving an id between
//! bodies transfers ownership of the operation. Arena entries that no block
//! lists anymore are simply dead and never reused.

use std::fmt;

/// Operation identifier.
///
/// Each OpId names both an operation in the function arena and, for
/// non-void operations, the single value that operation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(pub u32);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Basic block identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// Value types carried by operations and literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    F32,
    I32,
    Bool,
    Vec4F32,
    Vec4I32,
}

impl Type {
    /// True for types compared with integer equality in guard conditions.
    pub fn is_int(&self) -> bool {
        matches!(self, Type::I32 | Type::Bool | Type::Vec4I32)
    }

    /// The zero literal of this type.
    pub fn zero(&self) -> Literal {
        match self {
            Type::F32 => Literal::F32(0.0),
            Type::I32 => Literal::I32(0),
            Type::Bool => Literal::Bool(false),
            Type::Vec4F32 => Literal::Vec4F32([0.0; 4]),
            Type::Vec4I32 => Literal::Vec4I32([0; 4]),
        }
    }
}

/// A typed immediate value.
///
/// Literals appear as operands in the graph and double as runtime values
/// in the reference interpreter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    F32(f32),
    I32(i32),
    Bool(bool),
    Vec4F32([f32; 4]),
    Vec4I32([i32; 4]),
}

impl Literal {
    /// The type of this literal.
    pub fn ty(&self) -> Type {
        match self {
            Literal::F32(_) => Type::F32,
            Literal::I32(_) => Type::I32,
            Literal::Bool(_) => Type::Bool,
            Literal::Vec4F32(_) => Type::Vec4F32,
            Literal::Vec4I32(_) => Type::Vec4I32,
        }
    }

    /// True if this literal is exactly zero (positive or negative zero
    /// for floats, all lanes zero for vectors).
    pub fn is_zero(&self) -> bool {
        match self {
            Literal::F32(v) => *v == 0.0,
            Literal::I32(v) => *v == 0,
            Literal::Bool(v) => !*v,
            Literal::Vec4F32(v) => v.iter().all(|x| *x == 0.0),
            Literal::Vec4I32(v) => v.iter().all(|x| *x == 0),
        }
    }

    /// True if this is a float literal that is >= 0.
    pub fn is_non_negative_float(&self) -> bool {
        matches!(self, Literal::F32(v) if *v >= 0.0)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::F32(v) => write!(f, "{v:?}"),
            Literal::I32(v) => write!(f, "{v}"),
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::Vec4F32(v) => write!(f, "{v:?}"),
            Literal::Vec4I32(v) => write!(f, "{v:?}"),
        }
    }
}

/// An operand reference: either the value produced by another operation
/// or an immediate literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Value(OpId),
    Literal(Literal),
}

impl Operand {
    /// The producing operation, if this operand is a value reference.
    pub fn as_value(&self) -> Option<OpId> {
        match self {
            Operand::Value(id) => Some(*id),
            Operand::Literal(_) => None,
        }
    }

    /// True if this operand is a zero literal.
    pub fn is_zero_literal(&self) -> bool {
        matches!(self, Operand::Literal(lit) if lit.is_zero())
    }

    /// True if this operand is a literal that is >= 0.
    pub fn is_non_negative_literal(&self) -> bool {
        matches!(self, Operand::Literal(lit) if lit.is_non_negative_float())
    }

    /// True if this operand references the value produced by `id`.
    pub fn refers_to(&self, id: OpId) -> bool {
        self.as_value() == Some(id)
    }
}

impl From<OpId> for Operand {
    fn from(id: OpId) -> Self {
        Operand::Value(id)
    }
}

impl From<Literal> for Operand {
    fn from(lit: Literal) -> Self {
        Operand::Literal(lit)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(id) => write!(f, "{id}"),
            Operand::Literal(lit) => write!(f, "{lit}"),
        }
    }
}

/// Binary arithmetic opcodes.
///
/// `Add`/`Sub`/`Mul`/`Div` operate on floats or integers depending on the
/// operation's type; `And` is bitwise and only meaningful on integer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
}

/// Comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpPred {
    /// Ordered float greater-than.
    FloatOgt,
    /// Ordered float equality.
    FloatOeq,
    /// Integer equality.
    IntEq,
}

/// Texture sample variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    /// Plain sample.
    Sample,
    /// Sample with explicit LOD.
    SampleL,
    /// Sample-compare (shadow) with explicit LOD.
    SampleLc,
}

/// The opcode vocabulary.
///
/// A closed tagged sum: matchers and fold rules match exhaustively over
/// these variants, so there is no "failed downcast" state.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Binary arithmetic.
    Binary { op: BinOp, lhs: Operand, rhs: Operand },

    /// Comparison producing a Bool.
    Cmp { pred: CmpPred, lhs: Operand, rhs: Operand },

    /// Conditional value select.
    Select { cond: Operand, on_true: Operand, on_false: Operand },

    /// Saturating clamp to [0, 1].
    Saturate { value: Operand },

    /// Minimum of two values.
    Min { lhs: Operand, rhs: Operand },

    /// Maximum of two values.
    Max { lhs: Operand, rhs: Operand },

    /// Sign-extend a Bool to an all-ones/all-zeros I32 mask.
    SignExtend { value: Operand },

    /// Bit-level reinterpretation; the target type is the operation type.
    Bitcast { value: Operand },

    /// Extract one lane from a vector value.
    Extract { vector: Operand, lane: Operand },

    /// Texture sample call producing a Vec4F32.
    Sample { kind: SampleKind, coords: Vec<Operand> },

    /// Typed output write (render-target channels x, y, z, w). Void, and
    /// the only memory-writing operation in the vocabulary.
    Output { args: [Operand; 4] },

    /// Shader input read.
    Input { slot: u32 },

    /// Control-flow merge node: one incoming value per predecessor.
    Phi { arms: Vec<(BlockId, Operand)> },
}

impl OpKind {
    /// All operands of this operation, in order.
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            OpKind::Binary { lhs, rhs, .. }
            | OpKind::Cmp { lhs, rhs, .. }
            | OpKind::Min { lhs, rhs }
            | OpKind::Max { lhs, rhs } => vec![*lhs, *rhs],

            OpKind::Select { cond, on_true, on_false } => vec![*cond, *on_true, *on_false],

            OpKind::Saturate { value }
            | OpKind::SignExtend { value }
            | OpKind::Bitcast { value } => vec![*value],

            OpKind::Extract { vector, lane } => vec![*vector, *lane],

            OpKind::Sample { coords, .. } => coords.clone(),

            OpKind::Output { args } => args.to_vec(),

            OpKind::Input { .. } => vec![],

            OpKind::Phi { arms } => arms.iter().map(|(_, v)| *v).collect(),
        }
    }

    /// Mutable references to all operands, for in-place rewriting.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            OpKind::Binary { lhs, rhs, .. }
            | OpKind::Cmp { lhs, rhs, .. }
            | OpKind::Min { lhs, rhs }
            | OpKind::Max { lhs, rhs } => vec![lhs, rhs],

            OpKind::Select { cond, on_true, on_false } => vec![cond, on_true, on_false],

            OpKind::Saturate { value }
            | OpKind::SignExtend { value }
            | OpKind::Bitcast { value } => vec![value],

            OpKind::Extract { vector, lane } => vec![vector, lane],

            OpKind::Sample { coords, .. } => coords.iter_mut().collect(),

            OpKind::Output { args } => args.iter_mut().collect(),

            OpKind::Input { .. } => vec![],

            OpKind::Phi { arms } => arms.iter_mut().map(|(_, v)| v).collect(),
        }
    }

    /// True if this operation has a memory-writing side effect.
    pub fn has_side_effect(&self) -> bool {
        matches!(self, OpKind::Output { .. })
    }
}

/// An operation in the graph: an opcode plus the type of the value it
/// produces (`None` for void operations).
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    pub ty: Option<Type>,
}

impl Operation {
    pub fn binary(op: BinOp, lhs: impl Into<Operand>, rhs: impl Into<Operand>, ty: Type) -> Self {
        Operation {
            kind: OpKind::Binary { op, lhs: lhs.into(), rhs: rhs.into() },
            ty: Some(ty),
        }
    }

    pub fn cmp(pred: CmpPred, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        Operation {
            kind: OpKind::Cmp { pred, lhs: lhs.into(), rhs: rhs.into() },
            ty: Some(Type::Bool),
        }
    }

    pub fn select(
        cond: impl Into<Operand>,
        on_true: impl Into<Operand>,
        on_false: impl Into<Operand>,
        ty: Type,
    ) -> Self {
        Operation {
            kind: OpKind::Select {
                cond: cond.into(),
                on_true: on_true.into(),
                on_false: on_false.into(),
            },
            ty: Some(ty),
        }
    }

    pub fn saturate(value: impl Into<Operand>) -> Self {
        Operation { kind: OpKind::Saturate { value: value.into() }, ty: Some(Type::F32) }
    }

    pub fn min(lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        Operation { kind: OpKind::Min { lhs: lhs.into(), rhs: rhs.into() }, ty: Some(Type::F32) }
    }

    pub fn max(lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        Operation { kind: OpKind::Max { lhs: lhs.into(), rhs: rhs.into() }, ty: Some(Type::F32) }
    }

    pub fn sign_extend(value: impl Into<Operand>) -> Self {
        Operation { kind: OpKind::SignExtend { value: value.into() }, ty: Some(Type::I32) }
    }

    pub fn bitcast(value: impl Into<Operand>, ty: Type) -> Self {
        Operation { kind: OpKind::Bitcast { value: value.into() }, ty: Some(ty) }
    }

    pub fn extract(vector: impl Into<Operand>, lane: i32, ty: Type) -> Self {
        Operation {
            kind: OpKind::Extract {
                vector: vector.into(),
                lane: Operand::Literal(Literal::I32(lane)),
            },
            ty: Some(ty),
        }
    }

    pub fn sample(kind: SampleKind, coords: Vec<Operand>) -> Self {
        Operation { kind: OpKind::Sample { kind, coords }, ty: Some(Type::Vec4F32) }
    }

    pub fn output(args: [Operand; 4]) -> Self {
        Operation { kind: OpKind::Output { args }, ty: None }
    }

    pub fn input(slot: u32) -> Self {
        Operation { kind: OpKind::Input { slot }, ty: Some(Type::F32) }
    }

    pub fn phi(arms: Vec<(BlockId, Operand)>, ty: Type) -> Self {
        Operation { kind: OpKind::Phi { arms }, ty: Some(ty) }
    }

    /// Pretty-print this operation (without its id).
    pub fn pretty_print(&self) -> String {
        match &self.kind {
            OpKind::Binary { op, lhs, rhs } => format!("{op:?}({lhs}, {rhs})"),
            OpKind::Cmp { pred, lhs, rhs } => format!("Cmp({pred:?}, {lhs}, {rhs})"),
            OpKind::Select { cond, on_true, on_false } => {
                format!("Select({cond}, {on_true}, {on_false})")
            }
            OpKind::Saturate { value } => format!("Saturate({value})"),
            OpKind::Min { lhs, rhs } => format!("Min({lhs}, {rhs})"),
            OpKind::Max { lhs, rhs } => format!("Max({lhs}, {rhs})"),
            OpKind::SignExtend { value } => format!("SignExtend({value})"),
            OpKind::Bitcast { value } => format!("Bitcast({value})"),
            OpKind::Extract { vector, lane } => format!("Extract({vector}, {lane})"),
            OpKind::Sample { kind, coords } => {
                let coords: Vec<_> = coords.iter().map(|c| c.to_string()).collect();
                format!("Sample({kind:?}, [{}])", coords.join(", "))
            }
            OpKind::Output { args } => {
                let args: Vec<_> = args.iter().map(|a| a.to_string()).collect();
                format!("Output([{}])", args.join(", "))
            }
            OpKind::Input { slot } => format!("Input({slot})"),
            OpKind::Phi { arms } => {
                let arms: Vec<_> = arms.iter().map(|(b, v)| format!("{b}: {v}")).collect();
                format!("Phi([{}])", arms.join(", "))
            }
        }
    }
}

/// Block terminator that controls flow to subsequent blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Return from the function, optionally with a value.
    Return(Option<Operand>),

    /// Unconditional jump.
    Jump(BlockId),

    /// Conditional branch on a Bool operand.
    Branch { cond: Operand, then_block: BlockId, else_block: BlockId },
}

impl Terminator {
    /// All operands used by this terminator.
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Terminator::Return(Some(v)) => vec![*v],
            Terminator::Return(None) | Terminator::Jump(_) => vec![],
            Terminator::Branch { cond, .. } => vec![*cond],
        }
    }

    /// Mutable references to the operands of this terminator.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Terminator::Return(Some(v)) => vec![v],
            Terminator::Return(None) | Terminator::Jump(_) => vec![],
            Terminator::Branch { cond, .. } => vec![cond],
        }
    }

    /// Successor blocks.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Return(_) => vec![],
            Terminator::Jump(b) => vec![*b],
            Terminator::Branch { then_block, else_block, .. } => vec![*then_block, *else_block],
        }
    }

    /// Pretty-print this terminator.
    pub fn pretty_print(&self) -> String {
        match self {
            Terminator::Return(Some(v)) => format!("Return({v})"),
            Terminator::Return(None) => "Return".to_string(),
            Terminator::Jump(b) => format!("Jump({b})"),
            Terminator::Branch { cond, then_block, else_block } => {
                format!("Branch({cond}, {then_block}, {else_block})")
            }
        }
    }
}

/// A basic block: an ordered body of arena indices plus one terminator.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    /// Operations in this block, in execution order (excluding terminator).
    pub body: Vec<OpId>,
    /// Block terminator; `None` only while the block is under construction.
    pub terminator: Option<Terminator>,
}

impl Block {
    fn new(id: BlockId) -> Self {
        Block { id, body: Vec::new(), terminator: None }
    }

    /// Set the block terminator.
    pub fn terminate(&mut self, term: Terminator) {
        self.terminator = Some(term);
    }
}

/// Complete function: an arena of operations and an ordered set of blocks
/// forming one CFG. Execution starts at block 0.
#[derive(Debug, Clone)]
pub struct Function {
    /// Operation arena. Append-only; indices are stable for the lifetime
    /// of the function.
    pub ops: Vec<Operation>,
    /// Basic blocks. Block 0 is the entry block.
    pub blocks: Vec<Block>,
}

impl Function {
    /// Create a new function with a single empty entry block.
    pub fn new() -> Self {
        Function { ops: Vec::new(), blocks: vec![Block::new(BlockId(0))] }
    }

    /// The entry block id.
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Allocate a new empty basic block.
    pub fn alloc_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id));
        id
    }

    /// Get a reference to a block.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    /// Get a mutable reference to a block.
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    /// Get a reference to an operation.
    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id.0 as usize]
    }

    /// Get a mutable reference to an operation.
    pub fn op_mut(&mut self, id: OpId) -> &mut Operation {
        &mut self.ops[id.0 as usize]
    }

    /// Append an operation to the end of a block's body.
    pub fn push_op(&mut self, block: BlockId, op: Operation) -> OpId {
        let id = OpId(self.ops.len() as u32);
        self.ops.push(op);
        self.block_mut(block).body.push(id);
        id
    }

    /// Insert an operation into a block's body at `index`.
    pub fn insert_op(&mut self, block: BlockId, index: usize, op: Operation) -> OpId {
        let id = OpId(self.ops.len() as u32);
        self.ops.push(op);
        self.block_mut(block).body.insert(index, id);
        id
    }

    /// Position of an operation within a block body, if present.
    pub fn position(&self, block: BlockId, op: OpId) -> Option<usize> {
        self.block(block).body.iter().position(|&o| o == op)
    }

    /// Move an operation so it immediately follows `after` within the same
    /// block. Both operations must be in `block`'s body.
    pub fn move_op_after(&mut self, block: BlockId, op: OpId, after: OpId) {
        if op == after {
            return;
        }
        let body = &mut self.block_mut(block).body;
        let from = body.iter().position(|&o| o == op).expect("op not in block");
        body.remove(from);
        let to = body.iter().position(|&o| o == after).expect("anchor not in block");
        body.insert(to + 1, op);
    }

    /// Move an operation to the front of its block body.
    pub fn move_op_to_front(&mut self, block: BlockId, op: OpId) {
        let body = &mut self.block_mut(block).body;
        let from = body.iter().position(|&o| o == op).expect("op not in block");
        body.remove(from);
        body.insert(0, op);
    }

    /// Total number of operations across all block bodies.
    ///
    /// This is the live count, not the arena length: arena entries no block
    /// lists anymore are dead and excluded.
    pub fn op_count(&self) -> usize {
        self.blocks.iter().map(|b| b.body.len()).sum()
    }

    /// Compute the predecessor map for all blocks.
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for block in &self.blocks {
            if let Some(term) = &block.terminator {
                for succ in term.successors() {
                    preds[succ.0 as usize].push(block.id);
                }
            }
        }
        preds
    }

    /// Pretty-print the function.
    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            out.push_str(&format!("{}:\n", block.id));
            for &id in &block.body {
                out.push_str(&format!("  {} = {}\n", id, self.op(id).pretty_print()));
            }
            if let Some(term) = &block.terminator {
                out.push_str(&format!("  {}\n", term.pretty_print()));
            }
        }
        out
    }
}

impl Default for Function {
    fn default() -> Self {
        Self::new()
    }
}
