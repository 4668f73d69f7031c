//! Opcode definitions.
//!
//! Every instruction is a fixed `{op, a, b}` record. Unless noted otherwise a
//! binary operation stores its result in register `a`, and instructions that
//! take a register run (calls, container literals) read it starting at `a` and
//! leave the result in `a`.

use serde::{Deserialize, Serialize};

/// Meaning of one instruction operand, used for validation and disassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Operand is unused and always zero.
    Unused,
    /// Register index.
    Reg,
    /// Constant pool index.
    Pool,
    /// Absolute instruction index.
    Target,
    /// Immediate value (small integer literal or element count).
    Imm,
}

/// Template VM opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    /// `a <- pool[b]`
    LoadConst,
    /// `a <- b` as an integer.
    LoadInt,
    LoadTrue,
    LoadFalse,
    LoadNull,
    /// `a <- vars[pool[b]]`
    LoadVar,
    /// `vars[pool[a]] <- b`
    SetVar,
    /// `a <- b`
    Move,
    /// Appends `pool[a]` unescaped.
    AppendRaw,
    /// Appends register `a` through the escaper.
    Append,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    /// `a <- str(a) ~ str(b)`
    Concat,
    Equals,
    NotEquals,
    Gt,
    Ge,
    Lt,
    Le,
    /// `a <- !a`
    Not,
    /// SWITCH arm test, same rule as `Equals`.
    Match,
    /// `a <- [a .. a+b]`
    MakeArray,
    /// `a <- {a: a+1, ..}` over `b` key/value pairs.
    MakeMap,
    /// `a <- a..b` inclusive.
    MakeRange,
    /// `a <- a[b]`
    GetAttr,
    /// `pc <- a`
    Jump,
    /// `if !a { pc <- b }`
    JumpIfFalse,
    /// `if a { pc <- b }`
    JumpIfTrue,
    /// Pushes a loop over register `a` and stores the first item in `a`;
    /// jumps to `b` without pushing when the source is empty.
    IterStart,
    /// Advances the innermost loop, storing the item in `a` and jumping to
    /// `b`; falls through when exhausted.
    IterNext,
    /// Pops the innermost loop record.
    LoopPop,
    /// `a <-` 1-based iteration count of the innermost loop.
    LoopCount,
    /// `a <-` 0-based iteration index of the innermost loop.
    LoopIndex,
    /// `a <-` whether the innermost loop has more items.
    LoopHasNext,
    /// Renders the template named by register `a` with the shared variables;
    /// the output replaces `a` as a raw value.
    Include,
    /// Like `Include`, rendering against a copy of the variables extended
    /// with the map in register `b`.
    IncludeWith,
    /// `a <-` current output length, marking where a WRAPPER body starts.
    MarkOutput,
    /// Renders the template named by register `a` with the output written
    /// since the mark in register `b` bound to `content`, and replaces that
    /// output with the result.
    Wrap,
    /// Calls the function named by register `a` with `b` arguments from `a+1`.
    Funcall,
    /// Calls method `a+1` on the object in `a` with `b` arguments from `a+2`.
    MethodCall,
    Lc,
    Uc,
    UriEscape,
    /// `a <- sprintf(a, a+1 ..= a+b)`
    Sprintf,
    Return,
}

impl Opcode {
    /// Kinds of the `a` and `b` operands.
    #[must_use]
    pub fn operands(self) -> (Operand, Operand) {
        use Operand::{Imm, Pool, Reg, Target, Unused};
        match self {
            Self::LoadConst | Self::LoadVar => (Reg, Pool),
            Self::LoadInt => (Reg, Imm),
            Self::SetVar => (Pool, Reg),
            Self::AppendRaw => (Pool, Unused),
            Self::LoadTrue
            | Self::LoadFalse
            | Self::LoadNull
            | Self::Append
            | Self::Not
            | Self::LoopCount
            | Self::LoopIndex
            | Self::LoopHasNext
            | Self::Include
            | Self::MarkOutput
            | Self::Lc
            | Self::Uc
            | Self::UriEscape => (Reg, Unused),
            Self::Move
            | Self::Add
            | Self::Subtract
            | Self::Multiply
            | Self::Divide
            | Self::Modulo
            | Self::Concat
            | Self::Equals
            | Self::NotEquals
            | Self::Gt
            | Self::Ge
            | Self::Lt
            | Self::Le
            | Self::Match
            | Self::MakeRange
            | Self::GetAttr
            | Self::IncludeWith
            | Self::Wrap => (Reg, Reg),
            Self::MakeArray | Self::MakeMap | Self::Funcall | Self::MethodCall | Self::Sprintf => (Reg, Imm),
            Self::Jump => (Target, Unused),
            Self::JumpIfFalse | Self::JumpIfTrue | Self::IterStart | Self::IterNext => (Reg, Target),
            Self::LoopPop | Self::Return => (Unused, Unused),
        }
    }

    /// Highest register offset from `a` read by a run-based instruction with count `b`.
    #[must_use]
    pub fn run_extent(self, b: u32) -> u32 {
        match self {
            Self::MakeArray => b.saturating_sub(1),
            Self::MakeMap => b.saturating_mul(2).saturating_sub(1),
            Self::Funcall | Self::Sprintf => b,
            Self::MethodCall => b.saturating_add(1),
            _ => 0,
        }
    }

    /// Whether the jump target of this opcode lives in operand `a` (else `b`).
    #[must_use]
    pub fn target_in_a(self) -> bool {
        self == Self::Jump
    }
}
