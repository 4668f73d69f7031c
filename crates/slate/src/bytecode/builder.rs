//! Builder for emitting bytecode during compilation.
//!
//! `ProgramBuilder` appends instructions, interns constants, records one
//! source line per instruction, and hands out [`PatchLabel`]s for forward
//! jumps whose targets are written once known.

use std::{sync::Arc, sync::atomic::AtomicUsize};

use ahash::AHashMap;

use super::{
    op::Opcode,
    program::{Constant, Instruction, Program},
};
use crate::{error::CompileError, source::Source};

/// Handle to an emitted jump whose target is not yet known.
///
/// Must be consumed by [`ProgramBuilder::patch_here`] or
/// [`ProgramBuilder::patch_to`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "forward jumps must be patched"]
pub struct PatchLabel(usize);

/// Hashable identity of a constant, used to deduplicate the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Str(Arc<str>),
    Int(i64),
    Float(u64),
}

/// Builder for emitting bytecode during compilation.
///
/// # Usage
///
/// ```ignore
/// let mut builder = ProgramBuilder::new();
/// builder.set_line(3);
/// let cond = builder.reserve_register()?;
/// let skip = builder.emit_lazy(Opcode::JumpIfFalse, cond);
/// // ... emit the guarded code ...
/// builder.patch_here(skip)?;
/// builder.emit(Opcode::Return, 0, 0);
/// let program = builder.build(Source::Anonymous);
/// ```
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    instructions: Vec<Instruction>,
    /// Source line per instruction, same length as `instructions`.
    lines: Vec<u32>,
    pool: Vec<Constant>,
    pool_index: AHashMap<ConstKey, u32>,
    current_line: u32,
    /// Registers handed out so far; never decreases.
    register_count: u32,
    loop_depth: usize,
    max_loop_depth: usize,
}

impl ProgramBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source line recorded for subsequent instructions.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    /// Emits a fully-specified instruction and returns its index.
    pub fn emit(&mut self, op: Opcode, a: u32, b: u32) -> usize {
        self.instructions.push(Instruction { op, a, b });
        self.lines.push(self.current_line);
        self.instructions.len() - 1
    }

    /// Emits a jump whose target is filled in later.
    ///
    /// For `Jump` the target goes in `a` and `reg` is ignored; for the
    /// conditional and loop jumps `reg` is operand `a` and the target goes in `b`.
    pub fn emit_lazy(&mut self, op: Opcode, reg: u32) -> PatchLabel {
        let a = if op.target_in_a() { 0 } else { reg };
        PatchLabel(self.emit(op, a, 0))
    }

    /// Index the next emitted instruction will get.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.instructions.len()
    }

    /// Points a lazy jump at the next instruction to be emitted.
    pub fn patch_here(&mut self, label: PatchLabel) -> Result<(), CompileError> {
        let here = self.current_offset();
        self.patch_to(label, here)
    }

    /// Points a lazy jump at `target`.
    pub fn patch_to(&mut self, label: PatchLabel, target: usize) -> Result<(), CompileError> {
        let target = operand(target, "jump target")?;
        let ins = &mut self.instructions[label.0];
        if ins.op.target_in_a() {
            ins.a = target;
        } else {
            ins.b = target;
        }
        Ok(())
    }

    /// Allocates a fresh register. Registers are never reused.
    pub fn reserve_register(&mut self) -> Result<u32, CompileError> {
        self.reserve_run(1)
    }

    /// Allocates `count` consecutive registers and returns the first.
    ///
    /// A zero-length run still gets one register so the result has a home.
    pub fn reserve_run(&mut self, count: usize) -> Result<u32, CompileError> {
        let first = self.register_count;
        let count = operand(count.max(1), "register count")?;
        self.register_count = first
            .checked_add(count)
            .ok_or(CompileError::TooLarge { what: "register count" })?;
        Ok(first)
    }

    /// Interns `constant` and returns its pool index, reusing an equal entry.
    pub fn add_const(&mut self, constant: Constant) -> Result<u32, CompileError> {
        let key = match &constant {
            Constant::Str(s) => ConstKey::Str(Arc::clone(s)),
            Constant::Int(i) => ConstKey::Int(*i),
            Constant::Float(v) => ConstKey::Float(v.to_bits()),
        };
        if let Some(&index) = self.pool_index.get(&key) {
            return Ok(index);
        }
        let index = operand(self.pool.len(), "constant pool")?;
        self.pool.push(constant);
        self.pool_index.insert(key, index);
        Ok(index)
    }

    /// Interns a string constant.
    pub fn add_str(&mut self, text: &str) -> Result<u32, CompileError> {
        self.add_const(Constant::Str(text.into()))
    }

    /// Records entry into a FOREACH body.
    pub fn enter_loop(&mut self) {
        self.loop_depth += 1;
        self.max_loop_depth = self.max_loop_depth.max(self.loop_depth);
    }

    /// Records exit from a FOREACH body.
    pub fn exit_loop(&mut self) {
        self.loop_depth = self.loop_depth.saturating_sub(1);
    }

    /// Finalizes the program.
    #[must_use]
    pub fn build(self, source: Source) -> Program {
        Program {
            instructions: self.instructions,
            pool: self.pool,
            lines: self.lines,
            source,
            register_count: self.register_count as usize,
            loop_depth: self.max_loop_depth,
            output_hint: AtomicUsize::new(0),
        }
    }
}

/// Narrows an index to operand width.
fn operand(value: usize, what: &'static str) -> Result<u32, CompileError> {
    u32::try_from(value).map_err(|_| CompileError::TooLarge { what })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_jump_patches_target() {
        let mut builder = ProgramBuilder::new();
        let r = builder.reserve_register().unwrap();
        builder.emit(Opcode::LoadTrue, r, 0);
        let jump = builder.emit_lazy(Opcode::JumpIfFalse, r);
        builder.emit(Opcode::LoadNull, r, 0);
        builder.patch_here(jump).unwrap();
        builder.emit(Opcode::Return, 0, 0);
        let program = builder.build(Source::Anonymous);
        assert_eq!(
            program.instructions()[1],
            Instruction {
                op: Opcode::JumpIfFalse,
                a: r,
                b: 3
            }
        );
        program.validate().unwrap();
    }

    #[test]
    fn unconditional_jump_target_in_a() {
        let mut builder = ProgramBuilder::new();
        let jump = builder.emit_lazy(Opcode::Jump, 99);
        builder.emit(Opcode::LoopPop, 0, 0);
        builder.patch_here(jump).unwrap();
        assert_eq!(builder.instructions[0], Instruction { op: Opcode::Jump, a: 2, b: 0 });
    }

    #[test]
    fn constants_are_deduplicated() {
        let mut builder = ProgramBuilder::new();
        let a = builder.add_str("hello").unwrap();
        let b = builder.add_const(Constant::Int(5)).unwrap();
        let c = builder.add_str("hello").unwrap();
        let d = builder.add_const(Constant::Float(5.0)).unwrap();
        assert_eq!(a, c);
        assert_ne!(b, d);
        assert_eq!(builder.pool.len(), 3);
    }

    #[test]
    fn line_table_tracks_each_instruction() {
        let mut builder = ProgramBuilder::new();
        builder.set_line(1);
        builder.emit(Opcode::AppendRaw, 0, 0);
        builder.set_line(4);
        builder.emit(Opcode::Return, 0, 0);
        assert_eq!(builder.lines, vec![1, 4]);
    }

    #[test]
    fn registers_and_loop_depth_are_peaks() {
        let mut builder = ProgramBuilder::new();
        assert_eq!(builder.reserve_register().unwrap(), 0);
        assert_eq!(builder.reserve_run(3).unwrap(), 1);
        assert_eq!(builder.reserve_run(0).unwrap(), 4);
        builder.enter_loop();
        builder.enter_loop();
        builder.exit_loop();
        builder.enter_loop();
        builder.exit_loop();
        builder.exit_loop();
        builder.emit(Opcode::Return, 0, 0);
        let program = builder.build(Source::Anonymous);
        assert_eq!(program.register_count(), 5);
        assert_eq!(program.loop_depth(), 2);
    }
}
