//! The compiled template artifact.

use std::{
    fmt::{self, Write as _},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use serde::{Deserialize, Serialize};

use super::op::{Opcode, Operand};
use crate::{error::LoadError, source::Source, value::Value};

/// One fixed-width instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub a: u32,
    pub b: u32,
}

/// A constant pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Str(Arc<str>),
    Int(i64),
    Float(f64),
}

impl Constant {
    /// Runtime value of this constant; strings share the pooled allocation.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Str(s) => Value::Str(Arc::clone(s)),
            Self::Int(i) => Value::Int(*i),
            Self::Float(v) => Value::Float(*v),
        }
    }

    /// The string payload, if this is a string constant.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(ryu::Buffer::new().format(*v)),
        }
    }
}

/// A compiled template.
///
/// Immutable once built, apart from the output size hint which the VM updates
/// after each run to preallocate the next output buffer. Concurrent renders
/// may overwrite each other's hint; that only affects buffer sizing.
#[derive(Debug, Serialize, Deserialize)]
pub struct Program {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) pool: Vec<Constant>,
    pub(crate) lines: Vec<u32>,
    pub(crate) source: Source,
    pub(crate) register_count: usize,
    pub(crate) loop_depth: usize,
    #[serde(skip)]
    pub(crate) output_hint: AtomicUsize,
}

impl Program {
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[must_use]
    pub fn pool(&self) -> &[Constant] {
        &self.pool
    }

    /// Source line per instruction.
    #[must_use]
    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    /// Source line of instruction `pc`, or 0 if out of range.
    #[must_use]
    pub fn line_at(&self, pc: usize) -> u32 {
        self.lines.get(pc).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn source(&self) -> &Source {
        &self.source
    }

    #[must_use]
    pub fn register_count(&self) -> usize {
        self.register_count
    }

    /// Maximum FOREACH nesting, i.e. the loop stack size a VM needs.
    #[must_use]
    pub fn loop_depth(&self) -> usize {
        self.loop_depth
    }

    /// Length of the most recent output rendered from this program.
    #[must_use]
    pub fn output_hint(&self) -> usize {
        self.output_hint.load(Ordering::Relaxed)
    }

    pub(crate) fn set_output_hint(&self, len: usize) {
        self.output_hint.store(len, Ordering::Relaxed);
    }

    /// Checks the structural invariants: one line per instruction, pool and
    /// register operands in range, jump targets within the program, and a
    /// trailing `RETURN`.
    pub fn validate(&self) -> Result<(), String> {
        if self.instructions.len() != self.lines.len() {
            return Err(format!(
                "line table has {} entries for {} instructions",
                self.lines.len(),
                self.instructions.len()
            ));
        }
        if self.instructions.last().map(|i| i.op) != Some(Opcode::Return) {
            return Err("program does not end with RETURN".to_owned());
        }
        for (pc, ins) in self.instructions.iter().enumerate() {
            let (kind_a, kind_b) = ins.op.operands();
            for (kind, value) in [(kind_a, ins.a), (kind_b, ins.b)] {
                self.check_operand(kind, value)
                    .map_err(|msg| format!("{pc:06} {}: {msg}", ins.op))?;
            }
            let extent = ins.op.run_extent(ins.b);
            if extent > 0 {
                self.check_operand(Operand::Reg, ins.a.saturating_add(extent))
                    .map_err(|msg| format!("{pc:06} {}: {msg}", ins.op))?;
            }
        }
        Ok(())
    }

    fn check_operand(&self, kind: Operand, value: u32) -> Result<(), String> {
        let value = value as usize;
        match kind {
            Operand::Reg if value >= self.register_count => {
                Err(format!("register {value} out of range ({})", self.register_count))
            }
            Operand::Pool if value >= self.pool.len() => Err(format!("pool index {value} out of range")),
            Operand::Target if value > self.instructions.len() => Err(format!("jump target {value} out of range")),
            Operand::Unused if value != 0 => Err("unused operand is not zero".to_owned()),
            _ => Ok(()),
        }
    }

    /// Serializes the program with postcard. The output hint is not stored.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Restores a program written by [`to_bytes`](Self::to_bytes) and validates it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let program: Self = postcard::from_bytes(bytes).map_err(|e| LoadError::Decode { message: e.to_string() })?;
        program.validate().map_err(|message| LoadError::Decode { message })?;
        Ok(program)
    }

    /// Human-readable listing, one line per instruction followed by the pool.
    ///
    /// `current` marks one instruction with `*`, typically the faulting pc.
    #[must_use]
    pub fn disassemble(&self, current: Option<usize>) -> String {
        let mut out = String::new();
        for (pc, ins) in self.instructions.iter().enumerate() {
            let marker = if current == Some(pc) { '*' } else { ' ' };
            let op = ins.op.to_string();
            let comment = self.comment(pc, ins);
            // writing to a String cannot fail
            let _ = writeln!(out, "  {marker} {pc:06} {op:<15} {:<4},{:<4} {comment}", ins.a, ins.b);
        }
        out.push_str("Pool:\n");
        for (i, constant) in self.pool.iter().enumerate() {
            let _ = writeln!(out, "  {i:04} {constant}");
        }
        out
    }

    fn comment(&self, pc: usize, ins: &Instruction) -> String {
        let (kind_a, kind_b) = ins.op.operands();
        let describe = |kind: Operand, value: u32| match kind {
            Operand::Pool => self
                .pool
                .get(value as usize)
                .map_or_else(|| "<bad pool index>".to_owned(), ToString::to_string),
            Operand::Reg => format!("r{value}"),
            Operand::Target => format!("-> {value:06}"),
            Operand::Imm => value.to_string(),
            Operand::Unused => String::new(),
        };
        let parts: Vec<String> = [describe(kind_a, ins.a), describe(kind_b, ins.b)]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        format!("line {:<4} {}", self.line_at(pc), parts.join(" "))
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.disassemble(None))
    }
}
