//! Bytecode compiler and virtual machine.
//!
//! - [`compiler`]: syntax tree to [`Program`]
//! - [`builder`]: instruction emission, constant interning, jump patching
//! - [`op`]: instruction set
//! - [`program`]: the compiled artifact
//! - [`vm`]: register machine executing a program

pub mod builder;
pub mod compiler;
pub mod op;
pub mod program;
pub mod vm;

pub use builder::{PatchLabel, ProgramBuilder};
pub use compiler::compile;
pub use op::{Opcode, Operand};
pub use program::{Constant, Instruction, Program};
pub use vm::{Context, Vm};
