//! Bytecode compiler and virtual machine for text templates.
//!
//! A host parser turns template markup into a [`Node`] tree. [`compile`]
//! lowers the tree to a register-based [`Program`]; a [`Vm`] executes the
//! program against a variable environment and produces the rendered text.
//! [`Renderer`] wires the pieces together:
//!
//! ```
//! use slate::{Node, Renderer, Tag, Vars};
//!
//! let tree = Node::template(vec![
//!     Node::foreach(
//!         "i",
//!         Node::binary(Tag::Range, Node::int(1), Node::int(3)),
//!         Node::template(vec![Node::expression(Node::ident("i")), Node::raw_text(",")]),
//!     ),
//! ]);
//! assert_eq!(Renderer::new().render_tree(&tree, Vars::new()).unwrap(), "1,2,3,");
//! ```
//!
//! Sub-templates named by INCLUDE and WRAPPER are resolved through a
//! [`Loader`]; values a template must not escape are wrapped with
//! [`Value::raw`]; host data is exposed through [`HostObject`].

mod bytecode;
mod error;
mod escape;
mod format;
mod function;
mod host;
mod limits;
mod loader;
mod node;
mod render;
mod source;
pub mod tracer;
mod value;
mod warning;

pub use crate::{
    bytecode::{
        Constant, Context, Instruction, Opcode, Operand, PatchLabel, Program, ProgramBuilder, Vm, compile,
    },
    error::{CompileError, Error, ErrorKind, LoadError, RenderError},
    escape::{Escaper, HtmlEscaper, NullEscaper},
    function::{FunctionRegistry, NativeFn},
    host::{HostObject, TypeDescriptor, describe},
    limits::{DEFAULT_MAX_INCLUDE_DEPTH, DEFAULT_NULL_PLACEHOLDER, RenderLimits},
    loader::{CacheMode, FileLoader, JsonTreeParser, Loader, MemoryLoader, NullLoader, TemplateParser},
    node::{Node, Tag},
    render::Renderer,
    source::Source,
    tracer::{NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
    value::{Value, Vars},
    warning::{CollectWarnings, IgnoreWarnings, StderrWarnings, Warning, WarningSink},
};
