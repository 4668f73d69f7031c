//! Register virtual machine executing compiled templates.
//!
//! One [`Vm`] renders one [`Program`] against one variable environment. The
//! register file and loop stack are sized from the program before execution
//! starts and never grow. INCLUDE and WRAPPER construct a nested `Vm` on the
//! native call stack; the nesting depth is bounded by
//! [`RenderLimits::max_include_depth`].

mod attr;
mod binary;
mod call;
mod collections;
mod compare;

use std::sync::Arc;

use super::{
    op::Opcode,
    program::{Constant, Instruction, Program},
};
use crate::{
    error::{Fault, RenderError},
    escape::Escaper,
    function::FunctionRegistry,
    limits::RenderLimits,
    loader::Loader,
    tracer::VmTracer,
    value::{Value, Vars},
    warning::WarningSink,
};

/// Collaborators shared by a render and every template it includes.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub escaper: &'a dyn Escaper,
    pub loader: &'a dyn Loader,
    pub functions: &'a FunctionRegistry,
    pub warnings: &'a dyn WarningSink,
    pub limits: &'a RenderLimits,
}

/// Runtime state of one active FOREACH.
#[derive(Debug)]
struct LoopRecord {
    items: Arc<Vec<Value>>,
    /// 0-based position of the current item.
    index: usize,
}

/// Executes one program.
///
/// ```ignore
/// let ctx = Context { escaper: &HtmlEscaper, loader: &NullLoader, functions: &registry,
///                     warnings: &StderrWarnings, limits: &RenderLimits::default() };
/// let output = Vm::new(ctx, program, &mut vars, &mut NoopTracer, 0).run()?;
/// ```
#[derive(Debug)]
pub struct Vm<'a, Tr: VmTracer> {
    ctx: Context<'a>,
    program: Arc<Program>,
    vars: &'a mut Vars,
    tracer: &'a mut Tr,
    /// Include nesting of this render, 0 for the top-level template.
    depth: usize,
    pc: usize,
    registers: Vec<Value>,
    loops: Vec<LoopRecord>,
    output: String,
}

impl<'a, Tr: VmTracer> Vm<'a, Tr> {
    #[must_use]
    pub fn new(ctx: Context<'a>, program: Arc<Program>, vars: &'a mut Vars, tracer: &'a mut Tr, depth: usize) -> Self {
        let registers = vec![Value::Null; program.register_count()];
        let loops = Vec::with_capacity(program.loop_depth());
        let output = String::with_capacity(program.output_hint());
        Self {
            ctx,
            program,
            vars,
            tracer,
            depth,
            pc: 0,
            registers,
            loops,
            output,
        }
    }

    /// Runs the program to its `RETURN` and yields the output.
    ///
    /// # Errors
    /// Any fatal runtime error, carrying the program and the faulting pc.
    pub fn run(mut self) -> Result<String, RenderError> {
        let name = self.program.source().name();
        self.tracer.on_enter(&name, self.depth);
        let result = self.execute();
        self.tracer.on_leave(self.depth);
        match result {
            Ok(()) => {
                self.program.set_output_hint(self.output.len());
                Ok(self.output)
            }
            Err(fault) => Err(RenderError::from_fault(fault, self.program, self.pc)),
        }
    }

    fn execute(&mut self) -> Result<(), Fault> {
        loop {
            let Some(&Instruction { op, a, b }) = self.program.instructions().get(self.pc) else {
                return Err(Fault::internal(format!("pc {} past end of program", self.pc)));
            };
            self.tracer.on_instruction(self.pc, op, self.loops.len());
            let mut next = self.pc + 1;

            match op {
                // ============================================================
                // Loads and stores
                // ============================================================
                Opcode::LoadConst => {
                    let value = self.constant(b)?.to_value();
                    self.set(a, value)?;
                }
                Opcode::LoadInt => self.set(a, Value::Int(i64::from(b)))?,
                Opcode::LoadTrue => self.set(a, Value::Bool(true))?,
                Opcode::LoadFalse => self.set(a, Value::Bool(false))?,
                Opcode::LoadNull => self.set(a, Value::Null)?,
                Opcode::LoadVar => {
                    let name = self.pool_str(b)?;
                    let value = self.vars.get(&*name).cloned().unwrap_or_default();
                    self.set(a, value)?;
                }
                Opcode::SetVar => {
                    let name = self.pool_str(a)?;
                    let value = self.reg(b)?.clone();
                    self.vars.insert(name.to_string(), value);
                }
                Opcode::Move => {
                    let value = self.reg(b)?.clone();
                    self.set(a, value)?;
                }

                // ============================================================
                // Output
                // ============================================================
                Opcode::AppendRaw => {
                    let text = self.pool_str(a)?;
                    self.output.push_str(&text);
                }
                Opcode::Append => {
                    let value = self.reg(a)?.clone();
                    self.append(&value);
                }

                // ============================================================
                // Operators
                // ============================================================
                Opcode::Add | Opcode::Subtract | Opcode::Multiply | Opcode::Divide | Opcode::Modulo => {
                    let value = binary::arithmetic(op, self.reg(a)?, self.reg(b)?)?;
                    self.set(a, value)?;
                }
                Opcode::Concat => self.concat(a, b)?,
                Opcode::Equals | Opcode::Match => {
                    let equal = self.reg(a)? == self.reg(b)?;
                    self.set(a, Value::Bool(equal))?;
                }
                Opcode::NotEquals => {
                    let equal = self.reg(a)? == self.reg(b)?;
                    self.set(a, Value::Bool(!equal))?;
                }
                Opcode::Gt | Opcode::Ge | Opcode::Lt | Opcode::Le => {
                    let value = compare::ordering(op, self.reg(a)?, self.reg(b)?)?;
                    self.set(a, Value::Bool(value))?;
                }
                Opcode::Not => {
                    let truthy = self.reg(a)?.is_truthy();
                    self.set(a, Value::Bool(!truthy))?;
                }

                // ============================================================
                // Containers
                // ============================================================
                Opcode::MakeArray => self.make_array(a, b)?,
                Opcode::MakeMap => self.make_map(a, b)?,
                Opcode::MakeRange => {
                    let value = collections::range(self.reg(a)?, self.reg(b)?)?;
                    self.set(a, value)?;
                }
                Opcode::GetAttr => self.get_attr(a, b)?,

                // ============================================================
                // Control flow
                // ============================================================
                Opcode::Jump => next = a as usize,
                Opcode::JumpIfFalse => {
                    if !self.reg(a)?.is_truthy() {
                        next = b as usize;
                    }
                }
                Opcode::JumpIfTrue => {
                    if self.reg(a)?.is_truthy() {
                        next = b as usize;
                    }
                }
                Opcode::IterStart => {
                    if !self.iter_start(a)? {
                        next = b as usize;
                    }
                }
                Opcode::IterNext => {
                    if self.iter_next(a)? {
                        next = b as usize;
                    }
                }
                Opcode::LoopPop => {
                    let depth = self.loops.len();
                    self.loops
                        .pop()
                        .ok_or_else(|| Fault::internal("LOOP_POP with an empty loop stack"))?;
                    self.tracer.on_loop_pop(depth);
                }
                Opcode::LoopCount | Opcode::LoopIndex | Opcode::LoopHasNext => {
                    let value = self.loop_info(op)?;
                    self.set(a, value)?;
                }
                Opcode::Return => return Ok(()),

                // ============================================================
                // Sub-templates
                // ============================================================
                Opcode::Include | Opcode::IncludeWith => {
                    let output = self.include(a, (op == Opcode::IncludeWith).then_some(b))?;
                    let value = if self.ctx.limits.raw_includes {
                        Value::raw(output)
                    } else {
                        Value::from(output)
                    };
                    self.set(a, value)?;
                }
                Opcode::MarkOutput => {
                    let mark = i64::try_from(self.output.len())
                        .map_err(|_| Fault::internal("output too large to mark"))?;
                    self.set(a, Value::Int(mark))?;
                }
                Opcode::Wrap => self.wrap(a, b)?,

                // ============================================================
                // Calls
                // ============================================================
                Opcode::Funcall => self.funcall(a, b)?,
                Opcode::MethodCall => self.method_call(a, b)?,
                Opcode::Lc | Opcode::Uc | Opcode::UriEscape => self.text_builtin(op, a)?,
                Opcode::Sprintf => self.sprintf(a, b)?,
            }

            self.pc = next;
        }
    }

    #[inline]
    fn reg(&self, r: u32) -> Result<&Value, Fault> {
        self.registers
            .get(r as usize)
            .ok_or_else(|| Fault::internal(format!("register {r} out of range")))
    }

    #[inline]
    fn set(&mut self, r: u32, value: Value) -> Result<(), Fault> {
        let slot = self
            .registers
            .get_mut(r as usize)
            .ok_or_else(|| Fault::internal(format!("register {r} out of range")))?;
        *slot = value;
        Ok(())
    }

    /// The `count` registers starting at `first`.
    fn reg_run(&self, first: u32, count: u32) -> Result<&[Value], Fault> {
        let start = first as usize;
        self.registers
            .get(start..start + count as usize)
            .ok_or_else(|| Fault::internal(format!("register run {first}+{count} out of range")))
    }

    fn constant(&self, index: u32) -> Result<&Constant, Fault> {
        self.program
            .pool()
            .get(index as usize)
            .ok_or_else(|| Fault::internal(format!("pool index {index} out of range")))
    }

    /// A string constant; the `Arc` keeps it alive across mutable VM calls.
    fn pool_str(&self, index: u32) -> Result<Arc<str>, Fault> {
        match self.constant(index)? {
            Constant::Str(s) => Ok(Arc::clone(s)),
            other => Err(Fault::internal(format!("pool entry {index} is {other}, expected a string"))),
        }
    }

    /// Reports a recoverable problem at the current pc.
    fn warn(&mut self, message: &str) {
        self.ctx.warnings.notify(message, self.pc, &self.program);
        self.tracer.on_warning(message);
    }

    /// Raw values verbatim, null as the placeholder with a warning,
    /// anything else through the escaper.
    fn append(&mut self, value: &Value) {
        match value {
            Value::Null => {
                self.warn("Appending null");
                self.output.push_str(&self.ctx.limits.null_placeholder);
            }
            Value::Raw(text) => self.output.push_str(text),
            other => {
                let text = other.to_text();
                let escaped = self.ctx.escaper.escape(&text);
                self.output.push_str(&escaped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        CollectWarnings, HtmlEscaper, NullLoader, RecordingTracer, TraceEvent,
        bytecode::compile,
        node::{Node, Tag},
        source::Source,
    };

    fn render_with(tree: &Node, vars: &mut Vars, warnings: &CollectWarnings) -> Result<String, RenderError> {
        let program = Arc::new(compile(tree, Source::Anonymous).unwrap());
        let functions = FunctionRegistry::new();
        let limits = RenderLimits::default();
        let ctx = Context {
            escaper: &HtmlEscaper,
            loader: &NullLoader,
            functions: &functions,
            warnings,
            limits: &limits,
        };
        let mut tracer = crate::NoopTracer;
        Vm::new(ctx, program, vars, &mut tracer, 0).run()
    }

    fn render(tree: &Node) -> String {
        render_with(tree, &mut Vars::new(), &CollectWarnings::new()).unwrap()
    }

    #[test]
    fn registers_are_sized_from_program() {
        let program = Arc::new(compile(&Node::expression(Node::int(1)), Source::Anonymous).unwrap());
        let functions = FunctionRegistry::new();
        let limits = RenderLimits::default();
        let warnings = CollectWarnings::new();
        let ctx = Context {
            escaper: &HtmlEscaper,
            loader: &NullLoader,
            functions: &functions,
            warnings: &warnings,
            limits: &limits,
        };
        let mut vars = Vars::new();
        let mut tracer = crate::NoopTracer;
        let vm = Vm::new(ctx, Arc::clone(&program), &mut vars, &mut tracer, 0);
        assert_eq!(vm.registers.len(), program.register_count());
        assert_eq!(vm.loops.capacity(), program.loop_depth());
    }

    #[test]
    fn output_hint_follows_last_render() {
        let program = Arc::new(compile(&Node::template(vec![Node::raw_text("hello")]), Source::Anonymous).unwrap());
        assert_eq!(program.output_hint(), 0);
        let functions = FunctionRegistry::new();
        let limits = RenderLimits::default();
        let warnings = CollectWarnings::new();
        let ctx = Context {
            escaper: &HtmlEscaper,
            loader: &NullLoader,
            functions: &functions,
            warnings: &warnings,
            limits: &limits,
        };
        let mut vars = Vars::new();
        let mut tracer = crate::NoopTracer;
        let out = Vm::new(ctx, Arc::clone(&program), &mut vars, &mut tracer, 0).run().unwrap();
        assert_eq!(out, "hello");
        assert_eq!(program.output_hint(), 5);
    }

    #[test]
    fn null_appends_placeholder_and_warns() {
        let warnings = CollectWarnings::new();
        let out = render_with(&Node::expression(Node::ident("missing")), &mut Vars::new(), &warnings).unwrap();
        assert_eq!(out, "(null)");
        assert_eq!(warnings.messages(), vec!["Appending null".to_owned()]);
    }

    #[test]
    fn set_writes_the_environment() {
        let mut vars = Vars::new();
        let tree = Node::template(vec![
            Node::expression(Node::set("x", Node::int(5))),
            Node::expression(Node::ident("x")),
        ]);
        let out = render_with(&tree, &mut vars, &CollectWarnings::new()).unwrap();
        assert_eq!(out, "5");
        assert_eq!(vars.get("x"), Some(&Value::Int(5)));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let tree = Node::template(vec![
            Node::expression(Node::binary(Tag::OrOr, Node::int(0), Node::string("b"))),
            Node::expression(Node::binary(Tag::AndAnd, Node::bool(false), Node::string("b"))),
            Node::expression(Node::binary(Tag::OrOr, Node::null(), Node::string("c"))),
            Node::expression(Node::not(Node::null())),
        ]);
        assert_eq!(render(&tree), "0falsectrue");
    }

    #[test]
    fn tracer_sees_enter_instructions_and_leave() {
        let program = Arc::new(compile(&Node::template(vec![Node::raw_text("a")]), Source::Anonymous).unwrap());
        let functions = FunctionRegistry::new();
        let limits = RenderLimits::default();
        let warnings = CollectWarnings::new();
        let ctx = Context {
            escaper: &HtmlEscaper,
            loader: &NullLoader,
            functions: &functions,
            warnings: &warnings,
            limits: &limits,
        };
        let mut vars = Vars::new();
        let mut tracer = RecordingTracer::new();
        Vm::new(ctx, program, &mut vars, &mut tracer, 0).run().unwrap();
        assert_eq!(
            tracer.events(),
            &[
                TraceEvent::Enter {
                    name: "-".to_owned(),
                    depth: 0
                },
                TraceEvent::Instruction {
                    pc: 0,
                    opcode: Opcode::AppendRaw,
                    loop_depth: 0
                },
                TraceEvent::Instruction {
                    pc: 1,
                    opcode: Opcode::Return,
                    loop_depth: 0
                },
                TraceEvent::Leave { depth: 0 },
            ]
        );
    }
}
