//! Syntax tree to bytecode.
//!
//! A single recursive walk over the tree. Every node is compiled with a
//! destination: `Some(reg)` when its value is needed, `None` when it is
//! discarded. Side-effect-free nodes (literals, variables, container
//! literals) reject a discarded destination.
//!
//! Registers come from a monotonically increasing counter and are never
//! reused, so a sibling computation can never clobber a live value.

use smallvec::SmallVec;

use super::{
    builder::{PatchLabel, ProgramBuilder},
    op::Opcode,
    program::{Constant, Program},
};
use crate::{
    error::CompileError,
    node::{Node, Tag},
    source::Source,
};

type Dest = Option<u32>;

/// Compiles a syntax tree into a program.
///
/// Compilation is deterministic: equal trees produce identical instruction
/// and constant sequences.
pub fn compile(tree: &Node, source: Source) -> Result<Program, CompileError> {
    let mut compiler = Compiler::default();
    compiler.compile_node(tree, None)?;
    compiler.builder.emit(Opcode::Return, 0, 0);
    Ok(compiler.builder.build(source))
}

/// Pending LAST/NEXT jumps of one enclosing loop.
#[derive(Debug, Default)]
struct LoopPatches {
    last: SmallVec<[PatchLabel; 2]>,
    next: SmallVec<[PatchLabel; 2]>,
}

#[derive(Debug, Default)]
struct Compiler {
    builder: ProgramBuilder,
    /// FOREACH variables in scope and the registers holding them, innermost last.
    locals: Vec<(String, u32)>,
    /// Enclosing FOREACH/WHILE loops, innermost last.
    loops: Vec<LoopPatches>,
}

impl Compiler {
    fn compile_node(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        match node.tag {
            Tag::Template => {
                expect_void(node, dest)?;
                for child in &node.children {
                    self.compile_node(child, None)?;
                }
                Ok(())
            }
            Tag::RawString => {
                expect_void(node, dest)?;
                let text = self.builder.add_str(node.text())?;
                self.emit(node, Opcode::AppendRaw, text, 0);
                Ok(())
            }
            Tag::Expression => self.compile_expression(node, dest),
            Tag::Integer => self.compile_integer(node, dest),
            Tag::Double => {
                let d = value_dest(node, dest)?;
                let value: f64 = node
                    .text()
                    .parse()
                    .map_err(|_| unsupported(node, format!("invalid double literal '{}'", node.text())))?;
                let index = self.builder.add_const(Constant::Float(value))?;
                self.emit(node, Opcode::LoadConst, d, index);
                Ok(())
            }
            Tag::String => {
                let d = value_dest(node, dest)?;
                let index = self.builder.add_str(node.text())?;
                self.emit(node, Opcode::LoadConst, d, index);
                Ok(())
            }
            Tag::True | Tag::False | Tag::Null => {
                let d = value_dest(node, dest)?;
                let op = match node.tag {
                    Tag::True => Opcode::LoadTrue,
                    Tag::False => Opcode::LoadFalse,
                    _ => Opcode::LoadNull,
                };
                self.emit(node, op, d, 0);
                Ok(())
            }
            Tag::Ident | Tag::DollarVar => {
                let d = value_dest(node, dest)?;
                self.load_variable(node, d)
            }
            Tag::Add => self.compile_binary(node, Opcode::Add, dest),
            Tag::Subtract => self.compile_binary(node, Opcode::Subtract, dest),
            Tag::Multiply => self.compile_binary(node, Opcode::Multiply, dest),
            Tag::Divide => self.compile_binary(node, Opcode::Divide, dest),
            Tag::Modulo => self.compile_binary(node, Opcode::Modulo, dest),
            Tag::Concat => self.compile_binary(node, Opcode::Concat, dest),
            Tag::Equals => self.compile_binary(node, Opcode::Equals, dest),
            Tag::NotEquals => self.compile_binary(node, Opcode::NotEquals, dest),
            Tag::Gt => self.compile_binary(node, Opcode::Gt, dest),
            Tag::Ge => self.compile_binary(node, Opcode::Ge, dest),
            Tag::Lt => self.compile_binary(node, Opcode::Lt, dest),
            Tag::Le => self.compile_binary(node, Opcode::Le, dest),
            Tag::Range => self.compile_binary(node, Opcode::MakeRange, dest),
            Tag::Attribute => self.compile_binary(node, Opcode::GetAttr, dest),
            Tag::AndAnd => self.compile_logical(node, Opcode::JumpIfFalse, dest),
            Tag::OrOr => self.compile_logical(node, Opcode::JumpIfTrue, dest),
            Tag::Not => {
                let d = self.scratch(dest)?;
                self.compile_node(child(node, 0)?, Some(d))?;
                self.emit(node, Opcode::Not, d, 0);
                Ok(())
            }
            Tag::Array => self.compile_array(node, dest),
            Tag::Map => self.compile_map(node, dest),
            Tag::FunCall => self.compile_call(node, dest),
            Tag::Set => self.compile_set(node, dest),
            Tag::If => self.compile_if(node, dest),
            Tag::Switch => self.compile_switch(node, dest),
            Tag::Foreach => self.compile_foreach(node, dest),
            Tag::While => self.compile_while(node, dest),
            Tag::Last | Tag::Next => self.compile_loop_jump(node, dest),
            Tag::Include => self.compile_include(node, dest),
            Tag::Wrapper => self.compile_wrapper(node, dest),
            Tag::LoopCount | Tag::LoopIndex | Tag::LoopHasNext => {
                let d = value_dest(node, dest)?;
                let op = match node.tag {
                    Tag::LoopCount => Opcode::LoopCount,
                    Tag::LoopIndex => Opcode::LoopIndex,
                    _ => Opcode::LoopHasNext,
                };
                self.emit(node, op, d, 0);
                Ok(())
            }
            Tag::Case => Err(unsupported(node, "CASE outside of SWITCH")),
        }
    }

    /// `[% expr %]`: evaluates and appends, except for assignments.
    fn compile_expression(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        expect_void(node, dest)?;
        let value = child(node, 0)?;
        if value.tag == Tag::Set {
            return self.compile_node(value, None);
        }
        let r = self.builder.reserve_register()?;
        self.compile_node(value, Some(r))?;
        self.emit(node, Opcode::Append, r, 0);
        Ok(())
    }

    fn compile_integer(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        let d = value_dest(node, dest)?;
        let value: i64 = node
            .text()
            .parse()
            .map_err(|_| unsupported(node, format!("invalid integer literal '{}'", node.text())))?;
        match u32::try_from(value) {
            Ok(small) => self.emit(node, Opcode::LoadInt, d, small),
            Err(_) => {
                let index = self.builder.add_const(Constant::Int(value))?;
                self.emit(node, Opcode::LoadConst, d, index)
            }
        };
        Ok(())
    }

    /// Loop variables shadow the variable environment.
    fn load_variable(&mut self, node: &Node, d: u32) -> Result<(), CompileError> {
        let name = node.text();
        if let Some(&(_, slot)) = self.locals.iter().rev().find(|(local, _)| local == name) {
            self.emit(node, Opcode::Move, d, slot);
        } else {
            let index = self.builder.add_str(name)?;
            self.emit(node, Opcode::LoadVar, d, index);
        }
        Ok(())
    }

    /// Left operand into the destination, right operand into a fresh
    /// register, result back into the destination.
    fn compile_binary(&mut self, node: &Node, op: Opcode, dest: Dest) -> Result<(), CompileError> {
        let d = self.scratch(dest)?;
        self.compile_node(child(node, 0)?, Some(d))?;
        let rhs = self.builder.reserve_register()?;
        self.compile_node(child(node, 1)?, Some(rhs))?;
        self.emit(node, op, d, rhs);
        Ok(())
    }

    /// `&&` and `||` short-circuit and yield the last operand evaluated.
    fn compile_logical(&mut self, node: &Node, jump: Opcode, dest: Dest) -> Result<(), CompileError> {
        let d = self.scratch(dest)?;
        self.compile_node(child(node, 0)?, Some(d))?;
        let skip = self.emit_lazy(node, jump, d);
        self.compile_node(child(node, 1)?, Some(d))?;
        self.builder.patch_here(skip)
    }

    fn compile_array(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        let d = value_dest(node, dest)?;
        let base = self.builder.reserve_run(node.children.len())?;
        for (reg, item) in (base..).zip(&node.children) {
            self.compile_node(item, Some(reg))?;
        }
        let count = count_operand(node.children.len())?;
        self.emit(node, Opcode::MakeArray, base, count);
        self.emit(node, Opcode::Move, d, base);
        Ok(())
    }

    fn compile_map(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        let d = value_dest(node, dest)?;
        if node.children.len() % 2 != 0 {
            return Err(unsupported(node, "map literal needs key/value pairs"));
        }
        let base = self.builder.reserve_run(node.children.len())?;
        self.compile_pairs(&node.children, base)?;
        let pairs = count_operand(node.children.len() / 2)?;
        self.emit(node, Opcode::MakeMap, base, pairs);
        self.emit(node, Opcode::Move, d, base);
        Ok(())
    }

    /// Key/value pairs into consecutive registers; bare identifier keys are names.
    fn compile_pairs(&mut self, children: &[Node], base: u32) -> Result<(), CompileError> {
        for (reg, pair) in (base..).step_by(2).zip(children.chunks(2)) {
            let key = &pair[0];
            if key.tag == Tag::Ident {
                let index = self.builder.add_str(key.text())?;
                self.emit(key, Opcode::LoadConst, reg, index);
            } else {
                self.compile_node(key, Some(reg))?;
            }
            if let Some(value) = pair.get(1) {
                self.compile_node(value, Some(reg + 1))?;
            }
        }
        Ok(())
    }

    fn compile_call(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        let callee = child(node, 0)?;
        let args = &node.children[1..];
        match callee.tag {
            Tag::Ident => match callee.text() {
                name @ ("lc" | "uc" | "uri" | "url") => {
                    if args.len() != 1 {
                        return Err(arity(callee, name, "1", args.len()));
                    }
                    let op = match name {
                        "lc" => Opcode::Lc,
                        "uc" => Opcode::Uc,
                        _ => Opcode::UriEscape,
                    };
                    let d = self.scratch(dest)?;
                    self.compile_node(&args[0], Some(d))?;
                    self.emit(callee, op, d, 0);
                    Ok(())
                }
                "sprintf" => {
                    if args.is_empty() {
                        return Err(arity(callee, "sprintf", "at least 1", 0));
                    }
                    let base = self.builder.reserve_run(args.len())?;
                    for (reg, arg) in (base..).zip(args) {
                        self.compile_node(arg, Some(reg))?;
                    }
                    let count = count_operand(args.len() - 1)?;
                    self.emit(callee, Opcode::Sprintf, base, count);
                    self.move_result(node, dest, base);
                    Ok(())
                }
                name => {
                    let base = self.builder.reserve_run(args.len() + 1)?;
                    let index = self.builder.add_str(name)?;
                    self.emit(callee, Opcode::LoadConst, base, index);
                    for (reg, arg) in (base + 1..).zip(args) {
                        self.compile_node(arg, Some(reg))?;
                    }
                    let count = count_operand(args.len())?;
                    self.emit(node, Opcode::Funcall, base, count);
                    self.move_result(node, dest, base);
                    Ok(())
                }
            },
            Tag::Attribute => {
                let object = child(callee, 0)?;
                let method = child(callee, 1)?;
                if !matches!(method.tag, Tag::String | Tag::Ident) {
                    return Err(unsupported(callee, "method name must be a plain name"));
                }
                let base = self.builder.reserve_run(args.len() + 2)?;
                self.compile_node(object, Some(base))?;
                let index = self.builder.add_str(method.text())?;
                self.emit(method, Opcode::LoadConst, base + 1, index);
                for (reg, arg) in (base + 2..).zip(args) {
                    self.compile_node(arg, Some(reg))?;
                }
                let count = count_operand(args.len())?;
                self.emit(node, Opcode::MethodCall, base, count);
                self.move_result(node, dest, base);
                Ok(())
            }
            _ => Err(unsupported(node, format!("cannot call a '{}' node", callee.tag))),
        }
    }

    fn move_result(&mut self, node: &Node, dest: Dest, base: u32) {
        if let Some(d) = dest {
            self.emit(node, Opcode::Move, d, base);
        }
    }

    /// `SET name = value` writes the variable environment; in value context
    /// the value also lands in the destination.
    fn compile_set(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        let target = child(node, 0)?;
        let r = self.scratch(dest)?;
        self.compile_node(child(node, 1)?, Some(r))?;
        let name = self.builder.add_str(target.text())?;
        self.emit(node, Opcode::SetVar, name, r);
        Ok(())
    }

    /// Statement IF and the conditional operator share this path; in value
    /// context both branches write the destination.
    fn compile_if(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        let cond = self.builder.reserve_register()?;
        self.compile_node(child(node, 0)?, Some(cond))?;
        let skip_then = self.emit_lazy(node, Opcode::JumpIfFalse, cond);
        self.compile_node(child(node, 1)?, dest)?;
        match (node.children.get(2), dest) {
            (Some(otherwise), _) => {
                let skip_else = self.emit_lazy(node, Opcode::Jump, 0);
                self.builder.patch_here(skip_then)?;
                self.compile_node(otherwise, dest)?;
                self.builder.patch_here(skip_else)
            }
            (None, Some(d)) => {
                let skip_else = self.emit_lazy(node, Opcode::Jump, 0);
                self.builder.patch_here(skip_then)?;
                self.emit(node, Opcode::LoadNull, d, 0);
                self.builder.patch_here(skip_else)
            }
            (None, None) => self.builder.patch_here(skip_then),
        }
    }

    /// The subject is evaluated once; each CASE copies it into a scratch
    /// register, matches, and jumps to the common end after its body.
    fn compile_switch(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        expect_void(node, dest)?;
        let subject = self.builder.reserve_register()?;
        let test = self.builder.reserve_register()?;
        self.compile_node(child(node, 0)?, Some(subject))?;
        let mut to_end: SmallVec<[PatchLabel; 8]> = SmallVec::new();
        for case in &node.children[1..] {
            if case.tag != Tag::Case {
                return Err(unsupported(case, "SWITCH may only contain CASE arms"));
            }
            let body = match case.children.as_slice() {
                [cond, body] => {
                    let value = self.builder.reserve_register()?;
                    self.compile_node(cond, Some(value))?;
                    self.emit(case, Opcode::Move, test, subject);
                    self.emit(case, Opcode::Match, test, value);
                    body
                }
                [body] => {
                    self.emit(case, Opcode::LoadTrue, test, 0);
                    body
                }
                _ => return Err(unsupported(case, "CASE takes an optional condition and a body")),
            };
            let skip = self.emit_lazy(case, Opcode::JumpIfFalse, test);
            self.compile_node(body, None)?;
            to_end.push(self.emit_lazy(case, Opcode::Jump, 0));
            self.builder.patch_here(skip)?;
        }
        for label in to_end {
            self.builder.patch_here(label)?;
        }
        Ok(())
    }

    /// Layout:
    ///
    /// ```text
    ///       r <- source
    ///       ITER_START r, END
    /// BODY: body                 (loop variable lives in r)
    /// CONT: ITER_NEXT r, BODY    <- NEXT
    ///       LOOP_POP             <- LAST
    /// END:
    /// ```
    fn compile_foreach(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        expect_void(node, dest)?;
        let var = child(node, 0)?;
        let item = self.builder.reserve_register()?;
        self.compile_node(child(node, 1)?, Some(item))?;
        let start = self.emit_lazy(node, Opcode::IterStart, item);
        let body_pc = self.builder.current_offset();

        self.builder.enter_loop();
        self.locals.push((var.text().to_owned(), item));
        self.loops.push(LoopPatches::default());
        let body = self.compile_node(child(node, 2)?, None);
        let patches = self.loops.pop().unwrap_or_default();
        self.locals.pop();
        body?;

        for label in patches.next {
            self.builder.patch_here(label)?;
        }
        let again = self.emit_lazy(node, Opcode::IterNext, item);
        self.builder.patch_to(again, body_pc)?;
        for label in patches.last {
            self.builder.patch_here(label)?;
        }
        self.emit(node, Opcode::LoopPop, 0, 0);
        self.builder.exit_loop();
        self.builder.patch_here(start)
    }

    /// Layout:
    ///
    /// ```text
    /// HEAD: c <- cond            <- NEXT
    ///       JUMP_IF_FALSE c, END
    ///       body
    ///       JUMP HEAD
    /// END:                       <- LAST
    /// ```
    fn compile_while(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        expect_void(node, dest)?;
        let head = self.builder.current_offset();
        let cond = self.builder.reserve_register()?;
        self.compile_node(child(node, 0)?, Some(cond))?;
        let exit = self.emit_lazy(node, Opcode::JumpIfFalse, cond);

        self.loops.push(LoopPatches::default());
        let body = self.compile_node(child(node, 1)?, None);
        let patches = self.loops.pop().unwrap_or_default();
        body?;

        let back = self.emit_lazy(node, Opcode::Jump, 0);
        self.builder.patch_to(back, head)?;
        for label in patches.next {
            self.builder.patch_to(label, head)?;
        }
        self.builder.patch_here(exit)?;
        for label in patches.last {
            self.builder.patch_here(label)?;
        }
        Ok(())
    }

    fn compile_loop_jump(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        expect_void(node, dest)?;
        let label = self.emit_lazy(node, Opcode::Jump, 0);
        let Some(innermost) = self.loops.last_mut() else {
            return Err(unsupported(node, "LAST/NEXT outside of a loop"));
        };
        if node.tag == Tag::Last {
            innermost.last.push(label);
        } else {
            innermost.next.push(label);
        }
        Ok(())
    }

    /// `INCLUDE path [WITH name = value, ...]`, appended like any value.
    fn compile_include(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        expect_void(node, dest)?;
        let path = self.builder.reserve_register()?;
        self.compile_node(child(node, 0)?, Some(path))?;
        let bindings = &node.children[1..];
        if bindings.is_empty() {
            self.emit(node, Opcode::Include, path, 0);
        } else {
            if bindings.len() % 2 != 0 {
                return Err(unsupported(node, "INCLUDE WITH needs name/value pairs"));
            }
            let base = self.builder.reserve_run(bindings.len())?;
            self.compile_pairs(bindings, base)?;
            let pairs = count_operand(bindings.len() / 2)?;
            self.emit(node, Opcode::MakeMap, base, pairs);
            self.emit(node, Opcode::IncludeWith, path, base);
        }
        self.emit(node, Opcode::Append, path, 0);
        Ok(())
    }

    /// The body renders into the output first; WRAP then swaps it for the
    /// wrapper template rendered with `content` bound to the body text.
    fn compile_wrapper(&mut self, node: &Node, dest: Dest) -> Result<(), CompileError> {
        expect_void(node, dest)?;
        let mark = self.builder.reserve_register()?;
        self.emit(node, Opcode::MarkOutput, mark, 0);
        self.compile_node(child(node, 1)?, None)?;
        let path = self.builder.reserve_register()?;
        self.compile_node(child(node, 0)?, Some(path))?;
        self.emit(node, Opcode::Wrap, path, mark);
        Ok(())
    }

    fn scratch(&mut self, dest: Dest) -> Result<u32, CompileError> {
        match dest {
            Some(d) => Ok(d),
            None => self.builder.reserve_register(),
        }
    }

    fn emit(&mut self, node: &Node, op: Opcode, a: u32, b: u32) -> usize {
        self.builder.set_line(node.line);
        self.builder.emit(op, a, b)
    }

    fn emit_lazy(&mut self, node: &Node, op: Opcode, reg: u32) -> PatchLabel {
        self.builder.set_line(node.line);
        self.builder.emit_lazy(op, reg)
    }
}

fn child(node: &Node, index: usize) -> Result<&Node, CompileError> {
    node.children
        .get(index)
        .ok_or_else(|| unsupported(node, format!("missing child {index}")))
}

fn value_dest(node: &Node, dest: Dest) -> Result<u32, CompileError> {
    dest.ok_or(CompileError::VoidContext {
        tag: node.tag,
        line: node.line,
    })
}

fn expect_void(node: &Node, dest: Dest) -> Result<(), CompileError> {
    match dest {
        None => Ok(()),
        Some(_) => Err(unsupported(node, "statement used as a value")),
    }
}

fn unsupported(node: &Node, reason: impl Into<String>) -> CompileError {
    CompileError::Unsupported {
        tag: node.tag,
        reason: reason.into(),
        line: node.line,
    }
}

fn arity(callee: &Node, function: &str, expected: &'static str, found: usize) -> CompileError {
    CompileError::Arity {
        function: function.to_owned(),
        expected,
        found,
        line: callee.line,
    }
}

fn count_operand(count: usize) -> Result<u32, CompileError> {
    u32::try_from(count).map_err(|_| CompileError::TooLarge { what: "element count" })
}
