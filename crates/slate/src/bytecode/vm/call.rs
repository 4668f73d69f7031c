//! Function calls, built-in text functions and sub-template rendering.

use std::sync::Arc;

use super::Vm;
use crate::{
    bytecode::{op::Opcode, program::Program},
    error::{ErrorKind, Fault},
    format,
    tracer::VmTracer,
    value::{Value, Vars},
};

impl<Tr: VmTracer> Vm<'_, Tr> {
    /// Calls the registered function named in register `a` with `count`
    /// arguments from `a+1`.
    ///
    /// An unknown name warns and yields null; a function error is fatal.
    pub(super) fn funcall(&mut self, a: u32, count: u32) -> Result<(), Fault> {
        let name = match self.reg(a)? {
            Value::Str(s) => Arc::clone(s),
            other => return Err(Fault::internal(format!("function name is {}", other.type_name()))),
        };
        let functions = self.ctx.functions;
        let Some(function) = functions.get(&name) else {
            self.warn(&format!("Unknown function: {name}"));
            return self.set(a, Value::Null);
        };
        let result =
            function(self.reg_run(a + 1, count)?).map_err(|msg| Fault::new(ErrorKind::Function, format!("{name}: {msg}")))?;
        self.set(a, result)
    }

    /// `lc`, `uc` and `uri`/`url` on register `a`, in place. Null stays null.
    pub(super) fn text_builtin(&mut self, op: Opcode, a: u32) -> Result<(), Fault> {
        let value = self.reg(a)?;
        if value.is_null() {
            return Ok(());
        }
        let text = value.to_text();
        let result = match op {
            Opcode::Lc => text.to_lowercase(),
            Opcode::Uc => text.to_uppercase(),
            _ => format::uri_escape(&text),
        };
        self.set(a, Value::from(result))
    }

    /// `a <- sprintf(a, a+1 ..= a+count)`.
    pub(super) fn sprintf(&mut self, a: u32, count: u32) -> Result<(), Fault> {
        let template = self.reg(a)?;
        if template.is_null() {
            return Err(Fault::type_error("sprintf: format is null"));
        }
        let text = format::sprintf(&template.to_text(), self.reg_run(a + 1, count)?).map_err(Fault::type_error)?;
        self.set(a, Value::from(text))
    }

    /// Renders the template named in register `path`, against the shared
    /// variables or, with `bindings`, against a copy extended by that map.
    pub(super) fn include(&mut self, path: u32, bindings: Option<u32>) -> Result<String, Fault> {
        let program = self.load(path)?;
        let Some(bindings) = bindings else {
            self.check_depth()?;
            return Vm::new(self.ctx, program, &mut *self.vars, &mut *self.tracer, self.depth + 1)
                .run()
                .map_err(Fault::from);
        };
        let Value::Map(extra) = self.reg(bindings)? else {
            return Err(Fault::internal("INCLUDE_WITH bindings are not a map"));
        };
        let mut scope = self.vars.clone();
        scope.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.render_scoped(program, scope)
    }

    /// Replaces the output written since the mark in register `mark` with the
    /// wrapper template named in register `path`, rendered with `content`
    /// bound to that output.
    pub(super) fn wrap(&mut self, path: u32, mark: u32) -> Result<(), Fault> {
        let start = match self.reg(mark)? {
            Value::Int(n) => usize::try_from(*n).ok(),
            _ => None,
        }
        .filter(|&n| self.output.is_char_boundary(n))
        .ok_or_else(|| Fault::internal("WRAP output mark is invalid"))?;
        let program = self.load(path)?;
        let content = self.output.split_off(start);
        let mut scope = self.vars.clone();
        scope.insert("content".to_owned(), Value::raw(content));
        let wrapped = self.render_scoped(program, scope)?;
        self.output.push_str(&wrapped);
        Ok(())
    }

    fn render_scoped(&mut self, program: Arc<Program>, mut scope: Vars) -> Result<String, Fault> {
        self.check_depth()?;
        Vm::new(self.ctx, program, &mut scope, &mut *self.tracer, self.depth + 1)
            .run()
            .map_err(Fault::from)
    }

    /// Loads the template named in register `r` through the loader.
    fn load(&self, r: u32) -> Result<Arc<Program>, Fault> {
        let name = self.reg(r)?;
        if name.is_null() {
            return Err(Fault::new(ErrorKind::Load, "template name is null"));
        }
        Ok(self.ctx.loader.load(&name.to_text())?)
    }

    fn check_depth(&self) -> Result<(), Fault> {
        match self.ctx.limits.max_include_depth {
            Some(max) if self.depth >= max => Err(Fault::new(
                ErrorKind::Limit,
                format!("include depth limit of {max} exceeded"),
            )),
            _ => Ok(()),
        }
    }
}
