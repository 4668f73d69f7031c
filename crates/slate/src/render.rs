//! Public interface for compiling and rendering templates.

use std::sync::Arc;

use crate::{
    bytecode::{Context, Program, Vm, compile},
    error::{CompileError, Error, RenderError},
    escape::{Escaper, HtmlEscaper},
    function::FunctionRegistry,
    limits::RenderLimits,
    loader::{Loader, NullLoader},
    node::Node,
    source::Source,
    tracer::{NoopTracer, VmTracer},
    value::{Value, Vars},
    warning::{StderrWarnings, WarningSink},
};

/// Primary interface for rendering templates.
///
/// A `Renderer` bundles the collaborators every render needs: the output
/// escaper, the sub-template loader, the function registry, the warning sink
/// and the render limits. It is cheap to clone and can be shared between
/// threads; each render runs to completion on the calling thread.
///
/// # Example
/// ```
/// use slate::{Node, Renderer, Value, Vars};
///
/// let tree = Node::template(vec![
///     Node::raw_text("Hello, "),
///     Node::expression(Node::ident("name")),
/// ]);
/// let mut vars = Vars::new();
/// vars.insert("name".to_owned(), Value::from("<World>"));
/// let out = Renderer::new().render_tree(&tree, vars).unwrap();
/// assert_eq!(out, "Hello, &lt;World&gt;");
/// ```
#[derive(Debug, Clone)]
pub struct Renderer {
    escaper: Arc<dyn Escaper>,
    loader: Arc<dyn Loader>,
    functions: Arc<FunctionRegistry>,
    warnings: Arc<dyn WarningSink>,
    limits: RenderLimits,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            escaper: Arc::new(HtmlEscaper),
            loader: Arc::new(NullLoader),
            functions: Arc::new(FunctionRegistry::new()),
            warnings: Arc::new(StderrWarnings),
            limits: RenderLimits::default(),
        }
    }
}

impl Renderer {
    /// HTML escaping, no sub-templates, no functions, warnings to stderr.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_escaper(mut self, escaper: impl Escaper + 'static) -> Self {
        self.escaper = Arc::new(escaper);
        self
    }

    /// Takes an `Arc` so the caller can keep a handle, e.g. to register more
    /// templates in a [`MemoryLoader`](crate::MemoryLoader).
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = loader;
        self
    }

    /// Registers one function.
    #[must_use]
    pub fn with_function(
        mut self,
        name: impl Into<String>,
        function: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Arc::make_mut(&mut self.functions).register(name, function);
        self
    }

    /// Replaces the whole function registry.
    #[must_use]
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    /// Takes an `Arc` so the caller can read back a
    /// [`CollectWarnings`](crate::CollectWarnings) after rendering.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Arc<dyn WarningSink>) -> Self {
        self.warnings = warnings;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: RenderLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn limits(&self) -> &RenderLimits {
        &self.limits
    }

    #[must_use]
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Compiles a syntax tree.
    pub fn compile(&self, tree: &Node, source: Source) -> Result<Arc<Program>, CompileError> {
        compile(tree, source).map(Arc::new)
    }

    /// Renders `program` against `vars`. Assignments made by the template
    /// (and by templates it includes) remain in `vars` afterwards.
    pub fn render(&self, program: &Arc<Program>, vars: &mut Vars) -> Result<String, RenderError> {
        self.render_traced(program, vars, &mut NoopTracer)
    }

    /// Like [`render`](Self::render), reporting execution events to `tracer`.
    pub fn render_traced<Tr: VmTracer>(
        &self,
        program: &Arc<Program>,
        vars: &mut Vars,
        tracer: &mut Tr,
    ) -> Result<String, RenderError> {
        Vm::new(self.context(), Arc::clone(program), vars, tracer, 0).run()
    }

    /// Compiles and renders a tree in one step.
    pub fn render_tree(&self, tree: &Node, mut vars: Vars) -> Result<String, Error> {
        let program = self.compile(tree, Source::Anonymous)?;
        Ok(self.render(&program, &mut vars)?)
    }

    /// Loads a template through the loader and renders it.
    pub fn render_named(&self, name: &str, mut vars: Vars) -> Result<String, Error> {
        let program = self.loader.load(name)?;
        Ok(self.render(&program, &mut vars)?)
    }

    fn context(&self) -> Context<'_> {
        Context {
            escaper: self.escaper.as_ref(),
            loader: self.loader.as_ref(),
            functions: &self.functions,
            warnings: self.warnings.as_ref(),
            limits: &self.limits,
        }
    }
}
