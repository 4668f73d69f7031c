use std::{fmt, path::PathBuf, sync::Arc};

use crate::{bytecode::Program, node::Tag};

/// Error raised while compiling a syntax tree. No program is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A built-in function was called with the wrong number of arguments.
    Arity {
        function: String,
        expected: &'static str,
        found: usize,
        line: u32,
    },
    /// A side-effect-free node whose value would be thrown away.
    VoidContext { tag: Tag, line: u32 },
    /// A node shape the compiler does not accept.
    Unsupported { tag: Tag, reason: String, line: u32 },
    /// The program outgrew the instruction operand width.
    TooLarge { what: &'static str },
}

impl CompileError {
    /// Source line of the offending node, if known.
    #[must_use]
    pub fn line(&self) -> Option<u32> {
        match self {
            Self::Arity { line, .. } | Self::VoidContext { line, .. } | Self::Unsupported { line, .. } => Some(*line),
            Self::TooLarge { .. } => None,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arity {
                function,
                expected,
                found,
                line,
            } => write!(
                f,
                "line {line}: '{function}' takes {expected} argument(s) but {found} were given"
            ),
            Self::VoidContext { tag, line } => write!(f, "line {line}: '{tag}' in void context"),
            Self::Unsupported { tag, reason, line } => write!(f, "line {line}: unsupported '{tag}' node: {reason}"),
            Self::TooLarge { what } => write!(f, "template too large: {what} exceeds operand range"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Error raised while resolving a template by name.
#[derive(Debug, Clone)]
pub enum LoadError {
    /// No include path contains the template.
    NotFound { name: String, searched: Vec<PathBuf> },
    /// The template file exists but could not be read.
    Io { path: PathBuf, message: String },
    /// The parser rejected the template text.
    Parse { name: String, message: String },
    /// The syntax tree failed to compile.
    Compile { name: String, error: CompileError },
    /// Serialized program bytes are corrupt.
    Decode { message: String },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name, searched } => {
                write!(f, "template '{name}' not found")?;
                if !searched.is_empty() {
                    let paths: Vec<_> = searched.iter().map(|p| p.display().to_string()).collect();
                    write!(f, " (searched: {})", paths.join(", "))?;
                }
                Ok(())
            }
            Self::Io { path, message } => write!(f, "cannot read '{}': {message}", path.display()),
            Self::Parse { name, message } => write!(f, "cannot parse '{name}': {message}"),
            Self::Compile { name, error } => write!(f, "cannot compile '{name}': {error}"),
            Self::Decode { message } => write!(f, "cannot decode program: {message}"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Compile { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Category of a fatal render error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Operand of the wrong type: arithmetic, ordering, iteration, indexing, ranges.
    Type,
    /// Failed host field or method access.
    Host,
    /// A registered function returned an error.
    Function,
    /// INCLUDE or WRAPPER could not load its template.
    Load,
    /// A configured render limit was exceeded.
    Limit,
    /// The program violated a VM invariant.
    Internal,
}

/// Error raised inside instruction handlers before the faulting pc is known.
///
/// The dispatch loop binds it to the program and pc, producing a [`RenderError`].
#[derive(Debug, Clone)]
pub(crate) struct Fault {
    pub kind: ErrorKind,
    pub message: String,
    /// Set when the fault already carries its location, e.g. from a nested render.
    pub nested: Option<Box<RenderError>>,
}

impl Fault {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            nested: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Host, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<RenderError> for Fault {
    fn from(err: RenderError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            nested: Some(Box::new(err)),
        }
    }
}

impl From<LoadError> for Fault {
    fn from(err: LoadError) -> Self {
        Self::new(ErrorKind::Load, err.to_string())
    }
}

/// Fatal error that aborted a render.
///
/// Carries the program and instruction index so the offending source line
/// and its surrounding text can be recovered.
#[derive(Debug, Clone)]
pub struct RenderError {
    kind: ErrorKind,
    message: String,
    program: Arc<Program>,
    pc: usize,
    /// Error raised inside an included or wrapping template.
    cause: Option<Box<RenderError>>,
}

impl RenderError {
    pub(crate) fn from_fault(fault: Fault, program: Arc<Program>, pc: usize) -> Self {
        Self {
            kind: fault.kind,
            message: fault.message,
            program,
            pc,
            cause: fault.nested,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    #[must_use]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Source line of the faulting instruction.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.program.line_at(self.pc)
    }

    /// Source lines around the faulting line, if the source text is available.
    #[must_use]
    pub fn context(&self) -> Option<String> {
        self.program.source().context(self.line())
    }

    /// The error raised inside a nested template, if this one came from INCLUDE or WRAPPER.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    /// The innermost error in the include chain.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut err = self;
        while let Some(inner) = err.cause.as_deref() {
            err = inner;
        }
        err
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} at {}:{}", self.message, self.program.source().name(), self.line())?;
        if let Some(context) = self.context() {
            writeln!(f, "----")?;
            f.write_str(&context)?;
            writeln!(f, "----")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "  included from here; inner error:\n{cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Any error the [`Renderer`](crate::Renderer) facade can return.
#[derive(Debug, Clone)]
pub enum Error {
    Compile(CompileError),
    Load(LoadError),
    Render(RenderError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(e) => write!(f, "{e}"),
            Self::Load(e) => write!(f, "{e}"),
            Self::Render(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Compile(e) => Some(e),
            Self::Load(e) => Some(e),
            Self::Render(e) => Some(e),
        }
    }
}

impl From<CompileError> for Error {
    fn from(e: CompileError) -> Self {
        Self::Compile(e)
    }
}

impl From<LoadError> for Error {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}

impl From<RenderError> for Error {
    fn from(e: RenderError) -> Self {
        Self::Render(e)
    }
}
