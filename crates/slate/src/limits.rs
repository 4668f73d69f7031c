/// Default bound on nested INCLUDE/WRAPPER renders.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 64;

/// Text appended in place of a null value.
pub const DEFAULT_NULL_PLACEHOLDER: &str = "(null)";

/// Per-render configuration.
///
/// ```ignore
/// let limits = RenderLimits::new().max_include_depth(16).null_placeholder("");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderLimits {
    /// Maximum nesting of INCLUDE/WRAPPER renders. Exceeding it is a fatal
    /// error rather than a native stack overflow. `None` disables the check.
    pub max_include_depth: Option<usize>,
    /// Appended (unescaped) when a null value reaches the output.
    pub null_placeholder: String,
    /// Appends INCLUDE output verbatim instead of through the escaper.
    pub raw_includes: bool,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            max_include_depth: Some(DEFAULT_MAX_INCLUDE_DEPTH),
            null_placeholder: DEFAULT_NULL_PLACEHOLDER.to_owned(),
            raw_includes: false,
        }
    }
}

impl RenderLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum include depth.
    #[must_use]
    pub fn max_include_depth(mut self, limit: usize) -> Self {
        self.max_include_depth = Some(limit);
        self
    }

    /// Removes the include depth bound; runaway recursion then exhausts the stack.
    #[must_use]
    pub fn unbounded_include_depth(mut self) -> Self {
        self.max_include_depth = None;
        self
    }

    /// Sets the text appended for null values.
    #[must_use]
    pub fn null_placeholder(mut self, text: impl Into<String>) -> Self {
        self.null_placeholder = text.into();
        self
    }

    /// Treats INCLUDE output as already escaped.
    #[must_use]
    pub fn raw_includes(mut self, raw: bool) -> Self {
        self.raw_includes = raw;
        self
    }
}
