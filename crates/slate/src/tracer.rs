//! VM execution tracing.
//!
//! The VM is generic over a [`VmTracer`]; with [`NoopTracer`] every hook is an
//! empty inlined call and disappears after monomorphization, so production
//! renders pay nothing for the instrumentation points.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`ProfilingTracer`] | Opcode frequency counters and include depth |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis |
//!
//! ```ignore
//! let mut tracer = ProfilingTracer::new();
//! renderer.render_traced(&program, &mut vars, &mut tracer)?;
//! println!("{}", tracer.report());
//! ```

use std::{collections::HashMap, fmt};

use crate::bytecode::Opcode;

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An instruction was dispatched.
    Instruction {
        pc: usize,
        opcode: Opcode,
        /// Active FOREACH loops in the current template.
        loop_depth: usize,
    },
    /// A template started rendering (the top-level one or an INCLUDE/WRAPPER target).
    Enter { name: String, depth: usize },
    /// A template finished rendering, successfully or not.
    Leave { depth: usize },
    /// A FOREACH pushed a loop record.
    LoopPush { depth: usize },
    /// A FOREACH loop record was popped.
    LoopPop { depth: usize },
    /// A warning was reported to the warning sink.
    Warning { message: String },
}

/// Hooks called by the VM at key execution points.
///
/// All methods default to no-ops; implementations override what they need.
pub trait VmTracer: fmt::Debug {
    /// Called before each instruction is executed. This is the hottest hook.
    ///
    /// # Arguments
    /// * `pc` - Index of the instruction
    /// * `opcode` - The opcode about to run
    /// * `loop_depth` - Active FOREACH loops in the current template
    #[inline(always)]
    fn on_instruction(&mut self, _pc: usize, _opcode: Opcode, _loop_depth: usize) {}

    /// Called when a template starts rendering.
    ///
    /// # Arguments
    /// * `name` - Source name of the template
    /// * `depth` - Include depth, 0 for the top-level template
    #[inline(always)]
    fn on_enter(&mut self, _name: &str, _depth: usize) {}

    /// Called when a template finishes rendering.
    #[inline(always)]
    fn on_leave(&mut self, _depth: usize) {}

    /// Called after a FOREACH pushes its loop record.
    #[inline(always)]
    fn on_loop_push(&mut self, _depth: usize) {}

    /// Called after a FOREACH loop record is popped.
    #[inline(always)]
    fn on_loop_pop(&mut self, _depth: usize) {}

    /// Called for every warning, after the warning sink has been notified.
    #[inline(always)]
    fn on_warning(&mut self, _message: &str) {}
}

// ============================================================================
// NoopTracer
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Tracer that prints a human-readable execution log to stderr.
///
/// ```text
///   >>> ENTER page.tt        depth=0
/// [    0] APPEND_RAW      loops=0
/// [    1] LOAD_VAR        loops=0
///   +++ LOOP             depth=1
///   <<< LEAVE              depth=0
/// ```
#[derive(Debug)]
pub struct StderrTracer {
    /// Stop tracing after this many instructions; `None` traces everything.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: None,
            count: 0,
            stopped: false,
        }
    }

    /// Creates a tracer that goes quiet after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            count: 0,
            stopped: false,
        }
    }
}

impl Default for StderrTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(&mut self, pc: usize, opcode: Opcode, loop_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{pc:>5}] {:<15} loops={loop_depth}", opcode.to_string());
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_enter(&mut self, name: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> ENTER {name:<20} depth={depth}");
        }
    }

    fn on_leave(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< LEAVE                depth={depth}");
        }
    }

    fn on_loop_push(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  +++ LOOP                 depth={depth}");
        }
    }

    fn on_loop_pop(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  --- LOOP END             depth={depth}");
        }
    }

    fn on_warning(&mut self, message: &str) {
        if !self.stopped {
            eprintln!("  !!! {message}");
        }
    }
}

// ============================================================================
// ProfilingTracer
// ============================================================================

/// Tracer that collects execution statistics.
///
/// Retrieve results via [`ProfilingTracer::report`] after rendering.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    opcode_counts: HashMap<Opcode, u64>,
    total_instructions: u64,
    templates_rendered: u64,
    max_include_depth: usize,
    max_loop_depth: usize,
    warnings: u64,
}

/// Summary produced by [`ProfilingTracer::report`].
#[derive(Debug, Clone)]
pub struct ProfilingReport {
    /// Per-opcode execution counts, most frequent first.
    pub opcode_counts: Vec<(Opcode, u64)>,
    pub total_instructions: u64,
    /// Templates rendered, counting every INCLUDE and WRAPPER.
    pub templates_rendered: u64,
    pub max_include_depth: usize,
    pub max_loop_depth: usize,
    pub warnings: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opcode counts are sorted by frequency, ties by opcode name.
    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut opcode_counts: Vec<_> = self.opcode_counts.iter().map(|(&k, &v)| (k, v)).collect();
        opcode_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_string().cmp(&b.0.to_string())));
        ProfilingReport {
            opcode_counts,
            total_instructions: self.total_instructions,
            templates_rendered: self.templates_rendered,
            max_include_depth: self.max_include_depth,
            max_loop_depth: self.max_loop_depth,
            warnings: self.warnings,
        }
    }
}

impl VmTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _pc: usize, opcode: Opcode, _loop_depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.total_instructions += 1;
    }

    fn on_enter(&mut self, _name: &str, depth: usize) {
        self.templates_rendered += 1;
        self.max_include_depth = self.max_include_depth.max(depth);
    }

    fn on_loop_push(&mut self, depth: usize) {
        self.max_loop_depth = self.max_loop_depth.max(depth);
    }

    fn on_warning(&mut self, _message: &str) {
        self.warnings += 1;
    }
}

impl fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== VM Profiling Report ===")?;
        writeln!(f, "Total instructions: {}", self.total_instructions)?;
        writeln!(f, "Templates rendered: {}", self.templates_rendered)?;
        writeln!(f, "Max include depth:  {}", self.max_include_depth)?;
        writeln!(f, "Max loop depth:     {}", self.max_loop_depth)?;
        writeln!(f, "Warnings:           {}", self.warnings)?;
        writeln!(f)?;
        writeln!(f, "--- Opcode Frequency ---")?;
        for (opcode, count) in &self.opcode_counts {
            let pct = (*count as f64 / self.total_instructions as f64) * 100.0;
            writeln!(f, "  {:<20} {count:>10}  ({pct:>5.1}%)", opcode.to_string())?;
        }
        Ok(())
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Tracer that records every event, up to an optional limit.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::new(),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|limit| self.events.len() < limit) {
            self.events.push(event);
        }
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, pc: usize, opcode: Opcode, loop_depth: usize) {
        self.record(TraceEvent::Instruction { pc, opcode, loop_depth });
    }

    fn on_enter(&mut self, name: &str, depth: usize) {
        self.record(TraceEvent::Enter {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_leave(&mut self, depth: usize) {
        self.record(TraceEvent::Leave { depth });
    }

    fn on_loop_push(&mut self, depth: usize) {
        self.record(TraceEvent::LoopPush { depth });
    }

    fn on_loop_pop(&mut self, depth: usize) {
        self.record(TraceEvent::LoopPop { depth });
    }

    fn on_warning(&mut self, message: &str) {
        self.record(TraceEvent::Warning {
            message: message.to_owned(),
        });
    }
}
