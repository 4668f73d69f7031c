use std::{
    fmt,
    sync::{Mutex, PoisonError},
};

use crate::bytecode::Program;

/// Receives recoverable problems found while rendering.
///
/// Warnings never stop a render: a null appended to the output, a null in a
/// concatenation or an unknown function degrade to a placeholder or null and
/// execution continues. Implementations must not panic.
pub trait WarningSink: fmt::Debug + Send + Sync {
    /// # Arguments
    /// * `message` - Description of the problem
    /// * `pc` - Index of the instruction that raised it
    /// * `program` - Program being executed, for line lookup
    fn notify(&self, message: &str, pc: usize, program: &Program);
}

/// Default sink that writes warnings to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrWarnings;

impl WarningSink for StderrWarnings {
    fn notify(&self, message: &str, pc: usize, program: &Program) {
        eprintln!("warning: {message} at {}:{}", program.source().name(), program.line_at(pc));
    }
}

/// Sink that discards every warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreWarnings;

impl WarningSink for IgnoreWarnings {
    fn notify(&self, _message: &str, _pc: usize, _program: &Program) {}
}

/// A warning captured by [`CollectWarnings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
    pub name: String,
    pub line: u32,
}

/// Sink that records warnings for later inspection.
///
/// Useful for tests and for hosts that surface warnings in their own UI.
#[derive(Debug, Default)]
pub struct CollectWarnings {
    warnings: Mutex<Vec<Warning>>,
}

impl CollectWarnings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the warnings collected so far.
    #[must_use]
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns only the messages, in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|w| w.message.clone())
            .collect()
    }

    /// Takes the collected warnings, leaving the collector empty.
    pub fn take(&self) -> Vec<Warning> {
        std::mem::take(&mut *self.warnings.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl WarningSink for CollectWarnings {
    fn notify(&self, message: &str, pc: usize, program: &Program) {
        let warning = Warning {
            message: message.to_owned(),
            name: program.source().name(),
            line: program.line_at(pc),
        };
        self.warnings.lock().unwrap_or_else(PoisonError::into_inner).push(warning);
    }
}
