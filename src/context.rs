//! Explicit logging context handed to every component at construction.
//!
//! Components never read a global verbosity: they create their span from the
//! context and check [`SimContext::enabled`] before emitting per-tick output.

use tracing::{Level, Span};

/// Logging configuration for one orchestrator instance.
#[derive(Clone, Debug)]
pub struct SimContext {
    name: String,
    verbosity: Level,
}

impl SimContext {
    /// Creates a context with the given run name and `INFO` verbosity.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verbosity: Level::INFO,
        }
    }

    /// Sets the maximum level components emit.
    pub fn with_verbosity(mut self, level: Level) -> Self {
        self.verbosity = level;
        self
    }

    /// Returns the run name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configured verbosity.
    pub fn verbosity(&self) -> Level {
        self.verbosity
    }

    /// Returns true if events at `level` should be emitted.
    ///
    /// `tracing::Level` orders `TRACE` as the greatest, so a level is enabled
    /// when it is at most as verbose as the configured one.
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.verbosity
    }

    /// Creates the span a component logs under.
    pub fn span(&self, component: &str) -> Span {
        tracing::info_span!("dos", run = %self.name, component = component)
    }
}

impl Default for SimContext {
    fn default() -> Self {
        Self::new("dos")
    }
}
