//! Non-fatal problems encountered while reading a JSON-RPC line stream.
//!
//! A bridge must keep reading after a bad line. Instead of failing, readers
//! and their callers record a [`Warning`] in a shared [`WarningCollector`]
//! and carry on; the collector can be inspected afterwards for reporting.
//!
//! # Examples
//!
//! ```
//! use mcp_relay_jsonl::warning::{Warning, WarningCollector};
//!
//! let collector = WarningCollector::new();
//! collector.add(Warning::MalformedJson {
//!     line_number: 5,
//!     error: "unexpected end of input".to_string(),
//! });
//! collector.add(Warning::SkippedLine {
//!     line_number: 9,
//!     reason: "not a JSON object".to_string(),
//! });
//!
//! assert_eq!(collector.into_warnings().len(), 2);
//! ```

use std::sync::{Arc, Mutex, PoisonError};

/// A non-fatal warning tied to a line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The line was not valid JSON (or not valid UTF-8).
    MalformedJson {
        /// The 1-based line number where the error occurred.
        line_number: usize,
        /// A description of the parse error.
        error: String,
    },

    /// The line parsed but was rejected by the consumer.
    SkippedLine {
        /// The 1-based line number that was skipped.
        line_number: usize,
        /// The reason the line was skipped.
        reason: String,
    },
}

impl Warning {
    /// Returns the line number associated with this warning.
    #[must_use]
    pub fn line_number(&self) -> usize {
        match self {
            Self::MalformedJson { line_number, .. } | Self::SkippedLine { line_number, .. } => {
                *line_number
            }
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedJson { line_number, error } => {
                write!(f, "line {line_number}: malformed JSON: {error}")
            }
            Self::SkippedLine {
                line_number,
                reason,
            } => write!(f, "line {line_number}: skipped: {reason}"),
        }
    }
}

impl std::error::Error for Warning {}

/// A cloneable, thread-safe accumulator of [`Warning`]s.
///
/// Clones share the same underlying list, so a collector can be handed to
/// spawned tasks and inspected by the owner afterwards. A poisoned lock is
/// recovered rather than propagated: the list is append-only, so a panic
/// mid-push cannot leave it inconsistent.
#[derive(Debug, Clone, Default)]
pub struct WarningCollector {
    warnings: Arc<Mutex<Vec<Warning>>>,
}

impl WarningCollector {
    /// Creates a new empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a warning.
    pub fn add(&self, warning: Warning) {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(warning);
    }

    /// Returns the number of warnings collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no warnings have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of all collected warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Removes and returns the warnings collected so far.
    ///
    /// Long-lived readers call this after each read so the list stays
    /// bounded.
    pub fn drain(&self) -> Vec<Warning> {
        std::mem::take(
            &mut *self
                .warnings
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Consumes the collector and returns all collected warnings.
    ///
    /// If other clones are still alive the warnings are copied out.
    #[must_use]
    pub fn into_warnings(self) -> Vec<Warning> {
        match Arc::try_unwrap(self.warnings) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}
