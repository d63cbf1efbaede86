//! Error taxonomy for the crate.
//!
//! Most buffer/input operations are total (out-of-bounds is a silent no-op,
//! oversized strings are truncated) and never return `Result`. The four
//! kinds below are the operations that can genuinely fail: terminal setup,
//! dispatch-table validation, sustained write failure, and invalid
//! configuration.

use thiserror::Error;

/// Errors surfaced by the crate's public API.
#[derive(Debug, Error)]
pub enum Error {
    /// Failure entering raw mode, the alternate screen, or enabling mouse
    /// capture during `App` construction.
    #[error("terminal setup failed: {0}")]
    TerminalSetup(#[source] std::io::Error),

    /// Two `Stop` key bindings in the same dispatch-table build shared an
    /// equal pattern.
    #[error("duplicate stop handler for key pattern {pattern}")]
    DispatchValidation { pattern: String },

    /// A write to the terminal file descriptor failed; carries the
    /// triggering error and how many consecutive failures preceded it.
    #[error("terminal write failed after {consecutive_failures} consecutive failures: {source}")]
    IoWrite {
        #[source]
        source: std::io::Error,
        consecutive_failures: u32,
    },

    /// A configuration value was out of its documented valid range.
    #[error("invalid option `{field}`: {message}")]
    OptionInvalid { field: &'static str, message: String },
}
