//! Error taxonomy for the display layer.
//!
//! `ToolError` describes what went wrong while running an external tool
//! (the display-configuration tool or the modeline generator). `BackendError`
//! is what the `VirtualDisplayBackend` contract surfaces to callers; every
//! variant is recoverable by the caller (retry, other backend, 2D fallback).

use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Tool errors
// ---------------------------------------------------------------------------

/// Failure of a single external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The binary could not be started at all (not found, not executable).
    #[error("{program} could not be invoked: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran but exited non-zero. `stderr` holds its diagnostics.
    #[error("{program} {} failed (exit code {}): {}", .args.join(" "), exit_code_text(.code), .stderr.trim())]
    Protocol {
        program: String,
        args: Vec<String>,
        code: Option<i32>,
        stderr: String,
    },

    /// The tool did not finish before the deadline and was killed.
    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

impl ToolError {
    /// True when the binary itself is missing, as opposed to a failed call.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ToolError::Unavailable { .. })
    }
}

fn exit_code_text(code: &Option<i32>) -> String {
    code.map_or_else(|| "none, killed by signal".to_owned(), |c| c.to_string())
}

// ---------------------------------------------------------------------------
// Backend errors
// ---------------------------------------------------------------------------

/// Whether an output was expected to be listed or gone after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Presence::Present => f.write_str("present"),
            Presence::Absent => f.write_str("absent"),
        }
    }
}

/// Errors surfaced by `VirtualDisplayBackend` operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend's tool or service is not usable on this desktop.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The display could not be created.
    #[error("virtual display creation failed: {0}")]
    CreationFailed(String),

    /// No output suitable for hosting a synthesized mode was found.
    #[error("no VIRTUAL output available")]
    NoVirtualOutput,

    /// A mutation reported success but the re-listed outputs disagree.
    #[error("output {name} expected {expected} after update")]
    VerificationMismatch { name: String, expected: Presence },

    /// A mode switch reported success but the mode is not current.
    #[error("mode {mode} not active on {output} after update")]
    ModeNotActive { output: String, mode: String },

    /// The caller asked for something that can never succeed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("display service call failed: {0}")]
    Service(#[from] zbus::Error),
}
