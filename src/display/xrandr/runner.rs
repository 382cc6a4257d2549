//! External process execution for the display tools.
//!
//! Every tool call is a short-lived child process: spawn, collect stdout and
//! stderr, wait. `SystemRunner` bounds each call with a deadline and kills
//! the child when it expires, since none of the tools support cancellation.
//! Output of a killed child is discarded; a grandchild still holding the
//! pipes cannot hold the call past the deadline.
//!
//! The `CommandRunner` trait is the seam the backends are tested through.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::display::error::ToolError;

// ---------------------------------------------------------------------------
// Output type
// ---------------------------------------------------------------------------

/// Captured result of a tool run that started successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when the child was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Converts a non-zero exit into `ToolError::Protocol`.
    pub fn checked(self, program: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::Protocol {
                program: program.to_owned(),
                args: args.iter().map(|a| (*a).to_owned()).collect(),
                code: self.code,
                stderr: self.stderr,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Runner trait
// ---------------------------------------------------------------------------

/// Runs an external program to completion.
///
/// Implementations return `Err` only when the program could not be run at
/// all (`Unavailable`) or did not finish in time (`TimedOut`). A non-zero exit
/// is a normal `ToolOutput`; callers decide whether it is fatal.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput, ToolError>;
}

/// Runs real processes with a deadline.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        log::debug!("xrandr: exec {program} {}", args.join(" "));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| ToolError::Unavailable {
                program: program.to_owned(),
                source,
            })?;
        runtime.block_on(self.run_with_deadline(program, args))
    }
}

impl SystemRunner {
    async fn run_with_deadline(&self, program: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        let unavailable = |source| ToolError::Unavailable {
            program: program.to_owned(),
            source,
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(unavailable)?;

        // Dropping the pending future drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(unavailable)?,
            Err(_) => {
                log::warn!("xrandr: {program} exceeded {:?}, killing", self.timeout);
                return Err(ToolError::TimedOut {
                    program: program.to_owned(),
                    timeout: self.timeout,
                });
            }
        };

        Ok(ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
