// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Engine lifecycle
//!
//! The geometry engine is a black box reached through [`Engine`]: one
//! blocking entry point, a sandbox filesystem, environment variables and an
//! allocated-heap reading. Everything else in this crate is built on that
//! surface.

pub mod capabilities;
pub mod fonts;
pub mod manifest;
mod process;

pub use capabilities::EngineCapabilities;
pub use fonts::{mount_fonts, FontReport, FONT_DIR, FONT_FILES};
pub use manifest::{verify_assets, ArtifactEntry, IntegrityWarning, Manifest, MANIFEST_FILE};
pub use process::{ProcessEngine, ProcessEngineLoader};

use crate::error::Result;
use crate::vfs::SandboxFs;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Output stream a log line was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One captured line of engine output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub stream: Stream,
    pub text: String,
}

impl LogLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stderr,
            text: text.into(),
        }
    }
}

/// How an engine call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal return with an exit code
    Exited(i32),
    /// Bare numeric abort; the engine's internal state is no longer trusted
    Aborted(i64),
    /// Trap or thrown message
    Trapped(String),
    /// The engine could not be run at all; nothing executed
    Unavailable(String),
}

impl ExitKind {
    /// Numeric abort code, if the call ended with one.
    ///
    /// A trap whose message is nothing but an integer counts as well.
    pub fn abort_code(&self) -> Option<i64> {
        match self {
            ExitKind::Aborted(code) => Some(*code),
            ExitKind::Trapped(message) => message.trim().parse().ok(),
            ExitKind::Exited(_) | ExitKind::Unavailable(_) => None,
        }
    }

    pub fn is_clean_exit(&self) -> bool {
        matches!(self, ExitKind::Exited(0))
    }
}

/// Result of one blocking engine call
#[derive(Debug, Clone)]
pub struct Invocation {
    pub exit: ExitKind,
    pub log: Vec<LogLine>,
}

impl Invocation {
    /// All captured lines, stdout and stderr interleaved as captured
    pub fn transcript(&self) -> Vec<String> {
        self.log.iter().map(|line| line.text.clone()).collect()
    }

    /// Transcript joined into one block of text
    pub fn text(&self) -> String {
        self.transcript().join("\n")
    }
}

/// Cross-thread handle that kills an in-flight engine call
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    pid: Arc<AtomicU32>,
    interrupted: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the process currently executing a call
    pub fn attach(&self, pid: u32) {
        self.interrupted.store(false, Ordering::SeqCst);
        self.pid.store(pid, Ordering::SeqCst);
    }

    /// Forget the process once the call returned
    pub fn detach(&self) {
        self.pid.store(0, Ordering::SeqCst);
    }

    /// Kill the running call. Returns false when nothing was running or a
    /// kill was already sent.
    pub fn interrupt(&self) -> bool {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 || self.interrupted.swap(true, Ordering::SeqCst) {
            return false;
        }

        #[cfg(unix)]
        {
            // SIGKILL: the engine has no cooperative cancellation
            unsafe {
                libc::kill(pid as i32, libc::SIGKILL);
            }
        }

        tracing::warn!("Interrupted engine process {}", pid);
        true
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

/// The sandboxed, single-threaded geometry engine
pub trait Engine: Send {
    /// Run the engine's main entry point. Blocks until it returns.
    fn call_main(&mut self, args: &[String]) -> Invocation;

    /// Sandbox filesystem the engine reads from and writes to
    fn fs(&mut self) -> &mut dyn SandboxFs;

    fn set_env(&mut self, key: &str, value: &str);

    /// Allocated heap in bytes. Only ever grows over the engine's lifetime.
    fn heap_size(&self) -> u64;

    /// Handle for killing an in-flight call from another thread
    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        None
    }

    /// Location the engine itself sees for a sandbox path.
    ///
    /// Only differs from the sandbox path for engines that run outside a
    /// virtual filesystem; used when generating config files that embed paths.
    fn resolve_path(&self, sandbox_path: &str) -> String {
        sandbox_path.to_string()
    }
}

/// Creates fresh engine instances so a corrupted one can be replaced
pub trait EngineLoader: Send {
    fn load(&self) -> Result<Box<dyn Engine>>;

    /// Human-readable description of what gets loaded
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_trap_is_abort() {
        assert_eq!(ExitKind::Trapped("  1234567 ".into()).abort_code(), Some(1234567));
        assert_eq!(ExitKind::Trapped("RuntimeError: unreachable".into()).abort_code(), None);
        assert_eq!(ExitKind::Aborted(9).abort_code(), Some(9));
        assert_eq!(ExitKind::Exited(1).abort_code(), None);
    }

    #[test]
    fn test_interrupt_without_process_is_noop() {
        let handle = InterruptHandle::new();
        assert!(!handle.interrupt());
        assert!(!handle.was_interrupted());
    }
}
