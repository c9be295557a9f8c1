// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! OpenSCAD executable driven as a sandboxed engine

use super::{Engine, EngineLoader, ExitKind, InterruptHandle, Invocation, LogLine};
use crate::config::RenderConfig;
use crate::error::{Error, Result};
use crate::vfs::{DirFs, SandboxFs};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Environment variables holding `:`-separated sandbox path lists
const PATH_LIST_VARS: &[&str] = &["OPENSCADPATH", "FONTCONFIG_FILE", "FONTCONFIG_PATH"];

/// Engine backed by an `openscad` process per call.
///
/// The sandbox filesystem is a private temporary directory that lives as long
/// as the engine; dropping the engine deletes it.
pub struct ProcessEngine {
    executable: PathBuf,
    // Keeps the directory alive; `fs` points into it
    _sandbox: TempDir,
    fs: DirFs,
    env: BTreeMap<String, String>,
    interrupt: InterruptHandle,
}

impl ProcessEngine {
    pub fn new(executable: impl Into<PathBuf>) -> Result<Self> {
        let sandbox = tempfile::Builder::new()
            .prefix("polyframe-sandbox-")
            .tempdir()
            .map_err(|e| Error::EngineLoad(format!("cannot create sandbox: {}", e)))?;
        let fs = DirFs::new(sandbox.path());

        Ok(Self {
            executable: executable.into(),
            _sandbox: sandbox,
            fs,
            env: BTreeMap::new(),
            interrupt: InterruptHandle::new(),
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Host path for a sandbox-absolute argument; other arguments pass through
    fn translate_arg(&self, arg: &str) -> String {
        if arg.starts_with('/') {
            self.fs.host_path(arg).to_string_lossy().into_owned()
        } else {
            arg.to_string()
        }
    }

    fn translate_path_list(&self, value: &str) -> String {
        value
            .split(':')
            .map(|part| self.translate_arg(part))
            .collect::<Vec<_>>()
            .join(":")
    }

    fn collect_lines(bytes: &[u8], make: fn(String) -> LogLine, into: &mut Vec<LogLine>) {
        let text = String::from_utf8_lossy(bytes);
        into.extend(
            text.lines()
                .map(|line| line.trim_end_matches('\r'))
                .filter(|line| !line.is_empty())
                .map(|line| make(line.to_string())),
        );
    }
}

impl Engine for ProcessEngine {
    fn call_main(&mut self, args: &[String]) -> Invocation {
        let host_args: Vec<String> = args.iter().map(|arg| self.translate_arg(arg)).collect();

        let mut command = Command::new(&self.executable);
        command
            .args(&host_args)
            .current_dir(self.fs.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.env {
            if PATH_LIST_VARS.contains(&key.as_str()) {
                command.env(key, self.translate_path_list(value));
            } else {
                command.env(key, value);
            }
        }

        tracing::debug!("Invoking {} {:?}", self.executable.display(), args);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Invocation {
                    exit: ExitKind::Unavailable(format!(
                        "failed to start {}: {}",
                        self.executable.display(),
                        e
                    )),
                    log: Vec::new(),
                }
            }
        };

        self.interrupt.attach(child.id());
        let output = child.wait_with_output();
        self.interrupt.detach();

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return Invocation {
                    exit: ExitKind::Unavailable(format!("engine process failed: {}", e)),
                    log: Vec::new(),
                }
            }
        };

        let mut log = Vec::new();
        Self::collect_lines(&output.stdout, LogLine::stdout, &mut log);
        Self::collect_lines(&output.stderr, LogLine::stderr, &mut log);

        let exit = match output.status.code() {
            Some(code) => ExitKind::Exited(code),
            None => {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    ExitKind::Aborted(output.status.signal().unwrap_or(-1) as i64)
                }
                #[cfg(not(unix))]
                {
                    ExitKind::Aborted(-1)
                }
            }
        };

        Invocation { exit, log }
    }

    fn fs(&mut self) -> &mut dyn SandboxFs {
        &mut self.fs
    }

    fn set_env(&mut self, key: &str, value: &str) {
        self.env.insert(key.to_string(), value.to_string());
    }

    /// Peak resident size of finished engine processes.
    ///
    /// `RUSAGE_CHILDREN` is a high-water mark over every reaped child, so it
    /// never shrinks, matching the allocated-heap semantics callers expect.
    fn heap_size(&self) -> u64 {
        #[cfg(unix)]
        {
            let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
            let rc = unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) };
            if rc != 0 {
                return 0;
            }
            let max_rss = usage.ru_maxrss.max(0) as u64;
            // Linux reports KiB, macOS reports bytes
            if cfg!(target_os = "macos") {
                max_rss
            } else {
                max_rss * 1024
            }
        }
        #[cfg(not(unix))]
        {
            0
        }
    }

    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        Some(self.interrupt.clone())
    }

    fn resolve_path(&self, sandbox_path: &str) -> String {
        self.translate_arg(sandbox_path)
    }
}

/// Loads [`ProcessEngine`]s for a fixed executable
#[derive(Debug, Clone)]
pub struct ProcessEngineLoader {
    executable: PathBuf,
}

impl ProcessEngineLoader {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Locate the engine: explicit config, then `<asset_dir>/bin/openscad`,
    /// then `PATH`
    pub fn from_config(config: &RenderConfig) -> Result<Self> {
        if let Some(path) = &config.engine_path {
            return Ok(Self::new(path));
        }

        let bundled = config.asset_dir.join("bin").join("openscad");
        if bundled.is_file() {
            return Ok(Self::new(bundled));
        }

        which::which("openscad")
            .map(Self::new)
            .map_err(|e| Error::EngineLoad(format!("OpenSCAD not found in PATH: {}", e)))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl EngineLoader for ProcessEngineLoader {
    fn load(&self) -> Result<Box<dyn Engine>> {
        if !self.executable.exists() {
            return Err(Error::EngineLoad(format!(
                "engine executable not found: {}",
                self.executable.display()
            )));
        }
        let engine = ProcessEngine::new(&self.executable)?;
        tracing::info!("Loaded engine {}", self.executable.display());
        Ok(Box::new(engine))
    }

    fn describe(&self) -> String {
        self.executable.display().to_string()
    }
}
