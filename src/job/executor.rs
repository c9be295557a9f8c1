// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Job execution
//!
//! `MOUNTING -> ARG_BUILD -> GUARD_SCAN -> EXECUTING -> INTERPRETING ->
//! COMPLETE | FAILED`, with an explicit cleanup step on every path.

use super::{
    args, guard, JobError, JobEvent, JobFailure, JobPhase, JobResult, JobTiming, OutputFormat,
    RenderRequest,
};
use crate::classify::{self, classify, ErrorClassification, ErrorCode};
use crate::engine::{Engine, EngineCapabilities, ExitKind, Invocation};
use crate::error::Error;
use crate::monitor::HealthMonitor;
use crate::output;
use crate::vfs::{join, validate_logical_path, LibrarySource, Stager, WORK_DIR};
use std::time::Instant;

/// Source location for single-file jobs
pub const INPUT_PATH: &str = "/input.scad";

/// Main file used by multi-file jobs that do not name one
pub const DEFAULT_MAIN_FILE: &str = "main.scad";

/// Where the engine writes its export
pub fn output_path(format: OutputFormat) -> String {
    format!("/output.{}", format.extension())
}

/// Sandbox state a job changes and must undo on every path
#[derive(Debug, Clone)]
enum Scratch {
    /// Created for the job only
    Remove(String),
    /// Host-mounted file temporarily overwritten by the request's source
    Restore { path: String, contents: Vec<u8> },
}

/// What the exit status and log say about a finished call
#[derive(Debug, Clone)]
pub enum Verdict {
    Success { warnings: Vec<ErrorClassification> },
    Failure(JobError),
}

fn corrupted(abort_code: Option<i64>, mut classification: ErrorClassification) -> Verdict {
    classification.needs_restart = true;
    Verdict::Failure(JobError::EngineCorrupted {
        abort_code,
        classification,
    })
}

fn failed(classification: ErrorClassification) -> Verdict {
    if classification.needs_restart {
        corrupted(None, classification)
    } else {
        Verdict::Failure(JobError::Failed(classification))
    }
}

/// Interpret an engine call.
///
/// Pure: looks only at the exit status, the captured log and whether an
/// output file appeared.
pub fn interpret(invocation: &Invocation, format: OutputFormat, output_produced: bool) -> Verdict {
    let transcript = invocation.transcript();
    let full = transcript.join("\n");
    let diagnostic = classify::diagnostic_text(&transcript);

    // A numeric abort means the engine state is gone; never retry on it
    if let Some(code) = invocation.exit.abort_code() {
        let raw = if diagnostic.trim().is_empty() {
            code.to_string()
        } else {
            format!("{}\n{}", diagnostic, code)
        };
        let mut classification = classify(&raw);
        if classification.code == ErrorCode::RenderFailed {
            classification = ErrorClassification::for_code(ErrorCode::InternalError, raw);
        }
        return corrupted(Some(code), classification);
    }

    match &invocation.exit {
        ExitKind::Trapped(message) => {
            let raw = if diagnostic.trim().is_empty() {
                message.clone()
            } else {
                format!("{}\n{}", message, diagnostic)
            };
            failed(classify(&raw))
        }
        // Spawn errors must not read as a missing model file
        ExitKind::Unavailable(message) => {
            corrupted(None, ErrorClassification::for_code(ErrorCode::InternalError, message.clone()))
        }
        ExitKind::Exited(code) if *code != 0 => {
            // Expected format mismatches read as errors but are actionable
            if format.is_2d() && classify::matches_rule(ErrorCode::ModelNot2d, &full) {
                return failed(ErrorClassification::for_code(ErrorCode::ModelNot2d, full));
            }
            if format.is_3d() && classify::matches_rule(ErrorCode::ModelIs2d, &full) {
                return failed(ErrorClassification::for_code(ErrorCode::ModelIs2d, full));
            }
            let raw = if diagnostic.trim().is_empty() {
                format!("engine exited with status {}", code)
            } else {
                diagnostic
            };
            failed(classify(&raw))
        }
        _ => interpret_clean_exit(&full, &diagnostic, format, output_produced),
    }
}

/// A zero exit can still be a failure in disguise
fn interpret_clean_exit(
    full: &str,
    diagnostic: &str,
    format: OutputFormat,
    output_produced: bool,
) -> Verdict {
    let mut warnings = Vec::new();

    if classify::matches_rule(ErrorCode::EmptyGeometry, full) {
        return failed(ErrorClassification::for_code(ErrorCode::EmptyGeometry, full));
    }
    if format.is_3d() && classify::matches_rule(ErrorCode::ModelIs2d, full) {
        return failed(ErrorClassification::for_code(ErrorCode::ModelIs2d, full));
    }
    if format.is_2d() && classify::matches_rule(ErrorCode::ModelNot2d, full) {
        return failed(ErrorClassification::for_code(ErrorCode::ModelNot2d, full));
    }
    if classify::matches_rule(ErrorCode::UnsupportedConfig, full) {
        let classification = ErrorClassification::for_code(ErrorCode::UnsupportedConfig, full);
        if !output_produced {
            return failed(classification);
        }
        warnings.push(classification);
    }

    if !output_produced {
        let mut classification = classify(diagnostic);
        if classification.code == ErrorCode::RenderFailed {
            classification = ErrorClassification::for_code(ErrorCode::NoGeometry, full);
        }
        return failed(classification);
    }

    if classify::matches_rule(ErrorCode::NonManifoldWarning, full) {
        warnings.push(ErrorClassification::for_code(ErrorCode::NonManifoldWarning, full));
    }

    Verdict::Success { warnings }
}

/// Classification for output that failed validation
pub fn classify_output_error(err: &Error) -> ErrorClassification {
    match err {
        Error::EmptyOutput { .. } => {
            ErrorClassification::for_code(ErrorCode::EmptyGeometry, err.to_string())
        }
        _ => ErrorClassification::for_code(ErrorCode::RenderFailed, err.to_string())
            .with_message(format!("The engine produced unusable output: {}", err)),
    }
}

fn mount_failure(err: &Error) -> JobFailure {
    let classification = ErrorClassification::for_code(ErrorCode::MountFailed, err.to_string());
    JobFailure::new(JobError::Failed(classification), Vec::new())
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Runs one job against an engine. Borrowed from the session for the job's duration.
pub struct Executor<'a> {
    engine: &'a mut dyn Engine,
    stager: &'a mut Stager,
    capabilities: &'a EngineCapabilities,
    libraries: &'a dyn LibrarySource,
    monitor: &'a mut HealthMonitor,
}

impl<'a> Executor<'a> {
    pub fn new(
        engine: &'a mut dyn Engine,
        stager: &'a mut Stager,
        capabilities: &'a EngineCapabilities,
        libraries: &'a dyn LibrarySource,
        monitor: &'a mut HealthMonitor,
    ) -> Self {
        Self {
            engine,
            stager,
            capabilities,
            libraries,
            monitor,
        }
    }

    /// Run a job to completion. Temporaries are removed whatever the outcome.
    pub fn run(
        &mut self,
        request: &RenderRequest,
        events: &mut dyn FnMut(JobEvent),
    ) -> Result<JobResult, JobFailure> {
        let started = Instant::now();
        let mut temporaries = vec![Scratch::Remove(output_path(request.output_format))];

        let outcome = self.execute(request, started, &mut temporaries, events);

        self.cleanup(&temporaries);
        if let Some(warning) = self.monitor.end_job(self.engine.heap_size()) {
            events(JobEvent::Memory(warning));
        }

        match &outcome {
            Ok(result) => {
                tracing::info!(
                    "Job {} complete: {} {} primitives in {}ms",
                    request.request_id,
                    result.stats.primitive_count,
                    result.format,
                    result.timing.total_ms
                );
                events(JobEvent::Phase(JobPhase::Complete));
            }
            Err(failure) => {
                tracing::warn!(
                    "Job {} failed: {} (restart: {})",
                    request.request_id,
                    failure.error,
                    failure.error.needs_restart()
                );
                events(JobEvent::Phase(JobPhase::Failed));
            }
        }
        outcome
    }

    fn execute(
        &mut self,
        request: &RenderRequest,
        started: Instant,
        temporaries: &mut Vec<Scratch>,
        events: &mut dyn FnMut(JobEvent),
    ) -> Result<JobResult, JobFailure> {
        let format = request.output_format;
        let output = output_path(format);

        events(JobEvent::Phase(JobPhase::Mounting));
        if let Some(warning) = self.monitor.begin_job(self.engine.heap_size()) {
            events(JobEvent::Memory(warning));
        }
        let input = self.stage(request, &output, temporaries, events)?;
        let mount_ms = elapsed_ms(started);

        events(JobEvent::Phase(JobPhase::ArgBuild));
        let args = args::build_invocation(&input, &output, request, self.capabilities);

        events(JobEvent::Phase(JobPhase::GuardScan));
        for warning in guard::scan(&request.source_text) {
            events(JobEvent::Warning(warning.message));
        }

        events(JobEvent::Phase(JobPhase::Executing));
        let render_started = Instant::now();
        let invocation = self.engine.call_main(&args);
        let render_ms = elapsed_ms(render_started);

        events(JobEvent::Phase(JobPhase::Interpreting));
        let transcript = invocation.transcript();
        let produced = match self.engine.fs().read_file(&output) {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            _ => None,
        };

        let warnings = match interpret(&invocation, format, produced.is_some()) {
            Verdict::Success { warnings } => warnings,
            Verdict::Failure(error) => return Err(JobFailure::new(error, transcript)),
        };
        let bytes = match produced {
            Some(bytes) => bytes,
            None => {
                let classification = ErrorClassification::for_code(ErrorCode::NoGeometry, "");
                return Err(JobFailure::new(JobError::Failed(classification), transcript));
            }
        };

        let validate_started = Instant::now();
        let finalized = output::finalize(format, bytes).map_err(|e| {
            JobFailure::new(JobError::Failed(classify_output_error(&e)), transcript.clone())
        })?;
        let validate_ms = elapsed_ms(validate_started);

        for warning in &warnings {
            events(JobEvent::Warning(warning.message.clone()));
        }

        Ok(JobResult {
            request_id: request.request_id.clone(),
            output: finalized.bytes,
            format,
            stats: finalized.stats,
            timing: JobTiming {
                mount_ms,
                render_ms,
                validate_ms,
                total_ms: elapsed_ms(started),
            },
            transcript,
            warnings,
        })
    }

    /// Mount inputs and return the sandbox path of the main source file
    fn stage(
        &mut self,
        request: &RenderRequest,
        output: &str,
        temporaries: &mut Vec<Scratch>,
        events: &mut dyn FnMut(JobEvent),
    ) -> Result<String, JobFailure> {
        // A stale export from an earlier job must not pass for this one's
        if self.engine.fs().exists(output) {
            if let Err(e) = self.engine.fs().remove_file(output) {
                tracing::warn!("Could not remove stale output {}: {}", output, e);
            }
        }

        let use_work_dir = request.is_multi_file();
        let input = if use_work_dir {
            if !request.files.is_empty() {
                self.stager.clear_files(self.engine.fs());
                let report = self
                    .stager
                    .mount(self.engine.fs(), &request.files, true)
                    .map_err(|e| mount_failure(&e))?;
                for rejected in report.rejected {
                    events(JobEvent::Warning(format!("Skipped unsafe file path: {}", rejected)));
                }
            }
            let main = request.main_file.as_deref().unwrap_or(DEFAULT_MAIN_FILE);
            let main = validate_logical_path(main).map_err(|e| mount_failure(&e))?;
            join(WORK_DIR, &main)
        } else {
            INPUT_PATH.to_string()
        };

        // Multi-file jobs may rely on an already-mounted main file, which
        // must survive a job that overrides it with inline source
        let existing = if self.engine.fs().exists(&input) {
            Some(self.engine.fs().read_file(&input))
        } else {
            None
        };
        match existing {
            Some(Ok(_)) if request.source_text.is_empty() => {}
            Some(Ok(contents)) => {
                self.stager
                    .stage_file(self.engine.fs(), &input, request.source_text.as_bytes())
                    .map_err(|e| mount_failure(&e))?;
                temporaries.push(Scratch::Restore {
                    path: input.clone(),
                    contents,
                });
            }
            Some(Err(e)) => {
                let e = Error::Mount {
                    path: input.clone(),
                    source: e,
                };
                return Err(mount_failure(&e));
            }
            None => {
                self.stager
                    .stage_file(self.engine.fs(), &input, request.source_text.as_bytes())
                    .map_err(|e| mount_failure(&e))?;
                temporaries.push(Scratch::Remove(input.clone()));
            }
        }

        if !request.libraries.is_empty() {
            let report =
                self.stager
                    .mount_libraries(self.engine.fs(), self.libraries, &request.libraries);
            for (id, message) in report.failed {
                events(JobEvent::Warning(format!("Library {} unavailable: {}", id, message)));
            }
        }

        let search_path = self.stager.module_search_path(use_work_dir);
        self.engine.set_env("OPENSCADPATH", &search_path);

        Ok(input)
    }

    /// Undo per-job sandbox changes; failures are logged, never raised
    fn cleanup(&mut self, temporaries: &[Scratch]) {
        let fs = self.engine.fs();
        for scratch in temporaries {
            match scratch {
                Scratch::Remove(path) => match fs.remove_file(path) {
                    Ok(()) => tracing::debug!("Removed {}", path),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => tracing::warn!("Cleanup of {} failed: {}", path, e),
                },
                Scratch::Restore { path, contents } => match fs.write_file(path, contents) {
                    Ok(()) => tracing::debug!("Restored mounted {}", path),
                    Err(e) => tracing::warn!("Restoring {} failed: {}", path, e),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LogLine;

    fn invocation(exit: ExitKind, lines: &[&str]) -> Invocation {
        Invocation {
            exit,
            log: lines.iter().map(|l| LogLine::stderr(*l)).collect(),
        }
    }

    fn failure(verdict: Verdict) -> JobError {
        match verdict {
            Verdict::Failure(error) => error,
            Verdict::Success { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn test_numeric_abort_needs_restart() {
        let error = failure(interpret(&invocation(ExitKind::Aborted(1163376), &[]), OutputFormat::Stl, false));
        assert!(error.needs_restart());
        assert!(matches!(error, JobError::EngineCorrupted { abort_code: Some(1163376), .. }));
        assert_eq!(error.code(), ErrorCode::InternalError);

        let error = failure(interpret(&invocation(ExitKind::Trapped("42".into()), &[]), OutputFormat::Stl, false));
        assert!(matches!(error, JobError::EngineCorrupted { abort_code: Some(42), .. }));
    }

    #[test]
    fn test_trap_classified_from_message() {
        let error = failure(interpret(
            &invocation(ExitKind::Trapped("RuntimeError: memory access out of bounds".into()), &[]),
            OutputFormat::Stl,
            false,
        ));
        assert_eq!(error.code(), ErrorCode::SandboxOutOfBounds);
        assert!(error.needs_restart());
    }

    #[test]
    fn test_engine_spawn_failure_is_internal() {
        let exit = ExitKind::Unavailable(
            "failed to start /opt/openscad: No such file or directory (os error 2)".into(),
        );
        let error = failure(interpret(&invocation(exit, &[]), OutputFormat::Stl, false));
        assert_eq!(error.code(), ErrorCode::InternalError);
        assert!(error.needs_restart());
    }

    #[test]
    fn test_syntax_error_keeps_engine() {
        let error = failure(interpret(
            &invocation(ExitKind::Exited(1), &["ERROR: Parser error in file \"/input.scad\", line 1: syntax error"]),
            OutputFormat::Stl,
            false,
        ));
        assert_eq!(error.code(), ErrorCode::SyntaxError);
        assert!(!error.needs_restart());
    }

    #[test]
    fn test_3d_into_2d_format_is_model_not_2d() {
        let error = failure(interpret(
            &invocation(
                ExitKind::Exited(1),
                &["Current top level object is not a 2D object.", "ERROR: export failed"],
            ),
            OutputFormat::Dxf,
            false,
        ));
        assert_eq!(error.code(), ErrorCode::ModelNot2d);
        assert!(error.classification().message.contains("projection()"));
    }

    #[test]
    fn test_clean_exit_disguised_failures() {
        let error = failure(interpret(
            &invocation(ExitKind::Exited(0), &["Current top level object is empty."]),
            OutputFormat::Stl,
            false,
        ));
        assert_eq!(error.code(), ErrorCode::EmptyGeometry);

        let error = failure(interpret(
            &invocation(ExitKind::Exited(0), &["Current top level object is not a 3D object."]),
            OutputFormat::Stl,
            true,
        ));
        assert_eq!(error.code(), ErrorCode::ModelIs2d);
    }

    #[test]
    fn test_unsupported_depends_on_output() {
        let log = ["Feature 'lazy-union' is not supported"];
        let error = failure(interpret(&invocation(ExitKind::Exited(0), &log), OutputFormat::Stl, false));
        assert_eq!(error.code(), ErrorCode::UnsupportedConfig);

        match interpret(&invocation(ExitKind::Exited(0), &log), OutputFormat::Stl, true) {
            Verdict::Success { warnings } => {
                assert_eq!(warnings.len(), 1);
                assert_eq!(warnings[0].code, ErrorCode::UnsupportedConfig);
            }
            Verdict::Failure(e) => panic!("unexpected failure: {}", e),
        }
    }

    #[test]
    fn test_non_manifold_is_warning() {
        let log = ["WARNING: Object may not be a valid 2-manifold and may need repair!"];
        match interpret(&invocation(ExitKind::Exited(0), &log), OutputFormat::Stl, true) {
            Verdict::Success { warnings } => {
                assert_eq!(warnings[0].code, ErrorCode::NonManifoldWarning)
            }
            Verdict::Failure(e) => panic!("unexpected failure: {}", e),
        }
    }

    #[test]
    fn test_output_error_mapping() {
        let empty = Error::EmptyOutput {
            format: "svg".into(),
            message: "no shapes".into(),
        };
        assert_eq!(classify_output_error(&empty).code, ErrorCode::EmptyGeometry);

        let invalid = Error::InvalidOutput {
            format: "svg".into(),
            message: "root element is not <svg>".into(),
        };
        assert_eq!(classify_output_error(&invalid).code, ErrorCode::RenderFailed);
    }
}
