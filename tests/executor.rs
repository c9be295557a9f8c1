// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Sandbox state around a single job

mod common;

use common::{binary_stl, FakeEngine, Response, Script, MODERN_HELP};
use polyframe_render::classify::ErrorCode;
use polyframe_render::engine::{Engine, EngineCapabilities, ExitKind};
use polyframe_render::job::{Executor, JobError, JobFailure, JobResult, RenderRequest};
use polyframe_render::vfs::{AssetLibraries, FileContent, SandboxFs, Stager, LIBRARY_ROOT};
use polyframe_render::HealthMonitor;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

struct Bench {
    engine: FakeEngine,
    stager: Stager,
    capabilities: EngineCapabilities,
    libraries: AssetLibraries,
    monitor: HealthMonitor,
    _assets: TempDir,
}

impl Bench {
    fn new(script: Arc<Script>) -> Self {
        let assets = TempDir::new().unwrap();
        Self {
            engine: FakeEngine::new(script),
            stager: Stager::new(),
            capabilities: EngineCapabilities::from_help_text(MODERN_HELP),
            libraries: AssetLibraries::in_asset_dir(assets.path()),
            monitor: HealthMonitor::new(2 * 1024 * 1024 * 1024, 75.0),
            _assets: assets,
        }
    }

    fn run(&mut self, request: &RenderRequest) -> Result<JobResult, JobFailure> {
        let mut executor = Executor::new(
            &mut self.engine,
            &mut self.stager,
            &self.capabilities,
            &self.libraries,
            &mut self.monitor,
        );
        executor.run(request, &mut |_| {})
    }

    fn mount(&mut self, files: &[(&str, &str)]) {
        let files: BTreeMap<String, FileContent> = files
            .iter()
            .map(|(path, text)| (path.to_string(), FileContent::from(*text)))
            .collect();
        let fs = self.engine.fs();
        self.stager.mount(fs, &files, true).unwrap();
    }

    fn read(&self, path: &str) -> Option<String> {
        self.engine
            .memfs()
            .read_file(path)
            .ok()
            .map(|bytes| String::from_utf8(bytes).unwrap())
    }
}

/// Succeeds only when the main file has content
fn needs_source(main: &'static str) -> Arc<Script> {
    Script::new(move |_, fs| match fs.read_file(main) {
        Ok(bytes) if !bytes.is_empty() => Response::success(binary_stl(2)),
        _ => Response::failure(
            ExitKind::Exited(1),
            &["WARNING: No top-level geometry to render"],
        ),
    })
}

#[test]
fn test_temporaries_removed_after_success() {
    let mut bench = Bench::new(Script::constant(Response::success(binary_stl(1))));
    let result = bench.run(&RenderRequest::new("r1", "cube(1);")).unwrap();

    assert_eq!(result.stats.primitive_count, 1);
    assert_eq!(bench.read("/input.scad"), None);
    assert_eq!(bench.read("/output.stl"), None);
    assert_eq!(
        bench.engine.env.get("OPENSCADPATH").map(String::as_str),
        Some(LIBRARY_ROOT)
    );
}

#[test]
fn test_temporaries_removed_after_failure() {
    let script = Script::constant(Response {
        exit: ExitKind::Exited(1),
        log: vec!["ERROR: Parser error in file \"/input.scad\", line 1: syntax error".into()],
        output: Some(binary_stl(1)),
        delay: std::time::Duration::ZERO,
        heap_growth: 0,
    });
    let mut bench = Bench::new(script);
    let failure = bench.run(&RenderRequest::new("r1", "cube(")).unwrap_err();

    assert!(matches!(
        failure.error,
        JobError::Failed(ref c) if c.code == ErrorCode::SyntaxError
    ));
    assert_eq!(bench.read("/input.scad"), None);
    assert_eq!(bench.read("/output.stl"), None);
}

#[test]
fn test_multi_file_job_sets_search_path() {
    let mut bench = Bench::new(Script::new(|_, fs| {
        if fs.exists("/work/parts/gear.scad") {
            Response::success(binary_stl(1))
        } else {
            Response::failure(ExitKind::Exited(1), &["Can't open include file"])
        }
    }));
    let mut request = RenderRequest::new("r1", "");
    request.main_file = Some("main.scad".into());
    request.files = [
        ("main.scad", "include <parts/gear.scad>"),
        ("parts/gear.scad", "module gear() {}"),
    ]
    .into_iter()
    .map(|(path, text)| (path.to_string(), FileContent::from(text)))
    .collect();

    bench.run(&request).unwrap();

    let search_path = bench.engine.env.get("OPENSCADPATH").cloned().unwrap();
    assert_eq!(search_path, format!("/work:{}", LIBRARY_ROOT));
    assert_eq!(bench.read("/work/main.scad").as_deref(), Some("include <parts/gear.scad>"));
    assert_eq!(bench.read("/output.stl"), None);
}

#[test]
fn test_inline_source_does_not_replace_mounted_main() {
    let mut bench = Bench::new(needs_source("/work/main.scad"));
    bench.mount(&[("main.scad", "cube(1);")]);

    let mut first = RenderRequest::new("r1", "cube(2);");
    first.main_file = Some("main.scad".into());
    bench.run(&first).unwrap();
    assert_eq!(bench.read("/work/main.scad").as_deref(), Some("cube(1);"));

    let mut second = RenderRequest::new("r2", "");
    second.main_file = Some("main.scad".into());
    assert!(bench.run(&second).is_ok());
}

#[test]
fn test_inline_main_without_mount_is_temporary() {
    let mut bench = Bench::new(needs_source("/work/main.scad"));

    let mut request = RenderRequest::new("r1", "cube(2);");
    request.main_file = Some("main.scad".into());
    bench.run(&request).unwrap();

    assert_eq!(bench.read("/work/main.scad"), None);
}
