// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Scripted in-memory engine shared by the integration tests

#![allow(dead_code)]

use polyframe_render::engine::{Engine, EngineLoader, ExitKind, Invocation, LogLine};
use polyframe_render::error::{Error, Result};
use polyframe_render::vfs::{MemFs, SandboxFs};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const MODERN_HELP: &str = "\
Usage: openscad [options] file.scad
  --backend arg            3D rendering backend to use: 'CGAL' (old/slow)
                           [default] or 'Manifold' (new/fast)
  --enable arg             enable experimental features: lazy-union
  --export-format arg      'asciistl', and for binary stl export, specify
                           'binstl'.
OpenSCAD version 2024.12.06";

/// What one render call does
#[derive(Debug, Clone)]
pub struct Response {
    pub exit: ExitKind,
    pub log: Vec<String>,
    pub output: Option<Vec<u8>>,
    pub delay: Duration,
    pub heap_growth: u64,
}

impl Response {
    pub fn success(output: Vec<u8>) -> Self {
        Self {
            exit: ExitKind::Exited(0),
            log: Vec::new(),
            output: Some(output),
            delay: Duration::ZERO,
            heap_growth: 0,
        }
    }

    pub fn failure(exit: ExitKind, log: &[&str]) -> Self {
        Self {
            exit,
            log: log.iter().map(|l| l.to_string()).collect(),
            output: None,
            delay: Duration::ZERO,
            heap_growth: 0,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_heap_growth(mut self, bytes: u64) -> Self {
        self.heap_growth = bytes;
        self
    }
}

type Responder = dyn Fn(&[String], &MemFs) -> Response + Send + Sync;

/// Behaviour shared by every engine a loader creates
pub struct Script {
    pub help: String,
    pub responder: Box<Responder>,
    /// Arguments of every render call, across engine instances
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl Script {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&[String], &MemFs) -> Response + Send + Sync + 'static,
    {
        Arc::new(Self {
            help: MODERN_HELP.to_string(),
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Same response for every call
    pub fn constant(response: Response) -> Arc<Self> {
        Self::new(move |_, _| response.clone())
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

pub struct FakeEngine {
    script: Arc<Script>,
    fs: MemFs,
    pub env: BTreeMap<String, String>,
    heap: u64,
}

impl FakeEngine {
    pub fn new(script: Arc<Script>) -> Self {
        Self {
            script,
            fs: MemFs::new(),
            env: BTreeMap::new(),
            heap: 16 * 1024 * 1024,
        }
    }

    pub fn memfs(&self) -> &MemFs {
        &self.fs
    }
}

impl Engine for FakeEngine {
    fn call_main(&mut self, args: &[String]) -> Invocation {
        if args.iter().any(|a| a == "--help") {
            return Invocation {
                exit: ExitKind::Exited(0),
                log: vec![LogLine::stdout(self.script.help.clone())],
            };
        }

        self.script.calls.lock().unwrap().push(args.to_vec());
        let response = (self.script.responder)(args, &self.fs);
        if !response.delay.is_zero() {
            thread::sleep(response.delay);
        }
        self.heap += response.heap_growth;

        if let Some(bytes) = &response.output {
            if let Some(pos) = args.iter().position(|a| a == "-o") {
                let path = &args[pos + 1];
                self.fs.write_file(path, bytes).unwrap();
            }
        }

        Invocation {
            exit: response.exit,
            log: response.log.into_iter().map(LogLine::stderr).collect(),
        }
    }

    fn fs(&mut self) -> &mut dyn SandboxFs {
        &mut self.fs
    }

    fn set_env(&mut self, key: &str, value: &str) {
        self.env.insert(key.to_string(), value.to_string());
    }

    fn heap_size(&self) -> u64 {
        self.heap
    }
}

pub struct FakeLoader {
    pub script: Arc<Script>,
    pub loads: Arc<AtomicUsize>,
    pub fail: bool,
    pub load_delay: Duration,
}

impl FakeLoader {
    pub fn new(script: Arc<Script>) -> Self {
        Self {
            script,
            loads: Arc::new(AtomicUsize::new(0)),
            fail: false,
            load_delay: Duration::ZERO,
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Script::constant(Response::success(Vec::new())))
        }
    }
}

impl EngineLoader for FakeLoader {
    fn load(&self) -> Result<Box<dyn Engine>> {
        if self.fail {
            return Err(Error::EngineLoad("engine module missing".to_string()));
        }
        if !self.load_delay.is_zero() {
            thread::sleep(self.load_delay);
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEngine::new(Arc::clone(&self.script))))
    }

    fn describe(&self) -> String {
        "scripted engine".to_string()
    }
}

/// Binary STL with `triangles` zeroed facets
pub fn binary_stl(triangles: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; 80];
    bytes.extend_from_slice(&triangles.to_le_bytes());
    bytes.extend(std::iter::repeat(0u8).take(triangles as usize * 50));
    bytes
}

/// Legacy DXF with one LWPOLYLINE over `points`
pub fn polyline_dxf(points: &[(f64, f64)], closed: bool) -> String {
    let mut out = String::new();
    let mut pair = |code: i32, value: &str| {
        out.push_str(&format!("{:>3}\n{}\n", code, value));
    };
    pair(0, "SECTION");
    pair(2, "HEADER");
    pair(9, "$ACADVER");
    pair(1, "AC1009");
    pair(9, "$EXTMIN");
    pair(10, "0");
    pair(20, "0");
    pair(9, "$EXTMAX");
    pair(10, "10");
    pair(20, "10");
    pair(0, "ENDSEC");
    pair(0, "SECTION");
    pair(2, "ENTITIES");
    pair(0, "LWPOLYLINE");
    pair(100, "AcDbEntity");
    pair(8, "0");
    pair(100, "AcDbPolyline");
    pair(90, &points.len().to_string());
    pair(70, if closed { "1" } else { "0" });
    for (x, y) in points {
        pair(10, &x.to_string());
        pair(20, &y.to_string());
    }
    pair(0, "ENDSEC");
    pair(0, "EOF");
    out
}

pub const SQUARE: [(f64, f64); 4] = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
