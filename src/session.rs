// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Engine session: one loaded engine plus everything mounted into it.
//!
//! A restart is discarding the session and starting a new one.

use crate::config::RenderConfig;
use crate::engine::{
    mount_fonts, verify_assets, Engine, EngineCapabilities, EngineLoader, FontReport,
    IntegrityWarning, InterruptHandle,
};
use crate::error::Result;
use crate::job::{Executor, JobEvent, JobFailure, JobResult, RenderRequest};
use crate::monitor::HealthMonitor;
use crate::vfs::{
    AssetLibraries, CleanupReport, FileContent, LibraryRef, LibraryReport, LibrarySource,
    MountReport, Stager,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Startup stages reported as progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStage {
    VerifyingAssets,
    LoadingEngine,
    ProbingCapabilities,
    MountingFonts,
    Ready,
}

impl InitStage {
    /// Wire name of the stage
    pub fn name(self) -> &'static str {
        match self {
            InitStage::VerifyingAssets => "verifying_assets",
            InitStage::LoadingEngine => "loading_engine",
            InitStage::ProbingCapabilities => "probing_capabilities",
            InitStage::MountingFonts => "mounting_fonts",
            InitStage::Ready => "ready",
        }
    }

    pub fn percent(self) -> u8 {
        match self {
            InitStage::VerifyingAssets => 10,
            InitStage::LoadingEngine => 30,
            InitStage::ProbingCapabilities => 60,
            InitStage::MountingFonts => 80,
            InitStage::Ready => 100,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            InitStage::VerifyingAssets => "Verifying engine assets",
            InitStage::LoadingEngine => "Loading geometry engine",
            InitStage::ProbingCapabilities => "Detecting engine features",
            InitStage::MountingFonts => "Loading fonts",
            InitStage::Ready => "Ready",
        }
    }
}

pub struct Session {
    engine: Box<dyn Engine>,
    capabilities: EngineCapabilities,
    stager: Stager,
    libraries: Arc<dyn LibrarySource>,
    asset_dir: PathBuf,
    integrity_warnings: Vec<IntegrityWarning>,
    fonts: FontReport,
    init_duration: Duration,
}

impl Session {
    /// Load an engine and bring it to a ready state.
    ///
    /// Only a failed engine load is fatal. Manifest mismatches and missing
    /// fonts are recorded and startup continues.
    pub fn start(
        loader: &dyn EngineLoader,
        config: &RenderConfig,
        on_progress: &mut dyn FnMut(InitStage),
    ) -> Result<Self> {
        let libraries: Arc<dyn LibrarySource> =
            Arc::new(AssetLibraries::in_asset_dir(&config.asset_dir));
        Self::start_with_libraries(loader, config, libraries, on_progress)
    }

    pub fn start_with_libraries(
        loader: &dyn EngineLoader,
        config: &RenderConfig,
        libraries: Arc<dyn LibrarySource>,
        on_progress: &mut dyn FnMut(InitStage),
    ) -> Result<Self> {
        let started = Instant::now();
        tracing::info!("Starting engine session from {}", loader.describe());

        on_progress(InitStage::VerifyingAssets);
        let integrity_warnings = verify_assets(&config.asset_dir, config.verify_checksums);

        on_progress(InitStage::LoadingEngine);
        let mut engine = loader.load()?;

        on_progress(InitStage::ProbingCapabilities);
        let capabilities = EngineCapabilities::probe(engine.as_mut());

        on_progress(InitStage::MountingFonts);
        let fonts = mount_fonts(engine.as_mut(), &config.asset_dir);

        on_progress(InitStage::Ready);
        let init_duration = started.elapsed();
        tracing::info!("Engine session ready in {}ms", init_duration.as_millis());

        Ok(Self {
            engine,
            capabilities,
            stager: Stager::new(),
            libraries,
            asset_dir: config.asset_dir.clone(),
            integrity_warnings,
            fonts,
            init_duration,
        })
    }

    pub fn capabilities(&self) -> &EngineCapabilities {
        &self.capabilities
    }

    pub fn integrity_warnings(&self) -> &[IntegrityWarning] {
        &self.integrity_warnings
    }

    pub fn fonts(&self) -> &FontReport {
        &self.fonts
    }

    pub fn init_duration(&self) -> Duration {
        self.init_duration
    }

    pub fn asset_dir(&self) -> &Path {
        &self.asset_dir
    }

    pub fn heap_size(&self) -> u64 {
        self.engine.heap_size()
    }

    pub fn interrupt_handle(&self) -> Option<InterruptHandle> {
        self.engine.interrupt_handle()
    }

    /// Run one job on this session's engine
    pub fn render(
        &mut self,
        request: &RenderRequest,
        monitor: &mut HealthMonitor,
        events: &mut dyn FnMut(JobEvent),
    ) -> std::result::Result<JobResult, JobFailure> {
        let mut executor = Executor::new(
            self.engine.as_mut(),
            &mut self.stager,
            &self.capabilities,
            self.libraries.as_ref(),
            monitor,
        );
        executor.run(request, events)
    }

    /// Pre-mount project files under the work directory
    pub fn mount_files(&mut self, files: &BTreeMap<String, FileContent>) -> Result<MountReport> {
        self.stager.mount(self.engine.fs(), files, true)
    }

    pub fn clear_files(&mut self) -> CleanupReport {
        self.stager.clear_files(self.engine.fs())
    }

    pub fn mount_libraries(&mut self, libraries: &[LibraryRef]) -> LibraryReport {
        self.stager
            .mount_libraries(self.engine.fs(), self.libraries.as_ref(), libraries)
    }

    pub fn clear_libraries(&mut self) -> CleanupReport {
        self.stager.clear_libraries(self.engine.fs())
    }

    /// Explicit teardown. Cleanup failures are logged, never raised.
    pub fn teardown(mut self) {
        let files = self.clear_files();
        let libraries = self.clear_libraries();
        tracing::info!(
            "Engine session torn down ({} files, {} library files removed)",
            files.removed,
            libraries.removed
        );
    }
}
