// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Render jobs: request model, argument building, guard scan and execution

pub mod args;
pub mod executor;
pub mod guard;

pub use executor::{interpret, Executor, Verdict};

use crate::classify::{ErrorClassification, ErrorCode};
use crate::monitor::MemoryWarning;
use crate::vfs::{FileContent, LibraryRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Export formats the engine can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Stl,
    Off,
    Amf,
    #[serde(rename = "3mf")]
    ThreeMf,
    Obj,
    Svg,
    Dxf,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Stl => "stl",
            OutputFormat::Off => "off",
            OutputFormat::Amf => "amf",
            OutputFormat::ThreeMf => "3mf",
            OutputFormat::Obj => "obj",
            OutputFormat::Svg => "svg",
            OutputFormat::Dxf => "dxf",
        }
    }

    /// 2D drawing formats; everything else needs 3D geometry
    pub fn is_2d(self) -> bool {
        matches!(self, OutputFormat::Svg | OutputFormat::Dxf)
    }

    pub fn is_3d(self) -> bool {
        !self.is_2d()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "stl" => Ok(OutputFormat::Stl),
            "off" => Ok(OutputFormat::Off),
            "amf" => Ok(OutputFormat::Amf),
            "3mf" => Ok(OutputFormat::ThreeMf),
            "obj" => Ok(OutputFormat::Obj),
            "svg" => Ok(OutputFormat::Svg),
            "dxf" => Ok(OutputFormat::Dxf),
            other => Err(format!("unsupported output format: {}", other)),
        }
    }
}

/// A parameter value as sent by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<ParamValue>),
    File { name: String },
}

/// Declared schema type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Number,
    String,
    Boolean,
    Color,
    File,
    Vector,
    #[serde(other)]
    Other,
}

/// Which geometry backend to ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Fastest backend the engine supports
    #[default]
    Auto,
    Manifold,
    Cgal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    pub backend: Backend,
    pub lazy_union: bool,
}

/// One render job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub request_id: String,
    pub source_text: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub param_types: BTreeMap<String, ParamType>,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub files: BTreeMap<String, FileContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_file: Option<String>,
    #[serde(default)]
    pub libraries: Vec<LibraryRef>,
    #[serde(default)]
    pub render_options: RenderOptions,
}

impl RenderRequest {
    pub fn new(request_id: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            source_text: source_text.into(),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_param(mut self, name: &str, value: ParamValue, ty: Option<ParamType>) -> Self {
        self.parameters.insert(name.to_string(), value);
        if let Some(ty) = ty {
            self.param_types.insert(name.to_string(), ty);
        }
        self
    }

    /// Multi-file jobs stage everything under the work directory
    pub fn is_multi_file(&self) -> bool {
        !self.files.is_empty() || self.main_file.is_some()
    }
}

/// Derived statistics of an output payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    /// Triangles for meshes, entities or shapes for drawings
    pub primitive_count: u64,
    pub byte_size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTiming {
    pub mount_ms: u64,
    pub render_ms: u64,
    pub validate_ms: u64,
    pub total_ms: u64,
}

/// A successful job
#[derive(Debug, Clone)]
pub struct JobResult {
    pub request_id: String,
    pub output: Vec<u8>,
    pub format: OutputFormat,
    pub stats: JobStats,
    pub timing: JobTiming,
    pub transcript: Vec<String>,
    /// Non-fatal conditions (non-manifold output, ignored options)
    pub warnings: Vec<ErrorClassification>,
}

/// Executor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Mounting,
    ArgBuild,
    GuardScan,
    Executing,
    Interpreting,
    Complete,
    Failed,
}

impl JobPhase {
    pub fn name(self) -> &'static str {
        match self {
            JobPhase::Mounting => "MOUNTING",
            JobPhase::ArgBuild => "ARG_BUILD",
            JobPhase::GuardScan => "GUARD_SCAN",
            JobPhase::Executing => "EXECUTING",
            JobPhase::Interpreting => "INTERPRETING",
            JobPhase::Complete => "COMPLETE",
            JobPhase::Failed => "FAILED",
        }
    }

    /// Rough progress figure reported to the host
    pub fn percent(self) -> u8 {
        match self {
            JobPhase::Mounting => 5,
            JobPhase::ArgBuild => 10,
            JobPhase::GuardScan => 15,
            JobPhase::Executing => 20,
            JobPhase::Interpreting => 90,
            JobPhase::Complete | JobPhase::Failed => 100,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            JobPhase::Mounting => "Mounting files",
            JobPhase::ArgBuild => "Building arguments",
            JobPhase::GuardScan => "Checking source",
            JobPhase::Executing => "Rendering",
            JobPhase::Interpreting => "Processing output",
            JobPhase::Complete => "Complete",
            JobPhase::Failed => "Failed",
        }
    }
}

/// Something worth telling the host while a job runs
#[derive(Debug, Clone)]
pub enum JobEvent {
    Phase(JobPhase),
    Warning(String),
    Memory(MemoryWarning),
}

/// Why a job failed
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// Ordinary classified failure; the engine stays usable
    #[error("{}: {}", .0.code, .0.message)]
    Failed(ErrorClassification),

    /// The engine aborted or trapped and must be recreated
    #[error("engine corrupted ({}): {}", .classification.code, .classification.message)]
    EngineCorrupted {
        abort_code: Option<i64>,
        classification: ErrorClassification,
    },
}

impl JobError {
    pub fn classification(&self) -> &ErrorClassification {
        match self {
            JobError::Failed(classification) => classification,
            JobError::EngineCorrupted { classification, .. } => classification,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.classification().code
    }

    pub fn needs_restart(&self) -> bool {
        match self {
            JobError::Failed(classification) => classification.needs_restart,
            JobError::EngineCorrupted { .. } => true,
        }
    }
}

/// A failed job together with what the engine printed
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub error: JobError,
    pub transcript: Vec<String>,
}

impl JobFailure {
    pub fn new(error: JobError, transcript: Vec<String>) -> Self {
        Self { error, transcript }
    }
}
