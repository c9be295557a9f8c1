// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Polyframe Render
//!
//! Job orchestration for a sandboxed OpenSCAD engine: stages sources and
//! libraries into the engine's filesystem, runs one render at a time,
//! validates and repairs what comes back, and turns engine diagnostics
//! into structured, actionable errors.

pub mod classify;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod monitor;
pub mod output;
pub mod protocol;
pub mod session;
pub mod utils;
pub mod vfs;

pub use classify::{classify, ErrorClassification, ErrorCode};
pub use config::RenderConfig;
pub use engine::{Engine, EngineCapabilities, EngineLoader, ProcessEngineLoader};
pub use error::{Error, Result};
pub use job::{JobError, JobFailure, JobResult, OutputFormat, ParamValue, RenderRequest};
pub use monitor::HealthMonitor;
pub use protocol::{Dispatcher, HostEvent, HostRequest};
pub use session::{InitStage, Session};
