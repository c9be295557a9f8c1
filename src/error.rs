// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Error types for the render orchestration layer

use thiserror::Error;

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised outside of a job's classified failure path.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine executable or module could not be loaded.
    #[error("engine load failed: {0}")]
    EngineLoad(String),

    /// A logical path tried to leave the sandbox.
    #[error("rejected sandbox path: {0}")]
    PathRejected(String),

    /// Writing a job file into the sandbox failed.
    #[error("failed to mount {path}: {source}")]
    Mount {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A library bundle could not be fetched or written.
    #[error("library '{id}' could not be mounted: {message}")]
    LibraryMount { id: String, message: String },

    /// Engine output failed structural validation.
    #[error("invalid {format} output: {message}")]
    InvalidOutput { format: String, message: String },

    /// Engine output has no drawable content.
    #[error("empty {format} output: {message}")]
    EmptyOutput { format: String, message: String },

    /// Legacy vector output could not be parsed.
    #[error("malformed DXF: {0}")]
    Dxf(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Zip archive error (library bundles, 3MF payloads).
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// XML error (SVG, 3MF, AMF payloads).
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}
