// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Host-facing message protocol
//!
//! Requests and events are serde enums tagged by `type`, so they travel as
//! self-describing JSON objects:
//!
//! ```json
//! {"type":"render","requestId":"r1","sourceText":"cube(10);","outputFormat":"stl"}
//! {"type":"complete","requestId":"r1","output":"<base64>","format":"stl",...}
//! ```

mod dispatcher;
pub mod stdio;

pub use dispatcher::Dispatcher;

use crate::classify::{ErrorClassification, ErrorCode};
use crate::engine::EngineCapabilities;
use crate::job::{JobFailure, JobResult, JobStats, JobTiming, OutputFormat, RenderRequest};
use crate::monitor::{MemoryUsage, MemoryWarning};
use crate::utils::encoding::base64_bytes;
use crate::vfs::{FileContent, LibraryRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Messages from the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostRequest {
    #[serde(rename_all = "camelCase")]
    Init {
        /// Asset directory; the configured one when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        asset_base_url: Option<String>,
    },
    Render(RenderRequest),
    #[serde(rename_all = "camelCase")]
    Cancel { request_id: String },
    MountFiles {
        files: BTreeMap<String, FileContent>,
    },
    ClearFiles,
    MountLibraries {
        libraries: Vec<LibraryRef>,
    },
    ClearLibraries,
    Ping {
        id: String,
    },
    GetMemoryUsage,
}

/// Messages to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        stage: String,
        percent: u8,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Ready {
        capabilities: EngineCapabilities,
        init_duration_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Warning {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        request_id: String,
        #[serde(with = "base64_bytes")]
        output: Vec<u8>,
        format: OutputFormat,
        stats: JobStats,
        timing: JobTiming,
        console_transcript: Vec<String>,
        #[serde(default)]
        warnings: Vec<ErrorClassification>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: ErrorCode,
        message: String,
        details: String,
        #[serde(default)]
        console_transcript: Vec<String>,
        needs_restart: bool,
    },
    #[serde(rename_all = "camelCase")]
    FilesMounted {
        count: usize,
        #[serde(default)]
        rejected: Vec<String>,
    },
    FilesCleared,
    #[serde(rename_all = "camelCase")]
    LibrariesMounted {
        count: usize,
        #[serde(default)]
        failed: Vec<String>,
    },
    LibrariesCleared,
    #[serde(rename_all = "camelCase")]
    Pong {
        id: String,
        /// Milliseconds since the Unix epoch
        timestamp: i64,
        initialized: bool,
        busy: bool,
    },
    MemoryUsage(MemoryUsage),
    MemoryWarning(MemoryWarning),
}

impl HostEvent {
    pub fn complete(result: JobResult) -> Self {
        HostEvent::Complete {
            request_id: result.request_id,
            output: result.output,
            format: result.format,
            stats: result.stats,
            timing: result.timing,
            console_transcript: result.transcript,
            warnings: result.warnings,
        }
    }

    pub fn error(
        request_id: Option<&str>,
        classification: &ErrorClassification,
        console_transcript: Vec<String>,
        needs_restart: bool,
    ) -> Self {
        HostEvent::Error {
            request_id: request_id.map(str::to_string),
            code: classification.code,
            message: classification.message.clone(),
            details: classification.raw.clone(),
            console_transcript,
            needs_restart,
        }
    }

    pub fn failure(request_id: &str, failure: JobFailure) -> Self {
        let needs_restart = failure.error.needs_restart();
        Self::error(
            Some(request_id),
            failure.error.classification(),
            failure.transcript,
            needs_restart,
        )
    }

    /// Request this event settles, if any
    pub fn request_id(&self) -> Option<&str> {
        match self {
            HostEvent::Progress { request_id, .. }
            | HostEvent::Warning { request_id, .. }
            | HostEvent::Error { request_id, .. } => request_id.as_deref(),
            HostEvent::Complete { request_id, .. } => Some(request_id),
            _ => None,
        }
    }

    /// `complete` or `error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, HostEvent::Complete { .. } | HostEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let cancel: HostRequest =
            serde_json::from_str(r#"{"type":"cancel","requestId":"r7"}"#).unwrap();
        assert_eq!(
            cancel,
            HostRequest::Cancel {
                request_id: "r7".into()
            }
        );

        let render: HostRequest = serde_json::from_str(
            r#"{"type":"render","requestId":"r1","sourceText":"square(5);","outputFormat":"svg"}"#,
        )
        .unwrap();
        match render {
            HostRequest::Render(request) => {
                assert_eq!(request.request_id, "r1");
                assert_eq!(request.output_format, OutputFormat::Svg);
            }
            other => panic!("unexpected {:?}", other),
        }

        let memory: HostRequest = serde_json::from_str(r#"{"type":"getMemoryUsage"}"#).unwrap();
        assert_eq!(memory, HostRequest::GetMemoryUsage);
    }

    #[test]
    fn test_event_wire_format() {
        let event = HostEvent::Pong {
            id: "p1".into(),
            timestamp: 1,
            initialized: true,
            busy: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(json["initialized"], true);

        let classification = ErrorClassification::for_code(ErrorCode::ModelNot2d, "raw");
        let json = serde_json::to_value(HostEvent::error(Some("r1"), &classification, vec![], false)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "MODEL_NOT_2D");
        assert_eq!(json["needsRestart"], false);
        assert_eq!(json["details"], "raw");

        let usage = HostEvent::MemoryUsage(MemoryUsage {
            used_bytes: 10,
            limit_bytes: 100,
            percent: 10.0,
            growth_since_baseline: 0,
        });
        let json = serde_json::to_value(&usage).unwrap();
        assert_eq!(json["type"], "memoryUsage");
        assert_eq!(json["usedBytes"], 10);
    }
}
