// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Capability probing from the engine's help text

use super::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Features detected once after the engine loads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCapabilities {
    /// `--backend=manifold`
    pub alternate_backend: bool,
    /// Older experimental `--enable=fast-csg`
    pub fast_csg: bool,
    /// `--enable=lazy-union`
    pub lazy_union: bool,
    /// `--export-format=binstl`
    pub binary_stl: bool,
    pub version: Option<String>,
    /// RFC 3339 timestamp of detection
    pub detected_at: String,
}

fn backend_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)--backend\b|\bmanifold\b").expect("valid regex"))
}

fn fast_csg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bfast-csg\b").expect("valid regex"))
}

fn lazy_union_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\blazy-union\b").expect("valid regex"))
}

fn binary_stl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bbinstl\b|--export-format\b").expect("valid regex"))
}

fn version_res() -> &'static [Regex; 2] {
    static RES: OnceLock<[Regex; 2]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"(?i)OpenSCAD version\s+([0-9][\w.\-]*)").expect("valid regex"),
            Regex::new(r"\b(20\d{2}\.\d{2}(?:\.\d{2})?(?:\.[\w\-]+)?)\b").expect("valid regex"),
        ]
    })
}

impl EngineCapabilities {
    /// Apply the feature heuristics to help output.
    ///
    /// Empty help text comes from older builds that print nothing: those are
    /// assumed to have the alternate backend but not binary export.
    pub fn from_help_text(help: &str) -> Self {
        let detected_at = chrono::Utc::now().to_rfc3339();

        if help.trim().is_empty() {
            return Self {
                alternate_backend: true,
                fast_csg: false,
                lazy_union: false,
                binary_stl: false,
                version: None,
                detected_at,
            };
        }

        let version = version_res()
            .iter()
            .find_map(|re| re.captures(help))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim_end_matches('.').to_string());

        Self {
            alternate_backend: backend_re().is_match(help),
            fast_csg: fast_csg_re().is_match(help),
            lazy_union: lazy_union_re().is_match(help),
            binary_stl: binary_stl_re().is_match(help),
            version,
            detected_at,
        }
    }

    /// Run `--help` and apply the heuristics to stdout and stderr combined
    pub fn probe(engine: &mut dyn Engine) -> Self {
        let invocation = engine.call_main(&["--help".to_string()]);
        let help = invocation.text();
        let capabilities = Self::from_help_text(&help);

        tracing::info!(
            "Engine capabilities: version={} manifold={} fast-csg={} lazy-union={} binstl={}",
            capabilities.version.as_deref().unwrap_or("unknown"),
            capabilities.alternate_backend,
            capabilities.fast_csg,
            capabilities.lazy_union,
            capabilities.binary_stl
        );
        capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODERN_HELP: &str = "\
Usage: openscad [options] file.scad
  --backend arg            3D rendering backend to use: 'CGAL' (old/slow)
                           [default] or 'Manifold' (new/fast)
  --enable arg             enable experimental features (specify 'all' for
                           enabling all available features): roof |
                           lazy-union | vertex-object-renderers-indexing
  --export-format arg      overrides format of exported scad file when using
                           option '-o', arg can be any of its supported file
                           extensions.  For ascii stl export, specify
                           'asciistl', and for binary stl export, specify
                           'binstl'.
OpenSCAD version 2024.12.06";

    #[test]
    fn test_modern_help() {
        let caps = EngineCapabilities::from_help_text(MODERN_HELP);
        assert!(caps.alternate_backend);
        assert!(caps.lazy_union);
        assert!(caps.binary_stl);
        assert!(!caps.fast_csg);
        assert_eq!(caps.version.as_deref(), Some("2024.12.06"));
    }

    #[test]
    fn test_legacy_fast_csg_help() {
        let help = "--enable arg  enable experimental features: fast-csg | lazy-union\n2021.01";
        let caps = EngineCapabilities::from_help_text(help);
        assert!(caps.fast_csg);
        assert!(!caps.alternate_backend);
        assert!(!caps.binary_stl);
        assert_eq!(caps.version.as_deref(), Some("2021.01"));
    }

    #[test]
    fn test_empty_help_fallback() {
        let caps = EngineCapabilities::from_help_text("  \n");
        assert!(caps.alternate_backend);
        assert!(!caps.binary_stl);
        assert!(!caps.lazy_union);
        assert_eq!(caps.version, None);
    }
}
