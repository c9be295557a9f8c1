// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Font assets for `text()`

use super::Engine;
use crate::vfs::{create_dir_all, join};
use std::fs;
use std::path::Path;

/// Sandbox directory fonts are mounted into
pub const FONT_DIR: &str = "/fonts";

/// Fonts mounted at startup
pub const FONT_FILES: &[&str] = &[
    "LiberationSans-Regular.ttf",
    "LiberationSans-Bold.ttf",
    "LiberationSans-Italic.ttf",
    "LiberationSans-BoldItalic.ttf",
    "LiberationMono-Regular.ttf",
    "LiberationSerif-Regular.ttf",
];

#[derive(Debug, Clone, Default)]
pub struct FontReport {
    pub mounted: Vec<String>,
    pub missing: Vec<String>,
}

fn fonts_conf(font_dir: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<!DOCTYPE fontconfig SYSTEM "fonts.dtd">
<fontconfig>
  <dir>{}</dir>
  <cachedir>{}/cache</cachedir>
</fontconfig>
"#,
        font_dir, font_dir
    )
}

/// Copy the font set from `<asset_dir>/fonts` into the sandbox.
///
/// A font that cannot be read or written is logged and skipped. Text
/// rendering degrades but startup continues.
pub fn mount_fonts(engine: &mut dyn Engine, asset_dir: &Path) -> FontReport {
    let mut report = FontReport::default();
    let source_dir = asset_dir.join("fonts");

    if let Err(e) = create_dir_all(engine.fs(), FONT_DIR) {
        tracing::warn!("Cannot create {}: {}", FONT_DIR, e);
        report.missing = FONT_FILES.iter().map(|f| f.to_string()).collect();
        return report;
    }

    for name in FONT_FILES {
        let bytes = match fs::read(source_dir.join(name)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Font {} unavailable: {}", name, e);
                report.missing.push(name.to_string());
                continue;
            }
        };
        let target = join(FONT_DIR, name);
        match engine.fs().write_file(&target, &bytes) {
            Ok(()) => report.mounted.push(name.to_string()),
            Err(e) => {
                tracing::warn!("Font {} could not be mounted: {}", name, e);
                report.missing.push(name.to_string());
            }
        }
    }

    let conf_path = join(FONT_DIR, "fonts.conf");
    let conf = fonts_conf(&engine.resolve_path(FONT_DIR));
    match engine.fs().write_file(&conf_path, conf.as_bytes()) {
        Ok(()) => {
            engine.set_env("FONTCONFIG_FILE", &conf_path);
            engine.set_env("FONTCONFIG_PATH", FONT_DIR);
        }
        Err(e) => tracing::warn!("fonts.conf could not be written: {}", e),
    }

    tracing::info!(
        "Mounted {}/{} fonts",
        report.mounted.len(),
        FONT_FILES.len()
    );
    report
}
