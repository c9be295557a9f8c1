// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Shared library bundles (BOSL2, MCAD, ...)

use super::validate_logical_path;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::ZipArchive;

/// A library the host wants available to `include`/`use`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryRef {
    /// Identifier, also the directory name under the library root
    pub id: String,
    /// Optional bundle location relative to the library source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
}

impl LibraryRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bundle: None,
        }
    }
}

/// One file of a fetched library, path relative to the library's own root
#[derive(Debug, Clone)]
pub struct LibraryFile {
    pub path: String,
    pub contents: Vec<u8>,
}

/// Where library bundles come from
pub trait LibrarySource: Send + Sync {
    fn fetch(&self, library: &LibraryRef) -> Result<Vec<LibraryFile>>;
}

/// Libraries stored under `<asset_dir>/libraries` as `.zip` bundles or
/// plain directories
#[derive(Debug, Clone)]
pub struct AssetLibraries {
    root: PathBuf,
}

impl AssetLibraries {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Library source rooted at `<asset_dir>/libraries`
    pub fn in_asset_dir(asset_dir: &Path) -> Self {
        Self::new(asset_dir.join("libraries"))
    }

    fn bundle_path(&self, library: &LibraryRef) -> Result<PathBuf> {
        let name = match &library.bundle {
            Some(bundle) => validate_logical_path(bundle)?,
            None => validate_logical_path(&library.id)?,
        };
        Ok(self.root.join(name))
    }

    fn read_zip(path: &Path) -> Result<Vec<LibraryFile>> {
        let file = fs::File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        let mut files = Vec::new();

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let raw_name = entry.name().to_string();
            let name = match validate_logical_path(&raw_name) {
                Ok(name) => name,
                Err(_) => {
                    tracing::warn!("Skipping unsafe archive entry {} in {}", raw_name, path.display());
                    continue;
                }
            };
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            files.push(LibraryFile {
                path: name,
                contents,
            });
        }

        Ok(strip_shared_prefix(files))
    }

    fn read_dir(path: &Path) -> Result<Vec<LibraryFile>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|e| Error::LibraryMount {
                id: path.display().to_string(),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(path) {
                Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            files.push(LibraryFile {
                path: validate_logical_path(&relative)?,
                contents: fs::read(entry.path())?,
            });
        }
        Ok(files)
    }
}

impl LibrarySource for AssetLibraries {
    fn fetch(&self, library: &LibraryRef) -> Result<Vec<LibraryFile>> {
        let base = self.bundle_path(library)?;
        let zipped = if base.extension().is_some_and(|ext| ext == "zip") {
            base.clone()
        } else {
            let mut name = base.clone().into_os_string();
            name.push(".zip");
            PathBuf::from(name)
        };

        if zipped.is_file() {
            Self::read_zip(&zipped)
        } else if base.is_dir() {
            Self::read_dir(&base)
        } else {
            Err(Error::LibraryMount {
                id: library.id.clone(),
                message: format!("no bundle at {}", base.display()),
            })
        }
    }
}

/// Drop a single top-level folder shared by every entry
/// (`BOSL2-master/std.scad` -> `std.scad`).
fn strip_shared_prefix(files: Vec<LibraryFile>) -> Vec<LibraryFile> {
    let first = match files.first().and_then(|f| f.path.split_once('/')) {
        Some((prefix, _)) => prefix.to_string(),
        None => return files,
    };
    let shared = files.iter().all(|f| {
        f.path
            .split_once('/')
            .is_some_and(|(prefix, _)| prefix == first)
    });
    if !shared {
        return files;
    }
    files
        .into_iter()
        .map(|f| LibraryFile {
            path: f.path[first.len() + 1..].to_string(),
            contents: f.contents,
        })
        .collect()
}
