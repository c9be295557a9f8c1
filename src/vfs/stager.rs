// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Mount bookkeeping for job files and shared libraries

use super::{
    create_dir_all, join, remove_dir_all, validate_logical_path, write_with_parents, LibraryRef,
    LibrarySource, SandboxFs,
};
use crate::error::{Error, Result};
use crate::utils::encoding::base64_bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Work directory for multi-file projects
pub const WORK_DIR: &str = "/work";

/// Root that every shared library is mounted under
pub const LIBRARY_ROOT: &str = "/libraries";

/// File contents as sent by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileContent {
    Text(String),
    Binary {
        #[serde(with = "base64_bytes")]
        base64: Vec<u8>,
    },
}

impl FileContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContent::Text(text) => text.as_bytes(),
            FileContent::Binary { base64 } => base64,
        }
    }
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        FileContent::Text(text.to_string())
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        FileContent::Binary { base64: bytes }
    }
}

/// Who owns a mounted entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOwner {
    /// Cleared at the start of each multi-file job
    Job,
    /// Persists across jobs until libraries are cleared
    Library(String),
}

/// A file this layer wrote into the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedEntry {
    pub path: String,
    pub owner: MountOwner,
    pub size: usize,
}

/// Outcome of mounting a batch of job files
#[derive(Debug, Clone, Default)]
pub struct MountReport {
    pub mounted: Vec<String>,
    pub rejected: Vec<String>,
}

/// Outcome of mounting libraries
#[derive(Debug, Clone, Default)]
pub struct LibraryReport {
    /// Libraries available after the call (freshly mounted or already present)
    pub available: Vec<String>,
    /// Libraries re-fetched because their root directory went missing
    pub repaired: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Outcome of a cleanup pass; failures are non-fatal
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub failures: Vec<(String, std::io::Error)>,
}

impl CleanupReport {
    /// Log every individual failure at warn level
    pub fn log_failures(&self) {
        for (path, err) in &self.failures {
            tracing::warn!("Cleanup of {} failed: {}", path, err);
        }
    }
}

#[derive(Debug, Clone)]
struct MountedLibrary {
    root: String,
    files: Vec<MountedEntry>,
}

/// Tracks what was mounted so it can be torn down later
#[derive(Debug, Default)]
pub struct Stager {
    job_entries: Vec<MountedEntry>,
    libraries: BTreeMap<String, MountedLibrary>,
}

impl Stager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount host files into the sandbox.
    ///
    /// With `use_work_dir` every file lands under [`WORK_DIR`] so relative
    /// `include`/`use` references resolve as they would beside the main file.
    /// Paths that try to leave the sandbox are skipped, never written.
    pub fn mount(
        &mut self,
        fs: &mut dyn SandboxFs,
        files: &BTreeMap<String, FileContent>,
        use_work_dir: bool,
    ) -> Result<MountReport> {
        let mut report = MountReport::default();
        let base = if use_work_dir { WORK_DIR } else { "/" };

        if use_work_dir {
            create_dir_all(fs, WORK_DIR).map_err(|source| Error::Mount {
                path: WORK_DIR.to_string(),
                source,
            })?;
        }

        for (logical, content) in files {
            let relative = match validate_logical_path(logical) {
                Ok(relative) => relative,
                Err(_) => {
                    tracing::warn!("Rejected sandbox escape in mounted path: {}", logical);
                    report.rejected.push(logical.clone());
                    continue;
                }
            };

            let path = join(base, &relative);
            write_with_parents(fs, &path, content.as_bytes()).map_err(|source| Error::Mount {
                path: path.clone(),
                source,
            })?;
            tracing::debug!("Mounted {} ({} bytes)", path, content.as_bytes().len());

            self.track_job_entry(&path, content.as_bytes().len());
            report.mounted.push(path);
        }

        Ok(report)
    }

    /// Write a single job-scoped file at an exact sandbox path
    pub fn stage_file(&mut self, fs: &mut dyn SandboxFs, path: &str, contents: &[u8]) -> Result<()> {
        write_with_parents(fs, path, contents).map_err(|source| Error::Mount {
            path: path.to_string(),
            source,
        })?;
        self.track_job_entry(path, contents.len());
        Ok(())
    }

    fn track_job_entry(&mut self, path: &str, size: usize) {
        self.job_entries.retain(|entry| entry.path != path);
        self.job_entries.push(MountedEntry {
            path: path.to_string(),
            owner: MountOwner::Job,
            size,
        });
    }

    /// Mount libraries under [`LIBRARY_ROOT`].
    ///
    /// Already-mounted libraries are not fetched again unless their root
    /// directory has disappeared. A library that fails to fetch is logged and
    /// skipped; it does not fail the batch.
    pub fn mount_libraries(
        &mut self,
        fs: &mut dyn SandboxFs,
        source: &dyn LibrarySource,
        libraries: &[LibraryRef],
    ) -> LibraryReport {
        let mut report = LibraryReport::default();

        for library in libraries {
            let id = match validate_logical_path(&library.id) {
                Ok(id) if !id.contains('/') => id,
                _ => {
                    tracing::warn!("Rejected library identifier: {}", library.id);
                    report
                        .failed
                        .push((library.id.clone(), "invalid identifier".to_string()));
                    continue;
                }
            };

            let root = join(LIBRARY_ROOT, &id);
            if let Some(existing) = self.libraries.get(&id) {
                if fs.exists(&existing.root) {
                    report.available.push(id);
                    continue;
                }
                tracing::warn!("Library {} mount went stale, re-fetching", id);
                report.repaired.push(id.clone());
            }

            match self.fetch_and_write(fs, source, library, &id, &root) {
                Ok(files) => {
                    tracing::info!("Mounted library {} ({} files)", id, files.len());
                    self.libraries.insert(id.clone(), MountedLibrary { root, files });
                    report.available.push(id);
                }
                Err(e) => {
                    tracing::warn!("Library {} unavailable: {}", id, e);
                    self.libraries.remove(&id);
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        report
    }

    fn fetch_and_write(
        &self,
        fs: &mut dyn SandboxFs,
        source: &dyn LibrarySource,
        library: &LibraryRef,
        id: &str,
        root: &str,
    ) -> Result<Vec<MountedEntry>> {
        let files = source.fetch(library)?;
        create_dir_all(fs, root).map_err(|e| Error::LibraryMount {
            id: id.to_string(),
            message: e.to_string(),
        })?;

        let mut mounted = Vec::with_capacity(files.len());
        for file in files {
            let path = join(root, &file.path);
            if let Err(e) = write_with_parents(fs, &path, &file.contents) {
                tracing::warn!("Skipping library file {}: {}", path, e);
                continue;
            }
            mounted.push(MountedEntry {
                path,
                owner: MountOwner::Library(id.to_string()),
                size: file.contents.len(),
            });
        }
        Ok(mounted)
    }

    /// Remove every job-scoped mount and the work directory tree
    pub fn clear_files(&mut self, fs: &mut dyn SandboxFs) -> CleanupReport {
        let mut report = CleanupReport::default();

        for entry in self.job_entries.drain(..) {
            match fs.remove_file(&entry.path) {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => report.failures.push((entry.path, e)),
            }
        }
        report.failures.extend(remove_dir_all(fs, WORK_DIR));

        report.log_failures();
        report
    }

    /// Unmount every library
    pub fn clear_libraries(&mut self, fs: &mut dyn SandboxFs) -> CleanupReport {
        let mut report = CleanupReport::default();
        for (_, library) in std::mem::take(&mut self.libraries) {
            report.removed += library.files.len();
            report.failures.extend(remove_dir_all(fs, &library.root));
        }
        report.failures.extend(remove_dir_all(fs, LIBRARY_ROOT));

        report.log_failures();
        report
    }

    /// Module search path: the work directory first when in use, then libraries
    pub fn module_search_path(&self, use_work_dir: bool) -> String {
        if use_work_dir {
            format!("{}:{}", WORK_DIR, LIBRARY_ROOT)
        } else {
            LIBRARY_ROOT.to_string()
        }
    }

    /// Job-scoped entries currently tracked
    pub fn job_entries(&self) -> &[MountedEntry] {
        &self.job_entries
    }

    /// Library entries currently tracked
    pub fn library_entries(&self) -> impl Iterator<Item = &MountedEntry> {
        self.libraries.values().flat_map(|library| library.files.iter())
    }

    pub fn is_library_mounted(&self, id: &str) -> bool {
        self.libraries.contains_key(id)
    }

    pub fn library_count(&self) -> usize {
        self.libraries.len()
    }
}
