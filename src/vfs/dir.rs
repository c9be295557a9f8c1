// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Directory-backed sandbox filesystem used by process engines

use super::{EntryKind, SandboxFs};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maps sandbox-absolute paths onto a private host directory
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host location of a sandbox path.
    ///
    /// Callers hand in paths that were already validated or built by this
    /// crate; parent segments are dropped here as a second line.
    pub fn host_path(&self, sandbox_path: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in sandbox_path.split('/') {
            match segment {
                "" | "." | ".." => continue,
                other => path.push(other),
            }
        }
        path
    }
}

impl SandboxFs for DirFs {
    fn create_dir(&mut self, path: &str) -> io::Result<()> {
        fs::create_dir(self.host_path(path))
    }

    fn write_file(&mut self, path: &str, contents: &[u8]) -> io::Result<()> {
        fs::write(self.host_path(path), contents)
    }

    fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.host_path(path))
    }

    fn remove_file(&mut self, path: &str) -> io::Result<()> {
        fs::remove_file(self.host_path(path))
    }

    fn remove_dir(&mut self, path: &str) -> io::Result<()> {
        let host = self.host_path(path);
        if host == self.root {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot remove sandbox root",
            ));
        }
        fs::remove_dir(host)
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.host_path(path))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn kind(&self, path: &str) -> Option<EntryKind> {
        let metadata = fs::metadata(self.host_path(path)).ok()?;
        if metadata.is_dir() {
            Some(EntryKind::Dir)
        } else {
            Some(EntryKind::File)
        }
    }
}
