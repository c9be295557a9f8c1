// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Sandbox filesystem staging
//!
//! The engine never sees the host filesystem directly. Everything it reads
//! (sources, companion files, libraries, fonts) and writes (exports) goes
//! through a [`SandboxFs`], addressed by sandbox-absolute paths such as
//! `/work/main.scad`.

mod dir;
mod library;
mod memory;
mod stager;

pub use dir::DirFs;
pub use library::{AssetLibraries, LibraryFile, LibraryRef, LibrarySource};
pub use memory::MemFs;
pub use stager::{
    CleanupReport, FileContent, LibraryReport, MountOwner, MountReport, MountedEntry, Stager,
    LIBRARY_ROOT, WORK_DIR,
};

use crate::error::{Error, Result};
use std::io;

/// Kind of a sandbox entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// Minimal filesystem surface the engine sandbox exposes
pub trait SandboxFs: Send {
    /// Create a single directory. Fails with `AlreadyExists` if present and
    /// `NotFound` if the parent is missing.
    fn create_dir(&mut self, path: &str) -> io::Result<()>;

    /// Create or truncate a file. The parent directory must exist.
    fn write_file(&mut self, path: &str, contents: &[u8]) -> io::Result<()>;

    fn read_file(&self, path: &str) -> io::Result<Vec<u8>>;

    fn remove_file(&mut self, path: &str) -> io::Result<()>;

    /// Remove an empty directory
    fn remove_dir(&mut self, path: &str) -> io::Result<()>;

    /// Names of the direct children of a directory
    fn read_dir(&self, path: &str) -> io::Result<Vec<String>>;

    /// Kind of the entry at `path`, `None` if it does not exist
    fn kind(&self, path: &str) -> Option<EntryKind>;

    fn exists(&self, path: &str) -> bool {
        self.kind(path).is_some()
    }
}

/// Validate a host-supplied relative path.
///
/// Parent segments, absolute paths and drive prefixes are rejected outright.
/// `.` segments, empty segments and backslashes are normalized away.
pub fn validate_logical_path(path: &str) -> Result<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(Error::PathRejected("empty path".to_string()));
    }

    if trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return Err(Error::PathRejected(path.to_string()));
    }

    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(Error::PathRejected(path.to_string()));
    }

    let mut segments = Vec::new();
    for segment in trimmed.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(Error::PathRejected(path.to_string())),
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(Error::PathRejected(path.to_string()));
    }

    Ok(segments.join("/"))
}

/// Join a sandbox directory and a validated relative path
pub fn join(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches('/');
    if relative.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, relative)
    }
}

/// Parent directory of a sandbox path (`/` for top-level entries)
pub fn parent(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Create a directory and all of its ancestors.
///
/// "Already exists" is ignored at every level; any other error propagates.
pub fn create_dir_all(fs: &mut dyn SandboxFs, path: &str) -> io::Result<()> {
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        match fs.create_dir(&current) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Write a file, creating its parent directories first
pub fn write_with_parents(fs: &mut dyn SandboxFs, path: &str, contents: &[u8]) -> io::Result<()> {
    create_dir_all(fs, parent(path))?;
    fs.write_file(path, contents)
}

/// Recursively delete a directory tree.
///
/// Missing entries are not an error. Individual failures are collected and
/// returned so the caller can log them.
pub fn remove_dir_all(fs: &mut dyn SandboxFs, path: &str) -> Vec<(String, io::Error)> {
    let mut failures = Vec::new();
    remove_tree(fs, path, &mut failures);
    failures
}

fn remove_tree(fs: &mut dyn SandboxFs, path: &str, failures: &mut Vec<(String, io::Error)>) {
    match fs.kind(path) {
        None => {}
        Some(EntryKind::File) => {
            if let Err(e) = fs.remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    failures.push((path.to_string(), e));
                }
            }
        }
        Some(EntryKind::Dir) => {
            match fs.read_dir(path) {
                Ok(children) => {
                    for child in children {
                        remove_tree(fs, &join(path, &child), failures);
                    }
                }
                Err(e) => failures.push((path.to_string(), e)),
            }
            if let Err(e) = fs.remove_dir(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    failures.push((path.to_string(), e));
                }
            }
        }
    }
}
