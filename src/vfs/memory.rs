// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! In-memory sandbox filesystem

use super::{parent, EntryKind, SandboxFs};
use std::collections::BTreeMap;
use std::io;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

/// Flat map of normalized absolute paths to nodes. `/` always exists.
#[derive(Debug, Clone)]
pub struct MemFs {
    nodes: BTreeMap<String, Node>,
}

impl MemFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self { nodes }
    }

    /// Total bytes stored in files
    pub fn stored_bytes(&self) -> usize {
        self.nodes
            .values()
            .map(|node| match node {
                Node::File(data) => data.len(),
                Node::Dir => 0,
            })
            .sum()
    }

    /// Every file path currently stored, sorted
    pub fn files(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| matches!(node, Node::File(_)))
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn normalize(path: &str) -> String {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    fn require_parent_dir(&self, path: &str) -> io::Result<()> {
        match self.nodes.get(parent(path)) {
            Some(Node::Dir) => Ok(()),
            Some(Node::File(_)) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("parent of {} is a file", path),
            )),
            None => Err(not_found(parent(path))),
        }
    }

    fn children<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(move |(path, _)| path.starts_with(&prefix))
            .filter_map(move |(path, _)| {
                let rest = path[dir.len().max(1)..].trim_start_matches('/');
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(path.rsplit('/').next().unwrap_or(""))
                }
            })
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such entry: {}", path))
}

impl SandboxFs for MemFs {
    fn create_dir(&mut self, path: &str) -> io::Result<()> {
        let path = Self::normalize(path);
        if self.nodes.contains_key(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path),
            ));
        }
        self.require_parent_dir(&path)?;
        self.nodes.insert(path, Node::Dir);
        Ok(())
    }

    fn write_file(&mut self, path: &str, contents: &[u8]) -> io::Result<()> {
        let path = Self::normalize(path);
        if let Some(Node::Dir) = self.nodes.get(&path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", path),
            ));
        }
        self.require_parent_dir(&path)?;
        self.nodes.insert(path, Node::File(contents.to_vec()));
        Ok(())
    }

    fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        let path = Self::normalize(path);
        match self.nodes.get(&path) {
            Some(Node::File(data)) => Ok(data.clone()),
            Some(Node::Dir) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", path),
            )),
            None => Err(not_found(&path)),
        }
    }

    fn remove_file(&mut self, path: &str) -> io::Result<()> {
        let path = Self::normalize(path);
        match self.nodes.get(&path) {
            Some(Node::File(_)) => {
                self.nodes.remove(&path);
                Ok(())
            }
            Some(Node::Dir) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", path),
            )),
            None => Err(not_found(&path)),
        }
    }

    fn remove_dir(&mut self, path: &str) -> io::Result<()> {
        let path = Self::normalize(path);
        if path == "/" {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot remove sandbox root",
            ));
        }
        match self.nodes.get(&path) {
            Some(Node::Dir) => {
                if self.children(&path).next().is_some() {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("{} is not empty", path),
                    ));
                }
                self.nodes.remove(&path);
                Ok(())
            }
            Some(Node::File(_)) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a directory", path),
            )),
            None => Err(not_found(&path)),
        }
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let path = Self::normalize(path);
        match self.nodes.get(&path) {
            Some(Node::Dir) => Ok(self.children(&path).map(str::to_string).collect()),
            Some(Node::File(_)) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a directory", path),
            )),
            None => Err(not_found(&path)),
        }
    }

    fn kind(&self, path: &str) -> Option<EntryKind> {
        match self.nodes.get(&Self::normalize(path))? {
            Node::Dir => Some(EntryKind::Dir),
            Node::File(_) => Some(EntryKind::File),
        }
    }
}
