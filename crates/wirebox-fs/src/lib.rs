#![forbid(unsafe_code)]

//! In-memory filesystem backing the machines on a wirebox network.
//!
//! The tree is seeded from the network configuration document and lives
//! entirely in memory; paths are `/`-separated and absolute (a leading `/`
//! is accepted and ignored).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("no such entry: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("not a file: {0}")]
    NotAFile(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("entry already exists: {0}")]
    AlreadyExists(String),
}

/// Seed document node: a string is file content, a map is a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeedNode {
    File(String),
    Dir(BTreeMap<String, SeedNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub kind: NodeKind,
    /// File size in bytes; zero for directories.
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir(BTreeMap<String, Node>),
}

impl Node {
    fn from_seed(seed: &SeedNode) -> Node {
        match seed {
            SeedNode::File(content) => Node::File(content.clone().into_bytes()),
            SeedNode::Dir(entries) => Node::Dir(
                entries
                    .iter()
                    .map(|(name, node)| (name.clone(), Node::from_seed(node)))
                    .collect(),
            ),
        }
    }

    fn kind(&self) -> NodeKind {
        match self {
            Node::File(_) => NodeKind::File,
            Node::Dir(_) => NodeKind::Dir,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fs {
    root: BTreeMap<String, Node>,
}

impl Default for Fs {
    fn default() -> Self {
        Self::new()
    }
}

impl Fs {
    pub fn new() -> Self {
        Self {
            root: BTreeMap::new(),
        }
    }

    pub fn from_seed(seed: &BTreeMap<String, SeedNode>) -> Self {
        Self {
            root: seed
                .iter()
                .map(|(name, node)| (name.clone(), Node::from_seed(node)))
                .collect(),
        }
    }

    pub fn read_file(&self, path: &str) -> Result<&[u8], FsError> {
        match self.lookup(path)? {
            Node::File(bytes) => Ok(bytes),
            Node::Dir(_) => Err(FsError::NotAFile(path.to_string())),
        }
    }

    /// Creates or replaces a file. The parent directory must already exist.
    pub fn write_file(&mut self, path: &str, contents: Vec<u8>) -> Result<(), FsError> {
        let (dir, name) = self.lookup_parent_mut(path)?;
        if let Some(Node::Dir(_)) = dir.get(&name) {
            return Err(FsError::NotAFile(path.to_string()));
        }
        dir.insert(name, Node::File(contents));
        Ok(())
    }

    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let entries = match path {
            "" | "/" => &self.root,
            _ => match self.lookup(path)? {
                Node::Dir(entries) => entries,
                Node::File(_) => return Err(FsError::NotADirectory(path.to_string())),
            },
        };
        Ok(entries
            .iter()
            .map(|(name, node)| DirEntry {
                name: name.clone(),
                kind: node.kind(),
            })
            .collect())
    }

    pub fn exists(&self, path: &str) -> bool {
        path == "/" || path.is_empty() || self.lookup(path).is_ok()
    }

    pub fn stat(&self, path: &str) -> Result<Stat, FsError> {
        if path == "/" || path.is_empty() {
            return Ok(Stat {
                kind: NodeKind::Dir,
                size: 0,
            });
        }
        Ok(match self.lookup(path)? {
            Node::File(bytes) => Stat {
                kind: NodeKind::File,
                size: bytes.len(),
            },
            Node::Dir(_) => Stat {
                kind: NodeKind::Dir,
                size: 0,
            },
        })
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), FsError> {
        let (dir, name) = self.lookup_parent_mut(path)?;
        if dir.contains_key(&name) {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        dir.insert(name, Node::Dir(BTreeMap::new()));
        Ok(())
    }

    pub fn delete_entry(&mut self, path: &str) -> Result<(), FsError> {
        let (dir, name) = self.lookup_parent_mut(path)?;
        if dir.remove(&name).is_none() {
            return Err(FsError::NotFound(path.to_string()));
        }
        Ok(())
    }

    fn lookup(&self, path: &str) -> Result<&Node, FsError> {
        let components = split(path)?;
        let Some((last, parents)) = components.split_last() else {
            return Err(FsError::InvalidPath(path.to_string()));
        };
        let mut dir = &self.root;
        for component in parents {
            match dir.get(*component) {
                Some(Node::Dir(entries)) => dir = entries,
                Some(Node::File(_)) => return Err(FsError::NotADirectory(path.to_string())),
                None => return Err(FsError::NotFound(path.to_string())),
            }
        }
        dir.get(*last).ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn lookup_parent_mut(
        &mut self,
        path: &str,
    ) -> Result<(&mut BTreeMap<String, Node>, String), FsError> {
        let components = split(path)?;
        let Some((last, parents)) = components.split_last() else {
            return Err(FsError::InvalidPath(path.to_string()));
        };
        let mut dir = &mut self.root;
        for component in parents {
            match dir.get_mut(*component) {
                Some(Node::Dir(entries)) => dir = entries,
                Some(Node::File(_)) => return Err(FsError::NotADirectory(path.to_string())),
                None => return Err(FsError::NotFound(path.to_string())),
            }
        }
        Ok((dir, last.to_string()))
    }
}

fn split(path: &str) -> Result<Vec<&str>, FsError> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let components: Vec<&str> = trimmed.split('/').collect();
    for component in &components {
        if component.is_empty() || *component == "." || *component == ".." {
            return Err(FsError::InvalidPath(path.to_string()));
        }
    }
    Ok(components)
}
