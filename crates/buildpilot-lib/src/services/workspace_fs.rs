// Workspace filesystem
// Async file operations used by the artifact materializer, path validation
// that keeps generated files inside the workspace, and the bounded file
// listing sent to the gateway.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),
}

impl FsError {
    fn from_io(err: std::io::Error, path: &Path) -> Self {
        let path = path.display().to_string();
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path),
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path),
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path),
            _ => FsError::Io(format!("{}: {}", path, err)),
        }
    }
}

/// Directories never descended into when listing a workspace
pub const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    ".next",
    "out",
    "coverage",
];

/// Deepest directory level visited when listing a workspace
const MAX_LISTING_DEPTH: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Workspace-relative file paths, `/`-separated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileListing {
    pub files: Vec<String>,
    /// More files existed past the limit
    pub truncated: bool,
}

impl FileListing {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Filesystem operations the assistant needs
#[async_trait]
pub trait WorkspaceFs: Send + Sync {
    async fn read_file(&self, path: &Path) -> Result<String, FsError>;

    /// Write the complete file, replacing any previous content
    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), FsError>;

    /// Create a directory and its parents
    async fn create_dir(&self, path: &Path) -> Result<(), FsError>;

    async fn exists(&self, path: &Path) -> bool;

    /// Entries of one directory, in no particular order
    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError>;
}

/// Local disk implementation on tokio::fs
#[derive(Debug, Default, Clone)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkspaceFs for LocalFs {
    async fn read_file(&self, path: &Path) -> Result<String, FsError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FsError::from_io(e, path))
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), FsError> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| FsError::from_io(e, path))
    }

    async fn create_dir(&self, path: &Path) -> Result<(), FsError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| FsError::from_io(e, path))
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .map_err(|e| FsError::from_io(e, path))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| FsError::from_io(e, path))? {
            // symlinks are reported as files and never followed
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        Ok(entries)
    }
}

/// List files under `root` depth-first in name order, skipping
/// [`SKIPPED_DIRS`], up to `limit` paths. Unreadable directories are skipped.
pub async fn list_workspace_files(fs: &dyn WorkspaceFs, root: &Path, limit: usize) -> FileListing {
    let mut listing = FileListing::default();
    let mut pending: Vec<(String, usize)> = vec![(String::new(), 0)];

    while let Some((dir, depth)) = pending.pop() {
        let mut entries = match fs.list_dir(&root.join(&dir)).await {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("[WorkspaceFs] Skipping unreadable directory '{}': {}", dir, e);
                continue;
            }
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut subdirs = Vec::new();
        for entry in entries {
            let relative = if dir.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", dir, entry.name)
            };
            if !entry.is_dir {
                if listing.files.len() == limit {
                    listing.truncated = true;
                    return listing;
                }
                listing.files.push(relative);
            } else if depth < MAX_LISTING_DEPTH && !SKIPPED_DIRS.contains(&entry.name.as_str()) {
                subdirs.push((relative, depth + 1));
            }
        }
        pending.extend(subdirs.into_iter().rev());
    }
    listing
}

/// Join a relative file name onto the workspace root.
///
/// Rejects empty names, absolute paths and any `..` component so the result
/// always stays under `root`.
pub fn resolve_in_workspace(root: &Path, relative: &str) -> Result<PathBuf, FsError> {
    let invalid = |reason: &str| FsError::InvalidPath {
        path: relative.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = relative.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty file name"));
    }

    let candidate = Path::new(trimmed);
    let mut resolved = root.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("path escapes workspace")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute paths are not allowed"))
            }
        }
    }

    if resolved == root {
        return Err(invalid("path points at the workspace root"));
    }
    Ok(resolved)
}
