use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::SandboxError;

/// A directory that job file operations may not leave.
#[derive(Debug, Clone)]
pub struct Jail {
    root: PathBuf,
}

impl Jail {
    /// Create the jail at `root`, creating the directory if needed. The stored root
    /// is canonical so containment checks compare like with like.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = fs::canonicalize(root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a caller-supplied relative path to an absolute path inside the jail.
    ///
    /// `..` is folded lexically first; then the deepest existing ancestor is
    /// canonicalized so symlinked directories are judged by where they point.
    /// An existing symlink at the final position is always rejected.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        let normalized = normalize(relative)?;
        let candidate = self.root.join(&normalized);

        // Walk up to the deepest path that exists (without following a final link).
        let mut existing = candidate.clone();
        let mut tail: Vec<OsString> = Vec::new();
        while fs::symlink_metadata(&existing).is_err() {
            match existing.file_name() {
                Some(name) => tail.push(name.to_os_string()),
                None => break,
            }
            if !existing.pop() {
                break;
            }
        }

        let mut resolved = match fs::canonicalize(&existing) {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Only a dangling link exists but cannot be canonicalized.
                return Err(SandboxError::SymlinkRejected(relative.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        for name in tail.iter().rev() {
            resolved.push(name);
        }

        if !resolved.starts_with(&self.root) {
            tracing::warn!(path = relative, "path escapes jail");
            return Err(SandboxError::PathEscape(relative.to_string()));
        }

        if fs::symlink_metadata(&candidate)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
        {
            tracing::warn!(path = relative, "symlink target rejected");
            return Err(SandboxError::SymlinkRejected(relative.to_string()));
        }

        Ok(resolved)
    }

    /// `path` relative to the jail root with `/` separators.
    pub fn display_relative(&self, path: &Path) -> String {
        relative_slash(&self.root, path)
    }
}

/// Fold `.` and `..` without touching the filesystem. Absolute inputs and `..`
/// above the root are escapes.
fn normalize(relative: &str) -> Result<PathBuf, SandboxError> {
    let mut out = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                if !out.pop() {
                    return Err(SandboxError::PathEscape(relative.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxError::PathEscape(relative.to_string()));
            }
        }
    }
    Ok(out)
}

pub(crate) fn relative_slash(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
