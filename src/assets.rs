//! Asset sources: where resource bytes come from when a bundle is packaged.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;

use ignore::WalkBuilder;

use crate::edit::is_safe_relative;
use crate::model::{Resource, ResourceKind};

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset file '{file}' for '{resource}' not found")]
    NotFound { resource: String, file: String },

    #[error("asset path '{0}' escapes the asset root")]
    UnsafePath(String),

    #[error("reading '{resource}': {source}")]
    Io {
        resource: String,
        #[source]
        source: io::Error,
    },
}

/// Supplies the bytes for a resource. Shared across export workers.
pub trait AssetSource: Send + Sync {
    fn load(&self, resource: &Resource) -> Result<Vec<u8>, AssetError>;
}

/// Assets read from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Lists every recognizable asset under the root as a resource.
    ///
    /// Respects `.gitignore` and skips dotfiles. Files with unknown
    /// extensions are ignored. Names come from the file stem; a clash falls
    /// back to the path with separators replaced by `_`.
    pub fn discover(&self) -> Vec<Resource> {
        let mut builder = WalkBuilder::new(&self.root);
        builder.require_git(false).sort_by_file_name(Ord::cmp);

        let mut resources = Vec::new();
        let mut names = HashSet::new();
        for entry in builder.build().flatten() {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            let Some(kind) = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(ResourceKind::from_extension)
            else {
                continue;
            };
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let file = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = if names.contains(&stem) {
                file.rsplit_once('.')
                    .map_or(file.as_str(), |(base, _)| base)
                    .replace('/', "_")
            } else {
                stem
            };
            if !names.insert(name.clone()) {
                log::warn!("skipping {file}: resource name '{name}' already used");
                continue;
            }

            resources.push(Resource { name, kind, file });
        }
        resources
    }
}

impl AssetSource for DirectoryAssets {
    fn load(&self, resource: &Resource) -> Result<Vec<u8>, AssetError> {
        if !is_safe_relative(&resource.file) {
            return Err(AssetError::UnsafePath(resource.file.clone()));
        }
        match fs::read(self.root.join(&resource.file)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(AssetError::NotFound {
                resource: resource.name.clone(),
                file: resource.file.clone(),
            }),
            Err(source) => Err(AssetError::Io {
                resource: resource.name.clone(),
                source,
            }),
        }
    }
}

/// In-memory assets keyed by file path.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryAssets {
    pub files: std::collections::HashMap<String, Vec<u8>>,
}

#[cfg(test)]
impl AssetSource for MemoryAssets {
    fn load(&self, resource: &Resource) -> Result<Vec<u8>, AssetError> {
        self.files
            .get(&resource.file)
            .cloned()
            .ok_or_else(|| AssetError::NotFound {
                resource: resource.name.clone(),
                file: resource.file.clone(),
            })
    }
}
