//! Workspace identity: canonical root, id and collection name.

use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

const COLLECTION_PREFIX: &str = "delve_code_";

/// A resolved workspace root. Two roots share an id only if they
/// canonicalize to the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    id: String,
    collection: String,
}

impl Workspace {
    /// Canonicalize `path` and derive the workspace id from it.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::WorkspaceNotFound`] if the path does not exist or
    /// is not a directory.
    pub fn resolve(path: &Path) -> Result<Self> {
        let root = std::fs::canonicalize(path)
            .map_err(|_| IndexError::WorkspaceNotFound(path.to_path_buf()))?;
        if !root.is_dir() {
            return Err(IndexError::WorkspaceNotFound(path.to_path_buf()));
        }
        Ok(Self::from_canonical(root))
    }

    /// Build from a path that is already canonical.
    #[must_use]
    pub fn from_canonical(root: PathBuf) -> Self {
        let id = workspace_id(&root);
        let collection = collection_name(&id);
        Self {
            root,
            id,
            collection,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

/// First 128 bits of the blake3 digest of the canonical root, in hex.
#[must_use]
pub fn workspace_id(canonical_root: &Path) -> String {
    let digest = blake3::hash(canonical_root.as_os_str().as_encoded_bytes());
    digest.to_hex()[..32].to_owned()
}

#[must_use]
pub fn collection_name(workspace_id: &str) -> String {
    format!("{COLLECTION_PREFIX}{workspace_id}")
}
