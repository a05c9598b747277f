//! Incremental change detection against a persisted snapshot.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SyncError;

const SNAPSHOT_VERSION: u32 = 1;
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// Relative paths that changed since the last committed snapshot. The three
/// sets never overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ChangeSet {
    #[must_use]
    pub fn diff(previous: &Snapshot, current: &Snapshot) -> Self {
        let mut changes = Self::default();
        for (path, state) in &current.files {
            match previous.files.get(path) {
                None => {
                    changes.added.insert(path.clone());
                }
                Some(old) if old.hash != state.hash => {
                    changes.modified.insert(path.clone());
                }
                Some(_) => {}
            }
        }
        for path in previous.files.keys() {
            if !current.files.contains_key(path) {
                changes.removed.insert(path.clone());
            }
        }
        changes
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty())
    }

    /// Added and modified paths, sorted.
    #[must_use]
    pub fn to_index(&self) -> Vec<String> {
        self.added
            .iter()
            .chain(&self.modified)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub hash: String,
    /// Nanoseconds since the Unix epoch.
    pub mtime: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub files: BTreeMap<String, FileState>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            files: BTreeMap::new(),
        }
    }
}

/// Result of comparing the last snapshot with the file system, not yet
/// committed.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub previous: Snapshot,
    pub current: Snapshot,
    pub changes: ChangeSet,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Globs a file must match; empty matches everything.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub respect_gitignore: bool,
    /// Larger files are skipped.
    pub max_file_bytes: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: vec![
                "**/target/**".into(),
                "**/node_modules/**".into(),
                "**/dist/**".into(),
                "**/build/**".into(),
                "**/__pycache__/**".into(),
                "*.min.js".into(),
                "*.lock".into(),
            ],
            respect_gitignore: true,
            max_file_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Synchronizer {
    root: PathBuf,
    snapshot_path: PathBuf,
    config: SyncConfig,
}

impl Synchronizer {
    #[must_use]
    pub fn new(root: PathBuf, snapshot_path: PathBuf, config: SyncConfig) -> Self {
        Self {
            root,
            snapshot_path,
            config,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Diff the file system against the last snapshot and commit the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the walk patterns are invalid or the snapshot
    /// cannot be read or written. The previous snapshot is left intact.
    pub fn check_changes(&self) -> Result<ChangeSet, SyncError> {
        let plan = self.plan()?;
        self.commit(&plan, &HashSet::new())?;
        Ok(plan.changes)
    }

    /// Diff without committing.
    ///
    /// # Errors
    ///
    /// Returns an error if the walk patterns are invalid or the snapshot
    /// cannot be read.
    pub fn plan(&self) -> Result<SyncPlan, SyncError> {
        let previous = self.load_snapshot()?;
        let current = self.scan()?;
        let changes = ChangeSet::diff(&previous, &current);
        debug!(
            added = changes.added.len(),
            modified = changes.modified.len(),
            removed = changes.removed.len(),
            "change detection"
        );
        Ok(SyncPlan {
            previous,
            current,
            changes,
        })
    }

    /// Persist `plan.current`, keeping the previous state for every path in
    /// `failed` so the next run retries them.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn commit(&self, plan: &SyncPlan, failed: &HashSet<String>) -> Result<(), SyncError> {
        let mut snapshot = plan.current.clone();
        for path in failed {
            match plan.previous.files.get(path) {
                Some(state) => {
                    snapshot.files.insert(path.clone(), state.clone());
                }
                None => {
                    snapshot.files.remove(path);
                }
            }
        }
        self.save_snapshot(&snapshot)
    }

    /// Last committed snapshot; empty if none exists or it is unreadable.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load_snapshot(&self) -> Result<Snapshot, SyncError> {
        let bytes = match std::fs::read(&self.snapshot_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => Ok(snapshot),
            Ok(snapshot) => {
                warn!(
                    version = snapshot.version,
                    "snapshot version mismatch, treating all files as new"
                );
                Ok(Snapshot::default())
            }
            Err(e) => {
                warn!(path = %self.snapshot_path.display(), "unreadable snapshot, treating all files as new: {e}");
                Ok(Snapshot::default())
            }
        }
    }

    /// Write via a temporary file and rename, so readers see either the old
    /// or the new snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), SyncError> {
        if let Some(parent) = self.snapshot_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self
            .snapshot_path
            .with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.snapshot_path).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp);
        })?;
        Ok(())
    }

    /// Remove the snapshot so the next run treats every file as added.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), SyncError> {
        match std::fs::remove_file(&self.snapshot_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Walk the workspace and hash every matched file.
    ///
    /// # Errors
    ///
    /// Returns an error if an include or exclude pattern is invalid.
    pub fn scan(&self) -> Result<Snapshot, SyncError> {
        let mut overrides = OverrideBuilder::new(&self.root);
        for pattern in &self.config.include {
            overrides.add(pattern)?;
        }
        for pattern in &self.config.exclude {
            overrides.add(&format!("!{pattern}"))?;
        }
        let overrides = overrides.build()?;

        let respect = self.config.respect_gitignore;
        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(respect)
            .git_exclude(respect)
            .git_global(respect)
            .require_git(false)
            .overrides(overrides)
            .build();

        let mut snapshot = Snapshot::default();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("walk error: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            if path == self.snapshot_path {
                continue;
            }
            let Some(rel) = relative_path(&self.root, path) else {
                continue;
            };
            match self.file_state(path) {
                Ok(Some(state)) => {
                    snapshot.files.insert(rel, state);
                }
                Ok(None) => debug!(file = %rel, "skipped"),
                Err(e) => warn!(file = %rel, "cannot read file: {e}"),
            }
        }
        Ok(snapshot)
    }

    fn file_state(&self, path: &Path) -> std::io::Result<Option<FileState>> {
        let metadata = std::fs::metadata(path)?;
        let size = metadata.len();
        if size > self.config.max_file_bytes {
            return Ok(None);
        }
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));

        let mut bytes = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        std::fs::File::open(path)?.read_to_end(&mut bytes)?;
        if bytes.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0) {
            return Ok(None);
        }
        Ok(Some(FileState {
            hash: blake3::hash(&bytes).to_hex().to_string(),
            mtime,
            size,
        }))
    }
}

/// `/`-separated path of `path` under `root`.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
