use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::diff::{aligned_diff, creation_diff, deletion_diff};
use crate::errors::{WorkspaceError, WorkspaceResult};
use crate::{STATE_DIR, SnapshotInfo, SnapshotOutcome, Workspace, validate_label};

const STORE_DIR: &str = "workspace";
const OBJECTS_DIR: &str = "objects";
const SNAPSHOTS_DIR: &str = "snapshots";

/// A named, immutable record of file contents at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub label: String,
    pub created_at: DateTime<Utc>,
    /// Repository-relative path (with `/` separators) to content hash.
    pub files: BTreeMap<String, String>,
}

impl SnapshotManifest {
    fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            label: self.label.clone(),
            created_at: Some(self.created_at),
            files: Some(self.files.len()),
        }
    }
}

/// Content-addressed snapshot store for directories without version control.
///
/// Each unique file content is stored once under `objects/<blake3 hex>`; manifests
/// under `snapshots/<label>.json` map paths to those hashes.
#[derive(Clone, Debug)]
pub struct SnapshotWorkspace {
    root: PathBuf,
    objects_dir: PathBuf,
    snapshots_dir: PathBuf,
}

impl SnapshotWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let store = root.join(STATE_DIR).join(STORE_DIR);
        Self {
            objects_dir: store.join(OBJECTS_DIR),
            snapshots_dir: store.join(SNAPSHOTS_DIR),
            root,
        }
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Number of distinct content blobs stored.
    pub fn object_count(&self) -> WorkspaceResult<usize> {
        match fs::read_dir(&self.objects_dir) {
            Ok(entries) => Ok(entries
                .filter_map(Result::ok)
                .filter(|entry| entry.path().is_file())
                .count()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(WorkspaceError::io(
                format!("read {}", self.objects_dir.display()),
                err,
            )),
        }
    }

    fn manifest_path(&self, label: &str) -> PathBuf {
        self.snapshots_dir.join(format!("{label}.json"))
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        self.objects_dir.join(hash)
    }

    pub fn load_manifest(&self, label: &str) -> WorkspaceResult<SnapshotManifest> {
        validate_label(label)?;
        let path = self.manifest_path(label);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(WorkspaceError::SnapshotNotFound(label.to_string()));
            }
            Err(err) => return Err(WorkspaceError::io(format!("read {}", path.display()), err)),
        };
        serde_json::from_slice(&raw)
            .map_err(|err| WorkspaceError::Serialization(format!("{}: {err}", path.display())))
    }

    fn manifests(&self) -> WorkspaceResult<Vec<SnapshotManifest>> {
        let entries = match fs::read_dir(&self.snapshots_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(WorkspaceError::io(
                    format!("read {}", self.snapshots_dir.display()),
                    err,
                ));
            }
        };

        let mut manifests = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|err| WorkspaceError::io("read snapshot entry", err))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read(&path)
                .map_err(|err| WorkspaceError::io(format!("read {}", path.display()), err))?;
            let manifest: SnapshotManifest = serde_json::from_slice(&raw).map_err(|err| {
                WorkspaceError::Serialization(format!("{}: {err}", path.display()))
            })?;
            manifests.push(manifest);
        }
        manifests.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.label.cmp(&b.label))
        });
        Ok(manifests)
    }

    fn latest_manifest(&self) -> WorkspaceResult<Option<SnapshotManifest>> {
        Ok(self.manifests()?.pop())
    }

    fn store_object(&self, content: &[u8]) -> WorkspaceResult<String> {
        let hash = blake3::hash(content).to_hex().to_string();
        let path = self.object_path(&hash);
        if path.exists() {
            return Ok(hash);
        }
        write_atomically(&path, content)?;
        Ok(hash)
    }

    fn read_object(&self, hash: &str) -> WorkspaceResult<Vec<u8>> {
        let path = self.object_path(hash);
        match fs::read(&path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(WorkspaceError::ObjectMissing(hash.to_string()))
            }
            Err(err) => Err(WorkspaceError::io(format!("read {}", path.display()), err)),
        }
    }

    fn tracked_files(&self) -> WorkspaceResult<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));
        for entry in walker {
            let entry = entry.map_err(|err| {
                let context = format!("walk {}", self.root.display());
                match err.into_io_error() {
                    Some(io) => WorkspaceError::io(context, io),
                    None => WorkspaceError::io(context, std::io::Error::other("filesystem loop")),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| WorkspaceError::OutsideWorkspace(entry.path().display().to_string()))?;
            files.push((manifest_key(relative), entry.path().to_path_buf()));
        }
        Ok(files)
    }

    fn resolve(&self, relative: &str) -> WorkspaceResult<PathBuf> {
        let path = Path::new(relative);
        let escapes = path.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || relative.is_empty() {
            return Err(WorkspaceError::OutsideWorkspace(relative.to_string()));
        }
        Ok(self.root.join(path))
    }
}

impl Workspace for SnapshotWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_vcs_backed(&self) -> bool {
        false
    }

    fn diff(&self, path: &str) -> WorkspaceResult<String> {
        let target = self.resolve(path)?;
        let current = match fs::read(&target) {
            Ok(content) => Some(String::from_utf8_lossy(&content).into_owned()),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(WorkspaceError::io(format!("read {}", target.display()), err)),
        };

        let key = manifest_key(Path::new(path));
        let previous = match self.latest_manifest()? {
            Some(manifest) => match manifest.files.get(&key) {
                Some(hash) => Some(String::from_utf8_lossy(&self.read_object(hash)?).into_owned()),
                None => None,
            },
            None => None,
        };

        match (previous, current) {
            (None, None) => Err(WorkspaceError::FileNotFound(path.to_string())),
            (None, Some(current)) => Ok(creation_diff(&key, &current)),
            (Some(previous), None) => Ok(deletion_diff(&key, &previous)),
            (Some(previous), Some(current)) if previous == current => Ok(String::new()),
            (Some(previous), Some(current)) => Ok(aligned_diff(&key, &key, &previous, &current)),
        }
    }

    fn snapshot(&self, label: &str) -> WorkspaceResult<SnapshotOutcome> {
        validate_label(label)?;
        let manifest_path = self.manifest_path(label);
        if manifest_path.exists() {
            return Err(WorkspaceError::SnapshotExists(label.to_string()));
        }

        let mut files = BTreeMap::new();
        for (key, path) in self.tracked_files()? {
            let content = fs::read(&path)
                .map_err(|err| WorkspaceError::io(format!("read {}", path.display()), err))?;
            let hash = self.store_object(&content)?;
            debug!(path = %key, hash = %hash, "captured file");
            files.insert(key, hash);
        }

        let manifest = SnapshotManifest {
            label: label.to_string(),
            created_at: Utc::now(),
            files,
        };
        let raw = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| WorkspaceError::Serialization(err.to_string()))?;
        write_atomically(&manifest_path, &raw)?;
        info!(label, files = manifest.files.len(), "snapshot written");
        Ok(SnapshotOutcome::Created(manifest.info()))
    }

    fn restore(&self, label: &str) -> WorkspaceResult<()> {
        let manifest = self.load_manifest(label)?;

        // Check every object first so a missing blob cannot leave a half-restored tree.
        for hash in manifest.files.values() {
            if !self.object_path(hash).is_file() {
                return Err(WorkspaceError::ObjectMissing(hash.clone()));
            }
        }

        for (key, hash) in &manifest.files {
            let target = self.resolve(key)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| WorkspaceError::io(format!("create {}", parent.display()), err))?;
            }
            let content = self.read_object(hash)?;
            fs::write(&target, content)
                .map_err(|err| WorkspaceError::io(format!("write {}", target.display()), err))?;
        }
        info!(label, files = manifest.files.len(), "snapshot restored");
        Ok(())
    }

    fn list_snapshots(&self) -> WorkspaceResult<Vec<SnapshotInfo>> {
        Ok(self.manifests()?.iter().map(SnapshotManifest::info).collect())
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

fn manifest_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn write_atomically(path: &Path, content: &[u8]) -> WorkspaceResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| WorkspaceError::io(format!("create {}", parent.display()), err))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content)
        .map_err(|err| WorkspaceError::io(format!("write {}", tmp.display()), err))?;
    fs::rename(&tmp, path)
        .map_err(|err| WorkspaceError::io(format!("rename {}", tmp.display()), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, SnapshotWorkspace) {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let workspace = SnapshotWorkspace::new(dir.path());
        (dir, workspace)
    }

    #[test]
    fn hidden_entries_are_not_captured() {
        let (dir, workspace) = workspace();
        fs::write(dir.path().join("visible.txt"), "v").expect("write");
        fs::write(dir.path().join(".env"), "secret").expect("write");
        fs::create_dir_all(dir.path().join(".git")).expect("mkdir");
        fs::write(dir.path().join(".git/HEAD"), "ref").expect("write");
        fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        fs::write(dir.path().join("src/lib.rs"), "fn x() {}").expect("write");

        let keys: Vec<String> = workspace
            .tracked_files()
            .expect("walk should succeed")
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["src/lib.rs", "visible.txt"]);
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let (dir, workspace) = workspace();
        fs::write(dir.path().join("a.txt"), "a").expect("write");
        workspace.snapshot("one").expect("first snapshot");
        let error = workspace.snapshot("one").expect_err("label reuse should fail");
        assert!(matches!(error, WorkspaceError::SnapshotExists(_)));
        assert_eq!(workspace.object_count().expect("count"), 1);
    }

    #[test]
    fn resolve_rejects_escaping_paths() {
        let (_dir, workspace) = workspace();
        assert!(workspace.resolve("../outside").is_err());
        assert!(workspace.resolve("/etc/passwd").is_err());
        assert!(workspace.resolve("nested/ok.txt").is_ok());
    }
}
