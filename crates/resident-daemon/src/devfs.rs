//! Incremental mirror of a local file tree inside the VM ("DevFS").
//!
//! Every tracked path keeps two fingerprints: the one just computed from
//! disk and the one last confirmed uploaded. [`DevFs::update`] uploads the
//! entries where they differ and deletes remotely what vanished locally.
//! A fingerprint only moves to "synced" after the remote side acknowledged
//! the batch containing it, so a failed update leaves the working set intact
//! for the next attempt.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use base64::engine::general_purpose;
use base64::Engine as _;
use serde_json::json;
use sha2::{Digest, Sha256};
use url::Url;
use walkdir::WalkDir;

use resident_core::prelude::*;

use crate::vm_service::extensions::rpc;
use crate::vm_service::VmRequestHandle;

// ---------------------------------------------------------------------------
// Remote operations
// ---------------------------------------------------------------------------

/// The four DevFS RPCs.
#[trait_variant::make(DevFsOperations: Send)]
pub trait LocalDevFsOperations {
    /// Register `fs_name` and return its base URI.
    async fn create(&self, fs_name: &str) -> Result<String>;

    async fn write_files(&self, fs_name: &str, files: Vec<(String, Vec<u8>)>) -> Result<()>;

    async fn delete_files(&self, fs_name: &str, paths: Vec<String>) -> Result<()>;

    async fn destroy(&self, fs_name: &str) -> Result<()>;
}

/// DevFS operations over a VM Service connection.
#[derive(Debug, Clone)]
pub struct VmDevFsOperations {
    handle: VmRequestHandle,
}

impl VmDevFsOperations {
    pub fn new(handle: VmRequestHandle) -> Self {
        Self { handle }
    }
}

impl DevFsOperations for VmDevFsOperations {
    async fn create(&self, fs_name: &str) -> Result<String> {
        let result = self
            .handle
            .request(rpc::CREATE_DEVFS, Some(json!({ "fsName": fs_name })))
            .await
            .map_err(|e| e.with_command(rpc::CREATE_DEVFS))?;
        result
            .get("uri")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::protocol("missing 'uri' in _createDevFS response"))
    }

    async fn write_files(&self, fs_name: &str, files: Vec<(String, Vec<u8>)>) -> Result<()> {
        let files: Vec<_> = files
            .into_iter()
            .map(|(path, bytes)| json!([path, general_purpose::STANDARD.encode(bytes)]))
            .collect();
        self.handle
            .request(
                rpc::WRITE_DEVFS_FILES,
                Some(json!({ "fsName": fs_name, "files": files })),
            )
            .await
            .map_err(|e| e.with_command(rpc::WRITE_DEVFS_FILES))?;
        Ok(())
    }

    async fn delete_files(&self, fs_name: &str, paths: Vec<String>) -> Result<()> {
        self.handle
            .request(
                rpc::DELETE_DEVFS_FILES,
                Some(json!({ "fsName": fs_name, "paths": paths })),
            )
            .await
            .map_err(|e| e.with_command(rpc::DELETE_DEVFS_FILES))?;
        Ok(())
    }

    async fn destroy(&self, fs_name: &str) -> Result<()> {
        self.handle
            .request(rpc::DELETE_DEVFS, Some(json!({ "fsName": fs_name })))
            .await
            .map_err(|e| e.with_command(rpc::DELETE_DEVFS))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

/// Identity of a file's content.
///
/// With hashing enabled two fingerprints match when size and digest match;
/// otherwise size and modification time are compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub digest: Option<[u8; 32]>,
}

impl Fingerprint {
    fn compute(path: &Path, content_hash: bool) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let digest = if content_hash {
            let bytes = std::fs::read(path)?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            Some(hasher.finalize().into())
        } else {
            None
        };
        Ok(Self {
            size: meta.len(),
            modified: meta.modified().ok(),
            digest,
        })
    }

    pub fn same_content(&self, other: &Fingerprint) -> bool {
        if self.size != other.size {
            return false;
        }
        match (&self.digest, &other.digest) {
            (Some(a), Some(b)) => a == b,
            _ => self.modified == other.modified,
        }
    }
}

/// Working-set entry for one relative path.
#[derive(Debug, Clone, Default)]
pub struct SyncEntry {
    /// `None` once the file disappeared locally.
    pub current: Option<Fingerprint>,
    /// `None` until the first confirmed upload.
    pub synced: Option<Fingerprint>,
}

impl SyncEntry {
    fn needs_upload(&self) -> bool {
        match (&self.current, &self.synced) {
            (Some(cur), Some(synced)) => !cur.same_content(synced),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn needs_delete(&self) -> bool {
        self.current.is_none() && self.synced.is_some()
    }
}

// ---------------------------------------------------------------------------
// DevFs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DevFsConfig {
    /// Local project root; remote paths are relative to it.
    pub root: PathBuf,
    pub fs_name: String,
    /// Files or directories under `root` to mirror.
    pub paths: Vec<PathBuf>,
    /// Package map, relative to `root`.
    pub packages_file: PathBuf,
    /// Files per `_writeDevFSFiles` call.
    pub batch_size: usize,
    pub content_hash: bool,
}

impl DevFsConfig {
    pub fn new(root: impl Into<PathBuf>, fs_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            fs_name: fs_name.into(),
            paths: vec![
                PathBuf::from("lib"),
                PathBuf::from("pubspec.yaml"),
                PathBuf::from(".dart_tool/package_config.json"),
            ],
            packages_file: PathBuf::from(".dart_tool/package_config.json"),
            batch_size: 64,
            content_hash: true,
        }
    }
}

/// One DevFS bound to one service connection.
pub struct DevFs<O> {
    ops: O,
    config: DevFsConfig,
    base_uri: Option<Url>,
    entries: BTreeMap<String, SyncEntry>,
}

impl<O: DevFsOperations + Sync> DevFs<O> {
    pub fn new(ops: O, config: DevFsConfig) -> Self {
        Self {
            ops,
            config,
            base_uri: None,
            entries: BTreeMap::new(),
        }
    }

    /// Register the remote root. Fails if the VM rejects the name.
    pub async fn create(&mut self) -> Result<Url> {
        let uri = self.ops.create(&self.config.fs_name).await?;
        let mut base = Url::parse(&uri)
            .map_err(|e| Error::protocol(format!("invalid DevFS uri '{uri}': {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        info!("DevFS '{}' created at {}", self.config.fs_name, base);
        self.base_uri = Some(base.clone());
        Ok(base)
    }

    /// Bring the remote mirror in line with disk.
    ///
    /// `only` restricts the scan to the given paths (absolute or relative to
    /// the root); entries outside it are left untouched. Returns the number
    /// of bytes uploaded.
    pub async fn update(&mut self, only: Option<&[PathBuf]>) -> Result<u64> {
        if self.base_uri.is_none() {
            return Err(Error::sync(format!(
                "DevFS '{}' has not been created",
                self.config.fs_name
            )));
        }

        match only {
            Some(paths) => self.rescan_paths(paths)?,
            None => self.rescan_all()?,
        }

        let dirty: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.needs_upload())
            .map(|(p, _)| p.clone())
            .collect();
        let removed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.needs_delete())
            .map(|(p, _)| p.clone())
            .collect();

        debug!(
            "DevFS '{}': {} to upload, {} to delete",
            self.config.fs_name,
            dirty.len(),
            removed.len()
        );

        let mut bytes = 0u64;
        for batch in dirty.chunks(self.config.batch_size.max(1)) {
            let mut files = Vec::with_capacity(batch.len());
            for rel in batch {
                let content = std::fs::read(self.config.root.join(rel))
                    .map_err(|e| Error::sync(format!("read {rel}: {e}")))?;
                files.push((rel.clone(), content));
            }
            let batch_bytes: u64 = files.iter().map(|(_, c)| c.len() as u64).sum();

            self.ops
                .write_files(&self.config.fs_name, files)
                .await
                .map_err(|e| Error::sync(format!("upload failed: {e}")))?;

            for rel in batch {
                if let Some(entry) = self.entries.get_mut(rel) {
                    entry.synced = entry.current.clone();
                }
            }
            bytes += batch_bytes;
        }

        if !removed.is_empty() {
            self.ops
                .delete_files(&self.config.fs_name, removed.clone())
                .await
                .map_err(|e| Error::sync(format!("delete failed: {e}")))?;
            for rel in &removed {
                self.entries.remove(rel);
            }
        }

        Ok(bytes)
    }

    /// Remove the remote root and forget all state. Safe to call repeatedly.
    pub async fn destroy(&mut self) -> Result<()> {
        self.entries.clear();
        if self.base_uri.take().is_some() {
            self.ops.destroy(&self.config.fs_name).await?;
            info!("DevFS '{}' destroyed", self.config.fs_name);
        }
        Ok(())
    }

    /// Remote URI of a local path under the root.
    pub fn relocate(&self, local: &Path) -> Option<Url> {
        let base = self.base_uri.as_ref()?;
        let rel = relative_key(&self.config.root, local)?;
        base.join(&rel).ok()
    }

    pub fn packages_uri(&self) -> Option<Url> {
        let packages = self.config.root.join(&self.config.packages_file);
        self.relocate(&packages)
    }

    pub fn base_uri(&self) -> Option<&Url> {
        self.base_uri.as_ref()
    }

    pub fn fs_name(&self) -> &str {
        &self.config.fs_name
    }

    /// Use a different remote name. Only valid before [`create`](Self::create).
    pub fn rename(&mut self, fs_name: impl Into<String>) -> Result<()> {
        if self.base_uri.is_some() {
            return Err(Error::sync("cannot rename a DevFS that already exists"));
        }
        self.config.fs_name = fs_name.into();
        Ok(())
    }

    /// Remove a remote root of this name left behind by an earlier run.
    pub async fn destroy_stale(&self) -> Result<()> {
        self.ops.destroy(&self.config.fs_name).await
    }

    pub fn entries(&self) -> &BTreeMap<String, SyncEntry> {
        &self.entries
    }

    /// Paths whose current fingerprint differs from the synced one.
    pub fn pending(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.needs_upload() || e.needs_delete())
            .map(|(p, _)| p.as_str())
            .collect()
    }

    /// Fingerprints of every file under `start`, keyed by relative path.
    fn walk(&self, start: &Path, seen: &mut BTreeMap<String, Fingerprint>) -> Result<()> {
        for entry in WalkDir::new(start)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let Some(rel) = relative_key(&self.config.root, entry.path()) else {
                continue;
            };
            let fp = Fingerprint::compute(entry.path(), self.config.content_hash)
                .map_err(|e| Error::sync(format!("fingerprint {rel}: {e}")))?;
            seen.insert(rel, fp);
        }
        Ok(())
    }

    fn rescan_all(&mut self) -> Result<()> {
        let mut seen = BTreeMap::new();
        for tracked in &self.config.paths {
            let start = self.config.root.join(tracked);
            if start.exists() {
                self.walk(&start, &mut seen)?;
            }
        }

        for entry in self.entries.values_mut() {
            entry.current = None;
        }
        for (rel, fp) in seen {
            self.entries.entry(rel).or_default().current = Some(fp);
        }
        self.entries
            .retain(|_, e| e.current.is_some() || e.synced.is_some());
        Ok(())
    }

    /// Rescan only `paths`. A directory covers every tracked entry below it,
    /// so files under a moved or deleted directory are marked for deletion.
    fn rescan_paths(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            let abs = if path.is_absolute() {
                path.clone()
            } else {
                self.config.root.join(path)
            };
            let Some(rel) = relative_key(&self.config.root, &abs) else {
                trace!("DevFS: ignoring path outside root: {}", abs.display());
                continue;
            };

            let mut seen = BTreeMap::new();
            if abs.is_dir() {
                self.walk(&abs, &mut seen)?;
            } else if abs.is_file() {
                let fp = Fingerprint::compute(&abs, self.config.content_hash)
                    .map_err(|e| Error::sync(format!("fingerprint {rel}: {e}")))?;
                seen.insert(rel.clone(), fp);
            }

            let below = format!("{rel}/");
            for (key, entry) in self.entries.iter_mut() {
                if (*key == rel || key.starts_with(&below)) && !seen.contains_key(key) {
                    entry.current = None;
                }
            }
            for (key, fp) in seen {
                self.entries.entry(key).or_default().current = Some(fp);
            }
        }
        self.entries
            .retain(|_, e| e.current.is_some() || e.synced.is_some());
        Ok(())
    }
}

/// Forward-slash path of `path` relative to `root`.
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
