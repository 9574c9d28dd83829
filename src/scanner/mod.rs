//! Local tree reconciliation.
//!
//! For every file and folder under a drive root the scanner decides
//! whether it is already known, a new version of a known file, a known
//! entity that was renamed or moved, or something new, and updates the
//! store so the uploader sees exactly what needs sending.
//!
//! File lookups run in a fixed order and the first match wins:
//! 1. same name, content and parent: unchanged (only the cached path moves)
//! 2. same path, different content: new version
//! 3. same content under the new parent, old path gone: renamed
//! 4. same content and name, old path gone: moved
//! 5. otherwise new

pub mod filter;
pub mod hash;

use crate::config::ScanConfig;
use crate::error::Result;
use crate::model::{Drive, Entity};
use crate::store::{StoreQueries, SyncStore};
use filter::NameFilter;
use ignore::WalkBuilder;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Unchanged,
    NewVersion,
    Renamed,
    Moved,
    New,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    /// Modified within the stability window.
    Unsettled,
    Reserved,
    TooLarge { size: u64, max: u64 },
    UnknownParent,
    Vanished,
    DriveRoot,
    NotRegular,
}

#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Classified {
        classification: Classification,
        entity: Entity,
    },
    Skipped(SkipReason),
}

impl ScanOutcome {
    pub fn classification(&self) -> Option<Classification> {
        match self {
            ScanOutcome::Classified { classification, .. } => Some(*classification),
            ScanOutcome::Skipped(_) => None,
        }
    }

    pub fn entity(&self) -> Option<&Entity> {
        match self {
            ScanOutcome::Classified { entity, .. } => Some(entity),
            ScanOutcome::Skipped(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub unchanged: usize,
    pub new_versions: usize,
    pub renamed: usize,
    pub moved: usize,
    pub new: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ScanSummary {
    fn record(&mut self, outcome: &ScanOutcome) {
        match outcome.classification() {
            Some(Classification::Unchanged) => self.unchanged += 1,
            Some(Classification::NewVersion) => self.new_versions += 1,
            Some(Classification::Renamed) => self.renamed += 1,
            Some(Classification::Moved) => self.moved += 1,
            Some(Classification::New) => self.new += 1,
            None => self.skipped += 1,
        }
    }

    /// Entities the scan put in the upload queue.
    pub fn queued(&self) -> usize {
        self.new_versions + self.renamed + self.moved + self.new
    }
}

fn classified(classification: Classification, entity: Entity) -> ScanOutcome {
    ScanOutcome::Classified {
        classification,
        entity,
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

#[cfg(unix)]
fn inode_of(metadata: &Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn inode_of(_metadata: &Metadata) -> Option<u64> {
    None
}

async fn metadata_of(path: &Path) -> Result<Option<Metadata>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub struct EntityScanner<'a, S: SyncStore + ?Sized> {
    store: &'a S,
    config: &'a ScanConfig,
    filter: NameFilter,
}

impl<'a, S: SyncStore + ?Sized> EntityScanner<'a, S> {
    pub fn new(store: &'a S, config: &'a ScanConfig) -> Self {
        Self {
            store,
            config,
            filter: NameFilter::default(),
        }
    }

    /// Classify one file and record the result.
    pub async fn scan_file(&self, drive: &Drive, path: &Path) -> Result<ScanOutcome> {
        let Some(metadata) = metadata_of(path).await? else {
            return Ok(ScanOutcome::Skipped(SkipReason::Vanished));
        };
        if !metadata.is_file() {
            return Ok(ScanOutcome::Skipped(SkipReason::NotRegular));
        }
        let Some(name) = file_name(path) else {
            return Ok(ScanOutcome::Skipped(SkipReason::NotRegular));
        };
        if self.filter.is_reserved_file(&name) {
            return Ok(ScanOutcome::Skipped(SkipReason::Reserved));
        }

        let size = metadata.len();
        if size == 0 {
            return Ok(ScanOutcome::Skipped(SkipReason::Empty));
        }
        if size >= self.config.max_file_size {
            warn!(
                path = %path.display(),
                size,
                max = self.config.max_file_size,
                "file reaches maximum upload size, skipping"
            );
            return Ok(ScanOutcome::Skipped(SkipReason::TooLarge {
                size,
                max: self.config.max_file_size,
            }));
        }

        let modified = metadata.modified()?;
        if !filter::is_settled(modified, SystemTime::now(), self.config.stability_window()) {
            debug!(path = %path.display(), "file still being written");
            return Ok(ScanOutcome::Skipped(SkipReason::Unsettled));
        }

        let parent_path = path.parent().unwrap_or(path);
        let Some(parent) = self.store.folder_at_path(drive.drive_id, parent_path)? else {
            return Ok(ScanOutcome::Skipped(SkipReason::UnknownParent));
        };

        let content_hash = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || hash::hash_file(&path)).await??
        };
        let last_modified = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        if let Some(mut existing) =
            self.store
                .unchanged_file(drive.drive_id, &name, &content_hash, parent.entity_id)?
        {
            if existing.path != path {
                existing.path = path.to_path_buf();
                self.store.put_entity(&existing)?;
            }
            return Ok(classified(Classification::Unchanged, existing));
        }

        if let Some(mut existing) = self.store.file_at_path(drive.drive_id, path)? {
            let classification = if existing.content_hash != content_hash {
                existing.version += 1;
                existing.content_hash = content_hash;
                existing.size = size;
                existing.last_modified = last_modified;
                existing.reset_data();
                Classification::NewVersion
            } else {
                // Same bytes at the same path under a re-created parent folder
                existing.parent_id = Some(parent.entity_id);
                existing.reset_metadata();
                Classification::Moved
            };
            self.store.put_entity(&existing)?;
            info!(path = %path.display(), ?classification, version = existing.version, "file changed");
            return Ok(classified(classification, existing));
        }

        for mut candidate in self
            .store
            .files_with_hash_under(drive.drive_id, &content_hash, parent_path)?
        {
            if candidate.name != name && !candidate.path.exists() {
                info!(from = %candidate.path.display(), to = %path.display(), "file renamed");
                candidate.name = name;
                candidate.path = path.to_path_buf();
                candidate.parent_id = Some(parent.entity_id);
                candidate.reset_metadata();
                self.store.put_entity(&candidate)?;
                return Ok(classified(Classification::Renamed, candidate));
            }
        }

        for mut candidate in self
            .store
            .files_with_hash_and_name(drive.drive_id, &content_hash, &name)?
        {
            if !candidate.path.exists() {
                info!(from = %candidate.path.display(), to = %path.display(), "file moved");
                candidate.path = path.to_path_buf();
                candidate.parent_id = Some(parent.entity_id);
                candidate.reset_metadata();
                self.store.put_entity(&candidate)?;
                return Ok(classified(Classification::Moved, candidate));
            }
        }

        let mut entity = Entity::new_file(drive, parent.entity_id, path.to_path_buf(), name);
        entity.content_hash = content_hash;
        entity.size = size;
        entity.last_modified = last_modified;
        self.store.put_entity(&entity)?;
        info!(path = %path.display(), size, "new file");
        Ok(classified(Classification::New, entity))
    }

    /// Classify one folder and record the result.
    pub async fn scan_folder(&self, drive: &Drive, path: &Path) -> Result<ScanOutcome> {
        if path == drive.root_path {
            return Ok(ScanOutcome::Skipped(SkipReason::DriveRoot));
        }
        let Some(metadata) = metadata_of(path).await? else {
            return Ok(ScanOutcome::Skipped(SkipReason::Vanished));
        };
        if !metadata.is_dir() {
            return Ok(ScanOutcome::Skipped(SkipReason::NotRegular));
        }
        let Some(name) = file_name(path) else {
            return Ok(ScanOutcome::Skipped(SkipReason::NotRegular));
        };
        if self.filter.is_placeholder_folder(&name) {
            return Ok(ScanOutcome::Skipped(SkipReason::Reserved));
        }

        if let Some(existing) = self.store.folder_at_path(drive.drive_id, path)? {
            return Ok(classified(Classification::Unchanged, existing));
        }

        let parent_path = path.parent().unwrap_or(path);
        let Some(parent) = self.store.folder_at_path(drive.drive_id, parent_path)? else {
            return Ok(ScanOutcome::Skipped(SkipReason::UnknownParent));
        };

        let content_hash = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || hash::hash_folder(&path)).await??
        }
        .unwrap_or_default();
        let inode = inode_of(&metadata);

        let mut matched = None;
        if let Some(inode) = inode {
            matched = self
                .store
                .folders_with_inode(drive.drive_id, inode)?
                .into_iter()
                .find(|f| !f.is_root_folder() && !f.path.exists())
                .map(|f| (f, Classification::Renamed));
        }
        if matched.is_none() && !content_hash.is_empty() {
            matched = self
                .store
                .folders_with_hash(drive.drive_id, &content_hash)?
                .into_iter()
                .find(|f| !f.is_root_folder() && !f.path.exists())
                .map(|f| (f, Classification::Moved));
        }

        if let Some((mut folder, classification)) = matched {
            let relinked = folder.name != name || folder.parent_id != Some(parent.entity_id);
            folder.path = path.to_path_buf();
            folder.content_hash = content_hash;
            folder.inode = inode;
            if !relinked {
                // An ancestor moved; this folder's own record is unchanged
                self.store.put_entity(&folder)?;
                return Ok(classified(Classification::Unchanged, folder));
            }
            folder.name = name;
            folder.parent_id = Some(parent.entity_id);
            folder.reset_metadata();
            self.store.put_entity(&folder)?;
            info!(path = %path.display(), ?classification, "folder relocated");
            return Ok(classified(classification, folder));
        }

        let mut folder = Entity::new_folder(drive, Some(parent.entity_id), path.to_path_buf(), name);
        folder.content_hash = content_hash;
        folder.inode = inode;
        self.store.put_entity(&folder)?;
        info!(path = %path.display(), "new folder");
        Ok(classified(Classification::New, folder))
    }

    /// Walk the drive root and classify everything under it, folders first
    /// and parents before children.
    pub async fn scan_drive(&self, drive: &Drive) -> Result<ScanSummary> {
        let root_key = drive.root_folder().key();
        if self.store.entity(&root_key)?.is_none() {
            self.store.put_entity(&drive.root_folder())?;
        }

        let root = drive.root_path.clone();
        let (folders, files) = tokio::task::spawn_blocking(move || walk(&root)).await??;
        debug!(
            drive = %drive.drive_id,
            folders = folders.len(),
            files = files.len(),
            "walked drive root"
        );

        let mut summary = ScanSummary::default();
        for folder in &folders {
            match self.scan_folder(drive, folder).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    warn!(path = %folder.display(), error = %e, "failed to scan folder");
                    summary.failed += 1;
                }
            }
        }
        for file in &files {
            match self.scan_file(drive, file).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "failed to scan file");
                    summary.failed += 1;
                }
            }
        }

        info!(
            drive = %drive.name,
            new = summary.new,
            new_versions = summary.new_versions,
            renamed = summary.renamed,
            moved = summary.moved,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            failed = summary.failed,
            "scan complete"
        );
        Ok(summary)
    }
}

/// Folders and files under `root` in pre-order, sorted by name.
fn walk(root: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut folders = Vec::new();
    let mut files = Vec::new();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }
        match entry.file_type() {
            Some(ft) if ft.is_dir() => folders.push(entry.into_path()),
            Some(ft) if ft.is_file() => files.push(entry.into_path()),
            _ => {}
        }
    }
    Ok((folders, files))
}
