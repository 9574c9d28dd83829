//! Entities, drives and bundles as persisted by the sync store.
//!
//! Each entity carries two independent status fields: one for its data
//! transaction (files only) and one for its metadata transaction. A
//! transaction id is present exactly when the matching status is
//! `Submitted` or `Confirmed`; the mutators below keep that pairing.

use crate::ledger::TxId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    NeedsUpload,
    Submitted,
    Confirmed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatus::NeedsUpload => "needs upload",
            SyncStatus::Submitted => "submitted",
            SyncStatus::Confirmed => "confirmed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    File,
    Folder,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::File => "file",
            EntityType::Folder => "folder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Privacy {
    Public,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Private => "private",
        }
    }
}

/// Cipher id and IV recorded when a payload was encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherInfo {
    pub cipher: String,
    pub iv: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub drive_id: Uuid,
    pub entity_id: Uuid,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.drive_id, self.entity_id)
    }
}

// =============================================================================
// Entity
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub drive_id: Uuid,
    pub entity_id: Uuid,
    pub entity_type: EntityType,
    pub login: String,
    pub name: String,
    pub path: PathBuf,
    /// `None` only for a drive's root folder.
    pub parent_id: Option<Uuid>,
    pub content_hash: String,
    pub size: u64,
    /// Milliseconds since the epoch.
    pub last_modified: i64,
    pub version: u32,
    pub content_type: String,
    /// Seconds since the epoch of the last change to this record.
    pub unix_time: i64,
    pub privacy: Privacy,
    pub data_cipher: Option<CipherInfo>,
    pub metadata_cipher: Option<CipherInfo>,
    /// `None` for folders.
    pub data_sync_status: Option<SyncStatus>,
    pub metadata_sync_status: SyncStatus,
    pub data_tx_id: Option<TxId>,
    pub metadata_tx_id: Option<TxId>,
    /// Bundle carrying the data item, when `data_tx_id` is a bundled item.
    pub data_bundle_tx_id: Option<TxId>,
    /// Bundle carrying the metadata item, when `metadata_tx_id` is a
    /// bundled item.
    pub metadata_bundle_tx_id: Option<TxId>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub permaweb_link: Option<String>,
    pub inode: Option<u64>,
}

impl Entity {
    /// New file record needing both transactions.
    pub fn new_file(drive: &Drive, parent_id: Uuid, path: PathBuf, name: String) -> Self {
        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            drive_id: drive.drive_id,
            entity_id: Uuid::new_v4(),
            entity_type: EntityType::File,
            login: drive.login.clone(),
            name,
            path,
            parent_id: Some(parent_id),
            content_hash: String::new(),
            size: 0,
            last_modified: 0,
            version: 0,
            content_type,
            unix_time: Utc::now().timestamp(),
            privacy: drive.privacy,
            data_cipher: None,
            metadata_cipher: None,
            data_sync_status: Some(SyncStatus::NeedsUpload),
            metadata_sync_status: SyncStatus::NeedsUpload,
            data_tx_id: None,
            metadata_tx_id: None,
            data_bundle_tx_id: None,
            metadata_bundle_tx_id: None,
            uploaded_at: None,
            permaweb_link: None,
            inode: None,
        }
    }

    /// New folder record needing a metadata transaction.
    pub fn new_folder(drive: &Drive, parent_id: Option<Uuid>, path: PathBuf, name: String) -> Self {
        Self {
            drive_id: drive.drive_id,
            entity_id: Uuid::new_v4(),
            entity_type: EntityType::Folder,
            login: drive.login.clone(),
            name,
            path,
            parent_id,
            content_hash: String::new(),
            size: 0,
            last_modified: 0,
            version: 0,
            content_type: "application/json".to_string(),
            unix_time: Utc::now().timestamp(),
            privacy: drive.privacy,
            data_cipher: None,
            metadata_cipher: None,
            data_sync_status: None,
            metadata_sync_status: SyncStatus::NeedsUpload,
            data_tx_id: None,
            metadata_tx_id: None,
            data_bundle_tx_id: None,
            metadata_bundle_tx_id: None,
            uploaded_at: None,
            permaweb_link: None,
            inode: None,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey {
            drive_id: self.drive_id,
            entity_id: self.entity_id,
        }
    }

    pub fn is_file(&self) -> bool {
        self.entity_type == EntityType::File
    }

    pub fn is_root_folder(&self) -> bool {
        self.entity_type == EntityType::Folder && self.parent_id.is_none()
    }

    pub fn needs_data_upload(&self) -> bool {
        self.data_sync_status == Some(SyncStatus::NeedsUpload)
    }

    pub fn needs_metadata_upload(&self) -> bool {
        self.metadata_sync_status == SyncStatus::NeedsUpload
    }

    pub fn is_pending(&self) -> bool {
        self.needs_data_upload() || self.needs_metadata_upload()
    }

    pub fn is_in_flight(&self) -> bool {
        self.data_sync_status == Some(SyncStatus::Submitted)
            || self.metadata_sync_status == SyncStatus::Submitted
    }

    /// Content changed: both transactions must be redone.
    pub fn reset_data(&mut self) {
        if self.is_file() {
            self.data_sync_status = Some(SyncStatus::NeedsUpload);
        }
        self.data_tx_id = None;
        self.data_bundle_tx_id = None;
        self.data_cipher = None;
        self.permaweb_link = None;
        self.reset_metadata();
    }

    /// Only name or location changed.
    pub fn reset_metadata(&mut self) {
        self.metadata_sync_status = SyncStatus::NeedsUpload;
        self.metadata_tx_id = None;
        self.metadata_cipher = None;
        self.metadata_bundle_tx_id = None;
        self.unix_time = Utc::now().timestamp();
    }

    pub fn mark_data_submitted(&mut self, tx_id: TxId, at: DateTime<Utc>) {
        if self.is_file() {
            self.data_sync_status = Some(SyncStatus::Submitted);
            self.data_tx_id = Some(tx_id);
            self.uploaded_at = Some(at);
        }
    }

    pub fn mark_metadata_submitted(&mut self, tx_id: TxId, at: DateTime<Utc>) {
        self.metadata_sync_status = SyncStatus::Submitted;
        self.metadata_tx_id = Some(tx_id);
        self.uploaded_at = Some(at);
    }

    /// Submission timed out: drop the tx id so the retry gets a new one.
    pub fn requeue_data(&mut self) {
        if self.is_file() {
            self.data_sync_status = Some(SyncStatus::NeedsUpload);
            self.data_tx_id = None;
            self.data_bundle_tx_id = None;
        }
    }

    pub fn requeue_metadata(&mut self) {
        self.metadata_sync_status = SyncStatus::NeedsUpload;
        self.metadata_tx_id = None;
        self.metadata_bundle_tx_id = None;
    }

    /// Data transaction sent on its own, to be polled directly.
    pub fn data_awaits_direct_check(&self) -> bool {
        self.data_sync_status == Some(SyncStatus::Submitted) && self.data_bundle_tx_id.is_none()
    }

    /// Metadata transaction sent on its own, to be polled directly.
    pub fn metadata_awaits_direct_check(&self) -> bool {
        self.metadata_sync_status == SyncStatus::Submitted && self.metadata_bundle_tx_id.is_none()
    }
}

// =============================================================================
// Drive
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drive {
    pub drive_id: Uuid,
    pub login: String,
    pub name: String,
    pub privacy: Privacy,
    pub root_folder_id: Uuid,
    pub root_path: PathBuf,
    /// Key derivation scheme for private drives.
    pub auth_mode: Option<String>,
    pub cipher: Option<CipherInfo>,
    pub metadata_sync_status: SyncStatus,
    pub metadata_tx_id: Option<TxId>,
    pub unix_time: i64,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl Drive {
    pub fn new(login: &str, name: &str, privacy: Privacy, root_path: PathBuf) -> Self {
        Self {
            drive_id: Uuid::new_v4(),
            login: login.to_string(),
            name: name.to_string(),
            privacy,
            root_folder_id: Uuid::new_v4(),
            root_path,
            auth_mode: match privacy {
                Privacy::Private => Some("password".to_string()),
                Privacy::Public => None,
            },
            cipher: None,
            metadata_sync_status: SyncStatus::NeedsUpload,
            metadata_tx_id: None,
            unix_time: Utc::now().timestamp(),
            uploaded_at: None,
        }
    }

    /// Root folder record for this drive.
    pub fn root_folder(&self) -> Entity {
        let name = self.name.clone();
        let mut root = Entity::new_folder(self, None, self.root_path.clone(), name);
        root.entity_id = self.root_folder_id;
        root
    }

    pub fn mark_submitted(&mut self, tx_id: TxId, at: DateTime<Utc>) {
        self.metadata_sync_status = SyncStatus::Submitted;
        self.metadata_tx_id = Some(tx_id);
        self.uploaded_at = Some(at);
    }

    pub fn requeue(&mut self) {
        self.metadata_sync_status = SyncStatus::NeedsUpload;
        self.metadata_tx_id = None;
    }
}

// =============================================================================
// Bundle
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleStatus {
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub tx_id: TxId,
    pub login: String,
    pub members: Vec<EntityKey>,
    pub byte_size: u64,
    pub submitted_at: DateTime<Utc>,
    pub status: BundleStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive() -> Drive {
        Drive::new("alice", "Photos", Privacy::Public, PathBuf::from("/sync/Photos"))
    }

    #[test]
    fn test_root_folder_shares_drive_ids() {
        let drive = drive();
        let root = drive.root_folder();
        assert_eq!(root.entity_id, drive.root_folder_id);
        assert_eq!(root.drive_id, drive.drive_id);
        assert!(root.is_root_folder());
        assert_eq!(root.data_sync_status, None);
    }

    #[test]
    fn test_new_file_content_type() {
        let drive = drive();
        let file = Entity::new_file(
            &drive,
            drive.root_folder_id,
            PathBuf::from("/sync/Photos/cat.png"),
            "cat.png".into(),
        );
        assert_eq!(file.content_type, "image/png");
        assert!(file.needs_data_upload());
        assert!(file.needs_metadata_upload());

        let unknown = Entity::new_file(
            &drive,
            drive.root_folder_id,
            PathBuf::from("/sync/Photos/blob.zzzunknown"),
            "blob.zzzunknown".into(),
        );
        assert_eq!(unknown.content_type, "application/octet-stream");
    }

    #[test]
    fn test_tx_id_tracks_status() {
        let drive = drive();
        let mut file = Entity::new_file(
            &drive,
            drive.root_folder_id,
            PathBuf::from("/sync/Photos/a.txt"),
            "a.txt".into(),
        );
        let id = TxId::from_signature(b"sig");

        file.mark_data_submitted(id, Utc::now());
        assert_eq!(file.data_sync_status, Some(SyncStatus::Submitted));
        assert_eq!(file.data_tx_id, Some(id));

        file.requeue_data();
        assert!(file.needs_data_upload());
        assert!(file.data_tx_id.is_none());
    }

    #[test]
    fn test_folder_never_gets_data_status() {
        let drive = drive();
        let mut folder = drive.root_folder();
        folder.mark_data_submitted(TxId::from_signature(b"x"), Utc::now());
        folder.reset_data();
        assert_eq!(folder.data_sync_status, None);
        assert!(folder.data_tx_id.is_none());
        assert!(folder.needs_metadata_upload());
    }

    #[test]
    fn test_bincode_roundtrip() {
        let drive = drive();
        let mut root = drive.root_folder();
        root.mark_metadata_submitted(TxId::from_signature(b"m"), Utc::now());
        let bytes = bincode::serialize(&root).unwrap();
        let back: Entity = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, root);
    }
}
