//! Persistent sync state.
//!
//! `SyncStore` is the minimal key-value and table-scan capability the
//! engine needs. The lookups the scanner, uploader and tracker perform are
//! built on top of it in `StoreQueries`, so any backend gets them for free.

mod fjall_store;
mod memory;

pub use fjall_store::FjallStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::ledger::TxId;
use crate::model::{Bundle, Drive, Entity, EntityKey, EntityType, SyncStatus};
use std::path::Path;
use uuid::Uuid;

pub trait SyncStore: Send + Sync {
    fn entity(&self, key: &EntityKey) -> Result<Option<Entity>>;
    fn put_entity(&self, entity: &Entity) -> Result<()>;
    fn delete_entity(&self, key: &EntityKey) -> Result<()>;
    fn entities(&self) -> Result<Vec<Entity>>;

    fn drive(&self, drive_id: &Uuid) -> Result<Option<Drive>>;
    fn put_drive(&self, drive: &Drive) -> Result<()>;
    fn drives(&self) -> Result<Vec<Drive>>;

    fn bundle(&self, tx_id: &TxId) -> Result<Option<Bundle>>;
    fn put_bundle(&self, bundle: &Bundle) -> Result<()>;
    fn delete_bundle(&self, tx_id: &TxId) -> Result<()>;
    fn bundles(&self) -> Result<Vec<Bundle>>;
}

/// Lookups built on the scan capability.
pub trait StoreQueries: SyncStore {
    fn entities_in_drive(&self, drive_id: Uuid) -> Result<Vec<Entity>> {
        Ok(self
            .entities()?
            .into_iter()
            .filter(|e| e.drive_id == drive_id)
            .collect())
    }

    fn files_in_drive(&self, drive_id: Uuid) -> Result<Vec<Entity>> {
        Ok(self
            .entities_in_drive(drive_id)?
            .into_iter()
            .filter(|e| e.entity_type == EntityType::File)
            .collect())
    }

    fn folders_in_drive(&self, drive_id: Uuid) -> Result<Vec<Entity>> {
        Ok(self
            .entities_in_drive(drive_id)?
            .into_iter()
            .filter(|e| e.entity_type == EntityType::Folder)
            .collect())
    }

    /// File with the same name, content and parent.
    fn unchanged_file(
        &self,
        drive_id: Uuid,
        name: &str,
        content_hash: &str,
        parent_id: Uuid,
    ) -> Result<Option<Entity>> {
        Ok(self.files_in_drive(drive_id)?.into_iter().find(|e| {
            e.name == name && e.content_hash == content_hash && e.parent_id == Some(parent_id)
        }))
    }

    fn file_at_path(&self, drive_id: Uuid, path: &Path) -> Result<Option<Entity>> {
        Ok(self
            .files_in_drive(drive_id)?
            .into_iter()
            .find(|e| e.path == path))
    }

    /// Files with this content somewhere under `parent_path`.
    fn files_with_hash_under(
        &self,
        drive_id: Uuid,
        content_hash: &str,
        parent_path: &Path,
    ) -> Result<Vec<Entity>> {
        Ok(self
            .files_in_drive(drive_id)?
            .into_iter()
            .filter(|e| e.content_hash == content_hash && e.path.starts_with(parent_path))
            .collect())
    }

    fn files_with_hash_and_name(
        &self,
        drive_id: Uuid,
        content_hash: &str,
        name: &str,
    ) -> Result<Vec<Entity>> {
        Ok(self
            .files_in_drive(drive_id)?
            .into_iter()
            .filter(|e| e.content_hash == content_hash && e.name == name)
            .collect())
    }

    fn folder_at_path(&self, drive_id: Uuid, path: &Path) -> Result<Option<Entity>> {
        Ok(self
            .folders_in_drive(drive_id)?
            .into_iter()
            .find(|e| e.path == path))
    }

    fn folders_with_inode(&self, drive_id: Uuid, inode: u64) -> Result<Vec<Entity>> {
        Ok(self
            .folders_in_drive(drive_id)?
            .into_iter()
            .filter(|e| e.inode == Some(inode))
            .collect())
    }

    fn folders_with_hash(&self, drive_id: Uuid, content_hash: &str) -> Result<Vec<Entity>> {
        Ok(self
            .folders_in_drive(drive_id)?
            .into_iter()
            .filter(|e| !e.content_hash.is_empty() && e.content_hash == content_hash)
            .collect())
    }

    /// Entities of `login` with any transaction still to send, ordered by
    /// path so parents precede their children. Root folders are excluded;
    /// they are uploaded together with their drive.
    fn pending_entities(&self, login: &str) -> Result<Vec<Entity>> {
        let mut pending: Vec<Entity> = self
            .entities()?
            .into_iter()
            .filter(|e| e.login == login && e.is_pending() && !e.is_root_folder())
            .collect();
        pending.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(pending)
    }

    /// Entities of `login` with an individually submitted transaction.
    /// Bundled items are settled through their bundle instead.
    fn submitted_entities(&self, login: &str) -> Result<Vec<Entity>> {
        Ok(self
            .entities()?
            .into_iter()
            .filter(|e| {
                e.login == login
                    && (e.data_awaits_direct_check() || e.metadata_awaits_direct_check())
            })
            .collect())
    }

    fn drives_of(&self, login: &str) -> Result<Vec<Drive>> {
        Ok(self
            .drives()?
            .into_iter()
            .filter(|d| d.login == login)
            .collect())
    }

    fn submitted_bundles(&self, login: &str) -> Result<Vec<Bundle>> {
        Ok(self
            .bundles()?
            .into_iter()
            .filter(|b| b.login == login && b.status == crate::model::BundleStatus::Submitted)
            .collect())
    }

    /// Whether anything besides the root folder of `drive_id` has reached
    /// the ledger.
    fn drive_has_submissions(&self, drive_id: Uuid) -> Result<bool> {
        Ok(self
            .entities_in_drive(drive_id)?
            .iter()
            .any(|e| !e.is_root_folder() && e.metadata_sync_status != SyncStatus::NeedsUpload))
    }
}

impl<S: SyncStore + ?Sized> StoreQueries for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Privacy;
    use std::path::PathBuf;

    fn fixture() -> (MemoryStore, Drive) {
        let store = MemoryStore::new();
        let drive = Drive::new("alice", "Docs", Privacy::Public, PathBuf::from("/d"));
        store.put_drive(&drive).unwrap();
        store.put_entity(&drive.root_folder()).unwrap();
        (store, drive)
    }

    fn file(drive: &Drive, path: &str, hash: &str) -> Entity {
        let path = PathBuf::from(path);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let mut e = Entity::new_file(drive, drive.root_folder_id, path, name);
        e.content_hash = hash.to_string();
        e
    }

    #[test]
    fn test_pending_is_path_ordered_without_root() {
        let (store, drive) = fixture();
        store.put_entity(&file(&drive, "/d/z.txt", "1")).unwrap();
        store.put_entity(&file(&drive, "/d/a.txt", "2")).unwrap();
        let mut done = file(&drive, "/d/m.txt", "3");
        done.mark_data_submitted(TxId::from_signature(b"a"), chrono::Utc::now());
        done.mark_metadata_submitted(TxId::from_signature(b"b"), chrono::Utc::now());
        store.put_entity(&done).unwrap();

        let pending = store.pending_entities("alice").unwrap();
        let paths: Vec<_> = pending.iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/d/a.txt"), PathBuf::from("/d/z.txt")]);
        assert!(store.pending_entities("bob").unwrap().is_empty());
    }

    #[test]
    fn test_hash_lookups() {
        let (store, drive) = fixture();
        store.put_entity(&file(&drive, "/d/sub/x.txt", "h")).unwrap();

        assert!(store
            .unchanged_file(drive.drive_id, "x.txt", "h", drive.root_folder_id)
            .unwrap()
            .is_some());
        assert_eq!(
            store
                .files_with_hash_under(drive.drive_id, "h", Path::new("/d/sub"))
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .files_with_hash_under(drive.drive_id, "h", Path::new("/d/other"))
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .files_with_hash_and_name(drive.drive_id, "h", "x.txt")
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_drive_has_submissions() {
        let (store, drive) = fixture();
        assert!(!store.drive_has_submissions(drive.drive_id).unwrap());

        let mut f = file(&drive, "/d/a.txt", "1");
        f.mark_metadata_submitted(TxId::from_signature(b"m"), chrono::Utc::now());
        store.put_entity(&f).unwrap();
        assert!(store.drive_has_submissions(drive.drive_id).unwrap());
    }
}
