use super::SyncStore;
use crate::error::Result;
use crate::ledger::TxId;
use crate::model::{Bundle, Drive, Entity, EntityKey};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use uuid::Uuid;

/// In-process store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<BTreeMap<EntityKey, Entity>>,
    drives: RwLock<BTreeMap<Uuid, Drive>>,
    bundles: RwLock<BTreeMap<TxId, Bundle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStore for MemoryStore {
    fn entity(&self, key: &EntityKey) -> Result<Option<Entity>> {
        Ok(self.entities.read().get(key).cloned())
    }

    fn put_entity(&self, entity: &Entity) -> Result<()> {
        self.entities.write().insert(entity.key(), entity.clone());
        Ok(())
    }

    fn delete_entity(&self, key: &EntityKey) -> Result<()> {
        self.entities.write().remove(key);
        Ok(())
    }

    fn entities(&self) -> Result<Vec<Entity>> {
        Ok(self.entities.read().values().cloned().collect())
    }

    fn drive(&self, drive_id: &Uuid) -> Result<Option<Drive>> {
        Ok(self.drives.read().get(drive_id).cloned())
    }

    fn put_drive(&self, drive: &Drive) -> Result<()> {
        self.drives.write().insert(drive.drive_id, drive.clone());
        Ok(())
    }

    fn drives(&self) -> Result<Vec<Drive>> {
        Ok(self.drives.read().values().cloned().collect())
    }

    fn bundle(&self, tx_id: &TxId) -> Result<Option<Bundle>> {
        Ok(self.bundles.read().get(tx_id).cloned())
    }

    fn put_bundle(&self, bundle: &Bundle) -> Result<()> {
        self.bundles.write().insert(bundle.tx_id, bundle.clone());
        Ok(())
    }

    fn delete_bundle(&self, tx_id: &TxId) -> Result<()> {
        self.bundles.write().remove(tx_id);
        Ok(())
    }

    fn bundles(&self) -> Result<Vec<Bundle>> {
        Ok(self.bundles.read().values().cloned().collect())
    }
}
