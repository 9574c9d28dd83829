use super::SyncStore;
use crate::error::Result;
use crate::ledger::TxId;
use crate::model::{Bundle, Drive, Entity, EntityKey};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

/// On-disk store backed by fjall.
///
/// Three partitions (`entities`, `drives`, `bundles`) hold bincode-encoded
/// records. Every write is persisted before returning so an interrupted
/// process resumes from the last recorded status.
pub struct FjallStore {
    keyspace: Keyspace,
    entities: PartitionHandle,
    drives: PartitionHandle,
    bundles: PartitionHandle,
}

impl FjallStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let keyspace = Config::new(path).open()?;
        let entities = keyspace.open_partition("entities", PartitionCreateOptions::default())?;
        let drives = keyspace.open_partition("drives", PartitionCreateOptions::default())?;
        let bundles = keyspace.open_partition("bundles", PartitionCreateOptions::default())?;
        tracing::debug!(path = %path.display(), "opened sync store");

        Ok(Self {
            keyspace,
            entities,
            drives,
            bundles,
        })
    }

    fn entity_key(key: &EntityKey) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[..16].copy_from_slice(key.drive_id.as_bytes());
        out[16..].copy_from_slice(key.entity_id.as_bytes());
        out
    }

    fn put<T: Serialize>(&self, partition: &PartitionHandle, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        partition.insert(key, bytes)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(partition: &PartitionHandle, key: &[u8]) -> Result<Option<T>> {
        match partition.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, partition: &PartitionHandle, key: &[u8]) -> Result<()> {
        partition.remove(key)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(partition: &PartitionHandle) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for item in partition.iter() {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }
}

impl SyncStore for FjallStore {
    fn entity(&self, key: &EntityKey) -> Result<Option<Entity>> {
        Self::get(&self.entities, &Self::entity_key(key))
    }

    fn put_entity(&self, entity: &Entity) -> Result<()> {
        self.put(&self.entities, &Self::entity_key(&entity.key()), entity)
    }

    fn delete_entity(&self, key: &EntityKey) -> Result<()> {
        self.delete(&self.entities, &Self::entity_key(key))
    }

    fn entities(&self) -> Result<Vec<Entity>> {
        Self::scan(&self.entities)
    }

    fn drive(&self, drive_id: &Uuid) -> Result<Option<Drive>> {
        Self::get(&self.drives, drive_id.as_bytes())
    }

    fn put_drive(&self, drive: &Drive) -> Result<()> {
        self.put(&self.drives, drive.drive_id.as_bytes(), drive)
    }

    fn drives(&self) -> Result<Vec<Drive>> {
        Self::scan(&self.drives)
    }

    fn bundle(&self, tx_id: &TxId) -> Result<Option<Bundle>> {
        Self::get(&self.bundles, tx_id.as_bytes())
    }

    fn put_bundle(&self, bundle: &Bundle) -> Result<()> {
        self.put(&self.bundles, bundle.tx_id.as_bytes(), bundle)
    }

    fn delete_bundle(&self, tx_id: &TxId) -> Result<()> {
        self.delete(&self.bundles, tx_id.as_bytes())
    }

    fn bundles(&self) -> Result<Vec<Bundle>> {
        Self::scan(&self.bundles)
    }
}
