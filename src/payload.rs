//! Transaction bodies for entities and drives.
//!
//! File data is read from disk, metadata is a small JSON document. Private
//! entities are encrypted through the [`Vault`] and the cipher used is
//! recorded on the record so the tags can announce it.

use crate::crypto::Vault;
use crate::error::{Result, SyncError};
use crate::ledger::TxId;
use crate::model::{Drive, Entity, EntityType, Privacy};
use bytes::Bytes;
use serde::Serialize;
use std::io::ErrorKind;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    name: &'a str,
    size: u64,
    last_modified_date: i64,
    data_tx_id: Option<TxId>,
    data_content_type: &'a str,
}

#[derive(Debug, Serialize)]
struct FolderMetadata<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DriveMetadata<'a> {
    name: &'a str,
    root_folder_id: Uuid,
}

/// Metadata JSON of a file or folder. `data_tx_id` is the transaction
/// holding the file's current content.
pub fn entity_metadata_json(entity: &Entity, data_tx_id: Option<TxId>) -> Result<Vec<u8>> {
    let json = match entity.entity_type {
        EntityType::File => serde_json::to_vec(&FileMetadata {
            name: &entity.name,
            size: entity.size,
            last_modified_date: entity.last_modified,
            data_tx_id,
            data_content_type: &entity.content_type,
        })?,
        EntityType::Folder => serde_json::to_vec(&FolderMetadata { name: &entity.name })?,
    };
    Ok(json)
}

pub fn drive_metadata_json(drive: &Drive) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&DriveMetadata {
        name: &drive.name,
        root_folder_id: drive.root_folder_id,
    })?)
}

#[derive(Clone, Copy, Default)]
pub struct PayloadBuilder<'a> {
    vault: Option<Vault<'a>>,
}

impl<'a> PayloadBuilder<'a> {
    pub fn new(vault: Option<Vault<'a>>) -> Self {
        Self { vault }
    }

    fn vault(&self) -> Result<&Vault<'a>> {
        self.vault
            .as_ref()
            .ok_or_else(|| SyncError::capability("encryption", "no key material for a private drive"))
    }

    /// File content, encrypted for private drives.
    pub async fn file_data(&self, entity: &mut Entity) -> Result<Bytes> {
        let data = match tokio::fs::read(&entity.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SyncError::StaleEntity {
                    path: entity.path.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        match entity.privacy {
            Privacy::Public => Ok(Bytes::from(data)),
            Privacy::Private => {
                let encrypted = self.vault()?.encrypt_entity(entity, &data)?;
                entity.data_cipher = Some(encrypted.cipher);
                Ok(encrypted.ciphertext)
            }
        }
    }

    pub fn entity_metadata(&self, entity: &mut Entity, data_tx_id: Option<TxId>) -> Result<Bytes> {
        let json = entity_metadata_json(entity, data_tx_id)?;
        match entity.privacy {
            Privacy::Public => Ok(Bytes::from(json)),
            Privacy::Private => {
                let encrypted = self.vault()?.encrypt_entity(entity, &json)?;
                entity.metadata_cipher = Some(encrypted.cipher);
                Ok(encrypted.ciphertext)
            }
        }
    }

    pub fn drive_metadata(&self, drive: &mut Drive) -> Result<Bytes> {
        let json = drive_metadata_json(drive)?;
        match drive.privacy {
            Privacy::Public => Ok(Bytes::from(json)),
            Privacy::Private => {
                let encrypted = self.vault()?.encrypt_drive(drive, &json)?;
                drive.cipher = Some(encrypted.cipher);
                Ok(encrypted.ciphertext)
            }
        }
    }
}
