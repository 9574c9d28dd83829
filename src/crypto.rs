//! Encryption capabilities for private drives.
//!
//! Key derivation and the cipher itself are supplied by the embedding
//! application. This module only defines the seams and the rule for which
//! key protects which payload: file data and file metadata use the file
//! key, folder and drive metadata use the drive key.

use crate::error::Result;
use crate::model::{CipherInfo, Drive, Entity, EntityType};
use bytes::Bytes;
use uuid::Uuid;

/// Opaque symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key([redacted; {}])", self.0.len())
    }
}

pub trait KeyDerivation: Send + Sync {
    fn drive_key(&self, drive_id: &Uuid) -> Result<Key>;
    fn file_key(&self, drive_key: &Key, file_id: &Uuid) -> Result<Key>;
}

#[derive(Debug, Clone)]
pub struct Encrypted {
    pub ciphertext: Bytes,
    pub cipher: CipherInfo,
}

pub trait Encryptor: Send + Sync {
    fn encrypt(&self, key: &Key, plaintext: &[u8]) -> Result<Encrypted>;
}

/// Key derivation plus cipher, bundled because private payloads always
/// need both.
#[derive(Clone, Copy)]
pub struct Vault<'a> {
    pub keys: &'a dyn KeyDerivation,
    pub encryptor: &'a dyn Encryptor,
}

impl<'a> Vault<'a> {
    /// Key protecting an entity's data and metadata.
    pub fn entity_key(&self, entity: &Entity) -> Result<Key> {
        let drive_key = self.keys.drive_key(&entity.drive_id)?;
        match entity.entity_type {
            EntityType::File => self.keys.file_key(&drive_key, &entity.entity_id),
            EntityType::Folder => Ok(drive_key),
        }
    }

    pub fn encrypt_entity(&self, entity: &Entity, plaintext: &[u8]) -> Result<Encrypted> {
        let key = self.entity_key(entity)?;
        self.encryptor.encrypt(&key, plaintext)
    }

    pub fn encrypt_drive(&self, drive: &Drive, plaintext: &[u8]) -> Result<Encrypted> {
        let key = self.keys.drive_key(&drive.drive_id)?;
        self.encryptor.encrypt(&key, plaintext)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{TestKeys, XorEncryptor};
    use super::*;
    use crate::model::Privacy;
    use std::path::PathBuf;

    #[test]
    fn test_key_selection() {
        let vault = Vault {
            keys: &TestKeys,
            encryptor: &XorEncryptor,
        };
        let drive = Drive::new("bob", "Vault", Privacy::Private, PathBuf::from("/v"));
        let folder = drive.root_folder();
        let file = Entity::new_file(&drive, drive.root_folder_id, PathBuf::from("/v/a"), "a".into());

        let folder_key = vault.entity_key(&folder).unwrap();
        let file_key = vault.entity_key(&file).unwrap();
        assert_eq!(folder_key.as_bytes(), drive.drive_id.as_bytes());
        assert_eq!(file_key.as_bytes().len(), 32);
        assert_ne!(folder_key, file_key);
    }

    #[test]
    fn test_encrypt_changes_bytes() {
        let vault = Vault {
            keys: &TestKeys,
            encryptor: &XorEncryptor,
        };
        let drive = Drive::new("bob", "Vault", Privacy::Private, PathBuf::from("/v"));
        let out = vault.encrypt_drive(&drive, b"{\"name\":\"Vault\"}").unwrap();
        assert_ne!(&out.ciphertext[..], b"{\"name\":\"Vault\"}");
        assert_eq!(out.cipher.cipher, "XOR-TEST");
        assert!(format!("{:?}", Key::new(vec![1, 2])).contains("redacted"));
    }
}
