//! Tag sets attached to each kind of transaction.
//!
//! Order matters to indexers that read the first matching tag, so every
//! set is built as an ordered list.

use super::Tag;
use crate::model::{CipherInfo, Drive, Entity, EntityType, Privacy};

pub const TIP_TYPE_DATA_UPLOAD: &str = "data upload";
const JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

/// What a transaction carries.
#[derive(Debug, Clone, Copy)]
pub enum EntityTags<'a> {
    /// File or folder metadata JSON.
    Metadata(&'a Entity),
    /// Raw (or encrypted) file content.
    FileData { entity: &'a Entity, tip: bool },
    /// Drive metadata JSON.
    Drive(&'a Drive),
    /// Aggregate of data items.
    Bundle { tip: bool },
}

#[derive(Debug, Clone)]
pub struct TagBuilder {
    pub app_name: String,
    pub app_version: String,
    pub arfs_version: String,
}

impl TagBuilder {
    pub fn new(app_name: &str, app_version: &str, arfs_version: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            app_version: app_version.to_string(),
            arfs_version: arfs_version.to_string(),
        }
    }

    pub fn build(&self, what: EntityTags<'_>) -> Vec<Tag> {
        let mut tags = Vec::with_capacity(12);
        match what {
            EntityTags::Metadata(entity) => {
                self.app(&mut tags);
                tags.push(Tag::new("Unix-Time", entity.unix_time.to_string()));
                content_type(&mut tags, entity.privacy, JSON, entity.metadata_cipher.as_ref());
                tags.push(Tag::new("ArFS", &self.arfs_version));
                tags.push(Tag::new("Entity-Type", entity.entity_type.as_str()));
                tags.push(Tag::new("Drive-Id", entity.drive_id.to_string()));
                let id_tag = match entity.entity_type {
                    EntityType::File => "File-Id",
                    EntityType::Folder => "Folder-Id",
                };
                tags.push(Tag::new(id_tag, entity.entity_id.to_string()));
                if let Some(parent) = entity.parent_id {
                    tags.push(Tag::new("Parent-Folder-Id", parent.to_string()));
                }
            }
            EntityTags::FileData { entity, tip } => {
                self.app(&mut tags);
                if tip {
                    tags.push(Tag::new("Tip-Type", TIP_TYPE_DATA_UPLOAD));
                }
                content_type(
                    &mut tags,
                    entity.privacy,
                    &entity.content_type,
                    entity.data_cipher.as_ref(),
                );
            }
            EntityTags::Drive(drive) => {
                self.app(&mut tags);
                tags.push(Tag::new("Unix-Time", drive.unix_time.to_string()));
                tags.push(Tag::new("Drive-Id", drive.drive_id.to_string()));
                tags.push(Tag::new("Drive-Privacy", drive.privacy.as_str()));
                content_type(&mut tags, drive.privacy, JSON, drive.cipher.as_ref());
                if drive.privacy == Privacy::Private {
                    if let Some(mode) = &drive.auth_mode {
                        tags.push(Tag::new("Drive-Auth-Mode", mode));
                    }
                }
                tags.push(Tag::new("ArFS", &self.arfs_version));
                tags.push(Tag::new("Entity-Type", "drive"));
            }
            EntityTags::Bundle { tip } => {
                tags.push(Tag::new("Bundle-Format", "binary"));
                tags.push(Tag::new("Bundle-Version", "2.0.0"));
                self.app(&mut tags);
                if tip {
                    tags.push(Tag::new("Tip-Type", TIP_TYPE_DATA_UPLOAD));
                }
            }
        }
        tags
    }

    fn app(&self, tags: &mut Vec<Tag>) {
        tags.push(Tag::new("App-Name", &self.app_name));
        tags.push(Tag::new("App-Version", &self.app_version));
    }
}

/// Private payloads are opaque bytes plus the cipher needed to open them.
fn content_type(tags: &mut Vec<Tag>, privacy: Privacy, public_type: &str, cipher: Option<&CipherInfo>) {
    match (privacy, cipher) {
        (Privacy::Private, Some(cipher)) => {
            tags.push(Tag::new("Content-Type", OCTET_STREAM));
            tags.push(Tag::new("Cipher", &cipher.cipher));
            tags.push(Tag::new("Cipher-IV", &cipher.iv));
        }
        (Privacy::Private, None) => tags.push(Tag::new("Content-Type", OCTET_STREAM)),
        (Privacy::Public, _) => tags.push(Tag::new("Content-Type", public_type)),
    }
}
