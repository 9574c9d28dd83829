//! Links that open a drive or file in the web app.
//!
//! Public links carry only the id. A private file link also carries the
//! file key, so anyone holding the link can decrypt that one file and
//! nothing else in the drive. Private drives have no shareable link.

use crate::crypto::KeyDerivation;
use crate::error::{Result, SyncError};
use crate::ledger::b64url;
use crate::model::{Drive, Entity, Privacy};
use reqwest::Url;

#[derive(Debug, Clone)]
pub struct ShareLinks {
    app_url: String,
}

impl ShareLinks {
    pub fn new(app_url: &str) -> Result<Self> {
        Url::parse(app_url)
            .map_err(|e| SyncError::Config(format!("invalid app URL {}: {}", app_url, e)))?;
        Ok(Self {
            app_url: app_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn public_drive(&self, drive: &Drive) -> Result<String> {
        if drive.privacy != Privacy::Public {
            return Err(SyncError::malformed(
                "share request",
                format!("drive {} is private", drive.drive_id),
            ));
        }
        Ok(format!("{}/#/drives/{}", self.app_url, drive.drive_id))
    }

    pub fn public_file(&self, file: &Entity) -> Result<String> {
        check_file(file, Privacy::Public)?;
        Ok(self.file_view(file))
    }

    /// The file key travels base64url-encoded in the `fileKey` parameter.
    pub fn private_file(&self, file: &Entity, keys: &dyn KeyDerivation) -> Result<String> {
        check_file(file, Privacy::Private)?;
        let drive_key = keys.drive_key(&file.drive_id)?;
        let file_key = keys.file_key(&drive_key, &file.entity_id)?;
        Ok(format!(
            "{}?fileKey={}",
            self.file_view(file),
            b64url(file_key.as_bytes())
        ))
    }

    /// Link matching the file's privacy.
    pub fn file(&self, file: &Entity, keys: Option<&dyn KeyDerivation>) -> Result<String> {
        match (file.privacy, keys) {
            (Privacy::Public, _) => self.public_file(file),
            (Privacy::Private, Some(keys)) => self.private_file(file, keys),
            (Privacy::Private, None) => Err(SyncError::capability(
                "key derivation",
                "a private file link needs the drive's keys",
            )),
        }
    }

    fn file_view(&self, file: &Entity) -> String {
        format!("{}/#/file/{}/view", self.app_url, file.entity_id)
    }
}

fn check_file(entity: &Entity, privacy: Privacy) -> Result<()> {
    if !entity.is_file() {
        return Err(SyncError::malformed(
            "share request",
            format!("{} is a folder", entity.path.display()),
        ));
    }
    if entity.privacy != privacy {
        return Err(SyncError::malformed(
            "share request",
            format!("{} is {}", entity.path.display(), entity.privacy.as_str()),
        ));
    }
    Ok(())
}
