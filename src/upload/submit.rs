//! Building, signing and uploading ledger transactions.
//!
//! `Submitter` owns everything a transaction needs besides its body: the
//! signer, the reward and tip quotes, the anchor and the upload policy.

use super::progress::{ProgressCallback, ProgressReporter};
use super::uploader::{ChunkUploader, UploadPolicy};
use crate::config::SyncConfig;
use crate::crypto::Vault;
use crate::error::{Result, SyncError};
use crate::ledger::client::LedgerClient;
use crate::ledger::{EntityTags, Signer, Tag, TagBuilder, TransactionDraft, TxId, Winston};
use crate::model::{Drive, Entity, EntityKey, SyncStatus};
use crate::payload::PayloadBuilder;
use crate::price::{PriceOracle, TipOracle, TokenHolder};
use crate::store::{StoreQueries, SyncStore};
use bytes::Bytes;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A transaction that reached the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub tx_id: TxId,
    pub bytes: usize,
    pub reward: Winston,
    pub tip: Winston,
}

pub struct Submitter<'a> {
    client: Arc<dyn LedgerClient>,
    signer: &'a dyn Signer,
    price: &'a dyn PriceOracle,
    tip: &'a dyn TipOracle,
    tags: TagBuilder,
    payloads: PayloadBuilder<'a>,
    policy: UploadPolicy,
    progress: Option<ProgressCallback>,
    progress_interval: Duration,
}

impl<'a> Submitter<'a> {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        signer: &'a dyn Signer,
        price: &'a dyn PriceOracle,
        tip: &'a dyn TipOracle,
        config: &SyncConfig,
    ) -> Self {
        Self {
            client,
            signer,
            price,
            tip,
            tags: TagBuilder::new(&config.app_name, &config.app_version, &config.arfs_version),
            payloads: PayloadBuilder::default(),
            policy: UploadPolicy::from(&config.upload),
            progress: None,
            progress_interval: config.upload.progress_interval(),
        }
    }

    pub fn with_vault(mut self, vault: Vault<'a>) -> Self {
        self.payloads = PayloadBuilder::new(Some(vault));
        self
    }

    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Report the percent complete of every transaction upload.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn signer(&self) -> &dyn Signer {
        self.signer
    }

    pub fn tags(&self) -> &TagBuilder {
        &self.tags
    }

    pub fn payloads(&self) -> &PayloadBuilder<'a> {
        &self.payloads
    }

    /// Token holder to tip, if the tip oracle offers one.
    pub async fn tip_recipient(&self) -> Result<Option<TokenHolder>> {
        let holder = self.tip.select_token_holder().await?;
        if holder.is_none() {
            debug!("no token holder available, sending without tip");
        }
        Ok(holder)
    }

    /// Price, sign and upload one transaction.
    pub async fn submit(
        &self,
        data: Bytes,
        tags: Vec<Tag>,
        recipient: Option<TokenHolder>,
    ) -> Result<Submission> {
        let bytes = data.len();
        let reward = self.price.winston_for_bytes(bytes as u64).await?;
        let mut draft = TransactionDraft::new(data, tags).with_reward(reward);
        let mut tip = Winston::ZERO;
        if let Some(holder) = recipient {
            tip = self.tip.community_tip(reward).await?;
            draft = draft.with_transfer(holder.address, tip);
        }

        let anchor = self.client.tx_anchor().await?;
        let transaction = draft.with_anchor(anchor).sign_async(self.signer).await?;
        let tx_id = transaction.id();

        let progress = ProgressReporter::new(self.progress.clone(), self.progress_interval);
        ChunkUploader::new(transaction, self.client.clone(), self.policy.clone())
            .with_progress(progress)
            .upload()
            .await?;

        info!(%tx_id, bytes, %reward, %tip, "transaction submitted");
        Ok(Submission {
            tx_id,
            bytes,
            reward,
            tip,
        })
    }

    /// Send a file's content with a tip. Records the cipher on `entity`
    /// for private drives; the status is left to the caller.
    pub async fn submit_file_data(&self, entity: &mut Entity) -> Result<TxId> {
        let data = self.payloads.file_data(entity).await?;
        let recipient = self.tip_recipient().await?;
        let tags = self.tags.build(EntityTags::FileData {
            entity: &*entity,
            tip: recipient.is_some(),
        });
        Ok(self.submit(data, tags, recipient).await?.tx_id)
    }

    /// Send a file's or folder's metadata pointing at its current data
    /// transaction.
    pub async fn submit_metadata(&self, entity: &mut Entity) -> Result<TxId> {
        let data_tx_id = entity.data_tx_id;
        let data = self.payloads.entity_metadata(entity, data_tx_id)?;
        let tags = self.tags.build(EntityTags::Metadata(&*entity));
        Ok(self.submit(data, tags, None).await?.tx_id)
    }

    pub async fn submit_drive(&self, drive: &mut Drive) -> Result<TxId> {
        let data = self.payloads.drive_metadata(drive)?;
        let tags = self.tags.build(EntityTags::Drive(&*drive));
        Ok(self.submit(data, tags, None).await?.tx_id)
    }

    /// One-time setup of drives that have content on the ledger but no
    /// drive transaction yet: the drive metadata goes first, then the root
    /// folder's. Returns the number of transactions sent.
    pub async fn bootstrap_drives<S: SyncStore + ?Sized>(
        &self,
        store: &S,
        login: &str,
    ) -> Result<usize> {
        let mut sent = 0;
        for mut drive in store.drives_of(login)? {
            if drive.metadata_sync_status == SyncStatus::NeedsUpload
                && store.drive_has_submissions(drive.drive_id)?
            {
                let tx_id = self.submit_drive(&mut drive).await?;
                drive.mark_submitted(tx_id, Utc::now());
                store.put_drive(&drive)?;
                info!(drive = %drive.name, %tx_id, "drive metadata submitted");
                sent += 1;
            }
            if drive.metadata_sync_status == SyncStatus::NeedsUpload {
                continue;
            }

            let key = EntityKey {
                drive_id: drive.drive_id,
                entity_id: drive.root_folder_id,
            };
            let mut root = store.entity(&key)?.unwrap_or_else(|| drive.root_folder());
            if root.needs_metadata_upload() {
                let tx_id = self.submit_metadata(&mut root).await?;
                root.mark_metadata_submitted(tx_id, Utc::now());
                store.put_entity(&root)?;
                info!(drive = %drive.name, %tx_id, "root folder submitted");
                sent += 1;
            }
        }
        Ok(sent)
    }
}

// =============================================================================
// Reporting
// =============================================================================

/// An entity whose transaction could not be submitted. It stays queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    pub key: EntityKey,
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one upload pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Top-level transactions sent, bundles included.
    pub transactions: Vec<TxId>,
    pub bundles: usize,
    /// Entities whose pending transactions were all submitted.
    pub entities: usize,
    /// Queue entries dropped because their local file vanished.
    pub purged: usize,
    /// Drive and root-folder transactions sent by the drive bootstrap.
    pub bootstrapped: usize,
    pub failures: Vec<EntityFailure>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn fail(&mut self, entity: &Entity, error: &SyncError) {
        warn!(path = %entity.path.display(), error = %error, "upload failed, entity stays queued");
        self.failures.push(EntityFailure {
            key: entity.key(),
            path: entity.path.clone(),
            error: error.to_string(),
        });
    }

    /// Drop a queue entry whose file disappeared before it could be read.
    pub(crate) fn purge<S: SyncStore + ?Sized>(&mut self, store: &S, entity: &Entity) -> Result<()> {
        info!(path = %entity.path.display(), "removing vanished entity from upload queue");
        store.delete_entity(&entity.key())?;
        self.purged += 1;
        Ok(())
    }
}
