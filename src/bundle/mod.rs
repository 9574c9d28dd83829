//! Packing pending entities into bundle transactions.
//!
//! Every pending entity becomes one or two signed data items (file data,
//! then metadata). Items are packed in queue order into bundles capped by
//! size and item count, and each bundle is sent as a single transaction.
//! Member entities are only marked submitted once their bundle's upload
//! completes, so a failed bundle leaves its members queued.

pub mod packing;

pub use packing::{plan_bundles, Admission, BundleAccumulator, BundleLimits};

use crate::error::{Result, SyncError};
use crate::ledger::data_item::{bundle_len, bundled_len, encode_bundle};
use crate::ledger::{DataItem, EntityTags, TxId};
use crate::model::{Bundle, BundleStatus, Entity};
use crate::store::{StoreQueries, SyncStore};
use crate::upload::{Submitter, UploadReport};
use chrono::Utc;
use tracing::{debug, error, info};

/// One entity's signed items.
struct PackedEntity {
    entity: Entity,
    data_item: Option<TxId>,
    metadata_item: TxId,
    items: Vec<DataItem>,
    bytes: u64,
}

pub struct BundleBuilder<'a, S: SyncStore + ?Sized> {
    store: &'a S,
    submitter: &'a Submitter<'a>,
    limits: BundleLimits,
}

impl<'a, S: SyncStore + ?Sized> BundleBuilder<'a, S> {
    pub fn new(store: &'a S, submitter: &'a Submitter<'a>, limits: BundleLimits) -> Self {
        Self {
            store,
            submitter,
            limits,
        }
    }

    /// Bundle and send the whole pending queue of `login`, then bootstrap
    /// drives that just received their first content.
    pub async fn run(&self, login: &str) -> Result<UploadReport> {
        let mut report = UploadReport::default();
        let mut queue = self.store.pending_entities(login)?.into_iter();
        let mut open = BundleAccumulator::new(self.limits);
        let mut carry: Option<PackedEntity> = None;

        loop {
            let packed = match carry.take() {
                Some(packed) => packed,
                None => {
                    let Some(entity) = queue.next() else {
                        break;
                    };
                    match self.pack(entity.clone()).await {
                        Ok(packed) => packed,
                        Err(SyncError::StaleEntity { .. }) => {
                            report.purge(self.store, &entity)?;
                            continue;
                        }
                        Err(e) => {
                            report.fail(&entity, &e);
                            continue;
                        }
                    }
                }
            };

            match open.admission(packed.bytes, packed.items.len()) {
                Admission::Accepted => {
                    let (bytes, items) = (packed.bytes, packed.items.len());
                    open.push(packed, bytes, items);
                }
                Admission::Full => {
                    debug!(
                        bytes = open.bytes(),
                        items = open.items(),
                        "bundle full, starting the next one"
                    );
                    self.send(login, open.take(), &mut report).await?;
                    carry = Some(packed);
                }
                Admission::Solitary => {
                    if !open.is_empty() {
                        self.send(login, open.take(), &mut report).await?;
                    }
                    info!(
                        path = %packed.entity.path.display(),
                        bytes = packed.bytes,
                        "sending large file in its own bundle"
                    );
                    self.send(login, vec![packed], &mut report).await?;
                }
            }
        }
        if !open.is_empty() {
            self.send(login, open.take(), &mut report).await?;
        }

        match self.submitter.bootstrap_drives(self.store, login).await {
            Ok(sent) => report.bootstrapped += sent,
            Err(e) => error!(login, error = %e, "drive bootstrap failed"),
        }
        Ok(report)
    }

    async fn pack(&self, mut entity: Entity) -> Result<PackedEntity> {
        let signer = self.submitter.signer();
        let tags = self.submitter.tags();
        let payloads = self.submitter.payloads();
        let mut items = Vec::with_capacity(2);

        let mut data_item = None;
        if entity.needs_data_upload() {
            let data = payloads.file_data(&mut entity).await?;
            let item_tags = tags.build(EntityTags::FileData {
                entity: &entity,
                tip: false,
            });
            let item = DataItem::sign_async(signer, data, item_tags).await?;
            data_item = Some(item.id);
            items.push(item);
        }

        let data_tx_id = data_item.or(entity.data_tx_id);
        let metadata = payloads.entity_metadata(&mut entity, data_tx_id)?;
        let item = DataItem::sign(signer, metadata, tags.build(EntityTags::Metadata(&entity)))?;
        let metadata_item = item.id;
        items.push(item);

        let bytes: u64 = items
            .iter()
            .map(|item| bundled_len(item) as u64)
            .sum();
        Ok(PackedEntity {
            entity,
            data_item,
            metadata_item,
            items,
            bytes,
        })
    }

    /// Upload one bundle. A failed upload is recorded against every member
    /// and does not stop the pass; only store errors propagate.
    async fn send(
        &self,
        login: &str,
        members: Vec<PackedEntity>,
        report: &mut UploadReport,
    ) -> Result<()> {
        let mut items = Vec::new();
        let mut entities = Vec::with_capacity(members.len());
        for member in members {
            items.extend(member.items);
            entities.push((member.entity, member.data_item, member.metadata_item));
        }
        let byte_size = bundle_len(&items) as u64;
        info!(
            items = items.len(),
            entities = entities.len(),
            bytes = byte_size,
            "submitting bundle"
        );

        let submission = match self.submit(&items).await {
            Ok(submission) => submission,
            Err(e) => {
                error!(error = %e, "bundle upload failed");
                for (entity, _, _) in &entities {
                    report.fail(entity, &e);
                }
                return Ok(());
            }
        };

        let now = Utc::now();
        let mut members = Vec::with_capacity(entities.len());
        for (mut entity, data_item, metadata_item) in entities {
            if let Some(id) = data_item {
                entity.mark_data_submitted(id, now);
                entity.data_bundle_tx_id = Some(submission);
            }
            entity.mark_metadata_submitted(metadata_item, now);
            entity.metadata_bundle_tx_id = Some(submission);
            self.store.put_entity(&entity)?;
            members.push(entity.key());
        }
        report.entities += members.len();

        self.store.put_bundle(&Bundle {
            tx_id: submission,
            login: login.to_string(),
            members,
            byte_size,
            submitted_at: now,
            status: BundleStatus::Submitted,
        })?;
        report.transactions.push(submission);
        report.bundles += 1;
        Ok(())
    }

    async fn submit(&self, items: &[DataItem]) -> Result<TxId> {
        let body = encode_bundle(items);
        let recipient = self.submitter.tip_recipient().await?;
        let tags = self.submitter.tags().build(EntityTags::Bundle {
            tip: recipient.is_some(),
        });
        Ok(self.submitter.submit(body, tags, recipient).await?.tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::ledger::client::testing::MemoryLedger;
    use crate::ledger::client::RequestError;
    use crate::ledger::data_item::decode_bundle;
    use crate::ledger::testing::TestSigner;
    use crate::model::{Drive, Privacy, SyncStatus};
    use crate::price::testing::LinearPrice;
    use crate::price::CommunityTip;
    use crate::store::MemoryStore;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: MemoryStore,
        drive: Drive,
        ledger: Arc<MemoryLedger>,
        signer: TestSigner,
        tip: CommunityTip,
        config: SyncConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = MemoryStore::new();
            let drive = Drive::new("alice", "Docs", Privacy::Public, dir.path().to_path_buf());
            store.put_drive(&drive).unwrap();
            store.put_entity(&drive.root_folder()).unwrap();
            let mut config = SyncConfig::default();
            config.upload.retry_delay_ms = 1;
            Self {
                _dir: dir,
                store,
                drive,
                ledger: Arc::new(MemoryLedger::new()),
                signer: TestSigner::new(),
                tip: CommunityTip::default(),
                config,
            }
        }

        fn add_file(&self, name: &str, contents: &[u8]) -> Entity {
            let path = self.drive.root_path.join(name);
            std::fs::write(&path, contents).unwrap();
            let mut file = Entity::new_file(&self.drive, self.drive.root_folder_id, path, name.into());
            file.size = contents.len() as u64;
            file.content_hash = name.to_string();
            self.store.put_entity(&file).unwrap();
            file
        }

        fn add_folder(&self, name: &str) -> Entity {
            let path = self.drive.root_path.join(name);
            std::fs::create_dir_all(&path).unwrap();
            let folder = Entity::new_folder(&self.drive, Some(self.drive.root_folder_id), path, name.into());
            self.store.put_entity(&folder).unwrap();
            folder
        }

        fn submitter(&self) -> Submitter<'_> {
            Submitter::new(self.ledger.clone(), &self.signer, &LinearPrice, &self.tip, &self.config)
        }

        async fn run(&self, limits: BundleLimits) -> UploadReport {
            let submitter = self.submitter();
            BundleBuilder::new(&self.store, &submitter, limits)
                .run("alice")
                .await
                .unwrap()
        }
    }

    fn stored(store: &MemoryStore, entity: &Entity) -> Entity {
        store.entity(&entity.key()).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_single_bundle_marks_members_submitted() {
        let fx = Fixture::new();
        let a = fx.add_file("a.txt", b"alpha");
        let b = fx.add_file("b.txt", b"bravo");
        let folder = fx.add_folder("photos");

        let report = fx.run(BundleLimits::from(&fx.config.bundle)).await;
        assert!(report.is_success());
        assert_eq!(report.bundles, 1);
        assert_eq!(report.entities, 3);

        let bundle_id = report.transactions[0];
        let items = decode_bundle(fx.ledger.body(&bundle_id).unwrap()).unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(&items[0].data[..], b"alpha");

        for entity in [&a, &b, &folder] {
            let e = stored(&fx.store, entity);
            assert_eq!(e.metadata_bundle_tx_id, Some(bundle_id));
            assert_eq!(e.metadata_sync_status, SyncStatus::Submitted);
            assert!(e.uploaded_at.is_some());
        }
        let a = stored(&fx.store, &a);
        assert_eq!(a.data_tx_id, Some(items[0].id));
        assert_eq!(a.data_bundle_tx_id, Some(bundle_id));
        assert_eq!(a.metadata_tx_id, Some(items[1].id));
        assert!(stored(&fx.store, &folder).data_bundle_tx_id.is_none());

        let record = fx.store.bundle(&bundle_id).unwrap().unwrap();
        assert_eq!(record.members.len(), 3);
        assert_eq!(record.status, BundleStatus::Submitted);

        // Bundle, then drive and root folder from the bootstrap
        assert_eq!(report.bootstrapped, 2);
        assert_eq!(fx.ledger.posted().len(), 3);
        let drive = fx.store.drive(&fx.drive.drive_id).unwrap().unwrap();
        assert_eq!(drive.metadata_sync_status, SyncStatus::Submitted);
    }

    #[tokio::test]
    async fn test_item_cap_carries_entity_to_next_bundle() {
        let fx = Fixture::new();
        fx.add_file("a.txt", b"one");
        fx.add_file("b.txt", b"two");
        fx.add_file("c.txt", b"three");

        let limits = BundleLimits {
            max_bytes: u64::MAX,
            max_items: 4,
        };
        let report = fx.run(limits).await;
        assert_eq!(report.bundles, 2);
        assert_eq!(report.entities, 3);

        let sizes: Vec<usize> = report
            .transactions
            .iter()
            .map(|id| decode_bundle(fx.ledger.body(id).unwrap()).unwrap().len())
            .collect();
        assert_eq!(sizes, vec![4, 2]);
        assert!(fx.store.pending_entities("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_file_goes_alone() {
        let fx = Fixture::new();
        fx.add_file("a.txt", b"small");
        let big = fx.add_file("big.bin", &vec![9u8; 4096]);
        fx.add_file("c.txt", b"small");

        let limits = BundleLimits {
            max_bytes: 2048,
            max_items: 500,
        };
        let report = fx.run(limits).await;
        assert_eq!(report.bundles, 3);

        let solitary = decode_bundle(fx.ledger.body(&report.transactions[1]).unwrap()).unwrap();
        assert_eq!(solitary.len(), 2);
        assert_eq!(stored(&fx.store, &big).data_bundle_tx_id, Some(report.transactions[1]));
    }

    async fn two_file_bodies(max_bytes: u64) -> Vec<usize> {
        let fx = Fixture::new();
        fx.add_file("a.txt", b"alpha");
        fx.add_file("b.txt", b"bravo");
        let report = fx
            .run(BundleLimits {
                max_bytes,
                max_items: 500,
            })
            .await;
        assert!(report.is_success());
        report
            .transactions
            .iter()
            .map(|id| fx.ledger.body(id).unwrap().len())
            .collect()
    }

    #[tokio::test]
    async fn test_bundle_never_exceeds_byte_cap() {
        let full = two_file_bodies(u64::MAX).await;
        assert_eq!(full.len(), 1);
        let size = full[0] as u64;

        // The cap equals the encoded bundle, header word included
        assert_eq!(two_file_bodies(size).await, full);

        let split = two_file_bodies(size - 1).await;
        assert_eq!(split.len(), 2);
        assert!(split.iter().all(|&len| len as u64 <= size - 1));
    }

    #[tokio::test]
    async fn test_failed_bundle_leaves_members_queued() {
        let fx = Fixture::new();
        let a = fx.add_file("a.txt", b"alpha");
        fx.ledger.fail_headers([RequestError::Structured {
            status: 400,
            code: "invalid_json".into(),
        }]);

        let report = fx.run(BundleLimits::from(&fx.config.bundle)).await;
        assert!(!report.is_success());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.bundles, 0);
        assert_eq!(report.bootstrapped, 0);

        let a = stored(&fx.store, &a);
        assert!(a.needs_data_upload());
        assert!(a.data_bundle_tx_id.is_none());
        assert!(a.metadata_bundle_tx_id.is_none());
        assert!(fx.store.bundles().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vanished_file_is_purged() {
        let fx = Fixture::new();
        let a = fx.add_file("a.txt", b"alpha");
        std::fs::remove_file(Path::new(&a.path)).unwrap();

        let report = fx.run(BundleLimits::from(&fx.config.bundle)).await;
        assert_eq!(report.purged, 1);
        assert_eq!(report.bundles, 0);
        assert!(fx.store.entity(&a.key()).unwrap().is_none());
    }
}
