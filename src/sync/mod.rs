//! The sync loop: scan, estimate, upload, poll.
//!
//! `SyncEngine` ties the store, the gateway and the configuration together.
//! Capabilities only needed for uploading (signer, price and tip oracles,
//! key material) are passed per call so read-only commands never need a
//! wallet.

pub mod individual;

use crate::bundle::{BundleBuilder, BundleLimits};
use crate::config::SyncConfig;
use crate::crypto::Vault;
use crate::error::{Result, SyncError};
use crate::ledger::client::LedgerClient;
use crate::ledger::Signer;
use crate::model::{Drive, Privacy};
use crate::price::{purge_stale, BatchEstimate, FiatOracle, PriceEstimator, PriceOracle, TipOracle};
use crate::scanner::{EntityScanner, ScanSummary};
use crate::store::{StoreQueries, SyncStore};
use crate::tracker::{ConfirmationPolicy, StatusReport, SyncStatusTracker};
use crate::upload::{ProgressCallback, Submitter, UploadReport};
use chrono::{DateTime, Utc};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// What an upload pass needs besides the store and the gateway.
#[derive(Clone)]
pub struct UploadCapabilities<'a> {
    pub signer: &'a dyn Signer,
    pub price: &'a dyn PriceOracle,
    pub tip: &'a dyn TipOracle,
    /// Required as soon as a private drive has pending entities.
    pub vault: Option<Vault<'a>>,
    pub progress: Option<ProgressCallback>,
}

pub struct SyncEngine<S: SyncStore> {
    config: SyncConfig,
    store: S,
    client: Arc<dyn LedgerClient>,
}

impl<S: SyncStore> SyncEngine<S> {
    pub fn new(config: SyncConfig, store: S, client: Arc<dyn LedgerClient>) -> Self {
        Self {
            config,
            store,
            client,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a drive rooted at an existing local folder. Nothing is sent
    /// until the drive's first content is uploaded.
    pub fn create_drive(
        &self,
        login: &str,
        name: &str,
        privacy: Privacy,
        root_path: PathBuf,
    ) -> Result<Drive> {
        if !root_path.is_dir() {
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", root_path.display()),
            )));
        }
        let drive = Drive::new(login, name, privacy, root_path);
        self.store.put_drive(&drive)?;
        self.store.put_entity(&drive.root_folder())?;
        info!(drive = %drive.drive_id, name, privacy = privacy.as_str(), "drive created");
        Ok(drive)
    }

    pub fn drive(&self, drive_id: Uuid) -> Result<Drive> {
        self.store
            .drive(&drive_id)?
            .ok_or(SyncError::UnknownDrive(drive_id))
    }

    pub fn drives(&self, login: Option<&str>) -> Result<Vec<Drive>> {
        match login {
            Some(login) => self.store.drives_of(login),
            None => self.store.drives(),
        }
    }

    pub async fn scan_drive(&self, drive_id: Uuid) -> Result<ScanSummary> {
        let drive = self.drive(drive_id)?;
        EntityScanner::new(&self.store, &self.config.scan)
            .scan_drive(&drive)
            .await
    }

    /// Scan every drive of `login`.
    pub async fn scan_all(&self, login: &str) -> Result<ScanSummary> {
        let scanner = EntityScanner::new(&self.store, &self.config.scan);
        let mut total = ScanSummary::default();
        for drive in self.store.drives_of(login)? {
            let summary = scanner.scan_drive(&drive).await?;
            total.unchanged += summary.unchanged;
            total.new_versions += summary.new_versions;
            total.renamed += summary.renamed;
            total.moved += summary.moved;
            total.new += summary.new;
            total.skipped += summary.skipped;
            total.failed += summary.failed;
        }
        Ok(total)
    }

    pub async fn estimate(
        &self,
        login: &str,
        price: &dyn PriceOracle,
        tip: &dyn TipOracle,
        fiat: Option<&dyn FiatOracle>,
    ) -> Result<BatchEstimate> {
        let mut estimator = PriceEstimator::new(price, tip, &self.config.price);
        if let Some(fiat) = fiat {
            estimator = estimator.with_fiat(fiat);
        }
        estimator.estimate_batch(&self.store, login).await
    }

    /// Send everything `login` has queued, bundled or one transaction per
    /// payload depending on configuration. Per-entity failures are collected
    /// in the report; only store errors abort the pass.
    pub async fn upload_pending(
        &self,
        login: &str,
        capabilities: UploadCapabilities<'_>,
    ) -> Result<UploadReport> {
        let purged = purge_stale(&self.store, login)?;

        let mut submitter = Submitter::new(
            self.client.clone(),
            capabilities.signer,
            capabilities.price,
            capabilities.tip,
            &self.config,
        );
        if let Some(vault) = capabilities.vault {
            submitter = submitter.with_vault(vault);
        }
        if let Some(progress) = capabilities.progress {
            submitter = submitter.with_progress(progress);
        }

        let mut report = if self.config.bundle.enabled {
            let limits = BundleLimits::from(&self.config.bundle);
            BundleBuilder::new(&self.store, &submitter, limits)
                .run(login)
                .await?
        } else {
            individual::upload_individually(&self.store, &submitter, login).await?
        };
        report.purged += purged;

        info!(
            login,
            transactions = report.transactions.len(),
            bundles = report.bundles,
            entities = report.entities,
            purged = report.purged,
            failed = report.failures.len(),
            "upload pass complete"
        );
        Ok(report)
    }

    /// One confirmation-polling pass.
    pub async fn check_status(&self, login: &str, now: DateTime<Utc>) -> Result<StatusReport> {
        SyncStatusTracker::new(
            &self.store,
            self.client.as_ref(),
            ConfirmationPolicy::from(&self.config.confirmation),
            &self.config.gateway_url,
        )
        .poll(login, now)
        .await
    }
}
