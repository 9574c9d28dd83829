//! Confirmation polling.
//!
//! Every submitted transaction is checked against the gateway. It is
//! confirmed once it has enough confirmations, stays submitted while it is
//! younger than the confirmation window, and goes back to the upload queue
//! with its id cleared once the window has passed.

use crate::config::ConfirmationConfig;
use crate::error::{Result, SyncError};
use crate::ledger::client::LedgerClient;
use crate::ledger::TxId;
use crate::model::{Bundle, Drive, Entity, SyncStatus};
use crate::store::{StoreQueries, SyncStore};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub min_confirmations: u64,
    pub window: Duration,
}

impl From<&ConfirmationConfig> for ConfirmationPolicy {
    fn from(config: &ConfirmationConfig) -> Self {
        Self {
            min_confirmations: config.min_confirmations,
            window: config.window(),
        }
    }
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self::from(&ConfirmationConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirmed,
    Pending { confirmations: u64 },
    /// The window elapsed; the transaction must be sent again.
    Requeued,
}

/// Next state of a submitted transaction. A missing submission time counts
/// as expired.
pub fn decide(
    policy: &ConfirmationPolicy,
    confirmations: u64,
    submitted_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Transition {
    if confirmations >= policy.min_confirmations {
        return Transition::Confirmed;
    }
    match submitted_at {
        Some(at) if now.signed_duration_since(at) <= policy.window => {
            Transition::Pending { confirmations }
        }
        _ => Transition::Requeued,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub confirmed: usize,
    pub pending: usize,
    pub requeued: usize,
    /// Status requests that failed; those transactions are retried next poll.
    pub errors: usize,
}

pub struct SyncStatusTracker<'a, S: SyncStore + ?Sized> {
    store: &'a S,
    client: &'a dyn LedgerClient,
    policy: ConfirmationPolicy,
    gateway_url: String,
}

impl<'a, S: SyncStore + ?Sized> SyncStatusTracker<'a, S> {
    pub fn new(
        store: &'a S,
        client: &'a dyn LedgerClient,
        policy: ConfirmationPolicy,
        gateway_url: &str,
    ) -> Self {
        let mut gateway_url = gateway_url.to_string();
        if !gateway_url.ends_with('/') {
            gateway_url.push('/');
        }
        Self {
            store,
            client,
            policy,
            gateway_url,
        }
    }

    pub fn permaweb_link(&self, tx_id: &TxId) -> String {
        format!("{}{}", self.gateway_url, tx_id)
    }

    /// One polling pass over everything `login` has in flight.
    pub async fn poll(&self, login: &str, now: DateTime<Utc>) -> Result<StatusReport> {
        let mut report = StatusReport::default();

        for bundle in self.store.submitted_bundles(login)? {
            let submitted_at = Some(bundle.submitted_at);
            let checked = self.check(&bundle.tx_id, submitted_at, now, &mut report).await;
            if let Some(transition) = checked {
                self.settle_bundle(&bundle, transition)?;
            }
        }

        for mut entity in self.store.submitted_entities(login)? {
            let mut changed = false;

            if entity.data_awaits_direct_check() {
                if let Some(tx_id) = entity.data_tx_id {
                    let checked = self.check(&tx_id, entity.uploaded_at, now, &mut report).await;
                    if let Some(transition) = checked {
                        changed |= self.settle_data(&mut entity, tx_id, transition);
                    }
                }
            }
            if entity.metadata_awaits_direct_check() {
                if let Some(tx_id) = entity.metadata_tx_id {
                    let checked = self.check(&tx_id, entity.uploaded_at, now, &mut report).await;
                    if let Some(transition) = checked {
                        changed |= settle_metadata(&mut entity, transition);
                    }
                }
            }

            if changed {
                self.store.put_entity(&entity)?;
            }
        }

        for mut drive in self.store.drives_of(login)? {
            if drive.metadata_sync_status != SyncStatus::Submitted {
                continue;
            }
            let Some(tx_id) = drive.metadata_tx_id else {
                continue;
            };
            let checked = self.check(&tx_id, drive.uploaded_at, now, &mut report).await;
            if let Some(transition) = checked {
                if settle_drive(&mut drive, transition) {
                    self.store.put_drive(&drive)?;
                }
            }
        }

        info!(
            login,
            confirmed = report.confirmed,
            pending = report.pending,
            requeued = report.requeued,
            errors = report.errors,
            "status poll complete"
        );
        Ok(report)
    }

    /// Query one transaction and count the outcome. `None` when the gateway
    /// could not be asked.
    async fn check(
        &self,
        tx_id: &TxId,
        submitted_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        report: &mut StatusReport,
    ) -> Option<Transition> {
        let status = match self.client.transaction_status(tx_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!(%tx_id, error = %e, "status request failed");
                report.errors += 1;
                return None;
            }
        };

        let transition = decide(&self.policy, status.confirmations(), submitted_at, now);
        match transition {
            Transition::Confirmed => {
                info!(%tx_id, confirmations = status.confirmations(), "transaction confirmed");
                report.confirmed += 1;
            }
            Transition::Pending { confirmations } => {
                debug!(%tx_id, confirmations, ?status, "transaction still pending");
                report.pending += 1;
            }
            Transition::Requeued => {
                let timeout = SyncError::ConfirmationTimeout {
                    tx_id: *tx_id,
                    minutes: self.policy.window.num_minutes(),
                };
                warn!(error = %timeout, "requeueing for upload");
                report.requeued += 1;
            }
        }
        Some(transition)
    }

    /// Fan a bundle's outcome out to its members and drop the record once it
    /// is settled.
    fn settle_bundle(&self, bundle: &Bundle, transition: Transition) -> Result<()> {
        if let Transition::Pending { .. } = transition {
            return Ok(());
        }

        for key in &bundle.members {
            let Some(mut entity) = self.store.entity(key)? else {
                continue;
            };
            // A rescan may have replaced either item since the bundle went out
            let carries_data = entity.data_bundle_tx_id == Some(bundle.tx_id)
                && entity.data_sync_status == Some(SyncStatus::Submitted);
            let carries_metadata = entity.metadata_bundle_tx_id == Some(bundle.tx_id)
                && entity.metadata_sync_status == SyncStatus::Submitted;

            let mut changed = false;
            if carries_data {
                if let Some(tx_id) = entity.data_tx_id {
                    changed |= self.settle_data(&mut entity, tx_id, transition);
                }
            }
            if carries_metadata && entity.metadata_bundle_tx_id == Some(bundle.tx_id) {
                changed |= settle_metadata(&mut entity, transition);
            }
            if changed {
                self.store.put_entity(&entity)?;
            }
        }

        self.store.delete_bundle(&bundle.tx_id)?;
        debug!(tx_id = %bundle.tx_id, members = bundle.members.len(), ?transition, "bundle settled");
        Ok(())
    }

    fn settle_data(&self, entity: &mut Entity, tx_id: TxId, transition: Transition) -> bool {
        match transition {
            Transition::Confirmed => {
                entity.data_sync_status = Some(SyncStatus::Confirmed);
                entity.permaweb_link = Some(self.permaweb_link(&tx_id));
                true
            }
            Transition::Pending { .. } => false,
            Transition::Requeued => {
                // The metadata names the data transaction, so it goes too
                entity.requeue_data();
                entity.requeue_metadata();
                true
            }
        }
    }
}

fn settle_metadata(entity: &mut Entity, transition: Transition) -> bool {
    match transition {
        Transition::Confirmed => {
            entity.metadata_sync_status = SyncStatus::Confirmed;
            true
        }
        Transition::Pending { .. } => false,
        Transition::Requeued => {
            entity.requeue_metadata();
            true
        }
    }
}

fn settle_drive(drive: &mut Drive, transition: Transition) -> bool {
    match transition {
        Transition::Confirmed => {
            drive.metadata_sync_status = SyncStatus::Confirmed;
            true
        }
        Transition::Pending { .. } => false,
        Transition::Requeued => {
            drive.requeue();
            true
        }
    }
}
