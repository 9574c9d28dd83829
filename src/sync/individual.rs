//! Upload without bundling: one transaction per pending payload.
//!
//! A file with new content gets a tipped data transaction and then a
//! metadata transaction naming it. Folders and files whose content is
//! already on the ledger only get the metadata transaction. Each status is
//! persisted as soon as its transaction is accepted, so an interrupted pass
//! resumes with whatever is still missing.

use crate::error::{Result, SyncError};
use crate::model::Entity;
use crate::store::{StoreQueries, SyncStore};
use crate::upload::{Submitter, UploadReport};
use chrono::Utc;
use tracing::error;

pub async fn upload_individually<S: SyncStore + ?Sized>(
    store: &S,
    submitter: &Submitter<'_>,
    login: &str,
) -> Result<UploadReport> {
    let mut report = UploadReport::default();

    for mut entity in store.pending_entities(login)? {
        match upload_entity(store, submitter, &mut entity, &mut report).await {
            Ok(()) => report.entities += 1,
            Err(SyncError::StaleEntity { .. }) => report.purge(store, &entity)?,
            Err(e) => report.fail(&entity, &e),
        }
    }

    match submitter.bootstrap_drives(store, login).await {
        Ok(sent) => report.bootstrapped += sent,
        Err(e) => error!(login, error = %e, "drive bootstrap failed"),
    }
    Ok(report)
}

async fn upload_entity<S: SyncStore + ?Sized>(
    store: &S,
    submitter: &Submitter<'_>,
    entity: &mut Entity,
    report: &mut UploadReport,
) -> Result<()> {
    if entity.needs_data_upload() {
        let tx_id = submitter.submit_file_data(entity).await?;
        entity.mark_data_submitted(tx_id, Utc::now());
        store.put_entity(entity)?;
        report.transactions.push(tx_id);
    }
    if entity.needs_metadata_upload() {
        let tx_id = submitter.submit_metadata(entity).await?;
        entity.mark_metadata_submitted(tx_id, Utc::now());
        store.put_entity(entity)?;
        report.transactions.push(tx_id);
    }
    Ok(())
}
