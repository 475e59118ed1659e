//! Persists a confirmed preview.
//!
//! The parent (event or campaign) is written first so its id can be stamped
//! on every dependent. Subscription batches have no parent: subscribers are
//! written one by one and their payments, unlocks and inventory sales are
//! joined to them by exact name.
//!
//! The store offers no transactions. When a dependent or upload-entry insert
//! fails after the parent exists, the pipeline deletes what it wrote (if
//! `compensate_on_failure` is set). Anything it cannot undo is recorded as a
//! `partially_processed` upload and reported through
//! [`IntakeError::PartialCommit`]. When the upload entry itself cannot be
//! written, [`IntakeError::UnrecordedCommit`] names what was left behind.
//!
//! Committing is not reentrant and does not deduplicate: the same preview
//! committed twice is written twice.

use crate::builder::{DraftRecord, ParentRecord, RecordKind, StagedRecord};
use crate::config::IntakeConfig;
use crate::error::{IntakeError, Result};
use crate::preview::ImportPreview;
use crate::schema::*;
use crate::store::{fetch, tables, to_row, Query, Store, StoreRow};
use chrono::Utc;
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub const EVENT_UPLOAD_PREFIX: &str = "EVENTO";
pub const CAMPAIGN_UPLOAD_PREFIX: &str = "CAMPANA";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CommitReport {
    pub upload_id: RecordId,
    pub parent_id: Option<RecordId>,
    pub inserted: BTreeMap<RecordKind, usize>,
    #[schemars(description = "Dependents skipped because their subscriber name matched no single new subscriber")]
    pub unmatched: BTreeMap<RecordKind, usize>,
    pub status: UploadStatus,
}

impl CommitReport {
    pub fn inserted(&self, kind: RecordKind) -> usize {
        self.inserted.get(&kind).copied().unwrap_or(0)
    }

    pub fn unmatched(&self, kind: RecordKind) -> usize {
        self.unmatched.get(&kind).copied().unwrap_or(0)
    }

    pub fn records_processed(&self) -> usize {
        self.inserted.values().sum()
    }
}

/// Where a parent document lives and which tables hang off it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParentTarget {
    pub table: &'static str,
    pub foreign_key: &'static str,
    pub upload_prefix: &'static str,
    pub dependents: &'static [RecordKind],
}

pub(crate) const EVENT_TARGET: ParentTarget = ParentTarget {
    table: tables::EVENTS,
    foreign_key: "event_id",
    upload_prefix: EVENT_UPLOAD_PREFIX,
    dependents: &[RecordKind::Sale, RecordKind::Expense],
};

pub(crate) const CAMPAIGN_TARGET: ParentTarget = ParentTarget {
    table: tables::CAMPAIGNS,
    foreign_key: "campaign_id",
    upload_prefix: CAMPAIGN_UPLOAD_PREFIX,
    dependents: &[RecordKind::Lead, RecordKind::OnlineSale],
};

pub(crate) fn parent_target(document_type: DocumentType) -> Option<ParentTarget> {
    match document_type {
        DocumentType::Event => Some(EVENT_TARGET),
        DocumentType::Campaign => Some(CAMPAIGN_TARGET),
        DocumentType::SubscriptionBatch => None,
    }
}

#[derive(Debug, Default)]
struct Tally {
    inserted: BTreeMap<RecordKind, usize>,
    unmatched: BTreeMap<RecordKind, usize>,
}

impl Tally {
    fn add_inserted(&mut self, kind: RecordKind, count: usize) {
        *self.inserted.entry(kind).or_insert(0) += count;
    }

    fn add_unmatched(&mut self, kind: RecordKind) {
        *self.unmatched.entry(kind).or_insert(0) += 1;
    }

    fn total(&self) -> usize {
        self.inserted.values().sum()
    }
}

pub async fn commit_preview<S>(
    store: &S,
    preview: &ImportPreview,
    config: &IntakeConfig,
) -> Result<CommitReport>
where
    S: Store + ?Sized,
{
    info!(
        "Committing {:?} preview with {} records",
        preview.document_type, preview.summary.total_records
    );

    let report = match (parent_target(preview.document_type), &preview.parent) {
        (Some(target), Some(parent)) => {
            commit_with_parent(store, preview, parent, target, config).await?
        }
        (Some(_), None) => {
            return Err(IntakeError::Parse(format!(
                "{:?} preview carries no parent record",
                preview.document_type
            )))
        }
        (None, _) => commit_subscription_batch(store, preview, config).await?,
    };

    info!(
        "Upload {} recorded with {} records",
        report.upload_id,
        report.records_processed()
    );
    Ok(report)
}

async fn commit_with_parent<S>(
    store: &S,
    preview: &ImportPreview,
    parent: &ParentRecord,
    target: ParentTarget,
    config: &IntakeConfig,
) -> Result<CommitReport>
where
    S: Store + ?Sized,
{
    let parent_row = match parent {
        ParentRecord::Event(event) => to_row(event)?,
        ParentRecord::Campaign(campaign) => to_row(campaign)?,
    };
    // Fail fast: nothing else is attempted without a parent id.
    let parent_id = store.insert(target.table, parent_row).await?;
    debug!("Inserted {} {}", target.table, parent_id);

    let upload_name = format!("{}_{}", target.upload_prefix, parent.name());
    let mut tally = Tally::default();

    for kind in target.dependents {
        let rows = preview
            .of_kind(*kind)
            .map(|staged| -> Result<StoreRow> {
                let mut row = draft_row(&staged.draft)?;
                row.insert(
                    target.foreign_key.to_string(),
                    Value::String(parent_id.0.clone()),
                );
                Ok(row)
            })
            .collect::<Result<Vec<StoreRow>>>()?;

        if rows.is_empty() {
            continue;
        }

        match store.insert_many(kind.table(), rows).await {
            Ok(ids) => tally.add_inserted(*kind, ids.len()),
            Err(cause) => {
                warn!(
                    "Insert into {} failed after parent {} was written: {}",
                    kind.table(),
                    parent_id,
                    cause
                );
                if roll_back(store, target, &parent_id, config).await {
                    return Err(cause);
                }

                let upload = new_upload(
                    preview,
                    upload_name,
                    Some((target, parent_id.clone())),
                    tally.total(),
                    UploadStatus::PartiallyProcessed,
                )?;
                return Err(record_partial(store, upload, kind.table(), cause).await);
            }
        }
    }

    let upload = new_upload(
        preview,
        upload_name,
        Some((target, parent_id.clone())),
        tally.total(),
        UploadStatus::Processed,
    )?;
    let upload_id = match store.insert(tables::UPLOADED_FILES, to_row(&upload)?).await {
        Ok(id) => id,
        Err(cause) => {
            warn!(
                "Upload entry for {} {} could not be written: {}",
                target.table, parent_id, cause
            );
            if roll_back(store, target, &parent_id, config).await {
                return Err(cause);
            }
            return Err(unrecorded(Some(&parent_id), tally.total(), cause));
        }
    };

    Ok(CommitReport {
        upload_id,
        parent_id: Some(parent_id),
        inserted: tally.inserted,
        unmatched: tally.unmatched,
        status: UploadStatus::Processed,
    })
}

async fn commit_subscription_batch<S>(
    store: &S,
    preview: &ImportPreview,
    config: &IntakeConfig,
) -> Result<CommitReport>
where
    S: Store + ?Sized,
{
    let uploaded_at = Utc::now().naive_utc();
    let upload_name = format!(
        "{}_{}",
        config.subscription_upload_prefix,
        uploaded_at.date().format("%Y-%m-%d")
    );

    let plans = plan_ids_by_name(store).await?;
    let mut tally = Tally::default();
    let mut subscribers_by_name: HashMap<String, Vec<RecordId>> = HashMap::new();

    for staged in preview.of_kind(RecordKind::Subscriber) {
        let DraftRecord::Subscriber(subscriber) = &staged.draft else {
            continue;
        };
        let mut row = to_row(subscriber)?;
        if let Some(plan_id) = subscriber.plan_name.as_ref().and_then(|p| plans.get(p)) {
            row.insert("plan_id".to_string(), Value::String(plan_id.0.clone()));
        } else if let Some(plan) = &subscriber.plan_name {
            debug!("No plan named '{}' for subscriber {}", plan, subscriber.name);
        }

        match store.insert(tables::SUBSCRIBERS, row).await {
            Ok(id) => {
                tally.add_inserted(RecordKind::Subscriber, 1);
                subscribers_by_name
                    .entry(subscriber.name.clone())
                    .or_default()
                    .push(id);
            }
            Err(cause) => {
                return Err(fail_batch(store, preview, upload_name, &tally, tables::SUBSCRIBERS, cause).await)
            }
        }
    }

    for kind in [RecordKind::Payment, RecordKind::Unlock, RecordKind::InventoryItem] {
        let mut rows = Vec::new();
        for staged in preview.of_kind(kind) {
            match resolve_owner(staged, &subscribers_by_name) {
                Some(subscriber_id) => {
                    let mut row = draft_row(&staged.draft)?;
                    row.insert(
                        "subscriber_id".to_string(),
                        Value::String(subscriber_id.0.clone()),
                    );
                    rows.push(row);
                }
                None => {
                    warn!(
                        "Skipping {:?} for subscriber '{}': no single match in this batch",
                        kind,
                        staged.owner.as_deref().unwrap_or_default()
                    );
                    tally.add_unmatched(kind);
                }
            }
        }

        if rows.is_empty() {
            continue;
        }
        match store.insert_many(kind.table(), rows).await {
            Ok(ids) => tally.add_inserted(kind, ids.len()),
            Err(cause) => {
                return Err(fail_batch(store, preview, upload_name, &tally, kind.table(), cause).await)
            }
        }
    }

    let mut upload = new_upload(preview, upload_name, None, tally.total(), UploadStatus::Processed)?;
    upload.uploaded_at = uploaded_at;
    let upload_id = match store.insert(tables::UPLOADED_FILES, to_row(&upload)?).await {
        Ok(id) => id,
        Err(cause) if tally.total() == 0 => return Err(cause),
        Err(cause) => {
            warn!("Upload entry for batch {} could not be written: {}", upload.file_name, cause);
            return Err(unrecorded(None, tally.total(), cause));
        }
    };

    Ok(CommitReport {
        upload_id,
        parent_id: None,
        inserted: tally.inserted,
        unmatched: tally.unmatched,
        status: UploadStatus::Processed,
    })
}

/// A batch failure with nothing written yet is a plain store error.
async fn fail_batch<S>(
    store: &S,
    preview: &ImportPreview,
    upload_name: String,
    tally: &Tally,
    table: &str,
    cause: IntakeError,
) -> IntakeError
where
    S: Store + ?Sized,
{
    if tally.total() == 0 {
        return cause;
    }
    match new_upload(
        preview,
        upload_name,
        None,
        tally.total(),
        UploadStatus::PartiallyProcessed,
    ) {
        Ok(upload) => record_partial(store, upload, table, cause).await,
        Err(e) => e,
    }
}

async fn record_partial<S>(
    store: &S,
    upload: UploadedFile,
    table: &str,
    cause: IntakeError,
) -> IntakeError
where
    S: Store + ?Sized,
{
    let row = match to_row(&upload) {
        Ok(row) => row,
        Err(e) => return e,
    };
    match store.insert(tables::UPLOADED_FILES, row).await {
        Ok(upload_id) => {
            warn!(
                "Upload {} left partially processed ({} records written)",
                upload_id, upload.records_processed
            );
            IntakeError::PartialCommit {
                upload_id: upload_id.0,
                table: table.to_string(),
                message: cause.to_string(),
            }
        }
        Err(e) => {
            warn!("Could not record partial upload after {}: {}", cause, e);
            let parent_id = upload.event_id.as_ref().or(upload.campaign_id.as_ref());
            unrecorded(parent_id, upload.records_processed, cause)
        }
    }
}

fn unrecorded(parent_id: Option<&RecordId>, records: usize, cause: IntakeError) -> IntakeError {
    IntakeError::UnrecordedCommit {
        parent_id: parent_id.map(|id| id.0.clone()),
        records,
        message: cause.to_string(),
    }
}

/// Runs the compensating deletes when enabled. True when everything the
/// commit wrote is gone again.
async fn roll_back<S>(store: &S, target: ParentTarget, parent_id: &RecordId, config: &IntakeConfig) -> bool
where
    S: Store + ?Sized,
{
    if !config.compensate_on_failure {
        return false;
    }
    match compensate(store, target, parent_id).await {
        Ok(()) => {
            warn!("Rolled back parent {} and its dependents", parent_id);
            true
        }
        Err(compensation) => {
            warn!("Compensation for {} failed: {}", parent_id, compensation);
            false
        }
    }
}

async fn compensate<S>(store: &S, target: ParentTarget, parent_id: &RecordId) -> Result<()>
where
    S: Store + ?Sized,
{
    for kind in target.dependents {
        let removed = store
            .delete(
                kind.table(),
                &Query::new().eq(target.foreign_key, parent_id.as_str()),
            )
            .await?;
        debug!("Compensation removed {} rows from {}", removed, kind.table());
    }
    store
        .delete(target.table, &Query::new().eq("id", parent_id.as_str()))
        .await?;
    Ok(())
}

fn resolve_owner<'a>(
    staged: &StagedRecord,
    subscribers_by_name: &'a HashMap<String, Vec<RecordId>>,
) -> Option<&'a RecordId> {
    let owner = staged.owner.as_ref()?;
    match subscribers_by_name.get(owner).map(Vec::as_slice) {
        Some([only]) => Some(only),
        _ => None,
    }
}

async fn plan_ids_by_name<S>(store: &S) -> Result<HashMap<String, RecordId>>
where
    S: Store + ?Sized,
{
    let plans = fetch::<SubscriptionPlan, _>(store, tables::SUBSCRIPTION_PLANS, &Query::new()).await?;
    let mut by_name = HashMap::new();
    for plan in plans {
        by_name.entry(plan.record.name).or_insert(plan.id);
    }
    Ok(by_name)
}

fn draft_row(draft: &DraftRecord) -> Result<StoreRow> {
    match draft {
        DraftRecord::Sale(r) => to_row(r),
        DraftRecord::Expense(r) => to_row(r),
        DraftRecord::Subscriber(r) => to_row(r),
        DraftRecord::Payment(r) => to_row(r),
        DraftRecord::Unlock(r) => to_row(r),
        DraftRecord::InventoryItem(r) => to_row(r),
        DraftRecord::Lead(r) => to_row(r),
        DraftRecord::OnlineSale(r) => to_row(r),
    }
}

fn new_upload(
    preview: &ImportPreview,
    file_name: String,
    parent: Option<(ParentTarget, RecordId)>,
    records_processed: usize,
    status: UploadStatus,
) -> Result<UploadedFile> {
    let (event_id, campaign_id) = match parent {
        Some((target, id)) if target.table == tables::EVENTS => (Some(id), None),
        Some((_, id)) => (None, Some(id)),
        None => (None, None),
    };

    Ok(UploadedFile {
        file_name,
        document_type: preview.document_type,
        event_id,
        campaign_id,
        uploaded_at: Utc::now().naive_utc(),
        records_processed,
        status,
        payload: Some(serde_json::to_value(preview)?),
    })
}
