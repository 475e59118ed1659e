use crate::commit::parent_target;
use crate::error::Result;
use crate::schema::{RecordId, Stored, UploadStatus, UploadedFile};
use crate::store::{fetch, fetch_by_id, tables, Direction, Query, Store, StoreRow};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Rows physically removed while soft-deleting an upload, per table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DeletionReport {
    pub upload_id: RecordId,
    pub removed: BTreeMap<String, usize>,
}

/// Uploads that have not been deleted, newest first.
pub async fn list_uploads<S>(store: &S) -> Result<Vec<Stored<UploadedFile>>>
where
    S: Store + ?Sized,
{
    let query = Query::new()
        .neq("status", "deleted")
        .order_by("uploaded_at", Direction::Descending);
    fetch(store, tables::UPLOADED_FILES, &query).await
}

/// Marks an upload deleted. Event and campaign uploads also take their
/// parent record and its dependents with them; the upload row itself stays.
pub async fn soft_delete_upload<S>(store: &S, upload_id: &RecordId) -> Result<DeletionReport>
where
    S: Store + ?Sized,
{
    let upload = fetch_by_id::<UploadedFile, _>(store, tables::UPLOADED_FILES, upload_id).await?;
    let mut report = DeletionReport {
        upload_id: upload_id.clone(),
        removed: BTreeMap::new(),
    };

    if upload.record.status == UploadStatus::Deleted {
        debug!("Upload {} already deleted", upload_id);
        return Ok(report);
    }

    if let (Some(target), Some(parent_id)) = (
        parent_target(upload.record.document_type),
        upload.record.parent_id(),
    ) {
        for kind in target.dependents {
            let removed = store
                .delete(
                    kind.table(),
                    &Query::new().eq(target.foreign_key, parent_id.as_str()),
                )
                .await?;
            report.removed.insert(kind.table().to_string(), removed);
        }
        let removed = store
            .delete(target.table, &Query::new().eq("id", parent_id.as_str()))
            .await?;
        report.removed.insert(target.table.to_string(), removed);
    }

    let mut changes = StoreRow::new();
    changes.insert(
        "status".to_string(),
        Value::String("deleted".to_string()),
    );
    store
        .update(tables::UPLOADED_FILES, upload_id, changes)
        .await?;

    info!(
        "Upload {} ({}) deleted, removed {:?}",
        upload_id, upload.record.file_name, report.removed
    );
    Ok(report)
}
