//! # Finance Intake
//!
//! A library for importing the official event, subscription and campaign
//! spreadsheet templates into a relational store, and for deriving the
//! financial KPIs a small-business dashboard shows on top of them.
//!
//! ## Core Concepts
//!
//! - **Document type**: a workbook is an event, a subscription batch or a
//!   campaign, decided only by which sheets it contains
//! - **Preview**: classification, extraction and record building happen
//!   without touching the store, so the user can check the counts first
//! - **Commit**: the parent record is written first, then its dependents
//!   carrying the parent id, then an upload-history entry
//! - **Aggregation**: stateless KPI functions over whatever the store holds,
//!   parameterized by year, month, period or entity id
//!
//! ## Example
//!
//! ```rust,ignore
//! use finance_intake::*;
//!
//! let store = MemoryStore::new();
//! let pipeline = IntakePipeline::new(store, IntakeConfig::default());
//!
//! let bytes = std::fs::read("copa_norte.xlsx")?;
//! let preview = pipeline.preview(&bytes, Some("copa_norte.xlsx"))?;
//! for line in &preview.summary.lines {
//!     println!("{}", line);
//! }
//!
//! let report = pipeline.commit(&preview).await?;
//! let kpis = event_kpis(pipeline.store(), report.parent_id.as_ref().unwrap()).await?;
//! println!("margin: {:.1}%", kpis.margin_pct);
//! ```

pub mod aggregation;
pub mod builder;
pub mod classifier;
pub mod commit;
pub mod config;
pub mod dates;
pub mod error;
pub mod export;
pub mod extractor;
pub mod preview;
pub mod schema;
pub mod store;
pub mod uploads;
pub mod utils;
pub mod workbook;

pub use aggregation::*;
pub use builder::{build_records, BuiltRecords, DraftRecord, ParentRecord, RecordKind, StagedRecord};
pub use classifier::classify;
pub use commit::{commit_preview, CommitReport};
pub use config::IntakeConfig;
pub use dates::{normalize_date, parse_date};
pub use error::{IntakeError, Result};
pub use export::{collect_transactions, write_transactions_csv, Transaction, TransactionType};
pub use extractor::{extract, ExtractedWorkbook};
pub use preview::{preview_bytes, preview_workbook, ImportPreview, PreviewSummary};
pub use schema::*;
pub use store::{MemoryStore, Query, Store, StoreRow};
pub use uploads::{list_uploads, soft_delete_upload, DeletionReport};
pub use utils::{MonthWindow, Period};
pub use workbook::{CellValue, Workbook};

use chrono::NaiveDate;
use log::{debug, info};
use std::io::Write;

/// A store plus the settings the pipeline runs with.
///
/// Every operation is also available as a free function; this type only
/// saves passing the store and config around.
pub struct IntakePipeline<S: Store> {
    store: S,
    config: IntakeConfig,
}

impl<S: Store> IntakePipeline<S> {
    pub fn new(store: S, config: IntakeConfig) -> Self {
        Self { store, config }
    }

    pub fn with_store(store: S) -> Self {
        Self::new(store, IntakeConfig::default())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    pub fn preview(&self, bytes: &[u8], file_name: Option<&str>) -> Result<ImportPreview> {
        preview_bytes(bytes, file_name)
    }

    pub fn preview_workbook(&self, workbook: &Workbook, file_name: Option<&str>) -> Result<ImportPreview> {
        preview_workbook(workbook, file_name)
    }

    /// Writes a confirmed preview. Not safe to call twice for the same
    /// preview at once; there is no deduplication.
    pub async fn commit(&self, preview: &ImportPreview) -> Result<CommitReport> {
        commit_preview(&self.store, preview, &self.config).await
    }

    /// Preview and commit in one go, for callers that skip the confirmation step.
    pub async fn import(&self, bytes: &[u8], file_name: Option<&str>) -> Result<CommitReport> {
        let preview = self.preview(bytes, file_name)?;
        debug!("Importing without confirmation: {:?}", preview.summary.lines);
        self.commit(&preview).await
    }

    pub async fn uploads(&self) -> Result<Vec<Stored<UploadedFile>>> {
        list_uploads(&self.store).await
    }

    pub async fn delete_upload(&self, upload_id: &RecordId) -> Result<DeletionReport> {
        soft_delete_upload(&self.store, upload_id).await
    }

    pub async fn dashboard(&self, window: MonthWindow) -> Result<DashboardKpis> {
        info!("Building dashboard for {}-{:02}", window.year, window.month);
        dashboard_kpis(&self.store, window).await
    }

    pub async fn cash_flow(&self, year: i32) -> Result<Vec<MonthlyCashFlow>> {
        monthly_cash_flow(&self.store, year).await
    }

    pub async fn rollup(&self, period: Period) -> Result<PeriodRollup> {
        period_rollup(&self.store, period).await
    }

    pub async fn recent_events(&self) -> Result<Vec<EventKpis>> {
        recent_event_kpis(&self.store, self.config.recent_event_limit).await
    }

    pub async fn recent_campaigns(&self) -> Result<Vec<CampaignKpis>> {
        recent_campaign_kpis(&self.store, self.config.recent_campaign_limit).await
    }

    pub async fn subscriptions(&self, window: MonthWindow) -> Result<SubscriptionKpis> {
        subscription_kpis(&self.store, window).await
    }

    pub async fn export_csv<W: Write>(&self, writer: W, from: NaiveDate, to: NaiveDate) -> Result<usize> {
        let transactions = collect_transactions(&self.store, from, to).await?;
        write_transactions_csv(writer, &transactions)?;
        Ok(transactions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::Grid;

    fn campaign_workbook() -> Workbook {
        let mut info: Grid = vec![vec![]; 9];
        info[2] = vec!["Nombre".into(), "Lanzamiento".into()];
        info[5] = vec!["Fecha Inicio".into(), 45383.0.into()];
        info[8] = vec!["Gasto Real".into(), 400.0.into()];

        Workbook::from_sheets(vec![
            ("INFO_CAMPAÑA", info),
            (
                "LEADS",
                vec![
                    vec!["Fecha".into(), "Nombre".into(), "Convertido".into(), "Monto Venta".into()],
                    vec![45383.0.into(), "Eva".into(), "SI".into(), 600.0.into()],
                    vec![45384.0.into(), "Raúl".into(), "NO".into(), CellValue::Empty],
                    vec![45385.0.into(), "Iris".into(), "si".into(), 200.0.into()],
                    vec![45386.0.into(), "Noa".into(), CellValue::Empty, CellValue::Empty],
                ],
            ),
            (
                "VENTAS_ONLINE",
                vec![
                    vec!["Fecha".into(), "Producto".into(), "Total".into()],
                    vec![45390.0.into(), "Playera".into(), 200.0.into()],
                ],
            ),
        ])
    }

    #[tokio::test]
    async fn test_campaign_import_through_pipeline() {
        let pipeline = IntakePipeline::with_store(MemoryStore::new());
        let preview = pipeline
            .preview_workbook(&campaign_workbook(), Some("lanzamiento.xlsx"))
            .unwrap();
        let report = pipeline.commit(&preview).await.unwrap();

        assert_eq!(report.inserted(RecordKind::Lead), 4);
        assert_eq!(report.inserted(RecordKind::OnlineSale), 1);

        let campaigns = pipeline.recent_campaigns().await.unwrap();
        assert_eq!(campaigns.len(), 1);
        let kpis = &campaigns[0];
        assert_eq!(kpis.name, "Lanzamiento");
        assert_eq!(kpis.leads, 4);
        // Only the exact "SI" counts as converted.
        assert_eq!(kpis.converted, 1);
        assert_eq!(kpis.conversion_rate_pct, 25.0);
        assert_eq!(kpis.total_sales, 800.0);
        assert_eq!(kpis.cac, 100.0);
        assert_eq!(kpis.roas, 2.0);

        let uploads = pipeline.uploads().await.unwrap();
        assert_eq!(uploads[0].record.file_name, "CAMPANA_Lanzamiento");
        assert_eq!(uploads[0].record.campaign_id, report.parent_id);
    }

    #[tokio::test]
    async fn test_export_through_pipeline() {
        let pipeline = IntakePipeline::with_store(MemoryStore::new());
        let preview = pipeline
            .preview_workbook(&campaign_workbook(), None)
            .unwrap();
        pipeline.commit(&preview).await.unwrap();

        let mut out = Vec::new();
        let from = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 4, 30).unwrap();
        let written = pipeline.export_csv(&mut out, from, to).await.unwrap();

        assert_eq!(written, 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("2024-04-08,income,Venta online: Playera,200.00"));
    }
}
