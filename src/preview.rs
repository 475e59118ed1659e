//! The stop point before anything is written: classify, extract and build a
//! workbook, then describe what a commit would import.

use crate::builder::{build_records, BuiltRecords, DraftRecord, ParentRecord, RecordKind, StagedRecord};
use crate::classifier::classify;
use crate::error::Result;
use crate::extractor::{extract, ExtractedWorkbook};
use crate::schema::DocumentType;
use crate::workbook::Workbook;
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PreviewSummary {
    #[schemars(description = "Dependent records that a commit would insert")]
    pub total_records: usize,

    #[schemars(description = "Human-readable counts, in template wording")]
    pub lines: Vec<String>,

    #[schemars(description = "Non-blank rows dropped for lacking a required field")]
    pub dropped_rows: usize,

    pub dropped_by_sheet: BTreeMap<String, usize>,

    #[schemars(description = "Sales whose total differs from unit price times quantity")]
    pub total_mismatches: usize,

    #[schemars(description = "Negative money cells that were imported as 0")]
    #[serde(default)]
    pub clamped_amounts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImportPreview {
    pub document_type: DocumentType,
    pub file_name: Option<String>,
    pub parent: Option<ParentRecord>,
    pub records: Vec<StagedRecord>,
    pub summary: PreviewSummary,
}

impl ImportPreview {
    pub fn count(&self, kind: RecordKind) -> usize {
        self.records.iter().filter(|r| r.kind() == kind).count()
    }

    pub fn of_kind(&self, kind: RecordKind) -> impl Iterator<Item = &StagedRecord> {
        self.records.iter().filter(move |r| r.kind() == kind)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ImportPreview)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

pub fn preview_bytes(bytes: &[u8], file_name: Option<&str>) -> Result<ImportPreview> {
    let workbook = Workbook::from_bytes(bytes)?;
    preview_workbook(&workbook, file_name)
}

pub fn preview_workbook(workbook: &Workbook, file_name: Option<&str>) -> Result<ImportPreview> {
    let document_type = classify(workbook.sheet_names())?;
    info!(
        "Previewing {:?} workbook {}",
        document_type,
        file_name.unwrap_or("<unnamed>")
    );

    let extracted = extract(workbook, document_type);
    let built = build_records(&extracted);
    let summary = summarize(&extracted, &built);

    debug!(
        "Preview ready: {} records, {} dropped rows",
        summary.total_records, summary.dropped_rows
    );

    Ok(ImportPreview {
        document_type,
        file_name: file_name.map(str::to_string),
        parent: built.parent,
        records: built.records,
        summary,
    })
}

fn summarize(extracted: &ExtractedWorkbook, built: &BuiltRecords) -> PreviewSummary {
    let records = &built.records;
    let count = |kind: RecordKind| records.iter().filter(|r| r.kind() == kind).count();
    let parent_name = built.parent.as_ref().map(ParentRecord::name).unwrap_or_default();

    let mut lines = match extracted.document_type {
        DocumentType::Event => vec![
            format!("Evento: {}", parent_name),
            format!("Ventas: {} registros", count(RecordKind::Sale)),
            format!("Gastos: {} registros", count(RecordKind::Expense)),
        ],
        DocumentType::SubscriptionBatch => vec![
            format!("Suscriptores: {}", count(RecordKind::Subscriber)),
            format!("Pagos: {}", count(RecordKind::Payment)),
            format!("Desbloqueos: {}", count(RecordKind::Unlock)),
            format!("Inventario: {}", count(RecordKind::InventoryItem)),
        ],
        DocumentType::Campaign => vec![
            format!("Campaña: {}", parent_name),
            format!("Leads: {}", count(RecordKind::Lead)),
            format!("Ventas: {}", count(RecordKind::OnlineSale)),
        ],
    };

    let dropped_rows = extracted.dropped_rows();
    if dropped_rows > 0 {
        lines.push(format!("Filas descartadas: {}", dropped_rows));
    }
    if built.clamped_amounts > 0 {
        lines.push(format!("Montos negativos ajustados a 0: {}", built.clamped_amounts));
    }

    let dropped_by_sheet = extracted
        .sheets
        .iter()
        .filter(|s| s.dropped > 0)
        .map(|s| (s.spec.sheet.to_string(), s.dropped))
        .collect();

    let total_mismatches = records
        .iter()
        .filter(|r| match &r.draft {
            DraftRecord::Sale(sale) => sale.unit_price != 0.0 && sale.total_mismatch(),
            _ => false,
        })
        .count();

    PreviewSummary {
        total_records: records.len(),
        lines,
        dropped_rows,
        dropped_by_sheet,
        total_mismatches,
        clamped_amounts: built.clamped_amounts,
    }
}
