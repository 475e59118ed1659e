use crate::builder::RecordKind;
use crate::classifier::*;
use crate::schema::DocumentType;
use crate::workbook::{Grid, Row, Workbook};
use log::{debug, warn};

/// A header-keyed sheet and the fields a row needs to be kept.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub sheet: &'static str,
    pub kind: RecordKind,
    pub required: &'static [&'static str],
}

pub const EVENT_TABLES: [TableSpec; 2] = [
    TableSpec {
        sheet: EVENT_SALES_SHEET,
        kind: RecordKind::Sale,
        required: &["Fecha", "Total"],
    },
    TableSpec {
        sheet: EVENT_EXPENSES_SHEET,
        kind: RecordKind::Expense,
        required: &["Fecha", "Monto"],
    },
];

pub const SUBSCRIPTION_TABLES: [TableSpec; 4] = [
    TableSpec {
        sheet: SUBSCRIBERS_SHEET,
        kind: RecordKind::Subscriber,
        required: &["Nombre"],
    },
    TableSpec {
        sheet: PAYMENTS_SHEET,
        kind: RecordKind::Payment,
        required: &["Suscriptor (Nombre)"],
    },
    TableSpec {
        sheet: UNLOCKS_SHEET,
        kind: RecordKind::Unlock,
        required: &["Suscriptor (Nombre)"],
    },
    TableSpec {
        sheet: INVENTORY_SHEET,
        kind: RecordKind::InventoryItem,
        required: &["Suscriptor"],
    },
];

pub const CAMPAIGN_TABLES: [TableSpec; 2] = [
    TableSpec {
        sheet: LEADS_SHEET,
        kind: RecordKind::Lead,
        required: &["Fecha"],
    },
    TableSpec {
        sheet: ONLINE_SALES_SHEET,
        kind: RecordKind::OnlineSale,
        required: &["Fecha"],
    },
];

pub fn tables_for(document_type: DocumentType) -> &'static [TableSpec] {
    match document_type {
        DocumentType::Event => &EVENT_TABLES,
        DocumentType::SubscriptionBatch => &SUBSCRIPTION_TABLES,
        DocumentType::Campaign => &CAMPAIGN_TABLES,
    }
}

pub fn info_sheet_for(document_type: DocumentType) -> Option<&'static str> {
    match document_type {
        DocumentType::Event => Some(EVENT_INFO_SHEET),
        DocumentType::SubscriptionBatch => None,
        DocumentType::Campaign => Some(CAMPAIGN_INFO_SHEET),
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedSheet {
    pub spec: TableSpec,
    pub rows: Vec<Row>,
    /// Non-blank rows that lacked a required field.
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct ExtractedWorkbook {
    pub document_type: DocumentType,
    /// Fixed-offset info grid, for documents that have one.
    pub info: Option<Grid>,
    pub sheets: Vec<ExtractedSheet>,
}

impl ExtractedWorkbook {
    pub fn sheet(&self, kind: RecordKind) -> Option<&ExtractedSheet> {
        self.sheets.iter().find(|s| s.spec.kind == kind)
    }

    pub fn dropped_rows(&self) -> usize {
        self.sheets.iter().map(|s| s.dropped).sum()
    }
}

pub fn extract(workbook: &Workbook, document_type: DocumentType) -> ExtractedWorkbook {
    let info = info_sheet_for(document_type)
        .map(|name| workbook.grid(name).cloned().unwrap_or_default());

    let sheets = tables_for(document_type)
        .iter()
        .map(|spec| extract_table(workbook, *spec))
        .collect();

    ExtractedWorkbook {
        document_type,
        info,
        sheets,
    }
}

fn extract_table(workbook: &Workbook, spec: TableSpec) -> ExtractedSheet {
    if !workbook.has_sheet(spec.sheet) {
        debug!("Sheet {} not present, reading as empty", spec.sheet);
    }

    let all_rows = workbook.records(spec.sheet);
    let total = all_rows.len();
    let rows: Vec<Row> = all_rows
        .into_iter()
        .filter(|row| has_required_fields(row, spec.required))
        .collect();
    let dropped = total - rows.len();

    if dropped > 0 {
        warn!(
            "Dropped {} of {} rows from {} missing one of {:?}",
            dropped, total, spec.sheet, spec.required
        );
    }

    ExtractedSheet {
        spec,
        rows,
        dropped,
    }
}

fn has_required_fields(row: &Row, required: &[&str]) -> bool {
    required
        .iter()
        .all(|field| row.get(*field).is_some_and(|cell| cell.is_present()))
}
