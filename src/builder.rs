//! Turns extracted rows into typed drafts.
//!
//! Coercion never fails. Unreadable numbers become zero and unreadable
//! dates become `None`; enum-like text is case-folded with a fallback.
//! Money columns never go below zero: a negative amount is clamped and
//! counted in [`BuiltRecords::clamped_amounts`] so the preview can show it.

use crate::dates::parse_date;
use crate::extractor::ExtractedWorkbook;
use crate::schema::*;
use crate::workbook::{grid_cell, CellValue, Grid, Row};
use chrono::NaiveDate;
use log::warn;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The templates' affirmative value for a lead's "Convertido" column. Only
/// this exact text counts as converted.
pub const CONVERTED_SENTINEL: &str = "SI";

pub const DEFAULT_CAMPAIGN_PLATFORM: &str = "meta_ads";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Sale,
    Expense,
    Subscriber,
    Payment,
    Unlock,
    InventoryItem,
    Lead,
    OnlineSale,
}

impl RecordKind {
    /// Store table the kind is persisted into.
    pub fn table(&self) -> &'static str {
        match self {
            RecordKind::Sale => crate::store::tables::EVENT_SALES,
            RecordKind::Expense => crate::store::tables::EVENT_EXPENSES,
            RecordKind::Subscriber => crate::store::tables::SUBSCRIBERS,
            RecordKind::Payment => crate::store::tables::PAYMENTS,
            RecordKind::Unlock => crate::store::tables::UNLOCKS,
            RecordKind::InventoryItem => crate::store::tables::INVENTORY_SALES,
            RecordKind::Lead => crate::store::tables::LEADS,
            RecordKind::OnlineSale => crate::store::tables::ONLINE_SALES,
        }
    }

    /// Sheet columns holding money amounts for this kind.
    pub fn money_columns(&self) -> &'static [&'static str] {
        match self {
            RecordKind::Sale => &["Precio Unitario", "Total"],
            RecordKind::Expense | RecordKind::Payment => &["Monto"],
            RecordKind::Subscriber => &[],
            RecordKind::Unlock => &["Costo Unitario", "Total"],
            RecordKind::InventoryItem => &["Precio Venta", "Costo Interno"],
            RecordKind::Lead => &["Monto Venta"],
            RecordKind::OnlineSale => &["Total", "Costo Envío", "Costo Producto"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum DraftRecord {
    Sale(Sale),
    Expense(Expense),
    Subscriber(Subscriber),
    Payment(Payment),
    Unlock(Unlock),
    InventoryItem(InventorySale),
    Lead(Lead),
    OnlineSale(OnlineSale),
}

impl DraftRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            DraftRecord::Sale(_) => RecordKind::Sale,
            DraftRecord::Expense(_) => RecordKind::Expense,
            DraftRecord::Subscriber(_) => RecordKind::Subscriber,
            DraftRecord::Payment(_) => RecordKind::Payment,
            DraftRecord::Unlock(_) => RecordKind::Unlock,
            DraftRecord::InventoryItem(_) => RecordKind::InventoryItem,
            DraftRecord::Lead(_) => RecordKind::Lead,
            DraftRecord::OnlineSale(_) => RecordKind::OnlineSale,
        }
    }
}

/// A typed draft plus the sheet row it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StagedRecord {
    pub draft: DraftRecord,
    /// Subscriber name the row points at, for subscriber-scoped kinds.
    pub owner: Option<String>,
    pub raw: Row,
}

impl StagedRecord {
    pub fn kind(&self) -> RecordKind {
        self.draft.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum ParentRecord {
    Event(Event),
    Campaign(Campaign),
}

impl ParentRecord {
    pub fn name(&self) -> &str {
        match self {
            ParentRecord::Event(event) => &event.name,
            ParentRecord::Campaign(campaign) => &campaign.name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltRecords {
    pub parent: Option<ParentRecord>,
    pub records: Vec<StagedRecord>,
    /// Negative money cells that were read as 0.
    pub clamped_amounts: usize,
}

impl BuiltRecords {
    pub fn count(&self, kind: RecordKind) -> usize {
        self.records.iter().filter(|r| r.kind() == kind).count()
    }

    pub fn of_kind(&self, kind: RecordKind) -> impl Iterator<Item = &StagedRecord> {
        self.records.iter().filter(move |r| r.kind() == kind)
    }
}

pub fn build_records(extracted: &ExtractedWorkbook) -> BuiltRecords {
    let parent = extracted.info.as_ref().and_then(|grid| match extracted.document_type {
        DocumentType::Event => Some(ParentRecord::Event(build_event(grid))),
        DocumentType::Campaign => Some(ParentRecord::Campaign(build_campaign(grid))),
        DocumentType::SubscriptionBatch => None,
    });

    let records: Vec<StagedRecord> = extracted
        .sheets
        .iter()
        .flat_map(|sheet| sheet.rows.iter().map(move |row| build_record(sheet.spec.kind, row)))
        .collect();

    let info_negatives = extracted.info.as_ref().map_or(0, |grid| {
        INFO_MONEY_ROWS
            .iter()
            .filter(|(doc, row)| *doc == extracted.document_type && is_negative(&info(grid, *row)))
            .count()
    });
    let clamped_amounts = info_negatives
        + records
            .iter()
            .map(|staged| negative_money_cells(staged.kind(), &staged.raw))
            .sum::<usize>();
    if clamped_amounts > 0 {
        warn!("{} negative amounts read as 0", clamped_amounts);
    }

    BuiltRecords {
        parent,
        records,
        clamped_amounts,
    }
}

pub fn build_record(kind: RecordKind, row: &Row) -> StagedRecord {
    let (draft, owner) = match kind {
        RecordKind::Sale => (DraftRecord::Sale(build_sale(row)), None),
        RecordKind::Expense => (DraftRecord::Expense(build_expense(row)), None),
        RecordKind::Subscriber => (DraftRecord::Subscriber(build_subscriber(row)), None),
        RecordKind::Payment => (
            DraftRecord::Payment(build_payment(row)),
            text(row, "Suscriptor (Nombre)"),
        ),
        RecordKind::Unlock => (
            DraftRecord::Unlock(build_unlock(row)),
            text(row, "Suscriptor (Nombre)"),
        ),
        RecordKind::InventoryItem => (
            DraftRecord::InventoryItem(build_inventory_sale(row)),
            text(row, "Suscriptor"),
        ),
        RecordKind::Lead => (DraftRecord::Lead(build_lead(row)), None),
        RecordKind::OnlineSale => (DraftRecord::OnlineSale(build_online_sale(row)), None),
    };

    StagedRecord {
        draft,
        owner,
        raw: row.clone(),
    }
}

// Info grids: labels in column A, values in column B starting at row 3.
const INFO_VALUE_COLUMN: usize = 1;

// Fee for events; budget and spend for campaigns.
const INFO_MONEY_ROWS: [(DocumentType, usize); 3] = [
    (DocumentType::Event, 8),
    (DocumentType::Campaign, 7),
    (DocumentType::Campaign, 8),
];

fn info(grid: &Grid, row: usize) -> CellValue {
    grid_cell(grid, row, INFO_VALUE_COLUMN)
}

pub fn build_event(grid: &Grid) -> Event {
    let attendance = coerce_number(&info(grid, 7));
    Event {
        name: info(grid, 2).as_text().unwrap_or_default(),
        sport: info(grid, 3).as_text(),
        start_date: parse_date(&info(grid, 4)),
        end_date: parse_date(&info(grid, 5)),
        location: info(grid, 6).as_text(),
        attendance: (attendance >= 1.0).then(|| attendance.round() as u32),
        entry_fee: coerce_money(&info(grid, 8)),
        status: EventStatus::Finished,
        notes: None,
    }
}

pub fn build_campaign(grid: &Grid) -> Campaign {
    let budget = coerce_money(&info(grid, 7));
    Campaign {
        name: info(grid, 2).as_text().unwrap_or_default(),
        campaign_type: info(grid, 3)
            .as_text()
            .map(|t| CampaignType::parse(&t))
            .unwrap_or(CampaignType::DirectSale),
        platform: info(grid, 4)
            .as_text()
            .unwrap_or_else(|| DEFAULT_CAMPAIGN_PLATFORM.to_string()),
        start_date: parse_date(&info(grid, 5)),
        end_date: parse_date(&info(grid, 6)),
        budget: (budget != 0.0).then_some(budget),
        actual_spend: coerce_money(&info(grid, 8)),
        status: CampaignStatus::Finished,
    }
}

pub fn build_sale(row: &Row) -> Sale {
    let sale = Sale {
        event_id: None,
        date: date(row, "Fecha"),
        customer: text(row, "Cliente"),
        product_name: text(row, "Producto"),
        unit_price: money(row, "Precio Unitario"),
        quantity: quantity(row, "Cantidad"),
        total: money(row, "Total"),
        payment_method: text(row, "Método Pago")
            .map(|t| PaymentMethod::parse(&t))
            .unwrap_or(PaymentMethod::Cash),
        notes: text(row, "Notas"),
    };
    if sale.total_mismatch() && sale.unit_price != 0.0 {
        warn!(
            "Sale total {} differs from {} x {}; keeping the sheet total",
            sale.total, sale.unit_price, sale.quantity
        );
    }
    sale
}

pub fn build_expense(row: &Row) -> Expense {
    Expense {
        event_id: None,
        date: date(row, "Fecha"),
        category: text(row, "Categoría")
            .map(|t| ExpenseCategory::parse(&t))
            .unwrap_or(ExpenseCategory::Other),
        concept: text(row, "Concepto").unwrap_or_default(),
        amount: money(row, "Monto"),
        payment_method: text(row, "Método Pago").map(|t| PaymentMethod::parse(&t)),
        notes: text(row, "Notas"),
    }
}

pub fn build_subscriber(row: &Row) -> Subscriber {
    Subscriber {
        name: text(row, "Nombre").unwrap_or_default(),
        email: text(row, "Email"),
        phone: text(row, "Teléfono"),
        plan_name: text(row, "Plan"),
        plan_id: None,
        start_date: date(row, "Fecha Inicio"),
        cancellation_date: date(row, "Fecha Cancelación"),
        status: text(row, "Status")
            .map(|t| SubscriberStatus::parse(&t))
            .unwrap_or(SubscriberStatus::Active),
        acquisition_source: text(row, "Origen"),
        notes: text(row, "Notas"),
    }
}

pub fn build_payment(row: &Row) -> Payment {
    Payment {
        subscriber_id: None,
        billing_date: date(row, "Fecha Cobro"),
        paid_date: date(row, "Fecha Pago"),
        amount: money(row, "Monto"),
        status: text(row, "Status")
            .map(|t| PaymentStatus::parse(&t))
            .unwrap_or(PaymentStatus::Pending),
        method: text(row, "Método Pago").map(|t| PaymentMethod::parse(&t)),
        notes: text(row, "Notas"),
    }
}

pub fn build_unlock(row: &Row) -> Unlock {
    Unlock {
        subscriber_id: None,
        date: date(row, "Fecha"),
        quantity: quantity(row, "Cantidad"),
        unit_cost: money(row, "Costo Unitario"),
        total: money(row, "Total"),
        notes: text(row, "Notas"),
    }
}

pub fn build_inventory_sale(row: &Row) -> InventorySale {
    let quantity = quantity(row, "Cantidad");
    let sale_price = money(row, "Precio Venta");
    let internal_cost = money(row, "Costo Interno");
    InventorySale {
        subscriber_id: None,
        date: date(row, "Fecha"),
        product: text(row, "Producto"),
        quantity,
        sale_price,
        internal_cost,
        total_sale: quantity * sale_price,
        total_cost: quantity * internal_cost,
        fulfillment: text(row, "Status")
            .map(|t| FulfillmentStatus::parse(&t))
            .unwrap_or(FulfillmentStatus::Pending),
        notes: text(row, "Notas"),
    }
}

pub fn build_lead(row: &Row) -> Lead {
    let sale_amount = money(row, "Monto Venta");
    Lead {
        campaign_id: None,
        date: date(row, "Fecha"),
        name: text(row, "Nombre"),
        phone: text(row, "Teléfono"),
        email: text(row, "Email"),
        converted: is_converted(row.get("Convertido")),
        conversion_date: date(row, "Fecha Conversión"),
        sale_amount: (sale_amount != 0.0).then_some(sale_amount),
        subscriber_id: None,
        notes: text(row, "Notas"),
    }
}

pub fn build_online_sale(row: &Row) -> OnlineSale {
    OnlineSale {
        campaign_id: None,
        date: date(row, "Fecha"),
        customer: text(row, "Cliente"),
        product: text(row, "Producto"),
        quantity: quantity(row, "Cantidad"),
        total: money(row, "Total"),
        shipping_cost: money(row, "Costo Envío"),
        product_cost: money(row, "Costo Producto"),
        payment_method: text(row, "Método Pago").map(|t| PaymentMethod::parse(&t)),
        notes: text(row, "Notas"),
    }
}

/// Numeric coercion: numbers pass through, numeric text is parsed, anything
/// else (including missing cells) is 0.
pub fn coerce_number(cell: &CellValue) -> f64 {
    let value = match cell {
        CellValue::Number(n) => *n,
        CellValue::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        CellValue::Bool(_) | CellValue::Empty => 0.0,
    };
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Like [`coerce_number`], but negative amounts read as 0.
pub fn coerce_money(cell: &CellValue) -> f64 {
    coerce_number(cell).max(0.0)
}

/// Money cells in `row` that hold a negative amount.
pub fn negative_money_cells(kind: RecordKind, row: &Row) -> usize {
    kind.money_columns()
        .iter()
        .filter(|column| row.get(**column).is_some_and(is_negative))
        .count()
}

fn is_negative(cell: &CellValue) -> bool {
    coerce_number(cell) < 0.0
}

pub fn is_converted(cell: Option<&CellValue>) -> bool {
    matches!(cell, Some(CellValue::Text(s)) if s == CONVERTED_SENTINEL)
}

fn number(row: &Row, key: &str) -> f64 {
    row.get(key).map(coerce_number).unwrap_or(0.0)
}

/// Quantities read as 1 when the sheet leaves them blank, zero or negative.
fn quantity(row: &Row, key: &str) -> f64 {
    let value = number(row, key);
    if value <= 0.0 {
        1.0
    } else {
        value
    }
}

fn money(row: &Row, key: &str) -> f64 {
    row.get(key).map(coerce_money).unwrap_or(0.0)
}

fn text(row: &Row, key: &str) -> Option<String> {
    row.get(key).and_then(CellValue::as_text)
}

fn date(row: &Row, key: &str) -> Option<NaiveDate> {
    row.get(key).and_then(parse_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[(&str, CellValue)]) -> Row {
        cells
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(coerce_number(&CellValue::Empty), 0.0);
        assert_eq!(coerce_number(&CellValue::text("abc")), 0.0);
        assert_eq!(coerce_number(&CellValue::text(" 12.5 ")), 12.5);
        assert_eq!(coerce_number(&CellValue::text("1,200")), 0.0);
        assert_eq!(coerce_number(&CellValue::Number(80.0)), 80.0);
        assert_eq!(coerce_number(&CellValue::Number(f64::NAN)), 0.0);
        assert_eq!(coerce_number(&CellValue::Bool(true)), 0.0);

        let expense = build_expense(&row(&[("Fecha", 45300.0.into())]));
        assert_eq!(expense.amount, 0.0);

        let expense = build_expense(&row(&[("Monto", "80".into())]));
        assert_eq!(expense.amount, 80.0);
    }

    #[test]
    fn test_negative_amounts_are_clamped() {
        let cells = row(&[("Monto", CellValue::Number(-80.0)), ("Concepto", "Reembolso".into())]);
        let expense = build_expense(&cells);
        assert_eq!(expense.amount, 0.0);
        assert_eq!(negative_money_cells(RecordKind::Expense, &cells), 1);

        let cells = row(&[
            ("Total", 300.0.into()),
            ("Costo Envío", "-15".into()),
            ("Costo Producto", CellValue::Number(-40.0)),
            ("Cantidad", CellValue::Number(-2.0)),
        ]);
        let sale = build_online_sale(&cells);
        assert_eq!(sale.total, 300.0);
        assert_eq!(sale.shipping_cost, 0.0);
        assert_eq!(sale.product_cost, 0.0);
        assert_eq!(sale.quantity, 1.0);
        assert_eq!(negative_money_cells(RecordKind::OnlineSale, &cells), 2);

        assert_eq!(coerce_money(&CellValue::Number(-0.5)), 0.0);
        assert_eq!(coerce_number(&CellValue::Number(-0.5)), -0.5);
    }

    #[test]
    fn test_negative_event_fee_is_clamped() {
        let mut grid: Grid = vec![vec![]; 9];
        grid[2] = vec!["Nombre".into(), "Copa Norte".into()];
        grid[8] = vec!["Fee".into(), CellValue::Number(-500.0)];

        assert_eq!(build_event(&grid).entry_fee, 0.0);
    }

    #[test]
    fn test_sale_defaults() {
        let sale = build_sale(&row(&[("Fecha", 44197.0.into()), ("Total", 100.0.into())]));

        assert_eq!(sale.date, NaiveDate::from_ymd_opt(2021, 1, 1));
        assert_eq!(sale.total, 100.0);
        assert_eq!(sale.quantity, 1.0);
        assert_eq!(sale.unit_price, 0.0);
        assert_eq!(sale.payment_method, PaymentMethod::Cash);
        assert!(sale.event_id.is_none());
    }

    #[test]
    fn test_sale_total_is_trusted() {
        let sale = build_sale(&row(&[
            ("Fecha", 44197.0.into()),
            ("Precio Unitario", 50.0.into()),
            ("Cantidad", 3.0.into()),
            ("Total", 100.0.into()),
            ("Método Pago", "TARJETA".into()),
        ]));

        assert_eq!(sale.total, 100.0);
        assert!(sale.total_mismatch());
        assert_eq!(sale.payment_method, PaymentMethod::Card);
    }

    #[test]
    fn test_expense_category_folding() {
        let expense = build_expense(&row(&[("Categoría", "PERSONAL".into()), ("Monto", 80.0.into())]));
        assert_eq!(expense.category, ExpenseCategory::Personnel);
        assert!(expense.payment_method.is_none());

        let expense = build_expense(&row(&[("Monto", 80.0.into())]));
        assert_eq!(expense.category, ExpenseCategory::Other);
    }

    #[test]
    fn test_converted_requires_exact_sentinel() {
        assert!(is_converted(Some(&CellValue::text("SI"))));
        for other in ["si", "Si", "SÍ", "YES", "true", "1", " SI"] {
            assert!(!is_converted(Some(&CellValue::text(other))), "{}", other);
        }
        assert!(!is_converted(Some(&CellValue::Bool(true))));
        assert!(!is_converted(Some(&CellValue::Number(1.0))));
        assert!(!is_converted(None));
    }

    #[test]
    fn test_subscriber_scoped_records_carry_owner() {
        let staged = build_record(
            RecordKind::Payment,
            &row(&[
                ("Suscriptor (Nombre)", "Ana López".into()),
                ("Monto", 299.0.into()),
                ("Status", "Pagado".into()),
            ]),
        );

        assert_eq!(staged.kind(), RecordKind::Payment);
        assert_eq!(staged.owner.as_deref(), Some("Ana López"));
        match staged.draft {
            DraftRecord::Payment(payment) => {
                assert_eq!(payment.amount, 299.0);
                assert_eq!(payment.status, PaymentStatus::Paid);
            }
            other => panic!("unexpected draft {:?}", other),
        }

        let staged = build_record(RecordKind::InventoryItem, &row(&[("Suscriptor", "Ana López".into())]));
        assert_eq!(staged.owner.as_deref(), Some("Ana López"));
    }

    #[test]
    fn test_inventory_totals_are_computed() {
        let item = build_inventory_sale(&row(&[
            ("Suscriptor", "Ana".into()),
            ("Cantidad", 3.0.into()),
            ("Precio Venta", 120.0.into()),
            ("Costo Interno", "45".into()),
        ]));

        assert_eq!(item.total_sale, 360.0);
        assert_eq!(item.total_cost, 135.0);
        assert_eq!(item.fulfillment, FulfillmentStatus::Pending);
    }

    #[test]
    fn test_event_info_grid_offsets() {
        let mut grid: Grid = vec![vec![]; 9];
        grid[0] = vec!["INFORMACIÓN DEL EVENTO".into()];
        grid[2] = vec!["Nombre".into(), "Copa Norte".into()];
        grid[3] = vec!["Deporte".into(), "Fútbol".into()];
        grid[4] = vec!["Fecha Inicio".into(), 45300.0.into()];
        grid[7] = vec!["Participantes".into(), "350".into()];
        grid[8] = vec!["Fee".into(), 500.0.into()];

        let event = build_event(&grid);
        assert_eq!(event.name, "Copa Norte");
        assert_eq!(event.sport.as_deref(), Some("Fútbol"));
        assert_eq!(event.start_date, NaiveDate::from_ymd_opt(2024, 1, 9));
        assert_eq!(event.end_date, None);
        assert_eq!(event.attendance, Some(350));
        assert_eq!(event.entry_fee, 500.0);
        assert_eq!(event.status, EventStatus::Finished);
    }

    #[test]
    fn test_campaign_info_defaults() {
        let mut grid: Grid = vec![vec![]; 9];
        grid[2] = vec!["Nombre".into(), "Lanzamiento".into()];
        grid[8] = vec!["Gasto".into(), 1200.0.into()];

        let campaign = build_campaign(&grid);
        assert_eq!(campaign.name, "Lanzamiento");
        assert_eq!(campaign.campaign_type, CampaignType::DirectSale);
        assert_eq!(campaign.platform, DEFAULT_CAMPAIGN_PLATFORM);
        assert_eq!(campaign.budget, None);
        assert_eq!(campaign.actual_spend, 1200.0);
    }
}
