use chrono::{NaiveDate, NaiveDateTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier handed out by the store on insert.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lowercases and trims template text before it is matched against an enum.
pub(crate) fn fold(text: &str) -> String {
    text.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    #[schemars(description = "Event workbook: INFO_EVENTO + VENTAS (+ GASTOS)")]
    Event,
    #[schemars(description = "Subscription batch: SUSCRIPTORES + PAGOS_MENSUALIDAD (+ DESBLOQUEOS, VENTA_INVENTARIO)")]
    SubscriptionBatch,
    #[schemars(description = "Online campaign: INFO_CAMPAÑA + LEADS (+ VENTAS_ONLINE)")]
    Campaign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    InProgress,
    Finished,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Personnel,
    Travel,
    Operations,
    Fee,
    Other,
}

impl ExpenseCategory {
    pub fn parse(text: &str) -> Self {
        match fold(text).as_str() {
            "personal" | "personnel" => Self::Personnel,
            "viaticos" | "viáticos" | "travel" => Self::Travel,
            "operativo" | "operaciones" | "operations" => Self::Operations,
            "fee" => Self::Fee,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Deposit,
    Online,
    Other,
}

impl PaymentMethod {
    pub fn parse(text: &str) -> Self {
        match fold(text).as_str() {
            "efectivo" | "cash" => Self::Cash,
            "tarjeta" | "card" => Self::Card,
            "transferencia" | "transfer" => Self::Transfer,
            "deposito" | "depósito" | "deposit" => Self::Deposit,
            "online" | "en linea" | "en línea" => Self::Online,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberStatus {
    Active,
    Paused,
    Cancelled,
    Delinquent,
}

impl SubscriberStatus {
    pub fn parse(text: &str) -> Self {
        match fold(text).as_str() {
            "pausado" | "paused" => Self::Paused,
            "cancelado" | "cancelled" | "canceled" => Self::Cancelled,
            "moroso" | "delinquent" => Self::Delinquent,
            _ => Self::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl PaymentStatus {
    pub fn parse(text: &str) -> Self {
        match fold(text).as_str() {
            "pagado" | "paid" => Self::Paid,
            "vencido" | "overdue" => Self::Overdue,
            "cancelado" | "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Pending,
    Delivered,
    Cancelled,
}

impl FulfillmentStatus {
    pub fn parse(text: &str) -> Self {
        match fold(text).as_str() {
            "entregado" | "delivered" => Self::Delivered,
            "cancelado" | "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    DirectSale,
    SubscriberAcquisition,
}

impl CampaignType {
    pub fn parse(text: &str) -> Self {
        match fold(text).as_str() {
            "adquisicion_suscriptores" | "adquisición_suscriptores" | "subscriber_acquisition" => {
                Self::SubscriberAcquisition
            }
            _ => Self::DirectSale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    #[schemars(description = "Every record of the upload was written")]
    Processed,
    #[schemars(description = "Some records were written before a store failure; no rollback happened")]
    PartiallyProcessed,
    Error,
    #[schemars(description = "Soft-deleted by the user; the row itself is kept")]
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub name: String,
    pub sport: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub attendance: Option<u32>,
    pub entry_fee: f64,
    pub status: EventStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Sale {
    #[serde(default)]
    pub event_id: Option<RecordId>,
    pub date: Option<NaiveDate>,
    pub customer: Option<String>,
    pub product_name: Option<String>,
    pub unit_price: f64,
    pub quantity: f64,
    /// Stored as given by the sheet, never recomputed.
    pub total: f64,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

impl Sale {
    pub fn total_mismatch(&self) -> bool {
        (self.unit_price * self.quantity - self.total).abs() > 0.005
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Expense {
    #[serde(default)]
    pub event_id: Option<RecordId>,
    pub date: Option<NaiveDate>,
    pub category: ExpenseCategory,
    pub concept: String,
    pub amount: f64,
    pub payment_method: Option<PaymentMethod>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubscriptionPlan {
    pub name: String,
    pub monthly_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Subscriber {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Plan name as written in the sheet; resolved to `plan_id` on commit.
    #[serde(default)]
    pub plan_name: Option<String>,
    #[serde(default)]
    pub plan_id: Option<RecordId>,
    pub start_date: Option<NaiveDate>,
    pub cancellation_date: Option<NaiveDate>,
    pub status: SubscriberStatus,
    pub acquisition_source: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Payment {
    #[serde(default)]
    pub subscriber_id: Option<RecordId>,
    pub billing_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,
    pub amount: f64,
    pub status: PaymentStatus,
    pub method: Option<PaymentMethod>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Unlock {
    #[serde(default)]
    pub subscriber_id: Option<RecordId>,
    pub date: Option<NaiveDate>,
    pub quantity: f64,
    pub unit_cost: f64,
    pub total: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InventorySale {
    #[serde(default)]
    pub subscriber_id: Option<RecordId>,
    pub date: Option<NaiveDate>,
    pub product: Option<String>,
    pub quantity: f64,
    pub sale_price: f64,
    pub internal_cost: f64,
    pub total_sale: f64,
    pub total_cost: f64,
    pub fulfillment: FulfillmentStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Campaign {
    pub name: String,
    pub campaign_type: CampaignType,
    pub platform: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget: Option<f64>,
    pub actual_spend: f64,
    pub status: CampaignStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Lead {
    #[serde(default)]
    pub campaign_id: Option<RecordId>,
    pub date: Option<NaiveDate>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub converted: bool,
    pub conversion_date: Option<NaiveDate>,
    pub sale_amount: Option<f64>,
    #[serde(default)]
    pub subscriber_id: Option<RecordId>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OnlineSale {
    #[serde(default)]
    pub campaign_id: Option<RecordId>,
    pub date: Option<NaiveDate>,
    pub customer: Option<String>,
    pub product: Option<String>,
    pub quantity: f64,
    pub total: f64,
    pub shipping_cost: f64,
    pub product_cost: f64,
    pub payment_method: Option<PaymentMethod>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyQuota {
    pub year: i32,
    pub month: u32,
    pub sales_target: f64,
    pub subscriber_target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UploadedFile {
    pub file_name: String,
    pub document_type: DocumentType,
    #[serde(default)]
    pub event_id: Option<RecordId>,
    #[serde(default)]
    pub campaign_id: Option<RecordId>,
    pub uploaded_at: NaiveDateTime,
    /// Rows actually inserted. Can be lower than the preview's
    /// `total_records` when dependents were unmatched or a write failed.
    #[schemars(description = "Rows actually inserted, not the preview total")]
    pub records_processed: usize,
    pub status: UploadStatus,
    /// Snapshot of the preview that produced this upload.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl UploadedFile {
    pub fn parent_id(&self) -> Option<&RecordId> {
        self.event_id.as_ref().or(self.campaign_id.as_ref())
    }
}

/// A persisted row together with its store id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub id: RecordId,
    #[serde(flatten)]
    pub record: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_parsing_is_case_folded() {
        assert_eq!(ExpenseCategory::parse("PERSONAL"), ExpenseCategory::Personnel);
        assert_eq!(ExpenseCategory::parse(" Viaticos "), ExpenseCategory::Travel);
        assert_eq!(ExpenseCategory::parse("Fee"), ExpenseCategory::Fee);
        assert_eq!(ExpenseCategory::parse("marketing"), ExpenseCategory::Other);

        assert_eq!(PaymentMethod::parse("Efectivo"), PaymentMethod::Cash);
        assert_eq!(PaymentMethod::parse("TARJETA"), PaymentMethod::Card);
        assert_eq!(PaymentMethod::parse("cripto"), PaymentMethod::Other);

        assert_eq!(SubscriberStatus::parse("Cancelado"), SubscriberStatus::Cancelled);
        assert_eq!(SubscriberStatus::parse(""), SubscriberStatus::Active);
        assert_eq!(PaymentStatus::parse("PAGADO"), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::parse("?"), PaymentStatus::Pending);
        assert_eq!(
            CampaignType::parse("Adquisicion_Suscriptores"),
            CampaignType::SubscriberAcquisition
        );
        assert_eq!(FulfillmentStatus::parse("Entregado"), FulfillmentStatus::Delivered);
    }

    #[test]
    fn test_stored_flattens_id_into_row() {
        let stored = Stored {
            id: RecordId::from("abc"),
            record: MonthlyQuota {
                year: 2024,
                month: 3,
                sales_target: 1000.0,
                subscriber_target: 40.0,
            },
        };

        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["month"], 3);

        let back: Stored<MonthlyQuota> = serde_json::from_value(json).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn test_sale_total_mismatch() {
        let mut sale = Sale {
            event_id: None,
            date: None,
            customer: None,
            product_name: None,
            unit_price: 50.0,
            quantity: 2.0,
            total: 100.0,
            payment_method: PaymentMethod::Cash,
            notes: None,
        };
        assert!(!sale.total_mismatch());
        sale.total = 90.0;
        assert!(sale.total_mismatch());
    }
}
