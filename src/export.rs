use crate::error::{IntakeError, Result};
use crate::schema::{Expense, OnlineSale, Payment, Sale};
use crate::store::{fetch, tables, Query, Store};
use chrono::NaiveDate;
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Income,
    Outflow,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Outflow => "outflow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transaction {
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub description: String,
    pub amount: f64,
}

fn between(field: &str, from: NaiveDate, to: NaiveDate) -> Query {
    Query::new().between(field, from.to_string(), to.to_string())
}

fn describe(prefix: &str, detail: Option<&str>) -> String {
    match detail {
        Some(detail) if !detail.is_empty() => format!("{}: {}", prefix, detail),
        _ => prefix.to_string(),
    }
}

/// Money in and out between two dates (inclusive), oldest first.
pub async fn collect_transactions<S>(store: &S, from: NaiveDate, to: NaiveDate) -> Result<Vec<Transaction>>
where
    S: Store + ?Sized,
{
    if to < from {
        return Err(IntakeError::InvalidPeriod(format!(
            "export range ends ({}) before it starts ({})",
            to, from
        )));
    }

    let mut transactions = Vec::new();

    for sale in fetch::<Sale, _>(store, tables::EVENT_SALES, &between("date", from, to)).await? {
        if let Some(date) = sale.record.date {
            transactions.push(Transaction {
                date,
                kind: TransactionType::Income,
                description: describe("Venta evento", sale.record.product_name.as_deref()),
                amount: sale.record.total,
            });
        }
    }

    for sale in fetch::<OnlineSale, _>(store, tables::ONLINE_SALES, &between("date", from, to)).await? {
        if let Some(date) = sale.record.date {
            transactions.push(Transaction {
                date,
                kind: TransactionType::Income,
                description: describe("Venta online", sale.record.product.as_deref()),
                amount: sale.record.total,
            });
        }
    }

    let paid = between("paid_date", from, to).eq("status", "paid");
    for payment in fetch::<Payment, _>(store, tables::PAYMENTS, &paid).await? {
        if let Some(date) = payment.record.paid_date {
            transactions.push(Transaction {
                date,
                kind: TransactionType::Income,
                description: "Mensualidad".to_string(),
                amount: payment.record.amount,
            });
        }
    }

    for expense in fetch::<Expense, _>(store, tables::EVENT_EXPENSES, &between("date", from, to)).await? {
        if let Some(date) = expense.record.date {
            transactions.push(Transaction {
                date,
                kind: TransactionType::Outflow,
                description: describe("Gasto", Some(expense.record.concept.as_str())),
                amount: expense.record.amount,
            });
        }
    }

    transactions.sort_by_key(|t| t.date);
    info!(
        "Collected {} transactions between {} and {}",
        transactions.len(),
        from,
        to
    );
    Ok(transactions)
}

/// Writes `date,type,description,amount` rows, header included even when
/// there is nothing to export.
pub fn write_transactions_csv<W: Write>(writer: W, transactions: &[Transaction]) -> Result<()> {
    let mut out = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    out.write_record(["date", "type", "description", "amount"])?;
    for tx in transactions {
        out.write_record([
            tx.date.format("%Y-%m-%d").to_string(),
            tx.kind.as_str().to_string(),
            tx.description.clone(),
            format!("{:.2}", tx.amount),
        ])?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn put(store: &MemoryStore, table: &str, value: serde_json::Value) {
        store
            .insert(table, value.as_object().cloned().unwrap())
            .await
            .unwrap();
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    #[test]
    fn test_csv_layout_and_quoting() {
        let transactions = vec![
            Transaction {
                date: date(3),
                kind: TransactionType::Income,
                description: "Venta evento: Poster, grande".to_string(),
                amount: 100.0,
            },
            Transaction {
                date: date(4),
                kind: TransactionType::Outflow,
                description: "Gasto: Bus".to_string(),
                amount: 80.5,
            },
        ];

        let mut out = Vec::new();
        write_transactions_csv(&mut out, &transactions).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "date,type,description,amount\n\
             2024-06-03,income,\"Venta evento: Poster, grande\",100.00\n\
             2024-06-04,outflow,Gasto: Bus,80.50\n"
        );
    }

    #[test]
    fn test_empty_export_still_has_header() {
        let mut out = Vec::new();
        write_transactions_csv(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "date,type,description,amount\n");
    }

    #[tokio::test]
    async fn test_collect_sorts_and_filters() {
        let store = MemoryStore::new();
        put(
            &store,
            tables::EVENT_EXPENSES,
            json!({"date": "2024-06-10", "category": "travel", "concept": "Bus", "amount": 80.0,
                   "payment_method": null, "notes": null, "event_id": "e1"}),
        )
        .await;
        put(
            &store,
            tables::EVENT_SALES,
            json!({"date": "2024-06-02", "customer": null, "product_name": "Poster", "unit_price": 0.0,
                   "quantity": 1.0, "total": 100.0, "payment_method": "cash", "notes": null, "event_id": "e1"}),
        )
        .await;
        put(
            &store,
            tables::PAYMENTS,
            json!({"billing_date": "2024-06-01", "paid_date": "2024-06-05", "amount": 299.0,
                   "status": "pending", "method": null, "notes": null, "subscriber_id": "s1"}),
        )
        .await;
        put(
            &store,
            tables::PAYMENTS,
            json!({"billing_date": "2024-06-01", "paid_date": "2024-06-06", "amount": 299.0,
                   "status": "paid", "method": null, "notes": null, "subscriber_id": "s1"}),
        )
        .await;
        put(
            &store,
            tables::EVENT_SALES,
            json!({"date": "2024-07-01", "customer": null, "product_name": null, "unit_price": 0.0,
                   "quantity": 1.0, "total": 50.0, "payment_method": "cash", "notes": null}),
        )
        .await;

        let transactions = collect_transactions(&store, date(1), date(30)).await.unwrap();
        let summary: Vec<(NaiveDate, TransactionType, f64)> = transactions
            .iter()
            .map(|t| (t.date, t.kind, t.amount))
            .collect();

        assert_eq!(
            summary,
            vec![
                (date(2), TransactionType::Income, 100.0),
                (date(6), TransactionType::Income, 299.0),
                (date(10), TransactionType::Outflow, 80.0),
            ]
        );
        assert_eq!(transactions[0].description, "Venta evento: Poster");
        assert_eq!(transactions[2].description, "Gasto: Bus");
    }

    #[tokio::test]
    async fn test_inverted_range_is_rejected() {
        let store = MemoryStore::new();
        let err = collect_transactions(&store, date(10), date(1)).await.unwrap_err();
        assert!(matches!(err, IntakeError::InvalidPeriod(_)));
    }
}
