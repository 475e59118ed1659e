//! Read-side KPIs over persisted records.
//!
//! Every function here is a stateless read + reduce: callers pass the year,
//! month window, period or entity id they want. Any ratio whose denominator
//! is zero resolves to 0. Percentages are on a 0-100 scale.

use crate::error::Result;
use crate::schema::*;
use crate::store::{fetch, fetch_by_id, from_row, sum_column, tables, Direction, Query, Store};
use crate::utils::{safe_percentage, safe_ratio, MonthWindow, Period};
use chrono::NaiveDate;
use futures::future::try_join_all;
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn date_range(field: &str, start: NaiveDate, end: NaiveDate) -> Query {
    Query::new().between(field, start.to_string(), end.to_string())
}

fn window_range(field: &str, window: MonthWindow) -> Query {
    date_range(field, window.start(), window.end())
}

pub async fn monthly_quota<S>(store: &S, window: MonthWindow) -> Result<Option<MonthlyQuota>>
where
    S: Store + ?Sized,
{
    let query = Query::new()
        .eq("year", window.year)
        .eq("month", window.month)
        .limit(1);
    let rows = store.select(tables::MONTHLY_QUOTAS, &query).await?;
    match rows.into_iter().next() {
        Some(row) => Ok(Some(from_row::<MonthlyQuota>(row)?.record)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Monthly cash flow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyCashFlow {
    pub window: MonthWindow,
    pub label: String,
    #[schemars(description = "Event sales plus online sales")]
    pub income: f64,
    #[schemars(description = "Event expenses")]
    pub outflow: f64,
    pub net: f64,
    #[schemars(description = "Sales target from the month's quota, 0 when none is set")]
    pub sales_target: f64,
}

/// Twelve entries, January to December, queried concurrently.
pub async fn monthly_cash_flow<S>(store: &S, year: i32) -> Result<Vec<MonthlyCashFlow>>
where
    S: Store + ?Sized,
{
    info!("Computing monthly cash flow for {}", year);
    let months = Period::year(year).months();
    try_join_all(months.into_iter().map(|window| cash_flow_for(store, window))).await
}

async fn cash_flow_for<S>(store: &S, window: MonthWindow) -> Result<MonthlyCashFlow>
where
    S: Store + ?Sized,
{
    let in_month = window_range("date", window);
    let event_sales = sum_column(store, tables::EVENT_SALES, "total", &in_month).await?;
    let online_sales = sum_column(store, tables::ONLINE_SALES, "total", &in_month).await?;
    let outflow = sum_column(store, tables::EVENT_EXPENSES, "amount", &in_month).await?;
    let sales_target = monthly_quota(store, window)
        .await?
        .map(|q| q.sales_target)
        .unwrap_or(0.0);

    let income = event_sales + online_sales;
    Ok(MonthlyCashFlow {
        window,
        label: window.label().to_string(),
        income,
        outflow,
        net: income - outflow,
        sales_target,
    })
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExpenseBreakdown {
    pub personnel: f64,
    pub travel: f64,
    pub operations: f64,
    pub fee: f64,
    pub other: f64,
}

impl ExpenseBreakdown {
    pub fn add(&mut self, category: ExpenseCategory, amount: f64) {
        let slot = match category {
            ExpenseCategory::Personnel => &mut self.personnel,
            ExpenseCategory::Travel => &mut self.travel,
            ExpenseCategory::Operations => &mut self.operations,
            ExpenseCategory::Fee => &mut self.fee,
            ExpenseCategory::Other => &mut self.other,
        };
        *slot += amount;
    }

    pub fn total(&self) -> f64 {
        self.personnel + self.travel + self.operations + self.fee + self.other
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventKpis {
    pub event_id: RecordId,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub attendance: Option<u32>,
    pub total_sales: f64,
    pub total_expenses: f64,
    pub profit: f64,
    #[schemars(description = "Profit over sales, in percent; 0 without sales")]
    pub margin_pct: f64,
    pub transactions: usize,
    pub average_ticket: f64,
    pub expenses_by_category: ExpenseBreakdown,
}

impl EventKpis {
    pub fn from_records(event_id: RecordId, event: &Event, sales: &[Sale], expenses: &[Expense]) -> Self {
        let total_sales: f64 = sales.iter().map(|s| s.total).sum();
        let mut expenses_by_category = ExpenseBreakdown::default();
        for expense in expenses {
            expenses_by_category.add(expense.category, expense.amount);
        }
        let total_expenses = expenses_by_category.total();
        let profit = total_sales - total_expenses;

        Self {
            event_id,
            name: event.name.clone(),
            start_date: event.start_date,
            attendance: event.attendance,
            total_sales,
            total_expenses,
            profit,
            margin_pct: safe_percentage(profit, total_sales),
            transactions: sales.len(),
            average_ticket: safe_ratio(total_sales, sales.len() as f64),
            expenses_by_category,
        }
    }
}

pub async fn event_kpis<S>(store: &S, event_id: &RecordId) -> Result<EventKpis>
where
    S: Store + ?Sized,
{
    let event = fetch_by_id::<Event, _>(store, tables::EVENTS, event_id).await?;
    kpis_for_event(store, event).await
}

/// KPIs for the most recent events by start date.
pub async fn recent_event_kpis<S>(store: &S, limit: usize) -> Result<Vec<EventKpis>>
where
    S: Store + ?Sized,
{
    let query = Query::new()
        .order_by("start_date", Direction::Descending)
        .limit(limit);
    let events = fetch::<Event, _>(store, tables::EVENTS, &query).await?;
    debug!("Computing KPIs for {} recent events", events.len());
    try_join_all(events.into_iter().map(|event| kpis_for_event(store, event))).await
}

async fn kpis_for_event<S>(store: &S, event: Stored<Event>) -> Result<EventKpis>
where
    S: Store + ?Sized,
{
    let by_event = Query::new().eq("event_id", event.id.as_str());
    let sales = fetch::<Sale, _>(store, tables::EVENT_SALES, &by_event).await?;
    let expenses = fetch::<Expense, _>(store, tables::EVENT_EXPENSES, &by_event).await?;

    let sales: Vec<Sale> = sales.into_iter().map(|s| s.record).collect();
    let expenses: Vec<Expense> = expenses.into_iter().map(|e| e.record).collect();
    Ok(EventKpis::from_records(event.id, &event.record, &sales, &expenses))
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanBreakdown {
    pub plan_id: RecordId,
    pub name: String,
    pub monthly_price: f64,
    pub active_subscribers: usize,
    #[schemars(description = "Active subscribers times the plan's monthly price")]
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubscriptionKpis {
    pub window: MonthWindow,
    pub active_subscribers: usize,
    pub started: usize,
    pub cancelled: usize,
    #[schemars(description = "Cancelled in the window over active subscribers, in percent")]
    pub churn_rate_pct: f64,
    #[schemars(description = "Paid subscription payments whose paid date falls in the window")]
    pub mrr: f64,
    pub unlock_revenue: f64,
    pub inventory_revenue: f64,
    pub inventory_cost: f64,
    pub subscriber_target: f64,
    pub plans: Vec<PlanBreakdown>,
}

pub async fn subscription_kpis<S>(store: &S, window: MonthWindow) -> Result<SubscriptionKpis>
where
    S: Store + ?Sized,
{
    let active = fetch::<Subscriber, _>(
        store,
        tables::SUBSCRIBERS,
        &Query::new().eq("status", "active"),
    )
    .await?;
    let started = store
        .count(tables::SUBSCRIBERS, &window_range("start_date", window))
        .await?;
    let cancelled = store
        .count(tables::SUBSCRIBERS, &window_range("cancellation_date", window))
        .await?;

    let mrr = sum_column(
        store,
        tables::PAYMENTS,
        "amount",
        &window_range("paid_date", window).eq("status", "paid"),
    )
    .await?;
    let unlock_revenue =
        sum_column(store, tables::UNLOCKS, "total", &window_range("date", window)).await?;
    let inventory = fetch::<InventorySale, _>(
        store,
        tables::INVENTORY_SALES,
        &window_range("date", window),
    )
    .await?;
    let subscriber_target = monthly_quota(store, window)
        .await?
        .map(|q| q.subscriber_target)
        .unwrap_or(0.0);

    let plans = fetch::<SubscriptionPlan, _>(store, tables::SUBSCRIPTION_PLANS, &Query::new()).await?;
    let mut active_per_plan: BTreeMap<&RecordId, usize> = BTreeMap::new();
    for subscriber in &active {
        if let Some(plan_id) = &subscriber.record.plan_id {
            *active_per_plan.entry(plan_id).or_insert(0) += 1;
        }
    }
    let plans = plans
        .iter()
        .map(|plan| {
            let count = active_per_plan.get(&plan.id).copied().unwrap_or(0);
            PlanBreakdown {
                plan_id: plan.id.clone(),
                name: plan.record.name.clone(),
                monthly_price: plan.record.monthly_price,
                active_subscribers: count,
                revenue: count as f64 * plan.record.monthly_price,
            }
        })
        .collect();

    Ok(SubscriptionKpis {
        window,
        active_subscribers: active.len(),
        started,
        cancelled,
        churn_rate_pct: safe_percentage(cancelled as f64, active.len() as f64),
        mrr,
        unlock_revenue,
        inventory_revenue: inventory.iter().map(|i| i.record.total_sale).sum(),
        inventory_cost: inventory.iter().map(|i| i.record.total_cost).sum(),
        subscriber_target,
        plans,
    })
}

// ---------------------------------------------------------------------------
// Campaigns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CampaignKpis {
    pub campaign_id: RecordId,
    pub name: String,
    pub campaign_type: CampaignType,
    pub start_date: Option<NaiveDate>,
    pub leads: usize,
    pub converted: usize,
    pub conversion_rate_pct: f64,
    pub spend: f64,
    pub converted_sales: f64,
    pub online_sales: f64,
    #[schemars(description = "Converted-lead sale amounts plus direct online sales")]
    pub total_sales: f64,
    #[schemars(description = "Spend per lead")]
    pub cac: f64,
    #[schemars(description = "Sales per unit of spend")]
    pub roas: f64,
}

impl CampaignKpis {
    pub fn from_records(
        campaign_id: RecordId,
        campaign: &Campaign,
        leads: &[Lead],
        online_sales: &[OnlineSale],
    ) -> Self {
        let converted: Vec<&Lead> = leads.iter().filter(|l| l.converted).collect();
        let converted_sales: f64 = converted.iter().filter_map(|l| l.sale_amount).sum();
        let online_total: f64 = online_sales.iter().map(|s| s.total).sum();
        let total_sales = converted_sales + online_total;
        let spend = campaign.actual_spend;

        Self {
            campaign_id,
            name: campaign.name.clone(),
            campaign_type: campaign.campaign_type,
            start_date: campaign.start_date,
            leads: leads.len(),
            converted: converted.len(),
            conversion_rate_pct: safe_percentage(converted.len() as f64, leads.len() as f64),
            spend,
            converted_sales,
            online_sales: online_total,
            total_sales,
            cac: safe_ratio(spend, leads.len() as f64),
            roas: safe_ratio(total_sales, spend),
        }
    }
}

pub async fn campaign_kpis<S>(store: &S, campaign_id: &RecordId) -> Result<CampaignKpis>
where
    S: Store + ?Sized,
{
    let campaign = fetch_by_id::<Campaign, _>(store, tables::CAMPAIGNS, campaign_id).await?;
    kpis_for_campaign(store, campaign).await
}

pub async fn recent_campaign_kpis<S>(store: &S, limit: usize) -> Result<Vec<CampaignKpis>>
where
    S: Store + ?Sized,
{
    let query = Query::new()
        .order_by("start_date", Direction::Descending)
        .limit(limit);
    let campaigns = fetch::<Campaign, _>(store, tables::CAMPAIGNS, &query).await?;
    try_join_all(
        campaigns
            .into_iter()
            .map(|campaign| kpis_for_campaign(store, campaign)),
    )
    .await
}

async fn kpis_for_campaign<S>(store: &S, campaign: Stored<Campaign>) -> Result<CampaignKpis>
where
    S: Store + ?Sized,
{
    let by_campaign = Query::new().eq("campaign_id", campaign.id.as_str());
    let leads = fetch::<Lead, _>(store, tables::LEADS, &by_campaign).await?;
    let online = fetch::<OnlineSale, _>(store, tables::ONLINE_SALES, &by_campaign).await?;

    let leads: Vec<Lead> = leads.into_iter().map(|l| l.record).collect();
    let online: Vec<OnlineSale> = online.into_iter().map(|s| s.record).collect();
    Ok(CampaignKpis::from_records(
        campaign.id,
        &campaign.record,
        &leads,
        &online,
    ))
}

// ---------------------------------------------------------------------------
// Dashboard and period rollups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IncomeBreakdown {
    pub events: f64,
    #[schemars(description = "Paid subscription payments, by paid date")]
    pub subscriptions: f64,
    pub unlocks: f64,
    pub online: f64,
    pub inventory: f64,
}

impl IncomeBreakdown {
    pub fn total(&self) -> f64 {
        self.events + self.subscriptions + self.unlocks + self.online + self.inventory
    }

    /// Event plus online sales, the figure compared against the sales quota.
    pub fn real_sales(&self) -> f64 {
        self.events + self.online
    }

    fn accumulate(&mut self, other: &IncomeBreakdown) {
        self.events += other.events;
        self.subscriptions += other.subscriptions;
        self.unlocks += other.unlocks;
        self.online += other.online;
        self.inventory += other.inventory;
    }
}

pub async fn income_breakdown<S>(store: &S, window: MonthWindow) -> Result<IncomeBreakdown>
where
    S: Store + ?Sized,
{
    let in_month = window_range("date", window);
    Ok(IncomeBreakdown {
        events: sum_column(store, tables::EVENT_SALES, "total", &in_month).await?,
        subscriptions: sum_column(
            store,
            tables::PAYMENTS,
            "amount",
            &window_range("paid_date", window).eq("status", "paid"),
        )
        .await?,
        unlocks: sum_column(store, tables::UNLOCKS, "total", &in_month).await?,
        online: sum_column(store, tables::ONLINE_SALES, "total", &in_month).await?,
        inventory: sum_column(store, tables::INVENTORY_SALES, "total_sale", &in_month).await?,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DashboardKpis {
    pub window: MonthWindow,
    pub real_sales: f64,
    pub sales_target: f64,
    #[schemars(description = "Real sales over the sales target, in percent; 0 without a target")]
    pub sales_progress_pct: f64,
    pub active_subscribers: usize,
    pub subscriber_target: f64,
    pub income: IncomeBreakdown,
    pub total_income: f64,
}

impl DashboardKpis {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(DashboardKpis)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

pub async fn dashboard_kpis<S>(store: &S, window: MonthWindow) -> Result<DashboardKpis>
where
    S: Store + ?Sized,
{
    let income = income_breakdown(store, window).await?;
    let quota = monthly_quota(store, window).await?;
    let active_subscribers = store
        .count(tables::SUBSCRIBERS, &Query::new().eq("status", "active"))
        .await?;

    let sales_target = quota.as_ref().map(|q| q.sales_target).unwrap_or(0.0);
    let real_sales = income.real_sales();
    Ok(DashboardKpis {
        window,
        real_sales,
        sales_target,
        sales_progress_pct: safe_percentage(real_sales, sales_target),
        active_subscribers,
        subscriber_target: quota.map(|q| q.subscriber_target).unwrap_or(0.0),
        income,
        total_income: income.total(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyIncome {
    pub window: MonthWindow,
    pub income: IncomeBreakdown,
    pub sales_target: f64,
    pub subscriber_target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PeriodRollup {
    pub period: Period,
    pub months: Vec<MonthlyIncome>,
    pub income: IncomeBreakdown,
    pub real_sales: f64,
    pub sales_target: f64,
    pub sales_progress_pct: f64,
    pub subscriber_target: f64,
    pub total_income: f64,
}

/// Quarter or year figures: the sum over every month of the period.
pub async fn period_rollup<S>(store: &S, period: Period) -> Result<PeriodRollup>
where
    S: Store + ?Sized,
{
    let months = try_join_all(period.months().into_iter().map(|window| async move {
        let income = income_breakdown(store, window).await?;
        let quota = monthly_quota(store, window).await?;
        Ok::<_, crate::error::IntakeError>(MonthlyIncome {
            window,
            income,
            sales_target: quota.as_ref().map(|q| q.sales_target).unwrap_or(0.0),
            subscriber_target: quota.map(|q| q.subscriber_target).unwrap_or(0.0),
        })
    }))
    .await?;

    let mut income = IncomeBreakdown::default();
    for month in &months {
        income.accumulate(&month.income);
    }
    let sales_target: f64 = months.iter().map(|m| m.sales_target).sum();
    let subscriber_target: f64 = months.iter().map(|m| m.subscriber_target).sum();
    let real_sales = income.real_sales();

    Ok(PeriodRollup {
        period,
        months,
        income,
        real_sales,
        sales_target,
        sales_progress_pct: safe_percentage(real_sales, sales_target),
        subscriber_target,
        total_income: income.total(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{to_row, MemoryStore};

    fn event() -> Event {
        Event {
            name: "Copa Norte".to_string(),
            sport: None,
            start_date: NaiveDate::from_ymd_opt(2024, 3, 2),
            end_date: None,
            location: None,
            attendance: None,
            entry_fee: 500.0,
            status: EventStatus::Finished,
            notes: None,
        }
    }

    fn campaign(spend: f64) -> Campaign {
        Campaign {
            name: "Lanzamiento".to_string(),
            campaign_type: CampaignType::DirectSale,
            platform: "meta_ads".to_string(),
            start_date: None,
            end_date: None,
            budget: None,
            actual_spend: spend,
            status: CampaignStatus::Finished,
        }
    }

    fn lead(converted: bool, amount: Option<f64>) -> Lead {
        Lead {
            campaign_id: None,
            date: None,
            name: None,
            phone: None,
            email: None,
            converted,
            conversion_date: None,
            sale_amount: amount,
            subscriber_id: None,
            notes: None,
        }
    }

    #[test]
    fn test_event_without_sales_has_zero_ratios() {
        let kpis = EventKpis::from_records(RecordId::from("e1"), &event(), &[], &[]);
        assert_eq!(kpis.margin_pct, 0.0);
        assert_eq!(kpis.average_ticket, 0.0);
        assert_eq!(kpis.profit, 0.0);
    }

    #[test]
    fn test_event_loss_gives_negative_margin() {
        let expense = Expense {
            event_id: None,
            date: None,
            category: ExpenseCategory::Travel,
            concept: "Bus".to_string(),
            amount: 150.0,
            payment_method: None,
            notes: None,
        };
        let sale = Sale {
            event_id: None,
            date: None,
            customer: None,
            product_name: None,
            unit_price: 0.0,
            quantity: 1.0,
            total: 100.0,
            payment_method: PaymentMethod::Cash,
            notes: None,
        };

        let kpis = EventKpis::from_records(RecordId::from("e1"), &event(), &[sale], &[expense]);
        assert_eq!(kpis.profit, -50.0);
        assert_eq!(kpis.margin_pct, -50.0);
        assert_eq!(kpis.expenses_by_category.travel, 150.0);
        assert_eq!(kpis.average_ticket, 100.0);
    }

    #[test]
    fn test_campaign_ratios() {
        let empty = CampaignKpis::from_records(RecordId::from("c1"), &campaign(0.0), &[], &[]);
        assert_eq!(empty.cac, 0.0);
        assert_eq!(empty.roas, 0.0);
        assert_eq!(empty.conversion_rate_pct, 0.0);

        let leads = vec![
            lead(true, Some(300.0)),
            lead(false, None),
            lead(false, Some(999.0)),
            lead(true, None),
        ];
        let kpis = CampaignKpis::from_records(RecordId::from("c1"), &campaign(200.0), &leads, &[]);
        assert_eq!(kpis.leads, 4);
        assert_eq!(kpis.converted, 2);
        assert_eq!(kpis.conversion_rate_pct, 50.0);
        assert_eq!(kpis.converted_sales, 300.0);
        assert_eq!(kpis.cac, 50.0);
        assert_eq!(kpis.roas, 1.5);
    }

    #[tokio::test]
    async fn test_empty_year_has_twelve_months_with_quota() {
        let store = MemoryStore::new();
        let quota = MonthlyQuota {
            year: 2023,
            month: 4,
            sales_target: 5000.0,
            subscriber_target: 30.0,
        };
        store
            .insert(tables::MONTHLY_QUOTAS, to_row(&quota).unwrap())
            .await
            .unwrap();

        let flow = monthly_cash_flow(&store, 2023).await.unwrap();
        assert_eq!(flow.len(), 12);
        for (idx, month) in flow.iter().enumerate() {
            assert_eq!(month.window.month, idx as u32 + 1);
            assert_eq!(month.income, 0.0);
            assert_eq!(month.outflow, 0.0);
            let expected = if month.window.month == 4 { 5000.0 } else { 0.0 };
            assert_eq!(month.sales_target, expected);
        }
        assert_eq!(flow[3].label, "Abr");
    }

    #[tokio::test]
    async fn test_subscription_churn_without_active_is_zero() {
        let store = MemoryStore::new();
        let window = MonthWindow::new(2024, 2).unwrap();
        let kpis = subscription_kpis(&store, window).await.unwrap();
        assert_eq!(kpis.active_subscribers, 0);
        assert_eq!(kpis.churn_rate_pct, 0.0);
        assert_eq!(kpis.mrr, 0.0);
        assert!(kpis.plans.is_empty());
    }
}
