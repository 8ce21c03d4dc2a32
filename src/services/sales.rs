use crate::{
    config::AppConfig,
    db::DbPool,
    entities::sales_record::{self, Entity as SalesRecord},
    errors::ServiceError,
    services::Paged,
    ListQuery,
};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
    pub year: i32,
    pub month: u32,
    pub total_sales: Decimal,
    pub sales_count: u64,
}

/// Read side of the sales history. Records are immutable once written, so
/// this service only queries.
#[derive(Clone)]
pub struct SalesService {
    db: Arc<DbPool>,
    config: Arc<AppConfig>,
}

impl SalesService {
    pub fn new(db: Arc<DbPool>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    /// Paginated sales history, newest first. Search matches order id,
    /// part number and brand as substrings, and payment method exactly.
    #[instrument(skip(self, query))]
    pub async fn list_sales(
        &self,
        query: ListQuery,
    ) -> Result<Paged<sales_record::Model>, ServiceError> {
        let limit = self.config.clamp_limit(query.limit);
        let page = query.page.max(1);

        let mut find = SalesRecord::find();
        if let Some(term) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let term = term.trim();
            find = find.filter(
                Condition::any()
                    .add(sales_record::Column::OrderId.contains(term))
                    .add(sales_record::Column::PartNumber.contains(term))
                    .add(sales_record::Column::Brand.contains(term))
                    .add(sales_record::Column::PaymentMethod.eq(term)),
            );
        }
        find = find
            .order_by_desc(sales_record::Column::SoldAt)
            .order_by_desc(sales_record::Column::Id);

        let paginator = find.paginate(self.db.as_ref(), limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(Paged {
            items,
            total,
            page,
            limit,
        })
    }

    /// Sales total and record count for one calendar month, aggregated in
    /// the store.
    #[instrument(skip(self))]
    pub async fn monthly_report(
        &self,
        year: i32,
        month: u32,
    ) -> Result<MonthlyReport, ServiceError> {
        let start = month_start(year, month)?;
        let end = next_month_start(year, month)?;

        let totals = SalesRecord::find()
            .select_only()
            .column_as(Expr::col(sales_record::Column::TotalAmount).sum(), "total")
            .column_as(
                Expr::col((sales_record::Entity, sales_record::Column::Id)).count(),
                "count",
            )
            .filter(sales_record::Column::SoldAt.gte(start))
            .filter(sales_record::Column::SoldAt.lt(end))
            .into_tuple::<(Option<Decimal>, Option<i64>)>()
            .one(self.db.as_ref())
            .await?
            .unwrap_or((None, None));

        Ok(MonthlyReport {
            year,
            month,
            total_sales: totals.0.unwrap_or(Decimal::ZERO),
            sales_count: u64::try_from(totals.1.unwrap_or(0)).unwrap_or(0),
        })
    }
}

fn month_start(year: i32, month: u32) -> Result<DateTime<Utc>, ServiceError> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("Invalid report month: {}-{:02}", year, month))
        })
}

fn next_month_start(year: i32, month: u32) -> Result<DateTime<Utc>, ServiceError> {
    let (year, month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    month_start(year, month)
}
