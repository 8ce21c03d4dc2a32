use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ConnectionTrait, Set};
use serde::{Deserialize, Serialize};

/// Authoritative ledger row, one per SKU.
///
/// `available` is the quantity free to reserve right now. `total_quantity`
/// is the size of the conserved pool: available plus everything currently
/// held in carts, the warehouse, downstream stages, and the sales history.
/// Only stock intake and shrinkage adjustments may change it.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub brand: String,
    #[sea_orm(indexed)]
    pub part_number: String,
    #[sea_orm(nullable)]
    pub alt_part_number: Option<String>,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    /// Vehicle fitment, free text.
    #[sea_orm(nullable)]
    pub application: Option<String>,
    #[sea_orm(nullable)]
    pub location: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub cost_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub sell_price: Decimal,
    pub available: i64,
    pub total_quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);
        }
        active_model.updated_at = Set(Some(now));

        Ok(active_model)
    }
}
