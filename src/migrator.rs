use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250110_000001_create_stock_items_table::Migration),
            Box::new(m20250110_000002_create_cart_reservations_table::Migration),
            Box::new(m20250110_000003_create_warehouse_entries_table::Migration),
            Box::new(m20250110_000004_create_service_entries_table::Migration),
            Box::new(m20250110_000005_create_cashier_entries_table::Migration),
            Box::new(m20250110_000006_create_sales_records_table::Migration),
        ]
    }
}

// Migration implementations

mod m20250110_000001_create_stock_items_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250110_000001_create_stock_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockItems::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StockItems::Brand).string().not_null())
                        .col(ColumnDef::new(StockItems::PartNumber).string().not_null())
                        .col(ColumnDef::new(StockItems::AltPartNumber).string().null())
                        .col(ColumnDef::new(StockItems::Description).string().null())
                        .col(ColumnDef::new(StockItems::Application).string().null())
                        .col(ColumnDef::new(StockItems::Location).string().null())
                        .col(
                            ColumnDef::new(StockItems::CostPrice)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockItems::SellPrice)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockItems::Available)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockItems::TotalQuantity)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_items_part_number")
                        .table(StockItems::Table)
                        .col(StockItems::PartNumber)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_items_brand")
                        .table(StockItems::Table)
                        .col(StockItems::Brand)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockItems {
        Table,
        Id,
        Brand,
        PartNumber,
        AltPartNumber,
        Description,
        Application,
        Location,
        CostPrice,
        SellPrice,
        Available,
        TotalQuantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250110_000002_create_cart_reservations_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250110_000002_create_cart_reservations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CartReservations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CartReservations::UserId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartReservations::StockItemId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartReservations::Quantity)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartReservations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartReservations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(CartReservations::UserId)
                                .col(CartReservations::StockItemId),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartReservations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CartReservations {
        Table,
        UserId,
        StockItemId,
        Quantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250110_000003_create_warehouse_entries_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250110_000003_create_warehouse_entries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WarehouseEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WarehouseEntries::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(WarehouseEntries::OrderId).string().not_null())
                        .col(
                            ColumnDef::new(WarehouseEntries::UserId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseEntries::StockItemId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseEntries::Quantity)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseEntries::PartNumber)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WarehouseEntries::Description).string().null())
                        .col(
                            ColumnDef::new(WarehouseEntries::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(WarehouseEntries::Location).string().null())
                        .col(
                            ColumnDef::new(WarehouseEntries::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseEntries::ReturnReason)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseEntries::ReturnedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseEntries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseEntries::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_warehouse_entries_order_id")
                        .table(WarehouseEntries::Table)
                        .col(WarehouseEntries::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_warehouse_entries_status")
                        .table(WarehouseEntries::Table)
                        .col(WarehouseEntries::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WarehouseEntries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum WarehouseEntries {
        Table,
        Id,
        OrderId,
        UserId,
        StockItemId,
        Quantity,
        PartNumber,
        Description,
        UnitPrice,
        Location,
        Status,
        ReturnReason,
        ReturnedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250110_000004_create_service_entries_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250110_000004_create_service_entries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ServiceEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ServiceEntries::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(ServiceEntries::OrderId).string().not_null())
                        .col(
                            ColumnDef::new(ServiceEntries::StockItemId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceEntries::Quantity)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceEntries::PartNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceEntries::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ServiceEntries::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceEntries::ReturnedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceEntries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceEntries::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_service_entries_order_id")
                        .table(ServiceEntries::Table)
                        .col(ServiceEntries::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_service_entries_order_item")
                        .table(ServiceEntries::Table)
                        .col(ServiceEntries::OrderId)
                        .col(ServiceEntries::StockItemId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ServiceEntries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ServiceEntries {
        Table,
        Id,
        OrderId,
        StockItemId,
        Quantity,
        PartNumber,
        UnitPrice,
        Status,
        ReturnedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250110_000005_create_cashier_entries_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250110_000005_create_cashier_entries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CashierEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CashierEntries::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(CashierEntries::OrderId).string().not_null())
                        .col(
                            ColumnDef::new(CashierEntries::StockItemId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CashierEntries::Quantity)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CashierEntries::PartNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CashierEntries::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(CashierEntries::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CashierEntries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CashierEntries::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cashier_entries_order_id")
                        .table(CashierEntries::Table)
                        .col(CashierEntries::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cashier_entries_order_item")
                        .table(CashierEntries::Table)
                        .col(CashierEntries::OrderId)
                        .col(CashierEntries::StockItemId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CashierEntries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CashierEntries {
        Table,
        Id,
        OrderId,
        StockItemId,
        Quantity,
        PartNumber,
        UnitPrice,
        Status,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250110_000006_create_sales_records_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250110_000006_create_sales_records_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SalesRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SalesRecords::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(SalesRecords::OrderId).string().not_null())
                        .col(
                            ColumnDef::new(SalesRecords::StockItemId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SalesRecords::Quantity)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SalesRecords::PartNumber)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SalesRecords::Brand).string().not_null())
                        .col(
                            ColumnDef::new(SalesRecords::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SalesRecords::TotalAmount)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SalesRecords::PaymentMethod)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SalesRecords::SoldAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sales_records_order_id")
                        .table(SalesRecords::Table)
                        .col(SalesRecords::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sales_records_sold_at")
                        .table(SalesRecords::Table)
                        .col(SalesRecords::SoldAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sales_records_part_number")
                        .table(SalesRecords::Table)
                        .col(SalesRecords::PartNumber)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SalesRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum SalesRecords {
        Table,
        Id,
        OrderId,
        StockItemId,
        Quantity,
        PartNumber,
        Brand,
        UnitPrice,
        TotalAmount,
        PaymentMethod,
        SoldAt,
    }
}

// Standalone migration runner for operational tooling
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    let result = Migrator::up(&db, None).await;

    match result {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
