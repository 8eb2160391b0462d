use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_inventory_items_table::Migration),
            Box::new(m20240101_000002_create_batches_table::Migration),
            Box::new(m20240101_000003_create_batch_movements_table::Migration),
            Box::new(m20240101_000004_create_orders_table::Migration),
            Box::new(m20240101_000005_create_order_items_table::Migration),
            Box::new(m20240101_000006_create_order_fulfillments_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_inventory_items_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_inventory_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryItems::PharmacyId).uuid().not_null())
                        .col(ColumnDef::new(InventoryItems::Name).string().not_null())
                        .col(ColumnDef::new(InventoryItems::BrandName).string().null())
                        .col(ColumnDef::new(InventoryItems::Form).string().null())
                        .col(
                            ColumnDef::new(InventoryItems::Price)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::Stock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryItems::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_items_pharmacy_id")
                        .table(InventoryItems::Table)
                        .col(InventoryItems::PharmacyId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryItems {
        Table,
        Id,
        PharmacyId,
        Name,
        BrandName,
        Form,
        Price,
        Stock,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_batches_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_batches_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Batches::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Batches::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Batches::InventoryId).uuid().not_null())
                        .col(ColumnDef::new(Batches::PharmacyId).uuid().not_null())
                        .col(ColumnDef::new(Batches::BatchCode).string().not_null())
                        .col(
                            ColumnDef::new(Batches::ManufacturingDate)
                                .date()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Batches::ExpiryDate).date().not_null())
                        .col(ColumnDef::new(Batches::Quantity).integer().not_null())
                        .col(ColumnDef::new(Batches::RemainingQty).integer().not_null())
                        .col(ColumnDef::new(Batches::CreatedBy).uuid().null())
                        .col(ColumnDef::new(Batches::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Batches::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_batches_inventory_id")
                        .table(Batches::Table)
                        .col(Batches::InventoryId)
                        .to_owned(),
                )
                .await?;

            // FEFO scans filter by pharmacy and order by expiry
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_batches_pharmacy_expiry")
                        .table(Batches::Table)
                        .col(Batches::PharmacyId)
                        .col(Batches::ExpiryDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_batches_item_code")
                        .table(Batches::Table)
                        .col(Batches::InventoryId)
                        .col(Batches::BatchCode)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Batches::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Batches {
        Table,
        Id,
        InventoryId,
        PharmacyId,
        BatchCode,
        ManufacturingDate,
        ExpiryDate,
        Quantity,
        RemainingQty,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_batch_movements_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_batch_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(BatchMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BatchMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BatchMovements::BatchId).uuid().not_null())
                        .col(
                            ColumnDef::new(BatchMovements::MovementType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BatchMovements::QuantityDelta)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BatchMovements::OrderId).uuid().null())
                        .col(ColumnDef::new(BatchMovements::PerformedBy).uuid().null())
                        .col(
                            ColumnDef::new(BatchMovements::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_batch_movements_batch_id")
                        .table(BatchMovements::Table)
                        .col(BatchMovements::BatchId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BatchMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum BatchMovements {
        Table,
        Id,
        BatchId,
        MovementType,
        QuantityDelta,
        OrderId,
        PerformedBy,
        CreatedAt,
    }
}

mod m20240101_000004_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::PatientId).uuid().null())
                        .col(ColumnDef::new(Orders::PharmacyId).uuid().not_null())
                        .col(
                            ColumnDef::new(Orders::TotalPrice)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(ColumnDef::new(Orders::InitiatorType).string().not_null())
                        .col(
                            ColumnDef::new(Orders::AcceptanceStatus)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::AcceptanceDeadline)
                                .timestamp()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::FulfillmentStatus)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_pharmacy_status")
                        .table(Orders::Table)
                        .col(Orders::PharmacyId)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_created_at")
                        .table(Orders::Table)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        PatientId,
        PharmacyId,
        TotalPrice,
        Status,
        InitiatorType,
        AcceptanceStatus,
        AcceptanceDeadline,
        FulfillmentStatus,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000005_create_order_items_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::InventoryId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::PriceAtTime)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        InventoryId,
        Quantity,
        PriceAtTime,
        CreatedAt,
    }
}

mod m20240101_000006_create_order_fulfillments_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_order_fulfillments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderFulfillments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderFulfillments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderFulfillments::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(OrderFulfillments::InventoryId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderFulfillments::BatchId).uuid().not_null())
                        .col(
                            ColumnDef::new(OrderFulfillments::RequestedQty)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderFulfillments::FulfilledQty)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderFulfillments::Notes).string().null())
                        .col(ColumnDef::new(OrderFulfillments::FulfilledBy).uuid().null())
                        .col(
                            ColumnDef::new(OrderFulfillments::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_fulfillments_order_id")
                        .table(OrderFulfillments::Table)
                        .col(OrderFulfillments::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderFulfillments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderFulfillments {
        Table,
        Id,
        OrderId,
        InventoryId,
        BatchId,
        RequestedQty,
        FulfilledQty,
        Notes,
        FulfilledBy,
        CreatedAt,
    }
}
