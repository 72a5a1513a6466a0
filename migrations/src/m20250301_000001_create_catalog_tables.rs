use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000001_create_catalog_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Products::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Products::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Products::VendorId).uuid().not_null())
                    .col(ColumnDef::new(Products::Name).string().not_null())
                    .col(ColumnDef::new(Products::PriceCents).big_integer().not_null())
                    .col(
                        ColumnDef::new(Products::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Products::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Offers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Offers::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Offers::ProductId).uuid().not_null())
                    .col(ColumnDef::new(Offers::Name).string().not_null())
                    .col(ColumnDef::new(Offers::PriceCents).big_integer().not_null())
                    .col(
                        ColumnDef::new(Offers::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_offers_product")
                            .from(Offers::Table, Offers::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Checkouts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Checkouts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Checkouts::ProductId).uuid().not_null())
                    .col(ColumnDef::new(Checkouts::Name).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_checkouts_product")
                            .from(Checkouts::Table, Checkouts::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderBumps::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(OrderBumps::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(OrderBumps::ProductId).uuid().not_null())
                    .col(ColumnDef::new(OrderBumps::BumpProductId).uuid().not_null())
                    .col(ColumnDef::new(OrderBumps::OfferId).uuid().null())
                    .col(
                        ColumnDef::new(OrderBumps::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Affiliates::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Affiliates::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Affiliates::ProductId).uuid().not_null())
                    .col(
                        ColumnDef::new(Affiliates::CommissionPercent)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Affiliates::RecipientId).string().null())
                    .col(
                        ColumnDef::new(Affiliates::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Affiliates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OrderBumps::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Checkouts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Offers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Products {
    Table,
    Id,
    VendorId,
    Name,
    PriceCents,
    Active,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Offers {
    Table,
    Id,
    ProductId,
    Name,
    PriceCents,
    Active,
}

#[derive(DeriveIden)]
enum Checkouts {
    Table,
    Id,
    ProductId,
    Name,
}

#[derive(DeriveIden)]
enum OrderBumps {
    Table,
    Id,
    ProductId,
    BumpProductId,
    OfferId,
    Active,
}

#[derive(DeriveIden)]
enum Affiliates {
    Table,
    Id,
    ProductId,
    CommissionPercent,
    RecipientId,
    Active,
}
