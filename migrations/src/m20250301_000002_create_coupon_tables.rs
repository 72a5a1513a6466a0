use sea_orm_migration::prelude::*;

use crate::m20250301_000001_create_catalog_tables::Products;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000002_create_coupon_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Coupons::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Coupons::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Coupons::VendorId).uuid().not_null())
                    .col(ColumnDef::new(Coupons::Code).string_len(64).not_null())
                    .col(
                        ColumnDef::new(Coupons::DiscountType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Coupons::DiscountValue)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Coupons::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Coupons::StartsAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Coupons::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Coupons::MaxUses).integer().null())
                    .col(ColumnDef::new(Coupons::MaxUsesPerCustomer).integer().null())
                    .col(
                        ColumnDef::new(Coupons::UsesCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Coupons::ApplyToOrderBumps)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Coupons::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_coupons_vendor_code")
                    .table(Coupons::Table)
                    .col(Coupons::VendorId)
                    .col(Coupons::Code)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CouponProducts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CouponProducts::CouponId).uuid().not_null())
                    .col(ColumnDef::new(CouponProducts::ProductId).uuid().not_null())
                    .primary_key(
                        Index::create()
                            .col(CouponProducts::CouponId)
                            .col(CouponProducts::ProductId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_coupon_products_coupon")
                            .from(CouponProducts::Table, CouponProducts::CouponId)
                            .to(Coupons::Table, Coupons::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_coupon_products_product")
                            .from(CouponProducts::Table, CouponProducts::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CouponProducts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Coupons::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Coupons {
    Table,
    Id,
    VendorId,
    Code,
    DiscountType,
    DiscountValue,
    Active,
    StartsAt,
    ExpiresAt,
    MaxUses,
    MaxUsesPerCustomer,
    UsesCount,
    ApplyToOrderBumps,
    CreatedAt,
}

#[derive(DeriveIden)]
enum CouponProducts {
    Table,
    CouponId,
    ProductId,
}
