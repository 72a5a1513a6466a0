use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000003_create_orders_table"
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
                    .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Orders::VendorId).uuid().not_null())
                    .col(ColumnDef::new(Orders::ProductId).uuid().not_null())
                    .col(ColumnDef::new(Orders::OfferId).uuid().null())
                    .col(ColumnDef::new(Orders::CheckoutId).uuid().null())
                    .col(ColumnDef::new(Orders::CustomerName).string().not_null())
                    .col(ColumnDef::new(Orders::CustomerEmail).string().not_null())
                    .col(ColumnDef::new(Orders::CustomerPhone).string().null())
                    .col(ColumnDef::new(Orders::CustomerDocument).string().null())
                    .col(
                        ColumnDef::new(Orders::GrossAmountCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Orders::DiscountAmountCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Orders::NetAmountCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Orders::ApplicationFeeCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Orders::CouponId).uuid().null())
                    .col(ColumnDef::new(Orders::CouponCode).string_len(64).null())
                    .col(ColumnDef::new(Orders::AffiliateId).uuid().null())
                    .col(
                        ColumnDef::new(Orders::PaymentMethod)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Orders::Gateway).string_len(16).not_null())
                    .col(ColumnDef::new(Orders::GatewayPaymentId).string().null())
                    .col(
                        ColumnDef::new(Orders::Status)
                            .string_len(16)
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(
                        ColumnDef::new(Orders::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Orders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Webhook ingestion resolves orders by the gateway-assigned payment id.
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_gateway_payment")
                    .table(Orders::Table)
                    .col(Orders::Gateway)
                    .col(Orders::GatewayPaymentId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Reconciliation scans pending orders inside an age window.
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_status_created_at")
                    .table(Orders::Table)
                    .col(Orders::Status)
                    .col(Orders::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_coupon_customer")
                    .table(Orders::Table)
                    .col(Orders::CouponId)
                    .col(Orders::CustomerEmail)
                    .if_not_exists()
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
    VendorId,
    ProductId,
    OfferId,
    CheckoutId,
    CustomerName,
    CustomerEmail,
    CustomerPhone,
    CustomerDocument,
    GrossAmountCents,
    DiscountAmountCents,
    NetAmountCents,
    ApplicationFeeCents,
    CouponId,
    CouponCode,
    AffiliateId,
    PaymentMethod,
    Gateway,
    GatewayPaymentId,
    Status,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}
