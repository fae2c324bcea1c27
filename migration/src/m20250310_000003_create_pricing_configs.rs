use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PricingConfig::Table)
                    .if_not_exists()
                    .col(pk_auto(PricingConfig::Id))
                    .col(string_len(PricingConfig::VehicleType, 32).not_null().unique_key())
                    .col(double(PricingConfig::BaseFare).not_null())
                    .col(double(PricingConfig::PerKmRate).not_null())
                    .col(double(PricingConfig::PerMinuteRate).not_null())
                    .col(double(PricingConfig::BookingFee).not_null())
                    .col(double(PricingConfig::MinimumFare).not_null())
                    .col(string_len(PricingConfig::Currency, 3).not_null().default("TZS"))
                    .col(boolean(PricingConfig::IsActive).not_null().default(true))
                    .to_owned(),
            )
            .await?;

        // Seed the default vehicle types
        let insert = Query::insert()
            .into_table(PricingConfig::Table)
            .columns([
                PricingConfig::VehicleType,
                PricingConfig::BaseFare,
                PricingConfig::PerKmRate,
                PricingConfig::PerMinuteRate,
                PricingConfig::BookingFee,
                PricingConfig::MinimumFare,
            ])
            .values_panic(["boda".into(), (1000.0).into(), (400.0).into(), (50.0).into(), (200.0).into(), (1500.0).into()])
            .values_panic(["bajaji".into(), (1500.0).into(), (550.0).into(), (75.0).into(), (300.0).into(), (2500.0).into()])
            .values_panic(["economy".into(), (2500.0).into(), (800.0).into(), (100.0).into(), (500.0).into(), (4000.0).into()])
            .values_panic(["comfort".into(), (4000.0).into(), (1200.0).into(), (150.0).into(), (500.0).into(), (6000.0).into()])
            .to_owned();

        manager.exec_stmt(insert).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PricingConfig::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum PricingConfig {
    Table,
    Id,
    VehicleType,
    BaseFare,
    PerKmRate,
    PerMinuteRate,
    BookingFee,
    MinimumFare,
    Currency,
    IsActive,
}
