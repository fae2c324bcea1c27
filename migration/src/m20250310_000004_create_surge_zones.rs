use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SurgeZone::Table)
                    .if_not_exists()
                    .col(pk_auto(SurgeZone::Id))
                    .col(string_len(SurgeZone::Name, 100).not_null())
                    .col(double(SurgeZone::CenterLat).not_null())
                    .col(double(SurgeZone::CenterLng).not_null())
                    .col(double(SurgeZone::RadiusKm).not_null())
                    .col(double(SurgeZone::Multiplier).not_null())
                    // Optional daily window, both ends inclusive
                    .col(time_null(SurgeZone::StartTime))
                    .col(time_null(SurgeZone::EndTime))
                    .col(boolean(SurgeZone::IsActive).not_null().default(true))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SurgeZone::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum SurgeZone {
    Table,
    Id,
    Name,
    CenterLat,
    CenterLng,
    RadiusKm,
    Multiplier,
    StartTime,
    EndTime,
    IsActive,
}
