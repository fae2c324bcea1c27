use sea_orm_migration::{prelude::*, schema::*, sea_orm::sea_query::extension::postgres::Type};

use super::m20250310_000001_create_users::User;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(RideStatus::Enum)
                    .values([
                        RideStatus::Requested,
                        RideStatus::Accepted,
                        RideStatus::Cancelled,
                        RideStatus::NoDriversAvailable,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Ride::Table)
                    .if_not_exists()
                    .col(uuid(Ride::Id).primary_key())
                    .col(uuid(Ride::RiderId).not_null())
                    .col(uuid_null(Ride::DriverId))
                    .col(double(Ride::PickupLat).not_null())
                    .col(double(Ride::PickupLng).not_null())
                    .col(string_len(Ride::PickupAddress, 255).not_null())
                    .col(double(Ride::DropoffLat).not_null())
                    .col(double(Ride::DropoffLng).not_null())
                    .col(string_len(Ride::DropoffAddress, 255).not_null())
                    .col(string_len(Ride::VehicleType, 32).not_null())
                    .col(
                        ColumnDef::new(Ride::Status)
                            .custom(RideStatus::Enum)
                            .not_null(),
                    )
                    .col(double_null(Ride::EstimatedFare))
                    .col(double_null(Ride::EstimatedDistanceKm))
                    .col(integer_null(Ride::EstimatedDurationSeconds))
                    .col(double(Ride::SurgeMultiplier).not_null().default(1.0))
                    .col(timestamp_with_time_zone_null(Ride::AcceptedAt))
                    .col(timestamp_with_time_zone_null(Ride::CancelledAt))
                    .col(
                        timestamp_with_time_zone(Ride::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ride_rider")
                            .from(Ride::Table, Ride::RiderId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ride_driver")
                            .from(Ride::Table, Ride::DriverId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Ride::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(RideStatus::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Ride {
    Table,
    Id,
    RiderId,
    DriverId,
    PickupLat,
    PickupLng,
    PickupAddress,
    DropoffLat,
    DropoffLng,
    DropoffAddress,
    VehicleType,
    Status,
    EstimatedFare,
    EstimatedDistanceKm,
    EstimatedDurationSeconds,
    SurgeMultiplier,
    AcceptedAt,
    CancelledAt,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum RideStatus {
    #[sea_orm(iden = "ride_status")]
    Enum,
    #[sea_orm(iden = "requested")]
    Requested,
    #[sea_orm(iden = "accepted")]
    Accepted,
    #[sea_orm(iden = "cancelled")]
    Cancelled,
    #[sea_orm(iden = "no_drivers_available")]
    NoDriversAvailable,
}
