pub use sea_orm_migration::prelude::*;

mod m20250310_000001_create_users;
mod m20250310_000002_create_rides;
mod m20250310_000003_create_pricing_configs;
mod m20250310_000004_create_surge_zones;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250310_000001_create_users::Migration),
            Box::new(m20250310_000002_create_rides::Migration),
            Box::new(m20250310_000003_create_pricing_configs::Migration),
            Box::new(m20250310_000004_create_surge_zones::Migration),
        ]
    }
}
