pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod realtime;
pub mod repository;
pub mod routes;
pub mod services;
pub mod utils;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use realtime::ConnectionHub;
use repository::RideRepository;
use services::gateway::DispatchGateway;
use services::pricing::FareEvaluator;
use utils::clock::Clock;

pub use config::Config;
pub use error::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub rides: Arc<dyn RideRepository>,
    pub fares: Arc<FareEvaluator>,
    pub dispatch: Arc<DispatchGateway>,
    pub hub: Arc<ConnectionHub>,
    pub clock: Arc<dyn Clock>,
}
