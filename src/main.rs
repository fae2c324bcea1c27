use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use sea_orm_migration::MigratorTrait;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ride_dispatch::{
    config::Config,
    db,
    middleware::rate_limit::{create_global_governor, log_request},
    realtime::ConnectionHub,
    repository::SeaOrmStore,
    routes,
    services::{
        dispatch::DispatchCoordinator,
        distance::{DistanceMatrixClient, RouteEstimator, RoutingProvider},
        gateway::DispatchGateway,
        presence::PresenceRegistry,
        pricing::FareEvaluator,
    },
    utils::clock::{Clock, SystemClock},
    AppState,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ride_dispatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!("Starting server at {}", config.server_addr());

    let db = db::connect(&config)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Connected to database");

    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");
    tracing::info!("Migrations complete");

    let store = Arc::new(SeaOrmStore::new(db));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let presence = Arc::new(PresenceRegistry::new());
    let hub = Arc::new(ConnectionHub::new(presence.clone()));

    let fares = Arc::new(FareEvaluator::new(
        store.clone(),
        store.clone(),
        RouteEstimator::new(routing_provider(&config)),
        clock.clone(),
        config.local_offset(),
    ));

    let coordinator = Arc::new(DispatchCoordinator::new(
        presence.clone(),
        store.clone(),
        store.clone(),
        hub.clone(),
        clock.clone(),
        config.dispatch_settings(),
    ));

    let dispatch = Arc::new(DispatchGateway::new(
        coordinator,
        presence,
        store.clone(),
        hub.clone(),
        clock.clone(),
    ));

    spawn_dispatch_sweep(
        dispatch.clone(),
        Duration::from_secs(config.dispatch_sweep_interval_secs),
    );

    let state = AppState {
        config: config.clone(),
        rides: store,
        fares,
        dispatch,
        hub,
        clock,
    };

    let app = routes::create_router(state)
        .layer(middleware::from_fn(log_request))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(create_global_governor());

    let addr: SocketAddr = config.server_addr().parse().expect("Invalid address");
    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}

/// Without a key, or with a client that can't be built, routes fall back to
/// Haversine estimates.
fn routing_provider(config: &Config) -> Option<Arc<dyn RoutingProvider>> {
    let api_key = config.routing_api_key.as_deref()?;

    match DistanceMatrixClient::new(&config.routing_api_url, api_key) {
        Ok(client) => {
            tracing::info!("Routing provider configured");
            Some(Arc::new(client))
        }
        Err(err) => {
            tracing::warn!(error = %err, "Routing provider unavailable, using Haversine estimates");
            None
        }
    }
}

fn spawn_dispatch_sweep(dispatch: Arc<DispatchGateway>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let swept = dispatch.cleanup_expired_requests().await;
            if swept > 0 {
                tracing::warn!(swept, "Dispatch sweep force-exhausted abandoned cascades");
            }
        }
    });
}
