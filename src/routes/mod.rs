use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::{admin, driver, fare, rider};
use crate::middleware::auth::{auth_middleware, require_admin, require_driver, require_rider};
use crate::middleware::rate_limit::create_public_governor;
use crate::middleware::role_rate_limit::{create_role_governor, RateLimitedRole};
use crate::realtime::socket::ws_handler;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    let rider_governor = create_role_governor(RateLimitedRole::Rider);
    let driver_governor = create_role_governor(RateLimitedRole::Driver);
    let public_governor = create_public_governor();

    // Public pricing lookups, limited per IP
    let public_routes = Router::new()
        .route("/fares/estimate", post(fare::estimate_fare))
        .route("/surge", get(fare::current_surge))
        .layer(public_governor);

    let rider_routes = Router::new()
        .route("/", post(rider::create_ride))
        .route("/{id}", get(rider::get_ride))
        .route("/{id}/cancel", post(rider::cancel_ride))
        .layer(rider_governor)
        .layer(middleware::from_fn(require_rider))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let driver_routes = Router::new()
        .route("/rides/{id}/accept", post(driver::accept_ride))
        .route("/rides/{id}/reject", post(driver::reject_ride))
        .layer(driver_governor)
        .layer(middleware::from_fn(require_driver))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/drivers/online", get(admin::online_drivers))
        .route("/dispatches", get(admin::active_dispatches))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/ws", get(ws_handler))
        .nest("/api", public_routes)
        .nest("/api/rides", rider_routes)
        .nest("/api/driver", driver_routes)
        .nest("/api/admin", admin_routes)
        .with_state(state)
}
