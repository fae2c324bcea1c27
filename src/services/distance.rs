//! Road distance and travel time between two coordinates.
//!
//! An external distance-matrix provider is tried first when configured. Any
//! failure, or no provider at all, falls back to the great-circle distance
//! inflated by [`ROAD_DISTANCE_FACTOR`] at [`URBAN_SPEED_KMH`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Timelike;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::geo::haversine_distance;

/// Straight-line to road distance inflation.
pub const ROAD_DISTANCE_FACTOR: f64 = 1.3;

/// Assumed average speed in town.
pub const URBAN_SPEED_KMH: f64 = 30.0;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Provider,
    Haversine,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_seconds: f64,
    pub source: RouteSource,
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("routing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("routing provider error: {0}")]
    Api(String),

    #[error("no route between the given points")]
    NoRoute,
}

/// External routing API.
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn route(
        &self,
        origin: (f64, f64),
        destination: (f64, f64),
    ) -> Result<RouteEstimate, RoutingError>;
}

/// Client for a Google-style distance matrix endpoint.
#[derive(Debug, Clone)]
pub struct DistanceMatrixClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl DistanceMatrixClient {
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, RoutingError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    distance: Option<MatrixValue>,
    duration: Option<MatrixValue>,
}

#[derive(Debug, Deserialize)]
struct MatrixValue {
    value: f64,
}

#[async_trait]
impl RoutingProvider for DistanceMatrixClient {
    async fn route(
        &self,
        origin: (f64, f64),
        destination: (f64, f64),
    ) -> Result<RouteEstimate, RoutingError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|err| RoutingError::Api(format!("invalid routing URL: {}", err)))?;

        url.query_pairs_mut()
            .append_pair("origins", &format!("{},{}", origin.0, origin.1))
            .append_pair("destinations", &format!("{},{}", destination.0, destination.1))
            .append_pair("mode", "driving")
            .append_pair("key", &self.api_key);

        let response: MatrixResponse = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != "OK" {
            return Err(RoutingError::Api(
                response.error_message.unwrap_or(response.status),
            ));
        }

        let element = response
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.elements.into_iter().next())
            .ok_or(RoutingError::NoRoute)?;

        match (element.status.as_str(), element.distance, element.duration) {
            ("OK", Some(distance), Some(duration)) => Ok(RouteEstimate {
                distance_km: distance.value / 1000.0,
                duration_seconds: duration.value,
                source: RouteSource::Provider,
            }),
            _ => Err(RoutingError::NoRoute),
        }
    }
}

#[derive(Clone, Default)]
pub struct RouteEstimator {
    provider: Option<Arc<dyn RoutingProvider>>,
}

impl RouteEstimator {
    pub fn new(provider: Option<Arc<dyn RoutingProvider>>) -> Self {
        Self { provider }
    }

    /// Never fails: provider errors degrade to [`fallback_route`].
    pub async fn estimate_route(
        &self,
        origin_lat: f64,
        origin_lng: f64,
        dest_lat: f64,
        dest_lng: f64,
    ) -> RouteEstimate {
        if let Some(provider) = &self.provider {
            match provider
                .route((origin_lat, origin_lng), (dest_lat, dest_lng))
                .await
            {
                Ok(route) => return route,
                Err(err) => {
                    tracing::warn!(error = %err, "Routing provider failed, using Haversine estimate");
                }
            }
        }

        fallback_route(origin_lat, origin_lng, dest_lat, dest_lng)
    }
}

pub fn fallback_route(origin_lat: f64, origin_lng: f64, dest_lat: f64, dest_lng: f64) -> RouteEstimate {
    let distance_km =
        haversine_distance(origin_lat, origin_lng, dest_lat, dest_lng) * ROAD_DISTANCE_FACTOR;

    RouteEstimate {
        distance_km,
        duration_seconds: distance_km / URBAN_SPEED_KMH * 3600.0,
        source: RouteSource::Haversine,
    }
}

/// Duration multiplier for the local hour: rush hours [07,09) and [17,19)
/// run 1.5x longer, nights [22,05) run at 0.8x.
pub fn traffic_factor(hour: u32) -> f64 {
    match hour {
        7..=8 | 17..=18 => 1.5,
        22..=23 | 0..=4 => 0.8,
        _ => 1.0,
    }
}

/// Travel time for `base_distance_km` at the urban speed, adjusted for the
/// hour of `at`.
pub fn apply_traffic_adjustment<T: Timelike>(base_distance_km: f64, at: &T) -> f64 {
    base_distance_km / URBAN_SPEED_KMH * 3600.0 * traffic_factor(at.hour())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;

    struct FailingProvider;

    #[async_trait]
    impl RoutingProvider for FailingProvider {
        async fn route(&self, _: (f64, f64), _: (f64, f64)) -> Result<RouteEstimate, RoutingError> {
            Err(RoutingError::Api("OVER_QUERY_LIMIT".to_string()))
        }
    }

    struct FixedProvider;

    #[async_trait]
    impl RoutingProvider for FixedProvider {
        async fn route(&self, _: (f64, f64), _: (f64, f64)) -> Result<RouteEstimate, RoutingError> {
            Ok(RouteEstimate {
                distance_km: 12.0,
                duration_seconds: 1500.0,
                source: RouteSource::Provider,
            })
        }
    }

    const PICKUP: (f64, f64) = (-6.7924, 39.2083);
    const DROPOFF: (f64, f64) = (-6.8162, 39.2803);

    #[tokio::test]
    async fn unconfigured_provider_uses_inflated_haversine() {
        let route = RouteEstimator::default()
            .estimate_route(PICKUP.0, PICKUP.1, DROPOFF.0, DROPOFF.1)
            .await;

        let expected = haversine_distance(PICKUP.0, PICKUP.1, DROPOFF.0, DROPOFF.1) * 1.3;
        assert!((route.distance_km - expected).abs() < 0.01);
        assert_eq!(route.source, RouteSource::Haversine);
        assert!((route.duration_seconds - expected / 30.0 * 3600.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn provider_failure_falls_back() {
        let estimator = RouteEstimator::new(Some(Arc::new(FailingProvider)));

        let route = estimator
            .estimate_route(PICKUP.0, PICKUP.1, DROPOFF.0, DROPOFF.1)
            .await;

        assert_eq!(route, fallback_route(PICKUP.0, PICKUP.1, DROPOFF.0, DROPOFF.1));
    }

    #[tokio::test]
    async fn provider_result_is_used_when_available() {
        let estimator = RouteEstimator::new(Some(Arc::new(FixedProvider)));

        let route = estimator
            .estimate_route(PICKUP.0, PICKUP.1, DROPOFF.0, DROPOFF.1)
            .await;

        assert_eq!(route.source, RouteSource::Provider);
        assert_eq!(route.distance_km, 12.0);
    }

    #[test]
    fn traffic_adjustment_by_hour() {
        let at = |h| NaiveTime::from_hms_opt(h, 30, 0).unwrap();

        // 15 km at 30 km/h is half an hour
        assert_eq!(apply_traffic_adjustment(15.0, &at(12)), 1800.0);
        assert_eq!(apply_traffic_adjustment(15.0, &at(7)), 2700.0);
        assert_eq!(apply_traffic_adjustment(15.0, &at(18)), 2700.0);
        assert_eq!(apply_traffic_adjustment(15.0, &at(23)), 1440.0);
        assert_eq!(apply_traffic_adjustment(15.0, &at(3)), 1440.0);
        assert_eq!(apply_traffic_adjustment(15.0, &at(9)), 1800.0);
        assert_eq!(apply_traffic_adjustment(15.0, &at(5)), 1800.0);
    }
}
