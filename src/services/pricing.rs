//! Fare estimates and surge evaluation.
//!
//! Pure request/response over the pricing and surge-zone stores. Surge lookup
//! never fails the fare: a broken store means no surge.

use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::entities::{pricing_config, surge_zone};
use crate::error::{AppError, AppResult};
use crate::repository::{PricingConfigStore, SurgeZoneStore};
use crate::services::distance::{apply_traffic_adjustment, RouteEstimator};
use crate::utils::clock::Clock;
use crate::utils::geo::is_within_radius;

pub const WEEKEND_NIGHT_MULTIPLIER: f64 = 1.3;
pub const RUSH_HOUR_MULTIPLIER: f64 = 1.2;

const WEEKEND_NIGHT_HOURS: [u32; 7] = [21, 22, 23, 0, 1, 2, 3];
const RUSH_HOURS: [u32; 6] = [7, 8, 9, 17, 18, 19];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurgeStatus {
    pub active: bool,
    pub multiplier: f64,
    pub zone_name: Option<String>,
    pub reason: Option<String>,
}

impl SurgeStatus {
    pub fn inactive() -> Self {
        Self {
            active: false,
            multiplier: 1.0,
            zone_name: None,
            reason: None,
        }
    }

    fn scheduled(multiplier: f64, reason: &str) -> Self {
        Self {
            active: true,
            multiplier,
            zone_name: None,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FareRequest {
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub vehicle_type: String,
}

/// Monetary parts of a fare, each rounded to whole currency units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FareBreakdown {
    pub base_fare: f64,
    pub distance_fare: f64,
    pub time_fare: f64,
    pub surge_fare: f64,
    pub booking_fee: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FareEstimate {
    pub vehicle_type: String,
    pub currency: String,
    pub distance_km: f64,
    pub duration_seconds: f64,
    pub surge_multiplier: f64,
    pub surge_zone: Option<String>,
    pub breakdown: FareBreakdown,
    pub total: f64,
}

pub struct FareEvaluator {
    pricing: Arc<dyn PricingConfigStore>,
    surge_zones: Arc<dyn SurgeZoneStore>,
    routes: RouteEstimator,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl FareEvaluator {
    pub fn new(
        pricing: Arc<dyn PricingConfigStore>,
        surge_zones: Arc<dyn SurgeZoneStore>,
        routes: RouteEstimator,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            pricing,
            surge_zones,
            routes,
            clock,
            offset,
        }
    }

    pub async fn evaluate_surge(&self, lat: f64, lng: f64, at: Option<DateTime<Utc>>) -> SurgeStatus {
        let at = at
            .unwrap_or_else(|| self.clock.now())
            .with_timezone(&self.offset);

        match self.surge_zones.active_zones().await {
            Ok(zones) => surge_for(&zones, lat, lng, &at),
            Err(err) => {
                tracing::warn!(error = %err, "Surge zone lookup failed, pricing without surge");
                SurgeStatus::inactive()
            }
        }
    }

    pub async fn estimate_fare(&self, request: &FareRequest) -> AppResult<FareEstimate> {
        let config = self
            .pricing
            .find_active(&request.vehicle_type)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No pricing configured for vehicle type '{}'",
                    request.vehicle_type
                ))
            })?;

        let now = self.clock.now();
        let route = self
            .routes
            .estimate_route(
                request.pickup_lat,
                request.pickup_lng,
                request.dropoff_lat,
                request.dropoff_lng,
            )
            .await;
        let duration_seconds =
            apply_traffic_adjustment(route.distance_km, &now.with_timezone(&self.offset));

        let surge = self
            .evaluate_surge(request.pickup_lat, request.pickup_lng, Some(now))
            .await;

        Ok(compute_fare(&config, route.distance_km, duration_seconds, &surge))
    }
}

/// First matching zone wins; otherwise the fixed weekly schedule applies.
pub fn surge_for(
    zones: &[surge_zone::Model],
    lat: f64,
    lng: f64,
    at: &DateTime<FixedOffset>,
) -> SurgeStatus {
    let time_of_day = at.time();

    let matched = zones.iter().find(|zone| {
        is_within_radius(lat, lng, zone.center_lat, zone.center_lng, zone.radius_km)
            && match (zone.start_time, zone.end_time) {
                (Some(start), Some(end)) => within_window(start, end, time_of_day),
                _ => true,
            }
    });

    if let Some(zone) = matched {
        return SurgeStatus {
            active: zone.multiplier > 1.0,
            multiplier: zone.multiplier,
            zone_name: Some(zone.name.clone()),
            reason: Some(format!("High demand in {}", zone.name)),
        };
    }

    scheduled_surge(at)
}

pub fn scheduled_surge<T: Datelike + Timelike>(at: &T) -> SurgeStatus {
    let hour = at.hour();
    let day = at.weekday();

    if matches!(day, Weekday::Fri | Weekday::Sat) && WEEKEND_NIGHT_HOURS.contains(&hour) {
        return SurgeStatus::scheduled(WEEKEND_NIGHT_MULTIPLIER, "Weekend night demand");
    }

    let weekday = !matches!(day, Weekday::Sat | Weekday::Sun);
    if weekday && RUSH_HOURS.contains(&hour) {
        return SurgeStatus::scheduled(RUSH_HOUR_MULTIPLIER, "Rush hour demand");
    }

    SurgeStatus::inactive()
}

/// Inclusive window; `start > end` wraps past midnight.
fn within_window(start: NaiveTime, end: NaiveTime, at: NaiveTime) -> bool {
    if start <= end {
        start <= at && at <= end
    } else {
        at >= start || at <= end
    }
}

pub fn compute_fare(
    config: &pricing_config::Model,
    distance_km: f64,
    duration_seconds: f64,
    surge: &SurgeStatus,
) -> FareEstimate {
    let distance_fare = distance_km * config.per_km_rate;
    let time_fare = duration_seconds / 60.0 * config.per_minute_rate;
    let subtotal = config.base_fare + distance_fare + time_fare;
    let surge_fare = subtotal * (surge.multiplier - 1.0);

    // Floor on the unrounded total, then never round below it
    let total = (subtotal + surge_fare + config.booking_fee).max(config.minimum_fare);
    let total = total.round().max(config.minimum_fare.ceil());

    FareEstimate {
        vehicle_type: config.vehicle_type.clone(),
        currency: config.currency.clone(),
        distance_km,
        duration_seconds,
        surge_multiplier: surge.multiplier,
        surge_zone: surge.zone_name.clone(),
        breakdown: FareBreakdown {
            base_fare: config.base_fare.round(),
            distance_fare: distance_fare.round(),
            time_fare: time_fare.round(),
            surge_fare: surge_fare.round(),
            booking_fee: config.booking_fee.round(),
            total,
        },
        total,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::services::distance::fallback_route;
    use crate::test_support::{
        economy_pricing, surge_zone, FailingSurgeZones, ManualClock, StaticPricing, StaticSurgeZones,
    };

    const PICKUP: (f64, f64) = (-6.7924, 39.2083);
    const DROPOFF: (f64, f64) = (-6.8162, 39.2803);

    fn wednesday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, 12, 0, 0).unwrap()
    }

    fn evaluator(zones: Arc<dyn SurgeZoneStore>, now: DateTime<Utc>) -> FareEvaluator {
        FareEvaluator::new(
            Arc::new(StaticPricing::new(vec![economy_pricing()])),
            zones,
            RouteEstimator::default(),
            Arc::new(ManualClock::new(now)),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    fn request(pickup: (f64, f64)) -> FareRequest {
        FareRequest {
            pickup_lat: pickup.0,
            pickup_lng: pickup.1,
            dropoff_lat: DROPOFF.0,
            dropoff_lng: DROPOFF.1,
            vehicle_type: "economy".to_string(),
        }
    }

    #[tokio::test]
    async fn midweek_noon_fare_without_surge() {
        let fares = evaluator(Arc::new(StaticSurgeZones::new(vec![])), wednesday_noon());

        let estimate = fares.estimate_fare(&request(PICKUP)).await.unwrap();

        let route = fallback_route(PICKUP.0, PICKUP.1, DROPOFF.0, DROPOFF.1);
        let config = economy_pricing();
        let expected = (config.base_fare
            + route.distance_km * config.per_km_rate
            + route.duration_seconds / 60.0 * config.per_minute_rate
            + config.booking_fee)
            .max(config.minimum_fare);

        assert_eq!(estimate.surge_multiplier, 1.0);
        assert!((estimate.distance_km - route.distance_km).abs() < 0.01);
        assert_eq!(estimate.duration_seconds, route.duration_seconds);
        assert_eq!(estimate.total, expected.round());
        assert_eq!(estimate.breakdown.surge_fare, 0.0);
    }

    #[tokio::test]
    async fn pickup_inside_zone_gets_zone_multiplier() {
        let zone = surge_zone("Test Zone", (-6.7735, 39.2395), 2.0, 1.2);
        let fares = evaluator(Arc::new(StaticSurgeZones::new(vec![zone])), wednesday_noon());

        let estimate = fares.estimate_fare(&request((-6.7740, 39.2400))).await.unwrap();

        assert_eq!(estimate.surge_multiplier, 1.2);
        assert_eq!(estimate.surge_zone.as_deref(), Some("Test Zone"));
        assert!(estimate.breakdown.surge_fare > 0.0);
    }

    #[tokio::test]
    async fn first_matching_zone_wins() {
        let zones = vec![
            surge_zone("Inner", (-6.7735, 39.2395), 1.0, 1.5),
            surge_zone("Outer", (-6.7735, 39.2395), 5.0, 1.2),
        ];
        let fares = evaluator(Arc::new(StaticSurgeZones::new(zones)), wednesday_noon());

        let surge = fares.evaluate_surge(-6.7735, 39.2395, None).await;

        assert_eq!(surge.multiplier, 1.5);
        assert_eq!(surge.zone_name.as_deref(), Some("Inner"));
    }

    #[tokio::test]
    async fn zone_outside_its_window_is_skipped() {
        let mut zone = surge_zone("Evening", (-6.7735, 39.2395), 2.0, 1.5);
        zone.start_time = NaiveTime::from_hms_opt(18, 0, 0);
        zone.end_time = NaiveTime::from_hms_opt(20, 0, 0);
        let fares = evaluator(Arc::new(StaticSurgeZones::new(vec![zone])), wednesday_noon());

        let noon = fares.evaluate_surge(-6.7735, 39.2395, None).await;
        let evening = fares
            .evaluate_surge(
                -6.7735,
                39.2395,
                Some(Utc.with_ymd_and_hms(2025, 3, 12, 19, 30, 0).unwrap()),
            )
            .await;

        assert_eq!(noon, SurgeStatus::inactive());
        assert_eq!(evening.multiplier, 1.5);
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let start = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(2, 0, 0).unwrap();

        assert!(within_window(start, end, NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(within_window(start, end, NaiveTime::from_hms_opt(1, 0, 0).unwrap()));
        assert!(!within_window(start, end, NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn failing_zone_store_means_no_surge() {
        // Friday 22:00 would otherwise be a scheduled surge
        let friday_night = Utc.with_ymd_and_hms(2025, 3, 14, 22, 0, 0).unwrap();
        let fares = evaluator(Arc::new(FailingSurgeZones), friday_night);

        let surge = fares.evaluate_surge(PICKUP.0, PICKUP.1, None).await;
        assert_eq!(surge, SurgeStatus::inactive());

        let estimate = fares.estimate_fare(&request(PICKUP)).await.unwrap();
        assert_eq!(estimate.surge_multiplier, 1.0);
    }

    #[test]
    fn weekly_schedule() {
        let at = |d, h| Utc.with_ymd_and_hms(2025, 3, d, h, 0, 0).unwrap();

        // 2025-03-14 is a Friday, 15 a Saturday, 16 a Sunday, 12 a Wednesday
        assert_eq!(scheduled_surge(&at(14, 22)).multiplier, 1.3);
        assert_eq!(scheduled_surge(&at(15, 2)).multiplier, 1.3);
        assert_eq!(scheduled_surge(&at(14, 8)).multiplier, 1.2);
        assert_eq!(scheduled_surge(&at(12, 18)).multiplier, 1.2);
        assert_eq!(scheduled_surge(&at(16, 8)), SurgeStatus::inactive());
        assert_eq!(scheduled_surge(&at(15, 8)), SurgeStatus::inactive());
        assert_eq!(scheduled_surge(&at(12, 22)), SurgeStatus::inactive());
        assert_eq!(scheduled_surge(&at(12, 12)), SurgeStatus::inactive());
    }

    #[tokio::test]
    async fn missing_vehicle_type_is_not_found() {
        let fares = evaluator(Arc::new(StaticSurgeZones::new(vec![])), wednesday_noon());
        let mut req = request(PICKUP);
        req.vehicle_type = "helicopter".to_string();

        let err = fares.estimate_fare(&req).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn short_trips_pay_the_minimum_fare() {
        let config = economy_pricing();

        for distance_km in [0.0, 0.1, 0.5, 1.0] {
            let fare = compute_fare(&config, distance_km, distance_km * 120.0, &SurgeStatus::inactive());
            assert!(fare.total >= config.minimum_fare);
            assert!(fare.breakdown.total >= config.minimum_fare);
        }

        let fare = compute_fare(&config, 0.0, 0.0, &SurgeStatus::inactive());
        assert_eq!(fare.total, config.minimum_fare);
    }

    #[test]
    fn fractional_minimum_is_never_undercut_by_rounding() {
        let mut config = economy_pricing();
        config.base_fare = 0.0;
        config.booking_fee = 0.0;
        config.minimum_fare = 2.4;

        let fare = compute_fare(&config, 0.0, 0.0, &SurgeStatus::inactive());
        assert!(fare.total >= 2.4);
    }

    #[test]
    fn surge_applies_to_subtotal_only() {
        let config = economy_pricing();
        let surge = SurgeStatus::scheduled(1.5, "test");

        let fare = compute_fare(&config, 10.0, 1200.0, &surge);

        // 2500 + 8000 + 2000 = 12500 subtotal, half again as surge, plus fee
        assert_eq!(fare.breakdown.surge_fare, 6250.0);
        assert_eq!(fare.total, 12500.0 + 6250.0 + 500.0);
    }
}
