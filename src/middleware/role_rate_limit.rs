use axum::http::Request;
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder,
    key_extractor::KeyExtractor,
    GovernorError, GovernorLayer,
};
use uuid::Uuid;

use crate::middleware::rate_limit::rate_limit_error_handler;
use crate::utils::jwt::Claims;

/// Keys the limiter on the authenticated user id (claims set by `auth_middleware`)
#[derive(Debug, Clone, Copy)]
pub struct UserIdExtractor;

impl KeyExtractor for UserIdExtractor {
    type Key = Uuid;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let claims = req
            .extensions()
            .get::<Claims>()
            .ok_or(GovernorError::UnableToExtractKey)?;

        Ok(claims.sub)
    }
}

pub type RoleGovernorLayer = GovernorLayer<
    UserIdExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Roles that get a per-user limiter. Admin routes only sit behind the
/// global IP limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitedRole {
    Rider,
    Driver,
}

impl RateLimitedRole {
    /// (milliseconds per replenished token, burst)
    fn quota(self) -> (u64, u32) {
        match self {
            // 250 per minute
            RateLimitedRole::Driver => (240, 250),
            // 100 per minute
            RateLimitedRole::Rider => (600, 100),
        }
    }
}

pub fn create_role_governor(role: RateLimitedRole) -> RoleGovernorLayer {
    let (per_ms, burst) = role.quota();

    let config = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(per_ms)
            .burst_size(burst)
            .key_extractor(UserIdExtractor)
            .finish()
            .expect("role governor configuration is valid"),
    );

    GovernorLayer::new(config).error_handler(rate_limit_error_handler)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::entities::user::UserRole;

    #[test]
    fn key_is_the_authenticated_user() {
        let user_id = Uuid::new_v4();
        let mut request = Request::new(());
        request.extensions_mut().insert(Claims {
            sub: user_id,
            role: UserRole::Rider,
            exp: Utc::now().timestamp() + 60,
            iat: Utc::now().timestamp(),
        });

        assert_eq!(UserIdExtractor.extract(&request).unwrap(), user_id);
    }

    #[test]
    fn anonymous_request_has_no_key() {
        let request = Request::new(());
        assert!(UserIdExtractor.extract(&request).is_err());
    }

    #[test]
    fn drivers_get_a_larger_budget_than_riders() {
        assert!(RateLimitedRole::Driver.quota().1 > RateLimitedRole::Rider.quota().1);
    }
}
