pub mod dispatch;
pub mod distance;
pub mod gateway;
pub mod presence;
pub mod pricing;
