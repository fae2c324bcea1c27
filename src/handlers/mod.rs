pub mod admin;
pub mod driver;
pub mod fare;
pub mod rider;
