pub mod app_serve;
pub mod health;
pub mod readiness;
