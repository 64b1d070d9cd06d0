pub mod bootstrap;
pub mod config;
pub mod logging;
pub mod middleware;
pub mod router;

/// Name reported in the start record, the shutdown metrics and the database app name.
pub const SERVICE_NAME: &str = "ecommerce-orders";
