//! HTTP proxy that relays meal photos to a nutrition-analysis webhook and
//! returns the macro breakdown in one canonical JSON shape.

pub mod config;
pub mod models;
pub mod proxy;
pub mod routes;

pub use config::{Config, ConfigError};
pub use proxy::{normalize_response, NutritionProxy, ProxyError};
pub use routes::router;
