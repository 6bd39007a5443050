//! HTTP server for Cuanted: TradingView alerts to Binance orders, Stripe
//! and PayPal billing, Firebase sessions.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod server;

pub use config::{AppConfig, CacheConfig, LoggingConfig, ServerConfig, ServerInfoConfig};
pub use observability::init_tracing;
pub use server::{AppState, CuantedServer, ServerBuilder, build_app};
