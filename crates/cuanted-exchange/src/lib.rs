//! Binance integration for Cuanted.
//!
//! [`BinanceClient`] wraps the spot and USDT-M futures REST APIs with HMAC
//! request signing. [`validator`] turns a trading signal into an order that
//! respects the symbol's exchange filters and the account's balances.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod types;
pub mod validator;

pub use client::BinanceClient;
pub use config::BinanceEndpoints;
pub use connection::{ConnectionFailure, describe_connection_error};
pub use error::{ExchangeError, ExchangeResult};
pub use types::{MarketType, OrderSide, SymbolFilters, SymbolInfo};
pub use validator::{
    Action, MarketData, Rejection, Signal, SignalRequest, Sizing, ValidatedOrder, validate,
};

/// Exchanges accepted by the API. Only Binance is wired up.
pub const SUPPORTED_EXCHANGES: &[&str] = &["binance"];

pub fn is_supported(exchange: &str) -> bool {
    SUPPORTED_EXCHANGES
        .iter()
        .any(|e| e.eq_ignore_ascii_case(exchange.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_binance_is_supported() {
        assert!(is_supported("binance"));
        assert!(is_supported(" Binance "));
        assert!(!is_supported("kraken"));
    }
}
