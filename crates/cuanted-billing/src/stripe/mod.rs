//! Stripe subscriptions.

mod client;
mod config;
mod signature;
mod webhook;

pub use client::{CheckoutParams, CheckoutSession, Customer, PortalSession, StripeClient, Subscription};
pub use config::StripeConfig;
pub use signature::verify_signature;
pub use webhook::{StripeEvent, plan_for_status, reconcile};
