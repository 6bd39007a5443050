//! PayPal subscriptions.

mod client;
mod config;
mod webhook;

pub use client::{BillingInfo, CycleExecution, PaypalClient, PaypalSubscription, TransmissionHeaders};
pub use config::PaypalConfig;
pub use webhook::{PaypalAction, PaypalEvent, activation_change, map_status, plan_type, reconcile};
