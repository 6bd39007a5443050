//! Subscription billing for Cuanted.
//!
//! - [`plan`] derives a user's effective plan and its limits from the
//!   billing columns on their profile
//! - [`stripe`] creates checkout and portal sessions, verifies webhook
//!   signatures and maps events to profile changes
//! - [`paypal`] does the same for PayPal subscriptions
//!
//! Reconciliation never touches the database directly. It produces a
//! [`Reconciliation`] that the caller applies with
//! `ProfileStorage::apply_change`.

pub mod error;
pub mod paypal;
pub mod plan;
pub mod stripe;

use cuanted_db_postgres::{ProfileChange, ProfileKey};

pub use error::{BillingError, BillingResult};
pub use plan::{BillingSnapshot, Plan, PlanLimits, TRIAL_DAYS, effective_plan};

/// Metadata key that links Stripe objects to a profile id.
pub const USER_ID_METADATA_KEY: &str = "supabase_user_id";

/// The profile a webhook event refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileTarget {
    Id(String),
    StripeCustomer(String),
    PaypalSubscription(String),
}

impl ProfileTarget {
    pub fn as_key(&self) -> ProfileKey<'_> {
        match self {
            ProfileTarget::Id(id) => ProfileKey::Id(id),
            ProfileTarget::StripeCustomer(id) => ProfileKey::StripeCustomer(id),
            ProfileTarget::PaypalSubscription(id) => ProfileKey::PaypalSubscription(id),
        }
    }
}

/// Profile writes produced by a billing event.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub target: ProfileTarget,
    pub change: ProfileChange,
    /// Deactivate every strategy of the matched user.
    pub deactivate_strategies: bool,
}

impl Reconciliation {
    pub fn new(target: ProfileTarget, change: ProfileChange) -> Self {
        Self {
            target,
            change,
            deactivate_strategies: false,
        }
    }

    #[must_use]
    pub fn deactivating_strategies(mut self) -> Self {
        self.deactivate_strategies = true;
        self
    }
}
