//! Plans and their limits.

use serde::Serialize;
use time::OffsetDateTime;

use cuanted_db_postgres::ProfileRow;

/// Length of the free trial.
pub const TRIAL_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Trial,
    Pro,
    Admin,
}

/// Feature limits of a plan. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    pub name: &'static str,
    pub executions: Option<u32>,
    pub strategies: Option<u32>,
    pub exchanges: Option<u32>,
    pub log_retention: u32,
    pub can_activate_strategies: bool,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Trial => "trial",
            Plan::Pro => "pro",
            Plan::Admin => "admin",
        }
    }

    pub fn limits(&self) -> PlanLimits {
        match self {
            Plan::Free => PlanLimits {
                name: "No subscription",
                executions: Some(0),
                strategies: Some(0),
                exchanges: Some(0),
                log_retention: 0,
                can_activate_strategies: false,
            },
            Plan::Trial => PlanLimits {
                name: "Trial",
                executions: Some(100),
                strategies: Some(1),
                exchanges: Some(1),
                log_retention: 7,
                can_activate_strategies: true,
            },
            Plan::Pro => PlanLimits {
                name: "Pro",
                executions: None,
                strategies: None,
                exchanges: None,
                log_retention: 90,
                can_activate_strategies: true,
            },
            Plan::Admin => PlanLimits {
                name: "Admin",
                ..Plan::Pro.limits()
            },
        }
    }
}

/// The billing columns that decide a plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct BillingSnapshot<'a> {
    pub is_admin: bool,
    pub plan: Option<&'a str>,
    pub paypal_status: Option<&'a str>,
    pub stripe_status: Option<&'a str>,
    pub trial_ends_at: Option<OffsetDateTime>,
}

impl<'a> BillingSnapshot<'a> {
    pub fn from_profile(profile: &'a ProfileRow) -> Self {
        Self {
            is_admin: profile.is_admin,
            plan: Some(profile.plan.as_str()),
            paypal_status: profile.paypal_status.as_deref(),
            stripe_status: profile.stripe_subscription_status.as_deref(),
            trial_ends_at: profile.trial_ends_at,
        }
    }
}

/// Plan in force at `now`. Admin beats paid, paid beats trial.
pub fn effective_plan(snapshot: &BillingSnapshot<'_>, now: OffsetDateTime) -> Plan {
    if snapshot.is_admin {
        return Plan::Admin;
    }
    if snapshot.plan == Some("pro")
        || snapshot.paypal_status == Some("active")
        || snapshot.stripe_status == Some("active")
    {
        return Plan::Pro;
    }
    if snapshot.paypal_status == Some("trialing")
        || snapshot.stripe_status == Some("trialing")
        || snapshot.trial_ends_at.is_some_and(|ends| ends > now)
    {
        return Plan::Trial;
    }
    Plan::Free
}
