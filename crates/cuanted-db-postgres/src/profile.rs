//! Profile storage.
//!
//! Profiles are keyed by the identity provider uid and carry the plan and
//! billing state that Stripe and PayPal webhooks reconcile.

use serde::Serialize;
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::PgRow;
use time::OffsetDateTime;

use crate::update::{BindValue, Column, UpdateSet};
use crate::{PgPool, StorageError, StorageResult};

/// Columns a user may change through `PATCH /api/profile`.
pub const UPDATABLE: &[Column] = &[
    Column::text("first_name"),
    Column::text("last_name"),
    Column::text("username"),
];

const SELECT_COLUMNS: &str = r#"
    id, first_name, last_name, username, plan, is_admin, trial_ends_at,
    stripe_customer_id, stripe_subscription_id, stripe_subscription_status, stripe_current_period_end,
    paypal_subscriber_id, paypal_subscription_id, paypal_plan_type, paypal_status,
    paypal_next_billing_time, paypal_cancel_at_period_end, created_at, updated_at
"#;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProfileRow {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub plan: String,
    pub is_admin: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub stripe_customer_id: Option<String>,
    #[serde(skip_serializing)]
    pub stripe_subscription_id: Option<String>,
    pub stripe_subscription_status: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub stripe_current_period_end: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub paypal_subscriber_id: Option<String>,
    #[serde(skip_serializing)]
    pub paypal_subscription_id: Option<String>,
    pub paypal_plan_type: Option<String>,
    pub paypal_status: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paypal_next_billing_time: Option<OffsetDateTime>,
    pub paypal_cancel_at_period_end: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ProfileRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx_core::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            username: row.try_get("username")?,
            plan: row.try_get("plan")?,
            is_admin: row.try_get("is_admin")?,
            trial_ends_at: row.try_get("trial_ends_at")?,
            stripe_customer_id: row.try_get("stripe_customer_id")?,
            stripe_subscription_id: row.try_get("stripe_subscription_id")?,
            stripe_subscription_status: row.try_get("stripe_subscription_status")?,
            stripe_current_period_end: row.try_get("stripe_current_period_end")?,
            paypal_subscriber_id: row.try_get("paypal_subscriber_id")?,
            paypal_subscription_id: row.try_get("paypal_subscription_id")?,
            paypal_plan_type: row.try_get("paypal_plan_type")?,
            paypal_status: row.try_get("paypal_status")?,
            paypal_next_billing_time: row.try_get("paypal_next_billing_time")?,
            paypal_cancel_at_period_end: row.try_get("paypal_cancel_at_period_end")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Fields accepted when creating or re-saving a profile.
#[derive(Debug, Clone, Default)]
pub struct NewProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

/// How a billing webhook locates the profile it updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKey<'a> {
    Id(&'a str),
    PaypalSubscription(&'a str),
    StripeCustomer(&'a str),
}

impl ProfileKey<'_> {
    fn column(&self) -> &'static str {
        match self {
            ProfileKey::Id(_) => "id",
            ProfileKey::PaypalSubscription(_) => "paypal_subscription_id",
            ProfileKey::StripeCustomer(_) => "stripe_customer_id",
        }
    }

    fn value(&self) -> &str {
        match self {
            ProfileKey::Id(v) | ProfileKey::PaypalSubscription(v) | ProfileKey::StripeCustomer(v) => {
                v
            }
        }
    }
}

/// A set of plan/billing column writes.
///
/// Built by webhook reconciliation and applied with
/// [`ProfileStorage::apply_change`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileChange {
    set: UpdateSet,
}

macro_rules! text_setter {
    ($name:ident) => {
        #[must_use]
        pub fn $name(mut self, value: Option<&str>) -> Self {
            self.set
                .push(stringify!($name), BindValue::Text(value.map(str::to_string)));
            self
        }
    };
}

macro_rules! timestamp_setter {
    ($name:ident) => {
        #[must_use]
        pub fn $name(mut self, value: Option<OffsetDateTime>) -> Self {
            self.set.push(stringify!($name), BindValue::Timestamp(value));
            self
        }
    };
}

impl ProfileChange {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn plan(mut self, plan: &str) -> Self {
        self.set
            .push("plan", BindValue::Text(Some(plan.to_string())));
        self
    }

    #[must_use]
    pub fn paypal_cancel_at_period_end(mut self, value: bool) -> Self {
        self.set
            .push("paypal_cancel_at_period_end", BindValue::Bool(Some(value)));
        self
    }

    text_setter!(stripe_customer_id);
    text_setter!(stripe_subscription_id);
    text_setter!(stripe_subscription_status);
    text_setter!(paypal_subscriber_id);
    text_setter!(paypal_subscription_id);
    text_setter!(paypal_plan_type);
    text_setter!(paypal_status);
    timestamp_setter!(trial_ends_at);
    timestamp_setter!(stripe_current_period_end);
    timestamp_setter!(paypal_next_billing_time);

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn as_update_set(&self) -> &UpdateSet {
        &self.set
    }
}

/// Profile storage operations.
pub struct ProfileStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> ProfileStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, uid: &str) -> StorageResult<Option<ProfileRow>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM profiles WHERE id = $1");
        let row = query(&sql).bind(uid).fetch_optional(self.pool).await?;
        Ok(row.as_ref().map(ProfileRow::from_row).transpose()?)
    }

    pub async fn find_id_by_username(&self, username: &str) -> StorageResult<Option<String>> {
        let row = query("SELECT id FROM profiles WHERE username = $1")
            .bind(username)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(|r| r.try_get("id")).transpose()?)
    }

    pub async fn username_exists(&self, username: &str) -> StorageResult<bool> {
        let row = query("SELECT 1 FROM profiles WHERE username = $1")
            .bind(username)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Returns the first free username in `base`, `base2`, `base3`, ...
    pub async fn unique_username(&self, base: &str) -> StorageResult<String> {
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let candidate = username_candidate(base, attempt);
            if !self.username_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(StorageError::conflict(format!(
            "No free username for base '{base}'"
        )))
    }

    /// Inserts the profile on the free plan or refreshes its names.
    ///
    /// The plan is never written from here; only billing reconciliation moves it.
    pub async fn upsert(&self, uid: &str, profile: &NewProfile) -> StorageResult<String> {
        let row = query(
            r#"
            INSERT INTO profiles (id, first_name, last_name, username, plan)
            VALUES ($1, $2, $3, $4, 'free')
            ON CONFLICT (id) DO UPDATE SET
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                username = COALESCE(EXCLUDED.username, profiles.username),
                updated_at = timezone('utc', now())
            RETURNING id
            "#,
        )
        .bind(uid)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.username)
        .fetch_one(self.pool)
        .await
        .map_err(|e| StorageError::from_unique(e, "Username already taken"))?;

        Ok(row.try_get("id")?)
    }

    /// Applies a user-supplied partial update; `None` when no profile exists.
    pub async fn update(&self, uid: &str, set: &UpdateSet) -> StorageResult<Option<String>> {
        let sql = format!(
            "UPDATE profiles SET {} WHERE id = $1 RETURNING id",
            set.set_clause(2, true)
        );
        let row = set
            .bind_to_query(query(&sql).bind(uid))
            .fetch_optional(self.pool)
            .await
            .map_err(|e| StorageError::from_unique(e, "Username already taken"))?;
        Ok(row.map(|r| r.try_get("id")).transpose()?)
    }

    /// Applies a billing change; returns the uid of the updated profile.
    pub async fn apply_change(
        &self,
        key: ProfileKey<'_>,
        change: &ProfileChange,
    ) -> StorageResult<Option<String>> {
        if change.is_empty() {
            return Ok(None);
        }
        let set = change.as_update_set();
        let sql = format!(
            "UPDATE profiles SET {} WHERE {} = $1 RETURNING id",
            set.set_clause(2, true),
            key.column()
        );
        let row = set
            .bind_to_query(query(&sql).bind(key.value()))
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(|r| r.try_get("id")).transpose()?)
    }

    pub async fn stripe_customer_id(&self, uid: &str) -> StorageResult<Option<String>> {
        let row = query("SELECT stripe_customer_id FROM profiles WHERE id = $1")
            .bind(uid)
            .fetch_optional(self.pool)
            .await?;
        Ok(row
            .map(|r| r.try_get::<Option<String>, _>("stripe_customer_id"))
            .transpose()?
            .flatten())
    }

    pub async fn paypal_subscription_id(&self, uid: &str) -> StorageResult<Option<String>> {
        let row = query("SELECT paypal_subscription_id FROM profiles WHERE id = $1")
            .bind(uid)
            .fetch_optional(self.pool)
            .await?;
        Ok(row
            .map(|r| r.try_get::<Option<String>, _>("paypal_subscription_id"))
            .transpose()?
            .flatten())
    }
}

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Derives a username base from an email's local part.
pub fn username_base(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let cleaned: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect::<String>()
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned
    }
}

/// `base`, `base2`, `base3`, ... for attempts 1, 2, 3, ...
pub fn username_candidate(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        base.to_string()
    } else {
        format!("{base}{attempt}")
    }
}
