//! Session cookie construction.

use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::config::SessionCookieConfig;

/// HttpOnly, `Path=/`, `SameSite=Lax` cookie carrying the session value.
pub fn session_cookie(config: &SessionCookieConfig, value: String, max_age: Duration) -> Cookie<'static> {
    Cookie::build((config.name.clone(), value))
        .http_only(true)
        .secure(config.secure)
        .path("/")
        .same_site(SameSite::Lax)
        .max_age(cookie_duration(max_age))
        .build()
}

/// Expires the session cookie immediately.
pub fn clear_session_cookie(config: &SessionCookieConfig) -> Cookie<'static> {
    session_cookie(config, String::new(), Duration::ZERO)
}

fn cookie_duration(duration: Duration) -> time::Duration {
    time::Duration::seconds(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
}
