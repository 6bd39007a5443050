//! Authentication for Cuanted.
//!
//! - [`firebase::FirebaseAuth`] verifies ID tokens and session cookies and
//!   performs admin calls through a service account
//! - [`supabase::SupabaseAuth`] is an optional fallback for bearer tokens
//! - [`middleware`] resolves the caller of each request
//! - [`cookies`] builds the session cookie

pub mod config;
pub mod cookies;
pub mod error;
pub mod firebase;
pub mod keys;
pub mod middleware;
pub mod service_account;
pub mod supabase;

pub use config::{FirebaseConfig, SessionCookieConfig, SupabaseConfig};
pub use error::AuthError;
pub use firebase::{FirebaseAuth, FirebaseClaims, UserRecord};
pub use middleware::{AuthState, AuthUser, MaybeAuthUser};
pub use supabase::SupabaseAuth;
