use std::net::SocketAddr;
use std::time::Duration;

use cuanted_auth::{FirebaseConfig, SessionCookieConfig, SupabaseConfig};
use cuanted_billing::paypal::PaypalConfig;
use cuanted_billing::stripe::StripeConfig;
use cuanted_db_postgres::PostgresConfig;
use cuanted_exchange::BinanceEndpoints;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub binance: BinanceEndpoints,
    pub stripe: StripeConfig,
    pub paypal: PaypalConfig,
    pub server_info: ServerInfoConfig,
    pub cache: CacheConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.host.trim().is_empty() {
            return Err("server.host must not be empty".into());
        }
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        if url::Url::parse(&self.server.site_url).is_err() {
            return Err("server.site_url must be an absolute URL".into());
        }

        if self.storage.postgres.url.trim().is_empty() {
            return Err("storage.postgres.url must not be empty".into());
        }
        if self.storage.postgres.pool_size == 0 {
            return Err("storage.postgres.pool_size must be > 0".into());
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }

        if self.auth.firebase.project_id.trim().is_empty() {
            return Err("auth.firebase.project_id is required".into());
        }
        if self.auth.firebase.client_email.is_some() != self.auth.firebase.private_key.is_some() {
            return Err(
                "auth.firebase.client_email and auth.firebase.private_key must be set together"
                    .into(),
            );
        }
        if let Some(supabase) = &self.auth.supabase
            && !supabase.url.is_empty()
            && supabase.anon_key.is_empty()
        {
            return Err("auth.supabase.url requires auth.supabase.anon_key".into());
        }

        if self.server_info.timeout.is_zero() {
            return Err("server_info.timeout must be > 0".into());
        }
        if self.cache.pairs_ttl.is_zero() {
            return Err("cache.pairs_ttl must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Public origin of the web app, used in email links.
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}
fn default_site_url() -> String {
    "http://localhost:3000".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            site_url: default_site_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub postgres: PostgresConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub firebase: FirebaseConfig,
    /// Optional fallback verifier for bearer tokens.
    pub supabase: Option<SupabaseConfig>,
    pub session: SessionCookieConfig,
}

impl AuthConfig {
    /// The Supabase settings, when a project URL is configured.
    pub fn supabase(&self) -> Option<&SupabaseConfig> {
        self.supabase.as_ref().filter(|s| !s.url.trim().is_empty())
    }
}

/// Outbound-IP lookup used by `/api/server-info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfoConfig {
    pub ip_lookup_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServerInfoConfig {
    fn default() -> Self {
        Self {
            ip_lookup_url: "https://api.ipify.org?format=json".into(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long an exchange's trading-pair list is reused.
    #[serde(with = "humantime_serde")]
    pub pairs_ttl: Duration,
    pub pairs_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pairs_ttl: Duration::from_secs(3600),
            pairs_capacity: 64,
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "cuanted.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", file.display()));
        }
        // Environment variable overrides, e.g., CUANTED__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("CUANTED")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.firebase.project_id = "cuanted-test".into();
        config
    }

    #[test]
    fn defaults_need_only_a_firebase_project() {
        assert!(AppConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
        assert_eq!(valid().addr().port(), 8080);
    }

    #[test]
    fn rejects_bad_server_and_logging_settings() {
        let mut config = valid();
        config.server.port = 0;
        assert!(config.validate().unwrap_err().contains("server.port"));

        let mut config = valid();
        config.server.host = " ".into();
        assert!(config.validate().unwrap_err().contains("server.host"));

        let mut config = valid();
        config.logging.level = "verbose".into();
        assert!(config.validate().unwrap_err().contains("logging.level"));
    }

    #[test]
    fn service_account_fields_come_in_pairs() {
        let mut config = valid();
        config.auth.firebase.client_email = Some("svc@example.iam.gserviceaccount.com".into());
        assert!(config.validate().unwrap_err().contains("private_key"));
    }

    #[test]
    fn supabase_requires_a_url_to_be_enabled() {
        let mut config = valid();
        assert!(config.auth.supabase().is_none());

        config.auth.supabase = Some(SupabaseConfig::default());
        assert!(config.auth.supabase().is_none());

        config.auth.supabase = Some(SupabaseConfig {
            url: "https://abc.supabase.co".into(),
            anon_key: "anon".into(),
        });
        assert!(config.auth.supabase().is_some());
    }
}
