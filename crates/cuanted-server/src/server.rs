use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::FromRef;
use axum::{Router, middleware, routing::get};
use cuanted_auth::{AuthState, FirebaseAuth, SupabaseAuth};
use cuanted_billing::paypal::PaypalClient;
use cuanted_billing::stripe::StripeClient;
use cuanted_db_postgres::{PgPool, connect_lazy, mask_password, migrations};
use cuanted_exchange::MarketType;
use moka::future::Cache;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{config::AppConfig, handlers, middleware as app_middleware, routes};

/// Trading-pair lists keyed by (exchange, market).
pub type PairsCache = Cache<(String, MarketType), Arc<Vec<String>>>;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state of every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pool: PgPool,
    pub auth: AuthState,
    /// Client for outbound calls (Binance, ipify).
    pub http: reqwest::Client,
    pub stripe: Option<Arc<StripeClient>>,
    pub paypal: Option<Arc<PaypalClient>>,
    pub pairs_cache: PairsCache,
}

impl AppState {
    /// Wires clients from configuration. The pool connects lazily.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .user_agent(concat!("cuanted-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        let pool = connect_lazy(&config.storage.postgres).with_context(|| {
            format!(
                "invalid database url {}",
                mask_password(&config.storage.postgres.url)
            )
        })?;

        let firebase = FirebaseAuth::new(config.auth.firebase.clone(), http.clone())
            .context("failed to initialize Firebase auth")?;
        if !firebase.has_admin_credentials() {
            tracing::warn!("Firebase service account not configured; session cookies are disabled");
        }
        let supabase = config
            .auth
            .supabase()
            .map(|s| Arc::new(SupabaseAuth::new(s, http.clone())));
        let auth = AuthState {
            firebase: Arc::new(firebase),
            supabase,
            cookie: config.auth.session.clone(),
        };

        let stripe = if config.stripe.is_configured() {
            Some(Arc::new(StripeClient::new(http.clone(), &config.stripe)?))
        } else {
            tracing::warn!("Stripe not configured; checkout routes are disabled");
            None
        };
        let paypal = if config.paypal.is_configured() {
            Some(Arc::new(PaypalClient::new(http.clone(), &config.paypal)?))
        } else {
            tracing::warn!("PayPal not configured; subscription routes are disabled");
            None
        };

        let pairs_cache = Cache::builder()
            .max_capacity(config.cache.pairs_capacity)
            .time_to_live(config.cache.pairs_ttl)
            .build();

        Ok(Self {
            config: Arc::new(config),
            pool,
            auth,
            http,
            stripe,
            paypal,
            pairs_cache,
        })
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

pub struct CuantedServer {
    addr: SocketAddr,
    app: Router,
    pool: PgPool,
    run_migrations: bool,
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        .merge(routes::router())
        .with_state(state)
        // Middleware stack, innermost first. The request id layer sits outside
        // the trace layer so the span can pick the id up.
        .layer(middleware::from_fn(app_middleware::http_metrics))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub fn build(self) -> anyhow::Result<CuantedServer> {
        let addr = self.config.addr();
        let run_migrations = self.config.storage.postgres.run_migrations;
        let state = AppState::from_config(self.config)?;
        let pool = state.pool.clone();
        Ok(CuantedServer {
            addr,
            app: build_app(state),
            pool,
            run_migrations,
        })
    }
}

impl CuantedServer {
    pub async fn run(self) -> anyhow::Result<()> {
        if self.run_migrations {
            migrations::run(&self.pool)
                .await
                .context("database migrations failed")?;
        }

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        self.pool.close().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
