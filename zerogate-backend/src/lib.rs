use std::{any::Any, net::SocketAddr, sync::Arc, time::Duration, time::Instant};

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

pub mod auth;
pub mod circuit;
pub mod config;
pub mod history;
pub mod rate_limit;
pub mod tokens;

use circuit::CircuitService;
use config::{Environment, ServerConfig};
use history::{JsonFileHistory, LoginHistoryStore};
use rate_limit::{rate_limit_middleware, RateLimiter};
use tokens::{TokenError, TokenIssuer};

const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

pub(crate) const CODE_VALIDATION: &str = "VALIDATION_ERROR";
pub(crate) const CODE_CIRCUIT_NOT_SETUP: &str = "CIRCUIT_NOT_SETUP";
pub(crate) const CODE_PROOF_INVALID: &str = "PROOF_INVALID";
pub(crate) const CODE_CONFIG: &str = "CONFIG_ERROR";
pub(crate) const CODE_INTERNAL: &str = "INTERNAL_ERROR";
pub(crate) const CODE_NOT_ALLOWED: &str = "NOT_ALLOWED";
pub(crate) const CODE_PROOF_GENERATION: &str = "PROOF_GENERATION_ERROR";
const CODE_TOKEN_MISSING: &str = "TOKEN_MISSING";
const CODE_TOKEN_INVALID: &str = "TOKEN_INVALID";
const CODE_TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
const CODE_TOKEN_MALFORMED: &str = "TOKEN_MALFORMED";
const CODE_RATE_LIMITED: &str = "RATE_LIMITED";
const CODE_ROUTE_NOT_FOUND: &str = "ROUTE_NOT_FOUND";

#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    circuit: Arc<CircuitService>,
    history: Arc<dyn LoginHistoryStore>,
    tokens: Option<TokenIssuer>,
    rate_limiter: Arc<RateLimiter>,
    started_at: Instant,
}

impl AppState {
    /// State backed by the circuits directory and history file named in `config`.
    pub fn from_config(config: ServerConfig) -> Self {
        let circuit = CircuitService::new(&config.circuits_path);
        let history = Arc::new(JsonFileHistory::new(&config.history_path));
        Self::with_components(config, circuit, history)
    }

    pub fn with_components(
        config: ServerConfig,
        circuit: CircuitService,
        history: Arc<dyn LoginHistoryStore>,
    ) -> Self {
        let tokens = config.jwt_secret.as_deref().map(|secret| {
            TokenIssuer::new(
                secret,
                config.jwt_expires_in,
                config.jwt_expires_in_label.clone(),
            )
        });
        let rate_limiter = RateLimiter::new(config.rate_limit_window, config.rate_limit_max);
        Self {
            config: Arc::new(config),
            circuit: Arc::new(circuit),
            history,
            tokens,
            rate_limiter: Arc::new(rate_limiter),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn environment(&self) -> Environment {
        self.config.environment
    }

    pub fn circuit(&self) -> &CircuitService {
        &self.circuit
    }

    pub fn history(&self) -> &dyn LoginHistoryStore {
        self.history.as_ref()
    }

    /// `None` when no signing secret is configured.
    pub fn tokens(&self) -> Option<&TokenIssuer> {
        self.tokens.as_ref()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<String>,
    with_timestamp: bool,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            with_timestamp: false,
        }
    }

    pub(crate) fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub(crate) fn validation(details: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            CODE_VALIDATION,
            "Invalid request format",
        )
        .with_details(details)
    }

    pub(crate) fn config() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            CODE_CONFIG,
            "Server configuration error",
        )
    }

    pub(crate) fn circuit_not_setup() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            CODE_CIRCUIT_NOT_SETUP,
            "Circuit not properly set up. Run setup first.",
        )
    }

    /// Internal failures carry `details` only in development.
    pub(crate) fn internal(environment: Environment, details: impl Into<String>) -> Self {
        let err = Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            CODE_INTERNAL,
            "Internal server error",
        );
        if environment.is_development() {
            err.with_details(details)
        } else {
            err
        }
    }

    fn rate_limited(retry_after: Duration) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            CODE_RATE_LIMITED,
            "Too many requests, please try again later",
        )
        .with_details(format!("retry after {}s", retry_after.as_secs().max(1)))
    }

    fn route_not_found(method: &Method, uri: &Uri) -> Self {
        let mut err = Self::new(
            StatusCode::NOT_FOUND,
            CODE_ROUTE_NOT_FOUND,
            format!("Route {} {} not found", method, uri.path()),
        );
        err.with_timestamp = true;
        err
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Missing => Self::new(
                StatusCode::UNAUTHORIZED,
                CODE_TOKEN_MISSING,
                "Access token required",
            ),
            TokenError::Expired => {
                Self::new(StatusCode::FORBIDDEN, CODE_TOKEN_EXPIRED, "Token expired")
            }
            TokenError::InvalidSignature => {
                Self::new(StatusCode::FORBIDDEN, CODE_TOKEN_INVALID, "Invalid token")
            }
            TokenError::Malformed(_) => {
                Self::new(StatusCode::FORBIDDEN, CODE_TOKEN_MALFORMED, "Malformed token")
            }
            TokenError::Sign(_) => Self::config(),
        }
    }
}

#[derive(serde::Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[derive(serde::Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                message: self.message,
                code: self.code,
                details: self.details,
            },
            timestamp: self.with_timestamp.then(now_rfc3339),
        };
        (self.status, Json(body)).into_response()
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    config.log_summary();
    let addr = config.listen_addr;
    let state = AppState::from_config(config);

    let status = state.circuit().setup_status().await;
    if status.is_setup {
        tracing::info!(circuits_path = %status.circuits_path, "circuit artifacts found");
    } else {
        tracing::warn!(
            circuits_path = %status.circuits_path,
            missing = ?status.missing_files,
            "circuit artifacts missing, verification requests will return 503"
        );
    }
    if state.tokens().is_none() {
        tracing::warn!("no JWT secret configured, token issuance is disabled");
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, environment = %state.environment(), "zerogate-backend listening");

    axum::serve(
        listener,
        app_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("server closed");
    Ok(())
}

pub fn app_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/me", get(auth::me_handler))
        .route("/api/auth/history", get(auth::history_handler))
        .route("/api/auth/stats", get(auth::stats_handler))
        .route("/api/auth/metrics", get(auth::metrics_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/auth/verify", post(auth::verify_handler))
        .route("/api/auth/test-proof", post(auth::test_proof_handler))
        .route("/api/auth/status", get(auth::status_handler))
        .merge(protected)
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors_layer(state.config()))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);
    match HeaderValue::from_str(&config.cors_origin) {
        Ok(origin) => layer.allow_origin(origin),
        Err(err) => {
            tracing::warn!(origin = %config.cors_origin, error = %err, "invalid CORS origin, cross-origin requests disabled");
            layer
        }
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %details, "request handler panicked");
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        CODE_INTERNAL,
        "Internal server error",
    )
    .into_response()
}

#[derive(serde::Serialize)]
struct HealthResponse {
    success: bool,
    status: &'static str,
    timestamp: String,
    uptime: f64,
    environment: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        status: "healthy",
        timestamp: now_rfc3339(),
        uptime: state.uptime().as_secs_f64(),
        environment: state.environment().as_str(),
    })
}

async fn not_found_handler(method: Method, uri: Uri) -> ApiError {
    ApiError::route_not_found(&method, &uri)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received, shutting down gracefully"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down gracefully"),
    }
}
