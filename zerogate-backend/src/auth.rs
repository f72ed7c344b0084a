// zerogate/zerogate-backend/src/auth.rs

//! Authentication routes and the bearer-token middleware.
//!
//! `POST /api/auth/verify` runs a fixed sequence of gates: validation, setup
//! check, proof verification, token issuance, recording. Every attempt that
//! gets past validation leaves exactly one login entry behind.

use std::{net::SocketAddr, time::Instant};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Query, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::{
    circuit::SetupStatus,
    config::Environment,
    history::{HistoryError, LoginEntry, LoginHistoryStats, NewLoginEntry, ProofMetrics},
    now_rfc3339,
    tokens::{SessionClaims, TokenError},
    ApiError, AppState, CODE_INTERNAL, CODE_NOT_ALLOWED, CODE_PROOF_GENERATION,
    CODE_PROOF_INVALID,
};

pub const MAX_USERNAME_CHARS: usize = 100;
pub const MAX_SECRET_CHARS: usize = 1000;
const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 1000;
const DEFAULT_METRICS_DAYS: u32 = 30;

const MSG_NOT_SETUP: &str = "circuit not set up";
const MSG_PROOF_INVALID: &str = "Proof verification failed";

/// Why an authentication attempt past validation did not succeed.
#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error("circuit not set up")]
    NotSetup,
    #[error("Proof verification failed")]
    ProofInvalid,
    #[error("JWT secret not configured")]
    MissingSecret,
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl AuthFailure {
    fn into_api_error(self, environment: Environment) -> ApiError {
        match self {
            AuthFailure::NotSetup => ApiError::circuit_not_setup(),
            AuthFailure::ProofInvalid => ApiError::new(
                StatusCode::UNAUTHORIZED,
                CODE_PROOF_INVALID,
                MSG_PROOF_INVALID,
            ),
            AuthFailure::MissingSecret => ApiError::config(),
            other => ApiError::internal(environment, other.to_string()),
        }
    }

    /// Failures that are not already recorded by the gate that raised them.
    fn is_unexpected(&self) -> bool {
        matches!(self, AuthFailure::History(_) | AuthFailure::Token(_))
    }
}

#[derive(Clone, Debug)]
pub struct VerifyRequest {
    pub proof: JsonValue,
    pub public_inputs: Vec<String>,
    pub username: String,
}

impl VerifyRequest {
    fn from_json(value: JsonValue) -> Result<Self, String> {
        let JsonValue::Object(mut body) = value else {
            return Err("request body must be a JSON object".into());
        };

        let proof = match body.remove("proof") {
            Some(proof @ JsonValue::Object(_)) => proof,
            Some(_) => return Err("\"proof\" must be of type object".into()),
            None => return Err("\"proof\" is required".into()),
        };
        let public_inputs = string_array(&body, "publicInputs")?;
        let username = required_string(&body, "username")?.trim().to_string();
        if username.is_empty() {
            return Err("\"username\" is not allowed to be empty".into());
        }
        if username.chars().count() > MAX_USERNAME_CHARS {
            return Err(format!(
                "\"username\" length must be less than or equal to {MAX_USERNAME_CHARS} characters long"
            ));
        }

        Ok(Self {
            proof,
            public_inputs,
            username,
        })
    }
}

fn required_string<'a>(body: &'a Map<String, JsonValue>, field: &str) -> Result<&'a str, String> {
    match body.get(field) {
        Some(JsonValue::String(s)) => Ok(s),
        Some(_) => Err(format!("\"{field}\" must be a string")),
        None => Err(format!("\"{field}\" is required")),
    }
}

fn string_array(body: &Map<String, JsonValue>, field: &str) -> Result<Vec<String>, String> {
    let items = match body.get(field) {
        Some(JsonValue::Array(items)) => items,
        Some(_) => return Err(format!("\"{field}\" must be an array")),
        None => return Err(format!("\"{field}\" is required")),
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            JsonValue::String(s) => Ok(s.clone()),
            _ => Err(format!("\"{field}[{i}]\" must be a string")),
        })
        .collect()
}

#[derive(Clone, Debug, Default)]
struct ClientInfo {
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl ClientInfo {
    fn new(connect: Option<ConnectInfo<SocketAddr>>, headers: &HeaderMap) -> Self {
        Self {
            ip_address: connect.map(|ConnectInfo(addr)| addr.ip().to_string()),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        }
    }

    fn tag(&self, entry: NewLoginEntry) -> NewLoginEntry {
        entry.with_client(self.ip_address.clone(), self.user_agent.clone())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    success: bool,
    message: &'static str,
    token: String,
    user: SessionClaims,
    expires_in: String,
    metrics: ProofMetrics,
}

pub async fn verify_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<JsonValue>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    tracing::info!("proof verification request received");

    let Json(value) = body.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let request = VerifyRequest::from_json(value).map_err(|details| {
        tracing::info!(%details, "verification request rejected");
        ApiError::validation(details)
    })?;
    let client = ClientInfo::new(connect, &headers);

    match authenticate(&state, &request, &client).await {
        Ok(response) => Ok(Json(response)),
        Err(failure) => {
            if failure.is_unexpected() {
                tracing::error!(username = %request.username, error = %failure, "authentication failed unexpectedly");
                let entry = client.tag(NewLoginEntry::failure(
                    request.username.as_str(),
                    failure.to_string(),
                ));
                if let Err(err) = state.history().append(entry).await {
                    tracing::error!(error = %err, "failed to record login failure");
                }
            }
            Err(failure.into_api_error(state.environment()))
        }
    }
}

async fn authenticate(
    state: &AppState,
    request: &VerifyRequest,
    client: &ClientInfo,
) -> Result<VerifyResponse, AuthFailure> {
    let username = request.username.as_str();

    if !state.circuit().is_setup().await {
        tracing::warn!(%username, "verification attempted before circuit setup");
        state
            .history()
            .append(client.tag(NewLoginEntry::failure(username, MSG_NOT_SETUP)))
            .await?;
        return Err(AuthFailure::NotSetup);
    }

    let started = Instant::now();
    let valid = state
        .circuit()
        .verify(&request.proof, &request.public_inputs)
        .await;
    let verification_time = started.elapsed().as_millis() as u64;

    if !valid {
        tracing::warn!(%username, verification_time, "proof verification failed");
        state
            .history()
            .append(client.tag(NewLoginEntry::failure(username, MSG_PROOF_INVALID)))
            .await?;
        return Err(AuthFailure::ProofInvalid);
    }

    let Some(issuer) = state.tokens() else {
        tracing::error!("JWT secret not configured");
        return Err(AuthFailure::MissingSecret);
    };
    let (token, claims) = issuer.issue(username)?;

    let metrics = ProofMetrics {
        generation_time: 0,
        verification_time,
        proof_size: serde_json::to_vec(&request.proof)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or_default(),
        public_inputs_count: request.public_inputs.len() as u64,
        circuit_constraints: state.circuit().circuit_constraints().await,
    };
    state
        .history()
        .append(client.tag(NewLoginEntry::success(username, metrics.clone())))
        .await?;

    tracing::info!(%username, verification_time, "proof verified, token issued");
    Ok(VerifyResponse {
        success: true,
        message: "Authentication successful",
        token,
        user: claims,
        expires_in: issuer.expires_in_label().to_string(),
        metrics,
    })
}

#[derive(Deserialize)]
pub struct TestProofRequest {
    secret: Option<JsonValue>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestProofResponse {
    success: bool,
    message: &'static str,
    proof: JsonValue,
    public_inputs: Vec<String>,
    note: &'static str,
}

pub async fn test_proof_handler(
    State(state): State<AppState>,
    body: Result<Json<TestProofRequest>, JsonRejection>,
) -> Result<Json<TestProofResponse>, ApiError> {
    tracing::info!("test proof generation requested");

    if state.environment().is_production() {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            CODE_NOT_ALLOWED,
            "Test proof generation not allowed in production",
        ));
    }

    let Json(request) = body.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let secret = match request.secret {
        Some(JsonValue::String(secret)) => secret,
        Some(_) => return Err(ApiError::validation("\"secret\" must be a string")),
        None => return Err(ApiError::validation("\"secret\" is required")),
    };
    let len = secret.chars().count();
    if len == 0 || len > MAX_SECRET_CHARS {
        return Err(ApiError::validation(format!(
            "\"secret\" length must be between 1 and {MAX_SECRET_CHARS} characters"
        )));
    }

    if !state.circuit().is_setup().await {
        return Err(ApiError::circuit_not_setup());
    }

    let generated = state
        .circuit()
        .generate_test_proof(&secret)
        .await
        .map_err(|err| {
            tracing::error!(error = %format!("{err:#}"), "test proof generation failed");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                CODE_PROOF_GENERATION,
                format!("Test proof generation error: {err}"),
            )
        })?;
    let proof = serde_json::to_value(&generated.proof).map_err(|err| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            CODE_PROOF_GENERATION,
            format!("Test proof generation error: {err}"),
        )
    })?;

    tracing::info!("test proof generated");
    Ok(Json(TestProofResponse {
        success: true,
        message: "Test proof generated",
        proof,
        public_inputs: generated.public_signals,
        note: "Use this proof in the /verify endpoint",
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Features {
    proof_verification: bool,
    jwt_auth: bool,
    test_proof_generation: bool,
}

#[derive(Serialize)]
struct StatusBody {
    server: &'static str,
    timestamp: String,
    environment: &'static str,
    circuit: SetupStatus,
    features: Features,
}

#[derive(Serialize)]
pub struct StatusResponse {
    success: bool,
    status: StatusBody,
}

pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let circuit = state.circuit().setup_status().await;
    Json(StatusResponse {
        success: true,
        status: StatusBody {
            server: "running",
            timestamp: now_rfc3339(),
            environment: state.environment().as_str(),
            features: Features {
                proof_verification: circuit.is_setup,
                jwt_auth: state.tokens().is_some(),
                test_proof_generation: !state.environment().is_production(),
            },
            circuit,
        },
    })
}

/// Decodes the bearer token and exposes its claims as an `Extension`.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_whitespace().nth(1))
        .ok_or(TokenError::Missing)?;

    let Some(issuer) = state.tokens() else {
        tracing::error!("JWT secret not configured");
        return Err(ApiError::config());
    };

    let claims = issuer.decode(token).map_err(|err| {
        tracing::warn!(error = %err, "rejected bearer token");
        ApiError::from(err)
    })?;
    tracing::debug!(user = %claims.id, "user authenticated");
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[derive(Serialize)]
pub struct MeResponse {
    success: bool,
    user: SessionClaims,
    timestamp: String,
}

pub async fn me_handler(Extension(claims): Extension<SessionClaims>) -> Json<MeResponse> {
    Json(MeResponse {
        success: true,
        user: claims,
        timestamp: now_rfc3339(),
    })
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    limit: Option<i64>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    success: bool,
    history: Vec<LoginEntry>,
    count: usize,
}

pub async fn history_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT) as usize;

    let history = state
        .history()
        .read_for_user(&claims.username, limit)
        .await
        .map_err(|err| read_failure(&state, "Failed to get login history", err))?;
    Ok(Json(HistoryResponse {
        success: true,
        count: history.len(),
        history,
    }))
}

#[derive(Serialize)]
pub struct StatsResponse {
    success: bool,
    stats: LoginHistoryStats,
}

pub async fn stats_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state
        .history()
        .stats_for_user(&claims.username)
        .await
        .map_err(|err| read_failure(&state, "Failed to get login statistics", err))?;
    Ok(Json(StatsResponse {
        success: true,
        stats,
    }))
}

#[derive(Deserialize)]
pub struct MetricsQuery {
    days: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    success: bool,
    metrics_history: Vec<LoginEntry>,
    count: usize,
    period: String,
}

pub async fn metrics_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    query: Result<Query<MetricsQuery>, QueryRejection>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let days = query.days.unwrap_or(DEFAULT_METRICS_DAYS);

    let metrics_history = state
        .history()
        .metrics_for_user(&claims.username, days)
        .await
        .map_err(|err| read_failure(&state, "Failed to get metrics history", err))?;
    Ok(Json(MetricsResponse {
        success: true,
        count: metrics_history.len(),
        metrics_history,
        period: format!("{days} days"),
    }))
}

fn read_failure(state: &AppState, message: &'static str, err: HistoryError) -> ApiError {
    tracing::error!(error = %err, "{message}");
    let api = ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, CODE_INTERNAL, message);
    if state.environment().is_development() {
        api.with_details(err.to_string())
    } else {
        api
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn proof() -> JsonValue {
        json!({ "pi_a": ["1", "2", "1"] })
    }

    #[test]
    fn accepts_well_formed_request_and_trims_username() {
        let request = VerifyRequest::from_json(json!({
            "proof": proof(),
            "publicInputs": ["42"],
            "username": "  alice  ",
        }))
        .unwrap();
        assert_eq!(request.username, "alice");
        assert_eq!(request.public_inputs, vec!["42"]);
    }

    #[test]
    fn rejects_missing_or_mistyped_fields() {
        let cases = [
            json!([]),
            json!({ "publicInputs": [], "username": "a" }),
            json!({ "proof": "x", "publicInputs": [], "username": "a" }),
            json!({ "proof": proof(), "username": "a" }),
            json!({ "proof": proof(), "publicInputs": [1], "username": "a" }),
            json!({ "proof": proof(), "publicInputs": [] }),
            json!({ "proof": proof(), "publicInputs": [], "username": "   " }),
            json!({ "proof": proof(), "publicInputs": [], "username": 7 }),
        ];
        for case in cases {
            assert!(VerifyRequest::from_json(case.clone()).is_err(), "{case}");
        }
    }

    #[test]
    fn username_length_is_bounded() {
        let ok = "u".repeat(MAX_USERNAME_CHARS);
        let too_long = "u".repeat(MAX_USERNAME_CHARS + 1);
        let body = |name: &str| json!({ "proof": proof(), "publicInputs": [], "username": name });
        assert!(VerifyRequest::from_json(body(&ok)).is_ok());
        assert!(VerifyRequest::from_json(body(&too_long)).is_err());
    }

    #[test]
    fn failure_statuses() {
        let env = Environment::Production;
        assert_eq!(
            AuthFailure::NotSetup.into_api_error(env).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AuthFailure::ProofInvalid.into_api_error(env).code(),
            CODE_PROOF_INVALID
        );
        assert_eq!(
            AuthFailure::MissingSecret.into_api_error(env).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(!AuthFailure::ProofInvalid.is_unexpected());
        assert!(AuthFailure::Token(TokenError::Missing).is_unexpected());
    }
}
