//! HTTP surface over the engine.

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Json, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use plug_common::{
    DeviceFailure, ErrorBody, Grant, GrantRequest, Identity, PlugInfo, PlugStatus, Role, ROLE_HEADER,
    USER_HEADER,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::engine::{Engine, Transition};
use crate::error::{DeviceError, EngineError};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/plugs", get(list_plugs))
        .route("/plugs/{id}/reserve", post(reserve_plug))
        .route("/plugs/{id}/release", post(release_plug))
        .route("/plugs/{id}/status", get(plug_status))
        .route("/plugs/{id}/reservations", delete(force_clear))
        .route("/grants", get(list_grants).post(grant).delete(revoke))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { engine })
}

/// Identity asserted by the authenticating proxy in front of the daemon.
pub struct Caller(pub Identity);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let user_id = header(USER_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_HEADER} header")))?
            .to_string();
        let role = match header(ROLE_HEADER) {
            Some(raw) => Role::parse(raw)
                .ok_or_else(|| ApiError::Unauthorized(format!("unknown role '{raw}'")))?,
            None => Role::User,
        };
        Ok(Caller(Identity { user_id, role }))
    }
}

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Unauthorized(String),
    /// The request body could not be read as the expected JSON.
    Rejected(JsonRejection),
    /// The logical operation went through but the device did not follow.
    Device {
        error: DeviceError,
        status: Option<PlugStatus>,
    },
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::DeviceUnavailable(error) => ApiError::Device { error, status: None },
            other => ApiError::Engine(other),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Device { error, status } => {
                let body = DeviceFailure {
                    error: error.to_string(),
                    code: "DEVICE_UNAVAILABLE".to_string(),
                    status,
                };
                return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::Rejected(rejection) => (rejection.status(), "INVALID_BODY", rejection.body_text()),
            ApiError::Engine(err) => match &err {
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
                EngineError::Forbidden { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN", err.to_string()),
                EngineError::NotInUse { .. } => (StatusCode::BAD_REQUEST, "NOT_IN_USE", err.to_string()),
                EngineError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", err.to_string()),
                EngineError::DeviceUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "DEVICE_UNAVAILABLE", err.to_string())
                }
                EngineError::Store(e) => {
                    tracing::error!(error = %e, "Store error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },
        };

        let body = ErrorBody {
            error: message,
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn settle(transition: Transition, success: StatusCode) -> Result<(StatusCode, Json<PlugStatus>), ApiError> {
    match transition.device_error {
        Some(error) => Err(ApiError::Device {
            error,
            status: Some(transition.status),
        }),
        None => Ok((success, Json(transition.status))),
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn list_plugs(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<Vec<PlugInfo>>, ApiError> {
    Ok(Json(state.engine.list(&user).await?))
}

async fn reserve_plug(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Caller(user): Caller,
) -> Result<(StatusCode, Json<PlugStatus>), ApiError> {
    let transition = state.engine.reserve(&id, &user).await?;
    let code = if transition.changed { StatusCode::CREATED } else { StatusCode::OK };
    settle(transition, code)
}

async fn release_plug(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Caller(user): Caller,
) -> Result<(StatusCode, Json<PlugStatus>), ApiError> {
    let transition = state.engine.release(&id, &user).await?;
    settle(transition, StatusCode::OK)
}

async fn plug_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Caller(user): Caller,
) -> Result<Json<PlugStatus>, ApiError> {
    Ok(Json(state.engine.status(&id, &user).await?))
}

async fn force_clear(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Caller(user): Caller,
) -> Result<StatusCode, ApiError> {
    let outcome = state.engine.force_clear(&id, &user).await?;
    match outcome.device_error {
        Some(error) => Err(ApiError::Device { error, status: None }),
        None => Ok(StatusCode::NO_CONTENT),
    }
}

async fn list_grants(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<Vec<Grant>>, ApiError> {
    Ok(Json(state.engine.policy().grants(&user)?))
}

async fn grant(
    State(state): State<AppState>,
    Caller(user): Caller,
    payload: Result<Json<GrantRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload?;
    state.engine.policy().grant(&user, &payload.user_id, &payload.plug_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke(
    State(state): State<AppState>,
    Caller(user): Caller,
    payload: Result<Json<GrantRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload?;
    state.engine.policy().revoke(&user, &payload.user_id, &payload.plug_id)?;
    Ok(StatusCode::NO_CONTENT)
}
