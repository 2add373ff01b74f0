use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::AsyncPgConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use shared::{AppointmentStatus, BookingError};

use crate::board::{self, BoardColumns};
use crate::handlers::{self, CreateAppointmentRequest, CreateOutcome, MoveRequest};
use crate::tenant::{TenantContext, REQUEST_ID_HEADER};

type DbPool = Pool<AsyncPgConnection>;

pub const IDEMPOTENCY_STATUS_HEADER: &str = "x-idempotency-status";

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub idempotency_ttl: chrono::Duration,
}

/// Response envelope: `data` on success, `errors` on failure, `meta` always.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    pub errors: Option<Vec<ErrorObject>>,
    pub meta: Meta,
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub status: u16,
    pub code: &'static str,
    pub detail: String,
    /// Set on version conflicts so the caller can reconcile without a
    /// second round trip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<AppointmentStatus>,
}

/// A domain error paired with the request id, rendered as the envelope.
#[derive(Debug)]
pub struct ApiFailure {
    error: BookingError,
    request_id: String,
}

impl ApiFailure {
    pub fn new(error: BookingError, request_id: String) -> Self {
        Self { error, request_id }
    }
}

pub fn http_status(error: &BookingError) -> StatusCode {
    match error {
        BookingError::TenantContextMissing(_) | BookingError::Validation(_) => {
            StatusCode::BAD_REQUEST
        }
        BookingError::NotFound => StatusCode::NOT_FOUND,
        BookingError::InvalidTransition { .. }
        | BookingError::VersionConflict { .. }
        | BookingError::IdempotencyKeyConflict => StatusCode::CONFLICT,
        BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_code(error: &BookingError) -> &'static str {
    match error {
        BookingError::TenantContextMissing(_) => "tenant_context_missing",
        BookingError::Validation(_) => "validation_error",
        BookingError::NotFound => "not_found",
        BookingError::InvalidTransition { .. } => "invalid_transition",
        BookingError::VersionConflict { .. } => "version_conflict",
        BookingError::IdempotencyKeyConflict => "idempotency_key_conflict",
        BookingError::Storage(_) => "internal_error",
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = http_status(&self.error);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(request_id = %self.request_id, "{}", self.error);
        }

        let (current_version, current_status) = match &self.error {
            BookingError::VersionConflict {
                current_version,
                current_status,
                ..
            } => (Some(*current_version), Some(*current_status)),
            _ => (None, None),
        };

        // Storage detail stays out of the response body.
        let detail = match &self.error {
            BookingError::Storage(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        let envelope = Envelope::<serde_json::Value> {
            data: None,
            errors: Some(vec![ErrorObject {
                status: status.as_u16(),
                code: error_code(&self.error),
                detail,
                current_version,
                current_status,
            }]),
            meta: Meta {
                request_id: self.request_id.clone(),
            },
        };

        with_request_id((status, Json(envelope)).into_response(), &self.request_id)
    }
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn success<T: Serialize>(status: StatusCode, ctx: &TenantContext, data: T) -> Response {
    let envelope = Envelope {
        data: Some(data),
        errors: None,
        meta: Meta {
            request_id: ctx.request_id.clone(),
        },
    };
    with_request_id((status, Json(envelope)).into_response(), &ctx.request_id)
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/appointments", post(create_appointment))
        .route("/appointments/:id/move", post(move_appointment))
        .route("/appointments/board", get(get_board))
        .route("/dashboard/stats", get(get_stats))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn fail(ctx: &TenantContext) -> impl Fn(BookingError) -> ApiFailure + '_ {
    move |error| ApiFailure::new(error, ctx.request_id.clone())
}

#[derive(Debug, Serialize)]
struct MoveData {
    id: Uuid,
    status: AppointmentStatus,
    version: i32,
}

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: Option<String>,
}

fn parse_date(query: &DateQuery) -> Result<NaiveDate, BookingError> {
    let raw = query
        .date
        .as_deref()
        .ok_or_else(|| BookingError::Validation("date query parameter is required".to_string()))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| BookingError::Validation(format!("date {raw:?} must be YYYY-MM-DD")))
}

async fn create_appointment(
    ctx: TenantContext,
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiFailure> {
    let request: CreateAppointmentRequest = serde_json::from_value(body)
        .map_err(|e| BookingError::Validation(e.to_string()))
        .map_err(fail(&ctx))?;

    let mut conn = state.pool.get().await.map_err(|e| {
        ApiFailure::new(
            BookingError::Storage(format!("connection pool: {e}")),
            ctx.request_id.clone(),
        )
    })?;
    let outcome = handlers::create_appointment(
        &mut conn,
        ctx.tenant_id,
        ctx.idempotency_key.as_deref(),
        &request,
        state.idempotency_ttl,
    )
    .await
    .map_err(fail(&ctx))?;

    let response = match outcome {
        CreateOutcome::Created(appointment) => {
            let body = serde_json::to_value(&appointment)
                .map_err(|e| BookingError::Storage(e.to_string()))
                .map_err(fail(&ctx))?;
            let mut response = success(StatusCode::CREATED, &ctx, body);
            if ctx.idempotency_key.is_some() {
                response.headers_mut().insert(
                    IDEMPOTENCY_STATUS_HEADER,
                    HeaderValue::from_static("created"),
                );
            }
            response
        }
        CreateOutcome::Replayed { body } => {
            let mut response = success(StatusCode::OK, &ctx, body);
            response.headers_mut().insert(
                IDEMPOTENCY_STATUS_HEADER,
                HeaderValue::from_static("replayed"),
            );
            response
        }
    };

    Ok(response)
}

async fn move_appointment(
    ctx: TenantContext,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiFailure> {
    let appointment_id = Uuid::parse_str(&id)
        .map_err(|_| BookingError::Validation("appointment id must be a UUID".to_string()))
        .map_err(fail(&ctx))?;
    let request: MoveRequest = serde_json::from_value(body)
        .map_err(|e| BookingError::Validation(e.to_string()))
        .map_err(fail(&ctx))?;

    let mut conn = state.pool.get().await.map_err(|e| {
        ApiFailure::new(
            BookingError::Storage(format!("connection pool: {e}")),
            ctx.request_id.clone(),
        )
    })?;
    let appointment =
        handlers::move_appointment(&mut conn, ctx.tenant_id, appointment_id, &request)
            .await
            .map_err(fail(&ctx))?;

    let status = appointment.lifecycle_status().map_err(fail(&ctx))?;
    Ok(success(
        StatusCode::OK,
        &ctx,
        MoveData {
            id: appointment.id,
            status,
            version: appointment.version,
        },
    ))
}

#[derive(Debug, Serialize)]
struct BoardData {
    columns: BoardColumns,
}

async fn get_board(
    ctx: TenantContext,
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> Result<Response, ApiFailure> {
    let date = parse_date(&query).map_err(fail(&ctx))?;
    let mut conn = state.pool.get().await.map_err(|e| {
        ApiFailure::new(
            BookingError::Storage(format!("connection pool: {e}")),
            ctx.request_id.clone(),
        )
    })?;
    let columns = board::get_board(&mut conn, ctx.tenant_id, date)
        .await
        .map_err(fail(&ctx))?;
    Ok(success(StatusCode::OK, &ctx, BoardData { columns }))
}

async fn get_stats(
    ctx: TenantContext,
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> Result<Response, ApiFailure> {
    let date = parse_date(&query).map_err(fail(&ctx))?;
    let mut conn = state.pool.get().await.map_err(|e| {
        ApiFailure::new(
            BookingError::Storage(format!("connection pool: {e}")),
            ctx.request_id.clone(),
        )
    })?;
    let stats = board::get_stats(&mut conn, ctx.tenant_id, date)
        .await
        .map_err(fail(&ctx))?;
    Ok(success(StatusCode::OK, &ctx, stats))
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_follow_the_taxonomy() {
        use AppointmentStatus::*;
        let cases = [
            (
                BookingError::TenantContextMissing("missing".into()),
                StatusCode::BAD_REQUEST,
                "tenant_context_missing",
            ),
            (
                BookingError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
                "validation_error",
            ),
            (BookingError::NotFound, StatusCode::NOT_FOUND, "not_found"),
            (
                BookingError::InvalidTransition {
                    from: InProgress,
                    to: Completed,
                },
                StatusCode::CONFLICT,
                "invalid_transition",
            ),
            (
                BookingError::VersionConflict {
                    expected: 1,
                    current_version: 2,
                    current_status: InProgress,
                },
                StatusCode::CONFLICT,
                "version_conflict",
            ),
            (
                BookingError::IdempotencyKeyConflict,
                StatusCode::CONFLICT,
                "idempotency_key_conflict",
            ),
            (
                BookingError::Storage("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ),
        ];
        for (error, status, code) in cases {
            assert_eq!(http_status(&error), status, "{error:?}");
            assert_eq!(error_code(&error), code, "{error:?}");
        }
    }

    #[test]
    fn version_conflict_envelope_carries_current_state() {
        let failure = ApiFailure::new(
            BookingError::VersionConflict {
                expected: 1,
                current_version: 2,
                current_status: AppointmentStatus::InProgress,
            },
            "req-1".to_string(),
        );
        let response = failure.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "req-1"
        );
    }

    #[test]
    fn storage_detail_is_not_leaked() {
        let failure = ApiFailure::new(
            BookingError::Storage("password=hunter2 connection refused".into()),
            "req-2".to_string(),
        );
        let response = failure.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn success_envelope_has_null_errors() {
        let envelope = Envelope {
            data: Some(serde_json::json!({"ok": true})),
            errors: None,
            meta: Meta {
                request_id: "req-3".to_string(),
            },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["errors"], serde_json::Value::Null);
        assert_eq!(json["meta"]["request_id"], "req-3");
        assert_eq!(json["data"]["ok"], true);
    }

    #[test]
    fn rejects_missing_and_malformed_dates() {
        assert!(parse_date(&DateQuery { date: None }).is_err());
        assert!(parse_date(&DateQuery {
            date: Some("01/10/2025".into())
        })
        .is_err());
        let parsed = parse_date(&DateQuery {
            date: Some("2025-01-10".into()),
        })
        .unwrap();
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
    }
}
