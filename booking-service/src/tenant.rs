use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;
use shared::BookingError;

use crate::api::ApiFailure;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// Verified per-request identity, resolved before any tenant-scoped work.
///
/// Authentication itself happens upstream; this resolver only consumes the
/// already-verified headers and fails closed when either the identity or the
/// tenant id is absent. The context is threaded through every operation as an
/// explicit parameter, never stashed in shared state.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub request_id: String,
    pub idempotency_key: Option<String>,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = ApiFailure;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let request_id = header_string(headers, REQUEST_ID_HEADER)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let reject = |detail: &str, request_id: &str| {
            ApiFailure::new(
                BookingError::TenantContextMissing(detail.to_string()),
                request_id.to_string(),
            )
        };

        if header_string(headers, AUTHORIZATION.as_str()).is_none() {
            return Err(reject("missing Authorization header", &request_id));
        }

        let raw_tenant = header_string(headers, TENANT_HEADER)
            .ok_or_else(|| reject("missing X-Tenant-Id header", &request_id))?;
        let tenant_id = Uuid::parse_str(raw_tenant.trim())
            .map_err(|_| reject("malformed X-Tenant-Id header", &request_id))?;

        let idempotency_key = header_string(headers, IDEMPOTENCY_KEY_HEADER);

        Ok(TenantContext {
            tenant_id,
            request_id,
            idempotency_key,
        })
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Binds the resolved tenant to the connection's row-level-security filter
/// for the current transaction only (`set_config(..., is_local => true)`),
/// so the binding cannot leak across pooled connections or requests.
///
/// Must be the first statement of every tenant-scoped transaction.
pub async fn bind_tenant(conn: &mut AsyncPgConnection, tenant: Uuid) -> Result<(), BookingError> {
    diesel::sql_query("SELECT set_config('app.current_tenant', $1, true)")
        .bind::<diesel::sql_types::Text, _>(tenant.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    async fn echo_tenant(ctx: TenantContext) -> String {
        ctx.tenant_id.to_string()
    }

    fn app() -> Router {
        Router::new().route("/whoami", get(echo_tenant))
    }

    fn request(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/whoami");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn resolves_tenant_from_headers() {
        let tenant = Uuid::new_v4();
        let res = app()
            .oneshot(request(&[
                ("authorization", "Bearer test-token"),
                ("x-tenant-id", &tenant.to_string()),
            ]))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], tenant.to_string().as_bytes());
    }

    #[tokio::test]
    async fn fails_closed_without_tenant_header() {
        let res = app()
            .oneshot(request(&[("authorization", "Bearer test-token")]))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(res.into_body(), 4096).await.unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            envelope["errors"][0]["code"],
            serde_json::json!("tenant_context_missing")
        );
    }

    #[tokio::test]
    async fn fails_closed_without_authorization() {
        let tenant = Uuid::new_v4().to_string();
        let res = app()
            .oneshot(request(&[("x-tenant-id", &tenant)]))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rejects_malformed_tenant_id() {
        let res = app()
            .oneshot(request(&[
                ("authorization", "Bearer test-token"),
                ("x-tenant-id", "not-a-uuid"),
            ]))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_headers_count_as_missing() {
        let res = app()
            .oneshot(request(&[
                ("authorization", ""),
                ("x-tenant-id", &Uuid::new_v4().to_string()),
            ]))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
