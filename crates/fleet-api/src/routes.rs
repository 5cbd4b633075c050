use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use fleet_core::SyncScope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{
    user_fingerprint, EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot,
};
use crate::store::{FleetStore, FleetWrite};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    jwt_verifier: Arc<JwtVerifier>,
    store: Arc<FleetStore>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: FleetStore) -> Self {
        Self {
            jwt_verifier: Arc::new(JwtVerifier::new(&config)),
            store: Arc::new(store),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/fleet", post(create_fleet))
        .route("/api/fleet/{fleet_id}", get(read_fleet).post(write_fleet))
        .route("/api/fleet/{fleet_id}/members", post(add_member))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(DefaultBodyLimit::max(state.config.max_payload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct FleetPayloadRequest {
    payload: Value,
}

#[derive(Debug, Default, Deserialize)]
struct CreateFleetRequest {
    payload: Option<Value>,
}

#[derive(Debug, Serialize)]
struct CreatedFleet {
    fleet_id: String,
}

#[derive(Debug, Serialize)]
struct FleetDocument {
    payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updater: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<i64>,
}

#[derive(Debug, Serialize)]
struct WriteAccepted {
    success: bool,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct AddMemberRequest {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct MemberAdded {
    fleet_id: String,
    user_id: String,
}

fn parse_fleet_id(raw: &str) -> Result<SyncScope, AppError> {
    SyncScope::parse(raw).map_err(|error| AppError::bad_request(error.to_string()))
}

fn require_object(payload: &Value) -> Result<(), AppError> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(AppError::bad_request("payload must be a JSON object"))
    }
}

async fn require_member(
    state: &AppState,
    fleet_id: &SyncScope,
    user: &AuthenticatedUser,
) -> Result<(), AppError> {
    if state.store.is_member(fleet_id.as_str(), &user.user_id).await? {
        Ok(())
    } else {
        Err(reject_non_member(fleet_id, user))
    }
}

fn reject_non_member(fleet_id: &SyncScope, user: &AuthenticatedUser) -> AppError {
    tracing::warn!(
        user = user_fingerprint(&user.user_id),
        fleet_id = fleet_id.as_str(),
        "Rejected request from non-member"
    );
    AppError::forbidden("not a member of this fleet")
}

async fn create_fleet(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreatedFleet>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::FleetWrite, &user.user_id)
        .await?;

    let request = if body.is_empty() {
        CreateFleetRequest::default()
    } else {
        serde_json::from_slice::<CreateFleetRequest>(&body)
            .map_err(|error| AppError::bad_request(error.to_string()))?
    };
    if let Some(payload) = &request.payload {
        require_object(payload)?;
    }

    let fleet_id = state
        .store
        .create_fleet(&user.user_id, request.payload.as_ref())
        .await?;
    tracing::info!(
        endpoint = "fleet_create",
        user = user_fingerprint(&user.user_id),
        fleet_id = fleet_id.as_str(),
        "Created fleet"
    );
    Ok((StatusCode::CREATED, Json(CreatedFleet { fleet_id })))
}

async fn read_fleet(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(fleet_id): Path<String>,
) -> Result<Json<FleetDocument>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::FleetRead, &user.user_id)
        .await?;
    let fleet_id = parse_fleet_id(&fleet_id)?;

    let Some(record) = state.store.load(fleet_id.as_str()).await? else {
        return Ok(Json(FleetDocument {
            payload: None,
            last_updater: None,
            updated_at: None,
        }));
    };
    require_member(&state, &fleet_id, &user).await?;

    Ok(Json(FleetDocument {
        payload: record.payload,
        last_updater: record.last_updater,
        updated_at: record.updated_at,
    }))
}

async fn write_fleet(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(fleet_id): Path<String>,
    Json(request): Json<FleetPayloadRequest>,
) -> Result<Json<WriteAccepted>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::FleetWrite, &user.user_id)
        .await?;
    let fleet_id = parse_fleet_id(&fleet_id)?;
    require_object(&request.payload)?;

    let write = state
        .store
        .write_snapshot(fleet_id.as_str(), &user.user_id, &request.payload)
        .await?;
    let FleetWrite::Stored {
        updated_at: timestamp,
        created,
    } = write
    else {
        return Err(reject_non_member(&fleet_id, &user));
    };

    tracing::info!(
        endpoint = "fleet_write",
        user = user_fingerprint(&user.user_id),
        session = user.session_id.as_deref().unwrap_or("none"),
        fleet_id = fleet_id.as_str(),
        created,
        "Stored fleet snapshot"
    );
    Ok(Json(WriteAccepted {
        success: true,
        timestamp,
    }))
}

async fn add_member(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(fleet_id): Path<String>,
    Json(request): Json<AddMemberRequest>,
) -> Result<Json<MemberAdded>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::FleetWrite, &user.user_id)
        .await?;
    let fleet_id = parse_fleet_id(&fleet_id)?;
    let member = request.user_id.trim();
    if member.is_empty() {
        return Err(AppError::bad_request("user_id must not be empty"));
    }

    if !state.store.fleet_exists(fleet_id.as_str()).await? {
        return Err(AppError::not_found("fleet does not exist"));
    }
    require_member(&state, &fleet_id, &user).await?;
    state.store.add_member(fleet_id.as_str(), member).await?;

    tracing::info!(
        endpoint = "fleet_members",
        user = user_fingerprint(&user.user_id),
        member = user_fingerprint(member),
        fleet_id = fleet_id.as_str(),
        "Added fleet member"
    );
    Ok(Json(MemberAdded {
        fleet_id: fleet_id.to_string(),
        user_id: member.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request as HttpRequest};
    use fleet_core::remote::{RemoteStore, TenantApiClient};
    use fleet_core::Snapshot;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::tests::token_for;
    use crate::config::tests::{config_from, TEST_SECRET};

    async fn app_with(extra: &[(&str, &str)]) -> Router {
        let mut pairs = vec![("FLEET_API_JWT_SECRET", TEST_SECRET)];
        pairs.extend_from_slice(extra);
        let config = Arc::new(config_from(&pairs).unwrap());
        let store = FleetStore::open_in_memory().await.unwrap();
        app_router(AppState::new(config, store))
    }

    async fn app() -> Router {
        app_with(&[]).await
    }

    fn request(method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, request: HttpRequest<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn create(app: &Router, user: &str, payload: Option<Value>) -> String {
        let body = payload.map(|payload| json!({ "payload": payload }));
        let (status, body) = send(app, request(Method::POST, "/v1/api/fleet", Some(user), body)).await;
        assert_eq!(status, StatusCode::CREATED);
        body["fleet_id"].as_str().unwrap().to_string()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn healthz_reports_rate_limit_metrics() {
        let app = app().await;
        let (status, body) = send(&app, request(Method::GET, "/healthz", None, None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
        assert_eq!(body["rate_limit"]["read_allowed"], json!(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fleet_routes_require_a_bearer_token() {
        let app = app().await;
        let (status, body) = send(&app, request(Method::GET, "/v1/api/fleet/abc", None, None)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("Authorization"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn created_fleet_is_readable_by_its_owner() {
        let app = app().await;
        let fleet_id = create(&app, "owner", Some(json!({"vehicles": [{"id": "v1"}]}))).await;

        let uri = format!("/v1/api/fleet/{fleet_id}");
        let (status, body) = send(&app, request(Method::GET, &uri, Some("owner"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payload"], json!({"vehicles": [{"id": "v1"}]}));
        assert_eq!(body["last_updater"], json!("owner"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_fleet_reads_as_null_payload() {
        let app = app().await;
        let (status, body) = send(
            &app,
            request(Method::GET, "/v1/api/fleet/never-written", Some("owner"), None),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"payload": null}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_members_are_forbidden() {
        let app = app().await;
        let fleet_id = create(&app, "owner", None).await;
        let uri = format!("/v1/api/fleet/{fleet_id}");

        let (status, _) = send(&app, request(Method::GET, &uri, Some("stranger"), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            request(Method::POST, &uri, Some("stranger"), Some(json!({"payload": {}}))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn added_member_can_write() {
        let app = app().await;
        let fleet_id = create(&app, "owner", None).await;
        let uri = format!("/v1/api/fleet/{fleet_id}");

        let (status, body) = send(
            &app,
            request(
                Method::POST,
                &format!("{uri}/members"),
                Some("owner"),
                Some(json!({"user_id": "driver"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], json!("driver"));

        let (status, body) = send(
            &app,
            request(Method::POST, &uri, Some("driver"), Some(json!({"payload": {"logs": []}}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert!(body["timestamp"].as_i64().unwrap() > 0);

        let (_, body) = send(&app, request(Method::GET, &uri, Some("owner"), None)).await;
        assert_eq!(body["last_updater"], json!("driver"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_write_creates_fleet_for_caller() {
        let app = app().await;
        let uri = "/v1/api/fleet/shared-code";

        let (status, _) = send(
            &app,
            request(Method::POST, uri, Some("first"), Some(json!({"payload": {"works": []}}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, request(Method::GET, uri, Some("first"), None)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, request(Method::GET, uri, Some("second"), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_fleet_id_and_payload_are_rejected() {
        let app = app().await;

        let (status, _) = send(
            &app,
            request(Method::GET, "/v1/api/fleet/bad%20id", Some("owner"), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            request(Method::POST, "/v1/api/fleet/alpha", Some("owner"), Some(json!({"payload": [1, 2]}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("JSON object"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reads_are_rate_limited_with_retry_after() {
        let app = app_with(&[("FLEET_READ_RATE_LIMIT_PER_WINDOW", "1")]).await;
        let uri = "/v1/api/fleet/alpha";

        let (status, _) = send(&app, request(Method::GET, uri, Some("owner"), None)).await;
        assert_eq!(status, StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request(Method::GET, uri, Some("owner"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tenant_client_round_trips_through_the_server() {
        let router = app().await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let client =
            TenantApiClient::new(&format!("http://{addr}/v1"), Duration::from_secs(5)).unwrap();
        client.set_credential(Some(&token_for("owner")));

        let initial = Snapshot {
            vehicles: vec![json!({"id": "v1"})],
            ..Snapshot::default()
        }
        .with_timestamp(10);
        let scope = client.create_scope(&initial).await.unwrap();
        assert_eq!(client.pull(&scope).await.unwrap(), Some(initial));

        let updated = Snapshot::default().with_timestamp(20);
        client.push(&scope, &updated).await.unwrap();
        assert_eq!(client.pull(&scope).await.unwrap(), Some(updated));

        let unknown = SyncScope::parse("nobody-wrote-here").unwrap();
        assert_eq!(client.pull(&unknown).await.unwrap(), None);
    }
}
