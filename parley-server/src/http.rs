//! Parley HTTP API
//!
//! Axum server exposing registration, login and chat endpoints to the web
//! client. Session state lives in an HttpOnly cookie holding a signed token.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(status, json)`. The inner functions are directly
//! testable without going through the router.
//!
//! Endpoints:
//! - GET    /health: health check with store status
//! - GET    /version: server version info
//! - POST   /api/auth/register: create an account, sets the session cookie
//! - POST   /api/auth/login: sign in, sets the session cookie
//! - POST   /api/auth/logout: clears the session cookie
//! - GET    /api/chat/all: the caller's chats, newest first
//! - POST   /api/chat/:chat_id/message: send a prompt (`new` starts a chat)
//! - GET    /api/chat/:chat_id/messages: a chat's exchanges, oldest first
//! - DELETE /api/chat/:chat_id: delete a chat and its exchanges

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use parley_core::config::AuthConfig;
use parley_core::{
    AuthService, CompletionBackend, ConversationOrchestrator, LoginRequest, ParleyConfig,
    ParleyError, RegisterRequest, Stores,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::session::CurrentUser;

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub auth: AuthService,
    pub orchestrator: ConversationOrchestrator,
    pub stores: Stores,
    pub config: ParleyConfig,
}

impl HttpState {
    pub fn new(
        config: ParleyConfig,
        stores: Stores,
        completions: Arc<dyn CompletionBackend>,
    ) -> Self {
        let auth = AuthService::new(stores.credentials.clone(), &config.auth);
        let orchestrator = ConversationOrchestrator::new(
            stores.conversations.clone(),
            completions,
            config.chat.clone(),
        );
        Self {
            auth,
            orchestrator,
            stores,
            config,
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/auth/register", post(register_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/chat/all", get(view_chats_handler))
        .route("/api/chat/:chat_id/message", post(create_prompt_handler))
        .route("/api/chat/:chat_id/messages", get(view_prompts_handler))
        .route("/api/chat/:chat_id", delete(delete_chat_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentialed CORS. An empty origin list mirrors whatever origin calls.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        tracing::warn!("No allowed origins configured; CORS mirrors any request origin with credentials");
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: HttpState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);

    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Parley HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct PromptRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub model: String,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

/// Result of an auth endpoint: the reply plus a token to set as the session cookie.
#[derive(Debug)]
pub struct AuthReply {
    pub status: StatusCode,
    pub body: serde_json::Value,
    pub token: Option<String>,
}

// ============================================================================
// Error mapping
// ============================================================================

pub fn status_for(err: &ParleyError) -> StatusCode {
    match err {
        ParleyError::Validation(_) | ParleyError::UnknownModel(_) => StatusCode::BAD_REQUEST,
        ParleyError::Conflict(_) => StatusCode::CONFLICT,
        ParleyError::NotFound(_) => StatusCode::NOT_FOUND,
        ParleyError::Auth(_) => StatusCode::FORBIDDEN,
        ParleyError::InvalidToken => StatusCode::UNAUTHORIZED,
        ParleyError::Upstream(_) | ParleyError::Storage(_) | ParleyError::Migration(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ParleyError::Config(_) | ParleyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Client errors carry their own message; server errors are logged and
/// answered with the operation's generic `fallback` message.
pub fn error_reply(err: &ParleyError, fallback: &str) -> (StatusCode, serde_json::Value) {
    let status = status_for(err);
    let message = if status.is_server_error() {
        tracing::error!(error = %err, "{}", fallback);
        fallback.to_string()
    } else {
        if matches!(err, ParleyError::Auth(_) | ParleyError::InvalidToken) {
            tracing::warn!(error = %err, "Rejected credentials");
        }
        err.to_string()
    };
    (status, json!(ErrorResponse::new(message)))
}

/// A `ParleyError` paired with the generic message used if it is a server error.
#[derive(Debug)]
pub struct ApiError {
    error: ParleyError,
    fallback: &'static str,
}

impl ApiError {
    pub fn new(error: ParleyError, fallback: &'static str) -> Self {
        Self { error, fallback }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = error_reply(&self.error, self.fallback);
        (status, Json(body)).into_response()
    }
}

/// `Json` whose rejections (bad syntax, wrong field types, missing
/// content type) become a 400 `ErrorResponse` instead of plain text.
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(ApiError::new(
                ParleyError::Validation(rejection.body_text()),
                "Invalid request body",
            )),
        }
    }
}

pub fn session_cookie(auth: &AuthConfig, token: String) -> Cookie<'static> {
    Cookie::build((auth.cookie_name.clone(), token))
        .http_only(true)
        .path("/")
        .same_site(SameSite::Lax)
        .secure(auth.secure_cookies)
        .build()
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: asks the store backend and returns (status_code, json_body).
pub async fn health_inner(stores: &Stores) -> (StatusCode, serde_json::Value) {
    match stores.conversations.health().await {
        Ok(store) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": store,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "parley",
    })
}

pub async fn register_inner(auth: &AuthService, req: RegisterRequest) -> AuthReply {
    match auth.register(req).await {
        Ok(session) => AuthReply {
            status: StatusCode::CREATED,
            body: json!({
                "message": "User registered successfully",
                "user": session.user.public(),
            }),
            token: Some(session.token),
        },
        Err(e) => {
            let (status, body) = error_reply(&e, "User registration failed");
            AuthReply {
                status,
                body,
                token: None,
            }
        }
    }
}

pub async fn login_inner(auth: &AuthService, req: LoginRequest) -> AuthReply {
    match auth.login(req).await {
        Ok(session) => AuthReply {
            status: StatusCode::OK,
            body: json!({
                "message": "Logged in successfully",
                "user": session.user.public(),
            }),
            token: Some(session.token),
        },
        Err(e) => {
            let (status, body) = error_reply(&e, "Login failed");
            AuthReply {
                status,
                body,
                token: None,
            }
        }
    }
}

pub async fn create_prompt_inner(
    orchestrator: &ConversationOrchestrator,
    owner_id: Uuid,
    chat_ref: &str,
    req: PromptRequest,
) -> (StatusCode, serde_json::Value) {
    if req.model.trim().is_empty() {
        return error_reply(
            &ParleyError::Validation("Model is required".to_string()),
            "Failed to generate response",
        );
    }

    match orchestrator
        .create_prompt(owner_id, chat_ref, &req.prompt, &req.model)
        .await
    {
        Ok(reply) => (
            StatusCode::CREATED,
            json!({
                "message": "Response generated successfully",
                "chatId": reply.chat_id,
                "title": reply.title,
                "response": reply.response,
            }),
        ),
        Err(e) => error_reply(&e, "Failed to generate response"),
    }
}

pub async fn view_chats_inner(
    orchestrator: &ConversationOrchestrator,
    owner_id: Uuid,
) -> (StatusCode, serde_json::Value) {
    match orchestrator.view_chats(owner_id).await {
        Ok(chats) => (
            StatusCode::OK,
            json!({
                "message": "Chats fetched successfully",
                "chats": chats,
            }),
        ),
        Err(e) => error_reply(&e, "Failed to fetch chats"),
    }
}

pub async fn view_prompts_inner(
    orchestrator: &ConversationOrchestrator,
    owner_id: Uuid,
    chat_ref: &str,
) -> (StatusCode, serde_json::Value) {
    match orchestrator.view_prompts(owner_id, chat_ref).await {
        Ok(prompts) => (
            StatusCode::OK,
            json!({
                "message": "Prompts fetched successfully",
                "prompts": prompts,
            }),
        ),
        Err(e) => error_reply(&e, "Failed to fetch prompts"),
    }
}

pub async fn delete_chat_inner(
    orchestrator: &ConversationOrchestrator,
    owner_id: Uuid,
    chat_ref: &str,
) -> (StatusCode, serde_json::Value) {
    match orchestrator.delete_chat(owner_id, chat_ref).await {
        Ok(()) => (
            StatusCode::OK,
            json!({ "message": "Chat deleted successfully" }),
        ),
        Err(e) => error_reply(&e, "Failed to delete chat"),
    }
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.stores).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

fn auth_response(state: &HttpState, jar: CookieJar, reply: AuthReply) -> Response {
    let jar = match reply.token {
        Some(token) => jar.add(session_cookie(&state.config.auth, token)),
        None => jar,
    };
    (reply.status, jar, Json(reply.body)).into_response()
}

pub async fn register_handler(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Response {
    let reply = register_inner(&state.auth, req).await;
    auth_response(&state, jar, reply)
}

pub async fn login_handler(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Response {
    let reply = login_inner(&state.auth, req).await;
    auth_response(&state, jar, reply)
}

pub async fn logout_handler(State(state): State<Arc<HttpState>>, jar: CookieJar) -> Response {
    let removal = Cookie::build((state.config.auth.cookie_name.clone(), "")).path("/");
    (
        StatusCode::OK,
        jar.remove(removal),
        Json(json!({ "message": "User logged out" })),
    )
        .into_response()
}

pub async fn view_chats_handler(
    State(state): State<Arc<HttpState>>,
    CurrentUser(user): CurrentUser,
) -> impl IntoResponse {
    let (status, body) = view_chats_inner(&state.orchestrator, user.id).await;
    (status, Json(body))
}

pub async fn create_prompt_handler(
    State(state): State<Arc<HttpState>>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<String>,
    JsonBody(req): JsonBody<PromptRequest>,
) -> impl IntoResponse {
    let (status, body) = create_prompt_inner(&state.orchestrator, user.id, &chat_id, req).await;
    (status, Json(body))
}

pub async fn view_prompts_handler(
    State(state): State<Arc<HttpState>>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = view_prompts_inner(&state.orchestrator, user.id, &chat_id).await;
    (status, Json(body))
}

pub async fn delete_chat_handler(
    State(state): State<Arc<HttpState>>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = delete_chat_inner(&state.orchestrator, user.id, &chat_id).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
