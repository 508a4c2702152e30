//! HTTP server
//!
//! Route table, error-to-status mapping, CORS and the serve loop. All
//! domain logic lives in the auth and calendar modules; handlers here only
//! authenticate, delegate and shape responses.

mod auth_routes;
mod calendar_routes;
mod cookies;
mod live;
mod state;

pub use state::AppState;

use crate::auth::AuthError;
use crate::calendar::CalendarError;
use crate::storage::StorageError;
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Unified handler error; every domain rejection maps to one HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Auth(AuthError::Store(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Auth(err) => match err {
                AuthError::Unauthenticated => {
                    (StatusCode::UNAUTHORIZED, err.to_string())
                }
                AuthError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.to_string()),
                AuthError::EmailTaken => (StatusCode::CONFLICT, err.to_string()),
                AuthError::TokenExpiredOrInvalid => (StatusCode::GONE, err.to_string()),
                AuthError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, err.to_string()),
                AuthError::Store(e) => {
                    error!(error = %e, "Store failure");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    )
                }
            },
            ApiError::Calendar(err) => match err {
                CalendarError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
                CalendarError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.to_string()),
                CalendarError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
                CalendarError::Store(e) => {
                    error!(error = %e, "Store failure");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    )
                }
            },
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::Auth(self).into_response()
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Build the full route table.
pub fn create_router(state: AppState) -> Router {
    let cors = match state.settings.frontend_url.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::PUT,
                Method::DELETE,
            ])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                HeaderName::from_static("x-csrf-token"),
            ]),
        Err(_) => CorsLayer::new(),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/signup", post(auth_routes::signup))
        .route("/auth/login", post(auth_routes::login))
        .route("/auth/refresh", post(auth_routes::refresh))
        .route("/auth/logout", post(auth_routes::logout))
        .route("/auth/session", get(auth_routes::session))
        .route(
            "/auth/verify-email/resend",
            post(auth_routes::resend_verify_email),
        )
        .route(
            "/auth/verify-email/confirm",
            post(auth_routes::confirm_email),
        )
        .route("/auth/password/forgot", post(auth_routes::forgot_password))
        .route("/auth/password/reset", post(auth_routes::reset_password))
        .route("/profile/password", post(auth_routes::change_password))
        .route("/invites", post(auth_routes::create_invite))
        .route("/invites/accept", post(auth_routes::accept_invite))
        .route(
            "/calendars",
            get(calendar_routes::list_lenses).post(calendar_routes::create_lens),
        )
        .route(
            "/calendars/{id}",
            patch(calendar_routes::patch_lens)
                .get(calendar_routes::get_lens)
                .delete(calendar_routes::delete_lens),
        )
        .route(
            "/events",
            get(calendar_routes::list_entries).post(calendar_routes::create_entry),
        )
        .route(
            "/events/{id}",
            patch(calendar_routes::patch_entry)
                .get(calendar_routes::get_entry)
                .delete(calendar_routes::delete_entry),
        )
        .route("/live/ws", get(live::live_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn run_server(
    bind_addr: SocketAddr,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}
