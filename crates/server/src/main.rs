use std::{net::SocketAddr, sync::Arc};

use axum::{extract::Query, extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Deserialize;
use shared::{
    error::{ApiError, ErrorCode},
    protocol::LoginResponse,
};
use storage::Storage;
use tracing::{error, info, warn};

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    storage: Storage,
}

/// Both fields are optional so a missing one is answered with an `ApiError`
/// rather than axum's plain-text extractor rejection.
#[derive(Debug, Deserialize)]
struct LoginParams {
    voter_id: Option<String>,
    password: Option<String>,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let app = build_router(Arc::new(AppState { storage }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "login server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/login", get(login))
        .with_state(state)
}

async fn index() -> &'static str {
    "Backend server is running!"
}

async fn healthz(State(state): State<Arc<AppState>>) -> ApiResult<&'static str> {
    state.storage.health_check().await.map_err(|e| {
        error!(error = %e, "storage health check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Internal, e.to_string())),
        )
    })?;
    Ok("ok")
}

async fn login(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LoginParams>,
) -> ApiResult<(StatusCode, Json<LoginResponse>)> {
    let (Some(voter_id), Some(password)) = (params.voter_id, params.password) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                ErrorCode::Validation,
                "voter_id and password are required",
            )),
        ));
    };

    let role = state
        .storage
        .verify_credentials(&voter_id, &password)
        .await
        .map_err(|e| {
            error!(%voter_id, error = %e, "credential lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new(ErrorCode::Internal, e.to_string())),
            )
        })?;

    match role {
        Some(role) => {
            info!(%voter_id, %role, "login granted");
            Ok((StatusCode::OK, Json(LoginResponse::granted(role))))
        }
        None => {
            warn!(%voter_id, "login denied");
            Ok((
                StatusCode::UNAUTHORIZED,
                Json(LoginResponse::denied("Invalid credentials")),
            ))
        }
    }
}
