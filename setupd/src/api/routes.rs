use std::sync::Arc;
use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use shared::protocol::{
    DEFAULT_DNS_PORT, DEFAULT_WEB_PORT, INSTALL_CHECK_CONFIG, INSTALL_CONFIGURE,
    INSTALL_GET_ADDRESSES, OK_BODY,
};
use shared::types::{CheckConfigRequest, CheckConfigResponse, ConfigureRequest, FirstRunData};
use crate::config::SharedConfig;
use crate::conflict::ConflictResolver;
use crate::error::SetupError;
use crate::probe::interfaces::InterfaceSource;
use crate::reconfigure::Reconfigurer;

#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    pub resolver: Arc<ConflictResolver>,
    pub reconfigurer: Arc<Reconfigurer>,
    pub interfaces: Arc<dyn InterfaceSource>,
}

/// Plain-text error reply
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<SetupError> for ApiError {
    fn from(e: SetupError) -> Self {
        let status = if e.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::info!("{} {}", self.status.as_u16(), self.message);
        (self.status, format!("{}\n", self.message)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(INSTALL_GET_ADDRESSES, get(get_addresses))
        .route(INSTALL_CHECK_CONFIG, post(check_config))
        .route(INSTALL_CONFIGURE, post(configure))
        .route_layer(middleware::from_fn_with_state(state.clone(), pre_install))
        .with_state(state)
}

/// Install routes exist only until the first configuration is applied
async fn pre_install(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.config.setup_incomplete() {
        return ApiError::new(StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
    next.run(request).await
}

async fn get_addresses(State(state): State<AppState>) -> Result<Json<FirstRunData>, ApiError> {
    let interfaces = tokio::task::spawn_blocking(move || state.interfaces.list())
        .await
        .map_err(internal)?
        .map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Couldn't get interfaces: {:#}", e),
            )
        })?;

    Ok(Json(FirstRunData {
        web_port: DEFAULT_WEB_PORT,
        dns_port: DEFAULT_DNS_PORT,
        interfaces: interfaces
            .into_iter()
            .map(|iface| (iface.name.clone(), iface))
            .collect(),
    }))
}

async fn check_config(
    State(state): State<AppState>,
    body: Result<Json<CheckConfigRequest>, JsonRejection>,
) -> Result<Json<CheckConfigResponse>, ApiError> {
    let Json(request) = body.map_err(|e| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Failed to parse 'check_config' JSON data: {}", e.body_text()),
        )
    })?;

    let (_, current_web_port) = state.config.web_bind();
    let response =
        tokio::task::spawn_blocking(move || state.resolver.check(&request, current_web_port))
            .await
            .map_err(internal)?;

    Ok(Json(response))
}

async fn configure(
    State(state): State<AppState>,
    body: Result<Json<ConfigureRequest>, JsonRejection>,
) -> Result<&'static str, ApiError> {
    let Json(request) = body.map_err(|e| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Failed to parse 'configure' JSON: {}", e.body_text()),
        )
    })?;

    let applied = tokio::task::spawn_blocking(move || state.reconfigurer.configure(&request))
        .await
        .map_err(internal)??;
    if applied.restart_http {
        tracing::info!("Web interface will move to the new address");
    }

    Ok(OK_BODY)
}

fn internal(e: tokio::task::JoinError) -> ApiError {
    tracing::error!("Install task failed: {}", e);
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}
