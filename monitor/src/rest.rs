use crate::auth::bearer_token;
use crate::errors::Error;
use crate::metrics::ADMIN_REQUESTS_TOTAL;
use crate::model::{
    ActivityTrend, CellSubmission, ConnectedDevice, DeviceActivity, DeviceCountResponse,
    DeviceKey, DeviceStatistics, TrendInterval,
};
use crate::reporter::ConnectedDeviceReporter;
use crate::validate::parse_date_range;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Clone)]
struct AppState {
    reporter: ConnectedDeviceReporter,
    window: Duration,
}

pub fn create_router(reporter: ConnectedDeviceReporter, window: Duration) -> Router {
    let state = AppState { reporter, window };

    Router::new()
        .route(
            "/admin/currently_connected_devices",
            get(currently_connected_devices),
        )
        .route(
            "/admin/previously_connected_devices",
            get(previously_connected_devices),
        )
        .route(
            "/admin/connected_devices_count",
            get(connected_devices_count),
        )
        .route("/admin/network_type_summary", get(network_type_summary))
        .route("/admin/operator_summary", get(operator_summary))
        .route("/admin/signal_power_summary", get(signal_power_summary))
        .route("/admin/sinr_summary", get(sinr_summary))
        .route("/admin/device_activity_trend", get(device_activity_trend))
        .route("/admin/device_statistics", get(device_statistics))
        .route("/submit_data", post(submit_data))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrendParams {
    start_date: Option<String>,
    end_date: Option<String>,
    #[serde(default)]
    interval: TrendInterval,
}

#[derive(Debug, Deserialize)]
struct DeviceParams {
    username: Option<String>,
    device_id: Option<String>,
}

fn required(name: &str, value: Option<String>) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError(Error::Validation(format!("{} is required", name))))
}

async fn currently_connected_devices(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConnectedDevice>>, AppError> {
    ADMIN_REQUESTS_TOTAL
        .with_label_values(&["currently_connected_devices"])
        .inc();

    let devices = state
        .reporter
        .list_connected_devices(bearer_token(&headers), Utc::now(), state.window)
        .await?;

    Ok(Json(devices))
}

async fn previously_connected_devices(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DeviceActivity>>, AppError> {
    ADMIN_REQUESTS_TOTAL
        .with_label_values(&["previously_connected_devices"])
        .inc();

    let devices = state
        .reporter
        .list_known_devices(bearer_token(&headers))
        .await?;

    Ok(Json(devices))
}

async fn connected_devices_count(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DeviceCountResponse>, AppError> {
    ADMIN_REQUESTS_TOTAL
        .with_label_values(&["connected_devices_count"])
        .inc();

    let connected_devices = state
        .reporter
        .count_known_devices(bearer_token(&headers))
        .await?;

    Ok(Json(DeviceCountResponse { connected_devices }))
}

async fn network_type_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RangeParams>,
) -> Result<Json<BTreeMap<String, String>>, AppError> {
    ADMIN_REQUESTS_TOTAL
        .with_label_values(&["network_type_summary"])
        .inc();

    let range = parse_date_range(params.start_date.as_deref(), params.end_date.as_deref())?;
    let summary = state
        .reporter
        .network_type_summary(bearer_token(&headers), range)
        .await?;

    Ok(Json(summary))
}

async fn operator_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RangeParams>,
) -> Result<Json<BTreeMap<String, String>>, AppError> {
    ADMIN_REQUESTS_TOTAL
        .with_label_values(&["operator_summary"])
        .inc();

    let range = parse_date_range(params.start_date.as_deref(), params.end_date.as_deref())?;
    let summary = state
        .reporter
        .operator_summary(bearer_token(&headers), range)
        .await?;

    Ok(Json(summary))
}

async fn signal_power_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RangeParams>,
) -> Result<Json<BTreeMap<String, f64>>, AppError> {
    ADMIN_REQUESTS_TOTAL
        .with_label_values(&["signal_power_summary"])
        .inc();

    let range = parse_date_range(params.start_date.as_deref(), params.end_date.as_deref())?;
    let summary = state
        .reporter
        .signal_power_summary(bearer_token(&headers), range)
        .await?;

    Ok(Json(summary))
}

async fn sinr_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RangeParams>,
) -> Result<Json<BTreeMap<String, f64>>, AppError> {
    ADMIN_REQUESTS_TOTAL.with_label_values(&["sinr_summary"]).inc();

    let range = parse_date_range(params.start_date.as_deref(), params.end_date.as_deref())?;
    let summary = state
        .reporter
        .sinr_summary(bearer_token(&headers), range)
        .await?;

    Ok(Json(summary))
}

async fn device_activity_trend(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TrendParams>,
) -> Result<Json<ActivityTrend>, AppError> {
    ADMIN_REQUESTS_TOTAL
        .with_label_values(&["device_activity_trend"])
        .inc();

    let range = parse_date_range(params.start_date.as_deref(), params.end_date.as_deref())?;
    let trend = state
        .reporter
        .device_activity_trend(bearer_token(&headers), range, params.interval)
        .await?;

    Ok(Json(trend))
}

async fn device_statistics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DeviceParams>,
) -> Result<Json<DeviceStatistics>, AppError> {
    ADMIN_REQUESTS_TOTAL
        .with_label_values(&["device_statistics"])
        .inc();

    let key = DeviceKey {
        username: required("username", params.username)?,
        device_id: required("device_id", params.device_id)?,
    };
    let stats = state
        .reporter
        .device_statistics(bearer_token(&headers), key)
        .await?;

    Ok(Json(stats))
}

async fn submit_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(submission): Json<CellSubmission>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    state
        .reporter
        .submit_cell_data(bearer_token(&headers), submission, Utc::now())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Data submitted successfully" })),
    ))
}

struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if self.0.is_authorization() {
            warn!("Request rejected: {}", self.0);
            self.0.to_string()
        } else if status.is_client_error() {
            debug!("Bad request: {}", self.0);
            self.0.to_string()
        } else {
            error!("API error: {}", self.0);
            "Activity store unavailable".to_string()
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}
