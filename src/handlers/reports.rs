// src/handlers/reports.rs
//! Chart endpoint backing the assistant's metric/anomaly layouts.

use crate::errors::ErrorResponse;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::SecurePermissions;
use crate::tools::reports::{GraphTime, ObjectId};
use crate::AppState;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn report_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/reports/charts", post(generate_chart))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(Extension(state))
}

#[derive(Debug, Deserialize)]
struct ChartRequest {
    object_id: String,
    metrics: Vec<String>,
    time_range: GraphTime,
    #[serde(default)]
    anomalies_requested: bool,
}

/// POST /api/reports/charts
async fn generate_chart(
    Extension(state): Extension<Arc<AppState>>,
    Extension(SecurePermissions(token)): Extension<SecurePermissions>,
    Json(request): Json<ChartRequest>,
) -> impl IntoResponse {
    let Some(reports_tool) = &state.reports_tool else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                success: false,
                message: "Report charts are not configured".to_string(),
            }),
        )
            .into_response();
    };

    let object_id = match ObjectId::parse(&request.object_id) {
        Ok(object_id) => object_id,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    success: false,
                    message: e,
                }),
            )
                .into_response();
        }
    };

    match reports_tool
        .metric_anomaly_helper(
            &token,
            &object_id,
            &request.metrics,
            request.time_range,
            request.anomalies_requested,
        )
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            tracing::error!("chart generation failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    success: false,
                    message: "Chart generation failed".to_string(),
                }),
            )
                .into_response()
        }
    }
}
