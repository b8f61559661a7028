//! Analysis and outlier listing endpoints

use axum::{extract::State, routing::get, Json, Router};
use ctm_common::db::OutlierLog;
use serde::Serialize;

use crate::error::ApiResult;
use crate::AppState;

/// Outliers included in the analysis snapshot
pub const RECENT_OUTLIER_LIMIT: i64 = 5;

/// Outliers returned by GET /api/outliers
pub const OUTLIER_LIST_LIMIT: i64 = 50;

/// Aggregate trial statistics
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStats {
    pub patient_count: i64,
    /// 0 when no symptoms are stored
    pub avg_severity: f64,
    pub outlier_count: i64,
}

/// GET /api/analysis response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub stats: TrialStats,
    pub recent_outliers: Vec<OutlierLog>,
}

/// GET /api/analysis
///
/// Patient count, mean symptom severity, outlier count and the most recently
/// detected outliers.
pub async fn get_analysis(State(state): State<AppState>) -> ApiResult<Json<AnalysisResponse>> {
    let patient_count = state.store.count_patients().await?;
    let avg_severity = state.store.avg_symptom_severity().await?.unwrap_or(0.0);
    let outlier_count = state.store.count_outlier_logs().await?;
    let recent_outliers = state.store.recent_outliers(RECENT_OUTLIER_LIMIT).await?;

    tracing::debug!(patient_count, outlier_count, "Analysis snapshot");

    Ok(Json(AnalysisResponse {
        stats: TrialStats {
            patient_count,
            avg_severity,
            outlier_count,
        },
        recent_outliers,
    }))
}

/// GET /api/outliers
///
/// Latest outliers by clinical event time.
pub async fn list_outliers(State(state): State<AppState>) -> ApiResult<Json<Vec<OutlierLog>>> {
    let outliers = state.store.outliers_by_reported_date(OUTLIER_LIST_LIMIT).await?;
    Ok(Json(outliers))
}

/// Build analysis routes
pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/api/analysis", get(get_analysis))
        .route("/api/outliers", get(list_outliers))
}
