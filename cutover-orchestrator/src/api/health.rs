//! Health Check API Handler
//!
//! Liveness endpoint for monitoring.

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::AppState;

/// GET /health
/// Liveness plus the number of environments served
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "environments": state.fleet.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Fleet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_health_reports_environment_count() {
        let state = AppState::new(Arc::new(Fleet::new()));
        let Json(body) = health_check(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["environments"], 0);
    }
}
