//! Model selection endpoints: `GET /models`, `GET /model`, `POST /model`.

use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::http::server::AppState;
use crate::observability::metrics;

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelList {
    pub models: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentModel {
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct SetModelRequest {
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelChanged {
    pub model: String,
    pub previous: String,
}

/// List the models installed on the backend.
pub async fn list_models(State(state): State<AppState>) -> Response {
    let start = Instant::now();
    let response = match state.runtime().backend.list_models().await {
        Ok(models) => Json(ModelList { models }).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list backend models");
            metrics::record_backend_error(e.kind());
            e.into_response()
        }
    };
    metrics::record_request("models", response.status().as_u16(), start);
    response
}

/// Report the current model.
pub async fn current_model(State(state): State<AppState>) -> Json<CurrentModel> {
    Json(CurrentModel {
        model: state.models.current().to_string(),
    })
}

/// Switch the current model and, if configured, warm it up in the background.
pub async fn set_model(
    State(state): State<AppState>,
    payload: Result<Json<SetModelRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return RelayError::from(rejection).into_response(),
    };

    let model = request.model.trim().to_string();
    if model.is_empty() {
        return RelayError::InvalidRequest("model must not be empty".into()).into_response();
    }

    let previous = state.models.set(model.clone());
    metrics::record_model_switch();
    tracing::info!(
        model = %model,
        previous = %previous,
        switches = state.models.switch_count(),
        "Current model changed"
    );

    let runtime = state.runtime();
    if runtime.config.models.warmup_on_switch && previous.as_str() != model {
        let backend = runtime.backend.clone();
        let keep_alive = runtime.config.models.keep_alive.clone();
        let name = model.clone();
        tokio::spawn(async move {
            match backend.warmup(&name, keep_alive.as_deref()).await {
                Ok(()) => tracing::info!(model = %name, "Model warmed up"),
                Err(e) => tracing::warn!(model = %name, error = %e, "Model warmup failed"),
            }
        });
    }

    Json(ModelChanged {
        model,
        previous: previous.to_string(),
    })
    .into_response()
}
