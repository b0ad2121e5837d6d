// Request handlers for the REST facade

use crate::ai::{AskRequest, VisionClient};
use crate::detect::{detect_python, PythonInfo};
use crate::error::KeeperError;
use crate::http::error::ApiError;
use crate::http::protocol::{
    AskResponse, ConfigResponse, ConfigSummary, DetectResponse, HealthResponse, StartRequest,
    StartResponse, StatusResponse, StopResponse,
};
use crate::process::{StartReport, Supervisor};
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
    pub vision: VisionClient,
}

/// Parse a JSON body; an empty body means "no fields"
fn parse_body<T>(body: &Bytes) -> std::result::Result<T, ApiError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    serde_json::from_slice(body)
        .map_err(|e| ApiError(KeeperError::InvalidRequest(format!("Malformed request body: {}", e))))
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "labkeeper",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "health": "GET /api/health",
            "status": "GET /api/status",
            "start": "POST /api/start",
            "stop": "POST /api/stop",
            "restart": "POST /api/restart",
            "detect_python": "GET /api/detect_python",
            "save_config": "POST /api/save_config",
            "load_config": "GET /api/load_config",
            "ai_ask": "POST /api/ai/ask"
        },
        "message": "labkeeper API is running"
    }))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "labkeeper API is running".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.supervisor.status().await;
    let stored = state.supervisor.config_store().current();

    Json(StatusResponse {
        status: snapshot,
        config: ConfigSummary {
            python_executable: stored.python_executable,
            project_dir: stored.project_dir,
        },
    })
}

fn start_response(report: StartReport, message: &str) -> StartResponse {
    StartResponse {
        success: true,
        message: message.to_string(),
        port: report.port,
        url: report.url,
        pid: report.pid,
        auto_restart: report.auto_restart,
        open_file: report.open_file,
    }
}

pub async fn start(State(state): State<AppState>, body: Bytes) -> ApiResult<StartResponse> {
    let request: StartRequest = parse_body(&body)?;
    let overrides = request.to_overrides()?;

    let report = state.supervisor.start(overrides).await?;
    Ok(Json(start_response(report, "Notebook server started")))
}

pub async fn stop(State(state): State<AppState>) -> ApiResult<StopResponse> {
    let outcome = state.supervisor.stop().await?;

    Ok(Json(StopResponse {
        success: true,
        message: outcome.message().to_string(),
        was_running: outcome.was_running(),
    }))
}

pub async fn restart(State(state): State<AppState>, body: Bytes) -> ApiResult<StartResponse> {
    let request: StartRequest = parse_body(&body)?;
    let overrides = request.to_overrides()?;

    let report = state.supervisor.restart(overrides).await?;
    Ok(Json(start_response(report, "Notebook server restarted")))
}

pub async fn detect(State(state): State<AppState>) -> Json<DetectResponse> {
    let interpreter = state.supervisor.config_store().current().python_executable;

    let response = match detect_python(&interpreter).await {
        Ok(info) => {
            let message = if info.jupyterlab_installed {
                "Python environment detected".to_string()
            } else if info.notebook_installed {
                "JupyterLab is not installed, classic Notebook is available".to_string()
            } else {
                "Neither JupyterLab nor Notebook is installed".to_string()
            };
            DetectResponse {
                success: info.jupyterlab_installed || info.notebook_installed,
                message,
                info,
            }
        }
        Err(e) => {
            tracing::warn!("Python detection failed for {}: {}", interpreter, e);
            DetectResponse {
                success: false,
                message: e.to_string(),
                info: PythonInfo::unavailable(&interpreter),
            }
        }
    };

    Json(response)
}

pub async fn save_config(State(state): State<AppState>, body: Bytes) -> ApiResult<ConfigResponse> {
    let patch: Value = parse_body(&body)?;
    let Value::Object(patch) = patch else {
        return Err(ApiError(KeeperError::InvalidRequest(
            "configuration must be a JSON object".to_string(),
        )));
    };

    // File write and rename stay off the async workers
    let store = Arc::clone(state.supervisor.config_store());
    let updated = tokio::task::spawn_blocking(move || store.update(&patch))
        .await
        .map_err(|e| ApiError(KeeperError::Internal(format!("Config save task failed: {}", e))))??;
    let config = serde_json::to_value(&updated)
        .map_err(|e| ApiError(KeeperError::SerializationError(e.to_string())))?;

    Ok(Json(ConfigResponse {
        success: true,
        message: Some("Configuration saved".to_string()),
        config,
    }))
}

pub async fn load_config(State(state): State<AppState>) -> ApiResult<ConfigResponse> {
    let config = serde_json::to_value(state.supervisor.config_store().current())
        .map_err(|e| ApiError(KeeperError::SerializationError(e.to_string())))?;

    Ok(Json(ConfigResponse {
        success: true,
        message: None,
        config,
    }))
}

pub async fn ai_ask(State(state): State<AppState>, body: Bytes) -> ApiResult<AskResponse> {
    let request: AskRequest = parse_body(&body)?;
    let answer = state.vision.ask(request).await?;

    Ok(Json(AskResponse {
        success: true,
        answer: answer.answer,
        usage: answer.usage,
    }))
}
