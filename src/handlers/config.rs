//! Runtime configuration API. Updates take effect for *new* sessions only;
//! running sessions keep the option snapshot taken at session start.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

fn config_body(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "recognition": {
            "endpoint": config.recognition.endpoint,
            "model": config.recognition.model,
            "language": config.recognition.language,
            "sample_rate": config.recognition.sample_rate,
            "silence_threshold": config.recognition.silence_threshold,
            "silence_hangover_ms": config.recognition.silence_hangover_ms
        },
        "completion": {
            "endpoint": config.completion.endpoint,
            "model": config.completion.model,
            "temperature": config.completion.temperature,
            "max_tokens": config.completion.max_tokens,
            "max_history_tokens": config.completion.max_history_tokens
        },
        "synthesis": {
            "endpoint": config.synthesis.endpoint,
            "model": config.synthesis.model,
            "speaker": config.synthesis.speaker,
            "speed": config.synthesis.speed,
            "sample_rate": config.synthesis.sample_rate,
            "split": config.synthesis.split
        },
        "session": {
            "max_concurrent_sessions": config.session.max_concurrent_sessions
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_body(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> AppResult<HttpResponse> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_body(&current_config)
    })))
}
