//! `/email` routes: manual triggers for the pipeline and the expiry sweep.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use super::{ApiError, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/email/process", post(process_email))
        .route("/email/check", post(check_inbox))
        .route("/email/check-expired", post(check_expired))
        .route("/email/test-connection", get(test_connection))
}

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    email_content: String,
    user_email: String,
}

/// Run one body through the pipeline as if it had arrived by mail.
async fn process_email(
    State(state): State<AppState>,
    Json(body): Json<ProcessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.email_content.trim().is_empty() {
        return Err(ApiError::BadRequest("email_content is empty".into()));
    }
    let outcome = state
        .pipeline
        .process_one(&body.email_content, body.user_email.trim())
        .await;
    Ok(Json(json!({ "message": outcome.message.clone(), "result": outcome })))
}

async fn check_inbox(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.pipeline.process_unread().await.map_err(|e| {
        warn!(error = %e, "Manual inbox check failed");
        ApiError::Unavailable("No se pudo leer el buzón".into())
    })?;
    Ok(Json(json!({
        "message": format!("Procesados {} correos", report.processed_count),
        "result": report,
    })))
}

async fn check_expired(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.sweeper.sweep(Utc::now()).await?;
    Ok(Json(json!({
        "message": format!("Verificadas {} reservas expiradas", report.expired_count),
        "result": report,
    })))
}

/// List what the poller would see, without touching it.
async fn test_connection(State(state): State<AppState>) -> impl IntoResponse {
    let since = Utc::now() - state.poller.lookback;
    match state
        .mailbox
        .list_unread(since, state.poller.batch_limit)
        .await
    {
        Ok(emails) => {
            let summaries: Vec<_> = emails
                .iter()
                .map(|e| {
                    json!({
                        "id": e.id,
                        "subject": e.subject,
                        "from": e.from_address,
                        "received_at": e.received_at,
                    })
                })
                .collect();
            Json(json!({
                "status": "success",
                "message": "Conexión con el buzón establecida",
                "emails_found": summaries.len(),
                "emails": summaries,
            }))
        }
        Err(e) => {
            error!(error = %e, "Mailbox connection test failed");
            Json(json!({
                "status": "error",
                "message": format!("Error al conectar con el buzón: {e}"),
            }))
        }
    }
}
