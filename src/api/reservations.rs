//! `/reservations` routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reservations", post(create_reservation))
        .route("/reservations/user/{email}", get(user_reservations))
        .route(
            "/reservations/{id}",
            get(get_reservation).delete(delete_reservation),
        )
        .route("/reservations/{id}/renew", put(renew_reservation))
}

#[derive(Debug, Deserialize)]
struct CreateReservation {
    book_id: i64,
    user_email: String,
    end_date: DateTime<Utc>,
}

async fn create_reservation(
    State(state): State<AppState>,
    Json(body): Json<CreateReservation>,
) -> Result<impl IntoResponse, ApiError> {
    let email = body.user_email.trim();
    if !email.contains('@') {
        return Err(ApiError::BadRequest("user_email is not an address".into()));
    }
    let reservation = state
        .reservations
        .reserve_book_id(body.book_id, email, body.end_date)
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// Active reservations only.
async fn user_reservations(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.reservations.active_for_user(&email).await?))
}

async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.reservations.get(id).await?))
}

async fn renew_reservation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let new_end = Utc::now() + Duration::days(state.library.renew_days);
    Ok(Json(state.reservations.renew_by_id(id, new_end).await?))
}

async fn delete_reservation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.reservations.release_by_id(id).await?;
    Ok(Json(json!({ "message": "Reserva eliminada exitosamente" })))
}
