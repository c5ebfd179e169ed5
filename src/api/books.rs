//! `/books` routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use super::{ApiError, AppState};
use crate::library::{BookUpdate, NewBook};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/books", get(list_books).post(create_book))
        .route(
            "/books/{id}",
            get(get_book).put(update_book).delete(delete_book),
        )
}

async fn create_book(
    State(state): State<AppState>,
    Json(body): Json<NewBook>,
) -> Result<impl IntoResponse, ApiError> {
    let book = state.catalog.create(body).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

async fn list_books(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.catalog.list().await?))
}

async fn get_book(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.catalog.get(id).await?))
}

/// Unknown fields (including `available`) are ignored.
async fn update_book(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<BookUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.catalog.update(id, body).await?))
}

async fn delete_book(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.catalog.delete(id).await?;
    Ok(Json(json!({ "message": "Libro eliminado exitosamente" })))
}
