//! HTTP surface: catalog and reservation CRUD plus manual mail triggers.

pub mod books;
pub mod email;
pub mod reservations;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::channels::Mailbox;
use crate::config::{LibraryConfig, PollerConfig};
use crate::error::{DatabaseError, LibraryError};
use crate::library::{Catalog, ReservationManager};
use crate::pipeline::EmailPipeline;
use crate::worker::ExpirySweeper;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub reservations: Arc<ReservationManager>,
    pub pipeline: Arc<EmailPipeline>,
    pub sweeper: Arc<ExpirySweeper>,
    pub mailbox: Arc<dyn Mailbox>,
    pub library: LibraryConfig,
    pub poller: PollerConfig,
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/health", get(health))
        .merge(books::routes())
        .merge(reservations::routes())
        .merge(email::routes());

    Router::new()
        .route("/", get(root))
        .nest("/api/v1", v1)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Bienvenido a la API de la Biblioteca",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "biblio-mail" }))
}

/// Error returned by handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Internal,
}

impl From<LibraryError> for ApiError {
    fn from(e: LibraryError) -> Self {
        match e {
            LibraryError::BookNotFound { .. } | LibraryError::BookIdNotFound { .. } => {
                ApiError::NotFound("Libro no encontrado".into())
            }
            LibraryError::ReservationNotFound { .. } => {
                ApiError::NotFound("Reserva no encontrada".into())
            }
            LibraryError::Validation(msg) => ApiError::BadRequest(msg),
            LibraryError::BookUnavailable { .. } => {
                ApiError::Conflict("El libro no está disponible".into())
            }
            LibraryError::NoActiveReservation { .. } => {
                ApiError::Conflict("No hay una reserva activa".into())
            }
            LibraryError::Database(DatabaseError::Constraint(_)) => {
                ApiError::Conflict("Ya existe un libro con ese ISBN".into())
            }
            LibraryError::Database(e) => {
                error!(error = %e, "Request failed on storage");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error interno del servidor".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
