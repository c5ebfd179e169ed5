//! Action executor: applies an `Action` to the library and phrases the reply.
//!
//! Domain errors stop here: every branch returns `Result<String, LibraryError>`
//! and the error is turned into user-facing Spanish text. Nothing propagates.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::config::LibraryConfig;
use crate::error::LibraryError;
use crate::library::model::{Book, NewBook};
use crate::library::{Catalog, ReservationManager};
use crate::pipeline::action::Action;
use crate::store::LibraryStore;

pub(crate) const GENERIC_FAILURE_REPLY: &str =
    "Lo siento, no pude procesar tu solicitud correctamente. Por favor, intenta reformularla.";

/// Reply used when a request cannot be mapped to an action.
pub const UNKNOWN_ACTION_REPLY: &str =
    "Lo siento, no pude entender la acción solicitada. Por favor, intenta reformular tu solicitud.";

const CREATE_FAILED_REPLY: &str =
    "Lo siento, hubo un error al crear el libro. Por favor, verifica los datos proporcionados.";

/// Whether the request went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Completed,
    /// Understood but refused (book missing, taken, no reservation...).
    Declined,
}

/// Text to send back to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub status: ReplyStatus,
    pub body: String,
}

impl Reply {
    fn completed(body: String) -> Self {
        Self {
            status: ReplyStatus::Completed,
            body,
        }
    }

    fn declined(body: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Declined,
            body: body.into(),
        }
    }
}

/// Executes classified actions on behalf of an email sender.
pub struct ActionExecutor {
    catalog: Catalog,
    reservations: ReservationManager,
    reservation_days: i64,
}

impl ActionExecutor {
    pub fn new(store: Arc<dyn LibraryStore>, config: &LibraryConfig) -> Self {
        Self {
            catalog: Catalog::new(Arc::clone(&store)),
            reservations: ReservationManager::new(store),
            reservation_days: config.reservation_days,
        }
    }

    /// Run `action` for `user_email`. Always yields a reply.
    pub async fn execute(&self, action: &Action, user_email: &str) -> Reply {
        info!(action = action.label(), user = %user_email, "Executing action");

        match action {
            Action::Reserve { book_title } => {
                self.settle(book_title, self.reserve(book_title, user_email).await)
            }
            Action::Renew { book_title } => {
                self.settle(book_title, self.renew(book_title, user_email).await)
            }
            Action::Cancel { book_title } => {
                self.settle(book_title, self.cancel(book_title, user_email).await)
            }
            Action::DeleteBook { book_title } => {
                self.settle(book_title, self.delete_book(book_title).await)
            }
            Action::List => match self.list().await {
                Ok(body) => Reply::completed(body),
                Err(e) => {
                    error!(error = %e, "Failed to list books");
                    Reply::declined(GENERIC_FAILURE_REPLY)
                }
            },
            Action::CreateBook {
                title,
                author,
                isbn,
                year,
            } => {
                let book = NewBook {
                    title: title.trim().to_string(),
                    author: author.trim().to_string(),
                    isbn: isbn.trim().to_string(),
                    publication_year: *year,
                };
                match self.catalog.create(book).await {
                    Ok(created) => Reply::completed(format!(
                        "El libro '{}' ha sido creado exitosamente en la biblioteca.",
                        created.title
                    )),
                    Err(e) => {
                        error!(error = %e, title = %title, "Failed to create book");
                        Reply::declined(CREATE_FAILED_REPLY)
                    }
                }
            }
        }
    }

    async fn reserve(&self, title: &str, user_email: &str) -> Result<String, LibraryError> {
        let reservation = self
            .reservations
            .reserve(title, user_email, self.reservation_days)
            .await?;
        Ok(format!(
            "Has reservado exitosamente el libro '{title}' hasta el {}.",
            format_date(reservation.end_date)
        ))
    }

    async fn renew(&self, title: &str, user_email: &str) -> Result<String, LibraryError> {
        let new_end = Utc::now() + Duration::days(self.reservation_days);
        let renewed = self.reservations.renew(title, user_email, new_end).await?;
        Ok(format!(
            "Has renovado exitosamente tu reserva del libro '{title}' hasta el {}.",
            format_date(renewed.end_date)
        ))
    }

    async fn cancel(&self, title: &str, user_email: &str) -> Result<String, LibraryError> {
        self.reservations.release(title, user_email).await?;
        Ok(format!(
            "Has eliminado exitosamente tu reserva del libro '{title}'."
        ))
    }

    async fn delete_book(&self, title: &str) -> Result<String, LibraryError> {
        self.catalog.delete_by_title(title).await?;
        Ok(format!(
            "El libro '{title}' ha sido eliminado exitosamente de la biblioteca."
        ))
    }

    async fn list(&self) -> Result<String, LibraryError> {
        Ok(format_catalog(&self.catalog.list().await?))
    }

    /// Map a branch result to a reply, phrasing domain errors for the user.
    fn settle(&self, title: &str, result: Result<String, LibraryError>) -> Reply {
        match result {
            Ok(body) => Reply::completed(body),
            Err(LibraryError::BookNotFound { .. }) => Reply::declined(format!(
                "Lo siento, no se encontró el libro '{title}'."
            )),
            Err(LibraryError::BookUnavailable { .. }) => Reply::declined(format!(
                "Lo siento, el libro '{title}' no está disponible en este momento."
            )),
            Err(LibraryError::NoActiveReservation { .. }) => Reply::declined(format!(
                "No tienes una reserva activa para el libro '{title}'."
            )),
            Err(e) => {
                error!(error = %e, title = %title, "Action failed");
                Reply::declined(GENERIC_FAILURE_REPLY)
            }
        }
    }
}

/// Catalog listing, one line per book.
fn format_catalog(books: &[Book]) -> String {
    if books.is_empty() {
        return "No hay libros disponibles en la biblioteca.".to_string();
    }
    let mut body = String::from("Libros disponibles:\n\n");
    for book in books {
        body.push_str(&format!(
            "- {} ({}) - {}\n",
            book.title,
            book.author,
            book.availability_label()
        ));
    }
    body
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format("%d/%m/%Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    const ANA: &str = "ana@example.com";
    const LUIS: &str = "luis@example.com";

    async fn setup() -> (Arc<dyn LibraryStore>, ActionExecutor) {
        let store: Arc<dyn LibraryStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let executor = ActionExecutor::new(Arc::clone(&store), &LibraryConfig::default());
        (store, executor)
    }

    fn create(title: &str, isbn: &str) -> Action {
        Action::CreateBook {
            title: title.into(),
            author: "Frank Herbert".into(),
            isbn: isbn.into(),
            year: 1965,
        }
    }

    fn reserve(title: &str) -> Action {
        Action::Reserve {
            book_title: title.into(),
        }
    }

    #[tokio::test]
    async fn reserve_reports_expiry_date() {
        let (_, executor) = setup().await;
        executor.execute(&create("Dune", "1"), ANA).await;

        let reply = executor.execute(&reserve("Dune"), ANA).await;
        assert_eq!(reply.status, ReplyStatus::Completed);
        let expected = format_date(Utc::now() + Duration::days(15));
        assert!(reply.body.starts_with("Has reservado exitosamente el libro 'Dune' hasta el "));
        assert!(reply.body.contains(&expected), "{}", reply.body);
    }

    #[tokio::test]
    async fn reserve_unknown_book() {
        let (_, executor) = setup().await;
        let reply = executor.execute(&reserve("Inexistente"), ANA).await;
        assert_eq!(reply.status, ReplyStatus::Declined);
        assert_eq!(
            reply.body,
            "Lo siento, no se encontró el libro 'Inexistente'."
        );
    }

    #[tokio::test]
    async fn reserve_taken_book_leaves_state_alone() {
        let (store, executor) = setup().await;
        executor.execute(&create("Dune", "1"), ANA).await;
        executor.execute(&reserve("Dune"), ANA).await;

        let reply = executor.execute(&reserve("Dune"), LUIS).await;
        assert_eq!(reply.status, ReplyStatus::Declined);
        assert!(reply.body.contains("no está disponible"));
        assert!(store
            .list_active_reservations_for_user(LUIS)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn renew_and_cancel() {
        let (store, executor) = setup().await;
        executor.execute(&create("Dune", "1"), ANA).await;

        let renew = Action::Renew {
            book_title: "Dune".into(),
        };
        let reply = executor.execute(&renew, ANA).await;
        assert_eq!(
            reply.body,
            "No tienes una reserva activa para el libro 'Dune'."
        );

        executor.execute(&reserve("Dune"), ANA).await;
        let reply = executor.execute(&renew, ANA).await;
        assert_eq!(reply.status, ReplyStatus::Completed);
        assert!(reply.body.starts_with("Has renovado exitosamente tu reserva del libro 'Dune'"));

        let cancel = Action::Cancel {
            book_title: "Dune".into(),
        };
        let reply = executor.execute(&cancel, ANA).await;
        assert_eq!(
            reply.body,
            "Has eliminado exitosamente tu reserva del libro 'Dune'."
        );
        assert!(store.get_book_by_title("Dune").await.unwrap().unwrap().available);

        let reply = executor.execute(&cancel, ANA).await;
        assert_eq!(reply.status, ReplyStatus::Declined);
    }

    #[tokio::test]
    async fn list_formats_availability() {
        let (_, executor) = setup().await;
        let reply = executor.execute(&Action::List, ANA).await;
        assert_eq!(reply.body, "No hay libros disponibles en la biblioteca.");

        executor.execute(&create("Dune", "1"), ANA).await;
        executor.execute(&create("Emma", "2"), ANA).await;
        executor.execute(&reserve("Emma"), ANA).await;

        let reply = executor.execute(&Action::List, ANA).await;
        assert_eq!(
            reply.body,
            "Libros disponibles:\n\n\
             - Dune (Frank Herbert) - Disponible\n\
             - Emma (Frank Herbert) - Reservado\n"
        );
    }

    #[tokio::test]
    async fn create_failure_is_generic() {
        let (_, executor) = setup().await;
        let reply = executor.execute(&create("Dune", "1"), ANA).await;
        assert_eq!(
            reply.body,
            "El libro 'Dune' ha sido creado exitosamente en la biblioteca."
        );

        // Duplicate ISBN
        let reply = executor.execute(&create("Dune II", "1"), ANA).await;
        assert_eq!(reply.status, ReplyStatus::Declined);
        assert_eq!(reply.body, CREATE_FAILED_REPLY);

        // Missing year
        let reply = executor
            .execute(
                &Action::CreateBook {
                    title: "Emma".into(),
                    author: "Austen".into(),
                    isbn: "2".into(),
                    year: 0,
                },
                ANA,
            )
            .await;
        assert_eq!(reply.body, CREATE_FAILED_REPLY);
    }

    #[tokio::test]
    async fn delete_book_by_title() {
        let (store, executor) = setup().await;
        executor.execute(&create("Dune", "1"), ANA).await;
        executor.execute(&reserve("Dune"), ANA).await;

        let delete = Action::DeleteBook {
            book_title: "Dune".into(),
        };
        let reply = executor.execute(&delete, ANA).await;
        assert_eq!(
            reply.body,
            "El libro 'Dune' ha sido eliminado exitosamente de la biblioteca."
        );
        assert!(store.list_books().await.unwrap().is_empty());
        assert!(store
            .list_active_reservations_for_user(ANA)
            .await
            .unwrap()
            .is_empty());

        let reply = executor.execute(&delete, ANA).await;
        assert_eq!(reply.body, "Lo siento, no se encontró el libro 'Dune'.");
    }
}
