//! `LibraryStore` trait: single async interface for catalog and reservation persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::library::model::{Book, BookUpdate, ExpiredReservation, NewBook, Reservation};

/// Result of an atomic reserve attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    Reserved(Reservation),
    /// No book with that id.
    BookMissing,
    /// The book already has an active reservation.
    BookTaken,
}

/// Backend-agnostic store for books and reservations.
///
/// Every method that flips `reservations.is_active` also flips the paired
/// `books.available` flag within the same transaction.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Books ───────────────────────────────────────────────────────

    /// Insert a new, available book. A duplicate ISBN is a `Constraint` error.
    async fn insert_book(&self, book: &NewBook) -> Result<Book, DatabaseError>;

    async fn get_book(&self, id: i64) -> Result<Option<Book>, DatabaseError>;

    /// Exact title match; the oldest book wins if titles repeat.
    async fn get_book_by_title(&self, title: &str) -> Result<Option<Book>, DatabaseError>;

    async fn list_books(&self) -> Result<Vec<Book>, DatabaseError>;

    /// Apply a partial update. Returns `None` if the book does not exist.
    async fn update_book(&self, id: i64, update: &BookUpdate)
    -> Result<Option<Book>, DatabaseError>;

    /// Delete a book and all of its reservations. Returns false if absent.
    async fn delete_book(&self, id: i64) -> Result<bool, DatabaseError>;

    // ── Reservations ────────────────────────────────────────────────

    /// Atomically check availability, insert an active reservation and mark
    /// the book unavailable.
    async fn reserve_book(
        &self,
        book_id: i64,
        user_email: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<ReserveOutcome, DatabaseError>;

    async fn get_reservation(&self, id: i64) -> Result<Option<Reservation>, DatabaseError>;

    /// Active reservations held by `user_email` on any book titled `title`,
    /// newest first.
    async fn find_active_reservations_by_title(
        &self,
        user_email: &str,
        title: &str,
    ) -> Result<Vec<Reservation>, DatabaseError>;

    /// All active reservations held by a user, newest first.
    async fn list_active_reservations_for_user(
        &self,
        user_email: &str,
    ) -> Result<Vec<Reservation>, DatabaseError>;

    /// Move the end date of an active reservation. Returns `None` if no active
    /// reservation has that id.
    async fn update_reservation_end_date(
        &self,
        id: i64,
        end_date: DateTime<Utc>,
    ) -> Result<Option<Reservation>, DatabaseError>;

    /// Deactivate a reservation and release its book. Returns false if the
    /// reservation does not exist or is already inactive.
    async fn release_reservation(&self, id: i64) -> Result<bool, DatabaseError>;

    /// Deactivate every active reservation with `end_date < now` and release
    /// their books, in one transaction.
    async fn expire_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredReservation>, DatabaseError>;
}
