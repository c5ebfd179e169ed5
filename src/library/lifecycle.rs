//! Reservation lifecycle: reserve, renew, release and expire.
//!
//! A book moves between two states, Available and Reserved. Every transition
//! goes through a single store transaction that updates both the reservation
//! row and the book's `available` flag.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info};

use crate::error::LibraryError;
use crate::library::model::{Book, ExpiredReservation, Reservation};
use crate::store::{LibraryStore, ReserveOutcome};

/// Drives reservation state transitions against a `LibraryStore`.
pub struct ReservationManager {
    store: Arc<dyn LibraryStore>,
}

impl ReservationManager {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }

    /// Reserve the book titled `title` for `duration_days`, starting now.
    pub async fn reserve(
        &self,
        title: &str,
        user_email: &str,
        duration_days: i64,
    ) -> Result<Reservation, LibraryError> {
        let book = self.book_by_title(title).await?;
        if !book.available {
            return Err(LibraryError::BookUnavailable {
                title: book.title,
            });
        }

        let start = Utc::now();
        let end = start + Duration::days(duration_days);
        match self
            .store
            .reserve_book(book.id, user_email, start, end)
            .await?
        {
            ReserveOutcome::Reserved(reservation) => {
                info!(
                    reservation_id = reservation.id,
                    book_id = book.id,
                    user = %user_email,
                    "Book reserved"
                );
                Ok(reservation)
            }
            ReserveOutcome::BookTaken => Err(LibraryError::BookUnavailable { title: book.title }),
            ReserveOutcome::BookMissing => Err(LibraryError::BookNotFound {
                title: title.to_string(),
            }),
        }
    }

    /// Reserve by book id with an explicit end date (HTTP surface).
    pub async fn reserve_book_id(
        &self,
        book_id: i64,
        user_email: &str,
        end_date: DateTime<Utc>,
    ) -> Result<Reservation, LibraryError> {
        let start = Utc::now();
        if end_date <= start {
            return Err(LibraryError::Validation(
                "end_date must be in the future".into(),
            ));
        }

        match self
            .store
            .reserve_book(book_id, user_email, start, end_date)
            .await?
        {
            ReserveOutcome::Reserved(reservation) => {
                info!(
                    reservation_id = reservation.id,
                    book_id,
                    user = %user_email,
                    "Book reserved"
                );
                Ok(reservation)
            }
            ReserveOutcome::BookMissing => Err(LibraryError::BookIdNotFound { id: book_id }),
            ReserveOutcome::BookTaken => {
                let title = match self.store.get_book(book_id).await? {
                    Some(book) => book.title,
                    None => book_id.to_string(),
                };
                Err(LibraryError::BookUnavailable { title })
            }
        }
    }

    /// Move the end date of the user's active reservation of `title`.
    pub async fn renew(
        &self,
        title: &str,
        user_email: &str,
        new_end_date: DateTime<Utc>,
    ) -> Result<Reservation, LibraryError> {
        let book = self.book_by_title(title).await?;
        let current = self.active_for(&book, user_email).await?;

        self.store
            .update_reservation_end_date(current.id, new_end_date)
            .await?
            .ok_or_else(|| LibraryError::NoActiveReservation {
                user_email: user_email.to_string(),
                title: book.title.clone(),
            })
    }

    /// Extend a reservation by id (HTTP surface). Inactive reservations are
    /// treated as missing.
    pub async fn renew_by_id(
        &self,
        id: i64,
        new_end_date: DateTime<Utc>,
    ) -> Result<Reservation, LibraryError> {
        self.store
            .update_reservation_end_date(id, new_end_date)
            .await?
            .ok_or(LibraryError::ReservationNotFound { id })
    }

    /// End the user's active reservation of `title` and make the book available.
    pub async fn release(&self, title: &str, user_email: &str) -> Result<(), LibraryError> {
        let book = self.book_by_title(title).await?;
        let current = self.active_for(&book, user_email).await?;

        if !self.store.release_reservation(current.id).await? {
            return Err(LibraryError::NoActiveReservation {
                user_email: user_email.to_string(),
                title: book.title,
            });
        }
        info!(
            reservation_id = current.id,
            book_id = current.book_id,
            "Reservation released"
        );
        Ok(())
    }

    /// Release a reservation by id (HTTP surface).
    pub async fn release_by_id(&self, id: i64) -> Result<(), LibraryError> {
        if self.store.release_reservation(id).await? {
            info!(reservation_id = id, "Reservation released");
            Ok(())
        } else {
            Err(LibraryError::ReservationNotFound { id })
        }
    }

    /// Deactivate every active reservation that ended before `now`.
    pub async fn expire(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredReservation>, LibraryError> {
        Ok(self.store.expire_reservations(now).await?)
    }

    pub async fn get(&self, id: i64) -> Result<Reservation, LibraryError> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or(LibraryError::ReservationNotFound { id })
    }

    /// Active reservations held by `user_email`, newest first.
    pub async fn active_for_user(&self, user_email: &str) -> Result<Vec<Reservation>, LibraryError> {
        Ok(self
            .store
            .list_active_reservations_for_user(user_email)
            .await?)
    }

    async fn book_by_title(&self, title: &str) -> Result<Book, LibraryError> {
        self.store
            .get_book_by_title(title)
            .await?
            .ok_or_else(|| LibraryError::BookNotFound {
                title: title.to_string(),
            })
    }

    /// Titles are not unique, so the match spans every book carrying
    /// `book.title`, not only the one `book_by_title` returned.
    async fn active_for(&self, book: &Book, user_email: &str) -> Result<Reservation, LibraryError> {
        let matches = self
            .store
            .find_active_reservations_by_title(user_email, &book.title)
            .await?;
        pick_most_recent(matches, user_email, &book.title).ok_or_else(|| {
            LibraryError::NoActiveReservation {
                user_email: user_email.to_string(),
                title: book.title.clone(),
            }
        })
    }
}

/// Choose the reservation to act on. More than one active match means the
/// one-active-reservation-per-book rule was broken; log it and take the newest.
pub(crate) fn pick_most_recent(
    matches: Vec<Reservation>,
    user_email: &str,
    title: &str,
) -> Option<Reservation> {
    if matches.len() > 1 {
        error!(
            user = %user_email,
            title = %title,
            count = matches.len(),
            "Multiple active reservations for one book; using the most recent"
        );
    }
    matches.into_iter().max_by_key(|r| (r.created_at, r.id))
}
