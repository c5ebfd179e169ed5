//! Catalog and reservation entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LibraryError;

/// A catalog entry.
///
/// `available` is maintained by the reservation lifecycle and is never set
/// directly through update requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub publication_year: i32,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// Label shown in catalog listings.
    pub fn availability_label(&self) -> &'static str {
        if self.available {
            "Disponible"
        } else {
            "Reservado"
        }
    }
}

/// Fields for a new catalog entry. New books always start available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub publication_year: i32,
}

impl NewBook {
    /// Reject blank fields and nonsensical years.
    pub fn validate(&self) -> Result<(), LibraryError> {
        let blank: Vec<&str> = [
            ("title", &self.title),
            ("author", &self.author),
            ("isbn", &self.isbn),
        ]
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| *k)
        .collect();

        if !blank.is_empty() {
            return Err(LibraryError::Validation(format!(
                "missing required fields: {}",
                blank.join(", ")
            )));
        }
        if self.publication_year <= 0 {
            return Err(LibraryError::Validation(format!(
                "invalid publication year: {}",
                self.publication_year
            )));
        }
        Ok(())
    }
}

/// Partial update of a catalog entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub publication_year: Option<i32>,
}

/// A reservation of one book by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i64,
    pub book_id: i64,
    pub user_email: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reservation deactivated by the expiry sweep, with the title needed to
/// notify its holder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpiredReservation {
    pub reservation: Reservation,
    pub book_title: String,
}
