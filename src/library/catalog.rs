//! Catalog operations: creating, looking up, editing and removing books.

use std::sync::Arc;

use tracing::info;

use crate::error::LibraryError;
use crate::library::model::{Book, BookUpdate, NewBook};
use crate::store::LibraryStore;

/// Book catalog backed by a `LibraryStore`.
pub struct Catalog {
    store: Arc<dyn LibraryStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }

    /// Validate and insert a new book. New books start available.
    pub async fn create(&self, book: NewBook) -> Result<Book, LibraryError> {
        book.validate()?;
        let created = self.store.insert_book(&book).await?;
        info!(id = created.id, title = %created.title, "Book added to catalog");
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> Result<Book, LibraryError> {
        self.store
            .get_book(id)
            .await?
            .ok_or(LibraryError::BookIdNotFound { id })
    }

    /// Exact-title lookup.
    pub async fn find_by_title(&self, title: &str) -> Result<Book, LibraryError> {
        self.store
            .get_book_by_title(title)
            .await?
            .ok_or_else(|| LibraryError::BookNotFound {
                title: title.to_string(),
            })
    }

    pub async fn list(&self) -> Result<Vec<Book>, LibraryError> {
        Ok(self.store.list_books().await?)
    }

    /// Apply a partial edit. Availability is not editable here.
    pub async fn update(&self, id: i64, update: BookUpdate) -> Result<Book, LibraryError> {
        validate_update(&update)?;
        self.store
            .update_book(id, &update)
            .await?
            .ok_or(LibraryError::BookIdNotFound { id })
    }

    /// Remove a book and every reservation that references it.
    pub async fn delete(&self, id: i64) -> Result<(), LibraryError> {
        if self.store.delete_book(id).await? {
            info!(id, "Book removed from catalog");
            Ok(())
        } else {
            Err(LibraryError::BookIdNotFound { id })
        }
    }

    /// Remove the book with this exact title. Returns the removed book.
    pub async fn delete_by_title(&self, title: &str) -> Result<Book, LibraryError> {
        let book = self.find_by_title(title).await?;
        if !self.store.delete_book(book.id).await? {
            // Removed concurrently between lookup and delete.
            return Err(LibraryError::BookNotFound {
                title: title.to_string(),
            });
        }
        info!(id = book.id, title = %book.title, "Book removed from catalog");
        Ok(book)
    }
}

fn validate_update(update: &BookUpdate) -> Result<(), LibraryError> {
    for (field, value) in [
        ("title", &update.title),
        ("author", &update.author),
        ("isbn", &update.isbn),
    ] {
        if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(LibraryError::Validation(format!("{field} cannot be blank")));
        }
    }
    match update.publication_year {
        Some(year) if year <= 0 => Err(LibraryError::Validation(format!(
            "invalid publication year: {year}"
        ))),
        _ => Ok(()),
    }
}
