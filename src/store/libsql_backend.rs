//! libSQL backend: async `LibraryStore` implementation.
//!
//! Supports local file and in-memory databases. All writes go through a
//! single connection and are serialized by `write_lock`, so a multi-statement
//! transaction never interleaves with another writer.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::library::model::{Book, BookUpdate, ExpiredReservation, NewBook, Reservation};
use crate::store::migrations;
use crate::store::traits::{LibraryStore, ReserveOutcome};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn begin(&self) -> Result<Transaction, DatabaseError> {
        self.conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("begin: {e}")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed precision keeps text comparison in SQL
/// consistent with chronological order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(v) => libsql::Value::Text(v.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(n: Option<i64>) -> libsql::Value {
    match n {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

/// Map a libsql error, recognising unique-constraint failures.
fn query_err(context: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{context}: {message}"))
    } else {
        DatabaseError::Query(format!("{context}: {message}"))
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    tx: Transaction,
    result: Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Transaction(format!("commit: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

const BOOK_COLUMNS: &str =
    "id, title, author, isbn, publication_year, available, created_at, updated_at";

const RESERVATION_COLUMNS: &str =
    "id, book_id, user_email, start_date, end_date, is_active, created_at, updated_at";

/// Column order matches BOOK_COLUMNS.
fn row_to_book(row: &libsql::Row) -> Result<Book, libsql::Error> {
    let year: i64 = row.get(4)?;
    let available: i64 = row.get(5)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        isbn: row.get(3)?,
        publication_year: i32::try_from(year).unwrap_or_default(),
        available: available != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Column order matches RESERVATION_COLUMNS.
fn row_to_reservation(row: &libsql::Row) -> Result<Reservation, libsql::Error> {
    let start_str: String = row.get(3)?;
    let end_str: String = row.get(4)?;
    let active: i64 = row.get(5)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    Ok(Reservation {
        id: row.get(0)?,
        book_id: row.get(1)?,
        user_email: row.get(2)?,
        start_date: parse_datetime(&start_str),
        end_date: parse_datetime(&end_str),
        is_active: active != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

async fn collect_books(mut rows: libsql::Rows, context: &str) -> Result<Vec<Book>, DatabaseError> {
    let mut books = Vec::new();
    while let Some(row) = rows.next().await.map_err(|e| query_err(context, e))? {
        books.push(row_to_book(&row).map_err(|e| query_err(context, e))?);
    }
    Ok(books)
}

async fn collect_reservations(
    mut rows: libsql::Rows,
    context: &str,
) -> Result<Vec<Reservation>, DatabaseError> {
    let mut reservations = Vec::new();
    while let Some(row) = rows.next().await.map_err(|e| query_err(context, e))? {
        reservations.push(row_to_reservation(&row).map_err(|e| query_err(context, e))?);
    }
    Ok(reservations)
}

// ── Transaction bodies ──────────────────────────────────────────────

async fn reserve_in(
    conn: &Connection,
    book_id: i64,
    user_email: &str,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
) -> Result<ReserveOutcome, DatabaseError> {
    let now = fmt_ts(Utc::now());

    // Conditional flip: only one writer can take an available book.
    let taken = conn
        .execute(
            "UPDATE books SET available = 0, updated_at = ?2 WHERE id = ?1 AND available = 1",
            params![book_id, now.clone()],
        )
        .await
        .map_err(|e| query_err("reserve_book", e))?;

    if taken == 0 {
        let mut rows = conn
            .query("SELECT COUNT(*) FROM books WHERE id = ?1", params![book_id])
            .await
            .map_err(|e| query_err("reserve_book", e))?;
        let exists = match rows.next().await.map_err(|e| query_err("reserve_book", e))? {
            Some(row) => row.get::<i64>(0).unwrap_or(0) > 0,
            None => false,
        };
        return Ok(if exists {
            ReserveOutcome::BookTaken
        } else {
            ReserveOutcome::BookMissing
        });
    }

    let mut rows = conn
        .query(
            &format!(
                "INSERT INTO reservations (book_id, user_email, start_date, end_date, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                 RETURNING {RESERVATION_COLUMNS}"
            ),
            params![book_id, user_email, fmt_ts(start_date), fmt_ts(end_date), now],
        )
        .await
        .map_err(|e| query_err("reserve_book", e))?;

    let row = rows
        .next()
        .await
        .map_err(|e| query_err("reserve_book", e))?
        .ok_or_else(|| DatabaseError::Query("reserve_book: insert returned no row".into()))?;
    let reservation = row_to_reservation(&row).map_err(|e| query_err("reserve_book", e))?;
    Ok(ReserveOutcome::Reserved(reservation))
}

async fn release_in(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT book_id FROM reservations WHERE id = ?1 AND is_active = 1",
            params![id],
        )
        .await
        .map_err(|e| query_err("release_reservation", e))?;
    let book_id: i64 = match rows
        .next()
        .await
        .map_err(|e| query_err("release_reservation", e))?
    {
        Some(row) => row.get(0).map_err(|e| query_err("release_reservation", e))?,
        None => return Ok(false),
    };

    let now = fmt_ts(Utc::now());
    conn.execute(
        "UPDATE reservations SET is_active = 0, updated_at = ?2 WHERE id = ?1",
        params![id, now.clone()],
    )
    .await
    .map_err(|e| query_err("release_reservation", e))?;
    conn.execute(
        "UPDATE books SET available = 1, updated_at = ?2 WHERE id = ?1",
        params![book_id, now],
    )
    .await
    .map_err(|e| query_err("release_reservation", e))?;
    Ok(true)
}

async fn expire_in(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<ExpiredReservation>, DatabaseError> {
    let cutoff = fmt_ts(now);
    let stamp = fmt_ts(Utc::now());

    let mut rows = conn
        .query(
            "SELECT r.id, r.book_id, r.user_email, r.start_date, r.end_date, r.is_active,
                    r.created_at, r.updated_at, b.title
             FROM reservations r JOIN books b ON b.id = r.book_id
             WHERE r.is_active = 1 AND r.end_date < ?1
             ORDER BY r.end_date ASC",
            params![cutoff.clone()],
        )
        .await
        .map_err(|e| query_err("expire_reservations", e))?;

    let mut expired = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| query_err("expire_reservations", e))?
    {
        let mut reservation =
            row_to_reservation(&row).map_err(|e| query_err("expire_reservations", e))?;
        let book_title: String = row.get(8).map_err(|e| query_err("expire_reservations", e))?;
        reservation.is_active = false;
        expired.push(ExpiredReservation {
            reservation,
            book_title,
        });
    }

    if expired.is_empty() {
        return Ok(expired);
    }

    // Books first: the subquery still sees the rows as active.
    conn.execute(
        "UPDATE books SET available = 1, updated_at = ?2
         WHERE id IN (SELECT book_id FROM reservations WHERE is_active = 1 AND end_date < ?1)",
        params![cutoff.clone(), stamp.clone()],
    )
    .await
    .map_err(|e| query_err("expire_reservations", e))?;
    conn.execute(
        "UPDATE reservations SET is_active = 0, updated_at = ?2
         WHERE is_active = 1 AND end_date < ?1",
        params![cutoff, stamp],
    )
    .await
    .map_err(|e| query_err("expire_reservations", e))?;

    Ok(expired)
}

async fn delete_book_in(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let removed = conn
        .execute("DELETE FROM reservations WHERE book_id = ?1", params![id])
        .await
        .map_err(|e| query_err("delete_book", e))?;
    let deleted = conn
        .execute("DELETE FROM books WHERE id = ?1", params![id])
        .await
        .map_err(|e| query_err("delete_book", e))?;
    if deleted > 0 && removed > 0 {
        debug!(book_id = id, removed, "Deleted reservations with book");
    }
    Ok(deleted > 0)
}

#[async_trait]
impl LibraryStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Books ───────────────────────────────────────────────────────

    async fn insert_book(&self, book: &NewBook) -> Result<Book, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let now = fmt_ts(Utc::now());
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO books (title, author, isbn, publication_year, available, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                     RETURNING {BOOK_COLUMNS}"
                ),
                params![
                    book.title.trim(),
                    book.author.trim(),
                    book.isbn.trim(),
                    i64::from(book.publication_year),
                    now
                ],
            )
            .await
            .map_err(|e| query_err("insert_book", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| query_err("insert_book", e))?
            .ok_or_else(|| DatabaseError::Query("insert_book: insert returned no row".into()))?;
        let inserted = row_to_book(&row).map_err(|e| query_err("insert_book", e))?;
        debug!(id = inserted.id, title = %inserted.title, "Book inserted");
        Ok(inserted)
    }

    async fn get_book(&self, id: i64) -> Result<Option<Book>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| query_err("get_book", e))?;
        Ok(collect_books(rows, "get_book").await?.into_iter().next())
    }

    async fn get_book_by_title(&self, title: &str) -> Result<Option<Book>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {BOOK_COLUMNS} FROM books WHERE title = ?1 ORDER BY id ASC LIMIT 1"),
                params![title],
            )
            .await
            .map_err(|e| query_err("get_book_by_title", e))?;
        Ok(collect_books(rows, "get_book_by_title").await?.into_iter().next())
    }

    async fn list_books(&self) -> Result<Vec<Book>, DatabaseError> {
        let rows = self
            .conn()
            .query(&format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY id ASC"), ())
            .await
            .map_err(|e| query_err("list_books", e))?;
        collect_books(rows, "list_books").await
    }

    async fn update_book(
        &self,
        id: i64,
        update: &BookUpdate,
    ) -> Result<Option<Book>, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE books SET
                        title = COALESCE(?2, title),
                        author = COALESCE(?3, author),
                        isbn = COALESCE(?4, isbn),
                        publication_year = COALESCE(?5, publication_year),
                        updated_at = ?6
                     WHERE id = ?1
                     RETURNING {BOOK_COLUMNS}"
                ),
                params![
                    id,
                    opt_text(update.title.as_deref()),
                    opt_text(update.author.as_deref()),
                    opt_text(update.isbn.as_deref()),
                    opt_int(update.publication_year.map(i64::from)),
                    fmt_ts(Utc::now())
                ],
            )
            .await
            .map_err(|e| query_err("update_book", e))?;
        Ok(collect_books(rows, "update_book").await?.into_iter().next())
    }

    async fn delete_book(&self, id: i64) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self.begin().await?;
        let result = delete_book_in(&tx, id).await;
        finish(tx, result).await
    }

    // ── Reservations ────────────────────────────────────────────────

    async fn reserve_book(
        &self,
        book_id: i64,
        user_email: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<ReserveOutcome, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self.begin().await?;
        let result = reserve_in(&tx, book_id, user_email, start_date, end_date).await;
        finish(tx, result).await
    }

    async fn get_reservation(&self, id: i64) -> Result<Option<Reservation>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| query_err("get_reservation", e))?;
        Ok(collect_reservations(rows, "get_reservation")
            .await?
            .into_iter()
            .next())
    }

    async fn find_active_reservations_by_title(
        &self,
        user_email: &str,
        title: &str,
    ) -> Result<Vec<Reservation>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RESERVATION_COLUMNS} FROM reservations
                     WHERE user_email = ?1 AND is_active = 1
                       AND book_id IN (SELECT id FROM books WHERE title = ?2)
                     ORDER BY created_at DESC, id DESC"
                ),
                params![user_email, title],
            )
            .await
            .map_err(|e| query_err("find_active_reservations_by_title", e))?;
        collect_reservations(rows, "find_active_reservations_by_title").await
    }

    async fn list_active_reservations_for_user(
        &self,
        user_email: &str,
    ) -> Result<Vec<Reservation>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RESERVATION_COLUMNS} FROM reservations
                     WHERE user_email = ?1 AND is_active = 1
                     ORDER BY created_at DESC, id DESC"
                ),
                params![user_email],
            )
            .await
            .map_err(|e| query_err("list_active_reservations_for_user", e))?;
        collect_reservations(rows, "list_active_reservations_for_user").await
    }

    async fn update_reservation_end_date(
        &self,
        id: i64,
        end_date: DateTime<Utc>,
    ) -> Result<Option<Reservation>, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE reservations SET end_date = ?2, updated_at = ?3
                     WHERE id = ?1 AND is_active = 1
                     RETURNING {RESERVATION_COLUMNS}"
                ),
                params![id, fmt_ts(end_date), fmt_ts(Utc::now())],
            )
            .await
            .map_err(|e| query_err("update_reservation_end_date", e))?;
        Ok(collect_reservations(rows, "update_reservation_end_date")
            .await?
            .into_iter()
            .next())
    }

    async fn release_reservation(&self, id: i64) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self.begin().await?;
        let result = release_in(&tx, id).await;
        finish(tx, result).await
    }

    async fn expire_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredReservation>, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self.begin().await?;
        let result = expire_in(&tx, now).await;
        let expired = finish(tx, result).await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired overdue reservations");
        }
        Ok(expired)
    }
}
