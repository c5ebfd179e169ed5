//! Expiry sweep: deactivates overdue reservations and tells their holders.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::channels::mailbox::Mailbox;
use crate::config::SweepConfig;
use crate::error::{Error, LibraryError};
use crate::library::ReservationManager;
use crate::store::LibraryStore;
use crate::worker::schedule::{Schedule, ScheduledTask, spawn_scheduled};

pub const EXPIRY_SUBJECT: &str = "Tu reserva ha expirado";

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_count: usize,
    pub notified_count: usize,
    pub errors: Vec<String>,
}

pub struct ExpirySweeper {
    reservations: ReservationManager,
    mailbox: Arc<dyn Mailbox>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn LibraryStore>, mailbox: Arc<dyn Mailbox>) -> Self {
        Self {
            reservations: ReservationManager::new(store),
            mailbox,
        }
    }

    /// Expire everything that ended before `now`, then notify each holder.
    ///
    /// The expiry is committed before any email goes out; a failed notice is
    /// reported but does not undo it.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, LibraryError> {
        let expired = self.reservations.expire(now).await?;
        let mut report = SweepReport {
            expired_count: expired.len(),
            ..Default::default()
        };

        for item in &expired {
            let to = &item.reservation.user_email;
            match self
                .mailbox
                .send(to, EXPIRY_SUBJECT, &expiry_notice(&item.book_title))
                .await
            {
                Ok(()) => report.notified_count += 1,
                Err(e) => {
                    warn!(reservation_id = item.reservation.id, error = %e, "Expiry notice not sent");
                    report
                        .errors
                        .push(format!("reservation {}: {e}", item.reservation.id));
                }
            }
        }

        if report.expired_count > 0 {
            info!(
                expired = report.expired_count,
                notified = report.notified_count,
                "Expiry sweep complete"
            );
        }
        Ok(report)
    }
}

fn expiry_notice(title: &str) -> String {
    format!(
        "Tu reserva del libro '{title}' ha expirado. Por favor, devuelve el libro lo antes posible."
    )
}

#[async_trait]
impl ScheduledTask for ExpirySweeper {
    fn name(&self) -> &'static str {
        "expiry_sweeper"
    }

    async fn run_once(&self) -> Result<(), Error> {
        self.sweep(Utc::now()).await?;
        Ok(())
    }
}

/// Spawn the sweep loop.
pub fn spawn_expiry_sweeper(
    sweeper: Arc<ExpirySweeper>,
    config: &SweepConfig,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let schedule = Schedule {
        interval: config.interval,
        backoff: config.backoff,
    };
    spawn_scheduled(sweeper, schedule, shutdown)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::library::model::NewBook;
    use crate::store::LibSqlBackend;
    use crate::test_support::RecordingMailbox;

    async fn store_with_reservations() -> Arc<dyn LibraryStore> {
        let store: Arc<dyn LibraryStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let now = Utc::now();
        for (i, (title, holder, end_offset)) in [
            ("Dune", "ana@example.com", -2),
            ("Emma", "luis@example.com", -1),
            ("Ulises", "eva@example.com", 5),
        ]
        .into_iter()
        .enumerate()
        {
            let book = store
                .insert_book(&NewBook {
                    title: title.into(),
                    author: "Autor".into(),
                    isbn: format!("isbn-{i}"),
                    publication_year: 1950,
                })
                .await
                .unwrap();
            store
                .reserve_book(
                    book.id,
                    holder,
                    now - Duration::days(20),
                    now + Duration::days(end_offset),
                )
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn sweep_expires_and_notifies() {
        let store = store_with_reservations().await;
        let mailbox = Arc::new(RecordingMailbox::new(vec![]));
        let sweeper = ExpirySweeper::new(Arc::clone(&store), Arc::clone(&mailbox) as Arc<dyn Mailbox>);

        let report = sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.expired_count, 2);
        assert_eq!(report.notified_count, 2);

        let sent = mailbox.sent();
        assert!(sent.iter().all(|s| s.subject == EXPIRY_SUBJECT));
        assert!(sent.iter().any(|s| s.to == "ana@example.com"
            && s.body
                == "Tu reserva del libro 'Dune' ha expirado. Por favor, devuelve el libro lo antes posible."));

        assert!(store.get_book_by_title("Dune").await.unwrap().unwrap().available);
        assert!(!store.get_book_by_title("Ulises").await.unwrap().unwrap().available);

        // Nothing left on a second pass.
        assert_eq!(sweeper.sweep(Utc::now()).await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn failed_notice_keeps_expiry() {
        let store = store_with_reservations().await;
        let mailbox = Arc::new(RecordingMailbox::new(vec![]).with_failing_send_to("ana@example.com"));
        let sweeper = ExpirySweeper::new(Arc::clone(&store), Arc::clone(&mailbox) as Arc<dyn Mailbox>);

        let report = sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.expired_count, 2);
        assert_eq!(report.notified_count, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(store.get_book_by_title("Dune").await.unwrap().unwrap().available);
    }
}
