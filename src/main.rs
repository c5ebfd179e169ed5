use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use biblio_mail::api::{self, AppState};
use biblio_mail::channels::{EmailConfig, ImapSmtpMailbox, Mailbox};
use biblio_mail::config::{ClassifierConfig, LibraryConfig, PollerConfig, ServerConfig, SweepConfig};
use biblio_mail::library::{Catalog, ReservationManager};
use biblio_mail::llm::create_provider;
use biblio_mail::pipeline::{ActionExecutor, EmailPipeline, IntentClassifier};
use biblio_mail::store::{LibSqlBackend, LibraryStore};
use biblio_mail::worker::{ExpirySweeper, spawn_email_poller, spawn_expiry_sweeper};

/// Console logging, plus a daily file under `LIBRARY_LOG_DIR` when set.
/// The returned guard flushes the file writer on drop.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var("LIBRARY_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "biblio-mail.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let _log_guard = init_tracing();

    let server = ServerConfig::from_env().context("invalid server settings")?;
    let library = LibraryConfig::from_env().context("invalid library settings")?;
    let poller = PollerConfig::from_env().context("invalid poller settings")?;
    let sweep = SweepConfig::from_env().context("invalid expiry sweep settings")?;
    let classifier = ClassifierConfig::from_env().context("invalid classifier settings")?;
    let email = EmailConfig::from_env().context("invalid mailbox settings")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %classifier.llm.model,
        imap = %email.imap_host,
        smtp = %email.smtp_host,
        "Starting biblio-mail"
    );

    // ── Storage ──────────────────────────────────────────────────────────
    let store: Arc<dyn LibraryStore> = Arc::new(
        LibSqlBackend::new_local(&server.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", server.db_path.display()))?,
    );

    // ── Pipeline ─────────────────────────────────────────────────────────
    let llm = create_provider(&classifier.llm).context("failed to create LLM provider")?;
    let mailbox: Arc<dyn Mailbox> = Arc::new(ImapSmtpMailbox::new(email));
    let pipeline = Arc::new(EmailPipeline::new(
        IntentClassifier::new(llm, classifier.timeout),
        ActionExecutor::new(Arc::clone(&store), &library),
        Arc::clone(&mailbox),
        &poller,
    ));
    let sweeper = Arc::new(ExpirySweeper::new(Arc::clone(&store), Arc::clone(&mailbox)));

    // ── Background loops ─────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller_handle = spawn_email_poller(Arc::clone(&pipeline), &poller, shutdown_rx.clone());
    let sweeper_handle = spawn_expiry_sweeper(Arc::clone(&sweeper), &sweep, shutdown_rx.clone());

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = api::router(AppState {
        catalog: Arc::new(Catalog::new(Arc::clone(&store))),
        reservations: Arc::new(ReservationManager::new(Arc::clone(&store))),
        pipeline,
        sweeper,
        mailbox,
        library,
        poller,
    });
    let listener = TcpListener::bind(("0.0.0.0", server.port))
        .await
        .with_context(|| format!("failed to bind port {}", server.port))?;
    info!(port = server.port, "HTTP server listening");

    let mut server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    server_handle
        .await
        .context("HTTP server task panicked")?
        .context("HTTP server failed")?;
    poller_handle.await.context("poller task panicked")?;
    sweeper_handle.await.context("sweeper task panicked")?;

    info!("Stopped");
    Ok(())
}
