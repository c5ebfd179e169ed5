//! Integration tests for the HTTP API.
//!
//! Each test spins up an Axum server on a random port backed by an in-memory
//! database, a stub LLM and a recording mailbox, then exercises the REST
//! contract with reqwest.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use biblio_mail::api::{self, AppState};
use biblio_mail::channels::{InboundEmail, Mailbox};
use biblio_mail::config::{LibraryConfig, PollerConfig};
use biblio_mail::error::{LlmError, MailboxError};
use biblio_mail::library::{Catalog, ReservationManager};
use biblio_mail::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use biblio_mail::pipeline::{ActionExecutor, EmailPipeline, IntentClassifier};
use biblio_mail::store::{LibSqlBackend, LibraryStore};
use biblio_mail::worker::ExpirySweeper;

/// Answers with the first scripted action whose needle appears in the prompt.
struct StubLlm {
    script: Vec<(&'static str, &'static str)>,
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }
    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request.last_user_message().unwrap_or_default().to_string();
        let content = self
            .script
            .iter()
            .find(|(needle, _)| prompt.contains(needle))
            .map(|(_, reply)| reply.to_string())
            .unwrap_or_else(|| "no sé".to_string());
        Ok(CompletionResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

/// Mailbox with a fixed inbox that records what was sent.
#[derive(Default)]
struct StubMailbox {
    inbox: Vec<InboundEmail>,
    sent: Mutex<Vec<(String, String)>>,
    read: Mutex<Vec<String>>,
}

#[async_trait]
impl Mailbox for StubMailbox {
    async fn list_unread(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InboundEmail>, MailboxError> {
        let read = self.read.lock().unwrap().clone();
        Ok(self
            .inbox
            .iter()
            .filter(|e| e.received_at >= since && !read.contains(&e.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn send(&self, to: &str, _subject: &str, body: &str) -> Result<(), MailboxError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailboxError> {
        self.read.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    store: Arc<dyn LibraryStore>,
    mailbox: Arc<StubMailbox>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

/// Start an Axum server on a random port.
async fn start_server(mailbox: StubMailbox) -> TestServer {
    let store: Arc<dyn LibraryStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let mailbox = Arc::new(mailbox);
    let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm {
        script: vec![
            ("Reservar", r#"{"action": "RESERVE", "book_title": "Dune"}"#),
            ("Listar", r#"{"action": "LIST"}"#),
        ],
    });

    let library = LibraryConfig::default();
    let poller = PollerConfig::default();
    let dyn_mailbox: Arc<dyn Mailbox> = mailbox.clone();
    let pipeline = Arc::new(EmailPipeline::new(
        IntentClassifier::new(llm, Duration::from_secs(5)),
        ActionExecutor::new(Arc::clone(&store), &library),
        Arc::clone(&dyn_mailbox),
        &poller,
    ));
    let app = api::router(AppState {
        catalog: Arc::new(Catalog::new(Arc::clone(&store))),
        reservations: Arc::new(ReservationManager::new(Arc::clone(&store))),
        pipeline,
        sweeper: Arc::new(ExpirySweeper::new(Arc::clone(&store), Arc::clone(&dyn_mailbox))),
        mailbox: dyn_mailbox,
        library,
        poller,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        client: reqwest::Client::new(),
        store,
        mailbox,
    }
}

async fn create_dune(server: &TestServer) -> Value {
    let resp = server
        .client
        .post(server.url("/api/v1/books"))
        .json(&json!({
            "title": "Dune",
            "author": "Frank Herbert",
            "isbn": "9780441013593",
            "publication_year": 1965
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn root_and_health() {
    let server = start_server(StubMailbox::default()).await;

    let root: Value = server
        .client
        .get(server.url("/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["message"], "Bienvenido a la API de la Biblioteca");

    let health: Value = server
        .client
        .get(server.url("/api/v1/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn book_crud() {
    let server = start_server(StubMailbox::default()).await;
    let book = create_dune(&server).await;
    let id = book["id"].as_i64().unwrap();
    assert_eq!(book["available"], true);

    let updated: Value = server
        .client
        .put(server.url(&format!("/api/v1/books/{id}")))
        .json(&json!({ "author": "F. Herbert", "available": false }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["author"], "F. Herbert");
    assert_eq!(updated["title"], "Dune");
    assert_eq!(updated["available"], true, "availability is not client-settable");

    let list: Value = server
        .client
        .get(server.url("/api/v1/books"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/books/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Libro eliminado exitosamente");

    let resp = server
        .client
        .get(server.url(&format!("/api/v1/books/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Libro no encontrado");
}

#[tokio::test]
async fn invalid_and_duplicate_books_rejected() {
    let server = start_server(StubMailbox::default()).await;
    create_dune(&server).await;

    let resp = server
        .client
        .post(server.url("/api/v1/books"))
        .json(&json!({
            "title": "Otro",
            "author": "Alguien",
            "isbn": "9780441013593",
            "publication_year": 1970
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = server
        .client
        .post(server.url("/api/v1/books"))
        .json(&json!({
            "title": "  ",
            "author": "Alguien",
            "isbn": "123",
            "publication_year": 1970
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reservation_lifecycle() {
    let server = start_server(StubMailbox::default()).await;
    let book_id = create_dune(&server).await["id"].as_i64().unwrap();
    let end_date = (Utc::now() + chrono::Duration::days(7)).to_rfc3339();

    let resp = server
        .client
        .post(server.url("/api/v1/reservations"))
        .json(&json!({ "book_id": book_id, "user_email": "ana@example.com", "end_date": end_date }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let reservation: Value = resp.json().await.unwrap();
    let id = reservation["id"].as_i64().unwrap();
    assert_eq!(reservation["is_active"], true);

    // The book is taken now.
    let resp = server
        .client
        .post(server.url("/api/v1/reservations"))
        .json(&json!({ "book_id": book_id, "user_email": "luis@example.com", "end_date": end_date }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let mine: Value = server
        .client
        .get(server.url("/api/v1/reservations/user/ana@example.com"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let renewed: Value = server
        .client
        .put(server.url(&format!("/api/v1/reservations/{id}/renew")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let new_end: DateTime<Utc> = renewed["end_date"].as_str().unwrap().parse().unwrap();
    assert!(new_end > Utc::now() + chrono::Duration::days(13));

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/reservations/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(server.store.get_book(book_id).await.unwrap().unwrap().available);

    // Released reservations can no longer be renewed or released.
    let resp = server
        .client
        .put(server.url(&format!("/api/v1/reservations/{id}/renew")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/reservations/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_reservation_and_book_are_404() {
    let server = start_server(StubMailbox::default()).await;

    let resp = server
        .client
        .get(server.url("/api/v1/reservations/999"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Reserva no encontrada");

    let end_date = (Utc::now() + chrono::Duration::days(7)).to_rfc3339();
    let resp = server
        .client
        .post(server.url("/api/v1/reservations"))
        .json(&json!({ "book_id": 42, "user_email": "ana@example.com", "end_date": end_date }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn process_endpoint_runs_pipeline() {
    let server = start_server(StubMailbox::default()).await;
    create_dune(&server).await;

    let body: Value = server
        .client
        .post(server.url("/api/v1/email/process"))
        .json(&json!({ "email_content": "<p>Reservar Dune</p>", "user_email": "ana@example.com" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["result"]["status"], "completed");
    assert_eq!(body["result"]["action"]["action"], "RESERVE");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("Has reservado exitosamente el libro 'Dune'")
    );

    let sent = server.mailbox.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "ana@example.com");
}

#[tokio::test]
async fn check_endpoints_report_counts() {
    let inbox = vec![InboundEmail {
        id: "7".into(),
        subject: "Biblioteca".into(),
        body_html: "Listar libros".into(),
        from_address: "ana@example.com".into(),
        received_at: Utc::now(),
    }];
    let server = start_server(StubMailbox {
        inbox,
        ..Default::default()
    })
    .await;

    let conn: Value = server
        .client
        .get(server.url("/api/v1/email/test-connection"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(conn["status"], "success");
    assert_eq!(conn["emails_found"], 1);

    let check: Value = server
        .client
        .post(server.url("/api/v1/email/check"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(check["message"], "Procesados 1 correos");
    assert_eq!(server.mailbox.read.lock().unwrap().as_slice(), ["7"]);

    let expired: Value = server
        .client
        .post(server.url("/api/v1/email/check-expired"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(expired["message"], "Verificadas 0 reservas expiradas");
}
