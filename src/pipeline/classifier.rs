//! Intent classifier: asks the language model to turn an email into an `Action`.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{ClassifyError, LlmError};
use crate::llm::costs;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::action::Action;

/// Temperature for classification (deterministic).
const CLASSIFIER_TEMPERATURE: f32 = 0.0;

/// Max output tokens. The answer is a single small JSON object.
const CLASSIFIER_MAX_TOKENS: u32 = 150;

/// Phrases that turn a reservation cancel into a catalog delete.
const DELETE_BOOK_PHRASES: &[&str] = &["eliminar el libro", "borrar el libro", "delete the book"];

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*").expect("valid fence pattern"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Classifies normalized email text into an `Action`.
pub struct IntentClassifier {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Classify `text` (already normalized).
    ///
    /// Transport failures and timeouts are `Unavailable`; output that does
    /// not parse into an action is `Classification`. Neither is retried.
    pub async fn classify(&self, text: &str) -> Result<Action, ClassifyError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_user_prompt(text)),
        ])
        .with_temperature(CLASSIFIER_TEMPERATURE)
        .with_max_tokens(CLASSIFIER_MAX_TOKENS);

        let response = match tokio::time::timeout(self.timeout, self.llm.complete(request)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ClassifyError::Unavailable(LlmError::Timeout {
                    provider: self.llm.model_name().to_string(),
                    timeout: self.timeout,
                }));
            }
        };

        let cost = costs::call_cost(
            self.llm.model_name(),
            response.input_tokens,
            response.output_tokens,
        );
        debug!(
            model = %self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost = %cost,
            raw = %response.content,
            "Classifier response"
        );

        let cleaned = clean_model_output(&response.content);
        let action = Action::from_model_json(&cleaned).map_err(|reason| {
            warn!(reason = %reason, "Classifier output is not a valid action");
            ClassifyError::Classification {
                raw: cleaned.clone(),
            }
        })?;

        Ok(disambiguate(action, text))
    }
}

fn build_system_prompt() -> String {
    r#"Eres un asistente de biblioteca. Analiza el correo y responde SOLO con un objeto JSON.
El JSON debe tener esta estructura exacta:
{
    "action": "RESERVE|RENEW|CANCEL|LIST|CREATE|DELETE_BOOK",
    "book_title": "título del libro" (para RESERVE/RENEW/CANCEL/CREATE/DELETE_BOOK),
    "book_author": "autor del libro" (solo para CREATE),
    "book_isbn": "isbn del libro" (solo para CREATE),
    "book_year": año de publicación (solo para CREATE)
}

Acciones disponibles:
- RESERVE: reservar un libro existente
- RENEW: renovar una reserva existente
- CANCEL: eliminar una reserva existente
- DELETE_BOOK: eliminar un libro de la biblioteca
- LIST: ver todos los libros
- CREATE: crear un nuevo libro

Si el correo menciona eliminar un libro de la biblioteca, usa DELETE_BOOK.
Si el correo menciona eliminar una reserva, usa CANCEL.

No incluyas ningún texto adicional, solo el JSON."#
        .to_string()
}

fn build_user_prompt(text: &str) -> String {
    format!("Analiza este correo y responde con el JSON: {text}")
}

/// Strip code fences, flatten whitespace and cut to the outermost object.
fn clean_model_output(raw: &str) -> String {
    let unfenced = CODE_FENCE.replace_all(raw, "");
    let flat = WHITESPACE.replace_all(&unfenced, " ");
    let trimmed = flat.trim();

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }
    trimmed.to_string()
}

/// A cancel whose text explicitly asks to delete the book is a catalog delete.
fn disambiguate(action: Action, text: &str) -> Action {
    match action {
        Action::Cancel { book_title } => {
            let lower = text.to_lowercase();
            if DELETE_BOOK_PHRASES.iter().any(|p| lower.contains(p)) {
                info!(title = %book_title, "Cancel reinterpreted as book deletion");
                Action::DeleteBook { book_title }
            } else {
                Action::Cancel { book_title }
            }
        }
        other => other,
    }
}
