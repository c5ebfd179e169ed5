//! The closed set of requests a user can make by email.

use serde::{Deserialize, Serialize};

/// Action tag as emitted by the classifier model.
///
/// English tags are canonical; the Spanish tags from the prompt vocabulary
/// are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    #[serde(alias = "RESERVAR")]
    Reserve,
    #[serde(alias = "RENOVAR")]
    Renew,
    #[serde(alias = "ELIMINAR")]
    Cancel,
    #[serde(alias = "LISTAR")]
    List,
    #[serde(alias = "CREAR", alias = "CREATE_BOOK")]
    Create,
    #[serde(alias = "ELIMINAR_LIBRO")]
    DeleteBook,
}

/// A validated user request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Reserve { book_title: String },
    Renew { book_title: String },
    Cancel { book_title: String },
    List,
    CreateBook {
        title: String,
        author: String,
        isbn: String,
        year: i32,
    },
    DeleteBook { book_title: String },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Reserve { .. } => ActionKind::Reserve,
            Self::Renew { .. } => ActionKind::Renew,
            Self::Cancel { .. } => ActionKind::Cancel,
            Self::List => ActionKind::List,
            Self::CreateBook { .. } => ActionKind::Create,
            Self::DeleteBook { .. } => ActionKind::DeleteBook,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reserve { .. } => "reserve",
            Self::Renew { .. } => "renew",
            Self::Cancel { .. } => "cancel",
            Self::List => "list",
            Self::CreateBook { .. } => "create_book",
            Self::DeleteBook { .. } => "delete_book",
        }
    }

    /// Parse the JSON object produced by the classifier model.
    ///
    /// Only `action` is always required. Title-bearing actions also need a
    /// non-blank `book_title`. Book fields for `CREATE` are taken as given;
    /// the catalog validates them when the book is created.
    pub fn from_model_json(json: &str) -> Result<Self, String> {
        let raw: RawAction =
            serde_json::from_str(json).map_err(|e| format!("JSON parse error: {e}"))?;

        let title = || {
            raw.book_title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .ok_or_else(|| format!("{:?} action requires book_title", raw.action))
        };

        Ok(match raw.action {
            ActionKind::Reserve => Self::Reserve {
                book_title: title()?,
            },
            ActionKind::Renew => Self::Renew {
                book_title: title()?,
            },
            ActionKind::Cancel => Self::Cancel {
                book_title: title()?,
            },
            ActionKind::DeleteBook => Self::DeleteBook {
                book_title: title()?,
            },
            ActionKind::List => Self::List,
            ActionKind::Create => Self::CreateBook {
                title: title()?,
                author: raw.book_author.clone().unwrap_or_default(),
                isbn: raw.book_isbn.as_ref().map(isbn_text).unwrap_or_default(),
                year: raw.book_year.as_ref().and_then(year_value).unwrap_or(0),
            },
        })
    }
}

/// Wire shape of the classifier output.
#[derive(Debug, Deserialize)]
struct RawAction {
    action: ActionKind,
    #[serde(default)]
    book_title: Option<String>,
    #[serde(default)]
    book_author: Option<String>,
    #[serde(default)]
    book_isbn: Option<serde_json::Value>,
    #[serde(default)]
    book_year: Option<serde_json::Value>,
}

/// Models sometimes emit the ISBN as a bare number.
fn isbn_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Accepts `1965` or `"1965"`.
fn year_value(value: &serde_json::Value) -> Option<i32> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
