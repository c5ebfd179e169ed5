//! biblio-mail: a library reservation desk driven by email.

pub mod api;
pub mod channels;
pub mod config;
pub mod error;
pub mod library;
pub mod llm;
pub mod pipeline;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;
