//! Mail I/O: the `Mailbox` abstraction and its IMAP/SMTP implementation.

pub mod email;
pub mod mailbox;

pub use email::{EmailConfig, ImapSmtpMailbox};
pub use mailbox::{InboundEmail, Mailbox};
