//! Background loops.
//!
//! - `schedule`: repeating task runner (healthy interval, backoff, shutdown)
//! - `email_poller`: answers unread mail
//! - `expiry_sweeper`: expires overdue reservations and notifies holders

pub mod email_poller;
pub mod expiry_sweeper;
pub mod schedule;

pub use email_poller::{EmailPoller, spawn_email_poller};
pub use expiry_sweeper::{ExpirySweeper, SweepReport, spawn_expiry_sweeper};
pub use schedule::{Schedule, ScheduledTask, spawn_scheduled};
