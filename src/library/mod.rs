//! Library domain: catalog entries, reservations and their lifecycle.

pub mod catalog;
pub mod lifecycle;
pub mod model;

pub use catalog::Catalog;
pub use lifecycle::ReservationManager;
pub use model::{Book, BookUpdate, ExpiredReservation, NewBook, Reservation};
