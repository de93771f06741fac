//! Teacher reviews and rating aggregates for a tutor-discovery platform.
//!
//! * [`ledger`]: add/edit/delete reviews with [`stats::RatingStats`] kept in sync.
//! * [`directory`]: teacher registration and profile maintenance.
//! * [`store`]: persistence, id and clock ports, plus an in-memory store.
//! * [`db`]: the Postgres store, migrations, seeding, and CSV import.
//! * [`report`]: markdown ratings report.

pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod models;
pub mod report;
pub mod retry;
pub mod stats;
pub mod store;

pub use directory::TeacherDirectory;
pub use error::{ReviewError, StoreError};
pub use ledger::RatingLedger;
pub use stats::{Rating, RatingStats};
