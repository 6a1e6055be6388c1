mod migrator;
mod repository;

pub use migrator::{Migration, MigrationError, MIGRATIONS};
pub use repository::*;
