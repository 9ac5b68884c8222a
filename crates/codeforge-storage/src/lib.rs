// Postgres storage layer with sqlx

pub mod backends;
pub mod models;
pub mod repositories;

pub use backends::{
    PgConversationBackend, PgSessionIndexBackend, PgStateBackend, PgVcsBackend,
};
pub use models::*;
pub use repositories::Database;
