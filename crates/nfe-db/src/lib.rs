pub mod config;
pub mod database;
pub mod layout;
pub mod repository;
pub mod retention;

pub use config::DatabaseConfig;
pub use database::Database;
pub use layout::TableLayout;
pub use repository::HistoryRepository;
pub use retention::{RetentionPolicy, RetentionPruner};
