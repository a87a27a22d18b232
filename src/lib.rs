pub mod config;
pub mod error;
pub mod models;
pub mod openapi;
pub mod outcome;
pub mod pagination;
pub mod path;
pub mod pool;
pub mod repo;
pub mod routes;
pub mod service;
pub mod votes;

// Re-export commonly used items for tests / external users
pub use config::StoreConfig;
pub use outcome::{Outcome, StatusKind};
pub use routes::{config, AppState};
pub use service::ForumService;
