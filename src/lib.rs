pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod store;

pub use api::{ErrorResponse, ReviewRequest, ReviewResponse, Status};
pub use config::{Backend, Config};
pub use error::{Result, ReviewError};
pub use models::*;
pub use service::ReviewService;
pub use store::{JsonStore, MemoryStore, PostgresStore, ReviewStore};
