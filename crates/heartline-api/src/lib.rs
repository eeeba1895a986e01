pub mod auth;
pub mod clear_all;
pub mod directory;
pub mod error;
pub mod gratitude;
pub mod messages;
pub mod middleware;
pub mod profile;
pub mod protocol;
pub mod repository;
pub mod routes;
pub mod session;

pub use error::{HeartlineError, Result};
pub use routes::router;
