pub mod api;
pub mod documents;
pub mod events;
pub mod models;
