pub mod client;
pub mod models;
pub mod protocol;

pub use client::UpdateClient;
pub use models::{LinkQuery, Platform, UpdateConfig};
