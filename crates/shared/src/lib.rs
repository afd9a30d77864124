//! Domain model and remote wire format shared by the famcare crates.

pub mod auth;
pub mod models;
pub mod rows;

pub use auth::*;
pub use models::*;
