//! famcare: family medical records on a hosted backend.

pub mod config;
pub mod error;
pub mod password;
pub mod recovery;
pub mod remote;
pub mod store;
pub mod views;

pub use error::{AppError, Result};
pub use store::{FamilySnapshot, FamilyStore};
