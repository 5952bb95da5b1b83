pub mod auth;

pub mod error;

pub mod iam;

pub mod types;

// Re-export common auth
pub use auth::{Credentials, obtain_credentials};
pub use error::ApiError;
