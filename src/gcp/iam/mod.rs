//! # Identity and Access Management (IAM) Client
//!
//! This module provides a client for the parts of the IAM API used to manage
//! service accounts and their keys.
//!
//! ## Submodules
//! - `client`: The [`IamApi`] trait and its HTTP implementation.
//! - `batch`: Encoding and decoding of `multipart/mixed` batch calls.

/// Multipart batch codec and per-item result collection.
pub mod batch;
/// Core client for IAM API requests.
pub mod client;

pub use batch::{BatchCollector, BatchItem};
pub use client::{IamApi, IamClient};
