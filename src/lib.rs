// # safactory: Service Account Factory
//
// Tops up a Google Cloud project to a fixed number of service accounts and
// provisions one user-managed key per account, saving each key's credentials
// file locally. Everything runs on one thread with blocking HTTP calls.

/// Shared blocking HTTP client construction.
pub mod client;

/// Tunables passed into every component.
pub mod config;

mod secret;

/// Google Cloud plumbing: OAuth credentials, the IAM client and wire types.
pub mod gcp;

/// Account listing and quota top-up.
pub mod accounts;

/// Per-account key creation and key file output.
pub mod keys;

/// Wires authentication and the provisioning steps together.
pub mod factory;

#[cfg(test)]
mod testing;
