use std::time::Duration;

use reqwest::blocking::Client;

/// Builds the blocking HTTP client shared by the token endpoint and IAM calls.
pub fn blocking_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("safactory/", env!("CARGO_PKG_VERSION")))
        .build()
}
