//! # Runtime Settings
//!
//! Every tunable used by the provisioners lives in [`Settings`]. A single value is
//! built at startup (from CLI flags on top of [`Settings::default`]) and passed by
//! reference into each component, so tests can shrink quotas and zero out delays.

use std::time::Duration;

/// OAuth scopes requested during the consent flow.
pub const DEFAULT_SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/iam",
];

/// The IAM API root.
pub const IAM_ENDPOINT: &str = "https://iam.googleapis.com";

/// Out-of-band redirect: the consent page shows the code for the operator to paste.
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Number of service accounts a project should end up with.
    pub quota: usize,
    /// Maximum number of creations bundled into one batch request.
    pub chunk_size: usize,
    /// `pageSize` for the single account listing call.
    pub list_page_size: usize,
    /// Pause after each creation batch before re-counting.
    pub batch_delay: Duration,
    /// Pause applied when a batch item reports HTTP 429.
    pub rate_limit_pause: Duration,
    /// Pause between accounts during key provisioning.
    pub key_delay: Duration,
    /// Prefix of generated account ids.
    pub account_prefix: String,
    pub scopes: Vec<String>,
    pub iam_endpoint: String,
    pub redirect_uri: String,
    pub http_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            quota: 100,
            chunk_size: 10,
            list_page_size: 100,
            batch_delay: Duration::from_secs(5),
            rate_limit_pause: Duration::from_millis(300),
            key_delay: Duration::from_secs(1),
            account_prefix: "mfc-".to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            iam_endpoint: IAM_ENDPOINT.to_string(),
            redirect_uri: OOB_REDIRECT_URI.to_string(),
            http_timeout: Duration::from_secs(120),
        }
    }
}

impl Settings {
    /// Settings with every delay set to zero. Used by tests.
    pub fn without_delays() -> Self {
        Self {
            batch_delay: Duration::ZERO,
            rate_limit_pause: Duration::ZERO,
            key_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Sleeps unless the duration is zero.
pub(crate) fn pause(d: Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}
