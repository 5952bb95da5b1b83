//! # Service Account Provisioning
//!
//! Listing the accounts of a project and topping it up to the configured quota
//! with batched creation calls.

use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::config::{Settings, pause};
use crate::gcp::error::ApiError;
use crate::gcp::iam::{BatchCollector, IamApi};
use crate::gcp::types::{CreateServiceAccountRequest, ServiceAccount};

/// Characters allowed in the random part of an account id.
const ID_CHARS: &[u8] = b"-abcdefghijklmnopqrstuvwxyz1234567890";
/// Length of the random body between the prefix and the final character.
const ID_BODY_LEN: usize = 25;

/// Generates `prefix` + 25 chars from `[-a-z0-9]` + one char from `[a-z0-9]`.
///
/// The last character never is a hyphen, and with a letter-led prefix the id
/// satisfies the IAM account id pattern.
pub fn generate_account_id<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    let mut id = String::with_capacity(prefix.len() + ID_BODY_LEN + 1);
    id.push_str(prefix);
    for _ in 0..ID_BODY_LEN {
        id.push(ID_CHARS[rng.random_range(0..ID_CHARS.len())] as char);
    }
    // Skip the leading '-'.
    id.push(ID_CHARS[rng.random_range(1..ID_CHARS.len())] as char);
    id
}

/// Lists the accounts of `project` with a single call of `list_page_size` items.
///
/// A truncated listing (the service returned a continuation token) is reported
/// but not followed.
pub fn try_list_accounts<A: IamApi + ?Sized>(
    iam: &A,
    project: &str,
    settings: &Settings,
) -> Result<Vec<ServiceAccount>, ApiError> {
    let resp = iam.list_service_accounts(project, settings.list_page_size)?;
    if resp.next_page_token.is_some() {
        warn!(
            project,
            page_size = settings.list_page_size,
            "account listing truncated; only the first page is used"
        );
    }
    Ok(resp.accounts)
}

/// Like [`try_list_accounts`], but a failed call is logged and yields an empty
/// list. Callers counting accounts therefore see zero on failure.
pub fn list_accounts<A: IamApi + ?Sized>(
    iam: &A,
    project: &str,
    settings: &Settings,
) -> Vec<ServiceAccount> {
    match try_list_accounts(iam, project, settings) {
        Ok(accounts) => accounts,
        Err(e) => {
            error!(project, "Error listing service accounts: {e}");
            Vec::new()
        }
    }
}

/// Outcome of [`ensure_quota`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaReport {
    /// Account count seen before any creation.
    pub initial: usize,
    /// Account count seen by the last listing.
    pub final_count: usize,
    /// Batch requests submitted.
    pub batches: usize,
    /// Individual creations requested across all batches.
    pub requested: usize,
}

/// Applies the shared per-item policy to a drained batch: rate-limit errors are
/// absorbed with a short pause, other errors are logged. Returns the number of
/// items that succeeded.
pub fn handle_batch_results(collector: &mut BatchCollector, settings: &Settings) -> usize {
    let mut ok = 0;
    for item in collector.drain() {
        match item.result {
            Ok(_) => ok += 1,
            Err(e) => {
                if e.is_rate_limited() {
                    debug!(item = item.index, "batch item rate limited");
                } else {
                    warn!(item = item.index, "Batch request error: {e}");
                }
                pause(settings.rate_limit_pause);
            }
        }
    }
    ok
}

/// Creates accounts in chunks until `project` holds `settings.quota` of them.
///
/// The count is re-read after every batch. There is no iteration ceiling: the
/// loop ends only once the service reports enough accounts.
pub fn ensure_quota<A, R>(
    iam: &A,
    project: &str,
    settings: &Settings,
    rng: &mut R,
) -> QuotaReport
where
    A: IamApi + ?Sized,
    R: Rng + ?Sized,
{
    info!(project, "Starting service account creation");
    let quota = settings.quota;
    let chunk = settings.chunk_size.max(1);

    let mut count = list_accounts(iam, project, settings).len();
    let mut report = QuotaReport {
        initial: count,
        ..Default::default()
    };

    while count < quota {
        let to_create = chunk.min(quota - count);
        info!(project, "Have {count}/{quota} service accounts. Creating next {to_create}...");

        let requests: Vec<CreateServiceAccountRequest> = (0..to_create)
            .map(|_| {
                CreateServiceAccountRequest::named(generate_account_id(
                    &settings.account_prefix,
                    &mut *rng,
                ))
            })
            .collect();
        let mut collector = BatchCollector::new();
        match iam.create_service_accounts(project, &requests, &mut collector) {
            Ok(()) => {
                let created = handle_batch_results(&mut collector, settings);
                debug!(project, created, requested = to_create, "batch finished");
            }
            Err(e) if e.is_rate_limited() => pause(settings.rate_limit_pause),
            Err(e) => error!(project, "Batch submission failed: {e}"),
        }
        report.batches += 1;
        report.requested += to_create;

        info!(
            project,
            "Batch of {to_create} submitted. Waiting {:?}...", settings.batch_delay
        );
        pause(settings.batch_delay);
        count = list_accounts(iam, project, settings).len();
    }

    report.final_count = count;
    info!(project, "Ensured {quota} service accounts exist");
    report
}
