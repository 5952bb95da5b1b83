//! # Key Provisioning
//!
//! Gives every service account of a project one user-managed key and stores the
//! key's credentials file locally. The private payload is only returned by the
//! creation call, so it is written out before moving on to the next account.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, error, info, warn};

use crate::accounts::list_accounts;
use crate::config::{Settings, pause};
use crate::gcp::iam::IamApi;
use crate::gcp::types::{CreateKeyRequest, CredentialsFile, ServiceAccount};
use crate::secret::write_private;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyReport {
    pub accounts: usize,
    pub created: usize,
    /// Accounts that already held a user-managed key.
    pub skipped: usize,
    pub failed: usize,
}

/// Path of the key file for `account` under `output_dir`.
pub fn key_file_path(output_dir: &Path, account: &ServiceAccount) -> PathBuf {
    output_dir.join(format!("{}.json", account.local_part()))
}

enum KeyOutcome {
    Created(PathBuf),
    Skipped,
}

/// Creates one key for each account of `project` lacking a user-managed key.
///
/// Per-account failures are logged and counted; only failing to create
/// `output_dir` aborts the run.
pub fn provision_keys<A: IamApi + ?Sized>(
    iam: &A,
    project: &str,
    output_dir: &Path,
    settings: &Settings,
) -> Result<KeyReport> {
    info!(project, "Starting key creation and download");
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let accounts = list_accounts(iam, project, settings);
    let mut report = KeyReport {
        accounts: accounts.len(),
        ..Default::default()
    };
    if accounts.is_empty() {
        info!(project, "No service accounts found. Aborting key download.");
        return Ok(report);
    }
    info!(project, "Found {} service accounts. Checking for existing keys...", accounts.len());

    for (i, sa) in accounts.iter().enumerate() {
        if i > 0 {
            pause(settings.key_delay);
        }
        match provision_one(iam, sa, output_dir) {
            Ok(KeyOutcome::Created(path)) => {
                report.created += 1;
                info!(account = %sa.email, "Wrote {}", path.display());
            }
            Ok(KeyOutcome::Skipped) => {
                report.skipped += 1;
                debug!(account = %sa.email, "already has a user-managed key");
            }
            Err(e) => {
                report.failed += 1;
                warn!(account = %sa.email, "Skipping account: {e:#}");
            }
        }
    }

    info!(
        project,
        created = report.created,
        skipped = report.skipped,
        failed = report.failed,
        "Key download complete. JSON files are in '{}'",
        output_dir.display()
    );
    Ok(report)
}

fn provision_one<A: IamApi + ?Sized>(
    iam: &A,
    sa: &ServiceAccount,
    output_dir: &Path,
) -> Result<KeyOutcome> {
    let keys = iam
        .list_keys(&sa.name)
        .context("Could not list keys")?;
    if keys.iter().any(|k| k.is_user_managed()) {
        return Ok(KeyOutcome::Skipped);
    }

    let key = iam
        .create_key(&sa.name, &CreateKeyRequest::default())
        .context("Could not create key")?;

    // From here on the key exists remotely; losing the payload means it must be
    // deleted by hand.
    let payload = match decode_payload(key.private_key_data.as_deref()) {
        Ok(p) => p,
        Err(e) => {
            error!(account = %sa.email, key = %key.name, "key created but its payload is unusable; delete it manually");
            return Err(e);
        }
    };
    if let Ok(file) = serde_json::from_slice::<CredentialsFile>(&payload) {
        debug!(account = %file.client_email, key_id = %file.private_key_id, "decoded credentials");
    }

    let path = key_file_path(output_dir, sa);
    if let Err(e) = write_private(&path, &payload) {
        error!(account = %sa.email, key = %key.name, "key created but could not be saved; delete it manually");
        return Err(e).with_context(|| format!("Failed to write {}", path.display()));
    }
    Ok(KeyOutcome::Created(path))
}

fn decode_payload(data: Option<&str>) -> Result<Vec<u8>> {
    let data = data.context("Response carried no privateKeyData")?;
    STANDARD
        .decode(data.trim())
        .context("privateKeyData is not valid base64")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::ensure_quota;
    use crate::gcp::types::KeyType;
    use crate::testing::FakeIam;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn settings() -> Settings {
        Settings::without_delays()
    }

    #[test]
    fn creates_key_and_file_for_accounts_without_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let iam = FakeIam::with_accounts("p", 3);
        let report = provision_keys(&iam, "p", dir.path(), &settings())?;
        assert_eq!(report.created, 3);
        assert_eq!(report.skipped, 0);
        assert_eq!(iam.key_creates().len(), 3);

        for sa in iam.accounts("p") {
            let path = key_file_path(dir.path(), &sa);
            let file: CredentialsFile = serde_json::from_slice(&std::fs::read(&path)?)?;
            assert_eq!(file.client_email, sa.email);
            assert_eq!(file.account_type, "service_account");
        }
        Ok(())
    }

    #[test]
    fn accounts_with_user_managed_key_are_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let iam = FakeIam::with_accounts("p", 2);
        let accounts = iam.accounts("p");
        iam.add_key(&accounts[0].name, KeyType::UserManaged);
        let existing = key_file_path(dir.path(), &accounts[0]);
        std::fs::write(&existing, "previous contents")?;

        let report = provision_keys(&iam, "p", dir.path(), &settings())?;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.created, 1);
        assert_eq!(iam.key_creates(), vec![accounts[1].name.clone()]);
        assert_eq!(std::fs::read_to_string(&existing)?, "previous contents");
        Ok(())
    }

    #[test]
    fn system_managed_keys_do_not_count() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let iam = FakeIam::with_accounts("p", 1);
        let accounts = iam.accounts("p");
        let sa = &accounts[0];
        iam.add_key(&sa.name, KeyType::SystemManaged);
        iam.add_key(&sa.name, KeyType::SystemManaged);

        let report = provision_keys(&iam, "p", dir.path(), &settings())?;
        assert_eq!(report.created, 1);
        assert_eq!(iam.key_creates().len(), 1);
        assert!(key_file_path(dir.path(), sa).exists());
        Ok(())
    }

    #[test]
    fn file_holds_decoded_payload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let iam = FakeIam::with_accounts("p", 1);
        provision_keys(&iam, "p", dir.path(), &settings())?;
        let accounts = iam.accounts("p");
        let sa = &accounts[0];
        let text = std::fs::read_to_string(key_file_path(dir.path(), sa))?;
        assert!(text.starts_with('{'));
        assert!(text.contains("\"private_key\""));
        assert_eq!(
            std::fs::read_dir(dir.path())?.count(),
            1,
            "exactly one file per account"
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn key_files_are_owner_only() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir()?;
        let iam = FakeIam::with_accounts("p", 1);
        let accounts = iam.accounts("p");
        let path = key_file_path(dir.path(), &accounts[0]);
        // A leftover world-readable file is tightened when overwritten.
        std::fs::write(&path, "stale")?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))?;

        provision_keys(&iam, "p", dir.path(), &settings())?;
        let mode = std::fs::metadata(&path)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_ne!(std::fs::read_to_string(&path)?, "stale");
        Ok(())
    }

    #[test]
    fn second_run_creates_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let iam = FakeIam::with_accounts("p", 5);
        let first = provision_keys(&iam, "p", dir.path(), &settings())?;
        assert_eq!(first.created, 5);
        let second = provision_keys(&iam, "p", dir.path(), &settings())?;
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 5);
        assert_eq!(iam.key_creates().len(), 5);
        Ok(())
    }

    #[test]
    fn per_account_failures_do_not_stop_the_run() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let iam = FakeIam::with_accounts("p", 3);
        let accounts = iam.accounts("p");
        iam.fail_key_list_for(&accounts[0].name);
        iam.fail_key_create_for(&accounts[1].name);

        let report = provision_keys(&iam, "p", dir.path(), &settings())?;
        assert_eq!(report.failed, 2);
        assert_eq!(report.created, 1);
        assert!(!key_file_path(dir.path(), &accounts[0]).exists());
        assert!(!key_file_path(dir.path(), &accounts[1]).exists());
        assert!(key_file_path(dir.path(), &accounts[2]).exists());
        Ok(())
    }

    #[test]
    fn empty_project_writes_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("accounts");
        let iam = FakeIam::with_accounts("p", 0);
        let report = provision_keys(&iam, "p", &out, &settings())?;
        assert_eq!(report, KeyReport::default());
        assert!(out.is_dir());
        assert_eq!(std::fs::read_dir(&out)?.count(), 0);
        Ok(())
    }

    #[test]
    fn keys_follow_account_creation_only_when_run_after_it() -> Result<()> {
        let dir = tempfile::tempdir()?;

        // Key provisioning that read the listing before accounts were topped up
        // only covers the original 93.
        let early = FakeIam::with_accounts("p", 93);
        let before = provision_keys(&early, "p", dir.path().join("early").as_path(), &settings())?;
        ensure_quota(&early, "p", &settings(), &mut StdRng::seed_from_u64(1));
        assert_eq!(before.created, 93);
        assert_eq!(early.account_count("p"), 100);

        // Run after provisioning, it re-lists and covers all 100.
        let iam = FakeIam::with_accounts("p", 93);
        let quota = ensure_quota(&iam, "p", &settings(), &mut StdRng::seed_from_u64(1));
        assert_eq!(iam.batch_sizes(), vec![7]);
        assert_eq!(quota.final_count, 100);
        let report = provision_keys(&iam, "p", dir.path().join("late").as_path(), &settings())?;
        assert_eq!(report.accounts, 100);
        assert_eq!(report.created, 100);
        Ok(())
    }

    #[test]
    fn decode_payload_rejects_missing_or_bad_data() {
        assert!(decode_payload(None).is_err());
        assert!(decode_payload(Some("@@not base64@@")).is_err());
        assert_eq!(decode_payload(Some("aGk=")).unwrap(), b"hi");
    }
}
