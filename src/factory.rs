//! # Orchestration
//!
//! Decides which provisioning steps to run, authenticates once, and runs
//! account provisioning before key provisioning so that the key step lists
//! the accounts the first step created.

use std::path::{Path, PathBuf};

use anyhow::Result;
use thiserror::Error;
use tracing::info;

use crate::accounts::{QuotaReport, ensure_quota};
use crate::config::Settings;
use crate::gcp::auth::{
    AuthCodeSupplier, ConsoleCodeSupplier, HttpTokenTransport, obtain_credentials,
};
use crate::gcp::iam::{IamApi, IamClient};
use crate::keys::{KeyReport, provision_keys};

/// What the operator asked for.
#[derive(Debug, Clone)]
pub struct Options {
    pub output_dir: PathBuf,
    pub token_cache: PathBuf,
    pub credentials_file: PathBuf,
    /// Project to top up to the account quota.
    pub create_accounts: Option<String>,
    /// Project whose accounts should get keys.
    pub download_keys: Option<String>,
}

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("you must specify either --create-sas or --download-keys (or both)")]
    NoAction,

    #[error("credentials file not found: {}", .0.display())]
    MissingCredentials(PathBuf),

    #[error("authentication failed: {0:#}")]
    Auth(anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Produces an authenticated IAM handle.
pub trait Connector {
    type Api: IamApi;

    fn connect(
        &mut self,
        credentials_file: &Path,
        token_cache: &Path,
        settings: &Settings,
    ) -> Result<Self::Api>;
}

/// Authenticates against Google and talks to the real IAM endpoint.
pub struct GoogleConnector<S = ConsoleCodeSupplier> {
    supplier: S,
}

impl GoogleConnector<ConsoleCodeSupplier> {
    pub fn new() -> Self {
        Self {
            supplier: ConsoleCodeSupplier,
        }
    }
}

impl Default for GoogleConnector<ConsoleCodeSupplier> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: AuthCodeSupplier> Connector for GoogleConnector<S> {
    type Api = IamClient;

    fn connect(
        &mut self,
        credentials_file: &Path,
        token_cache: &Path,
        settings: &Settings,
    ) -> Result<IamClient> {
        let transport = HttpTokenTransport::new(settings)?;
        let creds = obtain_credentials(
            credentials_file,
            token_cache,
            settings,
            &transport,
            &mut self.supplier,
        )?;
        IamClient::new(&creds, settings)
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub accounts: Option<QuotaReport>,
    pub keys: Option<KeyReport>,
}

/// Runs the requested steps. Partial failures inside a step are logged by the
/// step and do not turn into an error here.
pub fn run<C: Connector>(
    options: &Options,
    settings: &Settings,
    connector: &mut C,
) -> Result<RunSummary, FactoryError> {
    if options.create_accounts.is_none() && options.download_keys.is_none() {
        return Err(FactoryError::NoAction);
    }
    if !options.credentials_file.exists() {
        return Err(FactoryError::MissingCredentials(
            options.credentials_file.clone(),
        ));
    }

    let iam = connector
        .connect(&options.credentials_file, &options.token_cache, settings)
        .map_err(FactoryError::Auth)?;

    let mut summary = RunSummary::default();
    if let Some(project) = &options.create_accounts {
        summary.accounts = Some(ensure_quota(&iam, project, settings, &mut rand::rng()));
    }
    if let Some(project) = &options.download_keys {
        summary.keys = Some(provision_keys(&iam, project, &options.output_dir, settings)?);
    }
    info!("Done");
    Ok(summary)
}
