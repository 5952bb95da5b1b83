use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use safactory::config::Settings;
use safactory::factory::{self, FactoryError, GoogleConnector, Options};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "safactory",
    about = "Create Google service accounts and download their keys"
)]
struct Cli {
    /// Directory to output the credential files
    #[arg(short = 'p', long = "path", default_value = "accounts")]
    path: PathBuf,

    /// Token cache file path
    #[arg(long, default_value = "token_sa.pickle")]
    token: PathBuf,

    /// OAuth client secrets file path
    #[arg(long, default_value = "credentials.json")]
    credentials: PathBuf,

    /// Create service accounts in the given project ID until the quota is met
    #[arg(long = "create-sas", value_name = "PROJECT_ID")]
    create_sas: Option<String>,

    /// Download keys for service accounts in the given project ID
    #[arg(long = "download-keys", value_name = "PROJECT_ID")]
    download_keys: Option<String>,

    /// Number of service accounts a project should hold
    #[arg(long, default_value_t = 100)]
    quota: usize,

    /// Accounts created per batch request
    #[arg(long, default_value_t = 10)]
    chunk_size: usize,

    /// Seconds to wait after each creation batch
    #[arg(long, default_value_t = 5)]
    batch_delay_secs: u64,

    /// Milliseconds to wait between accounts while creating keys
    #[arg(long, default_value_t = 1000)]
    key_delay_ms: u64,

    /// Prefix of generated account IDs
    #[arg(long, default_value = "mfc-")]
    prefix: String,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            quota: self.quota,
            chunk_size: self.chunk_size,
            batch_delay: Duration::from_secs(self.batch_delay_secs),
            key_delay: Duration::from_millis(self.key_delay_ms),
            account_prefix: self.prefix.clone(),
            ..Settings::default()
        }
    }

    fn options(&self) -> Options {
        Options {
            output_dir: self.path.clone(),
            token_cache: self.token.clone(),
            credentials_file: self.credentials.clone(),
            create_accounts: self.create_sas.clone(),
            download_keys: self.download_keys.clone(),
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut connector = GoogleConnector::new();
    match factory::run(&cli.options(), &cli.settings(), &mut connector) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e @ (FactoryError::NoAction | FactoryError::MissingCredentials(_))) => {
            error!("Error: {e}");
            ExitCode::from(1)
        }
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::from(1)
        }
    }
}
