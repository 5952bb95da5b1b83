//! # GCP Authentication
//!
//! This module obtains an OAuth 2.0 user access token for the IAM API. A token
//! cached on disk is reused while valid and refreshed once expired; without a
//! usable cache the operator is sent through the installed-app consent flow and
//! pastes the resulting authorization code back.
//!
//! Network access to the token endpoint goes through [`TokenTransport`] and the
//! operator prompt through [`AuthCodeSupplier`], so both can be swapped in tests.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use reqwest::Url;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::blocking_client;
use crate::config::Settings;
use crate::gcp::types::TokenResponse;
use crate::secret::write_private;

/// Version written into new token caches. Caches with any other version are ignored.
pub const CACHE_VERSION: u32 = 1;

/// Tokens expiring within this window are treated as already expired.
const EXPIRY_SKEW_SECS: i64 = 10;

/// An OAuth client registered for the installed-app flow, as downloaded from
/// the cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Top level of the console download: the client sits under `installed` or `web`.
#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read client secrets {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid client secrets {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(text)?;
        let secrets = file
            .installed
            .or(file.web)
            .context("expected an \"installed\" or \"web\" client")?;
        if secrets.client_id.is_empty() {
            bail!("client_id is empty");
        }
        Ok(secrets)
    }
}

/// The on-disk token cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub version: u32,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
}

/// `now + secs`, or `None` when the lifetime does not fit a timestamp.
fn expiry_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let lifetime = Duration::try_seconds(i64::try_from(secs).ok()?)?;
    now.checked_add_signed(lifetime)
}

impl Credentials {
    fn from_response(
        resp: TokenResponse,
        previous_refresh: Option<String>,
        scopes: &[String],
        secrets: &ClientSecrets,
        now: DateTime<Utc>,
    ) -> Self {
        let scopes = match resp.scope.as_deref() {
            Some(s) if !s.trim().is_empty() => s.split_whitespace().map(str::to_string).collect(),
            _ => scopes.to_vec(),
        };
        Self {
            version: CACHE_VERSION,
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.or(previous_refresh),
            expiry: resp.expires_in.and_then(|secs| expiry_after(now, secs)),
            scopes,
            token_uri: secrets.token_uri.clone(),
            client_id: secrets.client_id.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(exp) => exp <= now + Duration::seconds(EXPIRY_SKEW_SECS),
            None => false,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && !self.is_expired(now)
    }

    /// Loads a cache file. Unreadable, malformed or foreign-version caches are
    /// reported and treated as absent.
    pub fn load(path: &Path) -> Option<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), "cannot read token cache: {e}");
                return None;
            }
        };
        match serde_json::from_str::<Credentials>(&text) {
            Ok(c) if c.version == CACHE_VERSION => Some(c),
            Ok(c) => {
                warn!(path = %path.display(), version = c.version, "ignoring token cache with unsupported version");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), "ignoring malformed token cache: {e}");
                None
            }
        }
    }

    /// Writes the cache via a temporary file and rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp_name = format!(
            "{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
        );
        let tmp_path = path.with_file_name(tmp_name);
        write_private(&tmp_path, json.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

/// Posts a form to the OAuth token endpoint.
pub trait TokenTransport {
    fn request_token(&self, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse>;
}

pub struct HttpTokenTransport {
    http: Client,
}

impl HttpTokenTransport {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            http: blocking_client(settings.http_timeout)?,
        })
    }
}

impl TokenTransport for HttpTokenTransport {
    fn request_token(&self, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(token_uri)
            .form(form)
            .send()
            .context("Failed to call token endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            bail!("Token endpoint returned {}: {}", status, error_text);
        }

        response.json().context("Invalid token endpoint response")
    }
}

/// Supplies the authorization code for a consent URL.
pub trait AuthCodeSupplier {
    fn authorization_code(&mut self, auth_url: &str) -> Result<String>;
}

/// Prints the consent URL and reads the pasted code from stdin.
pub struct ConsoleCodeSupplier;

impl AuthCodeSupplier for ConsoleCodeSupplier {
    fn authorization_code(&mut self, auth_url: &str) -> Result<String> {
        let mut err = std::io::stderr().lock();
        writeln!(err, "Please go to this URL to authorize:\n{auth_url}")?;
        write!(err, "Paste the authorization code here: ")?;
        err.flush()?;

        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read authorization code")?;
        let code = line.trim().to_string();
        if code.is_empty() {
            bail!("No authorization code entered");
        }
        Ok(code)
    }
}

/// Builds the consent page URL for the installed-app flow.
pub fn authorization_url(secrets: &ClientSecrets, settings: &Settings, state: &str) -> Result<Url> {
    let mut url = Url::parse(&secrets.auth_uri)
        .with_context(|| format!("Invalid auth_uri: {}", secrets.auth_uri))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &secrets.client_id)
        .append_pair("redirect_uri", &settings.redirect_uri)
        .append_pair("scope", &settings.scopes.join(" "))
        .append_pair("state", state)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    Ok(url)
}

fn random_state() -> String {
    let mut rng = rand::rng();
    (0..30)
        .map(|_| {
            let n = rng.random_range(0..62u8);
            (match n {
                0..=9 => b'0' + n,
                10..=35 => b'a' + n - 10,
                _ => b'A' + n - 36,
            }) as char
        })
        .collect()
}

/// Exchanges a refresh token for a new access token.
pub fn refresh<T: TokenTransport + ?Sized>(
    creds: &Credentials,
    secrets: &ClientSecrets,
    transport: &T,
) -> Result<Credentials> {
    let refresh_token = creds
        .refresh_token
        .as_deref()
        .context("Cached token has no refresh token")?;
    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("refresh_token", refresh_token),
    ];
    let resp = transport
        .request_token(&secrets.token_uri, &form)
        .context("Failed to refresh access token")?;
    Ok(Credentials::from_response(
        resp,
        creds.refresh_token.clone(),
        &creds.scopes,
        secrets,
        Utc::now(),
    ))
}

/// Runs the interactive consent flow and exchanges the returned code.
pub fn run_consent_flow<T, S>(
    secrets: &ClientSecrets,
    settings: &Settings,
    transport: &T,
    supplier: &mut S,
) -> Result<Credentials>
where
    T: TokenTransport + ?Sized,
    S: AuthCodeSupplier + ?Sized,
{
    let url = authorization_url(secrets, settings, &random_state())?;
    let code = supplier.authorization_code(url.as_str())?;
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code.trim()),
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("redirect_uri", settings.redirect_uri.as_str()),
    ];
    let resp = transport
        .request_token(&secrets.token_uri, &form)
        .context("Failed to exchange authorization code")?;
    Ok(Credentials::from_response(
        resp,
        None,
        &settings.scopes,
        secrets,
        Utc::now(),
    ))
}

/// Returns usable credentials, refreshing or re-authorizing as needed.
///
/// The client secrets are read first and any problem with them aborts before
/// the token endpoint is contacted. Whenever a token is created or refreshed it
/// is written back to `token_cache`.
pub fn obtain_credentials<T, S>(
    credentials_file: &Path,
    token_cache: &Path,
    settings: &Settings,
    transport: &T,
    supplier: &mut S,
) -> Result<Credentials>
where
    T: TokenTransport + ?Sized,
    S: AuthCodeSupplier + ?Sized,
{
    let secrets = ClientSecrets::load(credentials_file)?;
    let now = Utc::now();

    let cached = Credentials::load(token_cache);
    let creds = match cached {
        Some(c) if c.is_valid(now) => {
            debug!(path = %token_cache.display(), "using cached token");
            return Ok(c);
        }
        Some(c) if c.refresh_token.is_some() => {
            info!("Cached token expired, refreshing");
            refresh(&c, &secrets, transport)?
        }
        _ => {
            info!("No usable cached token, starting authorization flow");
            run_consent_flow(&secrets, settings, transport, supplier)?
        }
    };

    creds
        .save(token_cache)
        .with_context(|| format!("Failed to save token cache {}", token_cache.display()))?;
    Ok(creds)
}
