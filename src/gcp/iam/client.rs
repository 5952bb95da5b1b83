//! # IAM API Client Logic
//!
//! Blocking calls against the IAM v1 REST surface: listing and batch-creating
//! service accounts, listing and creating their keys.

use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client::blocking_client;
use crate::config::Settings;
use crate::gcp::auth::Credentials;
use crate::gcp::error::ApiError;
use crate::gcp::iam::batch::{self, BatchCollector, BatchPart};
use crate::gcp::types::{
    CreateKeyRequest, CreateServiceAccountRequest, ListKeysResponse,
    ListServiceAccountsResponse, ServiceAccountKey,
};

/// The subset of the IAM API the provisioners rely on.
pub trait IamApi {
    /// One `serviceAccounts.list` call; no continuation is followed.
    fn list_service_accounts(
        &self,
        project: &str,
        page_size: usize,
    ) -> Result<ListServiceAccountsResponse, ApiError>;

    /// Submits every request in a single batch round trip. Per-item outcomes go
    /// into `collector`; the returned error covers only the batch call itself.
    fn create_service_accounts(
        &self,
        project: &str,
        requests: &[CreateServiceAccountRequest],
        collector: &mut BatchCollector,
    ) -> Result<(), ApiError>;

    /// User-managed keys of `account_name` (a full resource name).
    fn list_keys(&self, account_name: &str) -> Result<Vec<ServiceAccountKey>, ApiError>;

    fn create_key(
        &self,
        account_name: &str,
        request: &CreateKeyRequest,
    ) -> Result<ServiceAccountKey, ApiError>;
}

pub struct IamClient {
    http: Client,
    endpoint: String,
    access_token: String,
}

impl IamClient {
    pub fn new(credentials: &Credentials, settings: &Settings) -> Result<Self> {
        let http = blocking_client(settings.http_timeout).context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint: settings.iam_endpoint.trim_end_matches('/').to_string(),
            access_token: credentials.access_token.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Url::parse(&format!("{}{}", self.endpoint, path))
            .map_err(|e| ApiError::Decode(format!("bad URL {path}: {e}")))
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.access_token))
    }

    fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let res = self.authorized(req).send()?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().unwrap_or_default();
            return Err(ApiError::from_response(status.as_u16(), &body));
        }
        let text = res.text()?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl IamApi for IamClient {
    fn list_service_accounts(
        &self,
        project: &str,
        page_size: usize,
    ) -> Result<ListServiceAccountsResponse, ApiError> {
        let mut url = self.url(&format!("/v1/projects/{project}/serviceAccounts"))?;
        url.query_pairs_mut()
            .append_pair("pageSize", &page_size.to_string());
        self.send_json(self.http.get(url))
    }

    fn create_service_accounts(
        &self,
        project: &str,
        requests: &[CreateServiceAccountRequest],
        collector: &mut BatchCollector,
    ) -> Result<(), ApiError> {
        let parts = requests
            .iter()
            .map(|r| -> Result<BatchPart, ApiError> {
                Ok(BatchPart {
                    method: "POST",
                    path: format!("/v1/projects/{project}/serviceAccounts"),
                    body: Some(
                        serde_json::to_value(r).map_err(|e| ApiError::Decode(e.to_string()))?,
                    ),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let boundary = batch::random_boundary(&mut rand::rng());
        let body = batch::encode(&boundary, &parts);
        debug!(project, items = parts.len(), "submitting batch");

        let res = self
            .authorized(self.http.post(self.url("/batch")?))
            .header(CONTENT_TYPE, batch::content_type(&boundary))
            .body(body)
            .send()?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().unwrap_or_default();
            return Err(ApiError::from_response(status.as_u16(), &body));
        }

        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let boundary = batch::boundary_from_content_type(&content_type)
            .ok_or_else(|| ApiError::Batch(format!("no boundary in {content_type:?}")))?;
        let text = res.text()?;

        for item in batch::decode(&text, &boundary, parts.len())? {
            collector.record(item.index, item.result);
        }
        Ok(())
    }

    fn list_keys(&self, account_name: &str) -> Result<Vec<ServiceAccountKey>, ApiError> {
        let mut url = self.url(&format!("/v1/{account_name}/keys"))?;
        url.query_pairs_mut().append_pair("keyTypes", "USER_MANAGED");
        let resp: ListKeysResponse = self.send_json(self.http.get(url))?;
        Ok(resp.keys)
    }

    fn create_key(
        &self,
        account_name: &str,
        request: &CreateKeyRequest,
    ) -> Result<ServiceAccountKey, ApiError> {
        let url = self.url(&format!("/v1/{account_name}/keys"))?;
        self.send_json(self.http.post(url).json(request))
    }
}
