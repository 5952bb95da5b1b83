use serde::{Deserialize, Serialize};

// Wire types for the IAM v1 API and the OAuth token endpoint.

/// A service account as returned by `projects.serviceAccounts.list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccount {
    /// Resource name: `projects/{project}/serviceAccounts/{email}`.
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "displayName")]
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "projectId")]
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(rename = "uniqueId")]
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl ServiceAccount {
    /// The part of the email before `@`, used as the key file stem.
    pub fn local_part(&self) -> &str {
        self.email.split('@').next().unwrap_or(&self.email)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ListServiceAccountsResponse {
    #[serde(default)]
    pub accounts: Vec<ServiceAccount>,
    #[serde(rename = "nextPageToken")]
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateServiceAccountRequest {
    #[serde(rename = "accountId")]
    pub account_id: String,
    #[serde(rename = "serviceAccount")]
    pub service_account: ServiceAccountSpec,
}

impl CreateServiceAccountRequest {
    /// A request whose display name equals the account id.
    pub fn named(account_id: impl Into<String>) -> Self {
        let account_id = account_id.into();
        Self {
            service_account: ServiceAccountSpec {
                display_name: account_id.clone(),
            },
            account_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccountSpec {
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "USER_MANAGED")]
    UserManaged,
    #[serde(rename = "SYSTEM_MANAGED")]
    SystemManaged,
    #[default]
    #[serde(rename = "KEY_TYPE_UNSPECIFIED")]
    #[serde(other)]
    Unspecified,
}

/// A service account key. `private_key_data` is only present in the response
/// to `keys.create`; later reads never return it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    /// `projects/{project}/serviceAccounts/{email}/keys/{key_id}`
    pub name: String,
    #[serde(rename = "keyType")]
    #[serde(default)]
    pub key_type: KeyType,
    #[serde(rename = "privateKeyType")]
    #[serde(default)]
    pub private_key_type: Option<String>,
    #[serde(rename = "privateKeyData")]
    #[serde(default)]
    pub private_key_data: Option<String>,
    #[serde(rename = "keyAlgorithm")]
    #[serde(default)]
    pub key_algorithm: Option<String>,
    #[serde(rename = "validAfterTime")]
    #[serde(default)]
    pub valid_after_time: Option<String>,
    #[serde(rename = "validBeforeTime")]
    #[serde(default)]
    pub valid_before_time: Option<String>,
}

impl ServiceAccountKey {
    pub fn is_user_managed(&self) -> bool {
        self.key_type == KeyType::UserManaged
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ListKeysResponse {
    #[serde(default)]
    pub keys: Vec<ServiceAccountKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateKeyRequest {
    #[serde(rename = "privateKeyType")]
    pub private_key_type: String,
    #[serde(rename = "keyAlgorithm")]
    pub key_algorithm: String,
}

impl Default for CreateKeyRequest {
    /// An RSA-2048 key delivered as a Google credentials JSON file.
    fn default() -> Self {
        Self {
            private_key_type: "TYPE_GOOGLE_CREDENTIALS_FILE".to_string(),
            key_algorithm: "KEY_ALG_RSA_2048".to_string(),
        }
    }
}

/// The decoded `privateKeyData` of a `TYPE_GOOGLE_CREDENTIALS_FILE` key.
#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialsFile {
    #[serde(rename = "type")]
    pub account_type: String,
    pub project_id: String,
    pub private_key_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub auth_uri: String,
    pub token_uri: String,
}

/// Response of the OAuth2 token endpoint for both the
/// `authorization_code` and `refresh_token` grants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}
