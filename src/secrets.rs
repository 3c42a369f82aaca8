//! Azure Key Vault secret retrieval.
//!
//! Used once at startup to resolve the OAuth client secret. The vault token
//! comes from whichever ambient credential the environment provides.

use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::{debug, info};

use crate::auth::secure::SecureString;
use crate::error::SecretError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const KEY_VAULT_API_VERSION: &str = "7.4";
const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";
const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Credential picked up from the process environment.
#[derive(Debug, Clone)]
pub enum AmbientCredential {
    /// Service principal from `AZURE_CLIENT_ID`, `AZURE_TENANT_ID` and `AZURE_CLIENT_SECRET`.
    ClientSecret {
        authority_host: String,
        tenant_id: String,
        client_id: String,
        client_secret: SecureString,
    },
    /// App Service managed identity (`IDENTITY_ENDPOINT` + `IDENTITY_HEADER`).
    AppService {
        endpoint: String,
        header: SecureString,
    },
    /// VM / container managed identity via the instance metadata service.
    Imds { endpoint: String },
}

impl AmbientCredential {
    pub fn from_env() -> Self {
        Self::resolve(|key| env::var(key).ok().filter(|v| !v.is_empty()))
    }

    fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let (Some(client_id), Some(tenant_id), Some(secret)) = (
            lookup("AZURE_CLIENT_ID"),
            lookup("AZURE_TENANT_ID"),
            lookup("AZURE_CLIENT_SECRET"),
        ) {
            return Self::ClientSecret {
                authority_host: lookup("AZURE_AUTHORITY_HOST")
                    .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
                tenant_id,
                client_id,
                client_secret: SecureString::new(secret),
            };
        }

        if let (Some(endpoint), Some(header)) =
            (lookup("IDENTITY_ENDPOINT"), lookup("IDENTITY_HEADER"))
        {
            return Self::AppService {
                endpoint,
                header: SecureString::new(header),
            };
        }

        Self::Imds {
            endpoint: IMDS_TOKEN_ENDPOINT.to_string(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::ClientSecret { .. } => "client secret",
            Self::AppService { .. } => "App Service managed identity",
            Self::Imds { .. } => "IMDS managed identity",
        }
    }

    /// Get a Key Vault access token.
    async fn token(&self, http: &reqwest::Client) -> Result<SecureString, SecretError> {
        let request = match self {
            Self::ClientSecret {
                authority_host,
                tenant_id,
                client_id,
                client_secret,
            } => {
                let url = format!(
                    "{}/{}/oauth2/v2.0/token",
                    authority_host.trim_end_matches('/'),
                    tenant_id
                );
                http.post(url).form(&[
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("scope", KEY_VAULT_SCOPE),
                ])
            }
            Self::AppService { endpoint, header } => http
                .get(endpoint)
                .header("X-IDENTITY-HEADER", header.as_str())
                .query(&[("resource", KEY_VAULT_RESOURCE), ("api-version", "2019-08-01")]),
            Self::Imds { endpoint } => http
                .get(endpoint)
                .header("Metadata", "true")
                .query(&[("resource", KEY_VAULT_RESOURCE), ("api-version", "2018-02-01")]),
        };

        let response = request
            .send()
            .await
            .map_err(|e| SecretError::CredentialFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!("Credential endpoint error body: {}", body);
            return Err(SecretError::CredentialFailed(format!(
                "{} returned HTTP {}",
                self.kind(),
                status.as_u16()
            )));
        }

        let token: CredentialToken = response
            .json()
            .await
            .map_err(|e| SecretError::CredentialFailed(e.to_string()))?;
        Ok(token.access_token)
    }
}

#[derive(Deserialize)]
struct CredentialToken {
    access_token: SecureString,
}

#[derive(Deserialize)]
struct SecretBundle {
    value: Option<SecureString>,
}

/// Reads secrets from one vault.
pub struct KeyVaultClient {
    http_client: reqwest::Client,
    vault_uri: String,
    credential: AmbientCredential,
}

impl KeyVaultClient {
    pub fn new(vault_uri: &str, credential: AmbientCredential) -> Result<Self, SecretError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SecretError::RequestFailed(e.to_string()))?;

        Ok(Self {
            http_client,
            vault_uri: vault_uri.trim_end_matches('/').to_string(),
            credential,
        })
    }

    /// Fetch the current version of secret `name`.
    pub async fn get_secret(&self, name: &str) -> Result<SecureString, SecretError> {
        info!(
            "Reading secret '{}' from Key Vault using {}",
            name,
            self.credential.kind()
        );
        let token = self.credential.token(&self.http_client).await?;

        let url = format!(
            "{}/secrets/{}",
            self.vault_uri,
            urlencoding::encode(name)
        );
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token.as_str())
            .query(&[("api-version", KEY_VAULT_API_VERSION)])
            .send()
            .await
            .map_err(|e| SecretError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SecretError::NotFound(name.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("Key Vault error body: {}", body);
            return Err(SecretError::RequestFailed(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|e| SecretError::InvalidResponse(e.to_string()))?;

        bundle
            .value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SecretError::InvalidResponse(format!("secret '{}' has no value", name)))
    }
}
