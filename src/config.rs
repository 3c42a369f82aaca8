//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.
//! The result is immutable once loaded and shared behind an `Arc`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;

use crate::auth::scopes::ScopeSet;
use crate::auth::secure::SecureString;
use crate::profile::GroupSelection;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
    pub downstream_api: DownstreamApiConfig,
    pub profile: ProfileConfig,
    pub token: TokenConfig,
    pub key_vault: KeyVaultConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Externally visible base URL, used to build redirect URIs.
    pub public_base_url: String,
    pub session_idle_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Identity provider instance, e.g. `https://login.microsoftonline.com`.
    pub instance: String,
    pub client_id: String,
    pub tenant: String,
    #[serde(default)]
    pub client_secret: SecureString,
    pub callback_path: String,
    pub signed_out_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownstreamApiConfig {
    pub base_url: String,
    /// Space-delimited scope string, parsed once here.
    pub scopes: ScopeSet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    pub group_name_prefix: String,
    pub group_selection: GroupSelection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub refresh_before_expiry_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyVaultConfig {
    #[serde(default)]
    pub uri: String,
    pub client_secret_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_toml(CONFIG_TOML)?;

        if let Ok(client_id) = env::var("AZURE_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }

        if let Ok(tenant) = env::var("AZURE_TENANT_ID") {
            config.oauth.tenant = tenant;
        }

        if let Ok(secret) = env::var("AZURE_CLIENT_SECRET") {
            config.oauth.client_secret = SecureString::new(secret);
        }

        if let Ok(scopes) = env::var("DOWNSTREAM_API_SCOPES") {
            config.downstream_api.scopes = ScopeSet::parse(&scopes);
        }

        if let Ok(uri) = env::var("KEY_VAULT_URI") {
            config.key_vault.uri = uri;
        }

        if let Ok(bind_address) = env::var("BIND_ADDRESS") {
            config.server.bind_address = bind_address;
        }

        if let Ok(base_url) = env::var("PUBLIC_BASE_URL") {
            config.server.public_base_url = base_url;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration document without applying overrides.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }

    /// Validate that required configuration is present.
    fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() || self.oauth.client_id == "YOUR_AZURE_AD_CLIENT_ID" {
            anyhow::bail!(
                "Azure AD client_id not configured. Set AZURE_CLIENT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.oauth.tenant.is_empty() || self.oauth.tenant == "YOUR_TENANT_ID" {
            anyhow::bail!(
                "Azure AD tenant not configured. Set AZURE_TENANT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.downstream_api.scopes.is_empty() {
            anyhow::bail!(
                "No downstream API scopes configured. Set DOWNSTREAM_API_SCOPES \
                 or update config.toml"
            );
        }

        self.bind_address()?;

        Ok(())
    }

    /// Fail when no client secret could be resolved from config, env or Key Vault.
    pub fn ensure_client_secret(&self) -> Result<()> {
        if self.oauth.client_secret.is_empty() {
            anyhow::bail!(
                "No client secret available. Set AZURE_CLIENT_SECRET or configure KEY_VAULT_URI"
            );
        }
        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        self.server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind_address))
    }

    /// Authority URL for the configured tenant.
    pub fn authority(&self) -> String {
        format!(
            "{}/{}",
            self.oauth.instance.trim_end_matches('/'),
            self.oauth.tenant
        )
    }

    /// Get the authorization URL for Azure AD.
    pub fn auth_url(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority())
    }

    /// Get the token URL for Azure AD.
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority())
    }

    /// Get the end-session URL for Azure AD.
    pub fn logout_url(&self) -> String {
        format!("{}/oauth2/v2.0/logout", self.authority())
    }

    /// Redirect URI registered for the sign-in callback.
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}{}",
            self.server.public_base_url.trim_end_matches('/'),
            self.oauth.callback_path
        )
    }

    /// Where the identity provider sends the browser after sign-out.
    pub fn post_logout_redirect_uri(&self) -> String {
        format!(
            "{}{}",
            self.server.public_base_url.trim_end_matches('/'),
            self.oauth.signed_out_path
        )
    }
}

/// Configuration pointing every remote endpoint at `remote_base`, for tests
/// that stand up a mock server.
#[cfg(test)]
pub fn test_config(remote_base: &str) -> Config {
    let mut config = Config::from_toml(CONFIG_TOML).expect("embedded config parses");
    config.oauth.instance = remote_base.to_string();
    config.oauth.client_id = "test-client".into();
    config.oauth.tenant = "test-tenant".into();
    config.oauth.client_secret = SecureString::new("test-secret".into());
    config.downstream_api.base_url = format!("{}/v1.0", remote_base);
    config.server.public_base_url = "http://localhost:5000".into();
    config
}
