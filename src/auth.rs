use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::config::Credentials;

const IDENTITY_URL: &str = "https://login.microsoftonline.com";
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OAuth2 client-credentials grant against the Microsoft identity platform.
pub struct ClientCredentials {
    credentials: Credentials,
    client: reqwest::blocking::Client,
}

impl ClientCredentials {
    pub fn new(credentials: Credentials) -> Result<Self> {
        if credentials.tenant_id.is_empty() || credentials.client_id.is_empty() {
            return Err(anyhow!(
                "MS_TENANT_ID and MS_CLIENT_ID must be set to authenticate"
            ));
        }
        if credentials.client_secret.is_empty() {
            return Err(anyhow!(
                "MS_CLIENT_SECRET (or SHAREPOINT_CLIENT_SECRET) must be set to authenticate"
            ));
        }
        Ok(Self {
            credentials,
            client: reqwest::blocking::Client::new(),
        })
    }

    /// Request an access token for `scope`, e.g. [`GRAPH_SCOPE`] or `https://host/.default`.
    pub fn token(&self, scope: &str) -> Result<String> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            IDENTITY_URL, self.credentials.tenant_id
        );
        let response = self
            .client
            .post(&url)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", scope),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .context("Failed to reach the identity endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Token request for {} failed with status {}: {}",
                scope,
                status,
                error_text
            ));
        }

        let token: TokenResponse = response
            .json()
            .context("Failed to parse token response")?;
        tracing::debug!(scope, "acquired access token");
        Ok(token.access_token)
    }
}

/// `.default` scope for the host of a SharePoint site URL.
pub fn site_scope(site_url: &str) -> Result<String> {
    let url = reqwest::Url::parse(site_url)
        .with_context(|| format!("Invalid site URL: {}", site_url))?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("Site URL has no host: {}", site_url))?;
    Ok(format!("https://{}/.default", host))
}
