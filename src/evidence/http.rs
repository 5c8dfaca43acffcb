//! reqwest-backed evidence collaborators.
//!
//! ## URL templates
//!
//! [`HttpEvidenceSource`] renders its URL from a template. `{address}` is
//! replaced with the normalized address and `{name}` with the request
//! parameter of that name; all substitutions are percent-encoded.
//!
//! ```text
//! https://registry.example/allow-list/{allowList}?address={address}
//! ```

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{AccessToken, EvidenceError, EvidenceRequest, EvidenceSource, OAuthClient, RawEvidence};

fn build_client(timeout: Duration) -> Result<Client, EvidenceError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EvidenceError::Transport(e.to_string()))
}

async fn read_json(response: reqwest::Response) -> Result<RawEvidence, EvidenceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EvidenceError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<RawEvidence>()
        .await
        .map_err(|e| EvidenceError::Malformed(e.to_string()))
}

/// Evidence source performing one JSON `GET` per lookup.
#[derive(Debug, Clone)]
pub struct HttpEvidenceSource {
    client: Client,
    url_template: String,
}

impl HttpEvidenceSource {
    /// Create a source for a URL template.
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self, EvidenceError> {
        Ok(Self {
            client: build_client(timeout)?,
            url_template: url_template.into(),
        })
    }

    /// Render the lookup URL for a request.
    pub fn render_url(&self, request: &EvidenceRequest) -> String {
        let mut url = self
            .url_template
            .replace("{address}", &urlencoding::encode(&request.address));
        for (name, value) in &request.params {
            url = url.replace(&format!("{{{}}}", name), &urlencoding::encode(value));
        }
        url
    }
}

#[async_trait]
impl EvidenceSource for HttpEvidenceSource {
    async fn fetch_evidence(&self, request: &EvidenceRequest) -> Result<RawEvidence, EvidenceError> {
        let url = self.render_url(request);
        debug!(provider = %request.provider, "fetching evidence");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EvidenceError::Transport(e.to_string()))?;

        read_json(response).await
    }
}

/// OAuth endpoints and client registration.
#[derive(Clone)]
pub struct OAuthEndpoints {
    /// Token endpoint (authorization code grant).
    pub token_url: String,
    /// User info endpoint (bearer token).
    pub userinfo_url: String,
    /// Registered client id.
    pub client_id: String,
    /// Registered client secret.
    pub client_secret: String,
    /// Redirect URI registered for the client.
    pub redirect_uri: String,
}

impl std::fmt::Debug for OAuthEndpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthEndpoints")
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl OAuthEndpoints {
    /// Google OAuth 2.0 endpoints.
    pub fn google(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
        }
    }
}

/// OAuth client speaking the authorization-code grant over HTTP.
#[derive(Debug, Clone)]
pub struct HttpOAuthClient {
    client: Client,
    endpoints: OAuthEndpoints,
}

impl HttpOAuthClient {
    /// Create a client.
    pub fn new(endpoints: OAuthEndpoints, timeout: Duration) -> Result<Self, EvidenceError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoints,
        })
    }
}

#[async_trait]
impl OAuthClient for HttpOAuthClient {
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, EvidenceError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.endpoints.client_id.as_str()),
            ("client_secret", self.endpoints.client_secret.as_str()),
            ("redirect_uri", self.endpoints.redirect_uri.as_str()),
        ];

        let response = self
            .client
            .post(&self.endpoints.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| EvidenceError::Transport(e.to_string()))?;

        let body = read_json(response).await?;
        body.get("access_token")
            .and_then(|v| v.as_str())
            .map(AccessToken::new)
            .ok_or_else(|| EvidenceError::Malformed("token response has no access_token".to_string()))
    }

    async fn fetch_profile(&self, token: &AccessToken) -> Result<RawEvidence, EvidenceError> {
        let response = self
            .client
            .get(&self.endpoints.userinfo_url)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| EvidenceError::Transport(e.to_string()))?;

        read_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_render_url_substitutes_and_encodes() {
        let source = HttpEvidenceSource::new(
            "https://registry.example/allow-list/{allowList}?address={address}",
            Duration::from_secs(5),
        )
        .unwrap();

        let mut params = BTreeMap::new();
        params.insert("allowList".to_string(), "test list".to_string());
        let request = EvidenceRequest::new("AllowList", "0xabc").with_params(params);

        assert_eq!(
            source.render_url(&request),
            "https://registry.example/allow-list/test%20list?address=0xabc"
        );
    }

    #[test]
    fn test_endpoints_debug_hides_secret() {
        let endpoints = OAuthEndpoints::google("id", "very-secret", "https://app/cb");
        assert!(!format!("{:?}", endpoints).contains("very-secret"));
    }
}
