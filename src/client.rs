use reqwest::{Client, Response};
use url::Url;

use crate::pkce::{STATE_BYTES, random_token};
use crate::types::unix_now;
use crate::{
    AuthorizationRequest, HydraConfig, HydraEndpoints, HydraError, LoginMode, PkcePair,
    TokenPayload, TokenResponse, UserInfo,
};

/// Talks to Hydra's public OAuth2 endpoints on behalf of one client registration.
#[derive(Debug, Clone)]
pub struct HydraClient {
    config: HydraConfig,
    endpoints: HydraEndpoints,
    http: Client,
}

impl HydraClient {
    pub fn new(config: HydraConfig) -> Result<Self, HydraError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if config.accept_invalid_certs {
            tracing::warn!("TLS certificate verification disabled for provider calls");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build()?;
        Self::with_http_client(config, http)
    }

    pub fn with_http_client(config: HydraConfig, http: Client) -> Result<Self, HydraError> {
        config.validate()?;
        let endpoints = config.endpoints()?;
        Ok(Self {
            config,
            endpoints,
            http,
        })
    }

    pub fn config(&self) -> &HydraConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &HydraEndpoints {
        &self.endpoints
    }

    pub fn authorization_request(
        &self,
        mode: LoginMode,
    ) -> Result<AuthorizationRequest, HydraError> {
        let state = random_token(STATE_BYTES)?;
        let pkce = if self.config.use_pkce {
            Some(PkcePair::generate()?)
        } else {
            None
        };
        let redirect_uri = self.config.redirect_uri()?;

        let mut url = self.endpoints.authorization_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("response_type", "code");
            pairs.append_pair("client_id", &self.config.client_id);
            pairs.append_pair("redirect_uri", redirect_uri.as_str());
            if !self.config.scopes.is_empty() {
                pairs.append_pair("scope", &self.config.scopes.join(" "));
            }
            pairs.append_pair("state", &state);
            if let Some(audience) = &self.config.audience {
                pairs.append_pair("audience", audience);
            }
            pairs.append_pair("mode", mode.as_str());
            if let Some(pkce) = &pkce {
                pairs.append_pair("code_challenge", &pkce.code_challenge);
                pairs.append_pair("code_challenge_method", "S256");
            }
        }

        Ok(AuthorizationRequest {
            url,
            state,
            code_verifier: pkce.map(|pkce| pkce.code_verifier),
        })
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenPayload, HydraError> {
        let redirect_uri = self.config.redirect_uri()?;
        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), redirect_uri.to_string()),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier".to_string(), verifier.to_string()));
        }

        self.send_token_request(form).await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPayload, HydraError> {
        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
        ];
        if !self.config.scopes.is_empty() {
            form.push(("scope".to_string(), self.config.scopes.join(" ")));
        }

        self.send_token_request(form).await
    }

    async fn send_token_request(
        &self,
        mut form: Vec<(String, String)>,
    ) -> Result<TokenPayload, HydraError> {
        let mut builder = self.http.post(self.endpoints.token_url.clone());
        match &self.config.client_secret {
            Some(secret) => {
                builder = builder.basic_auth(&self.config.client_id, Some(secret));
            }
            None => form.push(("client_id".to_string(), self.config.client_id.clone())),
        }

        let response = builder
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;
        let body = success_body(response).await?;

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|err| HydraError::InvalidResponse {
                message: err.to_string(),
                body,
            })?;

        Ok(token.into_payload(unix_now()))
    }

    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<UserInfo, HydraError> {
        let response = self
            .http
            .get(self.endpoints.userinfo_url.clone())
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let body = success_body(response).await?;

        serde_json::from_str(&body).map_err(|err| HydraError::InvalidResponse {
            message: err.to_string(),
            body,
        })
    }

    /// End-session URL Hydra expects for RP-initiated logout.
    pub fn logout_url(
        &self,
        id_token_hint: &str,
        post_logout_redirect_uri: &Url,
        state: &str,
    ) -> Url {
        let mut url = self.endpoints.logout_url.clone();
        url.query_pairs_mut()
            .append_pair("id_token_hint", id_token_hint)
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri.as_str())
            .append_pair("state", state);
        url
    }
}

async fn success_body(response: Response) -> Result<String, HydraError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(HydraError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}
