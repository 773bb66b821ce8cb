use url::Url;

use crate::HydraError;

const AUTHORIZE_PATH: &str = "/oauth2/auth";
const TOKEN_PATH: &str = "/oauth2/token";
const USERINFO_PATH: &str = "/userinfo";
const LOGOUT_PATH: &str = "/oauth2/sessions/logout";

/// Hydra public endpoints, all relative to the public base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydraEndpoints {
    pub authorization_url: Url,
    pub token_url: Url,
    pub userinfo_url: Url,
    pub logout_url: Url,
}

impl HydraEndpoints {
    pub fn from_public_url(public_url: &Url) -> Result<Self, HydraError> {
        let base = public_url.as_str().trim_end_matches('/');
        Ok(Self {
            authorization_url: Url::parse(&format!("{base}{AUTHORIZE_PATH}"))?,
            token_url: Url::parse(&format!("{base}{TOKEN_PATH}"))?,
            userinfo_url: Url::parse(&format!("{base}{USERINFO_PATH}"))?,
            logout_url: Url::parse(&format!("{base}{LOGOUT_PATH}"))?,
        })
    }
}
