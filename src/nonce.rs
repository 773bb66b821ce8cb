use serde::{Deserialize, Serialize};

use crate::pkce::{STATE_BYTES, random_token};
use crate::{AuthorizationRequest, HydraError, Session};

/// Single-use anti-replay values tied to one provider within one session.
pub struct StateNonces<'a> {
    session: &'a Session,
    key: String,
}

impl<'a> StateNonces<'a> {
    /// Nonces guarding the end-session round trip for `provider`.
    pub fn logout(session: &'a Session, provider: &str) -> Self {
        Self {
            session,
            key: format!("{provider}_logout_state"),
        }
    }

    pub fn generate() -> Result<String, HydraError> {
        random_token(STATE_BYTES)
    }

    pub fn store(&self, nonce: &str) -> Result<(), HydraError> {
        self.session.set(&self.key, nonce)
    }

    /// Erases any stored nonce and reports whether it equals `presented`.
    pub fn consume_if_match(&self, presented: Option<&str>) -> Result<bool, HydraError> {
        let stored = self.session.take(&self.key)?;
        Ok(match (stored, presented) {
            (Some(stored), Some(presented)) => stored == presented,
            _ => false,
        })
    }
}

/// What the authorization leg remembers between the redirect to Hydra and
/// the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
}

impl AuthorizationState {
    fn key(provider: &str) -> String {
        format!("{provider}_oauth_state")
    }

    pub fn stash(
        session: &Session,
        provider: &str,
        request: &AuthorizationRequest,
    ) -> Result<(), HydraError> {
        let value = Self {
            state: request.state.clone(),
            code_verifier: request.code_verifier.clone(),
        };
        session.set_json(&Self::key(provider), &value)
    }

    /// Removes the stashed value; returns it only if `returned` matches.
    pub fn take_matching(
        session: &Session,
        provider: &str,
        returned: Option<&str>,
    ) -> Result<Option<Self>, HydraError> {
        let stashed: Option<Self> = session.take_json(&Self::key(provider))?;
        Ok(stashed.filter(|stashed| Some(stashed.state.as_str()) == returned))
    }
}
