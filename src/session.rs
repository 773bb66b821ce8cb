use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::HydraError;
use crate::pkce::{STATE_BYTES, random_token};

const USER_KEY: &str = "_user_id";
const FLASHES_KEY: &str = "_flashes";

/// Browser-session scoped key/value storage, keyed by session id.
///
/// Implementations must make `take` atomic: a value is returned to at most
/// one caller.
pub trait SessionStore: Send + Sync + 'static {
    fn get(&self, session_id: &str, key: &str) -> Result<Option<String>, HydraError>;
    fn set(&self, session_id: &str, key: &str, value: String) -> Result<(), HydraError>;
    fn take(&self, session_id: &str, key: &str) -> Result<Option<String>, HydraError>;
    fn clear(&self, session_id: &str) -> Result<(), HydraError>;

    /// Moves every value of session `from` to the unused id `to`. Nothing is
    /// left under `from`.
    fn rename(&self, from: &str, to: &str) -> Result<(), HydraError>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, HashMap<String, String>>>, HydraError> {
        self.sessions
            .lock()
            .map_err(|_| HydraError::session("session store lock poisoned"))
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, session_id: &str, key: &str) -> Result<Option<String>, HydraError> {
        let sessions = self.lock()?;
        Ok(sessions
            .get(session_id)
            .and_then(|values| values.get(key))
            .cloned())
    }

    fn set(&self, session_id: &str, key: &str, value: String) -> Result<(), HydraError> {
        self.lock()?
            .entry(session_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn take(&self, session_id: &str, key: &str) -> Result<Option<String>, HydraError> {
        let mut sessions = self.lock()?;
        Ok(sessions
            .get_mut(session_id)
            .and_then(|values| values.remove(key)))
    }

    fn clear(&self, session_id: &str) -> Result<(), HydraError> {
        self.lock()?.remove(session_id);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), HydraError> {
        let mut sessions = self.lock()?;
        if sessions.contains_key(to) {
            return Err(HydraError::session("session id already in use"));
        }
        if let Some(values) = sessions.remove(from) {
            sessions.insert(to.to_string(), values);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashCategory {
    Info,
    Error,
}

/// A user-facing message produced while handling a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub category: FlashCategory,
    pub message: String,
}

/// Handle on one browser session.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
    id: String,
}

impl Session {
    pub fn new(store: Arc<dyn SessionStore>, id: impl Into<String>) -> Self {
        Self {
            store,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, HydraError> {
        self.store.get(&self.id, key)
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<(), HydraError> {
        self.store.set(&self.id, key, value.into())
    }

    pub fn take(&self, key: &str) -> Result<Option<String>, HydraError> {
        self.store.take(&self.id, key)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, HydraError> {
        self.get(key)?.map(|raw| decode(key, &raw)).transpose()
    }

    pub fn take_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, HydraError> {
        self.take(key)?.map(|raw| decode(key, &raw)).transpose()
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), HydraError> {
        let raw = serde_json::to_string(value)
            .map_err(|err| HydraError::session(format!("cannot encode {key}: {err}")))?;
        self.set(key, raw)
    }

    /// Moves this session's values to a freshly minted id.
    pub fn regenerate(&mut self) -> Result<(), HydraError> {
        let id = random_token(STATE_BYTES)?;
        self.store.rename(&self.id, &id)?;
        self.id = id;
        Ok(())
    }

    /// Binds the session to a local user.
    pub fn login_user(&self, user_id: &str) -> Result<(), HydraError> {
        tracing::debug!(user_id, "binding session to user");
        self.set(USER_KEY, user_id)
    }

    pub fn logout_user(&self) -> Result<(), HydraError> {
        if let Some(user_id) = self.take(USER_KEY)? {
            tracing::debug!(user_id = %user_id, "unbinding session from user");
        }
        Ok(())
    }

    pub fn current_user_id(&self) -> Result<Option<String>, HydraError> {
        self.get(USER_KEY)
    }

    pub fn require_user_id(&self) -> Result<String, HydraError> {
        self.current_user_id()?.ok_or(HydraError::NotAuthenticated)
    }

    /// Appends messages to the ones waiting to be shown.
    pub fn push_flashes(&self, messages: &[FlashMessage]) -> Result<(), HydraError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut pending: Vec<FlashMessage> = self.get_json(FLASHES_KEY)?.unwrap_or_default();
        pending.extend_from_slice(messages);
        self.set_json(FLASHES_KEY, &pending)
    }

    pub fn take_flashes(&self) -> Result<Vec<FlashMessage>, HydraError> {
        Ok(self.take_json(FLASHES_KEY)?.unwrap_or_default())
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, HydraError> {
    serde_json::from_str(raw)
        .map_err(|err| HydraError::session(format!("cannot decode {key}: {err}")))
}

/// State threaded through each flow handler: the caller's session and the
/// messages the handler wants shown to the user.
pub struct RequestContext {
    session: Session,
    messages: Vec<FlashMessage>,
}

impl RequestContext {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            messages: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Issues the session a new id, e.g. before it is bound to a user.
    pub fn regenerate_session(&mut self) -> Result<(), HydraError> {
        self.session.regenerate()
    }

    pub fn flash(&mut self, category: FlashCategory, message: impl Into<String>) {
        self.messages.push(FlashMessage {
            category,
            message: message.into(),
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.flash(FlashCategory::Info, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.flash(FlashCategory::Error, message);
    }

    pub fn messages(&self) -> &[FlashMessage] {
        &self.messages
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|message| message.category == FlashCategory::Error)
    }

    /// Moves the collected messages into the session for the next page.
    pub fn persist_messages(&mut self) -> Result<(), HydraError> {
        let messages = std::mem::take(&mut self.messages);
        self.session.push_flashes(&messages)
    }
}
