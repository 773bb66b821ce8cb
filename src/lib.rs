//! Relying-party side of the OAuth 2.0 / OpenID Connect authorization-code
//! flow against ORY Hydra.
//!
//! [`HydraFlow`] drives login, signup, the authorization callback, and
//! RP-initiated logout. It provisions local users through a [`UserPolicy`],
//! persists tokens in a [`TokenStore`], and binds browser sessions held in a
//! [`SessionStore`]. The `router` feature mounts the flow on an axum router.

mod client;
mod config;
mod endpoints;
mod error;
mod flow;
mod nonce;
mod pkce;
mod reconcile;
#[cfg(feature = "router")]
mod router;
mod session;
mod store;
mod types;

pub use client::HydraClient;
pub use config::{DEFAULT_APP_URL, DEFAULT_PROVIDER_NAME, HydraConfig, RoutePaths};
pub use endpoints::HydraEndpoints;
pub use error::{HydraError, StoreError};
pub use flow::{
    HydraFlow, MSG_LOGGED_IN, MSG_LOGGED_OUT, MSG_LOGIN_FAILED, MSG_USER_NOT_FOUND,
    MSG_USERINFO_FAILED, PersistToken, Redirect,
};
pub use nonce::{AuthorizationState, StateNonces};
pub use pkce::PkcePair;
pub use reconcile::{CreateUserFn, ResolvedUser, UpdateUserFn, UserPolicy, resolve_local_user};
#[cfg(feature = "router")]
pub use router::{SESSION_COOKIE, routes, session_from_headers};
pub use session::{
    FlashCategory, FlashMessage, MemorySessionStore, RequestContext, Session, SessionStore,
};
pub use store::{LocalUser, MemoryStore, StoreTransaction, TokenRecord, TokenStore};
pub use types::{
    AuthorizationRequest, CallbackParams, LoginMode, TokenPayload, TokenResponse, UserInfo,
};
