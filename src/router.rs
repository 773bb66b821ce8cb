use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect as HttpRedirect, Response},
    routing::get,
};
use cookie::{Cookie, SameSite};
use serde::Deserialize;

use crate::pkce::{STATE_BYTES, random_token};
use crate::{
    CallbackParams, HydraError, HydraFlow, Redirect, RequestContext, Session, SessionStore,
    TokenStore,
};

pub const SESSION_COOKIE: &str = "hydra_session";

struct FlowState<S: TokenStore> {
    flow: Arc<HydraFlow<S>>,
    sessions: Arc<dyn SessionStore>,
    secure_cookie: bool,
}

impl<S: TokenStore> Clone for FlowState<S> {
    fn clone(&self) -> Self {
        Self {
            flow: Arc::clone(&self.flow),
            sessions: Arc::clone(&self.sessions),
            secure_cookie: self.secure_cookie,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoggedOutParams {
    state: Option<String>,
}

/// Routes for the whole flow, registered at their mounted paths.
pub fn routes<S: TokenStore>(flow: Arc<HydraFlow<S>>, sessions: Arc<dyn SessionStore>) -> Router {
    let paths = flow.config().routes.clone();
    let secure_cookie = flow.config().app_url.scheme() == "https";
    let state = FlowState {
        flow,
        sessions,
        secure_cookie,
    };

    Router::new()
        .route(&paths.mounted(&paths.login), get(login_handler::<S>))
        .route(&paths.mounted(&paths.signup), get(signup_handler::<S>))
        .route(&paths.mounted(&paths.authorized), get(authorized_handler::<S>))
        .route(&paths.mounted(&paths.logout), get(logout_handler::<S>))
        .route(&paths.mounted(&paths.logged_out), get(logged_out_handler::<S>))
        .with_state(state)
}

/// The browser's existing session, if its cookie names one.
pub fn session_from_headers(
    sessions: Arc<dyn SessionStore>,
    headers: &HeaderMap,
) -> Option<Session> {
    session_cookie(headers).map(|id| Session::new(sessions, id))
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

/// A request's session together with the id the browser presented.
struct Opened {
    ctx: RequestContext,
    presented: Option<String>,
}

impl<S: TokenStore> FlowState<S> {
    /// Opens the caller's session, minting a new id when there is none.
    fn open(&self, headers: &HeaderMap) -> Result<Opened, HydraError> {
        let presented = session_cookie(headers);
        let id = match &presented {
            Some(id) => id.clone(),
            None => random_token(STATE_BYTES)?,
        };
        let session = Session::new(Arc::clone(&self.sessions), id);
        Ok(Opened {
            ctx: RequestContext::new(session),
            presented,
        })
    }

    fn cookie(&self, id: &str) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, id.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookie)
            .build()
    }

    /// Turns a flow result into the redirect, issuing a cookie whenever the
    /// session id differs from the one the browser sent.
    fn finish(&self, opened: Opened, result: Result<Redirect, HydraError>) -> Response {
        let Opened { mut ctx, presented } = opened;
        let redirect = match result.and_then(|redirect| {
            ctx.persist_messages()?;
            Ok(redirect)
        }) {
            Ok(redirect) => redirect,
            Err(err) => return err.into_response(),
        };

        let mut response = HttpRedirect::to(redirect.location()).into_response();
        let id = ctx.session().id();
        if presented.as_deref() != Some(id) {
            match HeaderValue::from_str(&self.cookie(id).to_string()) {
                Ok(value) => {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
                Err(err) => {
                    return HydraError::session(format!("invalid session cookie: {err}"))
                        .into_response();
                }
            }
        }
        response
    }
}

async fn login_handler<S: TokenStore>(
    State(state): State<FlowState<S>>,
    headers: HeaderMap,
) -> Response {
    let mut opened = match state.open(&headers) {
        Ok(opened) => opened,
        Err(err) => return err.into_response(),
    };
    let result = state.flow.login(&mut opened.ctx);
    state.finish(opened, result)
}

async fn signup_handler<S: TokenStore>(
    State(state): State<FlowState<S>>,
    headers: HeaderMap,
) -> Response {
    let mut opened = match state.open(&headers) {
        Ok(opened) => opened,
        Err(err) => return err.into_response(),
    };
    let result = state.flow.signup(&mut opened.ctx);
    state.finish(opened, result)
}

async fn authorized_handler<S: TokenStore>(
    State(state): State<FlowState<S>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let mut opened = match state.open(&headers) {
        Ok(opened) => opened,
        Err(err) => return err.into_response(),
    };
    let result = state.flow.callback(&mut opened.ctx, params).await;
    state.finish(opened, result)
}

async fn logout_handler<S: TokenStore>(
    State(state): State<FlowState<S>>,
    headers: HeaderMap,
) -> Response {
    let mut opened = match state.open(&headers) {
        Ok(opened) => opened,
        Err(err) => return err.into_response(),
    };
    let result = state.flow.logout(&mut opened.ctx);
    state.finish(opened, result)
}

async fn logged_out_handler<S: TokenStore>(
    State(state): State<FlowState<S>>,
    headers: HeaderMap,
    Query(params): Query<LoggedOutParams>,
) -> Response {
    let mut opened = match state.open(&headers) {
        Ok(opened) => opened,
        Err(err) => return err.into_response(),
    };
    let result = state.flow.logged_out(&mut opened.ctx, params.state.as_deref());
    state.finish(opened, result)
}

impl IntoResponse for HydraError {
    fn into_response(self) -> Response {
        match self {
            HydraError::NotAuthenticated => {
                (StatusCode::UNAUTHORIZED, "authentication required").into_response()
            }
            err => {
                tracing::error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}
