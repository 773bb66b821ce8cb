use std::sync::Arc;

use crate::nonce::AuthorizationState;
use crate::reconcile::resolve_local_user;
use crate::{
    CallbackParams, HydraClient, HydraConfig, HydraError, LocalUser, LoginMode, RequestContext,
    StateNonces, TokenPayload, TokenRecord, TokenStore, UserPolicy,
};

pub const MSG_LOGIN_FAILED: &str = "Unable to log in.";
pub const MSG_USERINFO_FAILED: &str = "Unable to fetch user info.";
pub const MSG_USER_NOT_FOUND: &str = "User not found.";
pub const MSG_LOGGED_IN: &str = "Logged in.";
pub const MSG_LOGGED_OUT: &str = "Logged out.";

/// Where to send the browser next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    location: String,
}

impl Redirect {
    pub fn to(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

/// Tells the authorization leg whether it should still save the token
/// through its generic session storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistToken {
    /// The token was already written to the token store.
    Skip,
    Default,
}

/// Login and logout against one Hydra client registration.
pub struct HydraFlow<S: TokenStore> {
    client: HydraClient,
    store: Arc<S>,
    policy: UserPolicy<S::User>,
}

impl<S: TokenStore> HydraFlow<S> {
    pub fn new(client: HydraClient, store: Arc<S>) -> Self {
        Self {
            client,
            store,
            policy: UserPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: UserPolicy<S::User>) -> Self {
        self.policy = policy;
        self
    }

    pub fn provider(&self) -> &str {
        &self.client.config().name
    }

    pub fn config(&self) -> &HydraConfig {
        self.client.config()
    }

    pub fn client(&self) -> &HydraClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn home(&self) -> Redirect {
        Redirect::to(self.config().routes.home.clone())
    }

    pub fn login(&self, ctx: &mut RequestContext) -> Result<Redirect, HydraError> {
        self.begin(ctx, LoginMode::Login)
    }

    pub fn signup(&self, ctx: &mut RequestContext) -> Result<Redirect, HydraError> {
        self.begin(ctx, LoginMode::Signup)
    }

    fn begin(&self, ctx: &mut RequestContext, mode: LoginMode) -> Result<Redirect, HydraError> {
        let request = self.client.authorization_request(mode)?;
        AuthorizationState::stash(ctx.session(), self.provider(), &request)?;
        tracing::info!(provider = self.provider(), mode = mode.as_str(), "redirecting to hydra");
        Ok(Redirect::to(request.url.as_str()))
    }

    /// Handles Hydra's redirect back to `/authorized`.
    pub async fn callback(
        &self,
        ctx: &mut RequestContext,
        params: CallbackParams,
    ) -> Result<Redirect, HydraError> {
        if let Some(error) = params.error.as_deref() {
            self.error(ctx, Some(error), params.error_description.as_deref());
            return Ok(self.home());
        }

        let token = self.exchange(ctx, &params).await?;
        if self.authorized(ctx, token.clone()).await? == PersistToken::Default {
            if let Some(token) = token {
                let key = format!("{}_oauth_token", self.provider());
                ctx.session().set_json(&key, &token)?;
            }
        }
        Ok(self.home())
    }

    async fn exchange(
        &self,
        ctx: &RequestContext,
        params: &CallbackParams,
    ) -> Result<Option<TokenPayload>, HydraError> {
        let stashed = AuthorizationState::take_matching(
            ctx.session(),
            self.provider(),
            params.state.as_deref(),
        )?;
        let Some(stashed) = stashed else {
            tracing::warn!(provider = self.provider(), "authorization state missing or mismatched");
            return Ok(None);
        };
        let Some(code) = params.code.as_deref() else {
            tracing::warn!(provider = self.provider(), "callback carried no authorization code");
            return Ok(None);
        };

        match self
            .client
            .exchange_code(code, stashed.code_verifier.as_deref())
            .await
        {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                tracing::warn!(provider = self.provider(), error = %err, "token exchange failed");
                Ok(None)
            }
        }
    }

    /// Signs the user in locally once Hydra has issued a token.
    ///
    /// Recoverable failures are reported through `ctx` and leave the session
    /// and the store untouched.
    pub async fn authorized(
        &self,
        ctx: &mut RequestContext,
        token: Option<TokenPayload>,
    ) -> Result<PersistToken, HydraError> {
        let Some(token) = token else {
            ctx.error(MSG_LOGIN_FAILED);
            return Ok(PersistToken::Skip);
        };

        let userinfo = match self.client.fetch_userinfo(&token.access_token).await {
            Ok(userinfo) => userinfo,
            Err(err) => {
                tracing::warn!(provider = self.provider(), error = %err, "userinfo request failed");
                ctx.error(MSG_USERINFO_FAILED);
                return Ok(PersistToken::Skip);
            }
        };
        let user_id = userinfo.sub.clone();

        let resolved = resolve_local_user(self.store.as_ref(), &self.policy, &userinfo)?;
        let Some(resolved) = resolved else {
            tracing::info!(
                provider = self.provider(),
                user_id = %user_id,
                "no local user for subject"
            );
            ctx.error(MSG_USER_NOT_FOUND);
            return Ok(PersistToken::Skip);
        };

        let provider = self.provider();
        let record = self.store.transaction(|tx| {
            if resolved.dirty {
                tx.save_user(resolved.user.clone())?;
            }
            let record = match tx.find_token(provider, &user_id)? {
                Some(mut record) => {
                    record.token = token;
                    record
                }
                None => TokenRecord::new(provider, &user_id, token),
            };
            tx.upsert_token(record)
        })?;

        ctx.regenerate_session()?;
        ctx.session().login_user(&record.user_id)?;
        tracing::info!(
            provider,
            user_id = %record.user_id,
            local_user = resolved.user.id(),
            "logged in"
        );
        ctx.info(MSG_LOGGED_IN);

        Ok(PersistToken::Skip)
    }

    /// Reports an OAuth error Hydra sent instead of a code.
    pub fn error(
        &self,
        ctx: &mut RequestContext,
        error: Option<&str>,
        error_description: Option<&str>,
    ) {
        let error = error.unwrap_or_default();
        let error_description = error_description.unwrap_or_default();
        tracing::warn!(provider = self.provider(), error, error_description, "oauth error");
        ctx.error(format!(
            "OAuth error from {}: error={error}; error_description={error_description}",
            title_case(self.provider())
        ));
    }

    /// Starts RP-initiated logout for the signed-in user.
    pub fn logout(&self, ctx: &mut RequestContext) -> Result<Redirect, HydraError> {
        let user_id = ctx.session().require_user_id()?;
        let record = self.store.find_by_user(self.provider(), &user_id)?;

        let nonce = StateNonces::generate()?;
        StateNonces::logout(ctx.session(), self.provider()).store(&nonce)?;

        let post_logout_redirect_uri = self.config().post_logout_redirect_uri()?;
        let url = self.client.logout_url(
            record.token.id_token.as_deref().unwrap_or_default(),
            &post_logout_redirect_uri,
            &nonce,
        );
        tracing::info!(
            provider = self.provider(),
            user_id = %user_id,
            "redirecting to hydra logout"
        );
        Ok(Redirect::to(url.as_str()))
    }

    /// Hydra's redirect back after the end-session round trip.
    pub fn logged_out(
        &self,
        ctx: &mut RequestContext,
        state: Option<&str>,
    ) -> Result<Redirect, HydraError> {
        if StateNonces::logout(ctx.session(), self.provider()).consume_if_match(state)? {
            ctx.session().logout_user()?;
            tracing::info!(provider = self.provider(), "logged out");
            ctx.info(MSG_LOGGED_OUT);
        } else {
            tracing::debug!(
                provider = self.provider(),
                "ignoring logout callback with unknown state"
            );
        }
        Ok(self.home())
    }

    /// Access token stored for the signed-in user.
    pub fn get_access_token(&self, ctx: &RequestContext) -> Result<String, HydraError> {
        let user_id = ctx.session().require_user_id()?;
        let record = self.store.find_by_user(self.provider(), &user_id)?;
        Ok(record.token.access_token)
    }

    /// Exchanges the signed-in user's refresh token and stores the result.
    pub async fn refresh_access_token(
        &self,
        ctx: &RequestContext,
    ) -> Result<TokenPayload, HydraError> {
        let user_id = ctx.session().require_user_id()?;
        let mut record = self.store.find_by_user(self.provider(), &user_id)?;
        let refresh_token = record
            .token
            .refresh_token
            .clone()
            .ok_or_else(|| HydraError::RefreshUnavailable {
                provider: self.provider().to_string(),
            })?;

        let mut token = self.client.refresh_token(&refresh_token).await?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token);
        }
        if token.id_token.is_none() {
            token.id_token = record.token.id_token.take();
        }

        record.token = token;
        let record = self.store.upsert(record)?;
        tracing::debug!(provider = self.provider(), user_id = %user_id, "refreshed access token");
        Ok(record.token)
    }
}

fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for c in name.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use httpmock::prelude::*;
    use url::Url;

    use super::*;
    use crate::store::test_support::TestUser;
    use crate::{FlashCategory, MemorySessionStore, MemoryStore, Session, SessionStore, UserInfo};

    struct Harness {
        server: MockServer,
        flow: HydraFlow<MemoryStore<TestUser>>,
        sessions: Arc<MemorySessionStore>,
    }

    impl Harness {
        fn new(store: MemoryStore<TestUser>, policy: UserPolicy<TestUser>) -> Self {
            let server = MockServer::start();
            let config = HydraConfig::new(&server.base_url(), "webapp", "http://app.test")
                .unwrap()
                .with_client_secret("secret");
            let client = HydraClient::new(config).unwrap();
            let flow = HydraFlow::new(client, Arc::new(store)).with_policy(policy);
            Self {
                server,
                flow,
                sessions: Arc::new(MemorySessionStore::new()),
            }
        }

        fn ctx(&self, session_id: &str) -> RequestContext {
            let store: Arc<dyn SessionStore> = self.sessions.clone();
            RequestContext::new(Session::new(store, session_id))
        }

        fn userinfo(&self, access_token: &str, body: serde_json::Value) {
            let bearer = format!("Bearer {access_token}");
            self.server.mock(|when, then| {
                when.method(GET).path("/userinfo").header("authorization", bearer);
                then.status(200).json_body(body);
            });
        }

        async fn sign_in(&self, ctx: &mut RequestContext, token: TokenPayload) -> PersistToken {
            self.flow.authorized(ctx, Some(token)).await.unwrap()
        }
    }

    fn upserting_policy() -> UserPolicy<TestUser> {
        UserPolicy::create_or_update(|user: Option<TestUser>, info: &UserInfo| {
            let mut user = user.unwrap_or_else(|| TestUser::new(&info.sub));
            user.email = info.email().map(str::to_string);
            Some(user)
        })
    }

    fn messages(ctx: &RequestContext) -> Vec<&str> {
        ctx.messages().iter().map(|m| m.message.as_str()).collect()
    }

    fn query(location: &str) -> HashMap<String, String> {
        Url::parse(location)
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect()
    }

    #[tokio::test]
    async fn login_redirects_without_touching_user_state() {
        let harness = Harness::new(MemoryStore::new(), UserPolicy::strict());
        let mut ctx = harness.ctx("s1");

        let redirect = harness.flow.login(&mut ctx).unwrap();
        let pairs = query(redirect.location());

        assert!(redirect.location().contains("/oauth2/auth?"));
        assert_eq!(pairs.get("mode").map(String::as_str), Some("login"));
        assert_eq!(ctx.session().current_user_id().unwrap(), None);
        assert!(ctx.messages().is_empty());

        let redirect = harness.flow.signup(&mut ctx).unwrap();
        assert_eq!(
            query(redirect.location()).get("mode").map(String::as_str),
            Some("signup")
        );
    }

    #[tokio::test]
    async fn relogin_overwrites_single_token_record() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        harness.userinfo("first", serde_json::json!({ "sub": "u1", "email": "old@example.org" }));
        harness.userinfo("second", serde_json::json!({ "sub": "u1", "email": "new@example.org" }));

        let mut ctx = harness.ctx("s1");
        let signal = harness.sign_in(&mut ctx, TokenPayload::new("first")).await;
        assert_eq!(signal, PersistToken::Skip);
        assert_eq!(messages(&ctx), vec![MSG_LOGGED_IN]);

        let mut ctx = harness.ctx("s2");
        harness.sign_in(&mut ctx, TokenPayload::new("second")).await;

        let store = harness.flow.store();
        assert_eq!(store.token_count().unwrap(), 1);
        assert_eq!(store.user_count().unwrap(), 1);
        let record = store.find("hydra", "u1").unwrap().unwrap();
        assert_eq!(record.token.access_token, "second");
        let user = store.find_user("u1").unwrap().unwrap();
        assert_eq!(user.email.as_deref(), Some("new@example.org"));
        assert_eq!(ctx.session().current_user_id().unwrap().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn login_moves_session_to_fresh_id() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        harness.userinfo("access", serde_json::json!({ "sub": "victim" }));
        let mut ctx = harness.ctx("planted");
        ctx.session().set("theme", "dark").unwrap();

        harness.sign_in(&mut ctx, TokenPayload::new("access")).await;

        assert_ne!(ctx.session().id(), "planted");
        assert_eq!(ctx.session().current_user_id().unwrap().as_deref(), Some("victim"));
        assert_eq!(ctx.session().get("theme").unwrap().as_deref(), Some("dark"));
        let planted = harness.ctx("planted");
        assert_eq!(planted.session().current_user_id().unwrap(), None);
    }

    #[tokio::test]
    async fn failed_login_keeps_session_id() {
        let harness = Harness::new(MemoryStore::new(), UserPolicy::strict());
        let mut ctx = harness.ctx("s1");

        harness.flow.authorized(&mut ctx, None).await.unwrap();

        assert_eq!(ctx.session().id(), "s1");
    }

    #[tokio::test]
    async fn missing_token_aborts_login() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        let mut ctx = harness.ctx("s1");

        let signal = harness.flow.authorized(&mut ctx, None).await.unwrap();

        assert_eq!(signal, PersistToken::Skip);
        assert_eq!(messages(&ctx), vec![MSG_LOGIN_FAILED]);
        assert!(ctx.has_errors());
        assert_eq!(ctx.session().current_user_id().unwrap(), None);
        assert_eq!(harness.flow.store().token_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn userinfo_failure_aborts_login() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        harness.server.mock(|when, then| {
            when.method(GET).path("/userinfo");
            then.status(401).body("unauthorized");
        });
        let mut ctx = harness.ctx("s1");

        harness.sign_in(&mut ctx, TokenPayload::new("access")).await;

        assert_eq!(messages(&ctx), vec![MSG_USERINFO_FAILED]);
        assert_eq!(ctx.session().current_user_id().unwrap(), None);
        assert_eq!(harness.flow.store().token_count().unwrap(), 0);
        assert_eq!(harness.flow.store().user_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn userinfo_without_subject_aborts_login() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        harness.userinfo("access", serde_json::json!({ "email": "x@example.org" }));
        let mut ctx = harness.ctx("s1");

        harness.sign_in(&mut ctx, TokenPayload::new("access")).await;

        assert_eq!(messages(&ctx), vec![MSG_USERINFO_FAILED]);
        assert_eq!(harness.flow.store().token_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn strict_lookup_without_creator_rejects_unknown_subject() {
        let harness = Harness::new(MemoryStore::new(), UserPolicy::strict());
        harness.userinfo("access", serde_json::json!({ "sub": "stranger" }));
        let mut ctx = harness.ctx("s1");

        harness.sign_in(&mut ctx, TokenPayload::new("access")).await;

        assert_eq!(messages(&ctx), vec![MSG_USER_NOT_FOUND]);
        assert_eq!(ctx.session().current_user_id().unwrap(), None);
        assert_eq!(harness.flow.store().token_count().unwrap(), 0);
        assert_eq!(harness.flow.store().user_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn strict_lookup_creator_provisions_user_and_token() {
        let policy =
            UserPolicy::strict_with_creator(|info: &UserInfo| Some(TestUser::new(&info.sub)));
        let harness = Harness::new(MemoryStore::new(), policy);
        harness.userinfo("access", serde_json::json!({ "sub": "newcomer" }));
        let mut ctx = harness.ctx("s1");

        harness.sign_in(&mut ctx, TokenPayload::new("access")).await;

        assert_eq!(messages(&ctx), vec![MSG_LOGGED_IN]);
        let store = harness.flow.store();
        assert!(store.find_user("newcomer").unwrap().is_some());
        assert!(store.find("hydra", "newcomer").unwrap().is_some());
    }

    #[tokio::test]
    async fn strict_lookup_signs_in_existing_user() {
        let harness = Harness::new(
            MemoryStore::with_users([TestUser::new("u1")]),
            UserPolicy::strict(),
        );
        harness.userinfo("access", serde_json::json!({ "sub": "u1" }));
        let mut ctx = harness.ctx("s1");

        harness.sign_in(&mut ctx, TokenPayload::new("access")).await;

        assert_eq!(ctx.session().current_user_id().unwrap().as_deref(), Some("u1"));
        assert_eq!(harness.flow.get_access_token(&ctx).unwrap(), "access");
    }

    #[tokio::test]
    async fn reconciler_returning_foreign_user_commits_nothing() {
        let policy = UserPolicy::create_or_update(|_: Option<TestUser>, _: &UserInfo| {
            Some(TestUser::new("someone-else"))
        });
        let harness = Harness::new(MemoryStore::new(), policy);
        harness.userinfo("access", serde_json::json!({ "sub": "u1" }));
        let mut ctx = harness.ctx("s1");

        let result = harness.flow.authorized(&mut ctx, Some(TokenPayload::new("access"))).await;

        assert!(matches!(result, Err(HydraError::Store(_))));
        assert_eq!(harness.flow.store().user_count().unwrap(), 0);
        assert_eq!(harness.flow.store().token_count().unwrap(), 0);
        assert_eq!(ctx.session().current_user_id().unwrap(), None);
    }

    #[tokio::test]
    async fn provider_error_is_reported_without_raising() {
        let harness = Harness::new(MemoryStore::new(), UserPolicy::strict());
        let mut ctx = harness.ctx("s1");

        harness.flow.error(&mut ctx, Some("access_denied"), None);

        assert_eq!(ctx.messages().len(), 1);
        assert_eq!(ctx.messages()[0].category, FlashCategory::Error);
        assert_eq!(
            ctx.messages()[0].message,
            "OAuth error from Hydra: error=access_denied; error_description="
        );
        assert_eq!(ctx.session().current_user_id().unwrap(), None);
    }

    #[tokio::test]
    async fn callback_exchanges_code_and_signs_in() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        let token_mock = harness.server.mock(|when, then| {
            when.method(POST)
                .path("/oauth2/token")
                .body_contains("code=the-code");
            then.status(200).json_body(serde_json::json!({
                "access_token": "access",
                "id_token": "id-token",
                "token_type": "bearer",
            }));
        });
        harness.userinfo("access", serde_json::json!({ "sub": "u1" }));

        let mut ctx = harness.ctx("s1");
        let redirect = harness.flow.login(&mut ctx).unwrap();
        let state = query(redirect.location()).remove("state").unwrap();

        let params = CallbackParams {
            code: Some("the-code".to_string()),
            state: Some(state),
            ..CallbackParams::default()
        };
        let redirect = harness.flow.callback(&mut ctx, params).await.unwrap();

        token_mock.assert();
        assert_eq!(redirect.location(), "/");
        assert_eq!(messages(&ctx), vec![MSG_LOGGED_IN]);
        assert_eq!(ctx.session().current_user_id().unwrap().as_deref(), Some("u1"));
        assert_eq!(ctx.session().get("hydra_oauth_token").unwrap(), None);
    }

    #[tokio::test]
    async fn callback_with_forged_state_never_exchanges_code() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        let token_mock = harness.server.mock(|when, then| {
            when.method(POST).path("/oauth2/token");
            then.status(200).json_body(serde_json::json!({ "access_token": "access" }));
        });

        let mut ctx = harness.ctx("s1");
        harness.flow.login(&mut ctx).unwrap();
        let params = CallbackParams {
            code: Some("the-code".to_string()),
            state: Some("forged".to_string()),
            ..CallbackParams::default()
        };
        harness.flow.callback(&mut ctx, params).await.unwrap();

        token_mock.assert_hits(0);
        assert_eq!(messages(&ctx), vec![MSG_LOGIN_FAILED]);
        assert_eq!(ctx.session().current_user_id().unwrap(), None);
    }

    #[tokio::test]
    async fn logout_round_trip_consumes_nonce_once() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        harness.userinfo("access", serde_json::json!({ "sub": "u1" }));
        let mut ctx = harness.ctx("s1");
        harness
            .sign_in(&mut ctx, TokenPayload::new("access").with_id_token("id-token"))
            .await;

        let redirect = harness.flow.logout(&mut ctx).unwrap();
        let pairs = query(redirect.location());
        assert!(redirect.location().contains("/oauth2/sessions/logout?"));
        assert_eq!(pairs.get("id_token_hint").map(String::as_str), Some("id-token"));
        assert_eq!(
            pairs.get("post_logout_redirect_uri").map(String::as_str),
            Some("http://app.test/hydra/logged_out")
        );
        let nonce = pairs.get("state").unwrap().clone();
        let session_id = ctx.session().id().to_string();

        let mut ctx = harness.ctx(&session_id);
        let redirect = harness.flow.logged_out(&mut ctx, Some(&nonce)).unwrap();
        assert_eq!(redirect.location(), "/");
        assert_eq!(messages(&ctx), vec![MSG_LOGGED_OUT]);
        assert_eq!(ctx.session().current_user_id().unwrap(), None);

        ctx.session().login_user("u1").unwrap();
        let mut ctx = harness.ctx(&session_id);
        harness.flow.logged_out(&mut ctx, Some(&nonce)).unwrap();
        assert!(ctx.messages().is_empty());
        assert_eq!(ctx.session().current_user_id().unwrap().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn logged_out_with_wrong_state_keeps_session() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        harness.userinfo("access", serde_json::json!({ "sub": "u1" }));
        let mut ctx = harness.ctx("s1");
        harness.sign_in(&mut ctx, TokenPayload::new("access")).await;
        let redirect = harness.flow.logout(&mut ctx).unwrap();
        assert_eq!(
            query(redirect.location()).get("id_token_hint").map(String::as_str),
            Some("")
        );

        let mut ctx = harness.ctx(ctx.session().id());
        let redirect = harness.flow.logged_out(&mut ctx, Some("forged")).unwrap();

        assert_eq!(redirect.location(), "/");
        assert!(ctx.messages().is_empty());
        assert_eq!(ctx.session().current_user_id().unwrap().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn logout_requires_authenticated_session() {
        let harness = Harness::new(MemoryStore::new(), UserPolicy::strict());
        let mut ctx = harness.ctx("s1");
        assert!(matches!(
            harness.flow.logout(&mut ctx),
            Err(HydraError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn logout_without_token_record_is_an_error() {
        let harness = Harness::new(
            MemoryStore::with_users([TestUser::new("u1")]),
            UserPolicy::strict(),
        );
        let mut ctx = harness.ctx("s1");
        ctx.session().login_user("u1").unwrap();

        assert!(matches!(
            harness.flow.logout(&mut ctx),
            Err(HydraError::TokenNotFound { .. })
        ));
        assert!(matches!(
            harness.flow.get_access_token(&ctx),
            Err(HydraError::TokenNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn access_token_tracks_latest_login() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        harness.userinfo("first", serde_json::json!({ "sub": "u1" }));
        harness.userinfo("second", serde_json::json!({ "sub": "u1" }));
        let mut ctx = harness.ctx("s1");

        harness.sign_in(&mut ctx, TokenPayload::new("first")).await;
        assert_eq!(harness.flow.get_access_token(&ctx).unwrap(), "first");
        harness.sign_in(&mut ctx, TokenPayload::new("second")).await;
        assert_eq!(harness.flow.get_access_token(&ctx).unwrap(), "second");
    }

    #[tokio::test]
    async fn refresh_replaces_stored_token() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        harness.userinfo("access", serde_json::json!({ "sub": "u1" }));
        harness.server.mock(|when, then| {
            when.method(POST)
                .path("/oauth2/token")
                .body_contains("grant_type=refresh_token")
                .body_contains("refresh_token=refresh");
            then.status(200).json_body(serde_json::json!({ "access_token": "renewed" }));
        });
        let mut ctx = harness.ctx("s1");
        harness
            .sign_in(
                &mut ctx,
                TokenPayload::new("access")
                    .with_refresh_token("refresh")
                    .with_id_token("id-token"),
            )
            .await;

        let token = harness.flow.refresh_access_token(&ctx).await.unwrap();

        assert_eq!(token.access_token, "renewed");
        assert_eq!(token.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(token.id_token.as_deref(), Some("id-token"));
        assert_eq!(harness.flow.get_access_token(&ctx).unwrap(), "renewed");
        assert_eq!(harness.flow.store().token_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails() {
        let harness = Harness::new(MemoryStore::new(), upserting_policy());
        harness.userinfo("access", serde_json::json!({ "sub": "u1" }));
        let mut ctx = harness.ctx("s1");
        harness.sign_in(&mut ctx, TokenPayload::new("access")).await;

        assert!(matches!(
            harness.flow.refresh_access_token(&ctx).await,
            Err(HydraError::RefreshUnavailable { .. })
        ));
    }

    #[test]
    fn title_case_capitalizes_words() {
        assert_eq!(title_case("hydra"), "Hydra");
        assert_eq!(title_case("my_hydra provider"), "My_Hydra Provider");
    }
}
