use std::time::Duration;

use url::Url;

use crate::{HydraEndpoints, HydraError};

pub const DEFAULT_PROVIDER_NAME: &str = "hydra";
pub const DEFAULT_APP_URL: &str = "http://localhost:8000";
pub const DEFAULT_MOUNT_PATH: &str = "/hydra";
pub const DEFAULT_SCOPES: &[&str] = &["openid"];

/// Route paths of the flow, relative to `mount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePaths {
    pub mount: String,
    pub login: String,
    pub signup: String,
    pub authorized: String,
    pub logout: String,
    pub logged_out: String,
    /// Where the browser lands once a flow finishes, successful or not.
    pub home: String,
}

impl Default for RoutePaths {
    fn default() -> Self {
        Self {
            mount: DEFAULT_MOUNT_PATH.to_string(),
            login: "/login".to_string(),
            signup: "/signup".to_string(),
            authorized: "/authorized".to_string(),
            logout: "/logout".to_string(),
            logged_out: "/logged_out".to_string(),
            home: "/".to_string(),
        }
    }
}

impl RoutePaths {
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = normalize_mount(mount.into());
        self
    }

    pub fn with_home(mut self, home: impl Into<String>) -> Self {
        self.home = normalize_path(home.into());
        self
    }

    /// Absolute path of a route under the mount point.
    pub fn mounted(&self, route: &str) -> String {
        format!("{}{}", self.mount, route)
    }
}

#[derive(Debug, Clone)]
pub struct HydraConfig {
    /// Provider name; keys token records and session entries.
    pub name: String,
    pub public_url: Url,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    pub audience: Option<String>,
    /// External base URL of this application, used for callback URLs.
    pub app_url: Url,
    pub routes: RoutePaths,
    pub use_pkce: bool,
    pub timeout: Option<Duration>,
    pub accept_invalid_certs: bool,
}

impl HydraConfig {
    pub fn new(
        public_url: &str,
        client_id: impl Into<String>,
        app_url: &str,
    ) -> Result<Self, HydraError> {
        Ok(Self {
            name: DEFAULT_PROVIDER_NAME.to_string(),
            public_url: Url::parse(public_url)?,
            client_id: client_id.into(),
            client_secret: None,
            scopes: DEFAULT_SCOPES.iter().map(|scope| scope.to_string()).collect(),
            audience: None,
            app_url: Url::parse(app_url)?,
            routes: RoutePaths::default(),
            use_pkce: true,
            timeout: None,
            accept_invalid_certs: false,
        })
    }

    /// Loads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, HydraError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, HydraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let public_url = var("HYDRA_PUBLIC_URL").ok_or(HydraError::MissingEnv("HYDRA_PUBLIC_URL"))?;
        let client_id = var("OAUTH2_CLIENT_ID").ok_or(HydraError::MissingEnv("OAUTH2_CLIENT_ID"))?;
        let app_url = var("APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.to_string());

        let mut config = Self::new(&public_url, client_id, &app_url)?;
        if let Some(secret) = var("OAUTH2_CLIENT_SECRET") {
            config = config.with_client_secret(secret);
        }
        if let Some(scopes) = var("OAUTH2_SCOPES") {
            config = config.with_scopes(split_scopes(&scopes));
        }
        if let Some(audience) = var("OAUTH2_AUDIENCE") {
            config = config.with_audience(audience);
        }
        if let Some(name) = var("HYDRA_PROVIDER_NAME") {
            config = config.with_name(name);
        }
        if let Some(mount) = lookup("HYDRA_MOUNT_PATH") {
            config.routes = config.routes.with_mount(mount);
        }
        config.accept_invalid_certs = var("APP_ENV").as_deref() == Some("development");

        config.validate()?;
        Ok(config)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_routes(mut self, routes: RoutePaths) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_pkce(mut self, use_pkce: bool) -> Self {
        self.use_pkce = use_pkce;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept_invalid_certs: bool) -> Self {
        self.accept_invalid_certs = accept_invalid_certs;
        self
    }

    pub fn validate(&self) -> Result<(), HydraError> {
        if self.name.is_empty() {
            return Err(HydraError::Config {
                message: "provider name must not be empty".to_string(),
            });
        }
        if self.client_id.is_empty() {
            return Err(HydraError::Config {
                message: "client id must not be empty".to_string(),
            });
        }
        for url in [&self.public_url, &self.app_url] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(HydraError::Config {
                    message: format!("{url} must use http or https"),
                });
            }
        }
        Ok(())
    }

    pub fn endpoints(&self) -> Result<HydraEndpoints, HydraError> {
        HydraEndpoints::from_public_url(&self.public_url)
    }

    /// Absolute URL of one of this flow's routes, as seen by the browser.
    pub fn external_url(&self, route: &str) -> Result<Url, HydraError> {
        let mut url = self.app_url.clone();
        let path = format!(
            "{}{}",
            self.app_url.path().trim_end_matches('/'),
            self.routes.mounted(route)
        );
        url.set_path(&path);
        url.set_query(None);
        Ok(url)
    }

    pub fn redirect_uri(&self) -> Result<Url, HydraError> {
        self.external_url(&self.routes.authorized)
    }

    pub fn post_logout_redirect_uri(&self) -> Result<Url, HydraError> {
        self.external_url(&self.routes.logged_out)
    }
}

fn split_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|scope| !scope.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_path(path: String) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

fn normalize_mount(mount: String) -> String {
    let mount = mount.trim_end_matches('/');
    if mount.is_empty() {
        String::new()
    } else {
        normalize_path(mount.to_string())
    }
}
