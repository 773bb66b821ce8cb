use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::State, http::HeaderMap, response::Html, routing::get};
use clap::{Parser, Subcommand};
use hydra_connect::{
    FlashCategory, HydraClient, HydraConfig, HydraError, HydraFlow, LocalUser, MemorySessionStore,
    MemoryStore, SessionStore, TokenStore, UserInfo, UserPolicy, routes, session_from_headers,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "hydra-connect",
    about = "Run a demo relying party that signs users in through ORY Hydra."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the login/logout routes with in-memory stores.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
        /// Open the login page in the default browser once listening.
        #[arg(long)]
        open: bool,
    },
}

#[derive(Debug, Clone)]
struct DemoUser {
    id: String,
    email: Option<String>,
    name: Option<String>,
}

impl LocalUser for DemoUser {
    fn id(&self) -> &str {
        &self.id
    }
}

fn reconcile_user(user: Option<DemoUser>, userinfo: &UserInfo) -> Option<DemoUser> {
    let mut user = user.unwrap_or_else(|| DemoUser {
        id: userinfo.sub.clone(),
        email: None,
        name: None,
    });
    user.email = userinfo.email().map(str::to_string);
    user.name = userinfo.name().map(str::to_string);
    Some(user)
}

type DemoFlow = HydraFlow<MemoryStore<DemoUser>>;

#[derive(Clone)]
struct HomeState {
    flow: Arc<DemoFlow>,
    sessions: Arc<dyn SessionStore>,
}

#[tokio::main]
async fn main() -> Result<(), HydraError> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hydra_connect=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { bind, open } => serve(bind, open).await,
    }
}

async fn serve(bind: SocketAddr, open: bool) -> Result<(), HydraError> {
    let config = HydraConfig::from_env()?;
    let login_url = config.external_url(&config.routes.login)?;

    let client = HydraClient::new(config)?;
    let store = Arc::new(MemoryStore::<DemoUser>::new());
    let flow = Arc::new(
        HydraFlow::new(client, store).with_policy(UserPolicy::create_or_update(reconcile_user)),
    );
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());

    let home_state = HomeState {
        flow: Arc::clone(&flow),
        sessions: Arc::clone(&sessions),
    };
    let app = Router::new()
        .route("/", get(home))
        .with_state(home_state)
        .merge(routes(flow, sessions));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    tracing::info!("sign in at {login_url}");

    if open {
        if let Err(err) = webbrowser::open(login_url.as_str()) {
            tracing::warn!("failed to open browser automatically: {err}");
        }
    }

    axum::serve(listener, app).await?;
    Ok(())
}

const PAGE_HEAD: &str = "<!doctype html>\n<html><head><meta charset=\"utf-8\" />\
    <title>hydra-connect</title></head><body>\n";

async fn home(
    State(state): State<HomeState>,
    headers: HeaderMap,
) -> Result<Html<String>, HydraError> {
    let routes = &state.flow.config().routes;
    let mut body = String::from(PAGE_HEAD);

    let session = session_from_headers(Arc::clone(&state.sessions), &headers);
    let user_id = match &session {
        Some(session) => session.current_user_id()?,
        None => None,
    };

    if let Some(session) = &session {
        for flash in session.take_flashes()? {
            let class = match flash.category {
                FlashCategory::Info => "info",
                FlashCategory::Error => "error",
            };
            body.push_str(&format!(
                "<p class=\"{class}\">{}</p>\n",
                escape_html(&flash.message)
            ));
        }
    }

    match user_id.and_then(|id| state.flow.store().find_user(&id).transpose()) {
        Some(user) => {
            let user = user?;
            body.push_str(&format!(
                "<p>Signed in as <b>{}</b> ({})</p>\n<p><a href=\"{}\">Log out</a></p>\n",
                escape_html(user.name.as_deref().unwrap_or(&user.id)),
                escape_html(user.email.as_deref().unwrap_or("no email")),
                routes.mounted(&routes.logout),
            ));
        }
        None => {
            body.push_str(&format!(
                "<p><a href=\"{}\">Log in</a> or <a href=\"{}\">sign up</a></p>\n",
                routes.mounted(&routes.login),
                routes.mounted(&routes.signup),
            ));
        }
    }

    body.push_str("</body></html>\n");
    Ok(Html(body))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
