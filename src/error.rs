use thiserror::Error;

#[derive(Debug, Error)]
pub enum HydraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("os rng error: {message}")]
    OsRng { message: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("invalid response: {message}")]
    InvalidResponse { message: String, body: String },

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("session error: {message}")]
    Session { message: String },

    #[error("no authenticated user in session")]
    NotAuthenticated,

    #[error("no {provider} token found for user {user_id}")]
    TokenNotFound { provider: String, user_id: String },

    #[error("stored {provider} token has no refresh token")]
    RefreshUnavailable { provider: String },

    #[error("{count} {provider} tokens found for user {user_id}, expected one")]
    MultipleTokens {
        provider: String,
        user_id: String,
        count: usize,
    },
}

impl HydraError {
    pub(crate) fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }
}

/// Failures reported by a [`TokenStore`](crate::TokenStore) backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}
