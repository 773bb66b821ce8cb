//! Persistence seam for local users and the provider tokens they own.

mod memory;

pub use memory::MemoryStore;

use crate::{HydraError, StoreError, TokenPayload};

/// A local account as far as the login flow is concerned: something with a
/// stable identity key. Everything else about the user is the application's.
pub trait LocalUser: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
}

/// The token a provider issued to one local user.
///
/// At most one record exists per (`provider`, `user_id`); `user_id` is the
/// provider subject and references the owning [`LocalUser`].
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    /// Assigned by the store on first insert.
    pub id: Option<u64>,
    pub provider: String,
    pub user_id: String,
    pub token: TokenPayload,
}

impl TokenRecord {
    pub fn new(
        provider: impl Into<String>,
        user_id: impl Into<String>,
        token: TokenPayload,
    ) -> Self {
        Self {
            id: None,
            provider: provider.into(),
            user_id: user_id.into(),
            token,
        }
    }
}

/// Writes staged inside [`TokenStore::transaction`].
pub trait StoreTransaction<U> {
    /// The record for the pair as the transaction currently sees it.
    fn find_token(
        &mut self,
        provider: &str,
        user_id: &str,
    ) -> Result<Option<TokenRecord>, StoreError>;

    /// Inserts or replaces the user with the same id.
    fn save_user(&mut self, user: U) -> Result<(), StoreError>;

    /// Inserts the record, or overwrites the token of the existing record for
    /// the same (`provider`, `user_id`). Returns the stored record.
    fn upsert_token(&mut self, record: TokenRecord) -> Result<TokenRecord, StoreError>;
}

pub trait TokenStore: Send + Sync + 'static {
    type User: LocalUser;

    fn find_user(&self, user_id: &str) -> Result<Option<Self::User>, StoreError>;

    fn find(&self, provider: &str, user_id: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Every record matching the pair. Backends that cannot enforce the
    /// uniqueness constraint may return more than one.
    fn find_all(&self, provider: &str, user_id: &str) -> Result<Vec<TokenRecord>, StoreError>;

    /// Runs `work` atomically: either all of its writes apply or none do.
    fn transaction<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn StoreTransaction<Self::User>) -> Result<T, StoreError>;

    /// Deletes the user together with all of its token records.
    fn delete_user(&self, user_id: &str) -> Result<bool, StoreError>;

    fn upsert(&self, record: TokenRecord) -> Result<TokenRecord, StoreError> {
        self.transaction(|tx| tx.upsert_token(record))
    }

    /// The single record for a signed-in user. Zero or several records mean
    /// the data is inconsistent and are reported as errors.
    fn find_by_user(&self, provider: &str, user_id: &str) -> Result<TokenRecord, HydraError> {
        let mut records = self.find_all(provider, user_id)?;
        match records.len() {
            1 => Ok(records.remove(0)),
            0 => Err(HydraError::TokenNotFound {
                provider: provider.to_string(),
                user_id: user_id.to_string(),
            }),
            count => Err(HydraError::MultipleTokens {
                provider: provider.to_string(),
                user_id: user_id.to_string(),
                count,
            }),
        }
    }
}
