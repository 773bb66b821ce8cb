use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{LocalUser, StoreTransaction, TokenRecord, TokenStore};
use crate::StoreError;

/// In-process [`TokenStore`] with a unique (`provider`, `user_id`) index,
/// user foreign keys and cascading deletes.
///
/// Transactions run against a copy of the tables under the store lock and
/// replace the tables only when the work succeeds.
pub struct MemoryStore<U> {
    tables: Mutex<Tables<U>>,
}

#[derive(Clone)]
struct Tables<U> {
    users: HashMap<String, U>,
    tokens: BTreeMap<u64, TokenRecord>,
    index: HashMap<(String, String), u64>,
    next_id: u64,
}

impl<U> Default for Tables<U> {
    fn default() -> Self {
        Self {
            users: HashMap::new(),
            tokens: BTreeMap::new(),
            index: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<U: LocalUser> MemoryStore<U> {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn with_users<I>(users: I) -> Self
    where
        I: IntoIterator<Item = U>,
    {
        let mut tables = Tables::default();
        for user in users {
            tables.users.insert(user.id().to_string(), user);
        }
        Self {
            tables: Mutex::new(tables),
        }
    }

    pub fn user_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.users.len())
    }

    pub fn token_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.tokens.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables<U>>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl<U: LocalUser> Default for MemoryStore<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> Tables<U> {
    fn token(&self, provider: &str, user_id: &str) -> Option<&TokenRecord> {
        self.index
            .get(&(provider.to_string(), user_id.to_string()))
            .and_then(|id| self.tokens.get(id))
    }
}

impl<U: LocalUser> StoreTransaction<U> for Tables<U> {
    fn find_token(
        &mut self,
        provider: &str,
        user_id: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.token(provider, user_id).cloned())
    }

    fn save_user(&mut self, user: U) -> Result<(), StoreError> {
        self.users.insert(user.id().to_string(), user);
        Ok(())
    }

    fn upsert_token(&mut self, mut record: TokenRecord) -> Result<TokenRecord, StoreError> {
        if !self.users.contains_key(&record.user_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "token references unknown user {}",
                record.user_id
            )));
        }

        let key = (record.provider.clone(), record.user_id.clone());
        let id = match (self.index.get(&key).copied(), record.id) {
            (Some(existing), Some(id)) if existing != id => {
                return Err(StoreError::UniqueViolation(format!(
                    "({}, {}) already stored as record {existing}",
                    record.provider, record.user_id
                )));
            }
            (Some(existing), _) => existing,
            (None, Some(id)) => {
                if let Some(previous) = self.tokens.get(&id) {
                    self.index
                        .remove(&(previous.provider.clone(), previous.user_id.clone()));
                }
                id
            }
            (None, None) => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };

        record.id = Some(id);
        self.index.insert(key, id);
        self.tokens.insert(id, record.clone());
        Ok(record)
    }
}

impl<U: LocalUser> TokenStore for MemoryStore<U> {
    type User = U;

    fn find_user(&self, user_id: &str) -> Result<Option<U>, StoreError> {
        Ok(self.lock()?.users.get(user_id).cloned())
    }

    fn find(&self, provider: &str, user_id: &str) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.lock()?.token(provider, user_id).cloned())
    }

    fn find_all(&self, provider: &str, user_id: &str) -> Result<Vec<TokenRecord>, StoreError> {
        Ok(self.find(provider, user_id)?.into_iter().collect())
    }

    fn transaction<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn StoreTransaction<U>) -> Result<T, StoreError>,
    {
        let mut tables = self.lock()?;
        let mut staged = tables.clone();
        let result = work(&mut staged)?;
        *tables = staged;
        Ok(result)
    }

    fn delete_user(&self, user_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        if tables.users.remove(user_id).is_none() {
            return Ok(false);
        }

        let owned: Vec<u64> = tables
            .tokens
            .iter()
            .filter(|(_, record)| record.user_id == user_id)
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            if let Some(record) = tables.tokens.remove(&id) {
                tables.index.remove(&(record.provider, record.user_id));
            }
        }
        Ok(true)
    }
}
