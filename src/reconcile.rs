use std::fmt;
use std::sync::Arc;

use crate::{HydraError, LocalUser, TokenStore, UserInfo};

/// Builds a local user for a subject that has no account yet.
pub type CreateUserFn<U> = Arc<dyn Fn(&UserInfo) -> Option<U> + Send + Sync>;

/// Creates (when given `None`) or refreshes a local user from user-info.
pub type UpdateUserFn<U> = Arc<dyn Fn(Option<U>, &UserInfo) -> Option<U> + Send + Sync>;

/// How a provider subject is mapped onto a local user after login.
pub enum UserPolicy<U> {
    /// Existing users are used as-is; unknown subjects go through `create`.
    StrictLookup { create: Option<CreateUserFn<U>> },
    /// Every login runs `update` with the existing user, if any, and
    /// persists whatever it returns.
    CreateOrUpdate { update: Option<UpdateUserFn<U>> },
}

impl<U> UserPolicy<U> {
    pub fn strict() -> Self {
        UserPolicy::StrictLookup { create: None }
    }

    pub fn strict_with_creator<F>(create: F) -> Self
    where
        F: Fn(&UserInfo) -> Option<U> + Send + Sync + 'static,
    {
        UserPolicy::StrictLookup {
            create: Some(Arc::new(create)),
        }
    }

    pub fn create_or_update<F>(update: F) -> Self
    where
        F: Fn(Option<U>, &UserInfo) -> Option<U> + Send + Sync + 'static,
    {
        UserPolicy::CreateOrUpdate {
            update: Some(Arc::new(update)),
        }
    }
}

impl<U> Default for UserPolicy<U> {
    fn default() -> Self {
        Self::strict()
    }
}

impl<U> Clone for UserPolicy<U> {
    fn clone(&self) -> Self {
        match self {
            UserPolicy::StrictLookup { create } => UserPolicy::StrictLookup {
                create: create.clone(),
            },
            UserPolicy::CreateOrUpdate { update } => UserPolicy::CreateOrUpdate {
                update: update.clone(),
            },
        }
    }
}

impl<U> fmt::Debug for UserPolicy<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserPolicy::StrictLookup { create } => f
                .debug_struct("StrictLookup")
                .field("create", &create.is_some())
                .finish(),
            UserPolicy::CreateOrUpdate { update } => f
                .debug_struct("CreateOrUpdate")
                .field("update", &update.is_some())
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedUser<U> {
    pub user: U,
    /// Whether the user must be written along with the token.
    pub dirty: bool,
}

/// Looks up the local user for `userinfo.sub` and applies `policy`.
///
/// Returns `None` when no user exists and the policy produced none. Nothing
/// is written here; the caller persists a dirty user.
pub fn resolve_local_user<S: TokenStore>(
    store: &S,
    policy: &UserPolicy<S::User>,
    userinfo: &UserInfo,
) -> Result<Option<ResolvedUser<S::User>>, HydraError> {
    let existing = store.find_user(&userinfo.sub)?;

    let resolved = match policy {
        UserPolicy::StrictLookup { create } => match (existing, create) {
            (Some(user), _) => Some(ResolvedUser { user, dirty: false }),
            (None, Some(create)) => create(userinfo).map(|user| ResolvedUser { user, dirty: true }),
            (None, None) => None,
        },
        UserPolicy::CreateOrUpdate { update: Some(update) } => {
            update(existing, userinfo).map(|user| ResolvedUser { user, dirty: true })
        }
        UserPolicy::CreateOrUpdate { update: None } => {
            existing.map(|user| ResolvedUser { user, dirty: false })
        }
    };

    if let Some(resolved) = &resolved {
        if resolved.user.id() != userinfo.sub {
            tracing::warn!(
                sub = %userinfo.sub,
                user_id = resolved.user.id(),
                "resolved user id differs from subject"
            );
        }
    }

    Ok(resolved)
}
