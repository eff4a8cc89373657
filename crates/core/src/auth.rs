// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C3: session authenticator (spec.md §4.3). Verifies the bearer token and
//! session id on session open, resolving the user record through a
//! short-TTL cache before falling back to `UserRepo`.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ChatResult;
use crate::model::{Session, User};
use crate::ports::{AuthVerifier, Cache, UserRepo};

const USER_CACHE_TTL: Duration = Duration::from_secs(300);

pub struct SessionAuthenticator {
    verifier: Arc<dyn AuthVerifier>,
    users: Arc<dyn UserRepo>,
    cache: Arc<dyn Cache>,
}

impl SessionAuthenticator {
    pub fn new(verifier: Arc<dyn AuthVerifier>, users: Arc<dyn UserRepo>, cache: Arc<dyn Cache>) -> Self {
        Self { verifier, users, cache }
    }

    fn user_cache_key(user_id: &str) -> String {
        format!("user:{user_id}")
    }

    /// `Authenticate(token, sessionId) -> (User, Session) | TokenExpired |
    /// InvalidToken | InvalidSession | UserNotFound`.
    pub async fn authenticate(&self, token: &str, session_id: &str) -> ChatResult<(User, Session)> {
        let user_id = self.verifier.verify_token(token).await?;
        let session = self.verifier.validate_session(&user_id, session_id).await?;
        let user = self.resolve_user(&user_id).await?;
        Ok((user, session))
    }

    async fn resolve_user(&self, user_id: &str) -> ChatResult<User> {
        let key = Self::user_cache_key(user_id);
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(user) = serde_json::from_str::<User>(&cached) {
                return Ok(user);
            }
            // Undecodable cache payload: treat as a miss rather than branch
            // on shape (spec.md §9 "Dynamic cache payloads").
            self.cache.delete(&key).await;
        }

        let user = self.users.find_by_id(user_id).await?;
        if let Ok(encoded) = serde_json::to_string(&user) {
            self.cache.set(&key, encoded, USER_CACHE_TTL).await;
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::fakes::{FakeAuthVerifier, FakeCache, FakeUserRepo};
    use crate::model::User;

    fn user(id: &str) -> User {
        User { id: id.to_owned(), name: "Alice".to_owned(), email: "a@example.com".to_owned(), profile_image: None }
    }

    #[tokio::test]
    async fn authenticates_valid_token_and_session() {
        let verifier = Arc::new(FakeAuthVerifier::new());
        verifier.register("tok", "u1", "sess1").await;
        let users = Arc::new(FakeUserRepo::new());
        users.insert(user("u1")).await;
        let cache = Arc::new(FakeCache::new());

        let auth = SessionAuthenticator::new(verifier, users, cache);
        let (u, s) = auth.authenticate("tok", "sess1").await.expect("should authenticate");
        assert_eq!(u.id, "u1");
        assert_eq!(s.user_id, "u1");
    }

    #[tokio::test]
    async fn rejects_invalid_token() {
        let verifier = Arc::new(FakeAuthVerifier::new());
        let users = Arc::new(FakeUserRepo::new());
        let cache = Arc::new(FakeCache::new());
        let auth = SessionAuthenticator::new(verifier, users, cache);

        assert_eq!(auth.authenticate("bogus", "sess1").await.unwrap_err(), ChatError::InvalidToken);
    }

    #[tokio::test]
    async fn rejects_session_not_owned_by_token_user() {
        let verifier = Arc::new(FakeAuthVerifier::new());
        verifier.register("tok", "u1", "sess-of-u2").await;
        // Overwrite ownership of the session to a different user.
        verifier.register("tok2", "u2", "sess-of-u2").await;
        let users = Arc::new(FakeUserRepo::new());
        let cache = Arc::new(FakeCache::new());
        let auth = SessionAuthenticator::new(verifier, users, cache);

        assert_eq!(auth.authenticate("tok", "sess-of-u2").await.unwrap_err(), ChatError::InvalidSession);
    }

    #[tokio::test]
    async fn caches_user_record_across_calls() {
        let verifier = Arc::new(FakeAuthVerifier::new());
        verifier.register("tok", "u1", "sess1").await;
        let users = Arc::new(FakeUserRepo::new());
        users.insert(user("u1")).await;
        let cache = Arc::new(FakeCache::new());
        let auth = SessionAuthenticator::new(Arc::clone(&verifier) as _, Arc::clone(&users) as _, Arc::clone(&cache) as _);

        auth.authenticate("tok", "sess1").await.expect("first auth");
        assert!(cache.get("user:u1").await.is_some());
    }
}
