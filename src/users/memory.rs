use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo_types::{User, UserPatch};
use super::repo::{check_before_save, CredentialStore, SaveOptions, StoreError, StoreResult};

/// `CredentialStore` kept in process memory, with the same uniqueness rules
/// as the `users` table.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn clash(users: &HashMap<Uuid, User>, id: Uuid, username: &str, email: &str) -> bool {
    users
        .values()
        .any(|u| u.id != id && (u.username == username || u.email == email))
}

#[async_trait]
impl CredentialStore for MemoryUserStore {
    async fn insert(&self, user: &User) -> StoreResult<User> {
        check_before_save(user, SaveOptions { validate: true })?;
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) || clash(&users, user.id, &user.username, &user.email) {
            return Err(StoreError::Conflict("username or email already exists".into()));
        }
        users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        let found = users
            .values()
            .filter(|u| {
                username.is_some_and(|n| u.username == n) || email.is_some_and(|e| u.email == e)
            })
            .min_by_key(|u| u.created_at)
            .cloned();
        Ok(found)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn save(&self, user: &User, opts: SaveOptions) -> StoreResult<()> {
        check_before_save(user, opts)?;
        let mut users = self.users.write().await;
        if clash(&users, user.id, &user.username, &user.email) {
            return Err(StoreError::Conflict("username or email already exists".into()));
        }
        if let Some(slot) = users.get_mut(&user.id) {
            *slot = user.clone();
            slot.updated_at = time::OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn update_fields(&self, id: Uuid, patch: &UserPatch) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        if let Some(email) = &patch.email {
            if users.values().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::Conflict("username or email already exists".into()));
            }
        }
        Ok(users.get_mut(&id).map(|u| {
            patch.apply(u);
            u.clone()
        }))
    }

    async fn rotate_refresh_token(&self, id: Uuid, expected: &str, new: &str) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(u) if u.refresh_token.as_deref() == Some(expected) => {
                u.refresh_token = Some(new.to_string());
                u.updated_at = time::OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::NewUser;

    fn hashed(username: &str, email: &str) -> User {
        let mut u = User::new(
            NewUser {
                id: Uuid::new_v4(),
                username: username.into(),
                email: email.into(),
                full_name: "Test User".into(),
                avatar_url: "https://media.local/a.png".into(),
                cover_image_url: None,
            },
            "pw",
        );
        u.take_pending_password();
        u.password_hash = "$argon2id$fake".into();
        u
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_username_or_email() {
        let store = MemoryUserStore::new();
        store.insert(&hashed("alice", "a@x.com")).await.unwrap();

        let err = store.insert(&hashed("alice", "other@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let err = store.insert(&hashed("bob", "a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn insert_refuses_pending_password() {
        let store = MemoryUserStore::new();
        let mut u = hashed("alice", "a@x.com");
        u.set_password("plain");
        let err = store.insert(&u).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn find_by_either_field() {
        let store = MemoryUserStore::new();
        let alice = store.insert(&hashed("alice", "a@x.com")).await.unwrap();

        let by_name = store.find_by_username_or_email(Some("alice"), None).await.unwrap();
        assert_eq!(by_name.unwrap().id, alice.id);
        let by_mail = store.find_by_username_or_email(None, Some("a@x.com")).await.unwrap();
        assert_eq!(by_mail.unwrap().id, alice.id);
        let none = store.find_by_username_or_email(None, None).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn rotate_is_compare_and_swap() {
        let store = MemoryUserStore::new();
        let mut u = hashed("alice", "a@x.com");
        u.refresh_token = Some("one".into());
        let u = store.insert(&u).await.unwrap();

        assert!(store.rotate_refresh_token(u.id, "one", "two").await.unwrap());
        assert!(!store.rotate_refresh_token(u.id, "one", "three").await.unwrap());
        let stored = store.find_by_id(u.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn update_fields_detects_email_clash() {
        let store = MemoryUserStore::new();
        store.insert(&hashed("alice", "a@x.com")).await.unwrap();
        let bob = store.insert(&hashed("bob", "b@x.com")).await.unwrap();

        let patch = UserPatch {
            email: Some("a@x.com".into()),
            ..UserPatch::default()
        };
        let err = store.update_fields(bob.id, &patch).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let missing = store
            .update_fields(Uuid::new_v4(), &UserPatch::clear_refresh_token())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn save_validates_only_when_asked() {
        let store = MemoryUserStore::new();
        let mut u = store.insert(&hashed("alice", "a@x.com")).await.unwrap();

        u.full_name = String::new();
        let err = store.save(&u, SaveOptions { validate: true }).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        store.save(&u, SaveOptions { validate: false }).await.unwrap();
        let stored = store.find_by_id(u.id).await.unwrap().unwrap();
        assert!(stored.full_name.is_empty());
    }
}
