use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Admin => "Admin",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,             // UUID
    pub email: String,          // lower-cased, unique
    pub password_hash: String,  // argon2id PHC string
    pub role: Role,
    pub deleted: bool,          // soft delete flag
    pub created_at: i64,        // unix seconds
    pub updated_at: i64,        // unix seconds
}

/// What leaves the server about a user. No password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub deleted: bool,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

impl From<&UserRecord> for PublicUser {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            deleted: user.deleted,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    EmailTaken,
    NotFound,
}

/// Listing filter for [`UserStore::query`]. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFilter {
    pub page: usize,
    pub limit: usize,
    pub search: Option<String>,
    pub role: Option<Role>,
    pub deleted: bool,
}

impl Default for UserFilter {
    fn default() -> Self {
        Self {
            page: 1,
            limit: usize::MAX,
            search: None,
            role: None,
            deleted: false,
        }
    }
}

#[derive(Default)]
struct Users {
    by_id: HashMap<String, UserRecord>,
    by_email: HashMap<String, String>,
}

/// In-memory user records keyed by id, with a unique email index.
#[derive(Default)]
pub struct UserStore {
    inner: RwLock<Users>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Users> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Users> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Soft-deleted users still hold their email.
    pub fn email_exists(&self, email: &str) -> bool {
        self.read().by_email.contains_key(&email.to_lowercase())
    }

    pub fn insert(&self, email: &str, password_hash: String, role: Role) -> Result<UserRecord, StoreError> {
        let email = email.to_lowercase();
        let mut users = self.write();
        if users.by_email.contains_key(&email) {
            return Err(StoreError::EmailTaken);
        }

        let now = chrono::Utc::now().timestamp();
        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
            password_hash,
            role,
            deleted: false,
            created_at: now,
            updated_at: now,
        };

        users.by_email.insert(email, user.id.clone());
        users.by_id.insert(user.id.clone(), user.clone());
        tracing::debug!("User {} created with role {}", user.id, user.role.as_str());
        Ok(user)
    }

    /// Active user by email.
    pub fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        let users = self.read();
        let id = users.by_email.get(&email.to_lowercase())?;
        users.by_id.get(id).filter(|u| !u.deleted).cloned()
    }

    /// Active user by id.
    pub fn get(&self, id: &str) -> Option<UserRecord> {
        self.read().by_id.get(id).filter(|u| !u.deleted).cloned()
    }

    /// One page of users matching `filter`, plus the total match count.
    pub fn query(&self, filter: &UserFilter) -> (Vec<UserRecord>, usize) {
        let search = filter.search.as_ref().map(|s| s.to_lowercase());
        let mut matched: Vec<UserRecord> = self
            .read()
            .by_id
            .values()
            .filter(|u| u.deleted == filter.deleted)
            .filter(|u| filter.role.is_none_or(|role| u.role == role))
            .filter(|u| search.as_deref().is_none_or(|s| u.email.contains(s)))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.email.cmp(&b.email)));

        let total = matched.len();
        let skip = filter.page.saturating_sub(1).saturating_mul(filter.limit);
        let page = matched.into_iter().skip(skip).take(filter.limit).collect();
        (page, total)
    }

    /// True when `email` belongs to a record other than `id`, deleted or not.
    pub fn email_taken_by_other(&self, email: &str, id: &str) -> bool {
        self.read()
            .by_email
            .get(&email.to_lowercase())
            .is_some_and(|owner| owner != id)
    }

    /// Replace email, hash and role of an active user, moving the email index.
    pub fn update(&self, id: &str, email: &str, password_hash: String, role: Role) -> Result<UserRecord, StoreError> {
        let email = email.to_lowercase();
        let mut users = self.write();
        if users.by_email.get(&email).is_some_and(|owner| owner != id) {
            return Err(StoreError::EmailTaken);
        }

        let user = users
            .by_id
            .get_mut(id)
            .filter(|u| !u.deleted)
            .ok_or(StoreError::NotFound)?;

        let previous = std::mem::replace(&mut user.email, email.clone());
        user.password_hash = password_hash;
        user.role = role;
        user.updated_at = chrono::Utc::now().timestamp();
        let updated = user.clone();

        if previous != email {
            users.by_email.remove(&previous);
            users.by_email.insert(email, updated.id.clone());
        }
        tracing::debug!("User {} updated", id);
        Ok(updated)
    }

    /// Set or clear the soft-delete flag. Works on deleted records too so
    /// they can be restored.
    pub fn set_deleted(&self, id: &str, deleted: bool) -> Result<UserRecord, StoreError> {
        let mut users = self.write();
        let user = users.by_id.get_mut(id).ok_or(StoreError::NotFound)?;

        user.deleted = deleted;
        user.updated_at = chrono::Utc::now().timestamp();
        tracing::debug!("User {} deleted flag set to {}", id, deleted);
        Ok(user.clone())
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_unique_case_insensitively() {
        let store = UserStore::new();
        store.insert("Ann@Example.com", "h".into(), Role::User).unwrap();
        assert_eq!(
            store.insert("ann@example.COM", "h".into(), Role::User).unwrap_err(),
            StoreError::EmailTaken
        );
        assert_eq!(store.find_by_email("ANN@example.com").unwrap().email, "ann@example.com");
    }

    #[test]
    fn soft_deleted_users_disappear_but_keep_email() {
        let store = UserStore::new();
        let ann = store.insert("ann@example.com", "h".into(), Role::User).unwrap();
        store.insert("bob@example.com", "h".into(), Role::Admin).unwrap();

        store.set_deleted(&ann.id, true).unwrap();

        assert!(store.get(&ann.id).is_none());
        assert!(store.find_by_email("ann@example.com").is_none());
        assert_eq!(store.query(&UserFilter::default()).1, 1);
        assert!(store.email_exists("ann@example.com"));
        assert_eq!(store.len(), 2);

        let restored = store.set_deleted(&ann.id, false).unwrap();
        assert!(!restored.deleted);
        assert_eq!(store.find_by_email("ann@example.com").unwrap().id, ann.id);
        assert_eq!(store.set_deleted("no-such-id", true).unwrap_err(), StoreError::NotFound);
    }

    #[test]
    fn update_moves_the_email_index() {
        let store = UserStore::new();
        let ann = store.insert("ann@example.com", "h1".into(), Role::User).unwrap();
        store.insert("bob@example.com", "h".into(), Role::User).unwrap();

        assert_eq!(
            store.update(&ann.id, "BOB@example.com", "h2".into(), Role::User).unwrap_err(),
            StoreError::EmailTaken
        );

        let updated = store.update(&ann.id, "Annie@Example.com", "h2".into(), Role::Admin).unwrap();
        assert_eq!(updated.email, "annie@example.com");
        assert_eq!(updated.password_hash, "h2");
        assert_eq!(updated.role, Role::Admin);
        assert!(store.find_by_email("ann@example.com").is_none());
        assert!(!store.email_exists("ann@example.com"));
        assert_eq!(store.find_by_email("annie@example.com").unwrap().id, ann.id);

        // keeping the same email is not a conflict with itself
        assert!(store.update(&ann.id, "annie@example.com", "h3".into(), Role::Admin).is_ok());
        assert!(!store.email_taken_by_other("annie@example.com", &ann.id));
        assert!(store.email_taken_by_other("bob@example.com", &ann.id));
    }

    #[test]
    fn update_of_deleted_user_is_not_found() {
        let store = UserStore::new();
        let ann = store.insert("ann@example.com", "h".into(), Role::User).unwrap();
        store.set_deleted(&ann.id, true).unwrap();
        assert_eq!(
            store.update(&ann.id, "ann@example.com", "h".into(), Role::User).unwrap_err(),
            StoreError::NotFound
        );
    }

    #[test]
    fn query_filters_and_pages() {
        let store = UserStore::new();
        for (email, role) in [
            ("ann@example.com", Role::User),
            ("bob@example.com", Role::Admin),
            ("cat@other.org", Role::User),
            ("dan@example.com", Role::User),
        ] {
            store.insert(email, "h".into(), role).unwrap();
        }
        let dan = store.find_by_email("dan@example.com").unwrap();
        store.set_deleted(&dan.id, true).unwrap();

        let (users, total) = store.query(&UserFilter { search: Some("EXAMPLE".into()), ..UserFilter::default() });
        assert_eq!(total, 2);
        assert!(users.iter().all(|u| u.email.ends_with("@example.com")));

        let (users, total) = store.query(&UserFilter { role: Some(Role::Admin), ..UserFilter::default() });
        assert_eq!((users.len(), total), (1, 1));
        assert_eq!(users[0].email, "bob@example.com");

        let (users, total) = store.query(&UserFilter { deleted: true, ..UserFilter::default() });
        assert_eq!((users.len(), total), (1, 1));
        assert_eq!(users[0].id, dan.id);

        let first = store.query(&UserFilter { page: 1, limit: 2, ..UserFilter::default() });
        let second = store.query(&UserFilter { page: 2, limit: 2, ..UserFilter::default() });
        let third = store.query(&UserFilter { page: 3, limit: 2, ..UserFilter::default() });
        assert_eq!((first.0.len(), first.1), (2, 3));
        assert_eq!((second.0.len(), second.1), (1, 3));
        assert_eq!((third.0.len(), third.1), (0, 3));
        assert!(first.0.iter().all(|a| second.0.iter().all(|b| a.id != b.id)));
    }

    #[test]
    fn public_view_has_no_hash() {
        let store = UserStore::new();
        let user = store.insert("ann@example.com", "$argon2id$secret".into(), Role::User).unwrap();
        let json = serde_json::to_string(&PublicUser::from(&user)).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(json.contains("\"role\":\"User\""));
    }
}
