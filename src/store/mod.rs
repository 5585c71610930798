//! Storage abstraction layer.
//!
//! One uniform user/photo contract over three persistence backends
//! (Postgres, MongoDB, DynamoDB). Route handlers only ever see the
//! [`Store`] trait and the opaque [`Id`] type; each backend normalizes
//! to its native key style at its own boundary.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::{AppConfig, StoreBackend};

mod dynamo;
mod mongo;
mod postgres;

pub use dynamo::DynamoStore;
pub use mongo::MongoStore;
pub use postgres::PgStore;

/// Opaque identifier for users and photos.
///
/// Backends assign either integer keys (Postgres serials, millisecond
/// epoch photo ids) or string keys (UUID user ids). Callers compare
/// ids and print them, nothing more; only a backend may call
/// [`Id::as_i64`] to recover its own native form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Int(i64),
    Str(String),
}

impl Id {
    /// Parse an id arriving as text (URL path segment, JWT subject).
    /// Numeric text becomes an integer id, anything else stays a string.
    pub fn parse(s: &str) -> Id {
        s.parse::<i64>()
            .map(Id::Int)
            .unwrap_or_else(|_| Id::Str(s.to_string()))
    }

    /// Native integer form, if this id has one. String ids holding
    /// digits (an integer id that round-tripped through a URL) parse.
    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Id::Int(n) => Some(*n),
            Id::Str(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Int(n) => write!(f, "{}", n),
            Id::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Int(n)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::Str(s)
    }
}

/// User account record in the uniform shape.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
}

/// Photo record in the uniform shape. `storage_bucket`/`storage_key`
/// locate the blob in object storage; the rest is metadata.
#[derive(Debug, Clone)]
pub struct Photo {
    pub id: Id,
    pub user_id: Id,
    pub storage_bucket: String,
    pub storage_key: String,
    pub original_name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub uploaded_at: OffsetDateTime,
}

/// Input for [`Store::add_photo`]; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub storage_bucket: String,
    pub storage_key: String,
    pub original_name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// No matching record, including ownership mismatches — absence and
    /// another user's record are deliberately indistinguishable.
    #[error("not found")]
    NotFound,
    /// Signup conflict: the username is already taken.
    #[error("username already taken")]
    DuplicateUsername,
    /// The persistence engine failed or returned a record this layer
    /// cannot interpret. Not retried here.
    #[error("storage backend unavailable")]
    Unavailable(#[source] anyhow::Error),
}

impl StoreError {
    pub(crate) fn unavailable<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Unavailable(anyhow::Error::new(err))
    }
}

/// The uniform storage contract. Every operation is a single
/// self-contained read or write, safe to call concurrently; every photo
/// read filters by owner.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new user. Fails with [`StoreError::DuplicateUsername`]
    /// if the username exists; never overwrites.
    async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<Id, StoreError>;

    /// Exact, case-sensitive username lookup.
    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError>;

    /// Persist one photo record. The returned id is immediately usable
    /// with [`Store::get_photo`] and is monotonically non-decreasing
    /// with insertion order within the user.
    async fn add_photo(&self, user_id: &Id, photo: NewPhoto) -> Result<Id, StoreError>;

    /// A user's photos, newest first, paginated by offset/limit.
    async fn list_photos(
        &self,
        user_id: &Id,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>, StoreError>;

    /// Fetch one photo by id and owner. The owner filter is mandatory:
    /// an id belonging to another user is `NotFound`.
    async fn get_photo(&self, photo_id: &Id, user_id: &Id) -> Result<Photo, StoreError>;

    /// Case-insensitive substring search over title, description, tags
    /// and original filename. An empty or absent query behaves exactly
    /// like [`Store::list_photos`].
    async fn search_photos(
        &self,
        user_id: &Id,
        query: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>, StoreError>;
}

/// Build the one store implementation selected by configuration.
/// Called once at startup; the choice is immutable for the process.
pub async fn connect(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.backend {
        StoreBackend::Postgres => Arc::new(PgStore::connect(config).await?),
        StoreBackend::Mongo => Arc::new(MongoStore::connect(config).await?),
        StoreBackend::Dynamo => Arc::new(DynamoStore::connect(config).await?),
    };
    tracing::info!(backend = %config.backend, "store connected");
    Ok(store)
}

/// Upper bound on the working set retrieved for in-process search
/// filtering. Per-user catalogs are small; a real text index would
/// replace this, behind the same `search_photos` contract.
pub(crate) const SEARCH_SCAN_LIMIT: usize = 1000;

static LAST_PHOTO_ID: AtomicI64 = AtomicI64::new(0);

/// Millisecond-epoch photo id, strictly monotonic within the process.
/// Two uploads in the same millisecond get distinct, ordered ids.
pub(crate) fn next_photo_id() -> i64 {
    let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    let mut last = LAST_PHOTO_ID.load(Ordering::SeqCst);
    loop {
        let next = now.max(last + 1);
        match LAST_PHOTO_ID.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}

/// True if `needle_lower` (already lowercased) occurs in any of the
/// photo's text fields. Unset fields never match.
pub(crate) fn matches_needle(photo: &Photo, needle_lower: &str) -> bool {
    [
        Some(photo.original_name.as_str()),
        photo.title.as_deref(),
        photo.description.as_deref(),
        photo.tags.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(needle_lower))
}

/// Skip `offset` then take up to `limit`. Negative values clamp to zero.
pub(crate) fn paginate<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

/// Normalize a search query: `None` or blank means "no filter".
pub(crate) fn normalize_query(query: Option<&str>) -> Option<&str> {
    query.map(str::trim).filter(|q| !q.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    fn photo(id: i64, user: &str, original_name: &str) -> Photo {
        Photo {
            id: Id::Int(id),
            user_id: Id::Str(user.to_string()),
            storage_bucket: "bucket".into(),
            storage_key: format!("users/{}/{}", user, id),
            original_name: original_name.to_string(),
            title: None,
            description: None,
            tags: None,
            content_type: None,
            size_bytes: None,
            uploaded_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn id_parse_numeric_and_string() {
        assert_eq!(Id::parse("42"), Id::Int(42));
        assert_eq!(
            Id::parse("9a1f0c5e-aaaa-bbbb-cccc-000000000000"),
            Id::Str("9a1f0c5e-aaaa-bbbb-cccc-000000000000".into())
        );
        assert_eq!(Id::Int(42).to_string(), "42");
        assert_eq!(Id::Str("abc".into()).to_string(), "abc");
    }

    #[test]
    fn id_as_i64_parses_numeric_strings() {
        assert_eq!(Id::Int(7).as_i64(), Some(7));
        assert_eq!(Id::Str("7".into()).as_i64(), Some(7));
        assert_eq!(Id::Str("not-a-number".into()).as_i64(), None);
    }

    #[test]
    fn id_serializes_untagged() {
        assert_eq!(serde_json::to_string(&Id::Int(5)).unwrap(), "5");
        assert_eq!(serde_json::to_string(&Id::Str("u-1".into())).unwrap(), "\"u-1\"");
        assert_eq!(serde_json::from_str::<Id>("5").unwrap(), Id::Int(5));
        assert_eq!(serde_json::from_str::<Id>("\"u-1\"").unwrap(), Id::Str("u-1".into()));
    }

    #[test]
    fn photo_ids_strictly_increase() {
        let mut prev = next_photo_id();
        for _ in 0..200 {
            let next = next_photo_id();
            assert!(next > prev, "{} should be > {}", next, prev);
            prev = next;
        }
    }

    #[test]
    fn needle_matches_any_text_field_case_insensitive() {
        let mut p = photo(1, "u1", "IMG_0001.jpg");
        p.title = Some("Beach Sunset".into());
        p.tags = Some("vacation,ocean".into());
        assert!(matches_needle(&p, "beach"));
        assert!(matches_needle(&p, "ocean"));
        assert!(matches_needle(&p, "img_0001"));
        assert!(!matches_needle(&p, "hiking"));
        // description unset: never matches, never errors
        assert!(!matches_needle(&p, "zzz"));
    }

    #[test]
    fn paginate_skips_and_takes() {
        let v: Vec<i32> = (0..5).collect();
        assert_eq!(paginate(v.clone(), 2, 2), vec![2, 3]);
        assert_eq!(paginate(v.clone(), 50, 0), vec![0, 1, 2, 3, 4]);
        assert_eq!(paginate(v.clone(), 2, 10), Vec::<i32>::new());
        assert_eq!(paginate(v, -1, -1), Vec::<i32>::new());
    }

    #[test]
    fn normalize_query_blanks_out() {
        assert_eq!(normalize_query(None), None);
        assert_eq!(normalize_query(Some("")), None);
        assert_eq!(normalize_query(Some("   ")), None);
        assert_eq!(normalize_query(Some(" sunset ")), Some("sunset"));
    }

    /// In-memory store used to exercise the trait contract end to end
    /// with the same filter/pagination/id helpers the real backends use.
    #[derive(Default)]
    struct MemoryStore {
        inner: Mutex<MemoryInner>,
    }

    #[derive(Default)]
    struct MemoryInner {
        users: HashMap<String, User>,
        photos: Vec<Photo>,
    }

    #[async_trait]
    impl Store for MemoryStore {
        async fn create_user(
            &self,
            username: &str,
            email: Option<&str>,
            password_hash: &str,
        ) -> Result<Id, StoreError> {
            let mut inner = self.inner.lock().await;
            if inner.users.contains_key(username) {
                return Err(StoreError::DuplicateUsername);
            }
            let id = Id::Str(uuid::Uuid::new_v4().to_string());
            inner.users.insert(
                username.to_string(),
                User {
                    id: id.clone(),
                    username: username.to_string(),
                    email: email.map(str::to_string),
                    password_hash: password_hash.to_string(),
                },
            );
            Ok(id)
        }

        async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError> {
            let inner = self.inner.lock().await;
            inner.users.get(username).cloned().ok_or(StoreError::NotFound)
        }

        async fn add_photo(&self, user_id: &Id, new: NewPhoto) -> Result<Id, StoreError> {
            let id = Id::Int(next_photo_id());
            let mut inner = self.inner.lock().await;
            inner.photos.push(Photo {
                id: id.clone(),
                user_id: user_id.clone(),
                storage_bucket: new.storage_bucket,
                storage_key: new.storage_key,
                original_name: new.original_name,
                title: new.title,
                description: new.description,
                tags: new.tags,
                content_type: new.content_type,
                size_bytes: new.size_bytes,
                uploaded_at: OffsetDateTime::now_utc(),
            });
            Ok(id)
        }

        async fn list_photos(
            &self,
            user_id: &Id,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<Photo>, StoreError> {
            let inner = self.inner.lock().await;
            let mut mine: Vec<Photo> = inner
                .photos
                .iter()
                .filter(|p| &p.user_id == user_id)
                .cloned()
                .collect();
            mine.sort_by_key(|p| std::cmp::Reverse(p.id.as_i64()));
            Ok(paginate(mine, limit, offset))
        }

        async fn get_photo(&self, photo_id: &Id, user_id: &Id) -> Result<Photo, StoreError> {
            let inner = self.inner.lock().await;
            inner
                .photos
                .iter()
                .find(|p| &p.id == photo_id && &p.user_id == user_id)
                .cloned()
                .ok_or(StoreError::NotFound)
        }

        async fn search_photos(
            &self,
            user_id: &Id,
            query: Option<&str>,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<Photo>, StoreError> {
            let Some(q) = normalize_query(query) else {
                return self.list_photos(user_id, limit, offset).await;
            };
            let needle = q.to_lowercase();
            let all = self.list_photos(user_id, SEARCH_SCAN_LIMIT as i64, 0).await?;
            let matching = all.into_iter().filter(|p| matches_needle(p, &needle)).collect();
            Ok(paginate(matching, limit, offset))
        }
    }

    fn new_photo(name: &str, title: Option<&str>, tags: Option<&str>) -> NewPhoto {
        NewPhoto {
            storage_bucket: "bucket".into(),
            storage_key: format!("users/u/{}", name),
            original_name: name.to_string(),
            title: title.map(str::to_string),
            description: None,
            tags: tags.map(str::to_string),
            content_type: Some("image/jpeg".into()),
            size_bytes: Some(1024),
        }
    }

    #[tokio::test]
    async fn create_then_lookup_user_roundtrips() {
        let store = MemoryStore::default();
        let id = store
            .create_user("alice", Some("alice@example.com"), "argon2-digest")
            .await
            .unwrap();
        let user = store.get_user_by_username("alice").await.unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.username, "alice");
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));
        assert_eq!(user.password_hash, "argon2-digest");
    }

    #[tokio::test]
    async fn duplicate_username_rejected_first_record_kept() {
        let store = MemoryStore::default();
        store.create_user("bob", None, "hash-one").await.unwrap();
        let err = store
            .create_user("bob", Some("other@example.com"), "hash-two")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUsername));
        let user = store.get_user_by_username("bob").await.unwrap();
        assert_eq!(user.password_hash, "hash-one");
        assert_eq!(user.email, None);
    }

    #[tokio::test]
    async fn username_lookup_is_case_sensitive() {
        let store = MemoryStore::default();
        store.create_user("Carol", None, "h").await.unwrap();
        assert!(matches!(
            store.get_user_by_username("carol").await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn get_photo_enforces_ownership() {
        let store = MemoryStore::default();
        let alice = store.create_user("alice", None, "h").await.unwrap();
        let mallory = store.create_user("mallory", None, "h").await.unwrap();
        let photo_id = store
            .add_photo(&alice, new_photo("cat.jpg", None, None))
            .await
            .unwrap();

        let fetched = store.get_photo(&photo_id, &alice).await.unwrap();
        assert_eq!(fetched.original_name, "cat.jpg");
        assert_eq!(fetched.user_id, alice);

        assert!(matches!(
            store.get_photo(&photo_id, &mallory).await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = MemoryStore::default();
        let u = store.create_user("u", None, "h").await.unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            store.add_photo(&u, new_photo(name, None, None)).await.unwrap();
        }
        let names: Vec<String> = store
            .list_photos(&u, 50, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.original_name)
            .collect();
        assert_eq!(names, vec!["c.jpg", "b.jpg", "a.jpg"]);
    }

    #[tokio::test]
    async fn empty_query_equals_list() {
        let store = MemoryStore::default();
        let u = store.create_user("u", None, "h").await.unwrap();
        for name in ["a.jpg", "b.jpg"] {
            store.add_photo(&u, new_photo(name, None, None)).await.unwrap();
        }
        let listed: Vec<Id> = store
            .list_photos(&u, 50, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        for query in [None, Some(""), Some("  ")] {
            let searched: Vec<Id> = store
                .search_photos(&u, query, 50, 0)
                .await
                .unwrap()
                .into_iter()
                .map(|p| p.id)
                .collect();
            assert_eq!(searched, listed);
        }
    }

    #[tokio::test]
    async fn search_matches_fields_case_insensitively() {
        let store = MemoryStore::default();
        let u = store.create_user("u", None, "h").await.unwrap();
        store
            .add_photo(
                &u,
                new_photo("beach.jpg", Some("Beach Sunset"), Some("vacation,ocean")),
            )
            .await
            .unwrap();
        store
            .add_photo(
                &u,
                new_photo("mountain.jpg", Some("Mountain View"), Some("vacation,hiking")),
            )
            .await
            .unwrap();

        let titles = |photos: Vec<Photo>| -> Vec<String> {
            photos.into_iter().filter_map(|p| p.title).collect()
        };

        let both = titles(store.search_photos(&u, Some("vacation"), 50, 0).await.unwrap());
        assert_eq!(both, vec!["Mountain View", "Beach Sunset"]);

        let ocean = titles(store.search_photos(&u, Some("ocean"), 50, 0).await.unwrap());
        assert_eq!(ocean, vec!["Beach Sunset"]);

        let upper = titles(store.search_photos(&u, Some("BEACH"), 50, 0).await.unwrap());
        assert_eq!(upper, vec!["Beach Sunset"]);

        let none = store.search_photos(&u, Some("zzz"), 50, 0).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn pagination_returns_middle_slice() {
        let store = MemoryStore::default();
        let u = store.create_user("u", None, "h").await.unwrap();
        for i in 1..=5 {
            store
                .add_photo(&u, new_photo(&format!("{}.jpg", i), None, None))
                .await
                .unwrap();
        }
        // newest first: 5,4,3,2,1 — offset 2/limit 2 is the 3rd and 4th newest
        let names: Vec<String> = store
            .list_photos(&u, 2, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.original_name)
            .collect();
        assert_eq!(names, vec!["3.jpg", "2.jpg"]);
    }
}
